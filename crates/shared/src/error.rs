use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    Validation,
    MalformedInput,
    PayloadTooLarge,
    Conflict,
    Internal,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{what} not found"))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }
}

/// Body of every failed API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorCode,
    pub message: String,
}

impl From<ApiError> for ErrorEnvelope {
    fn from(value: ApiError) -> Self {
        Self {
            success: false,
            error: value.code,
            message: value.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_as_snake_case() {
        let json = serde_json::to_string(&ErrorCode::PayloadTooLarge).expect("json");
        assert_eq!(json, "\"payload_too_large\"");
    }

    #[test]
    fn envelope_carries_failure_flag() {
        let envelope = ErrorEnvelope::from(ApiError::not_found("project"));
        let value = serde_json::to_value(&envelope).expect("json");
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "not_found");
        assert_eq!(value["message"], "project not found");
    }

    #[test]
    fn display_names_the_code() {
        let error = ApiError::validation("title must not be empty");
        assert_eq!(error.to_string(), "Validation: title must not be empty");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{FrameId, LayerId, ProjectId, UserId};

/// A request field that may be missing, explicitly `null`, or carry a value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Patch<T> {
    #[default]
    Absent,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Patch::Value(value),
            None => Patch::Null,
        })
    }
}

/// Successful API response: `{"success": true, ...body}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Success<T> {
    pub success: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Success<T> {
    pub fn new(body: T) -> Self {
        Self {
            success: true,
            body,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: ProjectId,
    pub title: String,
    pub description: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSummary {
    pub frame_id: FrameId,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    pub has_preview: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerPayload {
    pub layer_id: LayerId,
    pub order: u32,
    pub name: String,
    pub visible: bool,
    pub opacity: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameDetail {
    pub frame_id: FrameId,
    pub index: u32,
    pub content_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    pub has_preview: bool,
    pub updated_at: DateTime<Utc>,
    pub layers: Vec<LayerPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fps: Option<i64>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectResponse {
    pub project: ProjectSummary,
    pub frame: FrameDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameProjectRequest {
    pub title: String,
}

/// Partial project update; only present fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettingsRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fps: Option<i64>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResponse {
    pub project: ProjectSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectListResponse {
    pub projects: Vec<ProjectSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDeletedResponse {
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameListResponse {
    pub frames: Vec<FrameSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateFrameRequest {
    /// Index of an existing frame to clone.
    #[serde(default)]
    pub duplicate_from: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFrameResponse {
    pub frame: FrameDetail,
    pub frames: Vec<FrameSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFrameResponse {
    pub frames: Vec<FrameSummary>,
    pub active_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResponse {
    pub frame: FrameDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderFramesRequest {
    pub order: Vec<FrameId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveFrameRequest {
    #[serde(default)]
    pub image_data: Option<String>,
    /// Either a JSON string stored verbatim or any other JSON value stored serialized.
    #[serde(default)]
    pub content_json: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveFrameResponse {
    pub frame: FrameSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerListResponse {
    pub layers: Vec<LayerPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateLayerRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerResponse {
    pub layer: LayerPayload,
}

/// Loosely typed on the wire; coerced by the request layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLayerRequest {
    #[serde(default)]
    pub name: Patch<Value>,
    #[serde(default)]
    pub visible: Patch<Value>,
    #[serde(default)]
    pub opacity: Patch<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderLayersRequest {
    /// Front-most layer first.
    pub order: Vec<LayerId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_distinguishes_absent_null_and_value() {
        let req: UpdateLayerRequest =
            serde_json::from_str(r#"{"name": null, "opacity": 40}"#).expect("json");
        assert_eq!(req.name, Patch::Null);
        assert!(req.visible.is_absent());
        assert_eq!(req.opacity, Patch::Value(serde_json::json!(40)));
    }

    #[test]
    fn success_envelope_flattens_body() {
        let value = serde_json::to_value(Success::new(ProjectDeletedResponse {
            project_id: ProjectId(7),
        }))
        .expect("json");
        assert_eq!(value, serde_json::json!({ "success": true, "project_id": 7 }));
    }
}

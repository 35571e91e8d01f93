//! Validation and coercion of loosely typed request payloads. Everything here
//! runs before any write.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sequencer::layers::{clamp_opacity, normalize_name, LayerPatch};
use serde_json::Value;
use shared::{
    domain::{MAX_CANVAS_SIDE, MAX_FPS, MAX_NAME_CHARS},
    error::{ApiError, ErrorCode},
    protocol::{Patch, UpdateLayerRequest},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

/// Decodes a base64 preview, optionally wrapped as a `data:<mime>;base64,` URI.
/// The extension follows the declared MIME type and defaults to png.
pub fn decode_image_data(raw: &str, max_bytes: usize) -> Result<DecodedImage, ApiError> {
    let raw = raw.trim();
    let (mime, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| ApiError::validation("image_data is not a valid data URI"))?;
            let mime = header.split(';').next().unwrap_or_default();
            (Some(mime.trim().to_ascii_lowercase()), payload)
        }
        None => (None, raw),
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| ApiError::validation("image_data is not valid base64"))?;
    if bytes.is_empty() {
        return Err(ApiError::validation("image_data is empty"));
    }
    if bytes.len() > max_bytes {
        return Err(ApiError::new(
            ErrorCode::PayloadTooLarge,
            format!("preview image exceeds {max_bytes} bytes"),
        ));
    }

    Ok(DecodedImage {
        bytes,
        extension: extension_for_mime(mime.as_deref()),
    })
}

fn extension_for_mime(mime: Option<&str>) -> &'static str {
    match mime {
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/webp") => "webp",
        _ => "png",
    }
}

/// Text to store for a frame's content. Strings are kept verbatim; any other
/// JSON value is serialized. `null` counts as absent.
pub fn content_json_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

pub fn layer_patch(request: &UpdateLayerRequest) -> Result<LayerPatch, ApiError> {
    Ok(LayerPatch {
        name: present(&request.name, "name")?
            .map(coerce_name)
            .transpose()?,
        visible: present(&request.visible, "visible")?
            .map(coerce_visible)
            .transpose()?,
        opacity: present(&request.opacity, "opacity")?
            .map(coerce_opacity)
            .transpose()?,
    })
}

fn present<'a>(field: &'a Patch<Value>, name: &str) -> Result<Option<&'a Value>, ApiError> {
    match field {
        Patch::Absent => Ok(None),
        Patch::Null => Err(ApiError::validation(format!("{name} must not be null"))),
        Patch::Value(value) => Ok(Some(value)),
    }
}

fn coerce_name(value: &Value) -> Result<String, ApiError> {
    value
        .as_str()
        .and_then(normalize_name)
        .ok_or_else(|| {
            ApiError::validation(format!(
                "name must be a non-empty string of at most {MAX_NAME_CHARS} characters"
            ))
        })
}

pub fn coerce_visible(value: &Value) -> Result<bool, ApiError> {
    let invalid = || ApiError::validation("visible must be a boolean");
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).ok_or_else(invalid),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

/// Integer coercion followed by a clamp into `[0, 100]`.
pub fn coerce_opacity(value: &Value) -> Result<u8, ApiError> {
    let raw = match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|n| n.trunc() as i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(|n| n.trunc() as i64)
            })
        }
        _ => None,
    };
    raw.map(clamp_opacity)
        .ok_or_else(|| ApiError::validation("opacity must be a number"))
}

/// Project title as given on create: blank becomes `fallback`.
pub fn title_or(raw: Option<&str>, fallback: &str) -> Result<String, ApiError> {
    match raw.map(str::trim).filter(|title| !title.is_empty()) {
        Some(title) => required_title(title),
        None => Ok(fallback.to_string()),
    }
}

/// Project title on rename: must be non-empty after trimming.
pub fn required_title(raw: &str) -> Result<String, ApiError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ApiError::validation("title must not be empty"));
    }
    if title.chars().count() > MAX_NAME_CHARS {
        return Err(ApiError::validation(format!(
            "title must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

pub fn canvas_side(name: &str, raw: i64) -> Result<u32, ApiError> {
    bounded(name, raw, MAX_CANVAS_SIDE)
}

pub fn fps(raw: i64) -> Result<u32, ApiError> {
    bounded("fps", raw, MAX_FPS)
}

fn bounded(name: &str, raw: i64, max: u32) -> Result<u32, ApiError> {
    u32::try_from(raw)
        .ok()
        .filter(|value| (1..=max).contains(value))
        .ok_or_else(|| ApiError::validation(format!("{name} must be between 1 and {max}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn data_uri_mime_selects_extension() {
        let webp = decode_image_data("data:image/webp;base64,AAAA", 1024).expect("webp");
        assert_eq!(webp.extension, "webp");
        assert_eq!(webp.bytes, vec![0, 0, 0]);

        let jpeg = decode_image_data("data:image/jpeg;base64,AAAA", 1024).expect("jpeg");
        assert_eq!(jpeg.extension, "jpg");

        let gif = decode_image_data("data:image/gif;base64,AAAA", 1024).expect("gif");
        assert_eq!(gif.extension, "png");
    }

    #[test]
    fn bare_base64_defaults_to_png() {
        let image = decode_image_data("AAAA", 1024).expect("png");
        assert_eq!(image.extension, "png");
    }

    #[test]
    fn oversized_preview_is_rejected() {
        let err = decode_image_data("AAAAAAAA", 5).expect_err("too large");
        assert_eq!(err.code, ErrorCode::PayloadTooLarge);
    }

    #[test]
    fn broken_base64_is_a_validation_error() {
        let err = decode_image_data("data:image/png;base64,@@@", 1024).expect_err("invalid");
        assert_eq!(err.code, ErrorCode::Validation);
        let err = decode_image_data("data:image/png;base64", 1024).expect_err("no comma");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[test]
    fn content_json_objects_are_serialized() {
        let object = json!({ "strokes": [{ "x": 1 }] });
        let text = content_json_text(Some(&object)).expect("text");
        let parsed: Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(parsed, object);

        assert_eq!(
            content_json_text(Some(&json!("{\"raw\":true}"))).as_deref(),
            Some("{\"raw\":true}")
        );
        assert_eq!(content_json_text(Some(&Value::Null)), None);
        assert_eq!(content_json_text(None), None);
    }

    #[test]
    fn opacity_is_coerced_then_clamped() {
        assert_eq!(coerce_opacity(&json!(150)).expect("int"), 100);
        assert_eq!(coerce_opacity(&json!(-5)).expect("int"), 0);
        assert_eq!(coerce_opacity(&json!(55.9)).expect("float"), 55);
        assert_eq!(coerce_opacity(&json!("70")).expect("string"), 70);
        assert_eq!(coerce_opacity(&json!("12.5")).expect("string"), 12);
        assert!(coerce_opacity(&json!("opaque")).is_err());
        assert!(coerce_opacity(&json!([1])).is_err());
    }

    #[test]
    fn visible_accepts_common_spellings() {
        assert!(coerce_visible(&json!(true)).expect("bool"));
        assert!(!coerce_visible(&json!(0)).expect("number"));
        assert!(coerce_visible(&json!("On")).expect("string"));
        assert!(!coerce_visible(&json!("false")).expect("string"));
        assert!(coerce_visible(&json!("maybe")).is_err());
        assert!(coerce_visible(&json!({})).is_err());
    }

    #[test]
    fn layer_patch_only_sets_present_fields() {
        let request: UpdateLayerRequest =
            serde_json::from_value(json!({ "opacity": 150 })).expect("request");
        let patch = layer_patch(&request).expect("patch");
        assert_eq!(patch.opacity, Some(100));
        assert_eq!(patch.name, None);
        assert_eq!(patch.visible, None);

        let empty = layer_patch(&UpdateLayerRequest::default()).expect("patch");
        assert!(empty.is_empty());
    }

    #[test]
    fn layer_patch_rejects_blank_name_and_nulls() {
        let blank: UpdateLayerRequest =
            serde_json::from_value(json!({ "name": "   ", "opacity": 10 })).expect("request");
        assert_eq!(
            layer_patch(&blank).expect_err("blank").code,
            ErrorCode::Validation
        );

        let null: UpdateLayerRequest =
            serde_json::from_value(json!({ "visible": null })).expect("request");
        assert!(layer_patch(&null).is_err());
    }

    #[test]
    fn titles_and_canvas_bounds() {
        assert_eq!(title_or(Some("  "), "New project").expect("title"), "New project");
        assert_eq!(title_or(Some(" Walk "), "x").expect("title"), "Walk");
        assert!(required_title(" ").is_err());
        assert_eq!(canvas_side("width", 1920).expect("width"), 1920);
        assert!(canvas_side("width", 0).is_err());
        assert!(canvas_side("height", -3).is_err());
        assert!(fps(121).is_err());
    }
}

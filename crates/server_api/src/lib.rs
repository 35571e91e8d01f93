use std::sync::Arc;

use shared::{
    domain::{
        FrameId, LayerId, ProjectId, UserId, DEFAULT_CANVAS_HEIGHT, DEFAULT_CANVAS_WIDTH,
        DEFAULT_FPS, DEFAULT_PROJECT_TITLE,
    },
    error::{ApiError, ErrorCode},
    protocol::{
        CreateFrameResponse, CreateProjectRequest, CreateProjectResponse, DeleteFrameResponse,
        FrameDetail, FrameSummary, LayerPayload, ProjectSettingsRequest, ProjectSummary,
        SaveFrameRequest, UpdateLayerRequest,
    },
};
use storage::{
    preview_key, NewProject, PreviewStore, ProjectChanges, Storage, StoredFrame, StoredLayer,
    StoredProject,
};
use tracing::{debug, error, warn};

pub mod payload;

/// Default cap on a decoded preview image.
pub const DEFAULT_MAX_PREVIEW_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// URL prefix under which preview keys are served, e.g. `/media/`.
    pub media_url: String,
    pub max_preview_bytes: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            media_url: "/media/".to_string(),
            max_preview_bytes: DEFAULT_MAX_PREVIEW_BYTES,
        }
    }
}

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub previews: Arc<dyn PreviewStore>,
    pub settings: ApiSettings,
}

pub async fn login(ctx: &ApiContext, username: &str) -> Result<UserId, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::validation("username must not be empty"));
    }
    ctx.storage
        .create_user(username)
        .await
        .map_err(storage_error)
}

pub async fn list_projects(
    ctx: &ApiContext,
    user_id: UserId,
) -> Result<Vec<ProjectSummary>, ApiError> {
    ensure_user(ctx, user_id).await?;
    let projects = ctx
        .storage
        .list_projects_for_owner(user_id)
        .await
        .map_err(storage_error)?;
    Ok(projects.into_iter().map(project_summary).collect())
}

pub async fn create_project(
    ctx: &ApiContext,
    user_id: UserId,
    request: &CreateProjectRequest,
) -> Result<CreateProjectResponse, ApiError> {
    ensure_user(ctx, user_id).await?;
    let project = NewProject {
        title: payload::title_or(request.title.as_deref(), DEFAULT_PROJECT_TITLE)?,
        description: request.description.as_deref().unwrap_or_default().trim().to_string(),
        width: request
            .width
            .map(|raw| payload::canvas_side("width", raw))
            .transpose()?
            .unwrap_or(DEFAULT_CANVAS_WIDTH),
        height: request
            .height
            .map(|raw| payload::canvas_side("height", raw))
            .transpose()?
            .unwrap_or(DEFAULT_CANVAS_HEIGHT),
        fps: request
            .fps
            .map(payload::fps)
            .transpose()?
            .unwrap_or(DEFAULT_FPS),
    };

    let created = ctx
        .storage
        .create_project(user_id, &project)
        .await
        .map_err(storage_error)?;
    debug!(project_id = created.project.project_id.0, user_id = user_id.0, "project created");

    Ok(CreateProjectResponse {
        frame: frame_detail(&ctx.settings, created.frame, created.layers),
        project: project_summary(created.project),
    })
}

pub async fn rename_project(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    title: &str,
) -> Result<ProjectSummary, ApiError> {
    let changes = ProjectChanges {
        title: Some(payload::required_title(title)?),
        ..ProjectChanges::default()
    };
    save_project_changes(ctx, user_id, project_id, &changes).await
}

/// Partial settings save; absent fields keep their stored values.
pub async fn update_project_settings(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    request: &ProjectSettingsRequest,
) -> Result<ProjectSummary, ApiError> {
    let changes = ProjectChanges {
        title: request
            .title
            .as_deref()
            .map(payload::required_title)
            .transpose()?,
        description: request
            .description
            .as_deref()
            .map(|description| description.trim().to_string()),
        width: request
            .width
            .map(|raw| payload::canvas_side("width", raw))
            .transpose()?,
        height: request
            .height
            .map(|raw| payload::canvas_side("height", raw))
            .transpose()?,
        fps: request.fps.map(payload::fps).transpose()?,
    };
    save_project_changes(ctx, user_id, project_id, &changes).await
}

pub async fn delete_project(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
) -> Result<ProjectId, ApiError> {
    let deleted = ctx
        .storage
        .delete_project(project_id, user_id)
        .await
        .map_err(storage_error)?;
    if !deleted {
        return Err(ApiError::not_found("project"));
    }
    debug!(project_id = project_id.0, "project deleted");
    Ok(project_id)
}

pub async fn list_frames(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
) -> Result<Vec<FrameSummary>, ApiError> {
    owned_project(ctx, user_id, project_id).await?;
    let frames = ctx
        .storage
        .list_frames(project_id)
        .await
        .map_err(storage_error)?;
    Ok(frame_summaries(&ctx.settings, &frames))
}

pub async fn get_frame(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    index: i64,
) -> Result<FrameDetail, ApiError> {
    let frame = owned_frame(ctx, user_id, project_id, index).await?;
    let layers = ctx
        .storage
        .list_layers(frame.frame_id)
        .await
        .map_err(storage_error)?;
    Ok(frame_detail(&ctx.settings, frame, layers))
}

pub async fn create_frame(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    duplicate_from: Option<i64>,
) -> Result<CreateFrameResponse, ApiError> {
    owned_project(ctx, user_id, project_id).await?;
    let created = ctx
        .storage
        .create_frame(project_id, duplicate_from)
        .await
        .map_err(storage_error)?;
    debug!(
        project_id = project_id.0,
        index = created.frame.index,
        duplicate_from,
        "frame created"
    );

    Ok(CreateFrameResponse {
        frames: frame_summaries(&ctx.settings, &created.frames),
        frame: frame_detail(&ctx.settings, created.frame, created.layers),
    })
}

pub async fn delete_frame(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    index: i64,
) -> Result<DeleteFrameResponse, ApiError> {
    owned_project(ctx, user_id, project_id).await?;
    let deleted = ctx
        .storage
        .delete_frame(project_id, index)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("frame"))?;
    debug!(
        project_id = project_id.0,
        index,
        remaining = deleted.frames.len(),
        "frame deleted"
    );

    Ok(DeleteFrameResponse {
        frames: frame_summaries(&ctx.settings, &deleted.frames),
        active_index: position(deleted.active_index),
    })
}

pub async fn reorder_frames(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    order: &[FrameId],
) -> Result<Vec<FrameSummary>, ApiError> {
    owned_project(ctx, user_id, project_id).await?;
    let frames = ctx
        .storage
        .reorder_frames(project_id, order)
        .await
        .map_err(storage_error)?;
    debug!(project_id = project_id.0, requested = order.len(), "frames reordered");
    Ok(frame_summaries(&ctx.settings, &frames))
}

/// Stores new content and/or a new preview image for one frame. Everything
/// is validated before the image is written or the row updated.
pub async fn save_frame(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    index: i64,
    request: &SaveFrameRequest,
) -> Result<FrameSummary, ApiError> {
    let content_json = payload::content_json_text(request.content_json.as_ref());
    let image = request
        .image_data
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| payload::decode_image_data(raw, ctx.settings.max_preview_bytes))
        .transpose()?;
    if content_json.is_none() && image.is_none() {
        return Err(ApiError::validation(
            "image_data or content_json is required",
        ));
    }

    owned_frame(ctx, user_id, project_id, index).await?;

    let key = match image {
        Some(image) => {
            let key = preview_key(project_id, index, image.extension);
            ctx.previews
                .put(&key, &image.bytes)
                .await
                .map_err(storage_error)?;
            Some(key)
        }
        None => None,
    };

    let saved = ctx
        .storage
        .save_frame(project_id, index, content_json.as_deref(), key.as_deref())
        .await;
    let frame = match saved {
        Ok(Some(frame)) => frame,
        other => {
            // The row never took the new key, so its file must not outlive this call.
            if let Some(key) = &key {
                discard_preview(ctx, key).await;
            }
            return Err(match other {
                Err(err) => storage_error(err),
                _ => ApiError::not_found("frame"),
            });
        }
    };
    debug!(
        project_id = project_id.0,
        index,
        preview = key.is_some(),
        "frame saved"
    );
    Ok(frame_summary(&ctx.settings, &frame))
}

pub async fn list_layers(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    index: i64,
) -> Result<Vec<LayerPayload>, ApiError> {
    let frame = owned_frame(ctx, user_id, project_id, index).await?;
    let layers = ctx
        .storage
        .list_layers(frame.frame_id)
        .await
        .map_err(storage_error)?;
    Ok(layers.iter().map(layer_payload).collect())
}

pub async fn create_layer(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    index: i64,
    name: Option<&str>,
) -> Result<LayerPayload, ApiError> {
    let frame = owned_frame(ctx, user_id, project_id, index).await?;
    let layer = ctx
        .storage
        .create_layer(frame.frame_id, name)
        .await
        .map_err(storage_error)?;
    debug!(frame_id = frame.frame_id.0, layer_id = layer.layer_id.0, "layer created");
    Ok(layer_payload(&layer))
}

pub async fn update_layer(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    index: i64,
    layer_id: LayerId,
    request: &UpdateLayerRequest,
) -> Result<LayerPayload, ApiError> {
    let patch = payload::layer_patch(request)?;
    let frame = owned_frame(ctx, user_id, project_id, index).await?;
    let layer = ctx
        .storage
        .update_layer(frame.frame_id, layer_id, &patch)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("layer"))?;
    if !patch.is_empty() {
        debug!(layer_id = layer_id.0, "layer updated");
    }
    Ok(layer_payload(&layer))
}

pub async fn delete_layer(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    index: i64,
    layer_id: LayerId,
) -> Result<Vec<LayerPayload>, ApiError> {
    let frame = owned_frame(ctx, user_id, project_id, index).await?;
    let layers = ctx
        .storage
        .delete_layer(frame.frame_id, layer_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("layer"))?;
    debug!(layer_id = layer_id.0, remaining = layers.len(), "layer deleted");
    Ok(layers.iter().map(layer_payload).collect())
}

/// `order` lists layer ids front-most first.
pub async fn reorder_layers(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    index: i64,
    order: &[LayerId],
) -> Result<Vec<LayerPayload>, ApiError> {
    let frame = owned_frame(ctx, user_id, project_id, index).await?;
    let layers = ctx
        .storage
        .reorder_layers(frame.frame_id, order)
        .await
        .map_err(storage_error)?;
    debug!(frame_id = frame.frame_id.0, requested = order.len(), "layers reordered");
    Ok(layers.iter().map(layer_payload).collect())
}

async fn ensure_user(ctx: &ApiContext, user_id: UserId) -> Result<(), ApiError> {
    let exists = ctx
        .storage
        .user_exists(user_id)
        .await
        .map_err(storage_error)?;
    if !exists {
        return Err(ApiError::new(ErrorCode::Unauthorized, "unknown user"));
    }
    Ok(())
}

// A project owned by someone else is reported exactly like a missing one.
async fn owned_project(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
) -> Result<StoredProject, ApiError> {
    ctx.storage
        .project_for_owner(project_id, user_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("project"))
}

async fn owned_frame(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    index: i64,
) -> Result<StoredFrame, ApiError> {
    owned_project(ctx, user_id, project_id).await?;
    ctx.storage
        .frame_by_index(project_id, index)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("frame"))
}

async fn save_project_changes(
    ctx: &ApiContext,
    user_id: UserId,
    project_id: ProjectId,
    changes: &ProjectChanges,
) -> Result<ProjectSummary, ApiError> {
    let project = ctx
        .storage
        .update_project(project_id, user_id, changes)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("project"))?;
    debug!(project_id = project_id.0, "project updated");
    Ok(project_summary(project))
}

async fn discard_preview(ctx: &ApiContext, key: &str) {
    if let Err(error) = ctx.previews.remove(key).await {
        warn!(%key, error = %format!("{error:#}"), "failed to discard unused preview");
    }
}

fn storage_error(err: anyhow::Error) -> ApiError {
    if storage::is_conflict(&err) {
        return ApiError::new(
            ErrorCode::Conflict,
            "concurrent modification, please retry",
        );
    }
    error!(error = %format!("{err:#}"), "storage operation failed");
    ApiError::new(ErrorCode::Internal, "internal error")
}

fn position(value: i64) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

fn preview_url(settings: &ApiSettings, key: Option<&str>) -> Option<String> {
    key.map(|key| format!("{}/{key}", settings.media_url.trim_end_matches('/')))
}

fn project_summary(project: StoredProject) -> ProjectSummary {
    ProjectSummary {
        project_id: project.project_id,
        title: project.title,
        description: project.description,
        width: project.width,
        height: project.height,
        fps: project.fps,
        created_at: project.created_at,
        updated_at: project.updated_at,
    }
}

fn frame_summary(settings: &ApiSettings, frame: &StoredFrame) -> FrameSummary {
    FrameSummary {
        frame_id: frame.frame_id,
        index: position(frame.index),
        preview_url: preview_url(settings, frame.preview_key.as_deref()),
        has_preview: frame.preview_key.is_some(),
        updated_at: frame.updated_at,
    }
}

fn frame_summaries(settings: &ApiSettings, frames: &[StoredFrame]) -> Vec<FrameSummary> {
    frames
        .iter()
        .map(|frame| frame_summary(settings, frame))
        .collect()
}

fn frame_detail(settings: &ApiSettings, frame: StoredFrame, layers: Vec<StoredLayer>) -> FrameDetail {
    FrameDetail {
        frame_id: frame.frame_id,
        index: position(frame.index),
        preview_url: preview_url(settings, frame.preview_key.as_deref()),
        has_preview: frame.preview_key.is_some(),
        updated_at: frame.updated_at,
        content_json: frame.content_json,
        layers: layers.iter().map(layer_payload).collect(),
    }
}

fn layer_payload(layer: &StoredLayer) -> LayerPayload {
    LayerPayload {
        layer_id: layer.layer_id,
        order: position(layer.order),
        name: layer.name.clone(),
        visible: layer.visible,
        opacity: layer.opacity,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

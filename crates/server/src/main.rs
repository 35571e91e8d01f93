use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::error::Category;
use server_api::{ApiContext, ApiSettings};
use shared::{
    domain::{LayerId, ProjectId, UserId},
    error::{ApiError, ErrorCode, ErrorEnvelope},
    protocol::{
        CreateFrameRequest, CreateFrameResponse, CreateLayerRequest, CreateProjectRequest,
        CreateProjectResponse, DeleteFrameResponse, FrameListResponse, FrameResponse,
        LayerListResponse, LayerResponse, LoginRequest, LoginResponse, ProjectDeletedResponse,
        ProjectListResponse, ProjectResponse, ProjectSettingsRequest, RenameProjectRequest,
        ReorderFramesRequest, ReorderLayersRequest, SaveFrameRequest, SaveFrameResponse, Success,
        UpdateLayerRequest,
    },
};
use storage::{FsPreviewStore, Storage};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, normalize_database_url, Settings};

type Rejection = (StatusCode, Json<ErrorEnvelope>);
type ApiResponse<T> = Result<Json<Success<T>>, Rejection>;

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings()?;
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    tokio::fs::create_dir_all(&settings.media_root).await?;

    let state = AppState {
        api: api_context(storage, &settings),
    };
    let app = build_router(Arc::new(state), &settings);

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, media_root = %settings.media_root, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn api_context(storage: Storage, settings: &Settings) -> ApiContext {
    ApiContext {
        storage,
        previews: Arc::new(FsPreviewStore::new(&settings.media_root)),
        settings: ApiSettings {
            media_url: settings.media_url.clone(),
            max_preview_bytes: settings.max_preview_bytes,
        },
    }
}

fn build_router(state: Arc<AppState>, settings: &Settings) -> Router {
    let media_url = format!("/{}", settings.media_url.trim_matches('/'));
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/:project_id", delete(delete_project))
        .route("/projects/:project_id/rename", post(rename_project))
        .route("/projects/:project_id/settings", post(save_project_settings))
        .route(
            "/projects/:project_id/frames",
            get(list_frames).post(create_frame),
        )
        .route("/projects/:project_id/reorder-frames", post(reorder_frames))
        .route(
            "/projects/:project_id/frames/:index",
            get(get_frame).delete(delete_frame),
        )
        .route("/projects/:project_id/frames/:index/save", post(save_frame))
        .route(
            "/projects/:project_id/frames/:index/layers",
            get(list_layers).post(create_layer),
        )
        .route(
            "/projects/:project_id/frames/:index/reorder-layers",
            post(reorder_layers),
        )
        .route(
            "/projects/:project_id/frames/:index/layers/:layer_id",
            patch(update_layer).delete(delete_layer),
        )
        .nest_service(&media_url, ServeDir::new(&settings.media_root))
        .layer(DefaultBodyLimit::max(settings.max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, Rejection> {
    state.api.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        reject(ApiError::new(ErrorCode::Internal, "database unavailable"))
    })?;
    Ok("ok")
}

async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse<LoginResponse> {
    let req: LoginRequest = json_body(body).map_err(reject)?;
    let user_id = server_api::login(&state.api, &req.username)
        .await
        .map_err(reject)?;
    Ok(ok(LoginResponse { user_id }))
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> ApiResponse<ProjectListResponse> {
    let user_id = acting_user(&query)?;
    let projects = server_api::list_projects(&state.api, user_id)
        .await
        .map_err(reject)?;
    Ok(ok(ProjectListResponse { projects }))
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse<CreateProjectResponse> {
    let user_id = acting_user(&query)?;
    let req: CreateProjectRequest = json_body(body).map_err(reject)?;
    let created = server_api::create_project(&state.api, user_id, &req)
        .await
        .map_err(reject)?;
    Ok(ok(created))
}

async fn rename_project(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    Query(query): Query<UserQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse<ProjectResponse> {
    let user_id = acting_user(&query)?;
    let project_id = path_params(path)?;
    let req: RenameProjectRequest = json_body(body).map_err(reject)?;
    let project = server_api::rename_project(&state.api, user_id, ProjectId(project_id), &req.title)
        .await
        .map_err(reject)?;
    Ok(ok(ProjectResponse { project }))
}

async fn save_project_settings(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    Query(query): Query<UserQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse<ProjectResponse> {
    let user_id = acting_user(&query)?;
    let project_id = path_params(path)?;
    let req: ProjectSettingsRequest = json_body(body).map_err(reject)?;
    let project =
        server_api::update_project_settings(&state.api, user_id, ProjectId(project_id), &req)
            .await
            .map_err(reject)?;
    Ok(ok(ProjectResponse { project }))
}

async fn delete_project(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    Query(query): Query<UserQuery>,
) -> ApiResponse<ProjectDeletedResponse> {
    let user_id = acting_user(&query)?;
    let project_id = path_params(path)?;
    let project_id = server_api::delete_project(&state.api, user_id, ProjectId(project_id))
        .await
        .map_err(reject)?;
    Ok(ok(ProjectDeletedResponse { project_id }))
}

async fn list_frames(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    Query(query): Query<UserQuery>,
) -> ApiResponse<FrameListResponse> {
    let user_id = acting_user(&query)?;
    let project_id = path_params(path)?;
    let frames = server_api::list_frames(&state.api, user_id, ProjectId(project_id))
        .await
        .map_err(reject)?;
    Ok(ok(FrameListResponse { frames }))
}

async fn create_frame(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    Query(query): Query<UserQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse<CreateFrameResponse> {
    let user_id = acting_user(&query)?;
    let project_id = path_params(path)?;
    let req: CreateFrameRequest = json_body(body).map_err(reject)?;
    let created =
        server_api::create_frame(&state.api, user_id, ProjectId(project_id), req.duplicate_from)
            .await
            .map_err(reject)?;
    Ok(ok(created))
}

async fn reorder_frames(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    Query(query): Query<UserQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse<FrameListResponse> {
    let user_id = acting_user(&query)?;
    let project_id = path_params(path)?;
    let req: ReorderFramesRequest = json_body(body).map_err(reject)?;
    let frames = server_api::reorder_frames(&state.api, user_id, ProjectId(project_id), &req.order)
        .await
        .map_err(reject)?;
    Ok(ok(FrameListResponse { frames }))
}

async fn get_frame(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(i64, i64)>, PathRejection>,
    Query(query): Query<UserQuery>,
) -> ApiResponse<FrameResponse> {
    let user_id = acting_user(&query)?;
    let (project_id, index) = path_params(path)?;
    let frame = server_api::get_frame(&state.api, user_id, ProjectId(project_id), index)
        .await
        .map_err(reject)?;
    Ok(ok(FrameResponse { frame }))
}

async fn delete_frame(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(i64, i64)>, PathRejection>,
    Query(query): Query<UserQuery>,
) -> ApiResponse<DeleteFrameResponse> {
    let user_id = acting_user(&query)?;
    let (project_id, index) = path_params(path)?;
    let deleted = server_api::delete_frame(&state.api, user_id, ProjectId(project_id), index)
        .await
        .map_err(reject)?;
    Ok(ok(deleted))
}

async fn save_frame(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(i64, i64)>, PathRejection>,
    Query(query): Query<UserQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse<SaveFrameResponse> {
    let user_id = acting_user(&query)?;
    let (project_id, index) = path_params(path)?;
    let req: SaveFrameRequest = json_body(body).map_err(reject)?;
    let frame = server_api::save_frame(&state.api, user_id, ProjectId(project_id), index, &req)
        .await
        .map_err(reject)?;
    Ok(ok(SaveFrameResponse { frame }))
}

async fn list_layers(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(i64, i64)>, PathRejection>,
    Query(query): Query<UserQuery>,
) -> ApiResponse<LayerListResponse> {
    let user_id = acting_user(&query)?;
    let (project_id, index) = path_params(path)?;
    let layers = server_api::list_layers(&state.api, user_id, ProjectId(project_id), index)
        .await
        .map_err(reject)?;
    Ok(ok(LayerListResponse { layers }))
}

async fn create_layer(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(i64, i64)>, PathRejection>,
    Query(query): Query<UserQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse<LayerResponse> {
    let user_id = acting_user(&query)?;
    let (project_id, index) = path_params(path)?;
    let req: CreateLayerRequest = json_body(body).map_err(reject)?;
    let layer = server_api::create_layer(
        &state.api,
        user_id,
        ProjectId(project_id),
        index,
        req.name.as_deref(),
    )
    .await
    .map_err(reject)?;
    Ok(ok(LayerResponse { layer }))
}

async fn update_layer(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(i64, i64, i64)>, PathRejection>,
    Query(query): Query<UserQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse<LayerResponse> {
    let user_id = acting_user(&query)?;
    let (project_id, index, layer_id) = path_params(path)?;
    let req: UpdateLayerRequest = json_body(body).map_err(reject)?;
    let layer = server_api::update_layer(
        &state.api,
        user_id,
        ProjectId(project_id),
        index,
        LayerId(layer_id),
        &req,
    )
    .await
    .map_err(reject)?;
    Ok(ok(LayerResponse { layer }))
}

async fn delete_layer(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(i64, i64, i64)>, PathRejection>,
    Query(query): Query<UserQuery>,
) -> ApiResponse<LayerListResponse> {
    let user_id = acting_user(&query)?;
    let (project_id, index, layer_id) = path_params(path)?;
    let layers = server_api::delete_layer(
        &state.api,
        user_id,
        ProjectId(project_id),
        index,
        LayerId(layer_id),
    )
    .await
    .map_err(reject)?;
    Ok(ok(LayerListResponse { layers }))
}

async fn reorder_layers(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(i64, i64)>, PathRejection>,
    Query(query): Query<UserQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse<LayerListResponse> {
    let user_id = acting_user(&query)?;
    let (project_id, index) = path_params(path)?;
    let req: ReorderLayersRequest = json_body(body).map_err(reject)?;
    let layers = server_api::reorder_layers(
        &state.api,
        user_id,
        ProjectId(project_id),
        index,
        &req.order,
    )
    .await
    .map_err(reject)?;
    Ok(ok(LayerListResponse { layers }))
}

fn ok<T>(body: T) -> Json<Success<T>> {
    Json(Success::new(body))
}

fn acting_user(query: &UserQuery) -> Result<UserId, Rejection> {
    query
        .user_id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .map(UserId)
        .ok_or_else(|| reject(ApiError::new(ErrorCode::Unauthorized, "user_id is required")))
}

fn path_params<T>(path: Result<Path<T>, PathRejection>) -> Result<T, Rejection> {
    path.map(|Path(params)| params).map_err(|rejection| {
        reject(ApiError::new(
            ErrorCode::MalformedInput,
            format!("invalid path: {}", rejection.body_text()),
        ))
    })
}

/// Parses a JSON request body. An empty body reads as `{}` so that requests
/// whose fields are all optional may omit it.
fn json_body<T: DeserializeOwned>(body: Result<Bytes, BytesRejection>) -> Result<T, ApiError> {
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::new(ErrorCode::PayloadTooLarge, "request body is too large")
        } else {
            ApiError::new(ErrorCode::MalformedInput, rejection.body_text())
        }
    })?;
    let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        &bytes
    };
    serde_json::from_slice(raw).map_err(|err| match err.classify() {
        // Well-formed JSON whose fields have the wrong shape or are missing.
        Category::Data => ApiError::validation(format!("invalid request: {err}")),
        Category::Io | Category::Syntax | Category::Eof => {
            ApiError::new(ErrorCode::MalformedInput, format!("invalid JSON body: {err}"))
        }
    })
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation | ErrorCode::MalformedInput => StatusCode::BAD_REQUEST,
        ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> Rejection {
    (status_for(err.code), Json(ErrorEnvelope::from(err)))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

use crate::deploy::{DeployRequest, Deployer, JoinVpnRequest, StatusReport};
use crate::docker::{ContainerAction, ContainerInfo, Docker, ImageInfo, PruneKind, VolumeInfo};
use crate::events::DeployEvent;
use crate::registry::{NewTarget, TargetRegistry, TargetSummary};
use crate::scripts::shell_quote;
use crate::session::Session;
use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TargetRegistry>,
    pub deployer: Arc<Deployer>,
}

/// Error envelope: every failure leaves as `{"error": message}`.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(err: impl Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{:#}", err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/targets", get(list_targets).post(create_target))
        .route("/api/targets/:id", delete(delete_target))
        .route("/api/targets/:id/status", get(target_status))
        .route("/api/targets/:id/deploy", post(deploy))
        .route("/api/targets/:id/uninstall", post(uninstall))
        .route("/api/targets/:id/docker", get(docker_containers))
        .route("/api/targets/:id/docker/:action", post(docker_action))
        .route("/api/targets/:id/docker/:container/follow", get(follow_logs))
        .route("/api/targets/:id/images", get(list_images))
        .route("/api/targets/:id/images/:name", delete(delete_image))
        .route("/api/targets/:id/volumes", get(list_volumes))
        .route("/api/targets/:id/volumes/:name", delete(delete_volume))
        .route("/api/targets/:id/prune", post(prune))
        .route("/api/targets/:id/command", post(custom_command))
        .route("/api/targets/:id/join-vpn", post(join_vpn))
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    println!("🌐 meshforge orchestrator listening on port {}", port);
    println!("   API base: http://0.0.0.0:{}/api", port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_targets(State(state): State<AppState>) -> Json<Vec<TargetSummary>> {
    Json(state.registry.list().await)
}

async fn create_target(
    State(state): State<AppState>,
    Json(new): Json<NewTarget>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = state
        .registry
        .create(new)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(json!({ "id": id, "message": "Target added" })))
}

async fn delete_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = state
        .registry
        .remove(&id)
        .await
        .map_err(ApiError::internal)?;
    if !removed {
        return Err(ApiError::not_found("Target not found"));
    }
    Ok(Json(json!({ "message": "Target deleted" })))
}

async fn target_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusReport>> {
    ensure_exists(&state, &id).await?;
    let report = state
        .deployer
        .status_check(&id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(report))
}

/// Deployment trigger. Once this returns, everything — progress, failure,
/// the final verdict — travels as SSE frames, never a JSON body.
async fn deploy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DeployRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    ensure_exists(&state, &id).await?;

    let (tx, rx) = mpsc::channel::<DeployEvent>(64);
    let deployer = state.deployer.clone();
    // Detached on purpose: a disconnecting client must not abort the run
    tokio::spawn(async move {
        deployer.run(&id, req, tx).await;
    });

    Ok(Sse::new(event_stream(rx)).keep_alive(KeepAlive::default()))
}

async fn uninstall(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    ensure_exists(&state, &id).await?;
    let output = state
        .deployer
        .uninstall(&id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({
        "success": output.success(),
        "output": output.combined(),
    })))
}

async fn docker_containers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ContainerInfo>>> {
    let session = open_session(&state, &id).await?;
    let containers = Docker::list_containers(&session)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(containers))
}

#[derive(Deserialize)]
struct ContainerRequest {
    container: String,
}

async fn docker_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
    Json(req): Json<ContainerRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let action = ContainerAction::parse(&action)
        .ok_or_else(|| ApiError::bad_request("Invalid action"))?;
    if req.container.trim().is_empty() {
        return Err(ApiError::bad_request("Container is required"));
    }

    let session = open_session(&state, &id).await?;
    let output = Docker::container_action(&session, action, &req.container)
        .await
        .map_err(ApiError::internal)?;

    state
        .registry
        .update(&id, |t| {
            t.record(
                &format!("docker_{}", action.name()),
                output.success(),
                Some(json!({ "container": req.container })),
            );
        })
        .await
        .map_err(ApiError::internal)?;

    if action == ContainerAction::Logs {
        Ok(Json(json!({ "logs": output.combined() })))
    } else {
        Ok(Json(json!({
            "success": output.success(),
            "output": output.combined(),
        })))
    }
}

/// Live `docker logs -f`. The SSE stream owns the session, so a client
/// disconnect drops it and the remote follow process dies with it.
async fn follow_logs(
    State(state): State<AppState>,
    Path((id, container)): Path<(String, String)>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if container.trim().is_empty() {
        return Err(ApiError::bad_request("Container is required"));
    }
    let session = open_session(&state, &id).await?;

    let cmd = format!("docker logs -f --tail 100 {}", shell_quote(&container));
    let stream = session
        .run_streaming(&cmd, true)
        .await
        .map_err(ApiError::internal)?;

    let sse = futures::stream::unfold((stream, session), |(mut stream, session)| async move {
        stream.next_chunk().await.map(|chunk| {
            (
                Ok::<_, Infallible>(DeployEvent::from_chunk(chunk).to_sse()),
                (stream, session),
            )
        })
    });
    Ok(Sse::new(sse).keep_alive(KeepAlive::default()))
}

async fn list_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ImageInfo>>> {
    let session = open_session(&state, &id).await?;
    let images = Docker::list_images(&session)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(images))
}

async fn delete_image(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = open_session(&state, &id).await?;
    let output = Docker::delete_image(&session, &name)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({
        "success": output.success(),
        "output": output.combined(),
    })))
}

async fn list_volumes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<VolumeInfo>>> {
    let session = open_session(&state, &id).await?;
    let volumes = Docker::list_volumes(&session)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(volumes))
}

async fn delete_volume(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = open_session(&state, &id).await?;
    let output = Docker::delete_volume(&session, &name)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({
        "success": output.success(),
        "output": output.combined(),
    })))
}

#[derive(Deserialize)]
struct PruneRequest {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

async fn prune(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PruneRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let kind = PruneKind::parse(req.kind.as_deref().unwrap_or("all"))
        .ok_or_else(|| ApiError::bad_request("Invalid prune type"))?;

    let session = open_session(&state, &id).await?;
    let output = Docker::prune(&session, kind)
        .await
        .map_err(ApiError::internal)?;

    state
        .registry
        .update(&id, |t| {
            t.record(&format!("prune_{}", kind.name()), output.success(), None);
        })
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "success": output.success(),
        "output": output.combined(),
    })))
}

#[derive(Deserialize)]
struct CommandRequest {
    command: String,
}

/// Arbitrary shell on the target. Unrestricted on purpose — this is the
/// operator's escape hatch, and the output comes back verbatim.
async fn custom_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.command.trim().is_empty() {
        return Err(ApiError::bad_request("Command is required"));
    }

    let session = open_session(&state, &id).await?;
    let output = session.run(&req.command).await.map_err(ApiError::internal)?;
    Ok(Json(json!({
        "success": output.success(),
        "code": output.exit_code,
        "stdout": output.stdout,
        "stderr": output.stderr,
    })))
}

async fn join_vpn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<JoinVpnRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.network_id.trim().is_empty()
        || req.control_plane_url.trim().is_empty()
        || req.api_key.trim().is_empty()
    {
        return Err(ApiError::bad_request(
            "network_id, control_plane_url and api_key are required",
        ));
    }
    ensure_exists(&state, &id).await?;

    state
        .deployer
        .join_vpn(&id, &req)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "success": true, "message": "Joined VPN" })))
}

async fn ensure_exists(state: &AppState, id: &str) -> ApiResult<()> {
    state
        .registry
        .get(id)
        .await
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("Target not found"))
}

async fn open_session(state: &AppState, id: &str) -> ApiResult<Session> {
    let target = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found("Target not found"))?;
    Session::connect(&target).await.map_err(ApiError::internal)
}

fn event_stream(
    rx: mpsc::Receiver<DeployEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|ev| (Ok(ev.to_sse()), rx))
    })
}

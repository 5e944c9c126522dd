//! HTTP control API for the alarm scheduler.
//!
//! Serves JSON on a local address. No authentication: bind to loopback.
//!
//! ## Endpoints
//!
//! - `POST /create`: schedule an alarm
//! - `POST /modify`: move a pending alarm to a new time
//! - `POST /cancel`: cancel a pending alarm
//! - `POST /snooze`: push a pending alarm into the future
//! - `GET /status/{alarm_id}`: pending/running state of one alarm
//! - `GET /alarms`: all pending alarms
//! - `GET /history`: recently finished executions

use crate::config::ServerConfig;
use crate::control::handle::{AlarmControl, AlarmStatus};
use crate::error::{AlarmError, Result};
use crate::scheduler::runner::TaskRunRecord;
use crate::scheduler::tasks::AlarmTask;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// `POST /create` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Caller-chosen alarm ID.
    pub alarm_id: String,
    /// `YYYY-MM-DD HH:MM:SS`.
    pub time_spec: String,
    /// Shell command to run when due.
    pub command: String,
}

/// `POST /modify` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyRequest {
    /// Alarm to move.
    pub alarm_id: String,
    /// New `YYYY-MM-DD HH:MM:SS`.
    pub new_time_spec: String,
}

/// `POST /cancel` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Alarm to cancel.
    pub alarm_id: String,
}

/// `POST /snooze` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnoozeRequest {
    /// Alarm to snooze.
    pub alarm_id: String,
    /// Seconds from now; the server default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snooze_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Result of a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResponse {
    /// Whether the operation took effect.
    pub success: bool,
    /// Failure details when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Failure details within an [`OperationResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error kind (`duplicate_id`, `not_found`, `parse_error`, `invalid_request`).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl OperationResponse {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(err: &AlarmError) -> Self {
        Self {
            success: false,
            error: Some(ErrorBody {
                kind: err.kind().to_owned(),
                message: err.to_string(),
            }),
        }
    }
}

/// HTTP status for a rejected control operation.
fn status_for(err: &AlarmError) -> StatusCode {
    match err {
        AlarmError::DuplicateId(_) => StatusCode::CONFLICT,
        AlarmError::NotFound(_) => StatusCode::NOT_FOUND,
        AlarmError::Parse(_) | AlarmError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type OperationReply = (StatusCode, Json<OperationResponse>);

/// Operation body; a body that does not deserialize is answered in the
/// [`OperationResponse`] envelope instead of axum's plain-text rejection.
type Body<T> = std::result::Result<Json<T>, JsonRejection>;

fn rejected(operation: &str, rejection: &JsonRejection) -> OperationReply {
    let err = AlarmError::InvalidRequest(rejection.body_text());
    debug!(operation, error = %err, "malformed control request");
    (StatusCode::BAD_REQUEST, Json(OperationResponse::failed(&err)))
}

fn reply(operation: &str, result: Result<AlarmTask>) -> OperationReply {
    match result {
        Ok(_) => (StatusCode::OK, Json(OperationResponse::ok())),
        Err(e) => {
            debug!(operation, error = %e, "control request rejected");
            (status_for(&e), Json(OperationResponse::failed(&e)))
        }
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Source of run history for `GET /history`.
pub type HistorySource = Arc<dyn Fn() -> Vec<TaskRunRecord> + Send + Sync>;

#[derive(Clone)]
struct AppState {
    control: AlarmControl,
    history: HistorySource,
}

/// Build the control API router.
pub fn router(control: AlarmControl, history: HistorySource) -> Router {
    Router::new()
        .route("/create", post(handle_create))
        .route("/modify", post(handle_modify))
        .route("/cancel", post(handle_cancel))
        .route("/snooze", post(handle_snooze))
        .route("/status/{alarm_id}", get(handle_status))
        .route("/alarms", get(handle_list))
        .route("/history", get(handle_history))
        .with_state(AppState { control, history })
}

// ---------------------------------------------------------------------------
// ControlServer
// ---------------------------------------------------------------------------

/// Running control API server.
pub struct ControlServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ControlServer {
    /// Bind `{config.host}:{config.port}` (port `0` auto-assigns) and serve
    /// in a background tokio task.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::Server`] if the listener cannot bind.
    pub async fn start(
        control: AlarmControl,
        history: HistorySource,
        config: &ServerConfig,
    ) -> Result<Self> {
        let app = router(control, history);

        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| AlarmError::Server(format!("bind {bind_addr} failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| AlarmError::Server(format!("failed to get local addr: {e}")))?;

        info!("control API listening on http://{addr}");

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!("control API server error: {e}");
            }
        });

        Ok(Self {
            addr,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Returns the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for clients, e.g. `http://127.0.0.1:8080`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("control API stopped");
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

async fn handle_create(
    State(state): State<AppState>,
    body: Body<CreateRequest>,
) -> OperationReply {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return rejected("create", &rejection),
    };
    reply(
        "create",
        state
            .control
            .create(&req.alarm_id, &req.time_spec, &req.command),
    )
}

async fn handle_modify(
    State(state): State<AppState>,
    body: Body<ModifyRequest>,
) -> OperationReply {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return rejected("modify", &rejection),
    };
    reply(
        "modify",
        state.control.modify(&req.alarm_id, &req.new_time_spec),
    )
}

async fn handle_cancel(
    State(state): State<AppState>,
    body: Body<CancelRequest>,
) -> OperationReply {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return rejected("cancel", &rejection),
    };
    reply("cancel", state.control.cancel(&req.alarm_id).await)
}

async fn handle_snooze(
    State(state): State<AppState>,
    body: Body<SnoozeRequest>,
) -> OperationReply {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return rejected("snooze", &rejection),
    };
    reply(
        "snooze",
        state.control.snooze(&req.alarm_id, req.snooze_seconds),
    )
}

async fn handle_status(
    State(state): State<AppState>,
    Path(alarm_id): Path<String>,
) -> Json<AlarmStatus> {
    Json(state.control.status(&alarm_id))
}

async fn handle_list(State(state): State<AppState>) -> Json<Vec<AlarmTask>> {
    Json(state.control.list())
}

async fn handle_history(State(state): State<AppState>) -> Json<Vec<TaskRunRecord>> {
    Json((state.history)())
}

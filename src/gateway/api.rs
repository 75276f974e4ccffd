//! HTTP surface of the gateway device.
//!
//! External collaborators push display text here and read device telemetry:
//!
//! - `GET /msg?t=<text>`, `GET /status?t=<text>`, `GET /clear`
//! - `POST /ui` with `{ "channel": "chat" | "status" | "clear", "text": ... }`
//! - `GET /health`

use super::screen::Screen;
use super::telemetry::{Telemetry, TelemetrySnapshot};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Shared state of the device surface.
pub struct ApiState {
    pub screen: Arc<dyn Screen>,
    pub telemetry: Arc<Telemetry>,
}

#[derive(Debug, Deserialize)]
pub struct TextQuery {
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UiRequest {
    pub channel: String,
    pub text: Option<String>,
}

#[derive(Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct DeviceHealth {
    pub ok: bool,
    #[serde(flatten)]
    pub telemetry: TelemetrySnapshot,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

type ApiResult = Result<Json<OkResponse>, (StatusCode, Json<ErrorResponse>)>;

fn bad_request(error: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            ok: false,
            error: error.to_string(),
        }),
    )
}

fn required_text(text: Option<String>) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(bad_request("missing text")),
    }
}

/// GET /msg
async fn msg(State(state): State<Arc<ApiState>>, Query(q): Query<TextQuery>) -> ApiResult {
    let text = required_text(q.t)?;
    state.screen.show_chat(&text);
    Ok(Json(OkResponse { ok: true }))
}

/// GET /status
async fn status(State(state): State<Arc<ApiState>>, Query(q): Query<TextQuery>) -> ApiResult {
    let text = required_text(q.t)?;
    state.screen.show_status(&text);
    Ok(Json(OkResponse { ok: true }))
}

/// GET /clear
async fn clear(State(state): State<Arc<ApiState>>) -> Json<OkResponse> {
    state.screen.clear();
    Json(OkResponse { ok: true })
}

/// POST /ui
async fn ui(State(state): State<Arc<ApiState>>, Json(req): Json<UiRequest>) -> ApiResult {
    match req.channel.as_str() {
        "chat" => state.screen.show_chat(&required_text(req.text)?),
        "status" => state.screen.show_status(&required_text(req.text)?),
        "clear" => state.screen.clear(),
        _ => return Err(bad_request("unknown channel")),
    }
    Ok(Json(OkResponse { ok: true }))
}

/// GET /health
async fn health(State(state): State<Arc<ApiState>>) -> Json<DeviceHealth> {
    Json(DeviceHealth {
        ok: true,
        telemetry: state.telemetry.snapshot(),
    })
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/msg", get(msg))
        .route("/status", get(status))
        .route("/clear", get(clear))
        .route("/ui", post(ui))
        .route("/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the device surface on `addr` until the returned sender fires.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<ApiState>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(state.clone());

    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;
    state.telemetry.set_ip(actual_addr.ip().to_string());

    tracing::info!("Gateway device surface listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
        {
            tracing::error!("Gateway surface error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}

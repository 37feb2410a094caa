//
// web.rs
// Dicom-Hanging-rs
//
// Axum-based HTTP server exposing the registered protocols and a one-shot hanging endpoint.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::cli::ProtocolSummary;
use crate::error::HangingProtocolError;
use crate::models::HangingData;
use crate::protocol::Protocol;
use crate::service::{self, HangingReport};

#[derive(Clone)]
struct AppState {
    protocols: Arc<Vec<Protocol>>,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangRequest {
    #[serde(flatten)]
    pub data: HangingData,
    #[serde(default)]
    pub protocol_id: Option<String>,
    #[serde(default)]
    pub stage: usize,
}

pub fn router(protocols: Vec<Protocol>) -> Router {
    let state = AppState {
        protocols: Arc::new(protocols),
    };

    Router::new()
        .route("/api/protocols", get(protocols_handler))
        .route("/api/hang", post(hang_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bootstraps the Axum HTTP server and wires up API routes.
pub async fn start_server(host: &str, port: u16, protocols: Vec<Protocol>) -> anyhow::Result<()> {
    let app = router(protocols);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!(%addr, "Server running");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn protocols_handler(State(state): State<AppState>) -> Json<Vec<ProtocolSummary>> {
    Json(state.protocols.iter().map(Into::into).collect())
}

async fn hang_handler(
    State(state): State<AppState>,
    Json(request): Json<HangRequest>,
) -> ApiResult<Json<HangingReport>> {
    let HangRequest {
        data,
        protocol_id,
        stage,
    } = request;
    let report = service::hang(&state.protocols, data, protocol_id.as_deref(), stage)
        .map_err(|e| match e {
            HangingProtocolError::UnknownProtocol { .. } => not_found(e),
            HangingProtocolError::NoProtocolAvailable => unprocessable(e),
            other => internal_error(other),
        })?;
    Ok(Json(report))
}

fn not_found<E: Display>(err: E) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, err.to_string())
}

fn unprocessable<E: Display>(err: E) -> (StatusCode, String) {
    (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
}

fn internal_error<E: Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

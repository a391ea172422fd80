//! HTTP surface of the provisioner.
//!
//! The orchestrator integration calls these endpoints for every claim it
//! wants provisioned and every released volume it wants reclaimed.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::error::ProvisionError;
use crate::provisioner::Provisioner;
use crate::request::{ProvisionRequest, VolumeDescriptor};

#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<dyn Provisioner>,
    pub provisioner_name: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct Capabilities {
    provisioner: String,
    supports_block: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/capabilities", get(capabilities))
        .route("/v1/volumes", post(provision))
        .route("/v1/volumes/reclaim", post(reclaim))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn capabilities(State(state): State<AppState>) -> impl IntoResponse {
    Json(Capabilities {
        provisioner: state.provisioner_name.clone(),
        supports_block: state.provisioner.supports_block(),
    })
}

async fn provision(
    State(state): State<AppState>,
    Json(request): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<VolumeDescriptor>), ProvisionError> {
    let descriptor = state.provisioner.provision(&request).await?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

async fn reclaim(
    State(state): State<AppState>,
    Json(volume): Json<VolumeDescriptor>,
) -> Result<StatusCode, ProvisionError> {
    state.provisioner.reclaim(&volume).await?;
    Ok(StatusCode::NO_CONTENT)
}

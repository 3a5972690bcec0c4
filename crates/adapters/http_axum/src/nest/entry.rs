//! Service discovery and liveness probe for the firmware.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use hearth_app::ports::{ObjectRepository, PairingGate};
use hearth_app::services::transport_service::ServiceUrls;
use hearth_domain::time;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Ping {
    pub status: &'static str,
    pub timestamp: i64,
}

/// `GET|POST /nest/entry`: where the device finds every other service.
pub async fn entry<R, G>(State(state): State<AppState<R, G>>) -> Json<ServiceUrls>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    Json(state.transport.settings().service_urls())
}

/// `GET /nest/ping`
pub async fn ping() -> Json<Ping> {
    Json(Ping {
        status: "ok",
        timestamp: time::to_millis(time::now()),
    })
}

//! Control API: operator commands, status and observer long-polls.

#[allow(clippy::missing_errors_doc)]
pub mod commands;
#[allow(clippy::missing_errors_doc)]
pub mod devices;
pub mod sse;
#[allow(clippy::missing_errors_doc)]
pub mod subscribe;

use axum::Router;
use axum::routing::{delete, get, post};

use hearth_app::ports::{ObjectRepository, PairingGate};

use crate::state::AppState;

/// Build the control sub-router.
pub fn routes<R, G>() -> Router<AppState<R, G>>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    Router::new()
        // Commands
        .route("/command", post(commands::command::<R, G>))
        .route("/notify-device", post(commands::notify_device::<R, G>))
        // Devices
        .route("/status", get(devices::status::<R, G>))
        .route("/api/devices", get(devices::list::<R, G>))
        .route("/api/devices/{serial}", delete(devices::delete::<R, G>))
        .route("/api/stats", get(devices::stats::<R, G>))
        // Observers
        .route("/api/subscribe", post(subscribe::observe::<R, G>))
        .route("/api/events/stream", get(sse::stream::<R, G>))
}

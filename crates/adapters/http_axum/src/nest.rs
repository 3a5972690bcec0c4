//! Device transport: the endpoints the thermostat firmware talks to.

#[allow(clippy::missing_errors_doc)]
pub mod entry;
#[allow(clippy::missing_errors_doc)]
pub mod transport;
pub mod wire;

use std::time::Duration;

use axum::Router;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::routing::{get, post};

use hearth_app::ports::{ObjectRepository, PairingGate};
use hearth_domain::time;

use crate::state::AppState;

pub const SERVICE_TIMESTAMP_HEADER: &str = "x-nl-service-timestamp";
pub const SUSPEND_TIME_MAX_HEADER: &str = "x-nl-suspend-time-max";
pub const DEFER_DEVICE_WINDOW_HEADER: &str = "x-nl-defer-device-window";
pub const DISABLE_DEFER_WINDOW_HEADER: &str = "x-nl-disable-defer-window";

/// Build the `/nest` sub-router.
pub fn routes<R, G>() -> Router<AppState<R, G>>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    Router::new()
        .route("/nest/transport", post(transport::subscribe::<R, G>))
        .route(
            "/nest/transport/{version}/subscribe",
            post(transport::subscribe::<R, G>),
        )
        .route("/nest/transport/put", post(transport::put::<R, G>))
        .route("/nest/transport/{version}/put", post(transport::put::<R, G>))
        .route(
            "/nest/transport/device/{serial}",
            get(transport::list_objects::<R, G>),
        )
        .route(
            "/nest/entry",
            get(entry::entry::<R, G>).post(entry::entry::<R, G>),
        )
        .route("/nest/ping", get(entry::ping))
}

/// Headers every transport response carries.
///
/// `disable_defer` asks the device to apply the body at once instead of
/// batching it with local dial changes.
#[must_use]
pub fn protocol_headers(
    suspend_time_max: Duration,
    defer_device_window: Duration,
    disable_defer: bool,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(SERVICE_TIMESTAMP_HEADER),
        HeaderValue::from(time::to_millis(time::now())),
    );
    headers.insert(
        HeaderName::from_static(SUSPEND_TIME_MAX_HEADER),
        HeaderValue::from(suspend_time_max.as_secs()),
    );
    headers.insert(
        HeaderName::from_static(DEFER_DEVICE_WINDOW_HEADER),
        HeaderValue::from(defer_device_window.as_secs()),
    );
    if disable_defer {
        headers.insert(
            HeaderName::from_static(DISABLE_DEFER_WINDOW_HEADER),
            HeaderValue::from_static("1"),
        );
    }
    headers
}

//! Axum router assembly.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use hearth_app::ports::{ObjectRepository, PairingGate};

use crate::state::AppState;

/// Build the device-facing [`Router`] (`/nest/...`).
///
/// Includes a [`TraceLayer`] that logs each HTTP request/response at the
/// `DEBUG` level using the `tracing` ecosystem.
pub fn build_device<R, G>(state: AppState<R, G>) -> Router
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .merge(crate::nest::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the operator-facing [`Router`] (commands, status, observers).
pub fn build_control<R, G>(state: AppState<R, G>) -> Router
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .merge(crate::api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHub;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn should_return_ok_when_health_check_called() {
        let hub = TestHub::open();

        for app in [build_device(hub.state.clone()), build_control(hub.state)] {
            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/health")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn should_not_expose_control_routes_on_device_router() {
        let hub = TestHub::open();

        let response = build_device(hub.state)
            .oneshot(
                Request::builder()
                    .uri("/api/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

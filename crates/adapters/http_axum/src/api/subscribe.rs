//! Observer long-poll.
//!
//! Observers see command writes at once, while the device only gets them
//! once its defer window closes.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use hearth_app::ports::{ObjectRepository, PairingGate};
use hearth_domain::device::Serial;
use hearth_domain::object::{ObjectKey, VersionedObject};

use crate::error::ApiError;
use crate::state::AppState;

/// A key and the revision the observer already has.
#[derive(Deserialize)]
pub struct KnownObject {
    pub object_key: ObjectKey,
    #[serde(default)]
    pub object_revision: u64,
}

/// Request body for `POST /api/subscribe`.
#[derive(Deserialize)]
pub struct ObserveRequest {
    pub serial: String,
    /// Empty means every key of the device, from revision 0.
    #[serde(default)]
    pub objects: Vec<KnownObject>,
    /// Wait bound in seconds, capped by the server hold.
    pub timeout: Option<u64>,
}

#[derive(Serialize)]
pub struct ObserveReply {
    pub objects: Vec<VersionedObject>,
}

/// Possible responses from the observe endpoint.
pub enum ObserveResponse {
    Ok(Json<ObserveReply>),
}

impl IntoResponse for ObserveResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// `POST /api/subscribe`
pub async fn observe<R, G>(
    State(state): State<AppState<R, G>>,
    Json(req): Json<ObserveRequest>,
) -> Result<ObserveResponse, ApiError>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    let serial = Serial::parse(&req.serial)?;
    let baselines: BTreeMap<ObjectKey, u64> = req
        .objects
        .into_iter()
        .map(|known| (known.object_key, known.object_revision))
        .collect();
    let objects = state
        .control
        .observe(&serial, baselines, req.timeout.map(Duration::from_secs))
        .await?;
    Ok(ObserveResponse::Ok(Json(ObserveReply { objects })))
}

#[cfg(test)]
mod tests {
    use crate::router::build_control;
    use crate::test_support::{SERIAL, TestHub, json_body, json_request};
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn should_return_current_objects_when_observer_knows_nothing() {
        let hub = TestHub::open();
        hub.seed(&format!("shared.{SERIAL}"), json!({"target_temperature": 20.0}))
            .await;

        let response = build_control(hub.state)
            .oneshot(json_request("POST", "/api/subscribe", &json!({"serial": SERIAL})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["objects"][0]["object_key"], json!(format!("shared.{SERIAL}")));
    }

    #[tokio::test]
    async fn should_wake_observer_on_command_write() {
        let hub = TestHub::open();
        let stored = hub
            .seed(&format!("shared.{SERIAL}"), json!({"target_temperature": 20.0}))
            .await;
        let app = build_control(hub.state);

        let waiting = tokio::spawn(app.clone().oneshot(json_request(
            "POST",
            "/api/subscribe",
            &json!({
                "serial": SERIAL,
                "objects": [{"object_key": format!("shared.{SERIAL}"), "object_revision": stored.revision}]
            }),
        )));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        app.oneshot(json_request(
            "POST",
            "/command",
            &json!({"serial": SERIAL, "command": "set_temperature", "value": 22}),
        ))
        .await
        .unwrap();

        let body = json_body(waiting.await.unwrap().unwrap()).await;
        assert_eq!(body["objects"][0]["object_revision"], json!(stored.revision + 1));
        assert_eq!(body["objects"][0]["value"]["target_temperature"], json!(22.0));
    }

    #[tokio::test(start_paused = true)]
    async fn should_resolve_empty_when_nothing_changes_before_timeout() {
        let hub = TestHub::open();
        let stored = hub
            .seed(&format!("shared.{SERIAL}"), json!({"target_temperature": 20.0}))
            .await;

        let response = build_control(hub.state)
            .oneshot(json_request(
                "POST",
                "/api/subscribe",
                &json!({
                    "serial": SERIAL,
                    "timeout": 10,
                    "objects": [{"object_key": format!("shared.{SERIAL}"), "object_revision": stored.revision}]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(json_body(response).await, json!({"objects": []}));
    }
}

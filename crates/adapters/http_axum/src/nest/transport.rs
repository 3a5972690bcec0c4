//! Subscribe, put and object listing for devices.
//!
//! A chunked subscribe answers with headers at once so the device may go
//! back to sleep, and writes the body only when the long-poll resolves.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use hearth_app::ports::{ObjectRepository, PairingGate};
use hearth_app::services::transport_service::{PutReply, SubscribeRequest, TransportService};
use hearth_domain::device::Serial;
use hearth_domain::object::VersionedObject;

use crate::error::ApiError;
use crate::nest::protocol_headers;
use crate::nest::wire::{self, ObjectsBody, WireObject};
use crate::serial::{DeviceSerial, weave_device_id};
use crate::state::AppState;

#[derive(Serialize)]
struct Unpaired {
    error: &'static str,
}

/// Possible responses from the subscribe endpoint.
pub enum SubscribeResponse {
    /// Answer now.
    Ok(HeaderMap, Json<ObjectsBody>),
    /// Headers now, body when the long-poll resolves.
    Held(HeaderMap, Body),
    Unauthorized,
}

impl IntoResponse for SubscribeResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(headers, json) => (headers, json).into_response(),
            Self::Held(headers, body) => (
                StatusCode::OK,
                headers,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                )],
                body,
            )
                .into_response(),
            Self::Unauthorized => unauthorized(),
        }
    }
}

/// Possible responses from the put endpoint.
pub enum PutResponse {
    Ok(HeaderMap, Json<ObjectsBody>),
    Unauthorized,
}

impl IntoResponse for PutResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(headers, json) => (headers, json).into_response(),
            Self::Unauthorized => unauthorized(),
        }
    }
}

/// Possible responses from the object listing endpoint.
pub enum ListResponse {
    Ok(HeaderMap, Json<ObjectsBody>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(headers, json) => (headers, json).into_response(),
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(Unpaired {
            error: "device is not paired",
        }),
    )
        .into_response()
}

/// `POST /nest/transport` and `POST /nest/transport/{version}/subscribe`
pub async fn subscribe<R, G>(
    State(state): State<AppState<R, G>>,
    DeviceSerial(serial): DeviceSerial,
    headers: HeaderMap,
    body: Bytes,
) -> Result<SubscribeResponse, ApiError>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    if !authorized(&state, &serial).await? {
        return Ok(SubscribeResponse::Unauthorized);
    }
    let transport = &state.transport;

    let parsed = match wire::parse_subscribe(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(%serial, error = %err, "malformed subscribe body");
            return Ok(SubscribeResponse::Ok(
                headers_for(transport, false),
                Json(ObjectsBody::empty()),
            ));
        }
    };
    tracing::debug!(
        %serial,
        session = parsed.session.as_deref().unwrap_or(""),
        chunked = parsed.chunked,
        objects = parsed.objects.len(),
        "subscribe"
    );

    let prepared = transport
        .prepare_subscribe(SubscribeRequest {
            serial,
            objects: parsed.objects,
            chunked: parsed.chunked,
            timeout: parsed.timeout,
            weave_device_id: weave_device_id(&headers),
        })
        .await?;
    let response_headers = headers_for(transport, prepared.disables_defer_window());

    if !prepared.chunked || !prepared.immediate.is_empty() {
        return Ok(SubscribeResponse::Ok(
            response_headers,
            Json(render(prepared.immediate)),
        ));
    }

    // the slot is taken before headers go out so a full device sees 429
    let registration = transport.reserve(prepared.subscription)?;
    let transport = Arc::clone(transport);
    let held = futures::stream::once(async move {
        let serial = registration.subscription().serial.clone();
        let objects = transport.hold(registration).await;
        // timed out: close without a body rather than tickle the device
        let body = if objects.is_empty() {
            Vec::new()
        } else {
            tracing::debug!(%serial, objects = objects.len(), "pushing to held connection");
            encode(&render(objects))
        };
        Ok::<_, Infallible>(Bytes::from(body))
    });

    Ok(SubscribeResponse::Held(
        response_headers,
        Body::from_stream(held),
    ))
}

/// `POST /nest/transport/put` and `POST /nest/transport/{version}/put`
pub async fn put<R, G>(
    State(state): State<AppState<R, G>>,
    DeviceSerial(serial): DeviceSerial,
    headers: HeaderMap,
    body: Bytes,
) -> Result<PutResponse, ApiError>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    if !authorized(&state, &serial).await? {
        return Ok(PutResponse::Unauthorized);
    }
    let transport = &state.transport;

    let objects = match wire::parse_put(&body) {
        Ok(objects) => objects,
        Err(err) => {
            tracing::warn!(%serial, error = %err, "malformed put body");
            return Ok(PutResponse::Ok(
                headers_for(transport, false),
                Json(ObjectsBody::empty()),
            ));
        }
    };

    let weave = weave_device_id(&headers);
    let body = match transport
        .put(&serial, objects, weave.as_deref())
        .await?
    {
        PutReply::Applied { objects, shared } => objects
            .into_iter()
            .map(WireObject::ingested)
            .chain(shared.map(WireObject::from))
            .collect(),
        PutReply::Conflict(server) => {
            tracing::debug!(%serial, key = %server.key, revision = server.revision, "put precondition failed");
            std::iter::once(WireObject::from(server)).collect()
        }
    };

    Ok(PutResponse::Ok(headers_for(transport, false), Json(body)))
}

/// `GET /nest/transport/device/{serial}`: revisions only, no values.
pub async fn list_objects<R, G>(
    State(state): State<AppState<R, G>>,
    Path(raw): Path<String>,
) -> Result<ListResponse, ApiError>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    let serial = Serial::parse(raw.strip_prefix("device.").unwrap_or(&raw))?;
    let body = state
        .transport
        .device_objects(&serial)?
        .iter()
        .map(WireObject::metadata)
        .collect();
    Ok(ListResponse::Ok(
        headers_for(&state.transport, false),
        Json(body),
    ))
}

async fn authorized<R, G>(state: &AppState<R, G>, serial: &Serial) -> Result<bool, ApiError>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    if !state.pairing_required {
        return Ok(true);
    }
    Ok(state.transport.authorize(serial).await?)
}

fn headers_for<R, G>(transport: &TransportService<R, G>, disable_defer: bool) -> HeaderMap
where
    R: ObjectRepository + Send + Sync,
    G: PairingGate + Send + Sync,
{
    protocol_headers(
        transport.settings().suspend_time_max,
        transport.defer_device_window(),
        disable_defer,
    )
}

fn render(objects: Vec<VersionedObject>) -> ObjectsBody {
    objects.into_iter().map(WireObject::from).collect()
}

fn encode(body: &ObjectsBody) -> Vec<u8> {
    serde_json::to_vec(body).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to encode transport body");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use crate::router::build_device;
    use crate::test_support::{ClosedGate, SERIAL, TestHub, json_body, json_request};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hearth_app::hub::HubSettings;
    use hearth_app::ports::OpenPairingGate;
    use hearth_domain::device::Serial;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    #[tokio::test]
    async fn should_answer_non_chunked_subscribe_with_outdated_objects() {
        let hub = TestHub::open();
        let stored = hub
            .seed(&format!("shared.{SERIAL}"), json!({"target_temperature": 21.0}))
            .await;

        let response = build_device(hub.state)
            .oneshot(json_request(
                "POST",
                "/nest/transport",
                &json!({
                    "chunked": false,
                    "objects": [{
                        "object_key": format!("shared.{SERIAL}"),
                        "object_revision": 0,
                        "object_timestamp": 1
                    }]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-nl-service-timestamp"));
        assert_eq!(response.headers()["x-nl-suspend-time-max"], "60");
        assert_eq!(response.headers()["x-nl-defer-device-window"], "15");
        assert_eq!(response.headers()["x-nl-disable-defer-window"], "1");
        let body = json_body(response).await;
        assert_eq!(body["objects"][0]["object_revision"], json!(stored.revision));
        assert_eq!(body["objects"][0]["value"]["target_temperature"], json!(21.0));
    }

    #[tokio::test]
    async fn should_acknowledge_malformed_subscribe_with_empty_objects() {
        let hub = TestHub::open();

        let response = build_device(hub.state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/nest/transport/v7/subscribe")
                    .header("x-nl-device-serial", SERIAL)
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"objects": []}));
    }

    #[tokio::test]
    async fn should_reject_subscribe_without_serial() {
        let hub = TestHub::open();

        let response = build_device(hub.state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/nest/transport")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn should_return_unauthorized_when_pairing_required_and_device_unpaired() {
        let hub = TestHub::with_gate(ClosedGate, true);

        let response = build_device(hub.state)
            .oneshot(json_request("POST", "/nest/transport/put", &json!({"objects": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn should_ignore_pairing_gate_when_pairing_not_required() {
        let hub = TestHub::with_gate(ClosedGate, false);

        let response = build_device(hub.state)
            .oneshot(json_request("POST", "/nest/transport/put", &json!({"objects": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn should_push_device_write_to_held_chunked_subscribe() {
        let hub = TestHub::open();
        let stored = hub
            .seed(&format!("device.{SERIAL}"), json!({"current_temperature": 20.0}))
            .await;

        let response = build_device(hub.state.clone())
            .oneshot(json_request(
                "POST",
                "/nest/transport",
                &json!({
                    "chunked": true,
                    "objects": [{
                        "object_key": format!("device.{SERIAL}"),
                        "object_revision": stored.revision,
                        "object_timestamp": stored.timestamp
                    }]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = tokio::spawn(json_body(response));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        hub.seed(&format!("device.{SERIAL}"), json!({"current_temperature": 20.5}))
            .await;

        let body = body.await.unwrap();
        assert_eq!(body["objects"][0]["object_revision"], json!(stored.revision + 1));
        assert_eq!(body["objects"][0]["value"]["current_temperature"], json!(20.5));
    }

    #[tokio::test]
    async fn should_refuse_held_subscribe_with_429_when_device_at_capacity() {
        let hub = TestHub::with_settings(
            OpenPairingGate,
            false,
            HubSettings {
                max_subscriptions_per_device: 1,
                ..HubSettings::default()
            },
        );
        let stored = hub
            .seed(&format!("device.{SERIAL}"), json!({"current_temperature": 20.0}))
            .await;
        let body: Value = json!({
            "chunked": true,
            "objects": [{
                "object_key": format!("device.{SERIAL}"),
                "object_revision": stored.revision,
                "object_timestamp": stored.timestamp
            }]
        });
        let app = build_device(hub.state.clone());

        let held = app
            .clone()
            .oneshot(json_request("POST", "/nest/transport", &body))
            .await
            .unwrap();
        assert_eq!(held.status(), StatusCode::OK);
        assert_eq!(hub.hub.broker.count(&Serial::parse(SERIAL).unwrap()), 1);

        let refused = app
            .clone()
            .oneshot(json_request("POST", "/nest/transport", &body))
            .await
            .unwrap();
        assert_eq!(refused.status(), StatusCode::TOO_MANY_REQUESTS);

        // hanging up on the held body frees the slot
        drop(held);
        let retried = app
            .oneshot(json_request("POST", "/nest/transport", &body))
            .await
            .unwrap();
        assert_eq!(retried.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn should_close_held_subscribe_without_body_when_wait_bound_expires() {
        let hub = TestHub::open();
        let stored = hub
            .seed(&format!("device.{SERIAL}"), json!({"current_temperature": 20.0}))
            .await;

        let response = build_device(hub.state)
            .oneshot(json_request(
                "POST",
                "/nest/transport",
                &json!({
                    "chunked": true,
                    "timeout": 5,
                    "objects": [{
                        "object_key": format!("device.{SERIAL}"),
                        "object_revision": stored.revision,
                        "object_timestamp": stored.timestamp
                    }]
                }),
            ))
            .await
            .unwrap();

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn should_echo_changed_objects_and_append_shared_on_put() {
        let hub = TestHub::open();
        hub.seed(&format!("shared.{SERIAL}"), json!({"target_temperature": 21.0}))
            .await;

        let response = build_device(hub.state)
            .oneshot(json_request(
                "POST",
                "/nest/transport/put",
                &json!({
                    "objects": [{
                        "object_key": format!("device.{SERIAL}"),
                        "value": {"current_humidity": 40}
                    }]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let objects = body["objects"].as_array().unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["object_key"], json!(format!("device.{SERIAL}")));
        assert_eq!(objects[0]["value"]["current_humidity"], json!(40));
        assert_eq!(objects[1]["object_key"], json!(format!("shared.{SERIAL}")));
    }

    #[tokio::test]
    async fn should_return_server_object_when_put_revision_mismatches() {
        let hub = TestHub::open();
        let stored = hub
            .seed(&format!("shared.{SERIAL}"), json!({"target_temperature": 21.0}))
            .await;

        let response = build_device(hub.state)
            .oneshot(json_request(
                "POST",
                "/nest/transport/v5/put",
                &json!({
                    format!("shared.{SERIAL}"): {
                        "object_key": format!("shared.{SERIAL}"),
                        "if_object_revision": stored.revision + 3,
                        "target_temperature": 19.0
                    }
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["objects"][0]["object_revision"], json!(stored.revision));
        assert_eq!(body["objects"][0]["value"]["target_temperature"], json!(21.0));
    }

    #[tokio::test]
    async fn should_list_object_revisions_without_values() {
        let hub = TestHub::open();
        hub.seed(&format!("device.{SERIAL}"), json!({"current_temperature": 20.0}))
            .await;
        let app = build_device(hub.state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/nest/transport/device/device.{SERIAL}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["objects"][0]["object_revision"], json!(1));
        assert!(body["objects"][0].get("value").is_none());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nest/transport/device/09BB01AB501203ZZ")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

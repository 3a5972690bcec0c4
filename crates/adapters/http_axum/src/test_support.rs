use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use serde_json::Value;

use hearth_app::event_bus::InProcessEventBus;
use hearth_app::hub::{Hub, HubSettings};
use hearth_app::notifier::forward_events;
use hearth_app::ports::{ObjectRepository, OpenPairingGate, PairingGate};
use hearth_domain::device::Serial;
use hearth_domain::error::HubError;
use hearth_domain::event::EventOrigin;
use hearth_domain::object::{ObjectKey, VersionedObject};

use crate::state::AppState;

pub const SERIAL: &str = "02AA01AB501203EQ";

/// Repository that persists nothing; the in-memory store keeps the state.
pub struct StubRepo;

impl ObjectRepository for StubRepo {
    async fn load_all(&self) -> Result<Vec<(Serial, VersionedObject)>, HubError> {
        Ok(vec![])
    }
    async fn upsert(&self, _serial: &Serial, _object: &VersionedObject) -> Result<(), HubError> {
        Ok(())
    }
    async fn delete_device(&self, _serial: &Serial) -> Result<(), HubError> {
        Ok(())
    }
}

pub struct ClosedGate;

impl PairingGate for ClosedGate {
    async fn is_authorized(&self, _serial: &Serial) -> Result<bool, HubError> {
        Ok(false)
    }
}

pub struct TestHub<G> {
    pub hub: Hub<StubRepo, G>,
    pub state: AppState<StubRepo, G>,
    pub bus: Arc<InProcessEventBus>,
}

impl TestHub<OpenPairingGate> {
    pub fn open() -> Self {
        Self::with_gate(OpenPairingGate, false)
    }
}

impl<G: PairingGate + Send + Sync + 'static> TestHub<G> {
    pub fn with_gate(gate: G, pairing_required: bool) -> Self {
        Self::with_settings(gate, pairing_required, HubSettings::default())
    }

    pub fn with_settings(gate: G, pairing_required: bool, settings: HubSettings) -> Self {
        let (hub, events) = Hub::new(StubRepo, gate, settings);
        let bus = Arc::new(InProcessEventBus::new(64));
        tokio::spawn(forward_events(events, Arc::clone(&bus)));
        let state = AppState::from_hub(&hub, Arc::clone(&bus), pairing_required);
        Self { hub, state, bus }
    }

    /// Store `value` under `key` as if the device had uploaded it.
    pub async fn seed(&self, key: &str, value: Value) -> VersionedObject {
        let serial = Serial::parse(SERIAL).unwrap();
        self.hub
            .store
            .writer(&serial)
            .await
            .merge(
                &ObjectKey::parse(key).unwrap(),
                value.as_object().unwrap(),
                EventOrigin::Device,
            )
            .await
            .unwrap()
    }
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-nl-device-serial", SERIAL)
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

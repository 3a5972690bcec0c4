//! Server-Sent Events (SSE) stream of committed changes.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use hearth_app::ports::{ObjectRepository, PairingGate};

use crate::state::AppState;

/// `GET /api/events/stream`: SSE stream of bridge events.
///
/// Subscribes to the event bus broadcast channel and sends JSON-encoded
/// events as SSE `data:` frames, named after the event type. The stream
/// continues until the client disconnects or the event bus is closed.
pub async fn stream<R, G>(
    State(state): State<AppState<R, G>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    let event_rx = state.event_bus.subscribe();
    let event_stream = BroadcastStream::new(event_rx).filter_map(|result| match result {
        Ok(event) => match Event::default().json_data(&event) {
            Ok(frame) => Some(Ok(frame.event(kind_name(&event.kind)))),
            Err(err) => {
                tracing::warn!(%err, "failed to serialize event to JSON for SSE stream");
                None
            }
        },
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!(
                skipped = n,
                "SSE subscriber lagged, some events were dropped"
            );
            None
        }
    });

    Sse::new(event_stream).keep_alive(KeepAlive::default())
}

fn kind_name(kind: &hearth_domain::event::EventKind) -> &'static str {
    use hearth_domain::event::EventKind;
    match kind {
        EventKind::ObjectChanged { .. } => "object_changed",
        EventKind::AvailabilityChanged { .. } => "availability_changed",
        EventKind::DeviceRemoved => "device_removed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{SERIAL, TestHub};
    use hearth_domain::event::EventKind;
    use serde_json::json;

    #[tokio::test]
    async fn should_forward_committed_writes_to_event_bus() {
        let hub = TestHub::open();
        let mut rx = hub.bus.subscribe();

        // Create SSE stream (this also subscribes internally)
        let _sse_response = stream(State(hub.state.clone())).await;

        let stored = hub
            .seed(&format!("shared.{SERIAL}"), json!({"target_temperature": 20.0}))
            .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.serial.as_str(), SERIAL);
        match received.kind {
            EventKind::ObjectChanged { key, revision, .. } => {
                assert_eq!(key, stored.key);
                assert_eq!(revision, stored.revision);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn should_name_frames_after_event_kind() {
        assert_eq!(kind_name(&EventKind::DeviceRemoved), "device_removed");
    }
}

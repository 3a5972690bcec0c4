//! MQTT client wiring: connection options, the event loop driver and the
//! [`EventPublisher`] that mirrors bridge events to the broker.

use std::future::Future;
use std::time::Duration;

use rumqttc::{AsyncClient, Event as MqttEvent, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use hearth_app::ports::EventPublisher;
use hearth_domain::error::HubError;
use hearth_domain::event::Event;

use crate::config::MqttConfig;
use crate::error::MqttError;
use crate::topic::{Message, OFFLINE, ONLINE, TopicMap};

/// Requests the client may queue before `publish` waits on the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Publishes bridge events as retained messages.
#[derive(Clone)]
pub struct MqttBridge {
    client: AsyncClient,
    topics: TopicMap,
}

impl MqttBridge {
    /// Build the client for `config`.
    ///
    /// Nothing touches the network until the returned [`EventLoop`] is
    /// polled, see [`spawn_event_loop`].
    #[must_use]
    pub fn new(config: &MqttConfig) -> (Self, EventLoop) {
        let topics = TopicMap::new(&config.topic_prefix, config.publish_fields);

        let mut options = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);
        options.set_last_will(LastWill::new(
            topics.bridge_topic(),
            OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        (Self { client, topics }, event_loop)
    }

    /// Forward every event received on `events` until the bus closes.
    pub async fn run(self, mut events: broadcast::Receiver<Event>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let id = event.id;
                    if let Err(err) = self.publish(event).await {
                        tracing::warn!(%err, %id, "MQTT publication failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "MQTT bridge lagged, some events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("MQTT bridge stopped");
    }

    async fn send(client: &AsyncClient, messages: Vec<Message>) -> Result<(), MqttError> {
        for message in messages {
            client
                .publish(message.topic, QoS::AtLeastOnce, true, message.payload)
                .await?;
        }
        Ok(())
    }
}

impl EventPublisher for MqttBridge {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), HubError>> + Send {
        let client = self.client.clone();
        let messages = self.topics.messages(&event);
        async move {
            let messages = messages?;
            Self::send(&client, messages).await?;
            Ok(())
        }
    }
}

/// Drive the connection forever, reconnecting after `reconnect_delay` on
/// any error.
///
/// On every (re)connection the bridge topic is set to `online`; the broker
/// flips it back to `offline` through the last will.
#[must_use]
pub fn spawn_event_loop(
    mut event_loop: EventLoop,
    bridge: &MqttBridge,
    reconnect_delay: Duration,
) -> JoinHandle<()> {
    let client = bridge.client.clone();
    let bridge_topic = bridge.topics.bridge_topic();
    tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(MqttEvent::Incoming(Packet::ConnAck(connack))) => {
                    tracing::info!(code = ?connack.code, "connected to MQTT broker");
                    // the request queue is drained by this very loop, never await here
                    if let Err(err) =
                        client.try_publish(&bridge_topic, QoS::AtLeastOnce, true, ONLINE)
                    {
                        tracing::warn!(%err, "failed to announce MQTT bridge");
                    }
                }
                Ok(MqttEvent::Incoming(Packet::Disconnect)) => {
                    tracing::info!("MQTT broker disconnected");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(%err, "MQTT connection error");
                    tokio::time::sleep(reconnect_delay).await;
                }
            }
        }
    })
}

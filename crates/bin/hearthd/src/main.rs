//! # hearthd: hearth daemon
//!
//! Composition root that wires all adapters together and starts the server.
//!
//! ## Responsibilities
//! - Load configuration (file, env vars) and initialise logging
//! - Initialize the `SQLite` connection pool and run migrations
//! - Build the [`Hub`] and hydrate it from the database
//! - Fan bridge events out to the SSE bus and, when enabled, to MQTT
//! - Start the availability sweeper
//! - Serve the device transport and the control API on their own listeners
//! - Handle graceful shutdown (SIGTERM/SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer, no domain logic belongs here.

mod config;

use std::future::IntoFuture;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use hearth_adapter_http_axum::router;
use hearth_adapter_http_axum::state::AppState;
use hearth_adapter_mqtt::{MqttBridge, spawn_event_loop};
use hearth_adapter_storage_sqlite_sqlx::pool::Config as StorageConfig;
use hearth_app::event_bus::InProcessEventBus;
use hearth_app::hub::Hub;
use hearth_app::notifier::forward_events;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    // Database
    let db = StorageConfig {
        database_url: config.database_url().to_string(),
    }
    .build()
    .await?;

    // Core
    let (hub, events) = Hub::new(
        db.object_repository(),
        db.pairing_gate(),
        config.hub_settings(),
    );
    let loaded = hub.start().await?;
    tracing::info!(loaded, "object store hydrated");

    // Bridges
    let event_bus = Arc::new(InProcessEventBus::new(config.transport.event_capacity));
    if config.mqtt.enabled {
        let (bridge, event_loop) = MqttBridge::new(&config.mqtt);
        let _driver = spawn_event_loop(event_loop, &bridge, config.mqtt.reconnect_delay());
        tokio::spawn(bridge.run(event_bus.subscribe()));
        tracing::info!(
            host = %config.mqtt.broker_host,
            port = config.mqtt.broker_port,
            prefix = %config.mqtt.topic_prefix,
            "MQTT bridge enabled"
        );
    }
    tokio::spawn(forward_events(events, Arc::clone(&event_bus)));
    let _sweeper = Arc::clone(&hub.tracker).spawn_sweeper();

    // HTTP
    let state = AppState::from_hub(&hub, event_bus, config.pairing.required);
    let device_app = router::build_device(state.clone());
    let control_app = router::build_control(state);

    let device_listener = TcpListener::bind(config.bind_addr()).await?;
    let control_listener = TcpListener::bind(config.control_bind_addr()).await?;
    tracing::info!(
        device = %config.bind_addr(),
        control = %config.control_bind_addr(),
        pairing_required = config.pairing.required,
        "hearthd listening"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutting down");
        let _ = stop_tx.send(true);
    });

    let device = axum::serve(device_listener, device_app)
        .with_graceful_shutdown(stopped(stop_rx.clone()))
        .into_future();
    let control = axum::serve(control_listener, control_app)
        .with_graceful_shutdown(stopped(stop_rx))
        .into_future();
    tokio::try_join!(device, control)?;

    Ok(())
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    // a dropped sender also means stop
    let _ = stop.wait_for(|stopping| *stopping).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

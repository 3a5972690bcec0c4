//! JSON handlers for operator commands.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use hearth_app::ports::{ObjectRepository, PairingGate};
use hearth_domain::device::Serial;
use hearth_domain::object::{ObjectKey, Payload};

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for `POST /command`.
#[derive(Deserialize)]
pub struct CommandRequest {
    pub serial: String,
    pub command: String,
    #[serde(default)]
    pub value: Value,
}

/// Request body for `POST /notify-device`.
#[derive(Deserialize)]
pub struct NotifyRequest {
    pub serial: String,
}

#[derive(Debug, Serialize)]
pub struct CommandData {
    pub command: &'static str,
    pub object_key: ObjectKey,
    pub object_revision: u64,
    /// Fields written, after clamping.
    pub values: Payload,
    pub clamped: bool,
}

#[derive(Debug, Serialize)]
pub struct NotifyData {
    pub serial: Serial,
    pub notified: usize,
}

#[derive(Debug, Serialize)]
pub struct Success<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Success<T> {
    fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Possible responses from the command endpoint.
pub enum CommandResponse {
    Ok(Json<Success<CommandData>>),
}

impl IntoResponse for CommandResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the notify endpoint.
pub enum NotifyResponse {
    Ok(Json<Success<NotifyData>>),
}

impl IntoResponse for NotifyResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// `POST /command`
pub async fn command<R, G>(
    State(state): State<AppState<R, G>>,
    Json(req): Json<CommandRequest>,
) -> Result<CommandResponse, ApiError>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    let serial = Serial::parse(&req.serial)?;
    let outcome = state
        .control
        .apply_command(&serial, &req.command, &req.value)
        .await?;
    Ok(CommandResponse::Ok(Json(Success::new(CommandData {
        command: outcome.command.as_str(),
        object_key: outcome.object.key,
        object_revision: outcome.object.revision,
        values: outcome.values,
        clamped: outcome.clamped,
    }))))
}

/// `POST /notify-device`: push pending commands to the device now.
pub async fn notify_device<R, G>(
    State(state): State<AppState<R, G>>,
    Json(req): Json<NotifyRequest>,
) -> Result<NotifyResponse, ApiError>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    let serial = Serial::parse(&req.serial)?;
    let notified = state.control.notify_device(&serial)?;
    Ok(NotifyResponse::Ok(Json(Success::new(NotifyData {
        serial,
        notified,
    }))))
}

//! JSON handlers for device status and administration.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use hearth_app::ports::{ObjectRepository, PairingGate};
use hearth_app::services::control_service::{DeviceReport, HubStats};
use hearth_domain::device::{DeviceStatus, Serial};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct StatusQuery {
    pub serial: String,
}

#[derive(Serialize)]
pub struct DeviceList {
    pub devices: Vec<DeviceStatus>,
}

/// Possible responses from the status endpoint.
pub enum StatusResponse {
    Ok(Json<DeviceReport>),
}

impl IntoResponse for StatusResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(Json<DeviceList>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the delete endpoint.
pub enum DeleteResponse {
    NoContent,
}

impl IntoResponse for DeleteResponse {
    fn into_response(self) -> Response {
        match self {
            Self::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

/// Possible responses from the stats endpoint.
pub enum StatsResponse {
    Ok(Json<HubStats>),
}

impl IntoResponse for StatsResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// `GET /status?serial=`
pub async fn status<R, G>(
    State(state): State<AppState<R, G>>,
    Query(query): Query<StatusQuery>,
) -> Result<StatusResponse, ApiError>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    let serial = Serial::parse(&query.serial)?;
    let report = state.control.status(&serial)?;
    Ok(StatusResponse::Ok(Json(report)))
}

/// `GET /api/devices`
pub async fn list<R, G>(State(state): State<AppState<R, G>>) -> ListResponse
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    ListResponse::Ok(Json(DeviceList {
        devices: state.control.list_devices(),
    }))
}

/// `DELETE /api/devices/{serial}`
pub async fn delete<R, G>(
    State(state): State<AppState<R, G>>,
    Path(serial): Path<String>,
) -> Result<DeleteResponse, ApiError>
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    let serial = Serial::parse(&serial)?;
    state.control.delete_device(&serial).await?;
    Ok(DeleteResponse::NoContent)
}

/// `GET /api/stats`
pub async fn stats<R, G>(State(state): State<AppState<R, G>>) -> StatsResponse
where
    R: ObjectRepository + Send + Sync + 'static,
    G: PairingGate + Send + Sync + 'static,
{
    StatsResponse::Ok(Json(state.control.stats()))
}

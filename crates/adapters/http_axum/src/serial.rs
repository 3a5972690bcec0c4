//! Device identification on transport requests.
//!
//! Firmware identifies itself in several ways depending on whether it holds
//! real credentials. Sources are tried in order:
//!
//! 1. HTTP Basic auth username, `nest.<SERIAL>` or `<SERIAL>`
//! 2. `X-nl-client-id`, `d.<SERIAL>.<random>`
//! 3. `X-nl-device-id`
//! 4. `X-NL-Device-Serial`
//! 5. the `serial` query parameter

use axum::extract::{FromRequestParts, Query};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use hearth_domain::device::Serial;
use hearth_domain::error::ValidationError;

use crate::error::ApiError;

pub const CLIENT_ID_HEADER: &str = "x-nl-client-id";
pub const DEVICE_ID_HEADER: &str = "x-nl-device-id";
pub const DEVICE_SERIAL_HEADER: &str = "x-nl-device-serial";
pub const WEAVE_DEVICE_ID_HEADER: &str = "x-nl-weave-device-id";

/// Serial of the device making a transport request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSerial(pub Serial);

#[derive(Deserialize)]
struct SerialQuery {
    serial: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for DeviceSerial {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let query = Query::<SerialQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.serial);
        extract(&parts.headers, query.as_deref())
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidSerial("device serial required".into()).into())
    }
}

/// First valid serial found in the request, or `None`.
#[must_use]
pub fn extract(headers: &HeaderMap, query: Option<&str>) -> Option<Serial> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header("authorization")
        .and_then(from_basic_auth)
        .or_else(|| header(CLIENT_ID_HEADER).and_then(from_dotted))
        .or_else(|| header(DEVICE_ID_HEADER).and_then(|v| Serial::parse(v).ok()))
        .or_else(|| header(DEVICE_SERIAL_HEADER).and_then(|v| Serial::parse(v).ok()))
        .or_else(|| query.and_then(|v| Serial::parse(v).ok()))
}

/// The `X-nl-weave-device-id` header, if present.
#[must_use]
pub fn weave_device_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(WEAVE_DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn from_basic_auth(value: &str) -> Option<Serial> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (username, _password) = credentials.split_once(':')?;
    from_dotted(username)
}

/// `prefix.SERIAL[.suffix]` yields `SERIAL`; a bare value is the serial itself.
fn from_dotted(value: &str) -> Option<Serial> {
    let mut parts = value.split('.');
    let first = parts.next()?;
    let candidate = match parts.next() {
        Some(second) if !second.is_empty() => second,
        _ => first,
    };
    Serial::parse(candidate).ok()
}

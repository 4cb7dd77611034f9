//! Control-message routing.
//!
//! The first frame after the handshake carries a JSON object naming the
//! tunnel target: `{"Service": "<host>:<port>"}`. Nothing else in the
//! object is consumed.

use serde::Deserialize;
use thiserror::Error;

/// Destination extracted from a control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub host: String,
    pub port: String,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("control message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Service value {0:?} is not of the form host:port")]
    BadService(String),
}

#[derive(Deserialize)]
struct ControlMessage {
    #[serde(rename = "Service")]
    service: String,
}

/// Parses a control payload into a [`RouteSpec`].
///
/// Some clients prepend a single marker byte before the JSON body (a
/// leftover of an older framing scheme), so one leading byte is skipped
/// unless the payload already starts with `{`. The `Service` value must
/// contain exactly one `:` with a non-empty host and port on either side;
/// anything else aborts the session.
pub fn resolve(payload: &[u8]) -> Result<RouteSpec, RouteError> {
    let body = match payload.first() {
        Some(b'{') | None => payload,
        Some(_) => &payload[1..],
    };

    let control: ControlMessage = serde_json::from_slice(body)?;
    let (host, port) = control
        .service
        .split_once(':')
        .ok_or_else(|| RouteError::BadService(control.service.clone()))?;
    if host.is_empty() || port.is_empty() || port.contains(':') {
        return Err(RouteError::BadService(control.service.clone()));
    }

    Ok(RouteSpec {
        host: host.to_string(),
        port: port.to_string(),
    })
}

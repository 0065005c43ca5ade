//! Blocking HTTP client for the Shelly relay that switches the boiler.
//!
//! - `GET http://{host}/relay/0?turn=on|off` switches the relay; only HTTP 200 counts as success.
//! - `GET http://{host}/relay/0` reports `{"ison": bool, ...}`.
//!
//! Every request is bounded by a global timeout so a dead device cannot stall
//! the control loop for longer than that.

use http::StatusCode;
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const RELAY_CHANNEL: u8 = 0;

#[derive(Debug)]
pub enum RelayError {
    Transport(String),
    Http { status: u16, message: String },
    Json(String),
}

impl core::fmt::Display for RelayError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RelayError::Transport(s) => write!(f, "transport error: {}", s),
            RelayError::Http { status, message } => write!(f, "http {}: {}", status, message),
            RelayError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<ureq::Error> for RelayError {
    fn from(value: ureq::Error) -> Self {
        RelayError::Transport(value.to_string())
    }
}

/// The physical switch behind the boiler.
///
/// An `Err` from [`Relay::get_status`] means the state is unknown, which is
/// not the same as off.
pub trait Relay: Send + Sync {
    fn set_state(&self, on: bool) -> Result<(), RelayError>;
    fn get_status(&self) -> Result<bool, RelayError>;

    fn turn_on(&self) -> Result<(), RelayError> {
        self.set_state(true)
    }

    fn turn_off(&self) -> Result<(), RelayError> {
        self.set_state(false)
    }
}

/// Subset of the Gen1 `/relay/{n}` status payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayStatus {
    pub ison: bool,
    #[serde(default)]
    pub has_timer: bool,
    #[serde(default)]
    pub source: Option<String>,
}

pub struct ShellyClient {
    agent: ureq::Agent,
    relay_url: String,
}

impl ShellyClient {
    pub fn new(host: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        ShellyClient {
            agent,
            relay_url: Self::relay_url(host),
        }
    }

    fn relay_url(host: &str) -> String {
        let host = host.trim().trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}/relay/{}", host, RELAY_CHANNEL)
        } else {
            format!("http://{}/relay/{}", host, RELAY_CHANNEL)
        }
    }

    fn get(&self, turn: Option<&str>) -> Result<String, RelayError> {
        let mut req = self.agent.get(&self.relay_url);
        if let Some(t) = turn {
            req = req.query("turn", t);
        }

        let mut res = req.call()?;
        let status = res.status();
        let body = res.body_mut().read_to_string().unwrap_or_default();
        if status != StatusCode::OK {
            return Err(RelayError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }

    pub fn status(&self) -> Result<RelayStatus, RelayError> {
        let body = self.get(None)?;
        parse_status(&body)
    }
}

impl Relay for ShellyClient {
    fn set_state(&self, on: bool) -> Result<(), RelayError> {
        let turn = if on { "on" } else { "off" };
        match self.get(Some(turn)) {
            Ok(body) => {
                debug!("Relay: turn={} accepted ({})", turn, body.trim());
                Ok(())
            }
            Err(e) => {
                warn!("Relay: turn={} failed: {}", turn, e);
                Err(e)
            }
        }
    }

    fn get_status(&self) -> Result<bool, RelayError> {
        match self.status() {
            Ok(s) => {
                debug!(
                    "Relay: ison={} (source={}, timer={})",
                    s.ison,
                    s.source.as_deref().unwrap_or("-"),
                    s.has_timer
                );
                Ok(s.ison)
            }
            Err(e) => {
                warn!("Relay: status query failed: {}", e);
                Err(e)
            }
        }
    }
}

fn parse_status(body: &str) -> Result<RelayStatus, RelayError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| RelayError::Json(e.to_string()))
}

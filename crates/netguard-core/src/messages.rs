//! Control commands and notifications exchanged with the control surface.
//!
//! Both directions are JSON objects. Commands are tagged by `"command"`,
//! notifications by `"event"`:
//!
//! ```text
//! → {"command":"toggle-server","running":true,"port":8080}
//! → {"command":"update-allowlist","ips":["10.0.0.5"]}
//! → {"command":"status"}
//! ← {"event":"log-entry","type":"success","message":"Connection from 10.0.0.5"}
//! ← {"event":"server-status","running":false}
//! ← {"event":"server-error","message":"failed to bind 0.0.0.0:8080: ..."}
//! ```

use crate::address::UNKNOWN_PEER;
use crate::error::NetguardResult;
use serde::{Deserialize, Serialize};

/// Port used when a start command does not name one.
pub const DEFAULT_PORT: u16 = 8080;

/// Outcome of the allowlist check for one connection.
///
/// Serialized as the `type` of a `log-entry` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "success")]
    Allowed,
    #[serde(rename = "blocked")]
    Blocked,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Immutable record of one access-control decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionEvent {
    pub decision: Decision,
    /// Normalized peer address, or [`UNKNOWN_PEER`].
    pub address: String,
    pub message: String,
}

impl DecisionEvent {
    /// Build the event for `address` (`None` when the peer could not be determined).
    pub fn new(decision: Decision, address: Option<&str>) -> Self {
        let address = address.unwrap_or(UNKNOWN_PEER).to_string();
        let message = format!("Connection from {address}");
        Self {
            decision,
            address,
            message,
        }
    }
}

/// Event published by the gateway on its broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// An inbound connection was allowed or blocked.
    Decision(DecisionEvent),
    /// Listener lifecycle change. Only published on stop.
    Status { running: bool },
    /// A start attempt or a single request failed.
    Fault { message: String },
}

/// Notification as delivered to the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    LogEntry {
        #[serde(rename = "type")]
        kind: Decision,
        message: String,
    },
    ServerStatus {
        running: bool,
    },
    ServerError {
        message: String,
    },
}

impl From<GatewayEvent> for Notification {
    fn from(event: GatewayEvent) -> Self {
        match event {
            GatewayEvent::Decision(d) => Notification::LogEntry {
                kind: d.decision,
                message: d.message,
            },
            GatewayEvent::Status { running } => Notification::ServerStatus { running },
            GatewayEvent::Fault { message } => Notification::ServerError { message },
        }
    }
}

impl Notification {
    /// Render as a single JSON line (no trailing newline).
    pub fn to_json(&self) -> NetguardResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Command issued by the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum ControlCommand {
    /// `running = true` starts the listener, `false` stops it.
    ToggleServer {
        running: bool,
        /// Falls back to [`DEFAULT_PORT`] when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    /// Replace the allowlist wholesale.
    UpdateAllowlist { ips: Vec<String> },
    /// Ask for a `server-status` notification.
    Status,
}

impl ControlCommand {
    /// Parse one JSON command.
    pub fn from_json(line: &str) -> NetguardResult<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

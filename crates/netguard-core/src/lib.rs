//! netguard-core: shared types for the NetGuard access-control gateway.
//!
//! Provides the error type, peer address normalization, and the JSON
//! command/notification vocabulary spoken between the gateway and whatever
//! control surface drives it.

pub mod address;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use address::{normalize_peer, LOOPBACK_V4, LOOPBACK_V6, UNKNOWN_PEER};
pub use error::{NetguardError, NetguardResult};
pub use messages::{ControlCommand, Decision, DecisionEvent, GatewayEvent, Notification, DEFAULT_PORT};

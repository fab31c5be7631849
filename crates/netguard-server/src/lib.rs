//! netguard-server: the NetGuard gateway and its control surface bridge.
//!
//! Front ends embed [`gateway::Gateway`] directly, or drive it through
//! [`control::Controller`] with the JSON command vocabulary from
//! `netguard-core`. The `netguard` binary wires the controller to stdio.

pub mod config;
pub mod control;
pub mod gateway;

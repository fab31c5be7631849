//! Gateway module — the HTTP listener that admits or blocks peers by address.
//!
//! # Submodule Architecture
//!
//! - **[`allowlist`]** — The [`Allowlist`] of normalized peer addresses.
//!   Copy-on-write so every check runs against one consistent snapshot;
//!   loopback entries can never be removed.
//!
//! - **[`page`]** — [`PageSource`], the content served to allowed peers.
//!
//! - **[`handler`]** — [`RequestHandler`] turns a peer address into a
//!   [`Verdict`] and a verdict into a `200`/`403`/`500` response, publishing
//!   a decision event on the way.
//!
//! - **[`listener`]** — [`Gateway`] owns the `Stopped`/`Running` state,
//!   binds the TCP listener, and runs the accept loop.
//!
//! # Data Flow
//!
//! ```text
//! accept (listener.rs)
//!   → RequestHandler::decide         normalize + allowlist snapshot
//!   → hyper http1 connection         one request, keep-alive off
//!       → RequestHandler::respond    publish Decision, build response
//!           → PageSource::load       (allowed only)
//! ```

pub mod allowlist;
pub mod handler;
pub mod listener;
pub mod page;

pub use allowlist::Allowlist;
pub use handler::{RequestHandler, Verdict, DENIED_BODY};
pub use listener::{Gateway, ListenerStatus, StartOutcome, StopOutcome};
pub use page::PageSource;

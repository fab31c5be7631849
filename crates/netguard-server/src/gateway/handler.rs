//! Per-connection access decision and HTTP response.
//!
//! The verdict is taken when a connection is accepted, against the allowlist
//! snapshot of that moment. The matching response is produced when the
//! request arrives; method and path play no part in the decision.

use super::allowlist::Allowlist;
use super::page::PageSource;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use netguard_core::{normalize_peer, Decision, DecisionEvent, GatewayEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Body returned to blocked peers.
pub const DENIED_BODY: &str = "Access Denied: NetGuard Firewall Blocked Connection.";

pub type GatewayResponse = Response<Full<Bytes>>;

/// Decision for a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    /// Normalized peer address; `None` when it could not be determined.
    pub address: Option<String>,
}

impl Verdict {
    pub fn event(&self) -> DecisionEvent {
        DecisionEvent::new(self.decision, self.address.as_deref())
    }
}

/// Decides and answers requests. Shared by every connection task.
pub struct RequestHandler {
    allowlist: Arc<Allowlist>,
    page: PageSource,
    events: broadcast::Sender<GatewayEvent>,
}

impl RequestHandler {
    /// Create a handler.
    ///
    /// # Arguments
    ///
    /// * `allowlist` - Shared allowlist; updates made through it apply to the
    ///   next decision.
    /// * `page` - Content returned with a 200 to allowed peers.
    /// * `events` - Channel that receives one decision event per answered
    ///   request, plus content faults.
    pub fn new(
        allowlist: Arc<Allowlist>,
        page: PageSource,
        events: broadcast::Sender<GatewayEvent>,
    ) -> Self {
        Self {
            allowlist,
            page,
            events,
        }
    }

    /// Normalize `raw_peer` and check it against the current allowlist.
    pub fn decide(&self, raw_peer: Option<&str>) -> Verdict {
        let address = raw_peer.and_then(normalize_peer);
        let allowed = address.is_some_and(|a| self.allowlist.snapshot().contains(a));
        debug!(
            raw = raw_peer.unwrap_or_default(),
            normalized = address.unwrap_or_default(),
            allowed,
            "peer checked"
        );
        Verdict {
            decision: if allowed {
                Decision::Allowed
            } else {
                Decision::Blocked
            },
            address: address.map(str::to_string),
        }
    }

    /// Publish the decision event and build the response for `verdict`.
    pub async fn respond(&self, verdict: &Verdict) -> GatewayResponse {
        self.publish(GatewayEvent::Decision(verdict.event()));

        match verdict.decision {
            Decision::Allowed => match self.page.load().await {
                Ok(content) => {
                    debug!(bytes = content.len(), "page served");
                    build_response(StatusCode::OK, "text/html", content)
                }
                Err(e) => {
                    warn!(error = %e, "failed to read page content");
                    self.publish(GatewayEvent::Fault {
                        message: e.to_string(),
                    });
                    build_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        format!("Server Error: {e}"),
                    )
                }
            },
            Decision::Blocked => {
                debug!(
                    peer = verdict.address.as_deref().unwrap_or_default(),
                    "access denied"
                );
                build_response(StatusCode::FORBIDDEN, "text/plain", DENIED_BODY)
            }
        }
    }

    /// Decide and respond in one step.
    pub async fn handle_connection(&self, raw_peer: Option<&str>) -> GatewayResponse {
        let verdict = self.decide(raw_peer);
        self.respond(&verdict).await
    }

    fn publish(&self, event: GatewayEvent) {
        // No subscriber is fine: events are fire-and-forget.
        let _ = self.events.send(event);
    }
}

fn build_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> GatewayResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

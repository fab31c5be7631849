//! Gateway listener lifecycle.
//!
//! [`Gateway`] owns at most one HTTP listener. `start` binds `0.0.0.0:port`
//! and spawns an accept loop; `stop` signals that loop, which stops accepting
//! and waits for in-flight connections to finish before `stop` returns.
//! The state lock is only held until the port is released, so status queries
//! answer while connections drain.
//!
//! Each accepted connection gets its own task and serves exactly one request.

use super::allowlist::Allowlist;
use super::handler::{GatewayResponse, RequestHandler};
use super::page::PageSource;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use netguard_core::{GatewayEvent, NetguardError, NetguardResult};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the event broadcast channel. Slow subscribers lag rather than
/// block connection handling.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Address the listener binds on.
const BIND_HOST: &str = "0.0.0.0";

/// A client must finish its request head within this window. Bounds how long
/// a half-sent request can hold up `stop`.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Externally visible listener state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Stopped,
    Running(u16),
}

/// Result of a `start` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { port: u16 },
    /// A listener was already up; nothing changed.
    AlreadyRunning { port: u16 },
}

/// Result of a `stop` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// Nothing was running; nothing changed.
    NotRunning,
}

enum ListenerState {
    Stopped,
    Running(RunningListener),
}

/// Bookkeeping for the active listener.
struct RunningListener {
    /// The port the OS actually bound.
    port: u16,
    /// Sending (or dropping) tells the accept loop to shut down.
    cancel_tx: mpsc::Sender<()>,
    /// Fires once the accept loop has dropped its `TcpListener`.
    released_rx: oneshot::Receiver<()>,
    /// Accept loop task; finishes once all connections have drained.
    task: JoinHandle<()>,
}

/// The access-control gateway.
pub struct Gateway {
    allowlist: Arc<Allowlist>,
    handler: Arc<RequestHandler>,
    events: broadcast::Sender<GatewayEvent>,
    state: Mutex<ListenerState>,
}

impl Gateway {
    /// Create a stopped gateway around an injected allowlist and page source.
    ///
    /// # Arguments
    ///
    /// * `allowlist` - Initial set of permitted peer addresses. Loopback
    ///   entries are already forced in by [`Allowlist`].
    /// * `page` - Content served to allowed peers.
    pub fn new(allowlist: Allowlist, page: PageSource) -> Self {
        let allowlist = Arc::new(allowlist);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let handler = Arc::new(RequestHandler::new(
            allowlist.clone(),
            page,
            events.clone(),
        ));
        Self {
            allowlist,
            handler,
            events,
            state: Mutex::new(ListenerState::Stopped),
        }
    }

    /// Subscribe to decision, status and fault events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    pub async fn status(&self) -> ListenerStatus {
        match &*self.state.lock().await {
            ListenerState::Stopped => ListenerStatus::Stopped,
            ListenerState::Running(running) => ListenerStatus::Running(running.port),
        }
    }

    /// Bind `0.0.0.0:port` and start accepting.
    ///
    /// A second call while running is a no-op and returns
    /// [`StartOutcome::AlreadyRunning`]. No status event is published on
    /// start.
    ///
    /// # Arguments
    ///
    /// * `port` - TCP port to bind. Use `0` for an OS-assigned port; the
    ///   port actually bound is reported in [`StartOutcome::Started`].
    ///
    /// # Errors
    ///
    /// Returns [`NetguardError::Bind`] if the address cannot be bound. A
    /// fault event is published and the gateway stays stopped.
    pub async fn start(&self, port: u16) -> NetguardResult<StartOutcome> {
        let mut state = self.state.lock().await;
        if let ListenerState::Running(running) = &*state {
            info!(port = running.port, "server already running");
            return Ok(StartOutcome::AlreadyRunning { port: running.port });
        }

        let addr = format!("{BIND_HOST}:{port}");
        let tcp_listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(source) => {
                let err = NetguardError::Bind { addr, source };
                warn!(error = %err, "listener bind failed");
                self.publish(GatewayEvent::Fault {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };
        let actual_port = tcp_listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(port);

        let (cancel_tx, cancel_rx) = mpsc::channel::<()>(1);
        let (released_tx, released_rx) = oneshot::channel::<()>();
        let handler = self.handler.clone();
        let task = tokio::spawn(async move {
            accept_loop(tcp_listener, cancel_rx, released_tx, handler).await;
            debug!(port = actual_port, "accept loop ended");
        });

        info!(
            addr = %addr,
            port = actual_port,
            allowed = ?self.allowlist.entries(),
            "server started"
        );

        *state = ListenerState::Running(RunningListener {
            port: actual_port,
            cancel_tx,
            released_rx,
            task,
        });
        Ok(StartOutcome::Started { port: actual_port })
    }

    /// Stop accepting, let in-flight responses finish, then publish
    /// `Status { running: false }`. No-op when not running.
    ///
    /// The state lock is held until the listening socket is closed, so a
    /// following `start` can rebind the same port. Draining happens after the
    /// lock is released.
    pub async fn stop(&self) -> StopOutcome {
        let (port, task) = {
            let mut state = self.state.lock().await;
            let running = match std::mem::replace(&mut *state, ListenerState::Stopped) {
                ListenerState::Running(running) => running,
                ListenerState::Stopped => {
                    debug!("stop requested but server not running");
                    return StopOutcome::NotRunning;
                }
            };
            let _ = running.cancel_tx.send(()).await;
            let _ = running.released_rx.await;
            (running.port, running.task)
        };

        if let Err(e) = task.await {
            warn!(error = %e, "accept loop task failed");
        }

        info!(port, "server stopped");
        self.publish(GatewayEvent::Status { running: false });
        StopOutcome::Stopped
    }

    /// Replace the allowlist wholesale.
    ///
    /// Takes effect for every connection accepted afterwards; connections
    /// already accepted keep the verdict they were given.
    ///
    /// # Arguments
    ///
    /// * `ips` - New entries. Normalized like peer addresses; blank entries
    ///   are dropped and loopback addresses are always re-added.
    pub fn update_allowlist<I, S>(&self, ips: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowlist.replace(ips);
        info!(allowed = ?self.allowlist.entries(), "allowlist updated");
    }

    /// Evaluate a connection from `raw_peer` without going through a socket.
    pub async fn handle_connection(&self, raw_peer: Option<&str>) -> GatewayResponse {
        self.handler.handle_connection(raw_peer).await
    }

    /// Publish the current running state as a status event.
    pub async fn report_status(&self) {
        let running = matches!(self.status().await, ListenerStatus::Running(_));
        self.publish(GatewayEvent::Status { running });
    }

    /// Publish a fault event on behalf of the control surface.
    pub fn report_fault(&self, message: impl Into<String>) {
        self.publish(GatewayEvent::Fault {
            message: message.into(),
        });
    }

    fn publish(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }
}

/// Accept connections until cancelled, then drain in-flight ones.
async fn accept_loop(
    listener: TcpListener,
    mut cancel_rx: mpsc::Receiver<()>,
    released_tx: oneshot::Sender<()>,
    handler: Arc<RequestHandler>,
) {
    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            _ = cancel_rx.recv() => {
                debug!("accept loop cancelled");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let raw_peer = peer_addr.ip().to_string();
                        let verdict = handler.decide(Some(&raw_peer));
                        let handler = handler.clone();

                        let service = service_fn(move |req: Request<Incoming>| {
                            let handler = handler.clone();
                            let verdict = verdict.clone();
                            async move {
                                debug!(method = %req.method(), uri = %req.uri(), "request received");
                                Ok::<_, Infallible>(handler.respond(&verdict).await)
                            }
                        });

                        let conn = http1::Builder::new()
                            .timer(TokioTimer::new())
                            .header_read_timeout(HEADER_READ_TIMEOUT)
                            .keep_alive(false)
                            .serve_connection(TokioIo::new(stream), service);
                        let conn = graceful.watch(conn);

                        tokio::spawn(async move {
                            if let Err(e) = conn.await {
                                debug!(peer = %peer_addr, error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }

    // Release the port before waiting on stragglers.
    drop(listener);
    let _ = released_tx.send(());
    graceful.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;
    use netguard_core::Decision;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const PAGE: &str = "<html><body>inside the wall</body></html>";

    fn gateway(ips: &[&str]) -> Gateway {
        Gateway::new(
            Allowlist::new(ips.iter().copied()),
            PageSource::Inline(PAGE.to_string()),
        )
    }

    async fn started_port(gw: &Gateway) -> u16 {
        match gw.start(0).await.unwrap() {
            StartOutcome::Started { port } => port,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    /// Send a bare HTTP/1.1 request over loopback and return the raw response.
    async fn http_get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_serves_page_to_loopback() {
        let gw = gateway(&[]);
        let mut events = gw.subscribe();
        let port = started_port(&gw).await;

        let response = http_get(port, "/").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.to_ascii_lowercase().contains("content-type: text/html"));
        assert!(response.ends_with(PAGE));

        match events.recv().await.unwrap() {
            GatewayEvent::Decision(ev) => {
                assert_eq!(ev.decision, Decision::Allowed);
                assert_eq!(ev.message, "Connection from 127.0.0.1");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_path_and_method_ignored() {
        let gw = gateway(&[]);
        let port = started_port(&gw).await;

        let response = http_get(port, "/admin/../anything?x=1").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"DELETE /x HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert!(String::from_utf8(buf).unwrap().starts_with("HTTP/1.1 200 OK"));

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_loopback_survives_empty_update() {
        let gw = gateway(&["10.0.0.5"]);
        let port = started_port(&gw).await;
        gw.update_allowlist(Vec::<String>::new());

        let response = http_get(port, "/").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        gw.stop().await;
    }

    #[tokio::test]
    async fn test_end_to_end_allowlist_scenario() {
        let gw = gateway(&["10.0.0.5"]);
        let port = started_port(&gw).await;

        let ok = gw.handle_connection(Some("10.0.0.5")).await;
        assert_eq!(ok.status(), StatusCode::OK);

        let denied = gw.handle_connection(Some("10.0.0.6")).await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let mapped = gw.handle_connection(Some("::ffff:10.0.0.5")).await;
        assert_eq!(mapped.status(), StatusCode::OK);

        gw.update_allowlist(["10.0.0.9"]);
        let now_denied = gw.handle_connection(Some("10.0.0.5")).await;
        assert_eq!(now_denied.status(), StatusCode::FORBIDDEN);

        // The running listener applies the same list: loopback survives the
        // update and still gets the page over a real socket.
        let response = http_get(port, "/").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with(PAGE));

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_status_answers_while_half_sent_request_drains() {
        let gw = Arc::new(gateway(&[]));
        let port = started_port(&gw).await;

        // Request head never completed.
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopper = {
            let gw = gw.clone();
            tokio::spawn(async move { gw.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = tokio::time::timeout(Duration::from_millis(500), gw.status())
            .await
            .expect("status blocked behind stop");
        assert_eq!(status, ListenerStatus::Stopped);

        // The port is free again while the straggler drains.
        let again = tokio::time::timeout(Duration::from_millis(500), gw.start(port))
            .await
            .expect("start blocked behind stop")
            .unwrap();
        assert_eq!(again, StartOutcome::Started { port });

        let stopped = tokio::time::timeout(HEADER_READ_TIMEOUT * 2, stopper)
            .await
            .expect("header read timeout did not end the drain")
            .unwrap();
        assert_eq!(stopped, StopOutcome::Stopped);
        drop(stream);
        gw.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let gw = gateway(&[]);
        let port = started_port(&gw).await;

        let second = gw.start(0).await.unwrap();
        assert_eq!(second, StartOutcome::AlreadyRunning { port });
        assert_eq!(gw.status().await, ListenerStatus::Running(port));

        // First listener still answers.
        assert!(http_get(port, "/").await.starts_with("HTTP/1.1 200 OK"));
        gw.stop().await;
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let gw = gateway(&[]);
        let mut events = gw.subscribe();
        assert_eq!(gw.stop().await, StopOutcome::NotRunning);
        assert_eq!(gw.status().await, ListenerStatus::Stopped);
        assert!(events.try_recv().is_err(), "no event expected");
    }

    #[tokio::test]
    async fn test_stop_publishes_status_and_releases_port() {
        let gw = gateway(&[]);
        let mut events = gw.subscribe();
        let port = started_port(&gw).await;

        // Start publishes nothing.
        assert!(events.try_recv().is_err());

        assert_eq!(gw.stop().await, StopOutcome::Stopped);
        assert_eq!(
            events.recv().await.unwrap(),
            GatewayEvent::Status { running: false }
        );
        assert_eq!(gw.status().await, ListenerStatus::Stopped);
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

        // And can be started again.
        let again = started_port(&gw).await;
        assert!(http_get(again, "/").await.starts_with("HTTP/1.1 200 OK"));
        gw.stop().await;
    }

    #[tokio::test]
    async fn test_stop_lets_accepted_request_finish() {
        let gw = Arc::new(gateway(&[]));
        let port = started_port(&gw).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let stopper = {
            let gw = gw.clone();
            tokio::spawn(async move { gw.stop().await })
        };

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert!(String::from_utf8(buf).unwrap().starts_with("HTTP/1.1 200 OK"));
        assert_eq!(stopper.await.unwrap(), StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_bind_failure_reported() {
        let occupied = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let gw = gateway(&[]);
        let mut events = gw.subscribe();
        let err = gw.start(port).await.unwrap_err();
        assert!(matches!(err, NetguardError::Bind { .. }));
        assert_eq!(gw.status().await, ListenerStatus::Stopped);
        assert!(matches!(
            events.recv().await.unwrap(),
            GatewayEvent::Fault { .. }
        ));
    }

    #[tokio::test]
    async fn test_report_status() {
        let gw = gateway(&[]);
        let mut events = gw.subscribe();
        let _port = started_port(&gw).await;
        gw.report_status().await;
        assert_eq!(
            events.recv().await.unwrap(),
            GatewayEvent::Status { running: true }
        );
        gw.stop().await;
    }
}

//! Control surface bridge.
//!
//! [`Controller`] turns [`ControlCommand`]s into gateway calls.
//! [`serve_lines`] speaks the command/notification vocabulary as
//! newline-delimited JSON: commands in, notifications out. The binary wires
//! it to stdin/stdout so any front end can drive the gateway.

use crate::gateway::{Gateway, StartOutcome, StopOutcome};
use netguard_core::{ControlCommand, GatewayEvent, NetguardResult, Notification};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

/// Dispatches control commands to a shared [`Gateway`].
pub struct Controller {
    gateway: Arc<Gateway>,
    /// Port used when `toggle-server` omits one.
    default_port: u16,
}

impl Controller {
    pub fn new(gateway: Arc<Gateway>, default_port: u16) -> Self {
        Self {
            gateway,
            default_port,
        }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Execute one command. Failures are logged and already published as
    /// fault events by the gateway; nothing here is fatal.
    pub async fn dispatch(&self, command: ControlCommand) {
        match command {
            ControlCommand::ToggleServer {
                running: true,
                port,
            } => {
                let port = port.unwrap_or(self.default_port);
                match self.gateway.start(port).await {
                    Ok(StartOutcome::Started { port }) => debug!(port, "start command done"),
                    Ok(StartOutcome::AlreadyRunning { port }) => {
                        debug!(port, "start command ignored, already running")
                    }
                    Err(e) => warn!(error = %e, "start command failed"),
                }
            }
            ControlCommand::ToggleServer { running: false, .. } => {
                if self.gateway.stop().await == StopOutcome::NotRunning {
                    debug!("stop command ignored, not running");
                }
            }
            ControlCommand::UpdateAllowlist { ips } => {
                self.gateway.update_allowlist(ips);
            }
            ControlCommand::Status => {
                self.gateway.report_status().await;
            }
        }
    }

    /// Parse and execute one JSON line. Blank lines are skipped; malformed
    /// ones are reported as a fault.
    pub async fn dispatch_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match ControlCommand::from_json(line) {
            Ok(command) => {
                debug!(?command, "control command");
                self.dispatch(command).await;
            }
            Err(e) => {
                warn!(error = %e, "rejected control line");
                self.gateway.report_fault(e.to_string());
            }
        }
    }

    /// Stop the gateway if it is running.
    pub async fn shutdown(&self) {
        self.gateway.stop().await;
    }
}

/// Run the JSON-lines bridge until `input` reaches EOF or `shutdown`
/// completes.
///
/// Every gateway event becomes one line on `output`. Either way out, the
/// gateway is stopped and any events still queued (including the final
/// `server-status`) are flushed before returning.
///
/// # Arguments
///
/// * `controller` - Executes parsed commands.
/// * `input` - Command source, one JSON object per line.
/// * `output` - Notification sink, one JSON object per line.
/// * `shutdown` - Resolves when the bridge should stop, e.g. on a signal.
///   Pass `std::future::pending()` to run until EOF.
pub async fn serve_lines<R, W, S>(
    controller: &Controller,
    input: R,
    mut output: W,
    shutdown: S,
) -> NetguardResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut events = controller.gateway().subscribe();
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => controller.dispatch_line(&line).await,
                    None => {
                        info!("control input closed");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => write_event(&mut output, event).await?,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification consumer lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    controller.shutdown().await;

    loop {
        match events.try_recv() {
            Ok(event) => write_event(&mut output, event).await?,
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "notification consumer lagged");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    output.flush().await?;
    Ok(())
}

async fn write_event<W>(output: &mut W, event: GatewayEvent) -> NetguardResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = Notification::from(event).to_json()?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

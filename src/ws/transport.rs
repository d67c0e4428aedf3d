//! Relay transport - WebSocket client to the message relay

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::util::rate_limit::InboundRateLimiter;
use crate::ws::protocol::{GameMessage, MessageType};

/// How long a closing link may take to flush queued frames before it is aborted
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Callback surface of the transport, delivered in order to the session loop
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { error: Option<String> },
    Message(GameMessage),
}

/// Transport collaborator; sends are fire-and-forget
pub trait Transport: Send + Sync {
    fn connect(&self);
    fn disconnect(&self);
    fn send(&self, message: GameMessage);
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Relay closed the connection")]
    Closed,
}

struct Link {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
    /// Set once the WebSocket handshake has completed
    open: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// WebSocket transport to the relay
pub struct WsTransport {
    url: String,
    inbound_rate_limit: u32,
    events: mpsc::Sender<TransportEvent>,
    link: Mutex<Option<Link>>,
    next_link_id: AtomicU64,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, inbound_rate_limit: u32, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            url: url.into(),
            inbound_rate_limit,
            events,
            link: Mutex::new(None),
            next_link_id: AtomicU64::new(1),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link
            .lock()
            .as_ref()
            .is_some_and(|link| !link.task.is_finished())
    }
}

impl Transport for WsTransport {
    fn connect(&self) {
        let mut slot = self.link.lock();
        if slot.as_ref().is_some_and(|link| !link.task.is_finished()) {
            debug!("Relay link already open");
            return;
        }

        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_link(
            id,
            self.url.clone(),
            InboundRateLimiter::new(self.inbound_rate_limit),
            outbound_rx,
            self.events.clone(),
            open.clone(),
        ));

        *slot = Some(Link {
            id,
            outbound: outbound_tx,
            open,
            task,
        });
    }

    /// An open link flushes the frames already queued (e.g. `leave`) and sends a
    /// close frame; a link still handshaking is aborted outright.
    fn disconnect(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };
        let Link {
            id,
            outbound,
            open,
            mut task,
        } = link;

        if !open.load(Ordering::Acquire) {
            info!(link_id = id, "Aborting relay link before open");
            task.abort();
            return;
        }

        info!(link_id = id, "Closing relay link");
        // a closed queue makes the pump drain it, then close the socket
        drop(outbound);
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut task => {}
                _ = tokio::time::sleep(CLOSE_GRACE) => {
                    warn!(link_id = id, "Relay link did not close in time, aborting");
                    task.abort();
                }
            }
        });
    }

    fn send(&self, message: GameMessage) {
        let json = match message.encode() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to encode outbound message");
                return;
            }
        };

        match self.link.lock().as_ref() {
            Some(link) if link.outbound.send(json).is_ok() => {}
            _ => warn!(kind = ?message.kind(), "Relay not connected, dropping message"),
        }
    }
}

/// One connection lifetime: connect, pump frames both ways, report the end.
/// A close we asked for is not reported.
async fn run_link(
    id: u64,
    url: String,
    limiter: InboundRateLimiter,
    outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
) {
    match pump(id, &url, &limiter, outbound, &events, &open).await {
        Ok(()) => info!(link_id = id, "Relay link closed"),
        Err(e) => {
            warn!(link_id = id, error = %e, "Relay link lost");
            let _ = events
                .send(TransportEvent::Disconnected {
                    error: Some(e.to_string()),
                })
                .await;
        }
    }
}

/// Presence traffic is shed under load; game outcomes never are
fn is_rate_limited(kind: MessageType) -> bool {
    matches!(kind, MessageType::Announce | MessageType::Join)
}

async fn pump(
    id: u64,
    url: &str,
    limiter: &InboundRateLimiter,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: &mpsc::Sender<TransportEvent>,
    open: &AtomicBool,
) -> Result<(), TransportError> {
    info!(link_id = id, url = %url, "Connecting to relay");
    let (ws_stream, _) = connect_async(url).await?;
    open.store(true, Ordering::Release);
    info!(link_id = id, "Relay connected");

    if events.send(TransportEvent::Connected).await.is_err() {
        return Ok(());
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(json) => write.send(Message::Text(json)).await?,
                    None => {
                        let _ = write.close().await;
                        return Ok(());
                    }
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let msg = match GameMessage::decode(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(link_id = id, error = %e, "Dropping relay message");
                                continue;
                            }
                        };

                        if is_rate_limited(msg.kind()) && !limiter.check() {
                            warn!(link_id = id, kind = ?msg.kind(), "Rate limited inbound message");
                            continue;
                        }

                        if events.send(TransportEvent::Message(msg)).await.is_err() {
                            debug!(link_id = id, "Session loop gone");
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(link_id = id, "Received binary message, ignoring");
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

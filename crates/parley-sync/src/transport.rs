use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use parley_types::{ClientCommand, ServerEvent};

use crate::error::SyncError;

/// What the transport reports to the session, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established; the handshake may be sent now
    Connected,
    /// Could not establish the connection
    ConnectFailed(String),
    Event(ServerEvent),
    /// An established connection went away
    Disconnected { reason: String },
}

/// One live connection attempt: a command sink and an event source.
/// Dropping the link closes the connection.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<ClientCommand>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientCommand>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    pub fn send(&self, cmd: ClientCommand) -> Result<(), SyncError> {
        self.outbound
            .send(cmd)
            .map_err(|_| SyncError::Connection("transport task has stopped".into()))
    }

    /// Next transport event. A vanished transport task reads as a disconnect.
    pub async fn recv(&mut self) -> TransportEvent {
        match self.inbound.recv().await {
            Some(event) => event,
            None => TransportEvent::Disconnected {
                reason: "transport task has stopped".into(),
            },
        }
    }
}

/// Opens links. The session calls this once per `connect`.
pub trait Connector {
    fn connect(&self) -> Link;
}

/// WebSocket connector. Each link is served by its own task that relays
/// JSON text frames and keeps the connection alive with pings.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    heartbeat: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, heartbeat: Duration) -> Self {
        Self {
            url: url.into(),
            heartbeat,
        }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> Link {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(self.url.clone(), self.heartbeat, out_rx, in_tx));
        Link::new(out_tx, in_rx)
    }
}

async fn run_socket(
    url: String,
    heartbeat_every: Duration,
    mut out_rx: mpsc::UnboundedReceiver<ClientCommand>,
    in_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let conn_id = Uuid::new_v4();

    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!(%conn_id, "connect to {} failed: {}", url, e);
            let _ = in_tx.send(TransportEvent::ConnectFailed(e.to_string()));
            return;
        }
    };

    info!(%conn_id, "connected to gateway {}", url);
    if in_tx.send(TransportEvent::Connected).is_err() {
        return;
    }

    let (mut sink, mut stream) = ws.split();

    let mut heartbeat = tokio::time::interval(heartbeat_every);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    let reason = loop {
        tokio::select! {
            cmd = out_rx.recv() => {
                let Some(cmd) = cmd else {
                    let _ = sink.send(Message::Close(None)).await;
                    break "closed by client".to_string();
                };
                let text = match cmd.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(%conn_id, "dropping unencodable {}: {}", cmd.name(), e);
                        continue;
                    }
                };
                trace!(%conn_id, "-> {}", cmd.name());
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    break format!("send failed: {e}");
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            trace!(%conn_id, "<- {}", event.name());
                            if in_tx.send(TransportEvent::Event(event)).is_err() {
                                break "session dropped".to_string();
                            }
                        }
                        Err(e) => {
                            let raw: String = text.as_str().chars().take(200).collect();
                            warn!(%conn_id, "bad event: {} -- raw: {}", e, raw);
                        }
                    },
                    Some(Ok(Message::Pong(_))) => pong_received = true,
                    Some(Ok(Message::Close(_))) => break "closed by server".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            }
            _ = heartbeat.tick() => {
                if pong_received {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!(%conn_id, "heartbeat timeout (missed {} pongs)", missed_heartbeats);
                        break "heartbeat timeout".to_string();
                    }
                }
                pong_received = false;
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break "ping failed".to_string();
                }
            }
        }
    };

    debug!(%conn_id, "gateway connection ended: {}", reason);
    let _ = in_tx.send(TransportEvent::Disconnected { reason });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_reports_vanished_task_as_disconnect() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let mut link = Link::new(out_tx, in_rx);

        in_tx.send(TransportEvent::Connected).unwrap();
        drop(in_tx);

        assert_eq!(link.recv().await, TransportEvent::Connected);
        assert!(matches!(link.recv().await, TransportEvent::Disconnected { .. }));
    }

    #[tokio::test]
    async fn send_after_task_exit_is_a_connection_error() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let link = Link::new(out_tx, in_rx);
        drop(out_rx);

        let err = link.send(ClientCommand::Setup("u1".into())).unwrap_err();
        assert!(matches!(err, SyncError::Connection(_)));
    }

    #[tokio::test]
    async fn unreachable_gateway_reports_connect_failure() {
        // nothing listens on port 9 on localhost
        let connector = WsConnector::new("ws://127.0.0.1:9/gateway", Duration::from_secs(15));
        let mut link = connector.connect();
        assert!(matches!(link.recv().await, TransportEvent::ConnectFailed(_)));
    }
}

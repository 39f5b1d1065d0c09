//! Session Worker
//!
//! One worker per client link: waits for CONNECT, then handles the
//! client's packets, retransmits unacknowledged deliveries and enforces
//! keep-alive until the session is torn down.

mod connect;
mod publish;
mod qos;
mod subscribe;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

use super::Context;
use crate::protocol::{Disconnect, Packet, ProtocolError, ReasonCode};
use crate::session::{DisconnectKind, Session};
use crate::transport::ClientLink;

/// Time allowed between accepting a link and receiving CONNECT
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection error types
#[derive(Debug)]
pub enum ConnectionError {
    /// Protocol violation by the client
    Protocol(ProtocolError),
    /// CONNECT refused with this reason code
    Refused(ReasonCode),
    /// The adapter dropped its side of the link
    ChannelClosed,
    /// No CONNECT in time, or keep-alive expired
    Timeout,
    /// Client sent DISCONNECT
    Disconnected,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Protocol(e) => write!(f, "Protocol error: {}", e),
            ConnectionError::Refused(code) => write!(f, "Connection refused: {}", code),
            ConnectionError::ChannelClosed => write!(f, "Channel closed"),
            ConnectionError::Timeout => write!(f, "Connection timeout"),
            ConnectionError::Disconnected => write!(f, "Client disconnected"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<ProtocolError> for ConnectionError {
    fn from(e: ProtocolError) -> Self {
        ConnectionError::Protocol(e)
    }
}

/// Connection handler
pub(crate) struct Connection {
    incoming: mpsc::Receiver<Packet>,
    outgoing: mpsc::Sender<Packet>,
    ctx: Arc<Context>,
    /// Username from CONNECT (for publish/subscribe checks)
    username: Option<String>,
}

impl Connection {
    pub(crate) fn new(link: ClientLink, ctx: Arc<Context>) -> Self {
        Self {
            incoming: link.incoming,
            outgoing: link.outgoing,
            ctx,
            username: None,
        }
    }

    /// Run the connection until its session ends
    pub(crate) async fn run(
        mut self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ConnectionError> {
        let first = tokio::select! {
            result = timeout(CONNECT_TIMEOUT, self.incoming.recv()) => result,
            _ = shutdown.recv() => return Ok(()),
        };

        let connect = match first {
            Ok(Some(Packet::Connect(connect))) => *connect,
            Ok(Some(packet)) => {
                debug!("First packet was {} instead of CONNECT", packet.name());
                return Err(ProtocolError::ExpectedConnect.into());
            }
            Ok(None) => return Err(ConnectionError::ChannelClosed),
            Err(_) => {
                debug!("Connect timeout");
                return Err(ConnectionError::Timeout);
            }
        };

        let session = self.handle_connect(connect).await?;
        self.run_connected(&session, &mut shutdown).await
    }

    /// Run the main connection loop
    async fn run_connected(
        &mut self,
        session: &Arc<RwLock<Session>>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ConnectionError> {
        let (client_id, keep_alive_secs, close) = {
            let s = session.read();
            (s.client_id.clone(), s.keep_alive, s.close_signal())
        };

        // 1.5x keep_alive; 0 disables the check
        let keep_alive = (keep_alive_secs > 0)
            .then(|| Duration::from_millis(u64::from(keep_alive_secs) * 1500));
        let mut keep_alive_deadline = keep_alive.map(|d| Instant::now() + d);

        let retry_interval = self.ctx.config.retry_interval.max(Duration::from_millis(1));
        let mut retry_ticker = tokio::time::interval(retry_interval);
        // Skip the first immediate tick
        retry_ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = close.notified() => {
                    // Torn down elsewhere (takeover or broker stop)
                    trace!(client_id = %client_id, "Session closed by broker");
                    return Ok(());
                }

                _ = shutdown.recv() => {
                    self.shut_down(session).await;
                    return Ok(());
                }

                _ = retry_ticker.tick() => {
                    self.retry_unacked(&client_id, session);
                }

                packet = self.incoming.recv() => {
                    let Some(packet) = packet else {
                        debug!(client_id = %client_id, "Link closed");
                        self.ctx.teardown(session, DisconnectKind::Abrupt).await;
                        return Ok(());
                    };

                    if let Some(keep_alive) = keep_alive {
                        keep_alive_deadline = Some(Instant::now() + keep_alive);
                    }

                    // Replies wait for room on the link; teardown and
                    // shutdown must still get through to a stalled client
                    let name = packet.name();
                    let result = tokio::select! {
                        biased;

                        _ = close.notified() => {
                            trace!(
                                client_id = %client_id,
                                "Session closed while handling {}",
                                name
                            );
                            return Ok(());
                        }

                        _ = shutdown.recv() => {
                            self.shut_down(session).await;
                            return Ok(());
                        }

                        result = self.handle_packet(&client_id, session, packet) => result,
                    };

                    match result {
                        Ok(()) => {}
                        Err(ConnectionError::Disconnected) => {
                            self.ctx.teardown(session, DisconnectKind::Clean).await;
                            return Ok(());
                        }
                        Err(e) => {
                            warn!(client_id = %client_id, "Closing session: {}", e);
                            self.ctx.teardown(session, DisconnectKind::Abrupt).await;
                            return Err(e);
                        }
                    }
                }

                _ = async move {
                    match keep_alive_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    info!("Keep alive timeout for {} - disconnecting", client_id);
                    self.notify_disconnect(ReasonCode::KeepAliveTimeout);
                    self.ctx.teardown(session, DisconnectKind::Abrupt).await;
                    return Err(ConnectionError::Timeout);
                }
            }
        }
    }

    /// Tear the session down for a broker stop
    async fn shut_down(&self, session: &Arc<RwLock<Session>>) {
        self.notify_disconnect(ReasonCode::ServerShuttingDown);
        self.ctx.teardown(session, DisconnectKind::Shutdown).await;
    }

    /// Handle an incoming packet
    async fn handle_packet(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        packet: Packet,
    ) -> Result<(), ConnectionError> {
        // Packets still queued behind a takeover belong to a dead incarnation
        if !session.read().is_connected() {
            trace!(
                client_id = %client_id,
                "Dropping {} for a session no longer connected",
                packet.name()
            );
            return Ok(());
        }

        match packet {
            Packet::Connect(_) => Err(ProtocolError::DuplicateConnect.into()),
            Packet::Publish(publish) => self.handle_publish(client_id, session, publish).await,
            Packet::PubAck(puback) => {
                self.handle_puback(client_id, session, puback);
                Ok(())
            }
            Packet::PubRec(pubrec) => self.handle_pubrec(client_id, session, pubrec).await,
            Packet::PubRel(pubrel) => self.handle_pubrel(session, pubrel).await,
            Packet::PubComp(pubcomp) => {
                self.handle_pubcomp(client_id, session, pubcomp);
                Ok(())
            }
            Packet::Subscribe(subscribe) => {
                self.handle_subscribe(client_id, session, subscribe).await
            }
            Packet::Unsubscribe(unsubscribe) => {
                self.handle_unsubscribe(client_id, session, unsubscribe).await
            }
            Packet::PingReq => self.send(Packet::PingResp).await,
            Packet::Disconnect(disconnect) => {
                debug!(
                    "DISCONNECT from {} (reason: {})",
                    client_id, disconnect.reason_code
                );
                Err(ConnectionError::Disconnected)
            }
            Packet::ConnAck(_)
            | Packet::SubAck(_)
            | Packet::UnsubAck(_)
            | Packet::PingResp => Err(ProtocolError::UnexpectedPacket(packet.name()).into()),
        }
    }

    /// Send a packet to the client, waiting for room on the link
    async fn send(&self, packet: Packet) -> Result<(), ConnectionError> {
        self.outgoing
            .send(packet)
            .await
            .map_err(|_| ConnectionError::ChannelClosed)
    }

    /// Best-effort DISCONNECT before the broker closes the link
    fn notify_disconnect(&self, reason_code: ReasonCode) {
        let _ = self
            .outgoing
            .try_send(Packet::Disconnect(Disconnect::new(reason_code)));
    }
}

/// Generate a random ID
pub(crate) fn rand_id() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish()
}

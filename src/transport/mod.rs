//! Transport Layer
//!
//! The broker core exchanges decoded packets with a transport adapter over
//! a pair of bounded channels. The adapter owns sockets, framing and the
//! packet codec; it keeps the [`ClientEnd`] and hands the [`ClientLink`]
//! to [`Broker::accept`](crate::broker::Broker::accept).
//!
//! Dropping the `ClientEnd` (or its sender) is how the adapter reports an
//! abrupt transport closure.

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::protocol::Packet;

/// Broker side of a client connection
#[derive(Debug)]
pub struct ClientLink {
    /// Packets decoded from the client
    pub incoming: mpsc::Receiver<Packet>,
    /// Packets to encode and send to the client
    pub outgoing: mpsc::Sender<Packet>,
}

/// Adapter side of a client connection
#[derive(Debug)]
pub struct ClientEnd {
    tx: mpsc::Sender<Packet>,
    rx: mpsc::Receiver<Packet>,
}

/// Create a connected link pair; each direction holds up to `capacity` packets
pub fn channel_pair(capacity: usize) -> (ClientLink, ClientEnd) {
    let (client_tx, broker_rx) = mpsc::channel(capacity);
    let (broker_tx, client_rx) = mpsc::channel(capacity);

    (
        ClientLink {
            incoming: broker_rx,
            outgoing: broker_tx,
        },
        ClientEnd {
            tx: client_tx,
            rx: client_rx,
        },
    )
}

impl ClientEnd {
    /// Hand a decoded packet to the broker. Returns false once the broker
    /// side has gone away.
    pub async fn send(&self, packet: Packet) -> bool {
        self.tx.send(packet).await.is_ok()
    }

    /// Next packet from the broker; `None` once the broker closed the link
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    /// Next packet from the broker if one is ready
    pub fn try_recv(&mut self) -> Result<Packet, TryRecvError> {
        self.rx.try_recv()
    }

    /// Whether the broker side dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

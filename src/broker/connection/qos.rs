//! QoS acknowledgment handling (PUBACK, PUBREC, PUBREL, PUBCOMP) and retransmission

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};

use super::{Connection, ConnectionError};
use crate::broker::delivery::as_delivered;
use crate::broker::BrokerEvent;
use crate::protocol::{Packet, PubAck, PubComp, PubRec, PubRel, ReasonCode};
use crate::session::Session;

impl Connection {
    /// Handle PUBACK packet
    pub(crate) fn handle_puback(
        &self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        puback: PubAck,
    ) {
        let retired = session.write().handle_puback(puback.packet_id);
        match retired {
            Some(inflight) => self.ctx.delivered(client_id, &inflight),
            None => trace!(
                "Ignoring PUBACK {} from {}: no QoS 1 delivery in flight",
                puback.packet_id,
                client_id
            ),
        }
    }

    /// Handle PUBREC packet
    pub(crate) async fn handle_pubrec(
        &self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        pubrec: PubRec,
    ) -> Result<(), ConnectionError> {
        let release = session.write().handle_pubrec(pubrec.packet_id);
        if !release {
            trace!(
                "Ignoring PUBREC {} from {}: no QoS 2 delivery in flight",
                pubrec.packet_id,
                client_id
            );
            return Ok(());
        }

        self.send(Packet::PubRel(PubRel::new(pubrec.packet_id)))
            .await
    }

    /// Handle PUBREL packet
    pub(crate) async fn handle_pubrel(
        &self,
        session: &Arc<RwLock<Session>>,
        pubrel: PubRel,
    ) -> Result<(), ConnectionError> {
        let released = session.write().release_incoming(pubrel.packet_id);
        let pubcomp = if released {
            PubComp::new(pubrel.packet_id)
        } else {
            PubComp::with_reason(pubrel.packet_id, ReasonCode::PacketIdNotFound)
        };

        self.send(Packet::PubComp(pubcomp)).await
    }

    /// Handle PUBCOMP packet
    pub(crate) fn handle_pubcomp(
        &self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        pubcomp: PubComp,
    ) {
        let retired = session.write().handle_pubcomp(pubcomp.packet_id);
        match retired {
            Some(inflight) => self.ctx.delivered(client_id, &inflight),
            None => trace!(
                "Ignoring PUBCOMP {} from {}: no PUBREL outstanding",
                pubcomp.packet_id,
                client_id
            ),
        }
    }

    /// Retransmit unacknowledged deliveries and report the ones that ran
    /// out of retries
    pub(crate) fn retry_unacked(&self, client_id: &Arc<str>, session: &Arc<RwLock<Session>>) {
        let config = &self.ctx.config;
        let failed = session
            .write()
            .retry_unacked(config.retry_interval, config.max_retries);

        for inflight in failed {
            warn!(
                client_id = %client_id,
                packet_id = inflight.packet_id,
                topic = %inflight.message.topic,
                "Delivery failed after {} retries",
                inflight.retry_count
            );
            self.ctx.emit(BrokerEvent::DeliveryFailed {
                client_id: client_id.clone(),
                packet_id: inflight.packet_id,
                message: as_delivered(&inflight.message, inflight.qos, inflight.retain),
            });
        }
    }
}

//! PUBLISH packet handling

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::{Connection, ConnectionError};
use crate::protocol::{
    ApplicationMessage, Packet, ProtocolError, PubAck, PubRec, Publish, QoS, ReasonCode,
};
use crate::session::{Qos2Receive, Session};
use crate::topic::validate_topic_name_with_max_levels;

impl Connection {
    /// Handle PUBLISH packet
    pub(crate) async fn handle_publish(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        publish: Publish,
    ) -> Result<(), ConnectionError> {
        let qos = publish.qos;
        let packet_id = match (qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => 0,
            (_, Some(id)) => id,
            (_, None) => return Err(ProtocolError::MissingPacketId.into()),
        };

        // Validate topic name
        if let Err(e) =
            validate_topic_name_with_max_levels(&publish.topic, self.ctx.config.max_topic_levels)
                .map_err(ProtocolError::InvalidTopicName)
        {
            warn!("PUBLISH from {} rejected: {}", client_id, e);
            return self
                .reject_publish(qos, packet_id, ReasonCode::TopicNameInvalid)
                .await;
        }

        trace!(
            "PUBLISH from {} to {} (QoS {:?})",
            client_id,
            publish.topic,
            qos
        );

        // Check ACL for publish permission
        let allowed = match self
            .ctx
            .hooks
            .on_publish_check(
                client_id,
                self.username.as_deref(),
                &publish.topic,
                qos,
                publish.retain,
            )
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!("Publish check error for {}: {}", client_id, e);
                false
            }
        };
        if !allowed {
            debug!("PUBLISH denied for {} to {}", client_id, publish.topic);
            return self
                .reject_publish(qos, packet_id, ReasonCode::NotAuthorized)
                .await;
        }

        let message = ApplicationMessage::from(publish);

        match qos {
            QoS::AtMostOnce => {
                self.ctx.dispatch(Some(client_id), message).await;
                Ok(())
            }
            QoS::AtLeastOnce => {
                self.ctx.dispatch(Some(client_id), message).await;
                self.send(Packet::PubAck(PubAck::new(packet_id))).await
            }
            QoS::ExactlyOnce => {
                let receipt = session
                    .write()
                    .receive_qos2(packet_id, self.ctx.config.max_awaiting_rel);

                let pubrec = match receipt {
                    Qos2Receive::First => {
                        self.ctx.dispatch(Some(client_id), message).await;
                        PubRec::new(packet_id)
                    }
                    Qos2Receive::Duplicate => {
                        trace!(
                            "Duplicate QoS 2 PUBLISH {} from {}, not routed",
                            packet_id,
                            client_id
                        );
                        PubRec::new(packet_id)
                    }
                    Qos2Receive::QuotaExceeded => {
                        debug!(
                            "Too many QoS 2 messages awaiting PUBREL from {}",
                            client_id
                        );
                        PubRec::with_reason(packet_id, ReasonCode::QuotaExceeded)
                    }
                };
                self.send(Packet::PubRec(pubrec)).await
            }
        }
    }

    /// Acknowledge a PUBLISH that will not be routed
    async fn reject_publish(
        &self,
        qos: QoS,
        packet_id: u16,
        reason_code: ReasonCode,
    ) -> Result<(), ConnectionError> {
        match qos {
            QoS::AtMostOnce => Ok(()),
            QoS::AtLeastOnce => {
                self.send(Packet::PubAck(PubAck::with_reason(packet_id, reason_code)))
                    .await
            }
            QoS::ExactlyOnce => {
                self.send(Packet::PubRec(PubRec::with_reason(packet_id, reason_code)))
                    .await
            }
        }
    }
}

//! SUBSCRIBE and UNSUBSCRIBE packet handling

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use super::{Connection, ConnectionError};
use crate::protocol::{
    Packet, ProtocolError, QoS, ReasonCode, SubAck, Subscribe, UnsubAck, Unsubscribe,
};
use crate::session::Session;
use crate::topic::validate_topic_filter_with_max_levels;

impl Connection {
    /// Handle SUBSCRIBE packet
    pub(crate) async fn handle_subscribe(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        subscribe: Subscribe,
    ) -> Result<(), ConnectionError> {
        let ctx = self.ctx.clone();
        let session_id = session.read().session_id;

        let mut reason_codes = Vec::with_capacity(subscribe.filters.len());
        // Granted filters, for retained replay after SUBACK
        let mut granted_filters: Vec<(String, QoS)> = Vec::new();

        for sub in subscribe.filters {
            // Validate topic filter
            if let Err(e) =
                validate_topic_filter_with_max_levels(&sub.filter, ctx.config.max_topic_levels)
                    .map_err(ProtocolError::InvalidTopicFilter)
            {
                debug!("SUBSCRIBE from {} rejected: {}", client_id, e);
                reason_codes.push(ReasonCode::TopicFilterInvalid);
                continue;
            }

            // Check ACL for subscribe permission
            let acl_result = ctx
                .hooks
                .on_subscribe_check(client_id, self.username.as_deref(), &sub.filter, sub.qos)
                .await;

            match acl_result {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        "SUBSCRIBE denied for {} to filter {}",
                        client_id, sub.filter
                    );
                    reason_codes.push(ReasonCode::NotAuthorized);
                    continue;
                }
                Err(e) => {
                    error!("Subscribe check error for {}: {}", client_id, e);
                    reason_codes.push(ReasonCode::UnspecifiedError);
                    continue;
                }
            }

            let granted_qos = ctx
                .hooks
                .grant_qos(client_id, &sub.filter, sub.qos)
                .await
                .min(sub.qos)
                .min(ctx.config.max_qos);

            ctx.subscriptions
                .subscribe(client_id, session_id, &sub.filter, granted_qos);

            debug!(
                "SUBSCRIBE {} to {} (QoS {:?})",
                client_id, sub.filter, granted_qos
            );
            reason_codes.push(granted_qos.granted_code());
            granted_filters.push((sub.filter, granted_qos));
        }

        // A teardown that ran meanwhile has already swept the registry
        if !session.read().is_connected() {
            ctx.subscriptions.unsubscribe_all(client_id, session_id);
            return Ok(());
        }

        self.send(Packet::SubAck(SubAck {
            packet_id: subscribe.packet_id,
            reason_codes,
        }))
        .await?;

        for (filter, granted_qos) in granted_filters {
            ctx.replay_retained(session, &filter, granted_qos);
        }

        Ok(())
    }

    /// Handle UNSUBSCRIBE packet
    pub(crate) async fn handle_unsubscribe(
        &mut self,
        client_id: &Arc<str>,
        session: &Arc<RwLock<Session>>,
        unsubscribe: Unsubscribe,
    ) -> Result<(), ConnectionError> {
        let session_id = session.read().session_id;
        let reason_codes = unsubscribe
            .filters
            .iter()
            .map(|filter| {
                if self
                    .ctx
                    .subscriptions
                    .unsubscribe(client_id, session_id, filter)
                {
                    debug!("UNSUBSCRIBE {} from {}", client_id, filter);
                    ReasonCode::Success
                } else {
                    ReasonCode::NoSubscriptionExisted
                }
            })
            .collect();

        self.send(Packet::UnsubAck(UnsubAck {
            packet_id: unsubscribe.packet_id,
            reason_codes,
        }))
        .await
    }
}

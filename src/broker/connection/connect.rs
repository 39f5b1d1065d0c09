//! CONNECT packet handling

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{rand_id, Connection, ConnectionError};
use crate::broker::BrokerEvent;
use crate::protocol::{ConnAck, Connect, Disconnect, Packet, ReasonCode};
use crate::session::{DisconnectKind, Session, SessionState};
use crate::topic::validate_topic_name_with_max_levels;

impl Connection {
    /// Handle CONNECT: authenticate, register the session (taking over any
    /// session with the same client identifier) and send CONNACK
    pub(crate) async fn handle_connect(
        &mut self,
        connect: Connect,
    ) -> Result<Arc<RwLock<Session>>, ConnectionError> {
        let ctx = self.ctx.clone();

        let assigned = connect.client_id.is_empty();
        let client_id: Arc<str> = if assigned {
            format!("quillmq-{:016x}", rand_id()).into()
        } else {
            connect.client_id.as_str().into()
        };

        debug!("CONNECT (client_id: {})", client_id);

        // Authenticate the client
        let authenticated = match ctx
            .hooks
            .on_authenticate(
                &client_id,
                connect.username.as_deref(),
                connect.password.as_deref(),
            )
            .await
        {
            Ok(authenticated) => authenticated,
            Err(e) => {
                warn!("Authentication error for {}: {}", client_id, e);
                false
            }
        };
        if !authenticated {
            debug!("Authentication failed for {}", client_id);
            return Err(self.refuse(ReasonCode::NotAuthorized).await);
        }

        if let Some(will) = &connect.will {
            if let Err(reason) =
                validate_topic_name_with_max_levels(&will.topic, ctx.config.max_topic_levels)
            {
                debug!("Invalid will topic from {}: {}", client_id, reason);
                return Err(self.refuse(ReasonCode::TopicNameInvalid).await);
            }
        }

        // Takeovers never count against the limit
        if ctx.sessions.len() >= ctx.config.max_connections && !ctx.sessions.contains(&client_id)
        {
            debug!("Connection limit reached, refusing {}", client_id);
            return Err(self.refuse(ReasonCode::ServerUnavailable).await);
        }

        let keep_alive = match connect.keep_alive {
            0 => ctx.config.default_keep_alive,
            requested => requested.min(ctx.config.max_keep_alive),
        };

        let mut session = Session::new(client_id.clone(), self.outgoing.clone());
        session.keep_alive = keep_alive;
        session.will = connect.will;
        session.max_inflight = ctx.config.max_inflight;
        session.max_pending_messages = ctx.config.max_queued_messages;
        let session = Arc::new(RwLock::new(session));

        if let Some(previous) = ctx.sessions.insert(session.clone()) {
            debug!(
                "Client {} reconnected, taking over previous session",
                client_id
            );
            {
                let mut p = previous.write();
                if connect.clean_takeover {
                    p.will = None;
                }
                let _ = p.try_send(Packet::Disconnect(Disconnect::new(
                    ReasonCode::SessionTakenOver,
                )));
            }
            // Publishes the previous will before this session goes live
            ctx.teardown(&previous, DisconnectKind::Replaced).await;
        }

        let live = {
            let mut s = session.write();
            if s.state == SessionState::Connecting {
                s.state = SessionState::Connected;
                true
            } else {
                false
            }
        };
        if !live {
            // Taken over again while the previous session was being torn down
            return Err(ConnectionError::Refused(ReasonCode::SessionTakenOver));
        }

        self.username = connect.username;

        let connack = ConnAck {
            session_present: false,
            reason_code: ReasonCode::Success,
            assigned_client_id: assigned.then(|| client_id.to_string()),
        };
        if let Err(e) = self.send(Packet::ConnAck(connack)).await {
            ctx.teardown(&session, DisconnectKind::Abrupt).await;
            return Err(e);
        }

        debug!(
            client_id = %client_id,
            keep_alive,
            "Client connected"
        );
        ctx.emit(BrokerEvent::ClientConnected {
            client_id: client_id.clone(),
        });
        ctx.hooks
            .on_client_connected(&client_id, self.username.as_deref())
            .await;

        Ok(session)
    }

    /// Send a failure CONNACK; the link closes when the worker exits
    async fn refuse(&self, reason_code: ReasonCode) -> ConnectionError {
        // Closed link is fine here
        let _ = self
            .send(Packet::ConnAck(ConnAck::new(reason_code)))
            .await;
        ConnectionError::Refused(reason_code)
    }
}

//! Hooks Module
//!
//! Extensibility points for authentication, authorization, subscription
//! QoS policy and lifecycle notifications. Authentication and
//! authorization policy live entirely behind this trait.

use std::fmt;

use async_trait::async_trait;

use crate::protocol::QoS;
use crate::session::DisconnectKind;

#[cfg(test)]
mod tests;

/// Hook error types
#[derive(Debug)]
pub enum HookError {
    /// Internal error
    Internal(String),
    /// Authentication failed
    AuthenticationFailed,
    /// Authorization denied
    AuthorizationDenied,
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::Internal(msg) => write!(f, "Internal error: {}", msg),
            HookError::AuthenticationFailed => write!(f, "Authentication failed"),
            HookError::AuthorizationDenied => write!(f, "Authorization denied"),
        }
    }
}

impl std::error::Error for HookError {}

/// Hook result type
pub type HookResult<T> = Result<T, HookError>;

/// Broker hooks trait
///
/// Implement this trait to customize authentication, authorization,
/// granted QoS and event handling behavior. All methods have default
/// implementations that allow everything.
#[async_trait]
pub trait Hooks: Send + Sync {
    /// Called when a client attempts to connect
    ///
    /// # Returns
    /// * `Ok(true)` - Authentication successful
    /// * `Ok(false)` - Authentication failed (CONNACK with NotAuthorized)
    /// * `Err(_)` - Internal error occurred (treated as a failure)
    async fn on_authenticate(
        &self,
        _client_id: &str,
        _username: Option<&str>,
        _password: Option<&[u8]>,
    ) -> HookResult<bool> {
        Ok(true)
    }

    /// Called when a client attempts to publish a message
    ///
    /// A denied publish is acknowledged with NotAuthorized and not routed.
    async fn on_publish_check(
        &self,
        _client_id: &str,
        _username: Option<&str>,
        _topic: &str,
        _qos: QoS,
        _retain: bool,
    ) -> HookResult<bool> {
        Ok(true)
    }

    /// Called when a client attempts to subscribe to a topic filter
    ///
    /// A denied subscription fails only that filter in the SUBACK.
    async fn on_subscribe_check(
        &self,
        _client_id: &str,
        _username: Option<&str>,
        _filter: &str,
        _qos: QoS,
    ) -> HookResult<bool> {
        Ok(true)
    }

    /// Decide the QoS granted for an accepted subscription.
    ///
    /// The result is capped at the requested QoS and the broker's maximum.
    async fn grant_qos(&self, _client_id: &str, _filter: &str, requested: QoS) -> QoS {
        requested
    }

    /// Called after a client successfully connects and CONNACK is sent
    async fn on_client_connected(&self, _client_id: &str, _username: Option<&str>) {}

    /// Called after a session is torn down
    async fn on_client_disconnected(&self, _client_id: &str, _kind: DisconnectKind) {}

    /// Called after a message has been routed to subscribers
    async fn on_message_published(
        &self,
        _client_id: Option<&str>,
        _topic: &str,
        _payload: &[u8],
        _qos: QoS,
    ) {
    }
}

/// Default hooks implementation that allows everything
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

#[async_trait]
impl Hooks for DefaultHooks {}

/// Implement Hooks for Arc<T> where T: Hooks
/// This allows Arc-wrapped hook providers to be used directly
#[async_trait]
impl<T: Hooks + ?Sized> Hooks for std::sync::Arc<T> {
    async fn on_authenticate(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> HookResult<bool> {
        (**self)
            .on_authenticate(client_id, username, password)
            .await
    }

    async fn on_publish_check(
        &self,
        client_id: &str,
        username: Option<&str>,
        topic: &str,
        qos: QoS,
        retain: bool,
    ) -> HookResult<bool> {
        (**self)
            .on_publish_check(client_id, username, topic, qos, retain)
            .await
    }

    async fn on_subscribe_check(
        &self,
        client_id: &str,
        username: Option<&str>,
        filter: &str,
        qos: QoS,
    ) -> HookResult<bool> {
        (**self)
            .on_subscribe_check(client_id, username, filter, qos)
            .await
    }

    async fn grant_qos(&self, client_id: &str, filter: &str, requested: QoS) -> QoS {
        (**self).grant_qos(client_id, filter, requested).await
    }

    async fn on_client_connected(&self, client_id: &str, username: Option<&str>) {
        (**self).on_client_connected(client_id, username).await;
    }

    async fn on_client_disconnected(&self, client_id: &str, kind: DisconnectKind) {
        (**self).on_client_disconnected(client_id, kind).await;
    }

    async fn on_message_published(
        &self,
        client_id: Option<&str>,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) {
        (**self)
            .on_message_published(client_id, topic, payload, qos)
            .await;
    }
}

/// Composite hooks that chains multiple hook implementations
///
/// For authentication: all hooks must return `Ok(true)` for success
/// For authorization: all hooks must return `Ok(true)` for permission
/// For QoS grants: the lowest grant wins
/// For events: all hooks are called in order
pub struct CompositeHooks {
    hooks: Vec<Box<dyn Hooks>>,
}

impl CompositeHooks {
    /// Create a new composite hooks instance
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Add a hooks implementation
    pub fn add<H: Hooks + 'static>(&mut self, hooks: H) {
        self.hooks.push(Box::new(hooks));
    }

    /// Add a hooks implementation and return self for chaining
    pub fn with<H: Hooks + 'static>(mut self, hooks: H) -> Self {
        self.add(hooks);
        self
    }
}

impl Default for CompositeHooks {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hooks for CompositeHooks {
    async fn on_authenticate(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> HookResult<bool> {
        for hooks in &self.hooks {
            if !hooks.on_authenticate(client_id, username, password).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn on_publish_check(
        &self,
        client_id: &str,
        username: Option<&str>,
        topic: &str,
        qos: QoS,
        retain: bool,
    ) -> HookResult<bool> {
        for hooks in &self.hooks {
            if !hooks
                .on_publish_check(client_id, username, topic, qos, retain)
                .await?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn on_subscribe_check(
        &self,
        client_id: &str,
        username: Option<&str>,
        filter: &str,
        qos: QoS,
    ) -> HookResult<bool> {
        for hooks in &self.hooks {
            if !hooks
                .on_subscribe_check(client_id, username, filter, qos)
                .await?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn grant_qos(&self, client_id: &str, filter: &str, requested: QoS) -> QoS {
        let mut granted = requested;
        for hooks in &self.hooks {
            granted = granted.min(hooks.grant_qos(client_id, filter, requested).await);
        }
        granted
    }

    async fn on_client_connected(&self, client_id: &str, username: Option<&str>) {
        for hooks in &self.hooks {
            hooks.on_client_connected(client_id, username).await;
        }
    }

    async fn on_client_disconnected(&self, client_id: &str, kind: DisconnectKind) {
        for hooks in &self.hooks {
            hooks.on_client_disconnected(client_id, kind).await;
        }
    }

    async fn on_message_published(
        &self,
        client_id: Option<&str>,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) {
        for hooks in &self.hooks {
            hooks
                .on_message_published(client_id, topic, payload, qos)
                .await;
        }
    }
}

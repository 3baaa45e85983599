//! Event handling for channel connections.
//!
//! The handler drives the handshake, gates application events on session
//! state, and decrypts them for the caller. Replies and pushes are
//! encrypted per connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use berryvault_core::UserId;

use crate::error::{ChannelError, Result};
use crate::messages::{decode_public_key, encode_public_key, names, Event};
use crate::session::{ConnectionId, Identity, SessionRegistry, SessionState};
use crate::transport::{user_group, ChannelTransport};

/// Verifies bearer credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> std::result::Result<Identity, String>;
}

/// Channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long a connection may stay before SESSION_ESTABLISHED.
    pub handshake_timeout: Duration,
    /// Events allowed once the session is established but before
    /// authentication.
    pub pre_auth_events: Vec<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            pre_auth_events: vec!["login".into(), "register".into(), "refresh_token".into()],
        }
    }
}

/// A decrypted application event, ready for the caller to act on.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub connection: ConnectionId,
    pub event: String,
    pub payload: Value,
    /// `None` for pre-auth events.
    pub identity: Option<Identity>,
}

pub struct ChannelHandler<T: ChannelTransport, A: Authenticator> {
    registry: Arc<SessionRegistry>,
    transport: Arc<T>,
    authenticator: Arc<A>,
    config: ChannelConfig,
}

impl<T: ChannelTransport, A: Authenticator> ChannelHandler<T, A> {
    pub fn new(transport: Arc<T>, authenticator: Arc<A>, config: ChannelConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            transport,
            authenticator,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub async fn connect(&self) -> ConnectionId {
        self.registry.connect().await
    }

    /// Handle one inbound event.
    ///
    /// Handshake events are answered directly and return `None`.
    /// Application events come back decrypted. Errors are also reported to
    /// the peer; [`ChannelError::is_protocol_violation`] tells the caller
    /// whether to drop the connection.
    pub async fn handle(&self, connection: ConnectionId, event: Event) -> Result<Option<Inbound>> {
        match event.event.as_str() {
            names::INITIATE_KEY_EXCHANGE => {
                self.on_initiate_key_exchange(connection).await?;
                Ok(None)
            }
            names::CLIENT_PUBLIC_KEY => {
                self.on_client_public_key(connection, &event).await?;
                Ok(None)
            }
            names::AUTHENTICATE => {
                self.on_authenticate(connection, &event).await?;
                Ok(None)
            }
            _ => self.on_application(connection, event).await.map(Some),
        }
    }

    async fn on_initiate_key_exchange(&self, connection: ConnectionId) -> Result<()> {
        match self.registry.begin_key_exchange(connection).await {
            Ok(public) => {
                self.transport
                    .emit(
                        connection,
                        Event::new(
                            names::SERVER_PUBLIC_KEY,
                            json!({ "public_key": encode_public_key(&public) }),
                        ),
                    )
                    .await
            }
            Err(e) => {
                tracing::warn!(%connection, error = %e, "key exchange refused");
                self.fail(connection, names::ERROR, "Key exchange not allowed", e)
                    .await
            }
        }
    }

    async fn on_client_public_key(&self, connection: ConnectionId, event: &Event) -> Result<()> {
        if self.registry.state(connection).await != Some(SessionState::KeyExchanging) {
            tracing::warn!(%connection, "client public key without key exchange");
            return self
                .fail(
                    connection,
                    names::ERROR,
                    "Session not initialized",
                    ChannelError::SessionNotInitialized,
                )
                .await;
        }

        let Some(encoded) = event.field("public_key") else {
            return self
                .fail(
                    connection,
                    names::ERROR,
                    "Missing client public key",
                    ChannelError::InvalidMessage("missing public_key".into()),
                )
                .await;
        };
        let peer = match decode_public_key(encoded) {
            Ok(peer) => peer,
            Err(e) => return self.fail(connection, names::ERROR, "Invalid client public key", e).await,
        };

        match self.registry.complete_key_exchange(connection, &peer).await {
            Ok(()) => {}
            Err(e @ ChannelError::Crypto(_)) => {
                return self.fail(connection, names::ERROR, "Invalid client public key", e).await
            }
            Err(e) => {
                return self.fail(connection, names::ERROR, "Session not initialized", e).await
            }
        }
        self.transport
            .emit(connection, Event::bare(names::KEY_EXCHANGE_COMPLETE))
            .await
    }

    async fn on_authenticate(&self, connection: ConnectionId, event: &Event) -> Result<()> {
        let snapshot = match self.registry.snapshot(connection).await {
            Some(s) if s.state.is_established() => s,
            _ => {
                tracing::warn!(%connection, "authenticate before key exchange");
                return self
                    .fail(
                        connection,
                        names::AUTH_ERROR,
                        "Key exchange not completed",
                        ChannelError::SecureChannelNotEstablished,
                    )
                    .await;
            }
        };

        // The token may come in the clear or inside the encrypted body.
        let token = match event.encrypted_field() {
            Some(encrypted) => match snapshot.decrypt(encrypted) {
                Ok(payload) => payload.get("token").and_then(Value::as_str).map(str::to_owned),
                Err(e) => {
                    return self
                        .fail(connection, names::AUTH_ERROR, "Failed to decrypt credentials", e)
                        .await
                }
            },
            None => event.field("token").map(str::to_owned),
        };
        let Some(token) = token else {
            return self
                .fail(
                    connection,
                    names::AUTH_ERROR,
                    "Missing authentication token",
                    ChannelError::AuthenticationFailed("missing token".into()),
                )
                .await;
        };

        let identity = match self.authenticator.authenticate(&token).await {
            Ok(identity) => identity,
            Err(reason) => {
                tracing::warn!(%connection, "authentication rejected");
                return self
                    .fail(
                        connection,
                        names::AUTH_ERROR,
                        "Invalid or expired token",
                        ChannelError::AuthenticationFailed(reason),
                    )
                    .await;
            }
        };

        let previous = self
            .registry
            .authenticate(connection, identity.clone())
            .await?;
        if let Some(previous) = previous.filter(|p| p.user_id != identity.user_id) {
            tracing::info!(
                %connection,
                from = %previous.user_id,
                to = %identity.user_id,
                "connection re-authenticated as another user"
            );
            self.transport
                .leave_group(connection, &user_group(previous.user_id))
                .await;
        }
        self.transport
            .join_group(connection, &user_group(identity.user_id))
            .await?;
        self.transport
            .emit(
                connection,
                Event::new(
                    names::AUTHENTICATED,
                    json!({ "user_id": identity.user_id, "username": identity.username }),
                ),
            )
            .await
    }

    async fn on_application(&self, connection: ConnectionId, event: Event) -> Result<Inbound> {
        let pre_auth = self.config.pre_auth_events.iter().any(|e| *e == event.event);
        let snapshot = self.registry.snapshot(connection).await;

        let snapshot = match snapshot {
            Some(s) if s.state == SessionState::Authenticated => s,
            Some(s) if pre_auth && s.state.is_established() => s,
            Some(_) if !pre_auth => {
                tracing::warn!(%connection, event = %event.event, "event before authentication");
                return self
                    .fail(
                        connection,
                        names::ERROR,
                        "Authentication required",
                        ChannelError::AuthenticationRequired,
                    )
                    .await
            }
            _ => {
                tracing::warn!(%connection, event = %event.event, "event before secure channel");
                return self
                    .fail(
                        connection,
                        names::ERROR,
                        "Secure channel not established",
                        ChannelError::SecureChannelNotEstablished,
                    )
                    .await
            }
        };

        let Some(encrypted) = event.encrypted_field() else {
            return self
                .fail(
                    connection,
                    names::ERROR,
                    "Missing encrypted data",
                    ChannelError::InvalidMessage("missing encrypted field".into()),
                )
                .await;
        };
        let payload = match snapshot.decrypt(encrypted) {
            Ok(payload) => payload,
            Err(e) => {
                return self
                    .fail(connection, names::ERROR, "Failed to decrypt data", e)
                    .await
            }
        };

        Ok(Inbound {
            connection,
            event: event.event,
            payload,
            identity: snapshot.identity,
        })
    }

    /// Report `message` to the peer under `event`, then fail with `error`.
    async fn fail<R>(
        &self,
        connection: ConnectionId,
        event: &str,
        message: &str,
        error: ChannelError,
    ) -> Result<R> {
        if let Err(e) = self.transport.emit(connection, Event::message(event, message)).await {
            tracing::debug!(%connection, error = %e, "could not report error to peer");
        }
        Err(error)
    }

    /// Send an encrypted event to one connection.
    pub async fn reply(&self, connection: ConnectionId, event: &str, payload: &Value) -> Result<()> {
        let snapshot = self
            .registry
            .snapshot(connection)
            .await
            .ok_or(ChannelError::SecureChannelNotEstablished)?;
        let encrypted = snapshot.encrypt(payload)?;
        self.transport
            .emit(connection, Event::encrypted(event, encrypted))
            .await
    }

    /// Push an event to every connection of `user`, each encrypted under its
    /// own transport key. Returns how many connections it reached.
    pub async fn emit_to_user(&self, user: UserId, event: &str, payload: &Value) -> Result<usize> {
        let mut delivered = 0;
        for connection in self.transport.group_members(&user_group(user)).await {
            let Some(snapshot) = self.registry.snapshot(connection).await else {
                continue;
            };
            let bound = snapshot.identity.as_ref().map(|i| i.user_id);
            if snapshot.state != SessionState::Authenticated || bound != Some(user) {
                continue;
            }
            let encrypted = snapshot.encrypt(payload)?;
            match self
                .transport
                .emit(connection, Event::encrypted(event, encrypted))
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(%connection, error = %e, "push failed"),
            }
        }
        tracing::debug!(%user, event, delivered, "pushed to user");
        Ok(delivered)
    }

    /// Tear down a connection and its key material.
    pub async fn disconnect(&self, connection: ConnectionId) {
        self.transport.detach(connection).await;
        self.registry.disconnect(connection).await;
    }

    /// Drop connections stuck in the handshake past the configured timeout.
    pub async fn expire_handshakes(&self) -> usize {
        let expired = self
            .registry
            .expire_handshakes(self.config.handshake_timeout)
            .await;
        for connection in &expired {
            self.transport.detach(*connection).await;
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{open_payload, seal_payload};
    use crate::session::CHANNEL_KEY_CONTEXT;
    use crate::transport::memory::MemoryTransport;
    use berryvault_core::{EncryptionKey, EphemeralKeyPair, X25519PublicKey};
    use tokio::sync::mpsc;

    struct StaticAuthenticator;

    #[async_trait]
    impl Authenticator for StaticAuthenticator {
        async fn authenticate(&self, token: &str) -> std::result::Result<Identity, String> {
            match token {
                "alice-token" => Ok(Identity {
                    user_id: UserId(1),
                    username: "alice".into(),
                }),
                "bob-token" => Ok(Identity {
                    user_id: UserId(2),
                    username: "bob".into(),
                }),
                _ => Err("unknown token".into()),
            }
        }
    }

    type Handler = ChannelHandler<MemoryTransport, StaticAuthenticator>;

    fn handler() -> (Arc<MemoryTransport>, Handler) {
        let transport = Arc::new(MemoryTransport::new());
        let handler = ChannelHandler::new(
            transport.clone(),
            Arc::new(StaticAuthenticator),
            ChannelConfig::default(),
        );
        (transport, handler)
    }

    struct Client {
        connection: ConnectionId,
        inbox: mpsc::Receiver<Event>,
        key: Option<EncryptionKey>,
    }

    async fn connect(transport: &MemoryTransport, handler: &Handler) -> Client {
        let connection = handler.connect().await;
        let inbox = transport.attach(connection).await;
        Client {
            connection,
            inbox,
            key: None,
        }
    }

    async fn key_exchange(handler: &Handler, client: &mut Client) {
        handler
            .handle(client.connection, Event::bare(names::INITIATE_KEY_EXCHANGE))
            .await
            .unwrap();
        let reply = client.inbox.recv().await.unwrap();
        assert_eq!(reply.event, names::SERVER_PUBLIC_KEY);
        let server_public = decode_public_key(reply.field("public_key").unwrap()).unwrap();

        let keypair = EphemeralKeyPair::generate();
        let event = Event::new(
            names::CLIENT_PUBLIC_KEY,
            json!({ "public_key": encode_public_key(&keypair.public_key()) }),
        );
        handler.handle(client.connection, event).await.unwrap();
        assert_eq!(client.inbox.recv().await.unwrap().event, names::KEY_EXCHANGE_COMPLETE);

        client.key = Some(
            keypair
                .diffie_hellman(&server_public)
                .unwrap()
                .derive_key(CHANNEL_KEY_CONTEXT),
        );
    }

    async fn login(handler: &Handler, client: &mut Client, token: &str) {
        handler
            .handle(
                client.connection,
                Event::new(names::AUTHENTICATE, json!({ "token": token })),
            )
            .await
            .unwrap();
        assert_eq!(client.inbox.recv().await.unwrap().event, names::AUTHENTICATED);
    }

    #[tokio::test]
    async fn test_full_handshake() {
        let (transport, handler) = handler();
        let mut client = connect(&transport, &handler).await;
        key_exchange(&handler, &mut client).await;

        handler
            .handle(
                client.connection,
                Event::new(names::AUTHENTICATE, json!({ "token": "alice-token" })),
            )
            .await
            .unwrap();
        let reply = client.inbox.recv().await.unwrap();
        assert_eq!(reply.event, names::AUTHENTICATED);
        assert_eq!(reply.data, json!({"user_id": 1, "username": "alice"}));
        assert_eq!(
            transport.group_members("user_1").await,
            vec![client.connection]
        );
    }

    #[tokio::test]
    async fn test_encrypted_token() {
        let (transport, handler) = handler();
        let mut client = connect(&transport, &handler).await;
        key_exchange(&handler, &mut client).await;

        let sealed = seal_payload(client.key.as_ref().unwrap(), &json!({"token": "bob-token"})).unwrap();
        handler
            .handle(client.connection, Event::encrypted(names::AUTHENTICATE, sealed))
            .await
            .unwrap();
        assert_eq!(client.inbox.recv().await.unwrap().event, names::AUTHENTICATED);
    }

    #[tokio::test]
    async fn test_public_key_before_initiate() {
        let (transport, handler) = handler();
        let mut client = connect(&transport, &handler).await;
        let event = Event::new(
            names::CLIENT_PUBLIC_KEY,
            json!({ "public_key": encode_public_key(&EphemeralKeyPair::generate().public_key()) }),
        );
        let err = handler.handle(client.connection, event).await.unwrap_err();
        assert!(matches!(err, ChannelError::SessionNotInitialized));
        assert_eq!(
            client.inbox.recv().await.unwrap(),
            Event::message(names::ERROR, "Session not initialized")
        );
    }

    #[tokio::test]
    async fn test_bad_token_keeps_session() {
        let (transport, handler) = handler();
        let mut client = connect(&transport, &handler).await;
        key_exchange(&handler, &mut client).await;

        let err = handler
            .handle(
                client.connection,
                Event::new(names::AUTHENTICATE, json!({ "token": "forged" })),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::AuthenticationFailed(_)));
        assert!(!err.is_protocol_violation());
        assert_eq!(client.inbox.recv().await.unwrap().event, names::AUTH_ERROR);
        assert_eq!(
            handler.registry().state(client.connection).await,
            Some(SessionState::SessionEstablished)
        );

        // Retry succeeds.
        login(&handler, &mut client, "alice-token").await;
    }

    #[tokio::test]
    async fn test_authenticate_before_key_exchange() {
        let (transport, handler) = handler();
        let mut client = connect(&transport, &handler).await;
        let err = handler
            .handle(
                client.connection,
                Event::new(names::AUTHENTICATE, json!({ "token": "alice-token" })),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::SecureChannelNotEstablished));
        assert_eq!(client.inbox.recv().await.unwrap().event, names::AUTH_ERROR);
    }

    #[tokio::test]
    async fn test_application_event_gating() {
        let (transport, handler) = handler();
        let mut client = connect(&transport, &handler).await;

        // No secure channel yet: even pre-auth events are refused.
        let err = handler
            .handle(client.connection, Event::encrypted("login", "AAAA".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::SecureChannelNotEstablished));
        client.inbox.recv().await.unwrap();

        key_exchange(&handler, &mut client).await;
        let key = client.key.clone().unwrap();

        // Pre-auth event passes once the session is established.
        let sealed = seal_payload(&key, &json!({"username": "alice"})).unwrap();
        let inbound = handler
            .handle(client.connection, Event::encrypted("login", sealed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.payload, json!({"username": "alice"}));
        assert!(inbound.identity.is_none());

        // Anything else needs authentication.
        let sealed = seal_payload(&key, &json!({})).unwrap();
        let err = handler
            .handle(client.connection, Event::encrypted("get_secrets", sealed.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::AuthenticationRequired));
        assert_eq!(
            client.inbox.recv().await.unwrap(),
            Event::message(names::ERROR, "Authentication required")
        );

        login(&handler, &mut client, "alice-token").await;
        let inbound = handler
            .handle(client.connection, Event::encrypted("get_secrets", sealed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.identity.unwrap().user_id, UserId(1));
    }

    #[tokio::test]
    async fn test_reply_is_encrypted_per_connection() {
        let (transport, handler) = handler();
        let mut a = connect(&transport, &handler).await;
        let mut b = connect(&transport, &handler).await;
        key_exchange(&handler, &mut a).await;
        key_exchange(&handler, &mut b).await;

        handler
            .reply(a.connection, "secret_data", &json!({"value": "x"}))
            .await
            .unwrap();
        let event = a.inbox.recv().await.unwrap();
        let encrypted = event.encrypted_field().unwrap();
        assert_eq!(
            open_payload(a.key.as_ref().unwrap(), encrypted).unwrap(),
            json!({"value": "x"})
        );
        assert!(open_payload(b.key.as_ref().unwrap(), encrypted).is_err());
    }

    #[tokio::test]
    async fn test_emit_to_user_reaches_every_connection() {
        let (transport, handler) = handler();
        let mut first = connect(&transport, &handler).await;
        let mut second = connect(&transport, &handler).await;
        let mut other = connect(&transport, &handler).await;
        for client in [&mut first, &mut second, &mut other] {
            key_exchange(&handler, client).await;
        }
        login(&handler, &mut first, "alice-token").await;
        login(&handler, &mut second, "alice-token").await;
        login(&handler, &mut other, "bob-token").await;

        let delivered = handler
            .emit_to_user(UserId(1), "secret_updated", &json!({"id": 3}))
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        for client in [&mut first, &mut second] {
            let event = client.inbox.recv().await.unwrap();
            assert_eq!(event.event, "secret_updated");
            let payload =
                open_payload(client.key.as_ref().unwrap(), event.encrypted_field().unwrap())
                    .unwrap();
            assert_eq!(payload, json!({"id": 3}));
        }
        assert!(other.inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reauthenticate_as_other_user_stops_old_pushes() {
        let (transport, handler) = handler();
        let mut client = connect(&transport, &handler).await;
        key_exchange(&handler, &mut client).await;
        login(&handler, &mut client, "alice-token").await;
        login(&handler, &mut client, "bob-token").await;

        assert!(transport.group_members("user_1").await.is_empty());
        assert_eq!(
            transport.group_members("user_2").await,
            vec![client.connection]
        );
        assert_eq!(
            handler
                .emit_to_user(UserId(1), "secret_updated", &json!({"id": 1}))
                .await
                .unwrap(),
            0
        );
        assert!(client.inbox.try_recv().is_err());

        // A stale group entry alone does not route another user's pushes.
        transport
            .join_group(client.connection, "user_1")
            .await
            .unwrap();
        assert_eq!(
            handler
                .emit_to_user(UserId(1), "secret_updated", &json!({"id": 1}))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            handler
                .emit_to_user(UserId(2), "secret_updated", &json!({"id": 2}))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_low_order_client_key_rejected() {
        let (transport, handler) = handler();
        let mut client = connect(&transport, &handler).await;
        handler
            .handle(client.connection, Event::bare(names::INITIATE_KEY_EXCHANGE))
            .await
            .unwrap();
        assert_eq!(client.inbox.recv().await.unwrap().event, names::SERVER_PUBLIC_KEY);

        let event = Event::new(
            names::CLIENT_PUBLIC_KEY,
            json!({ "public_key": encode_public_key(&X25519PublicKey::from_bytes([0; 32])) }),
        );
        let err = handler.handle(client.connection, event).await.unwrap_err();
        assert!(matches!(err, ChannelError::Crypto(_)));
        assert_eq!(
            client.inbox.recv().await.unwrap(),
            Event::message(names::ERROR, "Invalid client public key")
        );
        assert_eq!(
            handler.registry().state(client.connection).await,
            Some(SessionState::Connected)
        );

        // The client may start over with a proper key.
        key_exchange(&handler, &mut client).await;
    }

    #[tokio::test]
    async fn test_disconnect_discards_session() {
        let (transport, handler) = handler();
        let mut client = connect(&transport, &handler).await;
        key_exchange(&handler, &mut client).await;
        login(&handler, &mut client, "alice-token").await;

        handler.disconnect(client.connection).await;
        assert!(handler.registry().snapshot(client.connection).await.is_none());
        assert!(transport.group_members("user_1").await.is_empty());
        assert!(matches!(
            handler.reply(client.connection, "x", &json!(null)).await,
            Err(ChannelError::SecureChannelNotEstablished)
        ));
        assert_eq!(
            handler.emit_to_user(UserId(1), "x", &json!(null)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_expire_handshakes() {
        let transport = Arc::new(MemoryTransport::new());
        let handler = ChannelHandler::new(
            transport.clone(),
            Arc::new(StaticAuthenticator),
            ChannelConfig {
                handshake_timeout: Duration::ZERO,
                ..ChannelConfig::default()
            },
        );
        let stuck = connect(&transport, &handler).await;
        assert_eq!(handler.expire_handshakes().await, 1);
        assert!(handler.registry().snapshot(stuck.connection).await.is_none());
    }
}

//! Per-connection session state and the registry that owns it.
//!
//! ```text
//! CONNECTED -> KEY_EXCHANGING -> SESSION_ESTABLISHED -> AUTHENTICATED
//! ```
//!
//! Every connection has its own ephemeral key pair and transport key.
//! Handlers read a [`SessionSnapshot`] and never touch the map directly;
//! disconnect removes the record, dropping (and zeroizing) its keys.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use berryvault_core::{EncryptionKey, EphemeralKeyPair, UserId, X25519PublicKey};

use crate::error::{ChannelError, Result};
use crate::messages::{open_payload, seal_payload};

/// Key derivation context for channel transport keys.
pub const CHANNEL_KEY_CONTEXT: &str = "berryvault 2024 realtime channel transport key v1";

/// Identifies one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Connected,
    KeyExchanging,
    SessionEstablished,
    Authenticated,
}

impl SessionState {
    /// A transport key exists.
    pub fn is_established(self) -> bool {
        self >= SessionState::SessionEstablished
    }
}

/// The user bound to an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

struct SessionRecord {
    state: SessionState,
    keypair: Option<EphemeralKeyPair>,
    transport_key: Option<Arc<EncryptionKey>>,
    identity: Option<Identity>,
    connected_at: Instant,
}

/// A point-in-time copy of a session, safe to use after the registry lock
/// is released.
#[derive(Clone)]
pub struct SessionSnapshot {
    pub connection: ConnectionId,
    pub state: SessionState,
    pub identity: Option<Identity>,
    transport_key: Option<Arc<EncryptionKey>>,
}

impl SessionSnapshot {
    fn key(&self) -> Result<&EncryptionKey> {
        self.transport_key
            .as_deref()
            .ok_or(ChannelError::SecureChannelNotEstablished)
    }

    /// Encrypt a payload under this connection's transport key.
    pub fn encrypt(&self, payload: &serde_json::Value) -> Result<String> {
        seal_payload(self.key()?, payload)
    }

    /// Decrypt a payload sent by this connection's peer.
    pub fn decrypt(&self, encrypted: &str) -> Result<serde_json::Value> {
        open_payload(self.key()?, encrypted)
    }
}

impl fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("connection", &self.connection)
            .field("state", &self.state)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// All live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, SessionRecord>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection in CONNECTED.
    pub async fn connect(&self) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.write().await.insert(
            id,
            SessionRecord {
                state: SessionState::Connected,
                keypair: None,
                transport_key: None,
                identity: None,
                connected_at: Instant::now(),
            },
        );
        tracing::debug!(connection = %id, "connected");
        id
    }

    /// Generate a fresh key pair and return its public half.
    ///
    /// Allowed only before a transport key exists; calling it again while
    /// KEY_EXCHANGING replaces the pending key pair.
    pub async fn begin_key_exchange(&self, id: ConnectionId) -> Result<X25519PublicKey> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(&id)
            .ok_or(ChannelError::UnknownConnection(id))?;
        if record.state.is_established() {
            return Err(ChannelError::InvalidMessage(
                "key exchange already completed".into(),
            ));
        }
        let keypair = EphemeralKeyPair::generate();
        let public = keypair.public_key();
        record.keypair = Some(keypair);
        record.state = SessionState::KeyExchanging;
        Ok(public)
    }

    /// Finish the exchange with the peer's public key.
    pub async fn complete_key_exchange(
        &self,
        id: ConnectionId,
        peer: &X25519PublicKey,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(&id)
            .ok_or(ChannelError::SessionNotInitialized)?;
        if record.state != SessionState::KeyExchanging {
            return Err(ChannelError::SessionNotInitialized);
        }
        let keypair = record
            .keypair
            .take()
            .ok_or(ChannelError::SessionNotInitialized)?;
        let shared = match keypair.diffie_hellman(peer) {
            Ok(shared) => shared,
            Err(e) => {
                record.state = SessionState::Connected;
                tracing::warn!(connection = %id, error = %e, "rejected client public key");
                return Err(e.into());
            }
        };
        record.transport_key = Some(Arc::new(shared.derive_key(CHANNEL_KEY_CONTEXT)));
        record.state = SessionState::SessionEstablished;
        tracing::debug!(connection = %id, "session established");
        Ok(())
    }

    /// Bind an identity; requires an established session. Returns the
    /// identity it replaced, if the connection was already authenticated.
    pub async fn authenticate(
        &self,
        id: ConnectionId,
        identity: Identity,
    ) -> Result<Option<Identity>> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(&id)
            .ok_or(ChannelError::UnknownConnection(id))?;
        if !record.state.is_established() {
            return Err(ChannelError::SecureChannelNotEstablished);
        }
        tracing::info!(connection = %id, user = %identity.user_id, "connection authenticated");
        let previous = record.identity.replace(identity);
        record.state = SessionState::Authenticated;
        Ok(previous)
    }

    pub async fn snapshot(&self, id: ConnectionId) -> Option<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        sessions.get(&id).map(|record| SessionSnapshot {
            connection: id,
            state: record.state,
            identity: record.identity.clone(),
            transport_key: record.transport_key.clone(),
        })
    }

    pub async fn state(&self, id: ConnectionId) -> Option<SessionState> {
        self.sessions.read().await.get(&id).map(|r| r.state)
    }

    /// Authenticated connections of `user`.
    pub async fn connections_for(&self, user: UserId) -> Vec<ConnectionId> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<_> = sessions
            .iter()
            .filter(|(_, r)| r.identity.as_ref().map(|i| i.user_id) == Some(user))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Remove the connection and its key material.
    pub async fn disconnect(&self, id: ConnectionId) -> Option<Identity> {
        let record = self.sessions.write().await.remove(&id)?;
        match &record.identity {
            Some(identity) => {
                tracing::info!(connection = %id, user = %identity.user_id, "disconnected")
            }
            None => tracing::debug!(connection = %id, state = ?record.state, "disconnected"),
        }
        record.identity
    }

    /// Drop connections that have not finished key exchange within `timeout`.
    pub async fn expire_handshakes(&self, timeout: Duration) -> Vec<ConnectionId> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<_> = sessions
            .iter()
            .filter(|(_, r)| !r.state.is_established() && r.connected_at.elapsed() >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            sessions.remove(id);
            tracing::warn!(connection = %id, "handshake timed out");
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn establish(registry: &SessionRegistry) -> (ConnectionId, EncryptionKey) {
        let id = registry.connect().await;
        let server_public = registry.begin_key_exchange(id).await.unwrap();
        let client = EphemeralKeyPair::generate();
        let client_public = client.public_key();
        registry.complete_key_exchange(id, &client_public).await.unwrap();
        let key = client
            .diffie_hellman(&server_public)
            .unwrap()
            .derive_key(CHANNEL_KEY_CONTEXT);
        (id, key)
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let registry = SessionRegistry::new();
        let id = registry.connect().await;
        assert_eq!(registry.state(id).await, Some(SessionState::Connected));

        registry.begin_key_exchange(id).await.unwrap();
        assert_eq!(registry.state(id).await, Some(SessionState::KeyExchanging));

        let client = EphemeralKeyPair::generate();
        registry
            .complete_key_exchange(id, &client.public_key())
            .await
            .unwrap();
        assert_eq!(registry.state(id).await, Some(SessionState::SessionEstablished));

        registry
            .authenticate(
                id,
                Identity {
                    user_id: UserId(1),
                    username: "alice".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(registry.state(id).await, Some(SessionState::Authenticated));
    }

    #[tokio::test]
    async fn test_both_sides_derive_same_key() {
        let registry = SessionRegistry::new();
        let (id, client_key) = establish(&registry).await;
        let snapshot = registry.snapshot(id).await.unwrap();

        let sealed = snapshot.encrypt(&serde_json::json!({"ok": true})).unwrap();
        let value = open_payload(&client_key, &sealed).unwrap();
        assert_eq!(value, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_encrypt_before_establish_fails() {
        let registry = SessionRegistry::new();
        let id = registry.connect().await;
        registry.begin_key_exchange(id).await.unwrap();
        let snapshot = registry.snapshot(id).await.unwrap();
        assert!(matches!(
            snapshot.encrypt(&serde_json::json!(1)),
            Err(ChannelError::SecureChannelNotEstablished)
        ));
    }

    #[tokio::test]
    async fn test_public_key_without_exchange() {
        let registry = SessionRegistry::new();
        let id = registry.connect().await;
        let peer = EphemeralKeyPair::generate().public_key();
        assert!(matches!(
            registry.complete_key_exchange(id, &peer).await,
            Err(ChannelError::SessionNotInitialized)
        ));
        assert!(matches!(
            registry.complete_key_exchange(ConnectionId(999), &peer).await,
            Err(ChannelError::SessionNotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_authenticate_requires_session() {
        let registry = SessionRegistry::new();
        let id = registry.connect().await;
        let identity = Identity {
            user_id: UserId(1),
            username: "alice".into(),
        };
        assert!(matches!(
            registry.authenticate(id, identity).await,
            Err(ChannelError::SecureChannelNotEstablished)
        ));
        assert_eq!(registry.state(id).await, Some(SessionState::Connected));
    }

    #[tokio::test]
    async fn test_reauthenticate_returns_previous_identity() {
        let registry = SessionRegistry::new();
        let (id, _key) = establish(&registry).await;
        let alice = Identity {
            user_id: UserId(1),
            username: "alice".into(),
        };
        let bob = Identity {
            user_id: UserId(2),
            username: "bob".into(),
        };

        assert_eq!(registry.authenticate(id, alice.clone()).await.unwrap(), None);
        assert_eq!(registry.authenticate(id, bob).await.unwrap(), Some(alice));
        assert!(registry.connections_for(UserId(1)).await.is_empty());
        assert_eq!(registry.connections_for(UserId(2)).await, vec![id]);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let (a, key_a) = establish(&registry).await;
        let (b, _key_b) = establish(&registry).await;

        let sealed_for_b = registry
            .snapshot(b)
            .await
            .unwrap()
            .encrypt(&serde_json::json!("secret"))
            .unwrap();
        assert!(open_payload(&key_a, &sealed_for_b).is_err());
        assert!(registry.snapshot(a).await.unwrap().decrypt(&sealed_for_b).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_outlives_disconnect() {
        let registry = SessionRegistry::new();
        let (id, client_key) = establish(&registry).await;
        let snapshot = registry.snapshot(id).await.unwrap();

        registry.disconnect(id).await;
        assert!(registry.snapshot(id).await.is_none());
        assert!(registry.is_empty().await);

        // An in-flight call holding the snapshot still completes.
        let sealed = snapshot.encrypt(&serde_json::json!("late")).unwrap();
        assert_eq!(open_payload(&client_key, &sealed).unwrap(), "late");
    }

    #[tokio::test]
    async fn test_no_rekey_after_establish() {
        let registry = SessionRegistry::new();
        let (id, _) = establish(&registry).await;
        assert!(registry.begin_key_exchange(id).await.is_err());
    }

    #[tokio::test]
    async fn test_expire_handshakes() {
        let registry = SessionRegistry::new();
        let pending = registry.connect().await;
        let (done, _) = establish(&registry).await;

        let expired = registry.expire_handshakes(Duration::ZERO).await;
        assert_eq!(expired, vec![pending]);
        assert!(registry.snapshot(done).await.is_some());
        assert_eq!(registry.len().await, 1);
    }
}

//! Transport abstraction for the channel.
//!
//! The transport delivers events to connections and keeps delivery groups
//! (`user_<id>`). Implementations may sit on WebSockets or anything else.

use async_trait::async_trait;

use berryvault_core::UserId;

use crate::error::Result;
use crate::messages::Event;
use crate::session::ConnectionId;

/// Delivery group of one user's connections.
pub fn user_group(user: UserId) -> String {
    format!("user_{}", user.0)
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Send an event to one connection.
    async fn emit(&self, connection: ConnectionId, event: Event) -> Result<()>;

    /// Add a connection to a delivery group.
    async fn join_group(&self, connection: ConnectionId, group: &str) -> Result<()>;

    /// Remove a connection from one delivery group.
    async fn leave_group(&self, connection: ConnectionId, group: &str);

    /// Remove a connection from every group and stop delivering to it.
    async fn detach(&self, connection: ConnectionId);

    /// Connections currently in `group`.
    async fn group_members(&self, group: &str) -> Vec<ConnectionId>;
}

/// An in-memory transport for tests and embedding.
pub mod memory {
    use super::*;
    use std::collections::{BTreeSet, HashMap};

    use tokio::sync::{mpsc, RwLock};

    use crate::error::ChannelError;

    /// Routes events to per-connection channels.
    #[derive(Default)]
    pub struct MemoryTransport {
        senders: RwLock<HashMap<ConnectionId, mpsc::Sender<Event>>>,
        groups: RwLock<HashMap<String, BTreeSet<ConnectionId>>>,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Start delivering to `connection`; returns its inbox.
        pub async fn attach(&self, connection: ConnectionId) -> mpsc::Receiver<Event> {
            let (tx, rx) = mpsc::channel(256);
            self.senders.write().await.insert(connection, tx);
            rx
        }
    }

    #[async_trait]
    impl ChannelTransport for MemoryTransport {
        async fn emit(&self, connection: ConnectionId, event: Event) -> Result<()> {
            let sender = self
                .senders
                .read()
                .await
                .get(&connection)
                .cloned()
                .ok_or_else(|| ChannelError::TransportError(format!("{} not attached", connection)))?;
            sender
                .send(event)
                .await
                .map_err(|_| ChannelError::TransportError("connection closed".into()))
        }

        async fn join_group(&self, connection: ConnectionId, group: &str) -> Result<()> {
            if !self.senders.read().await.contains_key(&connection) {
                return Err(ChannelError::TransportError(format!(
                    "{} not attached",
                    connection
                )));
            }
            self.groups
                .write()
                .await
                .entry(group.to_string())
                .or_default()
                .insert(connection);
            Ok(())
        }

        async fn leave_group(&self, connection: ConnectionId, group: &str) {
            let mut groups = self.groups.write().await;
            if let Some(members) = groups.get_mut(group) {
                members.remove(&connection);
                if members.is_empty() {
                    groups.remove(group);
                }
            }
        }

        async fn detach(&self, connection: ConnectionId) {
            self.senders.write().await.remove(&connection);
            let mut groups = self.groups.write().await;
            for members in groups.values_mut() {
                members.remove(&connection);
            }
            groups.retain(|_, members| !members.is_empty());
        }

        async fn group_members(&self, group: &str) -> Vec<ConnectionId> {
            self.groups
                .read()
                .await
                .get(group)
                .map(|members| members.iter().copied().collect())
                .unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTransport;
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_emit_and_groups() {
        let transport = MemoryTransport::new();
        let a = ConnectionId(1);
        let b = ConnectionId(2);
        let mut rx_a = transport.attach(a).await;
        let _rx_b = transport.attach(b).await;

        transport.emit(a, Event::bare("ping")).await.unwrap();
        assert_eq!(rx_a.recv().await.unwrap(), Event::bare("ping"));

        let group = user_group(UserId(5));
        assert_eq!(group, "user_5");
        transport.join_group(a, &group).await.unwrap();
        transport.join_group(b, &group).await.unwrap();
        assert_eq!(transport.group_members(&group).await, vec![a, b]);

        transport.detach(a).await;
        assert_eq!(transport.group_members(&group).await, vec![b]);
        assert!(transport.emit(a, Event::bare("gone")).await.is_err());
    }

    #[tokio::test]
    async fn test_leave_group() {
        let transport = MemoryTransport::new();
        let a = ConnectionId(1);
        let _rx = transport.attach(a).await;
        transport.join_group(a, "user_1").await.unwrap();
        transport.join_group(a, "user_2").await.unwrap();

        transport.leave_group(a, "user_1").await;
        assert!(transport.group_members("user_1").await.is_empty());
        assert_eq!(transport.group_members("user_2").await, vec![a]);
        transport.leave_group(a, "user_3").await;
    }

    #[tokio::test]
    async fn test_full_inbox_does_not_block_attach() {
        let transport = Arc::new(MemoryTransport::new());
        let a = ConnectionId(1);
        let _rx_a = transport.attach(a).await;
        for _ in 0..256 {
            transport.emit(a, Event::bare("fill")).await.unwrap();
        }

        // This send waits for room in a's inbox.
        let pending = tokio::spawn({
            let transport = transport.clone();
            async move { transport.emit(a, Event::bare("overflow")).await }
        });
        tokio::task::yield_now().await;

        let attached =
            tokio::time::timeout(Duration::from_secs(1), transport.attach(ConnectionId(2))).await;
        assert!(attached.is_ok());
        pending.abort();
    }

    #[tokio::test]
    async fn test_join_requires_attach() {
        let transport = MemoryTransport::new();
        assert!(transport.join_group(ConnectionId(9), "user_1").await.is_err());
    }
}

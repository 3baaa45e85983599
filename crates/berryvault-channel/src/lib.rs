//! # BerryVault Channel
//!
//! End-to-end encryption for the real-time channel, independent of TLS.
//!
//! ## Overview
//!
//! Each connection runs an X25519 key exchange, derives its own transport
//! key, and then authenticates with a bearer token. From then on every
//! application event carries a single `encrypted` field sealed under that
//! connection's key. Nothing is shared between connections and nothing
//! survives a disconnect.
//!
//! ## Message Flow
//!
//! ```text
//! Client                                    Server
//!   |-- initiate_key_exchange -------------->|
//!   |<------------- server_public_key -------|
//!   |-- client_public_key ------------------>|
//!   |<------------- key_exchange_complete ---|
//!   |-- authenticate {token} --------------->|
//!   |<------------- authenticated -----------|   joins user_<id>
//!   |-- <event> {encrypted} ---------------->|
//!   |<------------- <event> {encrypted} -----|
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use berryvault_channel::{ChannelConfig, ChannelHandler, Event, MemoryTransport};
//! # use berryvault_channel::{Authenticator, Identity};
//! # struct Jwt;
//! # #[async_trait::async_trait]
//! # impl Authenticator for Jwt {
//! #     async fn authenticate(&self, _: &str) -> Result<Identity, String> { Err("".into()) }
//! # }
//!
//! async fn example() {
//!     let transport = Arc::new(MemoryTransport::new());
//!     let handler = ChannelHandler::new(transport.clone(), Arc::new(Jwt), ChannelConfig::default());
//!
//!     let conn = handler.connect().await;
//!     let _inbox = transport.attach(conn).await;
//!     handler.handle(conn, Event::bare("initiate_key_exchange")).await.unwrap();
//! }
//! ```

pub mod error;
pub mod handler;
pub mod messages;
pub mod session;
pub mod transport;

pub use error::{ChannelError, Result};
pub use handler::{Authenticator, ChannelConfig, ChannelHandler, Inbound};
pub use messages::{
    decode_public_key, encode_public_key, names, open_payload, seal_payload, Event,
};
pub use session::{
    ConnectionId, Identity, SessionRegistry, SessionSnapshot, SessionState, CHANNEL_KEY_CONTEXT,
};
pub use transport::{memory::MemoryTransport, user_group, ChannelTransport};

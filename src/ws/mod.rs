//! Real-time room stream client.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager (manager.rs)
//!   owns: session params, retry counter, reconnect timer, active link
//!   emits: WsState snapshots over a watch channel
//!        │
//!        ▼
//! Transport (transport.rs)
//!   opens one bidirectional text stream per attempt
//!   production impl: WsTransport on tokio-tungstenite
//! ```
//!
//! Consumers hold a [`ConnectionManager`] handle for control
//! (`connect` / `disconnect` / `send`) and a `watch::Receiver<WsState>` for
//! observation. No operation fails synchronously; every failure shows up in
//! the state snapshot instead.

mod connection;
mod manager;
mod transport;

pub use connection::{ConnectionState, ManagerConfig, ReconnectConfig, SessionParams, WsState};
pub use manager::ConnectionManager;
pub use transport::{Transport, TransportEvent, TransportLink, WsTransport};

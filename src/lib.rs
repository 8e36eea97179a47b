//! Client library for the websoc chat-room service.
//!
//! This crate covers the two halves of the client:
//! - [`ApiClient`]: cookie-authenticated REST calls (login/signup, room CRUD)
//! - [`ws`]: the real-time room stream, managed by a [`ConnectionManager`]
//!   that opens, monitors, and automatically recovers one connection per
//!   active room session

pub mod api_client;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod validation;
pub mod ws;

pub use api_client::ApiClient;
pub use config::ClientConfig;
pub use error::ApiError;
pub use models::{
    CreateRoomRequest, LoginCredentials, Message, Room, SignupCredentials, User,
};
pub use ws::{ConnectionManager, ConnectionState, ManagerConfig, ReconnectConfig, WsState};

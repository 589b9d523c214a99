pub mod auth;
pub mod bus;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod redis_client;
pub mod registry;
pub mod services;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod websocket;

pub use config::Config;
pub use error::{RelayError, RelayResult};
pub use services::{FanoutRouter, PresenceCoordinator, SessionManager};
pub use websocket::{ConnectionId, ConnectionManager, ServerMessage, UserId};

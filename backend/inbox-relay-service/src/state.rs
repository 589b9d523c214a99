use crate::{
    config::{Config, WebSocketConfig},
    services::SessionManager,
    websocket::ConnectionManager,
};
use std::sync::Arc;

/// Shared handles passed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub connections: ConnectionManager,
    pub websocket: WebSocketConfig,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(sessions: SessionManager, config: Arc<Config>) -> Self {
        Self {
            connections: sessions.connections().clone(),
            websocket: config.websocket.clone(),
            sessions,
            config,
        }
    }
}

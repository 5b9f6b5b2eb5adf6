//! Application state

use std::sync::Arc;

use crate::config::Config;
use crate::websocket::WebSocketState;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ws_state: WebSocketState,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let ws_state = WebSocketState::new(&config);
        Self {
            config: Arc::new(config),
            ws_state,
        }
    }
}

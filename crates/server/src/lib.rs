//! SyncBoard server library
//!
//! Room-based collaborative whiteboard served over WebSockets.

pub mod config;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use state::AppState;

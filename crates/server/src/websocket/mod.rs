//! WebSocket support for real-time collaboration
//!
//! Every board lives in a room. Members connect over a WebSocket, receive the
//! room's current state and then exchange board edits and cursor positions
//! with everyone else in the same room.
//!
//! # Architecture
//!
//! - **Connection**: Outbound queue for one WebSocket
//! - **Room**: Members, board objects and cursors plus fan-out
//! - **Store**: Process-wide room table; all mutation is serialized through it
//! - **Router**: Role checks and per-message handlers
//! - **Resolver**: Deferred, last-write-wins object moves
//! - **State**: Global WebSocket state shared across all connections
//! - **Handler**: Axum WebSocket route handler and session lifecycle
//! - **Events**: Type-safe message definitions for client/server communication

pub mod connection;
pub mod events;
pub mod handler;
pub mod resolver;
pub mod room;
pub mod router;
pub mod state;
pub mod store;

pub use handler::ws_handler;
pub use state::WebSocketState;

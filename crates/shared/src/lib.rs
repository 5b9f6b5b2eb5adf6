//! SyncBoard Shared Types and Utilities
//!
//! Board data model, id generation and the error taxonomy shared by the
//! SyncBoard server crates.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;

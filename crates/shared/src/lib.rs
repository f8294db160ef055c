//! Shared types for the chatsync engine and the chat REST/realtime surface.

pub mod models;
pub mod protocol;
pub mod error;

pub use models::*;
pub use protocol::*;
pub use error::*;

//! In-memory conversation session
//!
//! Append-only message log plus the single "awaiting reply" flag and the
//! conversation identity bound to it.

mod message;
mod store;

pub use message::{DeliveryStatus, Message, Role};
pub use store::{MessageView, Session};

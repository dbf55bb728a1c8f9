//! Node runtime: one worker thread per node, fed by a transport mailbox.
//!
//! A node owns a bounded inbox of [`NodeMessage`]s. Its transport endpoint
//! callback decodes incoming frames and pushes them onto the inbox; the
//! worker thread pops and dispatches until the inbox is closed. Malformed
//! frames are logged and dropped, never fatal.

mod message;
mod node;

pub use message::{decode_transaction_frame, encode_transaction_frame, NodeMessage, NodeMessageKind};
pub use node::Node;

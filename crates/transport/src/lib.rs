//! Simulated transport delivering bytes between named mailboxes.
//!
//! Senders enqueue; a fixed worker pool services a deadline-ordered heap and
//! invokes the destination's delivery callback once the simulated latency has
//! elapsed. Loss is a single seeded RNG draw per send, so runs with the same
//! seed observe the same drop pattern.
//!
//! # Ordering
//!
//! The heap is keyed (deadline, insertion sequence): with equal latency,
//! tasks pop in send order. Popped tasks are then funneled through a
//! per-destination serial queue — exactly one worker drains any given
//! destination at a time — so delivery order to one mailbox always matches
//! pop order, while distinct mailboxes deliver concurrently.
//!
//! # Shutdown
//!
//! Cooperative: `shutdown` clears the running flag, discards tasks still in
//! the heap, and joins the workers. Tasks already handed to a destination
//! queue finish delivering first.

mod transport;

pub use transport::{NetworkParams, Transport, DEFAULT_WORKER_COUNT};

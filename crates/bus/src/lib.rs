//! In-process coordination primitives.
//!
//! - [`ConcurrentQueue`]: bounded MPMC queue with close semantics. Worker
//!   loops block in [`ConcurrentQueue::wait_pop`] and treat the `Cancelled`
//!   error raised by a closed-and-empty queue as a clean exit signal.
//! - [`EventBus`]: synchronous publish/subscribe keyed by [`EventKind`].
//!   Handlers run on the publishing thread and must only do O(1) work,
//!   typically pushing into a subscriber-owned queue.

mod bus;
mod queue;

pub use bus::{Event, EventBus, EventKind};
pub use queue::ConcurrentQueue;

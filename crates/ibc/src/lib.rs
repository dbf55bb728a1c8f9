//! IBC channel and routing state machines.
//!
//! [`IbcChannel`] is the per-(chain, port, channel) sequence authority:
//! packets are minted with strictly increasing sequences and accepted only in
//! exact order. [`Router`] is the flat registry of bound (port, channel) keys
//! a chain uses to validate channel operations.
//!
//! Channels carry no lock of their own: each one is owned by its chain's
//! channel directory and mutated only under the directory's mutex.

mod channel;
mod router;

pub use channel::{ChannelState, IbcChannel};
pub use router::Router;

//! Core types for the chainmesh federation simulator.
//!
//! This crate provides the foundational vocabulary shared by every other
//! crate in the workspace:
//!
//! - [`Error`] / [`Result`]: the uniform status taxonomy
//! - [`Transaction`]: the unit of intra-chain traffic
//! - [`Block`] / [`BlockHeader`]: ledger primitives
//! - [`IbcPacket`]: the cross-chain packet, with its pipe-delimited wire codec
//!
//! Nothing in here owns a thread or a lock; concurrency lives in the crates
//! that compose these types.

mod block;
mod error;
mod packet;
mod transaction;

pub use block::{Block, BlockHeader};
pub use error::{Error, ErrorKind, Result};
pub use packet::{ChannelId, IbcPacket, PacketType, PortId};
pub use transaction::{next_tx_id, Transaction, TxType};

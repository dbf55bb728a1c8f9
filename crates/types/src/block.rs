//! Ledger primitives shared by all consensus engines.

use crate::Transaction;
use std::time::SystemTime;

/// Block header. `prev_hash` and `state_root` are opaque strings produced by
/// the consensus engines; genesis carries empty hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: u64,
    pub prev_hash: String,
    pub timestamp: SystemTime,
    pub state_root: String,
}

/// A block: header, ordered transactions, and a consensus-specific witness
/// serialized into `extra` (PoW nonce, PoS/PBFT tags).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
    pub extra: String,
}

impl Block {
    /// The height-0 block every chain starts from.
    pub fn genesis(chain_id: impl Into<String>) -> Block {
        Block {
            header: BlockHeader {
                chain_id: chain_id.into(),
                height: 0,
                prev_hash: String::new(),
                timestamp: SystemTime::UNIX_EPOCH,
                state_root: String::new(),
            },
            txs: Vec::new(),
            extra: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_shape() {
        let g = Block::genesis("chain-A");
        assert_eq!(g.header.chain_id, "chain-A");
        assert_eq!(g.header.height, 0);
        assert!(g.header.prev_hash.is_empty());
        assert!(g.header.state_root.is_empty());
        assert!(g.txs.is_empty());
    }
}

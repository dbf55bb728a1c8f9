//! Pluggable consensus engines.
//!
//! All engines implement [`ConsensusEngine`]: `propose` builds a candidate
//! block from mempool transactions, `on_remote_block` folds in a block heard
//! from another participant, `is_final` reports finality under the engine's
//! rules. The engines are simplified models whose job is to exercise the
//! runtime, not to be cryptographically sound: hashes come from the standard
//! library's `DefaultHasher` and remote participation is synthesized.
//!
//! Each engine guards its entire state with one internal mutex and is safe to
//! call from any thread.

mod pbft;
mod pos;
mod pow;

pub use pbft::PbftEngine;
pub use pos::PosEngine;
pub use pow::PowEngine;

use chainmesh_telemetry::MetricsSink;
use chainmesh_types::{Block, BlockHeader, Result, Transaction};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::SystemTime;

/// Which engine a chain runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusKind {
    PoW,
    PoS,
    Pbft,
}

/// Per-chain knobs consumed by [`build_engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub kind: ConsensusKind,
    /// Leading hex zeros required of a PoW block hash.
    pub pow_difficulty: u32,
    /// Validator-set size for the PoS quorum.
    pub validator_set_size: usize,
    /// Tolerated faults `f` for the PBFT quorum.
    pub pbft_fault_tolerance: usize,
}

/// Caller identity and position handed to `propose`.
#[derive(Debug, Clone)]
pub struct ConsensusContext {
    pub chain_id: String,
    pub node_id: String,
    pub current_height: u64,
}

/// The capability set every engine provides.
pub trait ConsensusEngine: Send + Sync {
    /// Build a block at `prev.height + 1` from `txs`. May fail (`ConsensusFault`)
    /// if the engine's search is exhausted.
    fn propose(&self, ctx: &ConsensusContext, txs: &[Transaction], prev: &Block) -> Result<Block>;

    /// Fold in a block received from another participant.
    fn on_remote_block(&self, blk: &Block) -> Result<()>;

    /// Whether `blk` has been finalized under this engine's rules.
    fn is_final(&self, blk: &Block) -> bool;

    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;
}

/// Instantiate the engine selected by `config`.
pub fn build_engine(config: &EngineConfig, metrics: Arc<MetricsSink>) -> Box<dyn ConsensusEngine> {
    match config.kind {
        ConsensusKind::PoW => Box::new(PowEngine::new(config.pow_difficulty, metrics)),
        ConsensusKind::PoS => Box::new(PosEngine::new(config.validator_set_size, metrics)),
        ConsensusKind::Pbft => Box::new(PbftEngine::new(config.pbft_fault_tolerance, metrics)),
    }
}

pub(crate) fn hash_str(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic state root: XOR fold of per-transaction hashes over
/// (from, to, payload).
pub(crate) fn state_root(txs: &[Transaction]) -> String {
    let mut acc = 0u64;
    for tx in txs {
        acc ^= hash_str(&format!("{}{}{}", tx.from, tx.to, tx.payload));
    }
    acc.to_string()
}

/// Header shared by every engine's `propose`: the new block chains onto the
/// previous block's state root.
pub(crate) fn next_header(ctx: &ConsensusContext, txs: &[Transaction], prev: &Block) -> BlockHeader {
    BlockHeader {
        chain_id: ctx.chain_id.clone(),
        height: prev.header.height + 1,
        prev_hash: prev.header.state_root.clone(),
        timestamp: SystemTime::now(),
        state_root: state_root(txs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmesh_types::TxType;

    fn tx(from: &str, payload: &str) -> Transaction {
        Transaction {
            from: from.into(),
            to: "dst".into(),
            payload: payload.into(),
            tx_type: TxType::Regular,
            tx_id: "tx_0_0".into(),
        }
    }

    #[test]
    fn test_state_root_is_order_independent_xor() {
        let a = tx("a", "1");
        let b = tx("b", "2");
        let forward = state_root(&[a.clone(), b.clone()]);
        let backward = state_root(&[b, a]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_state_root_changes_with_content() {
        assert_ne!(state_root(&[tx("a", "1")]), state_root(&[tx("a", "2")]));
        assert_eq!(state_root(&[]), "0");
    }

    #[test]
    fn test_build_engine_dispatch() {
        let metrics = Arc::new(MetricsSink::disabled());
        let mut config = EngineConfig {
            kind: ConsensusKind::PoW,
            pow_difficulty: 1,
            validator_set_size: 4,
            pbft_fault_tolerance: 1,
        };
        assert_eq!(build_engine(&config, Arc::clone(&metrics)).name(), "PoW");
        config.kind = ConsensusKind::PoS;
        assert_eq!(build_engine(&config, Arc::clone(&metrics)).name(), "PoS");
        config.kind = ConsensusKind::Pbft;
        assert_eq!(build_engine(&config, metrics).name(), "PBFT");
    }
}

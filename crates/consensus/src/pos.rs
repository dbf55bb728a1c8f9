//! Simplified proof-of-stake engine.
//!
//! Every proposal contributes the proposer's signature; remote blocks
//! contribute a synthetic "remote" signature. A block finalizes once its
//! signature set reaches the quorum of two-thirds plus one of the validator
//! set.

use crate::{next_header, ConsensusContext, ConsensusEngine};
use chainmesh_telemetry::MetricsSink;
use chainmesh_types::{Block, Result, Transaction};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

struct PosState {
    /// Block id -> validator ids that signed it.
    signatures: HashMap<String, HashSet<String>>,
    finalized: HashSet<String>,
}

pub struct PosEngine {
    validators: usize,
    state: Mutex<PosState>,
    metrics: Arc<MetricsSink>,
}

impl PosEngine {
    pub fn new(validator_set_size: usize, metrics: Arc<MetricsSink>) -> PosEngine {
        PosEngine {
            validators: validator_set_size,
            state: Mutex::new(PosState {
                signatures: HashMap::new(),
                finalized: HashSet::new(),
            }),
            metrics,
        }
    }

    pub fn quorum(&self) -> usize {
        self.validators * 2 / 3 + 1
    }

    fn block_id(blk: &Block) -> String {
        format!(
            "{}:{}:{}",
            blk.header.chain_id, blk.header.height, blk.header.prev_hash
        )
    }

    fn sign(&self, state: &mut PosState, block_id: String, signer: String) {
        let signatures = state.signatures.entry(block_id.clone()).or_default();
        signatures.insert(signer);
        if signatures.len() >= self.quorum() {
            state.finalized.insert(block_id);
            self.metrics.counter("block_finalized_PoS");
        }
    }
}

impl ConsensusEngine for PosEngine {
    fn propose(&self, ctx: &ConsensusContext, txs: &[Transaction], prev: &Block) -> Result<Block> {
        let mut state = self.state.lock().unwrap();
        let block = Block {
            header: next_header(ctx, txs, prev),
            txs: txs.to_vec(),
            extra: format!("PoS:proposed:{}", ctx.node_id),
        };
        self.metrics.counter("block_proposed_PoS");
        self.sign(&mut state, Self::block_id(&block), ctx.node_id.clone());
        Ok(block)
    }

    fn on_remote_block(&self, blk: &Block) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.metrics.counter("block_received_PoS");
        self.sign(&mut state, Self::block_id(blk), "remote".to_string());
        Ok(())
    }

    fn is_final(&self, blk: &Block) -> bool {
        self.state
            .lock()
            .unwrap()
            .finalized
            .contains(&Self::block_id(blk))
    }

    fn name(&self) -> &'static str {
        "PoS"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(node: &str) -> ConsensusContext {
        ConsensusContext {
            chain_id: "chain-B".into(),
            node_id: node.into(),
            current_height: 0,
        }
    }

    #[test]
    fn test_quorum_formula() {
        let metrics = Arc::new(MetricsSink::disabled());
        assert_eq!(PosEngine::new(4, Arc::clone(&metrics)).quorum(), 3);
        assert_eq!(PosEngine::new(3, Arc::clone(&metrics)).quorum(), 3);
        assert_eq!(PosEngine::new(7, metrics).quorum(), 5);
    }

    #[test]
    fn test_finalizes_only_at_quorum() {
        // N = 4 -> quorum 3: two proposers plus one remote signature.
        let engine = PosEngine::new(4, Arc::new(MetricsSink::disabled()));
        let prev = Block::genesis("chain-B");

        let block = engine.propose(&ctx("node-0"), &[], &prev).unwrap();
        assert!(!engine.is_final(&block));

        // Same (height, prevHash) from another proposer: same identity.
        let again = engine.propose(&ctx("node-1"), &[], &prev).unwrap();
        assert!(!engine.is_final(&again));

        engine.on_remote_block(&block).unwrap();
        assert!(engine.is_final(&block));
    }

    #[test]
    fn test_duplicate_signatures_do_not_count_twice() {
        let engine = PosEngine::new(4, Arc::new(MetricsSink::disabled()));
        let prev = Block::genesis("chain-B");
        let block = engine.propose(&ctx("node-0"), &[], &prev).unwrap();
        // Re-proposing from the same node and repeated remote votes only add
        // two distinct signers.
        engine.propose(&ctx("node-0"), &[], &prev).unwrap();
        engine.on_remote_block(&block).unwrap();
        engine.on_remote_block(&block).unwrap();
        assert!(!engine.is_final(&block));
    }
}

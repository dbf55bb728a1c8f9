//! Simplified PBFT engine.
//!
//! Prepare and commit vote sets per block identity; a block finalizes once
//! commits reach the quorum `2f + 1`. Both local proposals and remote blocks
//! contribute one prepare and one commit vote.

use crate::{next_header, ConsensusContext, ConsensusEngine};
use chainmesh_telemetry::MetricsSink;
use chainmesh_types::{Block, Result, Transaction};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

struct PbftState {
    prepare_votes: HashMap<String, HashSet<String>>,
    commit_votes: HashMap<String, HashSet<String>>,
    finalized: HashSet<String>,
}

pub struct PbftEngine {
    fault_tolerance: usize,
    state: Mutex<PbftState>,
    metrics: Arc<MetricsSink>,
}

impl PbftEngine {
    pub fn new(fault_tolerance: usize, metrics: Arc<MetricsSink>) -> PbftEngine {
        PbftEngine {
            fault_tolerance,
            state: Mutex::new(PbftState {
                prepare_votes: HashMap::new(),
                commit_votes: HashMap::new(),
                finalized: HashSet::new(),
            }),
            metrics,
        }
    }

    pub fn quorum(&self) -> usize {
        2 * self.fault_tolerance + 1
    }

    fn block_id(blk: &Block) -> String {
        format!(
            "{}:{}:{}",
            blk.header.chain_id, blk.header.height, blk.header.prev_hash
        )
    }

    fn vote(&self, state: &mut PbftState, block_id: String, voter: String) {
        state
            .prepare_votes
            .entry(block_id.clone())
            .or_default()
            .insert(voter.clone());
        let commits = state.commit_votes.entry(block_id.clone()).or_default();
        commits.insert(voter);
        if commits.len() >= self.quorum() {
            state.finalized.insert(block_id);
            self.metrics.counter("block_finalized_PBFT");
        }
    }
}

impl ConsensusEngine for PbftEngine {
    fn propose(&self, ctx: &ConsensusContext, txs: &[Transaction], prev: &Block) -> Result<Block> {
        let mut state = self.state.lock().unwrap();
        let block = Block {
            header: next_header(ctx, txs, prev),
            txs: txs.to_vec(),
            extra: "PBFT:proposed".to_string(),
        };
        self.metrics.counter("block_proposed_PBFT");
        self.vote(&mut state, Self::block_id(&block), ctx.node_id.clone());
        Ok(block)
    }

    fn on_remote_block(&self, blk: &Block) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.metrics.counter("block_received_PBFT");
        self.vote(&mut state, Self::block_id(blk), "remote".to_string());
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
        "PBFT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(node: &str) -> ConsensusContext {
        ConsensusContext {
            chain_id: "chain-C".into(),
            node_id: node.into(),
            current_height: 0,
        }
    }

    #[test]
    fn test_quorum_is_two_f_plus_one() {
        let metrics = Arc::new(MetricsSink::disabled());
        assert_eq!(PbftEngine::new(1, Arc::clone(&metrics)).quorum(), 3);
        assert_eq!(PbftEngine::new(2, metrics).quorum(), 5);
    }

    #[test]
    fn test_two_proposers_plus_remote_finalize_with_f_one() {
        // f = 1 -> quorum 3. Proposals from node-0 and node-1 for the same
        // (height, prevHash) plus one remote vote reach it.
        let engine = PbftEngine::new(1, Arc::new(MetricsSink::disabled()));
        let prev = Block::genesis("chain-C");

        let block = engine.propose(&ctx("node-0"), &[], &prev).unwrap();
        assert!(!engine.is_final(&block));
        engine.propose(&ctx("node-1"), &[], &prev).unwrap();
        assert!(!engine.is_final(&block));
        engine.on_remote_block(&block).unwrap();
        assert!(engine.is_final(&block));
    }

    #[test]
    fn test_commit_votes_deduplicate_by_voter() {
        let engine = PbftEngine::new(1, Arc::new(MetricsSink::disabled()));
        let prev = Block::genesis("chain-C");
        let block = engine.propose(&ctx("node-0"), &[], &prev).unwrap();
        for _ in 0..5 {
            engine.on_remote_block(&block).unwrap();
        }
        // node-0 + "remote" = 2 distinct voters < quorum 3.
        assert!(!engine.is_final(&block));
    }
}

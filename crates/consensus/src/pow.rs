//! Simplified proof-of-work engine.
//!
//! `propose` searches for a nonce whose block hash (rendered as 16 hex
//! characters) starts with `difficulty` zeros, storing the winning nonce in
//! `extra`. The search is capped so a hostile difficulty cannot hang the
//! simulation.

use crate::{hash_str, next_header, ConsensusContext, ConsensusEngine};
use chainmesh_telemetry::MetricsSink;
use chainmesh_types::{Block, Error, Result, Transaction};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Nonce search bound; exhausting it fails the proposal with `ConsensusFault`.
const MAX_NONCE_SEARCH: u64 = 1_000_000;

pub struct PowEngine {
    difficulty: u32,
    mined: Mutex<HashSet<String>>,
    metrics: Arc<MetricsSink>,
}

impl PowEngine {
    pub fn new(difficulty: u32, metrics: Arc<MetricsSink>) -> PowEngine {
        PowEngine {
            difficulty,
            mined: Mutex::new(HashSet::new()),
            metrics,
        }
    }

    /// Block identity including the witness nonce:
    /// `chain:height:prevHash:nonce`.
    fn block_id(blk: &Block, nonce: u64) -> String {
        format!(
            "{}:{}:{}:{}",
            blk.header.chain_id, blk.header.height, blk.header.prev_hash, nonce
        )
    }

    /// Render the block/nonce hash as a 16-character hex string.
    fn block_hash(blk: &Block, nonce: u64) -> String {
        let h = hash_str(&format!(
            "{}{}{}{}{}",
            blk.header.chain_id, blk.header.height, blk.header.prev_hash, blk.header.state_root, nonce
        ));
        format!("{:016x}", h)
    }

    fn has_leading_zeros(hash: &str, zeros: u32) -> bool {
        hash.len() >= zeros as usize && hash.bytes().take(zeros as usize).all(|b| b == b'0')
    }
}

impl ConsensusEngine for PowEngine {
    fn propose(&self, ctx: &ConsensusContext, txs: &[Transaction], prev: &Block) -> Result<Block> {
        let mut mined = self.mined.lock().unwrap();

        let mut block = Block {
            header: next_header(ctx, txs, prev),
            txs: txs.to_vec(),
            extra: String::new(),
        };
        self.metrics.counter("block_proposed_PoW");

        let mut nonce = 0u64;
        loop {
            if Self::has_leading_zeros(&Self::block_hash(&block, nonce), self.difficulty) {
                break;
            }
            nonce += 1;
            if nonce > MAX_NONCE_SEARCH {
                return Err(Error::consensus_fault("PoW nonce search exhausted"));
            }
        }

        block.extra = nonce.to_string();
        mined.insert(Self::block_id(&block, nonce));
        self.metrics.counter("block_finalized_PoW");
        Ok(block)
    }

    fn on_remote_block(&self, blk: &Block) -> Result<()> {
        let mut mined = self.mined.lock().unwrap();
        self.metrics.counter("block_received_PoW");
        let nonce: u64 = blk
            .extra
            .parse()
            .map_err(|_| Error::invalid_state("PoW: invalid nonce in extra"))?;
        if !Self::has_leading_zeros(&Self::block_hash(blk, nonce), self.difficulty) {
            return Err(Error::consensus_fault("PoW: invalid proof of work"));
        }
        mined.insert(Self::block_id(blk, nonce));
        self.metrics.counter("block_finalized_PoW");
        Ok(())
    }

    fn is_final(&self, blk: &Block) -> bool {
        let Ok(nonce) = blk.extra.parse::<u64>() else {
            return false;
        };
        self.mined.lock().unwrap().contains(&Self::block_id(blk, nonce))
    }

    fn name(&self) -> &'static str {
        "PoW"
    }
}

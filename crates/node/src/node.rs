//! Thread-per-node dispatch loop.

use crate::{decode_transaction_frame, encode_transaction_frame, NodeMessage, NodeMessageKind};
use chainmesh_bus::{ConcurrentQueue, Event, EventBus, EventKind};
use chainmesh_chain::Blockchain;
use chainmesh_consensus::{ConsensusContext, ConsensusEngine};
use chainmesh_telemetry::{EventJournal, MetricsSink, TxEvent};
use chainmesh_transport::Transport;
use chainmesh_types::{Block, Error, IbcPacket, PacketType, Result, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Inbox capacity; pushes from the transport callback block once full.
const INBOX_CAPACITY: usize = 1024;

/// Mempool transactions drained into one proposed block.
const MAX_BLOCK_TXS: usize = 100;

struct NodeInner {
    node_id: String,
    address: String,
    chain: Arc<Blockchain>,
    consensus: Box<dyn ConsensusEngine>,
    transport: Arc<Transport>,
    bus: Arc<EventBus>,
    inbox: ConcurrentQueue<NodeMessage>,
    running: AtomicBool,
    journal: Arc<EventJournal>,
    metrics: Arc<MetricsSink>,
}

/// A networked node driving one chain's consensus engine.
///
/// Construction registers the transport endpoint `"<chainId>:<nodeId>"`;
/// dropping the node unregisters it. `start`/`stop` manage the worker thread.
pub struct Node {
    inner: Arc<NodeInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        chain: Arc<Blockchain>,
        consensus: Box<dyn ConsensusEngine>,
        transport: Arc<Transport>,
        bus: Arc<EventBus>,
        journal: Arc<EventJournal>,
        metrics: Arc<MetricsSink>,
    ) -> Result<Node> {
        let node_id = node_id.into();
        let address = format!("{}:{}", chain.id(), node_id);
        let inner = Arc::new(NodeInner {
            node_id: node_id.clone(),
            address: address.clone(),
            chain,
            consensus,
            transport,
            bus,
            inbox: ConcurrentQueue::bounded(INBOX_CAPACITY),
            running: AtomicBool::new(false),
            journal,
            metrics,
        });

        // The endpoint callback holds only a weak handle; a dropped node's
        // late deliveries are discarded instead of keeping it alive.
        let weak: Weak<NodeInner> = Arc::downgrade(&inner);
        inner
            .transport
            .register_endpoint(&address, move |bytes| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_bytes(bytes);
                }
            })?;
        inner.chain.register_node_id(&node_id);
        Ok(Node {
            inner,
            worker: Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// This node's transport mailbox address, `"<chainId>:<nodeId>"`.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.inner.chain
    }

    /// Spawn the worker thread. Fails with `InvalidState` if already running.
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(Error::invalid_state("node already running"));
        }
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name(format!("node-{}", self.inner.address))
            .spawn(move || inner.run_loop())
            .expect("failed to spawn node worker");
        *self.worker.lock().unwrap() = Some(handle);
        info!(node = %self.inner.node_id, address = %self.inner.address, "node started");
        Ok(())
    }

    /// Signal the worker, close the inbox, and join. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.inbox.close();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!(node = %self.inner.node_id, "node stopped");
    }

    /// Add a transaction locally and loop it back through the transport, so
    /// a future broadcast path reuses the same inbox machinery.
    pub fn submit_transaction(&self, tx: &Transaction) {
        self.inner.chain.add_transaction(tx.clone());
        self.inner.journal.log_transaction(
            TxEvent::Submitted,
            &tx.tx_id,
            tx.tx_type.as_str(),
            &tx.from,
            &tx.to,
            &tx.payload,
            Some(self.inner.chain.id()),
            Some(&self.inner.node_id),
            None,
        );

        let msg = NodeMessage::new(
            &self.inner.address,
            NodeMessageKind::Transaction,
            encode_transaction_frame(tx),
        );
        if let Err(e) = self
            .inner
            .transport
            .send(&self.inner.address, &self.inner.address, &msg.encode())
        {
            debug!(node = %self.inner.node_id, error = %e, "loopback send failed");
        }
        self.inner.metrics.counter("tx_submitted");
    }

    /// Drain up to [`MAX_BLOCK_TXS`] mempool transactions, propose a block on
    /// top of the current head, and append it if the engine already considers
    /// it final. Returns the proposed block.
    pub fn propose_block(&self) -> Result<Block> {
        let inner = &self.inner;
        let prev = inner.chain.head();
        let txs = inner.chain.drain_transactions(MAX_BLOCK_TXS);
        let ctx = ConsensusContext {
            chain_id: inner.chain.id().to_string(),
            node_id: inner.node_id.clone(),
            current_height: prev.header.height,
        };
        inner.bus.publish(&Event::new(
            EventKind::ConsensusRound,
            inner.chain.id(),
            format!("{} proposing at height {}", inner.node_id, prev.header.height + 1),
        ));
        let block = inner.consensus.propose(&ctx, &txs, &prev)?;
        inner.bus.publish(&Event::new(
            EventKind::BlockProposed,
            inner.chain.id(),
            format!("height {} by {}", block.header.height, inner.node_id),
        ));
        if inner.consensus.is_final(&block) {
            inner.chain.append_block(&block)?;
        }
        Ok(block)
    }

    /// Feed a block heard from another participant to this node's engine.
    pub fn on_remote_block(&self, blk: &Block) -> Result<()> {
        self.inner.consensus.on_remote_block(blk)
    }

    /// Whether this node's engine considers `blk` final.
    pub fn is_final(&self, blk: &Block) -> bool {
        self.inner.consensus.is_final(blk)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
        let _ = self.inner.transport.unregister_endpoint(&self.inner.address);
    }
}

impl NodeInner {
    /// Transport delivery callback: decode the frame, queue it. Malformed
    /// frames and a closed inbox are logged and dropped.
    fn on_bytes(&self, bytes: &[u8]) {
        match NodeMessage::decode(bytes) {
            Ok(msg) => {
                if self.inbox.push(msg).is_err() {
                    debug!(node = %self.node_id, "inbox closed; message discarded");
                }
            }
            Err(e) => {
                warn!(node = %self.node_id, error = %e, "failed to decode node message");
            }
        }
    }

    fn run_loop(&self) {
        loop {
            let msg = match self.inbox.wait_pop() {
                Ok(msg) => msg,
                // Queue closed: clean exit.
                Err(_) => break,
            };
            match msg.kind {
                NodeMessageKind::Transaction => self.on_transaction_frame(&msg),
                NodeMessageKind::Block => {
                    // Reserved. Block gossip is not part of the runtime yet.
                    debug!(node = %self.node_id, from = %msg.from, "block frame accepted (no-op)");
                }
                NodeMessageKind::Ibc => self.on_ibc_frame(&msg),
                NodeMessageKind::Unknown => {
                    warn!(node = %self.node_id, from = %msg.from, "unknown message kind");
                }
            }
        }
    }

    fn on_transaction_frame(&self, msg: &NodeMessage) {
        let tx = match decode_transaction_frame(&msg.bytes) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(node = %self.node_id, error = %e, "malformed transaction frame");
                return;
            }
        };
        self.chain.add_transaction(tx.clone());
        self.metrics.counter("tx_received");
        debug!(node = %self.node_id, from = %tx.from, "transaction received");
        self.journal.log_transaction(
            TxEvent::Received,
            &tx.tx_id,
            tx.tx_type.as_str(),
            &tx.from,
            &tx.to,
            &tx.payload,
            Some(self.chain.id()),
            Some(&self.node_id),
            None,
        );
        self.snapshot_state();
    }

    fn on_ibc_frame(&self, msg: &NodeMessage) {
        let pkt = match IbcPacket::decode(&msg.bytes) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!(node = %self.node_id, error = %e, "malformed IBC frame");
                return;
            }
        };
        let result = match pkt.packet_type {
            PacketType::Data => self.chain.on_ibc_packet(&pkt),
            PacketType::Ack => self.chain.on_ibc_ack(&pkt),
        };
        if let Err(e) = result {
            // Duplicate or out-of-order deliveries land here when relayers
            // compete; the channel already rejected them.
            debug!(node = %self.node_id, seq = pkt.sequence, error = %e, "IBC packet not applied");
        }
    }

    /// Capture the node's view for `node_state_<chain>_<node>.jsonl`.
    fn snapshot_state(&self) {
        let head = self.chain.head();
        let block_hash = format!("hash_{}", head.header.height);
        self.journal.log_node_state(
            self.chain.id(),
            &self.node_id,
            head.header.height,
            &block_hash,
            self.chain.mempool_len(),
            self.consensus.name(),
            None,
        );
    }
}

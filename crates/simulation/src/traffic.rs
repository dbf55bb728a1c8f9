//! Continuous traffic generation.
//!
//! Inter-arrival times are drawn from an exponential distribution with mean
//! `traffic_gen_interval` (a Poisson arrival process). Each arrival is an IBC
//! packet between two distinct random chains with probability
//! `ibc_traffic_ratio`, otherwise a regular transaction between two random
//! nodes. The loop sleeps in short slices so stop requests take effect
//! promptly.

use chainmesh_chain::Blockchain;
use chainmesh_node::Node;
use chainmesh_telemetry::{EventJournal, MetricsSink, TxEvent};
use chainmesh_types::{next_tx_id, ChannelId, PortId, Transaction, TxType};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Sleep slice bounding how long a stop request can go unnoticed.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

pub(crate) struct TrafficGenerator {
    pub nodes: Vec<Arc<Node>>,
    pub chains: Vec<Arc<Blockchain>>,
    pub running: Arc<AtomicBool>,
    pub rng: ChaCha8Rng,
    pub mean_interval: Duration,
    pub ibc_ratio: f64,
    pub journal: Arc<EventJournal>,
    pub metrics: Arc<MetricsSink>,
}

impl TrafficGenerator {
    pub fn run(mut self) {
        debug!("traffic generator loop started");
        while self.running.load(Ordering::Acquire) {
            let wait = self.next_interval();
            if !self.sleep_interruptibly(wait) {
                break;
            }
            let draw: f64 = self.rng.gen();
            if draw < self.ibc_ratio && self.chains.len() >= 2 {
                self.generate_ibc_packet();
            } else if !self.nodes.is_empty() {
                self.generate_regular_transaction();
            }
        }
        debug!("traffic generator loop finished");
    }

    /// Exponential inter-arrival time by inverse transform sampling.
    fn next_interval(&mut self) -> Duration {
        let u: f64 = self.rng.gen();
        let mean_ms = self.mean_interval.as_millis() as f64;
        Duration::from_millis((-mean_ms * (1.0 - u).ln()) as u64)
    }

    /// Sleep `total`, polling the running flag. Returns false if stopped.
    fn sleep_interruptibly(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        while Instant::now() < deadline {
            if !self.running.load(Ordering::Acquire) {
                return false;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - Instant::now()));
        }
        self.running.load(Ordering::Acquire)
    }

    fn generate_regular_transaction(&mut self) {
        let sender = &self.nodes[self.rng.gen_range(0..self.nodes.len())];
        let receiver = &self.nodes[self.rng.gen_range(0..self.nodes.len())];

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let tx = Transaction {
            from: sender.address().to_string(),
            to: receiver.address().to_string(),
            payload: format!("auto_gen_tx_{stamp}"),
            tx_type: TxType::Regular,
            tx_id: next_tx_id(),
        };
        self.journal.log_transaction(
            TxEvent::Created,
            &tx.tx_id,
            tx.tx_type.as_str(),
            &tx.from,
            &tx.to,
            &tx.payload,
            None,
            None,
            None,
        );
        sender.submit_transaction(&tx);
        self.metrics.counter("traffic_regular_tx_generated");
    }

    fn generate_ibc_packet(&mut self) {
        let src_idx = self.rng.gen_range(0..self.chains.len());
        let mut dst_idx = self.rng.gen_range(0..self.chains.len());
        while dst_idx == src_idx {
            dst_idx = self.rng.gen_range(0..self.chains.len());
        }
        let src = &self.chains[src_idx];
        let dst = &self.chains[dst_idx];

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let payload = format!("auto_ibc_{}_to_{}_{stamp}", src.id(), dst.id());

        // The default cross-chain channel opened by the controller.
        match src.send_ibc(
            &PortId::new("port-A"),
            &ChannelId::new("channel-A"),
            dst.id(),
            &PortId::new("port-B"),
            &ChannelId::new("channel-B"),
            &payload,
        ) {
            Ok(_) => self.metrics.counter("traffic_ibc_tx_generated"),
            Err(e) => {
                warn!(src = %src.id(), dst = %dst.id(), error = %e, "failed to generate IBC packet");
                self.metrics.counter("traffic_ibc_tx_failed");
            }
        }
    }
}

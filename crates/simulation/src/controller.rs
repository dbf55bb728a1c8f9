//! Controller: builds, wires, runs, and tears down the federation.

use crate::traffic::TrafficGenerator;
use crate::{ChainConfig, SimulationConfig};
use chainmesh_bus::EventBus;
use chainmesh_chain::Blockchain;
use chainmesh_consensus::build_engine;
use chainmesh_node::Node;
use chainmesh_relayer::Relayer;
use chainmesh_telemetry::{EventJournal, LogCategory, MetricsSink, TxEvent};
use chainmesh_transport::{NetworkParams, Transport};
use chainmesh_types::{
    next_tx_id, ChannelId, Error, PortId, Result, Transaction, TxType,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Transactions injected per node by [`SimulationController::inject_traffic`].
const BURST_TXS_PER_NODE: usize = 5;

/// Cross-chain packets injected by [`SimulationController::inject_traffic`].
const BURST_IBC_PACKETS: usize = 2;

/// Owns every collaborator of one simulation run.
///
/// Lifecycle: [`init`](Self::init) builds chains, nodes, and relayers;
/// [`start`](Self::start) spins up the worker threads and the optional
/// traffic generator; [`run`](Self::run) blocks for the configured duration;
/// [`stop`](Self::stop) tears everything down in reverse order and flushes
/// the log artifacts.
pub struct SimulationController {
    chain_cfgs: Vec<ChainConfig>,
    sim_cfg: SimulationConfig,
    bus: Arc<EventBus>,
    journal: Arc<EventJournal>,
    metrics: Arc<MetricsSink>,
    transport: Arc<Transport>,
    chains: Vec<Arc<Blockchain>>,
    nodes: Vec<Arc<Node>>,
    relayers: Vec<Relayer>,
    traffic_running: Arc<AtomicBool>,
    traffic_thread: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl SimulationController {
    pub fn new(chain_cfgs: Vec<ChainConfig>, sim_cfg: SimulationConfig) -> SimulationController {
        if let Err(e) = std::fs::create_dir_all(&sim_cfg.artifact_dir) {
            warn!(dir = %sim_cfg.artifact_dir.display(), error = %e, "failed to create artifact dir");
        }

        let journal = Arc::new(EventJournal::new(&sim_cfg.artifact_dir));
        journal.set_enabled(LogCategory::Transactions, sim_cfg.enable_transaction_logs);
        journal.set_enabled(LogCategory::IbcEvents, sim_cfg.enable_ibc_event_logs);
        journal.set_enabled(LogCategory::NetworkDrops, sim_cfg.enable_network_drop_logs);
        journal.set_enabled(LogCategory::NodeState, sim_cfg.enable_node_state_snapshots);
        journal.set_enabled(LogCategory::RelayerState, sim_cfg.enable_relayer_state_logs);

        let metrics = Arc::new(
            MetricsSink::open(sim_cfg.artifact_dir.join("metrics.jsonl")).unwrap_or_else(|e| {
                warn!(error = %e, "failed to open metrics sink; metrics disabled");
                MetricsSink::disabled()
            }),
        );

        let transport = Arc::new(Transport::new(
            sim_cfg.rng_seed,
            NetworkParams {
                latency: sim_cfg.link_latency(),
                drop_rate: sim_cfg.packet_drop_rate,
            },
            Some(Arc::clone(&journal)),
        ));

        SimulationController {
            chain_cfgs,
            sim_cfg,
            bus: Arc::new(EventBus::new()),
            journal,
            metrics,
            transport,
            chains: Vec::new(),
            nodes: Vec::new(),
            relayers: Vec::new(),
            traffic_running: Arc::new(AtomicBool::new(false)),
            traffic_thread: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Build chains, nodes, and relayers; wire each chain's mailbox (its
    /// first node's address) into the relayers serving it.
    pub fn init(&mut self) -> Result<()> {
        info!("initializing simulation");

        for r in 0..self.sim_cfg.relayer_count {
            self.relayers.push(Relayer::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.bus),
                format!("relayer-{r}"),
                Arc::clone(&self.journal),
                Arc::clone(&self.metrics),
            ));
        }

        for (chain_idx, chain_cfg) in self.chain_cfgs.clone().iter().enumerate() {
            let chain = Arc::new(Blockchain::new(
                &chain_cfg.chain_id,
                Arc::clone(&self.bus),
                Arc::clone(&self.journal),
                Arc::clone(&self.metrics),
            ));

            let mut mailbox_address = None;
            for i in 0..chain_cfg.node_count {
                let node_id = format!("node-{i}");
                let engine = build_engine(&chain_cfg.engine_config(), Arc::clone(&self.metrics));
                let node = Arc::new(Node::new(
                    &node_id,
                    Arc::clone(&chain),
                    engine,
                    Arc::clone(&self.transport),
                    Arc::clone(&self.bus),
                    Arc::clone(&self.journal),
                    Arc::clone(&self.metrics),
                )?);
                if mailbox_address.is_none() {
                    mailbox_address = Some(node.address().to_string());
                }
                self.nodes.push(node);
            }
            self.chains.push(chain);

            // The first node's address is the chain mailbox. With competition
            // on, every relayer serves every chain; otherwise chains are
            // assigned round-robin.
            if let Some(address) = mailbox_address {
                if !self.relayers.is_empty() {
                    let round_robin = chain_idx % self.relayers.len();
                    for (r, relayer) in self.relayers.iter().enumerate() {
                        if self.sim_cfg.enable_relayer_competition || round_robin == r {
                            relayer.connect_chain_mailbox(&chain_cfg.chain_id, &address);
                        }
                    }
                }
            }
        }

        info!(
            chains = self.chains.len(),
            nodes = self.nodes.len(),
            relayers = self.relayers.len(),
            "simulation initialized"
        );
        Ok(())
    }

    /// Open one cross-chain channel: (ap, ac) on chain `a` and (bp, bc) on
    /// chain `b`.
    pub fn open_ibc(
        &self,
        a: &str,
        ap: &PortId,
        ac: &ChannelId,
        b: &str,
        bp: &PortId,
        bc: &ChannelId,
    ) -> Result<()> {
        info!(a, b, "opening IBC channel");
        let chain_a = self
            .find_chain(a)
            .ok_or_else(|| Error::not_found(format!("chain {a} not found")))?;
        let chain_b = self
            .find_chain(b)
            .ok_or_else(|| Error::not_found(format!("chain {b} not found")))?;
        chain_a.open_channel(ap, ac)?;
        chain_b.open_channel(bp, bc)?;
        Ok(())
    }

    /// Start nodes, relayers, and (if enabled) the traffic generator.
    pub fn start(&self) -> Result<()> {
        info!("starting simulation nodes");
        for node in &self.nodes {
            node.start()?;
        }
        info!("starting relayers");
        for relayer in &self.relayers {
            relayer.start()?;
        }

        if self.sim_cfg.enable_continuous_traffic {
            info!("starting traffic generator");
            self.traffic_running.store(true, Ordering::Release);
            let generator = TrafficGenerator {
                nodes: self.nodes.clone(),
                chains: self.chains.clone(),
                running: Arc::clone(&self.traffic_running),
                // Offset seed so traffic draws are independent of transport
                // drop draws.
                rng: ChaCha8Rng::seed_from_u64(self.sim_cfg.rng_seed + 1),
                mean_interval: self.sim_cfg.traffic_gen_interval(),
                ibc_ratio: self.sim_cfg.ibc_traffic_ratio,
                journal: Arc::clone(&self.journal),
                metrics: Arc::clone(&self.metrics),
            };
            let handle = std::thread::Builder::new()
                .name("traffic-gen".to_string())
                .spawn(move || generator.run())
                .expect("failed to spawn traffic generator");
            *self.traffic_thread.lock().unwrap() = Some(handle);
        }
        Ok(())
    }

    /// Block for the configured run duration.
    pub fn run(&self) {
        info!(run_for_ms = self.sim_cfg.run_for_ms, "running simulation");
        std::thread::sleep(self.sim_cfg.run_for());
        info!("simulation run finished");
    }

    /// Tear down in reverse order: traffic, relayers, nodes, transport, then
    /// flush all artifacts. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.traffic_running.swap(false, Ordering::AcqRel) {
            info!("stopping traffic generator");
            if let Some(handle) = self.traffic_thread.lock().unwrap().take() {
                let _ = handle.join();
            }
        }
        info!("stopping relayers");
        for relayer in &self.relayers {
            relayer.stop();
        }
        info!("stopping nodes");
        for node in &self.nodes {
            node.stop();
        }
        self.transport.shutdown();
        info!("flushing logs");
        self.journal.flush_all();
        self.metrics.flush();
        info!("simulation stopped");
    }

    /// One-shot workload burst: a handful of regular transactions per node
    /// and a couple of cross-chain packets over the default channel.
    pub fn inject_traffic(&self) {
        info!("injecting traffic burst");
        let mut rng = ChaCha8Rng::seed_from_u64(self.sim_cfg.rng_seed + 2);

        for sender in &self.nodes {
            for i in 0..BURST_TXS_PER_NODE {
                let receiver = &self.nodes[rng.gen_range(0..self.nodes.len())];
                let tx = Transaction {
                    from: sender.address().to_string(),
                    to: receiver.address().to_string(),
                    payload: format!(
                        "regular_tx_from_{}_to_{}_seq_{}",
                        sender.address(),
                        receiver.address(),
                        i
                    ),
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
            }
        }

        if self.chains.len() >= 2 {
            for i in 0..BURST_IBC_PACKETS {
                let src_idx = rng.gen_range(0..self.chains.len());
                let mut dst_idx = rng.gen_range(0..self.chains.len());
                while dst_idx == src_idx {
                    dst_idx = rng.gen_range(0..self.chains.len());
                }
                let src = &self.chains[src_idx];
                let dst = &self.chains[dst_idx];
                let payload = format!("ibc_payload_from_{}_to_{}_seq_{}", src.id(), dst.id(), i);
                if let Err(e) = src.send_ibc(
                    &PortId::new("port-A"),
                    &ChannelId::new("channel-A"),
                    dst.id(),
                    &PortId::new("port-B"),
                    &ChannelId::new("channel-B"),
                    &payload,
                ) {
                    warn!(src = %src.id(), error = %e, "failed to send burst IBC packet");
                }
            }
        } else {
            warn!("not enough chains for IBC burst traffic");
        }
        info!("traffic burst complete");
    }

    pub fn find_chain(&self, chain_id: &str) -> Option<&Arc<Blockchain>> {
        self.chains.iter().find(|c| c.id() == chain_id)
    }

    pub fn chains(&self) -> &[Arc<Blockchain>] {
        &self.chains
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn relayers(&self) -> &[Relayer] {
        &self.relayers
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Wait until `probe` returns true or `timeout` elapses. Returns whether
    /// the condition was met; useful for settling asynchronous flows.
    pub fn wait_until(timeout: Duration, mut probe: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if probe() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        probe()
    }
}

impl Drop for SimulationController {
    fn drop(&mut self) {
        self.stop();
    }
}

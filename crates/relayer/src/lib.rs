//! Off-chain relayer: observes packet-send events and delivers packets to
//! destination chain mailboxes.
//!
//! A relayer subscribes to `IbcPacketSend` and `IbcAckSend` on the event bus.
//! The handlers run on the publisher's thread and do O(1) work: decode the
//! packet, filter by type and by connected mailbox, and push it onto a local
//! bounded queue. A worker thread drains both queues and performs the actual
//! transport sends, with an additional relayer-injected route-drop
//! probability on top of whatever the transport itself loses.
//!
//! Several relayers may run at once; every one of them forwards every packet
//! it sees, and the destination channel's sequence check rejects the
//! duplicates.

use chainmesh_bus::{ConcurrentQueue, EventBus, EventKind};
use chainmesh_node::{NodeMessage, NodeMessageKind};
use chainmesh_telemetry::{EventJournal, IbcEvent, MetricsSink};
use chainmesh_transport::Transport;
use chainmesh_types::{Error, IbcPacket, PacketType, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pending packet/ack queue capacity.
const QUEUE_CAPACITY: usize = 1024;

/// Worker sleep when both queues are empty.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

struct RelayerInner {
    name: String,
    transport: Arc<Transport>,
    mailboxes: Mutex<HashMap<String, String>>,
    rng: Mutex<ChaCha8Rng>,
    route_drop: Mutex<f64>,
    running: AtomicBool,
    pending_packets: ConcurrentQueue<IbcPacket>,
    pending_acks: ConcurrentQueue<IbcPacket>,
    packets_relayed: AtomicU64,
    acks_relayed: AtomicU64,
    failures: AtomicU64,
    journal: Arc<EventJournal>,
    metrics: Arc<MetricsSink>,
}

/// Event-driven cross-chain forwarder with its own worker thread.
pub struct Relayer {
    inner: Arc<RelayerInner>,
    bus: Arc<EventBus>,
    packet_token: u64,
    ack_token: u64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Relayer {
    /// Create a relayer and subscribe it to packet and ack send events.
    ///
    /// The RNG is seeded from a hash of `name`, so a relayer's route-drop
    /// pattern is deterministic per name.
    pub fn new(
        transport: Arc<Transport>,
        bus: Arc<EventBus>,
        name: impl Into<String>,
        journal: Arc<EventJournal>,
        metrics: Arc<MetricsSink>,
    ) -> Relayer {
        let name = name.into();
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        let inner = Arc::new(RelayerInner {
            name: name.clone(),
            transport,
            mailboxes: Mutex::new(HashMap::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(hasher.finish())),
            route_drop: Mutex::new(0.0),
            running: AtomicBool::new(false),
            pending_packets: ConcurrentQueue::bounded(QUEUE_CAPACITY),
            pending_acks: ConcurrentQueue::bounded(QUEUE_CAPACITY),
            packets_relayed: AtomicU64::new(0),
            acks_relayed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            journal,
            metrics,
        });

        let packet_token = {
            let inner = Arc::clone(&inner);
            bus.subscribe(EventKind::IbcPacketSend, move |e| {
                inner.on_packet_send_event(&e.detail);
            })
        };
        let ack_token = {
            let inner = Arc::clone(&inner);
            bus.subscribe(EventKind::IbcAckSend, move |e| {
                inner.on_ack_send_event(&e.detail);
            })
        };

        info!(relayer = %name, "relayer initialized with event subscriptions");
        Relayer {
            inner,
            bus,
            packet_token,
            ack_token,
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Map a chain id to its first-hop mailbox address.
    pub fn connect_chain_mailbox(&self, chain_id: &str, address: &str) {
        self.inner
            .mailboxes
            .lock()
            .unwrap()
            .insert(chain_id.to_string(), address.to_string());
    }

    /// Extra loss probability applied on this relayer's route.
    pub fn set_route_drop(&self, probability: f64) {
        *self.inner.route_drop.lock().unwrap() = probability;
    }

    /// Spawn the worker. Fails with `InvalidState` if already running.
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(Error::invalid_state("relayer already running"));
        }
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name(format!("relayer-{}", self.inner.name))
            .spawn(move || inner.run_loop())
            .expect("failed to spawn relayer worker");
        *self.worker.lock().unwrap() = Some(handle);
        info!(relayer = %self.inner.name, "relayer started");
        Ok(())
    }

    /// Stop the worker, close both queues, and drain whatever was still
    /// queued so the final snapshot reports an empty backlog. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.pending_packets.close();
        self.inner.pending_acks.close();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        while let Some(pkt) = self.inner.pending_packets.try_pop() {
            self.inner.forward(&pkt, false);
        }
        while let Some(ack) = self.inner.pending_acks.try_pop() {
            self.inner.forward(&ack, true);
        }
        self.inner.log_state("stopped", "");
        info!(relayer = %self.inner.name, "relayer stopped");
    }

    /// Forward a Data packet to its destination chain mailbox.
    pub fn relay_packet(&self, pkt: &IbcPacket) -> Result<()> {
        self.inner.relay(pkt)
    }

    /// Forward an Ack to its destination chain mailbox.
    pub fn relay_ack(&self, ack: &IbcPacket) -> Result<()> {
        self.inner.relay(ack)
    }

    pub fn packets_relayed(&self) -> u64 {
        self.inner.packets_relayed.load(Ordering::Relaxed)
    }

    pub fn acks_relayed(&self) -> u64 {
        self.inner.acks_relayed.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }

    /// Packets and acks still queued; zero once the relayer has drained.
    pub fn pending_backlog(&self) -> usize {
        self.inner.pending_packets.len() + self.inner.pending_acks.len()
    }
}

impl Drop for Relayer {
    fn drop(&mut self) {
        self.stop();
        self.bus.unsubscribe(self.packet_token);
        self.bus.unsubscribe(self.ack_token);
    }
}

impl RelayerInner {
    /// Bus handler for `IbcPacketSend`. Runs on the publishing thread.
    fn on_packet_send_event(&self, detail: &str) {
        match IbcPacket::decode(detail) {
            Ok(pkt) if pkt.packet_type == PacketType::Data => {
                if !self.serves_chain(&pkt.dst_chain) {
                    return;
                }
                debug!(relayer = %self.name, seq = pkt.sequence, "queued IBC packet");
                self.metrics.counter("relayer_packets_queued");
                if self.pending_packets.push(pkt).is_err() {
                    debug!(relayer = %self.name, "packet queue closed; event discarded");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(relayer = %self.name, error = %e, "failed to decode IBC packet event");
                self.metrics.counter("relayer_deserialization_errors");
            }
        }
    }

    /// Bus handler for `IbcAckSend`. Runs on the publishing thread.
    fn on_ack_send_event(&self, detail: &str) {
        match IbcPacket::decode(detail) {
            Ok(ack) if ack.packet_type == PacketType::Ack => {
                if !self.serves_chain(&ack.dst_chain) {
                    return;
                }
                debug!(relayer = %self.name, seq = ack.sequence, "queued IBC ack");
                self.metrics.counter("relayer_acks_queued");
                if self.pending_acks.push(ack).is_err() {
                    debug!(relayer = %self.name, "ack queue closed; event discarded");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(relayer = %self.name, error = %e, "failed to decode IBC ack event");
                self.metrics.counter("relayer_deserialization_errors");
            }
        }
    }

    /// Whether this relayer has a mailbox for `chain_id`. Filtering here
    /// keeps unassigned relayers from counting spurious failures when
    /// competition is disabled.
    fn serves_chain(&self, chain_id: &str) -> bool {
        self.mailboxes.lock().unwrap().contains_key(chain_id)
    }

    fn run_loop(&self) {
        debug!(relayer = %self.name, "relayer run loop started");
        while self.running.load(Ordering::Acquire) {
            let mut processed = false;

            if let Some(pkt) = self.pending_packets.try_pop() {
                self.forward(&pkt, false);
                processed = true;
            }
            if let Some(ack) = self.pending_acks.try_pop() {
                self.forward(&ack, true);
                processed = true;
            }
            if !processed {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        debug!(relayer = %self.name, "relayer run loop finished");
    }

    fn forward(&self, pkt: &IbcPacket, is_ack: bool) {
        match self.relay(pkt) {
            Ok(()) => {
                if is_ack {
                    self.acks_relayed.fetch_add(1, Ordering::Relaxed);
                    self.metrics.counter("relayer_acks_relayed");
                    self.journal
                        .log_ibc(IbcEvent::AckRelayed, pkt, Some(&self.name), None);
                    self.log_state("ack_relayed", &format!("seq={}", pkt.sequence));
                } else {
                    self.packets_relayed.fetch_add(1, Ordering::Relaxed);
                    self.metrics.counter("relayer_packets_relayed");
                    self.journal
                        .log_ibc(IbcEvent::PacketRelayed, pkt, Some(&self.name), None);
                    self.log_state("packet_relayed", &format!("seq={}", pkt.sequence));
                }
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.counter(if is_ack {
                    "relayer_acks_failed"
                } else {
                    "relayer_packets_failed"
                });
                warn!(relayer = %self.name, seq = pkt.sequence, error = %e, "relay failed");
                self.log_state(if is_ack { "ack_failed" } else { "packet_failed" }, &e.to_string());
            }
        }
    }

    /// Look up the destination mailbox, draw the route-drop probability, and
    /// send the packet framed as a NodeMessage.
    fn relay(&self, pkt: &IbcPacket) -> Result<()> {
        let to_addr = self
            .mailboxes
            .lock()
            .unwrap()
            .get(&pkt.dst_chain)
            .cloned()
            .ok_or_else(|| {
                Error::not_found(format!("destination chain {} not connected", pkt.dst_chain))
            })?;

        let route_drop = *self.route_drop.lock().unwrap();
        let draw: f64 = self.rng.lock().unwrap().gen();
        if draw < route_drop {
            return Err(Error::network_drop("packet dropped on relayer route"));
        }

        let msg = NodeMessage::new(&self.name, NodeMessageKind::Ibc, pkt.encode());
        self.transport.send(&self.name, &to_addr, &msg.encode())
    }

    fn log_state(&self, event_type: &str, additional: &str) {
        self.journal.log_relayer_state(
            &self.name,
            event_type,
            self.packets_relayed.load(Ordering::Relaxed),
            self.acks_relayed.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
            Some(additional),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmesh_bus::Event;
    use chainmesh_transport::NetworkParams;
    use chainmesh_types::{ChannelId, ErrorKind, PortId};
    use std::time::Instant;

    fn packet(seq: u64) -> IbcPacket {
        IbcPacket {
            packet_type: PacketType::Data,
            src_chain: "chain-A".into(),
            dst_chain: "chain-B".into(),
            src_port: PortId::new("port-A"),
            src_channel: ChannelId::new("channel-A"),
            dst_port: PortId::new("port-B"),
            dst_channel: ChannelId::new("channel-B"),
            sequence: seq,
            payload: "hello".into(),
        }
    }

    fn lossless_transport() -> Arc<Transport> {
        Arc::new(Transport::new(
            1,
            NetworkParams {
                latency: Duration::ZERO,
                drop_rate: 0.0,
            },
            None,
        ))
    }

    fn relayer(transport: &Arc<Transport>, bus: &Arc<EventBus>) -> Relayer {
        Relayer::new(
            Arc::clone(transport),
            Arc::clone(bus),
            "relayer-0",
            Arc::new(EventJournal::disabled()),
            Arc::new(MetricsSink::disabled()),
        )
    }

    #[test]
    fn test_relay_requires_connected_mailbox() {
        let transport = lossless_transport();
        let bus = Arc::new(EventBus::new());
        let relayer = relayer(&transport, &bus);
        let err = relayer.relay_packet(&packet(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        transport.shutdown();
    }

    #[test]
    fn test_route_drop_fails_with_network_drop() {
        let transport = lossless_transport();
        let bus = Arc::new(EventBus::new());
        let relayer = relayer(&transport, &bus);
        transport.register_endpoint("chain-B:node-0", |_| {}).unwrap();
        relayer.connect_chain_mailbox("chain-B", "chain-B:node-0");
        relayer.set_route_drop(1.0);
        let err = relayer.relay_packet(&packet(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkDrop);
        transport.shutdown();
    }

    #[test]
    fn test_forwarded_packet_is_node_framed() {
        let transport = lossless_transport();
        let bus = Arc::new(EventBus::new());
        let relayer = relayer(&transport, &bus);

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            transport
                .register_endpoint("chain-B:node-0", move |bytes| {
                    seen.lock().unwrap().push(bytes.to_vec());
                })
                .unwrap();
        }
        relayer.connect_chain_mailbox("chain-B", "chain-B:node-0");
        relayer.relay_packet(&packet(1)).unwrap();
        transport.wait_for_pending_deliveries();

        let frames = seen.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let msg = NodeMessage::decode(&frames[0]).unwrap();
        assert_eq!(msg.from, "relayer-0");
        assert_eq!(msg.kind, NodeMessageKind::Ibc);
        assert_eq!(IbcPacket::decode(&msg.bytes).unwrap(), packet(1));
        transport.shutdown();
    }

    #[test]
    fn test_event_driven_relay_updates_counters() {
        let transport = lossless_transport();
        let bus = Arc::new(EventBus::new());
        let relayer = relayer(&transport, &bus);
        transport.register_endpoint("chain-B:node-0", |_| {}).unwrap();
        relayer.connect_chain_mailbox("chain-B", "chain-B:node-0");
        relayer.start().unwrap();

        bus.publish(&Event::new(
            EventKind::IbcPacketSend,
            "chain-A",
            packet(1).encode(),
        ));

        let deadline = Instant::now() + Duration::from_secs(2);
        while relayer.packets_relayed() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(relayer.packets_relayed(), 1);
        assert_eq!(relayer.failures(), 0);
        assert_eq!(relayer.pending_backlog(), 0);
        relayer.stop();
        transport.shutdown();
    }

    #[test]
    fn test_handler_filters_acks_from_packet_stream() {
        let transport = lossless_transport();
        let bus = Arc::new(EventBus::new());
        let relayer = relayer(&transport, &bus);
        transport.register_endpoint("chain-B:node-0", |_| {}).unwrap();
        relayer.connect_chain_mailbox("chain-B", "chain-B:node-0");

        // An Ack published on the packet-send stream must not queue.
        let mut ack = packet(1);
        ack.packet_type = PacketType::Ack;
        bus.publish(&Event::new(EventKind::IbcPacketSend, "chain-A", ack.encode()));
        assert_eq!(relayer.pending_backlog(), 0);
        transport.shutdown();
    }

    #[test]
    fn test_unserved_chain_events_are_ignored() {
        let transport = lossless_transport();
        let bus = Arc::new(EventBus::new());
        let relayer = relayer(&transport, &bus);
        // No mailbox for chain-B: the event is filtered at the handler, so
        // no failure is recorded.
        bus.publish(&Event::new(
            EventKind::IbcPacketSend,
            "chain-A",
            packet(1).encode(),
        ));
        assert_eq!(relayer.pending_backlog(), 0);
        assert_eq!(relayer.failures(), 0);
        transport.shutdown();
    }

    #[test]
    fn test_drop_unsubscribes_from_bus() {
        let transport = lossless_transport();
        let bus = Arc::new(EventBus::new());
        {
            let r = relayer(&transport, &bus);
            r.connect_chain_mailbox("chain-B", "chain-B:node-0");
            drop(r);
        }
        // Publishing after drop must not panic or deliver anywhere.
        bus.publish(&Event::new(
            EventKind::IbcPacketSend,
            "chain-A",
            packet(1).encode(),
        ));
        transport.shutdown();
    }
}

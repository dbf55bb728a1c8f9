//! Ledger head, channel directory, and IBC entry points for one chain.

use crate::Mempool;
use chainmesh_bus::{Event, EventBus, EventKind};
use chainmesh_ibc::{IbcChannel, Router};
use chainmesh_telemetry::{EventJournal, IbcEvent, MetricsSink, TxEvent};
use chainmesh_types::{
    Block, ChannelId, Error, ErrorKind, IbcPacket, PacketType, PortId, Result, Transaction,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

struct ChainState {
    ledger: Vec<Block>,
    channels: HashMap<String, IbcChannel>,
    mempool: Mempool,
}

/// One independent blockchain of the federation.
///
/// Owned by the controller; nodes hold shared references. The single state
/// mutex serializes ledger appends, mempool access, and every channel
/// operation, which is what keeps per-channel sequences strictly increasing
/// even under concurrent `send_ibc` calls.
pub struct Blockchain {
    chain_id: String,
    state: Mutex<ChainState>,
    router: Router,
    bus: Arc<EventBus>,
    journal: Arc<EventJournal>,
    metrics: Arc<MetricsSink>,
    node_ids: Mutex<Vec<String>>,
}

impl Blockchain {
    pub fn new(
        chain_id: impl Into<String>,
        bus: Arc<EventBus>,
        journal: Arc<EventJournal>,
        metrics: Arc<MetricsSink>,
    ) -> Blockchain {
        let chain_id = chain_id.into();
        let chain = Blockchain {
            state: Mutex::new(ChainState {
                ledger: vec![Block::genesis(&chain_id)],
                channels: HashMap::new(),
                mempool: Mempool::new(),
            }),
            router: Router::new(),
            bus,
            journal,
            metrics,
            node_ids: Mutex::new(Vec::new()),
            chain_id,
        };
        info!(chain = %chain.chain_id, "blockchain initialized with genesis block");
        chain
    }

    pub fn id(&self) -> &str {
        &self.chain_id
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Bind (port, channel) in the router and open the backing channel.
    ///
    /// A channel object that already exists (e.g. rebinding after
    /// `close_channel`) is reused with its accumulated sequence; its
    /// "already open" `InvalidState` is treated as success.
    pub fn open_channel(&self, port: &PortId, channel: &ChannelId) -> Result<()> {
        self.router.bind(port, channel).inspect_err(|e| {
            warn!(chain = %self.chain_id, %port, %channel, error = %e, "failed to bind channel");
        })?;

        let mut state = self.state.lock().unwrap();
        let chan = get_or_create_channel(&mut state, &self.chain_id, port, channel);
        ensure_open(chan)?;
        info!(chain = %self.chain_id, %port, %channel, "channel opened and bound");
        Ok(())
    }

    /// Unbind (port, channel). The channel object is deliberately left in
    /// place so in-flight sequences survive routing changes.
    pub fn close_channel(&self, port: &PortId, channel: &ChannelId) -> Result<()> {
        self.router.unbind(port, channel).inspect_err(|e| {
            warn!(chain = %self.chain_id, %port, %channel, error = %e, "failed to unbind channel");
        })?;
        info!(chain = %self.chain_id, %port, %channel, "channel unbound");
        Ok(())
    }

    /// Mint and announce the next packet on (src_port, src_channel).
    ///
    /// The `IbcPacketSend` event carries the encoded packet and is published
    /// while the directory lock is held: bus order must match sequence order,
    /// or competing relayers would deliver packets the destination has to
    /// reject.
    pub fn send_ibc(
        &self,
        src_port: &PortId,
        src_channel: &ChannelId,
        dst_chain: &str,
        dst_port: &PortId,
        dst_channel: &ChannelId,
        payload: &str,
    ) -> Result<IbcPacket> {
        let mut state = self.state.lock().unwrap();
        let chan = get_or_create_channel(&mut state, &self.chain_id, src_port, src_channel);
        ensure_open(chan)?;
        let packet = chan
            .make_packet(dst_chain, dst_port.clone(), dst_channel.clone(), payload)
            .inspect_err(|e| {
                warn!(chain = %self.chain_id, error = %e, "failed to make IBC packet");
            })?;

        self.bus.publish(&Event::new(
            EventKind::IbcPacketSend,
            &self.chain_id,
            packet.encode(),
        ));
        self.metrics.counter("ibc_packets_sent");
        self.journal
            .log_ibc(IbcEvent::PacketCreated, &packet, None, None);
        Ok(packet)
    }

    /// Handle a Data packet delivered to this chain's mailbox.
    ///
    /// The destination channel is created and opened on first use (inbound
    /// auto-open). On acceptance an Ack with swapped endpoints is announced;
    /// on sequence mismatch nothing is published and the error propagates.
    pub fn on_ibc_packet(&self, pkt: &IbcPacket) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let chan = get_or_create_channel(&mut state, &self.chain_id, &pkt.dst_port, &pkt.dst_channel);
        ensure_open(chan)?;
        chan.accept_packet(pkt).inspect_err(|e| {
            warn!(chain = %self.chain_id, seq = pkt.sequence, error = %e, "failed to accept IBC packet");
        })?;

        self.bus.publish(&Event::new(
            EventKind::IbcPacketRecv,
            &self.chain_id,
            pkt.encode(),
        ));
        self.metrics.counter("ibc_packets_received");
        self.journal
            .log_ibc(IbcEvent::PacketReceived, pkt, None, None);

        let ack = IbcPacket {
            packet_type: PacketType::Ack,
            src_chain: pkt.dst_chain.clone(),
            dst_chain: pkt.src_chain.clone(),
            src_port: pkt.dst_port.clone(),
            src_channel: pkt.dst_channel.clone(),
            dst_port: pkt.src_port.clone(),
            dst_channel: pkt.src_channel.clone(),
            sequence: pkt.sequence,
            payload: format!("ack_{}", pkt.sequence),
        };
        self.bus.publish(&Event::new(
            EventKind::IbcAckSend,
            &self.chain_id,
            ack.encode(),
        ));
        self.journal.log_ibc(IbcEvent::AckGenerated, &ack, None, None);
        debug!(chain = %self.chain_id, seq = pkt.sequence, "generated ack for packet");
        Ok(())
    }

    /// Handle an Ack delivered to this chain's mailbox. Application-level ack
    /// semantics are out of scope; the receipt is announced and recorded.
    pub fn on_ibc_ack(&self, ack: &IbcPacket) -> Result<()> {
        let _state = self.state.lock().unwrap();
        self.bus.publish(&Event::new(
            EventKind::IbcAckRecv,
            &self.chain_id,
            ack.encode(),
        ));
        self.metrics.counter("ibc_acks_received");
        self.journal.log_ibc(IbcEvent::AckReceived, ack, None, None);
        info!(chain = %self.chain_id, seq = ack.sequence, "IBC ack received");
        Ok(())
    }

    /// The most recently finalized block (genesis if nothing else).
    pub fn head(&self) -> Block {
        self.state
            .lock()
            .unwrap()
            .ledger
            .last()
            .expect("ledger always holds genesis")
            .clone()
    }

    /// Append a finalized block. The height must extend the head by exactly
    /// one.
    pub fn append_block(&self, blk: &Block) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let head_height = state.ledger.last().map(|b| b.header.height).unwrap_or(0);
        if blk.header.height != head_height + 1 {
            warn!(
                chain = %self.chain_id,
                got = blk.header.height,
                expected = head_height + 1,
                "block height mismatch"
            );
            return Err(Error::invalid_state(format!(
                "block height mismatch: got {}, expected {}",
                blk.header.height,
                head_height + 1
            )));
        }
        for tx in &blk.txs {
            self.journal.log_transaction(
                TxEvent::IncludedInBlock,
                &tx.tx_id,
                tx.tx_type.as_str(),
                &tx.from,
                &tx.to,
                &tx.payload,
                Some(&self.chain_id),
                None,
                Some(blk.header.height),
            );
        }
        state.ledger.push(blk.clone());
        self.bus.publish(&Event::new(
            EventKind::BlockFinalized,
            &self.chain_id,
            format!("block appended at height {}", blk.header.height),
        ));
        self.metrics.counter("blocks_appended");
        info!(chain = %self.chain_id, height = blk.header.height, "block appended");
        Ok(())
    }

    /// Record that a node participates in this chain. Duplicates are ignored.
    pub fn register_node_id(&self, node_id: &str) {
        let mut node_ids = self.node_ids.lock().unwrap();
        if !node_ids.iter().any(|n| n == node_id) {
            node_ids.push(node_id.to_string());
            info!(chain = %self.chain_id, node = node_id, "node registered");
        }
    }

    /// Add a transaction to the mempool.
    pub fn add_transaction(&self, tx: Transaction) {
        self.state.lock().unwrap().mempool.add(tx);
    }

    /// Remove and return up to `max_txs` transactions from the mempool.
    pub fn drain_transactions(&self, max_txs: usize) -> Vec<Transaction> {
        self.state.lock().unwrap().mempool.drain(max_txs)
    }

    pub fn mempool_len(&self) -> usize {
        self.state.lock().unwrap().mempool.len()
    }

    /// Next send/accept sequence for a channel, if the channel exists.
    pub fn channel_next_sequence(&self, port: &PortId, channel: &ChannelId) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .channels
            .get(&channel_key(port, channel))
            .map(|c| c.next_sequence())
    }
}

fn channel_key(port: &PortId, channel: &ChannelId) -> String {
    format!("{}:{}", port, channel)
}

fn get_or_create_channel<'a>(
    state: &'a mut ChainState,
    chain_id: &str,
    port: &PortId,
    channel: &ChannelId,
) -> &'a mut IbcChannel {
    state
        .channels
        .entry(channel_key(port, channel))
        .or_insert_with(|| {
            debug!(chain = chain_id, %port, %channel, "created IBC channel");
            IbcChannel::new(chain_id, port.clone(), channel.clone())
        })
}

/// Open a channel, treating "already open" as success. `ChannelClosed` still
/// propagates: a closed channel cannot come back.
fn ensure_open(chan: &mut IbcChannel) -> Result<()> {
    match chan.open() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::InvalidState => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmesh_types::TxType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_chain(id: &str) -> (Arc<Blockchain>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let chain = Arc::new(Blockchain::new(
            id,
            Arc::clone(&bus),
            Arc::new(EventJournal::disabled()),
            Arc::new(MetricsSink::disabled()),
        ));
        (chain, bus)
    }

    fn port_a() -> PortId {
        PortId::new("port-A")
    }

    fn chan_a() -> ChannelId {
        ChannelId::new("channel-A")
    }

    #[test]
    fn test_open_close_reopen_keeps_sequence() {
        let (chain, _bus) = test_chain("chain-A");
        chain.open_channel(&port_a(), &chan_a()).unwrap();

        chain
            .send_ibc(&port_a(), &chan_a(), "chain-B", &PortId::new("port-B"), &ChannelId::new("channel-B"), "x")
            .unwrap();
        assert_eq!(chain.channel_next_sequence(&port_a(), &chan_a()), Some(2));

        // Unbind, rebind: the channel object survives with its sequence and
        // the "already open" sentinel is treated as success.
        chain.close_channel(&port_a(), &chan_a()).unwrap();
        chain.open_channel(&port_a(), &chan_a()).unwrap();
        assert_eq!(chain.channel_next_sequence(&port_a(), &chan_a()), Some(2));
    }

    #[test]
    fn test_double_open_rejected_by_router() {
        let (chain, _bus) = test_chain("chain-A");
        chain.open_channel(&port_a(), &chan_a()).unwrap();
        let err = chain.open_channel(&port_a(), &chan_a()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_send_ibc_publishes_encoded_packet_in_order() {
        let (chain, bus) = test_chain("chain-A");
        chain.open_channel(&port_a(), &chan_a()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventKind::IbcPacketSend, move |e| {
                seen.lock().unwrap().push(e.detail.clone());
            });
        }

        for payload in ["one", "two", "three"] {
            chain
                .send_ibc(&port_a(), &chan_a(), "chain-B", &PortId::new("port-B"), &ChannelId::new("channel-B"), payload)
                .unwrap();
        }
        let seqs: Vec<u64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|detail| IbcPacket::decode(detail).unwrap().sequence)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_on_ibc_packet_accepts_and_acks() {
        let (chain_a, _) = test_chain("chain-A");
        let (chain_b, bus_b) = test_chain("chain-B");
        chain_a.open_channel(&port_a(), &chan_a()).unwrap();

        let acks = Arc::new(Mutex::new(Vec::new()));
        {
            let acks = Arc::clone(&acks);
            bus_b.subscribe(EventKind::IbcAckSend, move |e| {
                acks.lock().unwrap().push(IbcPacket::decode(&e.detail).unwrap());
            });
        }

        let pkt = chain_a
            .send_ibc(&port_a(), &chan_a(), "chain-B", &PortId::new("port-B"), &ChannelId::new("channel-B"), "hello")
            .unwrap();
        chain_b.on_ibc_packet(&pkt).unwrap();

        // Destination channel auto-opened and advanced.
        assert_eq!(
            chain_b.channel_next_sequence(&PortId::new("port-B"), &ChannelId::new("channel-B")),
            Some(2)
        );
        let acks = acks.lock().unwrap();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].packet_type, PacketType::Ack);
        assert_eq!(acks[0].payload, "ack_1");
        assert_eq!(acks[0].src_chain, "chain-B");
        assert_eq!(acks[0].dst_chain, "chain-A");
        assert_eq!(acks[0].dst_port, port_a());
    }

    #[test]
    fn test_out_of_order_packet_rejected_without_events() {
        let (chain_a, _) = test_chain("chain-A");
        let (chain_b, bus_b) = test_chain("chain-B");
        chain_a.open_channel(&port_a(), &chan_a()).unwrap();

        let recv_count = Arc::new(AtomicUsize::new(0));
        {
            let recv_count = Arc::clone(&recv_count);
            bus_b.subscribe(EventKind::IbcPacketRecv, move |_| {
                recv_count.fetch_add(1, Ordering::SeqCst);
            });
        }

        let pkt1 = chain_a
            .send_ibc(&port_a(), &chan_a(), "chain-B", &PortId::new("port-B"), &ChannelId::new("channel-B"), "one")
            .unwrap();
        let pkt2 = chain_a
            .send_ibc(&port_a(), &chan_a(), "chain-B", &PortId::new("port-B"), &ChannelId::new("channel-B"), "two")
            .unwrap();

        let err = chain_b.on_ibc_packet(&pkt2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(recv_count.load(Ordering::SeqCst), 0);

        chain_b.on_ibc_packet(&pkt1).unwrap();
        chain_b.on_ibc_packet(&pkt2).unwrap();
        assert_eq!(recv_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_append_block_enforces_contiguity() {
        let (chain, bus) = test_chain("chain-A");
        let finalized = Arc::new(AtomicUsize::new(0));
        {
            let finalized = Arc::clone(&finalized);
            bus.subscribe(EventKind::BlockFinalized, move |_| {
                finalized.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut blk = Block::genesis("chain-A");
        blk.header.height = 1;
        chain.append_block(&blk).unwrap();

        let mut gap = Block::genesis("chain-A");
        gap.header.height = 3;
        assert_eq!(
            chain.append_block(&gap).unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        assert_eq!(chain.head().header.height, 1);
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mempool_through_chain() {
        let (chain, _bus) = test_chain("chain-A");
        for i in 0..3 {
            chain.add_transaction(Transaction {
                from: "a".into(),
                to: "b".into(),
                payload: format!("p{i}"),
                tx_type: TxType::Regular,
                tx_id: format!("tx_{i}"),
            });
        }
        assert_eq!(chain.mempool_len(), 3);
        let drained = chain.drain_transactions(2);
        assert_eq!(drained[0].payload, "p0");
        assert_eq!(chain.mempool_len(), 1);
    }
}

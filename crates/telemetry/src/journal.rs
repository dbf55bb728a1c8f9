//! Category-gated JSONL event journal.
//!
//! Files produced under the journal's artifact directory:
//!
//! | Category | File |
//! |----------|------|
//! | Transactions | `transactions.jsonl` |
//! | IbcEvents | `ibc_events.jsonl` |
//! | NetworkDrops | `network_drops.jsonl` |
//! | NodeState | `node_state_<chain>_<node>.jsonl` |
//! | RelayerState | `relayer_state_<id>.jsonl` |
//!
//! Streams open lazily on first write of an enabled category, so a fully
//! disabled journal touches no files at all (see [`EventJournal::disabled`]).

use crate::clock::iso8601_millis;
use crate::stream::LogStream;
use chainmesh_types::IbcPacket;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::error;

/// Detail-log categories, individually toggleable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    Transactions,
    IbcEvents,
    NetworkDrops,
    NodeState,
    RelayerState,
}

/// Transaction lifecycle stages.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxEvent {
    Created,
    Submitted,
    Received,
    IncludedInBlock,
    Dropped,
}

/// IBC packet lifecycle stages.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IbcEvent {
    PacketCreated,
    PacketRelayed,
    PacketReceived,
    AckGenerated,
    AckRelayed,
    AckReceived,
}

#[derive(Serialize)]
struct TxRecord<'a> {
    ts: String,
    event: TxEvent,
    tx_id: &'a str,
    tx_type: &'a str,
    from: &'a str,
    to: &'a str,
    payload: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_height: Option<u64>,
}

#[derive(Serialize)]
struct IbcRecord<'a> {
    ts: String,
    event: IbcEvent,
    src_chain: &'a str,
    dst_chain: &'a str,
    src_port: &'a str,
    src_channel: &'a str,
    dst_port: &'a str,
    dst_channel: &'a str,
    sequence: u64,
    payload: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    relayer_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<f64>,
}

#[derive(Serialize)]
struct DropRecord<'a> {
    ts: String,
    from: &'a str,
    to: &'a str,
    message_type: &'a str,
    message_size: usize,
    drop_reason: &'a str,
}

#[derive(Serialize)]
struct NodeStateRecord<'a> {
    ts: String,
    chain_id: &'a str,
    node_id: &'a str,
    block_height: u64,
    block_hash: &'a str,
    mempool_size: usize,
    consensus_state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    additional: Option<&'a str>,
}

#[derive(Serialize)]
struct RelayerStateRecord<'a> {
    ts: String,
    relayer_id: &'a str,
    event_type: &'a str,
    packets_relayed: u64,
    acks_relayed: u64,
    failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    additional: Option<&'a str>,
}

/// Coordinator for all detail-log streams of one simulation run.
pub struct EventJournal {
    dir: PathBuf,
    transactions_enabled: AtomicBool,
    ibc_events_enabled: AtomicBool,
    network_drops_enabled: AtomicBool,
    node_state_enabled: AtomicBool,
    relayer_state_enabled: AtomicBool,
    transactions: Mutex<Option<LogStream>>,
    ibc_events: Mutex<Option<LogStream>>,
    network_drops: Mutex<Option<LogStream>>,
    node_state: Mutex<HashMap<String, LogStream>>,
    relayer_state: Mutex<HashMap<String, LogStream>>,
}

impl EventJournal {
    /// Create a journal rooted at `dir` with every category enabled.
    pub fn new(dir: impl Into<PathBuf>) -> EventJournal {
        EventJournal {
            dir: dir.into(),
            transactions_enabled: AtomicBool::new(true),
            ibc_events_enabled: AtomicBool::new(true),
            network_drops_enabled: AtomicBool::new(true),
            node_state_enabled: AtomicBool::new(true),
            relayer_state_enabled: AtomicBool::new(true),
            transactions: Mutex::new(None),
            ibc_events: Mutex::new(None),
            network_drops: Mutex::new(None),
            node_state: Mutex::new(HashMap::new()),
            relayer_state: Mutex::new(HashMap::new()),
        }
    }

    /// A journal with every category disabled; writes nothing, opens nothing.
    pub fn disabled() -> EventJournal {
        let journal = EventJournal::new(std::env::temp_dir());
        for cat in [
            LogCategory::Transactions,
            LogCategory::IbcEvents,
            LogCategory::NetworkDrops,
            LogCategory::NodeState,
            LogCategory::RelayerState,
        ] {
            journal.set_enabled(cat, false);
        }
        journal
    }

    pub fn set_enabled(&self, category: LogCategory, enabled: bool) {
        self.flag(category).store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self, category: LogCategory) -> bool {
        self.flag(category).load(Ordering::Relaxed)
    }

    fn flag(&self, category: LogCategory) -> &AtomicBool {
        match category {
            LogCategory::Transactions => &self.transactions_enabled,
            LogCategory::IbcEvents => &self.ibc_events_enabled,
            LogCategory::NetworkDrops => &self.network_drops_enabled,
            LogCategory::NodeState => &self.node_state_enabled,
            LogCategory::RelayerState => &self.relayer_state_enabled,
        }
    }

    /// Record a transaction lifecycle event.
    #[allow(clippy::too_many_arguments)]
    pub fn log_transaction(
        &self,
        event: TxEvent,
        tx_id: &str,
        tx_type: &str,
        from: &str,
        to: &str,
        payload: &str,
        chain_id: Option<&str>,
        node_id: Option<&str>,
        block_height: Option<u64>,
    ) {
        if !self.is_enabled(LogCategory::Transactions) {
            return;
        }
        let record = TxRecord {
            ts: iso8601_millis(SystemTime::now()),
            event,
            tx_id,
            tx_type,
            from,
            to,
            payload,
            chain_id,
            node_id,
            block_height,
        };
        self.write_fixed(&self.transactions, "transactions.jsonl", &record);
    }

    /// Record an IBC packet lifecycle event.
    pub fn log_ibc(
        &self,
        event: IbcEvent,
        pkt: &IbcPacket,
        relayer_id: Option<&str>,
        latency_ms: Option<f64>,
    ) {
        if !self.is_enabled(LogCategory::IbcEvents) {
            return;
        }
        let record = IbcRecord {
            ts: iso8601_millis(SystemTime::now()),
            event,
            src_chain: &pkt.src_chain,
            dst_chain: &pkt.dst_chain,
            src_port: pkt.src_port.as_str(),
            src_channel: pkt.src_channel.as_str(),
            dst_port: pkt.dst_port.as_str(),
            dst_channel: pkt.dst_channel.as_str(),
            sequence: pkt.sequence,
            payload: &pkt.payload,
            relayer_id,
            latency_ms,
        };
        self.write_fixed(&self.ibc_events, "ibc_events.jsonl", &record);
    }

    /// Record a simulated network drop.
    pub fn log_network_drop(
        &self,
        from: &str,
        to: &str,
        message_type: &str,
        message_size: usize,
        drop_reason: &str,
    ) {
        if !self.is_enabled(LogCategory::NetworkDrops) {
            return;
        }
        let record = DropRecord {
            ts: iso8601_millis(SystemTime::now()),
            from,
            to,
            message_type,
            message_size,
            drop_reason,
        };
        self.write_fixed(&self.network_drops, "network_drops.jsonl", &record);
    }

    /// Record a node state snapshot into `node_state_<chain>_<node>.jsonl`.
    #[allow(clippy::too_many_arguments)]
    pub fn log_node_state(
        &self,
        chain_id: &str,
        node_id: &str,
        block_height: u64,
        block_hash: &str,
        mempool_size: usize,
        consensus_state: &str,
        additional: Option<&str>,
    ) {
        if !self.is_enabled(LogCategory::NodeState) {
            return;
        }
        let record = NodeStateRecord {
            ts: iso8601_millis(SystemTime::now()),
            chain_id,
            node_id,
            block_height,
            block_hash,
            mempool_size,
            consensus_state,
            additional,
        };
        let key = format!("{}_{}", chain_id, node_id);
        let filename = format!("node_state_{}_{}.jsonl", chain_id, node_id);
        self.write_keyed(&self.node_state, key, filename, &record);
    }

    /// Record a relayer state snapshot into `relayer_state_<id>.jsonl`.
    pub fn log_relayer_state(
        &self,
        relayer_id: &str,
        event_type: &str,
        packets_relayed: u64,
        acks_relayed: u64,
        failures: u64,
        additional: Option<&str>,
    ) {
        if !self.is_enabled(LogCategory::RelayerState) {
            return;
        }
        let record = RelayerStateRecord {
            ts: iso8601_millis(SystemTime::now()),
            relayer_id,
            event_type,
            packets_relayed,
            acks_relayed,
            failures,
            additional,
        };
        let filename = format!("relayer_state_{}.jsonl", relayer_id);
        self.write_keyed(&self.relayer_state, relayer_id.to_string(), filename, &record);
    }

    /// Flush every open stream.
    pub fn flush_all(&self) {
        for slot in [&self.transactions, &self.ibc_events, &self.network_drops] {
            if let Some(stream) = slot.lock().unwrap().as_ref() {
                if let Err(e) = stream.flush() {
                    error!(error = %e, "failed to flush journal stream");
                }
            }
        }
        for map in [&self.node_state, &self.relayer_state] {
            for stream in map.lock().unwrap().values() {
                if let Err(e) = stream.flush() {
                    error!(error = %e, "failed to flush journal stream");
                }
            }
        }
    }

    fn write_fixed<R: Serialize>(&self, slot: &Mutex<Option<LogStream>>, filename: &str, record: &R) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, file = filename, "failed to serialize journal record");
                return;
            }
        };
        let mut guard = slot.lock().unwrap();
        if guard.is_none() {
            match LogStream::open(self.dir.join(filename)) {
                Ok(stream) => *guard = Some(stream),
                Err(e) => {
                    error!(error = %e, file = filename, "failed to open journal stream");
                    return;
                }
            }
        }
        if let Some(stream) = guard.as_ref() {
            if let Err(e) = stream.write_line(&line) {
                error!(error = %e, file = filename, "failed to write journal record");
            }
        }
    }

    fn write_keyed<R: Serialize>(
        &self,
        map: &Mutex<HashMap<String, LogStream>>,
        key: String,
        filename: String,
        record: &R,
    ) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, file = %filename, "failed to serialize journal record");
                return;
            }
        };
        let mut guard = map.lock().unwrap();
        if !guard.contains_key(&key) {
            match LogStream::open(self.dir.join(&filename)) {
                Ok(stream) => {
                    guard.insert(key.clone(), stream);
                }
                Err(e) => {
                    error!(error = %e, file = %filename, "failed to open journal stream");
                    return;
                }
            }
        }
        if let Some(stream) = guard.get(&key) {
            if let Err(e) = stream.write_line(&line) {
                error!(error = %e, file = %filename, "failed to write journal record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmesh_types::{ChannelId, PacketType, PortId};
    use std::sync::atomic::AtomicU64;

    static TEST_SEQ: AtomicU64 = AtomicU64::new(0);

    fn temp_dir(tag: &str) -> PathBuf {
        let n = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "chainmesh-journal-{}-{}-{}",
            tag,
            std::process::id(),
            n
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_packet() -> IbcPacket {
        IbcPacket {
            packet_type: PacketType::Data,
            src_chain: "chain-A".into(),
            dst_chain: "chain-B".into(),
            src_port: PortId::new("port-A"),
            src_channel: ChannelId::new("channel-A"),
            dst_port: PortId::new("port-B"),
            dst_channel: ChannelId::new("channel-B"),
            sequence: 1,
            payload: "hello".into(),
        }
    }

    #[test]
    fn test_transaction_record_shape() {
        let dir = temp_dir("tx");
        let journal = EventJournal::new(&dir);
        journal.log_transaction(
            TxEvent::Created,
            "tx_1_0",
            "regular",
            "chain-A:node-0",
            "chain-A:node-1",
            "payload with \"quotes\" and \\slashes",
            Some("chain-A"),
            None,
            None,
        );
        journal.flush_all();

        let contents = std::fs::read_to_string(dir.join("transactions.jsonl")).unwrap();
        let value: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(value["event"], "created");
        assert_eq!(value["tx_id"], "tx_1_0");
        assert_eq!(value["chain_id"], "chain-A");
        assert!(value.get("node_id").is_none());
        assert_eq!(value["payload"], "payload with \"quotes\" and \\slashes");
        assert!(value["ts"].as_str().unwrap().ends_with('Z'));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_ibc_and_keyed_streams() {
        let dir = temp_dir("ibc");
        let journal = EventJournal::new(&dir);
        journal.log_ibc(IbcEvent::PacketRelayed, &sample_packet(), Some("relayer-0"), None);
        journal.log_node_state("chain-A", "node-0", 3, "hash_3", 5, "PoW", None);
        journal.log_relayer_state("relayer-0", "packet_relayed", 1, 0, 0, Some("seq=1"));
        journal.flush_all();

        let ibc = std::fs::read_to_string(dir.join("ibc_events.jsonl")).unwrap();
        let value: serde_json::Value = serde_json::from_str(ibc.trim()).unwrap();
        assert_eq!(value["event"], "packet_relayed");
        assert_eq!(value["relayer_id"], "relayer-0");
        assert_eq!(value["sequence"], 1);

        assert!(dir.join("node_state_chain-A_node-0.jsonl").exists());
        assert!(dir.join("relayer_state_relayer-0.jsonl").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_disabled_categories_write_nothing() {
        let dir = temp_dir("off");
        let journal = EventJournal::new(&dir);
        journal.set_enabled(LogCategory::Transactions, false);
        journal.log_transaction(
            TxEvent::Created,
            "tx",
            "regular",
            "a",
            "b",
            "p",
            None,
            None,
            None,
        );
        assert!(!dir.join("transactions.jsonl").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}

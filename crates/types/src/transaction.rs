//! Transactions and process-unique transaction ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Classifies a transaction for routing and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxType {
    Regular,
    IbcPacket,
    IbcAck,
    Unknown,
}

impl TxType {
    /// Wire code used by the transaction frame.
    pub fn code(self) -> u8 {
        match self {
            TxType::Regular => 0,
            TxType::IbcPacket => 1,
            TxType::IbcAck => 2,
            TxType::Unknown => 3,
        }
    }

    /// Inverse of [`code`](Self::code). Unrecognized codes map to `Unknown`.
    pub fn from_code(code: u8) -> TxType {
        match code {
            0 => TxType::Regular,
            1 => TxType::IbcPacket,
            2 => TxType::IbcAck,
            _ => TxType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxType::Regular => "regular",
            TxType::IbcPacket => "ibc_packet",
            TxType::IbcAck => "ibc_ack",
            TxType::Unknown => "unknown",
        }
    }
}

/// A transaction moving between node mailboxes.
///
/// The payload is opaque to the runtime; for IBC-typed transactions it carries
/// an encoded [`IbcPacket`](crate::IbcPacket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub from: String,
    pub to: String,
    pub payload: String,
    pub tx_type: TxType,
    pub tx_id: String,
}

static TX_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a transaction id unique within this process lifetime.
///
/// Format: `tx_<wall_time_ns>_<counter>`. The counter disambiguates ids minted
/// within the same clock reading.
pub fn next_tx_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let count = TX_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tx_{}_{}", nanos, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tx_type_codes_round_trip() {
        for ty in [TxType::Regular, TxType::IbcPacket, TxType::IbcAck, TxType::Unknown] {
            assert_eq!(TxType::from_code(ty.code()), ty);
        }
        assert_eq!(TxType::from_code(200), TxType::Unknown);
    }

    #[test]
    fn test_tx_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| next_tx_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_tx_id_format() {
        let id = next_tx_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.split('_').count(), 3);
    }
}

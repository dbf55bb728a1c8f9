//! Wire framing for node mailboxes.
//!
//! Outer frame: `fromAddress|kind|bytes`. The `bytes` field may itself
//! contain `|` (an encoded IBC packet does), so the parser splits on the
//! first two pipes only and keeps the remainder intact.
//!
//! Transaction frame (inside `bytes` for kind Transaction):
//! `from|to|payload|type|tx_id`, with `type` as the integer code.

use chainmesh_types::{Error, Result, Transaction, TxType};

/// What a framed message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMessageKind {
    Block,
    Transaction,
    Ibc,
    Unknown,
}

impl NodeMessageKind {
    pub fn code(self) -> u8 {
        match self {
            NodeMessageKind::Block => 0,
            NodeMessageKind::Transaction => 1,
            NodeMessageKind::Ibc => 2,
            NodeMessageKind::Unknown => 3,
        }
    }

    pub fn from_code(code: u8) -> NodeMessageKind {
        match code {
            0 => NodeMessageKind::Block,
            1 => NodeMessageKind::Transaction,
            2 => NodeMessageKind::Ibc,
            _ => NodeMessageKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeMessageKind::Block => "block",
            NodeMessageKind::Transaction => "tx",
            NodeMessageKind::Ibc => "ibc",
            NodeMessageKind::Unknown => "unknown",
        }
    }
}

/// A message addressed to a node mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMessage {
    pub from: String,
    pub kind: NodeMessageKind,
    pub bytes: String,
}

impl NodeMessage {
    pub fn new(from: impl Into<String>, kind: NodeMessageKind, bytes: impl Into<String>) -> Self {
        NodeMessage {
            from: from.into(),
            kind,
            bytes: bytes.into(),
        }
    }

    /// Encode to the on-wire byte form.
    pub fn encode(&self) -> Vec<u8> {
        format!("{}|{}|{}", self.from, self.kind.code(), self.bytes).into_bytes()
    }

    /// Decode a wire frame, splitting on the first two pipes only.
    pub fn decode(bytes: &[u8]) -> Result<NodeMessage> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::serialization("node message is not valid UTF-8"))?;
        let mut parts = text.splitn(3, '|');
        let (Some(from), Some(kind), Some(rest)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::serialization("malformed node message frame"));
        };
        let code: u8 = kind
            .parse()
            .map_err(|_| Error::serialization(format!("bad node message kind {kind:?}")))?;
        Ok(NodeMessage {
            from: from.to_string(),
            kind: NodeMessageKind::from_code(code),
            bytes: rest.to_string(),
        })
    }
}

/// Encode a transaction as `from|to|payload|type|tx_id`.
pub fn encode_transaction_frame(tx: &Transaction) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        tx.from,
        tx.to,
        tx.payload,
        tx.tx_type.code(),
        tx.tx_id
    )
}

/// Decode a transaction frame. The head fields must be pipe-free; the id
/// takes whatever remains after the fourth pipe.
pub fn decode_transaction_frame(frame: &str) -> Result<Transaction> {
    let mut parts = frame.splitn(5, '|');
    let (Some(from), Some(to), Some(payload), Some(ty), Some(tx_id)) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(Error::serialization("malformed transaction frame"));
    };
    let code: u8 = ty
        .parse()
        .map_err(|_| Error::serialization(format!("bad transaction type {ty:?}")))?;
    Ok(Transaction {
        from: from.to_string(),
        to: to.to_string(),
        payload: payload.to_string(),
        tx_type: TxType::from_code(code),
        tx_id: tx_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let msg = NodeMessage::new("chain-A:node-0", NodeMessageKind::Transaction, "a|b|c|0|tx_1");
        let decoded = NodeMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_bytes_field_keeps_embedded_pipes() {
        // An encoded IBC packet is full of pipes; only the first two may
        // delimit.
        let payload = "0|chain-A|chain-B|port-A|channel-A|port-B|channel-B|1|hello";
        let msg = NodeMessage::new("relayer-0", NodeMessageKind::Ibc, payload);
        let decoded = NodeMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.kind, NodeMessageKind::Ibc);
        assert_eq!(decoded.bytes, payload);
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(NodeMessage::decode(b"no pipes here").is_err());
        assert!(NodeMessage::decode(b"just|one").is_err());
        assert!(NodeMessage::decode(b"from|notanumber|bytes").is_err());
        assert!(NodeMessage::decode(&[0xff, 0xfe, b'|', b'1', b'|']).is_err());
    }

    #[test]
    fn test_unknown_kind_code_accepted_as_unknown() {
        let decoded = NodeMessage::decode(b"someone|9|data").unwrap();
        assert_eq!(decoded.kind, NodeMessageKind::Unknown);
    }

    #[test]
    fn test_transaction_frame_round_trip() {
        let tx = Transaction {
            from: "chain-A:node-0".into(),
            to: "chain-A:node-1".into(),
            payload: "hello".into(),
            tx_type: TxType::Regular,
            tx_id: "tx_123_4".into(),
        };
        let decoded = decode_transaction_frame(&encode_transaction_frame(&tx)).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_transaction_frame_malformed() {
        assert!(decode_transaction_frame("a|b|c").is_err());
        assert!(decode_transaction_frame("a|b|c|notanumber|id").is_err());
    }
}

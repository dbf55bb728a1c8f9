//! IBC packets and their pipe-delimited wire codec.
//!
//! Wire format:
//!
//! ```text
//! type|srcChain|dstChain|srcPort|srcChan|dstPort|dstChan|seq|payload
//! ```
//!
//! `|` and `\` inside any field are escaped with a leading backslash, so the
//! codec round-trips arbitrary port, channel, and payload strings.

use crate::{Error, Result};
use std::fmt;

/// Port identifier within a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortId(pub String);

/// Channel identifier within a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(pub String);

impl PortId {
    pub fn new(value: impl Into<String>) -> Self {
        PortId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ChannelId {
    pub fn new(value: impl Into<String>) -> Self {
        ChannelId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Data packets flow source -> destination; Acks flow back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Data,
    Ack,
}

impl PacketType {
    fn code(self) -> u8 {
        match self {
            PacketType::Data => 0,
            PacketType::Ack => 1,
        }
    }

    fn from_code(code: u64) -> Result<PacketType> {
        match code {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Ack),
            other => Err(Error::serialization(format!(
                "unknown packet type code {other}"
            ))),
        }
    }
}

/// A cross-chain packet. Sequences are per (chain, port, channel) and start
/// at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IbcPacket {
    pub packet_type: PacketType,
    pub src_chain: String,
    pub dst_chain: String,
    pub src_port: PortId,
    pub src_channel: ChannelId,
    pub dst_port: PortId,
    pub dst_channel: ChannelId,
    pub sequence: u64,
    pub payload: String,
}

impl IbcPacket {
    /// Encode to the pipe-delimited wire string.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.payload.len());
        out.push_str(&self.packet_type.code().to_string());
        for field in [
            &self.src_chain,
            &self.dst_chain,
            &self.src_port.0,
            &self.src_channel.0,
            &self.dst_port.0,
            &self.dst_channel.0,
        ] {
            out.push('|');
            push_escaped(&mut out, field);
        }
        out.push('|');
        out.push_str(&self.sequence.to_string());
        out.push('|');
        push_escaped(&mut out, &self.payload);
        out
    }

    /// Decode a wire string. Requires exactly nine fields.
    pub fn decode(s: &str) -> Result<IbcPacket> {
        let parts = split_unescaped(s);
        if parts.len() != 9 {
            return Err(Error::serialization(format!(
                "expected 9 packet fields, got {}",
                parts.len()
            )));
        }

        let type_code: u64 = parts[0]
            .parse()
            .map_err(|_| Error::serialization(format!("bad packet type field {:?}", parts[0])))?;
        let sequence: u64 = parts[7]
            .parse()
            .map_err(|_| Error::serialization(format!("bad sequence field {:?}", parts[7])))?;

        Ok(IbcPacket {
            packet_type: PacketType::from_code(type_code)?,
            src_chain: unescape(&parts[1]),
            dst_chain: unescape(&parts[2]),
            src_port: PortId(unescape(&parts[3])),
            src_channel: ChannelId(unescape(&parts[4])),
            dst_port: PortId(unescape(&parts[5])),
            dst_channel: ChannelId(unescape(&parts[6])),
            sequence,
            payload: unescape(&parts[8]),
        })
    }
}

fn push_escaped(out: &mut String, field: &str) {
    for c in field.chars() {
        if c == '|' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    out
}

/// Split on unescaped `|`, keeping escape sequences inside each token for a
/// later [`unescape`] pass.
fn split_unescaped(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
            current.push(c);
        } else if c == '|' {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

//! Unidirectional logical channel with sequencing and state.

use chainmesh_types::{ChannelId, Error, IbcPacket, PacketType, PortId, Result};

/// Channel lifecycle. Open -> Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Init,
    Open,
    Closed,
}

/// Per-flow sequence authority.
///
/// `next_seq` starts at 1 and advances on every minted or accepted packet.
/// Out-of-order and duplicate sequences are rejected; there is no recovery
/// after a gap.
#[derive(Debug)]
pub struct IbcChannel {
    chain_id: String,
    port: PortId,
    channel: ChannelId,
    state: ChannelState,
    next_seq: u64,
}

impl IbcChannel {
    pub fn new(chain_id: impl Into<String>, port: PortId, channel: ChannelId) -> IbcChannel {
        IbcChannel {
            chain_id: chain_id.into(),
            port,
            channel,
            state: ChannelState::Init,
            next_seq: 1,
        }
    }

    /// Transition to Open.
    ///
    /// Opening an already-open channel fails with `InvalidState`; callers at
    /// the blockchain layer treat that as "already open" and proceed.
    /// Reopening a closed channel fails with `ChannelClosed`.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            ChannelState::Closed => Err(Error::channel_closed("channel is closed")),
            ChannelState::Open => Err(Error::invalid_state("channel already open")),
            ChannelState::Init => {
                self.state = ChannelState::Open;
                Ok(())
            }
        }
    }

    /// Transition to Closed. Terminal.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Err(Error::channel_closed("channel already closed"));
        }
        self.state = ChannelState::Closed;
        Ok(())
    }

    /// Mint the next Data packet on this channel, consuming one sequence
    /// number. Requires the channel to be Open.
    pub fn make_packet(
        &mut self,
        dst_chain: &str,
        dst_port: PortId,
        dst_channel: ChannelId,
        payload: &str,
    ) -> Result<IbcPacket> {
        if self.state != ChannelState::Open {
            return Err(Error::invalid_state("channel not open"));
        }
        let packet = IbcPacket {
            packet_type: PacketType::Data,
            src_chain: self.chain_id.clone(),
            dst_chain: dst_chain.to_string(),
            src_port: self.port.clone(),
            src_channel: self.channel.clone(),
            dst_port,
            dst_channel,
            sequence: self.next_seq,
            payload: payload.to_string(),
        };
        self.next_seq += 1;
        Ok(packet)
    }

    /// Accept an inbound packet. Requires Open state and exact next-sequence
    /// match; gaps and duplicates both fail with `InvalidState` and leave the
    /// sequence untouched.
    pub fn accept_packet(&mut self, pkt: &IbcPacket) -> Result<()> {
        if self.state != ChannelState::Open {
            return Err(Error::channel_closed("channel not open"));
        }
        if pkt.sequence != self.next_seq {
            return Err(Error::invalid_state(format!(
                "packet sequence mismatch: got {}, expected {}",
                pkt.sequence, self.next_seq
            )));
        }
        self.next_seq += 1;
        Ok(())
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmesh_types::ErrorKind;

    fn open_channel() -> IbcChannel {
        let mut chan = IbcChannel::new("chain-A", PortId::new("port-A"), ChannelId::new("channel-A"));
        chan.open().unwrap();
        chan
    }

    fn mint(chan: &mut IbcChannel, payload: &str) -> IbcPacket {
        chan.make_packet("chain-B", PortId::new("port-B"), ChannelId::new("channel-B"), payload)
            .unwrap()
    }

    #[test]
    fn test_sequences_are_contiguous_from_one() {
        let mut chan = open_channel();
        for expected in 1..=5u64 {
            let pkt = mint(&mut chan, "x");
            assert_eq!(pkt.sequence, expected);
        }
        assert_eq!(chan.next_sequence(), 6);
    }

    #[test]
    fn test_make_packet_requires_open() {
        let mut chan = IbcChannel::new("chain-A", PortId::new("p"), ChannelId::new("c"));
        let err = chan
            .make_packet("chain-B", PortId::new("p2"), ChannelId::new("c2"), "x")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_open_sentinel_and_terminal_close() {
        let mut chan = open_channel();
        // Opening again is the "already open" sentinel.
        assert_eq!(chan.open().unwrap_err().kind(), ErrorKind::InvalidState);
        chan.close().unwrap();
        assert_eq!(chan.close().unwrap_err().kind(), ErrorKind::ChannelClosed);
        // Closed is terminal: no reopening.
        assert_eq!(chan.open().unwrap_err().kind(), ErrorKind::ChannelClosed);
    }

    #[test]
    fn test_accept_in_order_only() {
        let mut sender = open_channel();
        let pkt1 = mint(&mut sender, "one");
        let pkt2 = mint(&mut sender, "two");

        let mut receiver =
            IbcChannel::new("chain-B", PortId::new("port-B"), ChannelId::new("channel-B"));
        receiver.open().unwrap();

        // Out-of-order first: rejected, sequence unchanged.
        let err = receiver.accept_packet(&pkt2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(receiver.next_sequence(), 1);

        receiver.accept_packet(&pkt1).unwrap();
        receiver.accept_packet(&pkt2).unwrap();
        assert_eq!(receiver.next_sequence(), 3);

        // Duplicate: also rejected.
        let err = receiver.accept_packet(&pkt2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_accept_requires_open() {
        let mut sender = open_channel();
        let pkt = mint(&mut sender, "x");
        let mut receiver = IbcChannel::new("chain-B", PortId::new("p"), ChannelId::new("c"));
        let err = receiver.accept_packet(&pkt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
    }
}

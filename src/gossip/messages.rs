//! Gossip Wire Format
//!
//! Every gossip message starts with a binary header holding the channel name
//! and the sending peer, followed by a tag-specific body:
//!
//! - `Gossip`: header, then the body
//! - `GossipBroadcast`: header (sender is the broadcast's source), then the body
//! - `GossipUnicast`: header, destination peer name, then the body
//!
//! The protocol tag itself travels in the framing layer below. All binary
//! encoding uses bincode's standard configuration in big-endian.
use bincode::{Decode, Encode};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{GossipError, MeshError, Result};
use crate::peer::PeerName;

/// Wire discriminator selecting the delivery mode of a gossip message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolTag {
    /// Merge-based anti-entropy
    Gossip = 4,
    GossipUnicast = 5,
    GossipBroadcast = 6,
}

impl TryFrom<u8> for ProtocolTag {
    type Error = MeshError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            4 => Ok(ProtocolTag::Gossip),
            5 => Ok(ProtocolTag::GossipUnicast),
            6 => Ok(ProtocolTag::GossipBroadcast),
            other => Err(GossipError::Message(format!("unknown protocol tag {}", other)).into()),
        }
    }
}

impl std::fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolTag::Gossip => write!(f, "gossip"),
            ProtocolTag::GossipUnicast => write!(f, "gossip-unicast"),
            ProtocolTag::GossipBroadcast => write!(f, "gossip-broadcast"),
        }
    }
}

/// A tagged payload handed to the framing layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolMsg {
    pub tag: ProtocolTag,
    pub payload: Bytes,
}

impl ProtocolMsg {
    pub fn new(tag: ProtocolTag, payload: Bytes) -> Self {
        Self { tag, payload }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Decode, Encode)]
pub struct GossipHeader {
    pub channel: String,
    pub sender: PeerName,
}

impl GossipHeader {
    pub fn new(channel: &str, sender: PeerName) -> Self {
        Self {
            channel: channel.to_string(),
            sender,
        }
    }

    /// Decode a header from the front of `payload`, returning the rest
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8])> {
        let (header, read) = decode_value::<GossipHeader>(payload)?;
        Ok((header, &payload[read..]))
    }
}

/// Build a merge or broadcast message
pub fn make_gossip_msg(
    tag: ProtocolTag,
    channel: &str,
    sender: PeerName,
    body: &[u8],
) -> Result<ProtocolMsg> {
    let header = encode_value(&GossipHeader::new(channel, sender))?;
    let mut buf = BytesMut::with_capacity(header.len() + body.len());
    buf.put_slice(&header);
    buf.put_slice(body);
    Ok(ProtocolMsg::new(tag, buf.freeze()))
}

pub fn make_unicast_msg(
    channel: &str,
    sender: PeerName,
    dest: PeerName,
    body: &[u8],
) -> Result<ProtocolMsg> {
    let header = encode_value(&GossipHeader::new(channel, sender))?;
    let dest = encode_value(&dest)?;
    let mut buf = BytesMut::with_capacity(header.len() + dest.len() + body.len());
    buf.put_slice(&header);
    buf.put_slice(&dest);
    buf.put_slice(body);
    Ok(ProtocolMsg::new(ProtocolTag::GossipUnicast, buf.freeze()))
}

/// Split a unicast body into its destination and the message proper
pub fn decode_unicast_dest(rest: &[u8]) -> Result<(PeerName, &[u8])> {
    let (dest, read) = decode_value::<PeerName>(rest)?;
    Ok((dest, &rest[read..]))
}

pub fn encode_value<T: Encode>(value: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard().with_big_endian();
    Ok(bincode::encode_to_vec(value, config)?)
}

pub fn decode_value<T: Decode<()>>(data: &[u8]) -> Result<(T, usize)> {
    let config = bincode::config::standard().with_big_endian();
    Ok(bincode::decode_from_slice(data, config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_precedes_body() {
        let msg = make_gossip_msg(
            ProtocolTag::Gossip,
            "app",
            PeerName::new(7),
            b"payload",
        )
        .unwrap();
        assert_eq!(msg.tag, ProtocolTag::Gossip);

        let (header, rest) = GossipHeader::decode(&msg.payload).unwrap();
        assert_eq!(header, GossipHeader::new("app", PeerName::new(7)));
        assert_eq!(rest, b"payload");
    }

    #[test]
    fn test_unicast_carries_destination() {
        let msg = make_unicast_msg("app", PeerName::new(1), PeerName::new(2), b"hi").unwrap();
        assert_eq!(msg.tag, ProtocolTag::GossipUnicast);

        let (header, rest) = GossipHeader::decode(&msg.payload).unwrap();
        assert_eq!(header.sender, PeerName::new(1));
        let (dest, body) = decode_unicast_dest(rest).unwrap();
        assert_eq!(dest, PeerName::new(2));
        assert_eq!(body, b"hi");
    }

    #[test]
    fn test_truncated_header_is_an_error() {
        let msg = make_gossip_msg(ProtocolTag::Gossip, "topology", PeerName::new(3), b"")
            .unwrap();
        let truncated = &msg.payload[..msg.payload.len() - 1];
        assert!(GossipHeader::decode(truncated).is_err());
        assert!(GossipHeader::decode(&[]).is_err());
    }

    #[test]
    fn test_protocol_tag_from_u8() {
        assert_eq!(ProtocolTag::try_from(5).unwrap(), ProtocolTag::GossipUnicast);
        assert_eq!(ProtocolTag::GossipBroadcast as u8, 6);
        assert!(ProtocolTag::try_from(0).is_err());
    }
}

use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use bincode::de::Decoder;
use bincode::error::DecodeError;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::error::MeshError;

/// Unique identifier of a mesh node. Rendered like a MAC address.
///
/// Only the low 48 bits are significant; every constructor, including
/// decoding, masks the rest off.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Serialize,
    Encode,
    PartialEq,
    PartialOrd,
    Ord,
    Eq,
    Hash,
)]
#[serde(from = "u64")]
pub struct PeerName(u64);

/// Set of peer names; ordered so encodings are deterministic
pub type PeerNameSet = BTreeSet<PeerName>;

const NAME_MASK: u64 = 0xffff_ffff_ffff;

impl PeerName {
    pub const fn new(value: u64) -> Self {
        Self(value & NAME_MASK)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Derive a stable name from arbitrary text, e.g. a hostname and port
    pub fn from_seed(seed: &str) -> Self {
        let mut s = DefaultHasher::new();
        seed.hash(&mut s);
        Self::new(s.finish())
    }
}

impl From<u64> for PeerName {
    fn from(value: u64) -> Self {
        PeerName::new(value)
    }
}

impl<Context> Decode<Context> for PeerName {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(PeerName::new(u64::decode(decoder)?))
    }
}
bincode::impl_borrow_decode!(PeerName);

impl std::fmt::Display for PeerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl std::str::FromStr for PeerName {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != ':').collect();
        if hex.is_empty() || hex.len() > 12 {
            return Err(config_error!("Invalid peer name: {}", s));
        }
        u64::from_str_radix(&hex, 16)
            .map(PeerName::new)
            .map_err(|e| config_error!("Invalid peer name '{}': {}", s, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_through_parse() {
        let name = PeerName::new(0x0a0b0c0d0e0f);
        assert_eq!(name.to_string(), "0a:0b:0c:0d:0e:0f");
        assert_eq!("0a:0b:0c:0d:0e:0f".parse::<PeerName>().unwrap(), name);
        assert_eq!("a0b0c0d0e0f".parse::<PeerName>().unwrap(), name);
    }

    #[test]
    fn test_names_are_truncated_to_48_bits() {
        assert_eq!(PeerName::new(u64::MAX).value(), NAME_MASK);
    }

    #[test]
    fn test_decoded_names_are_truncated_to_48_bits() {
        let config = bincode::config::standard();
        let wire = bincode::encode_to_vec(0xabcd_0a0b_0c0d_0e0f_u64, config).unwrap();
        let (decoded, _): (PeerName, usize) = bincode::decode_from_slice(&wire, config).unwrap();
        assert_eq!(decoded, PeerName::new(0x0a0b0c0d0e0f));
        assert_eq!(decoded.value(), 0x0a0b0c0d0e0f);

        let json: PeerName = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(json.value(), NAME_MASK);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<PeerName>().is_err());
        assert!("zz:zz".parse::<PeerName>().is_err());
        assert!("01:02:03:04:05:06:07".parse::<PeerName>().is_err());
    }

    #[test]
    fn test_from_seed_is_stable() {
        assert_eq!(PeerName::from_seed("host:6783"), PeerName::from_seed("host:6783"));
        assert_ne!(PeerName::from_seed("host:6783"), PeerName::from_seed("host:6784"));
    }
}

use std::fmt;

use crate::peer::PeerName;

/// Main error type for the mesh gossip substrate
#[derive(Debug)]
pub enum MeshError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Gossip protocol errors
    Gossip(GossipError),

    /// System I/O errors
    Io(std::io::Error),

    /// Transport layer errors
    Transport(String),

    /// Connection handshake failures
    Handshake(String),

    /// Serialization/deserialization errors
    Serialization(SerializationError),
}

/// Gossip protocol specific errors
#[derive(Debug)]
pub enum GossipError {
    /// A channel with this name is already registered
    DuplicateChannel(String),

    /// Unicast received on a channel whose gossiper forbids it
    UnexpectedUnicast(String),

    /// No route towards the destination peer
    UnknownRelay(PeerName),

    /// A route exists but we hold no connection to the next hop
    NoConnection(PeerName),

    /// Message parsing or validation errors
    Message(String),
}

/// Serialization related errors
#[derive(Debug)]
pub enum SerializationError {
    /// Binary encoding errors
    Encode(bincode::error::EncodeError),

    /// Binary decoding errors
    Decode(bincode::error::DecodeError),
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MeshError::Gossip(err) => write!(f, "Gossip error: {}", err),
            MeshError::Io(err) => write!(f, "I/O error: {}", err),
            MeshError::Transport(msg) => write!(f, "Transport error: {}", msg),
            MeshError::Handshake(msg) => write!(f, "Handshake error: {}", msg),
            MeshError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl fmt::Display for GossipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GossipError::DuplicateChannel(name) => write!(f, "duplicate channel {}", name),
            GossipError::UnexpectedUnicast(channel) => {
                write!(f, "unexpected unicast on channel {}", channel)
            }
            GossipError::UnknownRelay(peer) => write!(f, "unknown relay destination: {}", peer),
            GossipError::NoConnection(peer) => {
                write!(f, "unable to find connection to relay peer {}", peer)
            }
            GossipError::Message(msg) => write!(f, "Message: {}", msg),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Encode(err) => write!(f, "Binary encode: {}", err),
            SerializationError::Decode(err) => write!(f, "Binary decode: {}", err),
        }
    }
}

impl std::error::Error for MeshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MeshError::Io(err) => Some(err),
            MeshError::Gossip(err) => Some(err),
            MeshError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for GossipError {}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Encode(err) => Some(err),
            SerializationError::Decode(err) => Some(err),
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, MeshError>;

impl MeshError {
    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            MeshError::Config(_) => "configuration_error",
            MeshError::Gossip(_) => "gossip_error",
            MeshError::Io(_) => "io_error",
            MeshError::Transport(_) => "transport_error",
            MeshError::Handshake(_) => "handshake_error",
            MeshError::Serialization(_) => "serialization_error",
        }
    }
}

// Conversions from common error types
impl From<std::io::Error> for MeshError {
    fn from(err: std::io::Error) -> Self {
        MeshError::Io(err)
    }
}

impl From<bincode::error::EncodeError> for MeshError {
    fn from(err: bincode::error::EncodeError) -> Self {
        MeshError::Serialization(SerializationError::Encode(err))
    }
}

impl From<bincode::error::DecodeError> for MeshError {
    fn from(err: bincode::error::DecodeError) -> Self {
        MeshError::Serialization(SerializationError::Decode(err))
    }
}

impl From<GossipError> for MeshError {
    fn from(err: GossipError) -> Self {
        MeshError::Gossip(err)
    }
}

impl From<SerializationError> for MeshError {
    fn from(err: SerializationError) -> Self {
        MeshError::Serialization(err)
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::MeshError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MeshError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::MeshError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MeshError::Transport(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_err = MeshError::Config("Invalid port".to_string());
        assert_eq!(config_err.to_string(), "Configuration error: Invalid port");

        let dup: MeshError = GossipError::DuplicateChannel("topology".to_string()).into();
        assert_eq!(dup.to_string(), "Gossip error: duplicate channel topology");

        let io_err = MeshError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
        assert!(io_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let mesh_err: MeshError = io_err.into();
        assert!(matches!(mesh_err, MeshError::Io(_)));
        assert_eq!(mesh_err.error_type(), "io_error");
    }

    #[test]
    fn test_macros() {
        let err = config_error!("Port {} is invalid", 65536);
        assert_eq!(err.to_string(), "Configuration error: Port 65536 is invalid");

        let err = transport_error!("Frame too large");
        assert_eq!(err.to_string(), "Transport error: Frame too large");
    }
}

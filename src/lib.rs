pub mod cli;
pub mod connection_maker;
pub mod error;
pub mod gossip;
pub mod overlay;
pub mod peer;
pub mod router;
pub mod routes;
pub mod settings;
pub mod status;
pub mod token_bucket;
pub mod topology;
pub mod transport;

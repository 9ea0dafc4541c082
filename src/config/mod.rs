//! Configuration management for gelfstream

pub mod settings;

pub use settings::{
    ClientConfig, CompressionMode, DatagramConfig, SocketOptions, StreamConfig, TransportConfig,
    DEFAULT_GELF_PORT,
};

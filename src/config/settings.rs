//! Configuration structures for gelfstream

use crate::transport::chunk::HEADER_LEN;
use crate::types::LogLevel;
use crate::{GelfError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Port Graylog listens on for GELF input by default
pub const DEFAULT_GELF_PORT: u16 = 12201;

/// Payload compression applied before chunking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Send JSON bytes as-is
    None,
    /// zlib deflate
    #[default]
    Deflate,
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMode::None => write!(f, "none"),
            CompressionMode::Deflate => write!(f, "deflate"),
        }
    }
}

impl FromStr for CompressionMode {
    type Err = GelfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(CompressionMode::None),
            "deflate" => Ok(CompressionMode::Deflate),
            other => Err(GelfError::Config(format!(
                "Unsupported compression mode '{}', expected 'none' or 'deflate'",
                other
            ))),
        }
    }
}

/// UDP transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatagramConfig {
    /// Collector host name or address
    pub host: String,
    /// Collector port
    pub port: u16,
    /// Largest datagram sent before chunking kicks in, header included
    pub max_payload_size: usize,
    /// Compression applied to the JSON payload
    pub compression: CompressionMode,
    /// Reuse one buffer for all chunks, sending them one after another
    pub reuse_chunk_buffer: bool,
}

/// Raw socket options for the TCP transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketOptions {
    /// Caller-supplied host; always replaced by the destination host
    pub host: Option<String>,
    /// Caller-supplied port; always replaced by the destination port
    pub port: Option<u16>,
    /// Set TCP_NODELAY
    pub nodelay: Option<bool>,
    /// IP time-to-live
    pub ttl: Option<u32>,
    /// Buffered bytes above which the stream stops accepting writes
    pub write_high_water_mark: usize,
}

/// TCP transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Collector host name or address
    pub host: String,
    /// Collector port
    pub port: u16,
    /// Messages held while the stream is backpressured
    pub max_backlog_messages: usize,
    /// Extra socket options
    pub socket_options: SocketOptions,
}

/// Transport selection, tagged by `kind` in config files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Chunked GELF over UDP
    Udp(DatagramConfig),
    /// NUL-framed GELF over TCP
    Tcp(StreamConfig),
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Transport to ship messages over
    pub transport: TransportConfig,
    /// Host reported in messages; detected from the system when unset
    pub host: Option<String>,
    /// Facility attached to every message
    pub facility: Option<String>,
    /// Least severe level that is still sent
    pub min_level: LogLevel,
    /// Fields attached to every message
    pub additional_fields: BTreeMap<String, Value>,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_GELF_PORT,
            max_payload_size: 1400,
            compression: CompressionMode::default(),
            reuse_chunk_buffer: true,
        }
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            nodelay: None,
            ttl: None,
            write_high_water_mark: 16 * 1024,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_GELF_PORT,
            max_backlog_messages: 1024,
            socket_options: SocketOptions::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Udp(DatagramConfig::default())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            host: None,
            facility: None,
            min_level: LogLevel::Debug,
            additional_fields: BTreeMap::new(),
        }
    }
}

fn validate_destination(host: &str, port: u16) -> Result<()> {
    if host.is_empty() {
        return Err(GelfError::Config("Destination host cannot be empty".to_string()));
    }
    if port == 0 {
        return Err(GelfError::Config("Destination port cannot be 0".to_string()));
    }
    Ok(())
}

impl DatagramConfig {
    /// UDP config for the given destination with default options
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_destination(&self.host, self.port)?;
        if self.max_payload_size <= HEADER_LEN {
            return Err(GelfError::Config(format!(
                "max_payload_size must be greater than {}, got {}",
                HEADER_LEN, self.max_payload_size
            )));
        }
        if self.compression == CompressionMode::Deflate && !cfg!(feature = "compression") {
            return Err(GelfError::Config(
                "Deflate support not compiled in. Enable 'compression' feature.".to_string(),
            ));
        }
        Ok(())
    }
}

impl StreamConfig {
    /// TCP config for the given destination with default options
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_destination(&self.host, self.port)?;
        if self.socket_options.write_high_water_mark == 0 {
            return Err(GelfError::Config(
                "write_high_water_mark must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Socket options with the destination host and port applied over any
    /// caller-supplied values
    pub fn effective_socket_options(&self) -> SocketOptions {
        SocketOptions {
            host: Some(self.host.clone()),
            port: Some(self.port),
            ..self.socket_options.clone()
        }
    }
}

impl TransportConfig {
    /// Build a transport config from a kind name such as `"udp"` or `"tcp"`
    pub fn from_kind(kind: &str, host: impl Into<String>, port: u16) -> Result<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportConfig::Udp(DatagramConfig::new(host, port))),
            "tcp" => Ok(TransportConfig::Tcp(StreamConfig::new(host, port))),
            other => Err(GelfError::Config(format!(
                "Unsupported transport kind '{}', expected 'udp' or 'tcp'",
                other
            ))),
        }
    }

    /// Kind name as used in config files
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Udp(_) => "udp",
            TransportConfig::Tcp(_) => "tcp",
        }
    }

    /// Replace the destination of whichever variant is configured
    pub fn set_destination(&mut self, host: Option<String>, port: Option<u16>) {
        let (dest_host, dest_port) = match self {
            TransportConfig::Udp(c) => (&mut c.host, &mut c.port),
            TransportConfig::Tcp(c) => (&mut c.host, &mut c.port),
        };
        if let Some(host) = host {
            *dest_host = host;
        }
        if let Some(port) = port {
            *dest_port = port;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self {
            TransportConfig::Udp(c) => c.validate(),
            TransportConfig::Tcp(c) => c.validate(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GelfError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| GelfError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if matches!(&self.host, Some(h) if h.is_empty()) {
            return Err(GelfError::Config("Host cannot be empty".to_string()));
        }
        self.transport.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_defaults() {
        let udp = DatagramConfig::default();
        assert_eq!(udp.max_payload_size, 1400);
        assert_eq!(udp.compression, CompressionMode::Deflate);
        assert!(udp.reuse_chunk_buffer);
        assert_eq!(udp.port, 12201);

        let tcp = StreamConfig::default();
        assert_eq!(tcp.max_backlog_messages, 1024);
        assert!(tcp.validate().is_ok());
    }

    #[test]
    fn test_payload_size_bounds() {
        let mut config = DatagramConfig::new("localhost", 12201);
        config.max_payload_size = 12;
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Configuration);
        config.max_payload_size = 13;
        config.compression = CompressionMode::None;
        assert!(config.validate().is_ok());
        // Datagrams too large for the network fail when sent, not here.
        config.max_payload_size = 70_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_destination_validation() {
        assert!(DatagramConfig::new("", 12201).validate().is_err());
        assert!(StreamConfig::new("localhost", 0).validate().is_err());
    }

    #[test]
    fn test_destination_overrides_socket_options() {
        let mut config = StreamConfig::new("graylog", 12202);
        config.socket_options.host = Some("elsewhere".to_string());
        config.socket_options.port = Some(1);
        config.socket_options.nodelay = Some(true);

        let options = config.effective_socket_options();
        assert_eq!(options.host.as_deref(), Some("graylog"));
        assert_eq!(options.port, Some(12202));
        assert_eq!(options.nodelay, Some(true));
    }

    #[test]
    fn test_parse_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            facility = "billing"
            min_level = "warning"

            [transport]
            kind = "tcp"
            host = "graylog.internal"
            port = 12202
            max_backlog_messages = 10

            [transport.socket_options]
            nodelay = true
            "#,
        )
        .unwrap();

        assert_eq!(config.min_level, LogLevel::Warning);
        assert_eq!(config.facility.as_deref(), Some("billing"));
        match config.transport {
            TransportConfig::Tcp(tcp) => {
                assert_eq!(tcp.host, "graylog.internal");
                assert_eq!(tcp.max_backlog_messages, 10);
                assert_eq!(tcp.socket_options.nodelay, Some(true));
            }
            other => panic!("expected tcp transport, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_toml() {
        let unknown_kind = "[transport]\nkind = \"sctp\"\n";
        assert_eq!(
            ClientConfig::from_toml_str(unknown_kind).unwrap_err().kind(),
            ErrorKind::Configuration
        );

        let bad_compression = "[transport]\nkind = \"udp\"\ncompression = \"gzip\"\n";
        assert!(ClientConfig::from_toml_str(bad_compression).is_err());

        let negative_backlog = "[transport]\nkind = \"tcp\"\nmax_backlog_messages = -1\n";
        assert!(ClientConfig::from_toml_str(negative_backlog).is_err());
    }

    #[test]
    fn test_from_kind() {
        assert_eq!(TransportConfig::from_kind("UDP", "h", 1).unwrap().kind(), "udp");
        assert_eq!(TransportConfig::from_kind("tcp", "h", 1).unwrap().kind(), "tcp");
        assert!(TransportConfig::from_kind("quic", "h", 1).is_err());
        assert!("gzip".parse::<CompressionMode>().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gelf.toml");
        std::fs::write(&path, "[transport]\nkind = \"udp\"\nmax_payload_size = 8192\n").unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        match config.transport {
            TransportConfig::Udp(udp) => assert_eq!(udp.max_payload_size, 8192),
            other => panic!("expected udp transport, got {:?}", other),
        }
        assert!(ClientConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}

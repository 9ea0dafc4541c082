//! # gelfstream - GELF log shipping
//!
//! gelfstream turns structured log records into GELF JSON and ships them to a
//! remote collector (Graylog, Logstash, ...) over one of two transports.
//!
//! ## Features
//!
//! - **UDP**: best-effort datagrams with GELF chunking for oversized payloads
//! - **TCP**: NUL-framed stream with a bounded backlog under backpressure
//! - **Compression**: optional zlib deflate for UDP payloads
//! - **Fire-and-forget**: `send()` never blocks; failures arrive on an error channel
//!
//! ## Quick Start
//!
//! ```no_run
//! use gelfstream::client::GelfClient;
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = GelfClient::connect_udp("graylog.local", 12201).await?;
//!     let mut errors = client.take_errors().expect("first call");
//!
//!     let mut fields = HashMap::new();
//!     fields.insert("component".to_string(), "auth".into());
//!
//!     client.info_with_fields("Authentication successful", fields)?;
//!     client.close().await?;
//!
//!     while let Ok(err) = errors.try_recv() {
//!         eprintln!("delivery failed: {}", err);
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod transport;
pub mod types;

/// Common error types used throughout gelfstream
pub mod error {
    use std::fmt;
    use tokio::sync::mpsc;

    /// Coarse classification of a [`GelfError`], as seen by error subscribers
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ErrorKind {
        /// Invalid configuration, raised synchronously at construction
        Configuration,
        /// Message would need more chunks than the protocol allows
        Oversize,
        /// An underlying socket write failed
        Transport,
        /// Stream backlog was full while backpressured
        BacklogOverflow,
        /// Connecting failed, or the transport is not connected
        Connection,
        /// Message could not be serialized or compressed
        Serialization,
        /// Message content was rejected before sending
        Validation,
    }

    /// gelfstream error types
    #[derive(Debug)]
    pub enum GelfError {
        /// Configuration error
        Config(String),
        /// Payload needs more chunks than the GELF limit
        Oversize {
            /// Size of the (possibly compressed) payload in bytes
            bytes: usize,
            /// Number of chunks the payload would have needed
            chunks: usize,
        },
        /// Socket write failed
        Transport {
            /// What was being written when the failure happened
            context: String,
            /// Underlying I/O failure
            source: std::io::Error,
        },
        /// Backlog at capacity, message dropped
        BacklogOverflow {
            /// Configured backlog capacity
            capacity: usize,
        },
        /// Connection error
        Connection(String),
        /// I/O operation failed
        Io(std::io::Error),
        /// Serialization failed
        Serde(serde_json::Error),
        /// Message validation failed
        Validation(String),
    }

    impl GelfError {
        /// Classify this error
        pub fn kind(&self) -> ErrorKind {
            match self {
                GelfError::Config(_) => ErrorKind::Configuration,
                GelfError::Oversize { .. } => ErrorKind::Oversize,
                GelfError::Transport { .. } => ErrorKind::Transport,
                GelfError::BacklogOverflow { .. } => ErrorKind::BacklogOverflow,
                GelfError::Connection(_) => ErrorKind::Connection,
                GelfError::Io(_) => ErrorKind::Transport,
                GelfError::Serde(_) => ErrorKind::Serialization,
                GelfError::Validation(_) => ErrorKind::Validation,
            }
        }

        pub(crate) fn transport(context: impl Into<String>, source: std::io::Error) -> Self {
            GelfError::Transport {
                context: context.into(),
                source,
            }
        }
    }

    impl fmt::Display for GelfError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                GelfError::Config(e) => write!(f, "Configuration error: {}", e),
                GelfError::Oversize { bytes, chunks } => write!(
                    f,
                    "Message of {} bytes needs {} chunks, more than the limit of {}",
                    bytes,
                    chunks,
                    crate::transport::chunk::MAX_CHUNKS
                ),
                GelfError::Transport { context, source } => {
                    write!(f, "Transport error while {}: {}", context, source)
                }
                GelfError::BacklogOverflow { capacity } => write!(
                    f,
                    "Backlog full ({} messages), message dropped",
                    capacity
                ),
                GelfError::Connection(e) => write!(f, "Connection error: {}", e),
                GelfError::Io(e) => write!(f, "I/O error: {}", e),
                GelfError::Serde(e) => write!(f, "Serialization error: {}", e),
                GelfError::Validation(e) => write!(f, "Invalid message: {}", e),
            }
        }
    }

    impl std::error::Error for GelfError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            match self {
                GelfError::Transport { source, .. } => Some(source),
                GelfError::Io(e) => Some(e),
                GelfError::Serde(e) => Some(e),
                _ => None,
            }
        }
    }

    impl From<std::io::Error> for GelfError {
        fn from(err: std::io::Error) -> Self {
            GelfError::Io(err)
        }
    }

    impl From<serde_json::Error> for GelfError {
        fn from(err: serde_json::Error) -> Self {
            GelfError::Serde(err)
        }
    }

    /// Result type alias for gelfstream operations
    pub type Result<T> = std::result::Result<T, GelfError>;

    /// Receiving end of the asynchronous error channel
    pub type ErrorEvents = mpsc::UnboundedReceiver<GelfError>;

    /// Publishing end of the asynchronous error channel.
    ///
    /// Cloned into every transport and background task. Errors are always
    /// logged; they are also forwarded when a subscriber is still listening.
    #[derive(Debug, Clone)]
    pub struct ErrorReporter {
        tx: Option<mpsc::UnboundedSender<GelfError>>,
    }

    impl ErrorReporter {
        /// Create a reporter together with its receiving end
        pub fn channel() -> (Self, ErrorEvents) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { tx: Some(tx) }, rx)
        }

        /// A reporter that only logs
        pub fn discard() -> Self {
            Self { tx: None }
        }

        /// Publish an error
        pub fn report(&self, err: GelfError) {
            tracing::warn!(kind = ?err.kind(), "{}", err);
            if let Some(tx) = &self.tx {
                let _ = tx.send(err);
            }
        }
    }
}

pub use error::{ErrorKind, ErrorReporter, GelfError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{GelfClient, LogLevel};
    pub use crate::config::{ClientConfig, CompressionMode, DatagramConfig, StreamConfig, TransportConfig};
    pub use crate::transport::{DatagramTransport, StreamTransport, Transport};
    pub use crate::types::{GelfMessage, LogFields};
    pub use crate::{ErrorKind, GelfError, Result};
}

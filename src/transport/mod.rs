//! GELF transports
//!
//! [`Transport`] is the seam the client talks to; it wraps either the
//! chunking UDP transport or the backlogged TCP transport. Both are
//! fire-and-forget: `send` never blocks and never fails synchronously, and
//! runtime problems are published on the [`ErrorReporter`] channel.

pub mod chunk;
pub mod compression;
pub mod datagram;
pub mod frame;
pub mod stream;

use crate::config::TransportConfig;
use crate::{ErrorReporter, Result};
use serde::Serialize;

pub use datagram::DatagramTransport;
pub use frame::GelfFrameCodec;
pub use stream::{StreamState, StreamTransport};

/// One of the two supported transports
pub enum Transport {
    /// Chunked UDP
    Datagram(DatagramTransport),
    /// NUL-framed TCP
    Stream(StreamTransport),
}

impl Transport {
    /// Build the transport selected by `config`; validation happens here
    pub fn from_config(config: &TransportConfig, reporter: ErrorReporter) -> Result<Self> {
        match config {
            TransportConfig::Udp(c) => Ok(Transport::Datagram(DatagramTransport::new(
                c.clone(),
                reporter,
            )?)),
            TransportConfig::Tcp(c) => Ok(Transport::Stream(StreamTransport::new(
                c.clone(),
                reporter,
            )?)),
        }
    }

    /// Acquire the underlying socket
    pub async fn connect(&self) -> Result<()> {
        match self {
            Transport::Datagram(t) => t.connect().await,
            Transport::Stream(t) => t.connect().await,
        }
    }

    /// Send one message without waiting for the outcome
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) {
        match self {
            Transport::Datagram(t) => t.send(message),
            Transport::Stream(t) => t.send(message),
        }
    }

    /// Release the socket; unsent stream backlog is discarded
    pub fn close(&self) {
        match self {
            Transport::Datagram(t) => t.close(),
            Transport::Stream(t) => t.close(),
        }
    }

    /// Like [`close`](Self::close), but first waits for pending datagrams,
    /// or for a stream transport's backlog and buffered writes, to go out
    pub async fn drain_and_close(&self) {
        match self {
            Transport::Datagram(t) => {
                t.flush().await;
                t.close();
            }
            Transport::Stream(t) => t.drain_and_close().await,
        }
    }

    /// Kind name, `"udp"` or `"tcp"`
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Datagram(_) => "udp",
            Transport::Stream(_) => "tcp",
        }
    }
}

//! GELF over UDP with chunking

use crate::config::DatagramConfig;
use crate::transport::chunk::{encode_chunk_into, encode_chunks, new_message_id, ChunkPlan};
use crate::transport::compression::compress;
use crate::{ErrorReporter, GelfError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// Where datagrams go once a transport is connected
#[derive(Clone)]
enum Endpoint {
    /// Unconnected UDP socket plus the resolved collector address
    Udp {
        socket: Arc<UdpSocket>,
        destination: SocketAddr,
    },

    /// Recording sink for tests - observes dispatch order without a network
    #[cfg(test)]
    Recording(Arc<tests::RecordingSink>),
}

impl Endpoint {
    async fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        match self {
            Endpoint::Udp {
                socket,
                destination,
            } => socket.send_to(datagram, *destination).await,
            #[cfg(test)]
            Endpoint::Recording(sink) => sink.send(datagram).await,
        }
    }
}

/// Best-effort GELF delivery over UDP.
///
/// Payloads above `max_payload_size` are split into GELF chunks. With
/// `reuse_chunk_buffer` the chunks share one buffer and go out strictly one
/// after another; without it every chunk gets its own buffer and all of them
/// are dispatched at once.
pub struct DatagramTransport {
    config: DatagramConfig,
    reporter: ErrorReporter,
    endpoint: Mutex<Option<Endpoint>>,
    // Runtime `connect` ran on; `send` spawns onto it from any thread.
    runtime: Mutex<Option<Handle>>,
    // Sends spawned by `send` that have not finished yet.
    in_flight: Arc<watch::Sender<usize>>,
}

impl DatagramTransport {
    /// Create a transport; the configuration is validated here
    pub fn new(config: DatagramConfig, reporter: ErrorReporter) -> Result<Self> {
        config.validate()?;
        let (in_flight, _) = watch::channel(0);
        Ok(Self {
            config,
            reporter,
            endpoint: Mutex::new(None),
            runtime: Mutex::new(None),
            in_flight: Arc::new(in_flight),
        })
    }

    /// Transport configuration
    pub fn config(&self) -> &DatagramConfig {
        &self.config
    }

    /// Whether `connect` has completed and `close` has not been called since
    pub fn is_connected(&self) -> bool {
        self.endpoint.lock().is_some()
    }

    /// Resolve the collector and bind a local socket of the matching family
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let destination = lookup_host((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| {
                GelfError::Connection(format!("Failed to resolve {}: {}", self.config.host, e))
            })?
            .next()
            .ok_or_else(|| {
                GelfError::Connection(format!("No address found for {}", self.config.host))
            })?;

        let bind_addr: SocketAddr = if destination.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| GelfError::Connection(format!("Failed to bind UDP socket: {}", e)))?;

        debug!(%destination, "UDP transport ready");
        *self.runtime.lock() = Some(Handle::current());
        *self.endpoint.lock() = Some(Endpoint::Udp {
            socket: Arc::new(socket),
            destination,
        });
        Ok(())
    }

    /// Release the socket. Safe to call repeatedly and before `connect`.
    pub fn close(&self) {
        self.runtime.lock().take();
        if self.endpoint.lock().take().is_some() {
            debug!("UDP transport closed");
        }
    }

    /// Fire-and-forget send; failures are published on the error channel
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) {
        let endpoint = match self.endpoint.lock().clone() {
            Some(endpoint) => endpoint,
            None => {
                self.reporter.report(GelfError::Connection(
                    "UDP transport is not connected".to_string(),
                ));
                return;
            }
        };

        let runtime = self.runtime.lock().clone();
        let runtime = match runtime.or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => {
                self.reporter.report(GelfError::Connection(
                    "no Tokio runtime to dispatch datagrams on".to_string(),
                ));
                return;
            }
        };

        let payload = match self.encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                self.reporter.report(e);
                return;
            }
        };

        let max_payload_size = self.config.max_payload_size;
        let reuse = self.config.reuse_chunk_buffer;
        let reporter = self.reporter.clone();
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.send_modify(|n| *n += 1);
        runtime.spawn(async move {
            if let Err(e) = dispatch(&endpoint, max_payload_size, reuse, payload).await {
                reporter.report(e);
            }
            in_flight.send_modify(|n| *n -= 1);
        });
    }

    /// Wait until every message handed to `send` has been dispatched
    pub async fn flush(&self) {
        let mut pending = self.in_flight.subscribe();
        loop {
            if *pending.borrow_and_update() == 0 {
                break;
            }
            if pending.changed().await.is_err() {
                break;
            }
        }
    }

    /// Send and wait for the outcome, returning the number of datagrams sent
    pub async fn deliver<M: Serialize + ?Sized>(&self, message: &M) -> Result<usize> {
        let endpoint = self
            .endpoint
            .lock()
            .clone()
            .ok_or_else(|| GelfError::Connection("UDP transport is not connected".to_string()))?;
        let payload = self.encode(message)?;
        dispatch(
            &endpoint,
            self.config.max_payload_size,
            self.config.reuse_chunk_buffer,
            payload,
        )
        .await
    }

    fn encode<M: Serialize + ?Sized>(&self, message: &M) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(message)?;
        compress(self.config.compression, json)
    }
}

async fn dispatch(
    endpoint: &Endpoint,
    max_payload_size: usize,
    reuse_chunk_buffer: bool,
    payload: Vec<u8>,
) -> Result<usize> {
    let plan = match ChunkPlan::for_payload(payload.len(), max_payload_size)? {
        Some(plan) => plan,
        None => {
            endpoint
                .send(&payload)
                .await
                .map_err(|e| GelfError::transport("sending datagram", e))?;
            return Ok(1);
        }
    };

    let id = new_message_id();
    trace!(
        bytes = payload.len(),
        chunks = plan.count,
        chunk_size = plan.chunk_size,
        "chunking message"
    );

    if reuse_chunk_buffer {
        send_sequential(endpoint, &payload, &plan, &id).await
    } else {
        send_concurrent(endpoint, &payload, &plan, &id).await
    }
}

// The buffer is overwritten for every chunk, so each send must complete
// before the next chunk is laid out.
async fn send_sequential(
    endpoint: &Endpoint,
    payload: &[u8],
    plan: &ChunkPlan,
    id: &[u8; 8],
) -> Result<usize> {
    let mut buf = vec![0u8; plan.chunk_size];
    for seq in 0..plan.count {
        let chunk = encode_chunk_into(&mut buf, payload, plan, id, seq);
        endpoint.send(chunk).await.map_err(|e| {
            GelfError::transport(format!("sending chunk {} of {}", seq + 1, plan.count), e)
        })?;
    }
    Ok(plan.count)
}

async fn send_concurrent(
    endpoint: &Endpoint,
    payload: &[u8],
    plan: &ChunkPlan,
    id: &[u8; 8],
) -> Result<usize> {
    let mut tasks = JoinSet::new();
    for (seq, chunk) in encode_chunks(payload, plan, id).into_iter().enumerate() {
        let endpoint = endpoint.clone();
        tasks.spawn(async move { endpoint.send(&chunk).await.map_err(|e| (seq, e)) });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let failure = match joined {
            Ok(Ok(_)) => continue,
            Ok(Err((seq, e))) => {
                GelfError::transport(format!("sending chunk {} of {}", seq + 1, plan.count), e)
            }
            Err(e) => GelfError::transport("sending chunk", io::Error::other(e)),
        };
        if first_error.is_none() {
            first_error = Some(failure);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(plan.count),
    }
}

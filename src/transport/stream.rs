//! GELF over TCP with a bounded backlog

use crate::config::StreamConfig;
use crate::transport::frame::GelfFrameCodec;
use crate::{ErrorReporter, GelfError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Lifecycle of a [`StreamTransport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// `connect` has not been called
    Disconnected,
    /// Connection is being established; sends are backlogged
    Connecting,
    /// Writes go straight to the connection
    Accepting,
    /// Too many bytes are waiting to be written; sends are backlogged
    Backpressured,
    /// Terminal
    Closed,
}

struct Shared {
    state: StreamState,
    backlog: VecDeque<Bytes>,
    max_backlog: usize,
    // Bytes handed to the writer task that have not reached the socket yet.
    buffered: usize,
    high_water_mark: usize,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    idle: watch::Sender<bool>,
    // False while a connect attempt is in progress.
    settled: watch::Sender<bool>,
}

impl Shared {
    fn write(&mut self, frame: Bytes) {
        let Some(writer) = &self.writer else {
            return;
        };
        let len = frame.len();
        if writer.send(frame).is_ok() {
            self.buffered += len;
            if self.buffered >= self.high_water_mark {
                self.state = StreamState::Backpressured;
            }
        }
    }

    /// Write backlogged frames in order until the backlog is empty or the
    /// stream stops accepting again.
    fn drain_backlog(&mut self) {
        while self.state == StreamState::Accepting {
            match self.backlog.pop_front() {
                Some(frame) => self.write(frame),
                None => break,
            }
        }
    }

    fn update_idle(&self) {
        let idle = match self.state {
            StreamState::Disconnected | StreamState::Closed => true,
            _ => self.backlog.is_empty() && self.buffered == 0,
        };
        self.idle.send_replace(idle);
    }

    fn shut_down(&mut self) -> usize {
        let discarded = self.backlog.len();
        self.backlog.clear();
        self.state = StreamState::Closed;
        self.writer = None;
        self.update_idle();
        self.settled.send_replace(true);
        discarded
    }
}

/// Reliable, ordered GELF delivery over TCP.
///
/// Every message is written exactly once in `send` order. While the
/// connection has more than `write_high_water_mark` bytes waiting, messages
/// are held in a backlog of at most `max_backlog_messages`; anything beyond
/// that is dropped and reported.
pub struct StreamTransport {
    config: StreamConfig,
    reporter: ErrorReporter,
    shared: Arc<Mutex<Shared>>,
    idle: watch::Receiver<bool>,
    settled: watch::Receiver<bool>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamTransport {
    /// Create a transport; the configuration is validated here
    pub fn new(config: StreamConfig, reporter: ErrorReporter) -> Result<Self> {
        config.validate()?;
        let (idle_tx, idle_rx) = watch::channel(true);
        let (settled_tx, settled_rx) = watch::channel(true);
        let shared = Shared {
            state: StreamState::Disconnected,
            backlog: VecDeque::new(),
            max_backlog: config.max_backlog_messages,
            buffered: 0,
            high_water_mark: config.socket_options.write_high_water_mark,
            writer: None,
            idle: idle_tx,
            settled: settled_tx,
        };
        Ok(Self {
            config,
            reporter,
            shared: Arc::new(Mutex::new(shared)),
            idle: idle_rx,
            settled: settled_rx,
            writer_task: Mutex::new(None),
        })
    }

    /// Transport configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.shared.lock().state
    }

    /// Number of messages waiting in the backlog
    pub fn backlog_len(&self) -> usize {
        self.shared.lock().backlog.len()
    }

    /// Open the connection; resolves once it is ready for writes
    pub async fn connect(&self) -> Result<()> {
        let already_connecting = {
            let mut shared = self.shared.lock();
            let current = shared.state;
            match current {
                StreamState::Disconnected => {
                    shared.state = StreamState::Connecting;
                    shared.settled.send_replace(false);
                    false
                }
                StreamState::Connecting => true,
                StreamState::Closed => {
                    return Err(GelfError::Connection("TCP transport is closed".to_string()))
                }
                StreamState::Accepting | StreamState::Backpressured => return Ok(()),
            }
        };
        if already_connecting {
            return self.wait_for_connect().await;
        }

        let stream = match self.open().await {
            Ok(stream) => stream,
            Err(e) => {
                let mut shared = self.shared.lock();
                if shared.state == StreamState::Connecting {
                    shared.backlog.clear();
                    shared.state = StreamState::Disconnected;
                    shared.update_idle();
                    shared.settled.send_replace(true);
                }
                return Err(e);
            }
        };

        let (_read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut shared = self.shared.lock();
        if shared.state != StreamState::Connecting {
            return Err(GelfError::Connection(
                "TCP transport was closed while connecting".to_string(),
            ));
        }
        let handle = tokio::spawn(write_loop(
            write_half,
            rx,
            Arc::clone(&self.shared),
            self.reporter.clone(),
        ));
        *self.writer_task.lock() = Some(handle);

        shared.writer = Some(tx);
        shared.state = StreamState::Accepting;
        shared.drain_backlog();
        shared.update_idle();
        shared.settled.send_replace(true);
        debug!(host = %self.config.host, port = self.config.port, "TCP transport connected");
        Ok(())
    }

    // Another caller is connecting; resolve with the outcome of its attempt.
    async fn wait_for_connect(&self) -> Result<()> {
        let mut settled = self.settled.clone();
        loop {
            if *settled.borrow_and_update() {
                break;
            }
            if settled.changed().await.is_err() {
                break;
            }
        }
        match self.state() {
            StreamState::Accepting | StreamState::Backpressured => Ok(()),
            StreamState::Closed => Err(GelfError::Connection(
                "TCP transport was closed while connecting".to_string(),
            )),
            StreamState::Disconnected | StreamState::Connecting => Err(GelfError::Connection(
                "concurrent connect attempt failed".to_string(),
            )),
        }
    }

    async fn open(&self) -> Result<TcpStream> {
        let options = self.config.effective_socket_options();
        let host = options.host.unwrap_or_else(|| self.config.host.clone());
        let port = options.port.unwrap_or(self.config.port);

        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| {
                GelfError::Connection(format!("Failed to connect to {}:{}: {}", host, port, e))
            })?;
        if let Some(nodelay) = options.nodelay {
            stream.set_nodelay(nodelay).map_err(|e| {
                GelfError::Connection(format!("Failed to set TCP_NODELAY: {}", e))
            })?;
        }
        if let Some(ttl) = options.ttl {
            stream
                .set_ttl(ttl)
                .map_err(|e| GelfError::Connection(format!("Failed to set TTL {}: {}", ttl, e)))?;
        }
        Ok(stream)
    }

    /// Fire-and-forget send of one NUL-terminated message
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) {
        let frame = match GelfFrameCodec::frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                self.reporter.report(e);
                return;
            }
        };

        let mut shared = self.shared.lock();
        let state = shared.state;
        match state {
            StreamState::Accepting => shared.write(frame),
            StreamState::Connecting | StreamState::Backpressured => {
                if shared.backlog.len() < shared.max_backlog {
                    shared.backlog.push_back(frame);
                } else {
                    let capacity = shared.max_backlog;
                    drop(shared);
                    self.reporter.report(GelfError::BacklogOverflow { capacity });
                    return;
                }
            }
            StreamState::Disconnected => {
                drop(shared);
                self.reporter.report(GelfError::Connection(
                    "TCP transport is not connected".to_string(),
                ));
                return;
            }
            StreamState::Closed => {
                trace!("dropping message sent after close");
                return;
            }
        }
        shared.update_idle();
    }

    /// End the connection. Backlogged messages are discarded unsent.
    /// Safe to call repeatedly and before `connect`.
    pub fn close(&self) {
        let mut shared = self.shared.lock();
        if shared.state == StreamState::Closed {
            return;
        }
        let discarded = shared.shut_down();
        debug!(discarded, "TCP transport closed");
    }

    /// Wait for the backlog and all buffered writes to reach the socket,
    /// then close.
    pub async fn drain_and_close(&self) {
        let mut idle = self.idle.clone();
        loop {
            if *idle.borrow_and_update() {
                break;
            }
            if idle.changed().await.is_err() {
                break;
            }
        }
        self.close();

        let handle = self.writer_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    shared: Arc<Mutex<Shared>>,
    reporter: ErrorReporter,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            let discarded = shared.lock().shut_down();
            debug!(discarded, "TCP transport failed, closing");
            reporter.report(GelfError::transport("writing to TCP stream", e));
            return;
        }

        let mut state = shared.lock();
        state.buffered -= frame.len();
        if state.buffered == 0 && state.state == StreamState::Backpressured {
            trace!(backlog = state.backlog.len(), "stream drained");
            state.state = StreamState::Accepting;
            state.drain_backlog();
        }
        state.update_idle();
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use bytes::BytesMut;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};
    use tokio_util::codec::Decoder;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// Read frames until the peer closes
    async fn read_all_frames(listener: TcpListener) -> Vec<String> {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut codec = GelfFrameCodec::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        loop {
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                frames.push(String::from_utf8(frame.to_vec()).unwrap());
            }
            if stream.read_buf(&mut buf).await.unwrap() == 0 {
                break;
            }
        }
        frames
    }

    fn transport(
        port: u16,
        high_water_mark: usize,
        max_backlog: usize,
    ) -> (StreamTransport, crate::error::ErrorEvents) {
        let mut config = StreamConfig::new("127.0.0.1", port);
        config.max_backlog_messages = max_backlog;
        config.socket_options.write_high_water_mark = high_water_mark;
        let (reporter, errors) = ErrorReporter::channel();
        (StreamTransport::new(config, reporter).unwrap(), errors)
    }

    #[tokio::test]
    async fn test_writes_in_call_order() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(read_all_frames(listener));
        let (transport, mut errors) = transport(port, 16 * 1024, 8);

        transport.connect().await.unwrap();
        assert_eq!(transport.state(), StreamState::Accepting);
        for i in 0..5 {
            transport.send(&format!("message {}", i));
        }
        transport.drain_and_close().await;

        let frames = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        let expected: Vec<String> = (0..5).map(|i| format!("\"message {}\"", i)).collect();
        assert_eq!(frames, expected);
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_backpressure_queues_and_overflows() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(read_all_frames(listener));
        // Any buffered byte crosses the high-water mark.
        let (transport, mut errors) = transport(port, 1, 2);
        transport.connect().await.unwrap();

        transport.send("first");
        assert_eq!(transport.state(), StreamState::Backpressured);
        transport.send("second");
        transport.send("third");
        assert_eq!(transport.backlog_len(), 2);

        transport.send("dropped");
        let err = errors.try_recv().unwrap();
        assert_eq!(err.kind(), ErrorKind::BacklogOverflow);
        assert_eq!(transport.backlog_len(), 2);

        transport.drain_and_close().await;
        let frames = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        assert_eq!(frames, vec!["\"first\"", "\"second\"", "\"third\""]);
    }

    #[tokio::test]
    async fn test_close_discards_backlog_silently() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(read_all_frames(listener));
        let (transport, mut errors) = transport(port, 1, 16);
        transport.connect().await.unwrap();

        transport.send("written");
        transport.send("queued-1");
        transport.send("queued-2");
        assert_eq!(transport.backlog_len(), 2);

        transport.close();
        assert_eq!(transport.state(), StreamState::Closed);
        assert_eq!(transport.backlog_len(), 0);

        let frames = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        assert_eq!(frames, vec!["\"written\""]);
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drain_restores_acceptance() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(read_all_frames(listener));
        let (transport, _errors) = transport(port, 1, 16);
        transport.connect().await.unwrap();

        transport.send("a");
        transport.send("b");
        assert_eq!(transport.state(), StreamState::Backpressured);

        let mut idle = transport.idle.clone();
        timeout(Duration::from_secs(2), async {
            while !*idle.borrow_and_update() {
                idle.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(transport.state(), StreamState::Accepting);
        assert_eq!(transport.backlog_len(), 0);

        transport.close();
        let frames = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        assert_eq!(frames, vec!["\"a\"", "\"b\""]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (transport, _errors) = transport(1, 16, 16);
        transport.close();
        transport.close();
        assert_eq!(transport.state(), StreamState::Closed);
        assert!(transport.connect().await.is_err());

        // Sends after close are no-ops.
        transport.send("ignored");
        assert_eq!(transport.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_send_before_connect_reports() {
        let (transport, mut errors) = transport(1, 16, 16);
        transport.send("too early");
        assert_eq!(errors.try_recv().unwrap().kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (listener, port) = listener().await;
        drop(listener);
        let (transport, _errors) = transport(port, 16, 16);

        let err = transport.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(transport.state(), StreamState::Disconnected);
    }

    #[tokio::test]
    async fn test_concurrent_connects_resolve_when_usable() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(read_all_frames(listener));
        let (transport, _errors) = transport(port, 16 * 1024, 8);

        let t = &transport;
        let (first, second) = tokio::join!(
            async move { t.connect().await.map(|_| t.state()) },
            async move { t.connect().await.map(|_| t.state()) },
        );
        assert_eq!(first.unwrap(), StreamState::Accepting);
        assert_eq!(second.unwrap(), StreamState::Accepting);

        transport.send("once");
        transport.drain_and_close().await;
        let frames = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        assert_eq!(frames, vec!["\"once\""]);
    }

    #[tokio::test]
    async fn test_socket_option_failure_is_connection_error() {
        let (_listener, port) = listener().await;
        let mut config = StreamConfig::new("127.0.0.1", port);
        // IP TTL must be within 1..=255.
        config.socket_options.ttl = Some(256);
        let transport = StreamTransport::new(config, ErrorReporter::discard()).unwrap();

        let err = transport.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(transport.state(), StreamState::Disconnected);
    }

    #[tokio::test]
    async fn test_zero_backlog_drops_while_backpressured() {
        let (listener, port) = listener().await;
        let _server = tokio::spawn(read_all_frames(listener));
        let (transport, mut errors) = transport(port, 1, 0);
        transport.connect().await.unwrap();

        transport.send("first");
        transport.send("second");
        assert_eq!(errors.try_recv().unwrap().kind(), ErrorKind::BacklogOverflow);
        transport.close();
    }
}

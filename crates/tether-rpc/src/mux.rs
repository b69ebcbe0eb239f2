// ABOUTME: Symmetric stream multiplexer over a single duplex byte stream.
// ABOUTME: Opens and accepts message-oriented logical streams with a bounded accept backlog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RpcError};
use crate::frame::{Frame, FrameCodec, FrameKind, MAX_PAYLOAD_SIZE};

/// Pending inbound streams held before `accept` picks them up.
pub const DEFAULT_ACCEPT_BACKLOG: usize = 100;

/// Which side of the connection this multiplexer plays.
///
/// Both sides may open and accept streams. The role only decides stream id
/// parity so that ids never collide: clients open odd ids, servers even.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn first_stream_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    fn owns(self, stream_id: u32) -> bool {
        match self {
            Role::Client => stream_id % 2 == 1,
            Role::Server => stream_id % 2 == 0,
        }
    }
}

struct Shared {
    next_id: AtomicU32,
    streams: Mutex<HashMap<u32, mpsc::UnboundedSender<Bytes>>>,
    outbound: mpsc::UnboundedSender<Frame>,
    shutdown: CancellationToken,
}

impl Shared {
    fn register(&self, stream_id: u32) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut streams) = self.streams.lock() {
            streams.insert(stream_id, tx);
        }
        rx
    }

    fn forget(&self, stream_id: u32) -> bool {
        self.streams
            .lock()
            .map(|mut streams| streams.remove(&stream_id).is_some())
            .unwrap_or(false)
    }

    fn deliver(&self, stream_id: u32, payload: Bytes) -> bool {
        self.streams
            .lock()
            .ok()
            .and_then(|streams| streams.get(&stream_id).map(|tx| tx.send(payload).is_ok()))
            .unwrap_or(false)
    }

    fn send(&self, frame: Frame) -> Result<()> {
        self.outbound.send(frame).map_err(|_| RpcError::Closed)
    }
}

/// A multiplexed connection. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Multiplexer {
    role: Role,
    shared: Arc<Shared>,
    accept: Arc<tokio::sync::Mutex<mpsc::Receiver<Substream>>>,
}

impl Multiplexer {
    /// Multiplex `io` with the default accept backlog.
    pub fn new<S>(io: S, role: Role) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_backlog(io, role, DEFAULT_ACCEPT_BACKLOG)
    }

    /// Multiplex `io`, holding at most `backlog` unaccepted inbound streams.
    /// Streams opened by the peer beyond that are reset.
    pub fn with_backlog<S>(io: S, role: Role, backlog: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::channel(backlog.max(1));

        let shared = Arc::new(Shared {
            next_id: AtomicU32::new(role.first_stream_id()),
            streams: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(write_loop(
            FramedWrite::new(writer, FrameCodec),
            outbound_rx,
            shared.shutdown.clone(),
        ));
        tokio::spawn(read_loop(
            FramedRead::new(reader, FrameCodec),
            role,
            Arc::clone(&shared),
            accept_tx,
        ));

        Self {
            role,
            shared,
            accept: Arc::new(tokio::sync::Mutex::new(accept_rx)),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Open a new logical stream to the peer.
    pub async fn open(&self) -> Result<Substream> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        let stream_id = self.shared.next_id.fetch_add(2, Ordering::Relaxed);
        let inbound = self.shared.register(stream_id);
        if let Err(e) = self.shared.send(Frame::open(stream_id)) {
            self.shared.forget(stream_id);
            return Err(e);
        }
        tracing::trace!(stream_id, "Opened stream");
        Ok(Substream::new(stream_id, Arc::clone(&self.shared), inbound))
    }

    /// Wait for the peer to open a logical stream.
    ///
    /// Fails with [`RpcError::Closed`] once the underlying connection ends.
    pub async fn accept(&self) -> Result<Substream> {
        let mut accept = self.accept.lock().await;
        tokio::select! {
            biased;
            stream = accept.recv() => stream.ok_or(RpcError::Closed),
            _ = self.shared.shutdown.cancelled() => Err(RpcError::Closed),
        }
    }

    /// Tear down the connection. Pending and future operations fail.
    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Resolves once the connection has closed.
    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(error = %e, "Multiplexer write failed");
                    break;
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    shutdown.cancel();
    let _ = sink.close().await;
}

async fn read_loop<R>(
    mut source: FramedRead<R, FrameCodec>,
    role: Role,
    shared: Arc<Shared>,
    accept: mpsc::Sender<Substream>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = source.next() => frame,
            _ = shared.shutdown.cancelled() => break,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Multiplexer read failed");
                break;
            }
            None => {
                tracing::debug!("Peer closed multiplexed connection");
                break;
            }
        };

        let stream_id = frame.stream_id;
        match frame.kind {
            FrameKind::Open => {
                if role.owns(stream_id) {
                    tracing::warn!(stream_id, "Peer opened stream with our id parity");
                    let _ = shared.send(Frame::reset(stream_id));
                    continue;
                }
                let inbound = shared.register(stream_id);
                let stream = Substream::new(stream_id, Arc::clone(&shared), inbound);
                match accept.try_send(stream) {
                    Ok(()) => tracing::trace!(stream_id, "Queued inbound stream"),
                    Err(mpsc::error::TrySendError::Full(stream)) => {
                        tracing::warn!(stream_id, "Accept backlog full, resetting stream");
                        stream.reset();
                    }
                    Err(mpsc::error::TrySendError::Closed(stream)) => stream.reset(),
                }
            }
            FrameKind::Data => {
                if !shared.deliver(stream_id, frame.payload) {
                    tracing::trace!(stream_id, "Dropped data for unknown stream");
                }
            }
            FrameKind::Close | FrameKind::Reset => {
                shared.forget(stream_id);
            }
        }
    }

    shared.shutdown.cancel();
    if let Ok(mut streams) = shared.streams.lock() {
        streams.clear();
    }
}

/// One logical stream. Each `send` arrives as exactly one `recv` on the peer.
///
/// Dropping a substream closes its write side.
pub struct Substream {
    id: u32,
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    write_closed: bool,
}

impl Substream {
    fn new(id: u32, shared: Arc<Shared>, inbound: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            id,
            shared,
            inbound,
            write_closed: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Send one message to the peer.
    ///
    /// Messages larger than one frame are refused here, before they reach
    /// the writer, so only this call fails.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        if self.write_closed {
            return Err(RpcError::Closed);
        }
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(RpcError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD_SIZE,
            });
        }
        self.shared.send(Frame::data(self.id, payload))
    }

    /// Receive the next message. `None` once the peer has closed its side,
    /// reset the stream, or the connection ended.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    /// Signal that no more messages will be sent. Reading continues.
    pub fn close_write(&mut self) {
        if !self.write_closed {
            self.write_closed = true;
            let _ = self.shared.send(Frame::close(self.id));
        }
    }

    /// Abort the stream in both directions.
    pub fn reset(mut self) {
        self.write_closed = true;
        self.shared.forget(self.id);
        let _ = self.shared.send(Frame::reset(self.id));
    }
}

impl Drop for Substream {
    fn drop(&mut self) {
        self.close_write();
        self.shared.forget(self.id);
    }
}

impl std::fmt::Debug for Substream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Substream")
            .field("id", &self.id)
            .field("write_closed", &self.write_closed)
            .finish()
    }
}

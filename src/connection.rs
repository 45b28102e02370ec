//! Connection
//!
//! One TCP socket and the asynchronous pipelines that drive it.
//!
//! ## Lifecycle
//! ```text
//! Disconnected ──connect_to_server──▶ Connecting ──ok──▶ Connected
//!      │                                   │                 │
//!      └──connect_to_client(id)────────────┼────────────────▶│
//!                                          └──err──▶ Disconnected ◀── I/O error / disconnect()
//! ```
//!
//! ## Pipelines
//! - **Read**: one task per connection. Reads a header block, then the body
//!   if the header declares one, tags the message with its origin and pushes
//!   it onto the shared inbound queue. Repeats until the connection closes.
//! - **Write**: started only when `send()` finds the outbound queue empty,
//!   so at most one writer touches the socket. It writes the front message,
//!   pops it, and continues while the queue is non-empty.
//!
//! Every pipeline step runs on the owning I/O context. Errors close the
//! connection and are logged, never returned.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::message::{Header, Message, MessageId, OwnedMessage, HEADER_SIZE};
use crate::queue::TsQueue;

/// Which side of the link owns the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Client,
    Server,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Per-socket asynchronous read/write state machine
pub struct Connection<T> {
    owner: Owner,

    /// Server-assigned id, 0 until assigned (always 0 on the client side)
    id: AtomicU32,

    state: AtomicU8,

    /// Context all pipeline tasks run on
    io: Handle,

    /// Shared inbound queue, owned by the Client/Server
    inbound: Arc<TsQueue<OwnedMessage<T>>>,

    /// Messages waiting to be written, front is in flight
    outbound: Mutex<VecDeque<Message<T>>>,

    /// Read half, parked here until the read pipeline takes it
    reader: Mutex<Option<OwnedReadHalf>>,

    /// Write half, held by the running write pipeline
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,

    /// Flips to true once when the connection closes
    closed: watch::Sender<bool>,

    peer_addr: Mutex<Option<SocketAddr>>,

    max_message_size: usize,
    tcp_nodelay: bool,
}

impl<T: MessageId> Connection<T> {
    /// Create a connection
    ///
    /// Server-side connections wrap an already accepted `socket`; client-side
    /// connections start without one and open it in `connect_to_server`.
    pub fn new(
        owner: Owner,
        io: Handle,
        socket: Option<TcpStream>,
        inbound: Arc<TsQueue<OwnedMessage<T>>>,
        config: &Config,
    ) -> Arc<Self> {
        let (closed, _) = watch::channel(false);

        let mut connection = Self {
            owner,
            id: AtomicU32::new(0),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            io,
            inbound,
            outbound: Mutex::new(VecDeque::new()),
            reader: Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            closed,
            peer_addr: Mutex::new(None),
            max_message_size: config.max_message_size,
            tcp_nodelay: config.tcp_nodelay,
        };

        if let Some(stream) = socket {
            let (read_half, write_half) = connection.prepare(stream);
            *connection.reader.lock() = Some(read_half);
            *connection.writer.get_mut() = Some(write_half);
        }

        Arc::new(connection)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer_addr.lock()
    }

    /// Number of messages queued for writing, including the one in flight
    pub fn pending_writes(&self) -> usize {
        self.outbound.lock().len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Server role: adopt `uid` and start reading from the accepted socket
    ///
    /// Does nothing on a client connection or when the socket is gone.
    pub fn connect_to_client(self: &Arc<Self>, uid: u32) {
        if self.owner != Owner::Server {
            tracing::warn!("connect_to_client called on a client connection");
            return;
        }

        let Some(read_half) = self.reader.lock().take() else {
            tracing::warn!("[{}] connect_to_client: socket is not open", uid);
            return;
        };

        self.id.store(uid, Ordering::Release);
        self.begin_reading(read_half);
    }

    /// Client role: connect to the first reachable endpoint, then start reading
    ///
    /// Returns a channel that receives the outcome once the attempt finishes.
    pub fn connect_to_server(
        self: &Arc<Self>,
        endpoints: Vec<SocketAddr>,
    ) -> Receiver<Result<SocketAddr>> {
        let (outcome_tx, outcome_rx) = channel::bounded(1);

        if self.owner != Owner::Client {
            let _ = outcome_tx.send(Err(NetError::InvalidState(
                "connect_to_server called on a server connection".to_string(),
            )));
            return outcome_rx;
        }

        self.set_state(ConnectionState::Connecting);
        let this = Arc::clone(self);

        self.io.spawn(async move {
            let outcome = match Self::open_stream(&endpoints).await {
                Ok(stream) => {
                    let (read_half, write_half) = this.prepare(stream);
                    *this.writer.lock().await = Some(write_half);
                    this.begin_reading(read_half);
                    this.peer_addr()
                        .ok_or_else(|| NetError::Connect("peer address unknown".to_string()))
                }
                Err(e) => {
                    this.set_state(ConnectionState::Disconnected);
                    Err(e)
                }
            };

            match &outcome {
                Ok(addr) => tracing::debug!("Socket open to {}", addr),
                Err(e) => tracing::error!("Connect failed: {}", e),
            }
            let _ = outcome_tx.send(outcome);
        });

        outcome_rx
    }

    /// Close the socket from the I/O thread
    pub fn disconnect(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.io.spawn(async move {
            this.close();
        });
    }

    /// Mark the connection closed and release its socket halves
    ///
    /// Callable from any thread; only the first call has an effect.
    pub(crate) fn close(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Disconnected as u8, Ordering::AcqRel);
        self.closed.send_replace(true);

        self.reader.lock().take();
        // A running write pipeline holds the lock and drops the half itself
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        if ConnectionState::from_u8(previous) != ConnectionState::Disconnected {
            tracing::info!("[{}] Connection closed", self.id());
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Apply socket options and split the stream
    fn prepare(&self, stream: TcpStream) -> (OwnedReadHalf, OwnedWriteHalf) {
        if let Err(e) = stream.set_nodelay(self.tcp_nodelay) {
            tracing::warn!("Failed to set TCP_NODELAY: {}", e);
        }
        *self.peer_addr.lock() = stream.peer_addr().ok();
        stream.into_split()
    }

    async fn open_stream(endpoints: &[SocketAddr]) -> Result<TcpStream> {
        let mut last_error = None;
        for addr in endpoints {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => NetError::Connect(e.to_string()),
            None => NetError::Connect("no endpoints to try".to_string()),
        })
    }

    // =========================================================================
    // Read Pipeline
    // =========================================================================

    fn begin_reading(self: &Arc<Self>, read_half: OwnedReadHalf) {
        self.set_state(ConnectionState::Connected);
        self.io.spawn(Arc::clone(self).read_pipeline(read_half));
    }

    async fn read_pipeline(self: Arc<Self>, mut read_half: OwnedReadHalf) {
        let mut closed = self.closed.subscribe();

        loop {
            let next = tokio::select! {
                result = self.read_message(&mut read_half) => result,
                _ = wait_closed(&mut closed) => return,
            };

            match next {
                Ok(message) => self.add_to_incoming(message),
                Err(NetError::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::info!("[{}] Peer closed the connection", self.id());
                    self.close();
                    return;
                }
                Err(e) => {
                    tracing::error!("[{}] Read failed, closing connection: {}", self.id(), e);
                    self.close();
                    return;
                }
            }
        }
    }

    /// Read one header block, then the body it declares
    async fn read_message(&self, read_half: &mut OwnedReadHalf) -> Result<Message<T>> {
        let mut block = [0u8; HEADER_SIZE];
        read_half.read_exact(&mut block).await?;
        let header = Header::<T>::decode(&block)?;

        let len = header.size as usize;
        if len > self.max_message_size {
            return Err(NetError::MessageTooLarge {
                size: len,
                max: self.max_message_size,
            });
        }

        let mut body = BytesMut::zeroed(len);
        if len > 0 {
            read_half.read_exact(&mut body[..]).await?;
        }

        Message::from_parts(header, body)
    }

    fn add_to_incoming(self: &Arc<Self>, message: Message<T>) {
        tracing::trace!("[{}] Received {}", self.id(), message);
        let owned = match self.owner {
            Owner::Server => OwnedMessage::from_connection(self, message),
            Owner::Client => OwnedMessage::from_server(message),
        };
        self.inbound.push_back(owned);
    }

    // =========================================================================
    // Write Pipeline
    // =========================================================================

    /// Queue a message for writing
    ///
    /// The enqueue happens on the I/O thread; if nothing was queued before,
    /// the same task runs the write pipeline.
    pub fn send(self: &Arc<Self>, message: Message<T>) {
        let this = Arc::clone(self);
        self.io.spawn(async move {
            if !this.is_connected() {
                tracing::trace!("[{}] Dropping {} on closed connection", this.id(), message);
                return;
            }

            let idle = {
                let mut outbound = this.outbound.lock();
                let idle = outbound.is_empty();
                outbound.push_back(message);
                idle
            };

            if idle {
                this.write_pipeline().await;
            }
        });
    }

    async fn write_pipeline(&self) {
        let mut closed = self.closed.subscribe();
        let mut writer = self.writer.lock().await;

        loop {
            let Some((header, body)) = self.front_frame() else {
                break;
            };

            let Some(write_half) = writer.as_mut() else {
                tracing::error!("[{}] Write failed: socket is closed", self.id());
                self.close();
                break;
            };

            let result = tokio::select! {
                result = Self::write_frame(write_half, &header, &body) => result,
                _ = wait_closed(&mut closed) => break,
            };

            if let Err(e) = result {
                tracing::error!("[{}] Write failed, closing connection: {}", self.id(), e);
                writer.take();
                self.close();
                break;
            }

            let more = {
                let mut outbound = self.outbound.lock();
                outbound.pop_front();
                !outbound.is_empty()
            };
            if !more {
                break;
            }
        }

        if !self.is_connected() {
            writer.take();
            self.outbound.lock().clear();
        }
    }

    /// Encoded header and a copy of the body of the front message
    fn front_frame(&self) -> Option<([u8; HEADER_SIZE], Bytes)> {
        let outbound = self.outbound.lock();
        let front = outbound.front()?;
        Some((front.header().encode(), Bytes::copy_from_slice(front.body())))
    }

    async fn write_frame(
        write_half: &mut OwnedWriteHalf,
        header: &[u8; HEADER_SIZE],
        body: &[u8],
    ) -> Result<()> {
        write_half.write_all(header).await?;
        if !body.is_empty() {
            write_half.write_all(body).await?;
        }
        Ok(())
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id.load(Ordering::Acquire))
            .field("owner", &self.owner)
            .field("state", &ConnectionState::from_u8(self.state.load(Ordering::Acquire)))
            .field("peer_addr", &*self.peer_addr.lock())
            .finish()
    }
}

/// Resolves once the connection has been closed
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|is_closed| *is_closed).await;
}

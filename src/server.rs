//! TCP Server
//!
//! Accepts connections on its own I/O context and hands received messages to
//! the application through `update()`.
//!
//! ## Architecture
//! - Accept loop runs on the I/O thread and re-arms after every attempt
//! - Admission is decided by `ServerHandler::on_client_connect`
//! - Messages are dispatched on the thread that calls `update()`

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::runtime::Handle;

use crate::config::Config;
use crate::connection::{Connection, Owner};
use crate::context::IoContext;
use crate::error::Result;
use crate::message::{Message, MessageId, OwnedMessage};
use crate::queue::TsQueue;

type ConnectionSet<T> = Arc<Mutex<VecDeque<Arc<Connection<T>>>>>;

/// Pause before accepting again after a failed accept (e.g. out of fds)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Application hooks for a Server
///
/// The defaults reject every connection and ignore disconnects and messages,
/// so an application has to opt in deliberately.
///
/// `on_client_connect` runs on the I/O thread; the other hooks run on the
/// thread that drives the server. Implementations that keep state need
/// interior mutability.
pub trait ServerHandler<T: MessageId>: Sized + Send + Sync + 'static {
    /// Admission control for a freshly accepted socket
    fn on_client_connect(&self, _client: &Arc<Connection<T>>) -> bool {
        false
    }

    /// A connection was found closed and is being released
    fn on_client_disconnect(&self, _client: &Arc<Connection<T>>) {}

    /// A message arrived; `client` is `None` if its connection is already gone
    fn on_message(
        &self,
        _server: &Server<T, Self>,
        _client: Option<Arc<Connection<T>>>,
        _message: Message<T>,
    ) {
    }
}

/// Handler that keeps every default: rejects all clients
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl<T: MessageId> ServerHandler<T> for DenyAll {}

/// TCP server for framelink
pub struct Server<T: MessageId, H: ServerHandler<T>> {
    config: Config,
    handler: Arc<H>,

    /// Messages from every connection, in arrival order
    inbound: Arc<TsQueue<OwnedMessage<T>>>,

    /// Active connections in acceptance order
    connections: ConnectionSet<T>,

    /// Next id handed to an accepted connection, starts at 1
    next_id: Arc<AtomicU32>,

    context: Option<IoContext>,
    local_addr: Option<SocketAddr>,
}

impl<T: MessageId, H: ServerHandler<T>> Server<T, H> {
    /// Create a server that will listen on all interfaces at `port`
    pub fn new(port: u16, handler: H) -> Self {
        let config = Config::builder()
            .listen_addr(format!("0.0.0.0:{}", port))
            .build();
        Self::with_config(config, handler)
    }

    /// Create a server with the given config
    pub fn with_config(config: Config, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            inbound: Arc::new(TsQueue::new()),
            connections: Arc::new(Mutex::new(VecDeque::new())),
            next_id: Arc::new(AtomicU32::new(1)),
            context: None,
            local_addr: None,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bind, arm the accept loop and launch the I/O thread
    ///
    /// Returns false (and logs) on failure.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            tracing::warn!("Server is already running");
            return false;
        }

        match self.try_start() {
            Ok(addr) => {
                tracing::info!("Server started on {}", addr);
                true
            }
            Err(e) => {
                tracing::error!("Server error: {}", e);
                false
            }
        }
    }

    fn try_start(&mut self) -> Result<SocketAddr> {
        self.config.validate()?;

        let mut context = IoContext::new("framelink-server")?;

        let std_listener = std::net::TcpListener::bind(self.config.listen_addr.as_str())?;
        std_listener.set_nonblocking(true)?;
        let listener = {
            let _guard = context.handle().enter();
            TcpListener::from_std(std_listener)?
        };
        let local_addr = listener.local_addr()?;

        let acceptor = Acceptor {
            io: context.handle(),
            config: self.config.clone(),
            handler: Arc::clone(&self.handler),
            inbound: Arc::clone(&self.inbound),
            connections: Arc::clone(&self.connections),
            next_id: Arc::clone(&self.next_id),
        };
        context.spawn(acceptor.run(listener));
        context.run()?;

        self.context = Some(context);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stop the I/O context, join its thread and release every connection
    pub fn stop(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        context.stop();
        self.local_addr = None;

        let released: Vec<_> = self.connections.lock().drain(..).collect();
        for connection in &released {
            connection.close();
            self.handler.on_client_disconnect(connection);
        }

        tracing::info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.context.is_some()
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Send to one client, or release it if it has disconnected
    pub fn message_client(&self, client: &Arc<Connection<T>>, message: Message<T>) {
        if client.is_connected() {
            client.send(message);
            return;
        }

        let removed = {
            let mut connections = self.connections.lock();
            let before = connections.len();
            connections.retain(|connection| !Arc::ptr_eq(connection, client));
            connections.len() != before
        };

        // Reported once, by whichever sweep released it
        if removed {
            self.handler.on_client_disconnect(client);
        }
    }

    /// Send to every open client except `except`
    ///
    /// Closed connections found during the sweep are reported and removed.
    pub fn message_all_clients(&self, message: &Message<T>, except: Option<&Arc<Connection<T>>>) {
        let (live, dead) = self.partition_connections();

        for connection in &live {
            let excluded = except.is_some_and(|skip| Arc::ptr_eq(skip, connection));
            if !excluded {
                connection.send(message.clone());
            }
        }

        for connection in &dead {
            self.handler.on_client_disconnect(connection);
        }
    }

    /// Report and remove closed connections without sending anything
    ///
    /// Returns the number released.
    pub fn release_closed(&self) -> usize {
        let (_, dead) = self.partition_connections();
        for connection in &dead {
            self.handler.on_client_disconnect(connection);
        }
        dead.len()
    }

    /// Split the active set into (open, closed), keeping only the open ones
    fn partition_connections(&self) -> (Vec<Arc<Connection<T>>>, Vec<Arc<Connection<T>>>) {
        let mut connections = self.connections.lock();
        let (live, dead): (Vec<_>, Vec<_>) = connections
            .drain(..)
            .partition(|connection| connection.is_connected());
        connections.extend(live.iter().cloned());
        (live, dead)
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Dispatch up to `max_messages` queued messages to `on_message`
    ///
    /// With `wait`, blocks until at least one message is queued. Returns the
    /// number dispatched.
    pub fn update(&self, max_messages: usize, wait: bool) -> usize {
        if wait {
            self.inbound.wait();
        }

        let mut count = 0;
        while count < max_messages {
            let Some(owned) = self.inbound.pop_front() else {
                break;
            };
            let (client, message) = owned.into_parts();
            self.handler.on_message(self, client, message);
            count += 1;
        }
        count
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Address actually bound, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Snapshot of the active connections in acceptance order
    pub fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.connections.lock().iter().cloned().collect()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.inbound
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl<T: MessageId, H: ServerHandler<T>> Drop for Server<T, H> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State the accept loop shares with the Server
struct Acceptor<T: MessageId, H: ServerHandler<T>> {
    io: Handle,
    config: Config,
    handler: Arc<H>,
    inbound: Arc<TsQueue<OwnedMessage<T>>>,
    connections: ConnectionSet<T>,
    next_id: Arc<AtomicU32>,
}

impl<T: MessageId, H: ServerHandler<T>> Acceptor<T, H> {
    async fn run(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => self.admit(stream, peer_addr),
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn admit(&self, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
        tracing::info!("New connection: {}", peer_addr);

        let connection = Connection::new(
            Owner::Server,
            self.io.clone(),
            Some(stream),
            Arc::clone(&self.inbound),
            &self.config,
        );

        if !self.handler.on_client_connect(&connection) {
            // Dropping the only handle closes the socket
            tracing::info!("Connection denied: {}", peer_addr);
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            // Connected before it becomes visible to the owner thread's sweeps
            let mut connections = self.connections.lock();
            connection.connect_to_client(id);
            connections.push_back(Arc::clone(&connection));
        }
        tracing::info!("[{}] Connection approved", id);
    }
}

//! TCP Client
//!
//! A single outbound connection driven by the client's own I/O context.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::connection::{Connection, Owner};
use crate::context::IoContext;
use crate::error::{NetError, Result};
use crate::message::{Message, MessageId, OwnedMessage};
use crate::queue::TsQueue;

/// Client side of a framelink link
pub struct Client<T: MessageId> {
    config: Config,

    /// Present while connected (or connecting)
    context: Option<IoContext>,
    connection: Option<Arc<Connection<T>>>,

    /// Messages from the server
    inbound: Arc<TsQueue<OwnedMessage<T>>>,
}

impl<T: MessageId> Client<T> {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            context: None,
            connection: None,
            inbound: Arc::new(TsQueue::new()),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Resolve `host:port` and connect
    ///
    /// Blocks until the attempt succeeds, fails or hits the configured connect
    /// timeout. Returns false (and logs) on failure.
    pub fn connect(&mut self, host: &str, port: u16) -> bool {
        if self.connection.is_some() {
            self.disconnect();
        }

        match self.try_connect(host, port) {
            Ok(addr) => {
                tracing::info!("Connected to server at {}", addr);
                true
            }
            Err(e) => {
                tracing::error!("Error connecting to server! {}", e);
                self.disconnect();
                false
            }
        }
    }

    fn try_connect(&mut self, host: &str, port: u16) -> Result<SocketAddr> {
        self.config.validate()?;

        let endpoints: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| NetError::Resolve(format!("{}:{}: {}", host, port, e)))?
            .collect();
        if endpoints.is_empty() {
            return Err(NetError::Resolve(format!("{}:{}: no addresses", host, port)));
        }

        let mut context = IoContext::new("framelink-client")?;
        let connection = Connection::new(
            Owner::Client,
            context.handle(),
            None,
            Arc::clone(&self.inbound),
            &self.config,
        );

        let outcome = connection.connect_to_server(endpoints);
        context.run()?;

        self.context = Some(context);
        self.connection = Some(connection);

        let timeout = self.config.connect_timeout();
        match outcome.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(NetError::Connect(format!(
                "{}:{}: timed out after {:?}",
                host, port, timeout
            ))),
        }
    }

    /// Close the connection and stop the I/O thread
    ///
    /// Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(connection) = &self.connection {
            if connection.is_connected() {
                connection.disconnect();
            }
        }

        if let Some(mut context) = self.context.take() {
            context.stop();
        }

        if let Some(connection) = self.connection.take() {
            // The posted close may have been cancelled with the context
            connection.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.is_connected())
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Send to the server; does nothing while disconnected
    pub fn send(&self, message: Message<T>) {
        match &self.connection {
            Some(connection) if connection.is_connected() => connection.send(message),
            _ => tracing::trace!("Not connected, dropping {}", message),
        }
    }

    pub fn has_incoming_messages(&self) -> bool {
        !self.inbound.is_empty()
    }

    /// Next message from the server, `None` if nothing is queued
    pub fn get_next_message(&self) -> Option<OwnedMessage<T>> {
        self.inbound.pop_front()
    }

    /// Wait up to `timeout` for the next message
    pub fn wait_for_message(&self, timeout: Duration) -> Option<OwnedMessage<T>> {
        if self.inbound.wait_timeout(timeout) {
            self.inbound.pop_front()
        } else {
            None
        }
    }

    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.inbound
    }

    pub fn connection(&self) -> Option<&Arc<Connection<T>>> {
        self.connection.as_ref()
    }
}

impl<T: MessageId> Default for Client<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageId> Drop for Client<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

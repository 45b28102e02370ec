//! Messages tagged with the connection they arrived on.

use std::fmt;
use std::sync::{Arc, Weak};

use super::{Message, MessageId};
use crate::connection::Connection;

/// A received message paired with its origin
///
/// On a Client the origin is always empty: everything comes from the server.
/// On a Server it points at the Connection that produced the message. The
/// reference is weak, so a queued message never keeps a connection alive.
#[derive(Debug, Clone)]
pub struct OwnedMessage<T> {
    origin: Option<Weak<Connection<T>>>,
    message: Message<T>,
}

impl<T: MessageId> OwnedMessage<T> {
    /// A message received from the server (client side)
    pub fn from_server(message: Message<T>) -> Self {
        Self {
            origin: None,
            message,
        }
    }

    /// A message received on `connection` (server side)
    pub fn from_connection(connection: &Arc<Connection<T>>, message: Message<T>) -> Self {
        Self {
            origin: Some(Arc::downgrade(connection)),
            message,
        }
    }

    /// The originating connection, if there is one and it is still alive
    pub fn remote(&self) -> Option<Arc<Connection<T>>> {
        self.origin.as_ref().and_then(Weak::upgrade)
    }

    pub fn has_origin(&self) -> bool {
        self.origin.is_some()
    }

    pub fn message(&self) -> &Message<T> {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message<T> {
        &mut self.message
    }

    pub fn into_message(self) -> Message<T> {
        self.message
    }

    pub fn into_parts(self) -> (Option<Arc<Connection<T>>>, Message<T>) {
        let remote = self.remote();
        (remote, self.message)
    }
}

impl<T: MessageId> fmt::Display for OwnedMessage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.message, f)
    }
}

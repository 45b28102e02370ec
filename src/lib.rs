//! # framelink
//!
//! Bidirectional, asynchronous TCP messaging for client and server roles:
//! - Binary header+body framing, generic over an application message id
//! - Per-connection asynchronous read/write pipelines
//! - A thread-safe inbound queue decoupling network I/O from the
//!   application's own update loop
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Application thread (update / poll)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  pop
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                Inbound TsQueue<OwnedMessage>                 │
//! └─────────────────────▲───────────────────────────────────────┘
//!                       │  push
//! ┌─────────────────────┴───────────────────────────────────────┐
//! │                 I/O context (dedicated thread)               │
//! │   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │   │ Connection  │   │ Connection  │   │  Acceptor   │        │
//! │   │ read/write  │   │ read/write  │   │ (server)    │        │
//! │   └─────────────┘   └─────────────┘   └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod message;
pub mod queue;
pub mod context;
pub mod connection;
pub mod client;
pub mod server;
pub mod demo;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NetError, Result};
pub use config::Config;
pub use message::{Header, Message, MessageId, OwnedMessage, HEADER_SIZE, MAX_BODY_SIZE};
pub use queue::TsQueue;
pub use context::IoContext;
pub use connection::{Connection, ConnectionState, Owner};
pub use client::Client;
pub use server::{DenyAll, Server, ServerHandler};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of framelink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Configuration for framelink
//!
//! Centralized configuration with sensible defaults, shared by Client and
//! Server.

use std::time::Duration;

use crate::error::{NetError, Result};
use crate::message::MAX_BODY_SIZE;

/// Configuration for a Client or Server instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Server Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address (server only)
    pub listen_addr: String,

    // -------------------------------------------------------------------------
    // Framing Configuration
    // -------------------------------------------------------------------------
    /// Largest body a received header may declare before the connection is
    /// dropped as malformed
    pub max_message_size: usize,

    // -------------------------------------------------------------------------
    // Socket Configuration
    // -------------------------------------------------------------------------
    /// Disable Nagle's algorithm on every socket
    pub tcp_nodelay: bool,

    /// How long `Client::connect` waits for the connect attempt (milliseconds)
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:60000".to_string(),
            max_message_size: MAX_BODY_SIZE,
            tcp_nodelay: true,
            connect_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject settings the framing layer cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(NetError::Config(
                "max_message_size must be greater than zero".to_string(),
            ));
        }
        if self.max_message_size > u32::MAX as usize {
            return Err(NetError::Config(format!(
                "max_message_size {} exceeds the header limit of {} bytes",
                self.max_message_size,
                u32::MAX
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(NetError::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the TCP listen address (server only)
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum body size accepted from the wire (in bytes)
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.config.tcp_nodelay = enabled;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

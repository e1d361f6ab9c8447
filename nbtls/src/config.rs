use std::fmt;
use std::sync::Arc;

use crate::buffer::{BufferAllocator, HeapAllocator};
use crate::error::Error;

/// Default size of each direction's packet buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Largest TLS record a peer may legitimately send: 2^14 bytes of
/// plaintext, 2048 bytes of expansion, and the 5 byte record header.
pub const MAX_RECORD_SIZE: usize = 16 * 1024 + 2048 + 5;

/// Connector-level settings shared by every connection of one connector.
///
/// `inbound_buffer_size` sizes the buffer ciphertext is read into before
/// decryption, and the buffer decrypted plaintext is staged in.
/// `outbound_buffer_size` sizes the buffer encrypted records are staged in
/// before being written out.
///
/// Either buffer may grow once, to `max_record_size`, when a single record
/// doesn't fit.  A record that doesn't fit even then is fatal to the
/// connection.
///
/// Make one with [`ConnectorConfig::default()`] or
/// [`ConnectorConfig::builder()`].
#[derive(Clone)]
pub struct ConnectorConfig {
    pub(crate) inbound_buffer_size: usize,
    pub(crate) outbound_buffer_size: usize,
    pub(crate) max_record_size: usize,
    pub(crate) allocator: Arc<dyn BufferAllocator>,
}

impl ConnectorConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConnectorConfigBuilder {
        ConnectorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Size of the decrypt-side buffers, in bytes.
    pub fn inbound_buffer_size(&self) -> usize {
        self.inbound_buffer_size
    }

    /// Size of the encrypt-side buffer, in bytes.
    pub fn outbound_buffer_size(&self) -> usize {
        self.outbound_buffer_size
    }

    /// The bound on buffer growth, in bytes.
    pub fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    /// The buffer allocation strategy.
    pub fn allocator(&self) -> &Arc<dyn BufferAllocator> {
        &self.allocator
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            inbound_buffer_size: DEFAULT_BUFFER_SIZE,
            outbound_buffer_size: DEFAULT_BUFFER_SIZE,
            max_record_size: MAX_RECORD_SIZE,
            allocator: Arc::new(HeapAllocator),
        }
    }
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("inbound_buffer_size", &self.inbound_buffer_size)
            .field("outbound_buffer_size", &self.outbound_buffer_size)
            .field("max_record_size", &self.max_record_size)
            .field("allocator", &self.allocator)
            .finish()
    }
}

/// A builder for [`ConnectorConfig`].
///
/// ```
/// # use nbtls::{BufferPool, ConnectorConfig};
/// let config = ConnectorConfig::builder()
///     .inbound_buffer_size(8192)
///     .outbound_buffer_size(8192)
///     .allocator(BufferPool::new(64))
///     .build()
///     .unwrap();
/// assert_eq!(config.inbound_buffer_size(), 8192);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectorConfigBuilder {
    config: ConnectorConfig,
}

impl ConnectorConfigBuilder {
    /// Set the size of the decrypt-side buffers.
    pub fn inbound_buffer_size(mut self, size: usize) -> Self {
        self.config.inbound_buffer_size = size;
        self
    }

    /// Set the size of the encrypt-side buffer.
    pub fn outbound_buffer_size(mut self, size: usize) -> Self {
        self.config.outbound_buffer_size = size;
        self
    }

    /// Set the bound on buffer growth.
    pub fn max_record_size(mut self, size: usize) -> Self {
        self.config.max_record_size = size;
        self
    }

    /// Set the buffer allocation strategy.
    pub fn allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.config.allocator = allocator;
        self
    }

    /// Check the settings and produce the configuration.
    pub fn build(self) -> Result<ConnectorConfig, Error> {
        let config = self.config;
        if config.inbound_buffer_size == 0 {
            return Err(Error::InvalidConfig("inbound_buffer_size must be non-zero"));
        }
        if config.outbound_buffer_size == 0 {
            return Err(Error::InvalidConfig("outbound_buffer_size must be non-zero"));
        }
        if config.max_record_size < config.inbound_buffer_size
            || config.max_record_size < config.outbound_buffer_size
        {
            return Err(Error::InvalidConfig(
                "max_record_size must be at least as large as the buffer sizes",
            ));
        }
        Ok(config)
    }
}

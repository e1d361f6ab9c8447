use std::io;
use std::net::SocketAddr;

use crate::config::ConnectorConfig;
use crate::error::Error;
use crate::log::{debug, trace};
use crate::transport::RawChannel;

pub(crate) mod reader;
pub(crate) mod secured;
pub(crate) mod writer;

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Reads and writes are allowed.
    Open,
    /// The session is shutting down: writes fail, but plaintext that
    /// already arrived can still be read.  This is where `close()` starts,
    /// and where a connection stops when the peer closes the session in
    /// the middle of a handshake.
    Closing,
    /// The connection was closed, by request or after a fatal error.
    Closed,
}

/// The outcome of a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many plaintext bytes were written to the start of the buffer.
    Data(usize),
    /// Nothing can be read until the raw channel is readable (or, during a
    /// handshake, writable) again.
    WouldBlock,
    /// The peer closed the TLS session cleanly; no more plaintext will
    /// arrive.
    Eof,
}

/// The outcome of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// This many bytes from the start of the buffer were encrypted.  Their
    /// ciphertext may still be waiting for the raw channel; see `flush()`.
    Written(usize),
    /// Nothing was accepted.  Try again once the raw channel is writable
    /// (or, during a handshake, readable).
    WouldBlock,
}

/// The outcome of a successful flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// All ciphertext produced so far was handed to the raw channel.
    Flushed,
    /// Some ciphertext is still buffered.
    WouldBlock,
}

/// What a single non-blocking raw channel read did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawIo {
    Ready(usize),
    WouldBlock,
    Eof,
}

/// The transport-level half of a connection: the raw channel, who is on the
/// other end of it, and whether it is still usable.
///
/// This knows nothing about TLS.  [`SecuredConnection`] layers record
/// protection on top of it.
///
/// [`SecuredConnection`]: crate::SecuredConnection
#[derive(Debug)]
pub struct Connection<T> {
    transport: T,
    peer_addr: Option<SocketAddr>,
    state: ConnectionState,
    error: Option<Error>,
}

impl<T> Connection<T> {
    /// Make a new, open, connection over `transport`.
    pub fn new(transport: T, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            transport,
            peer_addr,
            state: ConnectionState::Open,
            error: None,
        }
    }

    /// The address of the peer, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Where this connection is in its lifecycle.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The fatal error that closed this connection, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// The raw channel.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The raw channel, mutably.  Reading or writing it directly will
    /// corrupt the TLS session.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub(crate) fn ensure_open(&self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Open => Ok(()),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Reads are still allowed while closing.
    pub(crate) fn ensure_readable(&self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Open | ConnectionState::Closing => Ok(()),
            ConnectionState::Closed => Err(Error::ConnectionClosed),
        }
    }

    pub(crate) fn begin_close(&mut self) {
        self.state = ConnectionState::Closing;
    }
}

impl<T: RawChannel> Connection<T> {
    pub(crate) fn read_raw(&mut self, buf: &mut [u8]) -> Result<RawIo, Error> {
        if buf.is_empty() {
            return Ok(RawIo::Ready(0));
        }

        loop {
            match self.transport.read(buf) {
                Ok(0) => return Ok(RawIo::Eof),
                Ok(used) => {
                    trace!("read {} bytes from raw channel", used);
                    return Ok(RawIo::Ready(used));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(RawIo::WouldBlock)
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Returns how many bytes the raw channel took, or `None` if it would
    /// block.  A raw channel accepting zero bytes is treated as not
    /// writable; writes have no end-of-file.
    pub(crate) fn write_raw(&mut self, buf: &[u8]) -> Result<Option<usize>, Error> {
        loop {
            match self.transport.write(buf) {
                Ok(0) => return Ok(None),
                Ok(used) => {
                    trace!("wrote {} bytes to raw channel", used);
                    return Ok(Some(used));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Record a fatal error and close.
    pub(crate) fn fail(&mut self, err: Error) {
        self.error = Some(err);
        if let Err(err) = self.shutdown() {
            debug!("raw channel shutdown after failure: {}", err);
        }
    }

    /// Shut the raw channel down, once.
    pub(crate) fn shutdown(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closed;
        match self.transport.shutdown() {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Everything a directional channel needs for the length of one call:
/// the engine both channels drive, and the base connection they move bytes
/// through.
pub(crate) struct Session<'a, E, T> {
    pub(crate) engine: &'a mut E,
    pub(crate) base: &'a mut Connection<T>,
    pub(crate) config: &'a ConnectorConfig,
}

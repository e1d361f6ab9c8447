use std::fmt;
use std::io;
use std::net::SocketAddr;

use super::reader::ReadableTlsChannel;
use super::writer::WritableTlsChannel;
use super::{Connection, ConnectionState, FlushStatus, ReadStatus, Session, WriteStatus};
use crate::config::ConnectorConfig;
use crate::engine::{EngineState, TlsEngine};
use crate::error::Error;
use crate::log::{debug, warn};
use crate::transport::{Interest, RawChannel};

/// A TLS session running over a non-blocking raw channel.
///
/// This owns the TLS engine, the base [`Connection`], and the state of both
/// directions.  Reading and writing are independent operations, but they
/// drive the same engine: a read may have to send handshake records and a
/// write may have to receive some, and either does that as part of the
/// call.  No call ever blocks; each returns a status saying how far it got.
///
/// Buffers are taken from the [`ConnectorConfig`]'s allocator when a
/// direction is first used, and given back on [`close()`] or drop.
///
/// [`close()`]: Self::close
pub struct SecuredConnection<E, T> {
    base: Connection<T>,
    engine: E,
    config: ConnectorConfig,
    reader: Option<ReadableTlsChannel>,
    writer: Option<WritableTlsChannel>,
}

impl<E: TlsEngine, T: RawChannel> SecuredConnection<E, T> {
    /// Start a TLS session over `transport`, which must already be in
    /// non-blocking mode.
    ///
    /// This does no IO: the handshake is driven by the first reads and
    /// writes.
    pub fn open(
        transport: T,
        peer_addr: Option<SocketAddr>,
        engine: E,
        config: ConnectorConfig,
    ) -> Self {
        debug!("opening secured connection with {:?}", peer_addr);
        Self {
            base: Connection::new(transport, peer_addr),
            engine,
            config,
            reader: None,
            writer: None,
        }
    }

    /// Read plaintext into `buf`.
    ///
    /// Plaintext is returned as soon as any is available; the rest of a
    /// record stays buffered for the next call.
    ///
    /// Once the peer has ended the session mid-handshake (see
    /// [`write()`](Self::write)), plaintext it sent before can still be
    /// read, up to `ReadStatus::Eof`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus, Error> {
        self.base.ensure_readable()?;

        let Self {
            base,
            engine,
            config,
            reader,
            writer,
        } = self;
        let mut session = Session {
            engine,
            base,
            config,
        };
        let reader = reader.get_or_insert_with(|| ReadableTlsChannel::new(session.config));
        let result = reader.read(&mut session, writer, buf);
        self.settle(result)
    }

    /// Encrypt plaintext from `buf` and send it.
    ///
    /// `WriteStatus::Written(n)` means the first `n` bytes of `buf` were
    /// encrypted; their ciphertext is either sent or buffered, and
    /// [`flush()`](Self::flush) pushes buffered ciphertext out.
    ///
    /// If the peer closes the session while a write waits for its
    /// handshake records, no write can ever complete: this fails with
    /// [`Error::ConnectionClosed`] and the connection moves to
    /// [`ConnectionState::Closing`].
    pub fn write(&mut self, buf: &[u8]) -> Result<WriteStatus, Error> {
        self.base.ensure_open()?;

        let Self {
            base,
            engine,
            config,
            reader,
            writer,
        } = self;
        let mut session = Session {
            engine,
            base,
            config,
        };
        let writer = writer.get_or_insert_with(|| WritableTlsChannel::new(session.config));
        let result = writer.write(&mut session, reader, buf);
        if let Err(Error::ConnectionClosed) = result {
            debug!(
                "{:?} closed the session before the handshake finished",
                self.base.peer_addr()
            );
            self.base.begin_close();
        }
        self.settle(result)
    }

    /// Send buffered ciphertext, and any records the engine has ready:
    /// handshake messages, or things like session tickets once the
    /// handshake is over.
    pub fn flush(&mut self) -> Result<FlushStatus, Error> {
        self.base.ensure_open()?;

        let result = self.flush_writer();
        self.settle(result)
    }

    /// Close the session and the raw channel.
    ///
    /// A close_notify is sent if the raw channel takes it straight away;
    /// this never waits for the peer's.  Buffers go back to the allocator,
    /// and every later read, write or flush fails with
    /// [`Error::ConnectionClosed`].  Closing twice does nothing.
    ///
    /// A connection that never sent anything sends nothing now, and takes
    /// no buffer from the allocator to do so.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.base.state() == ConnectionState::Closed {
            return Ok(());
        }

        debug!("closing connection with {:?}", self.base.peer_addr());
        self.base.begin_close();
        self.engine.close_outbound();
        if self.writer.is_some() {
            match self.flush_writer() {
                Ok(FlushStatus::Flushed) => {}
                Ok(FlushStatus::WouldBlock) => {
                    debug!("close_notify not sent: raw channel is full")
                }
                Err(err) => debug!("close_notify not sent: {}", err),
            }
        }
        self.engine.close_inbound();
        self.release_buffers();
        Ok(self.base.shutdown()?)
    }

    /// Which raw channel readiness events should next trigger a call into
    /// this connection.
    ///
    /// `readable` is set while more plaintext may arrive; `writable` while
    /// ciphertext is buffered or the engine has records to send.  A closing
    /// connection is only readable until its staged plaintext is drained,
    /// and a closed one wants nothing.
    pub fn interest(&self) -> Interest {
        let at_eof = self
            .reader
            .as_ref()
            .is_some_and(|reader| reader.is_eof());

        match self.base.state() {
            ConnectionState::Closed => Interest::NONE,
            ConnectionState::Closing => Interest {
                readable: !at_eof,
                writable: false,
            },
            ConnectionState::Open => {
                let pending = self
                    .writer
                    .as_ref()
                    .is_some_and(|writer| writer.has_pending());
                Interest {
                    readable: !at_eof,
                    writable: pending || self.engine.wants_wrap(),
                }
            }
        }
    }

    /// A handle implementing [`io::Read`] over this connection.
    pub fn readable_channel(&mut self) -> TlsReader<'_, E, T> {
        if self.reader.is_none() && self.base.state() == ConnectionState::Open {
            self.reader = Some(ReadableTlsChannel::new(&self.config));
        }
        TlsReader { conn: self }
    }

    /// A handle implementing [`io::Write`] over this connection.
    pub fn writable_channel(&mut self) -> TlsWriter<'_, E, T> {
        if self.writer.is_none() && self.base.state() == ConnectionState::Open {
            self.writer = Some(WritableTlsChannel::new(&self.config));
        }
        TlsWriter { conn: self }
    }

    /// Whether the engine is still negotiating: the initial handshake, or a
    /// later one.
    pub fn is_handshaking(&self) -> bool {
        matches!(self.engine.handshake_status(), EngineState::Handshaking(_))
    }

    fn flush_writer(&mut self) -> Result<FlushStatus, Error> {
        let Self {
            base,
            engine,
            config,
            writer,
            ..
        } = self;
        let mut session = Session {
            engine,
            base,
            config,
        };
        let writer = writer.get_or_insert_with(|| WritableTlsChannel::new(session.config));
        writer.flush(&mut session)
    }

    /// Tear the connection down if `result` is a fatal error.
    fn settle<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if let Err(err) = &result {
            if err.is_fatal() {
                warn!(
                    "connection with {:?} failed: {}",
                    self.base.peer_addr(),
                    err
                );
                self.engine.close_outbound();
                self.engine.close_inbound();
                self.release_buffers();
                self.base.fail(err.clone());
            }
        }
        result
    }
}

impl<E, T> SecuredConnection<E, T> {
    /// The address of the peer, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.base.peer_addr()
    }

    /// Where this connection is in its lifecycle.
    pub fn state(&self) -> ConnectionState {
        self.base.state()
    }

    /// The fatal error that closed this connection, if any.
    pub fn error(&self) -> Option<&Error> {
        self.base.error()
    }

    /// The TLS engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The TLS engine, mutably.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// The base connection.
    pub fn base(&self) -> &Connection<T> {
        &self.base
    }

    /// The connector configuration this connection was opened with.
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// The raw channel.
    pub fn transport(&self) -> &T {
        self.base.transport()
    }

    /// The raw channel, mutably; eg. to register it with a poller.
    pub fn transport_mut(&mut self) -> &mut T {
        self.base.transport_mut()
    }

    fn release_buffers(&mut self) {
        let allocator = self.config.allocator.as_ref();
        if let Some(reader) = self.reader.take() {
            reader.release(allocator);
        }
        if let Some(writer) = self.writer.take() {
            writer.release(allocator);
        }
    }
}

impl<E, T> Drop for SecuredConnection<E, T> {
    fn drop(&mut self) {
        self.release_buffers();
    }
}

impl<E: fmt::Debug, T: fmt::Debug> fmt::Debug for SecuredConnection<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecuredConnection")
            .field("base", &self.base)
            .field("engine", &self.engine)
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .finish()
    }
}

/// The readable half of a [`SecuredConnection`], as an [`io::Read`].
///
/// Would-block conditions surface as [`io::ErrorKind::WouldBlock`], and a
/// clean close by the peer as `Ok(0)`.
#[derive(Debug)]
pub struct TlsReader<'a, E, T> {
    conn: &'a mut SecuredConnection<E, T>,
}

impl<E: TlsEngine, T: RawChannel> io::Read for TlsReader<'_, E, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.conn.read(buf)? {
            ReadStatus::Data(used) => Ok(used),
            ReadStatus::Eof => Ok(0),
            ReadStatus::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

/// The writable half of a [`SecuredConnection`], as an [`io::Write`].
///
/// Would-block conditions surface as [`io::ErrorKind::WouldBlock`].
#[derive(Debug)]
pub struct TlsWriter<'a, E, T> {
    conn: &'a mut SecuredConnection<E, T>,
}

impl<E: TlsEngine, T: RawChannel> io::Write for TlsWriter<'_, E, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.conn.write(buf)? {
            WriteStatus::Written(used) => Ok(used),
            WriteStatus::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.conn.flush()? {
            FlushStatus::Flushed => Ok(()),
            FlushStatus::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};

use super::{EngineResult, EngineState, HandshakeStep, Status, TlsEngine};
use crate::error::Error;
use crate::log::{debug, trace};

/// Largest plaintext rustls puts in one record.
const MAX_FRAGMENT_LEN: usize = 16 * 1024;

/// Room left in a `wrap()` destination for record framing and protection,
/// on top of the plaintext accepted by that call.
const RECORD_OVERHEAD: usize = 64;

/// A [`TlsEngine`] backed by a rustls [`Connection`].
///
/// rustls keeps its own buffers on both sides of the record layer.  This
/// adapter feeds ciphertext through `read_tls()`/`process_new_packets()` on
/// `unwrap()`, and drains `write_tls()` on `wrap()`, so that from the
/// outside it behaves like a record-at-a-time engine:
///
/// - plaintext is only accepted once the handshake is complete, and then
///   only as much as fits one record in the destination, so every accepted
///   byte has its ciphertext in the caller's buffer when `wrap()` returns;
/// - `unwrap()` reports [`Status::NeedMoreCiphertext`] when it consumed
///   everything it was given without producing plaintext or anything to
///   send.
pub struct RustlsEngine {
    conn: Connection,
    buffered_plaintext: usize,
    peer_closed: bool,
    inbound_closed: bool,
    outbound_closed: bool,
}

impl RustlsEngine {
    /// Make a new engine for the server side of a connection.
    pub fn server(config: Arc<ServerConfig>) -> Result<Self, Error> {
        Ok(Self::new(ServerConnection::new(config)?.into()))
    }

    /// Make a new engine for the client side of a connection to `name`.
    pub fn client(config: Arc<ClientConfig>, name: ServerName<'static>) -> Result<Self, Error> {
        Ok(Self::new(ClientConnection::new(config, name)?.into()))
    }

    /// Wrap an existing connection, which must not have done any I/O yet.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            buffered_plaintext: 0,
            peer_closed: false,
            inbound_closed: false,
            outbound_closed: false,
        }
    }

    /// The underlying rustls connection, eg. for the negotiated ALPN
    /// protocol or the peer's certificates.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn read_plaintext(&mut self, dst: &mut [u8]) -> Result<usize, Error> {
        if dst.is_empty() {
            return Ok(0);
        }

        match self.conn.reader().read(dst) {
            Ok(used) => {
                self.buffered_plaintext = self
                    .buffered_plaintext
                    .saturating_sub(used);
                Ok(used)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn accepts_plaintext(&self) -> bool {
        !self.outbound_closed && !self.conn.is_handshaking() && !self.conn.wants_write()
    }
}

impl TlsEngine for RustlsEngine {
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error> {
        if self.inbound_closed {
            return Ok(EngineResult::new(Status::Closed, 0, 0));
        }
        if dst.is_empty() {
            return Ok(EngineResult::new(Status::NeedLargerBuffer, 0, 0));
        }

        let mut consumed = 0;
        let mut produced = 0;
        loop {
            produced += self.read_plaintext(&mut dst[produced..])?;
            if produced == dst.len() || consumed == src.len() || self.peer_closed {
                break;
            }

            let used = self.conn.read_tls(&mut &src[consumed..])?;
            if used == 0 {
                break;
            }
            consumed += used;

            let io_state = self.conn.process_new_packets()?;
            self.buffered_plaintext = io_state.plaintext_bytes_to_read();
            if io_state.peer_has_closed() && !self.peer_closed {
                debug!("peer sent close_notify");
                self.peer_closed = true;
            }
        }

        trace!(
            "unwrap: consumed {} produced {} buffered {}",
            consumed,
            produced,
            self.buffered_plaintext
        );

        let status = if produced > 0 {
            Status::Ok
        } else if self.peer_closed {
            Status::Closed
        } else if self.conn.wants_write() {
            Status::Ok
        } else {
            Status::NeedMoreCiphertext
        };
        Ok(EngineResult::new(status, consumed, produced))
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error> {
        let mut consumed = 0;
        let mut starved = false;
        if !src.is_empty() && self.accepts_plaintext() {
            let room = dst
                .len()
                .saturating_sub(RECORD_OVERHEAD)
                .min(MAX_FRAGMENT_LEN);
            if room == 0 {
                starved = true;
            } else {
                let take = src.len().min(room);
                consumed = self.conn.writer().write(&src[..take])?;
            }
        }

        let mut out = &mut dst[..];
        while self.conn.wants_write() && !out.is_empty() {
            if self.conn.write_tls(&mut out)? == 0 {
                break;
            }
        }
        let remaining = out.len();
        let produced = dst.len() - remaining;

        trace!("wrap: consumed {} produced {}", consumed, produced);

        let status = if starved || (produced == 0 && self.conn.wants_write()) {
            Status::NeedLargerBuffer
        } else if produced == 0 && self.outbound_closed {
            Status::Closed
        } else {
            Status::Ok
        };
        Ok(EngineResult::new(status, consumed, produced))
    }

    fn handshake_status(&self) -> EngineState {
        if self.outbound_closed {
            if self.inbound_closed {
                EngineState::Closed
            } else {
                EngineState::Closing
            }
        } else if !self.conn.is_handshaking() {
            EngineState::NotHandshaking
        } else if self.conn.wants_write() {
            EngineState::Handshaking(HandshakeStep::NeedWrap)
        } else {
            EngineState::Handshaking(HandshakeStep::NeedUnwrap)
        }
    }

    fn wants_wrap(&self) -> bool {
        self.conn.wants_write()
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            debug!("sending close_notify");
            self.outbound_closed = true;
            self.conn.send_close_notify();
        }
    }

    fn close_inbound(&mut self) {
        self.inbound_closed = true;
    }
}

impl fmt::Debug for RustlsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustlsEngine")
            .field("state", &self.handshake_status())
            .field("buffered_plaintext", &self.buffered_plaintext)
            .field("peer_closed", &self.peer_closed)
            .finish()
    }
}

use super::writer::WritableTlsChannel;
use super::{FlushStatus, RawIo, ReadStatus, Session};
use crate::buffer::{BufferAllocator, PacketBuffer};
use crate::config::ConnectorConfig;
use crate::engine::{EngineState, HandshakeStep, Status, TlsEngine};
use crate::error::Error;
use crate::log::{debug, trace};
use crate::transport::RawChannel;

/// What one `fill()` achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fill {
    /// Ciphertext was taken in, or plaintext came out.
    Progress,
    /// The staging buffer must be drained by the application first.
    PlaintextPending,
    /// The raw channel has nothing more for now.
    WouldBlock,
    /// The peer closed the session.
    Closed,
}

/// The decrypting half of a secured connection.
///
/// `packet` holds ciphertext read from the raw channel that the engine
/// hasn't consumed yet; `plain` holds decrypted bytes the application
/// hasn't read yet.
#[derive(Debug)]
pub(crate) struct ReadableTlsChannel {
    packet: PacketBuffer,
    plain: PacketBuffer,
    eof: bool,
}

impl ReadableTlsChannel {
    pub(crate) fn new(config: &ConnectorConfig) -> Self {
        trace!(
            "allocating inbound buffers of {} bytes",
            config.inbound_buffer_size
        );
        Self {
            packet: PacketBuffer::new(
                config
                    .allocator
                    .allocate(config.inbound_buffer_size),
            ),
            plain: PacketBuffer::new(
                config
                    .allocator
                    .allocate(config.inbound_buffer_size),
            ),
            eof: false,
        }
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.eof && self.plain.is_empty()
    }

    /// Read decrypted bytes into `dst`, driving the handshake as needed.
    ///
    /// Handshake records we must send on the way are written through
    /// `writer`, which is created if the connection has none yet.
    pub(crate) fn read<E: TlsEngine, T: RawChannel>(
        &mut self,
        session: &mut Session<'_, E, T>,
        writer: &mut Option<WritableTlsChannel>,
        dst: &mut [u8],
    ) -> Result<ReadStatus, Error> {
        if dst.is_empty() {
            return Ok(ReadStatus::Data(0));
        }

        loop {
            if !self.plain.is_empty() {
                return Ok(ReadStatus::Data(self.plain.read_into(dst)));
            }
            if self.eof {
                return Ok(ReadStatus::Eof);
            }

            if session.engine.wants_wrap() {
                let writer =
                    writer.get_or_insert_with(|| WritableTlsChannel::new(session.config));
                if writer.flush(session)? == FlushStatus::WouldBlock {
                    return Ok(ReadStatus::WouldBlock);
                }
            }
            if session.engine.handshake_status()
                == EngineState::Handshaking(HandshakeStep::NeedTask)
            {
                session.engine.run_delegated_task()?;
                continue;
            }

            match self.fill(session)? {
                Fill::Progress | Fill::PlaintextPending | Fill::Closed => continue,
                Fill::WouldBlock => return Ok(ReadStatus::WouldBlock),
            }
        }
    }

    /// Move ciphertext from the raw channel through the engine into the
    /// staging buffer.
    ///
    /// While the engine needs more ciphertext, this keeps reading until the
    /// raw channel would block, not just once: every read is non-blocking,
    /// and a record split over many small reads completes in one call.
    ///
    /// Returns `WouldBlock` only if nothing at all happened: no bytes were
    /// read, and the engine neither consumed nor produced anything.
    pub(crate) fn fill<E: TlsEngine, T: RawChannel>(
        &mut self,
        session: &mut Session<'_, E, T>,
    ) -> Result<Fill, Error> {
        if self.eof {
            return Ok(Fill::Closed);
        }

        let mut progressed = false;
        loop {
            let result = session
                .engine
                .unwrap(self.packet.filled(), self.plain.unfilled())?;
            self.packet.consume(result.consumed);
            self.plain.advance(result.produced);
            progressed |= result.made_progress();

            match result.status {
                Status::Ok if result.made_progress() => return Ok(Fill::Progress),
                Status::Ok | Status::NeedMoreCiphertext => {
                    if self.packet.is_full() {
                        self.packet
                            .grow(session.config.max_record_size)?;
                    }

                    match self.read_more(session)? {
                        RawIo::Ready(_) => {
                            progressed = true;
                        }
                        RawIo::WouldBlock if progressed => return Ok(Fill::Progress),
                        RawIo::WouldBlock => return Ok(Fill::WouldBlock),
                        RawIo::Eof => return Err(Error::unexpected_eof()),
                    }
                }
                Status::NeedLargerBuffer => {
                    if !self.plain.is_empty() {
                        return Ok(Fill::PlaintextPending);
                    }
                    self.plain
                        .grow(session.config.max_record_size)?;
                }
                Status::Closed => {
                    debug!("inbound TLS stream closed by peer");
                    self.eof = true;
                    return Ok(Fill::Closed);
                }
            }
        }
    }

    fn read_more<E, T: RawChannel>(
        &mut self,
        session: &mut Session<'_, E, T>,
    ) -> Result<RawIo, Error> {
        let io = session
            .base
            .read_raw(self.packet.unfilled())?;
        if let RawIo::Ready(used) = io {
            self.packet.advance(used);
        }
        Ok(io)
    }

    pub(crate) fn release(self, allocator: &dyn BufferAllocator) {
        allocator.release(self.packet.into_inner());
        allocator.release(self.plain.into_inner());
    }
}

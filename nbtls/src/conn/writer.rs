use super::reader::{Fill, ReadableTlsChannel};
use super::{Connection, FlushStatus, Session, WriteStatus};
use crate::buffer::{BufferAllocator, PacketBuffer};
use crate::config::ConnectorConfig;
use crate::engine::{EngineState, HandshakeStep, Status, TlsEngine};
use crate::error::Error;
use crate::log::trace;
use crate::transport::RawChannel;

/// The encrypting half of a secured connection.
///
/// `packet` holds records produced by the engine that the raw channel
/// hasn't accepted yet.
#[derive(Debug)]
pub(crate) struct WritableTlsChannel {
    packet: PacketBuffer,
}

impl WritableTlsChannel {
    pub(crate) fn new(config: &ConnectorConfig) -> Self {
        trace!(
            "allocating outbound buffer of {} bytes",
            config.outbound_buffer_size
        );
        Self {
            packet: PacketBuffer::new(
                config
                    .allocator
                    .allocate(config.outbound_buffer_size),
            ),
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.packet.is_empty()
    }

    /// Encrypt as much of `src` as the raw channel will take.
    ///
    /// Handshake records the engine must receive first are read through
    /// `reader`, which is created if the connection has none yet.
    pub(crate) fn write<E: TlsEngine, T: RawChannel>(
        &mut self,
        session: &mut Session<'_, E, T>,
        reader: &mut Option<ReadableTlsChannel>,
        src: &[u8],
    ) -> Result<WriteStatus, Error> {
        let mut consumed = 0;
        let blocked = |consumed: usize| match consumed {
            0 => WriteStatus::WouldBlock,
            n => WriteStatus::Written(n),
        };

        loop {
            if !self.drain(session.base)? {
                return Ok(blocked(consumed));
            }
            if consumed == src.len() {
                return Ok(WriteStatus::Written(consumed));
            }

            match session.engine.handshake_status() {
                EngineState::Handshaking(HandshakeStep::NeedUnwrap) => {
                    let reader =
                        reader.get_or_insert_with(|| ReadableTlsChannel::new(session.config));
                    match reader.fill(session)? {
                        Fill::Progress => continue,
                        Fill::PlaintextPending | Fill::WouldBlock => {
                            return Ok(blocked(consumed));
                        }
                        Fill::Closed => return Err(Error::ConnectionClosed),
                    }
                }
                EngineState::Handshaking(HandshakeStep::NeedTask) => {
                    session.engine.run_delegated_task()?;
                    continue;
                }
                EngineState::Closing | EngineState::Closed => {
                    return Err(Error::ConnectionClosed);
                }
                EngineState::Handshaking(HandshakeStep::NeedWrap) | EngineState::NotHandshaking => {}
            }

            let result = session
                .engine
                .wrap(&src[consumed..], self.packet.unfilled())?;
            self.packet.advance(result.produced);
            consumed += result.consumed;

            match result.status {
                Status::Closed => return Err(Error::ConnectionClosed),
                Status::NeedLargerBuffer if self.packet.is_empty() => {
                    self.packet
                        .grow(session.config.max_record_size)?;
                }
                Status::NeedLargerBuffer => {}
                _ if result.made_progress() => {}
                _ => {
                    return Err(Error::ProtocolViolation(
                        "engine made no progress wrapping data".into(),
                    ));
                }
            }
        }
    }

    /// Send everything buffered, plus whatever handshake, closure or
    /// post-handshake records the engine wants to send.
    pub(crate) fn flush<E: TlsEngine, T: RawChannel>(
        &mut self,
        session: &mut Session<'_, E, T>,
    ) -> Result<FlushStatus, Error> {
        loop {
            if !self.drain(session.base)? {
                return Ok(FlushStatus::WouldBlock);
            }
            if !session.engine.wants_wrap() {
                return Ok(FlushStatus::Flushed);
            }

            let result = session
                .engine
                .wrap(&[], self.packet.unfilled())?;
            self.packet.advance(result.produced);
            if result.produced > 0 {
                continue;
            }

            match result.status {
                Status::NeedLargerBuffer if self.packet.is_empty() => {
                    self.packet
                        .grow(session.config.max_record_size)?;
                }
                Status::NeedLargerBuffer => {}
                _ => return Ok(FlushStatus::Flushed),
            }
        }
    }

    /// Returns true once nothing is left buffered.
    fn drain<T: RawChannel>(&mut self, base: &mut Connection<T>) -> Result<bool, Error> {
        while !self.packet.is_empty() {
            match base.write_raw(self.packet.filled())? {
                Some(used) => self.packet.consume(used),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    pub(crate) fn release(self, allocator: &dyn BufferAllocator) {
        allocator.release(self.packet.into_inner());
    }
}

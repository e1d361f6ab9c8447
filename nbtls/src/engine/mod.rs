use crate::error::Error;

pub(crate) mod rustls;

/// Where an engine is in its negotiation with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No handshake in progress: application data flows both ways.
    NotHandshaking,
    /// A handshake (initial, or a renegotiation) is in progress, and this is
    /// what it needs next.
    Handshaking(HandshakeStep),
    /// Our close_notify was queued; what is left is sending it.
    Closing,
    /// The engine is done in both directions.
    Closed,
}

/// What a handshake in progress needs to make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Records must be produced with `wrap()` and sent to the peer.
    NeedWrap,
    /// Records must be received from the peer and fed to `unwrap()`.
    NeedUnwrap,
    /// The engine has work to do before it can continue; see
    /// [`TlsEngine::run_delegated_task()`].
    NeedTask,
}

/// The outcome of one `wrap()` or `unwrap()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The call completed; `consumed`/`produced` say how far it got.
    Ok,
    /// The input doesn't hold a complete record: read more ciphertext from
    /// the raw channel and retry.
    NeedMoreCiphertext,
    /// The output buffer is too small for the next record: drain or grow it
    /// and retry.
    NeedLargerBuffer,
    /// The engine is closed in the direction of this call.
    Closed,
}

/// What a `wrap()` or `unwrap()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    /// The outcome
    pub status: Status,
    /// Bytes taken from the input buffer
    pub consumed: usize,
    /// Bytes written to the output buffer
    pub produced: usize,
}

impl EngineResult {
    /// Make a new EngineResult.
    pub fn new(status: Status, consumed: usize, produced: usize) -> Self {
        Self {
            status,
            consumed,
            produced,
        }
    }

    pub(crate) fn made_progress(&self) -> bool {
        self.consumed > 0 || self.produced > 0
    }
}

/// A TLS state machine that can be driven over non-blocking transports.
///
/// An engine does no I/O.  It converts plaintext to records with `wrap()`,
/// records to plaintext with `unwrap()`, and says what it needs next through
/// `handshake_status()`.  The [`SecuredConnection`] decides when to call it,
/// and moves the bytes between the engine and the raw channel.
///
/// Any error returned by `wrap()` or `unwrap()` is fatal to the connection;
/// it will not be called again.
///
/// [`SecuredConnection`]: crate::SecuredConnection
pub trait TlsEngine {
    /// Decrypt records from `src` into `dst`.
    ///
    /// Handshake records are processed without producing output; the
    /// engine's `handshake_status()` moves on instead.
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error>;

    /// Encrypt plaintext from `src` into records written to `dst`.
    ///
    /// While the engine wants to send handshake records, those are produced
    /// instead and nothing is consumed from `src`.  `src` may be empty.
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error>;

    /// What the engine needs next.
    fn handshake_status(&self) -> EngineState;

    /// Whether `wrap()` has records to produce without any plaintext.
    ///
    /// This covers handshake messages, closure alerts, and anything the
    /// engine sends after the handshake (eg. session tickets or key
    /// updates), which do not make it report a handshake in progress.
    fn wants_wrap(&self) -> bool {
        matches!(
            self.handshake_status(),
            EngineState::Handshaking(HandshakeStep::NeedWrap) | EngineState::Closing
        )
    }

    /// Perform whatever work made the engine report
    /// [`HandshakeStep::NeedTask`].
    fn run_delegated_task(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Queue a close_notify; no application data is accepted after this.
    fn close_outbound(&mut self);

    /// Stop accepting records from the peer.
    fn close_inbound(&mut self);
}

impl<E: TlsEngine + ?Sized> TlsEngine for Box<E> {
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error> {
        (**self).unwrap(src, dst)
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error> {
        (**self).wrap(src, dst)
    }

    fn handshake_status(&self) -> EngineState {
        (**self).handshake_status()
    }

    fn wants_wrap(&self) -> bool {
        (**self).wants_wrap()
    }

    fn run_delegated_task(&mut self) -> Result<(), Error> {
        (**self).run_delegated_task()
    }

    fn close_outbound(&mut self) {
        (**self).close_outbound()
    }

    fn close_inbound(&mut self) {
        (**self).close_inbound()
    }
}

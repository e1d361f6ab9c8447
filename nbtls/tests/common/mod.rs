#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
pub use std::sync::Arc;

use nbtls::{
    ConnectorConfig, EngineResult, EngineState, Error, HandshakeStep, RawChannel, ReadStatus,
    RustlsEngine, SecuredConnection, Status, TlsEngine,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

/* In-memory non-blocking transport */

#[derive(Debug)]
struct Pipe {
    /// `queues[side]` holds bytes waiting to be read by `side`.
    queues: [VecDeque<u8>; 2],
    shut: [bool; 2],
    read_allowance: [Option<usize>; 2],
    write_chunk: usize,
    capacity: usize,
}

/// One end of an in-memory byte pipe.
///
/// Reads return `WouldBlock` when nothing is queued, and `Ok(0)` once the
/// other end has shut down.  Writes return `WouldBlock` once `capacity`
/// bytes are queued for the peer.
#[derive(Debug, Clone)]
pub struct PipeEnd {
    pipe: Rc<RefCell<Pipe>>,
    side: usize,
}

pub fn pipe() -> (PipeEnd, PipeEnd) {
    let pipe = Rc::new(RefCell::new(Pipe {
        queues: [VecDeque::new(), VecDeque::new()],
        shut: [false; 2],
        read_allowance: [None; 2],
        write_chunk: usize::MAX,
        capacity: usize::MAX,
    }));
    (
        PipeEnd {
            pipe: pipe.clone(),
            side: 0,
        },
        PipeEnd { pipe, side: 1 },
    )
}

impl PipeEnd {
    fn peer(&self) -> usize {
        1 - self.side
    }

    /// Limit every write, from either end, to `n` bytes.
    pub fn set_write_chunk(&self, n: usize) {
        self.pipe.borrow_mut().write_chunk = n;
    }

    /// Limit the bytes queued in each direction to `n`.
    pub fn set_capacity(&self, n: usize) {
        self.pipe.borrow_mut().capacity = n;
    }

    /// From now on, this end can read only bytes granted by `allow_read()`.
    pub fn meter_reads(&self) {
        self.pipe.borrow_mut().read_allowance[self.side] = Some(0);
    }

    /// Let this end read at most `n` more bytes, replacing any allowance
    /// left over.
    pub fn allow_read(&self, n: usize) {
        self.pipe.borrow_mut().read_allowance[self.side] = Some(n);
    }

    /// Bytes waiting to be read by this end.
    pub fn readable_bytes(&self) -> usize {
        self.pipe.borrow().queues[self.side].len()
    }

    /// Bytes this end wrote that the other end hasn't read.
    pub fn unread_by_peer(&self) -> usize {
        self.pipe.borrow().queues[self.peer()].len()
    }

    /// Queue bytes for this end to read, as if the peer had written them.
    pub fn inject(&self, bytes: &[u8]) {
        self.pipe.borrow_mut().queues[self.side].extend(bytes);
    }

    /// Take everything queued for this end, without going through `read()`.
    pub fn take_all(&self) -> Vec<u8> {
        self.pipe.borrow_mut().queues[self.side]
            .drain(..)
            .collect()
    }

    pub fn is_shut(&self) -> bool {
        self.pipe.borrow().shut[self.side]
    }
}

impl io::Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        let peer_shut = pipe.shut[self.peer()];
        let mut limit = buf.len();
        if let Some(allowance) = pipe.read_allowance[self.side] {
            limit = limit.min(allowance);
        }

        let queue = &mut pipe.queues[self.side];
        if queue.is_empty() {
            return match peer_shut {
                true => Ok(0),
                false => Err(io::ErrorKind::WouldBlock.into()),
            };
        }
        if limit == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let used = limit.min(queue.len());
        for (dst, src) in buf.iter_mut().zip(queue.drain(..used)) {
            *dst = src;
        }
        if let Some(allowance) = &mut pipe.read_allowance[self.side] {
            *allowance -= used;
        }
        Ok(used)
    }
}

impl io::Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.shut[self.side] {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        let peer = self.peer();
        let room = pipe
            .capacity
            .saturating_sub(pipe.queues[peer].len());
        let used = buf.len().min(room).min(pipe.write_chunk);
        if used == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        pipe.queues[peer].extend(&buf[..used]);
        Ok(used)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RawChannel for PipeEnd {
    fn shutdown(&mut self) -> io::Result<()> {
        self.pipe.borrow_mut().shut[self.side] = true;
        Ok(())
    }
}

/* A scripted engine with a trivial record layer.
 *
 * Records are `[kind][len: u16 BE][payload ^ 0x5a]`.  The client opens
 * with HELLO, the server answers with ACK; either side can start another
 * exchange at any time with `request_renegotiation()`.  One record is
 * handled per wrap/unwrap call. */

pub const HELLO: u8 = 1;
pub const ACK: u8 = 2;
pub const DATA: u8 = 3;
pub const CLOSE: u8 = 4;

const HEADER_LEN: usize = 3;
const MASK: u8 = 0x5a;

pub fn toy_record(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![kind];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend(payload.iter().map(|b| b ^ MASK));
    out
}

#[derive(Debug)]
pub struct ToyEngine {
    pending: VecDeque<u8>,
    awaiting_ack: bool,
    established: bool,
    task_pending: bool,
    delegate_tasks: bool,
    fragment: usize,
    outbound_closed: bool,
    inbound_closed: bool,
    peer_closed: bool,
    pub handshakes: usize,
}

impl ToyEngine {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            awaiting_ack: false,
            established: false,
            task_pending: false,
            delegate_tasks: false,
            fragment: 1024,
            outbound_closed: false,
            inbound_closed: false,
            peer_closed: false,
            handshakes: 0,
        }
    }

    pub fn client() -> Self {
        let mut engine = Self::new();
        engine.pending.push_back(HELLO);
        engine
    }

    pub fn server() -> Self {
        Self::new()
    }

    /// Largest plaintext carried by one DATA record.
    pub fn with_fragment(mut self, fragment: usize) -> Self {
        self.fragment = fragment;
        self
    }

    /// Answer HELLO only after `run_delegated_task()`.
    pub fn with_delegated_tasks(mut self) -> Self {
        self.delegate_tasks = true;
        self
    }

    pub fn request_renegotiation(&mut self) {
        self.pending.push_back(HELLO);
    }

    fn peer_hello(&mut self) {
        match self.delegate_tasks {
            true => self.task_pending = true,
            false => self.pending.push_back(ACK),
        }
    }
}

impl TlsEngine for ToyEngine {
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error> {
        if self.inbound_closed || self.peer_closed {
            return Ok(EngineResult::new(Status::Closed, 0, 0));
        }
        if src.len() < HEADER_LEN {
            return Ok(EngineResult::new(Status::NeedMoreCiphertext, 0, 0));
        }

        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if src.len() < HEADER_LEN + len {
            return Ok(EngineResult::new(Status::NeedMoreCiphertext, 0, 0));
        }
        let consumed = HEADER_LEN + len;
        let payload = &src[HEADER_LEN..consumed];

        match src[0] {
            DATA => {
                if dst.len() < len {
                    return Ok(EngineResult::new(Status::NeedLargerBuffer, 0, 0));
                }
                for (out, b) in dst.iter_mut().zip(payload) {
                    *out = b ^ MASK;
                }
                Ok(EngineResult::new(Status::Ok, consumed, len))
            }
            HELLO => {
                self.peer_hello();
                Ok(EngineResult::new(Status::Ok, consumed, 0))
            }
            ACK if self.awaiting_ack => {
                self.awaiting_ack = false;
                self.established = true;
                self.handshakes += 1;
                Ok(EngineResult::new(Status::Ok, consumed, 0))
            }
            CLOSE => {
                self.peer_closed = true;
                Ok(EngineResult::new(Status::Closed, consumed, 0))
            }
            kind => Err(Error::ProtocolViolation(format!(
                "unexpected record kind {}",
                kind
            ))),
        }
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error> {
        if let Some(&kind) = self.pending.front() {
            if dst.len() < HEADER_LEN {
                return Ok(EngineResult::new(Status::NeedLargerBuffer, 0, 0));
            }
            self.pending.pop_front();
            dst[..HEADER_LEN].copy_from_slice(&toy_record(kind, &[]));
            match kind {
                HELLO => self.awaiting_ack = true,
                ACK => {
                    self.established = true;
                    self.handshakes += 1;
                }
                _ => {}
            }
            return Ok(EngineResult::new(Status::Ok, 0, HEADER_LEN));
        }

        if self.outbound_closed {
            return Ok(EngineResult::new(Status::Closed, 0, 0));
        }
        if !self.established || self.awaiting_ack || self.task_pending || src.is_empty() {
            return Ok(EngineResult::new(Status::Ok, 0, 0));
        }

        let take = src.len().min(self.fragment);
        if dst.len() < HEADER_LEN + take {
            return Ok(EngineResult::new(Status::NeedLargerBuffer, 0, 0));
        }
        let record = toy_record(DATA, &src[..take]);
        dst[..record.len()].copy_from_slice(&record);
        Ok(EngineResult::new(Status::Ok, take, record.len()))
    }

    fn handshake_status(&self) -> EngineState {
        if self.outbound_closed {
            return match self.inbound_closed {
                true => EngineState::Closed,
                false => EngineState::Closing,
            };
        }

        if !self.pending.is_empty() {
            EngineState::Handshaking(HandshakeStep::NeedWrap)
        } else if self.task_pending {
            EngineState::Handshaking(HandshakeStep::NeedTask)
        } else if self.awaiting_ack || !self.established {
            EngineState::Handshaking(HandshakeStep::NeedUnwrap)
        } else {
            EngineState::NotHandshaking
        }
    }

    fn run_delegated_task(&mut self) -> Result<(), Error> {
        if self.task_pending {
            self.task_pending = false;
            self.pending.push_back(ACK);
        }
        Ok(())
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.outbound_closed = true;
            self.pending.clear();
            self.pending.push_back(CLOSE);
        }
    }

    fn close_inbound(&mut self) {
        self.inbound_closed = true;
    }
}

pub type ToyConnection = SecuredConnection<ToyEngine, PipeEnd>;

pub fn toy_pair(config: ConnectorConfig) -> (ToyConnection, ToyConnection) {
    toy_pair_with(ToyEngine::client(), ToyEngine::server(), config)
}

pub fn toy_pair_with(
    client: ToyEngine,
    server: ToyEngine,
    config: ConnectorConfig,
) -> (ToyConnection, ToyConnection) {
    let (client_end, server_end) = pipe();
    (
        SecuredConnection::open(client_end, None, client, config.clone()),
        SecuredConnection::open(server_end, None, server, config),
    )
}

/* rustls peers with a freshly generated certificate */

pub fn rustls_configs() -> (Arc<ClientConfig>, Arc<ServerConfig>) {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));

    let server_config = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key)
        .unwrap();

    let mut roots = RootCertStore::empty();
    roots.add(cert.cert.der().clone()).unwrap();
    let client_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

    (Arc::new(client_config), Arc::new(server_config))
}

pub type RustlsConnection = SecuredConnection<RustlsEngine, PipeEnd>;

pub fn rustls_pair(config: ConnectorConfig) -> (RustlsConnection, RustlsConnection) {
    let (client_config, server_config) = rustls_configs();
    let client = RustlsEngine::client(
        client_config,
        ServerName::try_from("localhost").unwrap(),
    )
    .unwrap();
    let server = RustlsEngine::server(server_config).unwrap();

    let (client_end, server_end) = pipe();
    (
        SecuredConnection::open(client_end, None, client, config.clone()),
        SecuredConnection::open(server_end, None, server, config),
    )
}

/* Driving pairs of connections */

/// Poke both connections until neither is handshaking.
pub fn do_handshake<E: TlsEngine>(
    client: &mut SecuredConnection<E, PipeEnd>,
    server: &mut SecuredConnection<E, PipeEnd>,
) {
    let mut buf = [0u8; 64];
    for _ in 0..100 {
        client.flush().unwrap();
        assert_eq!(client.read(&mut buf).unwrap(), ReadStatus::WouldBlock);
        server.flush().unwrap();
        assert_eq!(server.read(&mut buf).unwrap(), ReadStatus::WouldBlock);
        if !client.is_handshaking() && !server.is_handshaking() {
            client.flush().unwrap();
            server.flush().unwrap();
            return;
        }
    }
    panic!("handshake did not complete");
}

/// Read from `conn` until it would block, collecting the plaintext.
pub fn read_available<E: TlsEngine>(conn: &mut SecuredConnection<E, PipeEnd>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1000];
    loop {
        match conn.read(&mut buf).unwrap() {
            ReadStatus::Data(used) => out.extend_from_slice(&buf[..used]),
            ReadStatus::WouldBlock | ReadStatus::Eof => return out,
        }
    }
}

//! This is an example server that terminates TLS with nbtls, using rustls as
//! the engine and [mio] for readiness notification.
//!
//! Every connection echoes back whatever plaintext it receives.  All
//! connections share one connector configuration, and so one buffer pool.
//!
//! Note that `unwrap()` is used to deal with networking errors; this is not
//! something that is sensible outside of example code.
//!
//! [mio]: https://docs.rs/mio/latest/mio/

use std::collections::HashMap;
use std::io;
use std::net;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use log::{debug, error, info};
use mio::net::{TcpListener, TcpStream};
use nbtls::{
    BufferPool, ConnectorConfig, ReadStatus, RustlsEngine, SecuredConnection, WriteStatus,
    DEFAULT_BUFFER_SIZE,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

// Token for our listening socket.
const LISTENER: mio::Token = mio::Token(0);

/// This binds together a TCP listening socket, some outstanding
/// connections, and the configuration every new connection gets.
struct EchoServer {
    server: TcpListener,
    connections: HashMap<mio::Token, EchoConnection>,
    next_id: usize,
    tls_config: Arc<rustls::ServerConfig>,
    connector: ConnectorConfig,
}

impl EchoServer {
    fn new(
        server: TcpListener,
        tls_config: Arc<rustls::ServerConfig>,
        connector: ConnectorConfig,
    ) -> Self {
        Self {
            server,
            connections: HashMap::new(),
            next_id: 2,
            tls_config,
            connector,
        }
    }

    fn accept(&mut self, registry: &mio::Registry) -> Result<(), io::Error> {
        loop {
            match self.server.accept() {
                Ok((socket, addr)) => {
                    debug!("Accepting new connection from {:?}", addr);

                    let engine = RustlsEngine::server(Arc::clone(&self.tls_config)).unwrap();
                    let conn =
                        SecuredConnection::open(socket, Some(addr), engine, self.connector.clone());

                    let token = mio::Token(self.next_id);
                    self.next_id += 1;

                    let mut connection = EchoConnection::new(conn, token);
                    connection.register(registry);
                    self.connections
                        .insert(token, connection);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => {
                    error!("encountered error while accepting connection: {}", err);
                    return Err(err);
                }
            }
        }
    }

    fn conn_event(&mut self, registry: &mio::Registry, event: &mio::event::Event) {
        let token = event.token();

        if let Some(connection) = self.connections.get_mut(&token) {
            connection.ready(registry);

            if connection.is_closed() {
                self.connections.remove(&token);
            }
        }
    }
}

/// A connection which has been accepted by the server, and is currently
/// being served.
struct EchoConnection {
    conn: SecuredConnection<RustlsEngine, TcpStream>,
    token: mio::Token,
    /// Plaintext received but not yet accepted for sending back.
    echo: Vec<u8>,
    closed: bool,
}

impl EchoConnection {
    fn new(conn: SecuredConnection<RustlsEngine, TcpStream>, token: mio::Token) -> Self {
        Self {
            conn,
            token,
            echo: Vec::new(),
            closed: false,
        }
    }

    /// Something happened on the socket.  Mio readiness is edge-triggered,
    /// so do everything that can be done now.
    fn ready(&mut self, registry: &mio::Registry) {
        if let Err(err) = self.pump() {
            error!("connection with {:?} failed: {}", self.conn.peer_addr(), err);
        }

        match self.event_set() {
            Some(interest) if !self.closed => self.reregister(registry, interest),
            _ => {
                let _ = self.conn.close();
                self.deregister(registry);
                self.closed = true;
            }
        }
    }

    fn pump(&mut self) -> Result<(), nbtls::Error> {
        let mut buf = [0u8; 4096];
        loop {
            self.send_echo()?;
            if !self.echo.is_empty() {
                // the peer isn't keeping up; hear more from it later
                break;
            }

            match self.conn.read(&mut buf)? {
                ReadStatus::Data(used) => {
                    debug!("plaintext read {}", used);
                    self.echo
                        .extend_from_slice(&buf[..used]);
                }
                ReadStatus::WouldBlock => break,
                ReadStatus::Eof => {
                    info!("{:?} closed the session", self.conn.peer_addr());
                    self.send_echo()?;
                    self.conn.flush()?;
                    self.closed = true;
                    return Ok(());
                }
            }
        }

        self.conn.flush()?;
        Ok(())
    }

    fn send_echo(&mut self) -> Result<(), nbtls::Error> {
        while !self.echo.is_empty() {
            match self.conn.write(&self.echo)? {
                WriteStatus::Written(used) => {
                    self.echo.drain(..used);
                }
                WriteStatus::WouldBlock => break,
            }
        }
        Ok(())
    }

    fn register(&mut self, registry: &mio::Registry) {
        let event_set = self
            .event_set()
            .unwrap_or(mio::Interest::READABLE);
        registry
            .register(self.conn.transport_mut(), self.token, event_set)
            .unwrap();
    }

    fn reregister(&mut self, registry: &mio::Registry, event_set: mio::Interest) {
        registry
            .reregister(self.conn.transport_mut(), self.token, event_set)
            .unwrap();
    }

    fn deregister(&mut self, registry: &mio::Registry) {
        let _ = registry.deregister(self.conn.transport_mut());
    }

    /// What IO events we're currently waiting for, based on what the
    /// connection says it needs.
    fn event_set(&self) -> Option<mio::Interest> {
        let interest = self.conn.interest();
        match (interest.readable, interest.writable) {
            (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Runs a TLS echo server on :PORT.  The default PORT is 4443.
///
/// `--certs` names the full certificate chain, `--key` provides the private key.
#[derive(Debug, Parser)]
struct Args {
    /// Listen on port.
    #[clap(short, long, default_value = "4443")]
    port: u16,
    /// Emit log output.
    #[clap(short, long)]
    verbose: bool,
    /// Read server certificates from the given file. This should contain PEM-format certificates
    /// in the right order (the first certificate should certify the end entity, matching the
    /// private key, the last should be a root CA).
    #[clap(long)]
    certs: PathBuf,
    /// Read private key from the given file. This should be a private key in PEM format.
    #[clap(long)]
    key: PathBuf,
    /// Size of each connection's decrypt-side buffers.
    #[clap(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    inbound_buffer_size: usize,
    /// Size of each connection's encrypt-side buffer.
    #[clap(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    outbound_buffer_size: usize,
    /// How many released buffers to keep for reuse.
    #[clap(long, default_value = "256")]
    pooled_buffers: usize,
}

fn load_certs(filename: &Path) -> Vec<CertificateDer<'static>> {
    CertificateDer::pem_file_iter(filename)
        .expect("cannot open certificate file")
        .map(|result| result.unwrap())
        .collect()
}

fn load_private_key(filename: &Path) -> PrivateKeyDer<'static> {
    PrivateKeyDer::from_pem_file(filename).expect("cannot read private key file")
}

fn make_config(args: &Args) -> Arc<rustls::ServerConfig> {
    let certs = load_certs(&args.certs);
    let privkey = load_private_key(&args.key);

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .expect("inconsistent cipher-suites/versions specified")
    .with_no_client_auth()
    .with_single_cert(certs, privkey)
    .expect("bad certificates/private key");

    Arc::new(config)
}

fn make_connector(args: &Args) -> ConnectorConfig {
    ConnectorConfig::builder()
        .inbound_buffer_size(args.inbound_buffer_size)
        .outbound_buffer_size(args.outbound_buffer_size)
        .allocator(BufferPool::new(args.pooled_buffers))
        .build()
        .expect("invalid buffer configuration")
}

fn main() {
    let args = Args::parse();
    if args.verbose {
        env_logger::Builder::new()
            .parse_filters("trace")
            .init();
    } else {
        env_logger::init();
    }

    let mut addr: net::SocketAddr = "[::]:4443".parse().unwrap();
    addr.set_port(args.port);

    let config = make_config(&args);
    let connector = make_connector(&args);

    let mut listener = TcpListener::bind(addr).expect("cannot listen on port");
    println!("listening on {addr}");
    let mut poll = mio::Poll::new().unwrap();
    poll.registry()
        .register(&mut listener, LISTENER, mio::Interest::READABLE)
        .unwrap();

    let mut server = EchoServer::new(listener, config, connector);

    let mut events = mio::Events::with_capacity(256);
    loop {
        match poll.poll(&mut events, None) {
            Ok(_) => {}
            // Polling can be interrupted (e.g. by a debugger) - retry if so.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                panic!("poll failed: {:?}", e)
            }
        }

        for event in events.iter() {
            match event.token() {
                LISTENER => {
                    server
                        .accept(poll.registry())
                        .expect("error accepting socket");
                }
                _ => server.conn_event(poll.registry(), event),
            }
        }
    }
}

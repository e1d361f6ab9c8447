//! # nbtls - TLS over non-blocking channels
//!
//! nbtls terminates TLS on top of a raw, selectable byte channel without ever
//! blocking the calling thread.  It drives a TLS engine (anything implementing
//! [`TlsEngine`], with [`RustlsEngine`] provided for rustls) against a
//! transport that reports [`std::io::ErrorKind::WouldBlock`], and hands the
//! decrypted byte stream to the application.
//!
//! ## Design Overview
//! ### nbtls does not take care of readiness notification
//! It doesn't accept connections, and it doesn't poll sockets.  Whoever owns
//! the event loop asks a [`SecuredConnection`] which events it is interested
//! in (see [`SecuredConnection::interest`]), and calls back into it once the
//! raw channel is ready.
//!
//! ### nbtls does not implement TLS
//! Cryptography, record protection and certificate validation are the
//! engine's job.  nbtls only decides *when* to call the engine, with which
//! buffers, and what to do with its output.
//!
//! ```text
//!        Raw channel                                  Plaintext
//!        ===========                                  =========
//!                     +--------------------------+
//!    read_raw() ----->|  ReadableTlsChannel      |-----> read()
//!                     |     \        /           |
//!                     |      TlsEngine (shared)  |
//!                     |     /        \           |
//!   write_raw() <-----|  WritableTlsChannel      |<----- write()
//!                     +--------------------------+
//!                          SecuredConnection
//! ```
//!
//! Handshake messages are exchanged as a side effect of reads and writes:
//! a read may need to send handshake records, and a write may need to
//! receive some.  Either call returns a would-block status rather than
//! waiting.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # let server_config: Arc<rustls::ServerConfig> = panic!();
//! # let socket: std::net::TcpStream = panic!();
//! use nbtls::{ConnectorConfig, ReadStatus, RustlsEngine, SecuredConnection};
//!
//! socket.set_nonblocking(true).unwrap();
//! let peer = socket.peer_addr().ok();
//! let engine = RustlsEngine::server(server_config).unwrap();
//! let mut conn = SecuredConnection::open(socket, peer, engine, ConnectorConfig::default());
//!
//! let mut buf = [0u8; 4096];
//! match conn.read(&mut buf).unwrap() {
//!     ReadStatus::Data(n) => println!("got {:?}", &buf[..n]),
//!     ReadStatus::WouldBlock => { /* wait for conn.interest() */ }
//!     ReadStatus::Eof => conn.close().unwrap(),
//! }
//! ```
//!
//! # Crate features
//!
//! - `logging`: this makes the nbtls crate depend on the `log` crate.
//!   nbtls outputs channel-level events at `trace!` and `debug!` level,
//!   and fatal connection errors at `warn!` level.  This feature is in the
//!   default set, and also enables rustls' own logging.
//!
//! - `mio`: implements [`RawChannel`] for `mio::net::TcpStream`.

// Require docs for public APIs, deny unsafe code, etc.
#![forbid(unsafe_code, unused_must_use)]
#![deny(
    clippy::clone_on_ref_ptr,
    clippy::use_self,
    trivial_casts,
    trivial_numeric_casts,
    missing_docs,
    unreachable_pub,
    unused_import_braces,
    unused_extern_crates,
    unused_qualifications
)]
// Relax these clippy lints:
// - new_ret_no_self: session views are returned from methods named after
//   the channel they expose
// - new_without_default: for internal constructors, the indirection is not
//   helpful
// - single_component_path_imports: our top-level `use log` import causes
//   a false positive, https://github.com/rust-lang/rust-clippy/issues/5210
#![allow(
    clippy::new_ret_no_self,
    clippy::new_without_default,
    clippy::single_component_path_imports
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// log for logging (optional).
#[cfg(feature = "logging")]
use log;

#[cfg(not(feature = "logging"))]
mod log {
    macro_rules! trace    ( ($($tt:tt)*) => {{}} );
    macro_rules! debug    ( ($($tt:tt)*) => {{}} );
    macro_rules! warn     ( ($($tt:tt)*) => {{}} );
    pub(crate) use {debug, trace, warn};
}

mod buffer;
mod config;
mod conn;
mod engine;
mod error;
mod transport;

// The public interface is:
pub use crate::buffer::{BufferAllocator, BufferPool, HeapAllocator};
pub use crate::config::{
    ConnectorConfig, ConnectorConfigBuilder, DEFAULT_BUFFER_SIZE, MAX_RECORD_SIZE,
};
pub use crate::conn::secured::{SecuredConnection, TlsReader, TlsWriter};
pub use crate::conn::{Connection, ConnectionState, FlushStatus, ReadStatus, WriteStatus};
pub use crate::engine::rustls::RustlsEngine;
pub use crate::engine::{EngineResult, EngineState, HandshakeStep, Status, TlsEngine};
pub use crate::error::Error;
pub use crate::transport::{Interest, RawChannel};

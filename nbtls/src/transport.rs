use std::io;
use std::net;

/// The raw, selectable byte channel a [`SecuredConnection`] runs over.
///
/// Reads and writes must not block: when nothing can be transferred they
/// fail with [`io::ErrorKind::WouldBlock`].  A read returning `Ok(0)` means
/// the peer closed the channel.
///
/// [`SecuredConnection`]: crate::SecuredConnection
pub trait RawChannel: io::Read + io::Write {
    /// Close the channel in both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl RawChannel for net::TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        Self::shutdown(self, net::Shutdown::Both)
    }
}

#[cfg(feature = "mio")]
impl RawChannel for mio::net::TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        Self::shutdown(self, net::Shutdown::Both)
    }
}

impl<T: RawChannel + ?Sized> RawChannel for Box<T> {
    fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown()
    }
}

/// Which readiness events a connection wants to hear about next.
///
/// Register these with whatever notification mechanism drives the
/// connection, and call back into it when one of them fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    /// Call `read()` (or `flush()` during a handshake) when the raw channel
    /// becomes readable.
    pub readable: bool,
    /// Call `flush()` when the raw channel becomes writable.
    pub writable: bool,
}

impl Interest {
    /// No events: the connection is closed.
    pub const NONE: Self = Self {
        readable: false,
        writable: false,
    };

    /// Whether no events are wanted.
    pub fn is_none(&self) -> bool {
        !self.readable && !self.writable
    }
}

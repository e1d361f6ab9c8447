use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

/// nbtls reports connection failures using this type.
///
/// Would-block conditions and a clean close by the peer are not errors:
/// they are reported through [`ReadStatus`], [`WriteStatus`] and
/// [`FlushStatus`].
///
/// [`ReadStatus`]: crate::ReadStatus
/// [`WriteStatus`]: crate::WriteStatus
/// [`FlushStatus`]: crate::FlushStatus
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Error {
    /// A buffer needed to grow beyond the configured maximum record size,
    /// or overflowed again straight after growing.
    BufferOverflow {
        /// Capacity of the buffer when the overflow happened
        capacity: usize,
        /// The configured growth bound
        limit: usize,
    },

    /// The TLS engine rejected what the peer sent.  The parameter is the
    /// engine's description of the problem.  This is invariably fatal.
    ProtocolViolation(String),

    /// The raw channel failed.  This is invariably fatal.
    Transport(Arc<io::Error>),

    /// The connection was closed, locally or after an earlier fatal error.
    ConnectionClosed,

    /// A [`ConnectorConfig`](crate::ConnectorConfig) value was rejected.
    InvalidConfig(&'static str),
}

impl Error {
    /// Whether this error terminates the connection it was raised on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BufferOverflow { .. } | Self::ProtocolViolation(_) | Self::Transport(_)
        )
    }

    pub(crate) fn unexpected_eof() -> Self {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed connection without sending TLS close_notify",
        )
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BufferOverflow { capacity, limit } => write!(
                f,
                "record does not fit a {} byte buffer (growth limit {} bytes)",
                capacity, limit
            ),
            Self::ProtocolViolation(ref why) => write!(f, "tls protocol violation: {}", why),
            Self::Transport(ref err) => write!(f, "transport error: {}", err),
            Self::ConnectionClosed => write!(f, "connection is closed"),
            Self::InvalidConfig(why) => write!(f, "invalid connector configuration: {}", why),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Transport(inner) => inner.kind(),
            Error::ConnectionClosed => io::ErrorKind::NotConnected,
            Error::InvalidConfig(_) => io::ErrorKind::InvalidInput,
            Error::BufferOverflow { .. } | Error::ProtocolViolation(_) => {
                io::ErrorKind::InvalidData
            }
        };
        Self::new(kind, err)
    }
}

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The connection was closed by a local call to `close`.
    #[error("connection is closed")]
    ErrClosed,

    /// The operation needs a local address that has not been resolved yet.
    #[error("address not available")]
    ErrAddrNotAvailable,

    /// The operation needs a connected remote address.
    #[error("no remote address")]
    ErrNoRemoteAddr,

    /// Every port of the requested ephemeral range is taken.
    #[error("no free port in the configured range")]
    ErrPortSpaceExhausted,

    /// The resolver was shut down while requests were pending.
    #[error("resolution canceled")]
    ErrCancelled,

    /// The hostname did not resolve to any usable address.
    #[error("host not found")]
    ErrHostNotFound,

    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

use std::io;
use std::string::FromUtf8Error;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Input ends before the fixed 20-byte header or before the length
    /// promised by the header.
    #[error("message too short")]
    ErrTooShort,

    /// The magic-cookie field does not carry 0x2112A442.
    #[error("0x{0:x} is not the STUN magic cookie")]
    ErrBadMagic(u32),

    /// The header length field is not a multiple of the 4-byte attribute
    /// alignment.
    #[error("message length is not 4-byte aligned")]
    ErrOddAlignment,

    /// A request carried comprehension-required attributes this
    /// implementation does not know. The offending types belong into a
    /// 420 response.
    #[error("unknown comprehension-required attributes")]
    ErrUnknownComprehensionRequired(Vec<u16>),

    /// FINGERPRINT did not match the message bytes.
    #[error("fingerprint check failed")]
    ErrBadFingerprint,

    /// MESSAGE-INTEGRITY did not verify under the expected key.
    #[error("integrity check failed")]
    ErrBadIntegrity,

    #[error("attribute not found")]
    ErrAttributeNotFound,
    #[error("attribute size is invalid")]
    ErrAttributeSizeInvalid,
    #[error("attribute size overflow")]
    ErrAttributeSizeOverflow,
    #[error("bad UNKNOWN-ATTRIBUTES size")]
    ErrBadUnknownAttrsSize,
    #[error("invalid length of IP value")]
    ErrBadIpLength,
    #[error("bad address family value")]
    ErrBadAddressFamily,
    #[error("no default reason for ErrorCode")]
    ErrNoDefaultReason,
    #[error("FINGERPRINT before MESSAGE-INTEGRITY attribute")]
    ErrFingerprintBeforeIntegrity,

    #[error("transaction exists with same id")]
    ErrTransactionExists,
    #[error("transaction not exists")]
    ErrTransactionNotExists,
    #[error("transaction is stopped")]
    ErrTransactionStopped,
    #[error("transaction is timed out")]
    ErrTransactionTimeOut,
    #[error("transaction closed")]
    ErrTransactionClosed,

    #[error("utf8: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Util(#[from] util::Error),
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

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("all retransmissions failed")]
    ErrAllRetransmissionsFailed,
    #[error("only one Allocate() caller is allowed")]
    ErrOneAllocateOnly,
    #[error("already closed")]
    ErrAlreadyClosed,
    #[error("transaction closed")]
    ErrTransactionClosed,
    #[error("wait_for_result called on non-result transaction")]
    ErrWaitForResultOnNonResultTransaction,
    #[error("no binding found for channel")]
    ErrChannelBindNotFound,
    #[error("binding with same peer address already exists")]
    ErrBindingExists,
    #[error("channel number space exhausted")]
    ErrChannelNumbersExhausted,
    #[error("channel number out of the 0x4000..=0x7FFF range")]
    ErrChannelNumberOutOfRange,
    #[error("channel data shorter than its header")]
    ErrBadChannelDataLength,
    #[error("not a channel data packet")]
    ErrNotChannelData,
    #[error("STUN server address is not set")]
    ErrStunserverAddressNotSet,
    #[error("unexpected STUN request message")]
    ErrUnexpectedStunrequestMessage,
    #[error("non-STUN message from STUN server")]
    ErrNonStunmessage,
    #[error("allocation did not carry a NONCE")]
    ErrNonceExpected,
    #[error("allocation did not carry a REALM")]
    ErrRealmExpected,
    #[error("allocate response {0}")]
    ErrAllocateFailed(String),
    #[error("no allocation held")]
    ErrNoAllocation,
    #[error("try again with the refreshed nonce")]
    ErrTryAgain,

    #[error("{0}")]
    Stun(#[from] stun::Error),
    #[error("{0}")]
    Util(#[from] util::Error),
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

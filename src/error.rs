use std::num::ParseIntError;
use std::{io, net};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The operation needs a nominated pair that does not exist yet.
    #[error("no nominated candidate pair, not ready to send")]
    ErrNotReady,

    /// The stream id does not name a live stream.
    #[error("no such stream")]
    ErrStreamNotFound,

    /// The component id does not exist within the stream.
    #[error("no such component")]
    ErrComponentNotFound,

    /// The agent is closed.
    #[error("the agent is closed")]
    ErrClosed,

    /// Checks need remote credentials first.
    #[error("remote credentials are not set")]
    ErrRemoteCredentials,

    /// A stream needs at least one component.
    #[error("a stream needs 1 or more components")]
    ErrNoComponents,

    /// Local ufrag must carry at least 24 bits of entropy.
    #[error("local username fragment is less than 24 bits long")]
    ErrLocalUfragInsufficientBits,

    /// Local password must carry at least 128 bits of entropy.
    #[error("local password is less than 128 bits long")]
    ErrLocalPwdInsufficientBits,

    #[error("remote ufrag is empty")]
    ErrRemoteUfragEmpty,
    #[error("remote pwd is empty")]
    ErrRemotePwdEmpty,

    /// An ephemeral port could not be found inside the range.
    #[error("no free port in the configured range")]
    ErrPort,

    /// The port range is inverted.
    #[error("port range minimum exceeds maximum")]
    ErrInvertedPortRange,

    #[error("attempting to gather candidates during gathering state")]
    ErrMultipleGatherAttempted,

    #[error("username mismatch")]
    ErrMismatchUsername,

    #[error("attribute not long enough to be ICE candidate")]
    ErrAttributeTooShortIceCandidate,
    #[error("could not parse component")]
    ErrParseComponent,
    #[error("could not parse priority")]
    ErrParsePriority,
    #[error("could not parse port")]
    ErrParsePort,
    #[error("could not parse related addresses")]
    ErrParseRelatedAddr,
    #[error("could not parse type")]
    ErrParseType,
    #[error("unknown candidate type")]
    ErrUnknownCandidateType,
    #[error("unknown role")]
    ErrUnknownRole,

    #[error("invalid url")]
    ErrInvalidUrl,
    #[error("unknown scheme type")]
    ErrSchemeType,
    #[error("invalid hostname")]
    ErrHost,
    #[error("invalid port number")]
    ErrPortNumber,
    #[error("queries not supported in stun address")]
    ErrStunQuery,
    #[error("invalid query")]
    ErrInvalidQuery,
    #[error("invalid transport protocol type")]
    ErrProtoType,

    #[error("username is empty")]
    ErrUsernameEmpty,
    #[error("password is empty")]
    ErrPasswordEmpty,

    #[error("failed to parse address")]
    ErrAddressParseFailed,

    #[error("parse int: {0}")]
    ParseInt(#[from] ParseIntError),
    #[error("parse addr: {0}")]
    ParseIp(#[from] net::AddrParseError),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Util(#[from] util::Error),
    #[error("{0}")]
    Stun(#[from] stun::Error),
    #[error("{0}")]
    Turn(#[from] turn::Error),
    #[error("{0}")]
    ParseUrl(#[from] url::ParseError),
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

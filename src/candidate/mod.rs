#[cfg(test)]
mod candidate_pair_test;
#[cfg(test)]
mod candidate_test;

pub mod candidate_base;
pub mod candidate_host;
pub mod candidate_peer_reflexive;
pub mod candidate_relay;
pub mod candidate_server_reflexive;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::error::Result;
use crate::transport::TransportType;
use candidate_base::*;

pub(crate) const RECEIVE_MTU: usize = 8192;
pub(crate) const DEFAULT_LOCAL_PREFERENCE: u16 = 65535;

/// One potential transport address of this endpoint.
#[async_trait]
pub trait Candidate: fmt::Display {
    /// Opaque tag grouping candidates expected to share NAT behavior:
    /// equal for two candidates of the same type, base address,
    /// transport and STUN/TURN server.
    fn foundation(&self) -> String;

    /// Unique per candidate, unlike the foundation.
    fn id(&self) -> String;

    fn component(&self) -> u16;
    fn set_component(&self, component: u16);

    fn transport(&self) -> TransportType;

    /// The transport address checks and data are addressed to.
    fn addr(&self) -> SocketAddr;

    fn priority(&self) -> u32;

    /// Base (related) transport address: the host address a
    /// server-reflexive candidate was discovered from, or the local
    /// socket behind a relayed candidate.
    fn related_address(&self) -> Option<CandidateRelatedAddress>;

    fn candidate_type(&self) -> CandidateType;

    /// SDP candidate-attribute value for this candidate.
    fn marshal(&self) -> String;

    /// The last time traffic arrived via this candidate.
    fn last_received(&self) -> SystemTime;

    /// The last time traffic left via this candidate.
    fn last_sent(&self) -> SystemTime;

    fn seen(&self, outbound: bool);

    async fn write_to(&self, raw: &[u8], dst: &(dyn Candidate + Send + Sync)) -> Result<usize>;

    /// Equality for deduplication. IPv6 scope ids are deliberately
    /// ignored here, though they stay on the resolved address used for
    /// sending.
    fn equal(&self, other: &dyn Candidate) -> bool;

    async fn close(&self) -> Result<()>;

    fn get_conn(&self) -> Option<&Arc<dyn util::Conn + Send + Sync>>;
    fn get_closed_ch(&self) -> Arc<Mutex<Option<broadcast::Sender<()>>>>;
}

/// Candidate type, in decreasing order of directness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidateType {
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "relay")]
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
        };
        write!(f, "{s}")
    }
}

impl Default for CandidateType {
    fn default() -> Self {
        Self::Host
    }
}

impl CandidateType {
    /// RFC 5245 section 4.1.2.2 type preferences: 126 host, 110
    /// peer-reflexive, 100 server-reflexive, 0 relayed.
    #[must_use]
    pub const fn preference(self) -> u16 {
        match self {
            Self::Host => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Relay => 0,
        }
    }

    /// Parses the SDP `typ` token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "host" => Some(Self::Host),
            "srflx" => Some(Self::ServerReflexive),
            "prflx" => Some(Self::PeerReflexive),
            "relay" => Some(Self::Relay),
            _ => None,
        }
    }
}

/// Related transport address, for diagnostics and the SDP raddr/rport
/// fields.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct CandidateRelatedAddress {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for CandidateRelatedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " related {}:{}", self.address, self.port)
    }
}

/// Check-list state of one candidate pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidatePairState {
    /// Parked until another pair with the same foundation succeeds.
    #[serde(rename = "frozen")]
    Frozen = 0,

    /// Eligible for the next ordinary check.
    #[serde(rename = "waiting")]
    Waiting = 1,

    /// A check is in flight.
    #[serde(rename = "in-progress")]
    InProgress = 2,

    /// The check failed terminally (error response, timeout or ICMP).
    #[serde(rename = "failed")]
    Failed = 3,

    /// A check completed with a verified 200.
    #[serde(rename = "succeeded")]
    Succeeded = 4,
}

impl From<u8> for CandidatePairState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Waiting,
            2 => Self::InProgress,
            3 => Self::Failed,
            4 => Self::Succeeded,
            _ => Self::Frozen,
        }
    }
}

impl Default for CandidatePairState {
    fn default() -> Self {
        Self::Frozen
    }
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Frozen => "frozen",
            Self::Waiting => "waiting",
            Self::InProgress => "in-progress",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        };
        write!(f, "{s}")
    }
}

/// A (local, remote) candidate combination subject to connectivity
/// checks. Holds its candidates by Arc; when a candidate is removed
/// from its component the pair is failed, never dangling.
pub struct CandidatePair {
    pub local: Arc<dyn Candidate + Send + Sync>,
    pub remote: Arc<dyn Candidate + Send + Sync>,
    pub(crate) ice_role_controlling: AtomicBool,
    pub(crate) state: AtomicU8,
    pub(crate) nominated: AtomicBool,
    /// Controlled side: an inbound USE-CANDIDATE arrived before this
    /// pair succeeded; nominate as soon as it does.
    pub(crate) nominate_on_success: AtomicBool,
    /// Controlling side: a USE-CANDIDATE check for this pair is in
    /// flight.
    pub(crate) nomination_requested: AtomicBool,
    pub(crate) binding_request_count: AtomicU16,
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local, prio {}) {} <-> {} (remote, prio {})",
            self.priority(),
            self.local.priority(),
            self.local,
            self.remote,
            self.remote.priority()
        )
    }
}

impl fmt::Debug for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl PartialEq for CandidatePair {
    fn eq(&self, other: &Self) -> bool {
        self.local.equal(&*other.local) && self.remote.equal(&*other.remote)
    }
}

impl CandidatePair {
    #[must_use]
    pub fn new(
        local: Arc<dyn Candidate + Send + Sync>,
        remote: Arc<dyn Candidate + Send + Sync>,
        controlling: bool,
    ) -> Self {
        Self {
            local,
            remote,
            ice_role_controlling: AtomicBool::new(controlling),
            state: AtomicU8::new(CandidatePairState::Frozen as u8),
            nominated: AtomicBool::new(false),
            nominate_on_success: AtomicBool::new(false),
            nomination_requested: AtomicBool::new(false),
            binding_request_count: AtomicU16::new(0),
        }
    }

    pub fn component(&self) -> u16 {
        self.local.component()
    }

    /// RFC 5245 section 5.7.2: with G the controlling side's candidate
    /// priority and D the controlled side's,
    /// pair priority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D?1:0).
    pub fn priority(&self) -> u64 {
        let (g, d) = if self.ice_role_controlling.load(Ordering::SeqCst) {
            (self.local.priority(), self.remote.priority())
        } else {
            (self.remote.priority(), self.local.priority())
        };

        // (1<<32)-1 keeps the max-priority case inside u64.
        ((1 << 32_u64) - 1) * u64::from(std::cmp::min(g, d))
            + 2 * u64::from(std::cmp::max(g, d))
            + u64::from(g > d)
    }

    pub fn state(&self) -> CandidatePairState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub fn set_state(&self, state: CandidatePairState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_nominated(&self) -> bool {
        self.nominated.load(Ordering::SeqCst)
    }

    pub async fn write(&self, b: &[u8]) -> Result<usize> {
        self.local.write_to(b, &*self.remote).await
    }
}


use std::fmt;

/// Per-component connectivity state. The happy path only moves
/// forward; Failed is terminal and Disconnected is the reset state a
/// removed stream's components return to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ComponentState {
    /// No gathering or checks have happened yet (also: stream removed).
    #[serde(rename = "disconnected")]
    Disconnected = 0,

    /// Local candidates are being gathered.
    #[serde(rename = "gathering")]
    Gathering = 1,

    /// Candidates exist and connectivity checks are running.
    #[serde(rename = "connecting")]
    Connecting = 2,

    /// This component has a nominated pair.
    #[serde(rename = "connected")]
    Connected = 3,

    /// Every component of the stream has a nominated pair.
    #[serde(rename = "ready")]
    Ready = 4,

    /// The check list was exhausted without a working pair.
    #[serde(rename = "failed")]
    Failed = 5,
}

impl Default for ComponentState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl From<u8> for ComponentState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Gathering,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Ready,
            5 => Self::Failed,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Disconnected => "Disconnected",
            Self::Gathering => "Gathering",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

impl ComponentState {
    /// True for the transitions the state machine permits:
    /// monotonically forward, plus Ready -> Connected (aggressive
    /// supersede) and anything -> Disconnected (stream removal).
    pub fn can_transition_to(self, next: ComponentState) -> bool {
        if next == Self::Disconnected {
            return true;
        }
        match self {
            Self::Failed => false,
            Self::Ready => next == Self::Connected || next == Self::Failed,
            _ => (next as u8) > (self as u8),
        }
    }
}

/// Progress of local candidate gathering for one stream.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum GatheringState {
    /// Gathering has not been requested.
    New = 0,

    /// Gathering is ongoing.
    Gathering = 1,

    /// Every gathering transaction is finalized.
    Complete = 2,
}

impl Default for GatheringState {
    fn default() -> Self {
        Self::New
    }
}

impl From<u8> for GatheringState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Gathering,
            2 => Self::Complete,
            _ => Self::New,
        }
    }
}

impl fmt::Display for GatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::New => "new",
            Self::Gathering => "gathering",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

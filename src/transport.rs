
use std::fmt;

/// Candidate transport. TCP candidates carry the RFC 6544
/// directionality; checks only pair compatible directions
/// (active probes passive, simultaneous-open meets itself).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub enum TransportType {
    #[serde(rename = "udp")]
    Udp,
    #[serde(rename = "tcp-act")]
    TcpActive,
    #[serde(rename = "tcp-pass")]
    TcpPassive,
    #[serde(rename = "tcp-so")]
    TcpSo,
}

impl Default for TransportType {
    fn default() -> Self {
        Self::Udp
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Udp => "udp",
            Self::TcpActive => "tcp-act",
            Self::TcpPassive => "tcp-pass",
            Self::TcpSo => "tcp-so",
        };
        write!(f, "{s}")
    }
}

impl TransportType {
    pub fn is_tcp(&self) -> bool {
        !matches!(self, Self::Udp)
    }

    /// The SDP network protocol token ("udp" / "tcp").
    pub fn network_short(&self) -> &'static str {
        if self.is_tcp() {
            "tcp"
        } else {
            "udp"
        }
    }

    /// The SDP `tcptype` token, empty for UDP.
    pub fn tcp_type_token(&self) -> &'static str {
        match *self {
            Self::Udp => "",
            Self::TcpActive => "active",
            Self::TcpPassive => "passive",
            Self::TcpSo => "so",
        }
    }

    pub fn from_tcp_type_token(token: &str) -> Option<Self> {
        match token {
            "active" => Some(Self::TcpActive),
            "passive" => Some(Self::TcpPassive),
            "so" => Some(Self::TcpSo),
            _ => None,
        }
    }

    /// Whether a local candidate of this transport can be checked
    /// against a remote of transport `remote`.
    pub fn pairable_with(&self, remote: TransportType) -> bool {
        match (self, remote) {
            (Self::Udp, Self::Udp) => true,
            (Self::TcpActive, Self::TcpPassive) => true,
            (Self::TcpPassive, Self::TcpActive) => true,
            (Self::TcpSo, Self::TcpSo) => true,
            _ => false,
        }
    }
}

use std::fmt;

/// Peer dialect. RFC 5245 is the default; the others reproduce the
/// framing and nomination quirks of older or proprietary stacks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Compatibility {
    /// Full RFC 5245 / 8445 behavior.
    #[serde(rename = "rfc5245")]
    Rfc5245,
    /// draft-ietf-mmusic-ice-19.
    #[serde(rename = "draft19")]
    Draft19,
    /// libjingle dialect: no FINGERPRINT on checks, credentials may
    /// trail the candidates.
    #[serde(rename = "google")]
    Google,
    /// MSN/OC2007 dialect: no FINGERPRINT on checks.
    #[serde(rename = "msn")]
    Msn,
}

impl Default for Compatibility {
    fn default() -> Self {
        Self::Rfc5245
    }
}

impl fmt::Display for Compatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Rfc5245 => "rfc5245",
            Self::Draft19 => "draft19",
            Self::Google => "google",
            Self::Msn => "msn",
        };
        write!(f, "{s}")
    }
}

impl Compatibility {
    /// Whether connectivity checks carry FINGERPRINT.
    pub fn uses_fingerprint(&self) -> bool {
        matches!(self, Self::Rfc5245 | Self::Draft19)
    }
}

/// How the controlling side picks the pair to use.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum NominationMode {
    /// Nominate with a dedicated USE-CANDIDATE check once a pair has
    /// succeeded.
    #[serde(rename = "regular")]
    Regular,
    /// Every check carries USE-CANDIDATE; first success wins and a
    /// better pair may supersede it later.
    #[serde(rename = "aggressive")]
    Aggressive,
}

impl Default for NominationMode {
    fn default() -> Self {
        Self::Regular
    }
}

impl fmt::Display for NominationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Regular => "regular",
            Self::Aggressive => "aggressive",
        };
        write!(f, "{s}")
    }
}

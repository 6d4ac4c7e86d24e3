
use std::borrow::Cow;
use std::fmt;

use crate::error::*;

/// URI scheme for a STUN/TURN server.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum SchemeType {
    Stun,
    Stuns,
    Turn,
    Turns,
    Unknown,
}

impl Default for SchemeType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl From<&str> for SchemeType {
    fn from(raw: &str) -> Self {
        match raw {
            "stun" => Self::Stun,
            "stuns" => Self::Stuns,
            "turn" => Self::Turn,
            "turns" => Self::Turns,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Stun => "stun",
            Self::Stuns => "stuns",
            Self::Turn => "turn",
            Self::Turns => "turns",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Transport carried in the `?transport=` query of TURN URIs.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum ProtoType {
    Udp,
    Tcp,
    Unknown,
}

impl Default for ProtoType {
    fn default() -> Self {
        Self::Udp
    }
}

impl From<&str> for ProtoType {
    fn from(raw: &str) -> Self {
        match raw {
            "udp" => Self::Udp,
            "tcp" => Self::Tcp,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ProtoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// One STUN or TURN server endpoint, RFC 7064 / RFC 7065.
#[derive(Default, Debug, Clone)]
pub struct Url {
    pub scheme: SchemeType,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub proto: ProtoType,
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains("::") {
            Cow::Owned(format!("[{}]", self.host))
        } else {
            Cow::Borrowed(self.host.as_str())
        };
        if self.scheme == SchemeType::Turn || self.scheme == SchemeType::Turns {
            write!(
                f,
                "{}:{}:{}?transport={}",
                self.scheme, host, self.port, self.proto
            )
        } else {
            write!(f, "{}:{}:{}", self.scheme, host, self.port)
        }
    }
}

impl Url {
    /// Parses a STUN/TURN URI such as `stun:stun.example.net:3478` or
    /// `turn:turn.example.org?transport=udp`.
    pub fn parse_url(raw: &str) -> Result<Url> {
        // url::Url requires a hierarchical base for opaque schemes.
        let s = raw.to_string();
        let parsed = url::Url::parse(&format!("fake://{}", s.split_once(':').map(|(_, rest)| rest).unwrap_or(&s)))?;

        let scheme = SchemeType::from(s.split_once(':').map(|(scheme, _)| scheme).unwrap_or(""));
        if scheme == SchemeType::Unknown {
            return Err(Error::ErrSchemeType);
        }

        let host = parsed
            .host_str()
            .ok_or(Error::ErrHost)?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();

        let is_secure = scheme == SchemeType::Stuns || scheme == SchemeType::Turns;
        let port = parsed
            .port()
            .unwrap_or(if is_secure { 5349 } else { 3478 });

        let mut proto = if is_secure {
            ProtoType::Tcp
        } else {
            ProtoType::Udp
        };

        if let Some(query) = parsed.query() {
            if scheme == SchemeType::Stun || scheme == SchemeType::Stuns {
                return Err(Error::ErrStunQuery);
            }
            let mut found = false;
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                if key == "transport" {
                    proto = ProtoType::from(value.as_ref());
                    if proto == ProtoType::Unknown {
                        return Err(Error::ErrProtoType);
                    }
                    found = true;
                }
            }
            if !found {
                return Err(Error::ErrInvalidQuery);
            }
        }

        Ok(Url {
            scheme,
            host,
            port,
            username: String::new(),
            password: String::new(),
            proto,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == SchemeType::Stuns || self.scheme == SchemeType::Turns
    }
}

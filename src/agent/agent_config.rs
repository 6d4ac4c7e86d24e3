use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use stun::transaction::{DEFAULT_RC, DEFAULT_RM, DEFAULT_RTO, RtxConfig};
use util::net::Net;
use util::resolver::Resolver;

use crate::compat::{Compatibility, NominationMode};
use crate::error::*;
use crate::url::{SchemeType, Url};

/// How often the ordinary check pacer wakes up (Ta).
pub(crate) const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// Consent keepalive cadence on the selected pair.
pub(crate) const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Environment variables naming the default STUN server.
pub const ENV_STUN_SERVER: &str = "STUN_SERVER";
pub const ENV_STUN_SERVER_PORT: &str = "STUN_SERVER_PORT";

/// Optional TCP proxy in front of the TURN server.
#[derive(Default, Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Collects the options of one [`super::Agent`].
#[derive(Default)]
pub struct AgentConfig {
    /// Peer dialect quirks.
    pub compatibility: Compatibility,

    /// Initial role. May flip once on a role conflict.
    pub controlling: bool,

    /// Regular or aggressive nomination.
    pub nomination_mode: NominationMode,

    /// STUN server for server-reflexive gathering. When unset, the
    /// `STUN_SERVER` / `STUN_SERVER_PORT` environment is consulted.
    pub stun_server: Option<Url>,

    /// TURN servers (with long-term credentials) for relayed
    /// candidates.
    pub turn_servers: Vec<Url>,

    /// Local interface addresses to gather host candidates on,
    /// supplied by the embedder's interface enumeration.
    pub local_addrs: Vec<IpAddr>,

    /// Socket factory; a virtual net makes the agent fully in-memory.
    pub net: Option<Net>,

    /// Shared hostname resolver.
    pub resolver: Option<Arc<Resolver>>,

    /// Local credentials; generated when empty.
    pub local_ufrag: String,
    pub local_pwd: String,

    pub check_interval: Option<Duration>,
    pub keepalive_interval: Option<Duration>,

    /// Initial retransmission timeout (RTO), default 500 ms.
    pub initial_rto: Option<Duration>,
    /// Retransmission count (Rc), default 7 sends.
    pub max_binding_requests: Option<u16>,

    /// Treat every stream as reliable: single-try transactions.
    pub reliable: bool,

    /// Keepalive with Binding requests (consent freshness) instead of
    /// indications.
    pub keepalive_conncheck: bool,

    /// Generate ICE-TCP candidates.
    pub ice_tcp: bool,

    /// Ask the port-mapping collaborator for UPnP mappings while
    /// gathering.
    pub upnp: bool,

    /// TCP proxy used to reach the TURN server.
    pub proxy: Option<ProxyConfig>,

    /// Default ephemeral port range for host binds, overridable per
    /// component.
    pub port_range: Option<(u16, u16)>,
}

impl AgentConfig {
    /// The retransmission knobs every transaction in this agent uses.
    pub(crate) fn rtx_config(&self) -> RtxConfig {
        RtxConfig {
            rto: self.initial_rto.unwrap_or(DEFAULT_RTO),
            rc: self.max_binding_requests.unwrap_or(DEFAULT_RC),
            rm: DEFAULT_RM,
            reliable: self.reliable,
        }
    }

    /// The configured STUN server, falling back to the environment.
    pub(crate) fn stun_server_or_env(&self) -> Result<Option<Url>> {
        if self.stun_server.is_some() {
            return Ok(self.stun_server.clone());
        }

        let host = match std::env::var(ENV_STUN_SERVER) {
            Ok(host) if !host.is_empty() => host,
            _ => return Ok(None),
        };
        let port = match std::env::var(ENV_STUN_SERVER_PORT) {
            Ok(port) if !port.is_empty() => port.parse::<u16>().map_err(|_| Error::ErrPortNumber)?,
            _ => 3478,
        };

        Ok(Some(Url {
            scheme: SchemeType::Stun,
            host,
            port,
            username: String::new(),
            password: String::new(),
            proto: crate::url::ProtoType::Udp,
        }))
    }
}

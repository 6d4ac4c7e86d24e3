use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use stun::message::*;
use stun::transaction::stun_request;
use util::net::Net;
use waitgroup::WaitGroup;

use super::agent_internal::*;
use crate::candidate::candidate_base::CandidateBaseConfig;
use crate::candidate::candidate_host::CandidateHostConfig;
use crate::candidate::candidate_relay::CandidateRelayConfig;
use crate::candidate::candidate_server_reflexive::CandidateServerReflexiveConfig;
use crate::candidate::*;
use crate::error::*;
use crate::state::{ComponentState, GatheringState};
use crate::stream::{Component, Stream};
use crate::transport::TransportType;
use crate::url::{SchemeType, Url};

impl AgentInternal {
    /// Gathers host, server-reflexive and relayed candidates for every
    /// component of the stream, then reports gathering-done once every
    /// outstanding exchange is finalized.
    pub(crate) async fn gather_candidates_internal(self: &Arc<Self>, stream: &Arc<Stream>) {
        for component in stream.components() {
            self.update_component_state(&component, ComponentState::Gathering)
                .await;
        }

        if self.ice_tcp {
            log::debug!(
                "[{}]: ice-tcp candidates requested; tcp transports are paired but not generated by this build",
                self.get_name()
            );
        }
        if self.upnp {
            log::debug!(
                "[{}]: upnp requested but no port-mapping collaborator is attached, skipping",
                self.get_name()
            );
        }

        let wg = WaitGroup::new();

        for component in stream.components() {
            for local_addr in self.local_addrs.clone() {
                let ai = Arc::clone(self);
                let stream2 = Arc::clone(stream);
                let component2 = Arc::clone(&component);
                let w = wg.worker();
                tokio::spawn(async move {
                    let _d = w;
                    ai.gather_host_and_srflx(&stream2, &component2, local_addr)
                        .await;
                });
            }

            for url in self.turn_servers.clone() {
                let ai = Arc::clone(self);
                let stream2 = Arc::clone(stream);
                let component2 = Arc::clone(&component);
                let w = wg.worker();
                tokio::spawn(async move {
                    let _d = w;
                    ai.gather_relay(&stream2, &component2, url).await;
                });
            }
        }

        // Every gathering transaction has finalized once the workers
        // are gone.
        wg.wait().await;

        for component in stream.components() {
            if component.local_candidates.lock().await.is_empty() {
                self.update_component_state(&component, ComponentState::Failed)
                    .await;
            } else {
                self.update_component_state(&component, ComponentState::Connecting)
                    .await;
            }
        }

        stream.set_gathering_state(GatheringState::Complete);
        self.emit_event(crate::events::AgentEvent::CandidateGatheringDone { stream_id: stream.id })
            .await;

        self.evaluate_failure(stream).await;
    }

    /// One host candidate per local address, with a server-reflexive
    /// sibling when the STUN server reports a different mapping. The
    /// STUN exchange runs before the candidate's recv loop takes the
    /// socket over.
    async fn gather_host_and_srflx(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        local_addr: IpAddr,
    ) {
        let (port_min, port_max) = component
            .port_range()
            .or(self.default_port_range)
            .unwrap_or((0, 0));

        let conn = match listen_udp_in_port_range(
            &self.net,
            port_max,
            port_min,
            SocketAddr::new(local_addr, 0),
        )
        .await
        {
            Ok(conn) => conn,
            Err(err) => {
                log::warn!(
                    "[{}]: could not listen on {}: {}",
                    self.get_name(),
                    local_addr,
                    err
                );
                return;
            }
        };

        let bound_addr = match conn.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                log::warn!("[{}]: could not get local addr: {}", self.get_name(), err);
                return;
            }
        };

        // Reflexive discovery first: the gatherer still owns the
        // socket exclusively here.
        let mapped_addr = if let Some(url) = &self.stun_server {
            match self.query_stun_server(&conn, url, bound_addr.is_ipv4()).await {
                Ok(addr) => Some(addr),
                Err(err) => {
                    log::warn!(
                        "[{}]: could not get server reflexive address from {}: {}",
                        self.get_name(),
                        url,
                        err
                    );
                    None
                }
            }
        } else {
            None
        };

        let host_config = CandidateHostConfig {
            base_config: CandidateBaseConfig {
                transport: TransportType::Udp,
                address: bound_addr,
                component: component.id,
                conn: Some(Arc::clone(&conn)),
                ..CandidateBaseConfig::default()
            },
        };
        let host: Arc<dyn Candidate + Send + Sync> = match host_config.new_candidate_host() {
            Ok(host) => Arc::new(host),
            Err(err) => {
                log::warn!(
                    "[{}]: failed to create host candidate {}: {}",
                    self.get_name(),
                    bound_addr,
                    err
                );
                return;
            }
        };
        self.add_local_candidate(stream, component, &host).await;

        if let Some(mapped_addr) = mapped_addr {
            if mapped_addr != bound_addr {
                let srflx_config = CandidateServerReflexiveConfig {
                    base_config: CandidateBaseConfig {
                        transport: TransportType::Udp,
                        address: mapped_addr,
                        component: component.id,
                        server: self
                            .stun_server
                            .as_ref()
                            .map(Url::to_string)
                            .unwrap_or_default(),
                        ..CandidateBaseConfig::default()
                    },
                    rel_addr: bound_addr.ip().to_string(),
                    rel_port: bound_addr.port(),
                };
                match srflx_config.new_candidate_server_reflexive() {
                    Ok(srflx) => {
                        let srflx: Arc<dyn Candidate + Send + Sync> = Arc::new(srflx);
                        self.add_local_candidate(stream, component, &srflx).await;
                    }
                    Err(err) => {
                        log::warn!(
                            "[{}]: failed to create server reflexive candidate {}: {}",
                            self.get_name(),
                            mapped_addr,
                            err
                        );
                    }
                }
            }
        }
    }

    /// One Binding exchange against the STUN server, on the socket the
    /// host candidate will own, with the agent's retransmission
    /// schedule.
    async fn query_stun_server(
        &self,
        conn: &Arc<dyn util::Conn + Send + Sync>,
        url: &Url,
        want_ipv4: bool,
    ) -> Result<SocketAddr> {
        let server_addr = self.resolve_server(url, want_ipv4).await?;

        let mut request = Message::new();
        request.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;

        // The transaction's own schedule is the deadline here; a
        // silent server finalizes this exchange by timeout.
        let response = stun_request(conn, &request, server_addr, self.rtx).await?;

        let mut mapped = stun::xoraddr::XorMappedAddress::default();
        mapped.get_from(&response)?;
        Ok(SocketAddr::new(mapped.ip, mapped.port))
    }

    async fn resolve_server(&self, url: &Url, want_ipv4: bool) -> Result<SocketAddr> {
        // Literal addresses skip the resolver.
        if let Ok(ip) = url.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, url.port));
        }

        let addrs = self
            .resolver
            .resolve(&format!("{}:{}", url.host, url.port))
            .await?;
        addrs
            .iter()
            .find(|a| a.is_ipv4() == want_ipv4)
            .or_else(|| addrs.first())
            .copied()
            .ok_or(Error::ErrAddressParseFailed)
    }

    /// Allocates a relayed candidate from one TURN server.
    async fn gather_relay(self: &Arc<Self>, stream: &Arc<Stream>, component: &Arc<Component>, url: Url) {
        if url.scheme != SchemeType::Turn && url.scheme != SchemeType::Turns {
            return;
        }
        if url.username.is_empty() {
            log::error!(
                "[{}]: failed to gather relay candidates: {:?}",
                self.get_name(),
                Error::ErrUsernameEmpty
            );
            return;
        }
        if url.password.is_empty() {
            log::error!(
                "[{}]: failed to gather relay candidates: {:?}",
                self.get_name(),
                Error::ErrPasswordEmpty
            );
            return;
        }
        if self.proxy.is_some() {
            log::debug!(
                "[{}]: turn proxy configured but no tcp dialer is attached, connecting directly",
                self.get_name()
            );
        }

        let server_addr = match self.resolve_server(&url, true).await {
            Ok(addr) => addr,
            Err(err) => {
                log::warn!(
                    "[{}]: failed to resolve turn server {}: {}",
                    self.get_name(),
                    url,
                    err
                );
                return;
            }
        };

        let loc_conn = match self.net.bind(SocketAddr::new(
            if server_addr.is_ipv4() {
                IpAddr::from([0, 0, 0, 0])
            } else {
                IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 0])
            },
            0,
        ))
        .await
        {
            Ok(conn) => conn,
            Err(err) => {
                log::warn!("[{}]: failed to listen: {}", self.get_name(), err);
                return;
            }
        };

        let rel_addr = match loc_conn.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                log::warn!("[{}]: could not get local addr: {}", self.get_name(), err);
                return;
            }
        };

        let client = turn::client::Client::new(turn::client::ClientConfig {
            turn_serv_addr: server_addr,
            username: url.username.clone(),
            password: url.password.clone(),
            realm: String::new(),
            software: String::new(),
            rtx: self.rtx,
            conn: loc_conn,
        });

        if let Err(err) = client.listen().await {
            let _ = client.close().await;
            log::warn!(
                "[{}]: failed to listen on turn client {}: {}",
                self.get_name(),
                server_addr,
                err
            );
            return;
        }

        let relay_conn: Arc<dyn util::Conn + Send + Sync> = match client.allocate().await {
            Ok(conn) => Arc::new(conn),
            Err(err) => {
                let _ = client.close().await;
                log::warn!(
                    "[{}]: failed to allocate on turn client {}: {}",
                    self.get_name(),
                    server_addr,
                    err
                );
                return;
            }
        };

        let relayed_addr = match relay_conn.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                let _ = client.close().await;
                log::warn!("[{}]: no relayed address: {}", self.get_name(), err);
                return;
            }
        };

        let relay_config = CandidateRelayConfig {
            base_config: CandidateBaseConfig {
                transport: TransportType::Udp,
                address: relayed_addr,
                component: component.id,
                server: url.to_string(),
                conn: Some(Arc::clone(&relay_conn)),
                ..CandidateBaseConfig::default()
            },
            rel_addr: rel_addr.ip().to_string(),
            rel_port: rel_addr.port(),
            relay_client: Some(Arc::new(client)),
        };

        match relay_config.new_candidate_relay() {
            Ok(relay) => {
                let relay: Arc<dyn Candidate + Send + Sync> = Arc::new(relay);
                self.add_local_candidate(stream, component, &relay).await;
            }
            Err(err) => {
                let _ = relay_conn.close().await;
                log::warn!(
                    "[{}]: failed to create relay candidate: {}",
                    self.get_name(),
                    err
                );
            }
        }
    }
}

/// Binds a UDP socket inside `[port_min, port_max]`, starting from a
/// random port so parallel agents spread out. Zero bounds mean the
/// whole ephemeral space.
pub(crate) async fn listen_udp_in_port_range(
    net: &Net,
    port_max: u16,
    port_min: u16,
    laddr: SocketAddr,
) -> Result<Arc<dyn util::Conn + Send + Sync>> {
    if laddr.port() != 0 || (port_min == 0 && port_max == 0) {
        return Ok(net.bind(laddr).await?);
    }
    let i = if port_min == 0 { 1 } else { port_min };
    let j = if port_max == 0 { 0xFFFF } else { port_max };
    if i > j {
        return Err(Error::ErrPort);
    }

    let port_start = rand::random::<u16>() % (j - i + 1) + i;
    let mut port_current = port_start;
    loop {
        let laddr = SocketAddr::new(laddr.ip(), port_current);
        match net.bind(laddr).await {
            Ok(c) => return Ok(c),
            Err(err) => log::debug!("failed to listen {}: {}", laddr, err),
        }

        port_current += 1;
        if port_current > j {
            port_current = i;
        }
        if port_current == port_start {
            break;
        }
    }

    Err(Error::ErrPort)
}

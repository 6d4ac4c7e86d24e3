
use std::net::{IpAddr, SocketAddr};

use crate::candidate::candidate_base::{CandidateBase, CandidateBaseConfig};
use crate::candidate::candidate_host::CandidateHostConfig;
use crate::candidate::candidate_peer_reflexive::CandidatePeerReflexiveConfig;
use crate::candidate::candidate_relay::CandidateRelayConfig;
use crate::candidate::candidate_server_reflexive::CandidateServerReflexiveConfig;
use crate::candidate::*;
use crate::error::*;
use crate::transport::TransportType;

/// Parses one SDP candidate-attribute value of the form
/// `<foundation> <component> <transport> <priority> <ip> <port> typ <type>
/// [tcptype <t>] [raddr <ip> rport <port>] ...`,
/// with or without the leading `candidate:` tag.
pub fn unmarshal_candidate(raw: &str) -> Result<CandidateBase> {
    let raw = raw.trim().trim_start_matches("candidate:");
    let split: Vec<&str> = raw.split_whitespace().collect();
    if split.len() < 8 {
        return Err(Error::ErrAttributeTooShortIceCandidate);
    }

    // Foundation
    let foundation = split[0].to_owned();

    // Component
    let component: u16 = split[1].parse().map_err(|_| Error::ErrParseComponent)?;

    // Network protocol, refined by tcptype below.
    let protocol = split[2].to_lowercase();

    // Priority
    let priority: u32 = split[3].parse().map_err(|_| Error::ErrParsePriority)?;

    // Address
    let ip: IpAddr = split[4].parse().map_err(|_| Error::ErrAddressParseFailed)?;
    let port: u16 = split[5].parse().map_err(|_| Error::ErrParsePort)?;
    let address = SocketAddr::new(ip, port);

    if split[6] != "typ" {
        return Err(Error::ErrParseType);
    }
    let typ = CandidateType::from_token(split[7]).ok_or(Error::ErrUnknownCandidateType)?;

    let mut rel_addr = String::new();
    let mut rel_port = 0u16;
    let mut tcp_type_token = "";

    // Optional key/value extensions after the type.
    let mut rest = &split[8..];
    while rest.len() >= 2 {
        match rest[0] {
            "raddr" => rel_addr = rest[1].to_owned(),
            "rport" => rel_port = rest[1].parse().map_err(|_| Error::ErrParseRelatedAddr)?,
            "tcptype" => tcp_type_token = rest[1],
            _ => {}
        }
        rest = &rest[2..];
    }

    let transport = match protocol.as_str() {
        "udp" => TransportType::Udp,
        "tcp" => {
            TransportType::from_tcp_type_token(tcp_type_token).ok_or(Error::ErrProtoType)?
        }
        _ => return Err(Error::ErrProtoType),
    };

    let base_config = CandidateBaseConfig {
        foundation,
        component,
        transport,
        priority,
        address,
        ..CandidateBaseConfig::default()
    };

    match typ {
        CandidateType::Host => CandidateHostConfig { base_config }.new_candidate_host(),
        CandidateType::ServerReflexive => CandidateServerReflexiveConfig {
            base_config,
            rel_addr,
            rel_port,
        }
        .new_candidate_server_reflexive(),
        CandidateType::PeerReflexive => CandidatePeerReflexiveConfig {
            base_config,
            rel_addr,
            rel_port,
        }
        .new_candidate_peer_reflexive(),
        CandidateType::Relay => CandidateRelayConfig {
            base_config,
            rel_addr,
            rel_port,
            relay_client: None,
        }
        .new_candidate_relay(),
    }
}

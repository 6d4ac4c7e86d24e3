use super::candidate_host::CandidateHostConfig;
use super::candidate_relay::CandidateRelayConfig;
use super::candidate_server_reflexive::CandidateServerReflexiveConfig;
use super::*;
use crate::error::Result;

pub(crate) fn host_candidate(addr: &str, component: u16) -> Result<CandidateBase> {
    CandidateHostConfig {
        base_config: CandidateBaseConfig {
            transport: TransportType::Udp,
            address: addr.parse().unwrap(),
            component,
            ..CandidateBaseConfig::default()
        },
    }
    .new_candidate_host()
}

#[test]
fn test_host_priority() -> Result<()> {
    let c = host_candidate("192.168.1.10:19216", 1)?;
    // (126<<24) | (65535<<8) | (256-1)
    assert_eq!(c.priority(), 2130706431);

    let c2 = host_candidate("192.168.1.10:19217", 2)?;
    assert_eq!(c2.priority(), 2130706430);
    Ok(())
}

#[test]
fn test_type_preferences() -> Result<()> {
    assert_eq!(CandidateType::Host.preference(), 126);
    assert_eq!(CandidateType::PeerReflexive.preference(), 110);
    assert_eq!(CandidateType::ServerReflexive.preference(), 100);
    assert_eq!(CandidateType::Relay.preference(), 0);

    let srflx = CandidateServerReflexiveConfig {
        base_config: CandidateBaseConfig {
            address: "203.0.113.7:40000".parse().unwrap(),
            component: 1,
            ..CandidateBaseConfig::default()
        },
        rel_addr: "192.168.1.10".to_owned(),
        rel_port: 19216,
    }
    .new_candidate_server_reflexive()?;
    assert_eq!(srflx.priority() >> 24, 100);

    let relay = CandidateRelayConfig {
        base_config: CandidateBaseConfig {
            address: "50.0.0.1:5000".parse().unwrap(),
            component: 1,
            ..CandidateBaseConfig::default()
        },
        rel_addr: "192.168.1.10".to_owned(),
        rel_port: 19216,
        relay_client: None,
    }
    .new_candidate_relay()?;
    assert_eq!(relay.priority() >> 24, 0);
    Ok(())
}

#[test]
fn test_foundation_groups_equal_candidates() -> Result<()> {
    // Same type, base address and transport: same foundation.
    let a = host_candidate("192.168.1.10:1000", 1)?;
    let b = host_candidate("192.168.1.10:2000", 1)?;
    assert_eq!(a.foundation(), b.foundation());

    // Different address: different foundation.
    let c = host_candidate("192.168.1.11:1000", 1)?;
    assert_ne!(a.foundation(), c.foundation());

    // Different type on the same address: different foundation.
    let srflx = CandidateServerReflexiveConfig {
        base_config: CandidateBaseConfig {
            address: "192.168.1.10:1000".parse().unwrap(),
            component: 1,
            server: "stun.example.net:3478".to_owned(),
            ..CandidateBaseConfig::default()
        },
        rel_addr: "192.168.1.10".to_owned(),
        rel_port: 1000,
    }
    .new_candidate_server_reflexive()?;
    assert_ne!(a.foundation(), srflx.foundation());
    Ok(())
}

#[test]
fn test_candidate_equality_ignores_id() -> Result<()> {
    let a = host_candidate("192.168.1.10:1000", 1)?;
    let b = host_candidate("192.168.1.10:1000", 1)?;
    assert_ne!(a.id(), b.id());
    assert!(a.equal(&b));

    let c = host_candidate("192.168.1.10:1001", 1)?;
    assert!(!a.equal(&c));
    Ok(())
}

#[test]
fn test_candidate_ids_are_unique() -> Result<()> {
    let a = host_candidate("192.168.1.10:1000", 1)?;
    assert!(a.id().starts_with("candidate:"));
    Ok(())
}

#[test]
fn test_candidate_type_serialization() {
    assert_eq!(
        serde_json::to_string(&CandidateType::ServerReflexive).unwrap(),
        "\"srflx\""
    );
    assert_eq!(
        serde_json::to_string(&CandidatePairState::InProgress).unwrap(),
        "\"in-progress\""
    );
}

#[test]
fn test_candidate_display() -> Result<()> {
    let c = host_candidate("192.168.1.10:1000", 1)?;
    assert_eq!(c.to_string(), "udp host 192.168.1.10:1000");

    let srflx = CandidateServerReflexiveConfig {
        base_config: CandidateBaseConfig {
            address: "203.0.113.7:40000".parse().unwrap(),
            component: 1,
            ..CandidateBaseConfig::default()
        },
        rel_addr: "192.168.1.10".to_owned(),
        rel_port: 19216,
    }
    .new_candidate_server_reflexive()?;
    assert_eq!(
        srflx.to_string(),
        "udp srflx 203.0.113.7:40000 related 192.168.1.10:19216"
    );
    Ok(())
}

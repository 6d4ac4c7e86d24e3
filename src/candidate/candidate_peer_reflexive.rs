use std::sync::atomic::AtomicU16;

use super::candidate_base::*;
use super::*;
use crate::error::*;

/// Builds a peer-reflexive candidate: an address learned from a
/// connectivity check rather than from a server.
#[derive(Default)]
pub struct CandidatePeerReflexiveConfig {
    pub base_config: CandidateBaseConfig,
    pub rel_addr: String,
    pub rel_port: u16,
}

impl CandidatePeerReflexiveConfig {
    pub fn new_candidate_peer_reflexive(self) -> Result<CandidateBase> {
        let config = self.base_config;

        let related_address = if self.rel_addr.is_empty() {
            None
        } else {
            Some(CandidateRelatedAddress {
                address: self.rel_addr,
                port: self.rel_port,
            })
        };

        Ok(CandidateBase {
            id: ensure_candidate_id(config.candidate_id),
            candidate_type: CandidateType::PeerReflexive,
            transport: config.transport,
            component: AtomicU16::new(config.component),
            address: config.address,
            related_address,
            server: String::new(),
            conn: config.conn,
            foundation_override: config.foundation,
            priority_override: config.priority,
            ..CandidateBase::default()
        })
    }
}

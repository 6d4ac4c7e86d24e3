use std::sync::atomic::AtomicU16;

use super::candidate_base::*;
use super::*;
use crate::error::*;

/// Builds a server-reflexive candidate: the address a STUN server saw
/// a host candidate's socket under. Checks run from the base, so the
/// candidate itself holds no socket.
#[derive(Default)]
pub struct CandidateServerReflexiveConfig {
    pub base_config: CandidateBaseConfig,
    pub rel_addr: String,
    pub rel_port: u16,
}

impl CandidateServerReflexiveConfig {
    pub fn new_candidate_server_reflexive(self) -> Result<CandidateBase> {
        let config = self.base_config;

        Ok(CandidateBase {
            id: ensure_candidate_id(config.candidate_id),
            candidate_type: CandidateType::ServerReflexive,
            transport: config.transport,
            component: AtomicU16::new(config.component),
            address: config.address,
            related_address: Some(CandidateRelatedAddress {
                address: self.rel_addr,
                port: self.rel_port,
            }),
            server: config.server,
            conn: config.conn,
            foundation_override: config.foundation,
            priority_override: config.priority,
            ..CandidateBase::default()
        })
    }
}

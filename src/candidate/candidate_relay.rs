use std::sync::atomic::AtomicU16;
use std::sync::Arc;

use super::candidate_base::*;
use super::*;
use crate::error::*;

/// Builds a relayed candidate: a TURN-allocated address. The conn is
/// the relay connection and the client keeps the allocation alive.
#[derive(Default)]
pub struct CandidateRelayConfig {
    pub base_config: CandidateBaseConfig,
    pub rel_addr: String,
    pub rel_port: u16,
    pub relay_client: Option<Arc<turn::client::Client>>,
}

impl CandidateRelayConfig {
    pub fn new_candidate_relay(self) -> Result<CandidateBase> {
        let config = self.base_config;

        Ok(CandidateBase {
            id: ensure_candidate_id(config.candidate_id),
            candidate_type: CandidateType::Relay,
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
            relay_client: self.relay_client,
            ..CandidateBase::default()
        })
    }
}

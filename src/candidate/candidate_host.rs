use std::sync::atomic::AtomicU16;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::candidate_base::*;
use super::*;
use crate::error::*;

/// Builds a host candidate: a local interface address with its bound
/// socket.
#[derive(Default)]
pub struct CandidateHostConfig {
    pub base_config: CandidateBaseConfig,
}

impl CandidateHostConfig {
    pub fn new_candidate_host(self) -> Result<CandidateBase> {
        let config = self.base_config;

        Ok(CandidateBase {
            id: ensure_candidate_id(config.candidate_id),
            candidate_type: CandidateType::Host,
            transport: config.transport,
            component: AtomicU16::new(config.component),
            address: config.address,
            related_address: None,
            server: String::new(),
            conn: config.conn,
            closed_ch: Arc::new(Mutex::new(None)),
            foundation_override: config.foundation,
            priority_override: config.priority,
            ..CandidateBase::default()
        })
    }
}

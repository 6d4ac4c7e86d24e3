use std::fmt;
use std::sync::Arc;

use crate::candidate::Candidate;
use crate::state::ComponentState;

/// Everything the agent reports to its embedder, delivered in the
/// order the engine generated it.
#[derive(Clone)]
pub enum AgentEvent {
    /// Every gathering transaction of the stream is finalized.
    CandidateGatheringDone { stream_id: u32 },

    /// A new local candidate surfaced.
    NewCandidate {
        stream_id: u32,
        component_id: u16,
        candidate: Arc<dyn Candidate + Send + Sync>,
    },

    /// A component moved to a new connectivity state.
    ComponentStateChanged {
        stream_id: u32,
        component_id: u16,
        state: ComponentState,
    },

    /// A pair got nominated for the component.
    NewSelectedPair {
        stream_id: u32,
        component_id: u16,
        local_foundation: String,
        remote_foundation: String,
    },

    /// A reliable (TCP) component drained its backlog and accepts
    /// writes again.
    ReliableTransportWritable { stream_id: u32, component_id: u16 },
}

impl AgentEvent {
    /// The stream this event belongs to, for suppression after
    /// `remove_stream`.
    pub fn stream_id(&self) -> u32 {
        match self {
            AgentEvent::CandidateGatheringDone { stream_id }
            | AgentEvent::NewCandidate { stream_id, .. }
            | AgentEvent::ComponentStateChanged { stream_id, .. }
            | AgentEvent::NewSelectedPair { stream_id, .. }
            | AgentEvent::ReliableTransportWritable { stream_id, .. } => *stream_id,
        }
    }
}

impl fmt::Debug for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentEvent::CandidateGatheringDone { stream_id } => {
                write!(f, "CandidateGatheringDone(stream {stream_id})")
            }
            AgentEvent::NewCandidate {
                stream_id,
                component_id,
                candidate,
            } => write!(
                f,
                "NewCandidate(stream {stream_id} component {component_id}: {candidate})"
            ),
            AgentEvent::ComponentStateChanged {
                stream_id,
                component_id,
                state,
            } => write!(
                f,
                "ComponentStateChanged(stream {stream_id} component {component_id}: {state})"
            ),
            AgentEvent::NewSelectedPair {
                stream_id,
                component_id,
                local_foundation,
                remote_foundation,
            } => write!(
                f,
                "NewSelectedPair(stream {stream_id} component {component_id}: {local_foundation}/{remote_foundation})"
            ),
            AgentEvent::ReliableTransportWritable {
                stream_id,
                component_id,
            } => write!(
                f,
                "ReliableTransportWritable(stream {stream_id} component {component_id})"
            ),
        }
    }
}

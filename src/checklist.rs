#[cfg(test)]
mod checklist_test;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::candidate::*;

/// Per-stream ordered set of candidate pairs plus the triggered-check
/// FIFO that preempts the ordinary pacer.
#[derive(Default)]
pub struct CheckList {
    pairs: Mutex<Vec<Arc<CandidatePair>>>,
    triggered_queue: Mutex<VecDeque<Arc<CandidatePair>>>,
}

impl CheckList {
    pub fn new() -> Self {
        CheckList::default()
    }

    /// Forms pairs from the cartesian product of `locals` x `remotes`:
    /// matching component, compatible transports and address families
    /// only. Server-reflexive locals are swapped for their base (the
    /// host candidate the reflexive address was learned from) since
    /// checks leave from the base socket; duplicates collapse onto the
    /// already-present pair.
    pub async fn form_pairs(
        &self,
        locals: &[Arc<dyn Candidate + Send + Sync>],
        remotes: &[Arc<dyn Candidate + Send + Sync>],
        controlling: bool,
    ) -> usize {
        let mut formed = 0;
        for local in locals {
            let local = match local.candidate_type() {
                CandidateType::ServerReflexive => {
                    match find_base(local, locals) {
                        Some(base) => base,
                        // No base host candidate: nothing to check from.
                        None => continue,
                    }
                }
                _ => Arc::clone(local),
            };

            for remote in remotes {
                if local.component() != remote.component() {
                    continue;
                }
                if !local.transport().pairable_with(remote.transport()) {
                    continue;
                }
                if local.addr().is_ipv4() != remote.addr().is_ipv4() {
                    continue;
                }
                if self
                    .add_pair(Arc::new(CandidatePair::new(
                        Arc::clone(&local),
                        Arc::clone(remote),
                        controlling,
                    )))
                    .await
                {
                    formed += 1;
                }
            }
        }

        if formed > 0 {
            self.compute_initial_states().await;
        }
        formed
    }

    /// Inserts `pair` unless an equal pair is already present. Keeps
    /// the list ordered by decreasing pair priority.
    pub async fn add_pair(&self, pair: Arc<CandidatePair>) -> bool {
        let mut pairs = self.pairs.lock().await;
        if pairs.iter().any(|p| **p == *pair) {
            return false;
        }
        let at = pairs
            .iter()
            .position(|p| p.priority() < pair.priority())
            .unwrap_or(pairs.len());
        pairs.insert(at, pair);
        true
    }

    /// Initial per-foundation states: the highest-priority pair of
    /// every foundation group becomes Waiting, the rest stay Frozen.
    pub async fn compute_initial_states(&self) {
        let pairs = self.pairs.lock().await;

        // A frozen pair stays frozen only while another pair of its
        // foundation is Waiting or InProgress; a success there thaws
        // it through the unfreeze path, a terminal state must not pin
        // late-formed pairs forever.
        let mut active_foundations: Vec<String> = pairs
            .iter()
            .filter(|p| {
                matches!(
                    p.state(),
                    CandidatePairState::Waiting | CandidatePairState::InProgress
                )
            })
            .map(|p| pair_foundation(p))
            .collect();

        // The list is priority-ordered, so the first frozen pair of an
        // unrepresented foundation is its best one.
        for p in pairs.iter() {
            if p.state() != CandidatePairState::Frozen {
                continue;
            }
            let foundation = pair_foundation(p);
            if !active_foundations.contains(&foundation) {
                p.set_state(CandidatePairState::Waiting);
                active_foundations.push(foundation);
            }
        }
    }

    /// Thaws every frozen pair sharing `foundation`, after a pair with
    /// that foundation succeeded.
    pub async fn unfreeze_foundation(&self, foundation: &str) {
        let pairs = self.pairs.lock().await;
        for p in pairs.iter() {
            if p.state() == CandidatePairState::Frozen && pair_foundation(p) == foundation {
                p.set_state(CandidatePairState::Waiting);
            }
        }
    }

    /// Highest-priority Waiting pair, for the ordinary Ta pacer.
    pub async fn next_waiting(&self) -> Option<Arc<CandidatePair>> {
        let pairs = self.pairs.lock().await;
        pairs
            .iter()
            .filter(|p| p.state() == CandidatePairState::Waiting)
            .max_by_key(|p| p.priority())
            .cloned()
    }

    pub async fn push_triggered(&self, pair: Arc<CandidatePair>) {
        let mut queue = self.triggered_queue.lock().await;
        if !queue.iter().any(|p| **p == *pair) {
            queue.push_back(pair);
        }
    }

    pub async fn pop_triggered(&self) -> Option<Arc<CandidatePair>> {
        let mut queue = self.triggered_queue.lock().await;
        queue.pop_front()
    }

    pub async fn find_pair(
        &self,
        local: &Arc<dyn Candidate + Send + Sync>,
        remote: &Arc<dyn Candidate + Send + Sync>,
    ) -> Option<Arc<CandidatePair>> {
        let pairs = self.pairs.lock().await;
        pairs
            .iter()
            .find(|p| p.local.equal(&**local) && p.remote.equal(&**remote))
            .cloned()
    }

    /// Best succeeded pair of `component`, the regular-nomination
    /// candidate.
    pub async fn best_succeeded_pair(&self, component: u16) -> Option<Arc<CandidatePair>> {
        let pairs = self.pairs.lock().await;
        pairs
            .iter()
            .filter(|p| {
                p.component() == component && p.state() == CandidatePairState::Succeeded
            })
            .max_by_key(|p| p.priority())
            .cloned()
    }

    /// True when `component` has nothing left to try and nothing that
    /// worked: the exhaustion condition for Failed.
    pub async fn is_exhausted(&self, component: u16) -> bool {
        let triggered = self.triggered_queue.lock().await;
        if triggered.iter().any(|p| p.component() == component) {
            return false;
        }
        let pairs = self.pairs.lock().await;
        let mut saw_pair = false;
        for p in pairs.iter().filter(|p| p.component() == component) {
            saw_pair = true;
            match p.state() {
                CandidatePairState::Frozen
                | CandidatePairState::Waiting
                | CandidatePairState::InProgress
                | CandidatePairState::Succeeded => return false,
                CandidatePairState::Failed => {}
            }
        }
        saw_pair
    }

    /// Fails every pair referencing the candidate, used when a
    /// candidate (and its socket) goes away.
    pub async fn fail_pairs_referencing(&self, candidate: &(dyn Candidate + Send + Sync)) {
        let pairs = self.pairs.lock().await;
        for p in pairs.iter() {
            if p.local.equal(candidate) || p.remote.equal(candidate) {
                p.set_state(CandidatePairState::Failed);
            }
        }
    }

    pub async fn fail_all(&self) {
        let pairs = self.pairs.lock().await;
        for p in pairs.iter() {
            p.set_state(CandidatePairState::Failed);
        }
        let mut queue = self.triggered_queue.lock().await;
        queue.clear();
    }

    pub async fn len(&self) -> usize {
        self.pairs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pairs.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<Arc<CandidatePair>> {
        self.pairs.lock().await.clone()
    }
}

/// Pair foundation per RFC 5245 section 5.7.4: the concatenation of
/// the candidates' foundations.
pub(crate) fn pair_foundation(pair: &CandidatePair) -> String {
    format!("{}:{}", pair.local.foundation(), pair.remote.foundation())
}

fn find_base(
    srflx: &Arc<dyn Candidate + Send + Sync>,
    locals: &[Arc<dyn Candidate + Send + Sync>],
) -> Option<Arc<dyn Candidate + Send + Sync>> {
    let related = srflx.related_address()?;
    locals
        .iter()
        .find(|c| {
            c.candidate_type() == CandidateType::Host
                && c.component() == srflx.component()
                && c.addr().ip().to_string() == related.address
                && c.addr().port() == related.port
        })
        .cloned()
}

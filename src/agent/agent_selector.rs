use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use stun::fingerprint::FINGERPRINT;
use stun::message::*;

use super::agent_internal::*;
use crate::candidate::*;
use crate::checklist::pair_foundation;
use crate::compat::NominationMode;
use crate::stream::{BindingRequest, Component, Stream};
use crate::use_candidate::UseCandidateAttr;

#[async_trait]
trait ControllingSelector {
    async fn contact_candidates(&self, stream: &Arc<Stream>);
    async fn handle_success(
        &self,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
        pending: &BindingRequest,
    );
    async fn handle_request(
        &self,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
        use_candidate: bool,
    );
}

#[async_trait]
trait ControlledSelector {
    async fn contact_candidates(&self, stream: &Arc<Stream>);
    async fn handle_success(
        &self,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
        pending: &BindingRequest,
    );
    async fn handle_request(
        &self,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
        use_candidate: bool,
    );
}

impl AgentInternal {
    /// One Ta tick: keepalives, then the triggered queue, then the
    /// role-specific scheduling.
    pub(crate) async fn contact(self: &Arc<Self>, stream: &Arc<Stream>) {
        for component in stream.components() {
            if let Some(pair) = component.selected_pair() {
                self.check_keepalive(stream, &pair).await;
            }
        }

        // Triggered checks preempt the ordinary pacer.
        if let Some(pair) = stream.checklist.pop_triggered().await {
            let use_candidate =
                self.is_controlling() && self.nomination_mode == NominationMode::Aggressive;
            self.send_check(stream, &pair, use_candidate).await;
            return;
        }

        // With nothing runnable and components still unselected,
        // re-evaluate the frozen pairs so a failed foundation sibling
        // cannot pin them.
        if !stream.all_components_nominated()
            && stream.checklist.next_waiting().await.is_none()
        {
            stream.checklist.compute_initial_states().await;
        }

        if self.is_controlling() {
            ControllingSelector::contact_candidates(self, stream).await;
        } else {
            ControlledSelector::contact_candidates(self, stream).await;
        }

        self.evaluate_failure(stream).await;
    }

    /// A verified 200 for one of our checks landed.
    pub(crate) async fn handle_success_response(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        local: &Arc<dyn Candidate + Send + Sync>,
        remote: &Arc<dyn Candidate + Send + Sync>,
        pending: &BindingRequest,
    ) {
        let Some(pair) = stream.checklist.find_pair(local, remote).await else {
            // This shouldn't happen.
            log::error!(
                "[{}]: success response for a pair that is not in the check list",
                self.get_name()
            );
            return;
        };

        pair.set_state(CandidatePairState::Succeeded);
        log::trace!("[{}]: pair succeeded: {}", self.get_name(), pair);

        // Foundations describe NAT paths, not streams: thaw siblings in
        // every check list.
        let foundation = pair_foundation(&pair);
        let streams: Vec<Arc<Stream>> = {
            let streams = self.streams.lock().await;
            streams.values().cloned().collect()
        };
        for s in streams {
            s.checklist.unfreeze_foundation(&foundation).await;
        }

        if self.is_controlling() {
            ControllingSelector::handle_success(self, stream, component, &pair, pending).await;
        } else {
            ControlledSelector::handle_success(self, stream, component, &pair, pending).await;
        }
    }

    /// A verified inbound Binding request landed: answer it and feed
    /// the triggered-check queue.
    pub(crate) async fn handle_binding_request(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        local: &Arc<dyn Candidate + Send + Sync>,
        remote: &Arc<dyn Candidate + Send + Sync>,
        m: &Message,
    ) {
        let pair = match stream.checklist.find_pair(local, remote).await {
            Some(pair) => pair,
            None => {
                let pair = Arc::new(CandidatePair::new(
                    Arc::clone(local),
                    Arc::clone(remote),
                    self.is_controlling(),
                ));
                stream.checklist.add_pair(Arc::clone(&pair)).await;
                pair
            }
        };

        self.send_binding_success(m, local, remote).await;

        // Promote the pair into the triggered FIFO.
        match pair.state() {
            CandidatePairState::Frozen | CandidatePairState::Waiting => {
                pair.set_state(CandidatePairState::Waiting);
                stream.checklist.push_triggered(Arc::clone(&pair)).await;
            }
            _ => {}
        }

        let use_candidate = UseCandidateAttr::is_set(m);
        if self.is_controlling() {
            ControllingSelector::handle_request(self, stream, component, &pair, use_candidate)
                .await;
        } else {
            ControlledSelector::handle_request(self, stream, component, &pair, use_candidate)
                .await;
        }
    }

    /// Consent freshness on the selected pair: a Binding indication,
    /// or a full request when `keepalive_conncheck` asks for RFC 7675
    /// semantics.
    async fn check_keepalive(self: &Arc<Self>, stream: &Arc<Stream>, pair: &Arc<CandidatePair>) {
        let last_sent = SystemTime::now()
            .duration_since(pair.local.last_sent())
            .unwrap_or_default();
        let last_received = SystemTime::now()
            .duration_since(pair.remote.last_received())
            .unwrap_or_default();

        if last_sent <= self.keepalive_interval && last_received <= self.keepalive_interval {
            return;
        }

        if self.keepalive_conncheck {
            self.send_check(stream, pair, false).await;
        } else {
            let mut msg = Message::new();
            let result = if self.compatibility.uses_fingerprint() {
                msg.build(&[
                    Box::new(BINDING_INDICATION),
                    Box::new(TransactionId::new()),
                    Box::new(FINGERPRINT),
                ])
            } else {
                msg.build(&[Box::new(BINDING_INDICATION), Box::new(TransactionId::new())])
            };
            match result {
                Ok(()) => self.send_stun(&msg, &pair.local, &pair.remote).await,
                Err(err) => {
                    log::error!("[{}]: failed to build keepalive: {}", self.get_name(), err);
                }
            }
        }
    }
}

#[async_trait]
impl ControllingSelector for Arc<AgentInternal> {
    async fn contact_candidates(&self, stream: &Arc<Stream>) {
        // Regular nomination: once a component has a succeeded pair,
        // re-issue a check with USE-CANDIDATE on the best of them.
        if self.nomination_mode == NominationMode::Regular {
            for component in stream.components() {
                if component.selected_pair().is_some() {
                    continue;
                }
                if let Some(best) = stream.checklist.best_succeeded_pair(component.id).await {
                    if !best.nomination_requested.swap(true, Ordering::SeqCst) {
                        log::trace!(
                            "[{}]: nominating pair {}",
                            self.get_name(),
                            best
                        );
                        self.send_check(stream, &best, true).await;
                        return;
                    }
                }
            }
        }

        if let Some(pair) = stream.checklist.next_waiting().await {
            // Aggressive mode nominates on every ordinary check.
            let use_candidate = self.nomination_mode == NominationMode::Aggressive;
            self.send_check(stream, &pair, use_candidate).await;
        }
    }

    async fn handle_success(
        &self,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
        pending: &BindingRequest,
    ) {
        if pending.is_use_candidate {
            self.set_selected_pair(stream, component, Arc::clone(pair))
                .await;
        }
    }

    async fn handle_request(
        &self,
        _stream: &Arc<Stream>,
        _component: &Arc<Component>,
        _pair: &Arc<CandidatePair>,
        use_candidate: bool,
    ) {
        // The peer must not nominate towards the controlling agent.
        if use_candidate {
            log::debug!(
                "[{}]: discarding USE-CANDIDATE from the controlled peer",
                self.get_name()
            );
        }
    }
}

#[async_trait]
impl ControlledSelector for Arc<AgentInternal> {
    async fn contact_candidates(&self, stream: &Arc<Stream>) {
        // Nomination is observed, never decided, on this side.
        if let Some(pair) = stream.checklist.next_waiting().await {
            self.send_check(stream, &pair, false).await;
        }
    }

    async fn handle_success(
        &self,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
        _pending: &BindingRequest,
    ) {
        // An earlier inbound USE-CANDIDATE was waiting for this pair
        // to prove itself.
        if pair.nominate_on_success.swap(false, Ordering::SeqCst) {
            self.set_selected_pair(stream, component, Arc::clone(pair))
                .await;
        }
    }

    async fn handle_request(
        &self,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
        use_candidate: bool,
    ) {
        if !use_candidate {
            return;
        }

        // https://tools.ietf.org/html/rfc8445#section-7.3.1.5
        // A nominated check on a succeeded pair selects it right away;
        // otherwise the triggered check carries the nomination forward.
        if pair.state() == CandidatePairState::Succeeded {
            if component.selected_pair().is_none()
                || self.nomination_mode == NominationMode::Aggressive
            {
                self.set_selected_pair(stream, component, Arc::clone(pair))
                    .await;
            }
        } else {
            pair.nominate_on_success.store(true, Ordering::SeqCst);
        }
    }
}

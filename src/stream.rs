use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use stun::message::TransactionId;
use stun::transaction::TransactionMap;
use tokio::sync::{mpsc, Mutex};

use crate::candidate::*;
use crate::checklist::CheckList;
use crate::state::{ComponentState, GatheringState};

/// Upper-layer sink for one component's inbound datagrams.
pub type OnRecvFn = Box<
    dyn (FnMut(Vec<u8>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync,
>;

/// Short-term credentials of both sides of a stream. All components of
/// the stream share them.
#[derive(Default)]
pub struct UfragPwd {
    pub local_ufrag: String,
    pub local_pwd: String,
    pub remote_ufrag: String,
    pub remote_pwd: String,
}

/// One outstanding outbound Binding request of the check engine.
#[derive(Debug, Clone)]
pub(crate) struct BindingRequest {
    pub(crate) timestamp: Instant,
    pub(crate) transaction_id: TransactionId,
    pub(crate) destination: SocketAddr,
    pub(crate) is_use_candidate: bool,
    /// Role at send time: a 487 only flips the role if it has not
    /// flipped since this check left (RFC 8445 section 7.2.5.1).
    pub(crate) was_controlling: bool,
}

/// One piece of a stream's data flow (e.g. RTP, or RTCP). Owns its
/// local candidates and thus their sockets; remote candidates are
/// value copies of what the peer signalled.
pub struct Component {
    pub stream_id: u32,
    pub id: u16,
    pub(crate) state: AtomicU8,
    pub(crate) local_candidates: Mutex<Vec<Arc<dyn Candidate + Send + Sync>>>,
    pub(crate) remote_candidates: Mutex<Vec<Arc<dyn Candidate + Send + Sync>>>,
    pub(crate) selected_pair: ArcSwapOption<CandidatePair>,
    pub(crate) on_recv: ArcSwapOption<Mutex<OnRecvFn>>,
    pub(crate) port_range: SyncMutex<Option<(u16, u16)>>,
}

impl Component {
    pub(crate) fn new(stream_id: u32, id: u16) -> Self {
        Component {
            stream_id,
            id,
            state: AtomicU8::new(ComponentState::Disconnected as u8),
            local_candidates: Mutex::new(vec![]),
            remote_candidates: Mutex::new(vec![]),
            selected_pair: ArcSwapOption::empty(),
            on_recv: ArcSwapOption::empty(),
            port_range: SyncMutex::new(None),
        }
    }

    pub fn state(&self) -> ComponentState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// Applies `next` if the state machine allows it.
    pub(crate) fn try_set_state(&self, next: ComponentState) -> bool {
        let current = self.state();
        if current == next || !current.can_transition_to(next) {
            return false;
        }
        self.state.store(next as u8, Ordering::SeqCst);
        true
    }

    pub fn selected_pair(&self) -> Option<Arc<CandidatePair>> {
        self.selected_pair.load().clone()
    }

    pub async fn local_candidates(&self) -> Vec<Arc<dyn Candidate + Send + Sync>> {
        self.local_candidates.lock().await.clone()
    }

    pub async fn remote_candidates(&self) -> Vec<Arc<dyn Candidate + Send + Sync>> {
        self.remote_candidates.lock().await.clone()
    }

    /// Deduplicating insert; candidates with an identical transport
    /// address collapse.
    pub(crate) async fn add_local_candidate(
        &self,
        c: &Arc<dyn Candidate + Send + Sync>,
    ) -> bool {
        let mut local_candidates = self.local_candidates.lock().await;
        if local_candidates.iter().any(|cand| cand.equal(&**c)) {
            return false;
        }
        local_candidates.push(Arc::clone(c));
        true
    }

    pub(crate) async fn add_remote_candidate(
        &self,
        c: &Arc<dyn Candidate + Send + Sync>,
    ) -> bool {
        let mut remote_candidates = self.remote_candidates.lock().await;
        if remote_candidates.iter().any(|cand| cand.equal(&**c)) {
            return false;
        }
        remote_candidates.push(Arc::clone(c));
        true
    }

    pub(crate) async fn find_remote_candidate(
        &self,
        addr: SocketAddr,
    ) -> Option<Arc<dyn Candidate + Send + Sync>> {
        let remote_candidates = self.remote_candidates.lock().await;
        remote_candidates
            .iter()
            .find(|c| c.addr().ip() == addr.ip() && c.addr().port() == addr.port())
            .cloned()
    }

    pub(crate) async fn find_local_candidate(
        &self,
        addr: SocketAddr,
    ) -> Option<Arc<dyn Candidate + Send + Sync>> {
        let local_candidates = self.local_candidates.lock().await;
        local_candidates
            .iter()
            .find(|c| c.addr().ip() == addr.ip() && c.addr().port() == addr.port())
            .cloned()
    }

    pub(crate) fn port_range(&self) -> Option<(u16, u16)> {
        *self.port_range.lock().unwrap()
    }
}

/// One media stream: 1..K components sharing a credential pair, a
/// check list and the engine state that drives it.
pub struct Stream {
    pub id: u32,
    pub(crate) name: SyncMutex<Option<String>>,
    pub(crate) ufrag_pwd: Mutex<UfragPwd>,
    pub(crate) components: SyncMutex<BTreeMap<u16, Arc<Component>>>,
    pub(crate) checklist: CheckList,
    pub(crate) gathering_state: AtomicU8,
    pub(crate) checks_running: AtomicBool,
    pub(crate) pending_binding_requests: Mutex<Vec<BindingRequest>>,
    pub(crate) tr_map: Arc<Mutex<TransactionMap>>,
    /// Present while the check pacer runs; dropping it stops the task.
    pub(crate) done_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl Stream {
    pub(crate) fn new(id: u32, component_count: u16) -> Self {
        let mut components = BTreeMap::new();
        for component_id in 1..=component_count {
            components.insert(component_id, Arc::new(Component::new(id, component_id)));
        }

        Stream {
            id,
            name: SyncMutex::new(None),
            ufrag_pwd: Mutex::new(UfragPwd::default()),
            components: SyncMutex::new(components),
            checklist: CheckList::new(),
            gathering_state: AtomicU8::new(GatheringState::New as u8),
            checks_running: AtomicBool::new(false),
            pending_binding_requests: Mutex::new(vec![]),
            tr_map: Arc::new(Mutex::new(TransactionMap::new())),
            done_tx: Mutex::new(None),
        }
    }

    pub fn name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.lock().unwrap() = Some(name);
    }

    pub fn gathering_state(&self) -> GatheringState {
        self.gathering_state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn set_gathering_state(&self, state: GatheringState) {
        self.gathering_state.store(state as u8, Ordering::SeqCst);
    }

    pub fn component(&self, id: u16) -> Option<Arc<Component>> {
        self.components.lock().unwrap().get(&id).cloned()
    }

    pub fn components(&self) -> Vec<Arc<Component>> {
        self.components.lock().unwrap().values().cloned().collect()
    }

    pub(crate) async fn local_credentials(&self) -> (String, String) {
        let ufrag_pwd = self.ufrag_pwd.lock().await;
        (ufrag_pwd.local_ufrag.clone(), ufrag_pwd.local_pwd.clone())
    }

    pub(crate) async fn remote_credentials(&self) -> (String, String) {
        let ufrag_pwd = self.ufrag_pwd.lock().await;
        (ufrag_pwd.remote_ufrag.clone(), ufrag_pwd.remote_pwd.clone())
    }

    /// True once every component holds a nominated pair.
    pub(crate) fn all_components_nominated(&self) -> bool {
        let components = self.components.lock().unwrap();
        !components.is_empty()
            && components
                .values()
                .all(|c| c.selected_pair.load().is_some())
    }
}

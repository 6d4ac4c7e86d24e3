use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use stun::attributes::*;
use stun::checks::verify;
use stun::error_code::*;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::Username;
use stun::transaction::{RtxConfig, Transaction, TransactionConfig};
use stun::uattrs::UnknownAttributes;
use stun::xoraddr::XorMappedAddress;
use tokio::sync::{broadcast, mpsc, Mutex};
use util::net::Net;
use util::resolver::Resolver;

use super::agent_config::*;
use super::OnEventHdlrFn;
use crate::candidate::candidate_base::CandidateBaseConfig;
use crate::candidate::candidate_peer_reflexive::CandidatePeerReflexiveConfig;
use crate::candidate::*;
use crate::compat::{Compatibility, NominationMode};
use crate::control::{AttrControl, AttrControlled, AttrControlling, Role};
use crate::error::*;
use crate::events::AgentEvent;
use crate::priority::PriorityAttr;
use crate::state::{ComponentState, GatheringState};
use crate::stream::{BindingRequest, Component, Stream};
use crate::url::Url;
use crate::use_candidate::UseCandidateAttr;

/// Outstanding requests older than this are forgotten,
/// RFC 8445 appendix B.1.
pub(crate) const MAX_BINDING_REQUEST_TIMEOUT: Duration = Duration::from_millis(4000);

const EVENT_QUEUE_DEPTH: usize = 256;

pub struct AgentInternal {
    // Configuration, fixed after construction.
    pub(crate) compatibility: Compatibility,
    pub(crate) nomination_mode: NominationMode,
    pub(crate) keepalive_interval: Duration,
    pub(crate) check_interval: Duration,
    pub(crate) keepalive_conncheck: bool,
    pub(crate) ice_tcp: bool,
    pub(crate) upnp: bool,
    pub(crate) proxy: Option<ProxyConfig>,
    pub(crate) rtx: RtxConfig,
    pub(crate) stun_server: Option<Url>,
    pub(crate) turn_servers: Vec<Url>,
    pub(crate) local_addrs: Vec<IpAddr>,
    pub(crate) default_port_range: Option<(u16, u16)>,
    pub(crate) local_ufrag: String,
    pub(crate) local_pwd: String,

    pub(crate) net: Net,
    pub(crate) resolver: Arc<Resolver>,

    // Role handling.
    pub(crate) role: AtomicU8,
    pub(crate) tie_breaker: AtomicU64,

    // Streams.
    pub(crate) streams: Mutex<BTreeMap<u32, Arc<Stream>>>,
    pub(crate) next_stream_id: AtomicU32,
    pub(crate) removed_streams: SyncMutex<HashSet<u32>>,

    // Events.
    pub(crate) event_tx: mpsc::Sender<AgentEvent>,
    pub(crate) on_event_hdlr: ArcSwapOption<Mutex<OnEventHdlrFn>>,

    pub(crate) done: AtomicBool,
}

impl AgentInternal {
    pub(super) fn new(
        config: AgentConfig,
        local_ufrag: String,
        local_pwd: String,
    ) -> Result<(Self, mpsc::Receiver<AgentEvent>)> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let stun_server = config.stun_server_or_env()?;
        let rtx = config.rtx_config();

        let ai = AgentInternal {
            compatibility: config.compatibility,
            nomination_mode: config.nomination_mode,
            keepalive_interval: config
                .keepalive_interval
                .unwrap_or(DEFAULT_KEEPALIVE_INTERVAL),
            check_interval: config.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL),
            keepalive_conncheck: config.keepalive_conncheck,
            ice_tcp: config.ice_tcp,
            upnp: config.upnp,
            proxy: config.proxy.clone(),
            rtx,
            stun_server,
            turn_servers: config.turn_servers.clone(),
            local_addrs: config.local_addrs.clone(),
            default_port_range: config.port_range,
            local_ufrag,
            local_pwd,

            net: config.net.unwrap_or_default(),
            resolver: config
                .resolver
                .unwrap_or_else(|| Arc::new(Resolver::new())),

            role: AtomicU8::new(if config.controlling {
                Role::Controlling as u8
            } else {
                Role::Controlled as u8
            }),
            tie_breaker: AtomicU64::new(crate::rand::generate_tie_breaker()),

            streams: Mutex::new(BTreeMap::new()),
            next_stream_id: AtomicU32::new(1),
            removed_streams: SyncMutex::new(HashSet::new()),

            event_tx,
            on_event_hdlr: ArcSwapOption::empty(),

            done: AtomicBool::new(false),
        };

        Ok((ai, event_rx))
    }

    pub(crate) fn role(&self) -> Role {
        if self.role.load(Ordering::SeqCst) == Role::Controlling as u8 {
            Role::Controlling
        } else {
            Role::Controlled
        }
    }

    pub(crate) fn is_controlling(&self) -> bool {
        self.role() == Role::Controlling
    }

    pub(crate) fn set_role(&self, role: Role) {
        self.role.store(role as u8, Ordering::SeqCst);
    }

    pub(crate) fn get_name(&self) -> &str {
        if self.is_controlling() {
            "controlling"
        } else {
            "controlled"
        }
    }

    pub(crate) fn is_stream_removed(&self, stream_id: u32) -> bool {
        self.removed_streams.lock().unwrap().contains(&stream_id)
    }

    pub(crate) async fn emit_event(&self, event: AgentEvent) {
        if self.is_stream_removed(event.stream_id()) {
            return;
        }
        let _ = self.event_tx.send(event).await;
    }

    pub(crate) async fn get_stream(&self, stream_id: u32) -> Result<Arc<Stream>> {
        if self.done.load(Ordering::SeqCst) {
            return Err(Error::ErrClosed);
        }
        let streams = self.streams.lock().await;
        streams
            .get(&stream_id)
            .cloned()
            .ok_or(Error::ErrStreamNotFound)
    }

    pub(crate) async fn get_component(
        &self,
        stream_id: u32,
        component_id: u16,
    ) -> Result<Arc<Component>> {
        let stream = self.get_stream(stream_id).await?;
        stream
            .component(component_id)
            .ok_or(Error::ErrComponentNotFound)
    }

    pub(crate) async fn add_stream(&self, component_count: u16) -> Result<u32> {
        if self.done.load(Ordering::SeqCst) {
            return Err(Error::ErrClosed);
        }
        if component_count == 0 {
            return Err(Error::ErrNoComponents);
        }

        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let stream = Arc::new(Stream::new(id, component_count));
        {
            let mut ufrag_pwd = stream.ufrag_pwd.lock().await;
            ufrag_pwd.local_ufrag = self.local_ufrag.clone();
            ufrag_pwd.local_pwd = self.local_pwd.clone();
        }

        let mut streams = self.streams.lock().await;
        streams.insert(id, stream);
        Ok(id)
    }

    pub(crate) async fn remove_stream(&self, stream_id: u32) -> Result<()> {
        let stream = {
            let mut streams = self.streams.lock().await;
            streams.remove(&stream_id).ok_or(Error::ErrStreamNotFound)?
        };

        // Suppress every later callback for this stream, then cancel
        // its transactions synchronously.
        self.removed_streams.lock().unwrap().insert(stream_id);
        {
            let mut done_tx = stream.done_tx.lock().await;
            done_tx.take();
        }
        {
            let mut tm = stream.tr_map.lock().await;
            tm.close_and_delete_all();
        }

        stream.checklist.fail_all().await;

        for component in stream.components() {
            component.selected_pair.store(None);
            for c in component.local_candidates().await {
                if let Err(err) = c.close().await {
                    log::warn!(
                        "[{}]: failed to close candidate {}: {}",
                        self.get_name(),
                        c,
                        err
                    );
                }
            }
            component.local_candidates.lock().await.clear();
            component.remote_candidates.lock().await.clear();
            component.state.store(ComponentState::Disconnected as u8, Ordering::SeqCst);
        }

        Ok(())
    }

    /// Moves a component to `next` if allowed and reports it.
    pub(crate) async fn update_component_state(
        &self,
        component: &Arc<Component>,
        next: ComponentState,
    ) {
        if component.try_set_state(next) {
            log::info!(
                "[{}]: stream {} component {} -> {}",
                self.get_name(),
                component.stream_id,
                component.id,
                next
            );
            self.emit_event(AgentEvent::ComponentStateChanged {
                stream_id: component.stream_id,
                component_id: component.id,
                state: next,
            })
            .await;
        }
    }

    // ---- candidate plumbing -------------------------------------------------

    /// Registers a local candidate: dedup, recv loop, pair formation,
    /// candidate event, and a kick to the pacer.
    pub(crate) async fn add_local_candidate(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        c: &Arc<dyn Candidate + Send + Sync>,
    ) {
        // A gather worker may outlive its stream's removal.
        if self.is_stream_removed(stream.id) {
            let _ = c.close().await;
            return;
        }
        if !component.add_local_candidate(c).await {
            // Duplicate: drop the socket it brought along.
            if let Err(err) = c.close().await {
                log::warn!(
                    "[{}]: failed to close duplicate candidate: {}",
                    self.get_name(),
                    err
                );
            }
            return;
        }

        self.start_candidate(stream, component, c).await;

        let locals = component.local_candidates().await;
        let remotes = component.remote_candidates().await;
        stream
            .checklist
            .form_pairs(&locals, &remotes, self.is_controlling())
            .await;

        self.emit_event(AgentEvent::NewCandidate {
            stream_id: stream.id,
            component_id: component.id,
            candidate: Arc::clone(c),
        })
        .await;
    }

    pub(crate) async fn add_remote_candidate(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        c: &Arc<dyn Candidate + Send + Sync>,
    ) {
        if !component.add_remote_candidate(c).await {
            return;
        }

        let locals = component.local_candidates().await;
        let remotes = component.remote_candidates().await;
        stream
            .checklist
            .form_pairs(&locals, &remotes, self.is_controlling())
            .await;
    }

    /// Spawns the demultiplexing recv loop on the candidate's socket.
    ///
    /// Returns a boxed future (rather than being an `async fn`) so its
    /// mutual recursion with `recv_loop` (via the task it spawns) has a
    /// concrete, already-erased type the compiler can prove `Send` for
    /// without needing to unfold the recursive call graph.
    fn start_candidate<'a>(
        self: &'a Arc<Self>,
        stream: &'a Arc<Stream>,
        component: &'a Arc<Component>,
        candidate: &'a Arc<dyn Candidate + Send + Sync>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let Some(conn) = candidate.get_conn() else {
                // Server-reflexive candidates check from their base and
                // carry no socket of their own.
                return;
            };

            let (closed_ch_tx, closed_ch_rx) = broadcast::channel(1);
            {
                let closed_ch = candidate.get_closed_ch();
                let mut closed = closed_ch.lock().await;
                *closed = Some(closed_ch_tx);
            }

            let ai = Arc::clone(self);
            let stream = Arc::clone(stream);
            let component = Arc::clone(component);
            let candidate = Arc::clone(candidate);
            let conn = Arc::clone(conn);
            let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
                let _ = ai
                    .recv_loop(stream, component, candidate, conn, closed_ch_rx)
                    .await;
            });
            tokio::spawn(fut);
        })
    }

    async fn recv_loop(
        self: &Arc<Self>,
        stream: Arc<Stream>,
        component: Arc<Component>,
        candidate: Arc<dyn Candidate + Send + Sync>,
        conn: Arc<dyn util::Conn + Send + Sync>,
        mut closed_ch_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut buffer = vec![0u8; RECEIVE_MTU];
        loop {
            let (n, src_addr) = tokio::select! {
                result = conn.recv_from(&mut buffer) => match result {
                    Ok((n, src)) => (n, src),
                    Err(err) => return Err(Error::Other(err.to_string())),
                },
                _ = closed_ch_rx.recv() => return Err(Error::ErrClosed),
            };

            self.handle_inbound_candidate_msg(
                &stream,
                &component,
                &candidate,
                &buffer[..n],
                src_addr,
            )
            .await;
        }
    }

    /// Per-packet demultiplexer: STUN goes to the check engine,
    /// anything else from a known remote is application data for the
    /// upper layer. ChannelData never surfaces here: the TURN client
    /// unwraps it below the relay conn.
    async fn handle_inbound_candidate_msg(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        candidate: &Arc<dyn Candidate + Send + Sync>,
        buf: &[u8],
        src_addr: SocketAddr,
    ) {
        if is_message(buf) {
            let mut m = match Message::unmarshal_binary(buf) {
                Ok(m) => m,
                Err(err) => {
                    log::warn!(
                        "[{}]: failed to decode inbound STUN from {}: {}",
                        self.get_name(),
                        src_addr,
                        err
                    );
                    return;
                }
            };
            self.handle_inbound(stream, component, candidate, &mut m, src_addr)
                .await;
        } else if let Some(remote) = component.find_remote_candidate(src_addr).await {
            remote.seen(false);
            if let Some(on_recv) = &*component.on_recv.load() {
                let mut f = on_recv.lock().await;
                f(buf.to_vec()).await;
            }
        } else {
            log::warn!(
                "[{}]: discarded {} bytes, not a valid remote candidate ({})",
                self.get_name(),
                buf.len(),
                src_addr
            );
        }
    }

    // ---- check transmission -------------------------------------------------

    /// The PRIORITY attribute value for checks from `local`: what a
    /// peer-reflexive candidate discovered by this check would get.
    pub(crate) fn prflx_priority(&self, local: &Arc<dyn Candidate + Send + Sync>) -> u32 {
        (u32::from(CandidateType::PeerReflexive.preference()) << 24)
            | (local.priority() & 0x00FF_FFFF)
    }

    /// Builds and transmits one connectivity check for `pair`, with
    /// the full retransmission schedule behind it.
    pub(crate) async fn send_check(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        pair: &Arc<CandidatePair>,
        use_candidate: bool,
    ) {
        let (remote_ufrag, remote_pwd) = stream.remote_credentials().await;
        if remote_ufrag.is_empty() {
            return;
        }
        let username = format!("{}:{}", remote_ufrag, self.local_ufrag);

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(BINDING_REQUEST),
            Box::new(TransactionId::new()),
            Box::new(Username::new(ATTR_USERNAME, username)),
        ];
        if use_candidate {
            setters.push(Box::new(UseCandidateAttr::new()));
        }
        if self.is_controlling() {
            setters.push(Box::new(AttrControlling(
                self.tie_breaker.load(Ordering::SeqCst),
            )));
        } else {
            setters.push(Box::new(AttrControlled(
                self.tie_breaker.load(Ordering::SeqCst),
            )));
        }
        setters.push(Box::new(PriorityAttr(self.prflx_priority(&pair.local))));
        setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
            remote_pwd,
        )));
        if self.compatibility.uses_fingerprint() {
            setters.push(Box::new(FINGERPRINT));
        }

        let mut msg = Message::new();
        if let Err(err) = msg.build(&setters) {
            log::error!("[{}]: failed to build check: {}", self.get_name(), err);
            return;
        }

        pair.set_state(CandidatePairState::InProgress);
        pair.binding_request_count.fetch_add(1, Ordering::SeqCst);

        log::trace!(
            "[{}]: ping STUN from {} to {} (use_candidate={})",
            self.get_name(),
            pair.local,
            pair.remote,
            use_candidate
        );

        self.invalidate_pending_binding_requests(stream, Instant::now())
            .await;
        {
            let mut pending = stream.pending_binding_requests.lock().await;
            pending.push(BindingRequest {
                timestamp: Instant::now(),
                transaction_id: msg.transaction_id,
                destination: pair.remote.addr(),
                is_use_candidate: use_candidate,
                was_controlling: self.is_controlling(),
            });
        }

        // Register the retransmission schedule when the local holds a
        // socket (it always does after srflx substitution).
        if let Some(conn) = pair.local.get_conn() {
            let mut tr = Transaction::new(TransactionConfig {
                id: msg.transaction_id,
                raw: msg.raw.clone(),
                to: Some(pair.remote.addr()),
                rtx: self.rtx,
                ignore_result: false,
            });
            let result_rx = tr.get_result_channel();

            {
                let mut tm = stream.tr_map.lock().await;
                if tm.insert(tr).is_err() {
                    log::warn!("[{}]: duplicate transaction id", self.get_name());
                }
                if let Some(tr) = tm.get(&msg.transaction_id) {
                    tr.start_rtx_timer(Arc::clone(conn), Arc::clone(&stream.tr_map));
                }
            }

            // Timeout watcher: a transaction that dies without a
            // response fails only its pair.
            if let Some(mut result_rx) = result_rx {
                let ai = Arc::clone(self);
                let stream = Arc::clone(stream);
                let pair = Arc::clone(pair);
                let tid = msg.transaction_id;
                tokio::spawn(async move {
                    if let Some(result) = result_rx.recv().await {
                        if let Some(err) = result.err {
                            log::debug!(
                                "[{}]: check {} timed out after {} retries: {}",
                                ai.get_name(),
                                tid,
                                result.retries,
                                err
                            );
                            if pair.state() == CandidatePairState::InProgress {
                                pair.set_state(CandidatePairState::Failed);
                            }
                            {
                                let mut pending =
                                    stream.pending_binding_requests.lock().await;
                                pending.retain(|b| b.transaction_id != tid);
                            }
                            ai.evaluate_failure(&stream).await;
                        }
                    }
                });
            }
        }

        self.send_stun(&msg, &pair.local, &pair.remote).await;
    }

    pub(crate) async fn send_stun(
        &self,
        msg: &Message,
        local: &Arc<dyn Candidate + Send + Sync>,
        remote: &Arc<dyn Candidate + Send + Sync>,
    ) {
        if let Err(err) = local.write_to(&msg.raw, &**remote).await {
            log::trace!(
                "[{}]: failed to send STUN message: {}",
                self.get_name(),
                err
            );
        }
    }

    /// Drops outstanding requests older than the binding request
    /// timeout.
    pub(crate) async fn invalidate_pending_binding_requests(
        &self,
        stream: &Arc<Stream>,
        filter_time: Instant,
    ) {
        let mut pending = stream.pending_binding_requests.lock().await;
        let before = pending.len();
        pending.retain(|b| {
            filter_time
                .checked_duration_since(b.timestamp)
                .map(|age| age < MAX_BINDING_REQUEST_TIMEOUT)
                .unwrap_or(true)
        });
        let removed = before - pending.len();
        if removed > 0 {
            log::trace!(
                "[{}]: discarded {} expired binding requests",
                self.get_name(),
                removed
            );
        }
    }

    /// Claims the pending request with `id`, validating that a
    /// response is actually expected.
    pub(crate) async fn take_pending_binding_request(
        &self,
        stream: &Arc<Stream>,
        id: TransactionId,
    ) -> Option<BindingRequest> {
        self.invalidate_pending_binding_requests(stream, Instant::now())
            .await;
        let mut pending = stream.pending_binding_requests.lock().await;
        let at = pending.iter().position(|b| b.transaction_id == id)?;
        Some(pending.remove(at))
    }

    // ---- inbound STUN -------------------------------------------------------

    pub(crate) async fn handle_inbound(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        local: &Arc<dyn Candidate + Send + Sync>,
        m: &mut Message,
        remote_addr: SocketAddr,
    ) {
        if m.typ.method != METHOD_BINDING {
            log::trace!(
                "[{}]: unhandled STUN method from {}: {}",
                self.get_name(),
                remote_addr,
                m.typ
            );
            return;
        }

        match m.typ.class {
            MessageClass::Request => {
                self.handle_binding_request_msg(stream, component, local, m, remote_addr)
                    .await;
            }
            MessageClass::SuccessResponse => {
                self.handle_success_response_msg(stream, component, local, m, remote_addr)
                    .await;
            }
            MessageClass::ErrorResponse => {
                self.handle_error_response_msg(stream, component, local, m, remote_addr)
                    .await;
            }
            MessageClass::Indication => {
                // Keepalive; refresh liveness of the sender.
                if let Some(remote) = component.find_remote_candidate(remote_addr).await {
                    remote.seen(false);
                }
            }
        }
    }

    async fn handle_success_response_msg(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        local: &Arc<dyn Candidate + Send + Sync>,
        m: &mut Message,
        remote_addr: SocketAddr,
    ) {
        {
            let (_, remote_pwd) = stream.remote_credentials().await;
            if let Err(err) = verify(m, remote_pwd.as_bytes()) {
                log::warn!(
                    "[{}]: discard response from {}: {}",
                    self.get_name(),
                    remote_addr,
                    err
                );
                return;
            }
        }

        let Some(pending) = self
            .take_pending_binding_request(stream, m.transaction_id)
            .await
        else {
            log::warn!(
                "[{}]: discard response from {}, unknown transaction {}",
                self.get_name(),
                remote_addr,
                m.transaction_id
            );
            return;
        };

        // Stop the retransmission clock.
        {
            let mut tm = stream.tr_map.lock().await;
            if let Some(mut tr) = tm.delete(&m.transaction_id) {
                tr.stop_rtx_timer();
                tr.close();
            }
        }

        // A response from anywhere but where the request went breaks
        // the non-symmetric-NAT assertion.
        if pending.destination != remote_addr {
            log::debug!(
                "[{}]: discard response: source mismatch, expected {} got {}",
                self.get_name(),
                pending.destination,
                remote_addr
            );
            return;
        }

        let Some(remote) = component.find_remote_candidate(remote_addr).await else {
            log::warn!(
                "[{}]: discard response from {}, no such remote candidate",
                self.get_name(),
                remote_addr
            );
            return;
        };
        remote.seen(false);

        // Peer-reflexive discovery: a mapped address no local
        // candidate covers becomes one, with derived pairs.
        let mut mapped = XorMappedAddress::default();
        if mapped.get_from(m).is_ok() {
            let mapped_addr = SocketAddr::new(mapped.ip, mapped.port);
            if component.find_local_candidate(mapped_addr).await.is_none() {
                self.add_peer_reflexive_local(stream, component, local, mapped_addr)
                    .await;
            }
        }

        self.handle_success_response(stream, component, local, &remote, &pending)
            .await;
    }

    async fn add_peer_reflexive_local(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        base: &Arc<dyn Candidate + Send + Sync>,
        mapped_addr: SocketAddr,
    ) {
        let config = CandidatePeerReflexiveConfig {
            base_config: CandidateBaseConfig {
                transport: base.transport(),
                address: mapped_addr,
                component: component.id,
                ..CandidateBaseConfig::default()
            },
            rel_addr: base.addr().ip().to_string(),
            rel_port: base.addr().port(),
        };

        match config.new_candidate_peer_reflexive() {
            Ok(prflx) => {
                log::debug!(
                    "[{}]: discovered peer-reflexive local {}",
                    self.get_name(),
                    prflx
                );
                let prflx: Arc<dyn Candidate + Send + Sync> = Arc::new(prflx);
                self.add_local_candidate(stream, component, &prflx).await;
            }
            Err(err) => {
                log::error!(
                    "[{}]: failed to create peer-reflexive local: {}",
                    self.get_name(),
                    err
                );
            }
        }
    }

    async fn handle_error_response_msg(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        local: &Arc<dyn Candidate + Send + Sync>,
        m: &mut Message,
        remote_addr: SocketAddr,
    ) {
        {
            let (_, remote_pwd) = stream.remote_credentials().await;
            if let Err(err) = verify(m, remote_pwd.as_bytes()) {
                log::warn!(
                    "[{}]: discard error response from {}: {}",
                    self.get_name(),
                    remote_addr,
                    err
                );
                return;
            }
        }

        let Some(pending) = self
            .take_pending_binding_request(stream, m.transaction_id)
            .await
        else {
            return;
        };
        {
            let mut tm = stream.tr_map.lock().await;
            if let Some(mut tr) = tm.delete(&m.transaction_id) {
                tr.stop_rtx_timer();
                tr.close();
            }
        }
        if pending.destination != remote_addr {
            return;
        }

        let Some(remote) = component.find_remote_candidate(remote_addr).await else {
            return;
        };
        let Some(pair) = stream.checklist.find_pair(local, &remote).await else {
            return;
        };

        let mut code = ErrorCodeAttribute::default();
        if code.get_from(m).is_err() {
            pair.set_state(CandidatePairState::Failed);
            self.evaluate_failure(stream).await;
            return;
        }

        if code.code == CODE_ROLE_CONFLICT {
            // The peer only answers 487 when its tie-breaker wins.
            // Flip unless an inbound check already flipped us since
            // this request left, then retry the pair.
            if pending.was_controlling == self.is_controlling() {
                let flipped = if self.is_controlling() {
                    Role::Controlled
                } else {
                    Role::Controlling
                };
                log::info!(
                    "[{}]: 487 role conflict, switching to {}",
                    self.get_name(),
                    flipped
                );
                self.set_role(flipped);
            }
            pair.set_state(CandidatePairState::Waiting);
            stream.checklist.push_triggered(Arc::clone(&pair)).await;
        } else {
            log::info!(
                "[{}]: check failed with {}: {}",
                self.get_name(),
                code.code.0,
                pair
            );
            pair.set_state(CandidatePairState::Failed);
            self.evaluate_failure(stream).await;
        }
    }

    async fn handle_binding_request_msg(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        local: &Arc<dyn Candidate + Send + Sync>,
        m: &mut Message,
        remote_addr: SocketAddr,
    ) {
        // A request carrying comprehension-required attributes we do
        // not understand earns a 420 listing them.
        if let Err(stun::Error::ErrUnknownComprehensionRequired(types)) =
            m.check_unknown_attributes()
        {
            self.send_binding_error(
                m,
                local,
                remote_addr,
                CODE_UNKNOWN_ATTRIBUTE,
                Some(UnknownAttributes(
                    types.into_iter().map(AttrType).collect(),
                )),
            )
            .await;
            return;
        }

        // USERNAME prefix must name us, integrity must verify with our
        // password.
        {
            let username = match Username::get_from_as(m, ATTR_USERNAME) {
                Ok(u) => u,
                Err(err) => {
                    log::warn!(
                        "[{}]: discard request from {}: {}",
                        self.get_name(),
                        remote_addr,
                        err
                    );
                    return;
                }
            };
            let local_ufrag = username.text.split(':').next().unwrap_or("");
            if local_ufrag != self.local_ufrag {
                log::warn!(
                    "[{}]: discard request from {}: {}",
                    self.get_name(),
                    remote_addr,
                    Error::ErrMismatchUsername
                );
                return;
            }
            if let Err(err) = verify(m, self.local_pwd.as_bytes()) {
                log::warn!(
                    "[{}]: discard request from {}: {}",
                    self.get_name(),
                    remote_addr,
                    err
                );
                return;
            }
        }

        // Role conflict, RFC 8445 section 7.3.1.1.
        let mut control = AttrControl::default();
        if control.get_from(m).is_ok() && !self.resolve_role_conflict(m, local, remote_addr, &control).await {
            return;
        }

        // Unknown source: a peer-reflexive remote candidate, with the
        // priority the peer advertised for it.
        let remote = match component.find_remote_candidate(remote_addr).await {
            Some(remote) => remote,
            None => {
                let mut advertised = PriorityAttr::default();
                let _ = advertised.get_from(m);
                let config = CandidatePeerReflexiveConfig {
                    base_config: CandidateBaseConfig {
                        transport: local.transport(),
                        address: remote_addr,
                        component: component.id,
                        priority: advertised.0,
                        ..CandidateBaseConfig::default()
                    },
                    rel_addr: String::new(),
                    rel_port: 0,
                };
                match config.new_candidate_peer_reflexive() {
                    Ok(prflx) => {
                        log::debug!(
                            "[{}]: adding peer-reflexive remote {}",
                            self.get_name(),
                            remote_addr
                        );
                        let prflx: Arc<dyn Candidate + Send + Sync> = Arc::new(prflx);
                        self.add_remote_candidate(stream, component, &prflx).await;
                        prflx
                    }
                    Err(err) => {
                        log::error!(
                            "[{}]: failed to create peer-reflexive remote: {}",
                            self.get_name(),
                            err
                        );
                        return;
                    }
                }
            }
        };
        remote.seen(false);

        log::trace!(
            "[{}]: inbound STUN request from {} to {}",
            self.get_name(),
            remote_addr,
            local
        );

        self.handle_binding_request(stream, component, local, &remote, m)
            .await;
    }

    /// Returns false when the request was answered with 487 and
    /// processing must stop.
    async fn resolve_role_conflict(
        self: &Arc<Self>,
        m: &Message,
        local: &Arc<dyn Candidate + Send + Sync>,
        remote_addr: SocketAddr,
        control: &AttrControl,
    ) -> bool {
        let ours = self.tie_breaker.load(Ordering::SeqCst);
        match (self.role(), control.role) {
            (Role::Controlling, Role::Controlling) => {
                if ours >= control.tie_breaker.0 {
                    self.send_binding_error(m, local, remote_addr, CODE_ROLE_CONFLICT, None)
                        .await;
                    false
                } else {
                    log::info!("[{}]: role conflict, switching to controlled", self.get_name());
                    self.set_role(Role::Controlled);
                    true
                }
            }
            (Role::Controlled, Role::Controlled) => {
                if ours >= control.tie_breaker.0 {
                    log::info!(
                        "[{}]: role conflict, switching to controlling",
                        self.get_name()
                    );
                    self.set_role(Role::Controlling);
                    true
                } else {
                    self.send_binding_error(m, local, remote_addr, CODE_ROLE_CONFLICT, None)
                        .await;
                    false
                }
            }
            _ => true,
        }
    }

    pub(crate) async fn send_binding_success(
        &self,
        m: &Message,
        local: &Arc<dyn Candidate + Send + Sync>,
        remote: &Arc<dyn Candidate + Send + Sync>,
    ) {
        let addr = remote.addr();

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(m.clone()),
            Box::new(BINDING_SUCCESS),
            Box::new(XorMappedAddress {
                ip: addr.ip(),
                port: addr.port(),
            }),
            Box::new(MessageIntegrity::new_short_term_integrity(
                self.local_pwd.clone(),
            )),
        ];
        if self.compatibility.uses_fingerprint() {
            setters.push(Box::new(FINGERPRINT));
        }

        let mut out = Message::new();
        match out.build(&setters) {
            Ok(()) => self.send_stun(&out, local, remote).await,
            Err(err) => log::warn!(
                "[{}]: failed to build success response: {}",
                self.get_name(),
                err
            ),
        }
    }

    async fn send_binding_error(
        &self,
        m: &Message,
        local: &Arc<dyn Candidate + Send + Sync>,
        remote_addr: SocketAddr,
        code: ErrorCode,
        unknown: Option<UnknownAttributes>,
    ) {
        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(m.clone()),
            Box::new(BINDING_ERROR),
            Box::new(code),
        ];
        if let Some(unknown) = unknown {
            setters.push(Box::new(unknown));
        }
        setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
            self.local_pwd.clone(),
        )));
        if self.compatibility.uses_fingerprint() {
            setters.push(Box::new(FINGERPRINT));
        }

        let mut out = Message::new();
        match out.build(&setters) {
            Ok(()) => {
                if let Some(conn) = local.get_conn() {
                    if let Err(err) = conn.send_to(&out.raw, remote_addr).await {
                        log::trace!(
                            "[{}]: failed to send error response: {}",
                            self.get_name(),
                            err
                        );
                    }
                }
            }
            Err(err) => log::warn!(
                "[{}]: failed to build error response: {}",
                self.get_name(),
                err
            ),
        }
    }

    // ---- selection & component states --------------------------------------

    /// Nominates `pair` for its component. In aggressive mode a
    /// higher-priority nominated pair may supersede the selected one;
    /// the component dips to Connected and comes back Ready without
    /// the data path resetting.
    pub(crate) async fn set_selected_pair(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: Arc<CandidatePair>,
    ) {
        if let Some(current) = component.selected_pair() {
            let supersede = self.nomination_mode == NominationMode::Aggressive
                && pair.priority() > current.priority();
            if !supersede {
                return;
            }
            log::info!(
                "[{}]: superseding selected pair {} with {}",
                self.get_name(),
                current,
                pair
            );
            self.update_component_state(component, ComponentState::Connected)
                .await;
        }

        log::trace!("[{}]: selected pair: {}", self.get_name(), pair);
        pair.nominated.store(true, Ordering::SeqCst);
        component.selected_pair.store(Some(Arc::clone(&pair)));

        self.emit_event(AgentEvent::NewSelectedPair {
            stream_id: stream.id,
            component_id: component.id,
            local_foundation: pair.local.foundation(),
            remote_foundation: pair.remote.foundation(),
        })
        .await;

        self.update_component_state(component, ComponentState::Connected)
            .await;

        // Reliable transports buffer while unconnected; selection is
        // the moment writes start flowing.
        if self.rtx.reliable {
            self.emit_event(AgentEvent::ReliableTransportWritable {
                stream_id: stream.id,
                component_id: component.id,
            })
            .await;
        }

        if stream.all_components_nominated() {
            for c in stream.components() {
                self.update_component_state(&c, ComponentState::Ready).await;
            }
        }
    }

    /// Fails components whose check list is exhausted.
    pub(crate) async fn evaluate_failure(self: &Arc<Self>, stream: &Arc<Stream>) {
        if stream.gathering_state() != GatheringState::Complete {
            return;
        }
        for component in stream.components() {
            if component.selected_pair().is_some() {
                continue;
            }
            if component.local_candidates.lock().await.is_empty() {
                continue;
            }
            if stream.checklist.is_exhausted(component.id).await {
                self.update_component_state(&component, ComponentState::Failed)
                    .await;
            }
        }
    }

    // ---- pacing -------------------------------------------------------------

    /// Starts the per-stream check pacer once remote credentials are
    /// known.
    pub(crate) async fn start_checks_if_ready(self: &Arc<Self>, stream: &Arc<Stream>) {
        {
            let ufrag_pwd = stream.ufrag_pwd.lock().await;
            if ufrag_pwd.remote_ufrag.is_empty() || ufrag_pwd.remote_pwd.is_empty() {
                return;
            }
        }
        if stream.checks_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        {
            let mut done = stream.done_tx.lock().await;
            *done = Some(done_tx);
        }

        for component in stream.components() {
            self.update_component_state(&component, ComponentState::Connecting)
                .await;
        }

        let ai = Arc::clone(self);
        let stream = Arc::clone(stream);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ai.check_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if ai.done.load(Ordering::SeqCst) {
                            return;
                        }
                        ai.contact(&stream).await;
                    }
                    _ = done_rx.recv() => return,
                }
            }
        });
    }
}

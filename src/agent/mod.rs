#[cfg(test)]
mod agent_test;

pub mod agent_config;
pub mod agent_gather;
pub(crate) mod agent_internal;
pub mod agent_selector;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use agent_config::*;
use agent_internal::*;
use tokio::sync::Mutex;

use crate::candidate::*;
use crate::control::Role;
use crate::error::*;
use crate::events::AgentEvent;
use crate::rand::{generate_pwd, generate_ufrag};
use crate::state::GatheringState;
use crate::stream::OnRecvFn;

pub type OnEventHdlrFn =
    Box<dyn (FnMut(AgentEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;

/// The ICE agent: owns streams, their components and all engine state,
/// and exposes the operation surface the embedder drives it with.
pub struct Agent {
    pub(crate) internal: Arc<AgentInternal>,
}

impl Agent {
    /// Builds an agent. Local credentials are generated unless the
    /// config supplies them; supplied ones must clear the RFC entropy
    /// floors (24-bit ufrag, 128-bit password).
    pub fn new(config: AgentConfig) -> Result<Self> {
        let mut ufrag = config.local_ufrag.clone();
        let mut pwd = config.local_pwd.clone();
        if ufrag.is_empty() {
            ufrag = generate_ufrag();
        }
        if pwd.is_empty() {
            pwd = generate_pwd();
        }
        if ufrag.len() * 8 < 24 {
            return Err(Error::ErrLocalUfragInsufficientBits);
        }
        if pwd.len() * 8 < 128 {
            return Err(Error::ErrLocalPwdInsufficientBits);
        }

        let (internal, mut event_rx) = AgentInternal::new(config, ufrag, pwd)?;
        let internal = Arc::new(internal);

        // Event dispatch runs on its own task so engine tasks never
        // block on the embedder's handler; order is preserved by the
        // channel.
        let dispatch = Arc::clone(&internal);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if dispatch.is_stream_removed(event.stream_id()) {
                    continue;
                }
                if let Some(handler) = &*dispatch.on_event_hdlr.load() {
                    let mut f = handler.lock().await;
                    f(event).await;
                }
            }
        });

        Ok(Agent { internal })
    }

    /// Registers the event sink. Events fired before registration are
    /// dropped.
    pub fn on_event(&self, f: OnEventHdlrFn) {
        self.internal.on_event_hdlr.store(Some(Arc::new(Mutex::new(f))));
    }

    /// Creates a stream with `component_count` components and returns
    /// its id (assigned from 1).
    pub async fn add_stream(&self, component_count: u16) -> Result<u32> {
        self.internal.add_stream(component_count).await
    }

    /// Attaches a diagnostic label to the stream.
    pub async fn set_stream_name(&self, stream_id: u32, name: &str) -> Result<()> {
        let stream = self.internal.get_stream(stream_id).await?;
        stream.set_name(name.to_owned());
        Ok(())
    }

    /// Starts gathering local candidates for the stream. Idempotent:
    /// repeated calls while gathering are no-ops.
    pub async fn gather_candidates(&self, stream_id: u32) -> Result<()> {
        let stream = self.internal.get_stream(stream_id).await?;
        if stream.gathering_state() != GatheringState::New {
            return Ok(());
        }
        stream.set_gathering_state(GatheringState::Gathering);

        let internal = Arc::clone(&self.internal);
        tokio::spawn(async move {
            internal.gather_candidates_internal(&stream).await;
        });
        Ok(())
    }

    /// Local (ufrag, pwd) of the stream, for the signalling channel.
    pub async fn get_local_credentials(&self, stream_id: u32) -> Result<(String, String)> {
        let stream = self.internal.get_stream(stream_id).await?;
        Ok(stream.local_credentials().await)
    }

    /// Stores the peer's credentials; required before any check runs.
    pub async fn set_remote_credentials(
        &self,
        stream_id: u32,
        remote_ufrag: &str,
        remote_pwd: &str,
    ) -> Result<()> {
        if remote_ufrag.is_empty() {
            return Err(Error::ErrRemoteUfragEmpty);
        }
        if remote_pwd.is_empty() {
            return Err(Error::ErrRemotePwdEmpty);
        }

        let stream = self.internal.get_stream(stream_id).await?;
        {
            let mut ufrag_pwd = stream.ufrag_pwd.lock().await;
            ufrag_pwd.remote_ufrag = remote_ufrag.to_owned();
            ufrag_pwd.remote_pwd = remote_pwd.to_owned();
        }
        self.internal.start_checks_if_ready(&stream).await;
        Ok(())
    }

    /// Snapshot of the component's local candidates.
    pub async fn get_local_candidates(
        &self,
        stream_id: u32,
        component_id: u16,
    ) -> Result<Vec<Arc<dyn Candidate + Send + Sync>>> {
        let component = self.internal.get_component(stream_id, component_id).await?;
        Ok(component.local_candidates().await)
    }

    /// Appends remote candidates and (re)builds the check list.
    pub async fn set_remote_candidates(
        &self,
        stream_id: u32,
        component_id: u16,
        candidates: Vec<Arc<dyn Candidate + Send + Sync>>,
    ) -> Result<()> {
        let stream = self.internal.get_stream(stream_id).await?;
        let component = stream
            .component(component_id)
            .ok_or(Error::ErrComponentNotFound)?;

        for c in &candidates {
            c.set_component(component_id);
            self.internal
                .add_remote_candidate(&stream, &component, c)
                .await;
        }

        self.internal.start_checks_if_ready(&stream).await;
        Ok(())
    }

    /// Sends one datagram over the selected pair of the component.
    pub async fn send(&self, stream_id: u32, component_id: u16, buf: &[u8]) -> Result<usize> {
        let component = self.internal.get_component(stream_id, component_id).await?;
        let Some(pair) = component.selected_pair() else {
            return Err(Error::ErrNotReady);
        };
        pair.write(buf).await
    }

    /// Registers the upper-layer sink for inbound application data on
    /// the component.
    pub async fn attach_recv(
        &self,
        stream_id: u32,
        component_id: u16,
        on_recv: OnRecvFn,
    ) -> Result<()> {
        let component = self.internal.get_component(stream_id, component_id).await?;
        component.on_recv.store(Some(Arc::new(Mutex::new(on_recv))));
        Ok(())
    }

    /// Tears the stream down: cancels its transactions synchronously,
    /// fails its pairs, closes its sockets. No callback fires for the
    /// stream afterwards.
    pub async fn remove_stream(&self, stream_id: u32) -> Result<()> {
        self.internal.remove_stream(stream_id).await
    }

    /// Constrains the ephemeral ports host candidates of the component
    /// bind to.
    pub async fn set_port_range(
        &self,
        stream_id: u32,
        component_id: u16,
        min_port: u16,
        max_port: u16,
    ) -> Result<()> {
        if min_port > max_port {
            return Err(Error::ErrInvertedPortRange);
        }
        let component = self.internal.get_component(stream_id, component_id).await?;
        *component.port_range.lock().unwrap() = Some((min_port, max_port));
        Ok(())
    }

    /// The agent's current role; flips at most once, on role conflict.
    pub fn role(&self) -> Role {
        self.internal.role()
    }

    /// The selected pair of a component, once nominated.
    pub async fn get_selected_pair(
        &self,
        stream_id: u32,
        component_id: u16,
    ) -> Result<Option<Arc<CandidatePair>>> {
        let component = self.internal.get_component(stream_id, component_id).await?;
        Ok(component.selected_pair())
    }

    /// The connectivity state of a component.
    pub async fn component_state(
        &self,
        stream_id: u32,
        component_id: u16,
    ) -> Result<crate::state::ComponentState> {
        let component = self.internal.get_component(stream_id, component_id).await?;
        Ok(component.state())
    }

    /// Shuts everything down: removes all streams, cancels the
    /// resolver, stops event delivery.
    pub async fn close(&self) -> Result<()> {
        if self.internal.done.swap(true, Ordering::SeqCst) {
            return Err(Error::ErrClosed);
        }

        let stream_ids: Vec<u32> = {
            let streams = self.internal.streams.lock().await;
            streams.keys().copied().collect()
        };
        for stream_id in stream_ids {
            let _ = self.internal.remove_stream(stream_id).await;
        }

        self.internal.resolver.close();
        Ok(())
    }
}

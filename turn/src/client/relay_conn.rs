use std::any::Any;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use stun::attributes::*;
use stun::error_code::*;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::{Nonce, Realm, Username};
use stun::transaction::TransactionResult;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;
use util::Conn;

use crate::client::binding::BindingManager;
use crate::client::periodic_timer::*;
use crate::client::permission::*;
use crate::error::*;
use crate::proto::chandata::ChannelData;
use crate::proto::data::Data;
use crate::proto::lifetime::Lifetime;
use crate::proto::peeraddr::PeerAddress;

const PERM_REFRESH_INTERVAL: Duration = Duration::from_secs(120);

/// One datagram handed up from the relay: payload plus the peer it came
/// from (via Data indication or ChannelData).
pub struct InboundData {
    pub data: Vec<u8>,
    pub from: SocketAddr,
}

/// What a RelayConn needs from the client that owns the underlying
/// socket to the TURN server.
#[async_trait]
pub trait RelayConnObserver {
    fn turn_server_addr(&self) -> SocketAddr;
    fn username(&self) -> Username;
    fn realm(&self) -> Realm;
    async fn write_to(&self, data: &[u8], to: SocketAddr) -> Result<usize>;
    async fn perform_transaction(
        &mut self,
        msg: &Message,
        to: SocketAddr,
        ignore_result: bool,
    ) -> Result<TransactionResult>;
}

pub struct RelayConnConfig {
    pub relayed_addr: SocketAddr,
    pub integrity: MessageIntegrity,
    pub nonce: Nonce,
    pub lifetime: Duration,
    pub binding_mgr: Arc<Mutex<BindingManager>>,
    pub read_ch_rx: mpsc::Receiver<InboundData>,
}

/// Relayed transport address presented as a [`Conn`]: `local_addr` is
/// the TURN-allocated address, sends go out as Send indications or
/// ChannelData, receives come from the client's demultiplexer.
pub struct RelayConn {
    relayed_addr: SocketAddr,
    read_ch_rx: Mutex<mpsc::Receiver<InboundData>>,
    internal: Arc<Mutex<RelayConnInternal>>,
    refresh_alloc_timer: PeriodicTimer,
    refresh_perms_timer: PeriodicTimer,
}

impl RelayConn {
    pub async fn new(
        observer: Arc<Mutex<dyn RelayConnObserver + Send + Sync>>,
        config: RelayConnConfig,
    ) -> Self {
        log::debug!("initial lifetime: {} seconds", config.lifetime.as_secs());

        let internal = Arc::new(Mutex::new(RelayConnInternal {
            observer,
            relayed_addr: config.relayed_addr,
            perm_map: HashMap::new(),
            binding_mgr: config.binding_mgr,
            integrity: config.integrity,
            nonce: config.nonce,
            lifetime: config.lifetime,
        }));

        let c = RelayConn {
            relayed_addr: config.relayed_addr,
            read_ch_rx: Mutex::new(config.read_ch_rx),
            refresh_alloc_timer: PeriodicTimer::new(TimerIdRefresh::Alloc, config.lifetime / 2),
            refresh_perms_timer: PeriodicTimer::new(TimerIdRefresh::Perms, PERM_REFRESH_INTERVAL),
            internal,
        };

        if c.refresh_alloc_timer
            .start(Arc::clone(&c.internal))
            .await
        {
            log::debug!("refresh_alloc_timer started");
        }
        if c.refresh_perms_timer
            .start(Arc::clone(&c.internal))
            .await
        {
            log::debug!("refresh_perms_timer started");
        }

        c
    }

    /// Binds a channel to `peer` so subsequent sends use the 4-byte
    /// ChannelData framing instead of Send indications.
    pub async fn bind(&self, peer: SocketAddr) -> Result<()> {
        let mut internal = self.internal.lock().await;
        internal.bind(peer).await
    }
}

#[async_trait]
impl Conn for RelayConn {
    async fn connect(&self, _addr: SocketAddr) -> std::result::Result<(), util::Error> {
        Err(util::Error::Other("connect is not applicable".to_owned()))
    }

    async fn recv(&self, buf: &mut [u8]) -> std::result::Result<usize, util::Error> {
        let (n, _) = self.recv_from(buf).await?;
        Ok(n)
    }

    async fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> std::result::Result<(usize, SocketAddr), util::Error> {
        let mut read_ch_rx = self.read_ch_rx.lock().await;
        match read_ch_rx.recv().await {
            Some(ib) => {
                let n = ib.data.len().min(buf.len());
                buf[..n].copy_from_slice(&ib.data[..n]);
                Ok((n, ib.from))
            }
            None => Err(util::Error::ErrClosed),
        }
    }

    async fn send(&self, _buf: &[u8]) -> std::result::Result<usize, util::Error> {
        Err(util::Error::ErrNoRemoteAddr)
    }

    async fn send_to(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> std::result::Result<usize, util::Error> {
        let mut internal = self.internal.lock().await;
        internal
            .send_to(buf, target)
            .await
            .map_err(|err| util::Error::Other(err.to_string()))
    }

    fn local_addr(&self) -> std::result::Result<SocketAddr, util::Error> {
        Ok(self.relayed_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    async fn close(&self) -> std::result::Result<(), util::Error> {
        self.refresh_alloc_timer.stop().await;
        self.refresh_perms_timer.stop().await;

        let mut internal = self.internal.lock().await;
        internal
            .close()
            .await
            .map_err(|err| util::Error::Other(err.to_string()))
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

struct RelayConnInternal {
    observer: Arc<Mutex<dyn RelayConnObserver + Send + Sync>>,
    relayed_addr: SocketAddr,
    perm_map: HashMap<IpAddr, Permission>,
    binding_mgr: Arc<Mutex<BindingManager>>,
    integrity: MessageIntegrity,
    nonce: Nonce,
    lifetime: Duration,
}

impl RelayConnInternal {
    /// Sends `data` to `peer` over the relay, installing a permission
    /// first when none is held.
    async fn send_to(&mut self, data: &[u8], peer: SocketAddr) -> Result<usize> {
        if !self
            .perm_map
            .get(&peer.ip())
            .map(|p| p.state() == PermState::Permitted)
            .unwrap_or(false)
        {
            self.create_permission(peer).await?;
        }

        let bound = {
            let bm = self.binding_mgr.lock().await;
            bm.find_by_addr(&peer)
        };

        if let Some(binding) = bound {
            let mut ch_data = ChannelData {
                data: data.to_vec(),
                number: binding.number,
                raw: vec![],
            };
            ch_data.encode();
            let obs = self.observer.lock().await;
            let turn_server_addr = obs.turn_server_addr();
            obs.write_to(&ch_data.raw, turn_server_addr).await
        } else {
            let mut msg = Message::new();
            msg.build(&[
                Box::new(TransactionId::new()),
                Box::new(MessageType::new(METHOD_SEND, MessageClass::Indication)),
                Box::new(Data(data.to_vec())),
                Box::new(PeerAddress {
                    ip: peer.ip(),
                    port: peer.port(),
                }),
            ])?;
            // Indications are fire-and-forget, no retransmission.
            let obs = self.observer.lock().await;
            let turn_server_addr = obs.turn_server_addr();
            obs.write_to(&msg.raw, turn_server_addr).await?;
            Ok(data.len())
        }
    }

    async fn create_permission(&mut self, peer: SocketAddr) -> Result<()> {
        let res = self
            .transact_with_auth_retry(|tid, username, realm, nonce, integrity| {
                let mut msg = Message::new();
                msg.build(&[
                    Box::new(tid),
                    Box::new(MessageType::new(
                        METHOD_CREATE_PERMISSION,
                        MessageClass::Request,
                    )),
                    Box::new(PeerAddress {
                        ip: peer.ip(),
                        port: peer.port(),
                    }),
                    Box::new(username),
                    Box::new(realm),
                    Box::new(nonce),
                    Box::new(integrity),
                ])?;
                Ok(msg)
            })
            .await?;

        if res.typ.class == MessageClass::ErrorResponse {
            let mut code = ErrorCodeAttribute::default();
            let _ = code.get_from(&res);
            return Err(Error::Other(format!("{} (error {})", res.typ, code)));
        }

        let perm = Permission::default();
        perm.set_state(PermState::Permitted);
        self.perm_map.insert(peer.ip(), perm);
        Ok(())
    }

    async fn bind(&mut self, peer: SocketAddr) -> Result<()> {
        let binding = {
            let mut bm = self.binding_mgr.lock().await;
            bm.create(peer).ok_or(Error::ErrBindingExists)?
        };

        let result = self
            .transact_with_auth_retry(|tid, username, realm, nonce, integrity| {
                let mut msg = Message::new();
                msg.build(&[
                    Box::new(tid),
                    Box::new(MessageType::new(METHOD_CHANNEL_BIND, MessageClass::Request)),
                    Box::new(binding.number),
                    Box::new(PeerAddress {
                        ip: peer.ip(),
                        port: peer.port(),
                    }),
                    Box::new(username),
                    Box::new(realm),
                    Box::new(nonce),
                    Box::new(integrity),
                ])?;
                Ok(msg)
            })
            .await;

        match result {
            Ok(res) if res.typ.class == MessageClass::SuccessResponse => Ok(()),
            Ok(res) => {
                let mut bm = self.binding_mgr.lock().await;
                bm.delete_by_addr(&peer);
                let mut code = ErrorCodeAttribute::default();
                let _ = code.get_from(&res);
                Err(Error::Other(format!("{} (error {})", res.typ, code)))
            }
            Err(err) => {
                let mut bm = self.binding_mgr.lock().await;
                bm.delete_by_addr(&peer);
                Err(err)
            }
        }
    }

    /// Refresh with the current lifetime; `lifetime` zero releases the
    /// allocation.
    async fn refresh_allocation(&mut self, lifetime: Duration, dont_wait: bool) -> Result<()> {
        let res = {
            let msg = {
                let obs = self.observer.lock().await;
                let mut msg = Message::new();
                msg.build(&[
                    Box::new(TransactionId::new()),
                    Box::new(MessageType::new(METHOD_REFRESH, MessageClass::Request)),
                    Box::new(Lifetime(lifetime)),
                    Box::new(obs.username()),
                    Box::new(obs.realm()),
                    Box::new(self.nonce.clone()),
                    Box::new(self.integrity.clone()),
                ])?;
                msg
            };
            let mut obs = self.observer.lock().await;
            let turn_server_addr = obs.turn_server_addr();
            obs.perform_transaction(&msg, turn_server_addr, dont_wait)
                .await?
        };

        if dont_wait {
            return Ok(());
        }

        let res = res.msg;
        if res.typ.class == MessageClass::ErrorResponse {
            let mut code = ErrorCodeAttribute::default();
            let _ = code.get_from(&res);
            if code.code == CODE_STALE_NONCE {
                self.set_nonce_from_msg(&res);
                return Err(Error::ErrTryAgain);
            }
            return Err(Error::Other(format!("{} (error {})", res.typ, code)));
        }

        let mut updated = Lifetime::default();
        if updated.get_from(&res).is_ok() {
            self.lifetime = updated.0;
        }
        Ok(())
    }

    async fn refresh_permissions(&mut self) -> Result<()> {
        let peers: Vec<IpAddr> = self.perm_map.keys().copied().collect();
        for ip in peers {
            // Port is irrelevant for permissions; any port on the IP.
            let peer = SocketAddr::new(ip, 0);
            if let Err(err) = self.create_permission(peer).await {
                log::warn!("failed to refresh permission for {}: {}", ip, err);
            }
        }
        Ok(())
    }

    fn set_nonce_from_msg(&mut self, msg: &Message) {
        // Stale nonce: the server handed us a fresh one to retry with.
        match Nonce::get_from_as(msg, ATTR_NONCE) {
            Ok(nonce) => {
                self.nonce = nonce;
                log::debug!("refreshed NONCE from 438");
            }
            Err(_) => log::warn!("no NONCE in 438 error response"),
        }
    }

    /// Runs one authenticated request, retrying a single time with the
    /// fresh nonce when the server answers 438 Stale Nonce.
    async fn transact_with_auth_retry<F>(&mut self, build: F) -> Result<Message>
    where
        F: Fn(
            TransactionId,
            Username,
            Realm,
            Nonce,
            MessageIntegrity,
        ) -> Result<Message>,
    {
        for attempt in 0..2 {
            let msg = {
                let obs = self.observer.lock().await;
                build(
                    TransactionId::new(),
                    obs.username(),
                    obs.realm(),
                    self.nonce.clone(),
                    self.integrity.clone(),
                )?
            };

            let res = {
                let mut obs = self.observer.lock().await;
                let turn_server_addr = obs.turn_server_addr();
                obs.perform_transaction(&msg, turn_server_addr, false)
                    .await?
            };
            let res = res.msg;

            if res.typ.class == MessageClass::ErrorResponse && attempt == 0 {
                let mut code = ErrorCodeAttribute::default();
                let _ = code.get_from(&res);
                if code.code == CODE_STALE_NONCE {
                    self.set_nonce_from_msg(&res);
                    continue;
                }
            }
            return Ok(res);
        }
        unreachable!()
    }

    async fn close(&mut self) -> Result<()> {
        self.refresh_allocation(Duration::from_secs(0), true).await
    }
}

#[async_trait]
impl PeriodicTimerTimeoutHandler for RelayConnInternal {
    async fn on_timeout(&mut self, id: TimerIdRefresh) {
        log::debug!("refresh timer {:?} expired", id);
        match id {
            TimerIdRefresh::Alloc => {
                let lifetime = self.lifetime;
                let mut result = self.refresh_allocation(lifetime, false).await;
                if result == Err(Error::ErrTryAgain) {
                    result = self.refresh_allocation(lifetime, false).await;
                }
                if let Err(err) = result {
                    log::warn!("refresh of allocation failed: {}", err);
                }
            }
            TimerIdRefresh::Perms => {
                if let Err(err) = self.refresh_permissions().await {
                    log::warn!("refresh of permissions failed: {}", err);
                }
            }
        }
    }
}

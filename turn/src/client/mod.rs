#[cfg(test)]
mod client_test;

pub mod binding;
pub mod periodic_timer;
pub mod permission;
pub mod relay_conn;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use binding::*;
use relay_conn::*;
use stun::attributes::*;
use stun::error_code::*;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::*;
use stun::transaction::*;
use tokio::sync::{mpsc, Mutex};
use util::Conn;

use crate::error::*;
use crate::proto::chandata::*;
use crate::proto::data::Data;
use crate::proto::lifetime::*;
use crate::proto::peeraddr::*;
use crate::proto::relayaddr::*;
use crate::proto::reqtrans::*;
use crate::proto::PROTO_UDP;

const MAX_DATA_BUFFER_SIZE: usize = u16::MAX as usize;
const MAX_READ_QUEUE_SIZE: usize = 1024;

/// Config for one TURN client. Addresses arrive resolved; hostname
/// resolution belongs to the embedder's resolver.
pub struct ClientConfig {
    pub turn_serv_addr: SocketAddr,
    pub username: String,
    pub password: String,
    pub realm: String,
    pub software: String,
    pub rtx: RtxConfig,
    pub conn: Arc<dyn Conn + Send + Sync>,
}

struct ClientInternal {
    conn: Arc<dyn Conn + Send + Sync>,
    turn_serv_addr: SocketAddr,
    username: Username,
    password: String,
    realm: Realm,
    software: Software,
    integrity: MessageIntegrity,
    tr_map: Arc<Mutex<TransactionMap>>,
    binding_mgr: Arc<Mutex<BindingManager>>,
    rtx: RtxConfig,
    read_ch_tx: Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
    done_tx: Mutex<Option<mpsc::Sender<()>>>,
}

#[async_trait]
impl RelayConnObserver for ClientInternal {
    fn turn_server_addr(&self) -> SocketAddr {
        self.turn_serv_addr
    }

    fn username(&self) -> Username {
        self.username.clone()
    }

    fn realm(&self) -> Realm {
        self.realm.clone()
    }

    async fn write_to(&self, data: &[u8], to: SocketAddr) -> Result<usize> {
        Ok(self.conn.send_to(data, to).await?)
    }

    /// Runs one STUN transaction against `to` with the configured
    /// retransmission schedule.
    async fn perform_transaction(
        &mut self,
        msg: &Message,
        to: SocketAddr,
        ignore_result: bool,
    ) -> Result<TransactionResult> {
        let mut tr = Transaction::new(TransactionConfig {
            id: msg.transaction_id,
            raw: msg.raw.clone(),
            to: Some(to),
            rtx: self.rtx,
            ignore_result,
        });
        let result_ch_rx = tr.get_result_channel();

        log::trace!("start {} transaction {} to {}", msg.typ, msg.transaction_id, to);
        {
            let mut tm = self.tr_map.lock().await;
            tm.insert(tr)?;
        }

        self.conn.send_to(&msg.raw, to).await?;

        {
            let mut tm = self.tr_map.lock().await;
            if let Some(tr) = tm.get(&msg.transaction_id) {
                tr.start_rtx_timer(Arc::clone(&self.conn), Arc::clone(&self.tr_map));
            }
        }

        if ignore_result {
            return Ok(TransactionResult::default());
        }

        if let Some(mut result_ch_rx) = result_ch_rx {
            match result_ch_rx.recv().await {
                Some(tr) => Ok(tr),
                None => Err(Error::ErrTransactionClosed),
            }
        } else {
            Err(Error::ErrWaitForResultOnNonResultTransaction)
        }
    }
}

impl ClientInternal {
    fn new(config: ClientConfig) -> Self {
        ClientInternal {
            conn: Arc::clone(&config.conn),
            turn_serv_addr: config.turn_serv_addr,
            username: Username::new(ATTR_USERNAME, config.username),
            password: config.password,
            realm: Realm::new(ATTR_REALM, config.realm),
            software: Software::new(ATTR_SOFTWARE, config.software),
            integrity: MessageIntegrity::new_short_term_integrity(String::new()),
            tr_map: Arc::new(Mutex::new(TransactionMap::new())),
            binding_mgr: Arc::new(Mutex::new(BindingManager::new())),
            rtx: config.rtx,
            read_ch_tx: Arc::new(Mutex::new(None)),
            done_tx: Mutex::new(None),
        }
    }

    /// Starts the read loop that demultiplexes everything arriving on
    /// the socket to the TURN server.
    async fn listen(&self) -> Result<()> {
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        {
            let mut done = self.done_tx.lock().await;
            if done.is_some() {
                return Err(Error::ErrAlreadyClosed);
            }
            *done = Some(done_tx);
        }

        let conn = Arc::clone(&self.conn);
        let tr_map = Arc::clone(&self.tr_map);
        let read_ch_tx = Arc::clone(&self.read_ch_tx);
        let binding_mgr = Arc::clone(&self.binding_mgr);

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATA_BUFFER_SIZE];
            loop {
                let (n, from) = tokio::select! {
                    _ = done_rx.recv() => {
                        log::debug!("exiting turn read loop");
                        break;
                    }
                    result = conn.recv_from(&mut buf) => match result {
                        Ok((n, from)) => (n, from),
                        Err(err) => {
                            log::debug!("exiting turn read loop: {}", err);
                            break;
                        }
                    }
                };

                if let Err(err) =
                    ClientInternal::handle_inbound(&read_ch_tx, &buf[..n], from, &tr_map, &binding_mgr)
                        .await
                {
                    log::debug!("discarded inbound turn packet: {}", err);
                }
            }
        });

        Ok(())
    }

    /// Routes one inbound packet: STUN responses to their transaction,
    /// Data indications and ChannelData to the relay read queue.
    async fn handle_inbound(
        read_ch_tx: &Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
        data: &[u8],
        from: SocketAddr,
        tr_map: &Arc<Mutex<TransactionMap>>,
        binding_mgr: &Arc<Mutex<BindingManager>>,
    ) -> Result<()> {
        if is_message(data) {
            ClientInternal::handle_stun_message(tr_map, read_ch_tx, data, from).await
        } else if ChannelData::is_channel_data(data) {
            ClientInternal::handle_channel_data(binding_mgr, read_ch_tx, data).await
        } else {
            log::trace!("non-STUN/TURN packet from {}, unhandled", from);
            Ok(())
        }
    }

    async fn handle_stun_message(
        tr_map: &Arc<Mutex<TransactionMap>>,
        read_ch_tx: &Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
        data: &[u8],
        mut from: SocketAddr,
    ) -> Result<()> {
        let msg = Message::unmarshal_binary(data)?;

        if msg.typ.class == MessageClass::Request {
            return Err(Error::ErrUnexpectedStunrequestMessage);
        }

        if msg.typ.class == MessageClass::Indication {
            if msg.typ.method == METHOD_DATA {
                let mut peer_addr = PeerAddress::default();
                peer_addr.get_from(&msg)?;
                from = SocketAddr::new(peer_addr.ip, peer_addr.port);

                let mut data = Data::default();
                data.get_from(&msg)?;

                log::trace!("data indication received from {}", from);
                ClientInternal::handle_inbound_relay_conn(read_ch_tx, &data.0, from).await?;
            }
            return Ok(());
        }

        // Success or error response: route to the waiting transaction.
        let mut tm = tr_map.lock().await;
        if let Some(mut tr) = tm.delete(&msg.transaction_id) {
            tr.stop_rtx_timer();
            let retries = tr.retries();
            if !tr
                .write_result(TransactionResult {
                    msg,
                    from,
                    retries,
                    ..Default::default()
                })
                .await
            {
                log::debug!("no listener for transaction from {}", from);
            }
        } else {
            log::debug!("no transaction for inbound {}", msg);
        }

        Ok(())
    }

    async fn handle_channel_data(
        binding_mgr: &Arc<Mutex<BindingManager>>,
        read_ch_tx: &Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
        data: &[u8],
    ) -> Result<()> {
        let mut ch_data = ChannelData {
            raw: data.to_vec(),
            ..Default::default()
        };
        ch_data.decode()?;

        let addr = {
            let bm = binding_mgr.lock().await;
            bm.find_by_number(ch_data.number.0)
                .map(|b| b.addr)
                .ok_or(Error::ErrChannelBindNotFound)?
        };

        log::trace!("channel data received from {} ({})", addr, ch_data.number);
        ClientInternal::handle_inbound_relay_conn(read_ch_tx, &ch_data.data, addr).await
    }

    async fn handle_inbound_relay_conn(
        read_ch_tx: &Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
        data: &[u8],
        from: SocketAddr,
    ) -> Result<()> {
        let read_ch_tx_opt = read_ch_tx.lock().await;
        if let Some(tx) = &*read_ch_tx_opt {
            if tx
                .try_send(InboundData {
                    data: data.to_vec(),
                    from,
                })
                .is_err()
            {
                log::warn!("relay receive buffer full");
            }
            Ok(())
        } else {
            Err(Error::ErrNoAllocation)
        }
    }

    /// Allocates a relayed address. The first attempt goes out without
    /// credentials; the expected 401 supplies REALM and NONCE for the
    /// authenticated retry. A 437 Allocation Mismatch is retried once
    /// with a fresh transaction id.
    async fn allocate(&mut self) -> Result<RelayConnConfig> {
        {
            let read_ch_tx = self.read_ch_tx.lock().await;
            if read_ch_tx.is_some() {
                return Err(Error::ErrOneAllocateOnly);
            }
        }

        let mut msg = Message::new();
        msg.build(&[
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_ALLOCATE, MessageClass::Request)),
            Box::new(RequestedTransport {
                protocol: PROTO_UDP,
            }),
        ])?;

        let tr_res = self
            .perform_transaction(&msg, self.turn_serv_addr, false)
            .await?;
        let res = tr_res.msg;

        // Anonymous allocate failed; authenticate with the realm and
        // nonce the server just told us.
        let nonce = Nonce::get_from_as(&res, ATTR_NONCE).map_err(|_| Error::ErrNonceExpected)?;
        self.realm = Realm::get_from_as(&res, ATTR_REALM).map_err(|_| Error::ErrRealmExpected)?;
        self.integrity = MessageIntegrity::new_long_term_integrity(
            self.username.text.clone(),
            self.realm.text.clone(),
            self.password.clone(),
        );

        let mut res = self.allocate_with_auth(&nonce).await?;

        if res.typ.class == MessageClass::ErrorResponse {
            let mut code = ErrorCodeAttribute::default();
            let code_known = code.get_from(&res).is_ok();
            if code_known && code.code == CODE_ALLOC_MISMATCH {
                // One retry with a fresh transaction id.
                log::debug!("437 allocation mismatch, retrying once");
                res = self.allocate_with_auth(&nonce).await?;
            }
        }

        if res.typ.class == MessageClass::ErrorResponse {
            let mut code = ErrorCodeAttribute::default();
            return if code.get_from(&res).is_ok() {
                Err(Error::ErrAllocateFailed(format!("{} (error {})", res.typ, code)))
            } else {
                Err(Error::ErrAllocateFailed(format!("{}", res.typ)))
            };
        }

        let mut relayed = RelayedAddress::default();
        relayed.get_from(&res)?;
        let relayed_addr = SocketAddr::new(relayed.ip, relayed.port);

        let mut lifetime = Lifetime(DEFAULT_LIFETIME);
        let _ = lifetime.get_from(&res);

        let (read_ch_tx, read_ch_rx) = mpsc::channel(MAX_READ_QUEUE_SIZE);
        {
            let mut read_ch_tx_opt = self.read_ch_tx.lock().await;
            *read_ch_tx_opt = Some(read_ch_tx);
        }

        Ok(RelayConnConfig {
            relayed_addr,
            integrity: self.integrity.clone(),
            nonce,
            lifetime: lifetime.0,
            binding_mgr: Arc::clone(&self.binding_mgr),
            read_ch_rx,
        })
    }

    async fn allocate_with_auth(&mut self, nonce: &Nonce) -> Result<Message> {
        let mut msg = Message::new();
        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_ALLOCATE, MessageClass::Request)),
            Box::new(RequestedTransport {
                protocol: PROTO_UDP,
            }),
            Box::new(self.username.clone()),
            Box::new(self.realm.clone()),
            Box::new(nonce.clone()),
        ];
        if !self.software.text.is_empty() {
            setters.push(Box::new(self.software.clone()));
        }
        setters.push(Box::new(self.integrity.clone()));
        msg.build(&setters)?;

        let tr_res = self
            .perform_transaction(&msg, self.turn_serv_addr, false)
            .await?;
        Ok(tr_res.msg)
    }

    async fn close(&mut self) {
        {
            let mut done_tx = self.done_tx.lock().await;
            done_tx.take();
        }
        {
            let mut read_ch_tx = self.read_ch_tx.lock().await;
            read_ch_tx.take();
        }
        {
            let mut tm = self.tr_map.lock().await;
            tm.close_and_delete_all();
        }
    }
}

/// TURN client. One allocation per client; the allocation is handed
/// back as a [`RelayConn`].
#[derive(Clone)]
pub struct Client {
    client_internal: Arc<Mutex<ClientInternal>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            client_internal: Arc::new(Mutex::new(ClientInternal::new(config))),
        }
    }

    /// Starts the inbound read loop. Must run before `allocate`.
    pub async fn listen(&self) -> Result<()> {
        let ci = self.client_internal.lock().await;
        ci.listen().await
    }

    /// Allocates a relayed transport address.
    pub async fn allocate(&self) -> Result<RelayConn> {
        let config = {
            let mut ci = self.client_internal.lock().await;
            ci.allocate().await?
        };

        let observer: Arc<Mutex<dyn RelayConnObserver + Send + Sync>> =
            self.client_internal.clone();
        Ok(RelayConn::new(observer, config).await)
    }

    pub async fn close(&self) -> Result<()> {
        let mut ci = self.client_internal.lock().await;
        ci.close().await;
        Ok(())
    }
}


use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;
use util::Conn;

use crate::error::*;
use crate::message::*;

/// RFC 5389 section 7.2.1 retransmission defaults: Rc total sends with
/// doubling intervals, then a final wait of Rm times the initial RTO.
pub const DEFAULT_RTO: Duration = Duration::from_millis(500);
pub const DEFAULT_RC: u16 = 7;
pub const DEFAULT_RM: u16 = 16;

/// Single-send deadline over reliable transport: the worst-case duration
/// of the unreliable schedule.
pub const RELIABLE_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(39500);

/// Retransmission knobs. Rc and the initial RTO are agent options.
#[derive(Debug, Clone, Copy)]
pub struct RtxConfig {
    pub rto: Duration,
    pub rc: u16,
    pub rm: u16,
    pub reliable: bool,
}

impl Default for RtxConfig {
    fn default() -> Self {
        RtxConfig {
            rto: DEFAULT_RTO,
            rc: DEFAULT_RC,
            rm: DEFAULT_RM,
            reliable: false,
        }
    }
}

impl RtxConfig {
    /// Total sends this schedule will make.
    pub fn max_sends(&self) -> u16 {
        if self.reliable {
            1
        } else {
            self.rc
        }
    }

    /// Deadline after the last send.
    pub fn final_timeout(&self) -> Duration {
        if self.reliable {
            RELIABLE_TRANSACTION_TIMEOUT
        } else {
            self.rto * u32::from(self.rm)
        }
    }
}

/// Everything a finished transaction hands back.
#[derive(Debug)]
pub struct TransactionResult {
    pub msg: Message,
    pub from: SocketAddr,
    pub retries: u16,
    pub err: Option<Error>,
}

impl Default for TransactionResult {
    fn default() -> Self {
        TransactionResult {
            msg: Message::default(),
            from: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            retries: 0,
            err: None,
        }
    }
}

/// Config for one outgoing request.
#[derive(Default)]
pub struct TransactionConfig {
    pub id: TransactionId,
    pub raw: Vec<u8>,
    pub to: Option<SocketAddr>,
    pub rtx: RtxConfig,
    // True to throw away the result (fire-and-forget indications).
    pub ignore_result: bool,
}

/// One in-flight request: the encoded bytes, its destination and the
/// retransmission clock. Destroyed on the final response or when the
/// schedule runs dry.
pub struct Transaction {
    pub id: TransactionId,
    pub raw: Vec<u8>,
    pub to: Option<SocketAddr>,
    rtx: RtxConfig,
    n_rtx: Arc<AtomicU16>,
    interval_ms: Arc<AtomicU64>,
    timer_ch_tx: Option<mpsc::Sender<()>>,
    result_ch_tx: Option<mpsc::Sender<TransactionResult>>,
    result_ch_rx: Option<mpsc::Receiver<TransactionResult>>,
}

impl Transaction {
    pub fn new(config: TransactionConfig) -> Self {
        let (result_ch_tx, result_ch_rx) = if config.ignore_result {
            (None, None)
        } else {
            let (tx, rx) = mpsc::channel(1);
            (Some(tx), Some(rx))
        };

        Transaction {
            id: config.id,
            raw: config.raw,
            to: config.to,
            rtx: config.rtx,
            n_rtx: Arc::new(AtomicU16::new(0)),
            interval_ms: Arc::new(AtomicU64::new(config.rtx.rto.as_millis() as u64)),
            timer_ch_tx: None,
            result_ch_tx,
            result_ch_rx,
        }
    }

    /// Starts the retransmission clock. The caller has already made the
    /// initial send.
    pub fn start_rtx_timer(
        &mut self,
        conn: Arc<dyn Conn + Send + Sync>,
        tr_map: Arc<Mutex<TransactionMap>>,
    ) {
        let (timer_ch_tx, mut timer_ch_rx) = mpsc::channel(1);
        self.timer_ch_tx = Some(timer_ch_tx);
        let (id, rtx) = (self.id, self.rtx);
        let (n_rtx, interval_ms) = (Arc::clone(&self.n_rtx), Arc::clone(&self.interval_ms));

        tokio::spawn(async move {
            let mut done = false;
            while !done {
                let sends_so_far = n_rtx.load(Ordering::SeqCst) + 1;
                let wait = if sends_so_far >= rtx.max_sends() {
                    rtx.final_timeout()
                } else {
                    Duration::from_millis(interval_ms.load(Ordering::SeqCst))
                };

                let timer = tokio::time::sleep(wait);
                tokio::pin!(timer);

                tokio::select! {
                    _ = timer.as_mut() => {
                        if sends_so_far >= rtx.max_sends() {
                            Transaction::on_final_timeout(&tr_map, id).await;
                            done = true;
                        } else {
                            n_rtx.fetch_add(1, Ordering::SeqCst);
                            interval_ms.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                                Some(v.saturating_mul(2))
                            }).ok();
                            done = Transaction::on_rtx_timeout(&conn, &tr_map, id).await;
                        }
                    }
                    _ = timer_ch_rx.recv() => done = true,
                }
            }
        });
    }

    async fn on_rtx_timeout(
        conn: &Arc<dyn Conn + Send + Sync>,
        tr_map: &Arc<Mutex<TransactionMap>>,
        id: TransactionId,
    ) -> bool {
        let mut tm = tr_map.lock().await;
        let (raw, to, n_rtx) = match tm.find(&id) {
            Some(tr) => (tr.raw.clone(), tr.to, tr.retries()),
            None => return true, // already gone
        };

        let Some(to) = to else {
            return true;
        };

        log::trace!("retransmitting transaction {} to {} (n_rtx={})", id, to, n_rtx);

        if conn.send_to(&raw, to).await.is_err() {
            if let Some(tr) = tm.delete(&id) {
                let result = TransactionResult {
                    err: Some(Error::ErrTransactionTimeOut),
                    retries: tr.retries(),
                    ..Default::default()
                };
                if !tr.write_result(result).await {
                    log::debug!("no listener for transaction {}", id);
                }
            }
            return true;
        }

        false
    }

    async fn on_final_timeout(tr_map: &Arc<Mutex<TransactionMap>>, id: TransactionId) {
        let mut tm = tr_map.lock().await;
        if let Some(tr) = tm.delete(&id) {
            let result = TransactionResult {
                err: Some(Error::ErrTransactionTimeOut),
                retries: tr.retries(),
                ..Default::default()
            };
            if !tr.write_result(result).await {
                log::debug!("no listener for transaction {}", id);
            }
        }
    }

    /// Stops the retransmission clock.
    pub fn stop_rtx_timer(&mut self) {
        self.timer_ch_tx.take();
    }

    /// Hands the result to whoever is waiting on this transaction.
    pub async fn write_result(&self, res: TransactionResult) -> bool {
        if let Some(tx) = &self.result_ch_tx {
            tx.send(res).await.is_ok()
        } else {
            false
        }
    }

    pub fn get_result_channel(&mut self) -> Option<mpsc::Receiver<TransactionResult>> {
        self.result_ch_rx.take()
    }

    pub fn close(&mut self) {
        self.result_ch_tx.take();
    }

    /// Number of retransmissions made so far.
    pub fn retries(&self) -> u16 {
        self.n_rtx.load(Ordering::SeqCst)
    }
}

/// In-flight transactions keyed by transaction id.
#[derive(Default)]
pub struct TransactionMap {
    map: HashMap<TransactionId, Transaction>,
}

impl TransactionMap {
    pub fn new() -> Self {
        TransactionMap {
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, tr: Transaction) -> Result<()> {
        if self.map.contains_key(&tr.id) {
            return Err(Error::ErrTransactionExists);
        }
        self.map.insert(tr.id, tr);
        Ok(())
    }

    pub fn find(&self, id: &TransactionId) -> Option<&Transaction> {
        self.map.get(id)
    }

    pub fn get(&mut self, id: &TransactionId) -> Option<&mut Transaction> {
        self.map.get_mut(id)
    }

    pub fn delete(&mut self, id: &TransactionId) -> Option<Transaction> {
        self.map.remove(id)
    }

    /// Cancels everything; nothing waiting gets called back.
    pub fn close_and_delete_all(&mut self) {
        for tr in self.map.values_mut() {
            tr.stop_rtx_timer();
            tr.close();
        }
        self.map.clear();
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }
}

const MAX_MESSAGE_SIZE: usize = 1280;

/// Sends `msg` to `to` over `conn` with the full retransmission
/// schedule, reading responses off the same socket until the matching
/// one arrives. The conn must have no other reader for the duration;
/// the gatherer owns its sockets at that point.
pub async fn stun_request(
    conn: &Arc<dyn Conn + Send + Sync>,
    msg: &Message,
    to: SocketAddr,
    rtx: RtxConfig,
) -> Result<Message> {
    conn.send_to(&msg.raw, to).await?;

    let mut sends = 1u16;
    let mut interval = rtx.rto;
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];

    loop {
        let wait = if sends >= rtx.max_sends() {
            rtx.final_timeout()
        } else {
            interval
        };

        let deadline = tokio::time::sleep(wait);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = deadline.as_mut() => {
                    if sends >= rtx.max_sends() {
                        return Err(Error::ErrTransactionTimeOut);
                    }
                    conn.send_to(&msg.raw, to).await?;
                    sends += 1;
                    interval = interval.saturating_mul(2);
                    break;
                }
                result = conn.recv_from(&mut buf) => {
                    let (n, from) = result?;
                    if from != to || !is_message(&buf[..n]) {
                        continue;
                    }
                    let res = match Message::unmarshal_binary(&buf[..n]) {
                        Ok(res) => res,
                        Err(err) => {
                            log::debug!("malformed STUN answer from {}: {}", from, err);
                            continue;
                        }
                    };
                    if res.transaction_id != msg.transaction_id {
                        continue;
                    }
                    return Ok(res);
                }
            }
        }
    }
}

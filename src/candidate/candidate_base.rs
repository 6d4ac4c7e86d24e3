use std::fmt;
use std::net::SocketAddr;
use std::ops::Add;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use crc::{Crc, CRC_32_ISCSI};
use tokio::sync::{broadcast, Mutex};

use super::*;
use crate::error::*;
use crate::rand::generate_cand_id;
use crate::transport::TransportType;

/// Everything the per-type constructors feed into a [`CandidateBase`].
pub struct CandidateBaseConfig {
    pub candidate_id: String,
    pub transport: TransportType,
    pub address: SocketAddr,
    pub component: u16,
    pub priority: u32,
    pub foundation: String,
    /// STUN/TURN server the candidate was learned from, part of the
    /// foundation input.
    pub server: String,
    pub conn: Option<Arc<dyn util::Conn + Send + Sync>>,
}

impl Default for CandidateBaseConfig {
    fn default() -> Self {
        CandidateBaseConfig {
            candidate_id: String::default(),
            transport: TransportType::default(),
            address: SocketAddr::from(([0, 0, 0, 0], 0)),
            component: 0,
            priority: 0,
            foundation: String::default(),
            server: String::default(),
            conn: None,
        }
    }
}

/// Shared state behind every candidate variant. The variants only
/// differ in type, related address and the relay client they hold on
/// to.
pub struct CandidateBase {
    pub(crate) id: String,
    pub(crate) candidate_type: CandidateType,
    pub(crate) transport: TransportType,

    pub(crate) component: AtomicU16,
    pub(crate) address: SocketAddr,
    pub(crate) related_address: Option<CandidateRelatedAddress>,
    pub(crate) server: String,

    pub(crate) last_sent: AtomicU64,
    pub(crate) last_received: AtomicU64,

    pub(crate) conn: Option<Arc<dyn util::Conn + Send + Sync>>,
    pub(crate) closed_ch: Arc<Mutex<Option<broadcast::Sender<()>>>>,

    pub(crate) foundation_override: String,
    pub(crate) priority_override: u32,

    pub(crate) relay_client: Option<Arc<turn::client::Client>>,
}

impl Default for CandidateBase {
    fn default() -> Self {
        Self {
            id: String::new(),
            candidate_type: CandidateType::default(),
            transport: TransportType::Udp,

            component: AtomicU16::new(0),
            address: SocketAddr::new([0, 0, 0, 0].into(), 0),
            related_address: None,
            server: String::new(),

            last_sent: AtomicU64::new(0),
            last_received: AtomicU64::new(0),

            conn: None,
            closed_ch: Arc::new(Mutex::new(None)),

            foundation_override: String::new(),
            priority_override: 0,

            relay_client: None,
        }
    }
}

impl fmt::Display for CandidateBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(related_address) = self.related_address() {
            write!(
                f,
                "{} {} {}{}",
                self.transport(),
                self.candidate_type(),
                self.addr(),
                related_address,
            )
        } else {
            write!(
                f,
                "{} {} {}",
                self.transport(),
                self.candidate_type(),
                self.addr(),
            )
        }
    }
}

#[async_trait]
impl Candidate for CandidateBase {
    fn foundation(&self) -> String {
        if !self.foundation_override.is_empty() {
            return self.foundation_override.clone();
        }

        let mut buf = vec![];
        buf.extend_from_slice(self.candidate_type().to_string().as_bytes());
        buf.extend_from_slice(self.address.ip().to_string().as_bytes());
        buf.extend_from_slice(self.transport().to_string().as_bytes());
        buf.extend_from_slice(self.server.as_bytes());

        let checksum = Crc::<u32>::new(&CRC_32_ISCSI).checksum(&buf);
        format!("{checksum}")
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn component(&self) -> u16 {
        self.component.load(Ordering::SeqCst)
    }

    fn set_component(&self, component: u16) {
        self.component.store(component, Ordering::SeqCst);
    }

    fn transport(&self) -> TransportType {
        self.transport
    }

    fn addr(&self) -> SocketAddr {
        self.address
    }

    /// RFC 5245 section 4.1.2.1:
    /// priority = (2^24)*type pref + (2^8)*local pref + 256 - component.
    fn priority(&self) -> u32 {
        if self.priority_override != 0 {
            return self.priority_override;
        }

        (1 << 24) * u32::from(self.candidate_type().preference())
            + (1 << 8) * u32::from(self.local_preference())
            + (256 - u32::from(self.component()))
    }

    fn related_address(&self) -> Option<CandidateRelatedAddress> {
        self.related_address.as_ref().cloned()
    }

    fn candidate_type(&self) -> CandidateType {
        self.candidate_type
    }

    fn marshal(&self) -> String {
        let mut val = format!(
            "{} {} {} {} {} {} typ {}",
            self.foundation(),
            self.component(),
            self.transport().network_short(),
            self.priority(),
            self.addr().ip(),
            self.addr().port(),
            self.candidate_type()
        );

        if self.transport().is_tcp() {
            val += &format!(" tcptype {}", self.transport().tcp_type_token());
        }

        if let Some(related_address) = self.related_address() {
            val += &format!(
                " raddr {} rport {}",
                related_address.address, related_address.port,
            );
        }

        val
    }

    fn last_received(&self) -> SystemTime {
        UNIX_EPOCH.add(Duration::from_nanos(
            self.last_received.load(Ordering::SeqCst),
        ))
    }

    fn last_sent(&self) -> SystemTime {
        UNIX_EPOCH.add(Duration::from_nanos(self.last_sent.load(Ordering::SeqCst)))
    }

    fn seen(&self, outbound: bool) {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0));

        if outbound {
            self.set_last_sent(d);
        } else {
            self.set_last_received(d);
        }
    }

    async fn write_to(&self, raw: &[u8], dst: &(dyn Candidate + Send + Sync)) -> Result<usize> {
        let n = if let Some(conn) = &self.conn {
            conn.send_to(raw, dst.addr()).await?
        } else {
            0
        };
        self.seen(true);
        Ok(n)
    }

    /// Scope ids do not participate: two candidates naming the same
    /// IPv6 address through different interfaces are the same
    /// candidate.
    fn equal(&self, other: &dyn Candidate) -> bool {
        self.candidate_type() == other.candidate_type()
            && self.transport() == other.transport()
            && self.addr().ip() == other.addr().ip()
            && self.addr().port() == other.addr().port()
            && self.related_address() == other.related_address()
    }

    async fn close(&self) -> Result<()> {
        {
            // Dropping the sender stops the recv loop, when one runs.
            let mut closed_ch = self.closed_ch.lock().await;
            closed_ch.take();
        }

        if let Some(relay_client) = &self.relay_client {
            let _ = relay_client.close().await;
        }

        if let Some(conn) = &self.conn {
            let _ = conn.close().await;
        }

        Ok(())
    }

    fn get_conn(&self) -> Option<&Arc<dyn util::Conn + Send + Sync>> {
        self.conn.as_ref()
    }

    fn get_closed_ch(&self) -> Arc<Mutex<Option<broadcast::Sender<()>>>> {
        self.closed_ch.clone()
    }
}

impl CandidateBase {
    pub fn set_last_received(&self, d: Duration) {
        #[allow(clippy::cast_possible_truncation)]
        self.last_received
            .store(d.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set_last_sent(&self, d: Duration) {
        #[allow(clippy::cast_possible_truncation)]
        self.last_sent.store(d.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Local preference part of the priority. A single address per
    /// transport keeps the default; TCP candidates fold in the RFC
    /// 6544 direction preference.
    pub fn local_preference(&self) -> u16 {
        match self.transport {
            TransportType::Udp => DEFAULT_LOCAL_PREFERENCE,
            // RFC 6544 section 4.2: (2^13) * direction-pref + other-pref,
            // simultaneous-open most preferred for the types we generate.
            TransportType::TcpSo => (1 << 13) * 7 + 8191,
            TransportType::TcpActive => (1 << 13) * 6 + 8191,
            TransportType::TcpPassive => (1 << 13) * 4 + 8191,
        }
    }
}

pub(crate) fn ensure_candidate_id(id: String) -> String {
    if id.is_empty() {
        generate_cand_id()
    } else {
        id
    }
}

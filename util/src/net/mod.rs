#[cfg(test)]
mod net_test;

use std::any::Any;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::conn::{Conn, UdpConn};
use crate::error::*;

/// Queue depth of one virtual socket. Datagrams past this are dropped,
/// matching kernel behavior for a full receive buffer.
const VIRTUAL_SOCKET_BACKLOG: usize = 512;

/// First port handed out for wildcard binds on the virtual network.
const EPHEMERAL_PORT_START: u16 = 49152;

type Datagram = (Vec<u8>, SocketAddr);

/// Socket factory. `Net::new(None)` binds OS UDP sockets;
/// `Net::new(Some(vnet))` binds in-memory sockets routed through `vnet`,
/// so tests exercise the full stack without touching the OS.
#[derive(Clone, Default)]
pub struct Net {
    vnet: Option<Arc<VirtualNet>>,
}

impl Net {
    pub fn new(vnet: Option<Arc<VirtualNet>>) -> Self {
        Net { vnet }
    }

    pub fn is_virtual(&self) -> bool {
        self.vnet.is_some()
    }

    pub async fn bind(&self, laddr: SocketAddr) -> Result<Arc<dyn Conn + Send + Sync>> {
        if let Some(vnet) = &self.vnet {
            Ok(vnet.bind(laddr)?)
        } else {
            Ok(Arc::new(UdpConn::bind(laddr).await?))
        }
    }
}

/// In-memory datagram network: a router table from bound address to the
/// receive queue of the owning socket. Sends to unbound addresses are
/// silently dropped, like UDP into a black hole.
#[derive(Default)]
pub struct VirtualNet {
    router: SyncMutex<HashMap<SocketAddr, mpsc::Sender<Datagram>>>,
    next_port: AtomicU16,
}

impl VirtualNet {
    pub fn new() -> Arc<Self> {
        Arc::new(VirtualNet {
            router: SyncMutex::new(HashMap::new()),
            next_port: AtomicU16::new(EPHEMERAL_PORT_START),
        })
    }

    pub fn bind(self: &Arc<Self>, laddr: SocketAddr) -> Result<Arc<VirtualConn>> {
        let (tx, rx) = mpsc::channel(VIRTUAL_SOCKET_BACKLOG);

        let laddr = {
            let mut router = self.router.lock().unwrap();
            let laddr = if laddr.port() == 0 {
                self.pick_port(&router, laddr.ip())?
            } else {
                laddr
            };
            if router.contains_key(&laddr) {
                return Err(Error::ErrAddrNotAvailable);
            }
            router.insert(laddr, tx);
            laddr
        };

        Ok(Arc::new(VirtualConn {
            net: Arc::clone(self),
            laddr,
            peer: SyncMutex::new(None),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        }))
    }

    fn pick_port(
        &self,
        router: &HashMap<SocketAddr, mpsc::Sender<Datagram>>,
        ip: IpAddr,
    ) -> Result<SocketAddr> {
        for _ in 0..u16::MAX {
            let port = self.next_port.fetch_add(1, Ordering::SeqCst);
            let port = if port < EPHEMERAL_PORT_START {
                self.next_port.store(EPHEMERAL_PORT_START, Ordering::SeqCst);
                EPHEMERAL_PORT_START
            } else {
                port
            };
            let candidate = SocketAddr::new(ip, port);
            if !router.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::ErrPortSpaceExhausted)
    }

    fn unbind(&self, laddr: &SocketAddr) {
        let mut router = self.router.lock().unwrap();
        router.remove(laddr);
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        let tx = {
            let router = self.router.lock().unwrap();
            router.get(&to).cloned()
        };
        if let Some(tx) = tx {
            if tx.try_send((data.to_vec(), from)).is_err() {
                log::debug!("vnet: queue full, dropping {} bytes to {}", data.len(), to);
            }
        } else {
            log::trace!("vnet: no route to {}, dropping {} bytes", to, data.len());
        }
    }
}

/// One bound socket on a [`VirtualNet`].
pub struct VirtualConn {
    net: Arc<VirtualNet>,
    laddr: SocketAddr,
    peer: SyncMutex<Option<SocketAddr>>,
    rx: Mutex<mpsc::Receiver<Datagram>>,
    closed: AtomicBool,
}

#[async_trait]
impl Conn for VirtualConn {
    async fn connect(&self, addr: SocketAddr) -> Result<()> {
        let mut peer = self.peer.lock().unwrap();
        *peer = Some(addr);
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let (n, _) = self.recv_from(buf).await?;
        Ok(n)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrClosed);
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some((data, from)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, from))
            }
            None => Err(Error::ErrClosed),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        let peer = { *self.peer.lock().unwrap() };
        match peer {
            Some(peer) => self.send_to(buf, peer).await,
            None => Err(Error::ErrNoRemoteAddr),
        }
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrClosed);
        }
        self.net.deliver(self.laddr, target, buf);
        Ok(buf.len())
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.laddr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::ErrClosed);
        }
        self.net.unbind(&self.laddr);
        let mut rx = self.rx.lock().await;
        rx.close();
        Ok(())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

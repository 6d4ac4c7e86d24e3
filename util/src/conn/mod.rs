#[cfg(test)]
mod conn_test;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::error::*;

/// Uniform datagram transport. Implemented by OS UDP sockets, the
/// in-memory virtual transport and relayed (TURN) connections, so the
/// layers above never care which one they hold.
#[async_trait]
pub trait Conn {
    async fn connect(&self, addr: SocketAddr) -> Result<()>;
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
    async fn send(&self, buf: &[u8]) -> Result<usize>;
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize>;
    fn local_addr(&self) -> Result<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
    async fn close(&self) -> Result<()>;
    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

/// UDP socket behind the [`Conn`] trait.
pub struct UdpConn {
    socket: Arc<UdpSocket>,
    peer: Mutex<Option<SocketAddr>>,
}

impl UdpConn {
    pub fn new(socket: UdpSocket) -> Self {
        UdpConn {
            socket: Arc::new(socket),
            peer: Mutex::new(None),
        }
    }

    pub async fn bind(laddr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(laddr).await?;
        Ok(UdpConn::new(socket))
    }
}

#[async_trait]
impl Conn for UdpConn {
    async fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.socket.connect(addr).await?;
        let mut peer = self.peer.lock().await;
        *peer = Some(addr);
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.socket.recv(buf).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        Ok(self.socket.send(buf).await?)
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(buf, target).await?)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer.try_lock().ok().and_then(|peer| *peer)
    }

    async fn close(&self) -> Result<()> {
        // Dropping the last Arc closes the descriptor; there is no
        // explicit shutdown for UDP.
        Ok(())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

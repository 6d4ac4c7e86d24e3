#[cfg(test)]
mod binding_test;

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::proto::channum::*;

/// One peer address bound to a channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub number: ChannelNumber,
    pub addr: SocketAddr,
}

/// Hands out channel numbers from 0x4000 upward and keeps the
/// number <-> peer address mapping for ChannelData demultiplexing.
#[derive(Default)]
pub struct BindingManager {
    by_addr: HashMap<SocketAddr, ChannelNumber>,
    by_number: HashMap<u16, SocketAddr>,
    next: u16,
}

impl BindingManager {
    pub fn new() -> Self {
        BindingManager {
            by_addr: HashMap::new(),
            by_number: HashMap::new(),
            next: MIN_CHANNEL_NUMBER,
        }
    }

    fn assign_number(&mut self) -> Option<ChannelNumber> {
        let span = MAX_CHANNEL_NUMBER - MIN_CHANNEL_NUMBER + 1;
        for _ in 0..span {
            let n = self.next;
            self.next = if n >= MAX_CHANNEL_NUMBER {
                MIN_CHANNEL_NUMBER
            } else {
                n + 1
            };
            if !self.by_number.contains_key(&n) {
                return Some(ChannelNumber(n));
            }
        }
        None
    }

    /// Binds `addr` to a fresh channel number.
    pub fn create(&mut self, addr: SocketAddr) -> Option<Binding> {
        if self.by_addr.contains_key(&addr) {
            return None;
        }
        let number = self.assign_number()?;
        self.by_addr.insert(addr, number);
        self.by_number.insert(number.0, addr);
        Some(Binding { number, addr })
    }

    pub fn find_by_addr(&self, addr: &SocketAddr) -> Option<Binding> {
        self.by_addr.get(addr).map(|number| Binding {
            number: *number,
            addr: *addr,
        })
    }

    pub fn find_by_number(&self, number: u16) -> Option<Binding> {
        self.by_number.get(&number).map(|addr| Binding {
            number: ChannelNumber(number),
            addr: *addr,
        })
    }

    pub fn delete_by_addr(&mut self, addr: &SocketAddr) -> bool {
        if let Some(number) = self.by_addr.remove(addr) {
            self.by_number.remove(&number.0);
            true
        } else {
            false
        }
    }

    pub fn size(&self) -> usize {
        self.by_addr.len()
    }
}

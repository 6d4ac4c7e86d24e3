#[cfg(test)]
mod reqtrans_test;

use std::fmt;

use stun::attributes::ATTR_REQUESTED_TRANSPORT;
use stun::checks::*;
use stun::message::*;

use crate::proto::Protocol;

const REQUESTED_TRANSPORT_SIZE: usize = 4; // protocol byte + 3 RFFU

/// REQUESTED-TRANSPORT attribute, RFC 5766 section 14.7.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct RequestedTransport {
    pub protocol: Protocol,
}

impl fmt::Display for RequestedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol: {}", self.protocol)
    }
}

impl Setter for RequestedTransport {
    fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
        let v = [self.protocol.0, 0, 0, 0];
        m.add(ATTR_REQUESTED_TRANSPORT, &v);
        Ok(())
    }
}

impl Getter for RequestedTransport {
    fn get_from(&mut self, m: &Message) -> std::result::Result<(), stun::Error> {
        let v = m.get(ATTR_REQUESTED_TRANSPORT)?;
        check_size(ATTR_REQUESTED_TRANSPORT, v.len(), REQUESTED_TRANSPORT_SIZE)?;
        self.protocol = Protocol(v[0]);
        Ok(())
    }
}

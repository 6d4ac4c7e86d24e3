pub mod chandata;
pub mod channum;
pub mod data;
pub mod lifetime;
pub mod peeraddr;
pub mod relayaddr;
pub mod reqtrans;

use std::fmt;

/// Transport protocol value for REQUESTED-TRANSPORT, RFC 5766 section
/// 14.7. Only UDP relaying is defined there.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub struct Protocol(pub u8);

pub const PROTO_UDP: Protocol = Protocol(17);

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == PROTO_UDP {
            write!(f, "UDP")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

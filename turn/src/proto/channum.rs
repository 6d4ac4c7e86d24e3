
use std::fmt;

use stun::attributes::ATTR_CHANNEL_NUMBER;
use stun::checks::*;
use stun::message::*;

use crate::error::*;

/// Channel numbers live in 0x4000..=0x7FFF, RFC 5766 section 11.
pub const MIN_CHANNEL_NUMBER: u16 = 0x4000;
pub const MAX_CHANNEL_NUMBER: u16 = 0x7FFF;

const CHANNEL_NUMBER_SIZE: usize = 4; // 2 bytes number, 2 bytes RFFU

/// CHANNEL-NUMBER attribute, RFC 5766 section 14.1.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct ChannelNumber(pub u16);

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CN 0x{:x}", self.0)
    }
}

impl ChannelNumber {
    pub fn valid(&self) -> bool {
        (MIN_CHANNEL_NUMBER..=MAX_CHANNEL_NUMBER).contains(&self.0)
    }
}

impl Setter for ChannelNumber {
    fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
        let mut v = [0u8; CHANNEL_NUMBER_SIZE];
        v[..2].copy_from_slice(&self.0.to_be_bytes());
        // The rest is RFFU and must be zero.
        m.add(ATTR_CHANNEL_NUMBER, &v);
        Ok(())
    }
}

impl Getter for ChannelNumber {
    fn get_from(&mut self, m: &Message) -> std::result::Result<(), stun::Error> {
        let v = m.get(ATTR_CHANNEL_NUMBER)?;
        check_size(ATTR_CHANNEL_NUMBER, v.len(), CHANNEL_NUMBER_SIZE)?;
        self.0 = u16::from_be_bytes([v[0], v[1]]);
        Ok(())
    }
}

impl ChannelNumber {
    /// Fails unless the number is inside the RFC range.
    pub fn check(&self) -> Result<()> {
        if self.valid() {
            Ok(())
        } else {
            Err(Error::ErrChannelNumberOutOfRange)
        }
    }
}

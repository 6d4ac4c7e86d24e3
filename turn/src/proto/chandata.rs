#[cfg(test)]
mod chandata_test;

use crate::error::*;
use crate::proto::channum::*;

pub(crate) const CHANNEL_DATA_LENGTH_SIZE: usize = 2;
pub(crate) const CHANNEL_DATA_NUMBER_SIZE: usize = 2;
pub(crate) const CHANNEL_DATA_HEADER_SIZE: usize =
    CHANNEL_DATA_LENGTH_SIZE + CHANNEL_DATA_NUMBER_SIZE;
pub(crate) const CHANNEL_DATA_PADDING: usize = 4;

/// ChannelData framing, RFC 5766 section 11.5:
/// `channel:u16, length:u16, data`. No padding over UDP; decode
/// tolerates the 4-byte padding TCP framing requires.
#[derive(Default, Debug, PartialEq, Eq)]
pub struct ChannelData {
    pub data: Vec<u8>,
    pub number: ChannelNumber,
    pub raw: Vec<u8>,
}

impl ChannelData {
    /// Quick classifier for the data-path demultiplexer: channel
    /// numbers put the first byte in 0x40..=0x7F, where STUN has 0x00
    /// and plain application data usually does not land.
    pub fn is_channel_data(buf: &[u8]) -> bool {
        if buf.len() < CHANNEL_DATA_HEADER_SIZE {
            return false;
        }
        let number = u16::from_be_bytes([buf[0], buf[1]]);
        if !ChannelNumber(number).valid() {
            return false;
        }
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        length <= buf[CHANNEL_DATA_HEADER_SIZE..].len()
    }

    /// Encodes into `raw` (UDP framing, no padding).
    pub fn encode(&mut self) {
        self.raw.clear();
        self.raw
            .extend_from_slice(&self.number.0.to_be_bytes());
        self.raw
            .extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        self.raw.extend_from_slice(&self.data);
    }

    /// Decodes `raw` into number and data.
    pub fn decode(&mut self) -> Result<()> {
        if self.raw.len() < CHANNEL_DATA_HEADER_SIZE {
            return Err(Error::ErrBadChannelDataLength);
        }

        let number = ChannelNumber(u16::from_be_bytes([self.raw[0], self.raw[1]]));
        if !number.valid() {
            return Err(Error::ErrChannelNumberOutOfRange);
        }

        let length = u16::from_be_bytes([self.raw[2], self.raw[3]]) as usize;
        if length > self.raw[CHANNEL_DATA_HEADER_SIZE..].len() {
            return Err(Error::ErrBadChannelDataLength);
        }

        self.number = number;
        self.data = self.raw[CHANNEL_DATA_HEADER_SIZE..CHANNEL_DATA_HEADER_SIZE + length].to_vec();
        Ok(())
    }
}

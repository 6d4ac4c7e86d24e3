
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

/// FINGERPRINT attribute, RFC 5389 section 15.5.
pub struct FingerprintAttr;

/// Shorthand for FingerprintAttr.
pub const FINGERPRINT: FingerprintAttr = FingerprintAttr {};

pub const FINGERPRINT_XOR_VALUE: u32 = 0x5354554e;
pub const FINGERPRINT_SIZE: usize = 4; // 32 bit

/// CRC-32 of `b` XORed with 0x5354554e. The XOR distinguishes the STUN
/// fingerprint from application-level CRC-32 uses on the same packet.
pub fn fingerprint_value(b: &[u8]) -> u32 {
    Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(b) ^ FINGERPRINT_XOR_VALUE
}

impl Setter for FingerprintAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        // Header length must count the FINGERPRINT TLV before hashing.
        let l = m.length;
        m.length += (FINGERPRINT_SIZE + ATTRIBUTE_HEADER_SIZE) as u32;
        m.write_length();
        let v = fingerprint_value(&m.raw);
        m.length = l;
        m.add(ATTR_FINGERPRINT, &v.to_be_bytes());
        Ok(())
    }
}

impl FingerprintAttr {
    /// Reads the fingerprint of `m` and verifies it.
    pub fn check(&self, m: &Message) -> Result<()> {
        let b = m.get(ATTR_FINGERPRINT)?;
        check_size(ATTR_FINGERPRINT, b.len(), FINGERPRINT_SIZE)?;
        let got = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        let wire_len = MESSAGE_HEADER_SIZE + m.length as usize;
        let attr_start = wire_len - (FINGERPRINT_SIZE + ATTRIBUTE_HEADER_SIZE);
        let expected = fingerprint_value(&m.raw[..attr_start]);
        check_fingerprint(got, expected)
    }
}


use std::fmt;

use md5::{Digest, Md5};
use ring::hmac;

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

// Separator for long-term credential components.
pub(crate) const CREDENTIALS_SEP: &str = ":";

pub(crate) const MESSAGE_INTEGRITY_SIZE: usize = 20;

fn new_hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    hmac::sign(&key, message).as_ref().to_vec()
}

/// MESSAGE-INTEGRITY attribute, RFC 5389 section 15.4: HMAC-SHA1 over
/// the message prefix, with the header length temporarily covering the
/// MI TLV itself.
#[derive(Default, Clone)]
pub struct MessageIntegrity(pub Vec<u8>);

impl fmt::Display for MessageIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KEY: 0x{:x?}", self.0)
    }
}

impl MessageIntegrity {
    /// Key for long-term credentials: md5 of user:realm:pass, all
    /// SASL-prepared.
    pub fn new_long_term_integrity(username: String, realm: String, password: String) -> Self {
        let s = [username, realm, password].join(CREDENTIALS_SEP);

        let mut h = Md5::new();
        h.update(s.as_bytes());

        MessageIntegrity(h.finalize().as_slice().to_vec())
    }

    /// Key for short-term credentials: the password itself.
    pub fn new_short_term_integrity(password: String) -> Self {
        MessageIntegrity(password.into_bytes())
    }

    /// Verifies the MESSAGE-INTEGRITY of `m` under this key. Attributes
    /// after MI (i.e. FINGERPRINT) are excluded by shrinking the header
    /// length to what it was when the HMAC was computed.
    pub fn check(&self, m: &mut Message) -> Result<()> {
        let v = m.get(ATTR_MESSAGE_INTEGRITY)?;
        check_size(ATTR_MESSAGE_INTEGRITY, v.len(), MESSAGE_INTEGRITY_SIZE)?;

        let original_length = m.length;
        let mut after_integrity = 0usize;
        let mut seen_integrity = false;
        for a in &m.attributes.0 {
            if seen_integrity {
                after_integrity +=
                    ATTRIBUTE_HEADER_SIZE + nearest_padded_value_length(a.length as usize);
            }
            if a.typ == ATTR_MESSAGE_INTEGRITY {
                seen_integrity = true;
            }
        }

        m.length -= after_integrity as u32;
        m.write_length();
        let start_of_hmac = MESSAGE_HEADER_SIZE + m.length as usize
            - (ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE);
        let expected = new_hmac(&self.0, &m.raw[..start_of_hmac]);
        m.length = original_length;
        m.write_length();

        check_hmac(&v, &expected)
    }
}

impl Setter for MessageIntegrity {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        // FINGERPRINT must stay the last attribute.
        if m.contains(ATTR_FINGERPRINT) {
            return Err(Error::ErrFingerprintBeforeIntegrity);
        }

        // The HMAC input is the message up to the attribute preceding
        // MI, with the length field already counting the MI TLV.
        let length = m.length;
        m.length += (MESSAGE_INTEGRITY_SIZE + ATTRIBUTE_HEADER_SIZE) as u32;
        m.write_length();
        let v = new_hmac(&self.0, &m.raw);
        m.length = length;

        m.add(ATTR_MESSAGE_INTEGRITY, &v);
        Ok(())
    }
}

use subtle::ConstantTimeEq;

use crate::attributes::AttrType;
use crate::error::*;
use crate::fingerprint::FINGERPRINT;
use crate::integrity::MessageIntegrity;
use crate::message::Message;

/// Returns ErrAttributeSizeInvalid if got is not equal to expected.
pub fn check_size(_at: AttrType, got: usize, expected: usize) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::ErrAttributeSizeInvalid)
    }
}

/// Returns ErrAttributeSizeOverflow if got is bigger than max.
pub fn check_overflow(_at: AttrType, got: usize, max: usize) -> Result<()> {
    if got <= max {
        Ok(())
    } else {
        Err(Error::ErrAttributeSizeOverflow)
    }
}

/// Constant-time HMAC comparison.
pub fn check_hmac(got: &[u8], expected: &[u8]) -> Result<()> {
    if got.ct_eq(expected).into() {
        Ok(())
    } else {
        Err(Error::ErrBadIntegrity)
    }
}

pub fn check_fingerprint(got: u32, expected: u32) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::ErrBadFingerprint)
    }
}

/// Full inbound verification: FINGERPRINT (when present, it must match)
/// and MESSAGE-INTEGRITY under `key`.
pub fn verify(m: &mut Message, key: &[u8]) -> Result<()> {
    if m.contains(crate::attributes::ATTR_FINGERPRINT) {
        FINGERPRINT.check(m)?;
    }
    MessageIntegrity(key.to_vec()).check(m)
}

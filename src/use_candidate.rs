#[cfg(test)]
mod use_candidate_test;

use stun::attributes::ATTR_USE_CANDIDATE;
use stun::message::*;

/// USE-CANDIDATE attribute: zero-length, request-only, set by the
/// controlling agent to nominate the pair the check runs on.
#[derive(Default)]
pub struct UseCandidateAttr;

impl Setter for UseCandidateAttr {
    fn add_to(&self, m: &mut Message) -> Result<(), stun::Error> {
        m.add(ATTR_USE_CANDIDATE, &[]);
        Ok(())
    }
}

impl UseCandidateAttr {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// True if the USE-CANDIDATE attribute is set on `m`.
    #[must_use]
    pub fn is_set(m: &Message) -> bool {
        m.contains(ATTR_USE_CANDIDATE)
    }
}

#[cfg(test)]
mod lifetime_test;

use std::fmt;

use stun::attributes::ATTR_LIFETIME;
use stun::checks::*;
use stun::message::*;
use tokio::time::Duration;

/// Default allocation lifetime, RFC 5766 section 2.2.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(600);

const LIFETIME_SIZE: usize = 4; // u32 seconds

/// LIFETIME attribute, RFC 5766 section 14.2: seconds remaining until
/// the allocation expires.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct Lifetime(pub Duration);

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}

impl Setter for Lifetime {
    fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
        m.add(ATTR_LIFETIME, &(self.0.as_secs() as u32).to_be_bytes());
        Ok(())
    }
}

impl Getter for Lifetime {
    fn get_from(&mut self, m: &Message) -> std::result::Result<(), stun::Error> {
        let v = m.get(ATTR_LIFETIME)?;
        check_size(ATTR_LIFETIME, v.len(), LIFETIME_SIZE)?;
        let seconds = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
        self.0 = Duration::from_secs(u64::from(seconds));
        Ok(())
    }
}

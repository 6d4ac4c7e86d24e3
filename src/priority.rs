
use stun::attributes::ATTR_PRIORITY;
use stun::checks::*;
use stun::message::*;

pub(crate) const PRIORITY_SIZE: usize = 4; // 32 bit

/// PRIORITY attribute: the priority a peer-reflexive candidate
/// discovered through this check would get.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct PriorityAttr(pub u32);

impl Setter for PriorityAttr {
    fn add_to(&self, m: &mut Message) -> Result<(), stun::Error> {
        m.add(ATTR_PRIORITY, &self.0.to_be_bytes());
        Ok(())
    }
}

impl Getter for PriorityAttr {
    fn get_from(&mut self, m: &Message) -> Result<(), stun::Error> {
        let v = m.get(ATTR_PRIORITY)?;
        check_size(ATTR_PRIORITY, v.len(), PRIORITY_SIZE)?;
        self.0 = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
        Ok(())
    }
}

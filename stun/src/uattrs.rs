
use std::fmt;

use crate::attributes::*;
use crate::error::*;
use crate::message::*;

/// UNKNOWN-ATTRIBUTES, RFC 5389 section 15.9. Carried by 420 error
/// responses to list the comprehension-required types the server did not
/// understand.
#[derive(Default, Debug, PartialEq, Eq)]
pub struct UnknownAttributes(pub Vec<AttrType>);

impl fmt::Display for UnknownAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<nil>")
        } else {
            let list: Vec<String> = self.0.iter().map(AttrType::to_string).collect();
            write!(f, "{}", list.join(", "))
        }
    }
}

// Type size is 16 bit.
const ATTR_TYPE_SIZE: usize = 2;

impl Setter for UnknownAttributes {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = Vec::with_capacity(ATTR_TYPE_SIZE * self.0.len());
        for t in &self.0 {
            v.extend_from_slice(&t.value().to_be_bytes());
        }
        m.add(ATTR_UNKNOWN_ATTRIBUTES, &v);
        Ok(())
    }
}

impl Getter for UnknownAttributes {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_UNKNOWN_ATTRIBUTES)?;
        if v.len() % ATTR_TYPE_SIZE != 0 {
            return Err(Error::ErrBadUnknownAttrsSize);
        }
        self.0.clear();
        for pair in v.chunks_exact(ATTR_TYPE_SIZE) {
            self.0.push(AttrType(u16::from_be_bytes([pair[0], pair[1]])));
        }
        Ok(())
    }
}

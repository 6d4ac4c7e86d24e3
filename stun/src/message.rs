#[cfg(test)]
mod message_test;

use std::fmt;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::Rng;

use crate::attributes::*;
use crate::error::*;

/// Fixed value distinguishing STUN packets from other protocols
/// multiplexed on the same port, RFC 5389 section 6.
pub const MAGIC_COOKIE: u32 = 0x2112A442;
pub const MESSAGE_HEADER_SIZE: usize = 20;
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;
pub const TRANSACTION_ID_SIZE: usize = 12; // 96 bit

/// Anything that can append itself to a message as one or more
/// attributes (or header fields).
pub trait Setter: Send + Sync {
    fn add_to(&self, m: &mut Message) -> Result<()>;
}

/// Anything that can parse itself out of a message.
pub trait Getter {
    fn get_from(&mut self, m: &Message) -> Result<()>;
}

/// Returns true if `b` looks like a STUN message: two zero top bits and
/// the magic cookie in place. Useful for multiplexing; does not
/// guarantee that decoding will succeed.
pub fn is_message(b: &[u8]) -> bool {
    b.len() >= MESSAGE_HEADER_SIZE
        && b[0] & 0xC0 == 0
        && u32::from_be_bytes([b[4], b[5], b[6], b[7]]) == MAGIC_COOKIE
}

/// 96-bit STUN transaction id.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Default, Debug)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    /// Fresh random id.
    pub fn new() -> Self {
        let mut id = TransactionId([0u8; TRANSACTION_ID_SIZE]);
        rand::thread_rng().fill(&mut id.0);
        id
    }
}

impl Setter for TransactionId {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.transaction_id = *self;
        m.write_transaction_id();
        Ok(())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64_STANDARD.encode(self.0))
    }
}

/// 2-bit STUN message class.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub enum MessageClass {
    #[default]
    Request = 0b00,
    Indication = 0b01,
    SuccessResponse = 0b10,
    ErrorResponse = 0b11,
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            MessageClass::Request => "request",
            MessageClass::Indication => "indication",
            MessageClass::SuccessResponse => "success response",
            MessageClass::ErrorResponse => "error response",
        };
        write!(f, "{s}")
    }
}

/// 12-bit STUN method.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct Method(pub u16);

pub const METHOD_BINDING: Method = Method(0x001);
pub const METHOD_ALLOCATE: Method = Method(0x003);
pub const METHOD_REFRESH: Method = Method(0x004);
pub const METHOD_SEND: Method = Method(0x006);
pub const METHOD_DATA: Method = Method(0x007);
pub const METHOD_CREATE_PERMISSION: Method = Method(0x008);
pub const METHOD_CHANNEL_BIND: Method = Method(0x009);

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = format!("0x{:x}", self.0);

        let s = match *self {
            METHOD_BINDING => "Binding",
            METHOD_ALLOCATE => "Allocate",
            METHOD_REFRESH => "Refresh",
            METHOD_SEND => "Send",
            METHOD_DATA => "Data",
            METHOD_CREATE_PERMISSION => "CreatePermission",
            METHOD_CHANNEL_BIND => "ChannelBind",
            _ => unknown.as_str(),
        };

        write!(f, "{s}")
    }
}

/// STUN message type field: method bits interleaved with the two class
/// bits C0 (bit 4) and C1 (bit 8), RFC 5389 figure 3.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub struct MessageType {
    pub method: Method,
    pub class: MessageClass,
}

pub const BINDING_REQUEST: MessageType = MessageType {
    method: METHOD_BINDING,
    class: MessageClass::Request,
};
pub const BINDING_SUCCESS: MessageType = MessageType {
    method: METHOD_BINDING,
    class: MessageClass::SuccessResponse,
};
pub const BINDING_ERROR: MessageType = MessageType {
    method: METHOD_BINDING,
    class: MessageClass::ErrorResponse,
};
pub const BINDING_INDICATION: MessageType = MessageType {
    method: METHOD_BINDING,
    class: MessageClass::Indication,
};

impl MessageType {
    pub const fn new(method: Method, class: MessageClass) -> Self {
        MessageType { method, class }
    }

    /// Packs method and class into the 14-bit wire value.
    pub fn value(&self) -> u16 {
        let m = self.method.0;
        // Method bits M0-M3 stay, M4-M6 shift past C0, M7-M11 past C1.
        let method = (m & 0x000F) | ((m & 0x0070) << 1) | ((m & 0x0F80) << 2);
        let c = self.class as u16;
        let class = ((c & 0b01) << 4) | ((c & 0b10) << 7);
        method | class
    }

    /// Unpacks the wire value.
    pub fn from_value(value: u16) -> Self {
        let c = ((value >> 4) & 0b01) | ((value >> 7) & 0b10);
        let class = match c {
            0b00 => MessageClass::Request,
            0b01 => MessageClass::Indication,
            0b10 => MessageClass::SuccessResponse,
            _ => MessageClass::ErrorResponse,
        };
        let method = (value & 0x000F) | ((value >> 1) & 0x0070) | ((value >> 2) & 0x0F80);
        MessageType {
            method: Method(method),
            class,
        }
    }
}

impl Setter for MessageType {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.set_type(*self);
        Ok(())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.class)
    }
}

const DEFAULT_RAW_CAPACITY: usize = 120;

/// A single STUN packet. `raw` always mirrors the encoded form so that
/// MESSAGE-INTEGRITY and FINGERPRINT can be computed over the exact wire
/// prefix; attribute mutation goes through [`Message::add`] which keeps
/// both views in sync.
#[derive(Default, Debug, Clone)]
pub struct Message {
    pub typ: MessageType,
    pub length: u32, // attribute bytes, excluding the header
    pub transaction_id: TransactionId,
    pub attributes: Attributes,
    pub raw: Vec<u8>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} l={} attrs={} id={}",
            self.typ,
            self.length,
            self.attributes.0.len(),
            self.transaction_id
        )
    }
}

// Raw is deliberately ignored: two messages are the same message if
// their decoded parts agree.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ
            && self.length == other.length
            && self.transaction_id == other.transaction_id
            && self.attributes == other.attributes
    }
}

impl Setter for Message {
    /// Copies this message's transaction id into `b`, for crafting
    /// responses.
    fn add_to(&self, b: &mut Message) -> Result<()> {
        b.transaction_id = self.transaction_id;
        b.write_transaction_id();
        Ok(())
    }
}

impl Message {
    pub fn new() -> Self {
        Message {
            raw: {
                let mut raw = Vec::with_capacity(DEFAULT_RAW_CAPACITY);
                raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
                raw
            },
            ..Default::default()
        }
    }

    /// Picks a fresh random transaction id.
    pub fn new_transaction_id(&mut self) {
        self.transaction_id = TransactionId::new();
        self.write_transaction_id();
    }

    pub fn reset(&mut self) {
        self.raw.clear();
        self.raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
        self.length = 0;
        self.attributes.0.clear();
    }

    fn grow(&mut self, n: usize) {
        if self.raw.len() < n {
            self.raw.resize(n, 0);
        }
    }

    /// Appends a TLV attribute, padding the value to the 4-byte
    /// boundary, and updates the header length.
    pub fn add(&mut self, t: AttrType, v: &[u8]) {
        let first = MESSAGE_HEADER_SIZE + self.length as usize;
        let padded = nearest_padded_value_length(v.len());
        self.grow(first + ATTRIBUTE_HEADER_SIZE + padded);

        let buf = &mut self.raw[first..];
        buf[0..2].copy_from_slice(&t.value().to_be_bytes());
        buf[2..4].copy_from_slice(&(v.len() as u16).to_be_bytes());
        buf[ATTRIBUTE_HEADER_SIZE..ATTRIBUTE_HEADER_SIZE + v.len()].copy_from_slice(v);
        for b in &mut buf[ATTRIBUTE_HEADER_SIZE + v.len()..ATTRIBUTE_HEADER_SIZE + padded] {
            *b = 0;
        }

        self.length += (ATTRIBUTE_HEADER_SIZE + padded) as u32;
        self.write_length();

        self.attributes.0.push(RawAttribute {
            typ: t,
            length: v.len() as u16,
            value: v.to_vec(),
        });
    }

    /// Returns the value bytes of attribute `t`.
    pub fn get(&self, t: AttrType) -> Result<Vec<u8>> {
        match self.attributes.get(t) {
            Some(a) => Ok(a.value.clone()),
            None => Err(Error::ErrAttributeNotFound),
        }
    }

    pub fn contains(&self, t: AttrType) -> bool {
        self.attributes.get(t).is_some()
    }

    pub fn write_length(&mut self) {
        self.grow(4);
        self.raw[2..4].copy_from_slice(&(self.length as u16).to_be_bytes());
    }

    pub fn write_type(&mut self) {
        self.grow(2);
        self.raw[..2].copy_from_slice(&self.typ.value().to_be_bytes());
    }

    pub fn write_transaction_id(&mut self) {
        self.grow(MESSAGE_HEADER_SIZE);
        self.raw[8..MESSAGE_HEADER_SIZE].copy_from_slice(&self.transaction_id.0);
    }

    pub fn write_header(&mut self) {
        self.grow(MESSAGE_HEADER_SIZE);
        self.write_type();
        self.write_length();
        self.raw[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        self.write_transaction_id();
    }

    pub fn set_type(&mut self, t: MessageType) {
        self.typ = t;
        self.write_type();
    }

    /// Re-encodes the decoded parts into `raw`.
    pub fn encode(&mut self) {
        let attributes: Vec<RawAttribute> = self.attributes.0.drain(..).collect();
        self.raw.clear();
        self.raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
        self.length = 0;
        self.write_header();
        for a in &attributes {
            self.add(a.typ, &a.value);
        }
    }

    /// Decodes `raw` into the structured fields.
    pub fn decode(&mut self) -> Result<()> {
        let buf = &self.raw;
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::ErrTooShort);
        }

        let t = u16::from_be_bytes([buf[0], buf[1]]);
        let size = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if cookie != MAGIC_COOKIE {
            return Err(Error::ErrBadMagic(cookie));
        }
        if size % PADDING != 0 {
            return Err(Error::ErrOddAlignment);
        }
        if buf.len() < MESSAGE_HEADER_SIZE + size {
            return Err(Error::ErrTooShort);
        }

        self.typ = MessageType::from_value(t);
        self.length = size as u32;
        self.transaction_id
            .0
            .copy_from_slice(&buf[8..MESSAGE_HEADER_SIZE]);

        self.attributes.0.clear();
        let mut b = &buf[MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + size];
        while !b.is_empty() {
            if b.len() < ATTRIBUTE_HEADER_SIZE {
                return Err(Error::ErrTooShort);
            }
            let typ = AttrType(u16::from_be_bytes([b[0], b[1]]));
            let length = u16::from_be_bytes([b[2], b[3]]);
            let padded = nearest_padded_value_length(length as usize);
            b = &b[ATTRIBUTE_HEADER_SIZE..];
            if b.len() < padded {
                return Err(Error::ErrTooShort);
            }
            self.attributes.0.push(RawAttribute {
                typ,
                length,
                value: b[..length as usize].to_vec(),
            });
            b = &b[padded..];
        }

        Ok(())
    }

    /// Decodes a packet into a fresh message, copying the buffer.
    pub fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let mut m = Message {
            raw: data.to_vec(),
            ..Default::default()
        };
        m.decode()?;
        Ok(m)
    }

    /// Returns the encoded bytes.
    pub fn marshal_binary(&self) -> Vec<u8> {
        self.raw.clone()
    }

    /// Resets the message and applies `setters` in order, returning on
    /// the first error.
    pub fn build(&mut self, setters: &[Box<dyn Setter>]) -> Result<()> {
        self.reset();
        self.write_header();
        for s in setters {
            s.add_to(self)?;
        }
        Ok(())
    }

    /// Fails with the comprehension-required attribute types this stack
    /// does not understand, for building the 420 answer.
    pub fn check_unknown_attributes(&self) -> Result<()> {
        let unknown = self
            .attributes
            .unknown_comprehension_required(KNOWN_ATTRIBUTES);
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(Error::ErrUnknownComprehensionRequired(
                unknown.iter().map(AttrType::value).collect(),
            ))
        }
    }
}

//! The unit of data moved through a connection.

use std::borrow::Cow;

/// A framed application payload.
///
/// A packet owns its bytes; nothing else aliases them while it sits in a
/// queue. `size` is the declared length and must equal the payload length
/// for the packet to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    data: Vec<u8>,
    size: usize,
    close: bool,
}

impl Packet {
    /// A packet whose declared size is its payload length.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let size = data.len();
        Self { data, size, close: false }
    }

    /// A packet that hangs up the connection once it has been written.
    pub fn closing(data: impl Into<Vec<u8>>) -> Self {
        Self::new(data).with_close(true)
    }

    /// Build a packet from raw parts without checking `size` against the payload.
    pub fn from_parts(data: Vec<u8>, size: usize, close: bool) -> Self {
        Self { data, size, close }
    }

    /// Set the close-after-send flag.
    pub fn with_close(mut self, close: bool) -> Self {
        self.close = close;
        self
    }

    /// The payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Declared payload size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the connection closes after this packet is delivered.
    pub fn close_after_send(&self) -> bool {
        self.close
    }

    /// A zero-size packet carries no data and is dropped by the receive pump.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the declared size matches the payload.
    pub fn is_consistent(&self) -> bool {
        self.size == self.data.len()
    }

    /// Payload as text, trimmed of surrounding whitespace.
    pub fn text(&self) -> Cow<'_, str> {
        match String::from_utf8_lossy(&self.data) {
            Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
            Cow::Owned(s) => Cow::Owned(s.trim().to_string()),
        }
    }

    /// Take the payload out of the packet.
    pub fn into_payload(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for Packet {
    fn from(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

impl From<&str> for Packet {
    fn from(data: &str) -> Self {
        Self::new(data.as_bytes().to_vec())
    }
}

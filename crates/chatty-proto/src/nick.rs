use std::ops::Deref;

use thiserror::Error;

/// Longest nickname (and group name) in bytes.
pub const MAX_NAME: usize = 32;

/// Size of a name field on the wire: zero-padded and always nul-terminated.
pub const NICK_WIRE_LEN: usize = MAX_NAME + 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NickError {
    #[error("name longer than {MAX_NAME} bytes")]
    TooLong,
    #[error("name is not valid utf-8")]
    NotUtf8,
    #[error("name contains a nul byte")]
    EmbeddedNul,
}

/// Inline fixed-capacity nickname.
///
/// `Copy`, so headers and routing records can carry it without allocation.
/// The empty nick is valid at this layer; handlers decide whether an empty
/// sender or receiver is acceptable for a given operation.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Nick {
    len: u8,
    buf: [u8; MAX_NAME],
}

impl Nick {
    pub const fn empty() -> Self {
        Self { len: 0, buf: [0; MAX_NAME] }
    }

    pub fn as_str(&self) -> &str {
        // Only validated UTF-8 is ever stored.
        unsafe { core::str::from_utf8_unchecked(&self.buf[..self.len as usize]) }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Encodes as the fixed wire field: name bytes, then zero padding. The
    /// final byte is always zero, so the peer sees a terminated string no
    /// matter what.
    pub fn to_wire(self) -> [u8; NICK_WIRE_LEN] {
        let mut out = [0u8; NICK_WIRE_LEN];
        out[..self.len as usize].copy_from_slice(&self.buf[..self.len as usize]);
        out
    }

    /// Decodes a wire field: the name runs to the first nul byte.
    pub fn from_wire(raw: &[u8; NICK_WIRE_LEN]) -> Result<Self, NickError> {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(MAX_NAME);
        Self::from_bytes(&raw[..end])
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, NickError> {
        if bytes.len() > MAX_NAME {
            return Err(NickError::TooLong);
        }
        if core::str::from_utf8(bytes).is_err() {
            return Err(NickError::NotUtf8);
        }
        let mut buf = [0u8; MAX_NAME];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { len: bytes.len() as u8, buf })
    }
}

impl TryFrom<&str> for Nick {
    type Error = NickError;

    fn try_from(s: &str) -> Result<Self, NickError> {
        if s.bytes().any(|b| b == 0) {
            return Err(NickError::EmbeddedNul);
        }
        Self::from_bytes(s.as_bytes())
    }
}

impl Deref for Nick {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for Nick {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl core::fmt::Display for Nick {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::fmt::Debug for Nick {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "\"{}\"", self.as_str())
    }
}

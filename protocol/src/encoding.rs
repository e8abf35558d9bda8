//! Canonical binary encoding primitives.
//!
//! Everything that gets hashed on this ledger is written with the three
//! building blocks below, and every decoder refuses input that a
//! conforming encoder could not have produced:
//!
//! ```text
//! varint63              unsigned LEB128, value <= 2^63 - 1, minimal form only
//! varstr31              varint63(len) || bytes, len <= 2^31 - 1
//! extensible string     varstr31(known fields || opaque suffix)
//! ```
//!
//! The extensible string is the forward-compatibility hinge: a decoder that
//! understands a version parses its fields from the front of the blob and
//! keeps the rest as an opaque suffix; a decoder that does not understand
//! the version keeps the whole blob. Either way the bytes that get hashed
//! are the bytes that were received.

use thiserror::Error;

/// Largest value a varint63 may carry.
pub const MAX_VARINT63: u64 = i64::MAX as u64;

/// Largest byte length a varstr31 may carry.
pub const MAX_VARSTR31_LEN: usize = i32::MAX as usize;

/// Longest LEB128 encoding of a 64-bit value.
const MAX_UVARINT_LEN: usize = 10;

/// Structural encoding and decoding failures.
///
/// These are always fatal to the operation in progress; nothing partially
/// decoded is ever returned alongside one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} more bytes")]
    UnexpectedEof { needed: usize },

    #[error("varint is not minimally encoded")]
    NonCanonicalVarint,

    #[error("varint value exceeds 2^63 - 1")]
    VarintOverflow,

    #[error("length {len} exceeds the varstr31 limit")]
    LengthOverflow { len: u64 },

    #[error("{remaining} trailing bytes after decoding")]
    TrailingBytes { remaining: usize },

    #[error("unrecognized VM version {vm_version} for asset version {asset_version}")]
    UnsupportedVmVersion { vm_version: u64, asset_version: u64 },

    #[error("{field}: {source}")]
    Context {
        field: &'static str,
        #[source]
        source: Box<CodecError>,
    },
}

impl CodecError {
    /// Wraps the error with the name of the field being processed.
    pub fn context(self, field: &'static str) -> Self {
        CodecError::Context {
            field,
            source: Box::new(self),
        }
    }

    /// Strips any [`CodecError::Context`] layers.
    pub fn root(&self) -> &CodecError {
        match self {
            CodecError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension for attaching field names to codec results.
pub trait CodecContext<T> {
    fn field(self, name: &'static str) -> Result<T, CodecError>;
}

impl<T> CodecContext<T> for Result<T, CodecError> {
    fn field(self, name: &'static str) -> Result<T, CodecError> {
        self.map_err(|e| e.context(name))
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn write_uvarint(buf: &mut Vec<u8>, mut value: u64) -> usize {
    let start = buf.len();
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
    buf.len() - start
}

/// Appends a varint63 and returns the number of bytes written.
pub fn write_varint63(buf: &mut Vec<u8>, value: u64) -> Result<usize, CodecError> {
    if value > MAX_VARINT63 {
        return Err(CodecError::VarintOverflow);
    }
    Ok(write_uvarint(buf, value))
}

/// Appends a length-prefixed byte string.
pub fn write_varstr31(buf: &mut Vec<u8>, data: &[u8]) -> Result<usize, CodecError> {
    if data.len() > MAX_VARSTR31_LEN {
        return Err(CodecError::LengthOverflow {
            len: data.len() as u64,
        });
    }
    let n = write_varint63(buf, data.len() as u64)?;
    buf.extend_from_slice(data);
    Ok(n + data.len())
}

/// Writes `varstr31(contents)` where `contents` is produced by `write`.
///
/// The closure writes into a scratch buffer so the length prefix can be
/// emitted first. On error nothing is appended to `buf`.
pub fn write_extensible_string<F>(buf: &mut Vec<u8>, write: F) -> Result<usize, CodecError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<(), CodecError>,
{
    let mut contents = Vec::new();
    write(&mut contents)?;
    write_varstr31(buf, &contents)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// A cursor over a byte slice with canonical decoders.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Fails if any input is left unread.
    pub fn finish(&self) -> Result<(), CodecError> {
        let remaining = self.buf.len() - self.pos;
        if remaining > 0 {
            return Err(CodecError::TrailingBytes { remaining });
        }
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8, CodecError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(CodecError::UnexpectedEof { needed: 1 })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let available = self.buf.len() - self.pos;
        if n > available {
            return Err(CodecError::UnexpectedEof {
                needed: n - available,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array32(&mut self) -> Result<[u8; 32], CodecError> {
        let bytes = self.read_bytes(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_uvarint(&mut self) -> Result<u64, CodecError> {
        let mut value: u64 = 0;
        for i in 0..MAX_UVARINT_LEN {
            let byte = self.read_byte()?;
            if i == MAX_UVARINT_LEN - 1 && byte > 1 {
                return Err(CodecError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                if byte == 0 && i > 0 {
                    return Err(CodecError::NonCanonicalVarint);
                }
                return Ok(value);
            }
        }
        Err(CodecError::VarintOverflow)
    }

    /// Reads a canonical varint63.
    pub fn read_varint63(&mut self) -> Result<u64, CodecError> {
        let value = self.read_uvarint()?;
        if value > MAX_VARINT63 {
            return Err(CodecError::VarintOverflow);
        }
        Ok(value)
    }

    /// Reads a length-prefixed byte string.
    pub fn read_varstr31(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_varint63()?;
        if len > MAX_VARSTR31_LEN as u64 {
            return Err(CodecError::LengthOverflow { len });
        }
        self.read_bytes(len as usize)
    }

    /// Reads an extensible string, letting `read` parse the known fields
    /// from the front. Whatever `read` leaves unconsumed is returned as the
    /// suffix.
    pub fn read_extensible_string<F>(&mut self, read: F) -> Result<Vec<u8>, CodecError>
    where
        F: FnOnce(&mut Reader<'a>) -> Result<(), CodecError>,
    {
        let blob = self.read_varstr31()?;
        let mut inner = Reader::new(blob);
        read(&mut inner)?;
        Ok(inner.remaining().to_vec())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

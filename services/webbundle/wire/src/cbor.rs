//! CBOR primitives for the container codec.
//!
//! Heads are always written in their shortest form and maps are written in
//! canonical key order (shorter encoded key first, then bytewise), so every
//! structure produced here passes [`crate::deterministic::validate`].
//! Structured items that are only inspected, never re-encoded, are decoded
//! through `ciborium::Value` with [`parse_value`].

use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cmp::Ordering;

/// Major type 0: unsigned integer
pub const MAJOR_UNSIGNED: u8 = 0;
/// Major type 1: negative integer
pub const MAJOR_NEGATIVE: u8 = 1;
/// Major type 2: byte string
pub const MAJOR_BYTES: u8 = 2;
/// Major type 3: text string
pub const MAJOR_TEXT: u8 = 3;
/// Major type 4: array
pub const MAJOR_ARRAY: u8 = 4;
/// Major type 5: map
pub const MAJOR_MAP: u8 = 5;
/// Major type 6: tag
pub const MAJOR_TAG: u8 = 6;
/// Major type 7: simple values and floats
pub const MAJOR_SIMPLE: u8 = 7;

/// Number of bytes the shortest head for `arg` occupies.
pub fn head_len(arg: u64) -> usize {
    match arg {
        0..=23 => 1,
        24..=0xff => 2,
        0x100..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// RFC 7049 §3.9 canonical ordering of two encoded map keys.
pub fn canonical_key_cmp(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Shortest-form CBOR writer
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Create an empty encoder
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Create an encoder with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Write a head for `major` with argument `arg`
    pub fn encode_head(&mut self, major: u8, arg: u64) {
        let major = major << 5;
        match arg {
            0..=23 => self.buf.put_u8(major | arg as u8),
            24..=0xff => {
                self.buf.put_u8(major | 24);
                self.buf.put_u8(arg as u8);
            }
            0x100..=0xffff => {
                self.buf.put_u8(major | 25);
                self.buf.put_u16(arg as u16);
            }
            0x1_0000..=0xffff_ffff => {
                self.buf.put_u8(major | 26);
                self.buf.put_u32(arg as u32);
            }
            _ => {
                self.buf.put_u8(major | 27);
                self.buf.put_u64(arg);
            }
        }
    }

    /// Write an unsigned integer
    pub fn encode_uint(&mut self, value: u64) {
        self.encode_head(MAJOR_UNSIGNED, value);
    }

    /// Write a byte string
    pub fn encode_bytes(&mut self, value: &[u8]) {
        self.encode_head(MAJOR_BYTES, value.len() as u64);
        self.buf.put_slice(value);
    }

    /// Write a text string
    pub fn encode_text(&mut self, value: &str) {
        self.encode_head(MAJOR_TEXT, value.len() as u64);
        self.buf.put_slice(value.as_bytes());
    }

    /// Write an array head announcing `len` items
    pub fn encode_array_header(&mut self, len: usize) {
        self.encode_head(MAJOR_ARRAY, len as u64);
    }

    /// Write a map head announcing `len` pairs
    pub fn encode_map_header(&mut self, len: usize) {
        self.encode_head(MAJOR_MAP, len as u64);
    }

    /// Append bytes that are already valid CBOR (or fixed framing bytes)
    pub fn encode_raw(&mut self, raw: &[u8]) {
        self.buf.put_slice(raw);
    }

    /// Write a canonical map
    pub fn encode_map(&mut self, map: MapBuilder) -> Result<(), WireError> {
        let entries = map.into_sorted()?;
        self.encode_map_header(entries.len());
        for (key, value) in entries {
            self.buf.put_slice(&key);
            self.buf.put_slice(&value);
        }
        Ok(())
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written yet
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish and return the encoded bytes
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Canonical map builder. Keys and values are encoded eagerly; ordering is
/// applied when the map is written.
#[derive(Debug, Clone, Default)]
pub struct MapBuilder {
    entries: Vec<(Bytes, Bytes)>,
}

impl MapBuilder {
    /// Create an empty map builder
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert an entry produced by two encoding closures
    pub fn insert_with(
        mut self,
        key: impl FnOnce(&mut Encoder),
        value: impl FnOnce(&mut Encoder),
    ) -> Self {
        let mut k = Encoder::new();
        key(&mut k);
        let mut v = Encoder::new();
        value(&mut v);
        self.entries.push((k.finish(), v.finish()));
        self
    }

    /// Insert a byte-string key with a byte-string value
    pub fn insert_bytes(self, key: &[u8], value: &[u8]) -> Self {
        self.insert_with(|k| k.encode_bytes(key), |v| v.encode_bytes(value))
    }

    /// Insert a text key with a byte-string value
    pub fn insert_text_bytes(self, key: &str, value: &[u8]) -> Self {
        self.insert_with(|k| k.encode_text(key), |v| v.encode_bytes(value))
    }

    /// Insert a text key with a text value
    pub fn insert_text_text(self, key: &str, value: &str) -> Self {
        self.insert_with(|k| k.encode_text(key), |v| v.encode_text(value))
    }

    /// Insert a text key with an unsigned value
    pub fn insert_text_uint(self, key: &str, value: u64) -> Self {
        self.insert_with(|k| k.encode_text(key), |v| v.encode_uint(value))
    }

    /// Insert a text key with an already-encoded value
    pub fn insert_text_raw(self, key: &str, value: Bytes) -> Self {
        let mut k = Encoder::new();
        k.encode_text(key);
        let mut this = self;
        this.entries.push((k.finish(), value));
        this
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode the map on its own
    pub fn build(self) -> Result<Bytes, WireError> {
        let mut enc = Encoder::new();
        enc.encode_map(self)?;
        Ok(enc.finish())
    }

    fn into_sorted(mut self) -> Result<Vec<(Bytes, Bytes)>, WireError> {
        self.entries.sort_by(|a, b| canonical_key_cmp(&a.0, &b.0));
        if self.entries.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(WireError::DuplicateMapKey);
        }
        Ok(self.entries)
    }
}

/// Cursor over CBOR bytes. Reads are zero-copy slices of the input.
#[derive(Debug, Clone)]
pub struct Decoder {
    buf: Bytes,
    total: usize,
}

impl Decoder {
    /// Create a decoder over `buf`
    pub fn new(buf: Bytes) -> Self {
        let total = buf.len();
        Self { buf, total }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.total - self.buf.remaining()
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Whether all input has been consumed
    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    /// Next byte without consuming it
    pub fn peek_u8(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// Consume exactly `len` raw bytes
    pub fn take(&mut self, len: usize, what: &'static str) -> Result<Bytes, WireError> {
        if self.buf.remaining() < len {
            return Err(WireError::Truncated(what));
        }
        Ok(self.buf.split_to(len))
    }

    /// Read a head, returning `(major, argument)`
    pub fn decode_head(&mut self) -> Result<(u8, u64), WireError> {
        if !self.buf.has_remaining() {
            return Err(WireError::Truncated("cbor head"));
        }
        let initial = self.buf.get_u8();
        let major = initial >> 5;
        let info = initial & 0x1f;
        let width = match info {
            0..=23 => return Ok((major, u64::from(info))),
            24 => 1,
            25 => 2,
            26 => 4,
            27 => 8,
            _ => return Err(WireError::UnsupportedEncoding(info)),
        };
        if self.buf.remaining() < width {
            return Err(WireError::Truncated("cbor head"));
        }
        let arg = match width {
            1 => u64::from(self.buf.get_u8()),
            2 => u64::from(self.buf.get_u16()),
            4 => u64::from(self.buf.get_u32()),
            _ => self.buf.get_u64(),
        };
        Ok((major, arg))
    }

    fn decode_typed_head(&mut self, expected: u8) -> Result<u64, WireError> {
        let (found, arg) = self.decode_head()?;
        if found != expected {
            return Err(WireError::UnexpectedType { expected, found });
        }
        Ok(arg)
    }

    fn decode_len(&mut self, major: u8) -> Result<usize, WireError> {
        let arg = self.decode_typed_head(major)?;
        usize::try_from(arg).map_err(|_| WireError::Length(arg))
    }

    /// Read an unsigned integer
    pub fn decode_uint(&mut self) -> Result<u64, WireError> {
        self.decode_typed_head(MAJOR_UNSIGNED)
    }

    /// Read a byte string
    pub fn decode_bytes(&mut self) -> Result<Bytes, WireError> {
        let len = self.decode_len(MAJOR_BYTES)?;
        self.take(len, "byte string")
    }

    /// Read a text string
    pub fn decode_text(&mut self) -> Result<String, WireError> {
        let len = self.decode_len(MAJOR_TEXT)?;
        let raw = self.take(len, "text string")?;
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::Utf8)
    }

    /// Read an array head and return its item count
    pub fn decode_array_header(&mut self) -> Result<usize, WireError> {
        self.decode_len(MAJOR_ARRAY)
    }

    /// Read a map head and return its pair count
    pub fn decode_map_header(&mut self) -> Result<usize, WireError> {
        self.decode_len(MAJOR_MAP)
    }
}

/// Decode exactly one CBOR item from `raw` into a `ciborium::Value`.
pub fn parse_value(raw: &[u8], what: &'static str) -> Result<ciborium::Value, WireError> {
    let mut reader = raw;
    let value: ciborium::Value =
        ciborium::from_reader(&mut reader).map_err(|e| WireError::Cbor(e.to_string()))?;
    if !reader.is_empty() {
        return Err(WireError::TrailingBytes(what));
    }
    Ok(value)
}

/// Look up a text key in a decoded map
pub fn map_get<'a>(
    map: &'a [(ciborium::Value, ciborium::Value)],
    key: &str,
) -> Option<&'a ciborium::Value> {
    map.iter()
        .find(|(k, _)| matches!(k, ciborium::Value::Text(t) if t == key))
        .map(|(_, v)| v)
}

/// Get a byte-string value from a decoded item
pub fn value_bytes<'a>(value: &'a ciborium::Value, what: &'static str) -> Result<&'a [u8], WireError> {
    if let ciborium::Value::Bytes(b) = value {
        Ok(b)
    } else {
        Err(WireError::Cbor(format!("{what}: expected byte string")))
    }
}

/// Get a text value from a decoded item
pub fn value_text<'a>(value: &'a ciborium::Value, what: &'static str) -> Result<&'a str, WireError> {
    if let ciborium::Value::Text(t) = value {
        Ok(t)
    } else {
        Err(WireError::Cbor(format!("{what}: expected text string")))
    }
}

/// Get an unsigned integer from a decoded item
pub fn value_u64(value: &ciborium::Value, what: &'static str) -> Result<u64, WireError> {
    if let ciborium::Value::Integer(i) = value {
        u64::try_from(*i).map_err(|_| WireError::Cbor(format!("{what}: integer out of range")))
    } else {
        Err(WireError::Cbor(format!("{what}: expected unsigned integer")))
    }
}

/// Get the items of an array value
pub fn value_array<'a>(
    value: &'a ciborium::Value,
    what: &'static str,
) -> Result<&'a [ciborium::Value], WireError> {
    if let ciborium::Value::Array(items) = value {
        Ok(items)
    } else {
        Err(WireError::Cbor(format!("{what}: expected array")))
    }
}

/// Get the entries of a map value
pub fn value_map<'a>(
    value: &'a ciborium::Value,
    what: &'static str,
) -> Result<&'a [(ciborium::Value, ciborium::Value)], WireError> {
    if let ciborium::Value::Map(entries) = value {
        Ok(entries)
    } else {
        Err(WireError::Cbor(format!("{what}: expected map")))
    }
}

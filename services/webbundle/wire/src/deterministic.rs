//! Deterministic CBOR validation.
//!
//! Signatures are computed over exact bytes, so anything that feeds a signer
//! must be in its single canonical form: shortest heads, definite lengths,
//! UTF-8 text and map keys in canonical order with no duplicates.

use crate::cbor::{
    canonical_key_cmp, MAJOR_ARRAY, MAJOR_BYTES, MAJOR_MAP, MAJOR_NEGATIVE, MAJOR_SIMPLE,
    MAJOR_TAG, MAJOR_TEXT, MAJOR_UNSIGNED,
};
use crate::DeterminismError;
use std::cmp::Ordering;

/// Deepest nesting the validator follows
pub const MAX_DEPTH: usize = 64;

/// Validate that `data` is exactly one deterministically encoded CBOR item.
pub fn validate(data: &[u8]) -> Result<(), DeterminismError> {
    let mut validator = Validator { data, pos: 0 };
    validator.item(0)?;
    if validator.pos != data.len() {
        return Err(DeterminismError::TrailingBytes(validator.pos));
    }
    Ok(())
}

struct Validator<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Validator<'_> {
    fn byte(&mut self, start: usize) -> Result<u8, DeterminismError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(DeterminismError::Truncated(start))?;
        self.pos += 1;
        Ok(b)
    }

    fn skip(&mut self, len: u64, start: usize) -> Result<&[u8], DeterminismError> {
        let len = usize::try_from(len).map_err(|_| DeterminismError::Truncated(start))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DeterminismError::Truncated(start))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn uint_of_width(&mut self, width: usize, start: usize) -> Result<u64, DeterminismError> {
        let mut value = 0u64;
        for _ in 0..width {
            value = (value << 8) | u64::from(self.byte(start)?);
        }
        Ok(value)
    }

    /// Read the argument of a head whose additional info is `info`,
    /// enforcing the shortest encoding.
    fn argument(&mut self, info: u8, start: usize) -> Result<u64, DeterminismError> {
        let (width, floor) = match info {
            0..=23 => return Ok(u64::from(info)),
            24 => (1, 24),
            25 => (2, 0x100),
            26 => (4, 0x1_0000),
            27 => (8, 0x1_0000_0000),
            31 => return Err(DeterminismError::Indefinite(start)),
            _ => return Err(DeterminismError::Reserved(start)),
        };
        let value = self.uint_of_width(width, start)?;
        if value < floor {
            return Err(DeterminismError::NonMinimal(start));
        }
        Ok(value)
    }

    fn item(&mut self, depth: usize) -> Result<(), DeterminismError> {
        let start = self.pos;
        if depth > MAX_DEPTH {
            return Err(DeterminismError::Depth(start));
        }
        let initial = self.byte(start)?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        if major == MAJOR_SIMPLE {
            return self.simple(info, start);
        }

        let arg = self.argument(info, start)?;
        match major {
            MAJOR_UNSIGNED | MAJOR_NEGATIVE => Ok(()),
            MAJOR_BYTES => self.skip(arg, start).map(|_| ()),
            MAJOR_TEXT => {
                let text = self.skip(arg, start)?;
                std::str::from_utf8(text)
                    .map(|_| ())
                    .map_err(|_| DeterminismError::Utf8(start))
            }
            MAJOR_ARRAY => {
                for _ in 0..arg {
                    self.item(depth + 1)?;
                }
                Ok(())
            }
            MAJOR_MAP => self.map(arg, depth, start),
            MAJOR_TAG => self.item(depth + 1),
            _ => unreachable!("major type is three bits"),
        }
    }

    fn map(&mut self, pairs: u64, depth: usize, start: usize) -> Result<(), DeterminismError> {
        let mut previous: Option<(usize, usize)> = None;
        for _ in 0..pairs {
            let key_start = self.pos;
            self.item(depth + 1)?;
            let key_end = self.pos;

            if let Some((prev_start, prev_end)) = previous {
                let prev = &self.data[prev_start..prev_end];
                let key = &self.data[key_start..key_end];
                match canonical_key_cmp(prev, key) {
                    Ordering::Less => {}
                    Ordering::Equal => return Err(DeterminismError::DuplicateKey(key_start)),
                    Ordering::Greater => return Err(DeterminismError::KeyOrder(start)),
                }
            }
            previous = Some((key_start, key_end));

            self.item(depth + 1)?;
        }
        Ok(())
    }

    fn simple(&mut self, info: u8, start: usize) -> Result<(), DeterminismError> {
        match info {
            0..=23 => Ok(()),
            24 => {
                // Values below 32 have a one-byte form.
                if self.byte(start)? < 32 {
                    return Err(DeterminismError::Reserved(start));
                }
                Ok(())
            }
            25 => self.skip(2, start).map(|_| ()),
            26 => self.skip(4, start).map(|_| ()),
            27 => self.skip(8, start).map(|_| ()),
            31 => Err(DeterminismError::Indefinite(start)),
            _ => Err(DeterminismError::Reserved(start)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::{Encoder, MapBuilder};

    const CANONICAL_UINTS: &[u64] = &[
        0,
        10,
        23,
        24,
        45,
        255,
        256,
        5000,
        65535,
        65536,
        4_294_967_295,
        4_294_967_296,
        18_446_744_073_709_551_615,
    ];

    fn uint_with_width(value: u64, info: u8) -> Vec<u8> {
        let mut out = vec![info];
        match info {
            24 => out.push(value as u8),
            25 => out.extend_from_slice(&(value as u16).to_be_bytes()),
            26 => out.extend_from_slice(&(value as u32).to_be_bytes()),
            27 => out.extend_from_slice(&value.to_be_bytes()),
            _ => unreachable!(),
        }
        out
    }

    #[test]
    fn test_canonical_uints_pass() {
        for &value in CANONICAL_UINTS {
            let mut enc = Encoder::new();
            enc.encode_uint(value);
            assert!(validate(&enc.finish()).is_ok(), "{value} should validate");
        }
    }

    #[test]
    fn test_longer_uint_encodings_fail() {
        for &value in CANONICAL_UINTS {
            let mut enc = Encoder::new();
            enc.encode_uint(value);
            let shortest = enc.finish().len();

            // Every wider head that can still hold the value is non-minimal.
            for (info, len) in [(24u8, 2usize), (25, 3), (26, 5), (27, 9)] {
                let fits = len == 9 || value < (1u64 << (8 * (len - 1)));
                if len <= shortest || !fits {
                    continue;
                }
                let encoded = uint_with_width(value, info);
                assert_eq!(
                    validate(&encoded),
                    Err(DeterminismError::NonMinimal(0)),
                    "{value} with info {info}"
                );
            }
        }
    }

    #[test]
    fn test_non_minimal_string_and_array_lengths_fail() {
        // "a" with a one-byte length argument
        assert_eq!(
            validate(&[0x78, 0x01, b'a']),
            Err(DeterminismError::NonMinimal(0))
        );
        // two-element array with a two-byte count
        assert_eq!(
            validate(&[0x99, 0x00, 0x02, 0x01, 0x02]),
            Err(DeterminismError::NonMinimal(0))
        );
        // nested non-minimal byte string
        assert_eq!(
            validate(&[0x81, 0x58, 0x01, 0xff]),
            Err(DeterminismError::NonMinimal(1))
        );
    }

    #[test]
    fn test_indefinite_and_reserved_fail() {
        assert_eq!(
            validate(&[0x9f, 0x01, 0xff]),
            Err(DeterminismError::Indefinite(0))
        );
        assert_eq!(validate(&[0x1c]), Err(DeterminismError::Reserved(0)));
        assert_eq!(validate(&[0xf8, 0x10]), Err(DeterminismError::Reserved(0)));
    }

    #[test]
    fn test_map_key_order() {
        let sorted = MapBuilder::new()
            .insert_text_uint("b", 1)
            .insert_text_uint("aa", 2)
            .build()
            .unwrap();
        assert!(validate(&sorted).is_ok());

        // {"aa": 2, "b": 1}: longer key first
        let unsorted = [0xa2, 0x62, b'a', b'a', 0x02, 0x61, b'b', 0x01];
        assert_eq!(validate(&unsorted), Err(DeterminismError::KeyOrder(0)));

        let duplicate = [0xa2, 0x61, b'b', 0x01, 0x61, b'b', 0x02];
        assert_eq!(validate(&duplicate), Err(DeterminismError::DuplicateKey(4)));
    }

    #[test]
    fn test_truncated_and_trailing() {
        assert_eq!(validate(&[0x43, 0x01]), Err(DeterminismError::Truncated(0)));
        assert_eq!(validate(&[0x01, 0x01]), Err(DeterminismError::TrailingBytes(1)));
        assert_eq!(validate(&[0x62, 0xff, 0xfe]), Err(DeterminismError::Utf8(0)));
    }
}

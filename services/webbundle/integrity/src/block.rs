//! Integrity block wire model.
//!
//! ```text
//! integrity-block = [
//!   magic:   bstr (F0 9F 96 8B F0 9F 93 A6),
//!   version: bstr (31 62 00 00),
//!   signature-stack: [* [attributes: {* text => bstr}, signature: bstr]],
//! ]
//! ```
//!
//! The block is prepended to the web bundle bytes. The newest signature is
//! the first entry of the stack.

use crate::error::IntegrityError;
use bytes::Bytes;
use ed25519_dalek::VerifyingKey;
use std::collections::BTreeMap;
use webbundle_wire::cbor::{Decoder, Encoder, MapBuilder};
use webbundle_wire::{deterministic, WireError};

/// Integrity block magic
pub const MAGIC: [u8; 8] = [0xF0, 0x9F, 0x96, 0x8B, 0xF0, 0x9F, 0x93, 0xA6];

/// Integrity block version
pub const VERSION: [u8; 4] = [0x31, 0x62, 0x00, 0x00];

/// Attribute holding the signer's raw Ed25519 public key
pub const ED25519_PUBLIC_KEY_ATTRIBUTE: &str = "ed25519PublicKey";

/// One entry of the signature stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegritySignature {
    /// Signature attributes
    pub attributes: BTreeMap<String, Bytes>,
    /// Raw Ed25519 signature
    pub signature: Bytes,
}

impl IntegritySignature {
    /// Canonical CBOR map of the attributes
    pub fn encode_attributes(&self) -> Result<Bytes, WireError> {
        self.attributes
            .iter()
            .fold(MapBuilder::new(), |map, (name, value)| {
                map.insert_text_bytes(name, value)
            })
            .build()
    }

    /// Public key from the `ed25519PublicKey` attribute. `index` is the
    /// position in the stack, used in errors.
    pub fn ed25519_public_key(&self, index: usize) -> Result<VerifyingKey, IntegrityError> {
        let raw = self
            .attributes
            .get(ED25519_PUBLIC_KEY_ATTRIBUTE)
            .ok_or(IntegrityError::MissingPublicKey(index))?;
        let bytes: [u8; 32] = raw
            .as_ref()
            .try_into()
            .map_err(|_| IntegrityError::PublicKey(index))?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| IntegrityError::PublicKey(index))
    }
}

/// Integrity block with its signature stack, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityBlock {
    /// Signatures, most recent first
    pub signature_stack: Vec<IntegritySignature>,
}

impl IntegrityBlock {
    /// Empty block
    pub fn new() -> Self {
        Self::default()
    }

    /// Block holding the given stack
    pub fn with_signatures(signature_stack: Vec<IntegritySignature>) -> Self {
        Self { signature_stack }
    }

    /// Encode as `[magic, version, signature-stack]`
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut enc = Encoder::new();
        enc.encode_array_header(3);
        enc.encode_bytes(&MAGIC);
        enc.encode_bytes(&VERSION);
        enc.encode_array_header(self.signature_stack.len());
        for signature in &self.signature_stack {
            enc.encode_array_header(2);
            enc.encode_raw(&signature.encode_attributes()?);
            enc.encode_bytes(&signature.signature);
        }
        Ok(enc.finish())
    }

    /// Decode a block that makes up all of `raw`
    pub fn decode(raw: Bytes) -> Result<Self, IntegrityError> {
        let mut dec = Decoder::new(raw);
        let block = Self::decode_from(&mut dec)?;
        if !dec.is_empty() {
            return Err(WireError::TrailingBytes("integrity block").into());
        }
        Ok(block)
    }

    fn decode_from(dec: &mut Decoder) -> Result<Self, IntegrityError> {
        if dec.decode_array_header()? != 3 {
            return Err(IntegrityError::Malformed(
                "expected a 3-element array".to_string(),
            ));
        }
        if dec.decode_bytes()? != MAGIC[..] {
            return Err(IntegrityError::Magic);
        }
        let version = dec.decode_bytes()?;
        if version != VERSION[..] {
            return Err(IntegrityError::Version(version.to_vec()));
        }

        let count = dec.decode_array_header()?;
        let mut signature_stack = Vec::new();
        for i in 0..count {
            if dec.decode_array_header()? != 2 {
                return Err(IntegrityError::Malformed(format!(
                    "signature {i} is not an [attributes, signature] pair"
                )));
            }
            let mut attributes = BTreeMap::new();
            for _ in 0..dec.decode_map_header()? {
                let name = dec.decode_text()?;
                let value = dec.decode_bytes()?;
                if attributes.insert(name.clone(), value).is_some() {
                    return Err(IntegrityError::DuplicateAttribute(name));
                }
            }
            let signature = dec.decode_bytes()?;
            signature_stack.push(IntegritySignature {
                attributes,
                signature,
            });
        }
        Ok(Self { signature_stack })
    }
}

/// Whether `input` starts with an integrity block
pub fn has_integrity_block(input: &[u8]) -> bool {
    input.len() > 2 + MAGIC.len() && input[..2] == [0x83, 0x48] && input[2..10] == MAGIC
}

/// Split off a leading integrity block.
///
/// Returns the block and its length in bytes, or an empty block and 0 when
/// `input` is a bare web bundle.
pub fn obtain_integrity_block(input: &Bytes) -> Result<(IntegrityBlock, usize), IntegrityError> {
    if !has_integrity_block(input) {
        return Ok((IntegrityBlock::new(), 0));
    }
    let mut dec = Decoder::new(input.clone());
    let block = IntegrityBlock::decode_from(&mut dec)?;
    let len = dec.position();
    deterministic::validate(&input[..len])?;
    Ok((block, len))
}

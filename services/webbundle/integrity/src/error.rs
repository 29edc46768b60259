//! Integrity block error types.

use thiserror::Error;
use webbundle_wire::{DeterminismError, WireError};

/// Errors raised while reading, signing or verifying integrity blocks
#[derive(Error, Debug)]
pub enum IntegrityError {
    /// Block does not start with the integrity block magic
    #[error("invalid integrity block magic")]
    Magic,

    /// Block carries an unknown version
    #[error("unsupported integrity block version {0:02x?}")]
    Version(Vec<u8>),

    /// Block structure is malformed
    #[error("malformed integrity block: {0}")]
    Malformed(String),

    /// Attribute appears twice in one signature
    #[error("duplicate integrity signature attribute {0:?}")]
    DuplicateAttribute(String),

    /// Signature lacks the public key attribute
    #[error("integrity signature {0} has no ed25519PublicKey attribute")]
    MissingPublicKey(usize),

    /// Public key attribute is not a valid Ed25519 key
    #[error("integrity signature {0} carries an invalid Ed25519 public key")]
    PublicKey(usize),

    /// Stacked signature does not verify
    #[error("integrity signature {0} does not verify")]
    Signature(usize),

    /// Freshly made signature failed to verify against the configured public key
    #[error("new integrity signature does not verify against the supplied public key")]
    SelfCheck,

    /// Key is not usable for integrity block signatures
    #[error("unsupported integrity block key: {0}")]
    Key(String),

    /// Block bytes are not deterministic CBOR
    #[error("integrity block is not deterministic cbor: {0}")]
    Determinism(#[from] DeterminismError),

    /// CBOR encoding or decoding failed
    #[error(transparent)]
    Wire(#[from] WireError),
}

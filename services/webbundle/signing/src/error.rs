//! Signing and verification error types.

use thiserror::Error;
use webbundle_wire::{DeterminismError, MiceError, Version, WireError};

/// Errors raised while building signatures
#[derive(Error, Debug)]
pub enum SigningError {
    /// The format revision cannot carry signatures
    #[error("format version {0} does not support signatures")]
    UnsignedVersion(Version),

    /// Certificate chain violates the chain rules
    #[error("invalid certificate chain: {0}")]
    CertChain(String),

    /// Certificate could not be parsed
    #[error("invalid certificate: {0}")]
    Certificate(String),

    /// Private key could not be read or uses an unsupported algorithm
    #[error("unsupported private key: {0}")]
    Key(String),

    /// Private key does not belong to the leaf certificate
    #[error("private key does not match the signing certificate")]
    KeyMismatch,

    /// Requested validity exceeds the allowed maximum
    #[error("signature validity {0:?} exceeds 7 days")]
    Expiry(std::time::Duration),

    /// Timestamp cannot be represented
    #[error("timestamp out of range: {0}")]
    Timestamp(String),

    /// URL already has an entry in the signed subset
    #[error("exchange for {0} is already signed")]
    DuplicateUrl(String),

    /// Bundle and signer use different format revisions
    #[error("signer is for format version {signer}, bundle is {bundle}")]
    VersionMismatch {
        /// Signer revision
        signer: Version,
        /// Bundle revision
        bundle: Version,
    },

    /// Signing primitive failed
    #[error("signing failed: {0}")]
    Crypto(String),

    /// Bytes to be signed are not deterministic CBOR
    #[error("signed bytes are not deterministic cbor: {0}")]
    Determinism(#[from] DeterminismError),

    /// Encoding failed
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Reading key or certificate material failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while verifying signatures and exchanges
#[derive(Error, Debug)]
pub enum VerifyError {
    /// The format revision cannot carry signatures
    #[error("format version {0} does not support signatures")]
    UnsignedVersion(Version),

    /// Vouched subset refers to a missing authority
    #[error("authority index {index} out of range ({len} authorities)")]
    AuthorityIndex {
        /// Index found in the vouched subset
        index: u64,
        /// Number of authorities
        len: usize,
    },

    /// Authority certificate could not be used to verify
    #[error("unsupported authority public key: {0}")]
    UnsupportedKey(String),

    /// Signature bytes are malformed
    #[error("malformed signature in vouched subset {0}")]
    SignatureFormat(usize),

    /// Signature does not verify
    #[error("signature verification failed for vouched subset {0}")]
    SignatureMismatch(usize),

    /// The URL is only covered by rejected subsets
    #[error("signature for {url} rejected: {reason}")]
    Rejected {
        /// Exchange URL
        url: String,
        /// Why the covering subset was dropped
        reason: RejectReason,
    },

    /// Signed entry declares variants
    #[error("signed response for {0} declares variants, which are not supported")]
    Variants(String),

    /// Signed entry must hold exactly one resource integrity
    #[error("expected one resource integrity entry for {url}, found {count}")]
    IntegrityEntries {
        /// Exchange URL
        url: String,
        /// Entries found
        count: usize,
    },

    /// Payload integrity identifier is not the one the version uses
    #[error("unexpected payload integrity identifier {0:?}")]
    IntegrityIdentifier(String),

    /// Response lacks the digest header
    #[error("response for {0} has no digest header")]
    MissingDigest(String),

    /// Response headers differ from the signed ones
    #[error("response header hash mismatch for {0}")]
    HeaderHash(String),

    /// Payload failed MICE verification
    #[error(transparent)]
    Mice(#[from] MiceError),

    /// Response could not be re-encoded
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Why a vouched subset was dropped by the verifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Signed bytes are not a valid signed subset
    #[error("signed subset is malformed: {0}")]
    Decode(String),

    /// `auth-sha256` does not match the authority certificate
    #[error("auth-sha256 does not match the certificate")]
    AuthSha256,

    /// `expires - date` exceeds 7 days
    #[error("validity window of {0} seconds exceeds 7 days")]
    ValidityWindow(i64),

    /// Verification time is before `date`
    #[error("signature is not yet valid")]
    NotYetValid,

    /// Verification time is after `expires`
    #[error("signature has expired")]
    Expired,
}

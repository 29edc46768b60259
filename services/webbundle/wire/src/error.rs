//! Wire format error types.

use thiserror::Error;

/// Container codec errors.
///
/// Every variant is fatal: the decoder never returns a partial bundle.
#[derive(Error, Debug)]
pub enum WireError {
    /// Input ended before the named structure was complete
    #[error("truncated input while reading {0}")]
    Truncated(&'static str),

    /// Header magic does not belong to any known format revision
    #[error("unknown header magic")]
    Magic,

    /// Version tag does not match the revision announced by the header magic
    #[error("version tag does not match header magic for {0}")]
    VersionMismatch(&'static str),

    /// Unrecognized version name
    #[error("unknown version: {0}")]
    UnknownVersion(String),

    /// A CBOR item had a different major type than the format requires
    #[error("unexpected cbor type: expected major {expected}, found {found}")]
    UnexpectedType {
        /// Expected major type
        expected: u8,
        /// Major type found on the wire
        found: u8,
    },

    /// Indefinite-length or reserved CBOR encodings
    #[error("unsupported cbor encoding (additional info {0})")]
    UnsupportedEncoding(u8),

    /// A length does not fit the platform's address space
    #[error("length {0} out of range")]
    Length(u64),

    /// Text string is not valid UTF-8
    #[error("invalid utf-8 in text string")]
    Utf8,

    /// Structured CBOR could not be decoded
    #[error("cbor decode failed: {0}")]
    Cbor(String),

    /// Bytes left over after an item that must be consumed exactly
    #[error("trailing bytes after {0}")]
    TrailingBytes(&'static str),

    /// Two entries of a map share a key
    #[error("duplicate map key")]
    DuplicateMapKey,

    /// Section-length table has an odd number of elements
    #[error("malformed section-length table")]
    SectionTable,

    /// Section name appears twice in the section-length table
    #[error("duplicate section: {0}")]
    DuplicateSection(String),

    /// Sections array length disagrees with the section-length table
    #[error("section count mismatch: table lists {table}, array announces {array}")]
    SectionCount {
        /// Number of (name, length) pairs
        table: usize,
        /// Number announced by the sections array header
        array: u64,
    },

    /// The responses section is missing or is not the last section
    #[error("responses section must be the last section")]
    ResponsesNotLast,

    /// A required section is missing
    #[error("missing {0} section")]
    MissingSection(&'static str),

    /// A section extends past the end of the sections area
    #[error("section {0} out of range")]
    SectionRange(String),

    /// Footer is not a byte string wrapping the bundle length
    #[error("malformed footer")]
    Footer,

    /// Footer length disagrees with the actual byte count
    #[error("bundle length mismatch: footer says {declared}, actual {actual}")]
    BundleLength {
        /// Length recorded in the footer
        declared: u64,
        /// Bytes actually present
        actual: u64,
    },

    /// Responses array count disagrees with the index
    #[error("response count mismatch: index has {index}, responses section has {responses}")]
    ResponseCount {
        /// Entries found in the index
        index: usize,
        /// Count announced by the responses section
        responses: u64,
    },

    /// An index entry points outside the responses section
    #[error("response at offset {offset} (length {length}) out of range")]
    ResponseRange {
        /// Offset within the responses section
        offset: u64,
        /// Declared length
        length: u64,
    },

    /// A response record is not `[headers, body]`
    #[error("malformed response record")]
    ResponseRecord,

    /// A response record does not exhaust its declared length
    #[error("response record length mismatch")]
    ResponseLength,

    /// Index entry is structurally invalid
    #[error("malformed index: {0}")]
    Index(&'static str),

    /// Header name is not lower-case ASCII or is otherwise invalid
    #[error("invalid header name: {0:?}")]
    HeaderName(String),

    /// Header value contains forbidden bytes
    #[error("invalid value for header {0}")]
    HeaderValue(String),

    /// Pseudo-headers differ from the set the record type allows
    #[error("unexpected pseudo-headers: {0}")]
    PseudoHeaders(String),

    /// Request method other than GET
    #[error("request method must be GET, found {0}")]
    Method(String),

    /// Response status is not three ASCII digits
    #[error("invalid status: {0:?}")]
    Status(String),

    /// URL failed to parse
    #[error("invalid url {url:?}: {reason}")]
    Url {
        /// Offending input
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// The format revision cannot represent this bundle
    #[error("format version {version} does not support {feature}")]
    Unsupported {
        /// Format revision in use
        version: &'static str,
        /// Feature the bundle needed
        feature: &'static str,
    },

    /// Several responses share a URL but one of them lacks a Variants header
    #[error("multiple responses for {0} but not all carry a Variants header")]
    MissingVariants(String),

    /// Primary URL required by the format revision is absent
    #[error("format version {0} requires a primary url")]
    MissingPrimaryUrl(&'static str),

    /// Payload integrity encoding failed
    #[error("payload integrity: {0}")]
    Mice(#[from] crate::MiceError),

    /// Output sink failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// MICE encoding and verification errors.
#[derive(Error, Debug)]
pub enum MiceError {
    /// Record size of zero
    #[error("record size must be positive")]
    ZeroRecordSize,

    /// Record size larger than the reader accepts
    #[error("record size {size} exceeds maximum {max}")]
    RecordSize {
        /// Declared record size
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// Stream ended inside the record size, a proof, or before a promised record
    #[error("truncated mice stream")]
    Truncated,

    /// Recomputed proof disagrees with the expected one
    #[error("integrity check failed at record {0}")]
    Integrity(u64),

    /// Digest header value is malformed
    #[error("invalid digest: {0}")]
    Digest(String),

    /// Underlying reader failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Deterministic-CBOR validation errors. `offset` is the byte offset of the
/// offending item's initial byte.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeterminismError {
    /// Input ended inside an item
    #[error("truncated cbor at offset {0}")]
    Truncated(usize),

    /// Argument encoded with more bytes than necessary
    #[error("non-minimal encoding at offset {0}")]
    NonMinimal(usize),

    /// Indefinite-length item
    #[error("indefinite-length item at offset {0}")]
    Indefinite(usize),

    /// Reserved additional-information value (28..=30) or simple value below 32 in two bytes
    #[error("reserved encoding at offset {0}")]
    Reserved(usize),

    /// Text string that is not UTF-8
    #[error("invalid utf-8 text at offset {0}")]
    Utf8(usize),

    /// Map keys not in canonical order
    #[error("map keys out of canonical order at offset {0}")]
    KeyOrder(usize),

    /// Map contains the same key twice
    #[error("duplicate map key at offset {0}")]
    DuplicateKey(usize),

    /// Nesting deeper than the validator follows
    #[error("nesting too deep at offset {0}")]
    Depth(usize),

    /// Bytes after the single top-level item
    #[error("trailing bytes at offset {0}")]
    TrailingBytes(usize),
}

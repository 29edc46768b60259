//! Format revisions.
//!
//! Each revision is identified by a 10-byte header magic. The first magic byte
//! is the CBOR array header of the whole bundle, so it also fixes how many
//! top-level items follow; signature-capable revisions add a version tag.

use crate::WireError;
use std::fmt;
use std::str::FromStr;

/// Length of every header magic
pub const HEADER_MAGIC_LEN: usize = 10;

/// `"🌐📦"` as a CBOR byte string, shared by every revision after the array header
const MAGIC_TAIL: [u8; 9] = [0x48, 0xF0, 0x9F, 0x8C, 0x90, 0xF0, 0x9F, 0x93, 0xA6];

/// Payload integrity identifier written into signed subsets
pub const MI_SHA256_IDENTIFIER: &str = "digest/mi-sha256";

/// Known bundle format revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// Pre-version format: full request headers in the index, no variants, no signatures
    Unversioned,
    /// `b1`: primary URL in the header, URL-keyed index with variants
    B1,
    /// `b2`: optional `primary` section instead of a header primary URL
    B2,
}

/// Content encoding a revision uses for payload integrity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiceEncoding {
    /// `content-encoding` token
    pub content_encoding: &'static str,
    /// Response header carrying the top-level digest
    pub digest_header: &'static str,
    /// Identifier stored in signed subsets
    pub integrity_identifier: &'static str,
}

/// The `mi-sha256` encoding used by `b1` and `b2`
pub const MI_SHA256: MiceEncoding = MiceEncoding {
    content_encoding: "mi-sha256",
    digest_header: "digest",
    integrity_identifier: MI_SHA256_IDENTIFIER,
};

impl Version {
    /// Every revision, newest first
    pub const ALL: [Version; 3] = [Version::B2, Version::B1, Version::Unversioned];

    /// Header magic including the bundle's array header byte
    pub fn header_magic(self) -> [u8; HEADER_MAGIC_LEN] {
        let array_len = match self {
            Version::Unversioned => 0x84,
            Version::B1 => 0x86,
            Version::B2 => 0x85,
        };
        let mut magic = [0u8; HEADER_MAGIC_LEN];
        magic[0] = array_len;
        magic[1..].copy_from_slice(&MAGIC_TAIL);
        magic
    }

    /// Version tag following the magic, if the revision has one
    pub fn version_tag(self) -> Option<&'static [u8]> {
        match self {
            Version::Unversioned => None,
            Version::B1 => Some(&[0x44, 0x62, 0x31, 0x00, 0x00]),
            Version::B2 => Some(&[0x44, 0x62, 0x32, 0x00, 0x00]),
        }
    }

    /// Identify a revision from the first bytes of a bundle
    pub fn from_header_magic(magic: &[u8]) -> Result<Version, WireError> {
        Version::ALL
            .into_iter()
            .find(|v| v.header_magic().as_slice() == magic)
            .ok_or(WireError::Magic)
    }

    /// Short name
    pub fn as_str(self) -> &'static str {
        match self {
            Version::Unversioned => "unversioned",
            Version::B1 => "b1",
            Version::B2 => "b2",
        }
    }

    /// Whether the primary URL is written between the version tag and the section table
    pub fn has_primary_url_field(self) -> bool {
        self == Version::B1
    }

    /// Whether the primary URL lives in a `primary` section
    pub fn has_primary_section(self) -> bool {
        self == Version::B2
    }

    /// Whether several responses may share a URL
    pub fn supports_variants(self) -> bool {
        self != Version::Unversioned
    }

    /// Whether the index carries full request header maps instead of URLs
    pub fn has_request_headers_in_index(self) -> bool {
        self == Version::Unversioned
    }

    /// Whether bundles of this revision may carry a `signatures` section
    pub fn supports_signatures(self) -> bool {
        self != Version::Unversioned
    }

    /// Payload integrity encoding, for signature-capable revisions
    pub fn mice_encoding(self) -> Option<MiceEncoding> {
        if self.supports_signatures() {
            Some(MI_SHA256)
        } else {
            None
        }
    }

    /// Context string mixed into the signing message
    pub fn signature_context(self) -> Option<&'static str> {
        match self {
            Version::Unversioned => None,
            Version::B1 => Some("b1"),
            Version::B2 => Some("b2"),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Version {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unversioned" => Ok(Version::Unversioned),
            "b1" => Ok(Version::B1),
            "b2" => Ok(Version::B2),
            _ => Err(WireError::UnknownVersion(s.to_string())),
        }
    }
}

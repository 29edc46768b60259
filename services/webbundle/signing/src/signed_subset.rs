//! Signed subsets: the structure a vouched-subset signature covers.
//!
//! ```text
//! signed-subset = {
//!   "validity-url":  text,
//!   "auth-sha256":   bstr,
//!   "date":          uint,
//!   "expires":       uint,
//!   "subset-hashes": { * url => [variants-value: bstr, * (header-sha256: bstr, payload-integrity: text)] },
//! }
//! ```

use crate::error::SigningError;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use url::Url;
use webbundle_wire::cbor::{
    map_get, parse_value, value_array, value_bytes, value_map, value_text, value_u64, MapBuilder,
};
use webbundle_wire::WireError;

/// Longest allowed distance between `date` and `expires`, in seconds
pub const MAX_VALIDITY_SECS: i64 = 7 * 24 * 60 * 60;

/// [`MAX_VALIDITY_SECS`] as a duration
pub fn max_validity() -> Duration {
    Duration::seconds(MAX_VALIDITY_SECS)
}

/// Padding that starts every signing message
const MESSAGE_PADDING: [u8; 64] = [0x20; 64];

/// Context prefix mixed into every signing message
const CONTEXT_PREFIX: &[u8] = b"Web Package 1 ";

/// Integrity of one signed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIntegrity {
    /// SHA-256 of the canonical response header map
    pub header_sha256: Bytes,
    /// Payload integrity identifier, e.g. `digest/mi-sha256`
    pub payload_integrity: String,
}

/// Signed responses stored under one URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHashes {
    /// `Variants` value; empty when the URL has a single response
    pub variants_value: Bytes,
    /// One entry per response
    pub resource_integrity: Vec<ResourceIntegrity>,
}

/// Signed metadata binding a certificate, a validity window and response hashes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedSubset {
    /// Where an updated signature can be fetched
    pub validity_url: Url,
    /// SHA-256 of the signing certificate
    pub auth_sha256: Bytes,
    /// Signing time
    pub date: DateTime<Utc>,
    /// Expiry time
    pub expires: DateTime<Utc>,
    /// Signed responses by URL
    pub subset_hashes: BTreeMap<String, ResponseHashes>,
}

impl SignedSubset {
    /// `expires - date`
    pub fn validity_window(&self) -> Duration {
        self.expires - self.date
    }

    /// Canonical CBOR encoding
    pub fn encode(&self) -> Result<Bytes, SigningError> {
        let mut hashes = MapBuilder::new();
        for (url, entry) in &self.subset_hashes {
            hashes = hashes.insert_with(
                |k| k.encode_text(url),
                |v| {
                    v.encode_array_header(1 + 2 * entry.resource_integrity.len());
                    v.encode_bytes(&entry.variants_value);
                    for integrity in &entry.resource_integrity {
                        v.encode_bytes(&integrity.header_sha256);
                        v.encode_text(&integrity.payload_integrity);
                    }
                },
            );
        }

        let map = MapBuilder::new()
            .insert_text_text("validity-url", self.validity_url.as_str())
            .insert_text_bytes("auth-sha256", &self.auth_sha256)
            .insert_text_uint("date", unix_seconds(self.date)?)
            .insert_text_uint("expires", unix_seconds(self.expires)?)
            .insert_text_raw("subset-hashes", hashes.build()?);
        Ok(map.build()?)
    }

    /// Decode signed-subset bytes
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let value = parse_value(raw, "signed subset")?;
        let map = value_map(&value, "signed subset")?;
        let field = |key: &'static str| {
            map_get(map, key).ok_or_else(|| WireError::Cbor(format!("signed subset: missing {key}")))
        };

        let validity_url = value_text(field("validity-url")?, "validity-url")?;
        let validity_url = Url::parse(validity_url).map_err(|e| WireError::Url {
            url: validity_url.to_string(),
            reason: e.to_string(),
        })?;

        let mut subset_hashes = BTreeMap::new();
        for (url, entry) in value_map(field("subset-hashes")?, "subset-hashes")? {
            let url = value_text(url, "subset-hashes key")?.to_string();
            let items = value_array(entry, "response hashes")?;
            let Some((variants, rest)) = items.split_first() else {
                return Err(WireError::Cbor("response hashes: empty array".to_string()));
            };
            if rest.len() % 2 != 0 {
                return Err(WireError::Cbor(
                    "response hashes: odd number of integrity items".to_string(),
                ));
            }
            let resource_integrity = rest
                .chunks(2)
                .map(|pair| -> Result<ResourceIntegrity, WireError> {
                    Ok(ResourceIntegrity {
                        header_sha256: Bytes::copy_from_slice(value_bytes(&pair[0], "header-sha256")?),
                        payload_integrity: value_text(&pair[1], "payload integrity")?.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            subset_hashes.insert(
                url,
                ResponseHashes {
                    variants_value: Bytes::copy_from_slice(value_bytes(variants, "variants value")?),
                    resource_integrity,
                },
            );
        }

        Ok(Self {
            validity_url,
            auth_sha256: Bytes::copy_from_slice(value_bytes(field("auth-sha256")?, "auth-sha256")?),
            date: from_unix_seconds(value_u64(field("date")?, "date")?)?,
            expires: from_unix_seconds(value_u64(field("expires")?, "expires")?)?,
            subset_hashes,
        })
    }
}

/// Bytes a vouched-subset signature is computed over
pub fn signing_message(context: &str, signed: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(
        MESSAGE_PADDING.len() + CONTEXT_PREFIX.len() + context.len() + 1 + signed.len(),
    );
    message.extend_from_slice(&MESSAGE_PADDING);
    message.extend_from_slice(CONTEXT_PREFIX);
    message.extend_from_slice(context.as_bytes());
    message.push(0x00);
    message.extend_from_slice(signed);
    message
}

fn unix_seconds(time: DateTime<Utc>) -> Result<u64, SigningError> {
    u64::try_from(time.timestamp()).map_err(|_| SigningError::Timestamp(time.to_rfc3339()))
}

fn from_unix_seconds(seconds: u64) -> Result<DateTime<Utc>, WireError> {
    i64::try_from(seconds)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .ok_or_else(|| WireError::Cbor(format!("timestamp {seconds} out of range")))
}

//! Bundle container encoding and decoding.

use crate::cbor::{Decoder, Encoder};
use crate::exchange::{parse_exchange_url, Exchange, Request, Response};
use crate::section::{
    decode_index, decode_section_table, encode_section_table, IndexEntry, IndexStaging,
    ResponsesStaging, INDEX, MANIFEST, PRIMARY, RESPONSES, SIGNATURES,
};
use crate::signatures::Signatures;
use crate::version::{Version, HEADER_MAGIC_LEN};
use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Write;
use tracing::debug;
use url::Url;

/// Size of the trailing length footer
pub const FOOTER_SIZE: usize = 9;

/// Decoded or to-be-encoded bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Format revision
    pub version: Version,
    /// Primary URL (required by `b1`, optional in `b2`, absent in unversioned bundles)
    pub primary_url: Option<Url>,
    /// Exchanges in response order
    pub exchanges: Vec<Exchange>,
    /// Manifest URL
    pub manifest_url: Option<Url>,
    /// Signatures section
    pub signatures: Option<Signatures>,
}

impl Bundle {
    /// Empty bundle of `version`
    pub fn new(version: Version) -> Self {
        Self {
            version,
            primary_url: None,
            exchanges: Vec::new(),
            manifest_url: None,
            signatures: None,
        }
    }

    /// Set the primary URL
    pub fn with_primary_url(mut self, url: Url) -> Self {
        self.primary_url = Some(url);
        self
    }

    /// Set the manifest URL
    pub fn with_manifest_url(mut self, url: Url) -> Self {
        self.manifest_url = Some(url);
        self
    }

    /// Append an exchange
    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchanges.push(exchange);
        self
    }

    fn check_capabilities(&self) -> Result<(), WireError> {
        let unsupported = |feature| WireError::Unsupported {
            version: self.version.as_str(),
            feature,
        };
        match self.version {
            Version::Unversioned if self.primary_url.is_some() => {
                return Err(unsupported("primary url"))
            }
            Version::B1 if self.primary_url.is_none() => {
                return Err(WireError::MissingPrimaryUrl(self.version.as_str()))
            }
            _ => {}
        }
        if self.signatures.is_some() && !self.version.supports_signatures() {
            return Err(unsupported("signatures"));
        }
        Ok(())
    }

    /// Serialize the bundle
    pub fn encode(&self) -> Result<Bytes, WireError> {
        self.check_capabilities()?;

        let mut responses = ResponsesStaging::new();
        let mut index = IndexStaging::new(self.version);
        for exchange in &self.exchanges {
            let slot = responses.add(&exchange.response)?;
            index.add(exchange, slot)?;
        }
        let responses = responses.finalize();
        let index = index.finalize(&responses)?;

        let mut sections: Vec<(&str, Bytes)> = vec![(INDEX, index)];
        if self.version.has_primary_section() {
            if let Some(url) = &self.primary_url {
                sections.push((PRIMARY, text_item(url.as_str())));
            }
        }
        if let Some(url) = &self.manifest_url {
            sections.push((MANIFEST, text_item(url.as_str())));
        }
        if let Some(signatures) = &self.signatures {
            sections.push((SIGNATURES, signatures.encode()?));
        }
        sections.push((RESPONSES, responses.bytes().clone()));

        let table: Vec<(&str, usize)> = sections.iter().map(|(n, b)| (*n, b.len())).collect();
        let section_bytes: usize = table.iter().map(|(_, len)| len).sum();

        let mut enc = Encoder::with_capacity(section_bytes + 256);
        enc.encode_raw(&self.version.header_magic());
        if let Some(tag) = self.version.version_tag() {
            enc.encode_raw(tag);
        }
        if self.version.has_primary_url_field() {
            if let Some(url) = &self.primary_url {
                enc.encode_text(url.as_str());
            }
        }
        enc.encode_raw(&encode_section_table(&table));
        enc.encode_array_header(sections.len());
        for (_, bytes) in &sections {
            enc.encode_raw(bytes);
        }

        let total = (enc.len() + FOOTER_SIZE) as u64;
        let mut footer = BytesMut::with_capacity(FOOTER_SIZE);
        footer.put_u8(0x48);
        footer.put_u64(total);
        enc.encode_raw(&footer);

        let out = enc.finish();
        debug!(
            version = %self.version,
            exchanges = self.exchanges.len(),
            sections = sections.len(),
            bytes = out.len(),
            "encoded bundle"
        );
        Ok(out)
    }

    /// Serialize into `writer`, returning the number of bytes written
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<u64, WireError> {
        let encoded = self.encode()?;
        writer.write_all(&encoded)?;
        Ok(encoded.len() as u64)
    }

    /// Parse a complete bundle, decoding every response record
    pub fn decode(input: Bytes) -> Result<Bundle, WireError> {
        BundleReader::new(input)?.into_bundle()
    }
}

/// A bundle whose framing, sections and index have been checked. Response
/// records are only decoded when asked for.
#[derive(Debug, Clone)]
pub struct BundleReader {
    version: Version,
    primary_url: Option<Url>,
    manifest_url: Option<Url>,
    signatures: Option<Signatures>,
    entries: Vec<IndexEntry>,
    responses: Bytes,
}

impl BundleReader {
    /// Check the structure of `input` without decoding response records
    pub fn new(input: Bytes) -> Result<Self, WireError> {
        let total = input.len() as u64;
        let mut dec = Decoder::new(input);

        let magic = dec.take(HEADER_MAGIC_LEN, "header magic")?;
        let version = Version::from_header_magic(&magic)?;
        if let Some(tag) = version.version_tag() {
            let found = dec.take(tag.len(), "version tag")?;
            if found.as_ref() != tag {
                return Err(WireError::VersionMismatch(version.as_str()));
            }
        }

        let mut primary_url = None;
        if version.has_primary_url_field() {
            primary_url = Some(parse_exchange_url(&dec.decode_text()?)?);
        }

        let table = decode_section_table(dec.decode_bytes()?)?;
        let count = dec.decode_array_header()? as u64;
        if count != table.len() as u64 {
            return Err(WireError::SectionCount {
                table: table.len(),
                array: count,
            });
        }
        match table.last() {
            Some((name, _)) if name == RESPONSES => {}
            _ if !table.iter().any(|(n, _)| n == RESPONSES) => {
                return Err(WireError::MissingSection(RESPONSES))
            }
            _ => return Err(WireError::ResponsesNotLast),
        }

        let mut sections: Vec<(String, Bytes)> = Vec::with_capacity(table.len());
        for (name, length) in table {
            let length = usize::try_from(length).map_err(|_| WireError::Length(length))?;
            let bytes = dec
                .take(length, "section")
                .map_err(|_| WireError::SectionRange(name.clone()))?;
            sections.push((name, bytes));
        }

        let footer = dec.take(dec.remaining(), "footer")?;
        if footer.len() != FOOTER_SIZE || footer[0] != 0x48 {
            return Err(WireError::Footer);
        }
        let mut declared = [0u8; 8];
        declared.copy_from_slice(&footer[1..]);
        let declared = u64::from_be_bytes(declared);
        if declared != total {
            return Err(WireError::BundleLength {
                declared,
                actual: total,
            });
        }

        let section = |name: &str| {
            sections
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, b)| b.clone())
        };

        let responses = section(RESPONSES).ok_or(WireError::MissingSection(RESPONSES))?;
        let mut responses_dec = Decoder::new(responses.clone());
        let response_count = responses_dec.decode_array_header()? as u64;
        let first_record = responses_dec.position() as u64;

        let index = section(INDEX).ok_or(WireError::MissingSection(INDEX))?;
        let mut entries = decode_index(version, index, first_record)?;
        if entries.len() as u64 != response_count {
            return Err(WireError::ResponseCount {
                index: entries.len(),
                responses: response_count,
            });
        }

        entries.sort_by_key(|e| e.offset);
        for entry in &entries {
            let end = entry.offset.checked_add(entry.length);
            let in_range = entry.offset >= first_record
                && end.map_or(false, |end| end <= responses.len() as u64);
            if !in_range {
                return Err(WireError::ResponseRange {
                    offset: entry.offset,
                    length: entry.length,
                });
            }
        }

        let mut reader = BundleReader {
            version,
            primary_url,
            manifest_url: None,
            signatures: None,
            entries,
            responses,
        };

        for (name, bytes) in &sections {
            match name.as_str() {
                INDEX | RESPONSES => {}
                MANIFEST => {
                    reader.manifest_url = Some(decode_url_section(bytes.clone())?);
                }
                PRIMARY if version.has_primary_section() => {
                    reader.primary_url = Some(decode_url_section(bytes.clone())?);
                }
                SIGNATURES if version.supports_signatures() => {
                    reader.signatures = Some(Signatures::decode(bytes)?);
                }
                other => debug!(section = other, "skipping unknown section"),
            }
        }

        debug!(
            version = %version,
            responses = reader.entries.len(),
            "read bundle structure"
        );
        Ok(reader)
    }

    /// Format revision
    pub fn version(&self) -> Version {
        self.version
    }

    /// Primary URL, from the header or the `primary` section
    pub fn primary_url(&self) -> Option<&Url> {
        self.primary_url.as_ref()
    }

    /// Manifest URL
    pub fn manifest_url(&self) -> Option<&Url> {
        self.manifest_url.as_ref()
    }

    /// Signatures section
    pub fn signatures(&self) -> Option<&Signatures> {
        self.signatures.as_ref()
    }

    /// Number of exchanges
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bundle has no exchanges
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Requests in response order
    pub fn requests(&self) -> impl Iterator<Item = &Request> {
        self.entries.iter().map(|e| &e.request)
    }

    /// Decode the exchange at `index`, or `None` past the end
    pub fn exchange(&self, index: usize) -> Option<Result<Exchange, WireError>> {
        let entry = self.entries.get(index)?;
        let start = entry.offset as usize;
        let record = self.responses.slice(start..start + entry.length as usize);
        Some(Response::decode_record(record).map(|r| Exchange::new(entry.request.clone(), r)))
    }

    /// Decode each exchange as the iterator advances
    pub fn exchanges(&self) -> impl Iterator<Item = Result<Exchange, WireError>> + '_ {
        (0..self.entries.len()).filter_map(|i| self.exchange(i))
    }

    /// Decode every response record
    pub fn into_bundle(self) -> Result<Bundle, WireError> {
        let exchanges = self.exchanges().collect::<Result<Vec<_>, _>>()?;
        Ok(Bundle {
            version: self.version,
            primary_url: self.primary_url,
            exchanges,
            manifest_url: self.manifest_url,
            signatures: self.signatures,
        })
    }
}

fn text_item(text: &str) -> Bytes {
    let mut enc = Encoder::new();
    enc.encode_text(text);
    enc.finish()
}

fn decode_url_section(raw: Bytes) -> Result<Url, WireError> {
    let mut dec = Decoder::new(raw);
    let url = parse_exchange_url(&dec.decode_text()?)?;
    if !dec.is_empty() {
        return Err(WireError::TrailingBytes("url section"));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderList;
    use crate::signatures::{Authority, VouchedSubset};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn response(body: &'static [u8]) -> Response {
        let headers: HeaderList = [("Content-Type", "text/html"), ("Cache-Control", "no-store")]
            .into_iter()
            .collect();
        Response::new(200, headers, Bytes::from_static(body))
    }

    fn sample(version: Version) -> Bundle {
        let mut bundle = Bundle::new(version)
            .with_manifest_url(url("https://example.com/manifest.webmanifest"))
            .with_exchange(Exchange::get(url("https://example.com/"), response(b"<h1>hi</h1>")))
            .with_exchange(Exchange::get(url("https://example.com/app.js"), response(b"run()")))
            .with_exchange(Exchange::get(url("https://example.com/empty"), response(b"")));
        if version != Version::Unversioned {
            bundle.primary_url = Some(url("https://example.com/"));
        }
        bundle
    }

    /// Byte offset of the section-length table.
    fn table_offset(bundle: &Bundle) -> usize {
        let mut offset = HEADER_MAGIC_LEN;
        offset += bundle.version.version_tag().map_or(0, |t| t.len());
        if let (true, Some(url)) = (bundle.version.has_primary_url_field(), &bundle.primary_url) {
            offset += text_item(url.as_str()).len();
        }
        offset
    }

    #[test]
    fn test_round_trip_all_versions() {
        for version in Version::ALL {
            let bundle = sample(version);
            let encoded = bundle.encode().unwrap();
            let decoded = Bundle::decode(encoded.clone()).unwrap();
            assert_eq!(decoded, bundle, "round trip for {version}");

            let mut written = Vec::new();
            let n = bundle.write_to(&mut written).unwrap();
            assert_eq!(n, written.len() as u64);
            assert_eq!(written, encoded.to_vec());
        }
    }

    #[test]
    fn test_unversioned_keeps_request_headers() {
        let mut bundle = sample(Version::Unversioned);
        bundle.exchanges[0].request.headers.append("Accept", "text/html");
        let decoded = Bundle::decode(bundle.encode().unwrap()).unwrap();
        assert_eq!(
            decoded.exchanges[0].request.headers.get("accept").as_deref(),
            Some("text/html")
        );
    }

    #[test]
    fn test_round_trip_with_signatures() {
        let mut bundle = sample(Version::B2);
        bundle.signatures = Some(Signatures {
            authorities: vec![Authority::new(Bytes::from_static(b"cert"))],
            vouched_subsets: vec![VouchedSubset {
                authority: 0,
                sig: Bytes::from_static(b"sig"),
                signed: Bytes::from_static(b"\xa0"),
            }],
        });
        let decoded = Bundle::decode(bundle.encode().unwrap()).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn test_layout() {
        let bundle = sample(Version::B2);
        let encoded = bundle.encode().unwrap();
        assert_eq!(&encoded[..10], &Version::B2.header_magic());
        assert_eq!(&encoded[10..15], b"\x44b2\x00\x00");

        let footer = &encoded[encoded.len() - FOOTER_SIZE..];
        assert_eq!(footer[0], 0x48);
        assert_eq!(
            u64::from_be_bytes(footer[1..].try_into().unwrap()),
            encoded.len() as u64
        );

        let mut dec = Decoder::new(encoded.slice(table_offset(&bundle)..));
        let table = decode_section_table(dec.decode_bytes().unwrap()).unwrap();
        let names: Vec<&str> = table.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec![INDEX, PRIMARY, MANIFEST, RESPONSES]);
        assert_eq!(dec.decode_array_header().unwrap(), 4);
    }

    #[test]
    fn test_capability_errors() {
        let mut b1 = sample(Version::B1);
        b1.primary_url = None;
        assert!(matches!(b1.encode(), Err(WireError::MissingPrimaryUrl(_))));

        let mut unversioned = sample(Version::Unversioned);
        unversioned.signatures = Some(Signatures::default());
        assert!(matches!(
            unversioned.encode(),
            Err(WireError::Unsupported { feature: "signatures", .. })
        ));

        let dup = Bundle::new(Version::Unversioned)
            .with_exchange(Exchange::get(url("https://example.com/"), response(b"a")))
            .with_exchange(Exchange::get(url("https://example.com/"), response(b"b")));
        let err = dup.encode().unwrap_err();
        assert!(err.to_string().contains("does not support variants"));
    }

    #[test]
    fn test_decode_rejects_bad_magic_and_tag() {
        let encoded = sample(Version::B2).encode().unwrap();

        let mut bad = encoded.to_vec();
        bad[1] = 0x49;
        assert!(matches!(Bundle::decode(Bytes::from(bad)), Err(WireError::Magic)));

        // b2 magic followed by the b1 tag
        let mut mismatched = encoded.to_vec();
        mismatched[12] = b'1';
        assert!(matches!(
            Bundle::decode(Bytes::from(mismatched)),
            Err(WireError::VersionMismatch("b2"))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_footer() {
        let encoded = sample(Version::B2).encode().unwrap();

        let mut wrong_len = encoded.to_vec();
        let last = wrong_len.len() - 1;
        wrong_len[last] ^= 0x01;
        assert!(matches!(
            Bundle::decode(Bytes::from(wrong_len)),
            Err(WireError::BundleLength { .. })
        ));

        let mut extra = encoded.to_vec();
        extra.push(0);
        assert!(matches!(Bundle::decode(Bytes::from(extra)), Err(WireError::Footer)));

        let truncated = encoded.slice(..encoded.len() - 20);
        assert!(Bundle::decode(truncated).is_err());
    }

    /// Assemble a bundle by hand from raw sections.
    fn raw_bundle(version: Version, sections: &[(&str, Bytes)], count: usize) -> Bytes {
        let table: Vec<(&str, usize)> = sections.iter().map(|(n, b)| (*n, b.len())).collect();
        let mut enc = Encoder::new();
        enc.encode_raw(&version.header_magic());
        if let Some(tag) = version.version_tag() {
            enc.encode_raw(tag);
        }
        enc.encode_raw(&encode_section_table(&table));
        enc.encode_array_header(count);
        for (_, bytes) in sections {
            enc.encode_raw(bytes);
        }
        let total = (enc.len() + FOOTER_SIZE) as u64;
        enc.encode_raw(&[0x48]);
        enc.encode_raw(&total.to_be_bytes());
        enc.finish()
    }

    fn empty_array() -> Bytes {
        Bytes::from_static(&[0x80])
    }

    #[test]
    fn test_decode_section_structure_errors() {
        let index = Bytes::from_static(&[0xa0]);

        let not_last = raw_bundle(
            Version::B2,
            &[(RESPONSES, empty_array()), (INDEX, index.clone())],
            2,
        );
        assert!(matches!(Bundle::decode(not_last), Err(WireError::ResponsesNotLast)));

        let missing = raw_bundle(Version::B2, &[(INDEX, index.clone())], 1);
        assert!(matches!(
            Bundle::decode(missing),
            Err(WireError::MissingSection(RESPONSES))
        ));

        let bad_count = raw_bundle(
            Version::B2,
            &[(INDEX, index.clone()), (RESPONSES, empty_array())],
            4,
        );
        assert!(matches!(
            Bundle::decode(bad_count),
            Err(WireError::SectionCount { table: 2, array: 4 })
        ));

        let minimal = raw_bundle(
            Version::B2,
            &[("future", text_item("x")), (INDEX, index), (RESPONSES, empty_array())],
            3,
        );
        let decoded = Bundle::decode(minimal).unwrap();
        assert!(decoded.exchanges.is_empty());
    }

    #[test]
    fn test_decode_response_cross_checks() {
        let mut responses = ResponsesStaging::new();
        let mut index = IndexStaging::new(Version::B2);
        let exchange = Exchange::get(url("https://example.com/"), response(b"x"));
        let slot = responses.add(&exchange.response).unwrap();
        index.add(&exchange, slot).unwrap();
        let responses = responses.finalize();
        let index = index.finalize(&responses).unwrap();

        // Responses array announces two records but the index lists one.
        let mut two = responses.bytes().to_vec();
        two[0] = 0x82;
        let miscounted = raw_bundle(
            Version::B2,
            &[(INDEX, index.clone()), (RESPONSES, Bytes::from(two))],
            2,
        );
        assert!(matches!(
            Bundle::decode(miscounted),
            Err(WireError::ResponseCount { index: 1, responses: 2 })
        ));

        // Index points past the end of the responses section.
        let mut enc = Encoder::new();
        enc.encode_map_header(1);
        enc.encode_text("https://example.com/");
        enc.encode_array_header(3);
        enc.encode_bytes(b"");
        enc.encode_uint(1);
        enc.encode_uint(responses.len() as u64);
        let out_of_range = raw_bundle(
            Version::B2,
            &[(INDEX, enc.finish()), (RESPONSES, responses.bytes().clone())],
            2,
        );
        assert!(matches!(
            Bundle::decode(out_of_range),
            Err(WireError::ResponseRange { .. })
        ));
    }

    #[test]
    fn test_reader_decodes_records_on_demand() {
        let mut responses = ResponsesStaging::new();
        let mut index = IndexStaging::new(Version::B2);
        let exchange = Exchange::get(url("https://example.com/"), response(b"x"));
        let slot = responses.add(&exchange.response).unwrap();
        index.add(&exchange, slot).unwrap();
        let responses = responses.finalize();
        let index = index.finalize(&responses).unwrap();

        // First byte of the only record is no longer the [headers, body] marker.
        let mut broken = responses.bytes().to_vec();
        broken[1] = 0x83;
        let bundle = raw_bundle(
            Version::B2,
            &[(INDEX, index), (RESPONSES, Bytes::from(broken))],
            2,
        );

        let reader = BundleReader::new(bundle.clone()).unwrap();
        assert_eq!(reader.len(), 1);
        assert_eq!(
            reader.requests().next().map(|r| r.url.as_str()),
            Some("https://example.com/")
        );
        assert!(matches!(reader.exchange(0), Some(Err(WireError::ResponseRecord))));
        assert!(reader.exchange(1).is_none());
        assert!(matches!(Bundle::decode(bundle), Err(WireError::ResponseRecord)));

        let good = sample(Version::B2);
        let reader = BundleReader::new(good.encode().unwrap()).unwrap();
        let exchanges: Vec<Exchange> = reader.exchanges().collect::<Result<_, _>>().unwrap();
        assert_eq!(exchanges, good.exchanges);
    }

    #[test]
    fn test_decode_huge_section_table_count() {
        let mut enc = Encoder::new();
        enc.encode_raw(&Version::B2.header_magic());
        enc.encode_raw(Version::B2.version_tag().unwrap());
        enc.encode_bytes(&[0x9b, 0x40, 0, 0, 0, 0, 0, 0, 0]);
        assert!(Bundle::decode(enc.finish()).is_err());
    }

    #[test]
    fn test_decode_rejects_repeated_index_url() {
        let mut responses = ResponsesStaging::new();
        let first = responses.add(&response(b"one")).unwrap();
        let second = responses.add(&response(b"two")).unwrap();
        let responses = responses.finalize();

        let mut enc = Encoder::new();
        enc.encode_map_header(2);
        for slot in [first, second] {
            let (offset, length) = responses.location(slot);
            enc.encode_text("https://example.com/");
            enc.encode_array_header(3);
            enc.encode_bytes(b"");
            enc.encode_uint(offset);
            enc.encode_uint(length);
        }
        let bundle = raw_bundle(
            Version::B2,
            &[(INDEX, enc.finish()), (RESPONSES, responses.bytes().clone())],
            2,
        );
        assert!(matches!(Bundle::decode(bundle), Err(WireError::DuplicateMapKey)));
    }

    #[test]
    fn test_decode_rejects_url_with_fragment() {
        let mut enc = Encoder::new();
        enc.encode_map_header(1);
        enc.encode_text("https://example.com/#top");
        enc.encode_array_header(3);
        enc.encode_bytes(b"");
        enc.encode_uint(1);
        enc.encode_uint(0);
        let bundle = raw_bundle(
            Version::B2,
            &[(INDEX, enc.finish()), (RESPONSES, Bytes::from_static(&[0x81]))],
            2,
        );
        assert!(matches!(Bundle::decode(bundle), Err(WireError::Url { .. })));
    }
}

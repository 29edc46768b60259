//! Section staging and the section-length table.
//!
//! Offsets into the responses section are only known once every response has
//! been serialized, so staging is split in two states: [`ResponsesStaging`]
//! accepts responses, and [`ResponsesStaging::finalize`] consumes it into a
//! [`FinalizedResponses`] from which locations and bytes can be read.

use crate::cbor::{head_len, Decoder, Encoder, MapBuilder};
use crate::exchange::{Exchange, Request, Response};
use crate::version::Version;
use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::{BTreeMap, HashSet};

/// `index` section name
pub const INDEX: &str = "index";
/// `manifest` section name
pub const MANIFEST: &str = "manifest";
/// `primary` section name
pub const PRIMARY: &str = "primary";
/// `signatures` section name
pub const SIGNATURES: &str = "signatures";
/// `responses` section name
pub const RESPONSES: &str = "responses";

/// Response header carrying the variants value
pub const VARIANTS_HEADER: &str = "variants";

/// Handle to a staged response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSlot(usize);

/// Responses being serialized
#[derive(Debug, Default)]
pub struct ResponsesStaging {
    records: BytesMut,
    spans: Vec<(usize, usize)>,
}

impl ResponsesStaging {
    /// Create an empty staging area
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a response and return its slot
    pub fn add(&mut self, response: &Response) -> Result<ResponseSlot, WireError> {
        let record = response.encode_record()?;
        let offset = self.records.len();
        self.records.put_slice(&record);
        self.spans.push((offset, record.len()));
        Ok(ResponseSlot(self.spans.len() - 1))
    }

    /// Number of staged responses
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether nothing was staged
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Prepend the array header and fix every location
    pub fn finalize(self) -> FinalizedResponses {
        let mut enc = Encoder::with_capacity(self.records.len() + 9);
        enc.encode_array_header(self.spans.len());
        let header_len = enc.len();
        enc.encode_raw(&self.records);
        FinalizedResponses {
            bytes: enc.finish(),
            header_len,
            spans: self.spans,
        }
    }
}

/// Serialized responses section
#[derive(Debug, Clone)]
pub struct FinalizedResponses {
    bytes: Bytes,
    header_len: usize,
    spans: Vec<(usize, usize)>,
}

impl FinalizedResponses {
    /// `(offset, length)` of a response, offset relative to the section start
    pub fn location(&self, slot: ResponseSlot) -> (u64, u64) {
        let (offset, length) = self.spans[slot.0];
        ((self.header_len + offset) as u64, length as u64)
    }

    /// Section bytes
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Section length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the section is empty (never true: it always holds an array header)
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug)]
struct UrlEntry {
    variants: Vec<Option<String>>,
    slots: Vec<ResponseSlot>,
}

/// Index being built alongside [`ResponsesStaging`]
#[derive(Debug)]
pub struct IndexStaging {
    version: Version,
    requests: Vec<(Bytes, ResponseSlot)>,
    urls: BTreeMap<String, UrlEntry>,
    seen: HashSet<String>,
}

impl IndexStaging {
    /// Create an empty index for `version`
    pub fn new(version: Version) -> Self {
        Self {
            version,
            requests: Vec::new(),
            urls: BTreeMap::new(),
            seen: HashSet::new(),
        }
    }

    /// Record an exchange whose response was staged at `slot`
    pub fn add(&mut self, exchange: &Exchange, slot: ResponseSlot) -> Result<(), WireError> {
        let url = exchange.request.url.as_str().to_string();
        if !self.version.supports_variants() && !self.seen.insert(url.clone()) {
            return Err(WireError::Unsupported {
                version: self.version.as_str(),
                feature: "variants",
            });
        }

        if self.version.has_request_headers_in_index() {
            self.requests
                .push((exchange.request.encode_headers()?, slot));
        } else {
            let entry = self.urls.entry(url).or_insert_with(|| UrlEntry {
                variants: Vec::new(),
                slots: Vec::new(),
            });
            entry
                .variants
                .push(exchange.response.headers.get(VARIANTS_HEADER));
            entry.slots.push(slot);
        }
        Ok(())
    }

    /// Encode the index against the final response locations
    pub fn finalize(self, responses: &FinalizedResponses) -> Result<Bytes, WireError> {
        if self.version.has_request_headers_in_index() {
            let mut enc = Encoder::new();
            enc.encode_array_header(self.requests.len() * 2);
            for (headers, slot) in &self.requests {
                let (_, length) = responses.location(*slot);
                enc.encode_bytes(headers);
                enc.encode_uint(length);
            }
            return Ok(enc.finish());
        }

        let mut map = MapBuilder::new();
        for (url, entry) in self.urls {
            if entry.slots.len() > 1 && entry.variants.iter().any(Option::is_none) {
                return Err(WireError::MissingVariants(url));
            }
            let variants = entry.variants[0].clone().unwrap_or_default();
            map = map.insert_with(
                |k| k.encode_text(&url),
                |v| {
                    v.encode_array_header(1 + 2 * entry.slots.len());
                    v.encode_bytes(variants.as_bytes());
                    for slot in &entry.slots {
                        let (offset, length) = responses.location(*slot);
                        v.encode_uint(offset);
                        v.encode_uint(length);
                    }
                },
            );
        }
        map.build()
    }
}

/// Encode the section-length table as a byte string
pub fn encode_section_table(sections: &[(&str, usize)]) -> Bytes {
    let mut table = Encoder::new();
    table.encode_array_header(sections.len() * 2);
    for (name, len) in sections {
        table.encode_text(name);
        table.encode_uint(*len as u64);
    }
    let table = table.finish();

    let mut enc = Encoder::with_capacity(table.len() + head_len(table.len() as u64));
    enc.encode_bytes(&table);
    enc.finish()
}

/// Decode the contents of the section-length table byte string
pub fn decode_section_table(raw: Bytes) -> Result<Vec<(String, u64)>, WireError> {
    let mut dec = Decoder::new(raw);
    let items = dec.decode_array_header()?;
    if items % 2 != 0 {
        return Err(WireError::SectionTable);
    }
    // The count is untrusted; each pair needs at least two bytes.
    let mut sections: Vec<(String, u64)> =
        Vec::with_capacity((items / 2).min(dec.remaining() / 2));
    for _ in 0..items / 2 {
        let name = dec.decode_text()?;
        let length = dec.decode_uint()?;
        if sections.iter().any(|(n, _)| *n == name) {
            return Err(WireError::DuplicateSection(name));
        }
        sections.push((name, length));
    }
    if !dec.is_empty() {
        return Err(WireError::TrailingBytes("section-length table"));
    }
    Ok(sections)
}

/// Index entry resolved against the responses section
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Request rebuilt from the index
    pub request: Request,
    /// Offset relative to the responses section start
    pub offset: u64,
    /// Record length
    pub length: u64,
}

/// Parse the index section. `first_record` is where the first response
/// record starts inside the responses section.
pub fn decode_index(
    version: Version,
    raw: Bytes,
    first_record: u64,
) -> Result<Vec<IndexEntry>, WireError> {
    let mut dec = Decoder::new(raw);
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    if version.has_request_headers_in_index() {
        let items = dec.decode_array_header()?;
        if items % 2 != 0 {
            return Err(WireError::Index("odd number of items"));
        }
        let mut offset = first_record;
        for _ in 0..items / 2 {
            let request = Request::from_header_map(dec.decode_bytes()?)?;
            if !seen.insert(request.url.as_str().to_string()) {
                return Err(WireError::Unsupported {
                    version: version.as_str(),
                    feature: "variants",
                });
            }
            let length = dec.decode_uint()?;
            entries.push(IndexEntry {
                request,
                offset,
                length,
            });
            offset = offset.checked_add(length).ok_or(WireError::Length(length))?;
        }
    } else {
        let urls = dec.decode_map_header()?;
        for _ in 0..urls {
            let url = dec.decode_text()?;
            if !seen.insert(url.clone()) {
                return Err(WireError::DuplicateMapKey);
            }
            let request = Request::new(crate::exchange::parse_exchange_url(&url)?);
            let items = dec.decode_array_header()?;
            if items < 3 || items % 2 == 0 {
                return Err(WireError::Index("value must be [variants, (offset, length)+]"));
            }
            let variants = dec.decode_bytes()?;
            let pairs = (items - 1) / 2;
            if variants.is_empty() && pairs != 1 {
                return Err(WireError::Index("several responses without a variants value"));
            }
            for _ in 0..pairs {
                let offset = dec.decode_uint()?;
                let length = dec.decode_uint()?;
                entries.push(IndexEntry {
                    request: request.clone(),
                    offset,
                    length,
                });
            }
        }
    }

    if !dec.is_empty() {
        return Err(WireError::TrailingBytes("index section"));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderList;
    use url::Url;

    fn exchange(url: &str, variants: Option<&str>) -> Exchange {
        let mut headers = HeaderList::new();
        if let Some(v) = variants {
            headers.append("Variants", v);
        }
        Exchange::get(
            Url::parse(url).unwrap(),
            Response::new(200, headers, Bytes::from_static(b"body")),
        )
    }

    fn stage(version: Version, exchanges: &[Exchange]) -> Result<(Bytes, FinalizedResponses), WireError> {
        let mut responses = ResponsesStaging::new();
        let mut index = IndexStaging::new(version);
        for e in exchanges {
            let slot = responses.add(&e.response)?;
            index.add(e, slot)?;
        }
        let responses = responses.finalize();
        Ok((index.finalize(&responses)?, responses))
    }

    #[test]
    fn test_locations_include_array_header() {
        let exchanges = [exchange("https://a.example/", None), exchange("https://b.example/", None)];
        let (_, responses) = stage(Version::B2, &exchanges).unwrap();
        let (off0, len0) = responses.location(ResponseSlot(0));
        let (off1, _) = responses.location(ResponseSlot(1));
        assert_eq!(off0, 1);
        assert_eq!(off1, off0 + len0);
        assert_eq!(responses.bytes()[0], 0x82);
    }

    #[test]
    fn test_index_round_trip() {
        let exchanges = [exchange("https://a.example/", None), exchange("https://b.example/", None)];
        for version in Version::ALL {
            let (index, responses) = stage(version, &exchanges).unwrap();
            let entries = decode_index(version, index, 1).unwrap();
            assert_eq!(entries.len(), 2);
            for entry in entries {
                let slot = if entry.request.url.as_str() == "https://a.example/" { 0 } else { 1 };
                assert_eq!((entry.offset, entry.length), responses.location(ResponseSlot(slot)));
            }
        }
    }

    #[test]
    fn test_variants_rules() {
        let plain = [exchange("https://a.example/", None), exchange("https://a.example/", None)];
        let err = stage(Version::Unversioned, &plain).unwrap_err();
        assert!(err.to_string().contains("does not support variants"));
        assert!(matches!(
            stage(Version::B2, &plain),
            Err(WireError::MissingVariants(_))
        ));

        let mixed = [
            exchange("https://a.example/", Some("accept-language;en;fr")),
            exchange("https://a.example/", None),
        ];
        assert!(matches!(stage(Version::B1, &mixed), Err(WireError::MissingVariants(_))));

        let varied = [
            exchange("https://a.example/", Some("accept-language;en;fr")),
            exchange("https://a.example/", Some("accept-language;en;fr")),
        ];
        let (index, _) = stage(Version::B1, &varied).unwrap();
        assert_eq!(decode_index(Version::B1, index, 1).unwrap().len(), 2);
    }

    #[test]
    fn test_section_table() {
        let encoded = encode_section_table(&[(INDEX, 10), (RESPONSES, 20)]);
        let mut dec = Decoder::new(encoded);
        let table = dec.decode_bytes().unwrap();
        assert_eq!(
            decode_section_table(table).unwrap(),
            vec![(INDEX.to_string(), 10), (RESPONSES.to_string(), 20)]
        );

        let duplicate = encode_section_table(&[(INDEX, 1), (INDEX, 2)]);
        let mut dec = Decoder::new(duplicate);
        assert!(matches!(
            decode_section_table(dec.decode_bytes().unwrap()),
            Err(WireError::DuplicateSection(_))
        ));
    }

    #[test]
    fn test_section_table_huge_count() {
        // array head announcing 2^62 items, nothing after it
        let table = Bytes::from_static(&[0x9b, 0x40, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            decode_section_table(table),
            Err(WireError::Truncated(_))
        ));
    }

    #[test]
    fn test_index_rejects_repeated_url() {
        // {"https://a.example/": [h'', 1, 10], "https://a.example/": [h'', 11, 10]}
        let mut enc = Encoder::new();
        enc.encode_map_header(2);
        for offset in [1, 11] {
            enc.encode_text("https://a.example/");
            enc.encode_array_header(3);
            enc.encode_bytes(b"");
            enc.encode_uint(offset);
            enc.encode_uint(10);
        }
        let index = enc.finish();
        for version in [Version::B1, Version::B2] {
            assert!(matches!(
                decode_index(version, index.clone(), 1),
                Err(WireError::DuplicateMapKey)
            ));
        }

        let request = Request::new(Url::parse("https://a.example/").unwrap())
            .encode_headers()
            .unwrap();
        let mut enc = Encoder::new();
        enc.encode_array_header(4);
        for _ in 0..2 {
            enc.encode_bytes(&request);
            enc.encode_uint(10);
        }
        let err = decode_index(Version::Unversioned, enc.finish(), 1).unwrap_err();
        assert!(err.to_string().contains("does not support variants"));
    }
}

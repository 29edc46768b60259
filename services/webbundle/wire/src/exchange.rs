//! Exchanges: one request/response pair stored in a bundle.

use crate::cbor::{Decoder, Encoder, MapBuilder};
use crate::headers::{validate_name, validate_value, HeaderList};
use crate::mice;
use crate::version::Version;
use crate::WireError;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

/// Request pseudo-header carrying the method
pub const PSEUDO_METHOD: &str = ":method";
/// Request pseudo-header carrying the URL
pub const PSEUDO_URL: &str = ":url";
/// Response pseudo-header carrying the status
pub const PSEUDO_STATUS: &str = ":status";

/// Bundled request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Absolute request URL
    pub url: Url,
    /// Request headers (only stored by the unversioned format)
    pub headers: HeaderList,
}

impl Request {
    /// Create a request without headers
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderList::new(),
        }
    }

    /// Canonical header map including `:method` and `:url`
    pub fn encode_headers(&self) -> Result<Bytes, WireError> {
        self.headers.validate()?;
        let mut map = MapBuilder::new()
            .insert_bytes(PSEUDO_METHOD.as_bytes(), b"GET")
            .insert_bytes(PSEUDO_URL.as_bytes(), self.url.as_str().as_bytes());
        for (name, value) in self.headers.canonical_fields() {
            map = map.insert_bytes(name.as_bytes(), value.as_bytes());
        }
        map.build()
    }

    /// Rebuild a request from a decoded header map
    pub fn from_header_map(raw: Bytes) -> Result<Self, WireError> {
        let (headers, pseudos) = decode_header_map(raw)?;
        expect_pseudos(&pseudos, &[PSEUDO_METHOD, PSEUDO_URL])?;
        let method = &pseudos[PSEUDO_METHOD];
        if method != "GET" {
            return Err(WireError::Method(method.clone()));
        }
        let url = parse_exchange_url(&pseudos[PSEUDO_URL])?;
        Ok(Self { url, headers })
    }
}

/// Bundled response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Three-digit status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderList,
    /// Response payload
    pub body: Bytes,
}

impl Response {
    /// Create a response
    pub fn new(status: u16, headers: HeaderList, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Canonical header map including `:status`
    pub fn encode_headers(&self) -> Result<Bytes, WireError> {
        if !(100..=999).contains(&self.status) {
            return Err(WireError::Status(self.status.to_string()));
        }
        self.headers.validate()?;
        let status = self.status.to_string();
        let mut map = MapBuilder::new().insert_bytes(PSEUDO_STATUS.as_bytes(), status.as_bytes());
        for (name, value) in self.headers.canonical_fields() {
            map = map.insert_bytes(name.as_bytes(), value.as_bytes());
        }
        map.build()
    }

    /// SHA-256 of the canonical header map
    pub fn header_sha256(&self) -> Result<[u8; 32], WireError> {
        let encoded = self.encode_headers()?;
        Ok(Sha256::digest(&encoded).into())
    }

    /// `[headers, body]` record as stored in the responses section
    pub fn encode_record(&self) -> Result<Bytes, WireError> {
        let headers = self.encode_headers()?;
        let mut enc = Encoder::with_capacity(headers.len() + self.body.len() + 16);
        enc.encode_array_header(2);
        enc.encode_bytes(&headers);
        enc.encode_bytes(&self.body);
        Ok(enc.finish())
    }

    /// Parse a response record that must occupy all of `raw`
    pub fn decode_record(raw: Bytes) -> Result<Self, WireError> {
        let mut dec = Decoder::new(raw);
        if dec.peek_u8() != Some(0x82) {
            return Err(WireError::ResponseRecord);
        }
        dec.decode_array_header()?;
        let header_map = dec.decode_bytes()?;
        let body = dec.decode_bytes()?;
        if !dec.is_empty() {
            return Err(WireError::ResponseLength);
        }

        let (headers, pseudos) = decode_header_map(header_map)?;
        expect_pseudos(&pseudos, &[PSEUDO_STATUS])?;
        let status = parse_status(&pseudos[PSEUDO_STATUS])?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

/// Request/response pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// The request
    pub request: Request,
    /// The response
    pub response: Response,
}

impl Exchange {
    /// Pair a request with its response
    pub fn new(request: Request, response: Response) -> Self {
        Self { request, response }
    }

    /// Convenience constructor for a GET of `url`
    pub fn get(url: Url, response: Response) -> Self {
        Self::new(Request::new(url), response)
    }

    /// MICE-encode the response body in place.
    ///
    /// Sets `content-encoding` and the digest header and returns the payload
    /// integrity identifier to record in a signed subset.
    pub fn add_payload_integrity(
        &mut self,
        version: Version,
        record_size: usize,
    ) -> Result<&'static str, WireError> {
        let encoding = version.mice_encoding().ok_or(WireError::Unsupported {
            version: version.as_str(),
            feature: "payload integrity",
        })?;
        let (wire, digest) = mice::encode(&self.response.body, record_size)?;
        self.response.body = wire;
        self.response
            .headers
            .insert("content-encoding", encoding.content_encoding);
        self.response.headers.insert(encoding.digest_header, digest);
        Ok(encoding.integrity_identifier)
    }
}

/// Decode a CBOR map of byte strings into regular headers and pseudo-headers.
pub fn decode_header_map(
    raw: Bytes,
) -> Result<(HeaderList, BTreeMap<String, String>), WireError> {
    let mut dec = Decoder::new(raw);
    let pairs = dec.decode_map_header()?;
    let mut headers = HeaderList::new();
    let mut pseudos = BTreeMap::new();

    for _ in 0..pairs {
        let name = dec.decode_bytes()?;
        let value = dec.decode_bytes()?;
        let name = String::from_utf8(name.to_vec())
            .map_err(|e| WireError::HeaderName(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;
        let value = String::from_utf8(value.to_vec()).map_err(|_| WireError::HeaderValue(name.clone()))?;

        if headers.contains(&name) || pseudos.contains_key(&name) {
            return Err(WireError::DuplicateMapKey);
        }
        if let Some(pseudo) = name.strip_prefix(':') {
            validate_name(pseudo)?;
            pseudos.insert(name, value);
        } else {
            validate_name(&name)?;
            validate_value(&name, &value)?;
            headers.append(name, value);
        }
    }
    if !dec.is_empty() {
        return Err(WireError::TrailingBytes("header map"));
    }
    Ok((headers, pseudos))
}

fn expect_pseudos(found: &BTreeMap<String, String>, expected: &[&str]) -> Result<(), WireError> {
    let matches = found.len() == expected.len() && expected.iter().all(|p| found.contains_key(*p));
    if matches {
        Ok(())
    } else {
        let names: Vec<&str> = found.keys().map(String::as_str).collect();
        Err(WireError::PseudoHeaders(names.join(",")))
    }
}

fn parse_status(raw: &str) -> Result<u16, WireError> {
    if raw.len() != 3 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WireError::Status(raw.to_string()));
    }
    raw.parse().map_err(|_| WireError::Status(raw.to_string()))
}

/// Parse a URL stored in a bundle: absolute, no fragment, no credentials.
pub fn parse_exchange_url(raw: &str) -> Result<Url, WireError> {
    let url = Url::parse(raw).map_err(|e| WireError::Url {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    let reject = |reason: &str| WireError::Url {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    if url.fragment().is_some() {
        return Err(reject("url has a fragment"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(reject("url has credentials"));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::{parse_value, value_map};

    fn sample_response() -> Response {
        let headers: HeaderList = [("Content-Type", "text/plain"), ("X-Multi", "a"), ("x-multi", "b")]
            .into_iter()
            .collect();
        Response::new(200, headers, Bytes::from_static(b"hello"))
    }

    #[test]
    fn test_response_headers_are_canonical() {
        let encoded = sample_response().encode_headers().unwrap();
        assert!(crate::deterministic::validate(&encoded).is_ok());

        let value = parse_value(&encoded, "headers").unwrap();
        let entries = value_map(&value, "headers").unwrap();
        let keys: Vec<Vec<u8>> = entries
            .iter()
            .map(|(k, _)| k.as_bytes().unwrap().clone())
            .collect();
        assert_eq!(
            keys,
            vec![b":status".to_vec(), b"x-multi".to_vec(), b"content-type".to_vec()]
        );
    }

    #[test]
    fn test_response_record_round_trip() {
        let response = sample_response();
        let record = response.encode_record().unwrap();
        assert_eq!(record[0], 0x82);
        let decoded = Response::decode_record(record).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.headers.get("x-multi").as_deref(), Some("a,b"));
    }

    #[test]
    fn test_response_record_slack_rejected() {
        let mut raw = sample_response().encode_record().unwrap().to_vec();
        raw.push(0x00);
        assert!(matches!(
            Response::decode_record(Bytes::from(raw)),
            Err(WireError::ResponseLength)
        ));
    }

    #[test]
    fn test_invalid_status() {
        let response = Response::new(42, HeaderList::new(), Bytes::new());
        assert!(matches!(response.encode_headers(), Err(WireError::Status(_))));
        assert!(parse_status("2x0").is_err());
        assert_eq!(parse_status("404").unwrap(), 404);
    }

    #[test]
    fn test_request_header_map() {
        let mut request = Request::new(Url::parse("https://example.com/a").unwrap());
        request.headers.append("Accept", "text/html");
        let encoded = request.encode_headers().unwrap();
        let decoded = Request::from_header_map(encoded).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_request_pseudo_rules() {
        let missing_url = MapBuilder::new()
            .insert_bytes(b":method", b"GET")
            .build()
            .unwrap();
        assert!(matches!(
            Request::from_header_map(missing_url),
            Err(WireError::PseudoHeaders(_))
        ));

        let post = MapBuilder::new()
            .insert_bytes(b":method", b"POST")
            .insert_bytes(b":url", b"https://example.com/")
            .build()
            .unwrap();
        assert!(matches!(Request::from_header_map(post), Err(WireError::Method(_))));

        let upper = MapBuilder::new()
            .insert_bytes(b":status", b"200")
            .insert_bytes(b"Content-Type", b"text/plain")
            .build()
            .unwrap();
        assert!(matches!(decode_header_map(upper), Err(WireError::HeaderName(_))));
    }

    #[test]
    fn test_url_rules() {
        assert!(parse_exchange_url("https://example.com/index.html").is_ok());
        assert!(parse_exchange_url("https://example.com/#frag").is_err());
        assert!(parse_exchange_url("https://user:pw@example.com/").is_err());
        assert!(parse_exchange_url("/relative").is_err());
    }

    #[test]
    fn test_add_payload_integrity() {
        let mut exchange = Exchange::get(
            Url::parse("https://example.com/").unwrap(),
            Response::new(200, HeaderList::new(), Bytes::from_static(b"When I grow up, I want to be a watermelon")),
        );
        let id = exchange.add_payload_integrity(Version::B2, 16).unwrap();
        assert_eq!(id, "digest/mi-sha256");
        assert_eq!(exchange.response.body.len(), 113);
        assert_eq!(
            exchange.response.headers.get("content-encoding").as_deref(),
            Some("mi-sha256")
        );
        assert_eq!(
            exchange.response.headers.get("digest").as_deref(),
            Some("mi-sha256=IVa9shfs0nyKEhHqtB3WVNANJ2Njm5KjQLjRtnbkYJ4")
        );

        let mut unsigned = exchange.clone();
        assert!(matches!(
            unsigned.add_payload_integrity(Version::Unversioned, 16),
            Err(WireError::Unsupported { .. })
        ));
    }
}

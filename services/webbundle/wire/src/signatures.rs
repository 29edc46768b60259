//! The `signatures` section.
//!
//! ```text
//! signatures     = [ authorities: [* augmented-cert], vouched-subsets: [* vouched-subset] ]
//! augmented-cert = { "cert": bstr, ? "ocsp": bstr, ? "sct": bstr }
//! vouched-subset = { "authority": uint, "sig": bstr, "signed": bstr }
//! ```

use crate::cbor::{
    map_get, parse_value, value_array, value_bytes, value_map, value_u64, Encoder, MapBuilder,
};
use crate::WireError;
use bytes::Bytes;

/// A certificate with its optional OCSP response and SCT list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    /// DER certificate
    pub cert: Bytes,
    /// DER OCSP response
    pub ocsp: Option<Bytes>,
    /// Signed certificate timestamp list
    pub sct: Option<Bytes>,
}

impl Authority {
    /// Authority carrying only a certificate
    pub fn new(cert: impl Into<Bytes>) -> Self {
        Self {
            cert: cert.into(),
            ocsp: None,
            sct: None,
        }
    }

    fn to_map(&self) -> MapBuilder {
        let mut map = MapBuilder::new().insert_text_bytes("cert", &self.cert);
        if let Some(ocsp) = &self.ocsp {
            map = map.insert_text_bytes("ocsp", ocsp);
        }
        if let Some(sct) = &self.sct {
            map = map.insert_text_bytes("sct", sct);
        }
        map
    }

    fn from_value(value: &ciborium::Value) -> Result<Self, WireError> {
        let map = value_map(value, "augmented certificate")?;
        let cert = map_get(map, "cert").ok_or(WireError::Cbor(
            "augmented certificate: missing cert".to_string(),
        ))?;
        let optional = |key: &'static str| -> Result<Option<Bytes>, WireError> {
            map_get(map, key)
                .map(|v| value_bytes(v, key).map(Bytes::copy_from_slice))
                .transpose()
        };
        Ok(Self {
            cert: Bytes::copy_from_slice(value_bytes(cert, "cert")?),
            ocsp: optional("ocsp")?,
            sct: optional("sct")?,
        })
    }
}

/// Signature over a signed subset, by one of the listed authorities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VouchedSubset {
    /// Index into [`Signatures::authorities`]
    pub authority: u64,
    /// Signature bytes
    pub sig: Bytes,
    /// The exact signed-subset bytes that were signed
    pub signed: Bytes,
}

impl VouchedSubset {
    fn to_map(&self) -> MapBuilder {
        MapBuilder::new()
            .insert_text_uint("authority", self.authority)
            .insert_text_bytes("sig", &self.sig)
            .insert_text_bytes("signed", &self.signed)
    }

    fn from_value(value: &ciborium::Value) -> Result<Self, WireError> {
        let map = value_map(value, "vouched subset")?;
        let field = |key: &'static str| {
            map_get(map, key).ok_or_else(|| WireError::Cbor(format!("vouched subset: missing {key}")))
        };
        Ok(Self {
            authority: value_u64(field("authority")?, "authority")?,
            sig: Bytes::copy_from_slice(value_bytes(field("sig")?, "sig")?),
            signed: Bytes::copy_from_slice(value_bytes(field("signed")?, "signed")?),
        })
    }
}

/// Contents of the `signatures` section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signatures {
    /// Certificates that may vouch for subsets
    pub authorities: Vec<Authority>,
    /// Signed subsets
    pub vouched_subsets: Vec<VouchedSubset>,
}

impl Signatures {
    /// Encode the section body
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut enc = Encoder::new();
        enc.encode_array_header(2);
        enc.encode_array_header(self.authorities.len());
        for authority in &self.authorities {
            enc.encode_map(authority.to_map())?;
        }
        enc.encode_array_header(self.vouched_subsets.len());
        for subset in &self.vouched_subsets {
            enc.encode_map(subset.to_map())?;
        }
        Ok(enc.finish())
    }

    /// Decode a section body
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let value = parse_value(raw, "signatures section")?;
        let items = value_array(&value, "signatures section")?;
        let [authorities, vouched] = items else {
            return Err(WireError::Cbor(
                "signatures section: expected two elements".to_string(),
            ));
        };
        Ok(Self {
            authorities: value_array(authorities, "authorities")?
                .iter()
                .map(Authority::from_value)
                .collect::<Result<_, _>>()?,
            vouched_subsets: value_array(vouched, "vouched subsets")?
                .iter()
                .map(VouchedSubset::from_value)
                .collect::<Result<_, _>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Signatures {
        Signatures {
            authorities: vec![
                Authority {
                    cert: Bytes::from_static(b"leaf"),
                    ocsp: Some(Bytes::from_static(b"ocsp")),
                    sct: None,
                },
                Authority::new(Bytes::from_static(b"issuer")),
            ],
            vouched_subsets: vec![VouchedSubset {
                authority: 0,
                sig: Bytes::from_static(b"sig"),
                signed: Bytes::from_static(b"\xa0"),
            }],
        }
    }

    #[test]
    fn test_signatures_round_trip() {
        let encoded = sample().encode().unwrap();
        assert!(crate::deterministic::validate(&encoded).is_ok());
        assert_eq!(Signatures::decode(&encoded).unwrap(), sample());
    }

    #[test]
    fn test_missing_fields_rejected() {
        let mut enc = Encoder::new();
        enc.encode_array_header(2);
        enc.encode_array_header(0);
        enc.encode_array_header(1);
        enc.encode_map(MapBuilder::new().insert_text_uint("authority", 0))
            .unwrap();
        assert!(matches!(
            Signatures::decode(&enc.finish()),
            Err(WireError::Cbor(_))
        ));

        assert!(Signatures::decode(&[0x81, 0x80]).is_err());
    }
}

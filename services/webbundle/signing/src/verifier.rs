//! Verifying vouched subsets and the exchanges they cover.

use crate::certs::{auth_sha256, certificate_public_key};
use crate::error::{RejectReason, VerifyError};
use crate::signed_subset::{max_validity, signing_message, SignedSubset};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use webbundle_wire::{mice, Authority, Exchange, Signatures, Version, MAX_RECORD_SIZE};

/// Payload whose integrity has been checked, with the certificate that vouched for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedExchange {
    /// Decoded, verified payload
    pub payload: Bytes,
    /// Authority whose signature covers the exchange
    pub authority: Authority,
}

/// A vouched subset the verifier dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSubset {
    /// Position in the vouched-subsets array
    pub index: usize,
    /// Why it was dropped
    pub reason: RejectReason,
    /// URLs the subset covered, when it could be decoded
    pub urls: Vec<String>,
}

#[derive(Debug)]
struct VerifiedSubset {
    subset: SignedSubset,
    authority: usize,
}

/// Checks exchanges against the subsets whose signatures verified
#[derive(Debug)]
pub struct Verifier {
    version: Version,
    authorities: Vec<Authority>,
    subsets: Vec<VerifiedSubset>,
    rejected: Vec<RejectedSubset>,
}

impl Verifier {
    /// Check every vouched subset at `verification_time`.
    ///
    /// Out-of-range authorities, unusable keys and bad signatures abort
    /// construction. Subsets that verify cryptographically but are malformed,
    /// bound to another certificate or outside their validity window are
    /// dropped and listed in [`Verifier::rejected`].
    pub fn new(
        signatures: &Signatures,
        verification_time: DateTime<Utc>,
        version: Version,
    ) -> Result<Self, VerifyError> {
        let context = version
            .signature_context()
            .ok_or(VerifyError::UnsignedVersion(version))?;

        let mut subsets = Vec::new();
        let mut rejected = Vec::new();

        for (index, vouched) in signatures.vouched_subsets.iter().enumerate() {
            let authority = usize::try_from(vouched.authority)
                .ok()
                .filter(|a| *a < signatures.authorities.len())
                .ok_or(VerifyError::AuthorityIndex {
                    index: vouched.authority,
                    len: signatures.authorities.len(),
                })?;
            let cert = &signatures.authorities[authority].cert;

            let verifier = certificate_public_key(cert)?.into_verifier();
            let message = signing_message(context, &vouched.signed);
            verifier.verify(&message, &vouched.sig, index)?;

            match check_subset(&vouched.signed, cert, verification_time) {
                Ok(subset) => {
                    debug!(
                        index,
                        algorithm = verifier.name(),
                        urls = subset.subset_hashes.len(),
                        "vouched subset verified"
                    );
                    subsets.push(VerifiedSubset { subset, authority });
                }
                Err((reason, urls)) => {
                    warn!(index, %reason, "dropping vouched subset");
                    rejected.push(RejectedSubset {
                        index,
                        reason,
                        urls,
                    });
                }
            }
        }

        Ok(Self {
            version,
            authorities: signatures.authorities.clone(),
            subsets,
            rejected,
        })
    }

    /// Subsets dropped during construction
    pub fn rejected(&self) -> &[RejectedSubset] {
        &self.rejected
    }

    /// Verify an exchange. Returns `Ok(None)` when no subset covers its URL.
    pub fn verify_exchange(
        &self,
        exchange: &Exchange,
    ) -> Result<Option<VerifiedExchange>, VerifyError> {
        let url = exchange.request.url.as_str();
        let Some((verified, hashes)) = self
            .subsets
            .iter()
            .find_map(|v| v.subset.subset_hashes.get(url).map(|h| (v, h)))
        else {
            if let Some(rejected) = self.rejected.iter().find(|r| r.urls.iter().any(|u| u == url)) {
                return Err(VerifyError::Rejected {
                    url: url.to_string(),
                    reason: rejected.reason.clone(),
                });
            }
            return Ok(None);
        };

        if !hashes.variants_value.is_empty() {
            return Err(VerifyError::Variants(url.to_string()));
        }
        let [integrity] = hashes.resource_integrity.as_slice() else {
            return Err(VerifyError::IntegrityEntries {
                url: url.to_string(),
                count: hashes.resource_integrity.len(),
            });
        };

        if exchange.response.header_sha256()?.as_slice() != integrity.header_sha256.as_ref() {
            return Err(VerifyError::HeaderHash(url.to_string()));
        }

        let encoding = self
            .version
            .mice_encoding()
            .ok_or(VerifyError::UnsignedVersion(self.version))?;
        if integrity.payload_integrity != encoding.integrity_identifier {
            return Err(VerifyError::IntegrityIdentifier(
                integrity.payload_integrity.clone(),
            ));
        }
        let digest = exchange
            .response
            .headers
            .get(encoding.digest_header)
            .ok_or_else(|| VerifyError::MissingDigest(url.to_string()))?;

        let payload = mice::decode(&exchange.response.body, &digest, MAX_RECORD_SIZE)?;
        debug!(url, bytes = payload.len(), "verified exchange");
        Ok(Some(VerifiedExchange {
            payload,
            authority: self.authorities[verified.authority].clone(),
        }))
    }
}

fn check_subset(
    signed: &[u8],
    cert: &[u8],
    at: DateTime<Utc>,
) -> Result<SignedSubset, (RejectReason, Vec<String>)> {
    let subset = SignedSubset::decode(signed)
        .map_err(|e| (RejectReason::Decode(e.to_string()), Vec::new()))?;
    let urls = || subset.subset_hashes.keys().cloned().collect::<Vec<_>>();

    if subset.auth_sha256.as_ref() != auth_sha256(cert).as_slice() {
        return Err((RejectReason::AuthSha256, urls()));
    }
    let window = subset.validity_window();
    if window > max_validity() {
        return Err((RejectReason::ValidityWindow(window.num_seconds()), urls()));
    }
    if at < subset.date {
        return Err((RejectReason::NotYetValid, urls()));
    }
    if at > subset.expires {
        return Err((RejectReason::Expired, urls()));
    }
    Ok(subset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::tests::{ZeroRng, ED25519_KEY, P256_KEY, P384_KEY};
    use crate::algorithm::PrivateKey;
    use crate::certs::tests::{ocsp, ED25519_CERT, P384_CERT};
    use crate::certs::CertChain;
    use crate::signer::tests::{one_day, p256_signer, sample_exchange, signing_date};
    use crate::signer::Signer;
    use chrono::Duration;
    use url::Url;
    use webbundle_wire::{Bundle, VouchedSubset};

    const BODY: &[u8] = b"<h1>Hello, signed world</h1>";

    fn signed_bundle() -> Bundle {
        let mut bundle = Bundle::new(Version::B2)
            .with_exchange(sample_exchange("/"))
            .with_exchange(sample_exchange("/second"));
        p256_signer(Version::B2)
            .sign_bundle(&mut bundle, 16, &mut ZeroRng)
            .unwrap();
        bundle
    }

    fn at(offset_hours: i64) -> DateTime<Utc> {
        signing_date() + Duration::hours(offset_hours)
    }

    #[test]
    fn test_verify_signed_exchange() {
        let bundle = Bundle::decode(signed_bundle().encode().unwrap()).unwrap();
        let signatures = bundle.signatures.as_ref().unwrap();
        let verifier = Verifier::new(signatures, at(1), Version::B2).unwrap();
        assert!(verifier.rejected().is_empty());

        for exchange in &bundle.exchanges {
            let verified = verifier.verify_exchange(exchange).unwrap().unwrap();
            assert_eq!(verified.payload.as_ref(), BODY);
            assert_eq!(verified.authority, signatures.authorities[0]);
        }
    }

    #[test]
    fn test_uncovered_exchange_is_not_an_error() {
        let bundle = signed_bundle();
        let verifier = Verifier::new(bundle.signatures.as_ref().unwrap(), at(1), Version::B2).unwrap();
        let other = sample_exchange("/not-signed");
        assert!(verifier.verify_exchange(&other).unwrap().is_none());
    }

    #[test]
    fn test_tampered_signature_fails() {
        let bundle = signed_bundle();
        let mut signatures = bundle.signatures.clone().unwrap();
        let mut sig = signatures.vouched_subsets[0].sig.to_vec();
        let last = sig.len() - 1;
        sig[last] ^= 0x01;
        signatures.vouched_subsets[0].sig = Bytes::from(sig);
        assert!(Verifier::new(&signatures, at(1), Version::B2).is_err());
    }

    #[test]
    fn test_tampered_signed_bytes_fail() {
        let bundle = signed_bundle();
        let mut signatures = bundle.signatures.clone().unwrap();
        let mut signed = signatures.vouched_subsets[0].signed.to_vec();
        let last = signed.len() - 1;
        signed[last] ^= 0x01;
        signatures.vouched_subsets[0].signed = Bytes::from(signed);
        assert!(matches!(
            Verifier::new(&signatures, at(1), Version::B2),
            Err(VerifyError::SignatureMismatch(0))
        ));
    }

    #[test]
    fn test_tampered_status_fails() {
        let mut bundle = signed_bundle();
        let verifier = Verifier::new(bundle.signatures.as_ref().unwrap(), at(1), Version::B2).unwrap();
        bundle.exchanges[0].response.status = 201;
        assert!(matches!(
            verifier.verify_exchange(&bundle.exchanges[0]),
            Err(VerifyError::HeaderHash(_))
        ));
    }

    #[test]
    fn test_tampered_body_fails() {
        let mut bundle = signed_bundle();
        let verifier = Verifier::new(bundle.signatures.as_ref().unwrap(), at(1), Version::B2).unwrap();
        let mut body = bundle.exchanges[0].response.body.to_vec();
        let last = body.len() - 1;
        body[last] ^= 0x01;
        bundle.exchanges[0].response.body = Bytes::from(body);
        assert!(matches!(
            verifier.verify_exchange(&bundle.exchanges[0]),
            Err(VerifyError::Mice(_))
        ));
    }

    #[test]
    fn test_verification_time_outside_window() {
        let bundle = signed_bundle();
        let signatures = bundle.signatures.as_ref().unwrap();

        let early = Verifier::new(signatures, at(-1), Version::B2).unwrap();
        assert_eq!(early.rejected()[0].reason, RejectReason::NotYetValid);
        assert!(matches!(
            early.verify_exchange(&bundle.exchanges[0]),
            Err(VerifyError::Rejected { .. })
        ));

        let late = Verifier::new(signatures, at(25), Version::B2).unwrap();
        assert_eq!(late.rejected()[0].reason, RejectReason::Expired);
        assert!(late.verify_exchange(&bundle.exchanges[0]).is_err());
    }

    /// Sign a hand-built subset, bypassing the signer's own limits.
    fn vouch_raw(subset: &SignedSubset, key: &str, cert: &str) -> Signatures {
        let chain = CertChain::from_pem(cert, ocsp(), None).unwrap();
        let signed = subset.encode().unwrap();
        let sig = PrivateKey::from_pem(key)
            .unwrap()
            .into_algorithm()
            .sign(&mut ZeroRng, &signing_message("b2", &signed))
            .unwrap();
        Signatures {
            authorities: chain.authorities().to_vec(),
            vouched_subsets: vec![VouchedSubset {
                authority: 0,
                sig: Bytes::from(sig),
                signed,
            }],
        }
    }

    #[test]
    fn test_long_validity_window_rejected() {
        let signer = p256_signer(Version::B2);
        let mut subset = signer.signed_subset().clone();
        subset.expires = subset.date + Duration::days(8);
        let signatures = vouch_raw(
            &subset,
            P256_KEY,
            crate::certs::tests::P256_CERT,
        );
        let verifier = Verifier::new(&signatures, at(1), Version::B2).unwrap();
        assert_eq!(
            verifier.rejected()[0].reason,
            RejectReason::ValidityWindow(8 * 24 * 60 * 60)
        );
    }

    #[test]
    fn test_auth_sha256_mismatch_rejected() {
        let signer = p256_signer(Version::B2);
        let mut subset = signer.signed_subset().clone();
        subset.auth_sha256 = Bytes::from(vec![0u8; 32]);
        let signatures = vouch_raw(&subset, P256_KEY, crate::certs::tests::P256_CERT);
        let verifier = Verifier::new(&signatures, at(1), Version::B2).unwrap();
        assert_eq!(verifier.rejected()[0].reason, RejectReason::AuthSha256);
    }

    #[test]
    fn test_authority_out_of_range() {
        let bundle = signed_bundle();
        let mut signatures = bundle.signatures.clone().unwrap();
        signatures.vouched_subsets[0].authority = 5;
        assert!(matches!(
            Verifier::new(&signatures, at(1), Version::B2),
            Err(VerifyError::AuthorityIndex { index: 5, len: 1 })
        ));
    }

    #[test]
    fn test_signature_checked_against_context() {
        let bundle = signed_bundle();
        let signatures = bundle.signatures.as_ref().unwrap();
        assert!(Verifier::new(signatures, at(1), Version::B1).is_err());
        assert!(matches!(
            Verifier::new(signatures, at(1), Version::Unversioned),
            Err(VerifyError::UnsignedVersion(_))
        ));
    }

    #[test]
    fn test_p384_and_ed25519_round_trip() {
        for (version, key, cert, host) in [
            (Version::B1, P384_KEY, P384_CERT, "example.com"),
            (Version::B2, ED25519_KEY, ED25519_CERT, "ed25519.example.org"),
        ] {
            let url = Url::parse(&format!("https://{host}/")).unwrap();
            let mut bundle = Bundle::new(version)
                .with_primary_url(url.clone())
                .with_exchange(Exchange::get(
                    url.clone(),
                    sample_exchange("/").response,
                ));
            let mut signer = Signer::new(
                version,
                CertChain::from_pem(cert, ocsp(), None).unwrap(),
                PrivateKey::from_pem(key).unwrap(),
                Url::parse(&format!("https://{host}/validity")).unwrap(),
                signing_date(),
                one_day(),
            )
            .unwrap();
            assert_eq!(signer.sign_bundle(&mut bundle, 8, &mut ZeroRng).unwrap(), 1);

            let decoded = Bundle::decode(bundle.encode().unwrap()).unwrap();
            let verifier =
                Verifier::new(decoded.signatures.as_ref().unwrap(), at(2), version).unwrap();
            let verified = verifier.verify_exchange(&decoded.exchanges[0]).unwrap().unwrap();
            assert_eq!(verified.payload.as_ref(), BODY);
        }
    }
}

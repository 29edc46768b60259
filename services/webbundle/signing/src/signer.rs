//! Building vouched subsets.

use crate::algorithm::{PrivateKey, SigningAlgorithm};
use crate::certs::CertChain;
use crate::error::SigningError;
use crate::signed_subset::{
    max_validity, signing_message, ResourceIntegrity, ResponseHashes, SignedSubset,
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use rand_core::CryptoRngCore;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;
use webbundle_wire::{deterministic, Bundle, Exchange, Signatures, Version, VouchedSubset};

/// Signs exchanges with one certificate chain and key
pub struct Signer {
    version: Version,
    context: &'static str,
    chain: CertChain,
    algorithm: Box<dyn SigningAlgorithm>,
    subset: SignedSubset,
}

impl Signer {
    /// Create a signer valid from `date` for `expiry`
    pub fn new(
        version: Version,
        chain: CertChain,
        key: PrivateKey,
        validity_url: Url,
        date: DateTime<Utc>,
        expiry: std::time::Duration,
    ) -> Result<Self, SigningError> {
        let context = version
            .signature_context()
            .ok_or(SigningError::UnsignedVersion(version))?;

        let window = Duration::from_std(expiry).map_err(|_| SigningError::Expiry(expiry))?;
        if window > max_validity() {
            return Err(SigningError::Expiry(expiry));
        }
        let expires = date
            .checked_add_signed(window)
            .ok_or_else(|| SigningError::Timestamp(format!("{date} + {expiry:?}")))?;

        let cert_key = chain
            .leaf_public_key()
            .map_err(|e| SigningError::Certificate(e.to_string()))?;
        if cert_key != key.public_key() {
            return Err(SigningError::KeyMismatch);
        }

        let subset = SignedSubset {
            validity_url,
            auth_sha256: Bytes::copy_from_slice(&chain.auth_sha256()),
            date,
            expires,
            subset_hashes: BTreeMap::new(),
        };
        debug!(
            version = %version,
            algorithm = key.algorithm_name(),
            %date,
            %expires,
            "created signer"
        );

        Ok(Self {
            version,
            context,
            chain,
            algorithm: key.into_algorithm(),
            subset,
        })
    }

    /// Format revision this signer produces signatures for
    pub fn version(&self) -> Version {
        self.version
    }

    /// Whether the signing certificate covers the URL's host
    pub fn can_sign_for_url(&self, url: &Url) -> bool {
        self.chain.can_sign_for_url(url)
    }

    /// Subset accumulated so far
    pub fn signed_subset(&self) -> &SignedSubset {
        &self.subset
    }

    /// Add an exchange whose payload carries `payload_integrity`
    pub fn add_exchange(
        &mut self,
        exchange: &Exchange,
        payload_integrity: &str,
    ) -> Result<(), SigningError> {
        let url = exchange.request.url.as_str();
        if self.subset.subset_hashes.contains_key(url) {
            return Err(SigningError::DuplicateUrl(url.to_string()));
        }
        let header_sha256 = exchange.response.header_sha256()?;
        self.subset.subset_hashes.insert(
            url.to_string(),
            ResponseHashes {
                variants_value: Bytes::new(),
                resource_integrity: vec![ResourceIntegrity {
                    header_sha256: Bytes::copy_from_slice(&header_sha256),
                    payload_integrity: payload_integrity.to_string(),
                }],
            },
        );
        Ok(())
    }

    /// Sign the accumulated subset and append it, with the certificate
    /// chain, to `existing` (or to an empty signatures section).
    pub fn update_signatures(
        &self,
        existing: Option<Signatures>,
        rng: &mut dyn CryptoRngCore,
    ) -> Result<Signatures, SigningError> {
        let mut signatures = existing.unwrap_or_default();
        let authority = signatures.authorities.len() as u64;
        signatures
            .authorities
            .extend_from_slice(self.chain.authorities());

        let signed = self.subset.encode()?;
        deterministic::validate(&signed)?;
        let message = signing_message(self.context, &signed);
        let sig = self.algorithm.sign(rng, &message)?;

        debug!(
            algorithm = self.algorithm.name(),
            authority,
            urls = self.subset.subset_hashes.len(),
            "signed subset"
        );
        signatures.vouched_subsets.push(VouchedSubset {
            authority,
            sig: Bytes::from(sig),
            signed,
        });
        Ok(signatures)
    }

    /// Add payload integrity to every exchange this signer can vouch for,
    /// sign them and store the result in the bundle. Returns how many
    /// exchanges were signed.
    pub fn sign_bundle(
        &mut self,
        bundle: &mut Bundle,
        record_size: usize,
        rng: &mut dyn CryptoRngCore,
    ) -> Result<usize, SigningError> {
        if bundle.version != self.version {
            return Err(SigningError::VersionMismatch {
                signer: self.version,
                bundle: bundle.version,
            });
        }

        let mut signed = 0;
        for exchange in &mut bundle.exchanges {
            if !self.can_sign_for_url(&exchange.request.url) {
                debug!(url = %exchange.request.url, "certificate does not cover url, skipping");
                continue;
            }
            let identifier = exchange.add_payload_integrity(self.version, record_size)?;
            self.add_exchange(exchange, identifier)?;
            signed += 1;
        }

        bundle.signatures = Some(self.update_signatures(bundle.signatures.take(), rng)?);
        Ok(signed)
    }
}

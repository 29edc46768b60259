//! Certificate chains used for signing.

use crate::algorithm::PublicKey;
use crate::error::{SigningError, VerifyError};
use bytes::Bytes;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::server::ParsedCertificate;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use tracing::debug;
use url::{Host, Url};
use webbundle_wire::Authority;

/// Validated certificate chain, leaf first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertChain {
    items: Vec<Authority>,
}

impl CertChain {
    /// Build a chain, checking it is non-empty, the leaf carries an OCSP
    /// response, later items carry neither OCSP nor SCT, and every
    /// certificate parses.
    pub fn new(items: Vec<Authority>) -> Result<Self, SigningError> {
        let Some(leaf) = items.first() else {
            return Err(SigningError::CertChain("chain is empty".to_string()));
        };
        if leaf.ocsp.is_none() {
            return Err(SigningError::CertChain(
                "leaf certificate must carry an OCSP response".to_string(),
            ));
        }
        for (i, item) in items.iter().enumerate() {
            if i > 0 && (item.ocsp.is_some() || item.sct.is_some()) {
                return Err(SigningError::CertChain(format!(
                    "certificate {i} must not carry OCSP or SCT data"
                )));
            }
            x509_parser::parse_x509_certificate(&item.cert).map_err(|e| {
                SigningError::Certificate(format!("certificate {i}: {e:?}"))
            })?;
        }
        Ok(Self { items })
    }

    /// Read a PEM certificate chain and attach the leaf's OCSP response and SCTs
    pub fn from_pem(pem: &str, ocsp: Option<Bytes>, sct: Option<Bytes>) -> Result<Self, SigningError> {
        let certs = parse_certificates_pem(pem)?;
        let items = certs
            .into_iter()
            .enumerate()
            .map(|(i, cert)| {
                let mut item = Authority::new(cert);
                if i == 0 {
                    item.ocsp = ocsp.clone();
                    item.sct = sct.clone();
                }
                item
            })
            .collect();
        Self::new(items)
    }

    /// Leaf certificate
    pub fn leaf(&self) -> &Authority {
        &self.items[0]
    }

    /// Every item, leaf first
    pub fn authorities(&self) -> &[Authority] {
        &self.items
    }

    /// SHA-256 of the leaf certificate
    pub fn auth_sha256(&self) -> [u8; 32] {
        auth_sha256(&self.leaf().cert)
    }

    /// Public key of the leaf certificate
    pub fn leaf_public_key(&self) -> Result<PublicKey, VerifyError> {
        certificate_public_key(&self.leaf().cert)
    }

    /// Whether the leaf certificate is valid for the URL's host
    pub fn can_sign_for_url(&self, url: &Url) -> bool {
        can_sign_for_url(&self.leaf().cert, url)
    }
}

/// SHA-256 of a DER certificate
pub fn auth_sha256(cert_der: &[u8]) -> [u8; 32] {
    Sha256::digest(cert_der).into()
}

/// Read every certificate from a PEM document
pub fn parse_certificates_pem(pem: &str) -> Result<Vec<Bytes>, SigningError> {
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut pem.as_bytes()).collect();
    let certs: Vec<Bytes> = certs?
        .into_iter()
        .map(|cert| Bytes::copy_from_slice(cert.as_ref()))
        .collect();
    if certs.is_empty() {
        return Err(SigningError::CertChain(
            "no certificates found in PEM input".to_string(),
        ));
    }
    Ok(certs)
}

/// Public key from a DER certificate's SubjectPublicKeyInfo
pub fn certificate_public_key(cert_der: &[u8]) -> Result<PublicKey, VerifyError> {
    let (_remaining, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| VerifyError::UnsupportedKey(format!("failed to parse certificate: {e:?}")))?;
    PublicKey::from_spki_der(cert.public_key().raw)
}

/// Standard TLS hostname verification of `cert_der` against the URL's host
pub fn can_sign_for_url(cert_der: &[u8], url: &Url) -> bool {
    let der = CertificateDer::from(cert_der);
    let Ok(parsed) = ParsedCertificate::try_from(&der) else {
        debug!("certificate rejected by hostname verifier parser");
        return false;
    };
    let name = match url.host() {
        Some(Host::Domain(domain)) => match ServerName::try_from(domain) {
            Ok(name) => name,
            Err(_) => return false,
        },
        Some(Host::Ipv4(ip)) => ServerName::IpAddress(IpAddr::V4(ip).into()),
        Some(Host::Ipv6(ip)) => ServerName::IpAddress(IpAddr::V6(ip).into()),
        None => return false,
    };
    rustls::client::verify_server_name(&parsed, &name).is_ok()
}

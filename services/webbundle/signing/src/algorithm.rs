//! Signature algorithms.
//!
//! Keys are matched once, when a signer or verifier is built, and the result
//! is a boxed [`SigningAlgorithm`] or [`SignatureVerifier`] that is used for
//! every subsequent call.

use crate::error::{SigningError, VerifyError};
use ed25519_dalek::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _};
use p256::ecdsa::signature::{RandomizedSigner, Signer as _, Verifier as _};
use p256::pkcs8::DecodePrivateKey as _;
use rand_core::CryptoRngCore;
use rustls_pemfile::Item;
use std::io::Cursor;

/// Produces signatures over signing messages
pub trait SigningAlgorithm: Send + Sync {
    /// Algorithm name for logs
    fn name(&self) -> &'static str;

    /// Sign `message`. ECDSA signatures are DER-encoded.
    fn sign(&self, rng: &mut dyn CryptoRngCore, message: &[u8]) -> Result<Vec<u8>, SigningError>;
}

/// Checks signatures made by one public key
pub trait SignatureVerifier: Send + Sync {
    /// Algorithm name for logs
    fn name(&self) -> &'static str;

    /// Check `signature` over `message`. `subset` identifies the vouched
    /// subset in errors.
    fn verify(&self, message: &[u8], signature: &[u8], subset: usize) -> Result<(), VerifyError>;
}

/// Supported private keys
#[derive(Clone)]
pub enum PrivateKey {
    /// ECDSA over P-256 with SHA-256
    EcdsaP256(p256::ecdsa::SigningKey),
    /// ECDSA over P-384 with SHA-384
    EcdsaP384(p384::ecdsa::SigningKey),
    /// Ed25519
    Ed25519(ed25519_dalek::SigningKey),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").field(&self.algorithm_name()).finish()
    }
}

impl PrivateKey {
    /// Read the first private key in a PEM document (PKCS#8, or SEC1 for ECDSA)
    pub fn from_pem(pem: &str) -> Result<Self, SigningError> {
        let mut reader = Cursor::new(pem.as_bytes());
        while let Some(item) = rustls_pemfile::read_one(&mut reader)? {
            match item {
                Item::Pkcs8Key(key) => return Self::from_pkcs8_der(key.secret_pkcs8_der()),
                Item::Sec1Key(key) => return Self::from_sec1_der(key.secret_sec1_der()),
                _ => continue,
            }
        }
        Err(SigningError::Key("no private key found in PEM input".to_string()))
    }

    /// Parse a PKCS#8 DER private key
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, SigningError> {
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::EcdsaP256(key));
        }
        if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::EcdsaP384(key));
        }
        if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::Ed25519(key));
        }
        Err(SigningError::Key(
            "PKCS#8 key is not ECDSA P-256, ECDSA P-384 or Ed25519".to_string(),
        ))
    }

    /// Parse a SEC1 DER elliptic curve private key
    pub fn from_sec1_der(der: &[u8]) -> Result<Self, SigningError> {
        if let Ok(key) = p256::SecretKey::from_sec1_der(der) {
            return Ok(PrivateKey::EcdsaP256(key.into()));
        }
        if let Ok(key) = p384::SecretKey::from_sec1_der(der) {
            return Ok(PrivateKey::EcdsaP384(key.into()));
        }
        Err(SigningError::Key("SEC1 key is not on P-256 or P-384".to_string()))
    }

    /// Algorithm name
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            PrivateKey::EcdsaP256(_) => "ecdsa-p256-sha256",
            PrivateKey::EcdsaP384(_) => "ecdsa-p384-sha384",
            PrivateKey::Ed25519(_) => "ed25519",
        }
    }

    /// Matching public key
    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::EcdsaP256(key) => PublicKey::EcdsaP256(*key.verifying_key()),
            PrivateKey::EcdsaP384(key) => PublicKey::EcdsaP384(*key.verifying_key()),
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }

    /// Fix the algorithm for this key
    pub fn into_algorithm(self) -> Box<dyn SigningAlgorithm> {
        match self {
            PrivateKey::EcdsaP256(key) => Box::new(EcdsaP256Signer(key)),
            PrivateKey::EcdsaP384(key) => Box::new(EcdsaP384Signer(key)),
            PrivateKey::Ed25519(key) => Box::new(Ed25519Signer(key)),
        }
    }
}

/// Supported public keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    /// ECDSA over P-256
    EcdsaP256(p256::ecdsa::VerifyingKey),
    /// ECDSA over P-384
    EcdsaP384(p384::ecdsa::VerifyingKey),
    /// Ed25519
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    /// Parse a DER SubjectPublicKeyInfo
    pub fn from_spki_der(der: &[u8]) -> Result<Self, VerifyError> {
        use p256::pkcs8::DecodePublicKey as _;

        if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(der) {
            return Ok(PublicKey::EcdsaP256(key));
        }
        if let Ok(key) = p384::ecdsa::VerifyingKey::from_public_key_der(der) {
            return Ok(PublicKey::EcdsaP384(key));
        }
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_der(der) {
            return Ok(PublicKey::Ed25519(key));
        }
        Err(VerifyError::UnsupportedKey(
            "public key is not ECDSA P-256, ECDSA P-384 or Ed25519".to_string(),
        ))
    }

    /// Fix the verification algorithm for this key
    pub fn into_verifier(self) -> Box<dyn SignatureVerifier> {
        match self {
            PublicKey::EcdsaP256(key) => Box::new(EcdsaP256Verifier(key)),
            PublicKey::EcdsaP384(key) => Box::new(EcdsaP384Verifier(key)),
            PublicKey::Ed25519(key) => Box::new(Ed25519Verifier(key)),
        }
    }
}

struct EcdsaP256Signer(p256::ecdsa::SigningKey);

impl SigningAlgorithm for EcdsaP256Signer {
    fn name(&self) -> &'static str {
        "ecdsa-p256-sha256"
    }

    fn sign(&self, mut rng: &mut dyn CryptoRngCore, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        let signature: p256::ecdsa::Signature = self
            .0
            .try_sign_with_rng(&mut rng, message)
            .map_err(|e| SigningError::Crypto(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

struct EcdsaP384Signer(p384::ecdsa::SigningKey);

impl SigningAlgorithm for EcdsaP384Signer {
    fn name(&self) -> &'static str {
        "ecdsa-p384-sha384"
    }

    fn sign(&self, mut rng: &mut dyn CryptoRngCore, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        let signature: p384::ecdsa::Signature = self
            .0
            .try_sign_with_rng(&mut rng, message)
            .map_err(|e| SigningError::Crypto(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

struct Ed25519Signer(ed25519_dalek::SigningKey);

impl SigningAlgorithm for Ed25519Signer {
    fn name(&self) -> &'static str {
        "ed25519"
    }

    // Ed25519 is deterministic; the random source is not consulted.
    fn sign(&self, _rng: &mut dyn CryptoRngCore, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        let signature = self
            .0
            .try_sign(message)
            .map_err(|e| SigningError::Crypto(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}

struct EcdsaP256Verifier(p256::ecdsa::VerifyingKey);

impl SignatureVerifier for EcdsaP256Verifier {
    fn name(&self) -> &'static str {
        "ecdsa-p256-sha256"
    }

    fn verify(&self, message: &[u8], signature: &[u8], subset: usize) -> Result<(), VerifyError> {
        let signature = p256::ecdsa::Signature::from_der(signature)
            .map_err(|_| VerifyError::SignatureFormat(subset))?;
        self.0
            .verify(message, &signature)
            .map_err(|_| VerifyError::SignatureMismatch(subset))
    }
}

struct EcdsaP384Verifier(p384::ecdsa::VerifyingKey);

impl SignatureVerifier for EcdsaP384Verifier {
    fn name(&self) -> &'static str {
        "ecdsa-p384-sha384"
    }

    fn verify(&self, message: &[u8], signature: &[u8], subset: usize) -> Result<(), VerifyError> {
        let signature = p384::ecdsa::Signature::from_der(signature)
            .map_err(|_| VerifyError::SignatureFormat(subset))?;
        self.0
            .verify(message, &signature)
            .map_err(|_| VerifyError::SignatureMismatch(subset))
    }
}

struct Ed25519Verifier(ed25519_dalek::VerifyingKey);

impl SignatureVerifier for Ed25519Verifier {
    fn name(&self) -> &'static str {
        "ed25519"
    }

    fn verify(&self, message: &[u8], signature: &[u8], subset: usize) -> Result<(), VerifyError> {
        let signature = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| VerifyError::SignatureFormat(subset))?;
        self.0
            .verify_strict(message, &signature)
            .map_err(|_| VerifyError::SignatureMismatch(subset))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand_core::{CryptoRng, RngCore};

    /// Random source that only ever yields zero bytes.
    pub(crate) struct ZeroRng;

    impl RngCore for ZeroRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            dest.fill(0);
            Ok(())
        }
    }

    impl CryptoRng for ZeroRng {}

    pub(crate) const P256_KEY: &str = include_str!("../testdata/p256.key");
    pub(crate) const P384_KEY: &str = include_str!("../testdata/p384.key");
    pub(crate) const ED25519_KEY: &str = include_str!("../testdata/ed25519.key");

    const MESSAGE: &[u8] = b"Web Package test message";

    #[test]
    fn test_key_types_from_pem() {
        assert_eq!(PrivateKey::from_pem(P256_KEY).unwrap().algorithm_name(), "ecdsa-p256-sha256");
        assert_eq!(PrivateKey::from_pem(P384_KEY).unwrap().algorithm_name(), "ecdsa-p384-sha384");
        assert_eq!(PrivateKey::from_pem(ED25519_KEY).unwrap().algorithm_name(), "ed25519");
        assert!(matches!(
            PrivateKey::from_pem("not a key"),
            Err(SigningError::Key(_))
        ));
    }

    #[test]
    fn test_p256_signature_is_pinned() {
        let algorithm = PrivateKey::from_pem(P256_KEY).unwrap().into_algorithm();
        let signature = algorithm.sign(&mut ZeroRng, MESSAGE).unwrap();
        assert_eq!(
            hex::encode(&signature),
            "3045022100d4a39ba9608262e9af07787223e6f1590a80598ce3ca6137ef6d2e5fe1e3b0e1\
             02200f71bf54f1b5d8e71b6360bf460a92470c49f5f2b78d4f260e32663ad0fb0338"
        );
    }

    #[test]
    fn test_ed25519_signature_is_pinned() {
        let algorithm = PrivateKey::from_pem(ED25519_KEY).unwrap().into_algorithm();
        let signature = algorithm.sign(&mut ZeroRng, MESSAGE).unwrap();
        assert_eq!(
            hex::encode(&signature),
            "03bc4162c3c5cfea2f3073669a887c5c6f5514d136cbb0e881d26de2ee99fd1f\
             77c55b1381fa570581f7d438a16addfb040ac050552bd82f72bf8632e16d9a00"
        );
    }

    #[test]
    fn test_sign_then_verify_each_algorithm() {
        for pem in [P256_KEY, P384_KEY, ED25519_KEY] {
            let key = PrivateKey::from_pem(pem).unwrap();
            let verifier = key.public_key().into_verifier();
            let signature = key.into_algorithm().sign(&mut ZeroRng, MESSAGE).unwrap();

            assert!(verifier.verify(MESSAGE, &signature, 0).is_ok());
            assert!(matches!(
                verifier.verify(b"other message", &signature, 3),
                Err(VerifyError::SignatureMismatch(3))
            ));
            assert!(matches!(
                verifier.verify(MESSAGE, &signature[..10], 1),
                Err(VerifyError::SignatureFormat(1))
            ));
        }
    }
}

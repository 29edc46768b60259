//! Signatures for Web Bundles.
//!
//! A [`Signer`] MICE-encodes the payloads it can vouch for, collects their
//! response hashes into a [`SignedSubset`] and signs it with the key of the
//! leaf certificate. A [`Verifier`] checks the vouched subsets of a decoded
//! bundle at a given time and then verifies individual exchanges against
//! them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use webbundle_signing::{CertChain, PrivateKey, Signer, Verifier};
//! use webbundle_wire::{Bundle, Version};
//!
//! # fn example(
//! #     mut bundle: Bundle,
//! #     cert_pem: &str,
//! #     key_pem: &str,
//! #     rng: &mut dyn rand_core::CryptoRngCore,
//! # ) -> anyhow::Result<()> {
//! let chain = CertChain::from_pem(cert_pem, Some(std::fs::read("ocsp.der")?.into()), None)?;
//! let mut signer = Signer::new(
//!     Version::B2,
//!     chain,
//!     PrivateKey::from_pem(key_pem)?,
//!     "https://example.org/resource.validity".parse()?,
//!     chrono::Utc::now(),
//!     std::time::Duration::from_secs(24 * 60 * 60),
//! )?;
//! signer.sign_bundle(&mut bundle, 4096, rng)?;
//!
//! let decoded = Bundle::decode(bundle.encode()?)?;
//! if let Some(signatures) = &decoded.signatures {
//!     let verifier = Verifier::new(signatures, chrono::Utc::now(), decoded.version)?;
//!     for exchange in &decoded.exchanges {
//!         if let Some(verified) = verifier.verify_exchange(exchange)? {
//!             println!("{}: {} bytes", exchange.request.url, verified.payload.len());
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algorithm;
pub mod certs;
pub mod error;
pub mod signed_subset;
pub mod signer;
pub mod verifier;

pub use algorithm::{PrivateKey, PublicKey, SignatureVerifier, SigningAlgorithm};
pub use certs::{auth_sha256, can_sign_for_url, CertChain};
pub use error::{RejectReason, SigningError, VerifyError};
pub use signed_subset::{signing_message, ResourceIntegrity, ResponseHashes, SignedSubset};
pub use signer::Signer;
pub use verifier::{RejectedSubset, VerifiedExchange, Verifier};

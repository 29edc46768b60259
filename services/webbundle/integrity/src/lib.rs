//! Integrity blocks for Web Bundles.
//!
//! An integrity block is a CBOR structure prepended to the bundle bytes. It
//! carries a stack of Ed25519 signatures over the SHA-512 hash of the web
//! bundle, and the signing key determines the bundle's stable Web Bundle ID.
//!
//! ```text
//! +-------------------------+-----------------------------+
//! | integrity block         | web bundle                  |
//! | [magic, version, stack] | (signed by every stack item)|
//! +-------------------------+-----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod error;
pub mod id;
pub mod signer;

pub use block::{obtain_integrity_block, IntegrityBlock, IntegritySignature};
pub use error::IntegrityError;
pub use id::web_bundle_id;
pub use signer::{
    data_to_be_signed, verify_signature_stack, verify_signed_bundle, web_bundle_hash,
    IntegrityBlockSigner,
};

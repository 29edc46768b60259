//! Web Bundle container format.
//!
//! This crate reads and writes bundles of HTTP exchanges, including the
//! payload integrity encoding (MICE) used by signed bundles and the
//! deterministic-CBOR checks signers rely on.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+--------------------------------------+
//! | header magic (10B)   | CBOR array head + "🌐📦" byte string  |
//! +----------------------+--------------------------------------+
//! | version tag (opt)    | 5 bytes, b1/b2 only                  |
//! +----------------------+--------------------------------------+
//! | primary url (opt)    | text string, b1 only                 |
//! +----------------------+--------------------------------------+
//! | section lengths      | bstr wrapping [name, length]*        |
//! +----------------------+--------------------------------------+
//! | sections             | array: index, [primary], [manifest], |
//! |                      | [signatures], responses (always last)|
//! +----------------------+--------------------------------------+
//! | footer (9B)          | bstr wrapping u64 total length       |
//! +----------------------+--------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bundle;
pub mod cbor;
pub mod deterministic;
pub mod error;
pub mod exchange;
pub mod headers;
pub mod mice;
pub mod section;
pub mod signatures;
pub mod version;

pub use bundle::{Bundle, BundleReader, FOOTER_SIZE};
pub use error::{DeterminismError, MiceError, WireError};
pub use exchange::{Exchange, Request, Response};
pub use headers::HeaderList;
pub use mice::{MiceReader, DEFAULT_RECORD_SIZE, MAX_RECORD_SIZE};
pub use section::VARIANTS_HEADER;
pub use signatures::{Authority, Signatures, VouchedSubset};
pub use version::{MiceEncoding, Version, MI_SHA256_IDENTIFIER};

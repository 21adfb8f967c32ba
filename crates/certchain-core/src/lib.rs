#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! # certchain-core
//!
//! Deterministic fingerprinting for academic certificates.
//!
//! This crate provides:
//! - SHA-256 digests
//! - Canonical encoding of flat string records
//! - The certificate attribute set and its fingerprint
//!
//! Everything here is pure: no I/O and no hidden state, so a fingerprint
//! computed at issuance can be recomputed by any verifier later.
//!
//! ## Quick Start
//!
//! ```rust
//! use certchain_core::CertificateAttributes;
//!
//! let attrs = CertificateAttributes::new("Alice", "CS101", "2024-01-01", "State University")?;
//! let first = attrs.fingerprint()?;
//! let again = attrs.clone().fingerprint()?;
//! assert_eq!(first, again);
//! # Ok::<(), certchain_core::Error>(())
//! ```

pub mod canonical;
pub mod error;
pub mod fingerprint;
pub mod hashing;

pub use error::{Error, Result};
pub use fingerprint::{compute_fingerprint, CertificateAttributes, Fingerprint};
pub use hashing::{sha256, sha256_hex, Hash};

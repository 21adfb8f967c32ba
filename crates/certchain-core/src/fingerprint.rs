//! Certificate fingerprints.
//!
//! A fingerprint is the SHA-256 of the canonical encoding of a certificate's
//! four attribute fields. The same computation runs when a certificate is
//! requested and when it is verified, so the field set below is fixed.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::canonical::encode_fields;
use crate::error::{Error, Result};
use crate::hashing::{sha256, Hash};

pub const SUBJECT_NAME: &str = "subject_name";
pub const COURSE_NAME: &str = "course_name";
pub const COMPLETION_DATE: &str = "completion_date";
pub const ISSUER_NAME: &str = "issuer_name";

/// Every attribute that takes part in the fingerprint, in canonical order.
pub const FINGERPRINT_FIELDS: [&str; 4] = [COMPLETION_DATE, COURSE_NAME, ISSUER_NAME, SUBJECT_NAME];

/// Hex-encoded content hash of a certificate's attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Hash);

impl Fingerprint {
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Hash::from_hex(hex_str).map(Self)
    }

    pub fn as_hash(&self) -> &Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Hash> for Fingerprint {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}

/// The canonical attribute set of a certificate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CertificateAttributes {
    pub subject_name: String,
    pub course_name: String,
    /// ISO-8601 calendar date, `YYYY-MM-DD`.
    pub completion_date: String,
    pub issuer_name: String,
}

impl CertificateAttributes {
    /// Build and validate an attribute set.
    pub fn new(
        subject_name: impl Into<String>,
        course_name: impl Into<String>,
        completion_date: impl Into<String>,
        issuer_name: impl Into<String>,
    ) -> Result<Self> {
        let attrs = Self {
            subject_name: subject_name.into(),
            course_name: course_name.into(),
            completion_date: completion_date.into(),
            issuer_name: issuer_name.into(),
        };
        attrs.validate()?;
        Ok(attrs)
    }

    /// Build from a flat mapping keyed by the canonical field names.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        if let Some(unknown) = fields
            .keys()
            .find(|k| !FINGERPRINT_FIELDS.contains(&k.as_str()))
        {
            return Err(Error::UnknownField(unknown.clone()));
        }

        let take = |name: &'static str| -> Result<String> {
            fields.get(name).cloned().ok_or(Error::MissingField(name))
        };

        Self::new(
            take(SUBJECT_NAME)?,
            take(COURSE_NAME)?,
            take(COMPLETION_DATE)?,
            take(ISSUER_NAME)?,
        )
    }

    /// Flatten into the mapping that gets canonicalized.
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SUBJECT_NAME.to_string(), self.subject_name.clone()),
            (COURSE_NAME.to_string(), self.course_name.clone()),
            (COMPLETION_DATE.to_string(), self.completion_date.clone()),
            (ISSUER_NAME.to_string(), self.issuer_name.clone()),
        ])
    }

    /// Check the field values. Values are never trimmed or normalized; a
    /// value that is blank is rejected instead of being hashed.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            (SUBJECT_NAME, &self.subject_name),
            (COURSE_NAME, &self.course_name),
            (COMPLETION_DATE, &self.completion_date),
            (ISSUER_NAME, &self.issuer_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::EmptyField(name));
            }
        }

        NaiveDate::parse_from_str(&self.completion_date, "%Y-%m-%d").map_err(|e| {
            Error::InvalidField {
                field: COMPLETION_DATE,
                reason: format!("expected YYYY-MM-DD: {e}"),
            }
        })?;
        // chrono accepts unpadded months/days; the canonical form must not vary.
        if self.completion_date.len() != 10 {
            return Err(Error::InvalidField {
                field: COMPLETION_DATE,
                reason: "expected zero-padded YYYY-MM-DD".to_string(),
            });
        }

        Ok(())
    }

    /// The exact bytes that are hashed.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        Ok(encode_fields(&self.to_fields()).into_bytes())
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint(sha256(&self.canonical_bytes()?)))
    }
}

/// Compute the fingerprint of a flat attribute mapping.
///
/// Missing, blank or unknown fields are rejected before anything is hashed.
///
/// ```rust
/// use std::collections::BTreeMap;
/// use certchain_core::compute_fingerprint;
///
/// let attrs = BTreeMap::from([
///     ("subject_name".to_string(), "Alice".to_string()),
///     ("course_name".to_string(), "CS101".to_string()),
///     ("completion_date".to_string(), "2024-01-01".to_string()),
///     ("issuer_name".to_string(), "State University".to_string()),
/// ]);
/// let fp = compute_fingerprint(&attrs).unwrap();
/// assert_eq!(fp.to_hex().len(), 64);
/// ```
pub fn compute_fingerprint(attributes: &BTreeMap<String, String>) -> Result<Fingerprint> {
    CertificateAttributes::from_fields(attributes)?.fingerprint()
}

//! Opaque identifiers shared by the front end and the workers.
//!
//! All three ids are plain strings on the wire. [`JobId::generate`] is the
//! only place new job ids are minted; client and upload ids come from
//! callers and are checked with `parse` at the boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Maximum length of any caller-supplied identifier.
pub const MAX_ID_LEN: usize = 128;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw value without validation.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Wrap a raw value after checking it with [`validate_id`].
            pub fn parse(raw: impl Into<String>) -> Result<Self, CoreError> {
                let raw = raw.into();
                validate_id($label, &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// Identifies one unit of work.
    JobId,
    "job id"
);

opaque_id!(
    /// Identifies one live connection while it is open.
    ClientId,
    "client id"
);

opaque_id!(
    /// Identifies the user session a job belongs to. Passed through untouched.
    UploadId,
    "upload id"
);

impl JobId {
    /// Mint a fresh, globally unique job id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Validate a caller-supplied identifier.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed [`MAX_ID_LEN`] characters.
/// - Must contain only alphanumeric, `-`, `_`, `.`, `@` or `:` characters.
pub fn validate_id(label: &str, raw: &str) -> Result<(), CoreError> {
    if raw.is_empty() {
        return Err(CoreError::Validation(format!("{label} must not be empty")));
    }
    if raw.chars().count() > MAX_ID_LEN {
        return Err(CoreError::Validation(format!(
            "{label} must not exceed {MAX_ID_LEN} characters"
        )));
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | ':'))
    {
        return Err(CoreError::Validation(format!(
            "{label} may only contain alphanumeric, '-', '_', '.', '@' or ':' characters"
        )));
    }
    Ok(())
}

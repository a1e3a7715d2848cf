//! Object-storage capability with time-limited access grants.
//!
//! The front end and the workers only see the [`ObjectStore`] trait. A grant
//! is an opaque, expiring capability to `PUT` or `GET` one key.
//! [`LocalObjectStore`] keeps objects on the local filesystem and signs
//! grant URLs with HMAC-SHA256 over `method\nkey\nexpires`.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::types::Timestamp;

/// Maximum length of an object key.
pub const MAX_KEY_LEN: usize = 512;

/// Maximum length of a sanitized filename.
const MAX_FILENAME_LEN: usize = 200;

/// Prefix for submitted documents.
pub const RAW_PREFIX: &str = "raw";

/// Prefix for produced artifacts.
pub const PROCESSED_PREFIX: &str = "processed";

/// Prefix for documents uploaded through an upload grant.
pub const UPLOADS_PREFIX: &str = "uploads";

/// Longest lifetime of an issued grant (7 days). Longer TTLs are clamped.
pub const MAX_GRANT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Grants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GrantMethod {
    Put,
    Get,
}

impl GrantMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantMethod::Put => "PUT",
            GrantMethod::Get => "GET",
        }
    }
}

/// Time-bounded capability for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub key: String,
    pub method: GrantMethod,
    pub url: String,
    pub expires_at: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access grant has expired")]
    GrantExpired,

    #[error("Access grant signature is invalid")]
    BadSignature,

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Issue an expiring upload grant for `key`.
    fn put_grant(&self, key: &str) -> Result<Grant, StorageError>;

    /// Issue an expiring download grant for `key`.
    fn get_grant(&self, key: &str) -> Result<Grant, StorageError>;

    /// Check a grant presented back to the store.
    fn verify_grant(
        &self,
        method: GrantMethod,
        key: &str,
        expires: i64,
        signature: &str,
    ) -> Result<(), StorageError>;

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

/// Validate an object key.
///
/// Keys are relative, `/`-separated paths made of `[A-Za-z0-9._-]`
/// segments. Empty, `.` and `..` segments are rejected.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey(format!(
            "key must not exceed {MAX_KEY_LEN} characters"
        )));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::InvalidKey(format!(
                "key '{key}' contains an empty or relative segment"
            )));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(StorageError::InvalidKey(format!(
                "key '{key}' contains unsupported characters"
            )));
        }
    }
    Ok(())
}

/// Reduce a client-supplied filename to a single safe key segment.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Key of the artifact produced for `input_key`'s job: `processed/{job}/{stem}.txt`.
pub fn output_key_for(job_id: &str, input_key: &str) -> String {
    let filename = input_key.rsplit('/').next().unwrap_or(input_key);
    let stem = match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    };
    format!("{PROCESSED_PREFIX}/{job_id}/{stem}.txt")
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// HMAC-SHA256 signer for grant URLs.
#[derive(Clone)]
pub struct GrantSigner {
    secret: Vec<u8>,
}

impl GrantSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self, method: GrantMethod, key: &str, expires: i64) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(method.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    /// Hex-encoded signature for a grant.
    pub fn sign(&self, method: GrantMethod, key: &str, expires: i64) -> String {
        hex::encode(self.mac(method, key, expires).finalize().into_bytes())
    }

    /// Constant-time signature check.
    pub fn verify(&self, method: GrantMethod, key: &str, expires: i64, signature: &str) -> bool {
        match hex::decode(signature) {
            Ok(bytes) => self.mac(method, key, expires).verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Local filesystem implementation
// ---------------------------------------------------------------------------

/// Filesystem-backed object store issuing signed grant URLs.
pub struct LocalObjectStore {
    root: PathBuf,
    signer: GrantSigner,
    public_base_url: String,
    ttl: chrono::Duration,
}

impl LocalObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        signing_secret: &str,
        public_base_url: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            signer: GrantSigner::new(signing_secret),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            ttl: chrono::Duration::from_std(ttl.min(MAX_GRANT_TTL))
                .unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn issue(&self, method: GrantMethod, key: &str) -> Result<Grant, StorageError> {
        validate_key(key)?;
        let expires_at = chrono::Utc::now() + self.ttl;
        let expires = expires_at.timestamp();
        let signature = self.signer.sign(method, key, expires);
        Ok(Grant {
            key: key.to_string(),
            method,
            url: format!(
                "{}/api/v1/storage/objects/{key}?expires={expires}&signature={signature}",
                self.public_base_url
            ),
            expires_at,
        })
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn put_grant(&self, key: &str) -> Result<Grant, StorageError> {
        self.issue(GrantMethod::Put, key)
    }

    fn get_grant(&self, key: &str) -> Result<Grant, StorageError> {
        self.issue(GrantMethod::Get, key)
    }

    fn verify_grant(
        &self,
        method: GrantMethod,
        key: &str,
        expires: i64,
        signature: &str,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        if !self.signer.verify(method, key, expires, signature) {
            return Err(StorageError::BadSignature);
        }
        if chrono::Utc::now().timestamp() > expires {
            return Err(StorageError::GrantExpired);
        }
        Ok(())
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

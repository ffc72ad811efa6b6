//! Content-derived identities
//!
//! Every record and memory is keyed by the SHA-256 digest of a canonical JSON
//! rendering of its content. Object keys are sorted recursively before hashing,
//! so two payloads that are equal by value hash identically regardless of the
//! order their fields were inserted in.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::errors::{HypercubeError, Result};

/// Length of an identity in hex characters (SHA-256)
pub const IDENTITY_HEX_LEN: usize = 64;

/// Content hash used as primary key and dedup token.
///
/// Deserialization goes through [`Identity::parse`], so imported data can only
/// carry well-formed identities.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Parse an externally supplied identity (64 lowercase hex characters)
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != IDENTITY_HEX_LEN {
            return Err(HypercubeError::validation(
                "identity",
                format!("expected {IDENTITY_HEX_LEN} hex chars, got {}", s.len()),
            ));
        }
        if !s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
            return Err(HypercubeError::validation(
                "identity",
                "identity must be lowercase hex",
            ));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 characters, for log lines
    pub fn short(&self) -> &str {
        self.0.get(..16).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = HypercubeError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = HypercubeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Compute the identity of any serializable payload.
///
/// Fails with a validation error when the payload cannot be represented as
/// JSON (for example a map with non-string keys).
pub fn identity_of<T: Serialize + ?Sized>(payload: &T) -> Result<Identity> {
    let value = serde_json::to_value(payload).map_err(|e| {
        HypercubeError::validation("payload", format!("payload is not serializable: {e}"))
    })?;
    Ok(identity_of_value(&value))
}

/// Compute the identity of an already-converted JSON value. Infallible.
pub fn identity_of_value(value: &Value) -> Identity {
    let mut canonical = Vec::with_capacity(128);
    write_canonical(value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let digest = hasher.finalize();
    Identity(format!("{digest:x}"))
}

/// Canonical JSON: sorted object keys, no insignificant whitespace.
fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out);
                out.push(b':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) {
    // Scalars always serialize; the fallback only guards the signature.
    if serde_json::to_writer(&mut *out, value).is_err() {
        out.extend_from_slice(b"null");
    }
}

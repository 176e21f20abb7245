//! Blob identifier, origin registry entry and tier definitions

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BlobError, BlobResult};

/// Content identifier of a blob (typically a hex sha256)
///
/// The same token is used as the local file name, the durable store object
/// key and the origin registry key. It is trusted, never verified against
/// the bytes it names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobId(String);

impl BlobId {
    /// Parse an identifier, rejecting anything that is not a single safe
    /// path component
    pub fn parse(value: impl Into<String>) -> BlobResult<Self> {
        let value = value.into();
        if value.is_empty()
            || value == "."
            || value == ".."
            || value.contains(['/', '\\', '\0'])
        {
            return Err(BlobError::InvalidId(value));
        }
        Ok(Self(value))
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BlobId {
    type Error = BlobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BlobId::parse(value)
    }
}

impl From<BlobId> for String {
    fn from(id: BlobId) -> Self {
        id.0
    }
}

impl std::str::FromStr for BlobId {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlobId::parse(s)
    }
}

/// A blob whose upstream location is known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownBlob {
    /// Content identifier
    pub hash: BlobId,
    /// URL the bytes can be fetched from
    pub url: String,
}

impl KnownBlob {
    pub fn new(hash: BlobId, url: impl Into<String>) -> Self {
        Self {
            hash,
            url: url.into(),
        }
    }

    /// Registry shipped with the daemon
    ///
    /// Hashes come from the `x-linked-etag` header of a HEAD request against
    /// the Hugging Face resolve URL.
    pub fn builtin() -> Vec<KnownBlob> {
        const BUILTIN: &[(&str, &str)] = &[
            (
                "77ebb031649ac7a16b89b4078feb197d56a61941b703a980233069a2670c811b",
                "https://huggingface.co/unsloth/Llama-3.3-70B-Instruct-GGUF/resolve/main/Llama-3.3-70B-Instruct-Q6_K/Llama-3.3-70B-Instruct-Q6_K-00001-of-00002.gguf",
            ),
            (
                "f50428a8c9912e949f5273174e66c9febdc7cd21617595de2dc0e5c9df536434",
                "https://huggingface.co/unsloth/Llama-3.3-70B-Instruct-GGUF/resolve/main/Llama-3.3-70B-Instruct-Q6_K/Llama-3.3-70B-Instruct-Q6_K-00002-of-00002.gguf",
            ),
            (
                "ecb6908345e7a10be94511eae715b6b6eadbc518b7c1dd0fd5ba8816b62b4dc9",
                "https://huggingface.co/unsloth/gemma-3-12b-it-GGUF/resolve/main/gemma-3-12b-it-Q4_K_M.gguf",
            ),
        ];

        BUILTIN
            .iter()
            .map(|(hash, url)| KnownBlob {
                hash: BlobId(hash.to_string()),
                url: url.to_string(),
            })
            .collect()
    }
}

/// Cache tier that satisfied a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Local disk
    Local,
    /// Durable remote object store
    Durable,
    /// Origin HTTP source
    Origin,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Local => write!(f, "local"),
            Tier::Durable => write!(f, "durable"),
            Tier::Origin => write!(f, "origin"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_hashes() {
        let id = BlobId::parse("ecb6908345e7a10be94511eae715b6b6eadbc518b7c1dd0fd5ba8816b62b4dc9")
            .unwrap();
        assert_eq!(id.as_str().len(), 64);
        assert_eq!(id.to_string(), id.as_str());
    }

    #[test]
    fn test_parse_rejects_path_tricks() {
        for bad in ["", ".", "..", "a/b", "a\\b", "nul\0byte"] {
            assert!(
                matches!(BlobId::parse(bad), Err(BlobError::InvalidId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_builtin_registry() {
        let blobs = KnownBlob::builtin();
        assert_eq!(blobs.len(), 3);
        assert!(blobs.iter().all(|b| b.url.starts_with("https://huggingface.co/")));
    }

    #[test]
    fn test_known_blob_deserialize_validates_hash() {
        let ok: Result<KnownBlob, _> =
            serde_json::from_str(r#"{"hash":"abc","url":"http://x/abc"}"#);
        assert!(ok.is_ok());

        let bad: Result<KnownBlob, _> =
            serde_json::from_str(r#"{"hash":"../etc","url":"http://x/abc"}"#);
        assert!(bad.is_err());
    }
}

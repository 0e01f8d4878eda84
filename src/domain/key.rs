//! Content-addressed keys shared by the result cache and the temp-file namespace.

use std::fmt;

use sha2::{Digest, Sha256};

use super::types::OutputFormat;

const DESCRIPTION_PREFIX: &str = "desc_";

/// Lowercase hex SHA-256 digest identifying one render output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Key for an image render: hash of the source followed by the format name.
    pub fn for_render(source: &str, format: OutputFormat) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(format.as_str().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Key for a generated description. Descriptions do not depend on the image
    /// format, so only the source participates.
    pub fn for_description(source: &str) -> Self {
        Self(format!("{DESCRIPTION_PREFIX}{}", hash_bytes(source.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

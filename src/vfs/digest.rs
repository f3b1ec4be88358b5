//! Path digests used as overlay keys.

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::fs::normalize_path;

/// Number of hash bytes kept in a digest (128 bits).
const DIGEST_BYTES: usize = 16;

/// Content-independent identity of a path.
///
/// Two spellings of the same location (`/a/./b`, `/a/b`) share a digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathHashDigest(String);

impl PathHashDigest {
    pub fn of(path: &Path) -> Self {
        let normalized = normalize_path(path);
        let mut hasher = Sha256::new();
        hasher.update(normalized.to_string_lossy().as_bytes());
        let hash = hasher.finalize();
        Self(hex::encode(&hash[..DIGEST_BYTES]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathHashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

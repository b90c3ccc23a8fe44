//! Content digests for build inputs and artifacts.
//!
//! Everything the engine consults to decide "did this change?" is reduced to
//! a SHA-256 digest of file content. Timestamps are never used.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{instrument, trace};

/// Digests are read and hashed in chunks of this size.
const CHUNK_SIZE: usize = 4096;

/// The outcome of digesting a file.
///
/// `Missing` and `Error` are distinct on purpose: a missing file means the
/// entry can be dropped or the input treated as changed, while a read error
/// means nothing can be concluded and the caller should assume modification
/// without touching the store.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum FileDigest {
    /// The file exists and hashed cleanly; 64 lowercase hex characters.
    Digest(String),

    /// The path (and its fallback variant, if any) is not a regular file.
    Missing,

    /// The file exists but could not be read.
    Error(String),
}

impl FileDigest {
    /// The hex digest, if the file hashed cleanly.
    pub fn hex(&self) -> Option<&str> {
        match self {
            Self::Digest(hex) => Some(hex),
            _ => None,
        }
    }
}

/// Hash the contents of the file at the specified path.
///
/// If the path is not a regular file and `fallback_ext` is provided, the
/// extension is appended and the variant is tried instead. This tolerates
/// hosts that decorate artifacts, e.g. a linker that produced `app.exe`
/// while the target was declared as `app`.
#[instrument]
pub async fn digest_file(path: impl AsRef<Path> + Debug, fallback_ext: Option<&str>) -> FileDigest {
    let path = path.as_ref();
    let path = match resolve(path, fallback_ext) {
        Some(path) => path,
        None => return FileDigest::Missing,
    };

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => return FileDigest::Error(err.to_string()),
    };

    let mut hasher = Sha256::new();
    let mut data = vec![0; CHUNK_SIZE];
    let mut bytes = 0usize;
    loop {
        let len = match file.read(&mut data).await {
            Ok(len) => len,
            Err(err) => return FileDigest::Error(err.to_string()),
        };
        if len == 0 {
            break;
        }
        hasher.update(&data[..len]);
        bytes += len;
    }

    let hex = hex::encode(hasher.finalize());
    trace!(?path, hash = %hex, ?bytes, "hashed file");
    FileDigest::Digest(hex)
}

/// Pick the path to hash: the file itself, or its fallback variant.
fn resolve(path: &Path, fallback_ext: Option<&str>) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    if let Some(ext) = fallback_ext {
        let mut fallback = path.as_os_str().to_os_string();
        fallback.push(ext);
        let fallback = PathBuf::from(fallback);
        if fallback.is_file() {
            return Some(fallback);
        }
    }
    None
}

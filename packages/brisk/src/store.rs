//! The on-disk hash store.
//!
//! A single JSON object mapping file paths to SHA-256 hex digests, kept at
//! `<build dir>/.hashes.json`. The store is what makes builds incremental:
//! a file whose current digest matches its stored digest is unmodified.
//!
//! The format is fixed: pretty-printed with a one-space indent and keys
//! sorted ascending byte-wise, so successive runs produce stable diffs.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use color_eyre::{Result, eyre::Context};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::Config;

/// File name of the persisted store inside the build directory.
pub const FILE_NAME: &str = ".hashes.json";

/// Entry counts per extension class, for the loaded-store report.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct StoreStats {
    pub total: usize,
    pub sources: usize,
    pub includes: usize,
    pub deps: usize,
}

/// The path → digest mapping consulted and refreshed by every build.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct HashStore {
    entries: BTreeMap<String, String>,
}

impl HashStore {
    /// Load the store from the build directory.
    ///
    /// A missing, unreadable, or corrupt file yields an empty store: the
    /// worst outcome of losing the store is a full rebuild, never a wrong
    /// one.
    #[instrument(name = "HashStore::load")]
    pub async fn load(build_dir: impl AsRef<Path> + Debug) -> Self {
        let path = build_dir.as_ref().join(FILE_NAME);
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(?path, %err, "hash store unparsable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) => {
                debug!(?path, %err, "hash store unreadable, starting empty");
                BTreeMap::new()
            }
        };
        debug!(?path, entries = entries.len(), "loaded hash store");
        Self { entries }
    }

    /// Persist the store into the build directory, overwriting any
    /// previous file.
    #[instrument(name = "HashStore::save", skip(self))]
    pub async fn save(&self, build_dir: impl AsRef<Path> + Debug) -> Result<()> {
        let path = build_dir.as_ref().join(FILE_NAME);
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.entries
            .serialize(&mut serializer)
            .context("serialize hash store")?;
        tokio::fs::write(&path, &buf)
            .await
            .with_context(|| format!("write hash store {path:?}"))?;
        debug!(?path, entries = self.entries.len(), "saved hash store");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, digest: impl Into<String>) {
        self.entries.insert(key.into(), digest.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Apply the per-run new-hash mapping collected by the scheduler.
    pub fn merge(&mut self, new_hashes: BTreeMap<String, String>) {
        self.entries.extend(new_hashes);
    }

    /// Drop every entry. Used by remove mode before the final persist.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count entries by extension class for the verbose load report.
    pub fn stats(&self, config: &Config) -> StoreStats {
        let mut stats = StoreStats {
            total: self.entries.len(),
            ..StoreStats::default()
        };
        for key in self.entries.keys() {
            let ext = Path::new(key)
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or_default();
            if ext == config.expect("SRCEXT") {
                stats.sources += 1;
            } else if ext == config.expect("INCEXT") {
                stats.includes += 1;
            } else if ext == config.expect("DEPEXT") {
                stats.deps += 1;
            }
        }
        stats
    }
}

/// Normalize a path to the forward-slash form used for store keys that
/// must match across hosts (the target artifact key).
pub fn slash_key(path: impl AsRef<Path>) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

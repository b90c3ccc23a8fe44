//! Build configuration: the key/value mapping consumed by rule templates,
//! plus the records describing compiler profiles and targets.
//!
//! The engine only ever sees materialized records; the TOML loading at the
//! bottom of this module is a thin adapter over the files in `cfg/`. A
//! profile file is a flat table of uppercase keys, a target file is an
//! ordered `[[target]]` array with optional module-level `config` and
//! `src_files` entries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Configuration defaults seeded before any overlay.
const DEFAULTS: [(&str, &str); 6] = [
    ("DEPPATH", "dep"),
    ("OBJPATH", "obj"),
    ("SRCEXT", "c"),
    ("INCEXT", "h"),
    ("DEPEXT", "d"),
    ("OBJEXT", "o"),
];

/// The configuration mapping: uppercase string keys to string values.
///
/// Built once per run from defaults, the compiler profile, and the target
/// module; the orchestrator then clones and enriches a copy per target
/// (and per source) with synthesized keys like `BUILD_DIR`, `SRC_PATH`,
/// and `OBJ_LIST`. Workers never mutate a shared instance.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Config(BTreeMap<String, String>);

impl Config {
    /// Seed a mapping with the defaults and the selected build name.
    ///
    /// `BUILD` starts as the profile name and may be overridden by the
    /// profile table itself.
    pub fn seeded(build: &str) -> Self {
        let mut values = BTreeMap::new();
        for (key, value) in DEFAULTS {
            values.insert(String::from(key), String::from(value));
        }
        values.insert(String::from("BUILD"), String::from(build));
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up a key that overlays have guaranteed to exist.
    pub fn expect(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Apply `values` over the current mapping, replacing existing keys.
    pub fn overlay<'a>(&mut self, values: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (key, value) in values {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A compiler profile: the build name plus toolchain commands and flags.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Profile {
    /// The profile name as selected on the command line, e.g. `gcc_release`.
    pub name: String,

    /// The key/value table contributed by the profile file.
    pub values: BTreeMap<String, String>,
}

impl Profile {
    /// Load a profile table from `<config dir>/<name>.toml`.
    #[instrument(name = "Profile::load")]
    pub fn load(name: &str) -> Result<Self> {
        let path = config_path(name);
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("read compiler configuration {path:?}"))?;
        let values = toml::from_str::<BTreeMap<String, String>>(&contents)
            .with_context(|| format!("parse compiler configuration {path:?}"))?;
        debug!(?path, entries = values.len(), "loaded profile");
        Ok(Self {
            name: String::from(name),
            values,
        })
    }

    /// The configuration mapping for a run using this profile.
    pub fn config(&self) -> Config {
        let mut config = Config::seeded(&self.name);
        config.overlay(&self.values);
        config
    }
}

/// One declared build unit.
///
/// Every field is optional in the file; a record without `TARGET` is
/// reported and skipped at run time. Unknown uppercase keys are retained in
/// `extra` so `TARGET*`-prefixed values reach rule templates.
#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct Target {
    /// The artifact name, relative to the build directory.
    #[serde(rename = "TARGET")]
    pub target: Option<String>,

    /// Whitespace-separated source directories for discovery mode.
    #[serde(rename = "SRCDIR")]
    pub srcdir: Option<String>,

    /// Path prefix prepended to each `SRCDIR` entry during discovery and
    /// stripped from object paths.
    #[serde(rename = "SRCBASE")]
    pub srcbase: Option<String>,

    #[serde(rename = "SRCEXT")]
    pub srcext: Option<String>,
    #[serde(rename = "INCEXT")]
    pub incext: Option<String>,
    #[serde(rename = "DEPEXT")]
    pub depext: Option<String>,
    #[serde(rename = "OBJEXT")]
    pub objext: Option<String>,
    #[serde(rename = "DEPPATH")]
    pub deppath: Option<String>,
    #[serde(rename = "OBJPATH")]
    pub objpath: Option<String>,

    /// Rule templates. Each is evaluated against the configuration mapping
    /// right before it runs.
    #[serde(rename = "PRERULE")]
    pub prerule: Option<String>,
    #[serde(rename = "DEPRULE")]
    pub deprule: Option<String>,
    #[serde(rename = "SRCRULE")]
    pub srcrule: Option<String>,
    #[serde(rename = "OBJRULE")]
    pub objrule: Option<String>,
    #[serde(rename = "EXERULE")]
    pub exerule: Option<String>,
    #[serde(rename = "PSTRULE")]
    pub pstrule: Option<String>,
    #[serde(rename = "REMRULE")]
    pub remrule: Option<String>,

    /// Rule template producing extra files whose hashes participate in the
    /// link decision.
    #[serde(rename = "DEPENDS")]
    pub depends: Option<String>,

    /// Per-target worker cap.
    #[serde(rename = "THREADS")]
    pub threads: Option<usize>,

    /// Any other keys from the record, e.g. `TARGETFLAGS`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Target {
    /// The per-target overrides of the extension and path keys, in the
    /// order they overlay the configuration.
    pub fn overrides(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("SRCEXT", self.srcext.as_deref()),
            ("INCEXT", self.incext.as_deref()),
            ("DEPEXT", self.depext.as_deref()),
            ("OBJEXT", self.objext.as_deref()),
            ("DEPPATH", self.deppath.as_deref()),
            ("OBJPATH", self.objpath.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
    }

    /// Every `TARGET*` key contributed by this record, including `TARGET`
    /// itself.
    pub fn target_keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.target
            .as_deref()
            .map(|target| ("TARGET", target))
            .into_iter()
            .chain(
                self.extra
                    .iter()
                    .filter(|(key, _)| key.starts_with("TARGET"))
                    .map(|(key, value)| (key.as_str(), value.as_str())),
            )
    }
}

/// The parsed contents of one target configuration file.
#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize)]
pub struct TargetModule {
    /// Explicit source list overriding directory discovery for every
    /// target in the module.
    #[serde(default)]
    pub src_files: Vec<String>,

    /// Module-level configuration overlaid after the compiler profile.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// The targets, in declared (build) order.
    #[serde(default, rename = "target")]
    pub targets: Vec<Target>,
}

impl TargetModule {
    /// Load a target module from `<config dir>/<name>.toml`.
    #[instrument(name = "TargetModule::load")]
    pub fn load(name: &str) -> Result<Self> {
        let path = config_path(name);
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("read target configuration {path:?}"))?;
        let module = toml::from_str::<Self>(&contents)
            .with_context(|| format!("parse target configuration {path:?}"))?;
        debug!(?path, targets = module.targets.len(), "loaded target module");
        Ok(module)
    }
}

/// Resolve a configuration name to a file path.
///
/// Names are looked up inside a `cfg/` directory when one exists in the
/// working directory, matching where projects keep their build
/// configuration; otherwise the working directory itself.
fn config_path(name: &str) -> PathBuf {
    let file = format!("{name}.toml");
    if Path::new("cfg").is_dir() {
        Path::new("cfg").join(file)
    } else {
        PathBuf::from(file)
    }
}

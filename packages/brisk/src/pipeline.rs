//! The per-source build pipeline.
//!
//! One invocation handles one source file end to end: make sure the
//! dependency file exists, decide whether the source counts as modified,
//! compile it if so, and record what the compiler observed so the next run
//! can skip it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use color_eyre::{Result, eyre::bail};
use tracing::{debug, instrument, trace};

use crate::command::{CommandRunner, Progress};
use crate::config::{Config, Target};
use crate::depfile::DepRecord;
use crate::digest::{self, FileDigest};
use crate::report::{self, ReporterHandle, Severity};
use crate::rule;
use crate::store::HashStore;

/// State shared by every pipeline of one target, guarded by a single lock.
#[derive(Debug, Default)]
pub struct Shared {
    /// Object paths in worker completion order.
    pub obj_list: Vec<String>,

    /// The same entries with the `SRCBASE` prefix stripped.
    pub obj_list_rel: Vec<String>,

    /// Digests observed while compiling, merged into the store after the
    /// pool drains.
    pub new_hashes: std::collections::BTreeMap<String, String>,
}

/// Everything a pipeline needs besides its own source path.
///
/// The configuration and store are read-only here; pipelines communicate
/// results exclusively through [`Shared`].
pub struct SourceContext<'a> {
    pub runner: &'a CommandRunner,
    pub reporter: &'a ReporterHandle,
    pub target: &'a Target,
    pub config: &'a Config,
    pub store: &'a HashStore,
    pub shared: &'a Mutex<Shared>,
    pub remove: bool,
    pub total: usize,
}

/// Run the pipeline for one source file.
///
/// Returns whether the source counted as modified (and was therefore
/// compiled). `iteration` is the 1-based submission index used for
/// progress reporting.
#[instrument(name = "build_source", skip(ctx))]
pub async fn build_source(ctx: &SourceContext<'_>, src: &str, iteration: usize) -> Result<bool> {
    let src = host_path(src);
    let paths = SourcePaths::derive(ctx.config, ctx.target, &src);

    if ctx.remove {
        remove_source(ctx, &paths).await?;
        return Ok(false);
    }

    for parent in [paths.dep_path.parent(), paths.obj_path.parent()] {
        if let Some(parent) = parent {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut config = ctx.config.clone();
    config.set("SRC_PATH", src.as_str());
    config.set("DEP_PATH", paths.dep_path.display().to_string());
    config.set("OBJ_PATH", paths.obj_path.display().to_string());

    // Make sure the dependency file exists before consulting it.
    if let Some(deprule) = ctx.target.deprule.as_deref() {
        if !paths.dep_path.is_file() {
            let cmd = rule::eval(deprule, &config);
            ctx.runner.run(&cmd, false, None).await?;
        }
    }

    // Assume modified unless the dependency file proves otherwise.
    let mut modified = true;
    let mut record = None;
    if ctx.target.deprule.is_some() {
        match read_record(&paths.dep_path).await {
            Some(parsed) => {
                check_object(&parsed, &paths)?;
                modified = inputs_modified(ctx.store, &parsed).await;
                record = Some(parsed);
            }
            None => {
                trace!(dep_path = %paths.dep_path.display(), "dependency file unusable, assuming modified");
            }
        }
    }

    if !paths.obj_path.is_file() {
        modified = true;
    }

    if modified {
        if let Some(srcrule) = ctx.target.srcrule.as_deref() {
            let cmd = rule::eval(srcrule, &config);
            let progress = Progress {
                iteration,
                total: ctx.total,
                label: src.clone(),
            };
            ctx.runner.run(&cmd, false, Some(progress)).await?;

            // The compile succeeded: remember what it consumed.
            if let Some(record) = &record {
                let mut observed = Vec::with_capacity(record.inputs.len());
                for input in &record.inputs {
                    if let FileDigest::Digest(hex) = digest::digest_file(input, None).await {
                        observed.push((input.clone(), hex));
                    }
                }
                let mut shared = ctx.shared.lock().expect("shared state lock");
                shared.new_hashes.extend(observed);
            }
        }
    }

    let entry = paths.obj_path.display().to_string();
    let rel = strip_base(&entry, ctx.target.srcbase.as_deref());
    {
        let mut shared = ctx.shared.lock().expect("shared state lock");
        shared.obj_list.push(entry);
        shared.obj_list_rel.push(rel);
    }

    debug!(%src, modified, "source pipeline finished");
    Ok(modified)
}

/// Remove-mode handling for one source: delete its outputs and run the
/// cleanup rules.
async fn remove_source(ctx: &SourceContext<'_>, paths: &SourcePaths) -> Result<()> {
    for path in [&paths.dep_path, &paths.obj_path] {
        if path.is_file() {
            report::message(
                ctx.reporter,
                Severity::Remove,
                format!("Remove {}", path.display()),
            );
            tokio::fs::remove_file(path).await?;
        }
    }

    let mut config = ctx.config.clone();
    config.set("SRC_PATH", paths.src.as_str());
    config.set("DEP_PATH", paths.dep_path.display().to_string());
    config.set("OBJ_PATH", paths.obj_path.display().to_string());

    if let Some(remrule) = ctx.target.remrule.as_deref() {
        let cmd = rule::eval(remrule, &config);
        ctx.runner.run(&cmd, false, None).await?;
    }
    if let Some(prerule) = ctx.target.prerule.as_deref() {
        let cmd = rule::eval(prerule, &config);
        ctx.runner.run(&cmd, true, None).await?;
    }
    Ok(())
}

/// The derived file locations for one source.
struct SourcePaths {
    src: String,
    dep_path: PathBuf,
    obj_path: PathBuf,
}

impl SourcePaths {
    /// The dependency tree mirrors the full source path; the object tree
    /// mirrors it with the `SRCBASE` prefix stripped.
    fn derive(config: &Config, target: &Target, src: &str) -> Self {
        let dep_dir = Path::new(config.expect("DEP_DIR"));
        let obj_dir = Path::new(config.expect("OBJ_DIR"));

        let dep_rel = Path::new(src).with_extension(config.expect("DEPEXT"));
        let stripped = strip_base(src, target.srcbase.as_deref());
        let obj_rel = Path::new(&stripped).with_extension(config.expect("OBJEXT"));

        Self {
            src: String::from(src),
            dep_path: dep_dir.join(dep_rel),
            obj_path: obj_dir.join(obj_rel),
        }
    }
}

/// Read and parse the dependency file, or `None` if that is impossible.
async fn read_record(dep_path: &Path) -> Option<DepRecord> {
    let contents = tokio::fs::read_to_string(dep_path).await.ok()?;
    DepRecord::parse(&contents).ok()
}

/// The head of the dependency file must name the object this source
/// produces; anything else means the file belongs to different output and
/// continuing would corrupt the build.
fn check_object(record: &DepRecord, paths: &SourcePaths) -> Result<()> {
    let expected = paths
        .obj_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let actual = Path::new(&record.object)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if expected != actual {
        bail!(
            "mismatch in dependency file for {}: expected {expected}, got {actual}",
            paths.src,
        );
    }
    Ok(())
}

/// Decide modification from the dependency tail.
///
/// A single input whose digest is absent from the store, differs, is
/// missing on disk, or cannot be read marks the source modified.
async fn inputs_modified(store: &HashStore, record: &DepRecord) -> bool {
    for input in &record.inputs {
        match digest::digest_file(input, None).await {
            FileDigest::Digest(hex) => {
                if store.get(input) != Some(hex.as_str()) {
                    trace!(%input, "input digest differs or is unknown");
                    return true;
                }
            }
            FileDigest::Missing => {
                trace!(%input, "input missing");
                return true;
            }
            FileDigest::Error(err) => {
                trace!(%input, %err, "input unreadable, assuming modified");
                return true;
            }
        }
    }
    false
}

/// Normalize separators to the host's form.
fn host_path(path: &str) -> String {
    if cfg!(windows) {
        path.replace('/', "\\")
    } else {
        path.replace('\\', "/")
    }
}

/// Strip a leading `<base>/` from a path string.
fn strip_base(path: &str, base: Option<&str>) -> String {
    match base {
        Some(base) if !base.is_empty() => {
            let prefix = format!("{base}/");
            match path.strip_prefix(&prefix) {
                Some(rest) => String::from(rest),
                None => String::from(path),
            }
        }
        _ => String::from(path),
    }
}

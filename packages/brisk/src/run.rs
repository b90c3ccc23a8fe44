//! The target orchestrator.
//!
//! Targets run strictly in declared order and only communicate through
//! artifact files. For each target the orchestrator prepares the build
//! tree, fans the sources out through the scheduler, decides whether the
//! artifact must be relinked, and persists the hash store before moving
//! on, so a crash never loses more than the current target's work.

use std::path::{Path, PathBuf};
use std::time::Instant;

use color_eyre::{Result, eyre::Context};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::command::CommandRunner;
use crate::config::{Config, Profile, Target, TargetModule};
use crate::digest::{self, FileDigest};
use crate::report::{self, ReporterHandle, Severity};
use crate::rule;
use crate::schedule;
use crate::store::{self, HashStore};

/// Flags and values for one driver invocation, threaded explicitly through
/// the orchestrator instead of living in globals.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Remove dependency files, object files, and artifacts instead of
    /// building.
    pub remove: bool,

    /// Delete the object directory before building each target.
    pub wipe: bool,

    /// Report command failures but keep building.
    pub debug: bool,

    /// Worker override; wins over per-target `THREADS`.
    pub jobs: Option<usize>,

    /// Arguments surfaced to rules as `$ARGS`, e.g. for `EXERULE`.
    pub args: Vec<String>,
}

/// Build every target of the module, in declared order.
#[instrument(skip_all, fields(profile = %profile.name, targets = module.targets.len()))]
pub async fn run_targets(
    reporter: &ReporterHandle,
    profile: &Profile,
    module: &TargetModule,
    options: &RunOptions,
) -> Result<()> {
    let mut base = profile.config();
    base.overlay(&module.config);

    let build_dir = Path::new("build").join(base.expect("BUILD"));
    tokio::fs::create_dir_all(&build_dir)
        .await
        .with_context(|| format!("create build directory {}", build_dir.display()))?;
    base.set("BUILD_DIR", build_dir.display().to_string());

    let mut store = HashStore::load(&build_dir).await;
    let stats = store.stats(&base);
    report::message(
        reporter,
        Severity::Info,
        format!(
            "Loaded hash store with {} entries (src: {}, inc: {}, dep: {}).",
            stats.total, stats.sources, stats.includes, stats.deps,
        ),
    );

    let runner = CommandRunner::new(reporter.clone(), options.debug);

    for (index, target) in module.targets.iter().enumerate() {
        let Some(name) = target.target.as_deref() else {
            report::message(
                reporter,
                Severity::Warn,
                format!("No target defined in section #{index}, skipping."),
            );
            continue;
        };
        report::message(reporter, Severity::Info, format!("Target: {name}"));

        build_target(
            reporter,
            &runner,
            &base,
            &build_dir,
            target,
            name,
            &module.src_files,
            options,
            &mut store,
        )
        .await?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(target = name))]
async fn build_target(
    reporter: &ReporterHandle,
    runner: &CommandRunner,
    base: &Config,
    build_dir: &Path,
    target: &Target,
    name: &str,
    src_files: &[String],
    options: &RunOptions,
    store: &mut HashStore,
) -> Result<()> {
    let mut config = base.clone();
    for (key, value) in target.overrides() {
        config.set(key, value);
    }

    let dep_dir = build_dir.join(config.expect("DEPPATH"));
    let obj_dir = build_dir.join(config.expect("OBJPATH"));
    if options.wipe && obj_dir.is_dir() {
        report::message(
            reporter,
            Severity::Remove,
            format!("Remove {}", obj_dir.display()),
        );
        tokio::fs::remove_dir_all(&obj_dir)
            .await
            .with_context(|| format!("wipe {}", obj_dir.display()))?;
    }
    for dir in [&dep_dir, &obj_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;
    }

    let target_path = build_dir.join(name);
    config.set("DEP_DIR", dep_dir.display().to_string());
    config.set("OBJ_DIR", obj_dir.display().to_string());
    config.set("TARGET_PATH", target_path.display().to_string());
    config.set("ARGS", options.args.join(" "));
    for (key, value) in target.target_keys() {
        config.set(key, value);
    }
    if let Some(srcbase) = target.srcbase.as_deref() {
        config.set("SRCBASE", srcbase);
    }
    if let Some(srcdir) = target.srcdir.as_deref() {
        config.set("SRCDIR", srcdir);
    }

    if !options.remove {
        if let Some(prerule) = target.prerule.as_deref() {
            let cmd = rule::eval(prerule, &config);
            runner.run(&cmd, false, None).await?;
        }
    }

    let Some(sources) = discover_sources(reporter, target, &config, src_files) else {
        // Discovery problems skip the target, not the run.
        return Ok(());
    };
    report::message(
        reporter,
        Severity::Info,
        format!("Processing {} source files...", sources.len()),
    );

    let jobs = schedule::effective_jobs(options.jobs, target, options.remove);
    let outcome = schedule::compile_sources(
        runner,
        reporter,
        target,
        &config,
        store,
        &sources,
        jobs,
        options.remove,
    )
    .await?;

    config.set("OBJ_LIST", outcome.obj_list.join(" "));
    config.set("OBJ_LIST_REL", outcome.obj_list_rel.join(" "));

    if options.remove {
        remove_artifact(reporter, &target_path).await?;
        store.clear();
        store.save(build_dir).await?;
        return Ok(());
    }

    let artifact_key = store::slash_key(&target_path);
    let mut link_needed = outcome.any_modified;

    if let Some(depends) = target.depends.as_deref() {
        let depends = rule::eval(depends, &config);
        config.set("DEPENDS", depends.clone());
        for file in depends.split_whitespace() {
            match digest::digest_file(file, None).await {
                FileDigest::Digest(hex) => {
                    if store.get(file) != Some(hex.as_str()) {
                        link_needed = true;
                    }
                    store.insert(file, hex);
                }
                FileDigest::Missing | FileDigest::Error(_) => {
                    store.remove(file);
                    link_needed = true;
                }
            }
        }
    }

    match digest::digest_file(&target_path, Some(".exe")).await {
        FileDigest::Digest(hex) => {
            if store.get(&artifact_key) != Some(hex.as_str()) {
                link_needed = true;
            }
        }
        FileDigest::Missing | FileDigest::Error(_) => link_needed = true,
    }

    if link_needed {
        if let Some(objrule) = target.objrule.as_deref() {
            let cmd = rule::eval(objrule, &config);
            runner.run(&cmd, false, None).await?;
            if let FileDigest::Digest(hex) = digest::digest_file(&target_path, Some(".exe")).await {
                store.insert(artifact_key.clone(), hex);
            }
        }
    } else {
        debug!(target = name, "artifact up to date, skipping link");
    }

    store.merge(outcome.new_hashes);
    store.save(build_dir).await?;

    if let Some(exerule) = target.exerule.as_deref() {
        let cmd = rule::eval(exerule, &config);
        let started = Instant::now();
        runner.run(&cmd, false, None).await?;
        report::message(
            reporter,
            Severity::Info,
            format!("Target {name} ran for {:.3} s.", started.elapsed().as_secs_f64()),
        );
    }
    if let Some(pstrule) = target.pstrule.as_deref() {
        let cmd = rule::eval(pstrule, &config);
        runner.run(&cmd, false, None).await?;
    }

    Ok(())
}

/// Collect the sources for a target, or `None` when the target should be
/// skipped.
///
/// An explicit module-level source list wins and must exist in full;
/// otherwise each whitespace-separated `SRCDIR` entry (optionally prefixed
/// by `SRCBASE`) is scanned for files with the source extension.
fn discover_sources(
    reporter: &ReporterHandle,
    target: &Target,
    config: &Config,
    src_files: &[String],
) -> Option<Vec<String>> {
    if !src_files.is_empty() {
        let missing = src_files
            .iter()
            .filter(|src| !Path::new(src.as_str()).is_file())
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            report::message(
                reporter,
                Severity::Warn,
                format!("Source files not found: {}", missing.join(" ")),
            );
            return None;
        }
        return Some(src_files.to_vec());
    }

    let srcext = config.expect("SRCEXT");
    let mut sources = Vec::new();
    for dir in config.get("SRCDIR").unwrap_or_default().split_whitespace() {
        let dir = match target.srcbase.as_deref() {
            Some(base) if !base.is_empty() => PathBuf::from(base).join(dir),
            _ => PathBuf::from(dir),
        };
        sources.extend(scan_dir(&dir, srcext));
    }

    if sources.is_empty() {
        report::message(
            reporter,
            Severity::Warn,
            format!(
                "No source files found matching pattern *.{srcext} under {}",
                config.get("SRCDIR").unwrap_or("<no SRCDIR>"),
            ),
        );
        return None;
    }
    Some(sources)
}

/// Non-recursive scan of one directory for files with the extension,
/// sorted by name for deterministic submission order.
fn scan_dir(dir: &Path, srcext: &str) -> Vec<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == srcext)
        })
        .map(|entry| entry.path().display().to_string())
        .collect()
}

/// Delete the artifact, tolerating a decorated variant on disk.
async fn remove_artifact(reporter: &ReporterHandle, target_path: &Path) -> Result<()> {
    let mut candidate = target_path.to_path_buf();
    if !candidate.is_file() {
        let mut decorated = candidate.into_os_string();
        decorated.push(".exe");
        candidate = PathBuf::from(decorated);
    }
    if candidate.is_file() {
        report::message(
            reporter,
            Severity::Remove,
            format!("Remove {}", candidate.display()),
        );
        tokio::fs::remove_file(&candidate)
            .await
            .with_context(|| format!("remove {}", candidate.display()))?;
    }
    Ok(())
}

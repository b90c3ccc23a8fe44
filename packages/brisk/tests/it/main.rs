//! Integration scenarios for the build engine.
//!
//! The engine resolves everything relative to the working directory, so
//! every scenario locks a process-wide mutex, enters a scratch directory,
//! and builds with a portable `sh` toolchain stand-in (`cat`/`printf`)
//! instead of a real compiler.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use brisk::config::{Profile, Target, TargetModule};
use brisk::report::{Event, Reporter, ReporterHandle};
use brisk::run::{self, RunOptions};
use color_eyre::Result;
use tempfile::TempDir;

pub mod build;
pub mod parallel;
pub mod remove;

static CWD: Mutex<()> = Mutex::new(());

/// A scratch working directory held for the duration of one scenario.
///
/// Entering takes the process-wide lock because the working directory is
/// process-global; the previous directory is restored on drop.
pub struct Workdir {
    _dir: TempDir,
    prev: PathBuf,
    _guard: MutexGuard<'static, ()>,
}

impl Workdir {
    pub fn enter() -> Self {
        let guard = CWD.lock().unwrap_or_else(|poison| poison.into_inner());
        let dir = TempDir::new().expect("create temporary directory");
        let prev = std::env::current_dir().expect("read working directory");
        std::env::set_current_dir(dir.path()).expect("enter temporary directory");
        Self {
            _dir: dir,
            prev,
            _guard: guard,
        }
    }
}

impl Drop for Workdir {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.prev);
    }
}

/// Captures every event the engine emits.
#[derive(Clone, Default)]
pub struct RecordingReporter(Arc<Mutex<Vec<Event>>>);

impl Reporter for RecordingReporter {
    fn emit(&self, event: Event) {
        self.0
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(event);
    }
}

impl RecordingReporter {
    pub fn handle(&self) -> ReporterHandle {
        Arc::new(self.clone())
    }

    /// The number of compile steps that actually ran.
    pub fn compiles(&self) -> usize {
        self.0
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .iter()
            .filter(|event| matches!(event, Event::Compile { .. }))
            .count()
    }
}

pub fn write_file(path: impl AsRef<Path>, contents: &str) {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent directory");
    }
    std::fs::write(path, contents).expect("write file");
}

pub fn read_lines(path: impl AsRef<Path>) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.lines().map(String::from).collect(),
        Err(_) => Vec::new(),
    }
}

/// Lay down the stand-in dependency generator.
///
/// It emits a make-style dep file: the object name as head, then the
/// source itself plus every file named by a `#include "..."` line,
/// resolved against the source's directory.
pub fn write_depgen() {
    write_file(
        "depgen.sh",
        r#"#!/bin/sh
src="$1"
out="$2"
base=$(basename "$src")
stem="${base%.*}"
deps="$src"
for inc in $(sed -n 's/#include "\(.*\)"/\1/p' "$src"); do
    deps="$deps $(dirname "$src")/$inc"
done
printf '%s.o: %s\n' "$stem" "$deps" > "$out"
"#,
    );
}

/// A target compiling with `cat` and logging every compile and link so
/// scenarios can count toolchain invocations.
pub fn cat_target(name: &str) -> Target {
    Target {
        target: Some(String::from(name)),
        srcdir: Some(String::from("src")),
        deprule: Some(String::from("sh depgen.sh $SRC_PATH $DEP_PATH")),
        srcrule: Some(String::from(
            "cat $SRC_PATH > $OBJ_PATH; @append compile.log $SRC_PATH",
        )),
        objrule: Some(String::from(
            "cat $OBJ_LIST > $TARGET_PATH; @append link.log $TARGET_PATH",
        )),
        ..Target::default()
    }
}

pub fn module(targets: Vec<Target>) -> TargetModule {
    TargetModule {
        targets,
        ..TargetModule::default()
    }
}

pub fn profile() -> Profile {
    Profile {
        name: String::from("test"),
        values: Default::default(),
    }
}

/// Run the engine with one worker so object order is deterministic.
pub async fn build(reporter: &RecordingReporter, module: &TargetModule) -> Result<()> {
    build_with(
        reporter,
        module,
        RunOptions {
            jobs: Some(1),
            ..RunOptions::default()
        },
    )
    .await
}

pub async fn build_with(
    reporter: &RecordingReporter,
    module: &TargetModule,
    options: RunOptions,
) -> Result<()> {
    let handle = reporter.handle();
    run::run_targets(&handle, &profile(), module, &options).await
}

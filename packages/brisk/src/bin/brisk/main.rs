//! The binary entrypoint for `brisk`, the minimal incremental build driver.

use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;

use brisk::command::CommandFailure;
use brisk::config::{Profile, TargetModule};
use brisk::report::{self, ReporterHandle, Severity};
use brisk::run::{self, RunOptions};

// Since this is a binary crate, we need to ensure these modules aren't pub
// so that they can correctly warn about dead code:
// https://github.com/rust-lang/rust/issues/74970
//
// Relatedly, in this file specifically nothing should be `pub`.
mod console;
mod log;

#[derive(Clone, Debug, Parser)]
#[command(name = "brisk", about = "Minimal incremental builds", version)]
struct TopLevelFlags {
    /// Target configuration name
    target: String,

    /// Compiler configuration name
    #[arg(short = 'c', long = "config", default_value = "gcc_release")]
    config: String,

    /// Remove all dependency, object, and artifact files
    #[arg(short, long)]
    remove: bool,

    /// Delete the object directory before building
    #[arg(short, long)]
    wipe: bool,

    /// Report failing commands but keep building
    #[arg(short, long)]
    debug: bool,

    /// Show the commands as they run
    #[arg(short, long)]
    verbose: bool,

    /// Suppress everything except warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Parallel compile jobs (default: per-target THREADS, else host CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Arguments surfaced to rules as $ARGS
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let top = TopLevelFlags::parse();
    log::init()?;

    let reporter: ReporterHandle = Arc::new(console::ConsoleReporter::new(top.quiet, top.verbose));
    report::message(&reporter, Severity::Info, "brisk - minimal incremental builds");

    let profile = Profile::load(&top.config)?;
    let module = TargetModule::load(&top.target)?;
    let options = RunOptions {
        remove: top.remove,
        wipe: top.wipe,
        debug: top.debug,
        jobs: top.jobs,
        args: top.args,
    };

    match run::run_targets(&reporter, &profile, &module, &options).await {
        Ok(()) => {
            report::message(&reporter, Severity::Info, "Done.");
            Ok(())
        }
        Err(err) => {
            // A failing toolchain command decides our own exit code.
            if let Some(failure) = err.downcast_ref::<CommandFailure>() {
                std::process::exit(failure.exit_code());
            }
            Err(err)
        }
    }
}

//! Bounded-parallel execution of per-source pipelines.
//!
//! Compilation of distinct sources is independent, so pipelines run
//! concurrently up to the effective job count. Results flow back through
//! the shared accumulators in [`Shared`]; the orchestrator only sees the
//! drained outcome.

use std::collections::BTreeMap;
use std::sync::Mutex;

use color_eyre::Result;
use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, instrument};

use crate::command::CommandRunner;
use crate::config::{Config, Target};
use crate::pipeline::{self, Shared, SourceContext};
use crate::report::ReporterHandle;
use crate::store::HashStore;

/// The aggregate result of compiling every source of one target.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct CompileOutcome {
    /// Whether any source counted as modified.
    pub any_modified: bool,

    /// Object paths, completion order.
    pub obj_list: Vec<String>,

    /// Object paths with the `SRCBASE` prefix stripped, same order.
    pub obj_list_rel: Vec<String>,

    /// Digests observed during compilation, to merge into the store.
    pub new_hashes: BTreeMap<String, String>,
}

/// Resolve the worker count for a target.
///
/// The command-line override wins, then the target's `THREADS` cap, then
/// the host default. Remove mode is forced serial so undo steps run in a
/// deterministic order.
pub fn effective_jobs(override_jobs: Option<usize>, target: &Target, remove: bool) -> usize {
    if remove {
        return 1;
    }
    override_jobs
        .or(target.threads)
        .unwrap_or_else(num_cpus::get)
        .max(1)
}

/// Run the per-source pipeline for every source with bounded concurrency.
///
/// Progress iterations are submission indices: a renderer may observe them
/// out of order under parallelism. Any pipeline error aborts the stream;
/// in-flight subprocesses are left to finish on their own.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(sources = sources.len(), jobs))]
pub async fn compile_sources(
    runner: &CommandRunner,
    reporter: &ReporterHandle,
    target: &Target,
    config: &Config,
    store: &HashStore,
    sources: &[String],
    jobs: usize,
    remove: bool,
) -> Result<CompileOutcome> {
    let shared = Mutex::new(Shared::default());
    let ctx = SourceContext {
        runner,
        reporter,
        target,
        config,
        store,
        shared: &shared,
        remove,
        total: sources.len(),
    };

    let modified = stream::iter(sources.iter().enumerate())
        .map(|(index, src)| {
            let ctx = &ctx;
            async move { pipeline::build_source(ctx, src, index + 1).await }
        })
        .buffer_unordered(jobs.max(1))
        .try_collect::<Vec<_>>()
        .await?;

    let Shared {
        obj_list,
        obj_list_rel,
        new_hashes,
    } = shared.into_inner().expect("shared state lock");

    let any_modified = modified.iter().any(|modified| *modified);
    debug!(any_modified, objects = obj_list.len(), "pool drained");
    Ok(CompileOutcome {
        any_modified,
        obj_list,
        obj_list_rel,
        new_hashes,
    })
}

//! Execution of rule command strings.
//!
//! A rule is a compound command: steps separated by `;`, each step either a
//! built-in verb (prefixed with `@`) or an external command dispatched
//! through the platform shell. Built-in verbs cover the portable file
//! operations rules need without shelling out, and the reversible ones know
//! how to undo themselves so remove mode can restore a tree that a
//! `PRERULE` populated.
//!
//! The working directory is process-global and the `@cd` verb may move it
//! mid-rule; the runner records the directory on entry and restores it on
//! every exit path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use color_eyre::{
    Report, Result,
    eyre::{Context, bail},
};
use tracing::{instrument, trace};

use crate::report::{self, Event, ReporterHandle, Severity};

/// A failed external command.
///
/// Carried as a typed error so the binary can propagate the subprocess
/// exit code as its own.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum CommandFailure {
    /// The command exited with a non-zero code.
    Code { command: String, code: i32 },

    /// The command was terminated by a signal.
    Signal { command: String, signal: i32 },
}

impl CommandFailure {
    /// The exit code the driver should exit with.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Code { code, .. } => *code,
            Self::Signal { .. } => 1,
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code { command, code } => {
                write!(f, "command {command} returned error code {code}")
            }
            Self::Signal { command, signal } => {
                write!(f, "command {command} terminated by signal {signal}")
            }
        }
    }
}

impl std::error::Error for CommandFailure {}

/// Compile-progress context attached to a rule invocation.
#[derive(Clone, Debug)]
pub struct Progress {
    /// 1-based submission index.
    pub iteration: usize,
    pub total: usize,
    pub label: String,
}

/// Executes rule strings and reports what it runs.
#[derive(Clone)]
pub struct CommandRunner {
    reporter: ReporterHandle,
    /// Report step failures but keep going instead of aborting the build.
    debug: bool,
}

impl CommandRunner {
    pub fn new(reporter: ReporterHandle, debug: bool) -> Self {
        Self { reporter, debug }
    }

    /// Execute a compound rule string.
    ///
    /// Steps run sequentially. In undo mode the reversible verbs apply
    /// their reverse semantics and everything else is a no-op. The working
    /// directory observed at entry is restored before returning, success
    /// or not.
    #[instrument(name = "CommandRunner::run", skip(self, progress))]
    pub async fn run(&self, rule: &str, undo: bool, progress: Option<Progress>) -> Result<()> {
        if rule.trim().is_empty() {
            return Ok(());
        }
        if let Some(progress) = progress {
            self.reporter.emit(Event::Compile {
                iteration: progress.iteration,
                total: progress.total,
                name: progress.label,
            });
        }

        let saved = std::env::current_dir().context("read working directory")?;
        let result = self.run_steps(rule, undo).await;
        std::env::set_current_dir(&saved).context("restore working directory")?;
        result
    }

    async fn run_steps(&self, rule: &str, undo: bool) -> Result<()> {
        for step in rule.split(';') {
            let step = step.trim();
            if step.is_empty() {
                continue;
            }

            let result = match step.strip_prefix('@') {
                Some(builtin) => self
                    .run_builtin(builtin, undo)
                    .await
                    .with_context(|| format!("built-in step @{builtin}")),
                None if undo => {
                    // External commands have no inverse.
                    trace!(?step, "skipping external step in undo mode");
                    Ok(())
                }
                None => self.run_external(step).await,
            };

            match result {
                Ok(()) => {}
                Err(err) if self.debug => {
                    report::message(
                        &self.reporter,
                        Severity::Warn,
                        format!("continuing past failed step (debug mode): {err:#}"),
                    );
                }
                Err(err) => {
                    report::message(&self.reporter, Severity::Error, format!("{err:#}"));
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Run one external step through the platform shell.
    ///
    /// The step is tokenized with quote-preserving rules and rejoined with
    /// single spaces, so the shell sees a normalized command line.
    async fn run_external(&self, step: &str) -> Result<()> {
        let line = tokenize(step).join(" ");
        report::message(&self.reporter, Severity::Command, line.clone());
        self.shell_status(&line).await
    }

    /// Spawn `line` via the shell and classify its exit status.
    async fn shell_status(&self, line: &str) -> Result<()> {
        let command = line.split_whitespace().next().unwrap_or(line).to_string();

        let mut cmd = shell_command(line);
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        let status = cmd
            .status()
            .await
            .with_context(|| format!("could not spawn command {command}"))?;

        if let Some(code) = status.code() {
            if code != 0 {
                return Err(Report::new(CommandFailure::Code { command, code }));
            }
            return Ok(());
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Err(Report::new(CommandFailure::Signal { command, signal }));
            }
        }
        bail!("command {command} ended without an exit code");
    }

    async fn run_builtin(&self, builtin: &str, undo: bool) -> Result<()> {
        let tokens = builtin.split_whitespace().collect::<Vec<_>>();
        let Some((&verb, args)) = tokens.split_first() else {
            bail!("empty built-in step");
        };

        let severity = if undo { Severity::Undo } else { Severity::Command };
        report::message(&self.reporter, severity, format!("@{builtin}"));

        match verb {
            // Verbs that operate on a (possibly globbed) path pattern.
            "copy" | "move" | "rename" | "makedir" | "delete" | "echo" | "append" | "cat"
            | "cd" => {
                let Some((&pattern, rest)) = args.split_first() else {
                    bail!("{verb} requires a path");
                };
                for path in expand(pattern)? {
                    self.apply_file_verb(verb, &path, rest, undo)
                        .await
                        .with_context(|| format!("{verb} {}", path.display()))?;
                }
                Ok(())
            }

            // Verbs that wrap an external command. None has an inverse.
            "ok" if undo => Ok(()),
            "ok" => {
                let line = args.join(" ");
                report::message(&self.reporter, Severity::Command, line.clone());
                if let Err(err) = self.shell_status(&line).await {
                    report::message(
                        &self.reporter,
                        Severity::Warn,
                        format!("ignoring failure: {err:#}"),
                    );
                }
                Ok(())
            }
            "try" if undo => Ok(()),
            "try" => {
                let Some((&attempts, rest)) = args.split_first() else {
                    bail!("try requires an attempt count");
                };
                let attempts = attempts
                    .parse::<usize>()
                    .with_context(|| format!("invalid attempt count {attempts:?}"))?;
                let line = rest.join(" ");
                let mut last = None;
                for attempt in 1..=attempts {
                    report::message(&self.reporter, Severity::Command, line.clone());
                    match self.shell_status(&line).await {
                        Ok(()) => return Ok(()),
                        Err(err) => {
                            report::message(
                                &self.reporter,
                                Severity::Warn,
                                format!("attempt {attempt}/{attempts} failed: {err:#}"),
                            );
                            last = Some(err);
                        }
                    }
                }
                Err(last.expect("at least one attempt ran"))
            }
            "exists" if undo => Ok(()),
            "exists" => {
                let Some((&path, rest)) = args.split_first() else {
                    bail!("exists requires a path");
                };
                if Path::new(path).exists() {
                    let line = rest.join(" ");
                    report::message(&self.reporter, Severity::Command, line.clone());
                    if let Err(err) = self.shell_status(&line).await {
                        report::message(
                            &self.reporter,
                            Severity::Warn,
                            format!("ignoring failure: {err:#}"),
                        );
                    }
                }
                Ok(())
            }

            "python" if undo => Ok(()),
            "python" => bail!("the python verb is not supported; run an interpreter as an external step instead"),

            _ => bail!("unknown built-in verb {verb:?}"),
        }
    }

    /// Forward or reverse semantics for one expanded path.
    async fn apply_file_verb(
        &self,
        verb: &str,
        path: &Path,
        rest: &[&str],
        undo: bool,
    ) -> Result<()> {
        match (verb, undo) {
            ("copy", false) => {
                let dst = arg(rest, 0, "copy requires a destination")?;
                copy_into(path, Path::new(dst)).await
            }
            ("copy", true) => {
                let dst = arg(rest, 0, "copy requires a destination")?;
                let copied = Path::new(dst).join(file_name(path)?);
                remove_if_file(&copied).await
            }

            ("move", false) => {
                let dst = arg(rest, 0, "move requires a destination")?;
                copy_into(path, Path::new(dst)).await?;
                tokio::fs::remove_file(path)
                    .await
                    .with_context(|| format!("remove {}", path.display()))
            }
            ("move", true) => {
                let dst = arg(rest, 0, "move requires a destination")?;
                let mut moved = Path::new(dst).join(file_name(path)?);
                if !moved.is_file() {
                    // Tolerate hosts that decorated the moved artifact.
                    moved = decorated(&moved, ".exe");
                }
                let back = match path.parent() {
                    Some(parent) => parent.join(file_name(&moved)?),
                    None => PathBuf::from(file_name(&moved)?),
                };
                tokio::fs::copy(&moved, &back)
                    .await
                    .map(|_| ())
                    .with_context(|| format!("copy {} back", moved.display()))
            }

            ("rename", false) => {
                let to = arg(rest, 0, "rename requires a destination")?;
                tokio::fs::rename(path, to)
                    .await
                    .with_context(|| format!("rename to {to}"))
            }
            ("rename", true) => {
                let to = arg(rest, 0, "rename requires a destination")?;
                tokio::fs::rename(to, path)
                    .await
                    .with_context(|| format!("rename {to} back"))
            }

            ("makedir", false) => tokio::fs::create_dir_all(path)
                .await
                .with_context(|| format!("create directory {}", path.display())),
            ("makedir", true) => {
                if path.is_dir() {
                    tokio::fs::remove_dir_all(path)
                        .await
                        .with_context(|| format!("remove directory {}", path.display()))?;
                }
                Ok(())
            }

            ("delete", false) => {
                if path.is_dir() {
                    tokio::fs::remove_dir_all(path)
                        .await
                        .with_context(|| format!("remove directory {}", path.display()))
                } else if path.is_file() {
                    remove_if_file(path).await
                } else {
                    remove_if_file(&decorated(path, ".exe")).await
                }
            }
            ("delete", true) => Ok(()),

            ("echo", false) => {
                let contents = format!("{}\n", rest.join(" "));
                tokio::fs::write(path, contents)
                    .await
                    .with_context(|| format!("write {}", path.display()))
            }
            ("append", false) => {
                use tokio::io::AsyncWriteExt;
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .with_context(|| format!("open {} for append", path.display()))?;
                file.write_all(format!("{}\n", rest.join(" ")).as_bytes())
                    .await
                    .with_context(|| format!("append to {}", path.display()))
            }
            ("cat", false) => {
                let mut contents = Vec::new();
                for src in rest {
                    let mut chunk = tokio::fs::read(src)
                        .await
                        .with_context(|| format!("read {src}"))?;
                    contents.append(&mut chunk);
                }
                tokio::fs::write(path, contents)
                    .await
                    .with_context(|| format!("write {}", path.display()))
            }
            ("echo" | "append" | "cat", true) => remove_if_file(path).await,

            ("cd", false) => std::env::set_current_dir(path)
                .with_context(|| format!("change directory to {}", path.display())),
            ("cd", true) => Ok(()),

            _ => bail!("unknown built-in verb {verb:?}"),
        }
    }
}

/// Expand a path pattern: glob when it contains `*`, literal otherwise.
fn expand(pattern: &str) -> Result<Vec<PathBuf>> {
    if !pattern.contains('*') {
        return Ok(vec![PathBuf::from(pattern)]);
    }
    glob::glob(pattern)
        .with_context(|| format!("invalid pattern {pattern:?}"))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("expand pattern {pattern:?}"))
}

fn arg<'a>(rest: &[&'a str], index: usize, missing: &'static str) -> Result<&'a str> {
    rest.get(index).copied().ok_or_else(|| Report::msg(missing))
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| Report::msg(format!("path {} has no file name", path.display())))
}

/// `path` with `ext` appended to the file name.
fn decorated(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(ext);
    PathBuf::from(name)
}

/// Copy `src` into `dst`, which may be a directory.
async fn copy_into(src: &Path, dst: &Path) -> Result<()> {
    let dest = if dst.is_dir() {
        dst.join(file_name(src)?)
    } else {
        dst.to_path_buf()
    };
    tokio::fs::copy(src, &dest)
        .await
        .map(|_| ())
        .with_context(|| format!("copy {} to {}", src.display(), dest.display()))
}

async fn remove_if_file(path: &Path) -> Result<()> {
    if path.is_file() {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}

/// Split a step into tokens, preserving quotes.
///
/// Unlike POSIX splitting, quotes are retained in the output tokens: the
/// shell performs the actual quote removal later. `a "b c" d` becomes
/// `["a", "\"b c\"", "d"]`.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// A command ready to run `line` through the platform shell.
fn shell_command(line: &str) -> tokio::process::Command {
    #[cfg(windows)]
    {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.args(["/C", line]);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", line]);
        cmd
    }
}

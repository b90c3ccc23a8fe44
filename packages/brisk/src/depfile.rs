//! Parsing of compiler-emitted dependency files.
//!
//! Toolchains emit a makefile-like format, `object: input1 input2 ...`,
//! with backslash-newline continuations and host-specific path separators.
//! The engine only needs the flattened, ordered list: the head names the
//! object file, the tail is the set of inputs (the source itself plus every
//! header the compiler observed).

use color_eyre::{Result, eyre::bail};
use itertools::Itertools;
use tracing::trace;

/// The parsed contents of one dependency file.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct DepRecord {
    /// The object file named by the head token, as written by the
    /// toolchain (usually relative to the source directory).
    pub object: String,

    /// The input files, first occurrence order, duplicates dropped.
    pub inputs: Vec<String>,
}

impl DepRecord {
    /// Parse dependency file text.
    ///
    /// Backslashes are normalized to forward slashes (after removing
    /// line continuations), `": "` is normalized to a space before
    /// tokenizing, and a trailing `:` on the head token is stripped, so
    /// both `obj: a b` and `obj:\n a b` parse identically.
    pub fn parse(content: &str) -> Result<Self> {
        let content = content.replace("\\\r\n", " ").replace("\\\n", " ");
        let content = content.replace('\\', "/");
        let content = content.replace(": ", " ");

        let mut tokens = content.split_whitespace().unique();

        let Some(head) = tokens.next() else {
            bail!("dependency file is empty");
        };
        let object = String::from(head.strip_suffix(':').unwrap_or(head));
        let inputs = tokens.map(String::from).collect::<Vec<_>>();

        trace!(%object, inputs = inputs.len(), "parsed dependency file");
        Ok(Self { object, inputs })
    }

    /// Render back into single-line makefile form.
    pub fn render(&self) -> String {
        format!("{}: {}", self.object, self.inputs.iter().join(" "))
    }
}

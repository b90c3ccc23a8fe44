use brisk::report::{Event, Reporter, Severity};
use colored::Colorize as _;

/// Renders engine events on the terminal.
///
/// Quiet mode keeps warnings and errors only; verbose mode additionally
/// shows each command line as it runs.
pub struct ConsoleReporter {
    quiet: bool,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self { quiet, verbose }
    }
}

impl Reporter for ConsoleReporter {
    fn emit(&self, event: Event) {
        match event {
            Event::Compile {
                iteration,
                total,
                name,
            } => {
                if !self.quiet {
                    println!("[{iteration}/{total}] {name}");
                }
            }
            Event::Message { severity, text } => match severity {
                Severity::Info => {
                    if !self.quiet {
                        println!("{text}");
                    }
                }
                Severity::Command => {
                    if self.verbose && !self.quiet {
                        println!("{}", text.cyan());
                    }
                }
                Severity::Undo => {
                    if !self.quiet {
                        println!("{}", text.magenta());
                    }
                }
                Severity::Remove => {
                    if !self.quiet {
                        println!("{}", text.yellow());
                    }
                }
                Severity::Warn => eprintln!("{}", text.yellow().bold()),
                Severity::Error => eprintln!("{}", text.red().bold()),
            },
        }
    }
}

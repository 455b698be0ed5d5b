//! Delegation of linting to an external command (eslint, stylelint, ...).

use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::error::PipelineError;

/// Result of linting one file
#[derive(Debug, PartialEq, Eq)]
pub enum LintStatus {
    /// No linter configured, or the linter is unavailable
    Skipped,
    Passed,
    /// Lint failed but the failure is not fatal
    Warned(String),
}

/// A configured lint command. The file path is appended to `argv`.
#[derive(Debug)]
pub struct Linter {
    argv: Vec<String>,
    strict: bool,
    /// Set once the executable turned out to be missing
    unavailable: AtomicBool,
}

impl Linter {
    /// None when no command is configured
    pub fn new(argv: Option<&[String]>, strict: bool) -> Option<Self> {
        let argv = argv?.to_vec();
        if argv.is_empty() {
            return None;
        }
        Some(Self {
            argv,
            strict,
            unavailable: AtomicBool::new(false),
        })
    }

    /// Lint `file` from `cwd`. A strict linter turns failures into errors.
    pub fn check(&self, file: &Path, cwd: &Path) -> Result<LintStatus, PipelineError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Ok(LintStatus::Skipped);
        }

        let (program, args) = match self.argv.split_first() {
            Some(split) => split,
            None => return Ok(LintStatus::Skipped),
        };

        debug!(linter = %program, file = %file.display(), "linting");

        let output = match Command::new(program)
            .args(args)
            .arg(file)
            .current_dir(cwd)
            .output()
        {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Warn only for the first file
                if !self.unavailable.swap(true, Ordering::Relaxed) {
                    warn!(linter = %program, "lint command not found, skipping lint");
                }
                return Ok(LintStatus::Skipped);
            }
            Err(e) => return Err(PipelineError::Io(e)),
        };

        if output.status.success() {
            return Ok(LintStatus::Passed);
        }

        let mut report = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !report.is_empty() {
                report.push('\n');
            }
            report.push_str(stderr.trim());
        }

        if self.strict {
            Err(PipelineError::LintFailed {
                path: file.to_path_buf(),
                code: output.status.code().unwrap_or(-1),
                output: report,
            })
        } else {
            warn!(file = %file.display(), "lint problems:\n{report}");
            Ok(LintStatus::Warned(report))
        }
    }
}

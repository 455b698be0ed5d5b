//! Asset types and the per-file handlers that move them from the source
//! tree into the theme build tree.

use globset::GlobSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{AssetSection, Config};
use crate::copier::{
    build_globset, collect_sources, copy_file, remove_output, should_exclude_file,
    write_if_changed, WriteOutcome,
};
use crate::css;
use crate::error::PipelineError;
use crate::icons::{parse_icon, render_sprite, symbol_id};
use crate::images;
use crate::lint::{LintStatus, Linter};
use crate::paths::{join_path, ProjectPaths};
use crate::theme_json;

/// Asset type handled by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Copy,
    Css,
    Js,
    Fonts,
    Icons,
    Images,
    Templates,
    Theme,
}

impl AssetKind {
    /// Order of a full build; stylesheets and scripts last so their lint
    /// output ends the log.
    pub const BUILD_ORDER: [AssetKind; 8] = [
        AssetKind::Copy,
        AssetKind::Fonts,
        AssetKind::Images,
        AssetKind::Icons,
        AssetKind::Templates,
        AssetKind::Theme,
        AssetKind::Css,
        AssetKind::Js,
    ];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Copy => "copy",
            AssetKind::Css => "css",
            AssetKind::Js => "js",
            AssetKind::Fonts => "fonts",
            AssetKind::Icons => "icons",
            AssetKind::Images => "images",
            AssetKind::Templates => "templates",
            AssetKind::Theme => "theme",
        }
    }

    /// Kinds whose output aggregates every source file
    #[inline]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, AssetKind::Icons)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source folder of one kind, its patterns, and where output goes
#[derive(Debug, Clone)]
pub struct AssetTarget {
    pub kind: AssetKind,
    pub src_dir: PathBuf,
    pub build_dir: PathBuf,
    globs: GlobSet,
}

impl AssetTarget {
    fn new(
        kind: AssetKind,
        paths: &ProjectPaths,
        section: &AssetSection,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            kind,
            src_dir: paths.src_path(&join_path(paths.src(), &section.src)),
            build_dir: paths.theme_build_path(&section.build),
            globs: build_globset(&section.patterns)?,
        })
    }

    /// Whether `path` is a source file of this target
    pub fn matches(&self, path: &Path, include_dev: bool) -> bool {
        match path.strip_prefix(&self.src_dir) {
            Ok(relative) => {
                !relative.as_os_str().is_empty()
                    && !should_exclude_file(relative, include_dev)
                    && self.globs.is_match(relative)
            }
            Err(_) => false,
        }
    }

    /// Matching source files, sorted
    pub fn sources(&self, include_dev: bool) -> Vec<PathBuf> {
        collect_sources(&self.src_dir, &self.globs, include_dev)
    }

    /// Build path of a source file, keeping its position below the folder
    pub fn output_for(&self, src: &Path) -> Option<PathBuf> {
        src.strip_prefix(&self.src_dir)
            .ok()
            .map(|relative| self.build_dir.join(relative))
    }
}

/// Outcome for one source (or aggregate) file
#[derive(Debug)]
pub enum FileStatus {
    Written(u64),
    Unchanged,
    /// Not emitted (partials)
    Skipped,
    Removed,
    Failed(PipelineError),
}

#[derive(Debug)]
pub struct FileResult {
    pub kind: AssetKind,
    pub source: PathBuf,
    pub output: Option<PathBuf>,
    pub status: FileStatus,
}

impl FileResult {
    fn from_write(
        kind: AssetKind,
        source: &Path,
        output: PathBuf,
        result: Result<WriteOutcome, PipelineError>,
    ) -> Self {
        let status = match result {
            Ok(WriteOutcome::Written(bytes)) => FileStatus::Written(bytes),
            Ok(WriteOutcome::Unchanged) => FileStatus::Unchanged,
            Err(e) => FileStatus::Failed(e),
        };
        Self {
            kind,
            source: source.to_path_buf(),
            output: Some(output),
            status,
        }
    }

    fn failed(kind: AssetKind, source: &Path, error: PipelineError) -> Self {
        Self {
            kind,
            source: source.to_path_buf(),
            output: None,
            status: FileStatus::Failed(error),
        }
    }

    /// Output that changed on disk (written or removed)
    pub fn changed_output(&self) -> Option<&Path> {
        match self.status {
            FileStatus::Written(_) | FileStatus::Removed => self.output.as_deref(),
            _ => None,
        }
    }
}

/// Runs the per-kind transforms with the project's configuration
#[derive(Debug)]
pub struct Processor {
    config: Config,
    paths: ProjectPaths,
    css_lint: Option<Linter>,
    js_lint: Option<Linter>,
}

impl Processor {
    pub fn new(config: Config) -> Self {
        let paths = config.paths();
        let css_lint = Linter::new(config.project.css.lint.as_deref(), config.project.css.lint_strict);
        let js_lint = Linter::new(config.project.js.lint.as_deref(), config.project.js.lint_strict);
        Self {
            config,
            paths,
            css_lint,
            js_lint,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    /// Source folders of `kind`; copy yields one per rule
    pub fn targets(&self, kind: AssetKind) -> Result<Vec<AssetTarget>, PipelineError> {
        let project = &self.config.project;
        let section = match kind {
            AssetKind::Copy => {
                return project
                    .copy
                    .iter()
                    .map(|rule| {
                        let section = AssetSection {
                            src: rule.src.clone(),
                            build: rule.build.clone(),
                            patterns: rule.patterns.clone(),
                        };
                        AssetTarget::new(kind, &self.paths, &section)
                    })
                    .collect();
            }
            AssetKind::Css => project.css.section(),
            AssetKind::Js => project.js.section(),
            AssetKind::Fonts => project.fonts.section(),
            AssetKind::Icons => project.icons.section(),
            AssetKind::Images => project.images.section(),
            AssetKind::Templates => project.templates.section(),
            AssetKind::Theme => project.theme.section(),
        };
        Ok(vec![AssetTarget::new(kind, &self.paths, &section)?])
    }

    /// Every target of every kind
    pub fn all_targets(&self) -> Result<Vec<AssetTarget>, PipelineError> {
        let mut all = Vec::new();
        for kind in AssetKind::BUILD_ORDER {
            all.extend(self.targets(kind)?);
        }
        Ok(all)
    }

    /// Path of the icon sprite for an icons target
    pub fn sprite_path(&self, target: &AssetTarget) -> PathBuf {
        target.build_dir.join(&self.config.project.icons.sprite)
    }

    /// Transform one source file into the build tree
    pub fn process_file(&self, target: &AssetTarget, src: &Path) -> FileResult {
        let kind = target.kind;
        let Some(output) = target.output_for(src) else {
            return FileResult::failed(
                kind,
                src,
                PipelineError::ReadFailed {
                    path: src.to_path_buf(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "file is outside its source folder",
                    ),
                },
            );
        };

        debug!(kind = %kind, file = %src.display(), "processing");

        match kind {
            AssetKind::Copy | AssetKind::Fonts | AssetKind::Templates => {
                let result = copy_file(src, &output);
                FileResult::from_write(kind, src, output, result)
            }
            AssetKind::Js => {
                if let Err(e) = self.lint(self.js_lint.as_ref(), src) {
                    return FileResult::failed(kind, src, e);
                }
                let result = copy_file(src, &output);
                FileResult::from_write(kind, src, output, result)
            }
            AssetKind::Css => {
                if css::is_partial(src) {
                    return FileResult {
                        kind,
                        source: src.to_path_buf(),
                        output: None,
                        status: FileStatus::Skipped,
                    };
                }
                if let Err(e) = self.lint(self.css_lint.as_ref(), src) {
                    return FileResult::failed(kind, src, e);
                }
                let result = css::transform(src, self.config.project.css.minify)
                    .and_then(|code| write_if_changed(&output, code.as_bytes()));
                FileResult::from_write(kind, src, output, result)
            }
            AssetKind::Images => {
                let opts = &self.config.project.images;
                let result = read_source(src)
                    .and_then(|data| {
                        if opts.optimize {
                            images::optimize(src, &data, opts.level)
                        } else {
                            Ok(data)
                        }
                    })
                    .and_then(|data| write_if_changed(&output, &data));
                FileResult::from_write(kind, src, output, result)
            }
            AssetKind::Theme => {
                let result = read_source(src)
                    .and_then(|data| theme_json::process(src, &data))
                    .and_then(|text| write_if_changed(&output, text.as_bytes()));
                FileResult::from_write(kind, src, output, result)
            }
            AssetKind::Icons => self.build_sprite(target),
        }
    }

    /// Combine every icon of `target` into its sprite file
    pub fn build_sprite(&self, target: &AssetTarget) -> FileResult {
        let kind = target.kind;
        let sprite = self.sprite_path(target);
        let prefix = &self.config.project.icons.prefix;

        let mut icons = Vec::new();
        for src in target.sources(self.config.include_dev) {
            let relative = src.strip_prefix(&target.src_dir).unwrap_or(&src);
            let id = symbol_id(prefix, relative);
            let parsed = fs::read_to_string(&src)
                .map_err(|e| PipelineError::ReadFailed {
                    path: src.clone(),
                    source: e,
                })
                .and_then(|text| parse_icon(&src, id, &text));
            match parsed {
                Ok(icon) => icons.push(icon),
                Err(e) => return FileResult::failed(kind, &src, e),
            }
        }

        if icons.is_empty() {
            // No icons left: drop a stale sprite
            let status = match remove_output(&sprite, &self.paths.theme_build_dir()) {
                Ok(true) => FileStatus::Removed,
                Ok(false) => FileStatus::Skipped,
                Err(e) => FileStatus::Failed(e),
            };
            return FileResult {
                kind,
                source: target.src_dir.clone(),
                output: Some(sprite),
                status,
            };
        }

        let result = write_if_changed(&sprite, render_sprite(icons).as_bytes());
        FileResult::from_write(kind, &target.src_dir, sprite, result)
    }

    /// Handle a deleted source file: drop its build output, or rebuild the
    /// aggregate it belonged to.
    pub fn remove_file(&self, target: &AssetTarget, src: &Path) -> FileResult {
        let kind = target.kind;
        if kind.is_aggregate() {
            return self.build_sprite(target);
        }

        let output = target.output_for(src);
        let status = match &output {
            Some(out) if !(kind == AssetKind::Css && css::is_partial(src)) => {
                match remove_output(out, &self.paths.theme_build_dir()) {
                    Ok(true) => FileStatus::Removed,
                    Ok(false) => FileStatus::Skipped,
                    Err(e) => FileStatus::Failed(e),
                }
            }
            _ => FileStatus::Skipped,
        };

        FileResult {
            kind,
            source: src.to_path_buf(),
            output,
            status,
        }
    }

    fn lint(&self, linter: Option<&Linter>, src: &Path) -> Result<(), PipelineError> {
        let Some(linter) = linter else {
            return Ok(());
        };
        match linter.check(src, self.paths.root())? {
            LintStatus::Warned(_) => {
                warn!(file = %src.display(), "continuing despite lint problems");
            }
            LintStatus::Passed | LintStatus::Skipped => {}
        }
        Ok(())
    }
}

fn read_source(src: &Path) -> Result<Vec<u8>, PipelineError> {
    fs::read(src).map_err(|e| PipelineError::ReadFailed {
        path: src.to_path_buf(),
        source: e,
    })
}

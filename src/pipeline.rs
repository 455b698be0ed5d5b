//! Build orchestration.
//!
//! Runs asset kinds in build order; the files of one kind are processed in
//! parallel with Rayon and counted in cache-aligned atomic counters.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::assets::{AssetKind, AssetTarget, FileResult, FileStatus, Processor};
use crate::config::CONFIG_FILE;
use crate::copier::clean_directory;
use crate::error::PipelineError;

/// Cache-line aligned atomic counter to prevent false sharing
/// Each counter is on its own 64-byte cache line
#[repr(align(64))]
pub struct CacheAlignedAtomic(pub AtomicU64);

impl CacheAlignedAtomic {
    pub const fn new(val: u64) -> Self {
        Self(AtomicU64::new(val))
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }
}

/// Counters shared by all workers of a run
pub struct PipelineStats {
    pub files_written: CacheAlignedAtomic,
    pub files_unchanged: CacheAlignedAtomic,
    pub files_removed: CacheAlignedAtomic,
    pub bytes_written: CacheAlignedAtomic,
    pub errors: CacheAlignedAtomic,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            files_written: CacheAlignedAtomic::new(0),
            files_unchanged: CacheAlignedAtomic::new(0),
            files_removed: CacheAlignedAtomic::new(0),
            bytes_written: CacheAlignedAtomic::new(0),
            errors: CacheAlignedAtomic::new(0),
        }
    }

    pub fn record(&self, result: &FileResult) {
        match &result.status {
            FileStatus::Written(bytes) => {
                self.files_written.add(1);
                self.bytes_written.add(*bytes);
            }
            FileStatus::Unchanged => self.files_unchanged.add(1),
            FileStatus::Removed => self.files_removed.add(1),
            FileStatus::Failed(_) => self.errors.add(1),
            FileStatus::Skipped => {}
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of running one asset kind
#[derive(Debug)]
pub struct TaskResult {
    pub kind: AssetKind,
    pub files: Vec<FileResult>,
    pub duration: Duration,
    /// Stopped early by Ctrl+C
    pub cancelled: bool,
}

impl TaskResult {
    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, &PipelineError)> {
        self.files.iter().filter_map(|f| match &f.status {
            FileStatus::Failed(e) => Some((&f.source, e)),
            _ => None,
        })
    }

    pub fn count(&self, pred: fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.status)).count()
    }
}

/// Progress bar shown in verbose mode
pub fn progress_bar(len: u64, verbose: bool, message: &str) -> Option<ProgressBar> {
    if !verbose {
        return None;
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:>10} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    Some(pb)
}

/// Process every source of `kind`
pub fn run_kind(
    processor: &Processor,
    kind: AssetKind,
    shutdown: &AtomicBool,
    stats: &PipelineStats,
) -> Result<TaskResult, PipelineError> {
    let start = Instant::now();
    let targets = processor.targets(kind)?;
    let include_dev = processor.config().include_dev;

    if kind.is_aggregate() {
        let mut files = Vec::with_capacity(targets.len());
        for target in &targets {
            if shutdown.load(Ordering::Relaxed) {
                return Ok(TaskResult {
                    kind,
                    files,
                    duration: start.elapsed(),
                    cancelled: true,
                });
            }
            let result = processor.build_sprite(target);
            stats.record(&result);
            files.push(result);
        }
        return Ok(TaskResult {
            kind,
            files,
            duration: start.elapsed(),
            cancelled: false,
        });
    }

    let jobs: Vec<(&AssetTarget, PathBuf)> = targets
        .iter()
        .flat_map(|target| {
            target
                .sources(include_dev)
                .into_iter()
                .map(move |src| (target, src))
        })
        .collect();

    debug!(kind = %kind, files = jobs.len(), "collected sources");
    let progress = progress_bar(jobs.len() as u64, processor.config().verbose, kind.as_str());

    let files: Vec<FileResult> = jobs
        .par_iter()
        .filter_map(|(target, src)| {
            if shutdown.load(Ordering::Relaxed) {
                return None;
            }
            let result = processor.process_file(target, src);
            stats.record(&result);
            if let Some(ref pb) = progress {
                pb.inc(1);
            }
            Some(result)
        })
        .collect();

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let cancelled = shutdown.load(Ordering::Relaxed) && files.len() < jobs.len();
    Ok(TaskResult {
        kind,
        files,
        duration: start.elapsed(),
        cancelled,
    })
}

/// Run `kinds` in order, one result slot per kind. A kind that cannot start
/// (bad pattern) is returned as an error in its slot; later kinds still run.
/// Kinds not started because of a shutdown are `Cancelled`.
pub fn run_kinds(
    processor: &Processor,
    kinds: &[AssetKind],
    shutdown: &AtomicBool,
    stats: &PipelineStats,
) -> Vec<Result<TaskResult, PipelineError>> {
    let mut results = Vec::with_capacity(kinds.len());
    for kind in kinds {
        if shutdown.load(Ordering::Relaxed) {
            debug!(kind = %kind, "skipped after shutdown");
            results.push(Err(PipelineError::Cancelled));
            continue;
        }
        let result = run_kind(processor, *kind, shutdown, stats);
        if let Ok(task) = &result {
            info!(
                kind = %kind,
                written = task.count(|s| matches!(s, FileStatus::Written(_))),
                unchanged = task.count(|s| matches!(s, FileStatus::Unchanged)),
                failed = task.count(|s| matches!(s, FileStatus::Failed(_))),
                "{kind} done in {:.2}s",
                task.duration.as_secs_f64()
            );
        }
        results.push(result);
    }
    results
}

/// The theme build folder, if it is safe to empty: it must lie inside the
/// project, and be neither the project root nor an ancestor of the sources.
fn cleanable_build_dir(processor: &Processor) -> Result<PathBuf, PipelineError> {
    let paths = processor.paths();
    let dir = paths.theme_build_dir();
    let escapes = paths.theme_build().split('/').any(|s| s == "..");

    if escapes || dir == paths.root() || paths.src_dir().starts_with(&dir) {
        let config = processor
            .config()
            .config_file
            .clone()
            .unwrap_or_else(|| paths.root().join(CONFIG_FILE));
        return Err(PipelineError::Config {
            path: config,
            message: format!(
                "refusing to clean {}: the build folder must be a separate folder \
                 inside the project",
                dir.display()
            ),
        });
    }
    Ok(dir)
}

/// Full build in build order, optionally emptying the theme build folder
pub fn build_all(
    processor: &Processor,
    clean: bool,
    shutdown: &AtomicBool,
    stats: &PipelineStats,
) -> Result<Vec<Result<TaskResult, PipelineError>>, PipelineError> {
    if clean {
        let dir = cleanable_build_dir(processor)?;
        info!(dir = %dir.display(), "cleaning build folder");
        clean_directory(&dir)?;
    }
    Ok(run_kinds(processor, &AssetKind::BUILD_ORDER, shutdown, stats))
}

/// Aggregate task results: (has_success, has_failure, cancelled)
pub fn collect_results(results: &[Result<TaskResult, PipelineError>]) -> (bool, bool, bool) {
    let mut has_success = false;
    let mut has_failure = false;
    let mut cancelled = false;

    for result in results {
        match result {
            Ok(task) => {
                cancelled |= task.cancelled;
                for file in &task.files {
                    match file.status {
                        FileStatus::Failed(_) => has_failure = true,
                        _ => has_success = true,
                    }
                }
            }
            Err(PipelineError::Cancelled) => cancelled = true,
            Err(_) => has_failure = true,
        }
    }

    (has_success, has_failure, cancelled)
}

/// Process exit code for a run: 0 clean, 1 partial failure, 2 total failure,
/// 130 cancelled
pub fn exit_code(has_success: bool, has_failure: bool, cancelled: bool) -> u8 {
    if cancelled {
        130
    } else if has_failure && !has_success {
        2
    } else if has_failure {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ProjectConfig};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn failure() -> PipelineError {
        PipelineError::Css {
            path: PathBuf::from("x.css"),
            message: "unexpected token".into(),
        }
    }

    fn project(root: &Path) -> Processor {
        Processor::new(Config::for_root(root, ProjectConfig::default()))
    }

    // ==================== CacheAlignedAtomic tests ====================

    #[test]
    fn test_cache_aligned_atomic_alignment() {
        assert_eq!(std::mem::align_of::<CacheAlignedAtomic>(), 64);
    }

    #[test]
    fn test_cache_aligned_atomic_add() {
        let atomic = CacheAlignedAtomic::new(10);
        atomic.add(5);
        assert_eq!(atomic.get(), 15);
    }

    // ==================== PipelineStats tests ====================

    #[test]
    fn test_stats_record() {
        let stats = PipelineStats::default();
        let make = |status| FileResult {
            kind: AssetKind::Fonts,
            source: PathBuf::from("a"),
            output: None,
            status,
        };
        stats.record(&make(FileStatus::Written(100)));
        stats.record(&make(FileStatus::Unchanged));
        stats.record(&make(FileStatus::Removed));
        stats.record(&make(FileStatus::Skipped));
        stats.record(&make(FileStatus::Failed(failure())));

        assert_eq!(stats.files_written.get(), 1);
        assert_eq!(stats.bytes_written.get(), 100);
        assert_eq!(stats.files_unchanged.get(), 1);
        assert_eq!(stats.files_removed.get(), 1);
        assert_eq!(stats.errors.get(), 1);
    }

    // ==================== run_kind tests ====================

    #[test]
    fn test_run_kind_processes_all_sources() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("src/fonts/a.woff"), "a");
        write(&temp.path().join("src/fonts/sub/b.ttf"), "bb");
        write(&temp.path().join("src/fonts/readme.txt"), "skip");
        let p = project(temp.path());
        let stats = PipelineStats::new();
        let shutdown = AtomicBool::new(false);

        let task = run_kind(&p, AssetKind::Fonts, &shutdown, &stats).unwrap();

        assert_eq!(task.files.len(), 2);
        assert!(!task.cancelled);
        assert_eq!(stats.files_written.get(), 2);
        assert_eq!(stats.bytes_written.get(), 3);
        assert!(temp.path().join("build/fonts/sub/b.ttf").exists());
        assert!(!temp.path().join("build/fonts/readme.txt").exists());
    }

    #[test]
    fn test_run_kind_cancelled() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("src/js/a.js"), "a");
        let p = project(temp.path());
        let shutdown = AtomicBool::new(true);

        let task = run_kind(&p, AssetKind::Js, &shutdown, &PipelineStats::new()).unwrap();

        assert!(task.cancelled);
        assert!(task.files.is_empty());
    }

    #[test]
    fn test_run_kinds_after_shutdown_fills_every_slot() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("src/js/a.js"), "a");
        let p = project(temp.path());
        let kinds = [AssetKind::Js, AssetKind::Fonts];

        let results = run_kinds(&p, &kinds, &AtomicBool::new(true), &PipelineStats::new());

        assert_eq!(results.len(), kinds.len());
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(PipelineError::Cancelled))));
        assert_eq!(exit_code_of(&results), 130);
        assert!(!temp.path().join("build/js/a.js").exists());
    }

    fn exit_code_of(results: &[Result<TaskResult, PipelineError>]) -> u8 {
        let (ok, failed, cancelled) = collect_results(results);
        exit_code(ok, failed, cancelled)
    }

    #[test]
    fn test_run_kind_missing_source_folder() {
        let temp = TempDir::new().unwrap();
        let p = project(temp.path());
        let task = run_kind(&p, AssetKind::Templates, &AtomicBool::new(false), &PipelineStats::new())
            .unwrap();
        assert!(task.files.is_empty());
        assert!(!task.cancelled);
    }

    // ==================== build_all tests ====================

    #[test]
    fn test_build_all_with_clean() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("src/templates/index.html"), "<p>");
        write(&temp.path().join("src/theme/settings.json"), "{}");
        write(&temp.path().join("build/stale.txt"), "old");
        let p = project(temp.path());
        let stats = PipelineStats::new();

        let results = build_all(&p, true, &AtomicBool::new(false), &stats).unwrap();

        assert_eq!(results.len(), AssetKind::BUILD_ORDER.len());
        assert!(!temp.path().join("build/stale.txt").exists());
        assert!(temp.path().join("build/templates/index.html").exists());
        assert_eq!(
            fs::read_to_string(temp.path().join("build/settings.json")).unwrap(),
            "{}\n"
        );
        let (ok, failed, cancelled) = collect_results(&results);
        assert!(ok && !failed && !cancelled);
    }

    fn project_with(root: &Path, build: &str, theme: &str, src: &str) -> Processor {
        let mut config = ProjectConfig::default();
        config.paths.build = build.to_string();
        config.paths.theme = theme.to_string();
        config.paths.src = src.to_string();
        Processor::new(Config::for_root(root, config))
    }

    #[test]
    fn test_build_all_clean_refuses_project_root() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("src/templates/index.html"), "<p>");
        write(&temp.path().join(CONFIG_FILE), "[paths]\nbuild = \".\"\n");

        for build in [".", ""] {
            let p = project_with(temp.path(), build, "", "src");
            let err = build_all(&p, true, &AtomicBool::new(false), &PipelineStats::new())
                .unwrap_err();
            assert!(
                matches!(err, PipelineError::Config { ref path, .. } if path.ends_with(CONFIG_FILE))
            );
        }

        assert!(temp.path().join("src/templates/index.html").exists());
        assert!(temp.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_build_all_clean_refuses_source_folder() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("assets/src/js/app.js"), "a");

        // Build folder equal to, then containing, the source folder
        for (build, theme) in [("assets/src", ""), ("assets", "")] {
            let p = project_with(temp.path(), build, theme, "assets/src");
            assert!(build_all(&p, true, &AtomicBool::new(false), &PipelineStats::new()).is_err());
        }
        let p = project_with(temp.path(), "..", "", "assets/src");
        assert!(build_all(&p, true, &AtomicBool::new(false), &PipelineStats::new()).is_err());

        assert!(temp.path().join("assets/src/js/app.js").exists());
    }

    #[test]
    fn test_build_all_without_clean_allows_root_build() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("src/templates/index.html"), "<p>");
        let p = project_with(temp.path(), ".", "", "src");

        let results = build_all(&p, false, &AtomicBool::new(false), &PipelineStats::new()).unwrap();

        assert_eq!(results.len(), AssetKind::BUILD_ORDER.len());
        assert!(temp.path().join("src/templates/index.html").exists());
    }

    // ==================== collect_results / exit_code tests ====================

    fn task(statuses: Vec<FileStatus>) -> Result<TaskResult, PipelineError> {
        Ok(TaskResult {
            kind: AssetKind::Css,
            files: statuses
                .into_iter()
                .map(|status| FileResult {
                    kind: AssetKind::Css,
                    source: PathBuf::from("x.css"),
                    output: None,
                    status,
                })
                .collect(),
            duration: Duration::from_millis(1),
            cancelled: false,
        })
    }

    #[test]
    fn test_collect_results_mixed() {
        let results = vec![
            task(vec![FileStatus::Written(1)]),
            task(vec![FileStatus::Failed(failure())]),
        ];
        assert_eq!(collect_results(&results), (true, true, false));
    }

    #[test]
    fn test_collect_results_kind_error_is_failure() {
        let results = vec![Err(failure())];
        assert_eq!(collect_results(&results), (false, true, false));
    }

    #[test]
    fn test_collect_results_skipped_kind_is_cancelled() {
        let results = vec![task(vec![FileStatus::Written(1)]), Err(PipelineError::Cancelled)];
        assert_eq!(collect_results(&results), (true, false, true));
    }

    #[test]
    fn test_collect_results_empty() {
        assert_eq!(collect_results(&[]), (false, false, false));
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(true, false, false), 0);
        assert_eq!(exit_code(false, false, false), 0);
        assert_eq!(exit_code(true, true, false), 1);
        assert_eq!(exit_code(false, true, false), 2);
        assert_eq!(exit_code(true, true, true), 130);
    }

    #[test]
    fn test_task_failures() {
        let t = task(vec![
            FileStatus::Unchanged,
            FileStatus::Failed(failure()),
        ])
        .unwrap();
        assert_eq!(t.failures().count(), 1);
        assert_eq!(t.count(|s| matches!(s, FileStatus::Unchanged)), 1);
    }
}

//! Watch loop: rebuild only what changed in the source folder.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecursiveMode};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::assets::{AssetKind, AssetTarget, FileResult, FileStatus, Processor};
use crate::css;
use crate::error::PipelineError;
use crate::ftp::{Connector, FtpClient};
use crate::pipeline::{run_kind, PipelineStats};

/// What happened to a source path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Written,
    Removed,
}

/// Source paths touched by one notify event
pub fn classify_event(event: &Event) -> Vec<(PathBuf, Change)> {
    match &event.kind {
        EventKind::Access(_) | EventKind::Other => Vec::new(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| (p.clone(), Change::Removed))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            (event.paths[0].clone(), Change::Removed),
            (event.paths[1].clone(), Change::Written),
        ],
        // Renames in one direction and platform-specific kinds: trust the disk
        _ => event
            .paths
            .iter()
            .map(|p| {
                let change = if p.exists() {
                    Change::Written
                } else {
                    Change::Removed
                };
                (p.clone(), change)
            })
            .collect(),
    }
}

/// A directory that appears brings its files along without own events
fn expand(changes: &BTreeMap<PathBuf, Change>) -> Vec<(PathBuf, Change)> {
    let mut out = Vec::with_capacity(changes.len());
    for (path, change) in changes {
        if *change == Change::Written && path.is_dir() {
            out.extend(
                WalkDir::new(path)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .map(|e| (e.into_path(), Change::Written)),
            );
        } else {
            out.push((path.clone(), *change));
        }
    }
    out
}

/// Incremental rebuilds for a watched project
pub struct WatchLoop<'a, C: Connector> {
    processor: &'a Processor,
    targets: Vec<AssetTarget>,
    uploader: Option<&'a FtpClient<C>>,
    stats: &'a PipelineStats,
}

impl<'a, C: Connector> WatchLoop<'a, C> {
    pub fn new(
        processor: &'a Processor,
        uploader: Option<&'a FtpClient<C>>,
        stats: &'a PipelineStats,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            processor,
            targets: processor.all_targets()?,
            uploader,
            stats,
        })
    }

    /// Process a debounced batch of changes. Each path goes to every target
    /// it matches; sprites and partial-dependent stylesheets are rebuilt once
    /// per batch.
    pub fn apply(
        &self,
        changes: &BTreeMap<PathBuf, Change>,
        shutdown: &AtomicBool,
    ) -> Vec<FileResult> {
        let include_dev = self.processor.config().include_dev;
        let mut results = Vec::new();
        let mut sprites: Vec<&AssetTarget> = Vec::new();
        let mut rebuild_css = false;

        for (path, change) in expand(changes) {
            for target in &self.targets {
                if target.kind.is_aggregate() {
                    let affected = match change {
                        Change::Written => target.matches(&path, include_dev),
                        Change::Removed => path.starts_with(&target.src_dir),
                    };
                    if affected && !sprites.iter().any(|t| std::ptr::eq(*t, target)) {
                        sprites.push(target);
                    }
                    continue;
                }

                if !target.matches(&path, include_dev) {
                    continue;
                }
                if target.kind == AssetKind::Css && css::is_partial(&path) {
                    rebuild_css = true;
                    continue;
                }

                let result = match change {
                    Change::Written => self.processor.process_file(target, &path),
                    Change::Removed => {
                        // Removed source directories leave their build folder alone
                        if target.output_for(&path).is_some_and(|out| out.is_dir()) {
                            debug!(path = %path.display(), "ignoring removed directory");
                            continue;
                        }
                        self.processor.remove_file(target, &path)
                    }
                };
                self.stats.record(&result);
                results.push(result);
            }
        }

        for target in sprites {
            let result = self.processor.build_sprite(target);
            self.stats.record(&result);
            results.push(result);
        }

        if rebuild_css {
            info!("stylesheet partial changed, rebuilding all stylesheets");
            match run_kind(self.processor, AssetKind::Css, shutdown, self.stats) {
                Ok(task) => results.extend(task.files),
                Err(e) => error!("{e}"),
            }
        }

        results
    }

    fn report(&self, results: &[FileResult]) {
        let root = self.processor.paths();
        for result in results {
            let shown = result
                .output
                .as_deref()
                .and_then(|p| root.relative_to_root(p))
                .unwrap_or_else(|| result.source.display().to_string());
            match &result.status {
                FileStatus::Written(bytes) => info!(kind = %result.kind, bytes, "wrote {shown}"),
                FileStatus::Removed => info!(kind = %result.kind, "removed {shown}"),
                FileStatus::Failed(e) => error!(kind = %result.kind, "{e}"),
                FileStatus::Unchanged | FileStatus::Skipped => {
                    debug!(kind = %result.kind, "{shown} unchanged")
                }
            }
        }
    }

    /// Upload written outputs and delete removed ones remotely
    fn mirror(&self, results: &[FileResult]) {
        let Some(client) = self.uploader else {
            return;
        };

        let mut written = Vec::new();
        let mut removed = Vec::new();
        for result in results {
            match (&result.status, &result.output) {
                (FileStatus::Written(_), Some(out)) => written.push(out.clone()),
                (FileStatus::Removed, Some(out)) => removed.push(out.clone()),
                _ => {}
            }
        }

        if let Err(e) = client.sync(&written, &removed) {
            error!("upload failed: {e}");
        }
    }

    /// Watch the source folder until `shutdown` is set
    pub fn run(&self, poll: bool, shutdown: &AtomicBool) -> Result<(), PipelineError> {
        let settings = &self.processor.config().project.watch;
        let src_dir = self.processor.paths().src_dir();
        let watch_error = |message: String| PipelineError::Watch {
            path: src_dir.clone(),
            message,
        };

        let (tx, rx) = channel();
        let mut watcher: Box<dyn notify::Watcher> = if poll || settings.poll {
            Box::new(
                PollWatcher::new(
                    tx,
                    notify::Config::default()
                        .with_poll_interval(Duration::from_millis(settings.poll_interval_ms)),
                )
                .map_err(|e| watch_error(e.to_string()))?,
            )
        } else {
            Box::new(notify::recommended_watcher(tx).map_err(|e| watch_error(e.to_string()))?)
        };
        watcher
            .watch(&src_dir, RecursiveMode::Recursive)
            .map_err(|e| watch_error(e.to_string()))?;

        info!(dir = %src_dir.display(), "watching for changes (press Ctrl+C to stop)");

        // A batch is flushed once no event arrived for a full debounce window
        let debounce = Duration::from_millis(settings.debounce_ms.max(10));
        let mut pending: BTreeMap<PathBuf, Change> = BTreeMap::new();

        while !shutdown.load(Ordering::Relaxed) {
            match rx.recv_timeout(debounce) {
                Ok(Ok(event)) => {
                    for (path, change) in classify_event(&event) {
                        pending.insert(path, change);
                    }
                }
                Ok(Err(e)) => warn!("watch error: {e}"),
                Err(RecvTimeoutError::Timeout) => {
                    if pending.is_empty() {
                        continue;
                    }
                    let batch = std::mem::take(&mut pending);
                    debug!(paths = batch.len(), "change detected");
                    let results = self.apply(&batch, shutdown);
                    self.report(&results);
                    self.mirror(&results);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("watch stopped");
        Ok(())
    }
}

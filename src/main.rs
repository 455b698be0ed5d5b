use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use theme_pipeline::assets::{AssetKind, FileStatus, Processor};
use theme_pipeline::config::{Cli, Command, Config, FtpAction};
use theme_pipeline::error::PipelineError;
use theme_pipeline::ftp::{FtpClient, SuppaConnector};
use theme_pipeline::pipeline::{
    build_all, collect_results, exit_code, run_kinds, PipelineStats, TaskResult,
};
use theme_pipeline::scaffold;
use theme_pipeline::watch::WatchLoop;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("theme_pipeline={default_level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = std::env::current_dir().context("Failed to read the working directory")?;

    // Scaffolding targets the working directory, not a discovered project
    if let Command::Init { force } = cli.command {
        let created = scaffold::init(&cwd, force)?;
        for path in &created {
            println!("  created {}", display_relative(&cwd, path));
        }
        println!("Initialized theme project in {}", cwd.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::from_cli(&cli, &cwd)?;
    match &config.config_file {
        Some(file) => debug!(config = %file.display(), "using configuration"),
        None => info!("no configuration file found, using defaults"),
    }

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Configure Rayon thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build_global()
        .ok();

    let single = |kind: AssetKind| Some(vec![kind]);
    match cli.command {
        Command::Build { clean } => run_build(config, None, clean, &shutdown),
        Command::Copy => run_build(config, single(AssetKind::Copy), false, &shutdown),
        Command::Css => run_build(config, single(AssetKind::Css), false, &shutdown),
        Command::Js => run_build(config, single(AssetKind::Js), false, &shutdown),
        Command::Images => run_build(config, single(AssetKind::Images), false, &shutdown),
        Command::Fonts => run_build(config, single(AssetKind::Fonts), false, &shutdown),
        Command::Icons => run_build(config, single(AssetKind::Icons), false, &shutdown),
        Command::Templates => run_build(config, single(AssetKind::Templates), false, &shutdown),
        Command::Theme => run_build(config, single(AssetKind::Theme), false, &shutdown),
        Command::Start {
            no_build,
            upload,
            poll,
        } => run_start(config, no_build, upload, poll, &shutdown),
        Command::Ftp { action } => run_ftp(&config, &action),
        Command::PackageJson => {
            scaffold::package_json(&config.root)?;
            println!("Updated {}", config.root.join("package.json").display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { output } => {
            let paths = config.paths();
            let output = match output {
                Some(path) if path.is_relative() => cwd.join(path),
                Some(path) => path,
                None => scaffold::default_archive_path(&paths),
            };
            let summary = scaffold::export(&paths.theme_build_dir(), &output)?;
            println!(
                "Exported {} files ({} bytes) to {}",
                summary.files,
                summary.bytes,
                output.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::GulpConvert { file } => {
            let legacy = if file.is_relative() { cwd.join(file) } else { file };
            let result = scaffold::gulp_convert(&config.root, &legacy)
                .with_context(|| format!("Failed to convert {}", legacy.display()))?;
            println!(
                "Wrote {} ({} npm script(s) rewritten)",
                result.config.display(),
                result.scripts_rewritten
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Init { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Run every kind (`kinds` = None) or the given ones, then summarize
fn run_build(
    config: Config,
    kinds: Option<Vec<AssetKind>>,
    clean: bool,
    shutdown: &AtomicBool,
) -> Result<ExitCode> {
    let processor = Processor::new(config);
    let stats = PipelineStats::new();
    let start = Instant::now();

    let results = match kinds {
        None => build_all(&processor, clean, shutdown, &stats)?,
        Some(kinds) => run_kinds(&processor, &kinds, shutdown, &stats),
    };

    if shutdown.load(Ordering::Relaxed) {
        eprintln!("\nBuild cancelled");
        return Ok(ExitCode::from(130));
    }

    print_summary(&processor, &results, &stats, start.elapsed());
    let (has_success, has_failure, cancelled) = collect_results(&results);
    Ok(ExitCode::from(exit_code(has_success, has_failure, cancelled)))
}

fn print_summary(
    processor: &Processor,
    results: &[Result<TaskResult, PipelineError>],
    stats: &PipelineStats,
    duration: Duration,
) {
    let written = stats.files_written.get();
    let throughput = if duration.as_secs_f64() > 0.0 {
        written as f64 / duration.as_secs_f64()
    } else {
        0.0
    };

    println!(
        "Built {} files ({} unchanged, {} removed, {} bytes) in {:.2}s ({:.0} files/sec)",
        written,
        stats.files_unchanged.get(),
        stats.files_removed.get(),
        stats.bytes_written.get(),
        duration.as_secs_f64(),
        throughput
    );

    // Per-kind breakdown
    for result in results {
        match result {
            Ok(task) => {
                let failed = task.count(|s| matches!(s, FileStatus::Failed(_)));
                let status_str = if failed > 0 {
                    format!("{} files, {failed} FAILED", task.files.len())
                } else {
                    format!("{} files", task.files.len())
                };
                println!("  {}: {}", task.kind, status_str);
                for (path, error) in task.failures() {
                    println!(
                        "    {}: {error}",
                        display_relative(processor.paths().root(), path)
                    );
                }
            }
            Err(e) => println!("  FAILED: {e}"),
        }
    }
}

fn run_start(
    config: Config,
    no_build: bool,
    upload: bool,
    poll: bool,
    shutdown: &AtomicBool,
) -> Result<ExitCode> {
    let client = if upload {
        let connector = SuppaConnector::new(config.ftp.clone())
            .context("--upload needs FTP credentials")?;
        Some(FtpClient::new(connector, config.paths(), config.verbose))
    } else {
        None
    };

    let processor = Processor::new(config);
    let stats = PipelineStats::new();

    if !no_build {
        let start = Instant::now();
        let results = build_all(&processor, false, shutdown, &stats)?;
        if shutdown.load(Ordering::Relaxed) {
            eprintln!("\nBuild cancelled");
            return Ok(ExitCode::from(130));
        }
        print_summary(&processor, &results, &stats, start.elapsed());

        if let Some(client) = &client {
            let mut written: Vec<PathBuf> = Vec::new();
            let mut removed: Vec<PathBuf> = Vec::new();
            for file in results.iter().flatten().flat_map(|task| &task.files) {
                match (&file.status, &file.output) {
                    (FileStatus::Written(_), Some(out)) => written.push(out.clone()),
                    (FileStatus::Removed, Some(out)) => removed.push(out.clone()),
                    _ => {}
                }
            }
            match client.sync(&written, &removed) {
                Ok(summary) => info!(files = summary.files, "initial upload done"),
                Err(e) => warn!("initial upload failed: {e}"),
            }
        }
    }

    let watch = WatchLoop::new(&processor, client.as_ref(), &stats)?;
    watch.run(poll, shutdown)?;
    Ok(ExitCode::SUCCESS)
}

fn run_ftp(config: &Config, action: &FtpAction) -> Result<ExitCode> {
    let connector = SuppaConnector::new(config.ftp.clone())?;
    let client = FtpClient::new(connector, config.paths(), config.verbose);
    let start = Instant::now();

    let (verb, summary) = match action {
        FtpAction::Upload { path } => ("Uploaded", client.upload(path.as_deref())?),
        FtpAction::Download { path } => ("Downloaded", client.download(path.as_deref())?),
        FtpAction::Delete { path } => ("Deleted", client.delete(path)?),
    };

    println!(
        "{verb} {} files ({} bytes) in {:.2}s",
        summary.files,
        summary.bytes,
        start.elapsed().as_secs_f64()
    );
    if summary.unchanged > 0 {
        println!("  {} files already up to date", summary.unchanged);
    }
    Ok(ExitCode::SUCCESS)
}

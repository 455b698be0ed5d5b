//! # Theme Pipeline
//!
//! Asset pipeline for website themes.
//!
//! This library moves theme sources (stylesheets, scripts, images, fonts,
//! icons, templates and theme configuration) from a source tree into a build
//! tree, and mirrors the build tree to a server over FTP.
//!
//! ## Features
//!
//! - Parallel per-file processing using Rayon
//! - Unchanged output detection with a byte-level comparison
//! - CSS bundling and minification, PNG optimization, SVG icon sprites
//! - Theme configuration JSON validation and canonical formatting
//! - Incremental rebuilds from a filesystem watcher
//!
//! ## Usage
//!
//! ```ignore
//! use theme_pipeline::assets::Processor;
//! use theme_pipeline::pipeline::{build_all, PipelineStats};
//!
//! let processor = Processor::new(config);
//! let results = build_all(&processor, false, &shutdown, &PipelineStats::new())?;
//! ```

/// Asset kinds and per-file handlers
pub mod assets;

/// CLI configuration, project file and environment settings
pub mod config;

/// File collection and unchanged-output detection
pub mod copier;

/// Stylesheet bundling and minification
pub mod css;

/// Error types for pipeline operations
pub mod error;

/// FTP synchronization of the build tree
pub mod ftp;

/// SVG sprite generation
pub mod icons;

/// Image optimization
pub mod images;

/// External linter delegation
pub mod lint;

/// Path mapping between project, source, build and remote folders
pub mod paths;

/// Build orchestration
pub mod pipeline;

/// Project scaffolding and housekeeping commands
pub mod scaffold;

/// Theme configuration JSON validation and formatting
pub mod theme_json;

/// Incremental rebuilds on file changes
pub mod watch;

//! CLI arguments, project configuration file and runtime settings.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::paths::ProjectPaths;

/// Name of the project configuration file
pub const CONFIG_FILE: &str = "theme-pipeline.toml";

/// Asset pipeline for website themes
#[derive(Parser, Debug)]
#[command(name = "theme-pipeline")]
#[command(version)]
#[command(about = "Build, watch and deploy website theme assets")]
pub struct Cli {
    /// Configuration file (default: search upward for theme-pipeline.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(short, long, global = true, default_value_t = num_cpus::get())]
    pub jobs: usize,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Include development files (node_modules, .git, etc.)
    #[arg(short = 'd', long, global = true)]
    pub include_dev: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Build every asset type into the build folder
    Build {
        /// Empty the theme build folder first
        #[arg(long)]
        clean: bool,
    },
    /// Build, then watch sources and rebuild on change
    Start {
        /// Skip the initial build
        #[arg(long)]
        no_build: bool,
        /// Mirror every changed build file to the FTP server
        #[arg(long)]
        upload: bool,
        /// Use a polling watcher
        #[arg(long)]
        poll: bool,
    },
    /// Run the copy rules
    Copy,
    /// Lint and transform stylesheets
    Css,
    /// Lint and copy scripts
    Js,
    /// Optimize and copy images
    Images,
    /// Copy fonts
    Fonts,
    /// Build the SVG icon sprite
    Icons,
    /// Copy templates
    Templates,
    /// Validate, format and copy theme configuration JSON
    Theme,
    /// Transfer files with the FTP server
    Ftp {
        #[command(subcommand)]
        action: FtpAction,
    },
    /// Create a default configuration and source folders
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
    /// Add pipeline scripts to package.json
    PackageJson,
    /// Zip the theme build folder
    Export {
        /// Archive path (default: <root>/<theme>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Convert a legacy gulp configuration
    GulpConvert {
        /// Legacy configuration file
        #[arg(default_value = "gulp-config.json")]
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum FtpAction {
    /// Upload a build path (default: the whole theme build folder)
    Upload { path: Option<String> },
    /// Download a remote path into the build folder
    Download { path: Option<String> },
    /// Delete a remote path
    Delete { path: String },
}

/// `[paths]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub src: String,
    pub build: String,
    /// Folder inside `build` that receives the theme
    pub theme: String,
    /// Remote folder mirroring `build`
    pub remote: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            src: "src".into(),
            build: "build".into(),
            theme: String::new(),
            remote: "/".into(),
        }
    }
}

/// Source folder, build folder and file patterns of one asset type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSection {
    /// Relative to the source folder
    pub src: String,
    /// Relative to the theme build folder
    pub build: String,
    pub patterns: Vec<String>,
}

fn patterns(list: &[&str]) -> Vec<String> {
    list.iter().map(|p| p.to_string()).collect()
}

macro_rules! asset_section {
    ($($ty:ty),+) => {
        $(impl $ty {
            pub fn section(&self) -> AssetSection {
                AssetSection {
                    src: self.src.clone(),
                    build: self.build.clone(),
                    patterns: self.patterns.clone(),
                }
            }
        })+
    };
}

asset_section!(
    CssConfig,
    JsConfig,
    ImagesConfig,
    IconsConfig,
    FontsConfig,
    TemplatesConfig,
    ThemeConfig
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CssConfig {
    pub src: String,
    pub build: String,
    pub patterns: Vec<String>,
    pub minify: bool,
    /// Lint command; the file path is appended
    pub lint: Option<Vec<String>>,
    pub lint_strict: bool,
}

impl Default for CssConfig {
    fn default() -> Self {
        Self {
            src: "css".into(),
            build: "css".into(),
            patterns: patterns(&["**/*.css"]),
            minify: true,
            lint: None,
            lint_strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsConfig {
    pub src: String,
    pub build: String,
    pub patterns: Vec<String>,
    pub lint: Option<Vec<String>>,
    pub lint_strict: bool,
}

impl Default for JsConfig {
    fn default() -> Self {
        Self {
            src: "js".into(),
            build: "js".into(),
            patterns: patterns(&["**/*.js", "**/*.mjs"]),
            lint: None,
            lint_strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub src: String,
    pub build: String,
    pub patterns: Vec<String>,
    pub optimize: bool,
    /// oxipng preset, 0-6
    pub level: u8,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            src: "images".into(),
            build: "images".into(),
            patterns: patterns(&["**/*.{png,jpg,jpeg,gif,svg,webp,ico}"]),
            optimize: true,
            level: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IconsConfig {
    pub src: String,
    pub build: String,
    pub patterns: Vec<String>,
    /// Sprite file name inside the icons build folder
    pub sprite: String,
    /// Prefix of every symbol id
    pub prefix: String,
}

impl Default for IconsConfig {
    fn default() -> Self {
        Self {
            src: "icons".into(),
            build: "images".into(),
            patterns: patterns(&["**/*.svg"]),
            sprite: "icons.svg".into(),
            prefix: "icon-".into(),
        }
    }
}

/// Sections with no options beyond folders and patterns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontsConfig {
    pub src: String,
    pub build: String,
    pub patterns: Vec<String>,
}

impl Default for FontsConfig {
    fn default() -> Self {
        Self {
            src: "fonts".into(),
            build: "fonts".into(),
            patterns: patterns(&["**/*.{woff,woff2,ttf,otf,eot}"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    pub src: String,
    pub build: String,
    pub patterns: Vec<String>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            src: "templates".into(),
            build: "templates".into(),
            patterns: patterns(&["**/*.html", "**/*.htm"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    pub src: String,
    pub build: String,
    pub patterns: Vec<String>,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            src: "theme".into(),
            build: "".into(),
            patterns: patterns(&["**/*.json"]),
        }
    }
}

/// `[[copy]]` rule; `src` is relative to the source folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRule {
    pub src: String,
    #[serde(default)]
    pub build: String,
    #[serde(default = "default_copy_patterns")]
    pub patterns: Vec<String>,
}

fn default_copy_patterns() -> Vec<String> {
    vec!["**/*".into()]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
    pub poll: bool,
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            poll: false,
            poll_interval_ms: 500,
        }
    }
}

/// Contents of `theme-pipeline.toml`, defaults filled in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub paths: PathsConfig,
    pub css: CssConfig,
    pub js: JsConfig,
    pub images: ImagesConfig,
    pub fonts: FontsConfig,
    pub icons: IconsConfig,
    pub templates: TemplatesConfig,
    pub theme: ThemeConfig,
    pub copy: Vec<CopyRule>,
    pub watch: WatchConfig,
}

impl ProjectConfig {
    /// Parse a configuration file, merging it over defaults
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path).map_err(|e| PipelineError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content).map_err(|message| PipelineError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn to_toml(&self) -> Result<String, PipelineError> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config {
            path: PathBuf::from(CONFIG_FILE),
            message: e.to_string(),
        })
    }
}

/// FTP connection settings, read from the environment
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FtpSettings {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub remote: Option<String>,
}

impl std::fmt::Debug for FtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("remote", &self.remote)
            .finish()
    }
}

impl FtpSettings {
    /// Read `FTP_*` variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            host: non_empty("FTP_HOST"),
            port: non_empty("FTP_PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(21),
            user: non_empty("FTP_USER"),
            password: lookup("FTP_PASSWORD"),
            remote: non_empty("FTP_REMOTE"),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Host, user and password, or the names of the missing variables
    pub fn credentials(&self) -> Result<(&str, &str, &str), PipelineError> {
        let mut missing = Vec::new();
        if self.host.is_none() {
            missing.push("FTP_HOST");
        }
        if self.user.is_none() {
            missing.push("FTP_USER");
        }
        if self.password.is_none() {
            missing.push("FTP_PASSWORD");
        }
        match (&self.host, &self.user, &self.password) {
            (Some(h), Some(u), Some(p)) => Ok((h.as_str(), u.as_str(), p.as_str())),
            _ => Err(PipelineError::FtpConfig(format!(
                "missing {}",
                missing.join(", ")
            ))),
        }
    }
}

/// Runtime configuration merged from CLI, file and environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root (directory holding the configuration file)
    pub root: PathBuf,
    /// Configuration file in use, if any
    pub config_file: Option<PathBuf>,
    pub project: ProjectConfig,
    pub ftp: FtpSettings,
    /// Number of parallel workers
    pub jobs: usize,
    /// Enable verbose output
    pub verbose: bool,
    /// Include development files (default: exclude)
    pub include_dev: bool,
}

impl Config {
    /// Create Config from CLI arguments, discovering the project from `cwd`
    pub fn from_cli(cli: &Cli, cwd: &Path) -> anyhow::Result<Self> {
        let config_file = match &cli.config {
            Some(path) => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    cwd.join(path)
                };
                if !path.is_file() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                Some(path)
            }
            None => discover_config(cwd),
        };

        let root = config_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.to_path_buf());
        let root = root.canonicalize().unwrap_or(root);

        let project = match &config_file {
            Some(path) => ProjectConfig::load(path)?,
            None => ProjectConfig::default(),
        };

        // Real environment variables take precedence over .env
        load_dotenv(&root.join(".env"))?;

        Ok(Config {
            root,
            config_file,
            project,
            ftp: FtpSettings::from_env(),
            jobs: cli.jobs.max(1),
            verbose: cli.verbose,
            include_dev: cli.include_dev,
        })
    }

    /// Path layout, with `FTP_REMOTE` overriding `paths.remote`
    pub fn paths(&self) -> ProjectPaths {
        let p = &self.project.paths;
        let remote = self.ftp.remote.as_deref().unwrap_or(&p.remote);
        ProjectPaths::new(&self.root, &p.src, &p.build, &p.theme, remote)
    }

    /// Defaults rooted at `root`; used by tests and scaffolding
    pub fn for_root(root: impl Into<PathBuf>, project: ProjectConfig) -> Self {
        Config {
            root: root.into(),
            config_file: None,
            project,
            ftp: FtpSettings::default(),
            jobs: 1,
            verbose: false,
            include_dev: false,
        }
    }
}

/// Load `KEY=value` pairs from a `.env` file without overriding variables
/// already set. A missing file is fine; a malformed one is a config error.
pub fn load_dotenv(path: &Path) -> Result<(), PipelineError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(()),
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// Walk upward from `start` looking for the configuration file
pub fn discover_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

//! Project housekeeping commands: `init`, `package-json`, `export` and
//! `gulp-convert`.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::assets::Processor;
use crate::config::{Config, ProjectConfig, CONFIG_FILE};
use crate::copier::{write_if_changed, WriteOutcome};
use crate::error::PipelineError;
use crate::paths::{strip_prefix_path, to_slash, ProjectPaths};

/// Template for the credentials file
pub const ENV_EXAMPLE: &str = "\
FTP_HOST=
FTP_PORT=21
FTP_USER=
FTP_PASSWORD=
FTP_REMOTE=/
";

/// npm scripts managed by `package-json`
pub const NPM_SCRIPTS: [(&str, &str); 3] = [
    ("build", "theme-pipeline build"),
    ("start", "theme-pipeline start"),
    ("deploy", "theme-pipeline build && theme-pipeline ftp upload"),
];

/// Write a default configuration, `.env.example` and the source folders.
/// Returns every path created.
pub fn init(root: &Path, force: bool) -> Result<Vec<PathBuf>, PipelineError> {
    let config_path = root.join(CONFIG_FILE);
    let env_path = root.join(".env.example");

    if !force {
        for path in [&config_path, &env_path] {
            if path.exists() {
                return Err(PipelineError::AlreadyExists { path: path.clone() });
            }
        }
    }

    let project = ProjectConfig::default();
    let toml = format!(
        "# theme-pipeline project configuration\n\n{}",
        project.to_toml()?
    );

    let mut created = Vec::new();
    write_if_changed(&config_path, toml.as_bytes())?;
    created.push(config_path);
    write_if_changed(&env_path, ENV_EXAMPLE.as_bytes())?;
    created.push(env_path);

    let processor = Processor::new(Config::for_root(root, project));
    for target in processor.all_targets()? {
        if target.src_dir.exists() {
            continue;
        }
        fs::create_dir_all(&target.src_dir)
            .map_err(|e| PipelineError::from_create_dir(&target.src_dir, e))?;
        created.push(target.src_dir);
    }

    info!(root = %root.display(), files = created.len(), "project initialized");
    Ok(created)
}

fn read_json_object(path: &Path) -> Result<Map<String, Value>, PipelineError> {
    let content = fs::read_to_string(path).map_err(|e| PipelineError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    let invalid = |message: String| PipelineError::Json {
        path: path.to_path_buf(),
        message,
    };
    match serde_json::from_str::<Value>(&content).map_err(|e| invalid(e.to_string()))? {
        Value::Object(map) => Ok(map),
        _ => Err(invalid("top level is not an object".into())),
    }
}

fn write_json(path: &Path, doc: Map<String, Value>) -> Result<WriteOutcome, PipelineError> {
    let mut text =
        serde_json::to_string_pretty(&Value::Object(doc)).map_err(|e| PipelineError::Json {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    text.push('\n');
    write_if_changed(path, text.as_bytes())
}

fn package_name(root: &Path) -> String {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if slug.is_empty() {
        "theme".to_string()
    } else {
        slug
    }
}

/// Add or update the pipeline scripts in `package.json`, creating the file
/// when missing. Other keys keep their values and order.
pub fn package_json(root: &Path) -> Result<WriteOutcome, PipelineError> {
    let path = root.join("package.json");
    let mut doc = if path.exists() {
        read_json_object(&path)?
    } else {
        let mut doc = Map::new();
        doc.insert("name".into(), Value::String(package_name(root)));
        doc.insert("version".into(), Value::String("1.0.0".into()));
        doc.insert("private".into(), Value::Bool(true));
        doc
    };

    let scripts = doc
        .entry("scripts")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(scripts) = scripts else {
        return Err(PipelineError::Json {
            path,
            message: "\"scripts\" is not an object".into(),
        });
    };
    for (name, command) in NPM_SCRIPTS {
        scripts.insert(name.to_string(), Value::String(command.to_string()));
    }

    write_json(&path, doc)
}

/// Totals of an export
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub files: u64,
    pub bytes: u64,
}

/// `<root>/<name>.zip`, named after the theme folder (or the project folder
/// when there is no theme folder)
pub fn default_archive_path(paths: &ProjectPaths) -> PathBuf {
    let name = paths
        .theme()
        .rsplit('/')
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| package_name(paths.root()));
    paths.root().join(format!("{name}.zip"))
}

/// Zip `source_dir` into `output`; entry names are relative to `source_dir`
pub fn export(source_dir: &Path, output: &Path) -> Result<ExportSummary, PipelineError> {
    if !source_dir.is_dir() {
        return Err(PipelineError::ReadFailed {
            path: source_dir.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "build folder missing, run `theme-pipeline build` first",
            ),
        });
    }

    let archive_error = |e: zip::result::ZipError| PipelineError::Archive {
        path: output.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::from_create_dir(parent, e))?;
    }
    let file = File::create(output).map_err(|e| PipelineError::from_write(output, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut summary = ExportSummary::default();
    for entry in WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        // The archive may be written inside the folder it packs
        if path == output {
            continue;
        }
        let Ok(relative) = path.strip_prefix(source_dir) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = to_slash(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)
                .map_err(archive_error)?;
        } else if entry.file_type().is_file() {
            let data = fs::read(path).map_err(|e| PipelineError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
            zip.start_file(name, options).map_err(archive_error)?;
            zip.write_all(&data)
                .map_err(|e| PipelineError::from_write(output, e))?;
            summary.files += 1;
            summary.bytes += data.len() as u64;
        }
    }
    zip.finish().map_err(archive_error)?;

    info!(archive = %output.display(), files = summary.files, "exported");
    Ok(summary)
}

/// Legacy gulp configuration (`gulp-config.json`)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GulpConfig {
    paths: GulpPaths,
    ftp: GulpFtp,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GulpPaths {
    src: Option<String>,
    build: Option<String>,
    theme: Option<String>,
    css: Option<String>,
    js: Option<String>,
    images: Option<String>,
    fonts: Option<String>,
    icons: Option<String>,
    templates: Option<String>,
    config: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GulpFtp {
    remote: Option<String>,
    host: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl GulpConfig {
    fn apply(&self, project: &mut ProjectConfig) {
        let p = &self.paths;
        for (target, value) in [
            (&mut project.paths.src, &p.src),
            (&mut project.paths.build, &p.build),
            (&mut project.paths.theme, &p.theme),
        ] {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        if let Some(remote) = &self.ftp.remote {
            project.paths.remote = remote.clone();
        }

        // Asset folders may be given project-relative (`src/css`)
        let src = project.paths.src.clone();
        let folder = |value: &Option<String>| value.as_deref().map(|v| strip_prefix_path(v, &src));
        let sections = [
            (folder(&p.css), &mut project.css.src, &mut project.css.build),
            (folder(&p.js), &mut project.js.src, &mut project.js.build),
            (folder(&p.images), &mut project.images.src, &mut project.images.build),
            (folder(&p.fonts), &mut project.fonts.src, &mut project.fonts.build),
            (folder(&p.templates), &mut project.templates.src, &mut project.templates.build),
        ];
        for (value, src_folder, build_folder) in sections {
            if let Some(v) = value {
                *src_folder = v.clone();
                *build_folder = v;
            }
        }
        // Icons end up in the images build folder, theme config in the root
        if let Some(v) = folder(&p.icons) {
            project.icons.src = v;
        }
        if let Some(v) = folder(&p.config) {
            project.theme.src = v;
        }

        if self.ftp.host.is_some() || self.ftp.user.is_some() || self.ftp.password.is_some() {
            warn!("FTP credentials in the gulp configuration are not migrated; put them in .env");
        }
    }
}

fn gulp_task_command(task: Option<&str>) -> Option<&'static str> {
    let command = match task {
        None | Some("default" | "watch" | "start" | "serve") => "theme-pipeline start",
        Some("build") => "theme-pipeline build",
        Some("deploy" | "upload" | "ftp") => "theme-pipeline ftp upload",
        Some("css" | "styles" | "sass" | "scss") => "theme-pipeline css",
        Some("js" | "scripts") => "theme-pipeline js",
        Some("images" | "img") => "theme-pipeline images",
        Some("fonts") => "theme-pipeline fonts",
        Some("icons" | "sprite") => "theme-pipeline icons",
        Some("templates" | "html") => "theme-pipeline templates",
        Some("theme" | "config") => "theme-pipeline theme",
        Some(_) => return None,
    };
    Some(command)
}

/// Rewrite `gulp <task>` invocations in an npm script. Unknown tasks are
/// left as they are.
pub fn convert_gulp_script(script: &str) -> String {
    let tokens: Vec<&str> = script.split_whitespace().collect();
    if !tokens.contains(&"gulp") {
        return script.to_string();
    }

    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == "gulp" {
            let task = tokens
                .get(i + 1)
                .copied()
                .filter(|t| t.starts_with(|c: char| c.is_ascii_alphanumeric()));
            if let Some(command) = gulp_task_command(task) {
                out.push(command);
                i += if task.is_some() { 2 } else { 1 };
                continue;
            }
        }
        out.push(tokens[i]);
        i += 1;
    }
    out.join(" ")
}

/// Outcome of `gulp-convert`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GulpConversion {
    pub config: PathBuf,
    pub scripts_rewritten: usize,
}

/// Map a legacy gulp configuration onto `theme-pipeline.toml` (merging into
/// an existing one) and rewrite gulp npm scripts in `package.json`.
pub fn gulp_convert(root: &Path, legacy: &Path) -> Result<GulpConversion, PipelineError> {
    let content = fs::read_to_string(legacy).map_err(|e| PipelineError::ReadFailed {
        path: legacy.to_path_buf(),
        source: e,
    })?;
    let gulp: GulpConfig = serde_json::from_str(&content).map_err(|e| PipelineError::Json {
        path: legacy.to_path_buf(),
        message: e.to_string(),
    })?;

    let config_path = root.join(CONFIG_FILE);
    let mut project = if config_path.exists() {
        ProjectConfig::load(&config_path)?
    } else {
        ProjectConfig::default()
    };
    gulp.apply(&mut project);
    write_if_changed(&config_path, project.to_toml()?.as_bytes())?;

    let mut scripts_rewritten = 0;
    let package = root.join("package.json");
    if package.exists() {
        let mut doc = read_json_object(&package)?;
        if let Some(Value::Object(scripts)) = doc.get_mut("scripts") {
            for (name, value) in scripts.iter_mut() {
                let Value::String(script) = value else {
                    continue;
                };
                let converted = convert_gulp_script(script);
                if converted != *script {
                    info!(script = %name, "{script} -> {converted}");
                    *script = converted;
                    scripts_rewritten += 1;
                }
            }
        }
        if scripts_rewritten > 0 {
            write_json(&package, doc)?;
        }
    }

    Ok(GulpConversion {
        config: config_path,
        scripts_rewritten,
    })
}

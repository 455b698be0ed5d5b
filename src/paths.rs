//! Path bookkeeping across the four coordinate spaces of a project.
//!
//! A logical asset path (`css/main.css`) can be expressed relative to the
//! project root, the source folder, the theme build folder, or the remote
//! folder on the FTP server. The string helpers here work on `/`-separated
//! paths so the same rules apply to local and remote paths.

use std::path::{Component, Path, PathBuf};

/// Normalize separators: backslashes become `/`, repeated separators
/// collapse, leading `./` segments and trailing `/` are dropped.
pub fn normalize(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let absolute = replaced.starts_with('/');

    let segments: Vec<&str> = replaced
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// True when `path` is `base` itself or lies below it.
fn is_rooted_at(path: &str, base: &str) -> bool {
    if base == "/" {
        return path.starts_with('/');
    }
    path == base
        || path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn join_normalized(base: &str, rest: &str) -> String {
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        base.to_string()
    } else if base.is_empty() {
        rest.to_string()
    } else if base.ends_with('/') {
        format!("{base}{rest}")
    } else {
        format!("{base}/{rest}")
    }
}

/// Root `path` at `base` exactly once.
///
/// A path that already equals or starts with `base` is returned as is.
/// Otherwise `base_folder`, when given and leading the path, is stripped
/// before `base` is joined in front. An empty `base` roots everything, so
/// the path comes back normalized but otherwise untouched.
///
/// Applying the function to its own output never changes it again.
pub fn prefix_path(path: &str, base: &str, base_folder: Option<&str>) -> String {
    let path = normalize(path);
    let base = normalize(base);

    if base.is_empty() || is_rooted_at(&path, &base) {
        return path;
    }

    let rest = match base_folder.map(normalize) {
        Some(folder) if !folder.is_empty() && is_rooted_at(&path, &folder) => {
            strip_prefix_path(&path, &folder)
        }
        _ => path,
    };

    join_normalized(&base, &rest)
}

/// The part of `path` below `base`: empty when they are equal, the path
/// unchanged when it is not below `base`.
pub fn strip_prefix_path(path: &str, base: &str) -> String {
    let path = normalize(path);
    let base = normalize(base);

    if base.is_empty() {
        return path;
    }
    if base == "/" {
        return path.trim_start_matches('/').to_string();
    }
    if path == base {
        return String::new();
    }
    match path.strip_prefix(&base) {
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
        _ => path,
    }
}

/// Join two `/` paths and normalize the result
pub fn join_path(a: &str, b: &str) -> String {
    join_normalized(&normalize(a), &normalize(b))
}

/// Render a relative filesystem path with `/` separators.
pub fn to_slash(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::RootDir => Some(String::new()),
            _ => None,
        })
        .collect();
    if parts.first().is_some_and(|p| p.is_empty()) {
        format!("/{}", parts[1..].join("/"))
    } else {
        parts.join("/")
    }
}

/// Project layout: root directory plus the source, build, theme and remote
/// folders from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
    src: String,
    build: String,
    theme: String,
    remote: String,
}

impl ProjectPaths {
    pub fn new(
        root: impl Into<PathBuf>,
        src: &str,
        build: &str,
        theme: &str,
        remote: &str,
    ) -> Self {
        let remote = normalize(remote);
        Self {
            root: root.into(),
            src: normalize(src),
            build: normalize(build),
            theme: normalize(theme),
            remote: if remote.is_empty() {
                "/".to_string()
            } else {
                remote
            },
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source folder relative to the root
    #[inline]
    pub fn src(&self) -> &str {
        &self.src
    }

    /// Build folder relative to the root
    #[inline]
    pub fn build(&self) -> &str {
        &self.build
    }

    /// Theme folder name inside the build folder (may be empty)
    #[inline]
    pub fn theme(&self) -> &str {
        &self.theme
    }

    #[inline]
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Theme build folder relative to the root
    pub fn theme_build(&self) -> String {
        join_path(&self.build, &self.theme)
    }

    pub fn root_path(&self, logical: &str) -> PathBuf {
        let rel = normalize(logical);
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel.trim_start_matches('/'))
        }
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root_path(&self.src)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root_path(&self.build)
    }

    pub fn theme_build_dir(&self) -> PathBuf {
        self.root_path(&self.theme_build())
    }

    /// Absolute source path for a path relative to the source folder.
    /// Project-relative input (`src/css/a.css`) is accepted too.
    pub fn src_path(&self, logical: &str) -> PathBuf {
        self.root_path(&prefix_path(logical, &self.src, None))
    }

    /// Absolute build path; a leading source folder is swapped for the build
    /// folder.
    pub fn build_path(&self, logical: &str) -> PathBuf {
        self.root_path(&prefix_path(logical, &self.build, Some(&self.src)))
    }

    /// Absolute path inside the theme build folder; a leading source folder
    /// is swapped for the theme build folder.
    pub fn theme_build_path(&self, logical: &str) -> PathBuf {
        self.root_path(&prefix_path(logical, &self.theme_build(), Some(&self.src)))
    }

    /// Remote path for a path relative to the build folder. The remote
    /// folder mirrors the build folder, so no segment is ever stripped.
    pub fn remote_path(&self, logical: &str) -> String {
        join_path(&self.remote, logical)
    }

    /// Project-relative `/` path of an absolute path below the root
    pub fn relative_to_root(&self, absolute: &Path) -> Option<String> {
        absolute.strip_prefix(&self.root).ok().map(to_slash)
    }

    /// Path relative to the source folder, if `absolute` lies in it
    pub fn logical_from_src(&self, absolute: &Path) -> Option<String> {
        absolute.strip_prefix(self.src_dir()).ok().map(to_slash)
    }

    /// Path relative to the build folder, if `absolute` lies in it
    pub fn logical_from_build(&self, absolute: &Path) -> Option<String> {
        absolute.strip_prefix(self.build_dir()).ok().map(to_slash)
    }

    /// Map a source file onto the theme build tree, keeping its position
    /// below the source folder.
    pub fn src_to_build(&self, absolute: &Path) -> Option<PathBuf> {
        self.logical_from_src(absolute)
            .map(|logical| self.theme_build_path(&logical))
    }

    /// Remote path of an absolute file in the build folder
    pub fn build_to_remote(&self, absolute: &Path) -> Option<String> {
        self.logical_from_build(absolute)
            .map(|logical| self.remote_path(&logical))
    }
}

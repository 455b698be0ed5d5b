//! FTP synchronization of the build tree.
//!
//! Every operation opens its own connection, transfers, and quits. Paths
//! given to the client are relative to the theme build folder; the remote
//! side mirrors the build folder below the configured remote folder.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use suppaftp::types::FileType;
use suppaftp::FtpStream;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::FtpSettings;
use crate::copier::{write_if_changed, WriteOutcome};
use crate::error::PipelineError;
use crate::paths::{join_path, normalize, ProjectPaths};
use crate::pipeline::progress_bar;

/// Entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
}

/// File-transfer primitives the client is built on
pub trait Transport {
    fn put(&mut self, remote: &str, data: &[u8]) -> Result<u64, PipelineError>;
    fn get(&mut self, remote: &str) -> Result<Vec<u8>, PipelineError>;
    fn delete(&mut self, remote: &str) -> Result<(), PipelineError>;
    fn mkdir(&mut self, remote: &str) -> Result<(), PipelineError>;
    fn rmdir(&mut self, remote: &str) -> Result<(), PipelineError>;
    /// Direct children of a remote directory
    fn list(&mut self, remote: &str) -> Result<Vec<RemoteEntry>, PipelineError>;
    fn quit(&mut self) -> Result<(), PipelineError>;
}

/// Opens a fresh transport for one operation
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Transport>, PipelineError>;
}

fn ftp_error(operation: &'static str, path: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Ftp {
        operation,
        path: path.to_string(),
        message: e.to_string(),
    }
}

/// Transport over a plain FTP control connection
pub struct SuppaTransport {
    stream: FtpStream,
}

impl Transport for SuppaTransport {
    fn put(&mut self, remote: &str, data: &[u8]) -> Result<u64, PipelineError> {
        let mut reader = data;
        self.stream
            .put_file(remote, &mut reader)
            .map_err(|e| ftp_error("upload", remote, e))
    }

    fn get(&mut self, remote: &str) -> Result<Vec<u8>, PipelineError> {
        self.stream
            .retr_as_buffer(remote)
            .map(|cursor| cursor.into_inner())
            .map_err(|e| ftp_error("download", remote, e))
    }

    fn delete(&mut self, remote: &str) -> Result<(), PipelineError> {
        self.stream
            .rm(remote)
            .map_err(|e| ftp_error("delete", remote, e))
    }

    fn mkdir(&mut self, remote: &str) -> Result<(), PipelineError> {
        self.stream
            .mkdir(remote)
            .map_err(|e| ftp_error("mkdir", remote, e))
    }

    fn rmdir(&mut self, remote: &str) -> Result<(), PipelineError> {
        self.stream
            .rmdir(remote)
            .map_err(|e| ftp_error("rmdir", remote, e))
    }

    fn list(&mut self, remote: &str) -> Result<Vec<RemoteEntry>, PipelineError> {
        let lines = self
            .stream
            .list(Some(remote))
            .map_err(|e| ftp_error("list", remote, e))?;

        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            match suppaftp::list::File::from_str(&line) {
                Ok(file) => {
                    let name = file.name().to_string();
                    if name == "." || name == ".." {
                        continue;
                    }
                    entries.push(RemoteEntry {
                        name,
                        is_dir: file.is_directory(),
                    });
                }
                Err(_) => debug!(line = %line, "unparsed LIST line"),
            }
        }
        Ok(entries)
    }

    fn quit(&mut self) -> Result<(), PipelineError> {
        self.stream.quit().map_err(|e| ftp_error("quit", "", e))
    }
}

/// Connects with the `FTP_*` settings
#[derive(Debug, Clone)]
pub struct SuppaConnector {
    settings: FtpSettings,
}

impl SuppaConnector {
    /// Fails early when credentials are incomplete
    pub fn new(settings: FtpSettings) -> Result<Self, PipelineError> {
        settings.credentials()?;
        Ok(Self { settings })
    }
}

impl Connector for SuppaConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, PipelineError> {
        let (host, user, password) = self.settings.credentials()?;
        let address = format!("{}:{}", host, self.settings.port);
        debug!(address = %address, user = %user, "connecting");

        let mut stream =
            FtpStream::connect(address.as_str()).map_err(|e| ftp_error("connect", &address, e))?;
        stream
            .login(user, password)
            .map_err(|e| ftp_error("login", &address, e))?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| ftp_error("binary mode", &address, e))?;

        Ok(Box::new(SuppaTransport { stream }))
    }
}

/// Totals of one operation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: u64,
    pub bytes: u64,
    /// Local files left alone because the download matched them
    pub unchanged: u64,
}

fn split_remote(remote: &str) -> (String, String) {
    match remote.rfind('/') {
        Some(0) => ("/".to_string(), remote[1..].to_string()),
        Some(idx) => (remote[..idx].to_string(), remote[idx + 1..].to_string()),
        None => ("/".to_string(), remote.to_string()),
    }
}

/// Session bound to one open transport
struct Session {
    transport: Box<dyn Transport>,
    created_dirs: HashSet<String>,
}

impl Session {
    /// Create `dir` and its ancestors; existing directories are fine
    fn mkdir_all(&mut self, dir: &str) {
        let dir = normalize(dir);
        let mut current = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            current = if dir.starts_with('/') || !current.is_empty() {
                format!("{current}/{segment}")
            } else {
                segment.to_string()
            };
            if self.created_dirs.insert(current.clone()) {
                // Fails when the directory exists
                let _ = self.transport.mkdir(&current);
            }
        }
    }

    fn put(&mut self, remote: &str, data: &[u8]) -> Result<u64, PipelineError> {
        let (parent, _) = split_remote(remote);
        self.mkdir_all(&parent);
        self.transport.put(remote, data)
    }

    /// Some(true) for a directory, Some(false) for a file, None if absent
    fn kind_of(&mut self, remote: &str) -> Option<bool> {
        if remote == "/" {
            return Some(true);
        }
        let (parent, name) = split_remote(remote);
        let entries = self.transport.list(&parent).ok()?;
        entries.iter().find(|e| e.name == name).map(|e| e.is_dir)
    }

    /// Files below a remote directory as (remote path, path relative to it)
    fn walk(
        &mut self,
        dir: &str,
        prefix: &str,
        out: &mut Vec<(String, String)>,
        dirs: &mut Vec<String>,
    ) -> Result<(), PipelineError> {
        for entry in self.transport.list(dir)? {
            let remote = join_path(dir, &entry.name);
            let relative = join_path(prefix, &entry.name);
            if entry.is_dir {
                self.walk(&remote, &relative, out, dirs)?;
                dirs.push(remote);
            } else {
                out.push((remote, relative));
            }
        }
        Ok(())
    }
}

/// Upload / download / delete of build paths
pub struct FtpClient<C: Connector> {
    connector: C,
    paths: ProjectPaths,
    verbose: bool,
}

impl<C: Connector> FtpClient<C> {
    pub fn new(connector: C, paths: ProjectPaths, verbose: bool) -> Self {
        Self {
            connector,
            paths,
            verbose,
        }
    }

    /// Run `op` on a fresh connection, quitting afterwards either way
    fn with_session<T>(
        &self,
        op: impl FnOnce(&mut Session) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut session = Session {
            transport: self.connector.connect()?,
            created_dirs: HashSet::new(),
        };
        let result = op(&mut session);
        if let Err(e) = session.transport.quit() {
            warn!("closing FTP connection: {e}");
        }
        result
    }

    /// Local path and remote path of a path relative to the theme build
    /// folder (empty: the folder itself)
    pub fn resolve(&self, logical: Option<&str>) -> (PathBuf, String) {
        let local = match logical.map(normalize).filter(|l| !l.is_empty()) {
            Some(l) => self.paths.theme_build_path(&l),
            None => self.paths.theme_build_dir(),
        };
        let remote = self
            .paths
            .build_to_remote(&local)
            .unwrap_or_else(|| self.paths.remote().to_string());
        (local, remote)
    }

    /// Upload a file, or a directory recursively
    pub fn upload(&self, logical: Option<&str>) -> Result<TransferSummary, PipelineError> {
        let (local, remote) = self.resolve(logical);
        if !local.exists() {
            return Err(PipelineError::ReadFailed {
                path: local,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "nothing to upload"),
            });
        }

        let files: Vec<PathBuf> = if local.is_dir() {
            WalkDir::new(&local)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .collect()
        } else {
            vec![local.clone()]
        };

        info!(files = files.len(), remote = %remote, "uploading");
        let progress = progress_bar(files.len() as u64, self.verbose, "upload");

        let summary = self.with_session(|session| {
            let mut summary = TransferSummary::default();
            if local.is_dir() {
                session.mkdir_all(&remote);
            }
            for file in &files {
                let target = self
                    .paths
                    .build_to_remote(file)
                    .unwrap_or_else(|| remote.clone());
                let data = fs::read(file).map_err(|e| PipelineError::ReadFailed {
                    path: file.clone(),
                    source: e,
                })?;
                summary.bytes += session.put(&target, &data)?;
                summary.files += 1;
                if let Some(ref pb) = progress {
                    pb.inc(1);
                }
            }
            Ok(summary)
        });

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        summary
    }

    /// Download a remote file, or a directory recursively, into the build
    /// folder. Local files already holding the same bytes are not rewritten.
    pub fn download(&self, logical: Option<&str>) -> Result<TransferSummary, PipelineError> {
        let (local, remote) = self.resolve(logical);
        info!(remote = %remote, local = %local.display(), "downloading");

        self.with_session(|session| {
            let files = match session.kind_of(&remote) {
                Some(true) => {
                    let mut files = Vec::new();
                    session.walk(&remote, "", &mut files, &mut Vec::new())?;
                    files
                        .into_iter()
                        .map(|(r, rel)| (r, local.join(rel)))
                        .collect::<Vec<_>>()
                }
                Some(false) => vec![(remote.clone(), local.clone())],
                None => {
                    return Err(ftp_error("download", &remote, "no such file or directory"));
                }
            };

            let progress = progress_bar(files.len() as u64, self.verbose, "download");
            let mut summary = TransferSummary::default();
            for (remote_file, local_file) in files {
                let data = session.transport.get(&remote_file)?;
                match write_if_changed(&local_file, &data)? {
                    WriteOutcome::Written(bytes) => {
                        summary.files += 1;
                        summary.bytes += bytes;
                    }
                    WriteOutcome::Unchanged => summary.unchanged += 1,
                }
                if let Some(ref pb) = progress {
                    pb.inc(1);
                }
            }
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }
            Ok(summary)
        })
    }

    /// Delete a remote file, or a directory with everything below it
    pub fn delete(&self, logical: &str) -> Result<TransferSummary, PipelineError> {
        let (_, remote) = self.resolve(Some(logical));
        if remote == self.paths.remote() {
            return Err(ftp_error("delete", &remote, "refusing to delete the remote root"));
        }
        info!(remote = %remote, "deleting");

        self.with_session(|session| {
            let mut summary = TransferSummary::default();
            match session.kind_of(&remote) {
                Some(true) => {
                    let mut files = Vec::new();
                    let mut dirs = Vec::new();
                    session.walk(&remote, "", &mut files, &mut dirs)?;
                    for (file, _) in files {
                        session.transport.delete(&file)?;
                        summary.files += 1;
                    }
                    // walk() lists children before their parents
                    for dir in dirs {
                        session.transport.rmdir(&dir)?;
                    }
                    session.transport.rmdir(&remote)?;
                }
                Some(false) => {
                    session.transport.delete(&remote)?;
                    summary.files += 1;
                }
                None => warn!(remote = %remote, "nothing to delete"),
            }
            Ok(summary)
        })
    }

    /// Mirror changed build files: upload `written`, delete `removed`.
    /// Paths are absolute build paths. One connection for the whole batch.
    pub fn sync(
        &self,
        written: &[PathBuf],
        removed: &[PathBuf],
    ) -> Result<TransferSummary, PipelineError> {
        if written.is_empty() && removed.is_empty() {
            return Ok(TransferSummary::default());
        }

        self.with_session(|session| {
            let mut summary = TransferSummary::default();
            for file in written {
                let Some(remote) = self.paths.build_to_remote(file) else {
                    continue;
                };
                let data = fs::read(file).map_err(|e| PipelineError::ReadFailed {
                    path: file.clone(),
                    source: e,
                })?;
                summary.bytes += session.put(&remote, &data)?;
                summary.files += 1;
                info!(remote = %remote, "uploaded");
            }
            for file in removed {
                let Some(remote) = self.paths.build_to_remote(file) else {
                    continue;
                };
                match session.transport.delete(&remote) {
                    Ok(()) => info!(remote = %remote, "deleted"),
                    Err(e) => warn!("{e}"),
                }
            }
            Ok(summary)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryConnector;
    use super::*;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn client(root: &Path) -> (FtpClient<MemoryConnector>, MemoryConnector) {
        let connector = MemoryConnector::default();
        let paths = ProjectPaths::new(root, "src", "build", "shop", "/www");
        (FtpClient::new(connector.clone(), paths, false), connector)
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_split_remote() {
        assert_eq!(split_remote("/www/a.css"), ("/www".into(), "a.css".into()));
        assert_eq!(split_remote("/a.css"), ("/".into(), "a.css".into()));
    }

    #[test]
    fn test_resolve_paths() {
        let temp = TempDir::new().unwrap();
        let (client, _) = client(temp.path());

        let (local, remote) = client.resolve(Some("css/a.css"));
        assert_eq!(local, temp.path().join("build/shop/css/a.css"));
        assert_eq!(remote, "/www/shop/css/a.css");

        let (local, remote) = client.resolve(None);
        assert_eq!(local, temp.path().join("build/shop"));
        assert_eq!(remote, "/www/shop");
    }

    #[test]
    fn test_upload_directory_creates_remote_dirs() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("build/shop/css/a.css"), "a{}");
        write(&temp.path().join("build/shop/index.html"), "<p>");
        let (client, conn) = client(temp.path());

        let summary = client.upload(None).unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 6);
        let files = conn.0.files.lock().unwrap();
        assert_eq!(files.get("/www/shop/css/a.css").unwrap(), b"a{}");
        assert!(files.contains_key("/www/shop/index.html"));
        assert_eq!(conn.0.connects.load(Ordering::SeqCst), 1);
        assert_eq!(conn.0.quits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_upload_missing_local() {
        let temp = TempDir::new().unwrap();
        let (client, conn) = client(temp.path());
        assert!(client.upload(Some("nope.css")).is_err());
        assert_eq!(conn.0.connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_download_directory_skips_identical() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("build/shop/css/a.css"), "a{}");
        write(&temp.path().join("build/shop/js/b.js"), "b");
        let (client, conn) = client(temp.path());
        client.upload(None).unwrap();

        // Change one file locally, delete another
        fs::write(temp.path().join("build/shop/css/a.css"), "local").unwrap();
        fs::remove_file(temp.path().join("build/shop/js/b.js")).unwrap();
        write(&temp.path().join("build/shop/js/b.js"), "b");

        let summary = client.download(None).unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(
            fs::read_to_string(temp.path().join("build/shop/css/a.css")).unwrap(),
            "a{}"
        );
        assert_eq!(conn.0.connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_download_missing_remote() {
        let temp = TempDir::new().unwrap();
        let (client, conn) = client(temp.path());
        let err = client.download(Some("ghost.css")).unwrap_err();
        assert!(matches!(err, PipelineError::Ftp { .. }));
        assert_eq!(conn.0.quits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delete_directory_recursive() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("build/shop/css/sub/a.css"), "a");
        write(&temp.path().join("build/shop/css/b.css"), "b");
        write(&temp.path().join("build/shop/index.html"), "i");
        let (client, conn) = client(temp.path());
        client.upload(None).unwrap();

        let summary = client.delete("css").unwrap();

        assert_eq!(summary.files, 2);
        let files = conn.0.files.lock().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("/www/shop/index.html"));
        let dirs = conn.0.dirs.lock().unwrap();
        assert!(!dirs.contains("/www/shop/css"));
        assert!(!dirs.contains("/www/shop/css/sub"));
    }

    #[test]
    fn test_delete_single_file() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("build/shop/a.css"), "a");
        let (client, conn) = client(temp.path());
        client.upload(Some("a.css")).unwrap();

        assert_eq!(client.delete("a.css").unwrap().files, 1);
        assert!(conn.0.files.lock().unwrap().is_empty());
    }

    #[test]
    fn test_delete_refuses_remote_root() {
        let temp = TempDir::new().unwrap();
        let connector = MemoryConnector::default();
        let paths = ProjectPaths::new(temp.path(), "src", "build", "", "/www");
        let client = FtpClient::new(connector, paths, false);
        assert!(client.delete("").is_err());
    }

    #[test]
    fn test_sync_uploads_and_deletes() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("build/shop/a.css");
        let b = temp.path().join("build/shop/b.css");
        write(&a, "a");
        write(&b, "b");
        let (client, conn) = client(temp.path());
        client.upload(None).unwrap();

        write(&a, "a2");
        fs::remove_file(&b).unwrap();
        let summary = client.sync(&[a.clone()], &[b.clone()]).unwrap();

        assert_eq!(summary.files, 1);
        let files = conn.0.files.lock().unwrap();
        assert_eq!(files.get("/www/shop/a.css").unwrap(), b"a2");
        assert!(!files.contains_key("/www/shop/b.css"));
    }

    #[test]
    fn test_sync_nothing_does_not_connect() {
        let temp = TempDir::new().unwrap();
        let (client, conn) = client(temp.path());
        client.sync(&[], &[]).unwrap();
        assert_eq!(conn.0.connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_suppa_connector_requires_credentials() {
        let err = SuppaConnector::new(FtpSettings::default()).unwrap_err();
        assert!(matches!(err, PipelineError::FtpConfig(_)));
    }
}

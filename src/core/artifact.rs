//! Artifact Publisher: package the output directory and store it.
//!
//! Every run gets its own uuid run id, so stores never reuse a location.
//! The local store keeps `<store>/<name>/<run_id>/<name>.zip` next to an
//! `artifact.json` record; the HTTP store PUTs the same archive.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};
use crate::paths;

const RECORD_FILE: &str = "artifact.json";
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// An archive built in memory, ready to be handed to one or more stores.
#[derive(Debug, Clone)]
pub struct ArtifactPackage {
    pub name: String,
    pub run_id: String,
    pub file_name: String,
    pub data: Vec<u8>,
    pub sha256: String,
    pub files: usize,
    pub content_bytes: u64,
}

/// What gets written to `artifact.json` and returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRecord {
    pub name: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub file_name: String,
    pub sha256: String,
    pub files: usize,
    pub content_bytes: u64,
    pub archive_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ArtifactRecord {
    pub fn for_package(package: &ArtifactPackage) -> Self {
        Self {
            name: package.name.clone(),
            run_id: package.run_id.clone(),
            created_at: Utc::now(),
            file_name: package.file_name.clone(),
            sha256: package.sha256.clone(),
            files: package.files,
            content_bytes: package.content_bytes,
            archive_bytes: package.data.len() as u64,
            path: None,
            url: None,
        }
    }
}

fn zip_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::publish_artifact_failed(format!("{}: {}", context, e), Some(context.to_string()))
}

fn collect_entries(base: &Path, dir: &Path, out: &mut Vec<(String, PathBuf, bool)>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", dir.display())))
    })?;
    let mut children: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    children.sort();

    for path in children {
        let rel = paths::relative_slash(base, &path);
        // Links are never followed: their targets may sit outside the tree.
        if path.is_symlink() {
            tracing::warn!(path = %rel, "skipping symlink in artifact");
            continue;
        }
        if path.is_dir() {
            out.push((format!("{}/", rel), path.clone(), true));
            collect_entries(base, &path, out)?;
        } else {
            out.push((rel, path, false));
        }
    }
    Ok(())
}

/// Zip `dir` into an in-memory archive named `<name>.zip`.
///
/// Entries are added in sorted order with a fixed timestamp and mode, so the
/// same tree always yields the same bytes and checksum.
pub fn package(dir: &Path, name: &str, run_id: &str) -> Result<ArtifactPackage> {
    if !dir.is_dir() {
        return Err(Error::build_output_missing(dir.to_string_lossy().to_string()));
    }

    let mut entries = Vec::new();
    collect_entries(dir, dir, &mut entries)?;

    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);
    let dir_options = options.unix_permissions(0o755);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut files = 0;
    let mut content_bytes = 0u64;

    for (rel, path, is_dir) in entries {
        if is_dir {
            writer
                .add_directory(rel, dir_options)
                .map_err(|e| zip_error("add directory", e))?;
            continue;
        }
        let data = fs::read(&path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
        })?;
        writer
            .start_file(rel, options)
            .map_err(|e| zip_error("start file", e))?;
        writer
            .write_all(&data)
            .map_err(|e| zip_error("write file", e))?;
        files += 1;
        content_bytes += data.len() as u64;
    }

    let data = writer
        .finish()
        .map_err(|e| zip_error("finish archive", e))?
        .into_inner();

    let mut hasher = Sha256::new();
    hasher.update(&data);
    let sha256 = format!("{:x}", hasher.finalize());

    tracing::debug!(name, run_id, files, bytes = data.len(), "packaged artifact");

    Ok(ArtifactPackage {
        name: name.to_string(),
        run_id: run_id.to_string(),
        file_name: format!("{}.zip", name),
        data,
        sha256,
        files,
        content_bytes,
    })
}

/// A destination for packaged artifacts.
///
/// Stores fill in their part of the record (`path`, `url`). A store must
/// never replace an artifact from another run.
pub trait ArtifactStore {
    fn store(&self, package: &ArtifactPackage, record: &mut ArtifactRecord) -> Result<()>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, name: &str, run_id: &str) -> PathBuf {
        self.root.join(name).join(run_id)
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&temp, content).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("write {}", temp.display())))
    })?;
    fs::rename(&temp, path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("rename to {}", path.display())))
    })
}

impl ArtifactStore for LocalArtifactStore {
    fn store(&self, package: &ArtifactPackage, record: &mut ArtifactRecord) -> Result<()> {
        let run_dir = self.run_dir(&package.name, &package.run_id);
        if let Some(parent) = run_dir.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
            })?;
        }
        // create_dir (not create_dir_all) fails if the run directory exists.
        fs::create_dir(&run_dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Error::publish_artifact_failed(
                    format!(
                        "Artifact {} for run {} already exists",
                        package.name, package.run_id
                    ),
                    Some(run_dir.to_string_lossy().to_string()),
                )
            } else {
                Error::internal_io(e.to_string(), Some(format!("create {}", run_dir.display())))
            }
        })?;

        let archive = run_dir.join(&package.file_name);
        write_atomic(&archive, &package.data)?;
        record.path = Some(archive.to_string_lossy().to_string());

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize artifact record".into())))?;
        write_atomic(&run_dir.join(RECORD_FILE), &json)?;

        crate::log_status!("publish", "Stored artifact at {}", archive.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.root.to_string_lossy().to_string()
    }
}

/// Uploads archives with `PUT <base_url>/<name>/<run_id>/<file_name>`.
pub struct HttpArtifactStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpArtifactStore {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        // No timeout: a run only ends when the upload does or the caller kills it.
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("docship/{}", VERSION))
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    pub fn url_for(&self, package: &ArtifactPackage) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url, package.name, package.run_id, package.file_name
        )
    }
}

impl ArtifactStore for HttpArtifactStore {
    fn store(&self, package: &ArtifactPackage, record: &mut ArtifactRecord) -> Result<()> {
        let url = self.url_for(package);
        crate::log_status!("publish", "Uploading {} ({} bytes)", url, package.data.len());

        let mut request = self
            .client
            .put(&url)
            .header("Content-Type", "application/zip")
            .header("X-Checksum-Sha256", &package.sha256)
            .body(package.data.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| {
            Error::publish_artifact_failed(format!("Upload to {} failed: {}", url, e), Some(url.clone()))
                .with_retryable(true)
        })?;

        let status = response.status();
        if !status.is_success() {
            // 5xx and 429 may succeed on a later run.
            let retryable = status.is_server_error() || status.as_u16() == 429;
            let body = response.text().unwrap_or_default();
            return Err(Error::publish_artifact_failed(
                format!("Upload to {} returned {}: {}", url, status, body.trim()),
                Some(url),
            )
            .with_retryable(retryable));
        }

        record.url = Some(url);
        Ok(())
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

/// Run every store in order. The first failure aborts the rest.
pub fn publish(package: &ArtifactPackage, stores: &[Box<dyn ArtifactStore>]) -> Result<ArtifactRecord> {
    let mut record = ArtifactRecord::for_package(package);
    for store in stores {
        tracing::debug!(store = %store.describe(), run_id = %package.run_id, "storing artifact");
        store.store(package, &mut record)?;
    }
    Ok(record)
}

/// Stored records, newest first. A store that does not exist yet is empty.
pub fn list(store_root: &Path, name: Option<&str>) -> Result<Vec<ArtifactRecord>> {
    if !store_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    let read = |dir: &Path| {
        fs::read_dir(dir)
            .map_err(|e| Error::internal_io(e.to_string(), Some(format!("read {}", dir.display()))))
    };

    for name_entry in read(store_root)?.flatten() {
        let name_dir = name_entry.path();
        if !name_dir.is_dir() {
            continue;
        }
        if let Some(wanted) = name {
            if name_entry.file_name().to_string_lossy() != wanted {
                continue;
            }
        }
        for run_entry in read(&name_dir)?.flatten() {
            let record_path = run_entry.path().join(RECORD_FILE);
            let Ok(content) = fs::read_to_string(&record_path) else {
                continue;
            };
            let record: ArtifactRecord = serde_json::from_str(&content).map_err(|e| {
                Error::internal_json(e.to_string(), Some(record_path.to_string_lossy().to_string()))
            })?;
            records.push(record);
        }
    }

    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.run_id.cmp(&b.run_id))
    });
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("_static")).unwrap();
        fs::write(dir.path().join("index.html"), "<html>index</html>").unwrap();
        fs::write(dir.path().join("_static/style.css"), "body {}").unwrap();
        dir
    }

    #[test]
    fn package_is_deterministic() {
        let dir = site();
        let a = package(dir.path(), "adapt", "run-a").unwrap();
        let b = package(dir.path(), "adapt", "run-b").unwrap();
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.files, 2);
        assert_eq!(a.content_bytes, 25);
        assert_eq!(a.file_name, "adapt.zip");
    }

    #[test]
    fn package_contains_relative_entries() {
        let dir = site();
        let pkg = package(dir.path(), "adapt", "run").unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(pkg.data)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["_static/", "_static/style.css", "index.html"]);

        let mut index = String::new();
        archive
            .by_name("index.html")
            .unwrap()
            .read_to_string(&mut index)
            .unwrap();
        assert_eq!(index, "<html>index</html>");
    }

    #[test]
    fn local_store_keeps_each_run_separately() {
        let dir = site();
        let store_dir = TempDir::new().unwrap();
        let stores: Vec<Box<dyn ArtifactStore>> =
            vec![Box::new(LocalArtifactStore::new(store_dir.path()))];

        let first = publish(&package(dir.path(), "adapt", &new_run_id()).unwrap(), &stores).unwrap();
        let second = publish(&package(dir.path(), "adapt", &new_run_id()).unwrap(), &stores).unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_ne!(first.path, second.path);
        assert!(Path::new(first.path.as_deref().unwrap()).exists());
        assert!(Path::new(second.path.as_deref().unwrap()).exists());

        let listed = list(store_dir.path(), Some("adapt")).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);
        assert!(list(store_dir.path(), Some("other")).unwrap().is_empty());
    }

    #[test]
    fn local_store_refuses_to_overwrite_a_run() {
        let dir = site();
        let store_dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(store_dir.path());
        let pkg = package(dir.path(), "adapt", "fixed-run").unwrap();

        let mut record = ArtifactRecord::for_package(&pkg);
        store.store(&pkg, &mut record).unwrap();
        let err = store.store(&pkg, &mut record).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::PublishArtifactFailed);
    }

    #[test]
    fn list_of_missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(list(&dir.path().join("nothing"), None).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn package_skips_symlinks() {
        let dir = site();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "private").unwrap();
        std::os::unix::fs::symlink(".", dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();

        let pkg = package(dir.path(), "adapt", "run").unwrap();
        assert_eq!(pkg.files, 2);
        let archive = zip::ZipArchive::new(Cursor::new(pkg.data)).unwrap();
        assert!(archive
            .file_names()
            .all(|n| !n.starts_with("loop") && !n.starts_with("linked")));
    }

    #[test]
    fn package_of_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        assert!(package(&dir.path().join("html"), "adapt", "run").is_err());
    }

    mod http {
        use super::*;
        use std::io::{BufRead, BufReader, Read, Write};
        use std::net::TcpListener;
        use std::thread;

        /// Accept one request, answer with `status`, return the request head.
        fn one_shot_server(status: &'static str) -> (String, thread::JoinHandle<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let handle = thread::spawn(move || {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut head = String::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = v.trim().parse().unwrap();
                    }
                    head.push_str(&line);
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).unwrap();
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                stream.write_all(response.as_bytes()).unwrap();
                head
            });
            (format!("http://{}", addr), handle)
        }

        #[test]
        fn http_store_puts_archive_with_token() {
            let (base, server) = one_shot_server("201 Created");
            let dir = site();
            let pkg = package(dir.path(), "adapt", "run-1").unwrap();
            let store = HttpArtifactStore::new(&format!("{}/uploads/", base), Some("s3cret".into())).unwrap();

            let mut record = ArtifactRecord::for_package(&pkg);
            store.store(&pkg, &mut record).unwrap();

            let head = server.join().unwrap();
            assert!(head.starts_with("PUT /uploads/adapt/run-1/adapt.zip HTTP/1.1"));
            assert!(head.to_ascii_lowercase().contains("authorization: bearer s3cret"));
            assert_eq!(
                record.url.as_deref(),
                Some(format!("{}/uploads/adapt/run-1/adapt.zip", base).as_str())
            );
        }

        #[test]
        fn http_store_failure_status_is_publish_error() {
            let (base, server) = one_shot_server("500 Internal Server Error");
            let dir = site();
            let pkg = package(dir.path(), "adapt", "run-2").unwrap();
            let store = HttpArtifactStore::new(&base, None).unwrap();

            let mut record = ArtifactRecord::for_package(&pkg);
            let err = store.store(&pkg, &mut record).unwrap_err();
            server.join().unwrap();
            assert_eq!(err.code, crate::ErrorCode::PublishArtifactFailed);
            assert_eq!(err.retryable, Some(true));
            assert!(record.url.is_none());
        }

        #[test]
        fn http_store_rejection_is_not_retryable() {
            let (base, server) = one_shot_server("403 Forbidden");
            let dir = site();
            let pkg = package(dir.path(), "adapt", "run-3").unwrap();
            let store = HttpArtifactStore::new(&base, Some("wrong".into())).unwrap();

            let mut record = ArtifactRecord::for_package(&pkg);
            let err = store.store(&pkg, &mut record).unwrap_err();
            server.join().unwrap();
            assert_eq!(err.retryable, Some(false));
        }

        #[test]
        fn http_store_unreachable_is_retryable() {
            // Bind then drop, so nothing is listening on the port.
            let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
            let dir = site();
            let pkg = package(dir.path(), "adapt", "run-4").unwrap();
            let store = HttpArtifactStore::new(&format!("http://{}", addr), None).unwrap();

            let mut record = ArtifactRecord::for_package(&pkg);
            let err = store.store(&pkg, &mut record).unwrap_err();
            assert_eq!(err.code, crate::ErrorCode::PublishArtifactFailed);
            assert_eq!(err.retryable, Some(true));
        }
    }
}

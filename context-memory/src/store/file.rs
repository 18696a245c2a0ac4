//! File-backed context storage
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<project_key>/<ai>.json          current record
//! <root>/<project_key>/<ai>.json.corrupt-*  quarantined records
//! <root>/.locks/<project_key>/<ai>.lock    advisory lock files
//! ```
//!
//! Every write replaces the record through a temp file and a rename in the
//! same directory, so readers see either the old or the new file.
//!
//! Lock files are removed together with their record. A lease holder checks
//! after `flock` returns that the path still names the file it locked, and
//! starts over otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::errors::{ContextError, Result};
use crate::message::{ContextRecord, Message};
use crate::project::{AiName, ContextKey, ProjectKey};

use super::run_blocking;
use super::traits::{AiSummary, BackendKind, ContextStore, ContextUpdate, StoreLease};

const RECORD_EXT: &str = "json";
const LOCKS_DIR: &str = ".locks";

/// Records written before the owner header existed were bare message arrays.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Record(ContextRecord),
    Messages(Vec<Message>),
}

/// File-backed implementation of ContextStore
#[derive(Debug, Clone)]
pub struct FileContextStore {
    root: PathBuf,
}

impl FileContextStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| ContextError::storage("create root", e))?;
        info!("Initialized file context store at {}", root.display());
        Ok(Self { root })
    }

    /// The root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project: &ProjectKey) -> PathBuf {
        self.root.join(project.as_str())
    }

    /// Path of the record file for `key`
    pub fn record_path(&self, key: &ContextKey) -> PathBuf {
        self.project_dir(&key.project)
            .join(format!("{}.{RECORD_EXT}", key.ai))
    }

    fn lock_path(&self, key: &ContextKey) -> PathBuf {
        self.root
            .join(LOCKS_DIR)
            .join(key.project.as_str())
            .join(format!("{}.lock", key.ai))
    }
}

fn read_messages(path: &Path, key: &ContextKey) -> Result<Vec<Message>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ContextError::storage("read", e)),
    };
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let stored: StoredRecord = serde_json::from_slice(&data)
        .map_err(|e| ContextError::corrupt(path.display(), e))?;
    match stored {
        StoredRecord::Record(record) => {
            if record.project != key.project || record.ai != key.ai {
                return Err(ContextError::corrupt(
                    path.display(),
                    format!("record belongs to {}/{}", record.project, record.ai),
                ));
            }
            Ok(record.messages)
        },
        StoredRecord::Messages(messages) => Ok(messages),
    }
}

/// A concurrent delete may remove an empty project directory between
/// `create_dir_all` and the temp file creation, so retry once.
fn create_temp_in(dir: &Path) -> std::io::Result<NamedTempFile> {
    fs::create_dir_all(dir)?;
    match NamedTempFile::new_in(dir) {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(dir)?;
            NamedTempFile::new_in(dir)
        },
        other => other,
    }
}

fn write_record(path: &Path, record: &ContextRecord) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ContextError::storage("write", "record path has no parent"))?;
    let mut temp = create_temp_in(dir).map_err(|e| ContextError::storage("write", e))?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, record)
            .map_err(|e| ContextError::storage("serialize", e))?;
        writer.flush().map_err(|e| ContextError::storage("write", e))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| ContextError::storage("sync", e))?;
    temp.persist(path)
        .map_err(|e| ContextError::storage("rename", e.error))?;
    Ok(())
}

#[cfg(unix)]
fn lock_exclusive(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsRawFd;

    loop {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // A concurrent delete may remove the lock directory after it was created.
        let file = match OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        // SAFETY: the descriptor stays valid for as long as `file` lives.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        let held = file.metadata()?;
        match fs::metadata(path) {
            Ok(current) if current.dev() == held.dev() && current.ino() == held.ino() => {
                return Ok(file);
            },
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => return Err(e),
        }
        debug!("Lock file {} was replaced while waiting, retrying", path.display());
    }
}

/// Remove the record and its lock file. The caller holds the lease.
fn remove_record(path: &Path, lock_path: &Path) -> std::io::Result<bool> {
    let removed = match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };
    match fs::remove_file(lock_path) {
        Ok(()) => {},
        Err(e) if e.kind() == ErrorKind::NotFound => {},
        Err(e) => return Err(e),
    }
    if let Some(dir) = path.parent() {
        remove_dir_if_empty(dir);
    }
    if let Some(dir) = lock_path.parent() {
        remove_dir_if_empty(dir);
    }
    Ok(removed)
}

fn modified_at(path: &Path) -> std::io::Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(fs::metadata(path)?.modified()?))
}

fn summarize_record(path: &Path, key: &ContextKey) -> Result<Option<AiSummary>> {
    let messages = match read_messages(path, key) {
        Ok(messages) => messages,
        Err(e) if e.is_corrupt() => {
            warn!("Skipping unreadable record in summary: {}", e);
            return Ok(None);
        },
        Err(e) => return Err(e),
    };
    let updated_at = match modified_at(path) {
        Ok(ts) => ts,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ContextError::storage("summarize", e)),
    };
    Ok(Some(AiSummary {
        ai: key.ai.clone(),
        message_count: messages.len(),
        updated_at,
    }))
}

fn remove_dir_if_empty(dir: &Path) {
    // Fails harmlessly while other records remain.
    let _ = fs::remove_dir(dir);
}

fn record_files(project_dir: &Path) -> std::io::Result<Vec<(AiName, PathBuf)>> {
    let entries = match fs::read_dir(project_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        if let Ok(ai) = AiName::parse(stem)
            && ai.as_str() == stem
        {
            files.push((ai, path));
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl ContextStore for FileContextStore {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn read(&self, key: &ContextKey, window: usize) -> Result<Vec<Message>> {
        let path = self.record_path(key);
        let owner = key.clone();
        let mut messages = run_blocking("read", move || read_messages(&path, &owner)).await?;
        if messages.len() > window {
            messages.drain(..messages.len() - window);
        }
        debug!("Read {} messages for {}", messages.len(), key);
        Ok(messages)
    }

    async fn write(&self, key: &ContextKey, update: &ContextUpdate) -> Result<()> {
        let path = self.record_path(key);
        let record = ContextRecord {
            project: key.project.clone(),
            ai: key.ai.clone(),
            updated_at: Utc::now(),
            messages: update.retained.clone(),
        };
        run_blocking("write", move || write_record(&path, &record)).await?;
        debug!(
            "Wrote {} messages for {} ({} new)",
            update.retained.len(),
            key,
            update.appended.len()
        );
        Ok(())
    }

    async fn delete(&self, key: &ContextKey) -> Result<bool> {
        let path = self.record_path(key);
        let lock_path = self.lock_path(key);
        run_blocking("delete", move || {
            remove_record(&path, &lock_path).map_err(|e| ContextError::storage("delete", e))
        })
        .await
    }

    #[cfg(unix)]
    async fn lease(&self, key: &ContextKey) -> Result<StoreLease> {
        let path = self.lock_path(key);
        let file = run_blocking("lock", move || {
            lock_exclusive(&path).map_err(|e| ContextError::storage("lock", e))
        })
        .await?;
        Ok(StoreLease::from_file(file))
    }

    async fn quarantine(&self, key: &ContextKey) -> Result<()> {
        let path = self.record_path(key);
        let backup = path.with_extension(format!(
            "{RECORD_EXT}.corrupt-{}",
            Utc::now().format("%Y%m%dT%H%M%S%3fZ")
        ));
        let moved = run_blocking("quarantine", {
            let backup = backup.clone();
            move || match fs::rename(&path, &backup) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(ContextError::storage("quarantine", e)),
            }
        })
        .await?;
        if moved {
            warn!("Moved corrupt record for {} to {}", key, backup.display());
        }
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectKey>> {
        let root = self.root.clone();
        run_blocking("list projects", move || {
            let entries = match fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(ContextError::storage("list projects", e)),
            };
            let mut projects = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| ContextError::storage("list projects", e))?;
                if !entry.path().is_dir() {
                    continue;
                }
                if let Some(key) = entry.file_name().to_str().and_then(ProjectKey::parse) {
                    projects.push(key);
                }
            }
            projects.sort();
            Ok(projects)
        })
        .await
    }

    async fn list_ais(&self, project: &ProjectKey) -> Result<Vec<AiName>> {
        let dir = self.project_dir(project);
        run_blocking("list ais", move || {
            record_files(&dir)
                .map(|files| files.into_iter().map(|(ai, _)| ai).collect())
                .map_err(|e| ContextError::storage("list ais", e))
        })
        .await
    }

    async fn summarize(&self, project: &ProjectKey) -> Result<Vec<AiSummary>> {
        let dir = self.project_dir(project);
        let project = project.clone();
        run_blocking("summarize", move || {
            let files = record_files(&dir).map_err(|e| ContextError::storage("summarize", e))?;
            let mut summaries = Vec::new();
            for (ai, path) in files {
                let key = ContextKey::new(project.clone(), ai);
                if let Some(summary) = summarize_record(&path, &key)? {
                    summaries.push(summary);
                }
            }
            summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.ai.cmp(&b.ai)));
            Ok(summaries)
        })
        .await
    }

    async fn stale_keys(&self, cutoff: DateTime<Utc>) -> Result<Vec<ContextKey>> {
        let projects = self.list_projects().await?;
        let root = self.root.clone();

        run_blocking("list stale", move || {
            let mut stale = Vec::new();
            for project in projects {
                let files = record_files(&root.join(project.as_str()))
                    .map_err(|e| ContextError::storage("list stale", e))?;
                for (ai, path) in files {
                    match modified_at(&path) {
                        Ok(modified) if modified < cutoff => {
                            stale.push(ContextKey::new(project.clone(), ai));
                        },
                        Ok(_) => {},
                        Err(e) if e.kind() == ErrorKind::NotFound => {},
                        Err(e) => return Err(ContextError::storage("list stale", e)),
                    }
                }
            }
            Ok(stale)
        })
        .await
    }

    async fn delete_if_stale(&self, key: &ContextKey, cutoff: DateTime<Utc>) -> Result<bool> {
        let path = self.record_path(key);
        let lock_path = self.lock_path(key);
        let removed = run_blocking("purge", move || {
            match modified_at(&path) {
                Ok(modified) if modified < cutoff => {},
                Ok(_) => return Ok(false),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(ContextError::storage("purge", e)),
            }
            remove_record(&path, &lock_path).map_err(|e| ContextError::storage("purge", e))
        })
        .await?;

        if removed {
            info!("Purged stale context file for {}", key);
        }
        Ok(removed)
    }

    async fn health(&self) -> Result<()> {
        let root = self.root.clone();
        run_blocking("health", move || match fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(ContextError::storage("health", "root is not a directory")),
            Err(e) => Err(ContextError::storage("health", e)),
        })
        .await
    }
}

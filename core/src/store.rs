//! File access for the engine.
//!
//! All paths are repository-relative and `/`-separated. `FsStore` maps them
//! under a root directory; `MemoryStore` keeps them in a map for tests and
//! dry runs.
//!
//! Ticket rewrites use the temp-file + fsync + rename pattern so a reader
//! never sees a partially written ticket. Log appends open in append mode
//! and never truncate.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, TicketsError};

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

pub trait TicketStore {
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    fn exists(&self, path: &str) -> bool;

    /// Children of `path`, sorted by name. A missing directory lists empty.
    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Replace one file atomically.
    fn write_atomic(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Replace several files as one staged transaction: every new content
    /// is staged before any target is replaced, and a failed replacement
    /// puts back the files already replaced.
    fn commit(&self, files: &BTreeMap<String, Vec<u8>>) -> Result<()>;

    /// Append `line` plus a newline, creating the file and its parents.
    /// Existing bytes are never modified; a file whose last byte is not a
    /// newline gets one first so the new entry starts on its own line.
    fn append_line(&self, path: &str, line: &str) -> Result<()>;
}

fn check_line(path: &str, line: &str) -> Result<()> {
    if line.contains('\n') || line.contains('\r') {
        return Err(TicketsError::InvalidLogEntry(format!(
            "entry for {path} spans more than one line"
        )));
    }
    Ok(())
}

// ============================================================================
// Filesystem
// ============================================================================

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    fn ensure_parent(target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| TicketsError::DirectoryCreate {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Hidden sibling of `target` owned by this process.
    fn sibling(target: &Path, suffix: &str) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{name}.{}.{suffix}", std::process::id()))
    }

    /// Write `bytes` to a sibling temp file and fsync it. Returns the temp
    /// path for the caller to rename.
    fn stage(target: &Path, bytes: &[u8]) -> Result<PathBuf> {
        Self::ensure_parent(target)?;
        let temp = Self::sibling(target, "tmp");

        let write = |temp: &Path| -> std::io::Result<()> {
            let mut file = File::create(temp)?;
            file.write_all(bytes)?;
            file.sync_all()
        };
        write(&temp).map_err(|e| {
            let _ = fs::remove_file(&temp);
            TicketsError::FileWrite {
                path: temp.clone(),
                source: e,
            }
        })?;
        Ok(temp)
    }

    /// Copy of the current file beside it, when there is one.
    fn backup(target: &Path) -> Result<Option<PathBuf>> {
        if !target.is_file() {
            return Ok(None);
        }
        let backup = Self::sibling(target, "bak");
        fs::copy(target, &backup).map_err(|e| TicketsError::FileWrite {
            path: backup.clone(),
            source: e,
        })?;
        Ok(Some(backup))
    }

    /// Undo the first `done` renames of a failed commit and drop every
    /// leftover temp and backup file.
    fn roll_back(staged: &[(PathBuf, PathBuf)], backups: &[Option<PathBuf>], done: usize) {
        for (idx, (temp, target)) in staged.iter().enumerate() {
            let backup = backups.get(idx).and_then(Option::as_ref);
            if idx < done {
                let restored = match backup {
                    Some(backup) => fs::rename(backup, target),
                    None => fs::remove_file(target),
                };
                if let Err(e) = restored {
                    tracing::error!(path = %target.display(), error = %e, "could not roll back");
                }
            } else {
                let _ = fs::remove_file(temp);
                if let Some(backup) = backup {
                    let _ = fs::remove_file(backup);
                }
            }
        }
    }
}

impl TicketStore for FsStore {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        fs::read(&full).map_err(|e| TicketsError::FileRead {
            path: full,
            source: e,
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let full = self.resolve(path);
        let reader = match fs::read_dir(&full) {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TicketsError::DirectoryRead {
                    path: full,
                    source: e,
                });
            }
        };
        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|e| TicketsError::DirectoryRead {
                path: full.clone(),
                source: e,
            })?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn write_atomic(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path);
        let temp = Self::stage(&target, bytes)?;
        fs::rename(&temp, &target).map_err(|e| {
            let _ = fs::remove_file(&temp);
            TicketsError::FileWrite {
                path: target.clone(),
                source: e,
            }
        })
    }

    fn commit(&self, files: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len());
        let mut backups: Vec<Option<PathBuf>> = Vec::with_capacity(files.len());
        for (path, bytes) in files {
            let target = self.resolve(path);
            let prepared = Self::stage(&target, bytes).and_then(|temp| {
                staged.push((temp, target.clone()));
                Self::backup(&target)
            });
            match prepared {
                Ok(backup) => backups.push(backup),
                Err(e) => {
                    Self::roll_back(&staged, &backups, 0);
                    return Err(e);
                }
            }
        }

        for (idx, (temp, target)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(temp, target) {
                tracing::warn!(path = %target.display(), error = %e, "commit failed, rolling back");
                Self::roll_back(&staged, &backups, idx);
                return Err(TicketsError::FileWrite {
                    path: target.clone(),
                    source: e,
                });
            }
        }
        for backup in backups.iter().flatten() {
            let _ = fs::remove_file(backup);
        }
        tracing::debug!(files = files.len(), "committed ticket rewrites");
        Ok(())
    }

    fn append_line(&self, path: &str, line: &str) -> Result<()> {
        check_line(path, line)?;
        let target = self.resolve(path);
        Self::ensure_parent(&target)?;

        let io_err = |e| TicketsError::FileWrite {
            path: target.clone(),
            source: e,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&target)
            .map_err(io_err)?;

        let mut record = String::with_capacity(line.len() + 2);
        let len = file.metadata().map_err(io_err)?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1)).map_err(io_err)?;
            file.read_exact(&mut last).map_err(io_err)?;
            if last[0] != b'\n' {
                record.push('\n');
            }
        }
        record.push_str(line);
        record.push('\n');

        file.write_all(record.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)
    }
}

// ============================================================================
// In memory
// ============================================================================

/// Map-backed store. Directories are implied by file paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, P, B>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<String>,
        B: Into<Vec<u8>>,
    {
        let map = files
            .into_iter()
            .map(|(p, b)| (p.into(), b.into()))
            .collect();
        Self {
            files: Mutex::new(map),
        }
    }

    /// Copy of every file, for assertions.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        match self.files.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

impl TicketStore for MemoryStore {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.lock()
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| TicketsError::FileRead {
                path: PathBuf::from(path),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }

    fn exists(&self, path: &str) -> bool {
        let path = normalize(path);
        let prefix = format!("{path}/");
        self.lock()
            .keys()
            .any(|k| *k == path || k.starts_with(&prefix))
    }

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = normalize(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut entries: Vec<DirEntry> = self
            .lock()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('/') {
                Some((dir, _)) => DirEntry {
                    name: dir.to_string(),
                    is_dir: true,
                },
                None => DirEntry {
                    name: rest.to_string(),
                    is_dir: false,
                },
            })
            .collect();
        entries.sort();
        entries.dedup();
        Ok(entries)
    }

    fn write_atomic(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.lock().insert(normalize(path), bytes.to_vec());
        Ok(())
    }

    fn commit(&self, files: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let mut guard = self.lock();
        for (path, bytes) in files {
            guard.insert(normalize(path), bytes.clone());
        }
        Ok(())
    }

    fn append_line(&self, path: &str, line: &str) -> Result<()> {
        check_line(path, line)?;
        let mut guard = self.lock();
        let file = guard.entry(normalize(path)).or_default();
        if file.last().is_some_and(|b| *b != b'\n') {
            file.push(b'\n');
        }
        file.extend_from_slice(line.as_bytes());
        file.push(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn fs_append_never_rewrites_prior_bytes() {
        let dir = TempDir::new().expect("tempdir");
        let store = FsStore::new(dir.path());
        let path = ".tickets/a/logs/x.jsonl";
        store.append_line(path, "{\"n\":1}").expect("append");
        let before = store.read(path).expect("read");
        store.append_line(path, "{\"n\":2}").expect("append");
        let after = store.read(path).expect("read");
        assert!(after.starts_with(&before));
        assert_eq!(after, b"{\"n\":1}\n{\"n\":2}\n".to_vec());
    }

    #[test]
    fn fs_append_after_missing_trailing_newline() {
        let dir = TempDir::new().expect("tempdir");
        let store = FsStore::new(dir.path());
        store.write_atomic("log.jsonl", b"{\"n\":1}").expect("seed");
        store.append_line("log.jsonl", "{\"n\":2}").expect("append");
        assert_eq!(store.read("log.jsonl").expect("read"), b"{\"n\":1}\n{\"n\":2}\n".to_vec());
    }

    #[test]
    fn multi_line_entries_are_refused() {
        let store = MemoryStore::new();
        let err = store.append_line("x.jsonl", "a\nb").expect_err("multi-line");
        assert!(matches!(err, TicketsError::InvalidLogEntry(_)));
        assert!(!store.exists("x.jsonl"));
    }

    #[test]
    fn fs_commit_replaces_every_file_and_leaves_no_temps() {
        let dir = TempDir::new().expect("tempdir");
        let store = FsStore::new(dir.path());
        store.write_atomic(".tickets/a/ticket.md", b"old").expect("seed");
        let files = BTreeMap::from([
            (".tickets/a/ticket.md".to_string(), b"new a".to_vec()),
            (".tickets/b/ticket.md".to_string(), b"new b".to_vec()),
        ]);
        store.commit(&files).expect("commit");
        assert_eq!(store.read(".tickets/a/ticket.md").expect("a"), b"new a".to_vec());
        assert_eq!(store.read(".tickets/b/ticket.md").expect("b"), b"new b".to_vec());
        let names: Vec<String> = store
            .list_dir(".tickets/a")
            .expect("list")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["ticket.md"]);
    }

    #[test]
    fn fs_commit_failure_restores_earlier_files() {
        let dir = TempDir::new().expect("tempdir");
        let store = FsStore::new(dir.path());
        store.write_atomic(".tickets/a/ticket.md", b"old a").expect("seed");
        std::fs::create_dir_all(dir.path().join(".tickets/b/ticket.md/occupied"))
            .expect("directory in the way");
        let files = BTreeMap::from([
            (".tickets/a/new.md".to_string(), b"created".to_vec()),
            (".tickets/a/ticket.md".to_string(), b"new a".to_vec()),
            (".tickets/b/ticket.md".to_string(), b"new b".to_vec()),
        ]);

        let err = store.commit(&files).expect_err("rename onto a directory");
        assert!(matches!(err, TicketsError::FileWrite { .. }));
        assert_eq!(store.read(".tickets/a/ticket.md").expect("a"), b"old a".to_vec());
        assert!(!store.exists(".tickets/a/new.md"));
        let leftovers = |path: &str| -> Vec<String> {
            store
                .list_dir(path)
                .expect("list")
                .into_iter()
                .map(|e| e.name)
                .collect()
        };
        assert_eq!(leftovers(".tickets/a"), vec!["ticket.md"]);
        assert_eq!(leftovers(".tickets/b"), vec!["ticket.md"]);
    }

    #[test]
    fn listing_missing_directory_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        let store = FsStore::new(dir.path());
        assert_eq!(store.list_dir(".tickets").expect("list"), Vec::new());
    }

    #[test]
    fn memory_list_dir_infers_directories() {
        let store = MemoryStore::with_files([
            (".tickets/a/ticket.md", "x"),
            (".tickets/a/logs/r.jsonl", "y"),
            (".tickets/b/ticket.md", "z"),
        ]);
        let listed = store.list_dir(".tickets/a").expect("list");
        assert_eq!(
            listed,
            vec![
                DirEntry {
                    name: "logs".into(),
                    is_dir: true
                },
                DirEntry {
                    name: "ticket.md".into(),
                    is_dir: false
                },
            ]
        );
        assert!(store.exists(".tickets/b"));
        assert!(store.read(".tickets/c/ticket.md").expect_err("missing").is_not_found());
    }
}

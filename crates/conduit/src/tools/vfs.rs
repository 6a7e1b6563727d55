//! The workspace file store the file tools operate on.
//!
//! Paths are virtual: `/docs/a.txt` always means a file under the workspace root,
//! and no path may climb out of it.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::errors::{AgentError, AgentResult};

const MAX_READ_BYTES: u64 = 1024 * 1024;
const MAX_SEARCH_HITS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub line: usize,
    pub text: String,
}

#[async_trait]
pub trait Vfs: Send + Sync {
    async fn list_dir(&self, path: &str) -> AgentResult<Vec<DirEntry>>;

    async fn read_file(&self, path: &str) -> AgentResult<String>;

    async fn write_file(&self, path: &str, contents: &str) -> AgentResult<()>;

    async fn move_path(&self, from: &str, to: &str) -> AgentResult<()>;

    async fn delete(&self, path: &str) -> AgentResult<()>;

    /// Case-insensitive line search below `path`
    async fn search(&self, query: &str, path: &str) -> AgentResult<Vec<SearchHit>>;
}

/// A [`Vfs`] backed by a directory on the local disk.
///
/// Mutations are serialized through one lock so that concurrent turns never
/// interleave partial writes.
pub struct LocalVfs {
    root: PathBuf,
    write_lock: Mutex<()>,
}

fn io_error(path: &str, error: std::io::Error) -> AgentError {
    AgentError::ExecutionError(format!("{}: {}", path, error))
}

impl LocalVfs {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a virtual path onto the disk, rejecting anything that leaves the root
    fn resolve(&self, path: &str) -> AgentResult<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path.trim()).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(AgentError::InvalidParameters(format!(
                        "Path '{}' escapes the workspace",
                        path
                    )))
                }
            }
        }
        Ok(resolved)
    }

    /// The virtual path of a location under the root
    fn virtual_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        format!("/{}", parts.join("/"))
    }

    async fn search_file(
        &self,
        file: &Path,
        needle: &str,
        hits: &mut Vec<SearchHit>,
    ) -> AgentResult<()> {
        let too_large = tokio::fs::metadata(file)
            .await
            .map(|meta| meta.len() > MAX_READ_BYTES)
            .unwrap_or(true);
        if too_large {
            return Ok(());
        }
        // Binary files are skipped
        let contents = match tokio::fs::read_to_string(file).await {
            Ok(contents) => contents,
            Err(_) => return Ok(()),
        };
        for (number, line) in contents.lines().enumerate() {
            if hits.len() >= MAX_SEARCH_HITS {
                break;
            }
            if line.to_lowercase().contains(needle) {
                hits.push(SearchHit {
                    path: self.virtual_path(file),
                    line: number + 1,
                    text: line.trim().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Vfs for LocalVfs {
    async fn list_dir(&self, path: &str) -> AgentResult<Vec<DirEntry>> {
        let dir = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(path, e))? {
            let metadata = entry.metadata().await.map_err(|e| io_error(path, e))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: self.virtual_path(&entry.path()),
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> AgentResult<String> {
        let file = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&file)
            .await
            .map_err(|e| io_error(path, e))?;
        if metadata.is_dir() {
            return Err(AgentError::InvalidParameters(format!(
                "'{}' is a directory",
                path
            )));
        }
        if metadata.len() > MAX_READ_BYTES {
            return Err(AgentError::ExecutionError(format!(
                "'{}' is too large to read ({} bytes)",
                path,
                metadata.len()
            )));
        }
        tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn write_file(&self, path: &str, contents: &str) -> AgentResult<()> {
        let file = self.resolve(path)?;
        if file == self.root {
            return Err(AgentError::InvalidParameters("A file path is required".into()));
        }
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(path, e))?;
        }
        tokio::fs::write(&file, contents)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn move_path(&self, from: &str, to: &str) -> AgentResult<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if source == self.root || target == self.root {
            return Err(AgentError::InvalidParameters(
                "The workspace root cannot be moved".into(),
            ));
        }
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(AgentError::ExecutionError(format!("'{}' already exists", to)));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(to, e))?;
        }
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| io_error(from, e))
    }

    async fn delete(&self, path: &str) -> AgentResult<()> {
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(AgentError::InvalidParameters(
                "The workspace root cannot be deleted".into(),
            ));
        }
        let _guard = self.write_lock.lock().await;
        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|e| io_error(path, e))?;
        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        removed.map_err(|e| io_error(path, e))
    }

    async fn search(&self, query: &str, path: &str) -> AgentResult<Vec<SearchHit>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(AgentError::InvalidParameters("Query must not be empty".into()));
        }

        let mut hits = Vec::new();
        let mut pending = vec![self.resolve(path)?];
        while let Some(current) = pending.pop() {
            if hits.len() >= MAX_SEARCH_HITS {
                break;
            }
            let metadata = match tokio::fs::metadata(&current).await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if metadata.is_file() {
                self.search_file(&current, &needle, &mut hits).await?;
                continue;
            }

            let mut reader = tokio::fs::read_dir(&current)
                .await
                .map_err(|e| io_error(path, e))?;
            let mut children = Vec::new();
            while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(path, e))? {
                children.push(entry.path());
            }
            // Reverse so the stack pops children in name order
            children.sort();
            pending.extend(children.into_iter().rev());
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn workspace() -> (TempDir, LocalVfs) {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("docs")).await.unwrap();
        tokio::fs::write(dir.path().join("docs/a.txt"), "Hello\nrust world\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.md"), "nothing here")
            .await
            .unwrap();
        let vfs = LocalVfs::new(dir.path());
        (dir, vfs)
    }

    #[tokio::test]
    async fn test_list_dir_directories_first() {
        let (_dir, vfs) = workspace().await;
        let entries = vfs.list_dir("/").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["docs", "notes.md"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].path, "/notes.md");
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (_dir, vfs) = workspace().await;
        let err = vfs.read_file("/docs/../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_write_move_delete() {
        let (dir, vfs) = workspace().await;
        vfs.write_file("/new/b.txt", "bee").await.unwrap();
        assert_eq!(vfs.read_file("new/b.txt").await.unwrap(), "bee");

        vfs.move_path("/new/b.txt", "/docs/b.txt").await.unwrap();
        assert!(dir.path().join("docs/b.txt").exists());
        assert!(!dir.path().join("new/b.txt").exists());

        let err = vfs.move_path("/docs/a.txt", "/docs/b.txt").await.unwrap_err();
        assert!(matches!(err, AgentError::ExecutionError(_)));

        vfs.delete("/docs").await.unwrap();
        assert!(!dir.path().join("docs").exists());
        assert!(vfs.delete("/").await.is_err());
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let (_dir, vfs) = workspace().await;
        let err = vfs.read_file("/missing.txt").await.unwrap_err();
        assert!(matches!(err, AgentError::ExecutionError(_)));
    }

    #[tokio::test]
    async fn test_search_case_insensitive() {
        let (_dir, vfs) = workspace().await;
        let hits = vfs.search("RUST", "/").await.unwrap();
        assert_eq!(
            hits,
            vec![SearchHit {
                path: "/docs/a.txt".to_string(),
                line: 2,
                text: "rust world".to_string(),
            }]
        );
    }
}

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use super::{ObjectStore, StoreError};

/// Stores each object as a file under `root`. Key separators map to
/// subdirectories.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StoreError::Configuration(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(key: &str, source: std::io::Error) -> StoreError {
    if source.kind() == ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        fs::try_exists(&path).await.map_err(|err| io_error(key, err))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.path_for(key)?;
        let data = fs::read(&path).await.map_err(|err| io_error(key, err))?;
        Ok(Bytes::from(data))
    }

    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| io_error(key, err))?;
        }
        // Write beside the target and rename so readers never see a partial file.
        let staging = path.with_extension("partial");
        fs::write(&staging, &bytes)
            .await
            .map_err(|err| io_error(key, err))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|err| io_error(key, err))
    }

    async fn list(&self, start_after: Option<&str>) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_error(&dir.display().to_string(), err)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| io_error(&dir.display().to_string(), err))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|err| io_error(&path.display().to_string(), err))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().is_some_and(|ext| ext == "partial") {
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .map(|component| component.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.retain(|key| start_after.is_none_or(|after| key.as_str() > after));
        keys.sort();
        Ok(keys)
    }

    fn location(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

use super::{format_utc, EntryKind, RemoteEntry, RemoteStorage};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::fs;

/// 把本地（或挂载的）目录当作远程端
pub struct LocalDirStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalDirStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let base_path = path.into();
        let name = format!("dir:{}", base_path.display());
        Self { base_path, name }
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

#[async_trait]
impl RemoteStorage for LocalDirStorage {
    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let full_path = self.resolve_path(dir);
        let mut read_dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| SyncError::listing(dir, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| SyncError::listing(dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            // 跟随符号链接，与 FTP 服务器的表现一致
            let metadata = match fs::metadata(entry.path()).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!("跳过无法读取元数据的条目 {}: {}", name, e);
                    continue;
                }
            };

            let kind = if metadata.is_dir() {
                EntryKind::Dir
            } else if metadata.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };

            let modify = metadata
                .modified()
                .map(|t| format_utc(DateTime::<Utc>::from(t)))
                .unwrap_or_default();

            entries.push(RemoteEntry {
                name,
                kind,
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modify,
            });
        }

        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve_path(path))
            .await
            .map_err(|e| SyncError::transfer(path, e))
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::transfer(path, e))?;
        }

        // 使用临时文件写入，然后原子重命名
        let mut temp_name = full_path.as_os_str().to_owned();
        temp_name.push(".part");
        let temp_path = PathBuf::from(temp_name);
        fs::write(&temp_path, data)
            .await
            .map_err(|e| SyncError::transfer(path, e))?;
        fs::rename(&temp_path, &full_path)
            .await
            .map_err(|e| SyncError::transfer(path, e))?;

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::transfer(path, e)),
        }
    }

    async fn check(&self) -> Result<()> {
        match fs::metadata(&self.base_path).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(SyncError::Connection {
                target: self.name.clone(),
                message: "not a directory".to_string(),
            }),
            Err(e) => Err(SyncError::Connection {
                target: self.name.clone(),
                message: e.to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

//! 下载缓存
//!
//! 把远程文件下载到本地缓存目录，供外部比较工具查看

use crate::error::{Result, SyncError};
use crate::storage::{FileRecord, RemoteStorage};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 下载缓存管理器，目录在第一次下载时才创建
pub struct DownloadCache {
    cache_dir: PathBuf,
}

impl DownloadCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// 缓存中的文件路径。`..` 段替换为 `__`，保证结果留在缓存目录内
    pub fn cache_path(&self, relative_path: &str) -> PathBuf {
        let mut path = self.cache_dir.clone();
        for part in relative_path.split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => path.push("__"),
                other => path.push(other),
            }
        }
        path
    }

    /// 下载远程文件到缓存，返回本地路径
    pub async fn fetch(&self, storage: &dyn RemoteStorage, record: &FileRecord) -> Result<PathBuf> {
        let target = self.cache_path(&record.relative_path);
        let data = storage.read(&record.full_location).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SyncError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(&target, &data)
            .await
            .map_err(|source| SyncError::Io {
                path: target.clone(),
                source,
            })?;

        debug!("已缓存 {} ({}字节)", record.full_location, data.len());
        Ok(target)
    }

    /// 清空缓存目录
    pub fn clear(&self) -> Result<()> {
        if !self.cache_dir.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(&self.cache_dir).map_err(|source| SyncError::Io {
            path: self.cache_dir.clone(),
            source,
        })?;
        info!("已清除下载缓存: {}", self.cache_dir.display());
        Ok(())
    }
}

//! 内容校验：大小相同但时间无法判定时，下载远程文件比较摘要

use crate::error::{Result, SyncError};
use crate::storage::{FileRecord, RemoteStorage};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// 判断本地与远程文件内容是否一致
#[async_trait]
pub trait ContentVerifier: Send + Sync {
    async fn same_content(&self, local: &FileRecord, remote: &FileRecord) -> Result<bool>;
}

/// 基于 BLAKE3 摘要的校验器。会把远程文件完整读入内存
pub struct DigestVerifier {
    storage: Arc<dyn RemoteStorage>,
}

impl DigestVerifier {
    pub fn new(storage: Arc<dyn RemoteStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ContentVerifier for DigestVerifier {
    async fn same_content(&self, local: &FileRecord, remote: &FileRecord) -> Result<bool> {
        let local_data = tokio::fs::read(&local.full_location)
            .await
            .map_err(|source| SyncError::Io {
                path: PathBuf::from(&local.full_location),
                source,
            })?;
        let remote_data = self.storage.read(&remote.full_location).await?;

        if local_data.len() != remote_data.len() {
            return Ok(false);
        }

        let same = calculate_hash(&local_data) == calculate_hash(&remote_data);
        debug!(
            "内容校验 {}: {}",
            local.relative_path,
            if same { "一致" } else { "不同" }
        );
        Ok(same)
    }
}

/// 计算内容摘要（BLAKE3，十六进制）
pub fn calculate_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

//! 远程文件清单：按远程规格列目录，生成与本地相同结构的清单

use crate::error::{Result, SyncError};
use crate::storage::{
    join_posix, normalize_posix, relative_posix, EntryKind, FileRecord, Inventory, RemoteEntry,
    RemoteStorage,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// 列目录方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingMode {
    /// 只列当前目录下的文件（`/*`）
    #[default]
    Flat,
    /// 递归列出所有子目录（`/**`）
    Recursive,
}

/// 远程规格中的一段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSegment {
    pub directory: String,
    pub mode: ListingMode,
}

impl RemoteSegment {
    fn parse(text: &str, default_mode: ListingMode) -> Self {
        let text = text.trim();
        let (stripped, mode) = if let Some(s) = text.strip_suffix("/**") {
            (s, ListingMode::Recursive)
        } else if let Some(s) = text.strip_suffix("/*") {
            (s, ListingMode::Flat)
        } else if text == "**" {
            ("", ListingMode::Recursive)
        } else if text == "*" {
            ("", ListingMode::Flat)
        } else {
            (text, default_mode)
        };

        let directory = if stripped.is_empty() {
            "/".to_string()
        } else {
            normalize_posix(stripped)
        };

        Self { directory, mode }
    }
}

/// 远程规格：多段共享同一个基准目录（第一段去掉通配后缀）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub base: String,
    pub segments: Vec<RemoteSegment>,
}

impl RemoteSpec {
    /// 解析 `|` 分隔的远程规格，没有后缀的段不递归
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_default(text, ListingMode::Flat)
    }

    pub fn parse_with_default(text: &str, default_mode: ListingMode) -> Result<Self> {
        let segments: Vec<RemoteSegment> = text
            .split('|')
            .filter(|s| !s.trim().is_empty())
            .map(|s| RemoteSegment::parse(s, default_mode))
            .collect();

        let base = segments
            .first()
            .map(|s| s.directory.clone())
            .ok_or_else(|| SyncError::Config("remote spec is empty".to_string()))?;

        Ok(Self { base, segments })
    }
}

/// 远程扫描器
pub struct RemoteScanner {
    max_concurrent: usize,
}

impl RemoteScanner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// 并发列出各段，再按段的顺序合并（后面的段覆盖前面的）
    pub async fn build(
        &self,
        storage: Arc<dyn RemoteStorage>,
        spec: &RemoteSpec,
    ) -> Result<Inventory> {
        info!(
            "开始扫描远程存储: {}, 基准目录 {} ({} 段)",
            storage.name(),
            spec.base,
            spec.segments.len()
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();

        for segment in spec.segments.clone() {
            let semaphore = semaphore.clone();
            let storage = storage.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| SyncError::listing(&segment.directory, e))?;
                Self::list_segment(storage.as_ref(), &segment).await
            }));
        }

        let mut inventory = Inventory::new();
        let mut handles = handles.into_iter();
        while let Some(handle) = handles.next() {
            let listed = match handle.await {
                Ok(Ok(files)) => files,
                Ok(Err(e)) => {
                    handles.by_ref().for_each(|h| h.abort());
                    return Err(e);
                }
                Err(e) => {
                    handles.by_ref().for_each(|h| h.abort());
                    return Err(SyncError::listing(&spec.base, e));
                }
            };

            for (full_path, entry) in listed {
                let relative_path = relative_posix(&full_path, &spec.base);
                inventory.insert(
                    relative_path.clone(),
                    FileRecord {
                        relative_path,
                        size: entry.size,
                        modify: entry.modify,
                        full_location: full_path,
                    },
                );
            }
        }

        info!("远程扫描完成: {} 个文件", inventory.len());
        Ok(inventory)
    }

    /// 列出一段下的文件；递归模式用显式栈做深度优先遍历
    pub async fn list_segment(
        storage: &dyn RemoteStorage,
        segment: &RemoteSegment,
    ) -> Result<Vec<(String, RemoteEntry)>> {
        let recursive = segment.mode == ListingMode::Recursive;
        let mut files = Vec::new();
        let mut pending = vec![segment.directory.clone()];

        while let Some(dir) = pending.pop() {
            let entries = storage.list_dir(&dir).await?;
            debug!("列出 {}: {} 项", dir, entries.len());

            let mut subdirs = Vec::new();
            for entry in entries {
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                let full_path = join_posix(&dir, &entry.name);
                match entry.kind {
                    EntryKind::File => files.push((full_path, entry)),
                    EntryKind::Dir if recursive => subdirs.push(full_path),
                    _ => {}
                }
            }

            // 逆序入栈，出栈顺序与列表顺序一致
            pending.extend(subdirs.into_iter().rev());
        }

        Ok(files)
    }
}

impl Default for RemoteScanner {
    fn default() -> Self {
        Self::new(4)
    }
}

use crate::core::scanner::TimestampZone;
use crate::core::verifier::ContentVerifier;
use crate::storage::{FileRecord, Inventory};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use tracing::{debug, info, warn};

/// 大小相同、本地时间较新时如何判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparePolicy {
    /// 只看大小和时间：本地较新即视为不同步
    TimestampOnly,
    /// 本地较新时下载远程内容比较摘要
    #[default]
    VerifyOnSizeTie,
}

/// 比较配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareConfig {
    #[serde(default)]
    pub policy: ComparePolicy,
    /// 超过此大小（字节）的文件不做内容校验，0 表示不限制
    #[serde(default)]
    pub verify_max_bytes: u64,
    /// 同时进行的内容校验数
    #[serde(default = "default_max_concurrent_verify")]
    pub max_concurrent_verify: usize,
    /// 本地修改时间的时区
    #[serde(default)]
    pub timestamp_zone: TimestampZone,
}

fn default_max_concurrent_verify() -> usize {
    4
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            policy: ComparePolicy::default(),
            verify_max_bytes: 0,
            max_concurrent_verify: default_max_concurrent_verify(),
            timestamp_zone: TimestampZone::default(),
        }
    }
}

/// 两边都存在的文件的比较结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRelation {
    InSync,
    OffSync,
    /// 需要内容校验才能判定
    Ambiguous,
}

/// 差异报告
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferenceReport {
    /// 仅本地存在
    pub missing: Vec<String>,
    /// 仅远程存在
    pub extra: Vec<String>,
    /// 两边都有但内容不同
    pub off_sync: Vec<String>,
    pub local: Inventory,
    pub remote: Inventory,
}

impl DifferenceReport {
    pub fn is_up_to_date(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.off_sync.is_empty()
    }

    /// 输出文本报告
    pub fn write_report<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.is_up_to_date() {
            writeln!(w, "Remote is up to date")?;
            return Ok(());
        }

        let mut first = true;
        let mut heading = |w: &mut W, title: &str| -> io::Result<()> {
            if !first {
                writeln!(w)?;
            }
            first = false;
            writeln!(w, "{}", title)
        };

        if !self.missing.is_empty() {
            heading(w, "Missing")?;
            for path in &self.missing {
                writeln!(w, "    {}", path)?;
            }
        }

        if !self.extra.is_empty() {
            heading(w, "Extra")?;
            for path in &self.extra {
                writeln!(w, "    {}", path)?;
            }
        }

        if !self.off_sync.is_empty() {
            heading(w, "Off sync")?;
            for path in &self.off_sync {
                match (self.local.get(path), self.remote.get(path)) {
                    (Some(loc), Some(rem)) => writeln!(
                        w,
                        "    {} (size: {} --> {}, {} --> {})",
                        path, loc.size, rem.size, loc.modify, rem.modify
                    )?,
                    _ => writeln!(w, "    {}", path)?,
                }
            }
        }

        Ok(())
    }

    pub fn to_text(&self) -> String {
        let mut buf = Vec::new();
        // 写入 Vec 不会失败
        let _ = self.write_report(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// 文件比较器
pub struct FileComparator {
    config: CompareConfig,
}

impl FileComparator {
    pub fn new(config: CompareConfig) -> Self {
        Self { config }
    }

    /// 比较两边都存在的文件（不做 I/O）
    pub fn classify(&self, local: &FileRecord, remote: &FileRecord) -> FileRelation {
        // 大小不同，肯定不同
        if local.size != remote.size {
            debug!(
                "文件大小不同: {} (local={}, remote={})",
                local.relative_path, local.size, remote.size
            );
            return FileRelation::OffSync;
        }

        // 定长时间串，字符串比较即时间比较
        if local.modify <= remote.modify {
            return FileRelation::InSync;
        }

        match self.config.policy {
            ComparePolicy::TimestampOnly => FileRelation::OffSync,
            ComparePolicy::VerifyOnSizeTie => {
                if self.config.verify_max_bytes > 0 && local.size > self.config.verify_max_bytes {
                    debug!("文件过大，跳过内容校验: {}", local.relative_path);
                    FileRelation::OffSync
                } else {
                    FileRelation::Ambiguous
                }
            }
        }
    }

    /// 计算差异。输出按相对路径排序
    pub async fn compare(
        &self,
        local: Inventory,
        remote: Inventory,
        verifier: Option<&dyn ContentVerifier>,
    ) -> DifferenceReport {
        let mut missing = Vec::new();
        let mut off_sync = Vec::new();
        let mut ambiguous = Vec::new();

        for (path, loc) in &local {
            match remote.get(path) {
                None => missing.push(path.clone()),
                Some(rem) => match self.classify(loc, rem) {
                    FileRelation::InSync => {}
                    FileRelation::OffSync => off_sync.push(path.clone()),
                    FileRelation::Ambiguous => ambiguous.push((loc, rem)),
                },
            }
        }

        let extra: Vec<String> = remote
            .keys()
            .filter(|path| !local.contains_key(*path))
            .cloned()
            .collect();

        if !ambiguous.is_empty() {
            match verifier {
                Some(verifier) => {
                    debug!("校验 {} 个文件的内容...", ambiguous.len());
                    let results: Vec<(String, bool)> = futures::stream::iter(ambiguous)
                        .map(|(loc, rem)| async move {
                            let same = match verifier.same_content(loc, rem).await {
                                Ok(same) => same,
                                Err(e) => {
                                    warn!("内容校验失败，按不同步处理: {}", e);
                                    false
                                }
                            };
                            (loc.relative_path.clone(), same)
                        })
                        .buffer_unordered(self.config.max_concurrent_verify.max(1))
                        .collect()
                        .await;

                    off_sync.extend(
                        results
                            .into_iter()
                            .filter(|(_, same)| !same)
                            .map(|(path, _)| path),
                    );
                }
                None => off_sync.extend(ambiguous.iter().map(|(loc, _)| loc.relative_path.clone())),
            }
            off_sync.sort();
        }

        info!(
            "比较完成: 缺失 {}, 多余 {}, 不同步 {}",
            missing.len(),
            extra.len(),
            off_sync.len()
        );

        DifferenceReport {
            missing,
            extra,
            off_sync,
            local,
            remote,
        }
    }
}

impl Default for FileComparator {
    fn default() -> Self {
        Self::new(CompareConfig::default())
    }
}

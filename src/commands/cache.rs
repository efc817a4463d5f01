//! 缓存相关命令

use crate::config::AppConfig;
use crate::core::{DownloadCache, RemoteScanner, RemoteSpec};
use crate::storage::create_storage;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

/// 把远程文件下载到缓存目录，返回本地路径，供外部比较工具使用
pub async fn fetch(config: &AppConfig, relative_path: &str) -> Result<PathBuf> {
    let remote_spec = config
        .remote_spec
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!(super::REMOTE_SPEC_UNSET))?;
    let remote_spec = RemoteSpec::parse_with_default(remote_spec, config.remote_listing)
        .context("无效的远程规格")?;

    let storage = create_storage(&config.server)
        .await
        .context("远程存储连接失败")?;
    let remote = RemoteScanner::new(config.sync.max_concurrent_transfers)
        .build(storage.clone(), &remote_spec)
        .await
        .context("扫描远程存储失败")?;

    let relative_path = relative_path.replace('\\', "/");
    let record = remote
        .get(&relative_path)
        .ok_or_else(|| anyhow!("{} is not in the remote inventory", relative_path))?;

    let cache = DownloadCache::new(config.resolved_cache_dir());
    let path = cache
        .fetch(storage.as_ref(), record)
        .await
        .with_context(|| format!("下载失败: {}", record.full_location))?;
    Ok(path)
}

/// 清空下载缓存
pub fn clear(config: &AppConfig) -> Result<PathBuf> {
    let cache = DownloadCache::new(config.resolved_cache_dir());
    cache.clear()?;
    Ok(cache.dir().to_path_buf())
}

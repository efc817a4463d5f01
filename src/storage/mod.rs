pub mod ftp;
pub mod local;

use crate::config::{ServerConfig, ServerKind};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use ftp::FtpStorage;
pub use local::LocalDirStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- list, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 修改时间格式：定长、补零，可直接按字符串比较
pub const MODIFY_FORMAT: &str = "%Y%m%d%H%M%S";

/// 比较单元：一个文件在本地或远程的元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// 相对路径（统一使用 /）
    pub relative_path: String,
    pub size: u64,
    /// YYYYMMDDHHMMSS
    pub modify: String,
    /// 执行 I/O 用的完整路径（本地绝对路径或远程路径）
    pub full_location: String,
}

/// 相对路径 -> 文件记录。重复插入时后者覆盖前者
pub type Inventory = BTreeMap<String, FileRecord>;

/// 目录项类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// 远程目录列表中的一项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    /// 远程修改时间（UTC，YYYYMMDDHHMMSS），未知时为空串
    pub modify: String,
}

/// 远程存储抽象接口：列目录、读取、写入、删除
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// 列出目录的直接子项（不递归）
    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>>;

    /// 读取整个文件
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// 写入整个文件（覆盖）
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 删除文件
    async fn delete(&self, path: &str) -> Result<()>;

    /// 检查会话是否可用（服务器可达、凭证有效）
    async fn check(&self) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建远程存储实例
pub async fn create_storage(config: &ServerConfig) -> Result<Arc<dyn RemoteStorage>> {
    match config.kind {
        ServerKind::Ftp => {
            let host = config
                .host
                .as_deref()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| SyncError::Config("FTP server requires host".into()))?;
            let user = config.user.as_deref().unwrap_or("anonymous");
            let password = config.password.as_deref().unwrap_or("");
            tracing::info!("连接 FTP 服务器: {}:{} (用户 {})", host, config.port, user);
            let storage =
                FtpStorage::connect(host, config.port, user, password, config.root.as_deref())
                    .await?;
            Ok(Arc::new(storage) as Arc<dyn RemoteStorage>)
        }
        ServerKind::Dir => {
            let path = config
                .root
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| SyncError::Config("directory remote requires root".into()))?;
            tracing::info!("使用本地目录作为远程存储: {}", path);
            let storage = LocalDirStorage::new(path);
            storage.check().await?;
            Ok(Arc::new(storage) as Arc<dyn RemoteStorage>)
        }
    }
}

/// 把时间渲染成远程规范格式（UTC）
pub fn format_utc(time: DateTime<Utc>) -> String {
    time.format(MODIFY_FORMAT).to_string()
}

// ============ 路径工具（POSIX 语义，本地和远程共用） ============

/// 规范化路径：统一分隔符，按词法处理 `.` 和 `..`，去掉多余的 /
pub fn normalize_posix(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            p => parts.push(p),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// 拼接基准目录与相对路径
pub fn join_posix(base: &str, relative: &str) -> String {
    normalize_posix(&format!("{}/{}", base, relative))
}

/// 计算 path 相对于 base 的路径（允许出现 `..`）
pub fn relative_posix(path: &str, base: &str) -> String {
    let path = normalize_posix(path);
    let base = normalize_posix(base);

    let path_parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let base_parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty() && *p != ".").collect();

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel: Vec<&str> = Vec::new();
    rel.extend(std::iter::repeat("..").take(base_parts.len() - common));
    rel.extend(&path_parts[common..]);

    if rel.is_empty() {
        ".".to_string()
    } else {
        rel.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_posix() {
        assert_eq!(normalize_posix("/www//site/./a.txt"), "/www/site/a.txt");
        assert_eq!(normalize_posix("/www/site/../img/b.png"), "/www/img/b.png");
        assert_eq!(normalize_posix("\\www\\a.txt"), "/www/a.txt");
        assert_eq!(normalize_posix("/"), "/");
        assert_eq!(normalize_posix("/.."), "/");
        assert_eq!(normalize_posix("../x"), "../x");
    }

    #[test]
    fn test_join_posix() {
        assert_eq!(join_posix("/www", "sub\\a.txt"), "/www/sub/a.txt");
        assert_eq!(join_posix("/www/site", "../other/x"), "/www/other/x");
        assert_eq!(join_posix("/", "a.txt"), "/a.txt");
    }

    #[test]
    fn test_relative_posix() {
        assert_eq!(relative_posix("/www/site/a.txt", "/www/site"), "a.txt");
        assert_eq!(relative_posix("/www/site/img/b.png", "/www/site"), "img/b.png");
        assert_eq!(relative_posix("/www/other/x", "/www/site"), "../other/x");
        assert_eq!(relative_posix("/www/site", "/www/site"), ".");
    }
}

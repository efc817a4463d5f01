//! 应用配置模块

use crate::core::{CompareConfig, ListingMode, SpecSyntax, SyncConfig};
use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 远程端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    #[default]
    Ftp,
    /// 本地目录充当远程端
    Dir,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub kind: ServerKind,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// FTP 的根目录，或 dir 类型的目录路径
    #[serde(default)]
    pub root: Option<String>,
}

fn default_port() -> u16 {
    21
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            kind: ServerKind::default(),
            host: None,
            port: default_port(),
            user: None,
            password: None,
            root: None,
        }
    }
}

/// 完整的应用配置（config.json）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// 本地根目录
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    #[serde(default)]
    pub spec_file: Option<PathBuf>,
    #[serde(default)]
    pub spec_syntax: SpecSyntax,
    /// 远程规格，如 `/www/*|/www/img/**`
    #[serde(default)]
    pub remote_spec: Option<String>,
    /// 远程规格中没有 `/*` 或 `/**` 后缀的段如何列出
    #[serde(default)]
    pub remote_listing: ListingMode,
    #[serde(default)]
    pub compare: CompareConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// 下载缓存目录，未设置时使用系统缓存目录
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 加载配置文件。文件不存在时使用默认值，格式错误时报错
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("配置文件不存在，使用默认配置: {}", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    /// 默认配置目录
    pub fn default_dir() -> PathBuf {
        crate::dirs::config_dir()
            .map(|p| p.join("ftpsync"))
            .unwrap_or_else(|| PathBuf::from(".ftpsync"))
    }

    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.json")
    }

    /// 实际使用的下载缓存目录
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            crate::dirs::cache_dir()
                .map(|p| p.join("ftpsync"))
                .unwrap_or_else(|| std::env::temp_dir().join("ftpsync"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ComparePolicy, TimestampZone};
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::load(&temp_dir.path().join("config.json")).unwrap();

        assert_eq!(config.server.kind, ServerKind::Ftp);
        assert_eq!(config.server.port, 21);
        assert_eq!(config.spec_syntax, SpecSyntax::Tree);
        assert_eq!(config.sync.max_concurrent_transfers, 4);
        assert!(config.log.enabled);
    }

    #[test]
    fn test_full_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "server": { "kind": "ftp", "host": "ftp.example.com", "port": 2121,
                            "user": "u", "password": "p", "root": "/" },
                "localRoot": "site",
                "specFile": "site.spec",
                "specSyntax": "flat",
                "remoteSpec": "/www/*|/www/img/**",
                "remoteListing": "recursive",
                "compare": { "policy": "timestampOnly", "verifyMaxBytes": 1024,
                             "timestampZone": "utc" },
                "sync": { "maxRetries": 5 },
                "cacheDir": "/tmp/ftpsync-cache",
                "log": { "level": "debug" }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.host.as_deref(), Some("ftp.example.com"));
        assert_eq!(config.server.port, 2121);
        assert_eq!(config.local_root, Some(PathBuf::from("site")));
        assert_eq!(config.spec_syntax, SpecSyntax::Flat);
        assert_eq!(config.remote_spec.as_deref(), Some("/www/*|/www/img/**"));
        assert_eq!(config.remote_listing, ListingMode::Recursive);
        assert_eq!(config.compare.policy, ComparePolicy::TimestampOnly);
        assert_eq!(config.compare.verify_max_bytes, 1024);
        assert_eq!(config.compare.max_concurrent_verify, 4);
        assert_eq!(config.compare.timestamp_zone, TimestampZone::Utc);
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.retry_base_delay_ms, 500);
        assert_eq!(config.resolved_cache_dir(), PathBuf::from("/tmp/ftpsync-cache"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.max_size_mb, 5);
    }

    #[test]
    fn test_malformed_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ \"server\": ").unwrap();

        assert!(matches!(AppConfig::load(&path), Err(SyncError::Config(_))));
    }
}

use super::{format_utc, EntryKind, RemoteEntry, RemoteStorage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

pub struct FtpStorage {
    operator: Operator,
    name: String,
}

impl FtpStorage {
    /// 建立 FTP 会话并立即验证（不可达或认证失败返回 Connection 错误）
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        root: Option<&str>,
    ) -> Result<Self> {
        use opendal::services::Ftp;

        let endpoint = format!("ftp://{}:{}", host, port);
        let name = format!("{}{}", endpoint, root.unwrap_or(""));

        let mut builder = Ftp::default()
            .endpoint(&endpoint)
            .user(user)
            .password(password);

        if let Some(r) = root {
            builder = builder.root(r);
        }

        // 添加超时层
        let operator = Operator::new(builder)
            .map_err(|e| SyncError::Connection {
                target: name.clone(),
                message: e.to_string(),
            })?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let storage = Self { operator, name };
        storage.check().await?;
        Ok(storage)
    }

    /// opendal 的目录路径需要以 / 结尾
    fn dir_path(dir: &str) -> String {
        let trimmed = dir.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", trimmed)
        }
    }

    fn file_path(path: &str) -> String {
        path.replace('\\', "/").trim_start_matches('/').to_string()
    }
}

#[async_trait]
impl RemoteStorage for FtpStorage {
    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let dir_path = Self::dir_path(dir);

        let mut lister = self
            .operator
            .lister_with(&dir_path)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await
            .map_err(|e| SyncError::listing(dir, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = lister.try_next().await.map_err(|e| SyncError::listing(dir, e))? {
            // 部分服务会把目录自身也列出来
            if entry.path().trim_matches('/') == dir_path.trim_matches('/') {
                continue;
            }

            let name = entry.name().trim_end_matches('/').to_string();
            if name.is_empty() {
                continue;
            }

            let meta = entry.metadata();
            let kind = if meta.is_dir() {
                EntryKind::Dir
            } else if meta.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };

            entries.push(RemoteEntry {
                name,
                kind,
                size: meta.content_length(),
                modify: meta.last_modified().map(format_utc).unwrap_or_default(),
            });
        }

        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let data = self
            .operator
            .read(&Self::file_path(path))
            .await
            .map_err(|e| SyncError::transfer(path, e))?;
        Ok(data.to_vec())
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let file_path = Self::file_path(path);

        // 确保父目录存在（逐级创建，忽略已存在的错误）
        if let Some((parent, _)) = file_path.rsplit_once('/') {
            let mut current_path = String::new();
            for part in parent.split('/').filter(|s| !s.is_empty()) {
                current_path.push_str(part);
                current_path.push('/');
                let _ = self.operator.create_dir(&current_path).await;
            }
        }

        self.operator
            .write(&file_path, data)
            .await
            .map(|_| ())
            .map_err(|e| SyncError::transfer(path, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self.operator.delete(&Self::file_path(path)).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::transfer(path, e)),
        }
    }

    async fn check(&self) -> Result<()> {
        self.operator
            .list("/")
            .await
            .map(|_| ())
            .map_err(|e| SyncError::Connection {
                target: self.name.clone(),
                message: e.to_string(),
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

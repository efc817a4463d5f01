//! 错误类型
//!
//! 规格解析、连接、列目录错误会终止整次运行；单个文件的传输错误只记录到结果里。

use std::path::PathBuf;

/// 同步过程中的错误
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// 规格文件缩进或语法错误
    #[error("malformed spec at line {line}: {message}")]
    MalformedSpec { line: usize, message: String },

    /// 无法读取规格文件
    #[error("cannot read spec file {}: {source}", path.display())]
    SpecRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 无法建立远程会话（服务器不可达或认证失败）
    #[error("cannot connect to {target}: {message}")]
    Connection { target: String, message: String },

    /// 某个远程目录无法列出
    #[error("cannot list remote directory {path}: {message}")]
    Listing { path: String, message: String },

    /// 单个文件的上传/下载/删除失败
    #[error("transfer failed for {path}: {message}")]
    Transfer { path: String, message: String },

    /// 配置无效
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 本地 I/O 错误
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn transfer(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::Transfer {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn listing(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::Listing {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// 只有传输错误允许重试，认证和列目录错误不重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transfer { .. })
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

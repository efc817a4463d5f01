//! 日志模块 - 提供文件日志和大小管理功能

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "ftpsync.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否写日志文件
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level，无法识别时为 INFO
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

struct WriterState {
    file: Option<BufWriter<File>>,
    written: u64,
}

/// 带大小限制的日志写入器：超过上限时把当前文件改名为 `.old` 再重新打开
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_bytes: u64,
    state: Arc<Mutex<WriterState>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        Self::with_limit(log_dir, u64::from(max_size_mb.max(1)) * 1024 * 1024)
    }

    pub fn with_limit(log_dir: &Path, max_bytes: u64) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let file_path = log_dir.join(LOG_FILE_NAME);

        // 启动时已超限的文件先轮转
        let existing = fs::metadata(&file_path).map(|m| m.len()).unwrap_or(0);
        let written = if existing > max_bytes {
            rotate(&file_path)?;
            0
        } else {
            existing
        };

        let file = open_append(&file_path)?;
        Ok(Self {
            file_path,
            max_bytes,
            state: Arc::new(Mutex::new(WriterState {
                file: Some(file),
                written,
            })),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// ftpsync.log -> ftpsync.log.old
fn rotate(path: &Path) -> io::Result<()> {
    let backup = path.with_extension("log.old");
    if backup.exists() {
        fs::remove_file(&backup)?;
    }
    if path.exists() {
        fs::rename(path, &backup)?;
    }
    Ok(())
}

/// 单条日志的写入句柄
pub struct LogWriter {
    file_path: PathBuf,
    max_bytes: u64,
    state: Arc<Mutex<WriterState>>,
}

impl LogWriter {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        // 日志线程 panic 后仍继续写
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file_path = self.file_path.clone();
        let max_bytes = self.max_bytes;
        let mut state = self.lock();

        if state.written > 0 && state.written + buf.len() as u64 > max_bytes {
            if let Some(mut old) = state.file.take() {
                let _ = old.flush();
            }
            rotate(&file_path)?;
            state.file = Some(open_append(&file_path)?);
            state.written = 0;
        }

        let file = state
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file not available"))?;
        let n = file.write(buf)?;
        file.flush()?;
        state.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            file_path: self.file_path.clone(),
            max_bytes: self.max_bytes,
            state: self.state.clone(),
        }
    }
}

/// 初始化日志系统
///
/// 启用时写入 `log_dir/ftpsync.log`；`verbose` 时同时输出到 stderr，
/// 级别至少为 DEBUG。
/// 报告输出走 stdout，不会和日志混在一起。
pub fn init_logging(log_dir: &Path, config: &LogConfig, verbose: bool) {
    let level = if verbose {
        config.tracing_level().max(tracing::Level::DEBUG)
    } else {
        config.tracing_level()
    };

    let mut env_filter = EnvFilter::from_default_env().add_directive(level.into());
    // opendal 的请求日志太多
    if let Ok(directive) = "opendal=warn".parse::<Directive>() {
        env_filter = env_filter.add_directive(directive);
    }

    let file_layer = if config.enabled {
        match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
            Ok(writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            ),
            Err(e) => {
                eprintln!("无法创建日志文件 {}: {}", log_dir.display(), e);
                None
            }
        }
    } else {
        None
    };

    let console_layer = verbose.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

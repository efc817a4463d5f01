use crate::core::comparator::DifferenceReport;
use crate::error::{Result, SyncError};
use crate::storage::{join_posix, RemoteStorage};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// 最大并发传输数
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    /// 最大重试次数（只对传输错误重试）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 单次文件操作超时（秒）
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_max_concurrent_transfers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_operation_timeout_secs() -> u64 {
    crate::storage::IO_TIMEOUT_SECS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent_transfers(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

/// 执行阶段，按 Missing -> Extra -> OffSync 顺序执行
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Missing,
    Extra,
    OffSync,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Missing, Phase::Extra, Phase::OffSync];

    pub fn title(&self) -> &'static str {
        match self {
            Phase::Missing => "Copy missing files to server",
            Phase::Extra => "Removing extra files from server",
            Phase::OffSync => "Copy off sync files to server",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Upload,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Failed,
}

/// 计划执行的单个操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAction {
    pub phase: Phase,
    pub relative_path: String,
    pub operation: Operation,
    /// 上传时的本地源文件
    pub local_location: Option<String>,
    pub remote_location: String,
}

/// 单个文件的执行结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub relative_path: String,
    pub phase: Phase,
    pub operation: Operation,
    pub remote_location: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub bytes: u64,
    pub attempts: u32,
}

impl FileOutcome {
    fn failed(action: &PlannedAction, error: String, attempts: u32) -> Self {
        Self {
            relative_path: action.relative_path.clone(),
            phase: action.phase,
            operation: action.operation,
            remote_location: action.remote_location.clone(),
            status: OutcomeStatus::Failed,
            error: Some(error),
            bytes: 0,
            attempts,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }
}

/// 同步结果
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// 按阶段、再按相对路径排序
    pub outcomes: Vec<FileOutcome>,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    pub cancelled: bool,
}

impl ReconcileReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    /// 按阶段输出每个文件的结果，最后列出所有失败项
    pub fn write_summary<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut first = true;
        for phase in Phase::ALL {
            let outcomes: Vec<&FileOutcome> =
                self.outcomes.iter().filter(|o| o.phase == phase).collect();
            if outcomes.is_empty() {
                continue;
            }
            if !first {
                writeln!(w)?;
            }
            first = false;

            writeln!(w, "{}", phase.title())?;
            for outcome in outcomes {
                match &outcome.error {
                    None => writeln!(w, "    {}", outcome.remote_location)?,
                    Some(e) => writeln!(w, "    {} FAILED: {}", outcome.remote_location, e)?,
                }
            }
        }

        let failures: Vec<&FileOutcome> = self.failures().collect();
        if !failures.is_empty() {
            writeln!(w)?;
            writeln!(w, "{} operation(s) failed:", failures.len())?;
            for outcome in failures {
                writeln!(
                    w,
                    "    {:?} {}: {}",
                    outcome.operation,
                    outcome.relative_path,
                    outcome.error.as_deref().unwrap_or("unknown error")
                )?;
            }
        }

        Ok(())
    }
}

/// 同步引擎：把差异应用到远程端
pub struct SyncEngine {
    storage: Arc<dyn RemoteStorage>,
    base: String,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        storage: Arc<dyn RemoteStorage>,
        base: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        Self {
            storage,
            base: base.into(),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// 取消同步：进行中的操作被中断，尚未开始的操作都记为失败
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 根据差异生成操作计划
    pub fn plan(&self, report: &DifferenceReport) -> Vec<PlannedAction> {
        let mut actions = Vec::new();

        for path in &report.missing {
            actions.push(PlannedAction {
                phase: Phase::Missing,
                relative_path: path.clone(),
                operation: Operation::Upload,
                local_location: report.local.get(path).map(|r| r.full_location.clone()),
                remote_location: join_posix(&self.base, path),
            });
        }

        for path in &report.extra {
            actions.push(PlannedAction {
                phase: Phase::Extra,
                relative_path: path.clone(),
                operation: Operation::Delete,
                local_location: None,
                remote_location: report
                    .remote
                    .get(path)
                    .map(|r| r.full_location.clone())
                    .unwrap_or_else(|| join_posix(&self.base, path)),
            });
        }

        for path in &report.off_sync {
            actions.push(PlannedAction {
                phase: Phase::OffSync,
                relative_path: path.clone(),
                operation: Operation::Upload,
                local_location: report.local.get(path).map(|r| r.full_location.clone()),
                remote_location: report
                    .remote
                    .get(path)
                    .map(|r| r.full_location.clone())
                    .unwrap_or_else(|| join_posix(&self.base, path)),
            });
        }

        actions
    }

    /// 执行同步。阶段之间严格串行，阶段内部并发
    pub async fn apply(&self, report: &DifferenceReport) -> ReconcileReport {
        let start = Instant::now();
        let actions = self.plan(report);

        info!(
            "开始同步到 {}: 上传 {}, 删除 {}, 覆盖 {}",
            self.storage.name(),
            report.missing.len(),
            report.extra.len(),
            report.off_sync.len()
        );

        let mut outcomes = Vec::with_capacity(actions.len());
        for phase in Phase::ALL {
            let phase_actions: Vec<PlannedAction> =
                actions.iter().filter(|a| a.phase == phase).cloned().collect();
            if phase_actions.is_empty() {
                continue;
            }
            debug!("阶段 {:?}: {} 个操作", phase, phase_actions.len());
            outcomes.extend(self.run_phase(phase_actions).await);
        }

        let bytes_transferred = outcomes.iter().map(|o| o.bytes).sum();
        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();

        info!(
            "同步完成: 成功 {}, 失败 {}, 传输 {} 字节",
            outcomes.len() - failed,
            failed,
            bytes_transferred
        );

        ReconcileReport {
            outcomes,
            bytes_transferred,
            duration_ms: start.elapsed().as_millis() as u64,
            cancelled: self.cancel.is_cancelled(),
        }
    }

    /// 并行执行一个阶段，结果按计划顺序返回
    async fn run_phase(&self, actions: Vec<PlannedAction>) -> Vec<FileOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let mut handles = Vec::with_capacity(actions.len());

        for action in actions {
            let semaphore = semaphore.clone();
            let storage = self.storage.clone();
            let config = self.config.clone();
            let cancel = self.cancel.clone();
            let fallback = action.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => return FileOutcome::failed(&action, e.to_string(), 0),
                };
                Self::execute_with_retry(storage.as_ref(), &action, &config, &cancel).await
            });

            handles.push((fallback, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (action, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("任务异常退出: {}: {}", action.relative_path, e);
                    outcomes.push(FileOutcome::failed(&action, e.to_string(), 0));
                }
            }
        }
        outcomes
    }

    /// 带重试和超时的单个操作，取消时中断当前尝试
    async fn execute_with_retry(
        storage: &dyn RemoteStorage,
        action: &PlannedAction,
        config: &SyncConfig,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        let timeout = Duration::from_secs(config.operation_timeout_secs.max(1));
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return FileOutcome::failed(action, "cancelled".to_string(), attempts);
            }
            attempts += 1;

            let attempt = tokio::time::timeout(timeout, Self::execute(storage, action));
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("操作被中断: {:?} {}", action.operation, action.remote_location);
                    return FileOutcome::failed(action, "cancelled".to_string(), attempts);
                }
                result = attempt => match result {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::transfer(
                        &action.remote_location,
                        format!("timed out after {}s", timeout.as_secs()),
                    )),
                },
            };

            match result {
                Ok(bytes) => {
                    debug!("完成: {:?} {}", action.operation, action.remote_location);
                    return FileOutcome {
                        relative_path: action.relative_path.clone(),
                        phase: action.phase,
                        operation: action.operation,
                        remote_location: action.remote_location.clone(),
                        status: OutcomeStatus::Ok,
                        error: None,
                        bytes,
                        attempts,
                    };
                }
                Err(e) if e.is_retryable() && attempts <= config.max_retries => {
                    // 指数退避
                    let delay = config
                        .retry_base_delay_ms
                        .saturating_mul(2_u64.saturating_pow(attempts - 1));
                    warn!(
                        "操作失败，{}ms 后重试 ({}/{}): {}",
                        delay, attempts, config.max_retries, e
                    );
                    tokio::select! {
                        () = cancel.cancelled() => {}
                        () = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                }
                Err(e) => {
                    error!("操作最终失败 (尝试 {} 次): {}", attempts, e);
                    return FileOutcome::failed(action, e.to_string(), attempts);
                }
            }
        }
    }

    /// 执行单个操作，返回传输的字节数
    async fn execute(storage: &dyn RemoteStorage, action: &PlannedAction) -> Result<u64> {
        match action.operation {
            Operation::Upload => {
                let local = action.local_location.as_deref().ok_or_else(|| {
                    SyncError::transfer(
                        &action.relative_path,
                        "local file is not in the inventory",
                    )
                })?;
                let data = tokio::fs::read(local).await.map_err(|source| SyncError::Io {
                    path: PathBuf::from(local),
                    source,
                })?;
                let bytes = data.len() as u64;
                debug!("上传: {} -> {} ({}字节)", local, action.remote_location, bytes);
                storage.write(&action.remote_location, data).await?;
                Ok(bytes)
            }
            Operation::Delete => {
                debug!("删除: {}", action.remote_location);
                storage.delete(&action.remote_location).await?;
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EntryKind, FileRecord, Inventory, RemoteEntry};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// 内存中的远程端：记录操作顺序，可注入写入失败
    #[derive(Default)]
    struct MemoryStorage {
        files: Mutex<BTreeMap<String, Vec<u8>>>,
        log: Mutex<Vec<String>>,
        /// 路径 -> 剩余失败次数
        failures: Mutex<BTreeMap<String, u32>>,
        /// 写入时永不返回的路径
        stalls: Mutex<BTreeSet<String>>,
    }

    impl MemoryStorage {
        fn stall_writes(&self, path: &str) {
            self.stalls.lock().unwrap().insert(path.to_string());
        }

        fn fail_writes(&self, path: &str, times: u32) {
            self.failures.lock().unwrap().insert(path.to_string(), times);
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteStorage for MemoryStorage {
        async fn list_dir(&self, _dir: &str) -> Result<Vec<RemoteEntry>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .iter()
                .map(|(name, data)| RemoteEntry {
                    name: name.clone(),
                    kind: EntryKind::File,
                    size: data.len() as u64,
                    modify: String::new(),
                })
                .collect())
        }

        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| SyncError::transfer(path, "not found"))
        }

        async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
            self.log.lock().unwrap().push(format!("write {}", path));
            let stalled = self.stalls.lock().unwrap().contains(path);
            if stalled {
                std::future::pending::<()>().await;
            }
            if let Some(left) = self.failures.lock().unwrap().get_mut(path) {
                if *left > 0 {
                    *left -= 1;
                    return Err(SyncError::transfer(path, "451 local error"));
                }
            }
            self.files.lock().unwrap().insert(path.to_string(), data);
            Ok(())
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("delete {}", path));
            self.files.lock().unwrap().remove(path);
            Ok(())
        }

        async fn check(&self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "memory"
        }
    }

    fn rec(path: &str, location: String) -> FileRecord {
        FileRecord {
            relative_path: path.to_string(),
            size: 1,
            modify: "20240101000000".to_string(),
            full_location: location,
        }
    }

    /// 本地：new.txt、changed.txt；远程：changed.txt、old.txt
    fn fixture(local_dir: &TempDir) -> DifferenceReport {
        std::fs::write(local_dir.path().join("new.txt"), b"new").unwrap();
        std::fs::write(local_dir.path().join("changed.txt"), b"changed").unwrap();
        let loc = |name: &str| local_dir.path().join(name).to_string_lossy().into_owned();

        let local: Inventory = [
            ("new.txt", rec("new.txt", loc("new.txt"))),
            ("changed.txt", rec("changed.txt", loc("changed.txt"))),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let remote: Inventory = [
            ("changed.txt", rec("changed.txt", "/www/changed.txt".into())),
            ("old.txt", rec("old.txt", "/www/old.txt".into())),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        DifferenceReport {
            missing: vec!["new.txt".into()],
            extra: vec!["old.txt".into()],
            off_sync: vec!["changed.txt".into()],
            local,
            remote,
        }
    }

    fn fast_config() -> SyncConfig {
        SyncConfig {
            max_concurrent_transfers: 2,
            max_retries: 0,
            retry_base_delay_ms: 1,
            operation_timeout_secs: 5,
        }
    }

    #[test]
    fn test_plan_locations() {
        let local_dir = TempDir::new().unwrap();
        let report = fixture(&local_dir);
        let engine = SyncEngine::new(Arc::new(MemoryStorage::default()), "/www", fast_config());

        let plan = engine.plan(&report);
        let summary: Vec<(Phase, Operation, &str)> = plan
            .iter()
            .map(|a| (a.phase, a.operation, a.remote_location.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Phase::Missing, Operation::Upload, "/www/new.txt"),
                (Phase::Extra, Operation::Delete, "/www/old.txt"),
                (Phase::OffSync, Operation::Upload, "/www/changed.txt"),
            ]
        );
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let local_dir = TempDir::new().unwrap();
        let report = fixture(&local_dir);
        let storage = Arc::new(MemoryStorage::default());
        storage
            .files
            .lock()
            .unwrap()
            .insert("/www/old.txt".into(), b"old".to_vec());

        let engine = SyncEngine::new(storage.clone(), "/www", fast_config());
        let result = engine.apply(&report).await;

        assert!(!result.has_failures());
        assert_eq!(
            storage.log(),
            vec![
                "write /www/new.txt",
                "delete /www/old.txt",
                "write /www/changed.txt"
            ]
        );
        assert_eq!(result.bytes_transferred, 3 + 7);

        let files = storage.files.lock().unwrap();
        assert_eq!(files.get("/www/new.txt").unwrap(), b"new");
        assert_eq!(files.get("/www/changed.txt").unwrap(), b"changed");
        assert!(!files.contains_key("/www/old.txt"));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_operations() {
        let local_dir = TempDir::new().unwrap();
        let report = fixture(&local_dir);
        let storage = Arc::new(MemoryStorage::default());
        storage.fail_writes("/www/new.txt", 10);

        let engine = SyncEngine::new(storage.clone(), "/www", fast_config());
        let result = engine.apply(&report).await;

        assert!(result.has_failures());
        let failed: Vec<&str> = result.failures().map(|o| o.relative_path.as_str()).collect();
        assert_eq!(failed, vec!["new.txt"]);
        assert_eq!(result.outcomes.len(), 3);
        assert!(storage.files.lock().unwrap().contains_key("/www/changed.txt"));

        let text = {
            let mut buf = Vec::new();
            result.write_summary(&mut buf).unwrap();
            String::from_utf8(buf).unwrap()
        };
        assert!(text.starts_with("Copy missing files to server\n    /www/new.txt FAILED:"));
        assert!(text.contains("1 operation(s) failed:"));
    }

    #[tokio::test]
    async fn test_transfer_errors_are_retried() {
        let local_dir = TempDir::new().unwrap();
        let report = fixture(&local_dir);
        let storage = Arc::new(MemoryStorage::default());
        storage.fail_writes("/www/new.txt", 2);

        let config = SyncConfig {
            max_retries: 2,
            ..fast_config()
        };
        let engine = SyncEngine::new(storage.clone(), "/www", config);
        let result = engine.apply(&report).await;

        assert!(!result.has_failures());
        assert_eq!(result.outcomes[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_missing_local_file_is_not_retried() {
        let local_dir = TempDir::new().unwrap();
        let report = fixture(&local_dir);
        std::fs::remove_file(local_dir.path().join("new.txt")).unwrap();

        let config = SyncConfig {
            max_retries: 3,
            ..fast_config()
        };
        let engine = SyncEngine::new(Arc::new(MemoryStorage::default()), "/www", config);
        let result = engine.apply(&report).await;

        let outcome = &result.outcomes[0];
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_marks_everything_failed() {
        let local_dir = TempDir::new().unwrap();
        let report = fixture(&local_dir);
        let storage = Arc::new(MemoryStorage::default());

        let engine = SyncEngine::new(storage.clone(), "/www", fast_config());
        engine.cancel();
        let result = engine.apply(&report).await;

        assert!(result.cancelled);
        assert_eq!(result.failures().count(), 3);
        assert!(result
            .outcomes
            .iter()
            .all(|o| o.error.as_deref() == Some("cancelled")));
        assert!(storage.log().is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_operation_fails_alone() {
        let local_dir = TempDir::new().unwrap();
        let report = fixture(&local_dir);
        let storage = Arc::new(MemoryStorage::default());
        storage.stall_writes("/www/changed.txt");

        let config = SyncConfig {
            operation_timeout_secs: 1,
            ..fast_config()
        };
        let engine = SyncEngine::new(storage.clone(), "/www", config);
        let result = engine.apply(&report).await;

        let failed: Vec<&FileOutcome> = result.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].relative_path, "changed.txt");
        assert_eq!(failed[0].phase, Phase::OffSync);
        assert!(failed[0].error.as_deref().unwrap().contains("timed out after 1s"));

        assert!(result.outcomes[0].is_ok());
        assert_eq!(storage.files.lock().unwrap().get("/www/new.txt").unwrap(), b"new");
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_operation() {
        let local_dir = TempDir::new().unwrap();
        let report = fixture(&local_dir);
        let storage = Arc::new(MemoryStorage::default());
        storage.stall_writes("/www/new.txt");

        let config = SyncConfig {
            operation_timeout_secs: 60,
            ..fast_config()
        };
        let engine = SyncEngine::new(storage.clone(), "/www", config);
        let token = engine.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let start = Instant::now();
        let result = engine.apply(&report).await;

        assert!(start.elapsed() < Duration::from_secs(30));
        assert!(result.cancelled);
        assert_eq!(result.outcomes.len(), 3);
        assert!(result
            .outcomes
            .iter()
            .all(|o| o.error.as_deref() == Some("cancelled")));
        assert_eq!(result.outcomes[0].attempts, 1);
        // 被中断的写入已经开始，后面的阶段没有动远程端
        assert_eq!(storage.log(), vec!["write /www/new.txt"]);
    }
}

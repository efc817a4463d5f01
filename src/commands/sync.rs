use super::Target;
use crate::config::AppConfig;
use crate::core::{
    ComparePolicy, ContentVerifier, DifferenceReport, DigestVerifier, FileComparator,
    LocalScanner, Phase, ReconcileReport, RemoteScanner, RemoteSpec, SyncEngine,
};
use crate::storage::{create_storage, RemoteStorage};
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

/// 差异分析结果，附带已经建立的远程连接
pub struct Analysis {
    pub storage: Arc<dyn RemoteStorage>,
    pub remote_spec: RemoteSpec,
    pub report: DifferenceReport,
}

/// 分析差异（不修改远程端）
///
/// 本地清单先于任何远程操作生成，规格文件有错时不会连接服务器。
pub async fn analyze(config: &AppConfig) -> Result<Analysis> {
    let target = Target::from_config(config)?;
    let remote_spec = RemoteSpec::parse_with_default(&target.remote_spec, config.remote_listing)
        .context("无效的远程规格")?;

    let scanner = LocalScanner::new(config.compare.timestamp_zone);
    let syntax = config.spec_syntax;
    let (root, spec_file) = (target.local_root.clone(), target.spec_file.clone());
    let local = tokio::task::spawn_blocking(move || {
        scanner.build_from_spec(&root, &spec_file, syntax)
    })
    .await
    .context("本地扫描任务异常退出")?
    .with_context(|| format!("扫描本地文件失败: {}", target.local_root.display()))?;

    let storage = create_storage(&config.server)
        .await
        .context("远程存储连接失败")?;

    let remote = RemoteScanner::new(config.sync.max_concurrent_transfers)
        .build(storage.clone(), &remote_spec)
        .await
        .context("扫描远程存储失败")?;

    let comparator = FileComparator::new(config.compare.clone());
    let digest = DigestVerifier::new(storage.clone());
    let verifier: Option<&dyn ContentVerifier> = match config.compare.policy {
        ComparePolicy::VerifyOnSizeTie => Some(&digest),
        ComparePolicy::TimestampOnly => None,
    };
    let report = comparator.compare(local, remote, verifier).await;

    Ok(Analysis {
        storage,
        remote_spec,
        report,
    })
}

/// list 命令：输出差异报告
pub async fn list<W: Write>(
    config: &AppConfig,
    json: bool,
    out: &mut W,
) -> Result<DifferenceReport> {
    let analysis = analyze(config).await?;

    if json {
        serde_json::to_writer_pretty(&mut *out, &analysis.report)?;
        writeln!(out)?;
    } else {
        analysis.report.write_report(out)?;
    }

    Ok(analysis.report)
}

/// update 命令：把差异应用到远程端
///
/// `dry_run` 时只输出计划，返回空结果。
pub async fn update<W: Write>(
    config: &AppConfig,
    dry_run: bool,
    out: &mut W,
) -> Result<ReconcileReport> {
    let analysis = analyze(config).await?;
    let report = &analysis.report;

    if report.is_up_to_date() {
        writeln!(out, "Remote is up to date")?;
        return Ok(ReconcileReport::default());
    }

    let engine = SyncEngine::new(
        analysis.storage.clone(),
        analysis.remote_spec.base.clone(),
        config.sync.clone(),
    );

    if dry_run {
        write_plan(&engine, report, out)?;
        return Ok(ReconcileReport::default());
    }

    // Ctrl-C 中断进行中的操作，剩余操作放弃
    let cancel = engine.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，取消剩余操作");
            cancel.cancel();
        }
    });

    let result = engine.apply(report).await;
    ctrl_c.abort();

    result.write_summary(out)?;
    info!("同步耗时 {}ms", result.duration_ms);
    Ok(result)
}

fn write_plan<W: Write>(engine: &SyncEngine, report: &DifferenceReport, out: &mut W) -> Result<()> {
    let plan = engine.plan(report);
    let mut first = true;

    for phase in Phase::ALL {
        let actions: Vec<_> = plan.iter().filter(|a| a.phase == phase).collect();
        if actions.is_empty() {
            continue;
        }
        if !first {
            writeln!(out)?;
        }
        first = false;

        writeln!(out, "{} (dry run)", phase.title())?;
        for action in actions {
            writeln!(out, "    {}", action.remote_location)?;
        }
    }
    Ok(())
}

//! 命令层：把配置接到核心流程上，错误统一用 anyhow 包装

pub mod cache;
pub mod sync;

use crate::config::AppConfig;
use anyhow::{anyhow, Result};
use std::path::PathBuf;

pub(crate) const REMOTE_SPEC_UNSET: &str =
    "remote spec is not set (REMOTE_SPEC argument, --remote-spec or \"remoteSpec\" in config)";

/// 一次运行需要的三项输入
#[derive(Debug, Clone)]
pub struct Target {
    pub local_root: PathBuf,
    pub spec_file: PathBuf,
    pub remote_spec: String,
}

impl Target {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let local_root = config
            .local_root
            .clone()
            .ok_or_else(|| {
                anyhow!(
                    "local directory is not set (LOCAL_DIR argument or \"localRoot\" in config)"
                )
            })?;
        let spec_file = config
            .spec_file
            .clone()
            .ok_or_else(|| {
                anyhow!("spec file is not set (SPEC_FILE argument or \"specFile\" in config)")
            })?;
        let remote_spec = config
            .remote_spec
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!(REMOTE_SPEC_UNSET))?;

        Ok(Self {
            local_root,
            spec_file,
            remote_spec,
        })
    }
}

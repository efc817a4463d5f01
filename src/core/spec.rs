//! 规格解析：把缩进树或平铺列表形式的文件规格展开成 glob 模式

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// 每级缩进的空格数
pub const INDENT_UNIT: usize = 4;

/// 规格语法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecSyntax {
    /// 缩进树
    #[default]
    Tree,
    /// 每行一个模式（或用 | 分隔）
    Flat,
}

/// 规格中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecEntry {
    /// 普通路径（其中也可以带通配符）
    Literal(String),
    /// `*`：目录下的文件，不递归
    Wildcard,
    /// `**`：目录下的所有文件，递归
    Recursive,
}

impl SpecEntry {
    pub fn parse(name: &str) -> Self {
        match name {
            "*" => SpecEntry::Wildcard,
            "**" => SpecEntry::Recursive,
            other => SpecEntry::Literal(other.to_string()),
        }
    }

    /// 按模式最后一段分类，本地扫描据此决定是否递归
    pub fn of_pattern(pattern: &str) -> Self {
        let trimmed = pattern.trim_end_matches(['/', '\\']);
        let last = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
        Self::parse(last)
    }
}

/// 一行规格：缩进级别和内容
#[derive(Debug, Clone, PartialEq, Eq)]
struct SpecLine {
    number: usize,
    level: usize,
    text: String,
}

/// 去掉空行，计算每行缩进级别。缩进不是 4 的倍数时报错
fn parse_levels<S: AsRef<str>>(lines: &[S]) -> Result<Vec<SpecLine>> {
    let mut parsed = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let line = line.as_ref().trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }

        let spaces = line.len() - line.trim_start_matches(' ').len();
        if spaces % INDENT_UNIT != 0 {
            return Err(SyncError::MalformedSpec {
                line: index + 1,
                message: format!(
                    "indent of {} spaces is not a multiple of {}",
                    spaces, INDENT_UNIT
                ),
            });
        }

        parsed.push(SpecLine {
            number: index + 1,
            level: spaces / INDENT_UNIT,
            text: line.trim().to_string(),
        });
    }

    Ok(parsed)
}

/// 展开缩进树形式的规格
///
/// 下一行缩进恰好多一级时当前行是目录，否则是文件（或模式）。
/// 缩进一次增加多级只警告，不中断。
pub fn resolve_tree<S: AsRef<str>>(root: &Path, lines: &[S]) -> Result<Vec<String>> {
    let parsed = parse_levels(lines)?;

    for pair in parsed.windows(2) {
        if pair[1].level > pair[0].level + 1 {
            warn!("规格第 {} 行缩进过多，结果可能不符合预期", pair[1].number);
        }
    }

    let mut patterns = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    for (index, line) in parsed.iter().enumerate() {
        stack.truncate(line.level);

        let is_dir = parsed
            .get(index + 1)
            .is_some_and(|next| next.level == line.level + 1);

        if is_dir {
            stack.push(line.text.clone());
        } else {
            let mut path = root.to_path_buf();
            path.extend(stack.iter());
            path.push(&line.text);
            patterns.push(path.to_string_lossy().into_owned());
        }
    }

    Ok(patterns)
}

/// 展开平铺列表：每行独立与根目录拼接
pub fn resolve_flat<S: AsRef<str>>(root: &Path, lines: &[S]) -> Vec<String> {
    lines
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| !l.is_empty())
        .map(|l| root.join(l).to_string_lossy().into_owned())
        .collect()
}

/// 把 `a/*|b/**` 形式拆成多行
pub fn split_pipe_list(text: &str) -> Vec<String> {
    text.split(['|', '\n'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// 读取规格文件并展开
pub fn read_spec_file(path: &Path, syntax: SpecSyntax, root: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|source| SyncError::SpecRead {
        path: PathBuf::from(path),
        source,
    })?;

    match syntax {
        SpecSyntax::Tree => {
            let lines: Vec<&str> = content.lines().collect();
            resolve_tree(root, &lines)
        }
        SpecSyntax::Flat => Ok(resolve_flat(root, &split_pipe_list(&content))),
    }
}

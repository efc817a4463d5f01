use crate::core::spec::{read_spec_file, SpecEntry, SpecSyntax};
use crate::error::Result;
use crate::storage::{relative_posix, FileRecord, Inventory, MODIFY_FORMAT};
use chrono::{DateTime, Local, Utc};
use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 本地修改时间按哪个时区渲染
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampZone {
    #[default]
    Local,
    Utc,
}

/// 本地文件扫描器：把 glob 模式展开成文件清单
#[derive(Debug, Clone, Default)]
pub struct LocalScanner {
    zone: TimestampZone,
}

/// 模式中的一段
enum Segment {
    Literal(String),
    Glob(GlobMatcher, bool),
    Recursive,
}

impl LocalScanner {
    pub fn new(zone: TimestampZone) -> Self {
        Self { zone }
    }

    /// 读取规格文件并扫描
    pub fn build_from_spec(
        &self,
        root: &Path,
        spec_file: &Path,
        syntax: SpecSyntax,
    ) -> Result<Inventory> {
        let patterns = read_spec_file(spec_file, syntax, root)?;
        self.build(root, &patterns)
    }

    /// 逐个展开模式并合并，相对路径重复时后面的覆盖前面的
    pub fn build(&self, root: &Path, patterns: &[String]) -> Result<Inventory> {
        info!("开始扫描本地文件: {} ({} 个模式)", root.display(), patterns.len());

        let mut inventory = Inventory::new();
        for pattern in patterns {
            let files = expand_pattern(pattern);
            debug!("模式 {} 匹配 {} 个文件", pattern, files.len());

            for path in files {
                if let Some(record) = self.record(root, &path) {
                    inventory.insert(record.relative_path.clone(), record);
                }
            }
        }

        info!("本地扫描完成: {} 个文件", inventory.len());
        Ok(inventory)
    }

    fn record(&self, root: &Path, path: &Path) -> Option<FileRecord> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                warn!("无法读取文件元数据，跳过 {}: {}", path.display(), e);
                return None;
            }
        };

        let modified = match metadata.modified() {
            Ok(t) => t,
            Err(e) => {
                warn!("无法读取修改时间，跳过 {}: {}", path.display(), e);
                return None;
            }
        };

        let modify = match self.zone {
            TimestampZone::Local => DateTime::<Local>::from(modified)
                .format(MODIFY_FORMAT)
                .to_string(),
            TimestampZone::Utc => DateTime::<Utc>::from(modified)
                .format(MODIFY_FORMAT)
                .to_string(),
        };

        let relative_path = relative_posix(&to_slash(path), &to_slash(root));

        Some(FileRecord {
            relative_path,
            size: metadata.len(),
            modify,
            full_location: path.to_string_lossy().into_owned(),
        })
    }
}

fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn compile_segment(segment: &str) -> std::result::Result<GlobMatcher, globset::Error> {
    GlobBuilder::new(segment)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
}

/// 读取目录项，目录不存在或不可读时视为空
fn read_dir_names(dir: &Path) -> Vec<(String, PathBuf)> {
    let read_from = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };

    match std::fs::read_dir(read_from) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let path = dir.join(&name);
                (name, path)
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// 递归列出目录下所有普通文件（隐藏文件和隐藏目录除外）
fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let walk_from = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };

    WalkDir::new(walk_from)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(walk_from).ok()?;
            Some(dir.join(rel))
        })
        .collect()
}

/// 展开一个模式，只返回普通文件
///
/// 最后一段按 [`SpecEntry`] 分类：`**` 递归，其余通配段只匹配一层。
/// 以 `.` 开头的名字只被同样以 `.` 开头的段匹配。
/// 不是合法 glob 的段（如未闭合的 `[`）按字面名处理。
pub fn expand_pattern(pattern: &str) -> Vec<PathBuf> {
    let tail = SpecEntry::of_pattern(pattern);
    let path = Path::new(pattern);
    let components: Vec<Component> = path.components().collect();
    let last_index = components.len().saturating_sub(1);

    let mut candidates = vec![PathBuf::new()];
    let mut recursive_tail = false;

    for (index, component) in components.iter().enumerate() {
        let is_last = index == last_index;

        let segment = match component {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                if is_last && tail == SpecEntry::Recursive {
                    Segment::Recursive
                } else if has_wildcard(&name) {
                    match compile_segment(&name) {
                        Ok(matcher) => Segment::Glob(matcher, name.starts_with('.')),
                        Err(e) => {
                            debug!("按字面名处理 {}: {}", name, e);
                            Segment::Literal(name.into_owned())
                        }
                    }
                } else {
                    Segment::Literal(name.into_owned())
                }
            }
            other => {
                // 根目录、盘符、`.`、`..` 直接拼接
                for c in candidates.iter_mut() {
                    c.push(other.as_os_str());
                }
                continue;
            }
        };

        let mut next = Vec::new();
        match segment {
            Segment::Literal(name) => {
                for c in &candidates {
                    let joined = c.join(&name);
                    if is_last || joined.is_dir() {
                        next.push(joined);
                    }
                }
            }
            Segment::Glob(matcher, dot_ok) => {
                for c in &candidates {
                    for (name, joined) in read_dir_names(c) {
                        if is_hidden(&name) && !dot_ok {
                            continue;
                        }
                        if !matcher.is_match(&name) {
                            continue;
                        }
                        if is_last || joined.is_dir() {
                            next.push(joined);
                        }
                    }
                }
            }
            Segment::Recursive => {
                for c in &candidates {
                    next.extend(walk_files(c));
                }
                recursive_tail = true;
            }
        }

        candidates = next;
        if candidates.is_empty() {
            break;
        }
    }

    let mut files: Vec<PathBuf> = candidates
        .into_iter()
        .filter(|p| {
            if p.is_file() {
                true
            } else {
                if !recursive_tail && p.is_dir() {
                    debug!("跳过目录: {}", p.display());
                }
                false
            }
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn pattern(root: &Path, rel: &str) -> String {
        root.join(rel).to_string_lossy().into_owned()
    }

    fn keys(inventory: &Inventory) -> Vec<&str> {
        inventory.keys().map(|k| k.as_str()).collect()
    }

    #[test]
    fn test_wildcard_is_not_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(root, "images/images/a.png", b"aaaa");
        touch(root, "images/images/b.png", b"bb");
        touch(root, "images/images/deep/c.png", b"c");
        touch(root, "images/images/.hidden", b"h");

        let scanner = LocalScanner::default();
        let inventory = scanner
            .build(root, &[pattern(root, "images/images/*")])
            .unwrap();

        assert_eq!(keys(&inventory), vec!["images/images/a.png", "images/images/b.png"]);
        let a = &inventory["images/images/a.png"];
        assert_eq!(a.size, 4);
        assert_eq!(a.modify.len(), 14);
        assert!(a.modify.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_double_star_is_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(root, "js/app.js", b"1");
        touch(root, "js/lib/x.js", b"22");
        touch(root, "js/lib/deep/y.js", b"333");
        touch(root, "js/.git/config", b"no");

        let inventory = LocalScanner::default()
            .build(root, &[pattern(root, "js/**")])
            .unwrap();

        assert_eq!(
            keys(&inventory),
            vec!["js/app.js", "js/lib/deep/y.js", "js/lib/x.js"]
        );
        // 只有最后一段的 `**` 递归，中间的只匹配一层
        let inventory = LocalScanner::default()
            .build(root, &[pattern(root, "js/**/x.js")])
            .unwrap();
        assert_eq!(keys(&inventory), vec!["js/lib/x.js"]);
    }

    #[test]
    fn test_literal_and_glob_in_middle() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(root, "index.html", b"<html>");
        touch(root, "a/conf.ini", b"1");
        touch(root, "b/conf.ini", b"2");
        touch(root, "b/other.txt", b"3");

        let inventory = LocalScanner::default()
            .build(
                root,
                &[
                    pattern(root, "index.html"),
                    pattern(root, "*/conf.ini"),
                    pattern(root, "missing.txt"),
                    // 目录不会被当作文件
                    pattern(root, "a"),
                ],
            )
            .unwrap();

        assert_eq!(keys(&inventory), vec!["a/conf.ini", "b/conf.ini", "index.html"]);
    }

    #[test]
    fn test_unclosed_bracket_is_literal() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(root, "a[", b"bracket");
        touch(root, "dir[/inner.txt", b"inner");
        touch(root, "a", b"plain");

        let inventory = LocalScanner::default()
            .build(
                root,
                &[pattern(root, "a["), pattern(root, "dir[/*")],
            )
            .unwrap();

        assert_eq!(keys(&inventory), vec!["a[", "dir[/inner.txt"]);
        assert_eq!(inventory["a["].size, 7);
    }

    #[test]
    fn test_duplicate_patterns_last_wins() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(root, "a.txt", b"x");

        let inventory = LocalScanner::default()
            .build(root, &[pattern(root, "*"), pattern(root, "a.txt")])
            .unwrap();

        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory["a.txt"].full_location, pattern(root, "a.txt"));
    }

    #[test]
    fn test_from_tree_spec_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("images");
        touch(&root, "images/one.png", b"1");
        touch(&root, "images/two.png", b"2");
        touch(&root, "other.png", b"3");

        let spec_file = temp_dir.path().join("site.spec");
        fs::write(&spec_file, "images\n    *\n").unwrap();

        let inventory = LocalScanner::new(TimestampZone::Utc)
            .build_from_spec(&root, &spec_file, SpecSyntax::Tree)
            .unwrap();

        assert_eq!(keys(&inventory), vec!["images/one.png", "images/two.png"]);
    }

    #[test]
    fn test_malformed_spec_builds_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let spec_file = temp_dir.path().join("bad.spec");
        fs::write(&spec_file, "css\n  site.css\n").unwrap();

        let err = LocalScanner::default()
            .build_from_spec(temp_dir.path(), &spec_file, SpecSyntax::Tree)
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedSpec { line: 2, .. }));
    }
}

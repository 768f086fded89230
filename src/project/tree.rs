//! Recursive file tree of a project directory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

use crate::server::file_api::MAX_FILE_SIZE;

/// Entries never shown in a project tree
pub const TREE_IGNORE: &[&str] = &["node_modules", ".git", ".DS_Store"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    /// 相对项目根目录，始终使用 `/` 分隔
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Depth-first iterator over this node and all descendants
    pub fn walk(&self) -> Box<dyn Iterator<Item = &FileNode> + '_> {
        let children = self.children.iter().flatten().flat_map(|c| c.walk());
        Box::new(std::iter::once(self).chain(children))
    }
}

/// Walk `root` and build the tree. Directories sort first, then names
/// case-insensitively. With `include_content`, UTF-8 files up to 1MB carry
/// their text; other files have `content: None`.
pub fn build_tree(root: &Path, include_content: bool) -> io::Result<Vec<FileNode>> {
    walk_dir(root, "", include_content)
}

fn walk_dir(dir: &Path, prefix: &str, include_content: bool) -> io::Result<Vec<FileNode>> {
    let mut nodes = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if TREE_IGNORE.contains(&name.as_str()) {
            continue;
        }

        let metadata = entry.metadata()?;
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", prefix, name)
        };
        let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);

        if metadata.is_dir() {
            let children = walk_dir(&entry.path(), &path, include_content)?;
            nodes.push(FileNode {
                name,
                path,
                kind: NodeKind::Directory,
                size: 0,
                modified_at,
                content: None,
                children: Some(children),
            });
        } else if metadata.is_file() {
            let content = if include_content && metadata.len() <= MAX_FILE_SIZE {
                match fs::read(entry.path()) {
                    Ok(bytes) => String::from_utf8(bytes).ok(),
                    Err(e) => {
                        debug!("Failed to read {:?}: {}", entry.path(), e);
                        None
                    }
                }
            } else {
                None
            };
            nodes.push(FileNode {
                name,
                path,
                kind: NodeKind::File,
                size: metadata.len(),
                modified_at,
                content,
                children: None,
            });
        }
    }

    nodes.sort_by(|a, b| match (a.is_dir(), b.is_dir()) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_tree_order_and_ignores() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/app")).unwrap();
        fs::create_dir_all(root.join("node_modules/left-pad")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::write(root.join("README.md"), "# demo").unwrap();
        fs::write(root.join("src/app/app.ts"), "export class App {}").unwrap();
        fs::write(root.join("favicon.ico"), [0xff, 0x00, 0xfe]).unwrap();

        let tree = build_tree(root, true).unwrap();
        let names: Vec<&str> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["src", "favicon.ico", "package.json", "README.md"]);

        let app = tree[0].walk().find(|n| n.path == "src/app/app.ts").unwrap();
        assert_eq!(app.kind, NodeKind::File);
        assert_eq!(app.content.as_deref(), Some("export class App {}"));
        assert!(tree[1].content.is_none());
    }

    #[test]
    fn test_build_tree_without_content() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("index.html"), "<html></html>").unwrap();
        let tree = build_tree(temp.path(), false).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].size, 13);
        assert!(tree[0].content.is_none());
        assert!(tree[0].children.is_none());
    }
}

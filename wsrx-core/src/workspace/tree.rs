//! Workspace document tree.
//!
//! An ordered forest of folders and files addressed by `/`-separated paths.
//! Sibling order is insertion order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One node of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Folder { name: String, children: Vec<TreeNode> },
    File { name: String },
}

impl TreeNode {
    pub fn file(name: impl Into<String>) -> Self {
        Self::File { name: name.into() }
    }

    pub fn folder(name: impl Into<String>, children: Vec<TreeNode>) -> Self {
        Self::Folder {
            name: name.into(),
            children,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Folder { name, .. } | Self::File { name } => name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    fn children(&self) -> &[TreeNode] {
        match self {
            Self::Folder { children, .. } => children,
            Self::File { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("invalid tree path `{0}`")]
    InvalidPath(String),

    #[error("`{0}` already exists")]
    AlreadyExists(String),

    #[error("`{0}` is a file, not a folder")]
    NotAFolder(String),

    #[error("`{0}` not found")]
    NotFound(String),
}

/// The workspace's hierarchical document structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    roots: Vec<TreeNode>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(roots: Vec<TreeNode>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[TreeNode] {
        &self.roots
    }

    /// Insert a file, creating any missing parent folders.
    pub fn insert_file(&mut self, path: &str) -> Result<(), TreeError> {
        self.insert(path, |name| TreeNode::file(name))
    }

    /// Insert an empty folder, creating any missing parent folders.
    pub fn insert_folder(&mut self, path: &str) -> Result<(), TreeError> {
        self.insert(path, |name| TreeNode::folder(name, Vec::new()))
    }

    /// Remove the node at `path` (with its children) and return it.
    pub fn remove(&mut self, path: &str) -> Result<TreeNode, TreeError> {
        let segments = split(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(TreeError::InvalidPath(path.to_string()));
        };

        let mut level = &mut self.roots;
        for segment in parents {
            level = match level.iter_mut().find(|n| n.name() == *segment) {
                Some(TreeNode::Folder { children, .. }) => children,
                _ => return Err(TreeError::NotFound(path.to_string())),
            };
        }

        let index = level
            .iter()
            .position(|n| n.name() == *last)
            .ok_or_else(|| TreeError::NotFound(path.to_string()))?;
        Ok(level.remove(index))
    }

    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        let segments = split(path).ok()?;
        let mut level = self.roots.as_slice();
        let mut found = None;
        for segment in segments {
            let node = level.iter().find(|n| n.name() == segment)?;
            level = node.children();
            found = Some(node);
        }
        found
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.get(path).is_some_and(TreeNode::is_file)
    }

    pub fn file_count(&self) -> usize {
        fn count(nodes: &[TreeNode]) -> usize {
            nodes
                .iter()
                .map(|n| match n {
                    TreeNode::File { .. } => 1,
                    TreeNode::Folder { children, .. } => count(children),
                })
                .sum()
        }
        count(&self.roots)
    }

    /// Every node path, depth-first in sibling order.
    pub fn paths(&self) -> Vec<String> {
        fn walk(nodes: &[TreeNode], prefix: &str, out: &mut Vec<String>) {
            for node in nodes {
                let path = if prefix.is_empty() {
                    node.name().to_string()
                } else {
                    format!("{prefix}/{}", node.name())
                };
                walk(node.children(), &path, out);
                out.push(path);
            }
        }
        let mut out = Vec::new();
        walk(&self.roots, "", &mut out);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    fn insert(&mut self, path: &str, make: impl FnOnce(&str) -> TreeNode) -> Result<(), TreeError> {
        let segments = split(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(TreeError::InvalidPath(path.to_string()));
        };

        let mut level = &mut self.roots;
        for (depth, segment) in parents.iter().enumerate() {
            let index = match level.iter().position(|n| n.name() == *segment) {
                Some(index) => index,
                None => {
                    level.push(TreeNode::folder(*segment, Vec::new()));
                    level.len() - 1
                }
            };
            level = match &mut level[index] {
                TreeNode::Folder { children, .. } => children,
                TreeNode::File { .. } => {
                    return Err(TreeError::NotAFolder(segments[..=depth].join("/")));
                }
            };
        }

        if level.iter().any(|n| n.name() == *last) {
            return Err(TreeError::AlreadyExists(path.to_string()));
        }
        level.push(make(last));
        Ok(())
    }
}

fn split(path: &str) -> Result<Vec<&str>, TreeError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(TreeError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

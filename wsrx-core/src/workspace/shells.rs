//! Open editor shells.
//!
//! Shells are kept in tab order. Ids are unique; opening an id that is
//! already open updates it in place and keeps its position.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Identifier of an open editor shell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShellId(Arc<str>);

impl ShellId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShellId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One open editor instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shell {
    pub id: ShellId,
    pub title: String,
    /// Tree path of the document shown, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Shell {
    pub fn new(id: impl Into<ShellId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Ordered collection of open shells.
///
/// Equality is order-sensitive: a reordered tab strip is a different value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Shell>", into = "Vec<Shell>")]
pub struct Shells {
    entries: IndexMap<ShellId, Shell>,
}

impl Shells {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a shell at the end of the tab order, or update it in place if
    /// its id is already open. Returns `true` when the shell is new.
    pub fn open(&mut self, shell: Shell) -> bool {
        self.entries.insert(shell.id.clone(), shell).is_none()
    }

    /// Close a shell. Remaining shells keep their relative order.
    pub fn close(&mut self, id: &ShellId) -> Option<Shell> {
        self.entries.shift_remove(id)
    }

    /// Move a shell to `index`, clamped to the last position.
    /// Returns `false` if the id is not open.
    pub fn move_to(&mut self, id: &ShellId, index: usize) -> bool {
        let Some(from) = self.entries.get_index_of(id) else {
            return false;
        };
        let to = index.min(self.entries.len() - 1);
        self.entries.move_index(from, to);
        true
    }

    pub fn get(&self, id: &ShellId) -> Option<&Shell> {
        self.entries.get(id)
    }

    pub fn position(&self, id: &ShellId) -> Option<usize> {
        self.entries.get_index_of(id)
    }

    pub fn contains(&self, id: &ShellId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ShellId> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shell> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for Shells {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len() && self.entries.iter().eq(other.entries.iter())
    }
}

impl Eq for Shells {}

impl From<Vec<Shell>> for Shells {
    fn from(shells: Vec<Shell>) -> Self {
        let mut out = Shells::new();
        for shell in shells {
            out.open(shell);
        }
        out
    }
}

impl From<Shells> for Vec<Shell> {
    fn from(shells: Shells) -> Self {
        shells.entries.into_values().collect()
    }
}

impl FromIterator<Shell> for Shells {
    fn from_iter<I: IntoIterator<Item = Shell>>(iter: I) -> Self {
        let mut out = Shells::new();
        for shell in iter {
            out.open(shell);
        }
        out
    }
}

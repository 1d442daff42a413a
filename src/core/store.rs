//! Store abstraction for Palace state.
//!
//! Palace keeps two kinds of stores with the same SQLite schema:
//! one per workspace, and one personal corridor per human operator that is
//! shared across workspaces.

use std::path::{Path, PathBuf};

/// Store type discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// Workspace store: project-scoped knowledge at `<repo>/.palace/`
    Workspace,
    /// Corridor store: cross-project learnings at `~/.palace/corridor/`
    Corridor,
}

/// Store handle representing one Palace state directory.
#[derive(Debug, Clone)]
pub struct Store {
    /// Store type (Workspace or Corridor)
    pub kind: StoreKind,
    /// Absolute path to the store root directory
    pub root: PathBuf,
}

impl Store {
    pub fn workspace(root: impl AsRef<Path>) -> Self {
        Self {
            kind: StoreKind::Workspace,
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn corridor(root: impl AsRef<Path>) -> Self {
        Self {
            kind: StoreKind::Corridor,
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Name used as `origin_workspace` when promoting into the corridor.
    pub fn workspace_name(&self) -> String {
        let root = match self.root.file_name().and_then(|n| n.to_str()) {
            Some(".palace") => self.root.parent().unwrap_or(&self.root),
            _ => &self.root,
        };
        root.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.to_string_lossy().to_string())
    }
}

//! Node inventory backed by a TOML file
//!
//! ```toml
//! [[node]]
//! name = "node-1"
//! addresses = [
//!     { kind = "external", address = "34.1.1.1" },
//!     { kind = "internal", address = "10.0.0.1" },
//! ]
//!
//! [[node]]
//! name = "master"
//! schedulable = false
//! addresses = [{ kind = "internal", address = "10.0.0.2" }]
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use nodessh_exec::{ExecError, Node, NodeInventory};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    node: Vec<Node>,
}

/// Inventory read from disk on every listing
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    /// Create an inventory for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Find a node by name
    ///
    /// # Errors
    /// Returns `ExecError::Inventory` if listing fails or no node matches
    pub async fn find(&self, name: &str) -> Result<Node, ExecError> {
        self.list_nodes()
            .await?
            .into_iter()
            .find(|n| n.name == name)
            .ok_or_else(|| {
                ExecError::Inventory(format!("node {name} not in {}", self.path.display()))
            })
    }
}

#[async_trait]
impl NodeInventory for FileInventory {
    async fn list_nodes(&self) -> Result<Vec<Node>, ExecError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ExecError::Inventory(format!("{}: {e}", self.path.display())))?;
        let file: InventoryFile = toml::from_str(&content)
            .map_err(|e| ExecError::Inventory(format!("{}: {e}", self.path.display())))?;

        debug!(path = %self.path.display(), nodes = file.node.len(), "loaded inventory");
        Ok(file.node)
    }
}

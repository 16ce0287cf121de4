//! Node registry: which testbed nodes exist and where their series live.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extension of per-node series files inside the data directory
pub const SERIES_EXTENSION: &str = "jsonl";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read node list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A testbed node and the location of its raw series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub location: PathBuf,
}

/// Set of known nodes, ordered by identifier.
///
/// Every cross-node expression iterates nodes through [`Registry::nodes`], so
/// operand lists come out in the same order on every build.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    nodes: BTreeMap<String, Node>,
}

impl Registry {
    /// Load a node list file. Each non-empty line is a comma separated record
    /// whose first field is the node identifier; the remaining fields are
    /// ignored.
    pub fn load<P: AsRef<Path>, D: AsRef<Path>>(path: P, data_dir: D) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content, data_dir))
    }

    /// Build a registry from node list text
    pub fn parse<D: AsRef<Path>>(content: &str, data_dir: D) -> Self {
        let mut registry = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let id = line.split(',').next().unwrap_or_default().trim();
            if id.is_empty() {
                continue;
            }
            registry.insert(id, series_location(data_dir.as_ref(), id));
        }
        registry
    }

    /// Register a node; a repeated identifier replaces the earlier location
    pub fn insert(&mut self, id: &str, location: PathBuf) {
        self.nodes.insert(
            id.to_string(),
            Node {
                id: id.to_string(),
                location,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes sorted by identifier
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<'a> FromIterator<&'a str> for Registry {
    /// Registry with locations relative to the current directory, mostly
    /// useful for building plans without touching the filesystem.
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut registry = Self::default();
        for id in iter {
            registry.insert(id, series_location(Path::new("."), id));
        }
        registry
    }
}

fn series_location(data_dir: &Path, id: &str) -> PathBuf {
    data_dir.join(format!("{}.{}", id, SERIES_EXTENSION))
}

//! Hierarchy persistence.
//!
//! The hierarchy snapshot is the authoritative schema of a corpus. Stores
//! are keyed by corpus name; a missing snapshot loads as `None` so callers
//! can start from an empty hierarchy.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::Hierarchy;
use crate::{Error, Result};

/// Load/save contract for hierarchy snapshots.
pub trait HierarchyStore: Send + Sync + 'static {
    fn load(&self, corpus_name: &str) -> Result<Option<Hierarchy>>;
    fn save(&self, hierarchy: &Hierarchy) -> Result<()>;
}

// ============================================================================
// MemoryStore
// ============================================================================

/// Keeps snapshots for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<String, Hierarchy>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HierarchyStore for MemoryStore {
    fn load(&self, corpus_name: &str) -> Result<Option<Hierarchy>> {
        Ok(self.snapshots.read().get(corpus_name).cloned())
    }

    fn save(&self, hierarchy: &Hierarchy) -> Result<()> {
        self.snapshots
            .write()
            .insert(hierarchy.corpus_name.clone(), hierarchy.clone());
        Ok(())
    }
}

// ============================================================================
// JsonFileStore
// ============================================================================

/// One `<corpus>.hierarchy.json` file per corpus in a directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, corpus_name: &str) -> PathBuf {
        let safe: String = corpus_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.hierarchy.json"))
    }

    fn read(path: &Path) -> Result<Hierarchy> {
        let text = fs::read_to_string(path)?;
        let hierarchy: Hierarchy = serde_json::from_str(&text)?;
        hierarchy.validate()?;
        Ok(hierarchy)
    }
}

impl HierarchyStore for JsonFileStore {
    fn load(&self, corpus_name: &str) -> Result<Option<Hierarchy>> {
        let path = self.path_for(corpus_name);
        if !path.exists() {
            return Ok(None);
        }
        let hierarchy = Self::read(&path)?;
        if hierarchy.corpus_name != corpus_name {
            return Err(Error::HierarchyError(format!(
                "{} holds the hierarchy of '{}', not '{corpus_name}'",
                path.display(),
                hierarchy.corpus_name
            )));
        }
        Ok(Some(hierarchy))
    }

    fn save(&self, hierarchy: &Hierarchy) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&hierarchy.corpus_name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(hierarchy)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

//! Dotted-path module registry (spec.md §4.1, §6).
//!
//! Built once at startup from the set of linked transport modules, then read
//! many times by the graph builder and scheduler. Grounded on the teacher's
//! `transport::registry` build-once/read-many `RwLock` pattern.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{codes, ErrorCategory, PlumberError};
use crate::module::Module;

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("module already registered at path {0:?}")]
    Duplicate(Box<str>),
}

/// Path-keyed module table. Lookup is by exact path (e.g. `pipe.tcp`) or by
/// prefix (e.g. every module mounted under `pipe.`), matching the original
/// C `modtab.h`'s listing semantics.
#[derive(Default)]
pub struct ModuleRegistry {
    inner: RwLock<BTreeMap<Box<str>, Arc<dyn Module>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, module: Arc<dyn Module>) -> std::result::Result<(), RegisterError> {
        let path: Box<str> = module.path().into();
        let mut guard = self.inner.write();
        if guard.contains_key(&path) {
            return Err(RegisterError::Duplicate(path));
        }
        guard.insert(path, module);
        Ok(())
    }

    pub fn lookup(&self, path: &str) -> Option<Arc<dyn Module>> {
        self.inner.read().get(path).cloned()
    }

    pub fn require(&self, path: &str) -> crate::error::Result<Arc<dyn Module>> {
        self.lookup(path).ok_or_else(|| {
            PlumberError::new(
                codes::MODULE_NOT_FOUND,
                ErrorCategory::Usage,
                format!("no module registered at path {path:?}"),
            )
        })
    }

    /// All modules whose path starts with `prefix` (e.g. `"pipe."`).
    pub fn by_prefix(&self, prefix: &str) -> Vec<Arc<dyn Module>> {
        self.inner
            .read()
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(_, module)| Arc::clone(module))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

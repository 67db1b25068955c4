// SPDX-License-Identifier: Apache-2.0

//! Dedup registry: at most one running harvester per file identity.
//!
//! One `Registry` is shared (behind an `Arc`) by every harvester of a process.
//! The lock is held only for the map insert or removal, never across I/O.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::harvester::error::{Error, Result};
use crate::harvester::file_id::FileId;

#[derive(Debug, Default)]
pub struct Registry {
    active: Mutex<HashMap<FileId, PathBuf>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `file_id` for the harvester reading `path`.
    ///
    /// Fails with [`Error::NoIdentity`] when the file could not be identified
    /// and with [`Error::AlreadyRegistered`] when another harvester owns it.
    pub fn register(&self, file_id: Option<FileId>, path: &Path) -> Result<()> {
        let file_id = file_id.ok_or_else(|| Error::NoIdentity(path.to_path_buf()))?;
        self.insert(file_id, path)
    }

    /// Removing an identity that is not registered is a no-op.
    pub fn unregister(&self, file_id: &FileId) {
        self.lock().remove(file_id);
    }

    /// Registers and returns a guard that unregisters when dropped.
    pub fn claim(self: &Arc<Self>, file_id: Option<FileId>, path: &Path) -> Result<Registration> {
        let file_id = file_id.ok_or_else(|| Error::NoIdentity(path.to_path_buf()))?;
        self.insert(file_id, path)?;
        Ok(Registration {
            registry: Arc::clone(self),
            file_id,
        })
    }

    pub fn contains(&self, file_id: &FileId) -> bool {
        self.lock().contains_key(file_id)
    }

    /// Path of the harvester currently owning `file_id`.
    pub fn owner(&self, file_id: &FileId) -> Option<PathBuf> {
        self.lock().get(file_id).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.lock().values().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn insert(&self, file_id: FileId, path: &Path) -> Result<()> {
        let mut active = self.lock();
        if let Some(owner) = active.get(&file_id) {
            debug!(%file_id, ?path, ?owner, "File is already being harvested");
            return Err(Error::AlreadyRegistered(file_id));
        }
        active.insert(file_id, path.to_path_buf());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FileId, PathBuf>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Live registry entry; dropping it releases the file identity.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<Registry>,
    file_id: FileId,
}

impl Registration {
    pub fn file_id(&self) -> FileId {
        self.file_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.file_id);
    }
}

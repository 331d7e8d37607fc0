use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Per-path exclusive regions for reads and writes of note files.
///
/// A region over several paths takes the path locks in sorted order, so two
/// regions over overlapping path sets cannot deadlock. Locks are dropped from
/// the table once nobody holds or waits on them.
#[derive(Default)]
pub struct WriteCoordinator {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl WriteCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coordinate<T>(&self, paths: &[&Path], f: impl FnOnce() -> T) -> T {
        let mut keys: Vec<PathBuf> = paths.iter().map(|p| p.to_path_buf()).collect();
        keys.sort();
        keys.dedup();

        let handles: Vec<Arc<Mutex<()>>> = {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            keys.iter()
                .map(|key| Arc::clone(table.entry(key.clone()).or_default()))
                .collect()
        };

        let guards: Vec<_> = handles
            .iter()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();

        let out = f();

        drop(guards);
        drop(handles);
        self.prune(&keys);
        out
    }

    fn prune(&self, keys: &[PathBuf]) {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if table.get(key).map_or(false, |m| Arc::strong_count(m) == 1) {
                table.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn tracked_paths(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

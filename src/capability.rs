//! Scoped access to a restricted root folder.
//!
//! Some platforms only let the process touch a user-chosen folder while an
//! access token is held. Every filesystem operation of the repository runs
//! inside [`ScopedAccess::run`], which starts access before and stops it after,
//! including on early returns and errors.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub trait Capability: Send + Sync {
    fn root(&self) -> &Path;
    /// Returns false when access could not be started.
    fn start_access(&self) -> bool;
    fn stop_access(&self);
}

pub trait CapabilityProvider: Send + Sync {
    fn acquire(&self) -> Option<Arc<dyn Capability>>;
}

/// Plain folder grant: access is available whenever the folder can be listed.
pub struct FolderGrant {
    root: PathBuf,
    active: AtomicUsize,
}

impl FolderGrant {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FolderGrant {
            root: root.into(),
            active: AtomicUsize::new(0),
        }
    }

    pub fn active_scopes(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

impl Capability for FolderGrant {
    fn root(&self) -> &Path {
        &self.root
    }

    fn start_access(&self) -> bool {
        if fs::read_dir(&self.root).is_err() {
            return false;
        }
        self.active.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn stop_access(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Provider that grants a [`FolderGrant`] for an existing, readable folder.
pub struct FolderGrantProvider {
    root: PathBuf,
}

impl FolderGrantProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FolderGrantProvider { root: root.into() }
    }
}

impl CapabilityProvider for FolderGrantProvider {
    fn acquire(&self) -> Option<Arc<dyn Capability>> {
        if !self.root.is_dir() {
            log::warn!("[capability] Folder not available: {:?}", self.root);
            return None;
        }
        let grant = FolderGrant::new(self.root.clone());
        if !grant.start_access() {
            log::warn!("[capability] Folder not readable: {:?}", self.root);
            return None;
        }
        grant.stop_access();
        Some(Arc::new(grant))
    }
}

/// Optional capability plus the guard logic around it. Without a capability
/// the scope is a no-op.
#[derive(Clone, Default)]
pub struct ScopedAccess {
    capability: Option<Arc<dyn Capability>>,
}

impl ScopedAccess {
    pub fn new(capability: Option<Arc<dyn Capability>>) -> Self {
        ScopedAccess { capability }
    }

    pub fn unrestricted() -> Self {
        ScopedAccess { capability: None }
    }

    pub fn is_restricted(&self) -> bool {
        self.capability.is_some()
    }

    pub fn enter(&self) -> AccessGuard<'_> {
        let capability = self.capability.as_deref();
        let active = match capability {
            Some(cap) => {
                let started = cap.start_access();
                if !started {
                    log::warn!("[capability] start_access failed for {:?}", cap.root());
                }
                started
            }
            None => false,
        };
        AccessGuard { capability, active }
    }

    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.enter();
        f()
    }
}

pub struct AccessGuard<'a> {
    capability: Option<&'a dyn Capability>,
    active: bool,
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Some(cap) = self.capability {
                cap.stop_access();
            }
        }
    }
}

/// Pick the configured restricted root when its capability can be acquired,
/// otherwise fall back to `default_root` with no capability.
pub fn resolve_root(
    provider: Option<&dyn CapabilityProvider>,
    default_root: &Path,
) -> (PathBuf, ScopedAccess) {
    if let Some(provider) = provider {
        match provider.acquire() {
            Some(cap) => {
                let root = cap.root().to_path_buf();
                log::info!("[capability] Using restricted root {:?}", root);
                return (root, ScopedAccess::new(Some(cap)));
            }
            None => {
                log::warn!(
                    "[capability] Could not acquire configured root, falling back to {:?}",
                    default_root
                );
            }
        }
    }
    (default_root.to_path_buf(), ScopedAccess::unrestricted())
}

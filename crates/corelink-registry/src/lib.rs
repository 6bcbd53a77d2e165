//! Component driver registry for the corelink control plane.
//!
//! Drivers are registered once at boot and resolved in two ways:
//!
//! - **By UUID**: a linear scan over the registered drivers.
//! - **By module id**: the boot manifest maps the module id to a UUID, which
//!   is then scanned for. Hits are cached for the life of the registry since
//!   the module-to-driver binding never changes once the image is loaded.
//!   Misses are not cached.
//!
//! A miss is never fatal; the control plane reports it to the host as an
//! invalid resource id.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use corelink_core::{DriverLookup, ModuleManifest};
//! use corelink_registry::{COPIER_UUID, DriverRegistry};
//! use uuid::Uuid;
//!
//! struct OneModule;
//! impl ModuleManifest for OneModule {
//!     fn module_uuid(&self, module_id: u16) -> Option<Uuid> {
//!         (module_id == 1).then_some(COPIER_UUID)
//!     }
//! }
//!
//! let registry = DriverRegistry::with_builtin(Arc::new(OneModule));
//! assert_eq!(registry.resolve_by_module(1).unwrap().name(), "copier");
//! assert!(registry.by_module(2).is_none());
//! ```

mod passthrough;

use std::collections::HashMap;
use std::sync::Arc;

use corelink_core::{ComponentDriver, DriverLookup, ModuleManifest};
use parking_lot::RwLock;
use uuid::Uuid;

pub use passthrough::{COPIER_UUID, MIXIN_UUID, Passthrough, PassthroughDriver, PassthroughKind};

/// Registry of every component driver in the image.
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn ComponentDriver>>,
    modules: RwLock<HashMap<u16, Arc<dyn ComponentDriver>>>,
    manifest: Arc<dyn ModuleManifest>,
}

impl DriverRegistry {
    /// Empty registry resolving module ids through `manifest`.
    pub fn new(manifest: Arc<dyn ModuleManifest>) -> Self {
        Self {
            drivers: Vec::new(),
            modules: RwLock::new(HashMap::new()),
            manifest,
        }
    }

    /// Registry with the built-in `copier` and `mixin` drivers.
    pub fn with_builtin(manifest: Arc<dyn ModuleManifest>) -> Self {
        let mut registry = Self::new(manifest);
        registry.register(Arc::new(PassthroughDriver::new(PassthroughKind::Copier)));
        registry.register(Arc::new(PassthroughDriver::new(PassthroughKind::Mixin)));
        registry
    }

    /// Adds a driver. Later registrations with the same UUID are shadowed by
    /// earlier ones.
    pub fn register(&mut self, driver: Arc<dyn ComponentDriver>) {
        tracing::debug!(uuid = %driver.uuid(), name = driver.name(), "driver registered");
        self.drivers.push(driver);
    }

    /// Registered drivers in registration order.
    pub fn drivers(&self) -> impl Iterator<Item = &Arc<dyn ComponentDriver>> {
        self.drivers.iter()
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// True if no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Number of module ids resolved so far.
    pub fn cached_modules(&self) -> usize {
        self.modules.read().len()
    }

    /// Finds the driver with this UUID.
    pub fn resolve_by_uuid(&self, uuid: &Uuid) -> Option<Arc<dyn ComponentDriver>> {
        let found = self.drivers.iter().find(|d| d.uuid() == *uuid).cloned();
        if found.is_none() {
            tracing::error!(%uuid, "no driver registered for uuid");
        }
        found
    }

    /// Finds the driver bound to `module_id` in the boot manifest.
    pub fn resolve_by_module(&self, module_id: u16) -> Option<Arc<dyn ComponentDriver>> {
        if let Some(driver) = self.modules.read().get(&module_id) {
            return Some(Arc::clone(driver));
        }

        let Some(uuid) = self.manifest.module_uuid(module_id) else {
            tracing::error!(module_id, "module not in manifest");
            return None;
        };
        let driver = self.resolve_by_uuid(&uuid)?;
        // Two cores may race here; both resolve to the same driver.
        self.modules
            .write()
            .entry(module_id)
            .or_insert_with(|| Arc::clone(&driver));
        tracing::debug!(module_id, %uuid, name = driver.name(), "module resolved");
        Some(driver)
    }
}

impl DriverLookup for DriverRegistry {
    fn by_uuid(&self, uuid: &Uuid) -> Option<Arc<dyn ComponentDriver>> {
        self.resolve_by_uuid(uuid)
    }

    fn by_module(&self, module_id: u16) -> Option<Arc<dyn ComponentDriver>> {
        self.resolve_by_module(module_id)
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.iter().map(|d| d.name()).collect::<Vec<_>>())
            .field("cached_modules", &self.cached_modules())
            .finish_non_exhaustive()
    }
}

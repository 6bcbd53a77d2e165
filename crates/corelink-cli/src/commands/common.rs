//! Shared CLI helpers used across multiple commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use corelink_config::{PlatformConfig, Step};
use corelink_core::{CacheOps, CoherentCache, CompId, ControlPlane, HeapAllocator, IpcError};
use corelink_registry::DriverRegistry;

/// Load the platform description, or the built-in default when no path is
/// given.
pub fn load_platform(path: Option<&Path>) -> anyhow::Result<PlatformConfig> {
    let platform = match path {
        Some(path) => PlatformConfig::load(path)
            .with_context(|| format!("loading platform {}", path.display()))?,
        None => PlatformConfig::default(),
    };
    platform.validate()?;
    Ok(platform)
}

/// Driver registry with the built-in drivers, resolving modules through the
/// platform manifest.
pub fn registry(platform: &PlatformConfig) -> DriverRegistry {
    DriverRegistry::with_builtin(Arc::new(platform.manifest()))
}

/// A started control plane plus the heap it allocates from.
pub struct Session {
    pub plane: ControlPlane,
    pub heap: Arc<HeapAllocator>,
}

/// Start a control plane for `platform`.
pub fn start(platform: &PlatformConfig, cache: Option<Arc<dyn CacheOps>>) -> anyhow::Result<Session> {
    let heap = Arc::new(HeapAllocator::new(platform.heap));
    let plane = ControlPlane::builder(Arc::new(registry(platform)))
        .cores(platform.cores)
        .allocator(heap.clone())
        .cache(cache.unwrap_or_else(|| Arc::new(CoherentCache)))
        .build()
        .context("starting core workers")?;
    Ok(Session { plane, heap })
}

/// Execute one lowered script step.
pub fn execute(plane: &ControlPlane, step: Step) -> Result<(), IpcError> {
    match step {
        Step::Dispatch(command) => plane.dispatch(command),
        Step::Trigger { comp_id, cmd } => {
            CompId::from_raw(comp_id).and_then(|comp| plane.trigger(comp, cmd))
        }
        Step::Copy { comp_id } => CompId::from_raw(comp_id).and_then(|comp| plane.copy(comp)),
    }
}

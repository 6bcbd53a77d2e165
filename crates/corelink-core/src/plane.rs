//! The control plane: command dispatch over the shared object model.
//!
//! [`ControlPlane`] owns the object container, the collaborator capabilities
//! and one worker per core. Host commands enter through
//! [`ControlPlane::dispatch`] and run on the calling thread as the primary
//! core; anything owned by another core is forwarded to that core's worker
//! and awaited.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use corelink_core::{Command, ComponentDriver, ControlPlane, CoreId, DriverLookup, PipelineId};
//! use uuid::Uuid;
//!
//! struct NoDrivers;
//! impl DriverLookup for NoDrivers {
//!     fn by_uuid(&self, _: &Uuid) -> Option<Arc<dyn ComponentDriver>> { None }
//!     fn by_module(&self, _: u16) -> Option<Arc<dyn ComponentDriver>> { None }
//! }
//!
//! let plane = ControlPlane::builder(Arc::new(NoDrivers)).cores(2).build().unwrap();
//! plane
//!     .dispatch(Command::PipelineNew {
//!         instance_id: 1,
//!         priority: 0,
//!         core: CoreId(1),
//!         sched_id: None,
//!     })
//!     .unwrap();
//! assert!(plane.inspect(|c| c.pipeline(PipelineId(1)).is_some()));
//! ```

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Mutex, MutexGuard};

use crate::affinity::{Mailboxes, Request, spawn_worker};
use crate::cache::{CacheOps, CoherentCache};
use crate::command::Command;
use crate::component::{ComponentCall, DriverLookup, TriggerCmd};
use crate::container::ObjectContainer;
use crate::error::IpcError;
use crate::id::{CompId, CoreId, PipelineId};
use crate::memory::{Allocator, HeapAllocator};
use crate::pipeline::{NoopScheduler, PipelineScheduler};
use crate::snapshot::Snapshot;

/// State shared between the host thread and every core worker.
pub(crate) struct Inner {
    container: Mutex<ObjectContainer>,
    pub(crate) drivers: Arc<dyn DriverLookup>,
    pub(crate) allocator: Arc<dyn Allocator>,
    pub(crate) cache: Arc<dyn CacheOps>,
    pub(crate) scheduler: Arc<dyn PipelineScheduler>,
    pub(crate) mailboxes: Mailboxes,
    halted: AtomicBool,
}

impl Inner {
    /// Scoped container lock. Never held across a forward.
    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, ObjectContainer> {
        self.container.lock()
    }

    /// Number of cores.
    #[inline]
    pub(crate) fn cores(&self) -> usize {
        self.mailboxes.cores()
    }

    /// Refuses every further command.
    pub(crate) fn halt(&self, reason: &'static str) -> IpcError {
        self.halted.store(true, Ordering::SeqCst);
        #[cfg(feature = "tracing")]
        tracing::error!(reason, "control plane halted");
        IpcError::Fatal(reason)
    }

    fn check_running(&self) -> Result<(), IpcError> {
        if self.halted.load(Ordering::SeqCst) {
            Err(IpcError::Fatal("control plane halted"))
        } else {
            Ok(())
        }
    }

    /// Calls into a component's ops, forwarding when it is shared and owned
    /// by another core.
    pub(crate) fn call(&self, on: CoreId, comp: CompId, call: ComponentCall) -> Result<(), IpcError> {
        let owner = {
            let container = self.lock();
            let component = container
                .component(comp)
                .ok_or(IpcError::InvalidResourceId)?;
            component.needs_forwarding(on).then_some(component.core())
        };
        if let Some(owner) = owner {
            return self.forward(on, owner, Request::Call { comp, call });
        }

        let mut container = self.lock();
        let component = container
            .component_mut(comp)
            .ok_or(IpcError::InvalidResourceId)?;
        component.call(&call)
    }
}

/// The control plane of a multi-core DSP.
///
/// Dropping the plane stops and joins every core worker.
///
/// The plane may be shared between threads, but host entry points
/// ([`dispatch`](Self::dispatch), [`trigger`](Self::trigger),
/// [`copy`](Self::copy)) are serialized: there is one primary core, so at
/// most one host command is in flight at a time.
pub struct ControlPlane {
    inner: Arc<Inner>,
    host: Mutex<()>,
    workers: Vec<JoinHandle<()>>,
}

impl ControlPlane {
    /// Starts configuring a control plane that resolves drivers through
    /// `drivers`.
    pub fn builder(drivers: Arc<dyn DriverLookup>) -> ControlPlaneBuilder {
        ControlPlaneBuilder {
            drivers,
            cores: 1,
            allocator: None,
            cache: None,
            scheduler: None,
        }
    }

    /// Executes one host command on the primary core.
    pub fn dispatch(&self, command: Command) -> Result<(), IpcError> {
        let _host = self.host.lock();
        self.inner.check_running()?;
        #[cfg(feature = "tracing")]
        let name = command.name();
        let on = CoreId::PRIMARY;
        let inner = &self.inner;

        let result = match command {
            Command::PipelineNew {
                instance_id,
                priority,
                core,
                sched_id,
            } => inner.pipeline_new(on, core, PipelineId(instance_id), priority, sched_id),
            Command::PipelineComplete { pipeline_id } => inner.pipeline_complete(on, pipeline_id),
            Command::PipelineFree { pipeline_id } => inner.pipeline_free(on, pipeline_id),
            Command::ModuleBind(req) => inner.bind(on, &req),
            Command::ModuleUnbind(req) => inner.unbind(on, &req),
            Command::ComponentNew(spec) => inner.component_new(on, spec),
            Command::ComponentFree { comp_id } => {
                CompId::from_raw(comp_id).and_then(|id| inner.component_free(on, id))
            }
            Command::ComponentSetParams {
                comp_id,
                flags,
                params,
            } => CompId::from_raw(comp_id)
                .and_then(|id| inner.component_set_params(on, id, flags, params)),
        };

        #[cfg(feature = "tracing")]
        match &result {
            Ok(()) => tracing::debug!(command = name, "ok"),
            Err(e) => tracing::warn!(command = name, error = %e, status = %e.status(), "failed"),
        }
        result
    }

    /// Applies a trigger to a component on its owning core.
    pub fn trigger(&self, comp: CompId, cmd: TriggerCmd) -> Result<(), IpcError> {
        let _host = self.host.lock();
        self.inner.check_running()?;
        self.inner.trigger(CoreId::PRIMARY, comp, cmd)
    }

    /// Runs one processing block of a component.
    ///
    /// Entry point for the external scheduler's periodic callback.
    pub fn copy(&self, comp: CompId) -> Result<(), IpcError> {
        let _host = self.host.lock();
        self.inner.check_running()?;
        self.inner.call(CoreId::PRIMARY, comp, ComponentCall::Copy)
    }

    /// Number of cores.
    pub fn cores(&self) -> usize {
        self.inner.cores()
    }

    /// True once a fatal condition stopped the plane.
    pub fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    /// Read-only access to the object container.
    pub fn inspect<R>(&self, f: impl FnOnce(&ObjectContainer) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Serializable view of every live object.
    pub fn snapshot(&self) -> Snapshot {
        self.inspect(Snapshot::capture)
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        self.inner.mailboxes.shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl core::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("cores", &self.cores())
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ControlPlane`].
pub struct ControlPlaneBuilder {
    drivers: Arc<dyn DriverLookup>,
    cores: u8,
    allocator: Option<Arc<dyn Allocator>>,
    cache: Option<Arc<dyn CacheOps>>,
    scheduler: Option<Arc<dyn PipelineScheduler>>,
}

impl ControlPlaneBuilder {
    /// Number of DSP cores (at least one). Defaults to 1.
    pub fn cores(mut self, cores: u8) -> Self {
        self.cores = cores.max(1);
        self
    }

    /// Allocator for every object. Defaults to a [`HeapAllocator`] with
    /// default budgets.
    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Cache-maintenance capability. Defaults to [`CoherentCache`].
    pub fn cache(mut self, cache: Arc<dyn CacheOps>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Pipeline completion hook. Defaults to [`NoopScheduler`].
    pub fn scheduler(mut self, scheduler: Arc<dyn PipelineScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Starts the core workers.
    ///
    /// # Errors
    ///
    /// Fails if a worker thread cannot be spawned.
    pub fn build(self) -> io::Result<ControlPlane> {
        let (mailboxes, receivers) = Mailboxes::new(self.cores);
        let inner = Arc::new(Inner {
            container: Mutex::new(ObjectContainer::new()),
            drivers: self.drivers,
            allocator: self
                .allocator
                .unwrap_or_else(|| Arc::new(HeapAllocator::default())),
            cache: self.cache.unwrap_or_else(|| Arc::new(CoherentCache)),
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(NoopScheduler)),
            mailboxes,
            halted: AtomicBool::new(false),
        });

        let mut plane = ControlPlane {
            inner,
            host: Mutex::new(()),
            workers: Vec::with_capacity(receivers.len()),
        };
        for mailbox in receivers {
            let worker = spawn_worker(Arc::clone(&plane.inner), mailbox)?;
            plane.workers.push(worker);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(cores = plane.cores(), "control plane started");
        Ok(plane)
    }
}

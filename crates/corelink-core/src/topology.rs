//! Pipeline manager: creation, completion and recursive teardown.

use crate::affinity::Request;
use crate::container::{Entry, Object};
use crate::error::IpcError;
use crate::id::{CoreId, ObjectId, ObjectKind, PipelineId};
use crate::memory::{MemCaps, MemZone, PLATFORM_DCACHE_ALIGN};
use crate::pipeline::{Pipeline, PipelineState};
use crate::plane::Inner;

impl Inner {
    /// Creates a pipeline on its owning core.
    pub(crate) fn pipeline_new(
        &self,
        on: CoreId,
        core: CoreId,
        id: PipelineId,
        priority: u32,
        sched_id: Option<u32>,
    ) -> Result<(), IpcError> {
        if core.index() >= self.cores() {
            #[cfg(feature = "tracing")]
            tracing::error!(pipeline = %id, %core, "no such core");
            return Err(IpcError::InvalidRequest);
        }
        if core != on {
            return self.forward(
                on,
                core,
                Request::PipelineNew {
                    id,
                    priority,
                    sched_id,
                },
            );
        }
        if self.lock().contains(ObjectId::Pipeline(id)) {
            #[cfg(feature = "tracing")]
            tracing::warn!(pipeline = %id, "pipeline already exists");
            return Err(IpcError::ResourceAlreadyExists);
        }

        let memory = self
            .allocator
            .alloc(
                MemZone::Runtime,
                MemCaps::RAM,
                size_of::<Pipeline>(),
                PLATFORM_DCACHE_ALIGN,
            )
            .ok_or(IpcError::OutOfMemory)?;
        let Some(bookkeeping) = self.allocator.alloc(
            MemZone::RuntimeShared,
            MemCaps::RAM,
            size_of::<Entry>(),
            PLATFORM_DCACHE_ALIGN,
        ) else {
            self.allocator.free(memory);
            return Err(IpcError::OutOfMemory);
        };

        let pipeline = Pipeline::new(id, priority, sched_id, on, memory);
        let mut container = self.lock();
        if container.contains(ObjectId::Pipeline(id)) {
            drop(container);
            self.allocator.free(pipeline.memory);
            self.allocator.free(bookkeeping);
            return Err(IpcError::ResourceAlreadyExists);
        }
        self.cache.writeback(pipeline.memory.range());
        container.insert(Entry::pipeline(pipeline, bookkeeping))?;

        #[cfg(feature = "tracing")]
        tracing::info!(pipeline = %id, priority, core = %on, "pipeline created");
        Ok(())
    }

    /// Resolves the scheduling component and hands the topology to the
    /// scheduler.
    pub(crate) fn pipeline_complete(&self, on: CoreId, id: PipelineId) -> Result<(), IpcError> {
        let owner = self.pipeline_core(id)?;
        if owner != on {
            return self.forward(on, owner, Request::PipelineComplete(id));
        }

        let (info, source, sink) = {
            let mut container = self.lock();
            let pipeline = container.pipeline(id).ok_or(IpcError::ResourceNotFound)?;
            let Some(raw) = pipeline.sched_id() else {
                #[cfg(feature = "tracing")]
                tracing::error!(pipeline = %id, "no scheduling component declared");
                return Err(IpcError::InvalidRequest);
            };
            let sched = match container.get_by_raw(raw).map(|e| &e.object) {
                Some(Object::Component(c)) if c.core() == pipeline.core() => c.id(),
                _other => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        pipeline = %id,
                        sched = format_args!("{raw:#x}"),
                        "scheduling component missing, foreign or not a component"
                    );
                    return Err(IpcError::InvalidRequest);
                }
            };

            let pipeline = container
                .pipeline_mut(id)
                .ok_or(IpcError::ResourceNotFound)?;
            pipeline.sched_comp = Some(sched);
            self.cache.writeback(pipeline.memory.range());
            (pipeline.info(), pipeline.source_comp(), pipeline.sink_comp())
        };

        self.scheduler
            .complete(&info, source, sink)
            .map_err(|_e| {
                #[cfg(feature = "tracing")]
                tracing::error!(pipeline = %id, error = %_e, "scheduler rejected topology");
                IpcError::InvalidRequest
            })?;

        let mut container = self.lock();
        let pipeline = container
            .pipeline_mut(id)
            .ok_or(IpcError::ResourceNotFound)?;
        pipeline.state = PipelineState::Completed;
        self.cache.writeback(pipeline.memory.range());

        #[cfg(feature = "tracing")]
        tracing::info!(pipeline = %id, "pipeline complete");
        Ok(())
    }

    /// Frees every component of the pipeline, then the pipeline itself.
    pub(crate) fn pipeline_free(&self, on: CoreId, id: PipelineId) -> Result<(), IpcError> {
        let owner = self.pipeline_core(id)?;
        if owner != on {
            return self.forward(on, owner, Request::PipelineFree(id));
        }

        let previous = self.set_pipeline_state(id, PipelineState::Freeing)?;
        loop {
            let next = self
                .lock()
                .first_in_pipeline(ObjectKind::Component, id)
                .and_then(|e| match e.id {
                    ObjectId::Component(comp) => Some((comp, e.core)),
                    _ => None,
                });
            let Some((comp, core)) = next else {
                break;
            };
            if let Err(_e) = self.forward(on, core, Request::ComponentFree(comp)) {
                #[cfg(feature = "tracing")]
                tracing::error!(pipeline = %id, %comp, error = %_e, "cascading free failed");
                self.set_pipeline_state(id, previous)?;
                return Err(IpcError::InvalidResourceState);
            }
        }

        let entry = self
            .lock()
            .remove(ObjectId::Pipeline(id))
            .ok_or(IpcError::ResourceNotFound)?;
        if let Object::Pipeline(pipeline) = entry.object {
            self.allocator.free(pipeline.memory);
        }
        if let Some(bookkeeping) = entry.bookkeeping {
            self.allocator.free(bookkeeping);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(pipeline = %id, "pipeline freed");
        Ok(())
    }

    fn pipeline_core(&self, id: PipelineId) -> Result<CoreId, IpcError> {
        self.lock()
            .pipeline(id)
            .map(Pipeline::core)
            .ok_or_else(|| {
                #[cfg(feature = "tracing")]
                tracing::warn!(pipeline = %id, "pipeline not found");
                IpcError::ResourceNotFound
            })
    }

    fn set_pipeline_state(
        &self,
        id: PipelineId,
        state: PipelineState,
    ) -> Result<PipelineState, IpcError> {
        let mut container = self.lock();
        let pipeline = container
            .pipeline_mut(id)
            .ok_or(IpcError::ResourceNotFound)?;
        let previous = core::mem::replace(&mut pipeline.state, state);
        self.cache.writeback(pipeline.memory.range());
        Ok(previous)
    }
}

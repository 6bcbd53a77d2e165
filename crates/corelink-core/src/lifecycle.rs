//! Component lifecycle: creation, triggers, parameter verification and free.

use crate::affinity::Request;
use crate::buffer::{self, Buffer, ParamsFlags, StreamParams};
use crate::command::ComponentSpec;
use crate::component::{
    Component, ComponentCall, ComponentConfig, ComponentState, Direction, TriggerCmd,
};
use crate::container::{Entry, Object};
use crate::error::IpcError;
use crate::id::{BufferKey, CompId, CoreId, ObjectId};
use crate::memory::{MemCaps, MemZone, PLATFORM_DCACHE_ALIGN};
use crate::pipeline::{DEFAULT_PERIOD_US, PipelineState};
use crate::plane::Inner;

impl Inner {
    /// Instantiates a component on its requested core.
    pub(crate) fn component_new(&self, on: CoreId, spec: ComponentSpec) -> Result<(), IpcError> {
        let id = CompId::new(spec.module_id, spec.instance_id)?;
        if spec.core.index() >= self.cores() {
            #[cfg(feature = "tracing")]
            tracing::error!(comp = %id, core = %spec.core, "no such core");
            return Err(IpcError::InvalidRequest);
        }
        if spec.core != on {
            return self.forward(on, spec.core, Request::ComponentNew(Box::new(spec)));
        }

        let period_us = {
            let container = self.lock();
            if container.contains(ObjectId::Component(id)) {
                #[cfg(feature = "tracing")]
                tracing::warn!(comp = %id, "component already exists");
                return Err(IpcError::ResourceAlreadyExists);
            }
            match spec.pipeline_id {
                Some(pid) => container
                    .pipeline(pid)
                    .ok_or(IpcError::InvalidResourceId)?
                    .period_us(),
                None => DEFAULT_PERIOD_US,
            }
        };

        let driver = self.drivers.by_module(spec.module_id).ok_or_else(|| {
            #[cfg(feature = "tracing")]
            tracing::error!(module = spec.module_id, "no driver for module");
            IpcError::InvalidResourceId
        })?;

        let memory = self
            .allocator
            .alloc(
                MemZone::Runtime,
                MemCaps::RAM,
                size_of::<Component>(),
                PLATFORM_DCACHE_ALIGN,
            )
            .ok_or(IpcError::OutOfMemory)?;

        let config = ComponentConfig {
            id,
            pipeline_id: spec.pipeline_id,
            core: spec.core,
            base: spec.config,
            direction: spec.direction,
            init_data: spec.init_data,
        };
        let Some(ops) = driver.create(&config) else {
            #[cfg(feature = "tracing")]
            tracing::error!(comp = %id, driver = driver.name(), "driver rejected configuration");
            self.allocator.free(memory);
            return Err(IpcError::InvalidRequest);
        };

        let mut component = Component {
            id,
            core: spec.core,
            pipeline_id: spec.pipeline_id,
            state: ComponentState::Ready,
            roles: spec.roles,
            shared: false,
            config: spec.config,
            direction: spec.direction,
            period_us,
            period_frames: 0,
            sources: Vec::new(),
            sinks: Vec::new(),
            memory,
            ops,
        };

        let Some(bookkeeping) = self.allocator.alloc(
            MemZone::RuntimeShared,
            MemCaps::RAM,
            size_of::<Entry>(),
            PLATFORM_DCACHE_ALIGN,
        ) else {
            component.ops.free();
            self.allocator.free(component.memory);
            return Err(self.halt("component bookkeeping entry"));
        };

        let mut container = self.lock();
        if container.contains(ObjectId::Component(id)) {
            drop(container);
            component.ops.free();
            self.allocator.free(component.memory);
            self.allocator.free(bookkeeping);
            return Err(IpcError::ResourceAlreadyExists);
        }
        if let Some(pipeline) = spec.pipeline_id.and_then(|pid| container.pipeline_mut(pid)) {
            if spec.roles.source {
                pipeline.source_comp = Some(id);
            }
            if spec.roles.sink {
                pipeline.sink_comp = Some(id);
            }
            if spec.roles.scheduler {
                pipeline.sched_id = Some(id.raw());
            }
            if pipeline.state == PipelineState::Created {
                pipeline.state = PipelineState::Wiring;
            }
            self.cache.writeback(pipeline.memory.range());
        }
        component.writeback(self.cache.as_ref());
        container.insert(Entry::component(component, bookkeeping))?;

        #[cfg(feature = "tracing")]
        tracing::info!(comp = %id, core = %spec.core, driver = driver.name(), "component created");
        Ok(())
    }

    /// Frees a quiescent component together with every buffer attached to it.
    pub(crate) fn component_free(&self, on: CoreId, id: CompId) -> Result<(), IpcError> {
        let owner = self.component_core(id, IpcError::ResourceNotFound)?;
        if owner != on {
            return self.forward(on, owner, Request::ComponentFree(id));
        }

        let (entry, detached) = {
            let mut container = self.lock();
            let component = container
                .component(id)
                .ok_or(IpcError::ResourceNotFound)?;
            if component.state() != ComponentState::Ready {
                #[cfg(feature = "tracing")]
                tracing::warn!(comp = %id, state = ?component.state(), "component not ready");
                return Err(IpcError::BadState);
            }
            let pipeline_id = component.pipeline_id();
            let links: Vec<BufferKey> = component
                .sources()
                .iter()
                .chain(component.sinks())
                .copied()
                .collect();

            if let Some(pipeline) = pipeline_id.and_then(|pid| container.pipeline_mut(pid)) {
                pipeline.forget(id);
                self.cache.writeback(pipeline.memory.range());
            }

            let mut detached = Vec::with_capacity(links.len());
            for key in links {
                let Some(Entry {
                    object: Object::Buffer(mut buf),
                    ..
                }) = container.remove(ObjectId::Buffer(key))
                else {
                    continue;
                };
                let peer = if buf.producer == Some(id) {
                    buf.consumer
                } else {
                    buf.producer
                };
                if let Some(peer) = peer.and_then(|p| container.component_mut(p)) {
                    peer.sources.retain(|k| *k != key);
                    peer.sinks.retain(|k| *k != key);
                    peer.writeback(self.cache.as_ref());
                }
                buf.producer = None;
                buf.consumer = None;
                detached.push(*buf);
            }
            (container.remove(ObjectId::Component(id)), detached)
        };

        for buf in detached {
            buffer::free(self.allocator.as_ref(), buf);
        }
        let Some(Entry {
            object: Object::Component(component),
            bookkeeping,
            ..
        }) = entry
        else {
            return Err(IpcError::ResourceNotFound);
        };
        let Component {
            memory, mut ops, ..
        } = *component;
        ops.free();
        self.allocator.free(memory);
        if let Some(bookkeeping) = bookkeeping {
            self.allocator.free(bookkeeping);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(comp = %id, "component freed");
        Ok(())
    }

    /// Applies a trigger on the owning core.
    pub(crate) fn trigger(&self, on: CoreId, id: CompId, cmd: TriggerCmd) -> Result<(), IpcError> {
        let owner = self.component_core(id, IpcError::ResourceNotFound)?;
        if owner != on {
            return self.forward(on, owner, Request::Trigger { comp: id, cmd });
        }

        let mut container = self.lock();
        let component = container
            .component_mut(id)
            .ok_or(IpcError::ResourceNotFound)?;
        let next = component.state.apply(cmd)?;
        component.ops.trigger(cmd)?;
        component.state = next;
        component.writeback(self.cache.as_ref());

        #[cfg(feature = "tracing")]
        tracing::debug!(comp = %id, ?cmd, state = ?next, "triggered");
        Ok(())
    }

    /// Reconciles proposed stream parameters with the attached buffers, then
    /// hands the result to the component.
    ///
    /// An endpoint (exactly one side connected) takes its parameters from its
    /// first buffer. Any other component updates every buffer in its
    /// processing direction and derives its period from the first sink.
    pub(crate) fn component_set_params(
        &self,
        on: CoreId,
        id: CompId,
        flags: ParamsFlags,
        params: StreamParams,
    ) -> Result<(), IpcError> {
        let owner = self.component_core(id, IpcError::ResourceNotFound)?;
        if owner != on {
            return self.forward(
                on,
                owner,
                Request::SetParams {
                    comp: id,
                    flags,
                    params,
                },
            );
        }

        let mut params = params;
        {
            let mut container = self.lock();
            let component = container
                .component(id)
                .ok_or(IpcError::ResourceNotFound)?;
            let sources = component.sources().to_vec();
            let sinks = component.sinks().to_vec();
            let missing = || {
                #[cfg(feature = "tracing")]
                tracing::error!(comp = %id, "no buffer to verify parameters against");
                IpcError::InvalidResourceState
            };

            let rate = if sources.is_empty() != sinks.is_empty() {
                let key = sources.first().or(sinks.first()).ok_or_else(missing)?;
                let buf = container.buffer(*key).ok_or_else(missing)?;
                let rate = buf.exchange_params(flags, &mut params);
                buf.publish(self.cache.as_ref());
                rate
            } else {
                let downstream = match component.direction() {
                    Direction::Playback => &sinks,
                    Direction::Capture => &sources,
                };
                for key in downstream {
                    let buf = container.buffer(*key).ok_or_else(missing)?;
                    buf.exchange_params(flags, &mut params);
                    buf.publish(self.cache.as_ref());
                }
                let first_sink = sinks.first().ok_or_else(missing)?;
                container
                    .buffer(*first_sink)
                    .map(Buffer::stream)
                    .ok_or_else(missing)?
                    .rate
            };

            let component = container
                .component_mut(id)
                .ok_or(IpcError::ResourceNotFound)?;
            component.set_period_frames(rate);
            component.writeback(self.cache.as_ref());
        }

        self.call(on, id, ComponentCall::SetParams(params))
    }

    /// Owning core of a component, or `missing` if it does not exist.
    pub(crate) fn component_core(&self, id: CompId, missing: IpcError) -> Result<CoreId, IpcError> {
        self.lock()
            .component(id)
            .map(Component::core)
            .ok_or(missing)
    }
}

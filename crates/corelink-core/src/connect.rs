//! Connection protocol: bind and unbind.
//!
//! A bind creates a buffer between two components and splices it into the
//! producer's outbound list and the consumer's inbound list, each splice on
//! the core owning that list. When the two cores differ the buffer is marked
//! inter-core and the consumer is promoted to the shared calling convention
//! before it is wired. Both components are then told about the new queue.
//!
//! Any failure after the buffer exists rolls the bind back completely: no
//! component can reach a half-linked buffer afterwards.
//!
//! Unbind is the inverse, but components of one pipeline can not be rewired
//! at runtime, and the named sink must be the buffer's recorded consumer. Once the buffer memory is released it is never relinked, so a
//! component refusing the unbind is only reported.

use crate::affinity::Request;
use crate::buffer::{self, Buffer};
use crate::command::BindRequest;
use crate::component::{ComponentCall, Connection};
use crate::container::{Entry, Object, ObjectContainer};
use crate::error::IpcError;
use crate::id::{BufferKey, CoreId, ObjectId};
use crate::plane::Inner;

impl Inner {
    /// Connects two components through a new buffer.
    pub(crate) fn bind(&self, on: CoreId, req: &BindRequest) -> Result<(), IpcError> {
        let conn = req.connection()?;
        let key = conn.buffer_key();

        let (src_core, dst_core) = {
            let mut container = self.lock();
            let (Some(src), Some(dst)) = (container.component(conn.src), container.component(conn.dst))
            else {
                #[cfg(feature = "tracing")]
                tracing::error!(src = %conn.src, dst = %conn.dst, "bind endpoint not found");
                return Err(IpcError::InvalidResourceId);
            };
            if container.contains(ObjectId::Buffer(key)) {
                #[cfg(feature = "tracing")]
                tracing::error!(buffer = %key, "queue pair already bound");
                return Err(IpcError::InvalidResourceState);
            }
            let cores = (src.core(), dst.core());
            let buffer = buffer::create(
                self.allocator.as_ref(),
                self.cache.as_ref(),
                src,
                dst,
                &conn,
                req.flags,
            )?;
            container.insert(Entry::buffer(buffer))?;
            cores
        };

        if let Err(_e) = self.forward(on, src_core, Request::ConnectProducer(conn)) {
            #[cfg(feature = "tracing")]
            tracing::error!(buffer = %key, error = %_e, "producer splice failed");
            self.rollback(&conn);
            return Err(IpcError::InvalidResourceState);
        }
        if let Err(_e) = self.forward(on, dst_core, Request::ConnectConsumer(conn)) {
            #[cfg(feature = "tracing")]
            tracing::error!(buffer = %key, error = %_e, "consumer splice failed");
            self.rollback(&conn);
            return Err(IpcError::InvalidResourceState);
        }

        if let Err(_e) = self.call(on, conn.src, ComponentCall::Bind(conn)) {
            #[cfg(feature = "tracing")]
            tracing::error!(comp = %conn.src, error = %_e, "source refused bind");
            self.rollback(&conn);
            return Err(IpcError::InvalidResourceId);
        }
        if let Err(_e) = self.call(on, conn.dst, ComponentCall::Bind(conn)) {
            #[cfg(feature = "tracing")]
            tracing::error!(comp = %conn.dst, error = %_e, "sink refused bind");
            if let Err(_e) = self.call(on, conn.src, ComponentCall::Unbind(conn)) {
                #[cfg(feature = "tracing")]
                tracing::error!(comp = %conn.src, error = %_e, "source refused compensating unbind");
            }
            self.rollback(&conn);
            return Err(IpcError::InvalidResourceId);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(src = %conn.src, dst = %conn.dst, buffer = %key, "bound");
        Ok(())
    }

    /// Removes the buffer between two components of different pipelines.
    pub(crate) fn unbind(&self, on: CoreId, req: &BindRequest) -> Result<(), IpcError> {
        let conn = req.connection()?;
        let key = conn.buffer_key();

        let buffer = {
            let mut container = self.lock();
            let (Some(src), Some(dst)) = (container.component(conn.src), container.component(conn.dst))
            else {
                return Err(IpcError::InvalidResourceId);
            };
            if src.pipeline_id().is_some() && src.pipeline_id() == dst.pipeline_id() {
                #[cfg(feature = "tracing")]
                tracing::error!(src = %conn.src, dst = %conn.dst, "unbind within one pipeline");
                return Err(IpcError::InvalidRequest);
            }
            if !src.sinks().contains(&key) {
                #[cfg(feature = "tracing")]
                tracing::error!(buffer = %key, "buffer not found among source sinks");
                return Err(IpcError::InvalidResourceId);
            }
            let consumer = container.buffer(key).and_then(|b| b.consumer);
            if consumer != Some(conn.dst) {
                #[cfg(feature = "tracing")]
                tracing::error!(buffer = %key, dst = %conn.dst, "buffer consumed by another component");
                return Err(IpcError::InvalidResourceId);
            }
            self.unlink(&mut container, &conn)
        };
        if let Some(buffer) = buffer {
            buffer::free(self.allocator.as_ref(), buffer);
        }

        let src = self.call(on, conn.src, ComponentCall::Unbind(conn));
        let dst = self.call(on, conn.dst, ComponentCall::Unbind(conn));
        src.and(dst).map_err(|_e| {
            #[cfg(feature = "tracing")]
            tracing::error!(buffer = %key, error = %_e, "component refused unbind");
            IpcError::InvalidResourceId
        })?;

        #[cfg(feature = "tracing")]
        tracing::info!(src = %conn.src, dst = %conn.dst, buffer = %key, "unbound");
        Ok(())
    }

    /// Producer-side splice. Runs on the producer's core.
    pub(crate) fn connect_producer(&self, conn: &Connection) -> Result<(), IpcError> {
        let key = conn.buffer_key();
        let mut container = self.lock();
        let (comp, buf) = container
            .component_and_buffer_mut(conn.src, key)
            .ok_or(IpcError::InvalidResourceState)?;

        comp.sinks.insert(0, key);
        buf.producer = Some(comp.id());
        comp.writeback(self.cache.as_ref());
        buf.publish(self.cache.as_ref());
        Ok(())
    }

    /// Consumer-side splice. Runs on the consumer's core.
    pub(crate) fn connect_consumer(&self, conn: &Connection) -> Result<(), IpcError> {
        let key = conn.buffer_key();
        let mut container = self.lock();
        let (comp, buf) = container
            .component_and_buffer_mut(conn.dst, key)
            .ok_or(IpcError::InvalidResourceState)?;

        if buf.core() != comp.core() {
            buf.refresh(self.cache.as_ref());
            buf.inter_core = true;
            if !comp.is_shared() {
                comp.make_shared(self.allocator.as_ref(), self.cache.as_ref())?;
            }
        }
        comp.sources.insert(0, key);
        buf.consumer = Some(comp.id());
        comp.writeback(self.cache.as_ref());
        buf.publish(self.cache.as_ref());
        Ok(())
    }

    /// Undoes a partial bind: unlinks whatever was spliced and frees the
    /// buffer.
    fn rollback(&self, conn: &Connection) {
        let buffer = self.unlink(&mut self.lock(), conn);
        if let Some(buffer) = buffer {
            buffer::free(self.allocator.as_ref(), buffer);
        }
    }

    /// Removes the buffer of `conn` from both adjacency lists and from the
    /// container, writing back both components.
    fn unlink(&self, container: &mut ObjectContainer, conn: &Connection) -> Option<Buffer> {
        let key: BufferKey = conn.buffer_key();
        if let Some(src) = container.component_mut(conn.src) {
            src.sinks.retain(|k| *k != key);
            src.writeback(self.cache.as_ref());
        }
        if let Some(dst) = container.component_mut(conn.dst) {
            dst.sources.retain(|k| *k != key);
            dst.writeback(self.cache.as_ref());
        }
        match container.remove(ObjectId::Buffer(key))?.object {
            Object::Buffer(mut buf) => {
                buf.producer = None;
                buf.consumer = None;
                Some(*buf)
            }
            _ => None,
        }
    }
}

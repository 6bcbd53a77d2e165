//! The object container: every live component, buffer and pipeline.
//!
//! Entries are kept in insertion order so "the first component still in
//! pipeline X" is deterministic during teardown. Keys are unique across all
//! three kinds. The container itself is not synchronized; the control plane
//! wraps it in a single mutex and never blocks while holding it.

use crate::buffer::Buffer;
use crate::component::Component;
use crate::error::IpcError;
use crate::id::{BufferKey, CompId, CoreId, ObjectId, ObjectKind, PipelineId};
use crate::memory::Region;
use crate::pipeline::Pipeline;

/// A container-owned object.
#[derive(Debug)]
pub enum Object {
    /// Processing component.
    Component(Box<Component>),
    /// Shared-memory buffer.
    Buffer(Box<Buffer>),
    /// Pipeline.
    Pipeline(Box<Pipeline>),
}

impl Object {
    /// Kind of this object.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Component(_) => ObjectKind::Component,
            Object::Buffer(_) => ObjectKind::Buffer,
            Object::Pipeline(_) => ObjectKind::Pipeline,
        }
    }

    /// Pipeline the object belongs to (a pipeline belongs to itself).
    pub fn pipeline_id(&self) -> Option<PipelineId> {
        match self {
            Object::Component(c) => c.pipeline_id(),
            Object::Buffer(b) => b.pipeline_id(),
            Object::Pipeline(p) => Some(p.id()),
        }
    }
}

/// One container record.
#[derive(Debug)]
pub struct Entry {
    /// Unique key.
    pub id: ObjectId,
    /// Owning core.
    pub core: CoreId,
    /// The object itself.
    pub object: Object,
    /// Bookkeeping charge for component and pipeline entries.
    pub(crate) bookkeeping: Option<Region>,
}

impl Entry {
    pub(crate) fn component(component: Component, bookkeeping: Region) -> Self {
        Self {
            id: ObjectId::Component(component.id()),
            core: component.core(),
            object: Object::Component(Box::new(component)),
            bookkeeping: Some(bookkeeping),
        }
    }

    pub(crate) fn buffer(buffer: Buffer) -> Self {
        Self {
            id: ObjectId::Buffer(buffer.key()),
            core: buffer.core(),
            object: Object::Buffer(Box::new(buffer)),
            bookkeeping: None,
        }
    }

    pub(crate) fn pipeline(pipeline: Pipeline, bookkeeping: Region) -> Self {
        Self {
            id: ObjectId::Pipeline(pipeline.id()),
            core: pipeline.core(),
            object: Object::Pipeline(Box::new(pipeline)),
            bookkeeping: Some(bookkeeping),
        }
    }
}

/// Insertion-ordered collection of [`Entry`]s.
#[derive(Debug, Default)]
pub struct ObjectContainer {
    entries: Vec<Entry>,
}

impl ObjectContainer {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no object is alive.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Number of entries of one kind.
    pub fn count(&self, kind: ObjectKind) -> usize {
        self.entries.iter().filter(|e| e.id.kind() == kind).count()
    }

    /// Adds an entry; fails if its key is already present.
    pub fn insert(&mut self, entry: Entry) -> Result<(), IpcError> {
        if self.contains(entry.id) {
            return Err(IpcError::ResourceAlreadyExists);
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Removes and returns the entry with this key.
    pub fn remove(&mut self, id: ObjectId) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// True if an entry with this key exists.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Entry with this key.
    pub fn get(&self, id: ObjectId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Mutable entry with this key.
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Entry named by a raw host id (component or pipeline namespace).
    pub fn get_by_raw(&self, raw: u32) -> Option<&Entry> {
        self.get(ObjectId::classify(raw))
    }

    /// First entry of `kind` belonging to `pipeline_id`, in insertion order.
    pub fn first_in_pipeline(&self, kind: ObjectKind, pipeline_id: PipelineId) -> Option<&Entry> {
        self.entries
            .iter()
            .filter(|e| e.id.kind() == kind)
            .find(|e| match &e.object {
                Object::Pipeline(_) => e.id == ObjectId::Pipeline(pipeline_id),
                other => other.pipeline_id() == Some(pipeline_id),
            })
    }

    /// Component with this id.
    pub fn component(&self, id: CompId) -> Option<&Component> {
        match &self.get(ObjectId::Component(id))?.object {
            Object::Component(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable component with this id.
    pub fn component_mut(&mut self, id: CompId) -> Option<&mut Component> {
        match &mut self.get_mut(ObjectId::Component(id))?.object {
            Object::Component(c) => Some(c),
            _ => None,
        }
    }

    /// Buffer with this key.
    pub fn buffer(&self, key: BufferKey) -> Option<&Buffer> {
        match &self.get(ObjectId::Buffer(key))?.object {
            Object::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Mutable buffer with this key.
    pub fn buffer_mut(&mut self, key: BufferKey) -> Option<&mut Buffer> {
        match &mut self.get_mut(ObjectId::Buffer(key))?.object {
            Object::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Pipeline with this id.
    pub fn pipeline(&self, id: PipelineId) -> Option<&Pipeline> {
        match &self.get(ObjectId::Pipeline(id))?.object {
            Object::Pipeline(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable pipeline with this id.
    pub fn pipeline_mut(&mut self, id: PipelineId) -> Option<&mut Pipeline> {
        match &mut self.get_mut(ObjectId::Pipeline(id))?.object {
            Object::Pipeline(p) => Some(p),
            _ => None,
        }
    }

    /// A component and a buffer borrowed mutably at the same time.
    pub fn component_and_buffer_mut(
        &mut self,
        comp: CompId,
        key: BufferKey,
    ) -> Option<(&mut Component, &mut Buffer)> {
        let mut found_comp = None;
        let mut found_buf = None;
        for entry in &mut self.entries {
            match &mut entry.object {
                Object::Component(c) if c.id() == comp => found_comp = Some(&mut **c),
                Object::Buffer(b) if b.key() == key => found_buf = Some(&mut **b),
                _ => {}
            }
        }
        Some((found_comp?, found_buf?))
    }

    /// Number of entries of any kind referencing `pipeline_id`.
    pub fn referencing(&self, pipeline_id: PipelineId) -> usize {
        self.entries
            .iter()
            .filter(|e| e.object.pipeline_id() == Some(pipeline_id))
            .count()
    }
}

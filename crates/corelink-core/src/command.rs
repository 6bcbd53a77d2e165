//! Decoded host commands.
//!
//! Wire framing is handled elsewhere; [`ControlPlane::dispatch`] consumes
//! these structures and returns a result that maps onto a [`Status`].
//!
//! [`ControlPlane::dispatch`]: crate::ControlPlane::dispatch
//! [`Status`]: crate::Status

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferFlags, ParamsFlags, StreamParams};
use crate::component::{BaseModuleConfig, Connection, Direction, Roles};
use crate::error::IpcError;
use crate::id::{CompId, CoreId, PipelineId};

/// Payload shared by bind and unbind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BindRequest {
    /// Producer module id.
    pub src_module: u16,
    /// Producer instance id.
    pub src_instance: u16,
    /// Consumer module id.
    pub dst_module: u16,
    /// Consumer instance id.
    pub dst_instance: u16,
    /// Output queue on the producer.
    #[serde(default)]
    pub src_queue: u16,
    /// Input queue on the consumer.
    #[serde(default)]
    pub dst_queue: u16,
    /// Policy copied into the created buffer.
    #[serde(default)]
    pub flags: BufferFlags,
}

impl BindRequest {
    /// Decodes the endpoint ids.
    pub fn connection(&self) -> Result<Connection, IpcError> {
        Ok(Connection {
            src: CompId::new(self.src_module, self.src_instance)?,
            dst: CompId::new(self.dst_module, self.dst_instance)?,
            src_queue: self.src_queue,
            dst_queue: self.dst_queue,
        })
    }
}

/// Everything needed to instantiate a component.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Module (driver) id, never 0.
    pub module_id: u16,
    /// Instance of the module.
    pub instance_id: u16,
    /// Owning pipeline.
    #[serde(default)]
    pub pipeline_id: Option<PipelineId>,
    /// Owning core.
    #[serde(default = "primary_core")]
    pub core: CoreId,
    /// Pipeline roles.
    #[serde(default)]
    pub roles: Roles,
    /// Capability declaration.
    #[serde(default)]
    pub config: BaseModuleConfig,
    /// Processing direction.
    #[serde(default)]
    pub direction: Direction,
    /// Opaque module init payload.
    #[serde(default)]
    pub init_data: Vec<u8>,
}

fn primary_core() -> CoreId {
    CoreId::PRIMARY
}

/// A decoded host command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Create a pipeline owned by `core`.
    PipelineNew {
        /// Pipeline instance id.
        instance_id: u16,
        /// Scheduling priority.
        priority: u32,
        /// Owning core.
        core: CoreId,
        /// Raw id of the scheduling component, if already known.
        sched_id: Option<u32>,
    },
    /// Resolve the scheduling component and finalize the topology.
    PipelineComplete {
        /// Target pipeline.
        pipeline_id: PipelineId,
    },
    /// Free every component of the pipeline, then the pipeline.
    PipelineFree {
        /// Target pipeline.
        pipeline_id: PipelineId,
    },
    /// Connect two components through a new buffer.
    ModuleBind(BindRequest),
    /// Remove the buffer between two components.
    ModuleUnbind(BindRequest),
    /// Instantiate a component.
    ComponentNew(ComponentSpec),
    /// Free a quiescent component.
    ComponentFree {
        /// Raw component id.
        comp_id: u32,
    },
    /// Verify stream parameters against the attached buffers.
    ComponentSetParams {
        /// Raw component id.
        comp_id: u32,
        /// Fields to inherit from the buffers.
        flags: ParamsFlags,
        /// Proposed parameters.
        params: StreamParams,
    },
}

impl Command {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::PipelineNew { .. } => "pipeline_new",
            Command::PipelineComplete { .. } => "pipeline_complete",
            Command::PipelineFree { .. } => "pipeline_free",
            Command::ModuleBind(_) => "bind",
            Command::ModuleUnbind(_) => "unbind",
            Command::ComponentNew(_) => "component_new",
            Command::ComponentFree { .. } => "component_free",
            Command::ComponentSetParams { .. } => "set_params",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_request_rejects_module_zero() {
        let req = BindRequest {
            src_module: 0,
            src_instance: 1,
            dst_module: 2,
            dst_instance: 0,
            ..BindRequest::default()
        };
        assert_eq!(req.connection(), Err(IpcError::InvalidResourceId));
    }

    #[test]
    fn bind_request_decodes_endpoints() {
        let req = BindRequest {
            src_module: 1,
            src_instance: 2,
            dst_module: 3,
            dst_instance: 4,
            src_queue: 1,
            dst_queue: 0,
            flags: BufferFlags::default(),
        };
        let conn = req.connection().unwrap();
        assert_eq!(conn.src.raw(), 0x0001_0002);
        assert_eq!(conn.dst.raw(), 0x0003_0004);
        assert_eq!(conn.buffer_id().raw(), 0x0001_0000);
    }
}

//! Command script file format.
//!
//! A script is an ordered list of host commands written as TOML tables with
//! an `op` discriminator. Each command lowers to a [`Step`]: a decoded
//! [`Command`] for [`ControlPlane::dispatch`], or one of the stream-control
//! entry points that sit beside it.
//!
//! [`ControlPlane::dispatch`]: corelink_core::ControlPlane::dispatch
//!
//! # TOML Format
//!
//! ```toml
//! [[commands]]
//! op = "pipeline_new"
//! id = 1
//! sched_module = 1
//!
//! [[commands]]
//! op = "component_new"
//! module = 1
//! pipeline = 1
//! roles = { source = true, scheduler = true }
//! obs = 384
//!
//! [[commands]]
//! op = "component_new"
//! module = 2
//! core = 1
//! ibs = 384
//!
//! [[commands]]
//! op = "bind"
//! src = [1, 0]
//! dst = [2, 0]
//!
//! [[commands]]
//! op = "trigger"
//! comp = [1, 0]
//! cmd = "prepare"
//! ```

use std::path::Path;

use corelink_core::{
    BaseModuleConfig, BindRequest, BufferFlags, Command, ComponentSpec, CoreId, Direction,
    ParamsFlags, PipelineId, Roles, StreamParams, TriggerCmd,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, write_creating_dirs};

/// `(module, instance)` pair naming a component.
pub type CompRef = (u16, u16);

fn raw(comp: CompRef) -> u32 {
    (u32::from(comp.0) << 16) | u32::from(comp.1)
}

/// An ordered list of host commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Script {
    /// Commands in execution order.
    #[serde(default)]
    pub commands: Vec<ScriptCommand>,
}

/// One scripted host command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptCommand {
    /// Create a pipeline.
    PipelineNew {
        /// Pipeline id.
        id: u16,
        /// Scheduling priority.
        #[serde(default)]
        priority: u32,
        /// Owning core.
        #[serde(default)]
        core: u8,
        /// Module of the scheduling component.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sched_module: Option<u16>,
        /// Instance of the scheduling component.
        #[serde(default)]
        sched_instance: u16,
    },
    /// Finalize a pipeline.
    PipelineComplete {
        /// Pipeline id.
        id: u16,
    },
    /// Tear a pipeline down.
    PipelineFree {
        /// Pipeline id.
        id: u16,
    },
    /// Instantiate a component.
    ComponentNew(ComponentEntry),
    /// Free a component.
    ComponentFree {
        /// Target component.
        comp: CompRef,
    },
    /// Connect two components.
    Bind(LinkEntry),
    /// Disconnect two components.
    Unbind(LinkEntry),
    /// Apply a trigger.
    Trigger {
        /// Target component.
        comp: CompRef,
        /// Trigger command.
        cmd: TriggerCmd,
    },
    /// Verify stream parameters.
    SetParams {
        /// Target component.
        comp: CompRef,
        /// Fields to take from the attached buffers.
        #[serde(default)]
        inherit: Vec<ParamField>,
        /// Proposed parameters.
        #[serde(default)]
        params: StreamParams,
    },
    /// Run one processing block.
    Copy {
        /// Target component.
        comp: CompRef,
    },
}

/// Component instantiation parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComponentEntry {
    /// Module id.
    pub module: u16,
    /// Instance id.
    pub instance: u16,
    /// Owning pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<u16>,
    /// Owning core.
    pub core: u8,
    /// Pipeline roles.
    pub roles: Roles,
    /// Input block size in bytes.
    pub ibs: u32,
    /// Output block size in bytes.
    pub obs: u32,
    /// Cycles per block.
    pub cpc: u32,
    /// Processing direction.
    pub direction: Direction,
}

/// Bind or unbind payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkEntry {
    /// Producer.
    pub src: CompRef,
    /// Consumer.
    pub dst: CompRef,
    /// Output queue on the producer.
    #[serde(default)]
    pub src_queue: u16,
    /// Input queue on the consumer.
    #[serde(default)]
    pub dst_queue: u16,
    /// Buffer policy.
    #[serde(default)]
    pub flags: BufferFlags,
}

/// Stream parameter field that can be inherited from a buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamField {
    /// Sample format.
    FrameFmt,
    /// Channel layout.
    BufferFmt,
    /// Channel count.
    Channels,
    /// Sample rate.
    Rate,
}

impl ParamField {
    fn flag(self) -> ParamsFlags {
        match self {
            ParamField::FrameFmt => ParamsFlags::FRAME_FMT,
            ParamField::BufferFmt => ParamsFlags::BUFFER_FMT,
            ParamField::Channels => ParamsFlags::CHANNELS,
            ParamField::Rate => ParamsFlags::RATE,
        }
    }
}

/// A script command lowered for execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A host command for `dispatch`.
    Dispatch(Command),
    /// A trigger for the raw component id.
    Trigger {
        /// Raw component id.
        comp_id: u32,
        /// Trigger command.
        cmd: TriggerCmd,
    },
    /// One processing block of the raw component id.
    Copy {
        /// Raw component id.
        comp_id: u32,
    },
}

impl LinkEntry {
    fn request(&self) -> BindRequest {
        BindRequest {
            src_module: self.src.0,
            src_instance: self.src.1,
            dst_module: self.dst.0,
            dst_instance: self.dst.1,
            src_queue: self.src_queue,
            dst_queue: self.dst_queue,
            flags: self.flags,
        }
    }
}

impl ScriptCommand {
    /// Short name used in reports.
    pub fn op(&self) -> &'static str {
        match self {
            ScriptCommand::PipelineNew { .. } => "pipeline_new",
            ScriptCommand::PipelineComplete { .. } => "pipeline_complete",
            ScriptCommand::PipelineFree { .. } => "pipeline_free",
            ScriptCommand::ComponentNew(_) => "component_new",
            ScriptCommand::ComponentFree { .. } => "component_free",
            ScriptCommand::Bind(_) => "bind",
            ScriptCommand::Unbind(_) => "unbind",
            ScriptCommand::Trigger { .. } => "trigger",
            ScriptCommand::SetParams { .. } => "set_params",
            ScriptCommand::Copy { .. } => "copy",
        }
    }

    /// Lowers the command. Ids are passed through unchecked so the control
    /// plane reports malformed ones itself.
    pub fn step(&self) -> Step {
        let command = match self {
            ScriptCommand::PipelineNew {
                id,
                priority,
                core,
                sched_module,
                sched_instance,
            } => Command::PipelineNew {
                instance_id: *id,
                priority: *priority,
                core: CoreId(*core),
                sched_id: sched_module.map(|m| raw((m, *sched_instance))),
            },
            ScriptCommand::PipelineComplete { id } => Command::PipelineComplete {
                pipeline_id: PipelineId(*id),
            },
            ScriptCommand::PipelineFree { id } => Command::PipelineFree {
                pipeline_id: PipelineId(*id),
            },
            ScriptCommand::ComponentNew(entry) => Command::ComponentNew(ComponentSpec {
                module_id: entry.module,
                instance_id: entry.instance,
                pipeline_id: entry.pipeline.map(PipelineId),
                core: CoreId(entry.core),
                roles: entry.roles,
                config: BaseModuleConfig {
                    cpc: entry.cpc,
                    ibs: entry.ibs,
                    obs: entry.obs,
                    ..BaseModuleConfig::default()
                },
                direction: entry.direction,
                init_data: Vec::new(),
            }),
            ScriptCommand::ComponentFree { comp } => Command::ComponentFree {
                comp_id: raw(*comp),
            },
            ScriptCommand::Bind(link) => Command::ModuleBind(link.request()),
            ScriptCommand::Unbind(link) => Command::ModuleUnbind(link.request()),
            ScriptCommand::SetParams {
                comp,
                inherit,
                params,
            } => Command::ComponentSetParams {
                comp_id: raw(*comp),
                flags: inherit
                    .iter()
                    .fold(ParamsFlags::NONE, |flags, field| flags | field.flag()),
                params: *params,
            },
            ScriptCommand::Trigger { comp, cmd } => {
                return Step::Trigger {
                    comp_id: raw(*comp),
                    cmd: *cmd,
                };
            }
            ScriptCommand::Copy { comp } => return Step::Copy { comp_id: raw(*comp) },
        };
        Step::Dispatch(command)
    }
}

impl Script {
    /// Load a script from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let script = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), commands = script.commands.len(), "script loaded");
        Ok(script)
    }

    /// Parse a script from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the script to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        write_creating_dirs(path.as_ref(), &self.to_toml()?)
    }

    /// Serialize the script to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Lowered steps in order.
    pub fn steps(&self) -> impl Iterator<Item = Step> + '_ {
        self.commands.iter().map(ScriptCommand::step)
    }
}

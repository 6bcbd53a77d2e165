//! Platform and script validation.
//!
//! Checks that are cheap to make before the control plane starts: core
//! counts, heap budgets, the module manifest, and that every script command
//! names a core and a module the platform actually has. The plane performs
//! its own checks at dispatch time; these only catch typos early.
//!
//! # Example
//!
//! ```rust
//! use corelink_config::{PlatformConfig, ValidationError, validate_platform};
//!
//! let mut platform = PlatformConfig::default();
//! assert!(validate_platform(&platform).is_ok());
//!
//! platform.cores = 0;
//! assert_eq!(validate_platform(&platform), Err(ValidationError::CoreCount(0)));
//! ```

use std::collections::HashSet;

use corelink_core::MemZone;
use thiserror::Error;

use crate::platform::{MAX_CORES, PlatformConfig};
use crate::script::{Script, ScriptCommand};

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Core count outside the supported range.
    #[error("core count {0} outside 1..={max}", max = MAX_CORES)]
    CoreCount(u8),

    /// A heap zone with no budget at all.
    #[error("heap zone {0:?} has no budget")]
    EmptyHeap(MemZone),

    /// Module id 0 in the manifest.
    #[error("module id 0 is reserved")]
    ModuleIdZero,

    /// The same module id declared twice.
    #[error("module id {0} declared twice")]
    DuplicateModule(u16),

    /// A script command targets a core the platform does not have.
    #[error("command {index}: core {core} does not exist")]
    UnknownCore {
        /// Position of the command in the script.
        index: usize,
        /// Requested core.
        core: u8,
    },

    /// A script command instantiates a module missing from the manifest.
    #[error("command {index}: module {module} not in manifest")]
    UnknownModule {
        /// Position of the command in the script.
        index: usize,
        /// Requested module id.
        module: u16,
    },

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

/// Validates a platform description.
pub fn validate_platform(platform: &PlatformConfig) -> ValidationResult<()> {
    let mut errors = Vec::new();

    if platform.cores == 0 || platform.cores > MAX_CORES {
        errors.push(ValidationError::CoreCount(platform.cores));
    }
    for (zone, budget) in [
        (MemZone::System, platform.heap.system),
        (MemZone::Runtime, platform.heap.runtime),
        (MemZone::RuntimeShared, platform.heap.runtime_shared),
    ] {
        if budget == 0 {
            errors.push(ValidationError::EmptyHeap(zone));
        }
    }

    let mut seen = HashSet::new();
    for module in &platform.modules {
        if module.module_id == 0 {
            errors.push(ValidationError::ModuleIdZero);
        } else if !seen.insert(module.module_id) {
            errors.push(ValidationError::DuplicateModule(module.module_id));
        }
    }

    collect(errors)
}

/// Validates that a script only refers to cores and modules of `platform`.
pub fn validate_script(script: &Script, platform: &PlatformConfig) -> ValidationResult<()> {
    let known: HashSet<u16> = platform.modules.iter().map(|m| m.module_id).collect();
    let mut errors = Vec::new();

    for (index, command) in script.commands.iter().enumerate() {
        let core = match command {
            ScriptCommand::PipelineNew { core, .. } => Some(*core),
            ScriptCommand::ComponentNew(spec) => {
                if !known.contains(&spec.module) {
                    errors.push(ValidationError::UnknownModule {
                        index,
                        module: spec.module,
                    });
                }
                Some(spec.core)
            }
            _ => None,
        };
        if let Some(core) = core
            && core >= platform.cores
        {
            errors.push(ValidationError::UnknownCore { index, core });
        }
    }

    collect(errors)
}

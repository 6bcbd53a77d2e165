//! Configuration for the corelink control plane.
//!
//! Two TOML file formats live here:
//!
//! - **Platform**: core count, heap budgets and the boot manifest binding
//!   module ids to driver UUIDs ([`PlatformConfig`], [`ManifestTable`]).
//! - **Script**: an ordered list of host commands to replay against a
//!   control plane ([`Script`], [`ScriptCommand`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use corelink_config::{PlatformConfig, Script};
//!
//! let platform = PlatformConfig::load("platform.toml").unwrap();
//! platform.validate().unwrap();
//!
//! let script = Script::load("topology.toml").unwrap();
//! for step in script.steps() {
//!     println!("{step:?}");
//! }
//! ```

mod error;
mod platform;
mod script;

/// Platform and script validation.
pub mod validation;

pub use error::ConfigError;
pub use platform::{MAX_CORES, ManifestTable, ModuleEntry, PlatformConfig};
pub use script::{
    CompRef, ComponentEntry, LinkEntry, ParamField, Script, ScriptCommand, Step,
};
pub use validation::{ValidationError, ValidationResult, validate_platform, validate_script};

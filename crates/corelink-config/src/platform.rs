//! Platform description file format.

use std::collections::HashMap;
use std::path::Path;

use corelink_core::{HeapConfig, ModuleManifest};
use corelink_registry::{COPIER_UUID, MIXIN_UUID};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigError, write_creating_dirs};
use crate::validation::validate_platform;

/// Largest supported core count.
pub const MAX_CORES: u8 = 8;

/// Describes the DSP the control plane runs on.
///
/// # TOML Format
///
/// ```toml
/// name = "dual-core"
/// cores = 2
///
/// [heap]
/// runtime = 196608
/// runtime_shared = 131072
///
/// [[modules]]
/// module_id = 1
/// uuid = "9ba00c83-ca12-4a83-943c-1fa2e82f9dda"
/// name = "copier"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformConfig {
    /// Human-readable platform name.
    #[serde(default = "default_name")]
    pub name: String,

    /// Number of DSP cores.
    #[serde(default = "default_cores")]
    pub cores: u8,

    /// Per-zone heap budgets.
    #[serde(default)]
    pub heap: HeapConfig,

    /// Boot manifest: which driver implements each module id.
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

/// One module of the boot manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleEntry {
    /// Module id used by host commands.
    pub module_id: u16,
    /// UUID of the implementing driver.
    pub uuid: Uuid,
    /// Optional label for listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_name() -> String {
    "corelink".to_string()
}

fn default_cores() -> u8 {
    2
}

impl Default for PlatformConfig {
    /// Two cores, default heap, and the built-in drivers as modules 1 and 2.
    fn default() -> Self {
        Self {
            name: default_name(),
            cores: default_cores(),
            heap: HeapConfig::default(),
            modules: vec![
                ModuleEntry {
                    module_id: 1,
                    uuid: COPIER_UUID,
                    name: Some("copier".to_string()),
                },
                ModuleEntry {
                    module_id: 2,
                    uuid: MIXIN_UUID,
                    name: Some("mixin".to_string()),
                },
            ],
        }
    }
}

impl PlatformConfig {
    /// Load a platform description from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let platform = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), name = %platform.name, "platform loaded");
        Ok(platform)
    }

    /// Parse a platform description from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the platform description to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        write_creating_dirs(path.as_ref(), &self.to_toml()?)
    }

    /// Serialize the platform description to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the description for errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_platform(self)?;
        Ok(())
    }

    /// Module id to UUID table for the driver registry.
    pub fn manifest(&self) -> ManifestTable {
        ManifestTable::new(&self.modules)
    }
}

/// Boot manifest backed by a [`PlatformConfig`] module list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestTable {
    modules: HashMap<u16, Uuid>,
}

impl ManifestTable {
    /// Builds the table. On duplicate module ids the first entry wins.
    pub fn new(entries: &[ModuleEntry]) -> Self {
        let mut modules = HashMap::with_capacity(entries.len());
        for entry in entries {
            modules.entry(entry.module_id).or_insert(entry.uuid);
        }
        Self { modules }
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// True if the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ModuleManifest for ManifestTable {
    fn module_uuid(&self, module_id: u16) -> Option<Uuid> {
        self.modules.get(&module_id).copied()
    }
}

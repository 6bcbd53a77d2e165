//! Platform and script validation command.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use corelink_config::{Script, validate_script};

use super::common::load_platform;

#[derive(Args)]
pub struct ValidateArgs {
    /// Command script to check against the platform
    #[arg(value_name = "SCRIPT")]
    script: Option<PathBuf>,

    /// Platform description (TOML); defaults to the built-in platform
    #[arg(short, long, value_name = "FILE")]
    platform: Option<PathBuf>,
}

pub fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let platform = load_platform(args.platform.as_deref())?;
    println!(
        "platform '{}': {} cores, {} modules: ok",
        platform.name,
        platform.cores,
        platform.modules.len()
    );

    if let Some(path) = &args.script {
        let script = Script::load(path)?;
        validate_script(&script, &platform)
            .with_context(|| format!("validating {}", path.display()))?;
        println!(
            "script '{}': {} commands: ok",
            path.display(),
            script.commands.len()
        );
    }
    Ok(())
}

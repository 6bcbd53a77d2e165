//! Driver listing command.

#![allow(clippy::print_literal)] // Table headers use literal strings intentionally

use std::path::PathBuf;

use clap::Args;

use super::common::{load_platform, registry};

#[derive(Args)]
pub struct DriversArgs {
    /// Platform description (TOML); defaults to the built-in manifest
    #[arg(short, long, value_name = "FILE")]
    platform: Option<PathBuf>,
}

pub fn run(args: DriversArgs) -> anyhow::Result<()> {
    let platform = load_platform(args.platform.as_deref())?;
    let registry = registry(&platform);

    println!("Registered Drivers");
    println!("==================");
    println!();
    println!("  {:10}  {}", "Name", "UUID");
    println!("  {:10}  {}", "----", "----");
    for driver in registry.drivers() {
        println!("  {:10}  {}", driver.name(), driver.uuid());
    }

    println!();
    println!("Module Manifest ({})", platform.name);
    println!();
    println!("  {:>6}  {:10}  {:38}  {}", "Module", "Label", "UUID", "Driver");
    println!("  {:>6}  {:10}  {:38}  {}", "------", "-----", "----", "------");
    for module in &platform.modules {
        let driver = registry
            .resolve_by_uuid(&module.uuid)
            .map_or_else(|| "(missing)".to_string(), |d| d.name().to_string());
        println!(
            "  {:>6}  {:10}  {:38}  {}",
            module.module_id,
            module.name.as_deref().unwrap_or("-"),
            module.uuid.to_string(),
            driver
        );
    }
    Ok(())
}

//! CLI subcommands.

pub mod common;
pub mod drivers;
pub mod run;
pub mod validate;

//! Command-line interface definitions for the `armflow` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `armflow` binary.
#[derive(Debug, Parser)]
#[command(
    name = "armflow",
    about = "Provision a sample Azure virtual machine, exercise it, and delete it again",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Walk the sample stack through provision, lifecycle, export, and teardown.
    #[command(
        name = "run",
        about = "Walk the sample stack through provision, lifecycle, export, and teardown"
    )]
    Run(RunCommand),
}

/// Arguments for the `armflow run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Run every step without pausing for confirmation.
    #[arg(long, short = 'y')]
    pub(crate) yes: bool,
}

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod targets;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept endpoint connections and print each session.
    Listen(ListenArgs),
    /// List the supported endpoint platforms.
    Targets(TargetsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Targets(args) => targets::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Loopback port to bind (0 picks an ephemeral port).
    #[arg(long, short = 'p')]
    pub port: u16,
    /// Require this exact handshake token; others are rejected.
    #[arg(long)]
    pub token: Option<String>,
    /// Handshake deadline in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub handshake_timeout_ms: u64,
    /// Exit after serving N connections.
    #[arg(long)]
    pub count: Option<usize>,
    /// Stream the endpoint's stdin to local stdout until it closes.
    #[arg(long)]
    pub relay: bool,
    /// Terminate each endpoint with this code once served.
    #[arg(long)]
    pub exit_code: Option<i32>,
}

#[derive(Args, Debug)]
pub struct TargetsArgs {
    /// Directory holding the prebuilt endpoint binaries; when given, the
    /// resolved absolute path is printed per target.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

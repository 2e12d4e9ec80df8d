//! Version variables and task identity for release-flow pipelines.
//!
//! This tool covers both ends of a release-flow build:
//! - `derive`: turn the version calculator's record into every version
//!   string (SemVer, legacy SemVer, NuGet, assembly versions, build metadata)
//!   and hand them to the pipeline as output variables
//! - `stamp`: give a packaged extension and its tasks a version that always
//!   increases across republishes

use std::path::Path;

use anyhow::Result;
use clap::{
    Parser,
    Subcommand,
};
use release_flow_version::commands;
use release_flow_version::commands::{
    DeriveArgs,
    StampArgs,
};

#[derive(Parser, Debug)]
#[command(name = "release-flow-version", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derive version variables from a version record
    #[command(name = "derive")]
    Derive(DeriveArgs),
    /// Stamp extension and task manifests with a monotonic version
    #[command(name = "stamp")]
    Stamp(StampArgs),
}

/// Load `.env*` files from the current directory through dotenvage.
///
/// Pipeline settings (publisher, build type, ...) may live there for local
/// runs. Nothing is loaded when no such file exists, and a file that fails to
/// load or decrypt only produces a warning.
fn load_env_files() {
    let user = std::env::var("USER").ok();
    let present = std::env::current_dir()
        .map(|dir| env_file_present(&dir, user.as_deref()))
        .unwrap_or(false);

    if present && let Err(e) = dotenvage::EnvLoader::new().and_then(|loader| loader.load()) {
        eprintln!("Warning: Failed to load/decrypt env files: {}", e);
        eprintln!("Continuing with existing environment variables...");
    }
}

fn env_file_present(dir: &Path, user: Option<&str>) -> bool {
    [".env", ".env.local", ".env.prod", ".env.dev", ".env.test"]
        .into_iter()
        .map(String::from)
        .chain(user.map(|user| format!(".env.{}", user)))
        .any(|name| dir.join(name).is_file())
}

fn main() -> Result<()> {
    load_env_files();

    match Cli::parse().command {
        Command::Derive(args) => commands::derive(args),
        Command::Stamp(args) => commands::stamp(args),
    }
}

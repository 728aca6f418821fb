//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stout_common::{StoutPaths, StoutResult};
use stout_image::{ImageReference, LayerCache, RegistryClient, TransportConfig};

use crate::isolate::{NamespaceConfig, Sandbox};

/// Stout - Minimal Container Runtime
#[derive(Parser)]
#[command(name = "stout")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Layer cache directory
    #[arg(long, global = true, env = "STOUT_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Pull an image and run a command inside it
    Run {
        /// Image reference (e.g. alpine:latest)
        image: String,

        /// Command to execute inside the container
        command: String,

        /// Arguments for the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Copy a helper binary into usr/local/bin of the rootfs
        #[arg(long)]
        helper: Option<PathBuf>,
    },
}

impl Cli {
    /// Execute the CLI command, returning the process exit code.
    pub async fn execute(self) -> StoutResult<i32> {
        let paths = match &self.cache_dir {
            Some(dir) => StoutPaths::with_cache(dir),
            None => StoutPaths::new(),
        };

        match self.command {
            Commands::Run {
                image,
                command,
                args,
                helper,
            } => run(&paths, &image, &command, &args, helper.as_deref()).await,
        }
    }
}

/// The `run` flow: pull, assemble, isolate, propagate the exit code.
async fn run(
    paths: &StoutPaths,
    image: &str,
    command: &str,
    args: &[String],
    helper: Option<&std::path::Path>,
) -> StoutResult<i32> {
    let reference = ImageReference::parse(image)?;

    let cache = LayerCache::new(&paths.cache)?;
    let http = TransportConfig::default().build()?;
    let client = RegistryClient::for_reference(http, &reference, cache)?;

    let layers = client.pull(&reference).await?;
    let layer_paths: Vec<_> = layers.iter().map(|layer| layer.path.clone()).collect();

    let sandbox = Sandbox::create()?;
    if let Some(helper) = helper {
        sandbox.stage_helper(helper)?;
    }
    sandbox.assemble(&layer_paths)?;

    sandbox.exec(command, args, NamespaceConfig::standard())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_requires_image_and_command() {
        assert!(Cli::try_parse_from(["stout", "run"]).is_err());
        assert!(Cli::try_parse_from(["stout", "run", "alpine"]).is_err());
        assert!(Cli::try_parse_from(["stout", "run", "alpine", "/bin/sh"]).is_ok());
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["stout", "pull", "alpine"]).is_err());
    }

    #[test]
    fn trailing_args_are_collected() {
        let cli =
            Cli::try_parse_from(["stout", "run", "alpine", "/bin/sh", "-c", "exit 7"]).unwrap();
        let Commands::Run { command, args, .. } = cli.command;
        assert_eq!(command, "/bin/sh");
        assert_eq!(args, vec!["-c", "exit 7"]);
    }
}

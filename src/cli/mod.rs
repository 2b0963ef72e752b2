pub mod parser;

use crate::build::{Linkage, Profile};
use crate::commands::{CommandExecutor, GlobalOptions};
use crate::result::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crossmatrix")]
#[command(about = "Build a Rust project across platforms, linkages and profiles, optionally as container images")]
#[command(version)]
#[command(arg_required_else_help = true)]
#[command(
    help_template = "{before-help}{name} v{version}\n\n{about-with-newline}\n{usage-heading} {usage}\n\n{all-args}{after-help}"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Matrix configuration file (default: matrix.toml)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Toolchain channel, overrides project.channel")]
    channel: Option<String>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// One (platform, linkage, profile) combination.
#[derive(Args, Debug, Clone)]
pub struct CombinationArgs {
    #[arg(long, help = "Platform name, preset or target triple (default: first configured platform)")]
    pub platform: Option<String>,

    #[arg(long, value_enum, default_value_t = Linkage::Native, help = "Linkage mode")]
    pub linkage: Linkage,

    #[arg(long, value_enum, default_value_t = Profile::Release, help = "Build profile")]
    pub profile: Profile,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Build one combination into a raw binary")]
    Build {
        #[command(flatten)]
        combination: CombinationArgs,
    },

    #[command(about = "Build one combination and package it as a container image")]
    Image {
        #[command(flatten)]
        combination: CombinationArgs,
    },

    #[command(about = "Build the full matrix")]
    Matrix {
        #[arg(long, value_delimiter = ',', help = "Platforms to build (default: [matrix].platforms)")]
        platform: Vec<String>,

        #[arg(long, value_enum, value_delimiter = ',', help = "Linkage modes (default: [matrix].linkages)")]
        linkage: Vec<Linkage>,

        #[arg(long, value_enum, value_delimiter = ',', help = "Build profiles (default: [matrix].profiles)")]
        profile: Vec<Profile>,

        #[arg(long, help = "Produce raw binaries even if [matrix].package is set")]
        no_package: bool,

        #[arg(short, long, help = "Combinations to build concurrently")]
        jobs: Option<usize>,
    },

    #[command(about = "Setup project with default matrix.toml")]
    Setup {
        #[arg(long, help = "Force overwrite existing matrix.toml")]
        force: bool,
    },

    #[command(about = "Manage toolchains")]
    Toolchain {
        #[command(subcommand)]
        action: ToolchainAction,
    },

    #[command(about = "Inspect or clear the toolchain cache")]
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
pub enum ToolchainAction {
    #[command(about = "Provision the toolchain for a platform ahead of a build")]
    Install {
        #[arg(help = "Platform name, preset or target triple")]
        platform: String,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum CacheAction {
    #[command(about = "List cached toolchains")]
    List,

    #[command(about = "Drop cached toolchains whose files are gone")]
    Prune,

    #[command(about = "Drop every cached toolchain")]
    Clean,
}

impl Cli {
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Runs the parsed command and returns the process exit status.
    pub async fn execute(self) -> Result<i32> {
        let options = GlobalOptions {
            config: self.config,
            channel: self.channel,
            verbose: self.verbose,
        };
        let executor = CommandExecutor::new(options);

        match self.command {
            Commands::Build { combination } => executor.build(combination).await,
            Commands::Image { combination } => executor.image(combination).await,
            Commands::Matrix {
                platform,
                linkage,
                profile,
                no_package,
                jobs,
            } => {
                executor
                    .matrix(platform, linkage, profile, no_package, jobs)
                    .await
            }
            Commands::Setup { force } => executor.setup(force).await,
            Commands::Toolchain { action } => match action {
                ToolchainAction::Install { platform } => executor.install_toolchain(platform).await,
            },
            Commands::Cache { action } => executor.cache(action).await,
        }
    }
}

pub mod build;
pub mod cache;
pub mod matrix;
pub mod session;
pub mod setup;
pub mod toolchain;

pub use session::Session;

use crate::build::{Linkage, Profile};
use crate::cli::{CacheAction, CombinationArgs};
use crate::config::DEFAULT_CONFIG_FILE;
use crate::matrix::Packaging;
use crate::result::Result;
use smol_str::SmolStr;
use std::path::PathBuf;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub channel: Option<String>,
    pub verbose: bool,
}

impl GlobalOptions {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }
}

#[derive(Debug)]
pub enum CommandType {
    Single {
        combination: CombinationArgs,
        packaging: Packaging,
    },
    Matrix {
        platforms: Vec<String>,
        linkages: Vec<Linkage>,
        profiles: Vec<Profile>,
        no_package: bool,
        jobs: Option<usize>,
    },
    Setup {
        force: bool,
    },
    InstallToolchain {
        platform: SmolStr,
    },
    Cache {
        action: CacheAction,
    },
}

impl CommandType {
    pub async fn execute(self, options: &GlobalOptions) -> Result<i32> {
        match self {
            CommandType::Single {
                combination,
                packaging,
            } => build::execute(options, &combination, packaging).await,
            CommandType::Matrix {
                platforms,
                linkages,
                profiles,
                no_package,
                jobs,
            } => matrix::execute(options, &platforms, linkages, profiles, no_package, jobs).await,
            CommandType::Setup { force } => setup::execute(options, force).await,
            CommandType::InstallToolchain { platform } => {
                toolchain::execute_install(options, &platform).await
            }
            CommandType::Cache { action } => cache::execute(options, action).await,
        }
    }
}

pub struct CommandExecutor {
    options: GlobalOptions,
}

impl CommandExecutor {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    pub async fn build(&self, combination: CombinationArgs) -> Result<i32> {
        CommandType::Single {
            combination,
            packaging: Packaging::Binary,
        }
        .execute(&self.options)
        .await
    }

    pub async fn image(&self, combination: CombinationArgs) -> Result<i32> {
        CommandType::Single {
            combination,
            packaging: Packaging::Image,
        }
        .execute(&self.options)
        .await
    }

    pub async fn matrix(
        &self,
        platforms: Vec<String>,
        linkages: Vec<Linkage>,
        profiles: Vec<Profile>,
        no_package: bool,
        jobs: Option<usize>,
    ) -> Result<i32> {
        CommandType::Matrix {
            platforms,
            linkages,
            profiles,
            no_package,
            jobs,
        }
        .execute(&self.options)
        .await
    }

    pub async fn setup(&self, force: bool) -> Result<i32> {
        CommandType::Setup { force }.execute(&self.options).await
    }

    pub async fn install_toolchain(&self, platform: String) -> Result<i32> {
        CommandType::InstallToolchain {
            platform: platform.into(),
        }
        .execute(&self.options)
        .await
    }

    pub async fn cache(&self, action: CacheAction) -> Result<i32> {
        CommandType::Cache { action }.execute(&self.options).await
    }
}

use crate::commands::GlobalOptions;
use crate::config::ProjectConfig;
use crate::package::ManifestReader;
use crate::result::{MatrixError, Result, EXIT_SUCCESS};
use std::path::Path;

pub async fn execute(options: &GlobalOptions, force: bool) -> Result<i32> {
    let mut cmd = SetupCommand::new();
    cmd.execute(&options.config_path(), force).await?;
    Ok(EXIT_SUCCESS)
}

#[derive(Default)]
pub struct SetupCommand;

impl SetupCommand {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&mut self, config_file: &Path, force: bool) -> Result<()> {
        log::info!("Starting setup process with force: {}", force);

        if config_file.exists() && !force {
            log::warn!("{} already exists, setup aborted", config_file.display());
            return Err(MatrixError::configuration(format!(
                "{} already exists. Use --force to overwrite.",
                config_file.display()
            )));
        }

        let config = ProjectConfig::default();
        config.save_to_file(config_file).await?;
        println!("{} created successfully!", config_file.display());

        let config_dir = config_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let manifest_path = config
            .project_root(config_dir)
            .join(&config.project.manifest);
        match ManifestReader::read_file(&manifest_path).await {
            Ok(manifest) => println!("Detected {} {}", manifest.name, manifest.version),
            Err(e) => {
                log::warn!("{}", e);
                println!("No usable manifest at {} yet", manifest_path.display());
            }
        }

        println!();
        println!("Please edit {} to match your project:", config_file.display());
        println!("   - List the platforms to build under [matrix]");
        println!("   - Choose linkages (native, static) and profiles (release, debug)");
        println!("   - Set package = false to skip container images");
        println!("   - Add [[platform]] entries for targets without a preset");
        println!();
        println!("Then run: crossmatrix matrix");

        log::info!("Setup completed successfully");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_a_loadable_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("matrix.toml");

        SetupCommand::new().execute(&path, false).await.unwrap();
        let config = ProjectConfig::from_file(&path).await.unwrap();
        assert_eq!(config.matrix.platforms, vec!["x86_64-linux"]);
    }

    #[tokio::test]
    async fn refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("matrix.toml");
        std::fs::write(&path, "keep me").unwrap();

        let err = SetupCommand::new().execute(&path, false).await.unwrap_err();
        assert!(err.is_run_level());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");

        SetupCommand::new().execute(&path, true).await.unwrap();
        assert!(ProjectConfig::from_file(&path).await.is_ok());
    }
}

use crate::cli::CombinationArgs;
use crate::commands::{GlobalOptions, Session};
use crate::matrix::{MatrixDriver, Output, Packaging, Variant};
use crate::result::{MatrixError, Result, EXIT_SUCCESS};
use crate::target::{self, NamedPlatform};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

pub async fn execute(
    options: &GlobalOptions,
    combination: &CombinationArgs,
    packaging: Packaging,
) -> Result<i32> {
    let session = Session::load(options).await?;
    let cmd = BuildCommand::new(session, options.verbose);
    cmd.execute(combination, packaging).await
}

/// Builds exactly one (platform, linkage, profile) combination.
pub struct BuildCommand {
    session: Session,
    verbose: bool,
}

impl BuildCommand {
    pub fn new(session: Session, verbose: bool) -> Self {
        Self { session, verbose }
    }

    /// The requested platform, or the first one of `[matrix].platforms`.
    fn platform(&self, requested: Option<&str>) -> Result<NamedPlatform> {
        let config = &self.session.config;
        let name = match requested {
            Some(name) => name.trim(),
            None => config
                .matrix
                .platforms
                .first()
                .map(|name| name.as_str())
                .ok_or_else(|| MatrixError::configuration(MatrixError::EMPTY_MATRIX))?,
        };
        target::lookup(name, &config.platforms)
    }

    pub async fn execute(&self, combination: &CombinationArgs, packaging: Packaging) -> Result<i32> {
        let platform = self.platform(combination.platform.as_deref())?;
        let variant = Variant::single(
            platform,
            combination.linkage,
            combination.profile,
            packaging,
        )?;

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap(),
        );
        spinner.set_message("Collecting build inputs...");
        spinner.enable_steady_tick(Duration::from_millis(100));

        let prepared = self.session.prepare_source().await;
        let (source, manifest) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                spinner.finish_and_clear();
                return Err(e);
            }
        };

        if self.verbose {
            spinner.suspend(|| {
                println!("Building {} {}", manifest.name, manifest.version);
                println!("  Platform: {} ({})", variant.key.platform, variant.config.target);
                println!("  Linkage: {}", variant.key.linkage);
                println!("  Profile: {}", variant.key.profile);
                println!("  Channel: {}", self.session.channel);
            });
        }

        spinner.set_message(format!("Building {}...", variant.key));
        let started = Instant::now();
        let driver = MatrixDriver::new(self.session.pipeline()?, 1);
        let result = driver.run_single(&source, &manifest, &variant).await;
        spinner.finish_and_clear();

        let output = result?;
        log::info!(
            "{} finished in {:.2}s",
            variant.key,
            started.elapsed().as_secs_f64()
        );

        println!("{}: {}", variant.key, output.describe());
        if let Output::Image(image) = &output {
            println!("Load it with: docker load -i {}", image.archive.display());
        }

        Ok(EXIT_SUCCESS)
    }
}

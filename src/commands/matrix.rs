use crate::build::{Linkage, Profile};
use crate::cli::parser::CliParser;
use crate::commands::{GlobalOptions, Session};
use crate::matrix::{enumerate, MatrixDriver, OutputCatalog, RunStatus};
use crate::result::{MatrixError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

/// Command-line overrides for `[matrix]`; empty lists fall back to the config.
#[derive(Debug, Clone, Default)]
pub struct MatrixRequest {
    pub platforms: Vec<String>,
    pub linkages: Vec<Linkage>,
    pub profiles: Vec<Profile>,
    pub no_package: bool,
    pub jobs: Option<usize>,
}

pub async fn execute(
    options: &GlobalOptions,
    platforms: &[String],
    linkages: Vec<Linkage>,
    profiles: Vec<Profile>,
    no_package: bool,
    jobs: Option<usize>,
) -> Result<i32> {
    let request = MatrixRequest {
        platforms: platforms.to_vec(),
        linkages,
        profiles,
        no_package,
        jobs,
    };
    let session = Session::load(options).await?;
    MatrixCommand::new(session, options.verbose)
        .execute(&request)
        .await
}

pub struct MatrixCommand {
    session: Session,
    verbose: bool,
}

impl MatrixCommand {
    pub fn new(session: Session, verbose: bool) -> Self {
        Self { session, verbose }
    }

    /** Enumerates, builds and reports the whole matrix
     *
     * # Returns
     * - `0` when every combination succeeded, `1` otherwise
     *
     * # Errors
     * - Run-level errors only (configuration, manifest, filesystem); they are
     *   raised before any combination starts
     */
    pub async fn execute(&self, request: &MatrixRequest) -> Result<i32> {
        let config = &self.session.config;

        let names = if request.platforms.is_empty() {
            config.matrix.platforms.clone()
        } else {
            CliParser::platform_names(&request.platforms)
        };
        if names.is_empty() {
            return Err(MatrixError::configuration(MatrixError::EMPTY_MATRIX));
        }
        let platforms = config.resolve_platforms(&names)?;

        let linkages = if request.linkages.is_empty() {
            config.matrix.linkages.clone()
        } else {
            request.linkages.clone()
        };
        let profiles = if request.profiles.is_empty() {
            config.matrix.profiles.clone()
        } else {
            request.profiles.clone()
        };
        let package = config.matrix.package && !request.no_package;

        let variants = enumerate(&platforms, &linkages, &profiles, package)?;
        let jobs = match request.jobs {
            Some(jobs) => CliParser::validate_jobs(jobs)?,
            None => config.jobs(),
        };

        let (source, manifest) = self.session.prepare_source().await?;
        let pipeline = self.session.pipeline()?;

        println!(
            "Building {} {}: {} combinations, {} at a time",
            manifest.name,
            manifest.version,
            variants.len(),
            jobs
        );
        if self.verbose {
            for variant in &variants {
                println!("  {} ({})", variant.key, variant.config.target);
            }
        }

        let progress = ProgressBar::new(variants.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );

        let started = Instant::now();
        let catalog = MatrixDriver::new(pipeline, jobs)
            .with_progress(progress)
            .run(source, manifest, variants)
            .await;

        report(&catalog);
        let status = catalog.status();
        log::info!(
            "matrix finished in {:.2}s: {:?}",
            started.elapsed().as_secs_f64(),
            status
        );

        Ok(status.exit_code())
    }
}

/// Prints one line per output, then every failure with its full diagnostic.
fn report(catalog: &OutputCatalog) {
    println!();
    for (key, output) in catalog.successes() {
        println!("  ok    {}: {}", key, output.describe());
    }
    for (key, error) in catalog.failures() {
        println!("  FAIL  {}", key);
        for line in error.to_string().lines() {
            println!("        {}", line);
        }
    }

    let failed = catalog.failures().count();
    println!();
    match catalog.status() {
        RunStatus::Success => println!("All {} outputs built", catalog.len()),
        RunStatus::PartialFailure => println!(
            "{} of {} outputs built, {} failed",
            catalog.len() - failed,
            catalog.len(),
            failed
        ),
        RunStatus::Failed => println!("All {} outputs failed", catalog.len()),
    }
}

use crate::build::{Artifact, BuildExecutor};
use crate::matrix::{Packaging, Variant, VariantKey};
use crate::package::{ArtifactPackager, Image, ManifestInfo};
use crate::result::{MatrixError, Result, EXIT_PARTIAL_FAILURE, EXIT_SUCCESS};
use crate::source::SourceTree;
use crate::toolchain::{Channel, ToolchainProvisioner};
use indicatif::ProgressBar;
use std::collections::btree_map::{BTreeMap, Entry};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Binary(Artifact),
    Image(Image),
}

impl Output {
    pub fn artifact(&self) -> &Artifact {
        match self {
            Output::Binary(artifact) => artifact,
            Output::Image(image) => &image.base_artifact,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Output::Binary(artifact) => format!(
                "{} (sha256:{})",
                artifact.path.display(),
                artifact.short_digest()
            ),
            Output::Image(image) => {
                format!("{} -> {}", image.reference(), image.archive.display())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failed,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => EXIT_SUCCESS,
            RunStatus::PartialFailure | RunStatus::Failed => EXIT_PARTIAL_FAILURE,
        }
    }
}

/// Outcome of every combination of a run, keyed by variant.
#[derive(Debug, Default)]
pub struct OutputCatalog {
    entries: BTreeMap<VariantKey, Result<Output>>,
}

impl OutputCatalog {
    pub fn record(&mut self, key: VariantKey, result: Result<Output>) {
        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(result);
            }
            Entry::Occupied(slot) => {
                log::error!("ignoring second outcome for {}", slot.key());
            }
        }
    }

    pub fn get(&self, key: &VariantKey) -> Option<&Result<Output>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &VariantKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VariantKey, &Result<Output>)> {
        self.entries.iter()
    }

    pub fn successes(&self) -> impl Iterator<Item = (&VariantKey, &Output)> {
        self.entries
            .iter()
            .filter_map(|(key, result)| result.as_ref().ok().map(|output| (key, output)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&VariantKey, &MatrixError)> {
        self.entries
            .iter()
            .filter_map(|(key, result)| result.as_ref().err().map(|error| (key, error)))
    }

    pub fn status(&self) -> RunStatus {
        let failed = self.failures().count();
        if failed == 0 && !self.is_empty() {
            RunStatus::Success
        } else if failed < self.len() {
            RunStatus::PartialFailure
        } else {
            RunStatus::Failed
        }
    }
}

/** The per-combination pipeline: provision, compile, optionally package
 *
 * # Notes
 * - Stages share nothing mutable besides the provisioner's cache
 * - Cancellation is checked between stages; running child processes are
 *   stopped by the `ProcessManager` sharing the same token
 */
pub struct Pipeline {
    pub channel: Channel,
    pub provisioner: Arc<ToolchainProvisioner>,
    pub executor: Arc<BuildExecutor>,
    pub packager: Arc<ArtifactPackager>,
    pub cancel: CancellationToken,
}

impl Pipeline {
    fn check_cancelled(&self, key: &VariantKey) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(MatrixError::cancelled(format!("{} was cancelled", key)))
        } else {
            Ok(())
        }
    }

    async fn build(&self, source: &SourceTree, manifest: &ManifestInfo, variant: &Variant) -> Result<Artifact> {
        self.check_cancelled(&variant.key)?;
        let bundle = self
            .provisioner
            .provision(&self.channel, &variant.config.target)
            .await?;

        self.check_cancelled(&variant.key)?;
        self.executor
            .execute(source, &bundle, &variant.config, manifest)
            .await
    }

    /** Runs one combination
     *
     * # Returns
     * - One outcome under the variant's key; when packaging fails, the raw
     *   binary is also returned under the binary key of the same combination
     */
    pub async fn run(
        &self,
        source: &SourceTree,
        manifest: &ManifestInfo,
        variant: &Variant,
    ) -> Vec<(VariantKey, Result<Output>)> {
        let artifact = match self.build(source, manifest, variant).await {
            Ok(artifact) => artifact,
            Err(e) => return vec![(variant.key.clone(), Err(e))],
        };

        match variant.key.packaging {
            Packaging::Binary => vec![(variant.key.clone(), Ok(Output::Binary(artifact)))],
            Packaging::Image => {
                if let Err(e) = self.check_cancelled(&variant.key) {
                    return vec![(variant.key.clone(), Err(e))];
                }
                match self.packager.package(&artifact, manifest).await {
                    Ok(image) => vec![(variant.key.clone(), Ok(Output::Image(image)))],
                    Err(e) => vec![
                        (variant.key.as_binary(), Ok(Output::Binary(artifact))),
                        (variant.key.clone(), Err(e)),
                    ],
                }
            }
        }
    }
}

/** Drives every variant through the pipeline, `jobs` at a time
 *
 * # Guarantees
 * - One combination's failure never stops its siblings
 * - Every requested variant ends up in the catalog, as an output or an error
 */
pub struct MatrixDriver {
    pipeline: Arc<Pipeline>,
    jobs: usize,
    progress: Option<ProgressBar>,
}

impl MatrixDriver {
    pub fn new(pipeline: Arc<Pipeline>, jobs: usize) -> Self {
        Self {
            pipeline,
            jobs: jobs.max(1),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn run(
        &self,
        source: Arc<SourceTree>,
        manifest: Arc<ManifestInfo>,
        variants: Vec<Variant>,
    ) -> OutputCatalog {
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut tasks = JoinSet::new();
        let requested: Vec<VariantKey> = variants.iter().map(|v| v.key.clone()).collect();

        log::info!(
            "building {} combinations with {} jobs",
            variants.len(),
            self.jobs
        );
        if let Some(progress) = &self.progress {
            progress.set_length(variants.len() as u64);
        }

        for variant in variants {
            let pipeline = self.pipeline.clone();
            let semaphore = semaphore.clone();
            let source = source.clone();
            let manifest = manifest.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = pipeline.cancel.cancelled() => None,
                };
                let Some(_permit) = permit else {
                    return vec![(
                        variant.key.clone(),
                        Err(MatrixError::cancelled(format!(
                            "{} was cancelled before it started",
                            variant.key
                        ))),
                    )];
                };

                pipeline.run(&source, &manifest, &variant).await
            });
        }

        let mut catalog = OutputCatalog::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcomes) => {
                    for (key, result) in outcomes {
                        match &result {
                            Ok(output) => log::info!("{}: {}", key, output.describe()),
                            Err(e) => log::error!("{}: {}", key, e),
                        }
                        if let Some(progress) = &self.progress {
                            progress.set_message(key.to_string());
                        }
                        catalog.record(key, result);
                    }
                }
                Err(e) => log::error!("build task failed: {}", e),
            }
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }

        for key in requested {
            if !catalog.contains(&key) {
                catalog.record(
                    key.clone(),
                    Err(MatrixError::cancelled(format!("{} ended without a result", key))),
                );
            }
        }

        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }
        catalog
    }

    /// Runs exactly one variant; its failure is the overall result.
    pub async fn run_single(
        &self,
        source: &SourceTree,
        manifest: &ManifestInfo,
        variant: &Variant,
    ) -> Result<Output> {
        let outcomes = self.pipeline.run(source, manifest, variant).await;
        let mut requested = None;
        for (key, result) in outcomes {
            if key == variant.key {
                requested = Some(result);
            } else if let Ok(output) = &result {
                log::info!("{}: {}", key, output.describe());
            }
        }

        requested.unwrap_or_else(|| {
            Err(MatrixError::cancelled(format!(
                "{} ended without a result",
                variant.key
            )))
        })
    }
}

use crate::build::{BuildExecutor, CargoBackend, HostTools};
use crate::cache::ToolchainIndex;
use crate::cli::parser::CliParser;
use crate::commands::GlobalOptions;
use crate::config::ProjectConfig;
use crate::matrix::Pipeline;
use crate::package::{
    ArtifactPackager, DockerArchiveWriter, LddResolver, ManifestInfo, ManifestReader,
};
use crate::result::Result;
use crate::source::{escape_glob, SourceFilter, SourceTree};
use crate::toolchain::{Channel, RustupSource, ToolchainProvisioner};
use crate::utils::ProcessManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/** Everything a build command needs, loaded once from `matrix.toml`
 *
 * # Notes
 * - Loading fails with run-level errors only, before anything is built
 * - Relative directories in the config are resolved against the project root
 * - Ctrl-C cancels the session token, which stops running children
 */
pub struct Session {
    pub config: ProjectConfig,
    pub config_dir: PathBuf,
    pub channel: Channel,
    pub cancel: CancellationToken,
}

impl Session {
    pub async fn load(options: &GlobalOptions) -> Result<Self> {
        let path = CliParser::validate_config_path(&options.config_path())?;
        let config = ProjectConfig::from_file(&path).await?;

        let config_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let channel = match &options.channel {
            Some(channel) => Channel::parse(channel)?,
            None => config.project.channel.clone(),
        };

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted, cancelling running builds");
                eprintln!("Interrupted, stopping builds...");
                on_interrupt.cancel();
            }
        });

        log::info!(
            "loaded {} (channel {})",
            path.display(),
            channel
        );

        Ok(Self {
            config,
            config_dir,
            channel,
            cancel,
        })
    }

    pub fn project_root(&self) -> PathBuf {
        self.config.project_root(&self.config_dir)
    }

    fn under_root(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.project_root().join(dir)
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.under_root(&self.config.output.work_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.under_root(&self.config.output.dir)
    }

    pub fn index(&self) -> Result<ToolchainIndex> {
        index_for(&self.config)
    }

    fn process(&self, timeout: Option<Duration>) -> ProcessManager {
        ProcessManager::new(self.cancel.clone(), timeout)
    }

    pub fn provisioner(&self) -> Result<Arc<ToolchainProvisioner>> {
        let source = Arc::new(RustupSource::new(self.process(None)));
        let mut provisioner = ToolchainProvisioner::new(source).with_index(self.index()?);
        if let Some(timeout) = self.config.provision_timeout() {
            provisioner = provisioner.with_timeout(timeout);
        }
        Ok(Arc::new(provisioner))
    }

    /// Default exclusions (unless disabled), then `[source].exclude`; work and output dirs are always excluded.
    pub fn source_filter(&self) -> Result<SourceFilter> {
        let project = &self.config.project;
        let manifest = project.manifest.to_string_lossy().replace('\\', "/");
        let lockfile = project.lockfile.to_string_lossy().replace('\\', "/");
        let work_dir = self.config.output.work_dir.to_string_lossy().into_owned();
        let output_dir = self.config.output.dir.to_string_lossy().into_owned();

        let mut filter = if self.config.source.default_exclusions {
            SourceFilter::with_defaults(
                &manifest,
                &lockfile,
                &[work_dir.as_str(), output_dir.as_str()],
            )?
        } else {
            SourceFilter::new(
                &manifest,
                &lockfile,
                [
                    format!("/{}/", escape_glob(work_dir.trim_matches('/'))),
                    format!("/{}/", escape_glob(output_dir.trim_matches('/'))),
                ],
            )?
        };
        filter.extend(&self.config.source.exclude)?;
        Ok(filter)
    }

    /** Filters the project tree, reads the manifest and stages the result
     *
     * # Errors
     * - `MatrixError::Filesystem` if the project root cannot be read
     * - `MatrixError::Configuration` for malformed exclusion patterns
     * - `MatrixError::ManifestInvalid` if name or version cannot be read
     */
    pub async fn prepare_source(&self) -> Result<(Arc<SourceTree>, Arc<ManifestInfo>)> {
        let filter = self.source_filter()?;
        let root = self.project_root();
        let tree = filter.apply(&root)?;
        let manifest = ManifestReader::read(&tree).await?;

        log::info!(
            "{} {}: {} build inputs under {}",
            manifest.name,
            manifest.version,
            tree.files().len(),
            root.display()
        );

        let staged = tree.stage(&self.work_dir().join("sources")).await?;
        Ok((Arc::new(staged), Arc::new(manifest)))
    }

    pub fn pipeline(&self) -> Result<Arc<Pipeline>> {
        let output_dir = self.output_dir();
        let executor = BuildExecutor::new(
            Arc::new(CargoBackend::new(self.process(self.config.compile_timeout()))),
            HostTools::detect(),
            self.work_dir(),
            &output_dir,
        );
        let packager = ArtifactPackager::new(
            Arc::new(LddResolver::new(self.process(None))),
            Arc::new(DockerArchiveWriter),
            &output_dir,
        );

        Ok(Arc::new(Pipeline {
            channel: self.channel.clone(),
            provisioner: self.provisioner()?,
            executor: Arc::new(executor),
            packager: Arc::new(packager),
            cancel: self.cancel.clone(),
        }))
    }
}

/// The toolchain index a config points at, or the default one.
pub fn index_for(config: &ProjectConfig) -> Result<ToolchainIndex> {
    let base = match &config.toolchain.cache_dir {
        Some(dir) => dir.clone(),
        None => ToolchainIndex::default_base_dir()?,
    };
    Ok(ToolchainIndex::new(&base))
}

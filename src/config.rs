use crate::build::{Linkage, Profile};
use crate::result::{MatrixError, Result};
use crate::target::{self, NamedPlatform};
use crate::toolchain::Channel;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub const DEFAULT_CONFIG_FILE: &str = "matrix.toml";

/** Contents of `matrix.toml`
 *
 * # Example
 * ```toml
 * [project]
 * root = "."
 * manifest = "Cargo.toml"
 * lockfile = "Cargo.lock"
 * channel = "stable"
 *
 * [matrix]
 * platforms = ["x86_64-linux", "aarch64-linux"]
 * linkages = ["native", "static"]
 * profiles = ["release"]
 * package = true
 *
 * [[platform]]
 * name = "armv7-musl"
 * cpu = "armv7"
 * vendor = "unknown"
 * kernel = "linux"
 * abi = "musleabihf"
 * static_capable = true
 *
 * [source]
 * exclude = ["fixtures/", "!fixtures/needed.bin"]
 * ```
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: Project,
    pub matrix: Matrix,
    #[serde(default, rename = "platform", skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<NamedPlatform>,
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub toolchain: ToolchainSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub root: PathBuf,
    pub manifest: PathBuf,
    pub lockfile: PathBuf,
    #[serde(default)]
    pub channel: Channel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matrix {
    pub platforms: Vec<SmolStr>,
    pub linkages: Vec<Linkage>,
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub package: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Apply the built-in exclusion set before `exclude`.
    #[serde(default = "default_true")]
    pub default_exclusions: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Concurrent combinations; defaults to the available parallelism.
    pub jobs: Option<usize>,
    pub provision_timeout_secs: Option<u64>,
    pub compile_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolchainSettings {
    /// Overrides the user cache directory for the toolchain index.
    pub cache_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            default_exclusions: true,
            exclude: Vec::new(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            jobs: None,
            provision_timeout_secs: Some(1800),
            compile_timeout_secs: Some(3600),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: "matrix-out".into(),
            work_dir: ".matrix".into(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project: Project {
                root: ".".into(),
                manifest: "Cargo.toml".into(),
                lockfile: "Cargo.lock".into(),
                channel: Channel::stable(),
            },
            matrix: Matrix {
                platforms: vec!["x86_64-linux".into()],
                linkages: vec![Linkage::Native, Linkage::Static],
                profiles: vec![Profile::Release],
                package: true,
            },
            platforms: Vec::new(),
            source: SourceSettings::default(),
            limits: Limits::default(),
            output: OutputSettings::default(),
            toolchain: ToolchainSettings::default(),
        }
    }
}

impl ProjectConfig {
    /** Loads and validates a config file
     *
     * # Errors
     * - `MatrixError::Configuration` if the file is missing, is not valid
     *   TOML for this schema, or fails `validate`
     */
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            MatrixError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: ProjectConfig = toml::from_str(&content).map_err(|e| {
            MatrixError::configuration(format!("Invalid matrix config format: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            MatrixError::configuration(format!("Failed to serialize matrix config: {}", e))
        })?;

        fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.manifest.as_os_str().is_empty() {
            return Err(MatrixError::configuration("Manifest path cannot be empty"));
        }

        if self.project.lockfile.as_os_str().is_empty() {
            return Err(MatrixError::configuration("Lockfile path cannot be empty"));
        }

        if self.matrix.platforms.is_empty()
            || self.matrix.linkages.is_empty()
            || self.matrix.profiles.is_empty()
        {
            return Err(MatrixError::configuration(MatrixError::EMPTY_MATRIX));
        }

        if self.limits.jobs == Some(0) {
            return Err(MatrixError::configuration("limits.jobs must be at least 1"));
        }

        if self.limits.provision_timeout_secs == Some(0) || self.limits.compile_timeout_secs == Some(0)
        {
            return Err(MatrixError::configuration("Timeouts must be at least one second"));
        }

        for (i, platform) in self.platforms.iter().enumerate() {
            if self.platforms[..i].iter().any(|p| p.name == platform.name) {
                return Err(MatrixError::configuration(format!(
                    "Platform `{}` is defined twice",
                    platform.name
                )));
            }
            platform.descriptor.resolve().map_err(|e| {
                MatrixError::configuration(format!("Platform `{}`: {}", platform.name, e))
            })?;
        }

        for name in &self.matrix.platforms {
            target::lookup(name, &self.platforms)?;
        }

        Ok(())
    }

    /// Resolves `names` (or the configured list) against custom platforms and presets.
    pub fn resolve_platforms(&self, names: &[SmolStr]) -> Result<Vec<NamedPlatform>> {
        let names = if names.is_empty() {
            &self.matrix.platforms
        } else {
            names
        };
        names
            .iter()
            .map(|name| target::lookup(name, &self.platforms))
            .collect()
    }

    /// Project paths, resolved relative to the directory holding the config file.
    pub fn project_root(&self, config_dir: &Path) -> PathBuf {
        config_dir.join(&self.project.root)
    }

    pub fn jobs(&self) -> usize {
        self.limits.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn provision_timeout(&self) -> Option<Duration> {
        self.limits.provision_timeout_secs.map(Duration::from_secs)
    }

    pub fn compile_timeout(&self) -> Option<Duration> {
        self.limits.compile_timeout_secs.map(Duration::from_secs)
    }
}

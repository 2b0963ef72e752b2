use crate::build::Artifact;
use crate::package::{ClosureResolver, ImageSpec, ImageWriter, ManifestInfo, RootfsEntry};
use crate::result::{MatrixError, Result};
use serde::Serialize;
use smol_str::SmolStr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

pub const INSTALL_DIR: &str = "/bin";

/// A packaged artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub base_artifact: Artifact,
    pub name: SmolStr,
    pub tag: SmolStr,
    pub command: Vec<String>,
    pub environment: Vec<(String, String)>,
    /// Absolute paths of every file in the image.
    pub rootfs: Vec<String>,
    pub archive: PathBuf,
}

impl Image {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/** Wraps artifacts into minimal container images
 *
 * # Image contents
 * - The binary at `/bin/<manifest name>`
 * - Its runtime closure at the paths the dynamic loader expects, nothing
 *   for static artifacts
 * - No toolchain, sources or build-time dependencies
 *
 * # Naming
 * - Name is the manifest name and tag the manifest version for every
 *   variant; the archive file name carries the variant so that debug,
 *   release, static and native images of one version can coexist
 */
pub struct ArtifactPackager {
    closure: Arc<dyn ClosureResolver>,
    writer: Arc<dyn ImageWriter>,
    output_dir: PathBuf,
}

impl ArtifactPackager {
    pub fn new(
        closure: Arc<dyn ClosureResolver>,
        writer: Arc<dyn ImageWriter>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            closure,
            writer,
            output_dir: output_dir.into(),
        }
    }

    pub async fn package(&self, artifact: &Artifact, manifest: &ManifestInfo) -> Result<Image> {
        match fs::metadata(&artifact.path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(MatrixError::packaging(format!(
                    "{} is not a file",
                    artifact.path.display()
                )));
            }
            Err(e) => {
                return Err(MatrixError::packaging(format!(
                    "artifact {} is unreadable: {}",
                    artifact.path.display(),
                    e
                )));
            }
        }

        let libraries = self.closure.resolve(artifact).await?;

        let binary_path = format!("{}/{}", INSTALL_DIR, manifest.name);
        let mut entries = vec![RootfsEntry {
            path: binary_path.trim_start_matches('/').to_string(),
            source: artifact.path.clone(),
            mode: 0o755,
        }];
        for library in libraries {
            let inside = library.to_string_lossy().into_owned();
            entries.push(RootfsEntry {
                path: inside.trim_start_matches('/').to_string(),
                source: library,
                mode: 0o755,
            });
        }

        let command = vec![manifest.name.to_string()];
        let environment = vec![("PATH".to_string(), INSTALL_DIR.to_string())];
        let spec = ImageSpec {
            name: manifest.name.clone(),
            tag: manifest.version.clone(),
            command: command.clone(),
            env: environment
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
            architecture: oci_architecture(artifact.target.as_str()).to_string(),
            os: artifact.target.kernel().to_string(),
            entries,
        };

        let archive = self.output_dir.join("images").join(format!(
            "{}-{}-{}-{}-{}.tar.gz",
            manifest.name, manifest.version, artifact.target, artifact.linkage, artifact.profile
        ));
        self.writer.write(&spec, &archive).await?;
        log::info!("wrote image {} to {}", spec.reference(), archive.display());

        let mut rootfs: Vec<String> = spec
            .entries
            .iter()
            .map(|e| format!("/{}", e.path))
            .collect();
        rootfs.sort();

        Ok(Image {
            base_artifact: artifact.clone(),
            name: spec.name,
            tag: spec.tag,
            command,
            environment,
            rootfs,
            archive,
        })
    }
}

/// Maps a target triple's CPU to the architecture name image configs use.
pub fn oci_architecture(triple: &str) -> &str {
    let cpu = triple.split('-').next().unwrap_or(triple);
    match cpu {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "i686" | "i586" => "386",
        "riscv64gc" | "riscv64" => "riscv64",
        "powerpc64le" => "ppc64le",
        "s390x" => "s390x",
        cpu if cpu.starts_with("arm") => "arm",
        cpu => cpu,
    }
}

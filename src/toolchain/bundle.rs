use crate::digest;
use crate::result::{MatrixError, Result};
use crate::target::TargetId;
use crate::toolchain::Channel;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::path::{Path, PathBuf};

/** A compiler, its build driver and the standard library for one target
 *
 * Only `ToolchainBundleBuilder::build` produces bundles, so every bundle in
 * circulation has passed the compatibility checks.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainBundle {
    pub channel: Channel,
    pub target: TargetId,
    /// Triple of the machine the compiler runs on.
    pub host: SmolStr,
    pub compiler: PathBuf,
    pub build_driver: PathBuf,
    pub std_lib: PathBuf,
    pub release: SmolStr,
    /// Content address of the bundle; equal identities mean interchangeable bundles.
    pub identity: String,
}

#[derive(Debug, Clone)]
struct Component {
    path: PathBuf,
    release: SmolStr,
}

#[derive(Debug, Clone)]
struct StdLibComponent {
    path: PathBuf,
    target: TargetId,
    release: SmolStr,
}

/// Assembles a bundle from separately located components.
#[derive(Debug, Clone)]
pub struct ToolchainBundleBuilder {
    channel: Channel,
    target: TargetId,
    host: Option<SmolStr>,
    compiler: Option<Component>,
    build_driver: Option<Component>,
    std_lib: Option<StdLibComponent>,
}

impl ToolchainBundle {
    pub fn builder(channel: Channel, target: TargetId) -> ToolchainBundleBuilder {
        ToolchainBundleBuilder {
            channel,
            target,
            host: None,
            compiler: None,
            build_driver: None,
            std_lib: None,
        }
    }

    /// Whether every component still exists on disk.
    pub fn is_present(&self) -> bool {
        self.compiler.is_file() && self.build_driver.is_file() && self.std_lib.is_dir()
    }
}

impl ToolchainBundleBuilder {
    pub fn host(mut self, host: impl Into<SmolStr>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn compiler(mut self, path: impl Into<PathBuf>, release: impl Into<SmolStr>) -> Self {
        self.compiler = Some(Component {
            path: path.into(),
            release: release.into(),
        });
        self
    }

    pub fn build_driver(mut self, path: impl Into<PathBuf>, release: impl Into<SmolStr>) -> Self {
        self.build_driver = Some(Component {
            path: path.into(),
            release: release.into(),
        });
        self
    }

    pub fn std_lib(
        mut self,
        path: impl Into<PathBuf>,
        target: TargetId,
        release: impl Into<SmolStr>,
    ) -> Self {
        self.std_lib = Some(StdLibComponent {
            path: path.into(),
            target,
            release: release.into(),
        });
        self
    }

    /** Validates component compatibility and produces the bundle
     *
     * # Errors
     * `MatrixError::ToolchainUnavailable` when:
     * - the host, compiler, build driver or standard library is missing
     * - the standard library was built for a different target
     * - the components come from different releases
     */
    pub fn build(self) -> Result<ToolchainBundle> {
        let host = self.host.ok_or_else(|| {
            MatrixError::toolchain_unavailable(format!(
                "toolchain {} did not report its host triple",
                self.channel
            ))
        })?;
        let compiler = self.compiler.ok_or_else(|| {
            MatrixError::toolchain_unavailable(format!(
                "toolchain {} has no compiler",
                self.channel
            ))
        })?;
        let build_driver = self.build_driver.ok_or_else(|| {
            MatrixError::toolchain_unavailable(format!(
                "toolchain {} has no build driver",
                self.channel
            ))
        })?;
        let std_lib = self.std_lib.ok_or_else(|| {
            MatrixError::toolchain_unavailable(format!(
                "toolchain {} has no standard library for {}",
                self.channel, self.target
            ))
        })?;

        if std_lib.target != self.target {
            return Err(MatrixError::toolchain_unavailable(format!(
                "standard library at {} is for {}, not {}",
                std_lib.path.display(),
                std_lib.target,
                self.target
            )));
        }

        if compiler.release != build_driver.release || compiler.release != std_lib.release {
            return Err(MatrixError::toolchain_unavailable(format!(
                "toolchain {} mixes releases: compiler {}, build driver {}, standard library {}",
                self.channel, compiler.release, build_driver.release, std_lib.release
            )));
        }

        let identity = digest::hash_fields([
            self.channel.as_str(),
            self.target.as_str(),
            host.as_str(),
            compiler.release.as_str(),
            path_field(&compiler.path).as_str(),
            path_field(&build_driver.path).as_str(),
            path_field(&std_lib.path).as_str(),
        ]);

        Ok(ToolchainBundle {
            channel: self.channel,
            target: self.target,
            host,
            compiler: compiler.path,
            build_driver: build_driver.path,
            std_lib: std_lib.path,
            release: compiler.release,
            identity,
        })
    }
}

fn path_field(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetId {
        TargetId::parse("aarch64-unknown-linux-musl").unwrap()
    }

    fn complete() -> ToolchainBundleBuilder {
        ToolchainBundle::builder(Channel::stable(), target())
            .host("x86_64-unknown-linux-gnu")
            .compiler("/tc/bin/rustc", "1.80.1")
            .build_driver("/tc/bin/cargo", "1.80.1")
            .std_lib("/tc/lib/rustlib/aarch64-unknown-linux-musl/lib", target(), "1.80.1")
    }

    #[test]
    fn builds_consistent_bundle() {
        let bundle = complete().build().unwrap();
        assert_eq!(bundle.release, "1.80.1");
        assert_eq!(bundle.host, "x86_64-unknown-linux-gnu");
        assert_eq!(bundle.identity, complete().build().unwrap().identity);
    }

    #[test]
    fn compiler_without_target_std_is_unavailable() {
        let err = ToolchainBundle::builder(Channel::stable(), target())
            .host("x86_64-unknown-linux-gnu")
            .compiler("/tc/bin/rustc", "1.80.1")
            .build_driver("/tc/bin/cargo", "1.80.1")
            .build()
            .unwrap_err();
        assert!(matches!(err, MatrixError::ToolchainUnavailable(_)));
    }

    #[test]
    fn std_for_other_target_is_rejected() {
        let other = TargetId::parse("x86_64-unknown-linux-gnu").unwrap();
        let err = complete()
            .std_lib("/tc/lib/rustlib/x86_64-unknown-linux-gnu/lib", other, "1.80.1")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not aarch64-unknown-linux-musl"));
    }

    #[test]
    fn mixed_releases_fail_fast() {
        let err = complete()
            .build_driver("/tc/bin/cargo", "1.79.0")
            .build()
            .unwrap_err();
        assert!(matches!(err, MatrixError::ToolchainUnavailable(_)));
        assert!(err.to_string().contains("mixes releases"));
    }
}

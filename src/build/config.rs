use crate::result::Result;
use crate::target::{PlatformDescriptor, TargetId};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const STATIC_RUSTFLAGS: &str = "-C target-feature=+crt-static";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Release,
    Debug,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Native,
    Static,
}

/// Something that must exist on the build host, never in the produced image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildDependency {
    /// A C compiler for the build machine, used by build scripts and proc macros.
    HostCCompiler,
}

/** Everything that distinguishes one compilation of the project from another
 *
 * # Construction
 * - `BuildConfig::native` and `BuildConfig::static_linked` are the only
 *   constructors; `BuildConfig::new` picks one with an exhaustive match
 * - Static configs always carry `BuildDependency::HostCCompiler`, also when
 *   the target is the host itself
 */
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildConfig {
    pub target: TargetId,
    pub profile: Profile,
    pub linkage: Linkage,
    pub extra_rustflags: Option<String>,
    pub extra_build_deps: Vec<BuildDependency>,
}

impl BuildConfig {
    pub fn new(platform: &PlatformDescriptor, linkage: Linkage, profile: Profile) -> Result<Self> {
        let target = platform.resolve()?;
        Ok(match linkage {
            Linkage::Native => Self::native(target, profile),
            Linkage::Static => Self::static_linked(target, profile),
        })
    }

    pub fn native(target: TargetId, profile: Profile) -> Self {
        Self {
            target,
            profile,
            linkage: Linkage::Native,
            extra_rustflags: None,
            extra_build_deps: Vec::new(),
        }
    }

    pub fn static_linked(target: TargetId, profile: Profile) -> Self {
        Self {
            target,
            profile,
            linkage: Linkage::Static,
            extra_rustflags: Some(STATIC_RUSTFLAGS.to_string()),
            extra_build_deps: vec![BuildDependency::HostCCompiler],
        }
    }

    pub fn requires(&self, dependency: BuildDependency) -> bool {
        self.extra_build_deps.contains(&dependency)
    }
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Release => "release",
            Profile::Debug => "debug",
        }
    }

    /// Name passed to `cargo build --profile`.
    pub fn cargo_profile(&self) -> &'static str {
        match self {
            Profile::Release => "release",
            Profile::Debug => "dev",
        }
    }

    /// Directory under `target/<triple>/` the profile writes to.
    pub fn output_dir(&self) -> &'static str {
        self.as_str()
    }
}

impl Linkage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Linkage::Native => "native",
            Linkage::Static => "static",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

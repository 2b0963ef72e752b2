use crate::build::{Linkage, Profile};
use crate::target::TargetId;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::path::{Path, PathBuf};

/// A compiled binary and everything needed to name and package it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub target: TargetId,
    pub profile: Profile,
    pub linkage: Linkage,
    pub name: SmolStr,
    pub version: SmolStr,
    /// Hex SHA-256 of the binary.
    pub digest: String,
    /// Triple of the machine that compiled it.
    pub built_on: SmolStr,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the binary can run on the machine that built it.
    pub fn is_host_native(&self) -> bool {
        self.built_on == self.target.as_str()
    }

    pub fn short_digest(&self) -> &str {
        &self.digest[..self.digest.len().min(12)]
    }
}

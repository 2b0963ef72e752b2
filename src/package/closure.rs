use crate::build::{Artifact, Linkage};
use crate::result::{MatrixError, Result};
use crate::utils::{CommandFailure, ProcessManager};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

/// Finds the shared libraries a binary needs at run time.
#[async_trait]
pub trait ClosureResolver: Send + Sync {
    async fn resolve(&self, artifact: &Artifact) -> Result<Vec<PathBuf>>;
}

/** Resolves runtime closures with the host's `ldd`
 *
 * # Notes
 * - Static artifacts have an empty closure and never run `ldd`
 * - Native artifacts for a foreign target cannot be inspected on this host
 *   and fail with `PackagingError`
 */
pub struct LddResolver {
    process: ProcessManager,
}

impl LddResolver {
    pub fn new(process: ProcessManager) -> Self {
        Self { process }
    }
}

#[async_trait]
impl ClosureResolver for LddResolver {
    async fn resolve(&self, artifact: &Artifact) -> Result<Vec<PathBuf>> {
        if artifact.linkage == Linkage::Static {
            return Ok(Vec::new());
        }

        if !artifact.is_host_native() {
            return Err(MatrixError::packaging(format!(
                "cannot resolve the runtime libraries of a native {} binary on a {} host; package a static build instead",
                artifact.target, artifact.built_on
            )));
        }

        let ldd = ProcessManager::find_executable("ldd")
            .map_err(|_| MatrixError::packaging("`ldd` not found; cannot resolve runtime libraries"))?;
        let mut command = Command::new(ldd);
        command.arg(&artifact.path);

        let stdout = match self.process.run_checked(command).await {
            Ok(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
            Err(CommandFailure::Exit { stderr, .. }) if is_not_dynamic(&stderr) => {
                return Ok(Vec::new());
            }
            Err(CommandFailure::Spawn(e)) => return Err(e),
            Err(failure) => {
                return Err(MatrixError::packaging(format!(
                    "ldd {} failed: {}",
                    artifact.path.display(),
                    failure
                )));
            }
        };

        parse_ldd(&stdout)
    }
}

fn is_not_dynamic(text: &str) -> bool {
    text.contains("not a dynamic executable") || text.contains("statically linked")
}

/** Parses `ldd` output into library paths
 *
 * ```text
 *     linux-vdso.so.1 (0x00007ffd...)
 *     libc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f...)
 *     /lib64/ld-linux-x86-64.so.2 (0x00007f...)
 * ```
 */
pub fn parse_ldd(output: &str) -> Result<Vec<PathBuf>> {
    if is_not_dynamic(output) {
        return Ok(Vec::new());
    }

    let mut libraries = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (library, location) = match line.split_once("=>") {
            Some((library, location)) => (library.trim(), location.trim()),
            None => (line, line),
        };

        if location.starts_with("not found") {
            return Err(MatrixError::packaging(format!(
                "runtime library {} not found",
                library
            )));
        }

        let path = location.split_whitespace().next().unwrap_or_default();
        if path.starts_with('/') {
            libraries.push(PathBuf::from(path));
        }
    }

    libraries.sort();
    libraries.dedup();
    Ok(libraries)
}

use crate::result::{MatrixError, Result};
use crate::target::TargetId;
use crate::toolchain::{Channel, ToolchainBundle};
use crate::utils::{CommandFailure, ProcessManager};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::process::Command;

static RELEASE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]+ (?P<release>[0-9]+\.[0-9]+\.[0-9]+(?:-[a-z0-9.]+)?)").unwrap()
});

/// Where toolchain components come from.
#[async_trait]
pub trait ToolchainSource: Send + Sync {
    /// Fetches, installing if needed, a bundle for `channel` able to emit code for `target`.
    async fn fetch(&self, channel: &Channel, target: &TargetId) -> Result<ToolchainBundle>;

    /// Whether a previously fetched bundle can still be used without fetching again.
    fn is_valid(&self, bundle: &ToolchainBundle) -> bool {
        bundle.is_present()
    }
}

/** Provisions toolchains through `rustup`
 *
 * # Process
 * 1. `rustup toolchain install <channel> --profile minimal --target <triple>`
 * 2. `rustup which` locates `rustc` and `cargo` of that toolchain
 * 3. `rustc -vV` and `cargo -V` report host and release
 * 4. `<sysroot>/lib/rustlib/<triple>/lib` must exist for the standard library
 *
 * # Notes
 * - Installing an already installed toolchain is a local no-op for rustup
 * - Installs into one channel run one at a time; rustup does not lock its
 *   toolchain directory against concurrent installs of different targets
 * - Any failure of the above is reported as `ToolchainUnavailable`
 */
pub struct RustupSource {
    rustup: Option<PathBuf>,
    process: ProcessManager,
    installs: Mutex<HashMap<Channel, Arc<tokio::sync::Mutex<()>>>>,
}

impl RustupSource {
    pub fn new(process: ProcessManager) -> Self {
        Self {
            rustup: None,
            process,
            installs: Mutex::new(HashMap::new()),
        }
    }

    fn install_lock(&self, channel: &Channel) -> Arc<tokio::sync::Mutex<()>> {
        let mut installs = self
            .installs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        installs.entry(channel.clone()).or_default().clone()
    }

    fn rustup(&self) -> Result<PathBuf> {
        match &self.rustup {
            Some(path) => Ok(path.clone()),
            None => ProcessManager::find_executable("rustup")
                .map_err(|_| MatrixError::toolchain_unavailable(MatrixError::RUSTUP_NOT_FOUND)),
        }
    }

    async fn capture(&self, command: Command, what: &str) -> Result<String> {
        match self.process.run_checked(command).await {
            Ok(output) => Ok(String::from_utf8_lossy(&output.stdout).trim().to_string()),
            Err(CommandFailure::Spawn(MatrixError::Cancelled(msg))) => {
                Err(MatrixError::Cancelled(msg))
            }
            Err(failure) => Err(MatrixError::toolchain_unavailable(format!(
                "{} {}",
                what, failure
            ))),
        }
    }

    async fn which(&self, rustup: &Path, channel: &Channel, tool: &str) -> Result<PathBuf> {
        let mut command = Command::new(rustup);
        command.args(["which", "--toolchain", channel.as_str(), tool]);
        let path = self
            .capture(command, &format!("`rustup which {}`", tool))
            .await?;
        Ok(PathBuf::from(path))
    }
}

#[async_trait]
impl ToolchainSource for RustupSource {
    async fn fetch(&self, channel: &Channel, target: &TargetId) -> Result<ToolchainBundle> {
        let rustup = self.rustup()?;

        let mut install = Command::new(&rustup);
        install.args([
            "toolchain",
            "install",
            channel.as_str(),
            "--profile",
            "minimal",
            "--no-self-update",
            "--target",
            target.as_str(),
        ]);
        {
            let lock = self.install_lock(channel);
            let _installing = lock.lock().await;
            self.capture(install, &format!("installing {} for {}", channel, target))
                .await?;
        }

        let compiler = self.which(&rustup, channel, "rustc").await?;
        let build_driver = self.which(&rustup, channel, "cargo").await?;

        let mut verbose_version = Command::new(&compiler);
        verbose_version.arg("-vV");
        let compiler_info = parse_verbose_version(
            &self.capture(verbose_version, "`rustc -vV`").await?,
        )?;

        let mut driver_version = Command::new(&build_driver);
        driver_version.arg("-V");
        let driver_release = parse_release(&self.capture(driver_version, "`cargo -V`").await?)?;

        let mut sysroot = Command::new(&compiler);
        sysroot.args(["--print", "sysroot"]);
        let sysroot = PathBuf::from(self.capture(sysroot, "`rustc --print sysroot`").await?);

        let mut builder = ToolchainBundle::builder(channel.clone(), target.clone())
            .host(compiler_info.host)
            .compiler(&compiler, compiler_info.release.clone())
            .build_driver(&build_driver, driver_release);

        let std_lib = std_lib_dir(&sysroot, target);
        if std_lib.is_dir() {
            builder = builder.std_lib(std_lib, target.clone(), compiler_info.release);
        } else {
            log::warn!(
                "{} has no standard library at {}",
                channel,
                std_lib.display()
            );
        }

        builder.build()
    }
}

pub fn std_lib_dir(sysroot: &Path, target: &TargetId) -> PathBuf {
    sysroot
        .join("lib")
        .join("rustlib")
        .join(target.as_str())
        .join("lib")
}

#[derive(Debug, PartialEq, Eq)]
pub struct CompilerInfo {
    pub host: String,
    pub release: String,
}

/// Parses the `host:` and `release:` lines of `rustc -vV`.
pub fn parse_verbose_version(output: &str) -> Result<CompilerInfo> {
    let field = |name: &str| {
        output
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .map(|value| value.trim().to_string())
            .ok_or_else(|| {
                MatrixError::toolchain_unavailable(format!(
                    "`rustc -vV` output has no `{}` line",
                    name.trim_end_matches(':')
                ))
            })
    };

    Ok(CompilerInfo {
        host: field("host:")?,
        release: field("release:")?,
    })
}

/// Extracts `1.80.1` from `cargo 1.80.1 (376290515 2024-07-16)`.
pub fn parse_release(version_line: &str) -> Result<String> {
    RELEASE_REGEX
        .captures(version_line.trim())
        .and_then(|caps| caps.name("release"))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            MatrixError::toolchain_unavailable(format!(
                "cannot read a release from `{}`",
                version_line.trim()
            ))
        })
}

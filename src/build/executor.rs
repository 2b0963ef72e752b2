use crate::build::{Artifact, BuildConfig, BuildDependency};
use crate::digest;
use crate::package::ManifestInfo;
use crate::result::{MatrixError, Result};
use crate::source::SourceTree;
use crate::toolchain::ToolchainBundle;
use crate::utils::{CommandFailure, ProcessManager};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

/// Tools of the build machine that some configurations need besides the toolchain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostTools {
    pub cc: Option<PathBuf>,
}

impl HostTools {
    pub fn detect() -> Self {
        Self {
            cc: ProcessManager::find_executable("cc").ok(),
        }
    }
}

/// One invocation of the build driver, fully described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    /// Where the binary appears when the build succeeds.
    pub expected_output: PathBuf,
}

/// Runs a compile request and returns the path of the produced binary.
#[async_trait]
pub trait CompileBackend: Send + Sync {
    async fn compile(&self, request: &CompileRequest) -> Result<PathBuf>;
}

/// Runs `cargo build` as a child process.
pub struct CargoBackend {
    process: ProcessManager,
}

impl CargoBackend {
    pub fn new(process: ProcessManager) -> Self {
        Self { process }
    }
}

#[async_trait]
impl CompileBackend for CargoBackend {
    async fn compile(&self, request: &CompileRequest) -> Result<PathBuf> {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .env_remove("RUSTFLAGS")
            .envs(&request.env)
            .current_dir(&request.working_dir);

        match self.process.run_checked(command).await {
            Ok(_) => {}
            Err(CommandFailure::Exit { stderr, .. }) => return Err(MatrixError::Compile(stderr)),
            Err(CommandFailure::Spawn(e)) => return Err(e),
        }

        if fs::metadata(&request.expected_output).await.is_err() {
            return Err(MatrixError::Compile(format!(
                "build finished but {} was not produced",
                request.expected_output.display()
            )));
        }
        Ok(request.expected_output.clone())
    }
}

/** Compiles one build configuration into an artifact
 *
 * # Layout
 * - Compilation happens in `<work dir>/target/<triple>-<linkage>-<profile>`,
 *   one directory per combination so concurrent builds never share state
 * - The binary is copied to `<output dir>/<triple>/<linkage>-<profile>/<name>`
 */
pub struct BuildExecutor {
    backend: std::sync::Arc<dyn CompileBackend>,
    host_tools: HostTools,
    work_dir: PathBuf,
    output_dir: PathBuf,
}

impl BuildExecutor {
    pub fn new(
        backend: std::sync::Arc<dyn CompileBackend>,
        host_tools: HostTools,
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            host_tools,
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    fn variant_dir(config: &BuildConfig) -> String {
        format!("{}-{}-{}", config.target, config.linkage, config.profile)
    }

    pub fn target_dir(&self, config: &BuildConfig) -> PathBuf {
        self.work_dir.join("target").join(Self::variant_dir(config))
    }

    /** Builds the request that `execute` hands to the backend
     *
     * Pure: the same inputs always give the same request.
     *
     * # Errors
     * - `MatrixError::ToolchainMismatch` if the bundle targets another triple
     * - `MatrixError::ToolchainUnavailable` if a required host tool is missing
     */
    pub fn plan(
        &self,
        source: &SourceTree,
        bundle: &ToolchainBundle,
        config: &BuildConfig,
        manifest: &ManifestInfo,
    ) -> Result<CompileRequest> {
        if bundle.target != config.target {
            return Err(MatrixError::ToolchainMismatch {
                expected: config.target.to_string(),
                actual: bundle.target.to_string(),
            });
        }

        let target_dir = self.target_dir(config);
        let env = compile_env(config, bundle, &self.host_tools, &target_dir)?;

        let mut args = vec!["build".to_string()];
        if source.lockfile().is_some() {
            args.push("--locked".to_string());
        }
        args.extend([
            "--target".to_string(),
            config.target.to_string(),
            "--profile".to_string(),
            config.profile.cargo_profile().to_string(),
            "--manifest-path".to_string(),
            source.manifest_path().to_string_lossy().into_owned(),
        ]);

        let expected_output = target_dir
            .join(config.target.as_str())
            .join(config.profile.output_dir())
            .join(config.target.executable_name(&manifest.name));

        Ok(CompileRequest {
            program: bundle.build_driver.clone(),
            args,
            env,
            working_dir: source.root().to_path_buf(),
            expected_output,
        })
    }

    pub async fn execute(
        &self,
        source: &SourceTree,
        bundle: &ToolchainBundle,
        config: &BuildConfig,
        manifest: &ManifestInfo,
    ) -> Result<Artifact> {
        let request = self.plan(source, bundle, config, manifest)?;
        fs::create_dir_all(self.target_dir(config)).await?;

        log::info!(
            "compiling {} {} for {} ({})",
            manifest.name,
            config.profile,
            config.target,
            config.linkage
        );
        let built = self.backend.compile(&request).await?;

        let published = self
            .output_dir
            .join(config.target.as_str())
            .join(format!("{}-{}", config.linkage, config.profile))
            .join(config.target.executable_name(&manifest.name));
        if let Some(parent) = published.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&built, &published).await?;

        let digest = digest::hash_file(&published).await?;
        log::info!(
            "built {} ({})",
            published.display(),
            &digest[..12]
        );

        Ok(Artifact {
            path: published,
            target: config.target.clone(),
            profile: config.profile,
            linkage: config.linkage,
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            digest,
            built_on: bundle.host.clone(),
        })
    }
}

/** Environment for one compilation, derived only from its inputs
 *
 * # Variables
 * - `RUSTC`, `RUSTUP_TOOLCHAIN`: pin the bundle's compiler
 * - `CARGO_TARGET_DIR`: the per-combination target directory
 * - `CARGO_INCREMENTAL=0`: no incremental state between builds
 * - `CARGO_ENCODED_RUSTFLAGS`: the config's extra flags, empty for native
 *   builds; it outranks every other rustflags source, and with `--target`
 *   it does not reach build scripts or proc macros compiled for the host
 * - `HOST_CC`, `CC_<host triple>`: the host C compiler, when the config
 *   requires `BuildDependency::HostCCompiler`
 */
pub fn compile_env(
    config: &BuildConfig,
    bundle: &ToolchainBundle,
    host_tools: &HostTools,
    target_dir: &Path,
) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    env.insert(
        "RUSTC".to_string(),
        bundle.compiler.to_string_lossy().into_owned(),
    );
    env.insert("RUSTUP_TOOLCHAIN".to_string(), bundle.channel.to_string());
    env.insert(
        "CARGO_TARGET_DIR".to_string(),
        target_dir.to_string_lossy().into_owned(),
    );
    env.insert("CARGO_INCREMENTAL".to_string(), "0".to_string());

    env.insert(
        "CARGO_ENCODED_RUSTFLAGS".to_string(),
        encode_rustflags(config.extra_rustflags.as_deref()),
    );

    for dependency in &config.extra_build_deps {
        match dependency {
            BuildDependency::HostCCompiler => {
                let cc = host_tools.cc.as_ref().ok_or_else(|| {
                    MatrixError::toolchain_unavailable(MatrixError::HOST_CC_NOT_FOUND)
                })?;
                let cc = cc.to_string_lossy().into_owned();
                env.insert(
                    format!("CC_{}", bundle.host.replace(['-', '.'], "_")),
                    cc.clone(),
                );
                env.insert("HOST_CC".to_string(), cc);
            }
        }
    }

    Ok(env)
}

/// Flags in the `\x1f`-separated form `CARGO_ENCODED_RUSTFLAGS` expects.
fn encode_rustflags(flags: Option<&str>) -> String {
    flags
        .map(|flags| flags.split_whitespace().collect::<Vec<_>>().join("\x1f"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::Profile;
    use crate::target::TargetId;
    use crate::toolchain::Channel;
    use std::sync::{Arc, Mutex};

    struct RecordingBackend {
        requests: Mutex<Vec<CompileRequest>>,
        failure: Option<String>,
    }

    impl RecordingBackend {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                failure: None,
            }
        }
    }

    #[async_trait]
    impl CompileBackend for RecordingBackend {
        async fn compile(&self, request: &CompileRequest) -> Result<PathBuf> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(stderr) = &self.failure {
                return Err(MatrixError::Compile(stderr.clone()));
            }
            std::fs::create_dir_all(request.expected_output.parent().unwrap())?;
            std::fs::write(&request.expected_output, b"\x7fELF fake")?;
            Ok(request.expected_output.clone())
        }
    }

    fn target() -> TargetId {
        TargetId::parse("x86_64-unknown-linux-gnu").unwrap()
    }

    fn bundle_for(target: TargetId) -> ToolchainBundle {
        ToolchainBundle::builder(Channel::stable(), target.clone())
            .host("x86_64-unknown-linux-gnu")
            .compiler("/tc/bin/rustc", "1.80.1")
            .build_driver("/tc/bin/cargo", "1.80.1")
            .std_lib("/tc/lib", target, "1.80.1")
            .build()
            .unwrap()
    }

    fn manifest() -> ManifestInfo {
        ManifestInfo {
            name: "benefice".into(),
            version: "1.2.0".into(),
        }
    }

    fn source(dir: &Path) -> SourceTree {
        SourceTree::new(
            dir.to_path_buf(),
            "Cargo.toml".into(),
            Some("Cargo.lock".into()),
            vec!["Cargo.toml".into(), "Cargo.lock".into()],
        )
    }

    fn tools() -> HostTools {
        HostTools {
            cc: Some("/usr/bin/cc".into()),
        }
    }

    #[test]
    fn static_env_pins_rustflags_and_adds_host_cc() {
        let config = BuildConfig::static_linked(target(), Profile::Release);
        let env = compile_env(&config, &bundle_for(target()), &tools(), Path::new("/w/t")).unwrap();

        assert_eq!(
            env.get("CARGO_ENCODED_RUSTFLAGS").map(String::as_str),
            Some("-C\x1ftarget-feature=+crt-static")
        );
        assert_eq!(env.get("HOST_CC").map(String::as_str), Some("/usr/bin/cc"));
        assert_eq!(
            env.get("CC_x86_64_unknown_linux_gnu").map(String::as_str),
            Some("/usr/bin/cc")
        );
        assert_eq!(env.get("CARGO_INCREMENTAL").map(String::as_str), Some("0"));
        assert!(!env.contains_key("RUSTFLAGS"));
    }

    #[test]
    fn native_env_has_no_linkage_flags() {
        let config = BuildConfig::native(target(), Profile::Debug);
        let env = compile_env(&config, &bundle_for(target()), &HostTools::default(), Path::new("/w/t"))
            .unwrap();
        assert_eq!(env.get("CARGO_ENCODED_RUSTFLAGS").map(String::as_str), Some(""));
        assert!(!env.contains_key("HOST_CC"));
    }

    #[test]
    fn env_is_a_function_of_its_inputs() {
        let config = BuildConfig::static_linked(target(), Profile::Release);
        let a = compile_env(&config, &bundle_for(target()), &tools(), Path::new("/w/t")).unwrap();
        let b = compile_env(&config, &bundle_for(target()), &tools(), Path::new("/w/t")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn static_without_host_cc_is_unavailable() {
        let config = BuildConfig::static_linked(target(), Profile::Release);
        let err = compile_env(&config, &bundle_for(target()), &HostTools::default(), Path::new("/t"))
            .unwrap_err();
        assert!(matches!(err, MatrixError::ToolchainUnavailable(_)));
    }

    #[tokio::test]
    async fn mismatched_bundle_is_rejected_before_compiling() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(RecordingBackend::new());
        let executor = BuildExecutor::new(backend.clone(), tools(), dir.path().join("w"), dir.path().join("o"));
        let other = TargetId::parse("aarch64-unknown-linux-gnu").unwrap();

        let err = executor
            .execute(
                &source(dir.path()),
                &bundle_for(other),
                &BuildConfig::native(target(), Profile::Release),
                &manifest(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MatrixError::ToolchainMismatch { .. }));
        assert!(backend.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_build_publishes_the_binary() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(RecordingBackend::new());
        let executor = BuildExecutor::new(backend.clone(), tools(), dir.path().join("w"), dir.path().join("o"));
        let config = BuildConfig::static_linked(target(), Profile::Release);

        let artifact = executor
            .execute(&source(dir.path()), &bundle_for(target()), &config, &manifest())
            .await
            .unwrap();

        assert_eq!(
            artifact.path,
            dir.path().join("o/x86_64-unknown-linux-gnu/static-release/benefice")
        );
        assert_eq!(artifact.digest, digest::hash_bytes(b"\x7fELF fake"));
        assert!(artifact.is_host_native());

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].program, PathBuf::from("/tc/bin/cargo"));
        assert_eq!(
            &requests[0].args[..6],
            &["build", "--locked", "--target", "x86_64-unknown-linux-gnu", "--profile", "release"]
        );
    }

    #[test]
    fn each_combination_gets_its_own_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let executor = BuildExecutor::new(Arc::new(RecordingBackend::new()), tools(), "/w", "/o");
        let src = source(dir.path());
        let bundle = bundle_for(target());

        let a = executor
            .plan(&src, &bundle, &BuildConfig::native(target(), Profile::Release), &manifest())
            .unwrap();
        let b = executor
            .plan(&src, &bundle, &BuildConfig::static_linked(target(), Profile::Release), &manifest())
            .unwrap();
        assert_ne!(a.env["CARGO_TARGET_DIR"], b.env["CARGO_TARGET_DIR"]);
        assert_eq!(b.env["CARGO_TARGET_DIR"], "/w/target/x86_64-unknown-linux-gnu-static-release");
        assert_eq!(
            a.expected_output,
            PathBuf::from("/w/target/x86_64-unknown-linux-gnu-native-release/x86_64-unknown-linux-gnu/release/benefice")
        );
    }

    #[tokio::test]
    async fn compiler_diagnostics_are_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostic = "error[E0425]: cannot find value `x` in this scope\n --> src/main.rs:2:5\n";
        let backend = Arc::new(RecordingBackend {
            requests: Mutex::new(Vec::new()),
            failure: Some(diagnostic.to_string()),
        });
        let executor = BuildExecutor::new(backend, tools(), dir.path().join("w"), dir.path().join("o"));

        let err = executor
            .execute(
                &source(dir.path()),
                &bundle_for(target()),
                &BuildConfig::native(target(), Profile::Debug),
                &manifest(),
            )
            .await
            .unwrap_err();
        match err {
            MatrixError::Compile(text) => assert_eq!(text, diagnostic),
            other => panic!("unexpected error {}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cargo_backend_maps_failed_exit_to_compile_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("cargo");
        std::fs::write(&script, "#!/bin/sh\necho 'error: could not compile `benefice`' >&2\nexit 101\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = CargoBackend::new(ProcessManager::default());
        let err = backend
            .compile(&CompileRequest {
                program: script,
                args: vec!["build".into()],
                env: BTreeMap::new(),
                working_dir: dir.path().to_path_buf(),
                expected_output: dir.path().join("never"),
            })
            .await
            .unwrap_err();
        match err {
            MatrixError::Compile(text) => assert_eq!(text, "error: could not compile `benefice`\n"),
            other => panic!("unexpected error {}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn inherited_rustflags_never_reach_cargo() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("seen");
        let script = dir.path().join("cargo");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nprintf '%s|%s' \"${{RUSTFLAGS-unset}}\" \"$CARGO_ENCODED_RUSTFLAGS\" > {}\nmkdir -p \"$(dirname \"$OUT\")\"\n: > \"$OUT\"\n",
                seen.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = BuildConfig::static_linked(target(), Profile::Release);
        let mut env = compile_env(&config, &bundle_for(target()), &tools(), Path::new("/w/t")).unwrap();
        let expected_output = dir.path().join("out/benefice");
        env.insert("OUT".into(), expected_output.to_string_lossy().into_owned());

        std::env::set_var("RUSTFLAGS", "-C opt-level=1");
        let result = CargoBackend::new(ProcessManager::default())
            .compile(&CompileRequest {
                program: script,
                args: vec!["build".into()],
                env,
                working_dir: dir.path().to_path_buf(),
                expected_output: expected_output.clone(),
            })
            .await;
        std::env::remove_var("RUSTFLAGS");

        assert_eq!(result.unwrap(), expected_output);
        assert_eq!(
            std::fs::read_to_string(&seen).unwrap(),
            "unset|-C\x1ftarget-feature=+crt-static"
        );
    }
}

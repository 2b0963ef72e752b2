use async_trait::async_trait;
use crossmatrix::build::{
    Artifact, BuildExecutor, CompileBackend, CompileRequest, HostTools, Linkage, Profile,
};
use crossmatrix::matrix::{enumerate, MatrixDriver, Output, Packaging, Pipeline, RunStatus};
use crossmatrix::package::{
    ArtifactPackager, ClosureResolver, DockerArchiveWriter, ManifestInfo, ManifestReader,
};
use crossmatrix::result::{MatrixError, Result};
use crossmatrix::source::{SourceFilter, SourceTree};
use crossmatrix::target::{self, NamedPlatform, TargetId};
use crossmatrix::toolchain::{Channel, ToolchainBundle, ToolchainProvisioner, ToolchainSource};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const HOST: &str = "x86_64-unknown-linux-gnu";

struct FakeSource {
    fetches: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl FakeSource {
    fn new() -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
        }
    }

    fn failing_once() -> Self {
        let source = Self::new();
        source.failures_left.store(1, Ordering::SeqCst);
        source
    }
}

#[async_trait]
impl ToolchainSource for FakeSource {
    async fn fetch(&self, channel: &Channel, target: &TargetId) -> Result<ToolchainBundle> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MatrixError::toolchain_unavailable("mirror unreachable"));
        }

        ToolchainBundle::builder(channel.clone(), target.clone())
            .host(HOST)
            .compiler("/fake/bin/rustc", "1.80.1")
            .build_driver("/fake/bin/cargo", "1.80.1")
            .std_lib(format!("/fake/lib/rustlib/{}/lib", target), target.clone(), "1.80.1")
            .build()
    }

    fn is_valid(&self, _bundle: &ToolchainBundle) -> bool {
        true
    }
}

/// Stands in for cargo: writes a binary whose bytes depend on the target.
struct WritingBackend;

#[async_trait]
impl CompileBackend for WritingBackend {
    async fn compile(&self, request: &CompileRequest) -> Result<PathBuf> {
        let target = &request.args[request.args.iter().position(|a| a == "--target").unwrap() + 1];
        let parent = request.expected_output.parent().unwrap();
        tokio::fs::create_dir_all(parent).await?;
        tokio::fs::write(&request.expected_output, format!("\x7fELF {}", target)).await?;
        Ok(request.expected_output.clone())
    }
}

struct NoLibraries;

#[async_trait]
impl ClosureResolver for NoLibraries {
    async fn resolve(&self, _artifact: &Artifact) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

struct UnreadableLibraries;

#[async_trait]
impl ClosureResolver for UnreadableLibraries {
    async fn resolve(&self, artifact: &Artifact) -> Result<Vec<PathBuf>> {
        Err(MatrixError::packaging(format!(
            "cannot read the dynamic section of {}",
            artifact.path.display()
        )))
    }
}

fn write_project(root: &Path, version: &str) {
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(
        root.join("Cargo.toml"),
        format!("[package]\nname = \"benefice\"\nversion = \"{}\"\nedition = \"2021\"\n", version),
    )
    .unwrap();
    std::fs::write(root.join("Cargo.lock"), "version = 3\n").unwrap();
    std::fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
    std::fs::create_dir_all(root.join("target/debug")).unwrap();
    std::fs::write(root.join("target/debug/stale"), "old").unwrap();
}

async fn prepare(root: &Path) -> (Arc<SourceTree>, Arc<ManifestInfo>) {
    let tree = SourceFilter::with_defaults("Cargo.toml", "Cargo.lock", &[".matrix", "matrix-out"])
        .unwrap()
        .apply(root)
        .unwrap();
    let manifest = ManifestReader::read(&tree).await.unwrap();
    (Arc::new(tree), Arc::new(manifest))
}

fn pipeline(dir: &Path, source: Arc<FakeSource>) -> Arc<Pipeline> {
    pipeline_with(dir, source, Arc::new(NoLibraries))
}

fn pipeline_with(
    dir: &Path,
    source: Arc<FakeSource>,
    closure: Arc<dyn ClosureResolver>,
) -> Arc<Pipeline> {
    let executor = BuildExecutor::new(
        Arc::new(WritingBackend),
        HostTools {
            cc: Some("/usr/bin/cc".into()),
        },
        dir.join("work"),
        dir.join("out"),
    );
    let packager = ArtifactPackager::new(
        closure,
        Arc::new(DockerArchiveWriter),
        dir.join("out"),
    );

    Arc::new(Pipeline {
        channel: Channel::stable(),
        provisioner: Arc::new(ToolchainProvisioner::new(source)),
        executor: Arc::new(executor),
        packager: Arc::new(packager),
        cancel: CancellationToken::new(),
    })
}

fn platforms(names: &[&str]) -> Vec<NamedPlatform> {
    names.iter().map(|name| target::lookup(name, &[]).unwrap()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn packages_native_and_static_images_of_one_version() {
    let project = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_project(project.path(), "1.2.0");
    let (source, manifest) = prepare(project.path()).await;

    assert!(source.contains(Path::new("src/main.rs")));
    assert!(!source.contains(Path::new("target/debug/stale")));

    let variants = enumerate(
        &platforms(&["x86_64-linux"]),
        &[Linkage::Native, Linkage::Static],
        &[Profile::Release],
        true,
    )
    .unwrap();
    let driver = MatrixDriver::new(pipeline(out.path(), Arc::new(FakeSource::new())), 2);
    let catalog = driver.run(source, manifest, variants).await;

    assert_eq!(catalog.status(), RunStatus::Success);
    assert_eq!(catalog.len(), 2);

    let mut archives = Vec::new();
    for (key, output) in catalog.successes() {
        assert_eq!(key.packaging, Packaging::Image);
        let Output::Image(image) = output else {
            panic!("{} should be an image", key);
        };
        assert_eq!(image.reference(), "benefice:1.2.0");
        assert_eq!(image.command, vec!["benefice"]);
        assert_eq!(image.base_artifact.linkage, key.linkage);
        assert!(image.archive.is_file());
        archives.push(image.archive.clone());
    }
    assert_ne!(archives[0], archives[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_unavailable_toolchain_fails_one_combination() {
    let project = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_project(project.path(), "0.4.0");
    let (source, manifest) = prepare(project.path()).await;

    let variants = enumerate(
        &platforms(&["x86_64-linux", "aarch64-linux"]),
        &[Linkage::Native, Linkage::Static],
        &[Profile::Release, Profile::Debug],
        false,
    )
    .unwrap();
    assert_eq!(variants.len(), 8);

    // One job at a time, so only the first fetch sees the failure.
    let source_fake = Arc::new(FakeSource::failing_once());
    let driver = MatrixDriver::new(pipeline(out.path(), source_fake.clone()), 1);
    let catalog = driver.run(source, manifest, variants).await;

    assert_eq!(catalog.len(), 8);
    assert_eq!(catalog.successes().count(), 7);
    let failures: Vec<_> = catalog.failures().collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].1, MatrixError::ToolchainUnavailable(_)));
    assert_eq!(catalog.status(), RunStatus::PartialFailure);
    assert_eq!(catalog.status().exit_code(), 1);
    assert_eq!(source_fake.fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn combinations_of_one_target_share_a_toolchain_fetch() {
    let project = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_project(project.path(), "1.0.0");
    let (source, manifest) = prepare(project.path()).await;

    let variants = enumerate(
        &platforms(&["x86_64-linux"]),
        &[Linkage::Native, Linkage::Static],
        &[Profile::Release, Profile::Debug],
        false,
    )
    .unwrap();
    let fake = Arc::new(FakeSource::new());
    let driver = MatrixDriver::new(pipeline(out.path(), fake.clone()), 4);
    let catalog = driver.run(source, manifest, variants).await;

    assert_eq!(catalog.status(), RunStatus::Success);
    assert_eq!(catalog.len(), 4);
    assert_eq!(fake.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn new_version_keeps_the_image_name_and_changes_the_tag() {
    let out = TempDir::new().unwrap();
    let pipeline = pipeline(out.path(), Arc::new(FakeSource::new()));
    let driver = MatrixDriver::new(pipeline, 1);
    let variants = enumerate(
        &platforms(&["x86_64-linux"]),
        &[Linkage::Static],
        &[Profile::Release],
        true,
    )
    .unwrap();
    let variant = &variants[0];

    let mut images = Vec::new();
    for version in ["1.2.0", "1.3.0"] {
        let project = TempDir::new().unwrap();
        write_project(project.path(), version);
        let (source, manifest) = prepare(project.path()).await;
        match driver.run_single(&source, &manifest, variant).await.unwrap() {
            Output::Image(image) => images.push(image),
            other => panic!("expected an image, got {:?}", other),
        }
    }

    assert_eq!(images[0].name, images[1].name);
    assert_eq!(images[0].tag, "1.2.0");
    assert_eq!(images[1].tag, "1.3.0");
    assert!(images[0].archive.is_file());
    assert!(images[1].archive.is_file());
}

#[tokio::test]
async fn failed_packaging_still_records_the_binary() {
    let project = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_project(project.path(), "2.0.0");
    let (source, manifest) = prepare(project.path()).await;

    let variants = enumerate(
        &platforms(&["x86_64-linux"]),
        &[Linkage::Native],
        &[Profile::Release],
        true,
    )
    .unwrap();
    let key = variants[0].key.clone();
    let pipeline = pipeline_with(
        out.path(),
        Arc::new(FakeSource::new()),
        Arc::new(UnreadableLibraries),
    );
    let catalog = MatrixDriver::new(pipeline, 1).run(source, manifest, variants).await;

    assert!(matches!(
        catalog.get(&key),
        Some(Err(MatrixError::Packaging(_)))
    ));
    match catalog.get(&key.as_binary()) {
        Some(Ok(Output::Binary(artifact))) => assert!(artifact.path.is_file()),
        other => panic!("expected the binary to be recorded, got {:?}", other),
    }
    assert_eq!(catalog.status(), RunStatus::PartialFailure);
    assert_eq!(catalog.status().exit_code(), 1);
}

#[tokio::test]
async fn cancelled_run_records_every_combination() {
    let project = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_project(project.path(), "1.0.0");
    let (source, manifest) = prepare(project.path()).await;

    let pipeline = pipeline(out.path(), Arc::new(FakeSource::new()));
    pipeline.cancel.cancel();
    let variants = enumerate(
        &platforms(&["x86_64-linux", "aarch64-linux"]),
        &[Linkage::Native],
        &[Profile::Release],
        false,
    )
    .unwrap();

    let catalog = MatrixDriver::new(pipeline, 2).run(source, manifest, variants).await;
    assert_eq!(catalog.len(), 2);
    assert!(catalog
        .failures()
        .all(|(_, e)| matches!(e, MatrixError::Cancelled(_))));
    assert_eq!(catalog.status(), RunStatus::Failed);
}

/// crossmatrix - a declarative build-matrix orchestrator
///
/// Builds one Rust project for every combination of platform, linkage and
/// profile listed in `matrix.toml`, optionally packaging each binary as a
/// minimal container image.
///
/// Main modules:
/// - build: Build configurations, the compile backend and artifacts
/// - cache: Persistent index of provisioned toolchains
/// - cli: Command-line interface parsing and execution
/// - commands: Implementation of the subcommands
/// - config: The `matrix.toml` schema and validation
/// - digest: SHA-256 helpers for content addressing
/// - matrix: Variant enumeration and the concurrent driver
/// - package: Manifest reading, runtime closure and image writing
/// - result: Error handling and exit codes
/// - source: Source filtering and staging
/// - target: Platform descriptors and target triples
/// - toolchain: Toolchain bundles and single-flight provisioning
/// - utils: Process management
pub mod build;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod digest;
pub mod matrix;
pub mod package;
pub mod result;
pub mod source;
pub mod target;
pub mod toolchain;
pub mod utils;

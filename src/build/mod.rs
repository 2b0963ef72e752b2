pub mod artifact;
pub mod config;
pub mod executor;

pub use artifact::Artifact;
pub use config::{BuildConfig, BuildDependency, Linkage, Profile};
pub use executor::{BuildExecutor, CargoBackend, CompileBackend, CompileRequest, HostTools};

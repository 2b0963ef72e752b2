pub mod closure;
pub mod image;
pub mod manifest;
pub mod writer;

pub use closure::{ClosureResolver, LddResolver};
pub use image::{ArtifactPackager, Image};
pub use manifest::{ManifestInfo, ManifestReader};
pub use writer::{DockerArchiveWriter, ImageSpec, ImageWriter, RootfsEntry};

pub mod driver;
pub mod variant;

pub use driver::{MatrixDriver, Output, OutputCatalog, Pipeline, RunStatus};
pub use variant::{enumerate, Packaging, Variant, VariantKey};

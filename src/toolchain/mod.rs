pub mod bundle;
pub mod channel;
pub mod provisioner;
pub mod source;

pub use bundle::{ToolchainBundle, ToolchainBundleBuilder};
pub use channel::Channel;
pub use provisioner::ToolchainProvisioner;
pub use source::{RustupSource, ToolchainSource};

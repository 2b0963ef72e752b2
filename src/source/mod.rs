pub mod filter;
pub mod tree;

pub use filter::*;
pub use tree::*;

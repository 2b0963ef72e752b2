pub mod process;

pub use process::{CommandFailure, ProcessManager};

use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

/** Main Result type alias for crossmatrix operations
 *
 * # Usage
 * ```no_run
 * use crossmatrix::result::Result;
 *
 * async fn read_config() -> Result<String> {
 *     // Function automatically propagates MatrixError
 *     let content = std::fs::read_to_string("matrix.toml")?;
 *     Ok(content)
 * }
 * ```
 */
pub type Result<T> = std::result::Result<T, MatrixError>;

/// Process exit status when every requested combination succeeded.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit status when at least one combination failed.
pub const EXIT_PARTIAL_FAILURE: i32 = 1;
/// Process exit status when the run was rejected before any build started.
pub const EXIT_INVALID_CONFIGURATION: i32 = 2;

/** Error enumeration for the build-matrix orchestrator
 *
 * # Error Categories
 * - **Run level** (abort everything before a build starts): `Configuration`,
 *   `Filesystem`, `ManifestInvalid`
 * - **Combination level** (recorded in the catalog, siblings continue):
 *   `ToolchainUnavailable`, `ToolchainMismatch`, `Compile`, `Packaging`,
 *   `Cancelled`, `TimedOut`
 * - **Plumbing**: `Io`, `TomlParse`, `TomlSerialize`, `JsonError`
 *
 * # Design Notes
 * - Uses `Cow<'static, str>` for efficient string storage
 * - `Compile` keeps the compiler's diagnostic text verbatim
 */
#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Configuration error: {0}")]
    Configuration(Cow<'static, str>),

    #[error("Filesystem error: {0}")]
    Filesystem(Cow<'static, str>),

    #[error("Invalid manifest: {0}")]
    ManifestInvalid(Cow<'static, str>),

    #[error("Toolchain unavailable: {0}")]
    ToolchainUnavailable(Cow<'static, str>),

    #[error("Toolchain mismatch: bundle targets {actual}, build requires {expected}")]
    ToolchainMismatch { expected: String, actual: String },

    #[error("Compilation failed:\n{0}")]
    Compile(String),

    #[error("Packaging error: {0}")]
    Packaging(Cow<'static, str>),

    #[error("Cancelled: {0}")]
    Cancelled(Cow<'static, str>),

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/** Error constants and constructor methods
 *
 * # Usage Examples
 * ```ignore
 * use crossmatrix::result::MatrixError;
 *
 * return Err(MatrixError::toolchain_unavailable(MatrixError::RUSTUP_NOT_FOUND));
 * return Err(MatrixError::configuration(format!("unknown platform `{}`", name)));
 * ```
 */
impl MatrixError {
    pub const RUSTUP_NOT_FOUND: &'static str = "rustup binary not found on PATH";
    pub const HOST_CC_NOT_FOUND: &'static str =
        "host C compiler `cc` not found; static builds need it at build time";
    pub const EMPTY_MATRIX: &'static str = "the build matrix has no combinations";

    pub fn configuration(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn filesystem(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Filesystem(msg.into())
    }

    pub fn manifest_invalid(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::ManifestInvalid(msg.into())
    }

    /** Creates a ToolchainUnavailable error
     *
     * # Use Cases
     * - rustup missing or failing to install a toolchain
     * - Network failures while fetching components
     * - A compiler without the standard library for the requested target
     */
    pub fn toolchain_unavailable(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::ToolchainUnavailable(msg.into())
    }

    pub fn packaging(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Packaging(msg.into())
    }

    pub fn cancelled(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Cancelled(msg.into())
    }

    /** Whether this error aborts the whole run before any build starts
     *
     * Configuration, filesystem and manifest problems make every combination
     * meaningless, so they are never recorded per combination.
     */
    pub fn is_run_level(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::Filesystem(_)
                | Self::ManifestInvalid(_)
                | Self::TomlParse(_)
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_run_level() {
            EXIT_INVALID_CONFIGURATION
        } else {
            EXIT_PARTIAL_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_level_errors_map_to_configuration_exit_code() {
        assert_eq!(
            MatrixError::configuration("bad").exit_code(),
            EXIT_INVALID_CONFIGURATION
        );
        assert_eq!(
            MatrixError::manifest_invalid("bad").exit_code(),
            EXIT_INVALID_CONFIGURATION
        );
        assert_eq!(
            MatrixError::Compile("error[E0308]".into()).exit_code(),
            EXIT_PARTIAL_FAILURE
        );
    }

    #[test]
    fn compile_error_preserves_diagnostic() {
        let diagnostic = "error[E0425]: cannot find value `x` in this scope\n --> src/main.rs:2:5";
        let err = MatrixError::Compile(diagnostic.to_string());
        assert!(err.to_string().ends_with(diagnostic));
        assert!(!err.is_run_level());
    }
}

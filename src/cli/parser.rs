use crate::result::{MatrixError, Result};
use smol_str::SmolStr;
use std::path::{Path, PathBuf};

pub struct CliParser;

impl CliParser {
    pub fn validate_config_path(path: &Path) -> Result<PathBuf> {
        if !path.exists() {
            return Err(MatrixError::configuration(format!(
                "Config file not found: {} (run `crossmatrix setup` to create one)",
                path.display()
            )));
        }

        if !path.is_file() {
            return Err(MatrixError::configuration(format!(
                "{} is not a file",
                path.display()
            )));
        }

        Ok(path.to_path_buf())
    }

    pub fn validate_jobs(jobs: usize) -> Result<usize> {
        match jobs {
            0 => Err(MatrixError::configuration("--jobs must be at least 1")),
            n => Ok(n),
        }
    }

    /// Trims names and drops empty ones, keeping the given order.
    pub fn platform_names(values: &[String]) -> Vec<SmolStr> {
        values
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(SmolStr::new)
            .collect()
    }
}

use crate::result::{MatrixError, Result};
use crate::source::SourceTree;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::path::Path;
use tokio::fs;

/// Name and version of the project being built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestInfo {
    pub name: SmolStr,
    pub version: SmolStr,
}

/** Reads project identity from the build manifest
 *
 * # Lookup
 * - `[package].name` / `[package].version`
 * - top-level `name` / `version` when there is no `[package]` table
 *
 * # Notes
 * - Only literal strings are accepted; inherited values such as
 *   `version.workspace = true` cannot name an image and are rejected
 * - The name must work as an image reference: lowercase, without `/`, `:`
 *   or whitespace
 * - The manifest is never written
 */
pub struct ManifestReader;

impl ManifestReader {
    pub async fn read(tree: &SourceTree) -> Result<ManifestInfo> {
        Self::read_file(&tree.manifest_path()).await
    }

    pub async fn read_file(path: &Path) -> Result<ManifestInfo> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            MatrixError::manifest_invalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content).map_err(|e| match e {
            MatrixError::ManifestInvalid(msg) => {
                MatrixError::manifest_invalid(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<ManifestInfo> {
        let document: toml::Table = toml::from_str(content)
            .map_err(|e| MatrixError::manifest_invalid(format!("not valid TOML: {}", e)))?;

        let (section, table) = match document.get("package") {
            Some(toml::Value::Table(package)) => ("package.", package),
            Some(_) => {
                return Err(MatrixError::manifest_invalid("`package` must be a table"));
            }
            None => ("", &document),
        };

        let name = literal(table, section, "name")?;
        if name
            .chars()
            .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_ascii_uppercase())
        {
            return Err(MatrixError::manifest_invalid(format!(
                "`{}name` = `{}` cannot be used as a binary or image name",
                section, name
            )));
        }
        let version = literal(table, section, "version")?;

        Ok(ManifestInfo {
            name: SmolStr::new(name),
            version: SmolStr::new(version),
        })
    }
}

fn literal<'a>(table: &'a toml::Table, section: &str, key: &str) -> Result<&'a str> {
    match table.get(key) {
        Some(toml::Value::String(value)) if !value.trim().is_empty() => Ok(value.as_str()),
        Some(toml::Value::String(_)) => Err(MatrixError::manifest_invalid(format!(
            "`{}{}` is empty",
            section, key
        ))),
        Some(_) => Err(MatrixError::manifest_invalid(format!(
            "`{}{}` must be a literal string",
            section, key
        ))),
        None => Err(MatrixError::manifest_invalid(format!(
            "missing `{}{}`",
            section, key
        ))),
    }
}

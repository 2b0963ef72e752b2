use crate::digest;
use crate::result::{MatrixError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

const STAMP_FILE: &str = ".crossmatrix-stamp";

/// The filtered, build-relevant file set of a project. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    root: PathBuf,
    manifest: PathBuf,
    lockfile: Option<PathBuf>,
    files: Vec<PathBuf>,
}

impl SourceTree {
    pub fn new(
        root: PathBuf,
        manifest: PathBuf,
        lockfile: Option<PathBuf>,
        mut files: Vec<PathBuf>,
    ) -> Self {
        files.sort();
        files.dedup();
        Self {
            root,
            manifest,
            lockfile,
            files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path of the primary manifest.
    pub fn manifest(&self) -> &Path {
        &self.manifest
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest)
    }

    pub fn lockfile(&self) -> Option<&Path> {
        self.lockfile.as_deref()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn contains(&self, relative: &Path) -> bool {
        self.files.binary_search_by(|f| f.as_path().cmp(relative)).is_ok()
    }

    /** Hash over every (relative path, content) pair, in sorted path order
     *
     * Two trees with the same hash feed the compiler identical inputs.
     */
    pub async fn content_hash(&self) -> Result<String> {
        let mut fields = Vec::with_capacity(self.files.len() * 2);
        for file in &self.files {
            let content_hash = digest::hash_file(&self.root.join(file))
                .await
                .map_err(|e| {
                    MatrixError::filesystem(format!("failed to read {}: {}", file.display(), e))
                })?;
            fields.push(file.to_string_lossy().replace('\\', "/"));
            fields.push(content_hash);
        }
        Ok(digest::hash_fields(&fields))
    }

    /** Copies the tree into `parent/source-<hash>` and returns the copy
     *
     * # Notes
     * - Builds run against the copy, so they only ever see filtered inputs
     * - A copy with a matching stamp is reused as-is
     * - The copy is assembled in a scratch directory and renamed into place,
     *   so an interrupted run never leaves a half-populated tree behind
     */
    pub async fn stage(&self, parent: &Path) -> Result<SourceTree> {
        let hash = self.content_hash().await?;
        let dest = parent.join(format!("source-{}", &hash[..16]));

        if let Ok(stamp) = fs::read_to_string(dest.join(STAMP_FILE)).await {
            if stamp.trim() == hash {
                log::debug!("reusing staged source tree {}", dest.display());
                return Ok(self.rooted_at(dest));
            }
        }

        let scratch = parent.join(format!(".source-{}.partial", &hash[..16]));
        if fs::metadata(&scratch).await.is_ok() {
            fs::remove_dir_all(&scratch)
                .await
                .map_err(|e| staging_error(&scratch, e))?;
        }

        for file in &self.files {
            let target = scratch.join(file);
            if let Some(dir) = target.parent() {
                fs::create_dir_all(dir)
                    .await
                    .map_err(|e| staging_error(dir, e))?;
            }
            fs::copy(self.root.join(file), &target).await.map_err(|e| {
                MatrixError::filesystem(format!("failed to stage {}: {}", file.display(), e))
            })?;
        }
        fs::create_dir_all(&scratch)
            .await
            .map_err(|e| staging_error(&scratch, e))?;
        let stamp = scratch.join(STAMP_FILE);
        fs::write(&stamp, &hash)
            .await
            .map_err(|e| staging_error(&stamp, e))?;

        if fs::metadata(&dest).await.is_ok() {
            fs::remove_dir_all(&dest)
                .await
                .map_err(|e| staging_error(&dest, e))?;
        }
        fs::rename(&scratch, &dest)
            .await
            .map_err(|e| staging_error(&dest, e))?;

        log::info!(
            "staged {} source files into {}",
            self.files.len(),
            dest.display()
        );
        Ok(self.rooted_at(dest))
    }

    fn rooted_at(&self, root: PathBuf) -> SourceTree {
        SourceTree {
            root,
            ..self.clone()
        }
    }
}

fn staging_error(path: &Path, e: std::io::Error) -> MatrixError {
    MatrixError::filesystem(format!("failed to stage into {}: {}", path.display(), e))
}

use crate::digest;
use crate::result::{MatrixError, Result};
use crate::target::TargetId;
use crate::toolchain::{Channel, ToolchainBundle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/** Persistent index of provisioned toolchains, keyed by (channel, target)
 *
 * Each entry is one JSON file named after the SHA-256 of `channel@target`:
 * ```text
 * <cache dir>/toolchains/3f1c...e9.json
 * ```
 *
 * # Notes
 * - Entries are written to a temporary file and renamed into place, so a
 *   crash or a failed provisioning never leaves a half-written entry
 * - Unreadable entries are deleted on lookup and treated as misses
 * - Deleting the whole directory is always safe; it only forces re-provisioning
 *
 * # Example
 * ```no_run
 * use crossmatrix::cache::ToolchainIndex;
 * use std::path::Path;
 *
 * #[tokio::main(flavor = "current_thread")]
 * async fn main() -> Result<(), Box<dyn std::error::Error>> {
 *     let index = ToolchainIndex::new(Path::new("./cache"));
 *     for entry in index.list().await? {
 *         println!("{} {}", entry.bundle.channel, entry.bundle.target);
 *     }
 *     Ok(())
 * }
 * ```
 */
#[derive(Debug, Clone)]
pub struct ToolchainIndex {
    dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub bundle: ToolchainBundle,
    pub provisioned_at: DateTime<Utc>,
}

impl ToolchainIndex {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            dir: base_dir.join("toolchains"),
        }
    }

    /// `<user cache dir>/crossmatrix`, e.g. `~/.cache/crossmatrix` on Linux.
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::cache_dir()
            .map(|dir| dir.join("crossmatrix"))
            .ok_or_else(|| MatrixError::configuration("Could not determine cache directory"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key(channel: &Channel, target: &TargetId) -> String {
        digest::hash_fields([channel.as_str(), target.as_str()])
    }

    fn entry_path(&self, channel: &Channel, target: &TargetId) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key(channel, target)))
    }

    pub async fn get(&self, channel: &Channel, target: &TargetId) -> Result<Option<ToolchainBundle>> {
        let path = self.entry_path(channel, target);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<IndexEntry>(&content) {
            Ok(entry) if entry.bundle.channel == *channel && entry.bundle.target == *target => {
                Ok(Some(entry.bundle))
            }
            Ok(_) | Err(_) => {
                log::warn!("discarding corrupted toolchain index entry {}", path.display());
                fs::remove_file(&path).await?;
                Ok(None)
            }
        }
    }

    pub async fn store(&self, bundle: &ToolchainBundle) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let entry = IndexEntry {
            bundle: bundle.clone(),
            provisioned_at: Utc::now(),
        };
        let path = self.entry_path(&bundle.channel, &bundle.target);
        let scratch = path.with_extension(format!("json.tmp-{}", std::process::id()));

        fs::write(&scratch, serde_json::to_vec_pretty(&entry)?).await?;
        fs::rename(&scratch, &path).await?;
        Ok(())
    }

    pub async fn remove(&self, channel: &Channel, target: &TargetId) -> Result<()> {
        match fs::remove_file(self.entry_path(channel, target)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable entries, sorted by channel then target.
    pub async fn list(&self) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str::<IndexEntry>(&content) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("skipping unreadable index entry {}: {}", path.display(), e),
            }
        }

        entries.sort_by(|a, b| {
            (&a.bundle.channel, &a.bundle.target).cmp(&(&b.bundle.channel, &b.bundle.target))
        });
        Ok(entries)
    }

    /** Removes entries whose bundle fails `keep`
     *
     * # Returns
     * - Number of removed entries
     */
    pub async fn prune(&self, keep: impl Fn(&ToolchainBundle) -> bool) -> Result<usize> {
        let mut removed = 0;
        for entry in self.list().await? {
            if !keep(&entry.bundle) {
                self.remove(&entry.bundle.channel, &entry.bundle.target)
                    .await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Deletes the whole index directory, returning how many entries it held.
    pub async fn clear(&self) -> Result<usize> {
        let count = self.list().await?.len();
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(target: &str) -> ToolchainBundle {
        let target = TargetId::parse(target).unwrap();
        ToolchainBundle::builder(Channel::stable(), target.clone())
            .host("x86_64-unknown-linux-gnu")
            .compiler("/tc/bin/rustc", "1.80.1")
            .build_driver("/tc/bin/cargo", "1.80.1")
            .std_lib(format!("/tc/lib/rustlib/{}/lib", target), target, "1.80.1")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn store_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let index = ToolchainIndex::new(dir.path());
        let stored = bundle("x86_64-unknown-linux-gnu");

        assert!(index
            .get(&stored.channel, &stored.target)
            .await
            .unwrap()
            .is_none());
        index.store(&stored).await.unwrap();
        let loaded = index
            .get(&stored.channel, &stored.target)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, stored);

        let leftovers: Vec<_> = std::fs::read_dir(index.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn corrupted_entry_is_a_miss_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let index = ToolchainIndex::new(dir.path());
        let stored = bundle("x86_64-unknown-linux-gnu");
        index.store(&stored).await.unwrap();

        let path = index.entry_path(&stored.channel, &stored.target);
        std::fs::write(&path, "{\"bundle\":").unwrap();

        assert!(index
            .get(&stored.channel, &stored.target)
            .await
            .unwrap()
            .is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn prune_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let index = ToolchainIndex::new(dir.path());
        index.store(&bundle("x86_64-unknown-linux-gnu")).await.unwrap();
        index.store(&bundle("aarch64-unknown-linux-musl")).await.unwrap();

        let listed = index.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].bundle.target.as_str(), "aarch64-unknown-linux-musl");

        let removed = index
            .prune(|b| b.target.as_str() == "x86_64-unknown-linux-gnu")
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.clear().await.unwrap(), 1);
        assert!(index.list().await.unwrap().is_empty());
    }
}

use crate::digest;
use crate::result::{MatrixError, Result};
use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use serde_json::json;
use smol_str::SmolStr;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tar::Header;

/// One file of an image root filesystem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RootfsEntry {
    /// Path inside the image, without the leading `/`.
    pub path: String,
    pub source: PathBuf,
    pub mode: u32,
}

/// What an image writer needs: a flat file list plus runtime metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub name: SmolStr,
    pub tag: SmolStr,
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub architecture: String,
    pub os: String,
    pub entries: Vec<RootfsEntry>,
}

impl ImageSpec {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

#[async_trait]
pub trait ImageWriter: Send + Sync {
    async fn write(&self, spec: &ImageSpec, dest: &Path) -> Result<()>;
}

/** Writes gzip-compressed `docker-archive` tarballs, loadable with `docker load`
 *
 * # Layout
 * ```text
 * manifest.json
 * <config sha256>.json
 * <layer sha256>/layer.tar
 * ```
 *
 * # Notes
 * - All mtimes, owners and the gzip header timestamp are zero and the config
 *   has no `created` field, so equal inputs give byte-identical archives
 */
pub struct DockerArchiveWriter;

#[async_trait]
impl ImageWriter for DockerArchiveWriter {
    async fn write(&self, spec: &ImageSpec, dest: &Path) -> Result<()> {
        let spec = spec.clone();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || write_archive(&spec, &dest))
            .await
            .map_err(|e| MatrixError::packaging(format!("image writer task failed: {}", e)))?
    }
}

fn write_archive(spec: &ImageSpec, dest: &Path) -> Result<()> {
    let layer = build_layer(&spec.entries)?;
    let layer_digest = digest::hash_bytes(&layer);

    let config = json!({
        "architecture": spec.architecture,
        "os": spec.os,
        "config": {
            "Cmd": spec.command,
            "Env": spec.env,
        },
        "rootfs": {
            "type": "layers",
            "diff_ids": [format!("sha256:{}", layer_digest)],
        },
    });
    let config = serde_json::to_vec(&config)?;
    let config_name = format!("{}.json", digest::hash_bytes(&config));
    let layer_name = format!("{}/layer.tar", layer_digest);

    let manifest = serde_json::to_vec(&json!([{
        "Config": config_name,
        "RepoTags": [spec.reference()],
        "Layers": [layer_name],
    }]))?;

    let mut builder = tar::Builder::new(Vec::new());
    append_dir(&mut builder, &format!("{}/", layer_digest))?;
    append_file(&mut builder, &layer_name, 0o644, &layer)?;
    append_file(&mut builder, &config_name, 0o644, &config)?;
    append_file(&mut builder, "manifest.json", 0o644, &manifest)?;
    let archive = builder.into_inner()?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&archive)?;
    let compressed = encoder.finish()?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let scratch = dest.with_extension(format!("partial-{}", std::process::id()));
    std::fs::write(&scratch, compressed)?;
    std::fs::rename(&scratch, dest)?;
    Ok(())
}

fn build_layer(entries: &[RootfsEntry]) -> Result<Vec<u8>> {
    let mut entries = entries.to_vec();
    entries.sort();

    let mut dirs = BTreeSet::new();
    for entry in &entries {
        let mut parent = Path::new(&entry.path).parent();
        while let Some(dir) = parent.filter(|d| !d.as_os_str().is_empty()) {
            dirs.insert(format!("{}/", dir.to_string_lossy()));
            parent = dir.parent();
        }
    }

    let mut builder = tar::Builder::new(Vec::new());
    for dir in &dirs {
        append_dir(&mut builder, dir)?;
    }
    for entry in &entries {
        let content = std::fs::read(&entry.source).map_err(|e| {
            MatrixError::packaging(format!("cannot read {}: {}", entry.source.display(), e))
        })?;
        append_file(&mut builder, &entry.path, entry.mode, &content)?;
    }
    Ok(builder.into_inner()?)
}

fn header(mode: u32, size: u64, kind: tar::EntryType) -> Header {
    let mut header = Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(mode);
    header.set_size(size);
    header.set_entry_type(kind);
    header
}

fn append_dir(builder: &mut tar::Builder<Vec<u8>>, path: &str) -> Result<()> {
    let mut header = header(0o755, 0, tar::EntryType::Directory);
    builder.append_data(&mut header, path, std::io::empty())?;
    Ok(())
}

fn append_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, mode: u32, content: &[u8]) -> Result<()> {
    let mut header = header(mode, content.len() as u64, tar::EntryType::Regular);
    builder.append_data(&mut header, path, content)?;
    Ok(())
}

//! Packed artifact inspection.
//!
//! Streams the entries of a registry tarball (gzip-compressed tar, plain tar
//! is accepted too) without random access and derives the file manifest,
//! then digests the raw bytes.

mod integrity;

use std::collections::BTreeSet;
use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{PublishError, PublishResult};
use crate::package::PackageSpec;

pub use integrity::{HashAlgorithm, Integrity};

/// Top-level directory every registry tarball is packed under.
const PACKAGE_ROOT: &str = "package/";

/// Bundled dependencies live here.
const BUNDLED_PREFIX: &str = "package/node_modules/";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One entry of the packed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Path relative to the package root.
    pub path: String,
    pub size: u64,
    pub mode: u32,
}

/// Entries of the packed artifact, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactManifest {
    pub files: Vec<FileEntry>,
    pub unpacked_size: u64,
    pub entry_count: usize,
    pub bundled: BTreeSet<String>,
}

/// Inspect a packed artifact.
///
/// Identical bytes always yield identical manifests and digests.
pub fn inspect(bytes: &[u8]) -> PublishResult<(ArtifactManifest, Integrity)> {
    let manifest = if bytes.starts_with(&GZIP_MAGIC) {
        read_entries(GzDecoder::new(Cursor::new(bytes)))?
    } else {
        read_entries(Cursor::new(bytes))?
    };

    let integrity = Integrity::from_bytes(bytes);
    debug!(
        entries = manifest.entry_count,
        unpacked_size = manifest.unpacked_size,
        integrity = %integrity,
        "inspected artifact"
    );

    Ok((manifest, integrity))
}

fn read_entries<R: Read>(reader: R) -> PublishResult<ArtifactManifest> {
    let mut archive = tar::Archive::new(reader);
    let mut manifest = ArtifactManifest::default();

    let entries = archive
        .entries()
        .map_err(|e| PublishError::integrity(format!("failed to read tarball: {e}")))?;

    for entry in entries {
        let entry =
            entry.map_err(|e| PublishError::integrity(format!("malformed tarball entry: {e}")))?;
        let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let size = entry.size();
        let mode = entry
            .header()
            .mode()
            .map_err(|e| PublishError::integrity(format!("invalid mode for {path}: {e}")))?;

        manifest.entry_count += 1;
        manifest.unpacked_size += size;

        if let Some(name) = bundled_name(&path) {
            manifest.bundled.insert(name.to_string());
        }

        manifest.files.push(FileEntry {
            path: path
                .strip_prefix(PACKAGE_ROOT)
                .map(String::from)
                .unwrap_or(path),
            size,
            mode,
        });
    }

    manifest.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(manifest)
}

/// Dependency name for entries under `package/node_modules/`.
fn bundled_name(path: &str) -> Option<&str> {
    if !path.starts_with(BUNDLED_PREFIX) || path == BUNDLED_PREFIX {
        return None;
    }
    path.split('/').nth(2).filter(|name| !name.is_empty())
}

/// Human-facing details of the tarball about to be published.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TarballSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Packed size in bytes.
    pub size: u64,
    pub unpacked_size: u64,
    pub shasum: String,
    pub integrity: String,
    pub filename: String,
    pub files: Vec<FileEntry>,
    pub entry_count: usize,
    pub bundled: Vec<String>,
}

impl TarballSummary {
    pub fn new(
        spec: &PackageSpec,
        packed_size: usize,
        manifest: &ArtifactManifest,
        integrity: &Integrity,
    ) -> Self {
        Self {
            id: spec.to_string(),
            name: spec.name().to_string(),
            version: spec.version().to_string(),
            size: packed_size as u64,
            unpacked_size: manifest.unpacked_size,
            shasum: integrity.shasum(),
            integrity: integrity.sri(),
            filename: spec.tarball_file_name(),
            files: manifest.files.clone(),
            entry_count: manifest.entry_count,
            bundled: manifest.bundled.iter().cloned().collect(),
        }
    }

    /// Emit the tarball details at `info`.
    pub fn log(&self) {
        let sri = &self.integrity;
        let short = if sri.len() > 80 {
            format!("{}[...]{}", &sri[..20], &sri[80..])
        } else {
            sri.clone()
        };
        info!(
            name = %self.name,
            version = %self.version,
            shasum = %self.shasum,
            total_files = self.files.len(),
            integrity = %short,
            packed_size = self.size,
            unpacked_size = self.unpacked_size,
            "tarball details"
        );
    }
}

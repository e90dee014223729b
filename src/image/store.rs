//! Local image store
//!
//! Content-addressed blob storage with one reference file per destination slot:
//!
//! ```text
//! <root>/
//!   blobs/sha256/<hex>           // archive bytes, named by digest
//!   refs/<namespace>/<name>.json // StoredImage record for the slot
//! ```
//!
//! A commit writes the blob first and then swaps the reference file with an
//! atomic rename. Readers see either the old slot content or the new one.
//! Blobs that no reference points at are removed after each commit.

use crate::error::handlers::IoErrorHandler;
use crate::error::{PullError, Result};
use crate::image::archive::LocalArchiveReference;
use crate::image::coordinate::DestinationSlot;
use crate::image::digest::DigestUtils;
use crate::image::policy::TrustPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const BLOBS_DIR: &str = "blobs";
pub const REFS_DIR: &str = "refs";
pub const SHA256_PREFIX: &str = "sha256";
const STAGING_PREFIX: &str = ".staging-";

/// The committed record for one destination slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub namespace: String,
    pub name: String,
    /// Content digest (`sha256:<hex>`) of the archive bytes
    pub digest: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub repo_tags: Vec<String>,
    #[serde(default)]
    pub source_server: Option<String>,
    pub policy: String,
    pub committed_at: DateTime<Utc>,
}

impl StoredImage {
    pub fn slot(&self) -> DestinationSlot {
        DestinationSlot {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Outcome of a successful commit
#[derive(Debug, Clone)]
pub struct CommitReport {
    pub image: StoredImage,
    /// Digest of the content this commit replaced, if any
    pub replaced: Option<String>,
    /// Non-fatal problems hit after the commit point
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    /// Open a store rooted at `root`, creating its layout if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [root.join(BLOBS_DIR).join(SHA256_PREFIX), root.join(REFS_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| {
                IoErrorHandler::commit(&e, &format!("error creating store directory {}", dir.display()))
            })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make `archive` the current content of `slot`.
    ///
    /// The previous content stays in place until the reference file is
    /// swapped. An unreadable previous reference is overwritten, and failing
    /// to remove unreferenced blobs afterwards is only reported in
    /// [`CommitReport::warnings`].
    pub fn commit(
        &self,
        slot: &DestinationSlot,
        archive: &LocalArchiveReference,
        policy: &dyn TrustPolicy,
        source_server: Option<&str>,
    ) -> Result<CommitReport> {
        validate_segment("namespace", &slot.namespace)?;
        validate_segment("name", &slot.name)?;

        let summary = archive.inspect().map_err(|e| {
            PullError::Commit(format!("{} is not a readable image archive: {}", archive, e))
        })?;

        // a damaged reference is replaced like any other
        let mut warnings = Vec::new();
        let previous = match self.get(slot) {
            Ok(previous) => previous,
            Err(e) => {
                warnings.push(format!("replacing unreadable reference for {}: {}", slot, e));
                None
            }
        };

        let (digest, size_bytes) = self.stage_blob(archive.path())?;
        let image = StoredImage {
            namespace: slot.namespace.clone(),
            name: slot.name.clone(),
            digest,
            size_bytes,
            repo_tags: summary.repo_tags,
            source_server: source_server.map(str::to_string),
            policy: policy.name().to_string(),
            committed_at: Utc::now(),
        };

        if let Err(e) = self.write_ref(&image) {
            if previous.as_ref().is_none_or(|p| p.digest != image.digest) {
                // best effort; the commit already failed
                let _ = self.remove_unreferenced(&image.digest);
            }
            return Err(e);
        }

        if let Err(e) = self.collect_garbage() {
            warnings.push(format!("failed to remove unreferenced blobs: {}", e));
        }

        Ok(CommitReport {
            image,
            replaced: previous.map(|p| p.digest),
            warnings,
        })
    }

    /// Current record for `slot`, if anything was ever committed there
    pub fn get(&self, slot: &DestinationSlot) -> Result<Option<StoredImage>> {
        validate_segment("namespace", &slot.namespace)?;
        validate_segment("name", &slot.name)?;

        let path = self.ref_path(slot);
        if !path.exists() {
            return Ok(None);
        }
        self.read_ref(&path).map(Some)
    }

    /// Every committed slot, ordered by namespace then name
    pub fn list(&self) -> Result<Vec<StoredImage>> {
        let (images, mut unreadable) = self.scan_refs()?;
        match unreadable.pop() {
            Some(e) => Err(e),
            None => Ok(images),
        }
    }

    /// Readable records plus the errors for references that could not be read
    fn scan_refs(&self) -> Result<(Vec<StoredImage>, Vec<PullError>)> {
        let refs_dir = self.root.join(REFS_DIR);
        let mut images = Vec::new();
        let mut unreadable = Vec::new();

        let namespaces = fs::read_dir(&refs_dir)
            .map_err(|e| IoErrorHandler::commit(&e, "error listing store references"))?;
        for namespace in namespaces {
            let namespace =
                namespace.map_err(|e| IoErrorHandler::commit(&e, "error listing store references"))?;
            if !namespace.path().is_dir() {
                continue;
            }
            let entries = fs::read_dir(namespace.path())
                .map_err(|e| IoErrorHandler::commit(&e, "error listing store references"))?;
            for entry in entries {
                let path = entry
                    .map_err(|e| IoErrorHandler::commit(&e, "error listing store references"))?
                    .path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    match self.read_ref(&path) {
                        Ok(image) => images.push(image),
                        Err(e) => unreadable.push(e),
                    }
                }
            }
        }

        images.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok((images, unreadable))
    }

    /// Path of the blob holding `digest`
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        if !DigestUtils::is_valid_docker_digest(digest) {
            return Err(PullError::Commit(format!("invalid digest '{}'", digest)));
        }
        let hex = &digest[SHA256_PREFIX.len() + 1..];
        Ok(self.root.join(BLOBS_DIR).join(SHA256_PREFIX).join(hex))
    }

    fn ref_path(&self, slot: &DestinationSlot) -> PathBuf {
        self.root
            .join(REFS_DIR)
            .join(&slot.namespace)
            .join(format!("{}.json", slot.name))
    }

    fn stage_blob(&self, source: &Path) -> Result<(String, u64)> {
        let blobs_dir = self.root.join(BLOBS_DIR).join(SHA256_PREFIX);
        let mut staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&blobs_dir)
            .map_err(|e| IoErrorHandler::commit(&e, "error creating staging file"))?;

        let file = File::open(source).map_err(|e| {
            IoErrorHandler::commit(&e, &format!("error opening {}", source.display()))
        })?;

        let (size, digest) = {
            let mut writer = BufWriter::new(staged.as_file_mut());
            let copied = DigestUtils::copy_with_digest(&mut BufReader::new(file), &mut writer)
                .map_err(|e| IoErrorHandler::commit(&e, "error copying archive into store"))?;
            writer
                .flush()
                .map_err(|e| IoErrorHandler::commit(&e, "error copying archive into store"))?;
            copied
        };
        staged
            .as_file()
            .sync_all()
            .map_err(|e| IoErrorHandler::commit(&e, "error syncing staged blob"))?;

        let target = self.blob_path(&digest)?;
        staged
            .persist(&target)
            .map_err(|e| IoErrorHandler::commit(&e.error, "error persisting blob"))?;

        Ok((digest, size))
    }

    fn write_ref(&self, image: &StoredImage) -> Result<()> {
        let path = self.ref_path(&image.slot());
        let dir = path
            .parent()
            .ok_or_else(|| PullError::Commit(format!("invalid reference path {}", path.display())))?;
        fs::create_dir_all(dir)
            .map_err(|e| IoErrorHandler::commit(&e, "error creating reference directory"))?;

        let mut staged = NamedTempFile::new_in(dir)
            .map_err(|e| IoErrorHandler::commit(&e, "error creating reference file"))?;
        serde_json::to_writer_pretty(staged.as_file_mut(), image)?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| IoErrorHandler::commit(&e, "error syncing reference file"))?;
        staged
            .persist(&path)
            .map_err(|e| IoErrorHandler::commit(&e.error, "error replacing reference file"))?;
        Ok(())
    }

    fn read_ref(&self, path: &Path) -> Result<StoredImage> {
        let content = fs::read(path)
            .map_err(|e| IoErrorHandler::commit(&e, &format!("error reading {}", path.display())))?;
        serde_json::from_slice(&content).map_err(|e| {
            PullError::Commit(format!("Failed to decode image record {}: {}", path.display(), e))
        })
    }

    /// Remove `digest` unless a readable reference still points at it
    fn remove_unreferenced(&self, digest: &str) -> Result<()> {
        let (images, _) = self.scan_refs()?;
        if images.iter().any(|image| image.digest == digest) {
            return Ok(());
        }
        self.remove_blob(&self.blob_path(digest)?)
    }

    /// Remove every blob no readable reference points at.
    ///
    /// A reference that cannot be decoded no longer names its content, so it
    /// keeps nothing alive.
    fn collect_garbage(&self) -> Result<()> {
        let (images, _) = self.scan_refs()?;
        let live: HashSet<&str> = images
            .iter()
            .filter_map(|image| image.digest.strip_prefix("sha256:"))
            .collect();

        let blobs_dir = self.root.join(BLOBS_DIR).join(SHA256_PREFIX);
        let entries = fs::read_dir(&blobs_dir)
            .map_err(|e| IoErrorHandler::commit(&e, "error listing blobs"))?;
        for entry in entries {
            let entry = entry.map_err(|e| IoErrorHandler::commit(&e, "error listing blobs"))?;
            let name = entry.file_name();
            let Some(hex) = name.to_str() else {
                continue;
            };
            if !DigestUtils::is_valid_sha256_hex(hex) || live.contains(hex) {
                continue;
            }
            self.remove_blob(&entry.path())?;
        }
        Ok(())
    }

    fn remove_blob(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IoErrorHandler::commit(&e, "error removing blob")),
        }
    }
}

fn validate_segment(field: &str, value: &str) -> Result<()> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0'])
        || value.starts_with(STAGING_PREFIX);
    if invalid {
        return Err(PullError::Commit(format!(
            "invalid {} '{}' for a store slot",
            field, value
        )));
    }
    Ok(())
}

//! Transport-qualified references to image archives on local disk
//!
//! A completed transfer is wrapped as `docker-archive:/absolute/path`. The
//! reference is built by rendering that string and parsing it back, so a
//! reference that exists always round-trips through [`LocalArchiveReference::parse`].

use crate::error::{PullError, Result};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tar::Archive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Archive formats the local store understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// `docker save` layout with a top-level `manifest.json`
    DockerArchive,
    /// OCI image layout with a top-level `index.json`
    OciArchive,
}

impl ArchiveKind {
    pub fn transport(&self) -> &'static str {
        match self {
            ArchiveKind::DockerArchive => "docker-archive",
            ArchiveKind::OciArchive => "oci-archive",
        }
    }

    fn from_transport(transport: &str) -> Option<Self> {
        match transport {
            "docker-archive" => Some(ArchiveKind::DockerArchive),
            "oci-archive" => Some(ArchiveKind::OciArchive),
            _ => None,
        }
    }

    fn index_entry(&self) -> &'static str {
        match self {
            ArchiveKind::DockerArchive => "manifest.json",
            ArchiveKind::OciArchive => "index.json",
        }
    }
}

/// Locator for a fully written archive on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArchiveReference {
    kind: ArchiveKind,
    path: PathBuf,
}

/// What the archive's top-level index says about its contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Tags the archive declares for its images, in index order
    pub repo_tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DockerManifestEntry {
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OciIndex {
    #[serde(default)]
    manifests: Vec<OciDescriptor>,
}

#[derive(Debug, Deserialize)]
struct OciDescriptor {
    #[serde(default)]
    annotations: std::collections::HashMap<String, String>,
}

impl LocalArchiveReference {
    /// Wrap a completed transfer file as a docker-archive reference
    pub fn from_completed_file(path: &Path) -> Result<Self> {
        let absolute = path.canonicalize().map_err(|e| {
            PullError::Format(format!(
                "error parsing reference for {}: {}",
                path.display(),
                e
            ))
        })?;

        let rendered = format!("{}:{}", ArchiveKind::DockerArchive.transport(), absolute.display());
        Self::parse(&rendered)
    }

    /// Parse `<transport>:<absolute path>`
    pub fn parse(reference: &str) -> Result<Self> {
        let (transport, path) = reference.split_once(':').ok_or_else(|| {
            PullError::Format(format!("invalid image name '{}': missing transport", reference))
        })?;

        let kind = ArchiveKind::from_transport(transport).ok_or_else(|| {
            PullError::Format(format!("unsupported transport '{}' in '{}'", transport, reference))
        })?;

        if path.is_empty() {
            return Err(PullError::Format(format!("empty archive path in '{}'", reference)));
        }

        let path = PathBuf::from(path);
        if !path.is_absolute() {
            return Err(PullError::Format(format!(
                "archive path must be absolute in '{}'",
                reference
            )));
        }

        Ok(Self { kind, path })
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the archive index, accepting plain or gzip-compressed tar
    pub fn inspect(&self) -> Result<ArchiveSummary> {
        let reader = self.open_reader()?;
        let mut archive = Archive::new(reader);
        archive.set_ignore_zeros(true);
        let wanted = self.kind.index_entry();

        let entries = archive
            .entries()
            .map_err(|e| PullError::Format(format!("failed to read tar entries: {}", e)))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| PullError::Format(format!("failed to read tar entry: {}", e)))?;
            let path = entry
                .path()
                .map_err(|e| PullError::Format(format!("failed to read entry path: {}", e)))?
                .to_string_lossy()
                .trim_start_matches("./")
                .to_string();
            if path != wanted {
                continue;
            }

            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|e| PullError::Format(format!("failed to read {}: {}", wanted, e)))?;
            return self.summarize(&content);
        }

        Err(PullError::Format(format!(
            "{} not found in {}",
            wanted,
            self.path.display()
        )))
    }

    fn open_reader(&self) -> Result<Box<dyn Read>> {
        let mut file = File::open(&self.path).map_err(|e| {
            PullError::Format(format!("failed to open {}: {}", self.path.display(), e))
        })?;

        let mut magic = [0u8; 2];
        let compressed = match file.read_exact(&mut magic) {
            Ok(()) => magic == GZIP_MAGIC,
            Err(_) => false,
        };
        file.seek(SeekFrom::Start(0))
            .map_err(|e| PullError::Format(format!("failed to rewind archive: {}", e)))?;

        let reader = BufReader::new(file);
        if compressed {
            Ok(Box::new(GzDecoder::new(reader)))
        } else {
            Ok(Box::new(reader))
        }
    }

    fn summarize(&self, content: &[u8]) -> Result<ArchiveSummary> {
        match self.kind {
            ArchiveKind::DockerArchive => {
                let entries: Vec<DockerManifestEntry> = serde_json::from_slice(content)
                    .map_err(|e| PullError::Format(format!("invalid manifest.json: {}", e)))?;
                if entries.is_empty() {
                    return Err(PullError::Format("manifest.json lists no images".to_string()));
                }
                Ok(ArchiveSummary {
                    repo_tags: entries
                        .iter()
                        .flat_map(|e| e.repo_tags.clone().unwrap_or_default())
                        .collect(),
                })
            }
            ArchiveKind::OciArchive => {
                let index: OciIndex = serde_json::from_slice(content)
                    .map_err(|e| PullError::Format(format!("invalid index.json: {}", e)))?;
                if index.manifests.is_empty() {
                    return Err(PullError::Format("index.json lists no manifests".to_string()));
                }
                Ok(ArchiveSummary {
                    repo_tags: index
                        .manifests
                        .iter()
                        .filter_map(|m| m.annotations.get("org.opencontainers.image.ref.name").cloned())
                        .collect(),
                })
            }
        }
    }
}

impl fmt::Display for LocalArchiveReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.transport(), self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    fn docker_archive_bytes(manifest: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in [
            ("abc/layer.tar", b"layer-bytes".as_slice()),
            ("manifest.json", manifest.as_bytes()),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    const MANIFEST: &str =
        r#"[{"Config":"cfg.json","RepoTags":["team-a/app:latest"],"Layers":["abc/layer.tar"]}]"#;

    #[test]
    fn test_parse_and_display_round_trip() {
        let reference = LocalArchiveReference::parse("docker-archive:/tmp/pull-1.tar").unwrap();
        assert_eq!(reference.kind(), ArchiveKind::DockerArchive);
        assert_eq!(reference.to_string(), "docker-archive:/tmp/pull-1.tar");
    }

    #[test]
    fn test_parse_rejects_bad_references() {
        for input in ["/tmp/x.tar", "docker:/tmp/x.tar", "docker-archive:", "docker-archive:rel.tar"] {
            assert!(
                matches!(LocalArchiveReference::parse(input), Err(PullError::Format(_))),
                "{input}"
            );
        }
    }

    #[test]
    fn test_from_completed_file_is_absolute() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pull.tar");
        std::fs::write(&path, docker_archive_bytes(MANIFEST)).unwrap();

        let reference = LocalArchiveReference::from_completed_file(&path).unwrap();
        assert!(reference.path().is_absolute());
        assert!(reference.to_string().starts_with("docker-archive:/"));
    }

    #[test]
    fn test_from_missing_file_is_format_error() {
        let dir = tempdir().unwrap();
        let err = LocalArchiveReference::from_completed_file(&dir.path().join("gone.tar")).unwrap_err();
        assert!(matches!(err, PullError::Format(_)));
    }

    #[test]
    fn test_inspect_docker_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pull.tar");
        std::fs::write(&path, docker_archive_bytes(MANIFEST)).unwrap();

        let summary = LocalArchiveReference::from_completed_file(&path)
            .unwrap()
            .inspect()
            .unwrap();
        assert_eq!(summary.repo_tags, vec!["team-a/app:latest".to_string()]);
    }

    #[test]
    fn test_inspect_gzip_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pull.tar.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&docker_archive_bytes(MANIFEST)).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let summary = LocalArchiveReference::from_completed_file(&path)
            .unwrap()
            .inspect()
            .unwrap();
        assert_eq!(summary.repo_tags, vec!["team-a/app:latest".to_string()]);
    }

    #[test]
    fn test_inspect_rejects_non_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pull.tar");
        std::fs::write(&path, vec![0u8; 1024]).unwrap();

        let err = LocalArchiveReference::from_completed_file(&path)
            .unwrap()
            .inspect()
            .unwrap_err();
        assert!(matches!(err, PullError::Format(ref m) if m.contains("manifest.json not found")));
    }
}

//! Build provenance stored in an archive manifest.
//!
//! Two attribute families are used:
//! - `Commit-Hash`: HEAD at the time the artifact was built
//! - `hash.<sha256(path)>`: last changing revision of each input at build time
//!
//! The reader side is reached through [`ProvenanceOpener`] so evaluations can
//! be tested without archives on disk.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::digest::{digest, ContentAddress};
use crate::error::Unreadable;
use crate::manifest::{Manifest, MANIFEST_PATH};
use crate::vcs::{PathRef, Revision, Vcs};
use crate::{ulog_debug, ulog_warn, Error, Result};

pub const BUILD_REVISION_ATTRIBUTE: &str = "Commit-Hash";
pub const INPUT_REVISION_TEMPLATE: &str = "hash.FILEHASH";
const TEMPLATE_SLOT: &str = "FILEHASH";
const INPUT_REVISION_PREFIX: &str = "hash.";
const META_INF_DIR: &str = "META-INF/";

/// Manifest attribute name holding the revision of `path`.
pub fn input_revision_key(path: &PathRef) -> String {
    INPUT_REVISION_TEMPLATE.replace(TEMPLATE_SLOT, digest(path.as_str()).as_str())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub build_revision: Option<Revision>,
    #[serde(default)]
    pub per_input_revisions: BTreeMap<ContentAddress, Revision>,
}

pub trait ProvenanceReader: Send + Sync {
    fn read_build_revision(&self) -> Option<Revision>;

    fn read_input_revision(&self, path: &PathRef) -> Option<Revision>;
}

pub trait ProvenanceOpener: Send + Sync {
    fn open(&self, location: &Path) -> Result<Box<dyn ProvenanceReader>>;
}

/// Opens real archives with [`ArchiveProvenanceStore::open`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveOpener;

impl ProvenanceOpener for ArchiveOpener {
    fn open(&self, location: &Path) -> Result<Box<dyn ProvenanceReader>> {
        Ok(Box::new(ArchiveProvenanceStore::open(location)?))
    }
}

/// Manifest attributes of one archive, held in memory until [`save`].
///
/// [`save`]: ArchiveProvenanceStore::save
pub struct ArchiveProvenanceStore {
    location: PathBuf,
    manifest: Manifest,
}

fn non_blank(value: Option<&str>) -> Option<Revision> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(Revision::new)
}

fn open_archive(location: &Path) -> Result<ZipArchive<File>> {
    let file = match File::open(location) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ArtifactNotFound(location.to_path_buf()))
        }
        Err(e) => return Err(Error::unreadable(location, e)),
    };
    ZipArchive::new(file).map_err(|e| Error::unreadable(location, e))
}

/// Entry name of the manifest, matched case-insensitively.
fn manifest_entry(archive: &ZipArchive<File>) -> Option<String> {
    archive
        .file_names()
        .find(|name| name.eq_ignore_ascii_case(MANIFEST_PATH))
        .map(str::to_string)
}

fn write_error(e: ZipError) -> Error {
    Error::Io(std::io::Error::other(e))
}

impl ArchiveProvenanceStore {
    /// Fails with `ArtifactNotFound` or `ArtifactUnreadable` (including an
    /// archive without a manifest).
    pub fn open(location: &Path) -> Result<Self> {
        Self::load(location, false)
    }

    /// Like [`open`](Self::open), but an archive without a manifest starts
    /// from an empty one.
    pub fn open_or_init(location: &Path) -> Result<Self> {
        Self::load(location, true)
    }

    fn load(location: &Path, init: bool) -> Result<Self> {
        ulog_debug!("ArchiveProvenanceStore::open {}", location.display());
        if !location.exists() {
            return Err(Error::ArtifactNotFound(location.to_path_buf()));
        }
        let mut archive = open_archive(location)?;

        let manifest = match manifest_entry(&archive) {
            Some(name) => {
                let mut entry = archive
                    .by_name(&name)
                    .map_err(|e| Error::unreadable(location, e))?;
                let mut bytes = Vec::new();
                entry
                    .read_to_end(&mut bytes)
                    .map_err(|e| Error::unreadable(location, e))?;
                Manifest::parse(&bytes)
                    .map_err(|reason| Error::unreadable(location, Unreadable::Malformed(reason)))?
            }
            None if init => Manifest::new(),
            None => return Err(Error::unreadable(location, Unreadable::NoManifest)),
        };

        Ok(Self {
            location: location.to_path_buf(),
            manifest,
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn read_build_revision(&self) -> Option<Revision> {
        non_blank(self.manifest.get(BUILD_REVISION_ATTRIBUTE))
    }

    pub fn read_input_revision(&self, path: &PathRef) -> Option<Revision> {
        non_blank(self.manifest.get(&input_revision_key(path)))
    }

    pub fn write_build_revision(&mut self, rev: &Revision) {
        self.manifest.set(BUILD_REVISION_ATTRIBUTE, rev.as_str());
    }

    pub fn write_input_revision(&mut self, path: &PathRef, rev: &Revision) {
        self.manifest.set(&input_revision_key(path), rev.as_str());
    }

    /// Drop every per-input attribute, e.g. before restamping.
    pub fn clear_input_revisions(&mut self) {
        let keys: Vec<String> = self
            .manifest
            .attributes()
            .filter_map(|(key, _)| per_input_address(key).map(|_| key.to_string()))
            .collect();
        for key in keys {
            self.manifest.remove(&key);
        }
    }

    pub fn record(&self) -> ProvenanceRecord {
        let per_input_revisions = self
            .manifest
            .attributes()
            .filter_map(|(key, value)| {
                let address = per_input_address(key)?;
                let rev = non_blank(Some(value))?;
                Some((address, rev))
            })
            .collect();
        ProvenanceRecord {
            build_revision: self.read_build_revision(),
            per_input_revisions,
        }
    }

    /// Rewrite the archive with the current manifest. Other entries are copied
    /// without recompression. The original is replaced by rename only after
    /// the new archive is complete.
    pub fn save(&self) -> Result<()> {
        let file_name = self
            .location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let tmp = self
            .location
            .with_file_name(format!(".{}.uptodate-tmp", file_name));

        let result = self.write_to(&tmp);
        match result {
            Ok(()) => {
                fs::rename(&tmp, &self.location)?;
                ulog_debug!("saved manifest into {}", self.location.display());
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }

    fn write_to(&self, tmp: &Path) -> Result<()> {
        let mut source = open_archive(&self.location)?;
        let mut writer = ZipWriter::new(File::create(tmp)?);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let has_meta_inf = source.file_names().any(|name| name == META_INF_DIR);
        if has_meta_inf {
            writer
                .add_directory(META_INF_DIR, options)
                .map_err(write_error)?;
        }
        writer
            .start_file(MANIFEST_PATH, options)
            .map_err(write_error)?;
        writer.write_all(&self.manifest.to_bytes())?;

        for index in 0..source.len() {
            let entry = source
                .by_index_raw(index)
                .map_err(|e| Error::unreadable(&self.location, e))?;
            let name = entry.name().to_string();
            if name.eq_ignore_ascii_case(MANIFEST_PATH) || (has_meta_inf && name == META_INF_DIR)
            {
                continue;
            }
            writer.raw_copy_file(entry).map_err(write_error)?;
        }
        let mut file = writer.finish().map_err(write_error)?;
        file.flush()?;
        Ok(())
    }
}

fn per_input_address(key: &str) -> Option<ContentAddress> {
    let prefix = key.get(..INPUT_REVISION_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(INPUT_REVISION_PREFIX) {
        return None;
    }
    ContentAddress::parse(&key[INPUT_REVISION_PREFIX.len()..])
}

impl ProvenanceReader for ArchiveProvenanceStore {
    fn read_build_revision(&self) -> Option<Revision> {
        ArchiveProvenanceStore::read_build_revision(self)
    }

    fn read_input_revision(&self, path: &PathRef) -> Option<Revision> {
        ArchiveProvenanceStore::read_input_revision(self, path)
    }
}

/// Write provenance for a freshly built archive: HEAD as the build revision
/// and, with `per_input`, every input's last changing revision. Attributes
/// from a previous stamp are replaced.
pub fn stamp<V: Vcs + ?Sized>(
    vcs: &V,
    location: &Path,
    inputs: &[PathRef],
    per_input: bool,
) -> Result<ProvenanceRecord> {
    let mut store = ArchiveProvenanceStore::open_or_init(location)?;
    let head = vcs.head_revision()?;
    store.write_build_revision(&head);
    store.clear_input_revisions();

    if per_input {
        for input in inputs {
            match vcs.last_changing_revision(input)? {
                Some(rev) => store.write_input_revision(input, &rev),
                None => ulog_warn!("stamp: {} has no committed revision, not recorded", input),
            }
        }
    }

    store.save()?;
    ulog_debug!(
        "stamped {} with {} ({} input revisions)",
        location.display(),
        head.short(),
        store.record().per_input_revisions.len()
    );
    Ok(store.record())
}

use std::io::{Cursor, Read};

use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use crate::{
    classifier::{classify, ExtensionToken, FormatCategory},
    download::DownloadedBlob,
};

/// Highest extraction tier, see [`ExtensionToken::tier`].
const LAST_TIER: u8 = 3;
/// Upper bound for preallocating an entry from its declared size.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// A single file of a download, either unpacked from an archive or the download itself.
#[derive(Clone, Debug)]
pub struct Member {
    /// Base file name, without any directory components.
    pub name: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl Member {
    /// The whole blob as one member.
    pub fn from_blob(blob: &DownloadedBlob) -> Self {
        Self {
            name: base_name(&blob.file_name).to_string(),
            bytes: blob.bytes.clone(),
            content_type: blob.content_type.clone(),
        }
    }

    pub fn extension(&self) -> ExtensionToken {
        classify(&self.name)
    }
}

#[derive(Debug)]
pub enum Extraction {
    /// Qualifying entries, textures first, then meshes, then authoring files.
    Members(Vec<Member>),
    NotAnArchive,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Extraction canceled")]
    Cancelled,
}

pub fn extract(blob: &DownloadedBlob, extension: &ExtensionToken) -> Extraction {
    match extract_with_cancel(blob, extension, &CancellationToken::new()) {
        Ok(extraction) => extraction,
        Err(ExtractError::Cancelled) => Extraction::Members(Vec::new()),
    }
}

/// Like [`extract`], checking `cancellation` before every entry.
pub fn extract_with_cancel(
    blob: &DownloadedBlob,
    extension: &ExtensionToken,
    cancellation: &CancellationToken,
) -> Result<Extraction, ExtractError> {
    if extension.category() != FormatCategory::Archive {
        return Ok(Extraction::NotAnArchive);
    }

    let mut archive = match ZipArchive::new(Cursor::new(blob.bytes.clone())) {
        Ok(archive) => archive,
        Err(error) => {
            log::warn!("{} is not a readable zip archive: {error}", blob.file_name);
            return Ok(Extraction::NotAnArchive);
        }
    };

    let entries = tiered_entries(&mut archive);
    let mut members = Vec::with_capacity(entries.len());

    for (index, _) in entries {
        if cancellation.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(error) => {
                log::warn!("Skipping unreadable entry {index} of {}: {error}", blob.file_name);
                continue;
            }
        };

        let mut bytes = Vec::with_capacity(preallocation(file.size()));
        if let Err(error) = file.read_to_end(&mut bytes) {
            log::warn!("Skipping entry {} of {}: {error}", file.name(), blob.file_name);
            continue;
        }

        members.push(Member {
            name: base_name(file.name()).to_string(),
            bytes: bytes.into(),
            content_type: blob.content_type.clone(),
        });
    }

    log::info!("Extracted {} files from {}", members.len(), blob.file_name);
    Ok(Extraction::Members(members))
}

/// Indices of the qualifying entries, grouped by tier. Archive order within a tier.
fn tiered_entries<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> Vec<(usize, u8)> {
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        // Raw access reads the header without decompressing.
        let Ok(file) = archive.by_index_raw(index) else {
            continue;
        };
        if file.is_dir() {
            continue;
        }
        if let Some(tier) = classify(base_name(file.name())).tier() {
            entries.push((index, tier));
        }
    }

    let mut ordered = Vec::with_capacity(entries.len());
    for tier in 1..=LAST_TIER {
        ordered.extend(entries.iter().filter(|(_, t)| *t == tier).copied());
    }
    ordered
}

/// The declared size comes from the archive and may be forged.
fn preallocation(declared_size: u64) -> usize {
    declared_size.min(MAX_PREALLOCATION) as usize
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::FileOptions;

    use super::*;

    fn zip_blob(entries: &[&str]) -> DownloadedBlob {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for entry in entries {
            if entry.ends_with('/') {
                writer.add_directory(*entry, FileOptions::default()).unwrap();
            } else {
                writer.start_file(*entry, FileOptions::default()).unwrap();
                writer.write_all(entry.as_bytes()).unwrap();
            }
        }
        let bytes = writer.finish().unwrap().into_inner();

        DownloadedBlob {
            file_name: "asset.zip".into(),
            bytes: bytes.into(),
            content_type: Some("application/zip".into()),
        }
    }

    fn member_names(extraction: Extraction) -> Vec<String> {
        match extraction {
            Extraction::Members(members) => members.into_iter().map(|m| m.name).collect(),
            Extraction::NotAnArchive => panic!("expected members"),
        }
    }

    #[test]
    fn members_come_out_tier_by_tier_in_archive_order() {
        let blob = zip_blob(&[
            "scene/model.obj",
            "textures/",
            "textures/b_normal.png",
            "source/model.blend",
            "readme.txt",
            "model.mtl",
            "textures/a_color.PSD",
            "model.fbx",
        ]);

        let names = member_names(extract(&blob, &classify("asset.zip")));
        assert_eq!(
            names,
            [
                "b_normal.png",
                "a_color.PSD",
                "model.obj",
                "model.fbx",
                "model.blend"
            ]
        );
    }

    #[test]
    fn members_inherit_the_download_content_type() {
        let blob = zip_blob(&["a/b/c/rock_diffuse.jpg"]);
        let Extraction::Members(members) = extract(&blob, &classify("asset.zip")) else {
            panic!("expected members");
        };

        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "rock_diffuse.jpg");
        assert_eq!(members[0].bytes.as_ref(), b"a/b/c/rock_diffuse.jpg");
        assert_eq!(members[0].content_type.as_deref(), Some("application/zip"));
    }

    #[test]
    fn archive_without_qualifying_entries_is_empty() {
        let blob = zip_blob(&["docs/", "docs/license.txt", "model.mtl"]);
        assert!(member_names(extract(&blob, &classify("asset.zip"))).is_empty());
    }

    #[test]
    fn non_archives_are_passed_through() {
        let blob = zip_blob(&["model.obj"]);
        assert!(matches!(
            extract(&blob, &classify("model.glb")),
            Extraction::NotAnArchive
        ));

        let garbage = DownloadedBlob {
            file_name: "broken.zip".into(),
            bytes: Bytes::from_static(b"definitely not a zip"),
            content_type: None,
        };
        assert!(matches!(
            extract(&garbage, &classify("broken.zip")),
            Extraction::NotAnArchive
        ));
    }

    #[test]
    fn canceled_extraction_stops() {
        let blob = zip_blob(&["a.png", "b.obj"]);
        let token = CancellationToken::new();
        token.cancel();

        assert!(matches!(
            extract_with_cancel(&blob, &classify("asset.zip"), &token),
            Err(ExtractError::Cancelled)
        ));
    }

    #[test]
    fn declared_sizes_do_not_drive_huge_allocations() {
        assert_eq!(preallocation(0), 0);
        assert_eq!(preallocation(1500), 1500);
        assert_eq!(preallocation(u64::MAX), MAX_PREALLOCATION as usize);
        assert_eq!(preallocation(0xFFFF_FFFF), MAX_PREALLOCATION as usize);
    }
}

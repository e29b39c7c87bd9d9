//! Archive inspection and unpacking for update payloads.
//!
//! A payload is either a recognised archive or a single raw file:
//!
//! | Magic                              | Format                   |
//! |------------------------------------|--------------------------|
//! | `PK\x03\x04`, `PK\x05\x06`         | zip                      |
//! | `1f 8b`                            | gzip (tar.gz, or one gzipped file) |
//! | `ustar` at offset 257              | tar                      |
//!
//! Anything else becomes a single [`PayloadEntry`] named after the running
//! executable. Entry names are normalized to `/`-separated relative paths and
//! any absolute or `..` name rejects the whole payload before a single byte is
//! written.

use crate::core::ServiceError;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use std::path::{Component, Path};
use tracing::{debug, warn};

/// One file or directory of an update payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEntry {
    /// Relative, `/`-separated path below the install root.
    pub name: String,
    pub body: Vec<u8>,
    pub is_dir: bool,
}

impl PayloadEntry {
    pub fn file(name: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: Vec::new(),
            is_dir: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Gzip,
    Tar,
}

/// Identify the archive format of `payload`, if any.
pub fn detect(payload: &[u8]) -> Option<ArchiveKind> {
    if payload.starts_with(b"PK\x03\x04") || payload.starts_with(b"PK\x05\x06") {
        Some(ArchiveKind::Zip)
    } else if payload.starts_with(&[0x1f, 0x8b]) {
        Some(ArchiveKind::Gzip)
    } else if is_tar(payload) {
        Some(ArchiveKind::Tar)
    } else {
        None
    }
}

fn is_tar(payload: &[u8]) -> bool {
    payload.get(257..262) == Some(b"ustar".as_slice())
}

/// Turn a downloaded payload into the ordered list of entries to install.
///
/// `fallback_name` names the single entry produced for a non-archive payload.
pub fn into_entries(payload: Vec<u8>, fallback_name: &str) -> Result<Vec<PayloadEntry>> {
    let entries = match detect(&payload) {
        Some(ArchiveKind::Zip) => unpack_zip(&payload)?,
        Some(ArchiveKind::Tar) => unpack_tar(payload.as_slice())?,
        Some(ArchiveKind::Gzip) => {
            let mut decoded = Vec::new();
            GzDecoder::new(payload.as_slice()).read_to_end(&mut decoded).map_err(|e| {
                ServiceError::InvalidArchive {
                    reason: format!("gzip: {e}"),
                }
            })?;
            if is_tar(&decoded) {
                unpack_tar(decoded.as_slice())?
            } else {
                debug!(target: "update", "Payload is a single gzipped file");
                vec![PayloadEntry::file(fallback_name, decoded)]
            }
        }
        None => {
            debug!(target: "update", "Payload is not an archive, installing as {fallback_name}");
            vec![PayloadEntry::file(fallback_name, payload)]
        }
    };
    Ok(entries)
}

fn unpack_zip(payload: &[u8]) -> Result<Vec<PayloadEntry>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(payload)).map_err(|e| {
        ServiceError::InvalidArchive {
            reason: format!("zip: {e}"),
        }
    })?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| ServiceError::InvalidArchive {
            reason: format!("zip entry #{i}: {e}"),
        })?;
        let is_dir = file.is_dir();
        let Some(name) = normalize_entry_name(file.name())? else {
            continue;
        };

        let mut body = Vec::new();
        if !is_dir {
            file.read_to_end(&mut body)
                .with_context(|| format!("Failed to read zip entry {name}"))?;
        }
        entries.push(PayloadEntry {
            name,
            body,
            is_dir,
        });
    }
    Ok(entries)
}

fn unpack_tar<R: Read>(reader: R) -> Result<Vec<PayloadEntry>> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();

    let iter = archive.entries().map_err(|e| ServiceError::InvalidArchive {
        reason: format!("tar: {e}"),
    })?;
    for entry in iter {
        let mut entry = entry.map_err(|e| ServiceError::InvalidArchive {
            reason: format!("tar: {e}"),
        })?;
        let raw_name = entry
            .path()
            .map_err(|e| ServiceError::InvalidArchive {
                reason: format!("tar entry name: {e}"),
            })?
            .to_string_lossy()
            .into_owned();
        let entry_type = entry.header().entry_type();

        if !entry_type.is_dir() && !entry_type.is_file() {
            warn!(target: "update", "Skipping unsupported tar entry {raw_name} ({entry_type:?})");
            continue;
        }
        let Some(name) = normalize_entry_name(&raw_name)? else {
            continue;
        };

        let mut body = Vec::new();
        if entry_type.is_file() {
            entry
                .read_to_end(&mut body)
                .with_context(|| format!("Failed to read tar entry {name}"))?;
        }
        entries.push(PayloadEntry {
            name,
            body,
            is_dir: entry_type.is_dir(),
        });
    }
    Ok(entries)
}

/// Normalize an archive entry name to a relative `/`-separated path.
///
/// Returns `None` for names that denote the archive root (`./`), and
/// [`ServiceError::UnsafeEntry`] for names that would leave the install root.
pub fn normalize_entry_name(raw: &str) -> Result<Option<String>> {
    let unified = raw.replace('\\', "/");
    let mut parts = Vec::new();

    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ServiceError::UnsafeEntry {
                    name: raw.to_string(),
                }
                .into());
            }
        }
    }

    // `C:foo` style names survive component parsing on Unix.
    if parts.first().is_some_and(|first| first.len() >= 2 && first.as_bytes()[1] == b':') {
        return Err(ServiceError::UnsafeEntry {
            name: raw.to_string(),
        }
        .into());
    }

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_tar(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            match body {
                Some(body) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(body.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append_data(&mut header, name, *body).unwrap();
                }
                None => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_cksum();
                    builder.append_data(&mut header, name, std::io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_raw_payload_named_after_executable() {
        let entries = into_entries(b"\x7fELF binary".to_vec(), "heartbeat").unwrap();
        assert_eq!(entries, vec![PayloadEntry::file("heartbeat", b"\x7fELF binary".to_vec())]);
    }

    #[test]
    fn test_tar_gz_preserves_order() {
        let tar = build_tar(&[
            ("b/", None),
            ("b/skip.log", Some(b"log".as_slice())),
            ("a.txt", Some(b"hello".as_slice())),
        ]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        let payload = encoder.finish().unwrap();

        assert_eq!(detect(&payload), Some(ArchiveKind::Gzip));
        let entries = into_entries(payload, "app").unwrap();
        assert_eq!(
            entries,
            vec![
                PayloadEntry::dir("b"),
                PayloadEntry::file("b/skip.log", b"log".to_vec()),
                PayloadEntry::file("a.txt", b"hello".to_vec()),
            ]
        );
    }

    #[test]
    fn test_plain_tar() {
        let payload = build_tar(&[("bin/app", Some(b"new".as_slice()))]);
        assert_eq!(detect(&payload), Some(ArchiveKind::Tar));
        let entries = into_entries(payload, "app").unwrap();
        assert_eq!(entries, vec![PayloadEntry::file("bin/app", b"new".to_vec())]);
    }

    #[test]
    fn test_gzipped_single_file() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"just a binary").unwrap();
        let payload = encoder.finish().unwrap();

        let entries = into_entries(payload, "app").unwrap();
        assert_eq!(entries, vec![PayloadEntry::file("app", b"just a binary".to_vec())]);
    }

    #[test]
    fn test_zip() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.add_directory("static/", options).unwrap();
        writer.start_file("static/index.html", options).unwrap();
        writer.write_all(b"<html/>").unwrap();
        writer.start_file("app", options).unwrap();
        writer.write_all(b"binary").unwrap();
        let payload = writer.finish().unwrap().into_inner();

        assert_eq!(detect(&payload), Some(ArchiveKind::Zip));
        let entries = into_entries(payload, "app").unwrap();
        assert_eq!(
            entries,
            vec![
                PayloadEntry::dir("static"),
                PayloadEntry::file("static/index.html", b"<html/>".to_vec()),
                PayloadEntry::file("app", b"binary".to_vec()),
            ]
        );
    }

    #[test]
    fn test_unsafe_names_rejected() {
        for name in ["../evil", "/etc/passwd", "a/../../b", "C:/Windows/evil", "..\\evil"] {
            let err = normalize_entry_name(name).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<ServiceError>(), Some(ServiceError::UnsafeEntry { .. })),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_name_normalization() {
        assert_eq!(normalize_entry_name("./a/b.txt").unwrap(), Some("a/b.txt".to_string()));
        assert_eq!(normalize_entry_name("dir/").unwrap(), Some("dir".to_string()));
        assert_eq!(normalize_entry_name("a\\b").unwrap(), Some("a/b".to_string()));
        assert_eq!(normalize_entry_name("./").unwrap(), None);
    }

    #[test]
    fn test_corrupt_gzip_is_invalid_archive() {
        let err = into_entries(vec![0x1f, 0x8b, 0x00, 0x01], "app").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::InvalidArchive { .. })
        ));
    }
}

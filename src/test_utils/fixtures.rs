//! Builders for update payloads and installation trees used in tests.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

/// An archive under construction: directories and files in insertion order.
#[derive(Debug, Clone, Default)]
pub struct PayloadFixture {
    entries: Vec<(String, Option<Vec<u8>>)>,
}

impl PayloadFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(mut self, name: &str) -> Self {
        self.entries.push((name.to_string(), None));
        self
    }

    pub fn file(mut self, name: &str, body: impl Into<Vec<u8>>) -> Self {
        self.entries.push((name.to_string(), Some(body.into())));
        self
    }

    /// Plain tar bytes.
    pub fn tar(&self) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, body) in &self.entries {
            let mut header = tar::Header::new_gnu();
            match body {
                Some(body) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(body.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append_data(&mut header, name, body.as_slice()).expect("tar file");
                }
                None => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_cksum();
                    builder.append_data(&mut header, name, std::io::empty()).expect("tar dir");
                }
            }
        }
        builder.into_inner().expect("finish tar")
    }

    /// Gzip-compressed tar bytes.
    pub fn tar_gz(&self) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.tar()).expect("gzip tar");
        encoder.finish().expect("finish gzip")
    }

    /// Zip bytes.
    pub fn zip(&self) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, body) in &self.entries {
            match body {
                Some(body) => {
                    writer.start_file(name.as_str(), options).expect("zip file");
                    writer.write_all(body).expect("zip body");
                }
                None => {
                    writer.add_directory(name.as_str(), options).expect("zip dir");
                }
            }
        }
        writer.finish().expect("finish zip").into_inner()
    }
}

/// Relative path → contents (`None` for directories) of every entry below `root`.
pub fn snapshot_tree(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| entry.expect("walk install tree"))
        .map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(root)
                .expect("entry below root")
                .to_string_lossy()
                .replace('\\', "/");
            let contents = if entry.file_type().is_dir() {
                None
            } else {
                Some(std::fs::read(entry.path()).expect("read tree file"))
            };
            (relative, contents)
        })
        .collect()
}

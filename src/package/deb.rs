// src/package/deb.rs
//! DEB package writer
//!
//! DEB packages are ar archives containing:
//! - debian-binary: version string "2.0\n"
//! - control.tar.gz: control file, conffiles and md5sums
//! - data.tar.gz: the staged files

use super::{FormatWriter, StagedPackage};
use crate::error::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use md5::{Digest, Md5};
use std::fs::File;
use std::io;
use std::path::Path;
use tar::{Builder as TarBuilder, Header, HeaderMode};
use tracing::debug;

/// Writes `.deb` files
pub struct DebWriter;

impl FormatWriter for DebWriter {
    fn write(&self, package: &StagedPackage, path: &Path) -> Result<()> {
        let files = package.staged_files()?;

        let mut conffiles: Vec<String> = package.config_files().to_vec();
        let attributes = &package.attributes;
        if attributes.deb_auto_config_files && !attributes.deb_no_default_config_files {
            for file in files.iter().filter(|f| f.is_regular()) {
                let relative = file.relative();
                if relative.starts_with("etc/") && !conffiles.iter().any(|c| c == relative) {
                    conffiles.push(relative.to_string());
                }
            }
        }

        let mut md5sums = String::new();
        let mut installed_size = 0;
        for file in files.iter().filter(|f| f.is_regular()) {
            let (digest, size) = compute_md5(&file.source)?;
            installed_size += size;
            md5sums.push_str(&format!("{}  {}\n", digest, file.relative()));
        }

        let control = control_file(package, installed_size.div_ceil(1024));

        let mut members = vec![("control", control.into_bytes(), 0o644)];
        if !conffiles.is_empty() {
            let listing: String = conffiles.iter().map(|c| format!("/{}\n", c)).collect();
            members.push(("conffiles", listing.into_bytes(), 0o644));
        }
        if !md5sums.is_empty() {
            members.push(("md5sums", md5sums.into_bytes(), 0o644));
        }

        let control_tar = control_tarball(&members)?;
        let data_tar = data_tarball(package.staging_path())?;

        create_deb_archive(path, &control_tar, &data_tar)?;
        debug!(
            "Wrote {} ({} files, {} conffiles)",
            path.display(),
            files.len(),
            conffiles.len()
        );
        Ok(())
    }
}

/// The `control` file for `package`
fn control_file(package: &StagedPackage, installed_kb: u64) -> String {
    let decl = package.decl();

    let mut control = format!(
        "Package: {}\n\
         Version: {}-{}\n\
         Architecture: {}\n\
         Maintainer: {}\n\
         Installed-Size: {}\n",
        decl.name,
        decl.version,
        decl.release,
        package.arch(),
        decl.maintainer
            .as_deref()
            .unwrap_or("Unknown <unknown@unknown.org>"),
        installed_kb
    );

    if !decl.depends.is_empty() {
        control.push_str(&format!("Depends: {}\n", decl.depends.join(", ")));
    }

    if let Some(homepage) = &decl.homepage {
        control.push_str(&format!("Homepage: {}\n", homepage));
    }

    control.push_str(&format!(
        "Description: {}\n",
        description_field(decl.description.as_deref().unwrap_or(&decl.name))
    ));
    control
}

/// Format a description: summary line, then continuation lines indented by
/// one space with blank lines written as ` .`
fn description_field(description: &str) -> String {
    let mut lines = description.trim().lines();
    let mut field = lines.next().unwrap_or_default().trim().to_string();
    for line in lines {
        field.push_str("\n ");
        if line.trim().is_empty() {
            field.push('.');
        } else {
            field.push_str(line.trim_end());
        }
    }
    field
}

fn gzip_tar<F>(fill: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut TarBuilder<GzEncoder<Vec<u8>>>) -> std::io::Result<()>,
{
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut archive = TarBuilder::new(encoder);
    archive.mode(HeaderMode::Deterministic);
    archive.follow_symlinks(false);

    fill(&mut archive).map_err(|e| Error::Package(format!("failed to build tarball: {}", e)))?;

    let encoder = archive.into_inner()?;
    Ok(encoder.finish()?)
}

/// control.tar.gz from in-memory members
fn control_tarball(members: &[(&str, Vec<u8>, u32)]) -> Result<Vec<u8>> {
    gzip_tar(|archive| {
        for (name, data, mode) in members {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_entry_type(tar::EntryType::Regular);
            archive.append_data(&mut header, format!("./{}", name), data.as_slice())?;
        }
        Ok(())
    })
}

/// data.tar.gz of the staging area, owned by root
fn data_tarball(staging: &Path) -> Result<Vec<u8>> {
    gzip_tar(|archive| archive.append_dir_all(".", staging))
}

/// Create the final .deb ar archive
fn create_deb_archive(output_path: &Path, control_tar: &[u8], data_tar: &[u8]) -> Result<()> {
    let file = File::create(output_path)?;
    let mut archive = ar::Builder::new(file);

    let mut append = |name: &[u8], data: &[u8]| -> Result<()> {
        let header = ar::Header::new(name.to_vec(), data.len() as u64);
        archive.append(&header, data).map_err(|e| {
            Error::Package(format!(
                "failed to add {} to {}: {}",
                String::from_utf8_lossy(name),
                output_path.display(),
                e
            ))
        })
    };

    // debian-binary must be first
    append(b"debian-binary", b"2.0\n")?;
    append(b"control.tar.gz", control_tar)?;
    append(b"data.tar.gz", data_tar)
}

/// MD5 of a file (for md5sums) and its size, read in pieces
fn compute_md5(path: &Path) -> Result<(String, u64)> {
    let mut hasher = Md5::new();
    let size = io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageFormat;
    use crate::package::tests::staged;
    use flate2::read::GzDecoder;
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    /// ar members of a .deb, by name
    fn members(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = ar::Archive::new(File::open(path).unwrap());
        let mut members = Vec::new();
        while let Some(entry) = archive.next_entry() {
            let mut entry = entry.unwrap();
            let name = String::from_utf8(entry.header().identifier().to_vec()).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            members.push((name, data));
        }
        members
    }

    fn untar(data: &[u8]) -> BTreeMap<String, (u32, Vec<u8>)> {
        let mut archive = tar::Archive::new(GzDecoder::new(data));
        let mut entries = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let name = path.trim_start_matches("./").to_string();
            let mode = entry.header().mode().unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            entries.insert(name, (mode, content));
        }
        entries
    }

    #[test]
    fn test_writes_readable_deb() {
        let mut package = staged(PackageFormat::Deb);
        package.add_config_file("etc/hello/hello.conf");

        let out = TempDir::new().unwrap();
        let path = out.path().join("hello.deb");
        package.output(&path).unwrap();

        let members = members(&path);
        let names: Vec<_> = members.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["debian-binary", "control.tar.gz", "data.tar.gz"]);
        assert_eq!(members[0].1, b"2.0\n");

        let control = untar(&members[1].1);
        let control_file = String::from_utf8(control["control"].1.clone()).unwrap();
        assert!(control_file.contains("Package: hello\n"));
        assert!(control_file.contains("Version: 1.2.3-4\n"));
        assert!(control_file.contains("Architecture: amd64\n"));
        assert!(control_file.contains("Depends: libc6\n"));
        assert!(control_file.ends_with("Description: Says hello\n and nothing else\n"));
        assert_eq!(control["conffiles"].1, b"/etc/hello/hello.conf\n");

        let md5sums = String::from_utf8(control["md5sums"].1.clone()).unwrap();
        assert!(md5sums.contains("  usr/bin/hello\n"));
        assert!(md5sums.contains("  etc/hello/hello.conf\n"));

        let data = untar(&members[2].1);
        let (mode, content) = &data["usr/bin/hello"];
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(content, b"#!/bin/sh\necho hello\n");
        assert!(data.contains_key("etc/hello/hello.conf"));
    }

    #[test]
    fn test_no_conffiles_without_config() {
        let mut package = staged(PackageFormat::Deb);
        package.attributes.deb_no_default_config_files = true;

        let out = TempDir::new().unwrap();
        let path = out.path().join("hello.deb");
        package.output(&path).unwrap();

        let control = untar(&members(&path)[1].1);
        assert!(!control.contains_key("conffiles"));
    }

    #[test]
    fn test_auto_config_files() {
        let mut package = staged(PackageFormat::Deb);
        package.attributes.deb_auto_config_files = true;

        let out = TempDir::new().unwrap();
        let path = out.path().join("hello.deb");
        package.output(&path).unwrap();

        let control = untar(&members(&path)[1].1);
        assert_eq!(control["conffiles"].1, b"/etc/hello/hello.conf\n");
    }

    #[test]
    fn test_description_field() {
        assert_eq!(description_field("One line"), "One line");
        assert_eq!(
            description_field("Summary\nMore text\n\nAfter gap"),
            "Summary\n More text\n .\n After gap"
        );
    }

    #[test]
    fn test_compute_md5() {
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small");
        fs::write(&small, "hello world\n").unwrap();
        let empty = dir.path().join("empty");
        fs::write(&empty, "").unwrap();

        assert_eq!(
            compute_md5(&small).unwrap(),
            ("6f5902ac237024bdd0c176cb93063dc4".to_string(), 12)
        );
        assert_eq!(
            compute_md5(&empty).unwrap(),
            ("d41d8cd98f00b204e9800998ecf8427e".to_string(), 0)
        );
    }

    #[test]
    fn test_compute_md5_spans_many_reads() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let path = dir.path().join("big");
        fs::write(&path, &content).unwrap();

        let (digest, size) = compute_md5(&path).unwrap();
        assert_eq!(digest, format!("{:x}", Md5::digest(&content)));
        assert_eq!(size, content.len() as u64);
    }
}

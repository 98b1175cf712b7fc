// src/package/mod.rs

//! Staged packages and the format writers that turn them into files
//!
//! Files extracted from the build container land in a per-package staging
//! directory that mirrors the target filesystem. Once the declaration and the
//! format defaults are applied, the package's [`PackageFormat`] selects the
//! writer that produces the final `.deb` or `.rpm`.

pub mod deb;
pub mod rpm;

use crate::error::{Error, Result};
use crate::recipe::format::PackageDecl;
use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Package formats that can be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Deb,
    Rpm,
}

impl PackageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deb => "deb",
            Self::Rpm => "rpm",
        }
    }

    /// File extension of written packages
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Writer producing this format
    pub fn writer(&self) -> &'static dyn FormatWriter {
        match self {
            Self::Deb => &deb::DebWriter,
            Self::Rpm => &rpm::RpmWriter,
        }
    }

    /// Architecture name in this format's vocabulary, defaulting to the host
    pub fn arch(&self, arch: Option<&str>) -> String {
        let arch = arch.unwrap_or(std::env::consts::ARCH);

        match self {
            Self::Deb => match arch {
                "x86_64" => "amd64",
                "aarch64" => "arm64",
                "i686" | "i386" | "x86" => "i386",
                "armv7l" | "armhf" | "arm" => "armhf",
                "noarch" => "all",
                _ => arch,
            },
            Self::Rpm => match arch {
                "amd64" => "x86_64",
                "arm64" => "aarch64",
                "all" => "noarch",
                _ => arch,
            },
        }
        .to_string()
    }

    /// Conventional file name for a package of this format
    pub fn file_name(&self, decl: &PackageDecl) -> String {
        let arch = self.arch(decl.arch.as_deref());
        match self {
            Self::Deb => format!(
                "{}_{}-{}_{}.deb",
                decl.name, decl.version, decl.release, arch
            ),
            Self::Rpm => format!(
                "{}-{}-{}.{}.rpm",
                decl.name, decl.version, decl.release, arch
            ),
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes a staged package to a file
pub trait FormatWriter: Sync {
    fn write(&self, package: &StagedPackage, path: &Path) -> Result<()>;
}

/// Format-specific settings applied during assembly
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    /// Take rpm file modes from the staged files
    pub rpm_use_file_permissions: bool,
    pub rpm_user: Option<String>,
    pub rpm_group: Option<String>,
    /// Do not flag anything as a deb conffile on the writer's own account
    pub deb_no_default_config_files: bool,
    /// Let the deb writer flag everything under `etc/` as a conffile
    pub deb_auto_config_files: bool,
    /// The recipe declared config files itself
    pub config_explicit: bool,
}

/// Kind of a file in the staging area
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedKind {
    Regular { size: u64 },
    Symlink { target: PathBuf },
    Directory,
}

/// One entry of the staging area
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Installed path, `/`-prefixed
    pub path: String,
    /// Location inside the staging area
    pub source: PathBuf,
    /// Full `st_mode`, including the file type bits
    pub mode: u32,
    pub kind: StagedKind,
}

impl StagedFile {
    /// Path relative to the filesystem root
    pub fn relative(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    pub fn is_regular(&self) -> bool {
        matches!(self.kind, StagedKind::Regular { .. })
    }
}

/// A package being assembled
pub struct StagedPackage {
    decl: PackageDecl,
    format: PackageFormat,
    staging: TempDir,
    config_files: Vec<String>,
    pub attributes: Attributes,
}

impl StagedPackage {
    /// Create an empty staging area for `decl`
    pub fn new(decl: PackageDecl, format: PackageFormat) -> Result<Self> {
        let staging = tempfile::Builder::new()
            .prefix(&format!("fry-{}-", decl.name))
            .tempdir()?;

        Ok(Self {
            decl,
            format,
            staging,
            config_files: Vec::new(),
            attributes: Attributes::default(),
        })
    }

    pub fn decl(&self) -> &PackageDecl {
        &self.decl
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn format(&self) -> PackageFormat {
        self.format
    }

    /// Root of the staging area
    pub fn staging_path(&self) -> &Path {
        self.staging.path()
    }

    /// Config files relative to the root, in the order they were added
    pub fn config_files(&self) -> &[String] {
        &self.config_files
    }

    /// Flag a file as a config file; returns false if it already was
    pub fn add_config_file(&mut self, path: &str) -> bool {
        let relative = path.trim_start_matches('/').to_string();
        if self.config_files.contains(&relative) {
            return false;
        }
        self.config_files.push(relative);
        true
    }

    pub fn is_config_file(&self, relative: &str) -> bool {
        self.config_files.iter().any(|c| c == relative)
    }

    /// Architecture in the package format's vocabulary
    pub fn arch(&self) -> String {
        self.format.arch(self.decl.arch.as_deref())
    }

    /// Conventional output file name
    pub fn file_name(&self) -> String {
        self.format.file_name(&self.decl)
    }

    /// Everything in the staging area, sorted, without the root itself
    pub fn staged_files(&self) -> Result<Vec<StagedFile>> {
        let root = self.staging.path();
        let mut files = Vec::new();

        for entry in WalkDir::new(root).sort_by_file_name().min_depth(1) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let metadata = entry.path().symlink_metadata()?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::Package(e.to_string()))?;

            let kind = if metadata.file_type().is_symlink() {
                StagedKind::Symlink {
                    target: std::fs::read_link(entry.path())?,
                }
            } else if metadata.is_dir() {
                StagedKind::Directory
            } else {
                StagedKind::Regular {
                    size: metadata.len(),
                }
            };

            files.push(StagedFile {
                path: format!("/{}", relative.to_string_lossy()),
                source: entry.path().to_path_buf(),
                mode: metadata.mode(),
                kind,
            });
        }

        Ok(files)
    }

    /// Write the package to `path` with its format's writer
    pub fn output(&self, path: &Path) -> Result<()> {
        self.format.writer().write(self, path)
    }
}

impl fmt::Debug for StagedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedPackage")
            .field("name", &self.decl.name)
            .field("format", &self.format)
            .field("staging", &self.staging.path())
            .field("config_files", &self.config_files)
            .field("attributes", &self.attributes)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    pub(crate) fn decl(name: &str) -> PackageDecl {
        PackageDecl {
            name: name.to_string(),
            version: "1.2.3".to_string(),
            release: "4".to_string(),
            arch: Some("x86_64".to_string()),
            license: Some("MIT".to_string()),
            maintainer: Some("Jane <jane@example.org>".to_string()),
            description: Some("Says hello\nand nothing else".to_string()),
            homepage: Some("https://example.org".to_string()),
            depends: vec!["libc6".to_string()],
            files: vec!["/usr/bin/*".to_string()],
            config_files: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Staging area with a binary, a config file and a symlink
    pub(crate) fn staged(format: PackageFormat) -> StagedPackage {
        let package = StagedPackage::new(decl("hello"), format).unwrap();
        let root = package.staging_path();
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::create_dir_all(root.join("etc/hello")).unwrap();
        fs::write(root.join("usr/bin/hello"), "#!/bin/sh\necho hello\n").unwrap();
        fs::set_permissions(
            root.join("usr/bin/hello"),
            std::os::unix::fs::PermissionsExt::from_mode(0o755),
        )
        .unwrap();
        fs::write(root.join("etc/hello/hello.conf"), "greeting=hi\n").unwrap();
        package
    }

    #[test]
    fn test_arch_mapping() {
        assert_eq!(PackageFormat::Deb.arch(Some("x86_64")), "amd64");
        assert_eq!(PackageFormat::Deb.arch(Some("aarch64")), "arm64");
        assert_eq!(PackageFormat::Deb.arch(Some("amd64")), "amd64");
        assert_eq!(PackageFormat::Rpm.arch(Some("amd64")), "x86_64");
        assert_eq!(PackageFormat::Rpm.arch(Some("all")), "noarch");
    }

    #[test]
    fn test_file_names() {
        let decl = decl("hello");
        assert_eq!(
            PackageFormat::Deb.file_name(&decl),
            "hello_1.2.3-4_amd64.deb"
        );
        assert_eq!(
            PackageFormat::Rpm.file_name(&decl),
            "hello-1.2.3-4.x86_64.rpm"
        );
    }

    #[test]
    fn test_staged_files_sorted() {
        let package = staged(PackageFormat::Deb);
        let files = package.staged_files().unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/etc",
                "/etc/hello",
                "/etc/hello/hello.conf",
                "/usr",
                "/usr/bin",
                "/usr/bin/hello"
            ]
        );
        let hello = files.last().unwrap();
        assert!(hello.is_regular());
        assert_eq!(hello.mode & 0o777, 0o755);
        assert_eq!(hello.relative(), "usr/bin/hello");
    }

    #[test]
    fn test_config_files_deduplicated() {
        let mut package = staged(PackageFormat::Rpm);
        assert!(package.add_config_file("/etc/hello/hello.conf"));
        assert!(!package.add_config_file("etc/hello/hello.conf"));
        assert_eq!(package.config_files(), ["etc/hello/hello.conf"]);
        assert!(package.is_config_file("etc/hello/hello.conf"));
    }

    #[test]
    fn test_staging_removed_on_drop() {
        let package = staged(PackageFormat::Deb);
        let path = package.staging_path().to_path_buf();
        assert!(path.exists());
        drop(package);
        assert!(!path.exists());
    }
}

// src/package/rpm.rs
//! RPM package writer
//!
//! Uses the `rpm` crate's PackageBuilder. Packages are unsigned and carry no
//! scriptlets.

use super::{FormatWriter, StagedKind, StagedPackage};
use crate::error::{Error, Result};
use rpm::PackageBuilder;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Writes `.rpm` files
pub struct RpmWriter;

impl FormatWriter for RpmWriter {
    fn write(&self, package: &StagedPackage, path: &Path) -> Result<()> {
        let decl = package.decl();
        let attributes = &package.attributes;
        let arch = package.arch();

        let license = decl.license.as_deref().unwrap_or("Unspecified");
        let description = decl.description.as_deref().unwrap_or(&decl.name);

        let mut builder = PackageBuilder::new(&decl.name, &decl.version, license, &arch, description)
            .release(decl.release.clone())
            .compression(rpm::CompressionType::Gzip);

        if let Some(url) = &decl.homepage {
            builder = builder.url(url);
        }
        if let Some(maintainer) = &decl.maintainer {
            builder = builder.packager(maintainer);
        }

        for dep in &decl.depends {
            builder = builder.requires(parse_rpm_dependency(dep));
        }

        let files = package.staged_files()?;
        for file in &files {
            let mut options = rpm::FileOptions::new(&file.path);
            if let Some(user) = &attributes.rpm_user {
                options = options.user(user);
            }
            if let Some(group) = &attributes.rpm_group {
                options = options.group(group);
            }

            builder = match &file.kind {
                StagedKind::Directory => continue,
                StagedKind::Regular { .. } => {
                    let mode = if attributes.rpm_use_file_permissions {
                        file.mode
                    } else {
                        0o100644
                    };
                    options = options.mode(rpm::FileMode::from(mode as i32));
                    if package.is_config_file(file.relative()) {
                        options = options.is_config();
                    }
                    builder.with_file(&file.source, options)
                }
                // The staged link itself is added; the builder records its target
                StagedKind::Symlink { .. } => builder.with_file(&file.source, options),
            }
            .map_err(|e| Error::Package(format!("failed to add {}: {}", file.path, e)))?;
        }

        let rpm = builder
            .build()
            .map_err(|e| Error::Package(format!("failed to build {}: {}", decl.name, e)))?;

        let mut output = fs::File::create(path)?;
        rpm.write(&mut output)
            .map_err(|e| Error::Package(format!("failed to write {}: {}", path.display(), e)))?;

        debug!(
            "Wrote {} ({} files, {} config files)",
            path.display(),
            files.len(),
            package.config_files().len()
        );
        Ok(())
    }
}

/// Parse `name`, `name >= 1.0` or `name (>= 1.0)` into an RPM dependency
fn parse_rpm_dependency(spec: &str) -> rpm::Dependency {
    let cleaned = spec.replace(['(', ')'], " ");
    let parts: Vec<&str> = cleaned.split_whitespace().collect();

    match parts.as_slice() {
        [name, op, version] => match *op {
            ">=" => rpm::Dependency::greater_eq(*name, *version),
            "<=" => rpm::Dependency::less_eq(*name, *version),
            ">" | ">>" => rpm::Dependency::greater(*name, *version),
            "<" | "<<" => rpm::Dependency::less(*name, *version),
            "=" | "==" => rpm::Dependency::eq(*name, *version),
            _ => rpm::Dependency::any(spec.trim()),
        },
        [name, ..] => rpm::Dependency::any(*name),
        [] => rpm::Dependency::any(spec.trim()),
    }
}

// src/kitchen/assemble.rs

//! Turning staging areas into package files

use super::hint;
use crate::error::{Error, Result};
use crate::kitchen::extract::PathPattern;
use crate::package::{StagedKind, StagedPackage};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Flag the recipe's explicit config files
///
/// Entries may be paths or patterns; each matching staged file is flagged.
/// A declaration that matches nothing is worth a hint but not an error.
pub fn apply_declaration(package: &mut StagedPackage) -> Result<()> {
    let declared = package.decl().config_files.clone();
    package.attributes.config_explicit = !declared.is_empty();

    let files = package.staged_files()?;
    for decl in &declared {
        let pattern = PathPattern::new(&format!("/{}", decl.trim_start_matches('/')))?;
        let mut matched = false;
        for file in files.iter().filter(|f| f.kind != StagedKind::Directory) {
            if pattern.matches(&file.path) {
                package.add_config_file(&file.path);
                matched = true;
            }
        }
        if !matched {
            hint(&format!(
                "{} declares config file {} but the package does not contain it",
                package.name(),
                decl
            ));
        }
    }
    Ok(())
}

/// Settings every package gets regardless of the recipe
pub fn apply_format_defaults(package: &mut StagedPackage) {
    // rpm would otherwise ignore the modes from the build
    package.attributes.rpm_use_file_permissions = true;
    package.attributes.rpm_user = Some("root".to_string());
    package.attributes.rpm_group = Some("root".to_string());

    package.attributes.deb_no_default_config_files = true;
    package.attributes.deb_auto_config_files = false;
}

/// Flag every regular file under `etc/` as a config file
///
/// Skipped when the recipe declared config files itself. Returns the newly
/// flagged files.
pub fn detect_config_files(package: &mut StagedPackage) -> Result<Vec<String>> {
    if package.attributes.config_explicit {
        return Ok(Vec::new());
    }

    let mut added = Vec::new();
    for file in package.staged_files()? {
        if file.is_regular()
            && file.relative().starts_with("etc/")
            && package.add_config_file(file.relative())
        {
            added.push(file.relative().to_string());
        }
    }

    if !added.is_empty() {
        hint(&format!(
            "{} contains some config files in /etc. They were automatically added: {}. Declare config_files in the recipe to choose them yourself.",
            package.name(),
            added.join(", ")
        ));
    }
    Ok(added)
}

/// Everything assembly does to a package before it is written
pub fn prepare(package: &mut StagedPackage) -> Result<()> {
    apply_declaration(package)?;
    apply_format_defaults(package);
    detect_config_files(package)?;

    if package.config_files().is_empty() {
        debug!("No config files for {}", package.name());
    } else {
        debug!(
            "Found config files for {}: {}",
            package.name(),
            package.config_files().join(", ")
        );
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn refuse_existing(path: &Path) -> Result<()> {
    if fs::symlink_metadata(path).is_ok() {
        return Err(Error::Config(format!(
            "{} already exists; use --overwrite to replace it",
            path.display()
        )));
    }
    Ok(())
}

/// Fail before anything is written if any package would replace a file
pub fn check_outputs(
    packages: &[StagedPackage],
    output_dir: &Path,
    overwrite: bool,
) -> Result<()> {
    if overwrite {
        return Ok(());
    }
    for package in packages {
        refuse_existing(&output_dir.join(package.file_name()))?;
    }
    Ok(())
}

/// Write `package` into `output_dir` without ever exposing a partial file
///
/// The package is written to `<final>.tmp` and renamed into place. An
/// existing final file is replaced only with `overwrite`.
pub fn write_package(package: &StagedPackage, output_dir: &Path, overwrite: bool) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let file_name = package.file_name();
    let final_path = output_dir.join(&file_name);
    let tmp_path = output_dir.join(format!("{}.tmp", file_name));

    if !overwrite {
        refuse_existing(&final_path)?;
    }

    remove_if_exists(&tmp_path)?;
    if let Err(e) = package.output(&tmp_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    remove_if_exists(&final_path)?;
    fs::rename(&tmp_path, &final_path)?;

    info!("Created package {}", final_path.display());
    Ok(final_path)
}

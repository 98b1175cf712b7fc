// src/kitchen/extract.rs

//! Copying build results out of the container
//!
//! The file map assigns container paths to packages. It is built from every
//! package's `files` patterns, reversed so later declarations are consulted
//! first, and de-duplicated by pattern.

use crate::engine::{ChangeKind, Engine};
use crate::error::{Error, Result};
use crate::package::StagedPackage;
use crate::recipe::format::PackageDecl;
use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{debug, trace};

/// A glob pattern that also matches everything below a directory
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    glob: glob::Pattern,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let glob = glob::Pattern::new(pattern)
            .map_err(|e| Error::Config(format!("invalid file pattern {:?}: {}", pattern, e)))?;
        Ok(Self {
            raw: pattern.to_string(),
            glob,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Glob match, or `path` lies below the pattern taken as a directory
    pub fn matches(&self, path: &str) -> bool {
        if self.glob.matches(path) {
            return true;
        }
        let dir = self.raw.trim_end_matches('/');
        !dir.is_empty()
            && path.len() > dir.len()
            && path.starts_with(dir)
            && path.as_bytes()[dir.len()] == b'/'
    }
}

/// One pattern and the index of the package owning it
#[derive(Debug, Clone)]
pub struct FileMapEntry {
    pub pattern: PathPattern,
    pub package: usize,
}

/// Ordered pattern-to-package assignment
#[derive(Debug, Clone, Default)]
pub struct FileMap {
    entries: Vec<FileMapEntry>,
    excludes: Vec<Vec<PathPattern>>,
}

impl FileMap {
    /// Build the map for `packages`, given in declaration order
    pub fn new(packages: &[PackageDecl]) -> Result<Self> {
        let mut declared = Vec::new();
        for (index, package) in packages.iter().enumerate() {
            for pattern in &package.files {
                declared.push((pattern.as_str(), index));
            }
        }
        declared.reverse();

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for (pattern, package) in declared {
            if seen.insert(pattern) {
                entries.push(FileMapEntry {
                    pattern: PathPattern::new(pattern)?,
                    package,
                });
            }
        }

        let excludes = packages
            .iter()
            .map(|p| {
                p.exclude
                    .iter()
                    .map(|e| PathPattern::new(e))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries, excludes })
    }

    pub fn entries(&self) -> &[FileMapEntry] {
        &self.entries
    }

    /// Package owning `path`, unless that package excludes it
    pub fn resolve(&self, path: &str) -> Option<usize> {
        let entry = self.entries.iter().find(|e| e.pattern.matches(path))?;
        let excluded = self
            .excludes
            .get(entry.package)
            .is_some_and(|patterns| patterns.iter().any(|p| p.matches(path)));
        if excluded {
            trace!("{} excluded from package {}", path, entry.package);
            return None;
        }
        Some(entry.package)
    }
}

/// Copy every changed path claimed by the file map into its package
///
/// Returns the number of files copied per package.
pub fn extract(
    engine: &dyn Engine,
    container: &str,
    map: &FileMap,
    packages: &[StagedPackage],
) -> Result<Vec<usize>> {
    let mut changes = engine.container_changes(container)?;
    changes.sort_by(|a, b| a.path.cmp(&b.path));

    let mut copied = vec![0; packages.len()];
    for change in changes {
        if change.kind == ChangeKind::Deleted {
            continue;
        }
        let Some(index) = map.resolve(&change.path) else {
            continue;
        };
        let package = packages.get(index).ok_or_else(|| {
            Error::Package(format!("file map refers to unknown package {}", index))
        })?;

        if copy_out(engine, container, &change.path, package.staging_path())? {
            debug!("{} -> {}", change.path, package.name());
            copied[index] += 1;
        }
    }

    Ok(copied)
}

/// Copy a single non-directory path into `staging`; false for directories
fn copy_out(engine: &dyn Engine, container: &str, path: &str, staging: &Path) -> Result<bool> {
    let relative = path.trim_start_matches('/');
    if relative.is_empty() {
        return Ok(false);
    }
    let dest = staging.join(relative);
    let mut copied = false;

    engine.read_archive(container, path, &mut |body: &mut dyn Read| -> Result<()> {
        let mut archive = tar::Archive::new(body);
        // The first member is the path itself; directory contents show up
        // as changes of their own
        if let Some(entry) = archive.entries()?.next() {
            let mut entry = entry?;
            if entry.header().entry_type().is_dir() {
                return Ok(());
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&dest)?;
            copied = true;
        }
        Ok(())
    })?;

    Ok(copied)
}

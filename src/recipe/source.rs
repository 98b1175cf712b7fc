// src/recipe/source.rs

//! Local build inputs
//!
//! A recipe may point at a directory next to it. Its files are shipped into
//! the source image under `source/`, and their contents feed the cache key.

use crate::archive::ArchiveEntry;
use crate::dockerfile::DOCKERFILE_NAME;
use crate::error::{Error, Result};
use crate::recipe::format::Recipe;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directories that usually should not end up in a build context
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn", ".bzr"];

/// One regular file of the build source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the source root, `/`-separated
    pub relative: String,
    pub path: PathBuf,
    pub executable: bool,
}

/// The collected build source of a recipe
#[derive(Debug, Clone, Default)]
pub struct BuildSource {
    root: Option<PathBuf>,
    files: Vec<SourceFile>,
    skipped_symlinks: Vec<String>,
    vcs_dirs: Vec<String>,
}

impl BuildSource {
    /// Source without any files
    pub fn empty() -> Self {
        Self::default()
    }

    /// Collect the source declared by `recipe`
    pub fn for_recipe(recipe: &Recipe) -> Result<Self> {
        match recipe.source_dir() {
            Some(dir) => Self::collect(&dir, &recipe.source.exclude),
            None => Ok(Self::empty()),
        }
    }

    /// Walk `root` in sorted order, skipping excluded paths and symlinks
    ///
    /// An exclude pattern matches either the relative path or the bare file
    /// name; excluded directories are not descended into.
    pub fn collect(root: &Path, exclude: &[String]) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "source directory {} does not exist",
                root.display()
            )));
        }

        let patterns = exclude
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| Error::Config(format!("invalid source exclude {:?}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let is_excluded = |relative: &str| {
            let name = relative.rsplit('/').next().unwrap_or(relative);
            patterns
                .iter()
                .any(|p| p.matches(relative) || p.matches(name))
        };

        let mut source = Self {
            root: Some(root.to_path_buf()),
            ..Default::default()
        };

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !is_excluded(&relative_name(root, entry.path()))
            });

        for entry in walker {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let relative = relative_name(root, entry.path());
            let file_type = entry.file_type();

            if file_type.is_dir() {
                let name = entry.file_name().to_string_lossy();
                if VCS_DIRS.iter().any(|vcs| *vcs == name) {
                    source.vcs_dirs.push(relative);
                }
            } else if file_type.is_symlink() {
                source.skipped_symlinks.push(relative);
            } else if file_type.is_file() {
                let mode = entry
                    .metadata()
                    .map_err(|e| Error::Io(e.into()))?
                    .permissions()
                    .mode();
                let executable = mode & 0o111 != 0;
                source.files.push(SourceFile {
                    relative,
                    path: entry.path().to_path_buf(),
                    executable,
                });
            }
        }

        debug!(
            "Collected {} source files from {}",
            source.files.len(),
            root.display()
        );
        Ok(source)
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Archive entries placing every file under `source/`
    pub fn archive_entries(&self) -> Vec<ArchiveEntry> {
        self.files
            .iter()
            .map(|file| ArchiveEntry::file(format!("source/{}", file.relative), &file.path))
            .collect()
    }

    /// Hints about the source worth showing to the user
    pub fn inspect(&self) -> Vec<String> {
        let mut hints = Vec::new();
        let Some(root) = &self.root else {
            return hints;
        };

        if self.files.is_empty() {
            hints.push(format!(
                "Source directory {} contains no files",
                root.display()
            ));
        }
        for dir in &self.vcs_dirs {
            hints.push(format!(
                "Source contains version control data in {}; add it to source.exclude to keep it out of the build",
                dir
            ));
        }
        for link in &self.skipped_symlinks {
            hints.push(format!("Skipped symlink {} in source", link));
        }
        if self.files.iter().any(|f| f.relative == DOCKERFILE_NAME) {
            hints.push(format!(
                "Source contains a file named {}; it is shipped as source/{} and does not affect the build",
                DOCKERFILE_NAME, DOCKERFILE_NAME
            ));
        }
        hints
    }
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(root.join("Makefile"), "all:\n").unwrap();
        fs::write(root.join("src/main.c"), "int main() {}\n").unwrap();
        fs::write(root.join("src/main.o"), [0u8; 4]).unwrap();
        fs::write(root.join("src/nested/util.h"), "#pragma once\n").unwrap();
        fs::write(root.join("configure"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(root.join("configure"), fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("Makefile", root.join("GNUmakefile")).unwrap();
        temp
    }

    #[test]
    fn test_collect_sorted_with_excludes() {
        let temp = tree();
        let source = BuildSource::collect(temp.path(), &["*.o".to_string()]).unwrap();
        let names: Vec<_> = source.files().iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(
            names,
            vec![".git/HEAD", "Makefile", "configure", "src/main.c", "src/nested/util.h"]
        );

        let configure = source.files().iter().find(|f| f.relative == "configure").unwrap();
        assert!(configure.executable);
        assert!(!source.files()[1].executable);
    }

    #[test]
    fn test_excluded_directory_is_pruned() {
        let temp = tree();
        let source =
            BuildSource::collect(temp.path(), &[".git".to_string(), "src/nested".to_string()])
                .unwrap();
        assert!(source.files().iter().all(|f| !f.relative.starts_with(".git")));
        assert!(source.files().iter().all(|f| !f.relative.starts_with("src/nested")));
        assert!(source.inspect().iter().all(|h| !h.contains("version control")));
    }

    #[test]
    fn test_inspect_hints() {
        let temp = tree();
        let source = BuildSource::collect(temp.path(), &[]).unwrap();
        let hints = source.inspect();
        assert!(hints.iter().any(|h| h.contains("version control data in .git")));
        assert!(hints.iter().any(|h| h.contains("Skipped symlink GNUmakefile")));
    }

    #[test]
    fn test_empty_source_hint() {
        let temp = TempDir::new().unwrap();
        let source = BuildSource::collect(temp.path(), &[]).unwrap();
        assert!(source.is_empty());
        assert_eq!(source.inspect().len(), 1);
        assert!(BuildSource::empty().inspect().is_empty());
    }

    #[test]
    fn test_archive_entries_live_under_source() {
        let temp = tree();
        let source = BuildSource::collect(temp.path(), &[".git".to_string()]).unwrap();
        let entries = source.archive_entries();
        assert_eq!(entries[0].name, "source/Makefile");
        assert!(entries.iter().all(|e| e.name.starts_with("source/")));
    }

    #[test]
    fn test_missing_directory() {
        let temp = TempDir::new().unwrap();
        let result = BuildSource::collect(&temp.path().join("nope"), &[]);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

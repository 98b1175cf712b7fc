// src/recipe/format.rs

//! Recipe file format definitions
//!
//! Recipes are TOML files declaring what to build inside the container and
//! which of the resulting files belong to which package.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

/// A complete recipe for cooking one or more packages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Main package metadata and file patterns
    pub package: PackageSection,

    /// Local build inputs shipped into the source image
    #[serde(default)]
    pub source: SourceSection,

    /// Build dependencies and steps
    #[serde(default)]
    pub build: BuildSection,

    /// Variables for substitution
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Additional packages split off the same build
    #[serde(default, rename = "subpackage")]
    pub subpackages: Vec<SubpackageSection>,

    /// Directory the recipe was loaded from; relative source paths start here
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Recipe {
    /// Packages in declaration order: the main package, then subpackages
    pub fn packages(&self) -> Vec<PackageDecl> {
        let main = &self.package;
        let mut packages = vec![PackageDecl {
            name: main.name.clone(),
            version: main.version.clone(),
            release: main.release.clone(),
            arch: main.arch.clone(),
            license: main.license.clone(),
            maintainer: main.maintainer.clone(),
            description: main.description.clone(),
            homepage: main.homepage.clone(),
            depends: main.depends.clone(),
            files: main.files.clone(),
            config_files: main.config_files.clone(),
            exclude: main.exclude.clone(),
        }];

        for sub in &self.subpackages {
            packages.push(PackageDecl {
                name: sub.name.clone(),
                version: main.version.clone(),
                release: main.release.clone(),
                arch: sub.arch.clone().or_else(|| main.arch.clone()),
                license: main.license.clone(),
                maintainer: main.maintainer.clone(),
                description: sub.description.clone().or_else(|| main.description.clone()),
                homepage: main.homepage.clone(),
                depends: sub.depends.clone(),
                files: sub.files.clone(),
                config_files: sub.config_files.clone(),
                exclude: sub.exclude.clone(),
            });
        }

        packages
    }

    /// Values available to `%(name)s` substitution
    ///
    /// Later sources override earlier ones: detected variables, then the
    /// package identity, then declared `[variables]`.
    pub fn substitutions(&self, detected: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut values = detected.clone();
        values.insert("name".to_string(), self.package.name.clone());
        values.insert("version".to_string(), self.package.version.clone());
        values.insert("release".to_string(), self.package.release.clone());
        for (key, value) in &self.variables {
            values.insert(key.clone(), value.clone());
        }
        values
    }

    /// Copy of the recipe with every template field substituted
    pub fn expand(&self, detected: &BTreeMap<String, String>) -> Recipe {
        let values = self.substitutions(detected);
        let sub = |s: &String| substitute(s, &values);
        let sub_all = |list: &[String]| list.iter().map(sub).collect::<Vec<_>>();

        let mut expanded = self.clone();
        expanded.package.depends = sub_all(&self.package.depends);
        expanded.package.files = sub_all(&self.package.files);
        expanded.package.config_files = sub_all(&self.package.config_files);
        expanded.package.exclude = sub_all(&self.package.exclude);
        expanded.build.depends = sub_all(&self.build.depends);
        expanded.build.steps = sub_all(&self.build.steps);
        expanded.build.environment = self
            .build
            .environment
            .iter()
            .map(|(key, value)| (key.clone(), sub(value)))
            .collect();

        for (expanded_sub, sub_section) in expanded.subpackages.iter_mut().zip(&self.subpackages) {
            expanded_sub.depends = sub_all(&sub_section.depends);
            expanded_sub.files = sub_all(&sub_section.files);
            expanded_sub.config_files = sub_all(&sub_section.config_files);
            expanded_sub.exclude = sub_all(&sub_section.exclude);
        }

        expanded
    }

    /// Absolute source directory, if the recipe declares one
    pub fn source_dir(&self) -> Option<PathBuf> {
        self.source.path.as_ref().map(|path| self.base_dir.join(path))
    }
}

/// `%(key)s` placeholder
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\(([A-Za-z0-9_]+)\)s").unwrap());

/// Replace `%(key)s` patterns with their values
///
/// One pass over `template`: substituted values are never expanded again.
/// Unknown keys are left in place.
pub fn substitute(template: &str, values: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Main package metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,

    pub version: String,

    /// Package release number
    #[serde(default = "default_release")]
    pub release: String,

    /// Target architecture; defaults to the host's
    #[serde(default)]
    pub arch: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    #[serde(default)]
    pub maintainer: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    /// Runtime dependencies
    #[serde(default)]
    pub depends: Vec<String>,

    /// Container paths (globs) that belong to this package
    #[serde(default)]
    pub files: Vec<String>,

    /// Explicit config files; disables automatic detection under /etc
    #[serde(default)]
    pub config_files: Vec<String>,

    /// Patterns removed from the package even if `files` matches them
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_release() -> String {
    "1".to_string()
}

/// Local build inputs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSection {
    /// Directory relative to the recipe file
    #[serde(default)]
    pub path: Option<String>,

    /// Patterns skipped while collecting the directory
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Build instructions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    /// Distribution packages installed before building
    #[serde(default)]
    pub depends: Vec<String>,

    /// Shell commands run in order inside the build container
    #[serde(default)]
    pub steps: Vec<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// A package split off the main build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubpackageSection {
    pub name: String,

    #[serde(default)]
    pub arch: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub depends: Vec<String>,

    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub config_files: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

/// One output package with inherited fields filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDecl {
    pub name: String,
    pub version: String,
    pub release: String,
    pub arch: Option<String>,
    pub license: Option<String>,
    pub maintainer: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub depends: Vec<String>,
    pub files: Vec<String>,
    pub config_files: Vec<String>,
    pub exclude: Vec<String>,
}

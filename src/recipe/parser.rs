// src/recipe/parser.rs

//! Recipe file parsing and linting

use crate::error::{Error, Result};
use crate::recipe::format::{Recipe, substitute};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

/// Package names the Debian tooling accepts (and rpm is happy with)
static PACKAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9+.\-]+$").unwrap());

/// Parse a recipe from a TOML string
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    toml::from_str(content).map_err(|e| Error::Parse(e.to_string()))
}

/// Parse a recipe from a file
///
/// Relative source paths in the recipe resolve against the file's directory.
pub fn parse_recipe_file(path: &Path) -> Result<Recipe> {
    if !path.is_file() {
        return Err(Error::RecipeNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;

    let mut recipe = parse_recipe(&content)
        .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))?;
    recipe.base_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    Ok(recipe)
}

/// Check a recipe for content problems
///
/// Returns every problem found; an empty list means the recipe is usable.
pub fn lint_recipe(recipe: &Recipe) -> Vec<String> {
    let mut problems = Vec::new();
    let packages = recipe.packages();
    let values = recipe.substitutions(&BTreeMap::new());

    let mut seen = HashSet::new();
    for package in &packages {
        if package.name.is_empty() {
            problems.push("Package name cannot be empty".to_string());
        } else if !PACKAGE_NAME.is_match(&package.name) {
            problems.push(format!(
                "Package name {:?} must be lowercase alphanumerics, '+', '-' or '.', at least two characters",
                package.name
            ));
        }

        if !seen.insert(package.name.as_str()) {
            problems.push(format!("Package {:?} is declared more than once", package.name));
        }

        if package.files.is_empty() {
            problems.push(format!("Package {:?} declares no files", package.name));
        }

        for pattern in package.files.iter().chain(&package.config_files) {
            // Detected variables are only known at cook time
            let expanded = substitute(pattern, &values);
            if !expanded.starts_with('/') && !expanded.starts_with("%(") {
                problems.push(format!(
                    "Pattern {:?} in package {:?} must be an absolute path",
                    pattern, package.name
                ));
            }
        }

        for pattern in package
            .files
            .iter()
            .chain(&package.exclude)
            .chain(&package.config_files)
        {
            if let Err(e) = glob::Pattern::new(&substitute(pattern, &values)) {
                problems.push(format!(
                    "Invalid pattern {:?} in package {:?}: {}",
                    pattern, package.name, e
                ));
            }
        }
    }

    let version = &recipe.package.version;
    if version.is_empty() {
        problems.push("Package version cannot be empty".to_string());
    } else if !version.starts_with(|c: char| c.is_ascii_digit()) {
        problems.push(format!("Version {:?} must start with a digit", version));
    }

    for (index, step) in recipe.build.steps.iter().enumerate() {
        if step.trim().is_empty() {
            problems.push(format!("Build step {} is empty", index + 1));
        }
    }

    for pattern in &recipe.source.exclude {
        if let Err(e) = glob::Pattern::new(pattern) {
            problems.push(format!("Invalid source exclude {:?}: {}", pattern, e));
        }
    }

    if let Some(dir) = recipe.source_dir()
        && !dir.is_dir()
    {
        problems.push(format!("Source directory {} does not exist", dir.display()));
    }

    problems
}

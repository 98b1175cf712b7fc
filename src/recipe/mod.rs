// src/recipe/mod.rs

//! Recipes describing what to cook
//!
//! A recipe is a TOML file naming one or more packages, the local sources
//! to ship into the build, the build dependencies and the shell steps that
//! install everything into the container's filesystem.
//!
//! # Culinary Terminology
//!
//! - **Recipe**: What to build and how (like a recipe card)
//! - **Cook**: Build packages from a recipe on top of a base image
//! - **Kitchen**: The orchestration of image builds and the build container
//!
//! # Example Recipe
//!
//! ```toml
//! [package]
//! name = "hello"
//! version = "1.0.0"
//! files = ["/usr/bin/hello"]
//!
//! [source]
//! path = "src"
//!
//! [build]
//! depends = ["make", "gcc"]
//! steps = ["make", "make install PREFIX=%(prefix)s"]
//!
//! [variables]
//! prefix = "/usr"
//! ```
//!
//! `%(name)s` placeholders are replaced with the package identity, the
//! variables detected from the base image and the recipe's own
//! `[variables]`.

pub mod format;
pub mod parser;
pub mod source;

pub use format::{
    BuildSection, PackageDecl, PackageSection, Recipe, SourceSection, SubpackageSection,
};
pub use parser::{lint_recipe, parse_recipe, parse_recipe_file};
pub use source::{BuildSource, SourceFile};

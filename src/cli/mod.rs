// src/cli/mod.rs
//! CLI definitions for fry
//!
//! Argument parsing lives here; the work is done in the `commands` module.
//! - `cook` - Cook a recipe into packages on top of an image
//! - `detect` - Print what fry detects about an image

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fry")]
#[command(author = "Fry Contributors")]
#[command(version)]
#[command(about = "Cook deb and rpm packages inside a container engine", long_about = None)]
pub struct Cli {
    /// Show debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: ~/.config/fry/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cook a recipe into packages on top of an image
    Cook {
        /// Base image name or id
        image: String,

        /// Path to the recipe file
        #[arg(default_value = "recipe.toml")]
        recipe: PathBuf,

        /// Keep the build container after the build
        #[arg(long)]
        keep: bool,

        /// Replace existing package files (--overwrite=false to refuse)
        #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
        overwrite: Option<bool>,

        /// Refresh the package index before installing build dependencies
        #[arg(long, value_name = "auto|never|always")]
        update: Option<String>,

        /// Directory the packages are written to
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Print the variables detected for an image
    Detect {
        /// Image name or id
        image: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cook_defaults() {
        let cli = Cli::try_parse_from(["fry", "cook", "debian:bookworm"]).unwrap();
        match cli.command {
            Commands::Cook {
                image,
                recipe,
                keep,
                overwrite,
                update,
                output_dir,
            } => {
                assert_eq!(image, "debian:bookworm");
                assert_eq!(recipe, PathBuf::from("recipe.toml"));
                assert!(!keep);
                assert_eq!(overwrite, None);
                assert_eq!(update, None);
                assert_eq!(output_dir, None);
            }
            Commands::Detect { .. } => panic!("expected cook"),
        }
    }

    #[test]
    fn test_overwrite_forms() {
        let parse = |args: &[&str]| match Cli::try_parse_from(args).unwrap().command {
            Commands::Cook { overwrite, .. } => overwrite,
            Commands::Detect { .. } => panic!("expected cook"),
        };
        assert_eq!(parse(&["fry", "cook", "img", "--overwrite"]), Some(true));
        assert_eq!(parse(&["fry", "cook", "img", "--overwrite=false"]), Some(false));
        assert_eq!(parse(&["fry", "cook", "img", "--overwrite=true"]), Some(true));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["fry", "detect", "fedora:40", "--verbose", "-c", "fry.toml"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("fry.toml")));
    }
}

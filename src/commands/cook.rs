// src/commands/cook.rs

//! Cook command - build packages from a recipe

use super::{load_config, open_engine};
use anyhow::{Context, Result};
use fry::{CookOptions, Kitchen, UpdatePolicy};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Flags given to `fry cook`; unset values fall back to the configuration
#[derive(Debug, Default)]
pub struct CookArgs {
    pub image: String,
    pub recipe: PathBuf,
    pub keep: bool,
    pub overwrite: Option<bool>,
    pub update: Option<String>,
    pub output_dir: Option<PathBuf>,
}

impl CookArgs {
    /// Layer the flags over the configured defaults
    fn options(&self, mut options: CookOptions) -> Result<CookOptions> {
        if self.keep {
            options.keep = true;
        }
        if let Some(overwrite) = self.overwrite {
            options.overwrite = overwrite;
        }
        if let Some(update) = &self.update {
            options.update = update.parse::<UpdatePolicy>()?;
        }
        if let Some(dir) = &self.output_dir {
            options.output_dir = dir.clone();
        }
        Ok(options)
    }
}

/// Cook `args.recipe` on top of `args.image`
pub fn cmd_cook(config_path: Option<&Path>, args: &CookArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let options = args.options(CookOptions::from(&config.cook))?;
    let engine = open_engine(&config)?;

    let kitchen = Kitchen::new(&engine, options);
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    let result = kitchen
        .cook(&args.image, &args.recipe, &mut stdout, &mut stderr)
        .with_context(|| format!("Failed to cook {}", args.recipe.display()))?;

    if result.cache_hit {
        info!("Source image {} was reused", result.cache_tag);
    }
    for package in &result.packages {
        println!("{}", package.display());
    }
    Ok(())
}

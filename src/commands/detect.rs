// src/commands/detect.rs

//! Detect command - show what fry sees in an image

use super::{load_config, open_engine};
use anyhow::{Context, Result};
use fry::detector;
use fry::engine::resolve_image;
use std::path::Path;

/// Print the substitution variables and package format for `image`
pub fn cmd_detect(config_path: Option<&Path>, image: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = open_engine(&config)?;

    let base = resolve_image(&engine, image)?;
    let variables = detector::detect(&engine, &base.id)
        .with_context(|| format!("Failed to detect the distribution of {}", image))?;

    for (key, value) in variables.to_map() {
        println!("{} = {}", key, value);
    }
    match variables.package_format() {
        Ok(format) => println!("package_format = {}", format),
        Err(_) => println!("package_format = (unsupported)"),
    }
    Ok(())
}

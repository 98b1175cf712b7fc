// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Argument shared by every subcommand: the image to work on
fn image_arg(help: &'static str) -> Arg {
    Arg::new("image").required(true).help(help)
}

fn build_cli() -> Command {
    Command::new("fry")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Fry Contributors")
        .about("Cook deb and rpm packages inside a container engine")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Show debug output (RUST_LOG takes precedence)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .value_name("FILE")
                .help("Configuration file (default: ~/.config/fry/config.toml)"),
        )
        .subcommand(
            Command::new("cook")
                .about("Cook a recipe into packages on top of an image")
                .arg(image_arg("Base image name or id"))
                .arg(
                    Arg::new("recipe")
                        .default_value("recipe.toml")
                        .help("Path to the recipe file"),
                )
                .arg(
                    Arg::new("keep")
                        .long("keep")
                        .action(ArgAction::SetTrue)
                        .help("Keep the build container after the build"),
                )
                .arg(
                    Arg::new("overwrite")
                        .long("overwrite")
                        .value_name("BOOL")
                        .num_args(0..=1)
                        .default_missing_value("true")
                        .help("Replace existing package files (--overwrite=false to refuse)"),
                )
                .arg(
                    Arg::new("update")
                        .long("update")
                        .value_parser(["auto", "never", "always"])
                        .help("Refresh the package index before installing build dependencies"),
                )
                .arg(
                    Arg::new("output_dir")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Directory the packages are written to"),
                ),
        )
        .subcommand(
            Command::new("detect")
                .about("Print the variables detected for an image")
                .arg(image_arg("Image name or id")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("fry.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}

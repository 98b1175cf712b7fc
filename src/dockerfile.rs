// src/dockerfile.rs

//! Build context generation for both image stages
//!
//! The source stage copies the recipe's local inputs on top of the base
//! image. The build stage derives from the cached source image, installs the
//! build dependencies and leaves the build steps as the container command, so
//! their output can be streamed through an attach.

use crate::archive::ArchiveEntry;
use crate::detector::Flavour;
use crate::recipe::format::Recipe;
use crate::recipe::source::BuildSource;

/// Dockerfile name inside every generated context
pub const DOCKERFILE_NAME: &str = "Dockerfile.fry";

/// Build script name inside the build context
pub const BUILD_SCRIPT_NAME: &str = ".build.sh";

/// Working directory of the build inside the container
pub const BUILD_DIR: &str = "/tmp/build";

/// Dockerfile for the source stage
pub fn source_dockerfile(base_image_id: &str, source: &BuildSource) -> String {
    let mut df = format!("FROM {}\nRUN mkdir -p {}\n", base_image_id, BUILD_DIR);
    if !source.is_empty() {
        df.push_str(&format!("COPY source/ {}/\n", BUILD_DIR));
    }
    df.push_str(&format!("WORKDIR {}\n", BUILD_DIR));
    df
}

/// Context for the source stage: the dockerfile, then `source/...`
pub fn source_context(base_image_id: &str, source: &BuildSource) -> Vec<ArchiveEntry> {
    let mut entries = vec![ArchiveEntry::bytes(
        DOCKERFILE_NAME,
        source_dockerfile(base_image_id, source),
    )];
    entries.extend(source.archive_entries());
    entries
}

/// Shell command installing `packages`, optionally refreshing the index first
fn install_command(flavour: Flavour, packages: &[String], update: bool) -> Option<String> {
    let list = packages.join(" ");
    match flavour {
        Flavour::Debian => {
            let env = "DEBIAN_FRONTEND=noninteractive";
            let mut parts = Vec::new();
            if update {
                parts.push(format!("{} apt-get update", env));
            }
            if !packages.is_empty() {
                parts.push(format!(
                    "{} apt-get install --yes --no-install-recommends {}",
                    env, list
                ));
            }
            (!parts.is_empty()).then(|| parts.join(" && "))
        }
        Flavour::Redhat => {
            if packages.is_empty() {
                None
            } else {
                Some(format!("yum -y install {}", list))
            }
        }
    }
}

/// Dockerfile for the build stage
pub fn build_dockerfile(cache_tag: &str, recipe: &Recipe, flavour: Flavour, update: bool) -> String {
    let mut df = format!("FROM {}\nWORKDIR {}\n", cache_tag, BUILD_DIR);

    for (key, value) in &recipe.build.environment {
        // JSON string quoting is accepted by ENV
        let quoted = serde_json::Value::String(value.clone()).to_string();
        df.push_str(&format!("ENV {}={}\n", key, quoted));
    }

    if let Some(command) = install_command(flavour, &recipe.build.depends, update) {
        df.push_str(&format!("RUN {}\n", command));
    }

    df.push_str(&format!(
        "COPY {} {}/{}\nCMD [\"{}/{}\"]\n",
        BUILD_SCRIPT_NAME, BUILD_DIR, BUILD_SCRIPT_NAME, BUILD_DIR, BUILD_SCRIPT_NAME
    ));
    df
}

/// Script running the build steps in order, stopping at the first failure
pub fn build_script(recipe: &Recipe) -> String {
    let mut script = String::from("#!/bin/sh\nset -e\n");
    for step in &recipe.build.steps {
        script.push_str(step);
        script.push('\n');
    }
    script
}

/// Context for the build stage: the dockerfile, then the build script
pub fn build_context(
    cache_tag: &str,
    recipe: &Recipe,
    flavour: Flavour,
    update: bool,
) -> Vec<ArchiveEntry> {
    vec![
        ArchiveEntry::bytes(
            DOCKERFILE_NAME,
            build_dockerfile(cache_tag, recipe, flavour, update),
        ),
        ArchiveEntry::bytes_with_mode(BUILD_SCRIPT_NAME, build_script(recipe), 0o755),
    ]
}

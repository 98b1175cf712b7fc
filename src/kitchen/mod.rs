// src/kitchen/mod.rs

//! Kitchen: cooking recipes into packages inside a container engine
//!
//! A cook runs these stages in order, each handing an explicit value to the
//! next:
//! - Prepare: load and lint the recipe
//! - Resolve: look up the base image and detect its distribution
//! - Source: build (or reuse) the cached source image
//! - Build: build the image that runs the recipe's steps
//! - Run: start the build container and stream its output
//! - Extract: copy the declared files into per-package staging areas
//! - Assemble: apply package settings and write the package files
//!
//! Containers and staging areas are cleaned up on every path, failed or not.

pub mod assemble;
pub mod extract;

use crate::archive::TarStream;
use crate::cache::CacheKey;
use crate::config::{CookSection, UpdatePolicy};
use crate::detector::{self, Flavour, Variables};
use crate::dockerfile::{self, DOCKERFILE_NAME};
use crate::engine::{
    BuildOptions, ContainerConfig, ContainerGuard, Engine, ImageInfo, list_entries, resolve_image,
};
use crate::error::{Error, Result};
use crate::package::{PackageFormat, StagedPackage};
use crate::recipe::format::Recipe;
use crate::recipe::parser::{lint_recipe, parse_recipe_file};
use crate::recipe::source::BuildSource;
use crate::stream::{BuildOutputParser, StreamDemuxer};
use extract::FileMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub use extract::{FileMapEntry, PathPattern};

/// Where a populated apt index lives in Debian-based images
const APT_LISTS: &str = "/var/lib/apt/lists";

/// Log a suggestion for the user
pub(crate) fn hint(message: &str) {
    warn!("hint: {}", message);
}

/// Options for a single cook
#[derive(Debug, Clone)]
pub struct CookOptions {
    /// Leave the build container behind
    pub keep: bool,
    /// Replace existing package files
    pub overwrite: bool,
    pub update: UpdatePolicy,
    pub output_dir: PathBuf,
}

impl Default for CookOptions {
    fn default() -> Self {
        Self::from(&CookSection::default())
    }
}

impl From<&CookSection> for CookOptions {
    fn from(section: &CookSection) -> Self {
        Self {
            keep: section.keep,
            overwrite: section.overwrite,
            update: section.update,
            output_dir: section.output_dir.clone(),
        }
    }
}

/// What a successful cook produced
#[derive(Debug, Clone)]
pub struct CookResult {
    /// Written package files, in declaration order
    pub packages: Vec<PathBuf>,
    /// Id of the image the build container ran from
    pub build_image: String,
    /// Tag of the source image
    pub cache_tag: String,
    /// The source image was reused rather than built
    pub cache_hit: bool,
    pub variables: Variables,
}

/// The Kitchen: where recipes are cooked
pub struct Kitchen<'e> {
    engine: &'e dyn Engine,
    options: CookOptions,
}

impl<'e> Kitchen<'e> {
    pub fn new(engine: &'e dyn Engine, options: CookOptions) -> Self {
        Self { engine, options }
    }

    pub fn options(&self) -> &CookOptions {
        &self.options
    }

    /// Cook `recipe_path` on top of `image`
    ///
    /// Build output and the build container's stdout go to `out`, its stderr
    /// to `err`.
    pub fn cook(
        &self,
        image: &str,
        recipe_path: &Path,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<CookResult> {
        let recipe = prepare(recipe_path)?;

        let base = resolve_image(self.engine, image)?;
        let variables = detector::detect(self.engine, &base.id)?;
        let format = variables.package_format()?;
        let flavour = variables
            .flavour
            .ok_or_else(|| Error::UnsupportedFlavour(variables.distribution.clone()))?;
        debug!("Autodetected package type {} for flavour {}", format, flavour);

        let recipe = recipe.expand(&variables.to_map());
        let update = self.update_index(flavour, &base)?;

        let source = BuildSource::for_recipe(&recipe)?;
        let (cache_key, cache_hit) = self.source_stage(&base, &recipe, &source)?;
        let cache_tag = cache_key.tag();

        let build_image = self.build_stage(&cache_tag, &recipe, flavour, update, out)?;

        let packages = self.stage_packages(&recipe, format)?;
        let map = FileMap::new(
            &packages
                .iter()
                .map(|p| p.decl().clone())
                .collect::<Vec<_>>(),
        )?;

        {
            let container = self.run(&build_image, out, err)?;
            let copied = extract::extract(self.engine, container.id(), &map, &packages)?;
            for (package, count) in packages.iter().zip(&copied) {
                debug!("Extracted {} files for {}", count, package.name());
                if *count == 0 {
                    hint(&format!(
                        "{} is empty; check its file patterns against what the build installs",
                        package.name()
                    ));
                }
            }
        }

        let written = self.assemble(packages)?;

        Ok(CookResult {
            packages: written,
            build_image,
            cache_tag,
            cache_hit,
            variables,
        })
    }

    /// Whether to refresh the package index, probing the image on `auto`
    fn update_index(&self, flavour: Flavour, base: &ImageInfo) -> Result<bool> {
        let refresh = self.options.update.refreshes(flavour);
        if refresh && self.options.update == UpdatePolicy::Auto && self.has_apt_lists(base)? {
            hint(&format!(
                "{} is not empty, you could try to speed up builds with --update=never",
                APT_LISTS
            ));
        }
        Ok(refresh)
    }

    fn has_apt_lists(&self, base: &ImageInfo) -> Result<bool> {
        let container = ContainerGuard::create(self.engine, &ContainerConfig::new(&base.id), false)?;
        let entries = match list_entries(self.engine, container.id(), APT_LISTS) {
            Ok(entries) => entries,
            Err(Error::FileNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(entries
            .iter()
            .any(|e| !e.is_dir && e.name.rsplit('/').next() != Some("lock")))
    }

    /// Build the source image unless its cache tag already exists
    fn source_stage(
        &self,
        base: &ImageInfo,
        recipe: &Recipe,
        source: &BuildSource,
    ) -> Result<(CacheKey, bool)> {
        let key = CacheKey::compute(&base.id, recipe, source)?;
        let tag = key.tag();

        for message in source.inspect() {
            hint(&message);
        }

        if self.engine.inspect_image(&tag)?.is_some() {
            info!("Reusing cached source image {}", tag);
            return Ok((key, true));
        }

        info!("Building source image {}", tag);
        let context = dockerfile::source_context(&base.id, source);
        let mut reader = TarStream::new(context).into_reader();
        let options = BuildOptions::new(DOCKERFILE_NAME).with_tag(&tag);
        let mut parser = BuildOutputParser::new(io::sink());
        self.engine.build_image(&options, &mut reader, &mut parser)?;
        parser.image()?;

        Ok((key, false))
    }

    /// Build the image that runs the build steps; returns its id
    fn build_stage(
        &self,
        cache_tag: &str,
        recipe: &Recipe,
        flavour: Flavour,
        update: bool,
        out: &mut dyn Write,
    ) -> Result<String> {
        let context = dockerfile::build_context(cache_tag, recipe, flavour, update);
        let mut reader = TarStream::new(context).into_reader();
        let options = BuildOptions::new(DOCKERFILE_NAME);

        let mut parser = BuildOutputParser::new(out);
        self.engine.build_image(&options, &mut reader, &mut parser)?;

        let image = parser.image()?.to_string();
        debug!("Detected build image {}", image);
        Ok(image)
    }

    /// Run the build container to completion
    ///
    /// The returned guard removes the container when dropped.
    fn run(
        &self,
        image: &str,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<ContainerGuard<'e>> {
        let container =
            ContainerGuard::create(self.engine, &ContainerConfig::new(image), self.options.keep)?;
        self.engine.start_container(container.id())?;

        let mut demuxer = StreamDemuxer::new(out, err);
        self.engine.attach_container(container.id(), &mut demuxer)?;
        debug!(
            "Build wrote {} bytes to stdout and {} bytes to stderr",
            demuxer.stdout_bytes(),
            demuxer.stderr_bytes()
        );

        let exit_code = self.engine.wait_container(container.id())?;
        if exit_code != 0 {
            error!("Build failed with exit code {}", exit_code);
            return Err(Error::BuildFailed { exit_code });
        }
        Ok(container)
    }

    fn stage_packages(&self, recipe: &Recipe, format: PackageFormat) -> Result<Vec<StagedPackage>> {
        recipe
            .packages()
            .into_iter()
            .map(|decl| StagedPackage::new(decl, format))
            .collect()
    }

    /// Prepare and write every package; staging areas go away afterwards
    fn assemble(&self, mut packages: Vec<StagedPackage>) -> Result<Vec<PathBuf>> {
        assemble::check_outputs(&packages, &self.options.output_dir, self.options.overwrite)?;
        for package in &mut packages {
            assemble::prepare(package)?;
        }

        packages
            .iter()
            .map(|package| {
                assemble::write_package(package, &self.options.output_dir, self.options.overwrite)
            })
            .collect()
    }
}

/// Load and lint a recipe file
pub fn prepare(recipe_path: &Path) -> Result<Recipe> {
    let recipe = parse_recipe_file(recipe_path)?;
    let problems = lint_recipe(&recipe);
    if !problems.is_empty() {
        for problem in &problems {
            error!("{}", problem);
        }
        return Err(Error::Lint(problems));
    }
    Ok(recipe)
}

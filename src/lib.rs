// src/lib.rs

//! fry: cook deb and rpm packages inside a container engine
//!
//! A recipe declares build steps and the files that make up each package.
//! fry builds an image on top of a base image, runs the steps in a
//! container, copies the declared files out and writes the packages in the
//! base image's native format.
//!
//! # Architecture
//!
//! - Engine: blocking HTTP client for the Docker API behind the `Engine` trait
//! - Streams: attach demultiplexing and build progress parsing
//! - Archive: lazily generated, deterministic tar build contexts
//! - Cache: content-addressed source images keyed by base image and inputs
//! - Kitchen: the stage-by-stage cook, with containers cleaned up by guards

pub mod archive;
pub mod cache;
pub mod config;
pub mod detector;
pub mod dockerfile;
pub mod engine;
mod error;
pub mod kitchen;
pub mod package;
pub mod recipe;
pub mod stream;

pub use cache::CacheKey;
pub use config::{FryConfig, UpdatePolicy};
pub use detector::{Flavour, Variables};
pub use engine::{DockerEngine, Endpoint, Engine};
pub use error::{Error, Result};
pub use kitchen::{CookOptions, CookResult, Kitchen};
pub use package::{PackageFormat, StagedPackage};
pub use recipe::Recipe;

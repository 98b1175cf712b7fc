// src/cache.rs

//! Content-addressed cache keys for source images
//!
//! The source image only depends on the base image and the declared build
//! inputs. Hashing both gives a key that is stable across runs and hosts, so
//! an image tagged with it can be reused instead of rebuilt.
//!
//! Every field is written as a label followed by a length-prefixed value,
//! which keeps field boundaries unambiguous. File modification times are
//! never part of the key.

use crate::error::Result;
use crate::recipe::format::Recipe;
use crate::recipe::source::BuildSource;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use tracing::debug;

/// Repository used for cache tags
pub const CACHE_REPOSITORY: &str = "fry";

/// Hex digits of the key used in the tag
const TAG_LENGTH: usize = 31;

/// Bumped whenever the source image layout changes
const KEY_FORMAT: &str = "fry-cache-v1";

/// SHA-256 over a base image id and a recipe's build inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey(String);

impl CacheKey {
    /// Compute the key for `base_image_id` and the inputs of `recipe`
    ///
    /// Source file contents are streamed through the hasher, so large inputs
    /// are never held in memory.
    pub fn compute(base_image_id: &str, recipe: &Recipe, source: &BuildSource) -> Result<Self> {
        let mut hasher = FieldHasher::new();
        hasher.field("format", KEY_FORMAT.as_bytes());
        hasher.field("base", base_image_id.as_bytes());

        for file in source.files() {
            hasher.field("file", file.relative.as_bytes());
            hasher.field("exec", if file.executable { b"1" } else { b"0" });
            hasher.stream_file(&mut File::open(&file.path)?)?;
        }

        for dep in &recipe.build.depends {
            hasher.field("depends", dep.as_bytes());
        }
        for step in &recipe.build.steps {
            hasher.field("step", step.as_bytes());
        }
        for (key, value) in &recipe.build.environment {
            hasher.field("env", key.as_bytes());
            hasher.field("env-value", value.as_bytes());
        }
        for (key, value) in &recipe.variables {
            hasher.field("var", key.as_bytes());
            hasher.field("var-value", value.as_bytes());
        }

        let key = CacheKey(hex::encode(hasher.finish()));
        debug!(
            "Cache key for {} on {}: {} ({} source files)",
            recipe.package.name,
            base_image_id,
            key.as_str(),
            source.files().len()
        );
        Ok(key)
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Image tag for this key: `fry:<first 31 hex digits>`
    pub fn tag(&self) -> String {
        format!("{}:{}", CACHE_REPOSITORY, &self.0[..TAG_LENGTH])
    }
}

/// Writes labelled, length-prefixed fields into a SHA-256 state
struct FieldHasher {
    inner: Sha256,
}

impl FieldHasher {
    fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    fn prefix(&mut self, label: &str, len: u64) {
        self.inner.update((label.len() as u64).to_be_bytes());
        self.inner.update(label.as_bytes());
        self.inner.update(len.to_be_bytes());
    }

    fn field(&mut self, label: &str, value: &[u8]) {
        self.prefix(label, value.len() as u64);
        self.inner.update(value);
    }

    /// Hash a file's content as a `content` field
    fn stream_file(&mut self, file: &mut File) -> Result<()> {
        let len = file.metadata()?.len();
        self.prefix("content", len);

        let copied = io::copy(&mut file.take(len), &mut self.inner)?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "source file shrank while hashing",
            )
            .into());
        }
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.inner.finalize().to_vec()
    }
}

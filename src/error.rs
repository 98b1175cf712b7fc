// src/error.rs

//! Error types for fry

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while cooking a package
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid flag value or configuration file
    #[error("configuration error: {0}")]
    Config(String),

    /// The recipe file does not exist
    #[error("recipe not found: {}", .0.display())]
    RecipeNotFound(PathBuf),

    /// The recipe file could not be parsed
    #[error("invalid recipe: {0}")]
    Parse(String),

    /// The recipe parsed but has content problems
    #[error("recipe has {} problem(s): {}", .0.len(), .0.join("; "))]
    Lint(Vec<String>),

    /// Malformed attach stream (bad stream tag, short read mid-frame)
    #[error("malformed attach stream: {0}")]
    Protocol(String),

    /// The image build finished without reporting an image id
    #[error("no build image found in the output{}", .last_error.as_ref().map(|e| format!(" (last error: {})", e)).unwrap_or_default())]
    NoBuildImage { last_error: Option<String> },

    /// The build container exited with a non-zero status
    #[error("build failed with exit code {exit_code}")]
    BuildFailed { exit_code: i64 },

    /// The engine does not know the image
    #[error("Image \"{0}\" not found")]
    ImageNotFound(String),

    /// The engine does not know the container
    #[error("container {0} not found")]
    ContainerNotFound(String),

    /// A path could not be read from a container
    #[error("file {path} not found in container {container}")]
    FileNotFound { container: String, path: String },

    /// Any other engine failure, with the operation that triggered it
    #[error("engine error during {operation}{}: {message}", .status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Engine {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    /// The detected OS flavour has no package format
    #[error("cannot auto-detect package type for flavour {0:?}")]
    UnsupportedFlavour(Option<String>),

    /// Package assembly or serialization failed
    #[error("package error: {0}")]
    Package(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build an engine error for the given operation
    pub fn engine(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Exit code carried by a failed build, if any
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            Self::BuildFailed { exit_code } => Some(*exit_code),
            _ => None,
        }
    }
}

// src/engine/mod.rs

//! Container engine interface
//!
//! Every stage of a cook talks to the container engine through the [`Engine`]
//! trait. [`docker::DockerEngine`] implements it over the Docker HTTP API;
//! tests substitute an in-memory fake.
//!
//! Streaming responses (build progress, attach output, archives) are not
//! returned as values. The caller passes a [`ResponseConsumer`] that reads the
//! body while it is still arriving, so large responses never sit in memory.

pub mod docker;
pub mod http;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::{debug, info, warn};

pub use docker::{DockerEngine, Endpoint};

/// Receives a streaming response body
pub trait ResponseConsumer {
    /// Read `body` until it ends
    fn consume(&mut self, body: &mut dyn Read) -> Result<()>;
}

impl<F> ResponseConsumer for F
where
    F: FnMut(&mut dyn Read) -> Result<()>,
{
    fn consume(&mut self, body: &mut dyn Read) -> Result<()> {
        self(body)
    }
}

/// Subset of an image inspection that fry needs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageInfo {
    /// Content-addressed image id (`sha256:...`)
    #[serde(rename = "Id", alias = "id")]
    pub id: String,
}

/// Parameters for an image build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Name of the dockerfile inside the uploaded context
    pub dockerfile: String,
    /// Tag to apply to the resulting image
    pub tag: Option<String>,
    /// Remove intermediate containers after a successful build
    pub remove_intermediate: bool,
}

impl BuildOptions {
    pub fn new(dockerfile: impl Into<String>) -> Self {
        Self {
            dockerfile: dockerfile.into(),
            tag: None,
            remove_intermediate: true,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Container creation request body
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
}

impl ContainerConfig {
    /// Non-TTY container with stdout and stderr attachable
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            attach_stdout: true,
            attach_stderr: true,
            ..Default::default()
        }
    }
}

/// Kind of filesystem change reported for a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modified,
    Added,
    Deleted,
}

impl ChangeKind {
    /// Decode the numeric kind used by the engine API
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Modified),
            1 => Some(Self::Added),
            2 => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// One entry of a container's filesystem diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
}

impl Change {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Operations fry needs from a container engine
pub trait Engine {
    /// Inspect an image by name or id; `None` if the engine does not know it
    fn inspect_image(&self, name: &str) -> Result<Option<ImageInfo>>;

    /// Build an image from a tar context, streaming the progress response
    fn build_image(
        &self,
        options: &BuildOptions,
        context: &mut dyn Read,
        consumer: &mut dyn ResponseConsumer,
    ) -> Result<()>;

    /// Create a container, returning its id
    fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    fn start_container(&self, id: &str) -> Result<()>;

    /// Attach to stdout/stderr and stream the multiplexed output until exit
    fn attach_container(&self, id: &str, consumer: &mut dyn ResponseConsumer) -> Result<()>;

    /// Block until the container exits, returning its status code
    fn wait_container(&self, id: &str) -> Result<i64>;

    fn remove_container(&self, id: &str) -> Result<()>;

    /// Filesystem changes relative to the container's image
    fn container_changes(&self, id: &str) -> Result<Vec<Change>>;

    /// Stream a path out of a container as a tar archive
    fn read_archive(&self, id: &str, path: &str, consumer: &mut dyn ResponseConsumer)
    -> Result<()>;
}

/// Look up an image that must exist
pub fn resolve_image(engine: &dyn Engine, name: &str) -> Result<ImageInfo> {
    let info = engine
        .inspect_image(name)?
        .ok_or_else(|| Error::ImageNotFound(name.to_string()))?;
    debug!("Resolved image {} to {}", name, info.id);
    Ok(info)
}

/// Read a single regular file out of a container
pub fn read_file(engine: &dyn Engine, container: &str, path: &str) -> Result<Vec<u8>> {
    let mut content = None;
    engine.read_archive(container, path, &mut |body: &mut dyn Read| -> Result<()> {
        let mut archive = tar::Archive::new(body);
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_file() {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                content = Some(data);
                break;
            }
        }
        Ok(())
    })?;

    content.ok_or_else(|| Error::FileNotFound {
        container: container.to_string(),
        path: path.to_string(),
    })
}

/// Name and type of an archive member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub is_dir: bool,
}

/// List the members of the archive for `path`
///
/// Names are relative to the parent of `path`, so reading `/var/lib/apt/lists`
/// yields `lists/`, `lists/partial/` and so on.
pub fn list_entries(engine: &dyn Engine, container: &str, path: &str) -> Result<Vec<EntryInfo>> {
    let mut entries = Vec::new();
    engine.read_archive(container, path, &mut |body: &mut dyn Read| -> Result<()> {
        let mut archive = tar::Archive::new(body);
        for entry in archive.entries()? {
            let entry = entry?;
            entries.push(EntryInfo {
                name: entry.path()?.to_string_lossy().to_string(),
                is_dir: entry.header().entry_type().is_dir(),
            });
        }
        Ok(())
    })?;
    Ok(entries)
}

/// Removes a container when dropped
///
/// Dropping runs on every exit path, so a failed build still cleans up. With
/// `keep` set the container is left behind for inspection.
pub struct ContainerGuard<'a> {
    engine: &'a dyn Engine,
    id: String,
    keep: bool,
}

impl<'a> ContainerGuard<'a> {
    pub fn new(engine: &'a dyn Engine, id: String, keep: bool) -> Self {
        Self { engine, id, keep }
    }

    /// Create a container and guard it in one step
    pub fn create(engine: &'a dyn Engine, config: &ContainerConfig, keep: bool) -> Result<Self> {
        let id = engine.create_container(config)?;
        debug!("Created container {} from {}", id, config.image);
        Ok(Self::new(engine, id, keep))
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        if self.keep {
            info!("Keeping container {}", self.id);
            return;
        }
        match self.engine.remove_container(&self.id) {
            Ok(()) => debug!("Removed container {}", self.id),
            Err(e) => warn!("Failed to remove container {}: {}", self.id, e),
        }
    }
}

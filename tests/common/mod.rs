// tests/common/mod.rs

//! Shared test utilities for integration tests.
//!
//! [`FakeEngine`] is an in-memory container engine: images are a name map,
//! builds answer with canned progress messages, and every container sees the
//! same filesystem of registered files.

#![allow(dead_code)]

use fry::Result;
use fry::engine::{
    BuildOptions, Change, ChangeKind, ContainerConfig, Engine, ImageInfo, ResponseConsumer,
};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

pub const BASE_ID: &str = "sha256:b45eb45eb45eb45eb45eb45eb45eb45eb45eb45eb45eb45eb45eb45eb45eb45e";

/// An image build as the engine saw it
#[derive(Debug, Clone)]
pub struct BuildRecord {
    pub tag: Option<String>,
    pub dockerfile: String,
    /// Member names of the uploaded context
    pub context: Vec<String>,
}

#[derive(Default)]
struct State {
    images: HashMap<String, String>,
    builds: Vec<BuildRecord>,
    containers: BTreeMap<String, String>,
    /// Every container ever created, with its image
    history: BTreeMap<String, String>,
    created: Vec<String>,
    started: Vec<String>,
    removed: Vec<String>,
}

pub struct FakeEngine {
    state: Mutex<State>,
    /// Path -> (content, mode) visible in every container
    files: BTreeMap<String, (Vec<u8>, u32)>,
    changes: Vec<Change>,
    attach: Vec<u8>,
    exit_code: i64,
    /// Untagged builds report an error instead of an image id
    broken_build: bool,
    /// Paths whose archive read fails with an engine error
    unreadable: Vec<String>,
    failing_changes: bool,
}

impl FakeEngine {
    /// A Debian bookworm base image known as `debian:bookworm`
    pub fn debian() -> Self {
        Self::bare("debian:bookworm")
            .with_file("/etc/debian_version", "12.5\n", 0o644)
            .with_file(
                "/etc/os-release",
                "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nVERSION_CODENAME=bookworm\n",
                0o644,
            )
    }

    /// A Fedora 40 base image known as `fedora:40`
    pub fn fedora() -> Self {
        Self::bare("fedora:40").with_file(
            "/etc/redhat-release",
            "Fedora release 40 (Forty)\n",
            0o644,
        )
    }

    /// A base image without any release files
    pub fn bare(name: &str) -> Self {
        let mut state = State::default();
        state.images.insert(name.to_string(), BASE_ID.to_string());
        state.images.insert(BASE_ID.to_string(), BASE_ID.to_string());
        Self {
            state: Mutex::new(state),
            files: BTreeMap::new(),
            changes: Vec::new(),
            attach: Vec::new(),
            exit_code: 0,
            broken_build: false,
            unreadable: Vec::new(),
            failing_changes: false,
        }
    }

    pub fn with_file(mut self, path: &str, content: &str, mode: u32) -> Self {
        self.files
            .insert(path.to_string(), (content.as_bytes().to_vec(), mode));
        self
    }

    /// Register a file the build creates, plus its change entry
    pub fn with_built_file(mut self, path: &str, content: &str, mode: u32) -> Self {
        self = self.with_file(path, content, mode);
        self.changes.push(Change::new(path, ChangeKind::Added));
        self
    }

    pub fn with_change(mut self, path: &str, kind: ChangeKind) -> Self {
        self.changes.push(Change::new(path, kind));
        self
    }

    /// Append a multiplexed frame to the attach output
    pub fn with_output(mut self, stream: u8, text: &str) -> Self {
        self.attach.extend_from_slice(&[stream, 0, 0, 0]);
        self.attach
            .extend_from_slice(&(text.len() as u32).to_be_bytes());
        self.attach.extend_from_slice(text.as_bytes());
        self
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_broken_build(mut self) -> Self {
        self.broken_build = true;
        self
    }

    /// Make the attach stream end in a frame with an unknown stream tag
    pub fn with_malformed_attach(mut self) -> Self {
        self.attach.extend_from_slice(&[7, 0, 0, 0, 0, 0, 0, 3]);
        self.attach.extend_from_slice(b"bad");
        self
    }

    pub fn with_unreadable(mut self, path: &str) -> Self {
        self.unreadable.push(path.to_string());
        self
    }

    pub fn with_failing_changes(mut self) -> Self {
        self.failing_changes = true;
        self
    }

    pub fn builds(&self) -> Vec<BuildRecord> {
        self.state.lock().unwrap().builds.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    /// Containers that still exist
    pub fn live_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    /// Image a container was created from
    pub fn image_of(&self, container: &str) -> Option<String> {
        self.state.lock().unwrap().history.get(container).cloned()
    }

    fn archive(&self, path: &str) -> Option<Vec<u8>> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let mut builder = tar::Builder::new(Vec::new());

        if let Some((content, mode)) = self.files.get(path) {
            append(&mut builder, name, tar::EntryType::Regular, *mode, content);
        } else {
            let prefix = format!("{}/", path);
            let children: Vec<_> = self
                .files
                .iter()
                .filter(|(p, _)| p.starts_with(&prefix))
                .collect();
            if children.is_empty() {
                return None;
            }
            append(&mut builder, &format!("{}/", name), tar::EntryType::Directory, 0o755, b"");
            for (child, (content, mode)) in children {
                let member = format!("{}/{}", name, &child[prefix.len()..]);
                append(&mut builder, &member, tar::EntryType::Regular, *mode, content);
            }
        }

        builder.into_inner().ok()
    }
}

fn append(
    builder: &mut tar::Builder<Vec<u8>>,
    name: &str,
    kind: tar::EntryType,
    mode: u32,
    content: &[u8],
) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, name, content).unwrap();
}

fn engine_error(operation: &str) -> fry::Error {
    fry::Error::Engine {
        operation: operation.to_string(),
        status: Some(500),
        message: "server error".to_string(),
    }
}

/// Read a build context, returning its member names and the dockerfile
fn read_context(context: &mut dyn Read, dockerfile: &str) -> (Vec<String>, String) {
    let mut names = Vec::new();
    let mut text = String::new();
    let mut archive = tar::Archive::new(context);
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().to_string();
        if name == dockerfile {
            entry.read_to_string(&mut text).unwrap();
        }
        names.push(name);
    }
    (names, text)
}

impl Engine for FakeEngine {
    fn inspect_image(&self, name: &str) -> Result<Option<ImageInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .get(name)
            .map(|id| ImageInfo { id: id.clone() }))
    }

    fn build_image(
        &self,
        options: &BuildOptions,
        context: &mut dyn Read,
        consumer: &mut dyn ResponseConsumer,
    ) -> Result<()> {
        let (names, dockerfile) = read_context(context, &options.dockerfile);

        let body = {
            let mut state = self.state.lock().unwrap();
            let number = state.builds.len() + 1;
            state.builds.push(BuildRecord {
                tag: options.tag.clone(),
                dockerfile,
                context: names,
            });

            if self.broken_build && options.tag.is_none() {
                concat!(
                    "{\"stream\":\"Step 1/4 : FROM fry\\n\"}\r\n",
                    "{\"errorDetail\":{\"message\":\"The command returned a non-zero code: 100\"},",
                    "\"error\":\"The command returned a non-zero code: 100\"}\r\n"
                )
                .to_string()
            } else {
                let short = format!("{:012x}", 0xb0_0000 + number);
                let id = format!("sha256:{}{}", short, "0".repeat(52));
                state.images.insert(id.clone(), id.clone());
                state.images.insert(short.clone(), id.clone());
                if let Some(tag) = &options.tag {
                    state.images.insert(tag.clone(), id.clone());
                }
                format!(
                    "{{\"stream\":\"Step 1/2 : FROM base\\n\"}}\r\n{{\"aux\":{{\"ID\":\"{}\"}}}}\r\n{{\"stream\":\"Successfully built {}\\n\"}}\r\n",
                    id, short
                )
            }
        };

        consumer.consume(&mut Cursor::new(body.into_bytes()))
    }

    fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if !state.images.contains_key(&config.image) {
            return Err(fry::Error::ImageNotFound(config.image.clone()));
        }
        let id = format!("container-{}", state.created.len() + 1);
        state.containers.insert(id.clone(), config.image.clone());
        state.history.insert(id.clone(), config.image.clone());
        state.created.push(id.clone());
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.state.lock().unwrap().started.push(id.to_string());
        Ok(())
    }

    fn attach_container(&self, _id: &str, consumer: &mut dyn ResponseConsumer) -> Result<()> {
        consumer.consume(&mut Cursor::new(self.attach.clone()))
    }

    fn wait_container(&self, _id: &str) -> Result<i64> {
        Ok(self.exit_code)
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.containers.remove(id).is_none() {
            return Err(fry::Error::ContainerNotFound(id.to_string()));
        }
        state.removed.push(id.to_string());
        Ok(())
    }

    fn container_changes(&self, _id: &str) -> Result<Vec<Change>> {
        if self.failing_changes {
            return Err(engine_error("container changes"));
        }
        Ok(self.changes.clone())
    }

    fn read_archive(
        &self,
        id: &str,
        path: &str,
        consumer: &mut dyn ResponseConsumer,
    ) -> Result<()> {
        if self.unreadable.iter().any(|p| p == path) {
            return Err(engine_error("read archive"));
        }
        match self.archive(path) {
            Some(data) => consumer.consume(&mut Cursor::new(data)),
            None => Err(fry::Error::FileNotFound {
                container: id.to_string(),
                path: path.to_string(),
            }),
        }
    }
}

/// A recipe file in a fresh directory, with an output directory beside it
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new(recipe: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("recipe.toml"), recipe).unwrap();
        Self { dir }
    }

    pub fn recipe(&self) -> PathBuf {
        self.dir.path().join("recipe.toml")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// Member paths of a deb's data.tar.gz, without the leading `./`
pub fn deb_data_paths(path: &Path) -> Vec<String> {
    let mut archive = ar::Archive::new(fs::File::open(path).unwrap());
    while let Some(entry) = archive.next_entry() {
        let entry = entry.unwrap();
        if entry.header().identifier() == b"data.tar.gz" {
            let mut data = tar::Archive::new(flate2::read::GzDecoder::new(entry));
            return data
                .entries()
                .unwrap()
                .map(|e| {
                    let e = e.unwrap();
                    e.path()
                        .unwrap()
                        .to_string_lossy()
                        .trim_start_matches("./")
                        .trim_end_matches('/')
                        .to_string()
                })
                .filter(|p| !p.is_empty() && p != ".")
                .collect();
        }
    }
    panic!("no data.tar.gz in {}", path.display());
}

/// Content of a deb's control.tar.gz member `name`
pub fn deb_control_file(path: &Path, name: &str) -> Option<String> {
    let mut archive = ar::Archive::new(fs::File::open(path).unwrap());
    while let Some(entry) = archive.next_entry() {
        let entry = entry.unwrap();
        if entry.header().identifier() == b"control.tar.gz" {
            let mut control = tar::Archive::new(flate2::read::GzDecoder::new(entry));
            for e in control.entries().unwrap() {
                let mut e = e.unwrap();
                let member = e.path().unwrap().to_string_lossy().to_string();
                if member.trim_start_matches("./") == name {
                    let mut text = String::new();
                    e.read_to_string(&mut text).unwrap();
                    return Some(text);
                }
            }
            return None;
        }
    }
    None
}

/// Sink for build output in tests that do not inspect it
pub fn sink() -> io::Sink {
    io::sink()
}

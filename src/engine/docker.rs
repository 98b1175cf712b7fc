// src/engine/docker.rs

//! Docker Engine API client
//!
//! Talks to the engine over its Unix socket (the default) or plain TCP. Each
//! call opens a fresh connection, which keeps streaming responses simple: the
//! attach stream is just the remainder of the connection.

use super::http::{Body, Response};
use super::{
    BuildOptions, Change, ChangeKind, ContainerConfig, Engine, ImageInfo, ResponseConsumer,
};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, trace};

/// Default engine socket
pub const DEFAULT_ENDPOINT: &str = "unix:///var/run/docker.sock";

/// API version prefix sent with every request
pub const API_VERSION: &str = "v1.41";

/// Where the engine listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    /// `host:port`
    Tcp(String),
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::Unix(PathBuf::from("/var/run/docker.sock"))
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let url = url::Url::parse(s)
            .map_err(|e| Error::Config(format!("invalid engine endpoint {:?}: {}", s, e)))?;

        match url.scheme() {
            "unix" => {
                if url.path().is_empty() || url.path() == "/" {
                    return Err(Error::Config(format!("engine endpoint {:?} has no socket path", s)));
                }
                Ok(Self::Unix(PathBuf::from(url.path())))
            }
            "tcp" | "http" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| Error::Config(format!("engine endpoint {:?} has no host", s)))?;
                let port = url.port().unwrap_or(2375);
                Ok(Self::Tcp(format!("{}:{}", host, port)))
            }
            other => Err(Error::Config(format!(
                "unsupported engine endpoint scheme {:?} (expected unix or tcp)",
                other
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Bidirectional engine connection
trait Connection: Read + Write {}

impl<T: Read + Write> Connection for T {}

/// [`Engine`] over the Docker HTTP API
#[derive(Debug, Clone)]
pub struct DockerEngine {
    endpoint: Endpoint,
    timeout: Option<Duration>,
}

#[derive(Deserialize)]
struct CreateResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Deserialize)]
struct WaitResponse {
    #[serde(rename = "StatusCode")]
    status_code: i64,
}

#[derive(Deserialize)]
struct RawChange {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Kind")]
    kind: u8,
}

impl DockerEngine {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: None,
        }
    }

    /// Apply read/write timeouts to every connection
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn connect(&self) -> Result<Box<dyn Connection>> {
        let connect_error =
            |e: std::io::Error| Error::engine("connect", format!("{}: {}", self.endpoint, e));

        match &self.endpoint {
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).map_err(connect_error)?;
                stream.set_read_timeout(self.timeout)?;
                stream.set_write_timeout(self.timeout)?;
                Ok(Box::new(stream))
            }
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).map_err(connect_error)?;
                stream.set_read_timeout(self.timeout)?;
                stream.set_write_timeout(self.timeout)?;
                Ok(Box::new(stream))
            }
        }
    }

    fn call(
        &self,
        method: &str,
        path: &str,
        body: Body<'_>,
    ) -> Result<Response<Box<dyn Connection>>> {
        let full_path = format!("/{}{}", API_VERSION, path);
        trace!("{} {}", method, full_path);

        let mut stream = self.connect()?;
        super::http::send_request(&mut stream, method, &full_path, body)?;
        let response = Response::read_from(stream)?;
        debug!("{} {} -> {}", method, full_path, response.status);
        Ok(response)
    }

    fn expect_success(
        response: Response<Box<dyn Connection>>,
        operation: &str,
    ) -> Result<Response<Box<dyn Connection>>> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(response.into_error(operation))
        }
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new(Endpoint::default())
    }
}

/// Encode query parameters
fn query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Build endpoint path for `options`
pub fn build_path(options: &BuildOptions) -> String {
    let mut pairs = vec![
        ("rm", if options.remove_intermediate { "1" } else { "0" }),
        ("dockerfile", options.dockerfile.as_str()),
    ];
    if let Some(tag) = &options.tag {
        pairs.push(("t", tag.as_str()));
    }
    format!("/build?{}", query(&pairs))
}

impl Engine for DockerEngine {
    fn inspect_image(&self, name: &str) -> Result<Option<ImageInfo>> {
        let response = self.call("GET", &format!("/images/{}/json", name), Body::Empty)?;
        if response.status == 404 {
            return Ok(None);
        }
        Self::expect_success(response, "inspect image")?
            .json()
            .map(Some)
    }

    fn build_image(
        &self,
        options: &BuildOptions,
        context: &mut dyn Read,
        consumer: &mut dyn ResponseConsumer,
    ) -> Result<()> {
        let body = Body::Stream {
            content_type: "application/x-tar",
            reader: context,
        };
        let mut response =
            Self::expect_success(self.call("POST", &build_path(options), body)?, "build image")?;
        consumer.consume(response.body())
    }

    fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        let body = Body::Json(serde_json::to_vec(config)?);
        let response = self.call("POST", "/containers/create", body)?;
        if response.status == 404 {
            return Err(Error::ImageNotFound(config.image.clone()));
        }
        let created: CreateResponse =
            Self::expect_success(response, "create container")?.json()?;
        Ok(created.id)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        let response = self.call("POST", &format!("/containers/{}/start", id), Body::Empty)?;
        match response.status {
            // 304: already started
            304 => Ok(()),
            404 => Err(Error::ContainerNotFound(id.to_string())),
            _ => Self::expect_success(response, "start container").map(|_| ()),
        }
    }

    fn attach_container(&self, id: &str, consumer: &mut dyn ResponseConsumer) -> Result<()> {
        let path = format!(
            "/containers/{}/attach?{}",
            id,
            // logs=1 replays output written between start and attach
            query(&[("logs", "1"), ("stderr", "1"), ("stdout", "1"), ("stream", "1")])
        );
        let response = self.call("POST", &path, Body::Empty)?;
        if response.status == 404 {
            return Err(Error::ContainerNotFound(id.to_string()));
        }
        let mut response = Self::expect_success(response, "attach container")?;
        consumer.consume(response.body())
    }

    fn wait_container(&self, id: &str) -> Result<i64> {
        let response = self.call("POST", &format!("/containers/{}/wait", id), Body::Empty)?;
        if response.status == 404 {
            return Err(Error::ContainerNotFound(id.to_string()));
        }
        let waited: WaitResponse = Self::expect_success(response, "wait container")?.json()?;
        Ok(waited.status_code)
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        let path = format!("/containers/{}?{}", id, query(&[("v", "1"), ("force", "1")]));
        let response = self.call("DELETE", &path, Body::Empty)?;
        if response.status == 404 {
            return Err(Error::ContainerNotFound(id.to_string()));
        }
        Self::expect_success(response, "remove container").map(|_| ())
    }

    fn container_changes(&self, id: &str) -> Result<Vec<Change>> {
        let response = self.call("GET", &format!("/containers/{}/changes", id), Body::Empty)?;
        if response.status == 404 {
            return Err(Error::ContainerNotFound(id.to_string()));
        }
        // The engine answers `null` when nothing changed
        let raw: Option<Vec<RawChange>> =
            Self::expect_success(response, "list container changes")?.json()?;

        let mut changes = Vec::new();
        for change in raw.unwrap_or_default() {
            match ChangeKind::from_code(change.kind) {
                Some(kind) => changes.push(Change::new(change.path, kind)),
                None => debug!("Ignoring change {} of unknown kind {}", change.path, change.kind),
            }
        }
        Ok(changes)
    }

    fn read_archive(
        &self,
        id: &str,
        path: &str,
        consumer: &mut dyn ResponseConsumer,
    ) -> Result<()> {
        let full = format!("/containers/{}/archive?{}", id, query(&[("path", path)]));
        let response = self.call("GET", &full, Body::Empty)?;
        if response.status == 404 {
            return Err(Error::FileNotFound {
                container: id.to_string(),
                path: path.to_string(),
            });
        }
        let mut response = Self::expect_success(response, "read archive")?;
        consumer.consume(response.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::io::BufReader;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::TempDir;

    /// Serve one canned response per accepted connection, returning the
    /// request lines seen
    fn serve(
        dir: &TempDir,
        responses: Vec<&'static str>,
    ) -> (Endpoint, thread::JoinHandle<Vec<String>>) {
        let socket = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for canned in responses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream);
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                seen.push(request_line.trim_end().to_string());
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line.trim_end().is_empty() {
                        break;
                    }
                }
                let mut stream = reader.into_inner();
                stream.write_all(canned.as_bytes()).unwrap();
            }
            seen
        });
        (Endpoint::Unix(socket), handle)
    }

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(
            DEFAULT_ENDPOINT.parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert_eq!(
            "tcp://127.0.0.1:2376".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:2376".to_string())
        );
        assert_eq!(
            "tcp://docker".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("docker:2375".to_string())
        );
        assert!(matches!(
            "ssh://host".parse::<Endpoint>(),
            Err(Error::Config(_))
        ));
        assert!("not a url".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_display_round_trips() {
        let endpoint: Endpoint = "unix:///run/user/1000/docker.sock".parse().unwrap();
        assert_eq!(endpoint.to_string(), "unix:///run/user/1000/docker.sock");
    }

    #[test]
    fn test_build_path() {
        let options = BuildOptions::new("Dockerfile.fry").with_tag("fry:0123");
        assert_eq!(
            build_path(&options),
            "/build?rm=1&dockerfile=Dockerfile.fry&t=fry%3A0123"
        );
        assert_eq!(
            build_path(&BuildOptions::new("Dockerfile.fry")),
            "/build?rm=1&dockerfile=Dockerfile.fry"
        );
    }

    #[test]
    fn test_inspect_missing_image_is_none() {
        let dir = TempDir::new().unwrap();
        let (endpoint, server) = serve(
            &dir,
            vec![
                "HTTP/1.1 404 Not Found\r\nContent-Length: 2\r\n\r\n{}",
                "HTTP/1.1 200 OK\r\nContent-Length: 20\r\n\r\n{\"Id\":\"sha256:abcd\"}",
            ],
        );
        let engine = DockerEngine::new(endpoint);

        assert_eq!(engine.inspect_image("fry:missing").unwrap(), None);
        assert_eq!(
            engine.inspect_image("debian:bookworm").unwrap(),
            Some(ImageInfo {
                id: "sha256:abcd".to_string()
            })
        );

        let seen = server.join().unwrap();
        assert_eq!(seen[0], "GET /v1.41/images/fry:missing/json HTTP/1.1");
        assert_eq!(seen[1], "GET /v1.41/images/debian:bookworm/json HTTP/1.1");
    }

    #[test]
    fn test_wait_and_changes() {
        let dir = TempDir::new().unwrap();
        let (endpoint, server) = serve(
            &dir,
            vec![
                "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n10\r\n{\"StatusCode\":3}\r\n0\r\n\r\n",
                "HTTP/1.1 200 OK\r\nContent-Length: 58\r\n\r\n[{\"Path\":\"/usr\",\"Kind\":0},{\"Path\":\"/usr/bin/hi\",\"Kind\":1}]",
                "HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nnull",
            ],
        );
        let engine = DockerEngine::new(endpoint);

        assert_eq!(engine.wait_container("c1").unwrap(), 3);
        assert_eq!(
            engine.container_changes("c1").unwrap(),
            vec![
                Change::new("/usr", ChangeKind::Modified),
                Change::new("/usr/bin/hi", ChangeKind::Added),
            ]
        );
        assert!(engine.container_changes("c1").unwrap().is_empty());

        let seen = server.join().unwrap();
        assert_eq!(seen[0], "POST /v1.41/containers/c1/wait HTTP/1.1");
        assert_eq!(seen[1], "GET /v1.41/containers/c1/changes HTTP/1.1");
    }

    #[test]
    fn test_unreachable_endpoint_is_engine_error() {
        let dir = TempDir::new().unwrap();
        let engine = DockerEngine::new(Endpoint::Unix(dir.path().join("nothing.sock")));
        let err = engine.inspect_image("debian").unwrap_err();
        assert!(matches!(err, Error::Engine { ref operation, .. } if operation == "connect"));
    }
}

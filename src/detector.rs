// src/detector.rs

//! Operating system detection for base images
//!
//! A throwaway container is created from the image (never started) and its
//! release files are read through the archive endpoint. The result decides
//! the package format and feeds recipe variable substitution.

use crate::engine::{ContainerConfig, ContainerGuard, Engine, read_file};
use crate::error::{Error, Result};
use crate::package::PackageFormat;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

/// `<Name> [Linux] release <version>`
static REDHAT_RELEASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>\S+)(?:\s+\S+)*?\s+release\s+(?P<version>[0-9][0-9.]*)").unwrap()
});

/// Family of distributions sharing a package format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavour {
    Debian,
    Redhat,
}

impl Flavour {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Redhat => "redhat",
        }
    }

    /// Package format native to this flavour
    pub fn package_format(&self) -> PackageFormat {
        match self {
            Self::Debian => PackageFormat::Deb,
            Self::Redhat => PackageFormat::Rpm,
        }
    }

    /// Flavour of a known distribution name
    pub fn for_distribution(distribution: &str) -> Option<Self> {
        match distribution {
            "debian" | "ubuntu" => Some(Self::Debian),
            "centos" | "redhat" | "fedora" | "rocky" | "almalinux" => Some(Self::Redhat),
            _ => None,
        }
    }
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was detected about an image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    pub distribution: Option<String>,
    pub version: Option<String>,
    pub codename: Option<String>,
    pub flavour: Option<Flavour>,
}

impl Variables {
    /// The package format for the detected flavour
    pub fn package_format(&self) -> Result<PackageFormat> {
        self.flavour
            .map(|flavour| flavour.package_format())
            .ok_or_else(|| Error::UnsupportedFlavour(self.distribution.clone()))
    }

    /// Substitution values: `distribution`, `distribution_version`, `codename`, `flavour`
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: Option<&str>| {
            if let Some(value) = value {
                map.insert(key.to_string(), value.to_string());
            }
        };
        put("distribution", self.distribution.as_deref());
        put("distribution_version", self.version.as_deref());
        put("codename", self.codename.as_deref());
        put("flavour", self.flavour.map(|f| f.as_str()));
        map
    }
}

/// `KEY=value` pairs of a shell-style release file, quotes stripped
fn key_values(content: &str) -> BTreeMap<&str, &str> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim().trim_matches('"')))
        .collect()
}

/// `(DISTRIB_ID, DISTRIB_RELEASE, DISTRIB_CODENAME)` of an `/etc/lsb-release`
pub fn parse_lsb_release(content: &str) -> (Option<String>, Option<String>, Option<String>) {
    let values = key_values(content);
    let get = |key: &str| values.get(key).filter(|v| !v.is_empty()).map(|v| v.to_string());
    (
        get("DISTRIB_ID").map(|id| id.to_lowercase()),
        get("DISTRIB_RELEASE"),
        get("DISTRIB_CODENAME"),
    )
}

/// Version from `/etc/debian_version`
pub fn parse_debian_version(content: &str) -> Option<String> {
    content
        .lines()
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `(distribution, version)` from `/etc/redhat-release`
pub fn parse_redhat_release(content: &str) -> Option<(String, String)> {
    let caps = REDHAT_RELEASE.captures(content.trim())?;
    let name = caps["name"].to_lowercase();
    let distribution = match name.as_str() {
        "red" => "redhat".to_string(),
        _ => name,
    };
    Some((distribution, caps["version"].to_string()))
}

/// `VERSION_CODENAME` from `/etc/os-release`
pub fn parse_os_release_codename(content: &str) -> Option<String> {
    key_values(content)
        .get("VERSION_CODENAME")
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// Release files found in an image
#[derive(Debug, Default)]
pub struct ReleaseFiles {
    pub lsb_release: Option<String>,
    pub debian_version: Option<String>,
    pub redhat_release: Option<String>,
    pub os_release: Option<String>,
}

impl ReleaseFiles {
    /// Interpret the files, preferring lsb-release, then debian_version,
    /// then redhat-release
    pub fn variables(&self) -> Variables {
        let mut vars = Variables::default();

        if let Some(lsb) = &self.lsb_release {
            let (id, release, codename) = parse_lsb_release(lsb);
            vars.distribution = id;
            vars.version = release;
            vars.codename = codename;
        }

        if vars.distribution.is_none()
            && let Some(version) = self.debian_version.as_deref().and_then(parse_debian_version)
        {
            vars.distribution = Some("debian".to_string());
            vars.version = Some(version);
        }

        if vars.distribution.is_none()
            && let Some((name, version)) =
                self.redhat_release.as_deref().and_then(parse_redhat_release)
        {
            vars.distribution = Some(name);
            vars.version = Some(version);
        }

        if vars.codename.is_none() {
            vars.codename = self.os_release.as_deref().and_then(parse_os_release_codename);
        }

        vars.flavour = vars
            .distribution
            .as_deref()
            .and_then(Flavour::for_distribution)
            .or(if self.debian_version.is_some() {
                Some(Flavour::Debian)
            } else if self.redhat_release.is_some() {
                Some(Flavour::Redhat)
            } else {
                None
            });

        vars
    }
}

/// Read a file from a container, treating a missing path as `None`
fn try_read(engine: &dyn Engine, container: &str, path: &str) -> Result<Option<String>> {
    match read_file(engine, container, path) {
        Ok(data) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
        Err(Error::FileNotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Detect the operating system of `image`
pub fn detect(engine: &dyn Engine, image: &str) -> Result<Variables> {
    let container = ContainerGuard::create(engine, &ContainerConfig::new(image), false)?;
    let id = container.id();

    let files = ReleaseFiles {
        lsb_release: try_read(engine, id, "/etc/lsb-release")?,
        debian_version: try_read(engine, id, "/etc/debian_version")?,
        redhat_release: try_read(engine, id, "/etc/redhat-release")?,
        os_release: try_read(engine, id, "/etc/os-release")?,
    };

    let vars = files.variables();
    debug!(
        "Detected {:?} {:?} ({:?}, flavour {:?}) in {}",
        vars.distribution, vars.version, vars.codename, vars.flavour, image
    );
    Ok(vars)
}

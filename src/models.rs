use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Specifiers that always mean "the newest version".
pub const LATEST: &str = "latest";
pub const ANY: &str = "*";

pub fn is_latest_specifier(specifier: &str) -> bool {
    let specifier = specifier.trim();
    specifier == LATEST || specifier == ANY
}

/// A GitShu version as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    pub tag: String,
    pub version: String,
    pub link: Option<PathBuf>,
    pub latest: bool,
    pub path: PathBuf,
}

impl VersionDescriptor {
    /// Label used when printing the descriptor, e.g. `beta (3.1.0)`
    pub fn label(&self) -> String {
        if self.tag == self.version {
            self.version.clone()
        } else {
            format!("{} ({})", self.tag, self.version)
        }
    }
}

/// Install metadata recorded for a version present under `versions/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    /// Tag or specifier the version was installed through
    pub tag: String,
    pub installed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkScope {
    Directory(PathBuf),
    Tag(String),
}

impl fmt::Display for LinkScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkScope::Directory(path) => write!(f, "{}", path.display()),
            LinkScope::Tag(tag) => write!(f, "{}", tag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub scope: LinkScope,
    pub version: String,
}

/// Persistent content of `registry.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryDocument {
    pub versions: BTreeMap<String, InstalledVersion>,
    pub latest: Option<String>,
    pub links: Vec<LinkEntry>,
}

impl RegistryDocument {
    pub fn recompute_latest(&mut self) {
        self.latest = pick_latest(self.versions.keys().map(String::as_str)).map(str::to_string);
    }
}

/// Versions and dist-tags published in the package registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableVersions {
    /// Sorted oldest to newest
    pub versions: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl AvailableVersions {
    /// Map a specifier onto a concrete published version.
    pub fn resolve(&self, specifier: &str) -> Option<String> {
        let specifier = specifier.trim();

        if is_latest_specifier(specifier) {
            return self
                .tags
                .get(LATEST)
                .cloned()
                .or_else(|| pick_latest(self.versions.iter().map(String::as_str)).map(str::to_string));
        }

        if let Some(version) = self.tags.get(specifier) {
            return Some(version.clone());
        }

        let exact = specifier.trim_start_matches('v');
        self.versions.iter().find(|v| v.as_str() == exact).cloned()
    }
}

/// A downloaded package ready to be unpacked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArtifact {
    pub version: String,
    pub archive: PathBuf,
}

/// Order version strings by semver precedence; invalid versions sort below
/// valid ones and compare lexically among themselves.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn is_stable(version: &str) -> bool {
    semver::Version::parse(version)
        .map(|v| v.pre.is_empty())
        .unwrap_or(false)
}

/// The newest stable version, or the newest of all when none is stable.
pub fn pick_latest<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let versions: Vec<&str> = versions.into_iter().collect();

    versions
        .iter()
        .copied()
        .filter(|v| is_stable(v))
        .max_by(|a, b| compare_versions(a, b))
        .or_else(|| versions.iter().copied().max_by(|a, b| compare_versions(a, b)))
}

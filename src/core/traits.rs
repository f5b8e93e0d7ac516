use crate::error::Result;
use crate::models::{AvailableVersions, PackageArtifact};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Keyword flags forwarded to a command, e.g. `--log=debug` → `{"log": "debug"}`
pub type Flags = BTreeMap<String, serde_json::Value>;

/// Source of published GitShu versions
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// List published versions and dist-tags
    async fn list_available(&self) -> Result<AvailableVersions>;

    /// Download the package for an exact version
    async fn fetch_package(&self, version: &str) -> Result<PackageArtifact>;
}

/// Turns a downloaded artifact into an installed directory
pub trait Unpacker: Send + Sync {
    fn unpack(&self, artifact: &PackageArtifact, dest_dir: &Path) -> Result<()>;
}

/// Reads the per-directory version pin, if `dir` declares one
pub trait PinReader: Send + Sync {
    fn read_pin(&self, dir: &Path) -> Result<Option<String>>;
}

/// Option advertised by a command, shown by `gitshu help`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOption {
    pub name: String,
    pub description: String,
    pub defaults: Option<serde_json::Value>,
    pub values: Vec<String>,
}

/// A command exposed by an installed GitShu version
#[async_trait]
pub trait ToolCommand: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn options(&self) -> &[CommandOption] {
        &[]
    }

    /// Run with positional arguments and keyword flags, untouched
    async fn exec(&self, args: &[String], flags: &Flags) -> Result<serde_json::Value>;

    /// Run from a command line; `argv` is what followed the command name,
    /// `args`/`flags` the parsed view of it
    async fn run(
        &self,
        argv: &[String],
        args: &[String],
        flags: &Flags,
    ) -> Result<serde_json::Value> {
        let _ = argv;
        self.exec(args, flags).await
    }
}

use crate::error::{GitshuError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";
pub const DEFAULT_PACKAGE: &str = "gitshu";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub gitshu_dir: PathBuf,

    #[serde(skip)]
    pub versions_dir: PathBuf,

    #[serde(skip)]
    pub cache_dir: PathBuf,

    #[serde(skip)]
    pub config_file: PathBuf,

    #[serde(skip)]
    pub registry_file: PathBuf,

    /// Base URL of the npm-compatible package registry
    pub registry_url: String,

    /// Package name of GitShu in the registry
    pub package: String,

    /// Whether to verify package integrity when downloading
    pub verify_checksums: bool,

    /// Keep downloaded tarballs in the cache directory
    pub cache_downloads: bool,

    /// Timeout for registry requests, in seconds
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_root(Self::default_gitshu_dir())
    }
}

impl Config {
    fn default_gitshu_dir() -> PathBuf {
        // First check GITSHU_DIR environment variable
        if let Ok(dir) = std::env::var("GITSHU_DIR") {
            return PathBuf::from(shellexpand::tilde(&dir).to_string());
        }

        // Then use platform-specific directory
        if let Some(proj_dirs) = ProjectDirs::from("", "", "gitshu") {
            return proj_dirs.data_dir().to_path_buf();
        }

        // Fallback to ~/.gitshu
        PathBuf::from(shellexpand::tilde("~/.gitshu").to_string())
    }

    /// Build a configuration rooted at `root` with default settings.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        let gitshu_dir = root.as_ref().to_path_buf();

        Self {
            versions_dir: gitshu_dir.join("versions"),
            cache_dir: gitshu_dir.join("cache"),
            config_file: gitshu_dir.join("config.toml"),
            registry_file: gitshu_dir.join("registry.json"),
            gitshu_dir,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            package: DEFAULT_PACKAGE.to_string(),
            verify_checksums: true,
            cache_downloads: true,
            request_timeout_secs: 60,
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_gitshu_dir())
    }

    pub fn load_from<P: AsRef<Path>>(root: P) -> Result<Self> {
        let mut config = Self::with_root(root);

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.gitshu_dir)?;
        std::fs::create_dir_all(&config.versions_dir)?;
        std::fs::create_dir_all(&config.cache_dir)?;

        if config.config_file.exists() {
            let contents = std::fs::read_to_string(&config.config_file)?;
            let file_config: Config = toml::from_str(&contents)?;

            config.registry_url = file_config.registry_url.trim_end_matches('/').to_string();
            config.package = file_config.package;
            config.verify_checksums = file_config.verify_checksums;
            config.cache_downloads = file_config.cache_downloads;
            config.request_timeout_secs = file_config.request_timeout_secs;
        } else {
            config.save()?;
        }

        if config.package.trim().is_empty() {
            return Err(GitshuError::ConfigError(
                "package name must not be empty".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| GitshuError::ConfigError(e.to_string()))?;

        std::fs::write(&self.config_file, contents)?;
        Ok(())
    }
}

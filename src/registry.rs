use crate::config::Config;
use crate::core::traits::RegistryClient;
use crate::download::Downloader;
use crate::error::{GitshuError, Result};
use crate::models::{compare_versions, AvailableVersions, PackageArtifact};
use crate::utils::print_info;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct PackageDocument {
    #[serde(default)]
    versions: HashMap<String, PackageVersion>,
    #[serde(default, rename = "dist-tags")]
    dist_tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PackageVersion {
    dist: PackageDist,
}

#[derive(Debug, Deserialize)]
struct PackageDist {
    tarball: String,
    integrity: Option<String>,
}

/// Client for an npm-compatible registry serving the GitShu package
pub struct NpmRegistry {
    downloader: Downloader,
    base_url: String,
    package: String,
    cache_dir: PathBuf,
    verify_checksums: bool,
    cache_downloads: bool,
}

impl NpmRegistry {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            downloader: Downloader::new(Duration::from_secs(config.request_timeout_secs))?,
            base_url: config.registry_url.trim_end_matches('/').to_string(),
            package: config.package.clone(),
            cache_dir: config.cache_dir.clone(),
            verify_checksums: config.verify_checksums,
            cache_downloads: config.cache_downloads,
        })
    }

    fn package_url(&self) -> String {
        format!("{}/{}", self.base_url, self.package)
    }

    async fn package_document(&self) -> Result<PackageDocument> {
        let url = self.package_url();
        debug!("Fetching package document {}", url);

        let response = self
            .downloader
            .client()
            .get(&url)
            .send()
            .await
            .map_err(|e| GitshuError::DownloadFailed {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(GitshuError::RegistryStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl RegistryClient for NpmRegistry {
    async fn list_available(&self) -> Result<AvailableVersions> {
        let document = self.package_document().await?;

        let mut versions: Vec<String> = document.versions.into_keys().collect();
        versions.sort_by(|a, b| compare_versions(a, b));

        Ok(AvailableVersions {
            versions,
            tags: document.dist_tags,
        })
    }

    async fn fetch_package(&self, version: &str) -> Result<PackageArtifact> {
        let mut document = self.package_document().await?;
        let dist = document
            .versions
            .remove(version)
            .map(|v| v.dist)
            .ok_or_else(|| GitshuError::UnknownSpecifier(version.to_string()))?;

        std::fs::create_dir_all(&self.cache_dir)?;
        let file_name = dist
            .tarball
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-{}.tgz", self.package, version));
        let archive = self.cache_dir.join(file_name);

        if archive.exists() && self.cache_downloads {
            print_info("Using cached download");
        } else {
            self.downloader
                .download_with_progress(&dist.tarball, &archive)
                .await?;
        }

        if let (Some(integrity), true) = (&dist.integrity, self.verify_checksums) {
            if !Downloader::verify_integrity(&archive, integrity).await? {
                std::fs::remove_file(&archive)?;
                return Err(GitshuError::ChecksumMismatch {
                    file: archive.display().to_string(),
                });
            }
            debug!("Integrity verified for {}", archive.display());
        }

        Ok(PackageArtifact {
            version: version.to_string(),
            archive,
        })
    }
}

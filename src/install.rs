use crate::core::traits::{RegistryClient, Unpacker};
use crate::error::{GitshuError, Result};
use crate::models::{
    is_latest_specifier, AvailableVersions, LinkEntry, LinkScope, PackageArtifact,
    VersionDescriptor, ANY, LATEST,
};
use crate::store::VersionStore;
use colored::*;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tar::Archive;
use tracing::{debug, info};

/// Manifest every installed GitShu package must carry
pub const PACKAGE_MANIFEST: &str = "package.json";

/// Installs, removes, updates and links GitShu versions
pub struct Installer {
    store: VersionStore,
    registry: Arc<dyn RegistryClient>,
    unpacker: Arc<dyn Unpacker>,
}

impl Installer {
    pub fn new(
        store: VersionStore,
        registry: Arc<dyn RegistryClient>,
        unpacker: Arc<dyn Unpacker>,
    ) -> Self {
        Self {
            store,
            registry,
            unpacker,
        }
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Versions and tags published in the registry
    pub async fn available(&self) -> Result<AvailableVersions> {
        self.registry.list_available().await
    }

    /// Install the version `specifier` resolves to; returns that version
    pub async fn install(&self, specifier: &str) -> Result<String> {
        self.install_specifier(specifier)
            .await
            .map_err(|e| GitshuError::install(specifier, e))
    }

    async fn install_specifier(&self, specifier: &str) -> Result<String> {
        let available = self.registry.list_available().await?;
        let version = available
            .resolve(specifier)
            .ok_or_else(|| GitshuError::UnknownSpecifier(specifier.to_string()))?;

        let specifier = specifier.trim();
        let tag = if is_latest_specifier(specifier) {
            LATEST.to_string()
        } else if specifier.trim_start_matches('v') == version {
            // exact installs keep the tag an earlier install recorded
            self.store
                .install_tag(&version)
                .unwrap_or_else(|| version.clone())
        } else {
            specifier.to_string()
        };

        self.install_version(&version, &tag).await?;
        Ok(version)
    }

    async fn install_version(&self, version: &str, tag: &str) -> Result<()> {
        let install_dir = self.store.version_dir(version);

        if install_dir.is_dir() {
            info!("GitShu {} is already installed", version);
            return self.store.add(version, tag);
        }

        println!("{} GitShu {}", "Installing".green().bold(), version.cyan());

        let artifact = self.registry.fetch_package(version).await?;
        if artifact.version != version {
            return Err(GitshuError::InvalidPackage {
                path: artifact.archive.display().to_string(),
                reason: format!("expected version {}, got {}", version, artifact.version),
            });
        }

        // Unpack next to the final location, then move it in with one rename
        std::fs::create_dir_all(self.store.versions_dir())?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(self.store.versions_dir())?;
        let unpacked = staging.path().join("package");
        self.unpacker.unpack(&artifact, &unpacked)?;

        if !unpacked.join(PACKAGE_MANIFEST).is_file() {
            return Err(GitshuError::InvalidPackage {
                path: artifact.archive.display().to_string(),
                reason: format!("missing {}", PACKAGE_MANIFEST),
            });
        }

        if let Err(e) = std::fs::rename(&unpacked, &install_dir) {
            if !install_dir.is_dir() {
                return Err(e.into());
            }
            debug!("GitShu {} was installed concurrently", version);
        }

        self.store.add(version, tag)?;

        println!(
            "{} GitShu {} installed to {}",
            "✓".green().bold(),
            version.cyan(),
            install_dir.display().to_string().dimmed()
        );

        Ok(())
    }

    /// Remove an installed version and the links pointing at it
    pub fn uninstall(&self, specifier: &str) -> Result<String> {
        let descriptor = self.store.find(specifier).map_err(|e| match e {
            GitshuError::VersionNotFound(_) => GitshuError::NotInstalled(specifier.to_string()),
            other => other,
        })?;
        let version = descriptor.version;

        // Unregister first so readers never resolve a half-deleted directory
        let removed_links = self.store.remove(&version)?;
        for link in &removed_links {
            info!("Removed link {} -> {}", link.scope, link.version);
        }

        let trash = self
            .store
            .versions_dir()
            .join(format!(".trash-{}-{}", version, std::process::id()));
        std::fs::rename(&descriptor.path, &trash)?;
        std::fs::remove_dir_all(&trash)?;

        Ok(version)
    }

    /// Install the newest version of `tag` if it is not installed yet
    pub async fn update(&self, tag: Option<&str>) -> Result<Option<String>> {
        let requested = tag.unwrap_or(LATEST).to_string();
        self.update_tag(tag)
            .await
            .map_err(|e| GitshuError::install(&requested, e))
    }

    async fn update_tag(&self, tag: Option<&str>) -> Result<Option<String>> {
        let available = self.registry.list_available().await?;

        let tag = match tag {
            Some(tag) => tag.trim().to_string(),
            None => self
                .store
                .latest()
                .and_then(|latest| self.store.install_tag(&latest.version))
                .filter(|tag| available.tags.contains_key(tag))
                .unwrap_or_else(|| LATEST.to_string()),
        };

        let version = available
            .resolve(&tag)
            .ok_or_else(|| GitshuError::UnknownSpecifier(tag.clone()))?;

        if self.store.version_dir(&version).is_dir() && self.store.install_tag(&version).is_some() {
            debug!("GitShu {} for tag {} is already installed", version, tag);
            return Ok(None);
        }

        self.install_version(&version, &tag).await?;
        Ok(Some(version))
    }

    /// Installed descriptor for `specifier`, installing it when absent
    async fn ensure_installed(&self, specifier: &str) -> Result<VersionDescriptor> {
        match self.store.find(specifier) {
            Ok(descriptor) => Ok(descriptor),
            Err(GitshuError::VersionNotFound(_)) => {
                let version = self.install(specifier).await?;
                self.store.find(&version)
            }
            Err(e) => Err(e),
        }
    }

    /// Bind `target` directory to the version `specifier` resolves to
    pub async fn link(&self, specifier: &str, target: &Path) -> Result<VersionDescriptor> {
        if !target.is_dir() {
            return Err(GitshuError::LinkError(format!(
                "{} is not a directory",
                target.display()
            )));
        }
        let target = target.canonicalize()?;

        let descriptor = self.ensure_installed(specifier).await?;
        self.store.set_link(LinkEntry {
            scope: LinkScope::Directory(target),
            version: descriptor.version.clone(),
        })?;

        Ok(descriptor)
    }

    /// Bind a tag name to the version `specifier` resolves to
    pub async fn link_tag(&self, specifier: &str, tag: &str) -> Result<VersionDescriptor> {
        let tag = tag.trim();
        if tag.is_empty() || tag == ANY {
            return Err(GitshuError::LinkError(format!("invalid tag name \"{}\"", tag)));
        }

        let descriptor = self.ensure_installed(specifier).await?;
        self.store.set_link(LinkEntry {
            scope: LinkScope::Tag(tag.to_string()),
            version: descriptor.version.clone(),
        })?;

        Ok(descriptor)
    }

    /// Remove the link bound to `target` directory
    pub fn unlink(&self, target: &Path) -> Result<LinkEntry> {
        let target = target.canonicalize().unwrap_or_else(|_| target.to_path_buf());

        self.store
            .remove_link(&LinkScope::Directory(target.clone()))?
            .ok_or_else(|| {
                GitshuError::LinkError(format!("no link for {}", target.display()))
            })
    }
}

/// Unpacks `.tgz`/`.tar.gz` and `.zip` packages, dropping the archive's root folder
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveUnpacker;

impl Unpacker for ArchiveUnpacker {
    fn unpack(&self, artifact: &PackageArtifact, dest_dir: &Path) -> Result<()> {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Extracting...");

        std::fs::create_dir_all(dest_dir)?;

        let file_name = artifact
            .archive
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");

        if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
            extract_tar_gz(&artifact.archive, dest_dir)?;
        } else if file_name.ends_with(".zip") {
            extract_zip(&artifact.archive, dest_dir)?;
        } else {
            return Err(GitshuError::ExtractionFailed(format!(
                "Unsupported archive format: {}",
                file_name
            )));
        }

        pb.finish_and_clear();
        Ok(())
    }
}

/// Strip the root component; `None` for the root itself or unsafe paths
fn strip_root(path: &Path) -> Option<PathBuf> {
    let stripped: PathBuf = path.components().skip(1).collect();

    let safe = stripped
        .components()
        .all(|c| matches!(c, Component::Normal(_)));

    if stripped.as_os_str().is_empty() || !safe {
        None
    } else {
        Some(stripped)
    }
}

fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let tar_gz = File::open(archive_path)?;
    let tar = GzDecoder::new(tar_gz);
    let mut archive = Archive::new(tar);

    for entry in archive
        .entries()
        .map_err(|e| GitshuError::ExtractionFailed(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| GitshuError::ExtractionFailed(e.to_string()))?;
        let path = entry.path()?.into_owned();

        if let Some(stripped) = strip_root(&path) {
            let dest_path = dest_dir.join(&stripped);
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry
                .unpack(&dest_path)
                .map_err(|e| GitshuError::ExtractionFailed(e.to_string()))?;
        }
    }

    Ok(())
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;

        let outpath = match file.enclosed_name().as_deref().and_then(strip_root) {
            Some(path) => dest_dir.join(path),
            None => continue,
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        std::io::copy(&mut file, &mut outfile)?;

        // Set permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

use crate::config::Config;
use crate::error::{GitshuError, Result};
use crate::models::{
    compare_versions, is_latest_specifier, pick_latest, InstalledVersion, LinkEntry, LinkScope,
    RegistryDocument, VersionDescriptor, LATEST,
};
use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Advisory lock on the registry, released on drop
struct RegistryLock {
    file: File,
}

impl RegistryLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;

        Ok(Self { file })
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// On-disk registry of installed versions and links.
///
/// Versions live in `versions/<version>`; metadata, the latest marker and
/// links live in `registry.json`, which is only ever replaced by rename.
#[derive(Debug, Clone)]
pub struct VersionStore {
    versions_dir: PathBuf,
    registry_file: PathBuf,
}

impl VersionStore {
    pub fn new(config: &Config) -> Self {
        Self {
            versions_dir: config.versions_dir.clone(),
            registry_file: config.registry_file.clone(),
        }
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.versions_dir.join(version)
    }

    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    fn load(&self) -> Result<RegistryDocument> {
        if !self.registry_file.exists() {
            return Ok(RegistryDocument::default());
        }

        let contents = std::fs::read_to_string(&self.registry_file)?;
        if contents.trim().is_empty() {
            return Ok(RegistryDocument::default());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    /// Read the registry, treating an unreadable document as empty.
    fn snapshot(&self) -> RegistryDocument {
        match self.load() {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    "Ignoring unreadable registry {}: {}",
                    self.registry_file.display(),
                    e
                );
                RegistryDocument::default()
            }
        }
    }

    fn save(&self, document: &RegistryDocument) -> Result<()> {
        let parent = self
            .registry_file
            .parent()
            .ok_or_else(|| GitshuError::ConfigError("registry file has no parent".to_string()))?;
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut tmp, document)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.registry_file)
            .map_err(|e| GitshuError::IoError(e.error))?;

        debug!("Wrote registry {}", self.registry_file.display());
        Ok(())
    }

    fn lock_file(&self) -> PathBuf {
        self.registry_file.with_extension("lock")
    }

    /// Exclusive lock on `registry.lock`, held across a load/modify/save cycle
    fn lock(&self) -> Result<RegistryLock> {
        RegistryLock::acquire(&self.lock_file())
    }

    fn update<F, T>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut RegistryDocument) -> T,
    {
        let _lock = self.lock()?;

        let mut document = self.load()?;
        let out = change(&mut document);
        self.save(&document)?;
        Ok(out)
    }

    fn is_present(&self, version: &str) -> bool {
        self.version_dir(version).is_dir()
    }

    fn descriptor(&self, tag: &str, version: &str, latest: bool) -> VersionDescriptor {
        VersionDescriptor {
            tag: tag.to_string(),
            version: version.to_string(),
            link: None,
            latest,
            path: self.version_dir(version),
        }
    }

    /// Installed descriptors of `document`, newest first, one flagged latest.
    fn installed_in(&self, document: &RegistryDocument) -> Vec<VersionDescriptor> {
        let mut present: Vec<&str> = document
            .versions
            .keys()
            .map(String::as_str)
            .filter(|version| {
                let present = self.is_present(version);
                if !present {
                    warn!("GitShu {} is registered but missing on disk", version);
                }
                present
            })
            .collect();
        present.sort_by(|a, b| compare_versions(b, a));

        let latest = document
            .latest
            .as_deref()
            .filter(|latest| present.contains(latest))
            .or_else(|| pick_latest(present.iter().copied()));

        present
            .iter()
            .map(|version| self.descriptor(version, version, Some(*version) == latest))
            .collect()
    }

    fn link_descriptor(&self, entry: &LinkEntry) -> VersionDescriptor {
        let mut descriptor = self.descriptor(&entry.scope.to_string(), &entry.version, false);
        if let LinkScope::Directory(path) = &entry.scope {
            descriptor.link = Some(path.clone());
        }
        descriptor
    }

    /// All installed versions followed by links. Never fails.
    pub fn list(&self) -> Vec<VersionDescriptor> {
        let document = self.snapshot();
        let mut descriptors = self.installed_in(&document);

        descriptors.extend(
            document
                .links
                .iter()
                .filter(|entry| self.is_present(&entry.version))
                .map(|entry| self.link_descriptor(entry)),
        );

        descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.installed_in(&self.snapshot()).is_empty()
    }

    pub fn latest(&self) -> Option<VersionDescriptor> {
        self.installed_in(&self.snapshot())
            .into_iter()
            .find(|descriptor| descriptor.latest)
    }

    /// Install tag recorded for `version`, if installed.
    pub fn install_tag(&self, version: &str) -> Option<String> {
        self.snapshot()
            .versions
            .get(version)
            .map(|record| record.tag.clone())
    }

    /// Exact lookup by "latest", version, tag link or install tag.
    pub fn find(&self, specifier: &str) -> Result<VersionDescriptor> {
        let specifier = specifier.trim();
        let document = self.snapshot();
        let installed = self.installed_in(&document);

        if is_latest_specifier(specifier) {
            let tag_link = document.links.iter().find(|entry| {
                entry.scope == LinkScope::Tag(LATEST.to_string()) && self.is_present(&entry.version)
            });
            if let Some(entry) = tag_link {
                return Ok(self.link_descriptor(entry));
            }

            return installed
                .into_iter()
                .find(|descriptor| descriptor.latest)
                .ok_or_else(|| GitshuError::VersionNotFound(specifier.to_string()));
        }

        let exact = specifier.trim_start_matches('v');
        if let Some(descriptor) = installed.iter().find(|d| d.version == exact) {
            return Ok(descriptor.clone());
        }

        let tag_link = document.links.iter().find(|entry| {
            entry.scope == LinkScope::Tag(specifier.to_string()) && self.is_present(&entry.version)
        });
        if let Some(entry) = tag_link {
            return Ok(self.link_descriptor(entry));
        }

        // installed is newest first, so the first hit is the newest for the tag
        installed
            .iter()
            .find(|d| {
                document
                    .versions
                    .get(&d.version)
                    .map(|record| record.tag == specifier)
                    .unwrap_or(false)
            })
            .map(|d| self.descriptor(specifier, &d.version, d.latest))
            .ok_or_else(|| GitshuError::VersionNotFound(specifier.to_string()))
    }

    /// Record `version` (already unpacked in its directory) as installed.
    pub fn add(&self, version: &str, tag: &str) -> Result<()> {
        if !self.is_present(version) {
            return Err(GitshuError::NotInstalled(version.to_string()));
        }

        self.update(|document| {
            document.versions.insert(
                version.to_string(),
                InstalledVersion {
                    tag: tag.to_string(),
                    installed_at: chrono::Utc::now(),
                },
            );
            document.recompute_latest();
        })?;

        debug!("Registered GitShu {} (tag {})", version, tag);
        Ok(())
    }

    /// Forget `version` and every link pointing at it; returns removed links.
    pub fn remove(&self, version: &str) -> Result<Vec<LinkEntry>> {
        self.update(|document| {
            document.versions.remove(version);

            let (removed, kept): (Vec<_>, Vec<_>) = document
                .links
                .drain(..)
                .partition(|entry| entry.version == version);
            document.links = kept;
            document.recompute_latest();

            removed
        })
    }

    /// Record a link, replacing any previous link for the same scope.
    pub fn set_link(&self, entry: LinkEntry) -> Result<()> {
        self.update(|document| {
            document.links.retain(|existing| existing.scope != entry.scope);
            document.links.push(entry);
        })
    }

    pub fn remove_link(&self, scope: &LinkScope) -> Result<Option<LinkEntry>> {
        self.update(|document| {
            let position = document.links.iter().position(|entry| &entry.scope == scope);
            position.map(|index| document.links.remove(index))
        })
    }

    /// Link bound to `dir` or its nearest linked ancestor.
    pub fn link_for_dir(&self, dir: &Path) -> Option<LinkEntry> {
        let document = self.snapshot();

        dir.ancestors().find_map(|ancestor| {
            document
                .links
                .iter()
                .find(|entry| matches!(&entry.scope, LinkScope::Directory(p) if p == ancestor))
                .cloned()
        })
    }

    pub fn link_for_tag(&self, tag: &str) -> Option<LinkEntry> {
        self.snapshot()
            .links
            .into_iter()
            .find(|entry| entry.scope == LinkScope::Tag(tag.to_string()))
    }

    /// Descriptor for a link entry whose version is still installed.
    pub fn resolve_link(&self, entry: &LinkEntry) -> Result<VersionDescriptor> {
        if !self.is_present(&entry.version) {
            return Err(GitshuError::VersionNotFound(entry.version.clone()));
        }
        Ok(self.link_descriptor(entry))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn test_store() -> (TempDir, Config, VersionStore) {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(temp_dir.path()).unwrap();
        let store = VersionStore::new(&config);
        (temp_dir, config, store)
    }

    pub(crate) fn install_fake(store: &VersionStore, version: &str, tag: &str) {
        std::fs::create_dir_all(store.version_dir(version)).unwrap();
        store.add(version, tag).unwrap();
    }

    #[test]
    fn test_empty_store() {
        let (_temp, _config, store) = test_store();
        assert!(store.list().is_empty());
        assert!(store.is_empty());
        assert!(store.latest().is_none());
        assert!(matches!(
            store.find("latest"),
            Err(GitshuError::VersionNotFound(_))
        ));
    }

    #[test]
    fn test_exactly_one_latest() {
        let (_temp, _config, store) = test_store();
        install_fake(&store, "3.1.0", "3.1.0");
        install_fake(&store, "3.2.1", "latest");
        install_fake(&store, "4.0.0-beta.1", "beta");

        let listed = store.list();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed.iter().filter(|d| d.latest).count(), 1);
        assert_eq!(store.latest().unwrap().version, "3.2.1");
        assert_eq!(listed[0].version, "4.0.0-beta.1");
    }

    #[test]
    fn test_find_by_version_tag_and_latest() {
        let (_temp, _config, store) = test_store();
        install_fake(&store, "3.2.1", "latest");
        install_fake(&store, "4.0.0-beta.1", "beta");

        assert_eq!(store.find("3.2.1").unwrap().version, "3.2.1");
        assert_eq!(store.find("v3.2.1").unwrap().version, "3.2.1");
        assert_eq!(store.find("*").unwrap().version, "3.2.1");

        let beta = store.find("beta").unwrap();
        assert_eq!(beta.version, "4.0.0-beta.1");
        assert_eq!(beta.tag, "beta");

        assert!(matches!(
            store.find("nightly"),
            Err(GitshuError::VersionNotFound(_))
        ));
    }

    #[test]
    fn test_remove_drops_links_and_recomputes_latest() {
        let (temp, _config, store) = test_store();
        install_fake(&store, "3.1.0", "3.1.0");
        install_fake(&store, "3.2.1", "latest");

        let book = temp.path().join("book");
        store
            .set_link(LinkEntry {
                scope: LinkScope::Directory(book.clone()),
                version: "3.2.1".to_string(),
            })
            .unwrap();

        std::fs::remove_dir_all(store.version_dir("3.2.1")).unwrap();
        let removed = store.remove("3.2.1").unwrap();

        assert_eq!(removed.len(), 1);
        assert!(store.link_for_dir(&book).is_none());
        assert!(store.find("3.2.1").is_err());
        assert_eq!(store.latest().unwrap().version, "3.1.0");
    }

    #[test]
    fn test_set_link_overwrites_scope() {
        let (temp, _config, store) = test_store();
        install_fake(&store, "3.1.0", "3.1.0");
        install_fake(&store, "3.2.1", "latest");

        let book = temp.path().join("book");
        for version in ["3.1.0", "3.2.1"] {
            store
                .set_link(LinkEntry {
                    scope: LinkScope::Directory(book.clone()),
                    version: version.to_string(),
                })
                .unwrap();
        }

        let links: Vec<_> = store.list().into_iter().filter(|d| d.link.is_some()).collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].version, "3.2.1");
        assert_eq!(links[0].link.as_deref(), Some(book.as_path()));
        assert!(!links[0].latest);
    }

    #[test]
    fn test_link_for_dir_uses_nearest_ancestor() {
        let (temp, _config, store) = test_store();
        install_fake(&store, "3.1.0", "3.1.0");
        install_fake(&store, "3.2.1", "latest");

        let outer = temp.path().join("books");
        let inner = outer.join("guide");
        store
            .set_link(LinkEntry {
                scope: LinkScope::Directory(outer.clone()),
                version: "3.1.0".to_string(),
            })
            .unwrap();
        store
            .set_link(LinkEntry {
                scope: LinkScope::Directory(inner.clone()),
                version: "3.2.1".to_string(),
            })
            .unwrap();

        assert_eq!(store.link_for_dir(&inner.join("chapter")).unwrap().version, "3.2.1");
        assert_eq!(store.link_for_dir(&outer.join("other")).unwrap().version, "3.1.0");
        assert!(store.link_for_dir(temp.path()).is_none());
    }

    #[test]
    fn test_tag_link_is_found() {
        let (_temp, _config, store) = test_store();
        install_fake(&store, "3.1.0", "3.1.0");
        store
            .set_link(LinkEntry {
                scope: LinkScope::Tag("stable".to_string()),
                version: "3.1.0".to_string(),
            })
            .unwrap();

        let found = store.find("stable").unwrap();
        assert_eq!(found.version, "3.1.0");
        assert_eq!(found.tag, "stable");
        assert!(store.link_for_tag("stable").is_some());

        let removed = store.remove_link(&LinkScope::Tag("stable".to_string())).unwrap();
        assert!(removed.is_some());
        assert!(store.link_for_tag("stable").is_none());
    }

    #[test]
    fn test_missing_directory_is_skipped() {
        let (_temp, _config, store) = test_store();
        install_fake(&store, "3.1.0", "3.1.0");
        install_fake(&store, "3.2.1", "latest");
        std::fs::remove_dir_all(store.version_dir("3.2.1")).unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].latest);
        assert_eq!(listed[0].version, "3.1.0");
    }

    #[test]
    fn test_registry_written_atomically() {
        let (_temp, config, store) = test_store();
        install_fake(&store, "3.1.0", "3.1.0");

        let leftovers: Vec<_> = std::fs::read_dir(&config.gitshu_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let contents = std::fs::read_to_string(&config.registry_file).unwrap();
        let document: RegistryDocument = serde_json::from_str(&contents).unwrap();
        assert_eq!(document.latest.as_deref(), Some("3.1.0"));
    }

    #[test]
    fn test_find_latest_honours_latest_tag_link() {
        let (_temp, _config, store) = test_store();
        install_fake(&store, "3.1.0", "3.1.0");
        install_fake(&store, "3.2.1", "latest");
        store
            .set_link(LinkEntry {
                scope: LinkScope::Tag(LATEST.to_string()),
                version: "3.1.0".to_string(),
            })
            .unwrap();

        assert_eq!(store.find("latest").unwrap().version, "3.1.0");
        assert_eq!(store.find("*").unwrap().version, "3.1.0");
        assert_eq!(store.latest().unwrap().version, "3.2.1");
    }

    #[test]
    fn test_update_waits_for_registry_lock() {
        let (_temp, _config, store) = test_store();
        install_fake(&store, "3.1.0", "3.1.0");
        std::fs::create_dir_all(store.version_dir("3.2.1")).unwrap();

        // Another process holds the lock between its load and save
        let held = store.lock().unwrap();
        let stale = store.load().unwrap();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || store.add("3.2.1", "latest").unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert!(store.install_tag("3.2.1").is_none());

        let mut document = stale;
        document.versions.insert(
            "3.0.0".to_string(),
            InstalledVersion {
                tag: "3.0.0".to_string(),
                installed_at: chrono::Utc::now(),
            },
        );
        store.save(&document).unwrap();
        drop(held);
        writer.join().unwrap();

        let document = store.load().unwrap();
        assert!(document.versions.contains_key("3.0.0"));
        assert!(document.versions.contains_key("3.2.1"));
        assert!(document.versions.contains_key("3.1.0"));
    }

    #[test]
    fn test_concurrent_adds_keep_every_version() {
        let (_temp, _config, store) = test_store();
        let versions: Vec<String> = (0..8).map(|minor| format!("3.{}.0", minor)).collect();
        for version in &versions {
            std::fs::create_dir_all(store.version_dir(version)).unwrap();
        }

        let handles: Vec<_> = versions
            .iter()
            .cloned()
            .map(|version| {
                let store = store.clone();
                std::thread::spawn(move || store.add(&version, &version).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.list().len(), versions.len());
        assert_eq!(store.latest().unwrap().version, "3.7.0");
    }

    #[test]
    fn test_corrupt_registry_lists_empty() {
        let (_temp, config, store) = test_store();
        std::fs::write(&config.registry_file, "{ not json").unwrap();
        assert!(store.list().is_empty());
        assert!(store.add("3.1.0", "3.1.0").is_err());
    }
}

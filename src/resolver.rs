use crate::core::traits::PinReader;
use crate::error::{GitshuError, Result};
use crate::install::Installer;
use crate::lifecycle::{Lifecycle, RequestState};
use crate::models::{VersionDescriptor, LATEST};
use crate::pin::find_pin;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Picks the installed GitShu version that applies to an invocation.
///
/// Precedence: explicit specifier, then the nearest pin file, then a link
/// bound to the working directory (or the `latest` tag), then the version
/// flagged latest. An empty store triggers an install of `latest`.
pub struct Resolver<'a> {
    installer: &'a Installer,
    pins: &'a dyn PinReader,
    cwd: PathBuf,
}

impl<'a> Resolver<'a> {
    pub fn new(installer: &'a Installer, pins: &'a dyn PinReader, cwd: &Path) -> Self {
        Self {
            installer,
            pins,
            cwd: cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf()),
        }
    }

    /// Resolve without installing anything except into an empty store.
    pub async fn resolve(
        &self,
        explicit: Option<&str>,
        lifecycle: &mut Lifecycle,
    ) -> Result<VersionDescriptor> {
        self.resolve_with(explicit, false, lifecycle).await
    }

    /// Resolve for dispatch: a pinned version that is missing gets installed.
    /// An explicit specifier still has to be installed already.
    pub async fn ensure(
        &self,
        explicit: Option<&str>,
        lifecycle: &mut Lifecycle,
    ) -> Result<VersionDescriptor> {
        self.resolve_with(explicit, true, lifecycle).await
    }

    async fn resolve_with(
        &self,
        explicit: Option<&str>,
        install_pinned: bool,
        lifecycle: &mut Lifecycle,
    ) -> Result<VersionDescriptor> {
        lifecycle.advance(RequestState::Resolving);
        let store = self.installer.store();

        if let Some(specifier) = explicit {
            debug!("Using explicit version {}", specifier);
            return store.find(specifier);
        }

        if let Some((dir, specifier)) = find_pin(self.pins, &self.cwd)? {
            debug!("Using version {} pinned in {}", specifier, dir.display());

            return match store.find(&specifier) {
                Err(GitshuError::VersionNotFound(_)) if install_pinned => {
                    lifecycle.advance(RequestState::Installing);
                    let version = self.installer.install(&specifier).await?;
                    store.find(&version)
                }
                found => found,
            };
        }

        if let Some(descriptor) = self.linked_or_latest() {
            return Ok(descriptor);
        }

        if store.is_empty() {
            lifecycle.advance(RequestState::Installing);
            info!("No GitShu version installed, installing {}", LATEST);

            match self.installer.install(LATEST).await {
                Ok(_) => {
                    if let Some(descriptor) = self.linked_or_latest() {
                        return Ok(descriptor);
                    }
                }
                Err(e) => warn!("Implicit install of {} failed: {}", LATEST, e),
            }
        }

        Err(GitshuError::VersionNotFound(LATEST.to_string()))
    }

    fn linked_or_latest(&self) -> Option<VersionDescriptor> {
        let store = self.installer.store();

        let link = store
            .link_for_dir(&self.cwd)
            .or_else(|| store.link_for_tag(LATEST));

        if let Some(entry) = link {
            match store.resolve_link(&entry) {
                Ok(descriptor) => {
                    debug!("Using version {} linked to {}", entry.version, entry.scope);
                    return Some(descriptor);
                }
                Err(e) => warn!("Ignoring link {}: {}", entry.scope, e),
            }
        }

        store.latest()
    }
}

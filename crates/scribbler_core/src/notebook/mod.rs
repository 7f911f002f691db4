//! Notebook handle: registry, cached configuration and file-store access.
//!
//! # Responsibility
//! - Own the in-memory registry of notes and appendices.
//! - Scaffold, load, recover and persist a notebook directory.
//! - Serve settings and renderer configuration through mtime-keyed caches.
//!
//! # Invariants
//! - Every mutating operation persists the registry before returning `Ok`.
//! - Registry keys are source basenames.
//! - Cache hits return the same `Arc` that was stored.

mod authoring;
mod build;
mod reconcile;
mod templates;

pub use build::{BuildPhase, BuildReport};

use crate::error::{NotebookError, NotebookResult};
use crate::layout::NotebookPaths;
use crate::model::content::ContentRecord;
use crate::placement::{self, PlacementMode};
use crate::repo::registry_repo::{
    CachedRendererConfig, CachedSettings, NotebookSnapshot, RegistryStore, SqliteRegistryStore,
};
use crate::settings::{self, renderer_config, RendererConfig, Settings, KEY_NOTEBOOK_NAME};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// One notebook directory and its registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Notebook {
    name: String,
    paths: NotebookPaths,
    notes: BTreeMap<String, ContentRecord>,
    appendices: BTreeMap<String, ContentRecord>,
    settings_cache: Option<CachedSettings>,
    renderer_cache: Option<CachedRendererConfig>,
    phase: BuildPhase,
}

impl Notebook {
    fn fresh(name: impl Into<String>, paths: NotebookPaths) -> Self {
        Self {
            name: name.into(),
            paths,
            notes: BTreeMap::new(),
            appendices: BTreeMap::new(),
            settings_cache: None,
            renderer_cache: None,
            phase: BuildPhase::Clean,
        }
    }

    /// Creates (or adopts) a notebook at `location`.
    ///
    /// # Contract
    /// - Missing directories are created; existing ones are left alone.
    /// - `notebook.yml` is written with only `notebook name` when absent.
    /// - An existing registry at `location` is loaded instead of replaced.
    pub fn create(name: impl Into<String>, location: impl AsRef<Path>) -> NotebookResult<Self> {
        let name = name.into();
        let paths = NotebookPaths::new(absolute(location.as_ref())?);
        scaffold(&paths)?;

        let settings_file = paths.settings_file();
        if !settings_file.exists() {
            let initial = BTreeMap::from([(KEY_NOTEBOOK_NAME, name.as_str())]);
            let yaml = serde_yaml::to_string(&initial).map_err(|err| NotebookError::Config {
                path: settings_file.clone(),
                message: err.to_string(),
            })?;
            std::fs::write(&settings_file, yaml)
                .map_err(|err| NotebookError::io(&settings_file, err))?;
        }

        let notebook = if paths.registry_file().is_file() {
            Self::open(paths.location())?
        } else {
            Self::fresh(name, paths)
        };
        notebook.persist()?;
        info!(
            "event=notebook_create module=notebook status=ok records={}",
            notebook.notes.len() + notebook.appendices.len()
        );
        Ok(notebook)
    }

    /// Loads the persisted notebook at `location`.
    ///
    /// # Errors
    /// - `NoRegistry` when the location holds no registry.
    /// - `Registry` when the registry cannot be read.
    pub fn open(location: impl AsRef<Path>) -> NotebookResult<Self> {
        let paths = NotebookPaths::new(absolute(location.as_ref())?);
        let registry = paths.registry_file();
        if !registry.is_file() {
            return Err(NotebookError::NoRegistry(registry));
        }
        let snapshot = SqliteRegistryStore::open(&registry)?
            .load()?
            .ok_or(NotebookError::NoRegistry(registry))?;
        Ok(Self::from_snapshot(snapshot, paths))
    }

    /// Opens the notebook, rebuilding the registry from disk if it is unreadable.
    pub fn open_or_recover(name: impl Into<String>, location: impl AsRef<Path>) -> NotebookResult<Self> {
        let location = location.as_ref();
        match Self::open(location) {
            Ok(notebook) => Ok(notebook),
            Err(err @ (NotebookError::Registry(_) | NotebookError::NoRegistry(_))) => {
                warn!("event=notebook_recover module=notebook status=start reason={err}");
                let paths = NotebookPaths::new(absolute(location)?);
                scaffold(&paths)?;
                remove_if_exists(&paths.registry_file())?;
                let mut notebook = Self::fresh(name, paths);
                notebook.reconcile()?;
                info!(
                    "event=notebook_recover module=notebook status=ok records={}",
                    notebook.notes.len() + notebook.appendices.len()
                );
                Ok(notebook)
            }
            Err(err) => Err(err),
        }
    }

    /// Writes the whole registry snapshot.
    pub fn persist(&self) -> NotebookResult<()> {
        let mut store = SqliteRegistryStore::open(self.paths.registry_file())?;
        store.save(&self.snapshot())?;
        Ok(())
    }

    pub fn snapshot(&self) -> NotebookSnapshot {
        NotebookSnapshot {
            name: self.name.clone(),
            location: self.paths.location().to_path_buf(),
            notes: self.notes.clone(),
            appendices: self.appendices.clone(),
            settings_cache: self.settings_cache.clone(),
            renderer_cache: self.renderer_cache.clone(),
        }
    }

    /// Rebuilds a notebook from a snapshot; the on-disk location wins.
    fn from_snapshot(snapshot: NotebookSnapshot, paths: NotebookPaths) -> Self {
        Self {
            name: snapshot.name,
            paths,
            notes: snapshot.notes,
            appendices: snapshot.appendices,
            settings_cache: snapshot.settings_cache,
            renderer_cache: snapshot.renderer_cache,
            phase: BuildPhase::Clean,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Path {
        self.paths.location()
    }

    pub fn paths(&self) -> &NotebookPaths {
        &self.paths
    }

    pub fn notes(&self) -> &BTreeMap<String, ContentRecord> {
        &self.notes
    }

    pub fn appendices(&self) -> &BTreeMap<String, ContentRecord> {
        &self.appendices
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    /// Recreates any missing notebook directory.
    pub fn ensure_directories(&self) -> NotebookResult<()> {
        scaffold(&self.paths)
    }

    /// Resolved settings, recomputed only when `notebook.yml` gets newer.
    pub fn settings(&mut self) -> NotebookResult<Arc<Settings>> {
        let config_path = self.paths.settings_file();
        let modified = std::fs::metadata(&config_path)
            .and_then(|metadata| metadata.modified())
            .map_err(|err| NotebookError::io(&config_path, err))?;

        if let Some(cache) = &self.settings_cache {
            if cache.modified >= modified {
                return Ok(Arc::clone(&cache.settings));
            }
        }

        let settings = Arc::new(settings::resolve_settings(&config_path, self.paths.location())?);
        info!("event=settings_resolve module=notebook status=ok keys={}", settings.values().len());
        self.settings_cache = Some(CachedSettings {
            settings: Arc::clone(&settings),
            modified,
        });
        Ok(settings)
    }

    /// Renderer configuration, recomputed only when the settings cache changes.
    pub fn renderer_config(&mut self) -> NotebookResult<Arc<RendererConfig>> {
        let settings = self.settings()?;
        let stamp = self.settings_stamp();

        if let Some(cache) = &self.renderer_cache {
            if Some(cache.settings_modified) == stamp {
                return Ok(Arc::clone(&cache.config));
            }
        }

        let config = Arc::new(renderer_config(&settings, &self.paths));
        if let Some(settings_modified) = stamp {
            self.renderer_cache = Some(CachedRendererConfig {
                config: Arc::clone(&config),
                settings_modified,
            });
        }
        Ok(config)
    }

    fn settings_stamp(&self) -> Option<SystemTime> {
        self.settings_cache.as_ref().map(|cache| cache.modified)
    }

    /// Canonical file-store destination for `path`.
    pub fn get_destination(&mut self, path: &Path, location: Option<&Path>) -> NotebookResult<PathBuf> {
        let filetypes = self.settings()?.filetypes();
        placement::resolve_destination(&self.paths.file_store_dir(), &filetypes, path, location)
    }

    /// Destination for `path`, failing with `DestinationExists` on conflict.
    pub fn check_destination(
        &mut self,
        path: &Path,
        location: Option<&Path>,
        overwrite: bool,
    ) -> NotebookResult<PathBuf> {
        let dest = self.get_destination(path, location)?;
        placement::check_conflict(&dest, overwrite)?;
        Ok(dest)
    }

    /// Copies `path` into the file store and returns where it landed.
    pub fn copy_in(&mut self, path: &Path, location: Option<&Path>, overwrite: bool) -> NotebookResult<PathBuf> {
        self.place_in(path, location, overwrite, PlacementMode::Copy)
    }

    /// Hard-links `path` into the file store.
    pub fn link_in(&mut self, path: &Path, location: Option<&Path>, overwrite: bool) -> NotebookResult<PathBuf> {
        self.place_in(path, location, overwrite, PlacementMode::HardLink)
    }

    /// Symlinks `path` into the file store with a relative target.
    pub fn symlink_in(&mut self, path: &Path, location: Option<&Path>, overwrite: bool) -> NotebookResult<PathBuf> {
        self.place_in(path, location, overwrite, PlacementMode::Symlink)
    }

    fn place_in(
        &mut self,
        path: &Path,
        location: Option<&Path>,
        overwrite: bool,
        mode: PlacementMode,
    ) -> NotebookResult<PathBuf> {
        let dest = self.check_destination(path, location, overwrite)?;
        placement::place(path, &dest, mode, overwrite)
    }

    /// Content listing has no implementation.
    pub fn list_contents(&self) -> NotebookResult<Vec<ContentRecord>> {
        Err(NotebookError::NotImplemented("list_contents"))
    }
}

fn absolute(location: &Path) -> NotebookResult<PathBuf> {
    if location.is_absolute() {
        return Ok(location.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|err| NotebookError::io(location, err))?;
    Ok(cwd.join(location))
}

fn scaffold(paths: &NotebookPaths) -> NotebookResult<()> {
    let started_at = Instant::now();
    for dir in paths.scaffold_dirs() {
        std::fs::create_dir_all(&dir).map_err(|err| NotebookError::io(&dir, err))?;
    }
    info!(
        "event=notebook_scaffold module=notebook status=ok duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(())
}

fn remove_if_exists(path: &Path) -> NotebookResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(NotebookError::io(path, err)),
    }
}

//! Plugin lifecycle manager.
//!
//! Dynamic modules are loaded with two-phase initialization: every plugin
//! registers its handlers (`pre_init`) before any plugin's `init` runs, so a
//! plugin can emit to another plugin from its init hook without racing that
//! plugin's registration. One faulty plugin never prevents the rest from
//! loading; its error is logged and it is skipped.

use crate::context::{PluginContext, PluginHost};
use crate::metadata::{PluginMetadata, PluginRecord};
use flate2::read::GzDecoder;
use libloading::{Library, Symbol};
use quarry_event_system::{
    current_timestamp, EventSystem, HandlerOwner, Plugin, PluginError, PluginStatus,
    PluginStatusChangedEvent, ServerContext,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Produces a fresh plugin instance for modules compiled into the host
/// process instead of loaded from a dynamic library.
pub type LocalPluginFactory = Box<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// A plugin known to the manager. `module` is `None` while disabled.
struct ManagedPlugin {
    record: PluginRecord,
    module: Option<ActiveModule>,
    local_factory: Option<LocalPluginFactory>,
}

/// An activated module. Field order matters: the plugin instance must drop
/// before the library that contains its code.
struct ActiveModule {
    plugin: Box<dyn Plugin>,
    context: Arc<dyn ServerContext>,
    handler_count: usize,
    _library: Option<ModuleLibraries>,
}

/// The dynamic libraries backing a module. The main library drops before
/// the sidecars it links against.
struct ModuleLibraries {
    _main: Library,
    _sidecars: Vec<Library>,
}

/// Manages discovery, loading and the enable/disable/delete lifecycle of
/// plugins in a single plugin directory.
pub struct PluginManager {
    events: Arc<EventSystem>,
    host: Arc<dyn PluginHost>,
    plugins: RwLock<HashMap<String, ManagedPlugin>>,
    plugin_directory: PathBuf,
}

impl PluginManager {
    pub fn new(host: Arc<dyn PluginHost>, plugin_directory: impl AsRef<Path>) -> Self {
        Self {
            events: host.events(),
            host,
            plugins: RwLock::new(HashMap::new()),
            plugin_directory: plugin_directory.as_ref().to_path_buf(),
        }
    }

    /// Scans the plugin directory and records every well-formed plugin.
    ///
    /// Archived bundles (`*.gz`) inside a plugin directory are unpacked
    /// first. A directory with missing or malformed metadata, or without a
    /// module binary, is logged and skipped without affecting the others.
    pub async fn discover(&self) -> Result<Vec<PluginRecord>, PluginError> {
        if !self.plugin_directory.exists() {
            warn!(
                "Plugin directory {} does not exist, nothing to discover",
                self.plugin_directory.display()
            );
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.plugin_directory).map_err(|e| {
            PluginError::FileError(format!(
                "cannot read plugin directory {}: {}",
                self.plugin_directory.display(),
                e
            ))
        })?;

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match discover_record(&path) {
                Ok(record) => {
                    debug!(
                        "Discovered plugin {} v{} ({})",
                        record.metadata.name,
                        record.metadata.version,
                        if record.enabled { "enabled" } else { "disabled" }
                    );
                    self.remember(&record).await;
                    self.emit_status(&record, PluginStatus::Discovered).await;
                    found.push(record);
                }
                Err(e) => {
                    error!("Skipping plugin directory {}: {}", path.display(), e);
                }
            }
        }

        info!("Discovered {} plugin(s)", found.len());
        Ok(found)
    }

    /// Discovers and activates every enabled plugin, in dependency order.
    ///
    /// Phase 1 instantiates modules, phase 2 runs every `pre_init` (handler
    /// registration), phase 3 runs every `init`. A plugin whose dependency
    /// failed to load is itself skipped with a dependency error.
    pub async fn load_all(&self) -> Result<usize, PluginError> {
        let records = self.discover().await?;

        let mut satisfied: HashSet<String> = {
            let plugins = self.plugins.read().await;
            plugins
                .values()
                .filter(|p| p.module.is_some())
                .map(|p| p.record.identifier().to_string())
                .collect()
        };

        let mut pending: Vec<PluginRecord> = records
            .into_iter()
            .filter(|r| r.enabled && !satisfied.contains(r.identifier()))
            .collect();

        // Phase 1: instantiate in dependency order. Repeated passes handle
        // arbitrary declaration order without a full topological sort.
        let mut staged: Vec<(PluginRecord, Box<dyn Plugin>, Option<ModuleLibraries>)> = Vec::new();
        let mut progress = true;
        while progress {
            progress = false;
            let mut i = 0;
            while i < pending.len() {
                let ready = pending[i]
                    .metadata
                    .dependencies
                    .iter()
                    .all(|dep| satisfied.contains(dep));
                if !ready {
                    i += 1;
                    continue;
                }
                let record = pending.remove(i);
                progress = true;
                match self.instantiate(&record).await {
                    Ok((plugin, library)) => {
                        satisfied.insert(record.identifier().to_string());
                        staged.push((record, plugin, library));
                    }
                    Err(e) => {
                        error!("Failed to load plugin {}: {}", record.identifier(), e);
                    }
                }
            }
        }
        for record in &pending {
            error!(
                "Cannot load plugin {}: {}",
                record.identifier(),
                PluginError::DependencyNotFound(
                    record
                        .metadata
                        .dependencies
                        .iter()
                        .find(|dep| !satisfied.contains(*dep))
                        .cloned()
                        .unwrap_or_default()
                )
            );
        }

        // Phase 2: handler registration for every staged plugin.
        let mut initialized = Vec::new();
        for (record, mut plugin, library) in staged {
            let context: Arc<dyn ServerContext> =
                Arc::new(PluginContext::new(self.host.clone(), record.identifier()));
            let before = self.events.get_stats().await.total_handlers;
            match plugin.pre_init(context.clone()).await {
                Ok(()) => {
                    let handler_count = self
                        .events
                        .get_stats()
                        .await
                        .total_handlers
                        .saturating_sub(before);
                    debug!(
                        "Plugin {} registered {} handler(s)",
                        record.identifier(),
                        handler_count
                    );
                    initialized.push((record, plugin, library, context, handler_count));
                }
                Err(e) => {
                    error!(
                        "Plugin {} failed handler registration: {}",
                        record.identifier(),
                        e
                    );
                    self.purge_handlers(record.identifier()).await;
                }
            }
        }

        // Phase 3: init hooks, now that every handler is in place.
        let mut loaded = 0;
        for (record, mut plugin, library, context, handler_count) in initialized {
            match plugin.init(context.clone()).await {
                Ok(()) => {
                    info!(
                        "Loaded plugin {} v{}",
                        record.metadata.name, record.metadata.version
                    );
                    self.emit_status(&record, PluginStatus::Loaded).await;
                    let mut plugins = self.plugins.write().await;
                    let entry = plugins
                        .entry(record.identifier().to_string())
                        .or_insert_with(|| ManagedPlugin {
                            record: record.clone(),
                            module: None,
                            local_factory: None,
                        });
                    entry.record.enabled = true;
                    entry.module = Some(ActiveModule {
                        plugin,
                        context,
                        handler_count,
                        _library: library,
                    });
                    loaded += 1;
                }
                Err(e) => {
                    error!("Plugin {} failed to initialize: {}", record.identifier(), e);
                    self.purge_handlers(record.identifier()).await;
                }
            }
        }

        info!("Plugin startup complete, {} plugin(s) active", loaded);
        Ok(loaded)
    }

    /// Activates a single known plugin. Its dependencies must already be
    /// loaded and enabled.
    pub async fn load(&self, identifier: &str) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write().await;
        self.check_dependencies(&plugins, identifier)?;

        let entry = plugins
            .get_mut(identifier)
            .ok_or_else(|| PluginError::NotFound(identifier.to_string()))?;
        if entry.module.is_some() {
            return Err(PluginError::ExecutionError(format!(
                "plugin {} is already loaded",
                identifier
            )));
        }
        if !entry.record.enabled {
            return Err(PluginError::ExecutionError(format!(
                "plugin {} is disabled, enable it first",
                identifier
            )));
        }

        let record = entry.record.clone();
        let (mut plugin, library) = match &entry.local_factory {
            Some(factory) => (factory(), None),
            None => self.instantiate(&record).await?,
        };

        let context: Arc<dyn ServerContext> =
            Arc::new(PluginContext::new(self.host.clone(), identifier));
        let before = self.events.get_stats().await.total_handlers;

        if let Err(e) = plugin.pre_init(context.clone()).await {
            self.purge_handlers(identifier).await;
            return Err(e);
        }
        let handler_count = self
            .events
            .get_stats()
            .await
            .total_handlers
            .saturating_sub(before);

        if let Err(e) = plugin.init(context.clone()).await {
            self.purge_handlers(identifier).await;
            return Err(e);
        }

        entry.module = Some(ActiveModule {
            plugin,
            context,
            handler_count,
            _library: library,
        });
        drop(plugins);

        info!("Loaded plugin {} v{}", record.metadata.name, record.metadata.version);
        self.emit_status(&record, PluginStatus::Loaded).await;
        Ok(())
    }

    /// Registers a plugin compiled into the host process. The factory is kept
    /// so the plugin can be re-instantiated after a disable/enable cycle.
    pub async fn register_local(
        &self,
        metadata: PluginMetadata,
        factory: LocalPluginFactory,
    ) -> Result<(), PluginError> {
        let identifier = metadata.identifier.clone();
        let record = PluginRecord {
            directory: self.plugin_directory.join(&identifier),
            metadata,
            enabled: true,
        };
        {
            let mut plugins = self.plugins.write().await;
            if plugins.contains_key(&identifier) {
                return Err(PluginError::ExecutionError(format!(
                    "plugin {} is already registered",
                    identifier
                )));
            }
            plugins.insert(
                identifier.clone(),
                ManagedPlugin {
                    record,
                    module: None,
                    local_factory: Some(factory),
                },
            );
        }
        self.load(&identifier).await
    }

    /// Deactivates a plugin: shutdown hook, handler purge, module drop, and a
    /// marker file so the state survives restarts. Refused while another
    /// enabled plugin depends on it.
    pub async fn disable(&self, identifier: &str) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write().await;
        self.check_dependents(&plugins, identifier)?;

        let entry = plugins
            .get_mut(identifier)
            .ok_or_else(|| PluginError::NotFound(identifier.to_string()))?;
        if !entry.record.enabled {
            return Err(PluginError::ExecutionError(format!(
                "plugin {} is already disabled",
                identifier
            )));
        }

        if let Some(mut module) = entry.module.take() {
            if let Err(e) = module.plugin.shutdown(module.context.clone()).await {
                warn!("Plugin {} shutdown hook failed: {}", identifier, e);
            }
        }
        let purged = self
            .events
            .unsubscribe_all(&HandlerOwner::plugin(identifier))
            .await;
        entry.record.enabled = false;

        if let Err(e) = std::fs::write(entry.record.marker_path(), b"") {
            warn!(
                "Could not persist disabled state for {}: {}",
                identifier, e
            );
        }
        let record = entry.record.clone();
        drop(plugins);

        info!("Disabled plugin {}, purged {} handler(s)", identifier, purged);
        self.emit_status(&record, PluginStatus::Disabled).await;
        Ok(())
    }

    /// Re-activates a disabled plugin and removes its marker file.
    pub async fn enable(&self, identifier: &str) -> Result<(), PluginError> {
        {
            let mut plugins = self.plugins.write().await;
            self.check_dependencies(&plugins, identifier)?;
            let entry = plugins
                .get_mut(identifier)
                .ok_or_else(|| PluginError::NotFound(identifier.to_string()))?;
            if entry.record.enabled {
                return Err(PluginError::ExecutionError(format!(
                    "plugin {} is already enabled",
                    identifier
                )));
            }
            entry.record.enabled = true;
            let marker = entry.record.marker_path();
            if marker.exists() {
                if let Err(e) = std::fs::remove_file(&marker) {
                    warn!("Could not remove disabled marker for {}: {}", identifier, e);
                }
            }
        }

        if let Err(e) = self.load(identifier).await {
            // Activation failed; restore the disabled state.
            let mut plugins = self.plugins.write().await;
            if let Some(entry) = plugins.get_mut(identifier) {
                entry.record.enabled = false;
                let _ = std::fs::write(entry.record.marker_path(), b"");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Removes a plugin entirely: deactivates it if needed, purges its
    /// handlers, forgets it and deletes its directory from disk.
    pub async fn delete(&self, identifier: &str) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write().await;
        self.check_dependents(&plugins, identifier)?;

        let mut entry = plugins
            .remove(identifier)
            .ok_or_else(|| PluginError::NotFound(identifier.to_string()))?;
        drop(plugins);

        if let Some(mut module) = entry.module.take() {
            if let Err(e) = module.plugin.shutdown(module.context.clone()).await {
                warn!("Plugin {} shutdown hook failed: {}", identifier, e);
            }
        }
        self.purge_handlers(identifier).await;

        if entry.record.directory.exists() {
            if let Err(e) = std::fs::remove_dir_all(&entry.record.directory) {
                return Err(PluginError::FileError(format!(
                    "could not delete plugin directory {}: {}",
                    entry.record.directory.display(),
                    e
                )));
            }
        }

        info!("Deleted plugin {}", identifier);
        self.emit_status(&entry.record, PluginStatus::Deleted).await;
        Ok(())
    }

    /// Runs every active plugin's shutdown hook and purges all registrations.
    pub async fn shutdown(&self) {
        let mut plugins = self.plugins.write().await;
        for (identifier, entry) in plugins.iter_mut() {
            if let Some(mut module) = entry.module.take() {
                if let Err(e) = module.plugin.shutdown(module.context.clone()).await {
                    warn!("Plugin {} shutdown hook failed: {}", identifier, e);
                }
                self.events
                    .unsubscribe_all(&HandlerOwner::plugin(identifier))
                    .await;
                debug!("Shut down plugin {}", identifier);
            }
        }
        plugins.clear();
        info!("All plugins shut down");
    }

    /// Number of active (loaded and enabled) plugins.
    pub async fn active_count(&self) -> usize {
        let plugins = self.plugins.read().await;
        plugins.values().filter(|p| p.module.is_some()).count()
    }

    /// Every plugin the manager knows about, active or not.
    pub async fn records(&self) -> Vec<PluginRecord> {
        let plugins = self.plugins.read().await;
        plugins.values().map(|p| p.record.clone()).collect()
    }

    pub async fn is_enabled(&self, identifier: &str) -> Option<bool> {
        let plugins = self.plugins.read().await;
        plugins.get(identifier).map(|p| p.record.enabled)
    }

    /// Loads the dynamic library and calls its `create_plugin` export.
    ///
    /// Other dynamic libraries shipped in the plugin's directory are loaded
    /// first, so the module's own dependencies resolve from there before the
    /// system search paths.
    async fn instantiate(
        &self,
        record: &PluginRecord,
    ) -> Result<(Box<dyn Plugin>, Option<ModuleLibraries>), PluginError> {
        let binary = record.binary_path();
        debug!("Loading plugin module from {}", binary.display());

        let sidecars = load_sidecars(&record.directory, &binary)?;
        let library = unsafe {
            Library::new(&binary).map_err(|e| {
                PluginError::InitializationFailed(format!(
                    "failed to load {}: {}",
                    binary.display(),
                    e
                ))
            })?
        };

        let create_plugin: Symbol<unsafe extern "C" fn() -> *mut dyn Plugin> = unsafe {
            library.get(b"create_plugin").map_err(|e| {
                PluginError::InitializationFailed(format!(
                    "no create_plugin export in {}: {}",
                    binary.display(),
                    e
                ))
            })?
        };

        let plugin_ptr = unsafe { create_plugin() };
        if plugin_ptr.is_null() {
            return Err(PluginError::InitializationFailed(
                "create_plugin returned a null pointer".to_string(),
            ));
        }
        let plugin = unsafe { Box::from_raw(plugin_ptr) };

        Ok((
            plugin,
            Some(ModuleLibraries {
                _main: library,
                _sidecars: sidecars,
            }),
        ))
    }

    /// Verifies every declared dependency of `identifier` is loaded and
    /// enabled.
    fn check_dependencies(
        &self,
        plugins: &HashMap<String, ManagedPlugin>,
        identifier: &str,
    ) -> Result<(), PluginError> {
        let Some(entry) = plugins.get(identifier) else {
            return Err(PluginError::NotFound(identifier.to_string()));
        };
        for dep in &entry.record.metadata.dependencies {
            let satisfied = plugins
                .get(dep)
                .map(|p| p.module.is_some() && p.record.enabled)
                .unwrap_or(false);
            if !satisfied {
                return Err(PluginError::DependencyNotFound(dep.clone()));
            }
        }
        Ok(())
    }

    /// Refuses removal while any other enabled plugin depends on
    /// `identifier`.
    fn check_dependents(
        &self,
        plugins: &HashMap<String, ManagedPlugin>,
        identifier: &str,
    ) -> Result<(), PluginError> {
        for (other_id, other) in plugins.iter() {
            if other_id != identifier
                && other.record.enabled
                && other
                    .record
                    .metadata
                    .dependencies
                    .iter()
                    .any(|d| d == identifier)
            {
                return Err(PluginError::DependencyRequired(
                    identifier.to_string(),
                    other_id.clone(),
                ));
            }
        }
        Ok(())
    }

    async fn purge_handlers(&self, identifier: &str) {
        let purged = self
            .events
            .unsubscribe_all(&HandlerOwner::plugin(identifier))
            .await;
        if purged > 0 {
            debug!("Purged {} handler(s) for plugin {}", purged, identifier);
        }
    }

    /// Records a discovered plugin without disturbing an already-active
    /// entry.
    async fn remember(&self, record: &PluginRecord) {
        let mut plugins = self.plugins.write().await;
        plugins
            .entry(record.identifier().to_string())
            .or_insert_with(|| ManagedPlugin {
                record: record.clone(),
                module: None,
                local_factory: None,
            });
    }

    async fn emit_status(&self, record: &PluginRecord, status: PluginStatus) {
        let event = PluginStatusChangedEvent {
            identifier: record.identifier().to_string(),
            name: record.metadata.name.clone(),
            status,
            timestamp: current_timestamp(),
        };
        if let Err(e) = self.events.emit_core("plugin_status_changed", &event).await {
            error!("Failed to emit plugin status event: {}", e);
        }
    }
}

/// Loads every dynamic library in a plugin directory other than the module
/// binary itself. An unloadable sidecar is logged and skipped.
fn load_sidecars(dir: &Path, main_binary: &Path) -> Result<Vec<Library>, PluginError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PluginError::FileError(format!("cannot read {}: {}", dir.display(), e)))?;

    let mut sidecars = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path == main_binary {
            continue;
        }
        let is_dylib = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| ext == "so" || ext == "dll" || ext == "dylib")
            .unwrap_or(false);
        if !is_dylib {
            continue;
        }
        match unsafe { Library::new(&path) } {
            Ok(library) => {
                debug!("Loaded sidecar library {}", path.display());
                sidecars.push(library);
            }
            Err(e) => warn!("Skipping sidecar library {}: {}", path.display(), e),
        }
    }
    Ok(sidecars)
}

/// Reads one plugin directory into a record, unpacking bundles first.
fn discover_record(dir: &Path) -> Result<PluginRecord, PluginError> {
    unpack_bundles(dir)?;

    let metadata = PluginMetadata::read_from(dir)?;
    let record = PluginRecord {
        metadata,
        directory: dir.to_path_buf(),
        enabled: !dir.join(crate::metadata::DISABLED_MARKER).exists(),
    };
    let binary = record.binary_path();
    if !binary.exists() {
        return Err(PluginError::FileError(format!(
            "plugin binary {} is missing",
            binary.display()
        )));
    }
    Ok(record)
}

/// Decompresses `*.gz` bundles in a plugin directory. The archive is kept;
/// an already-unpacked target is left untouched.
fn unpack_bundles(dir: &Path) -> Result<(), PluginError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PluginError::FileError(format!("cannot read {}: {}", dir.display(), e)))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("gz") {
            continue;
        }
        let target = path.with_extension("");
        if target.exists() {
            continue;
        }
        let archive = std::fs::File::open(&path).map_err(|e| {
            PluginError::FileError(format!("cannot open bundle {}: {}", path.display(), e))
        })?;
        let mut decoder = GzDecoder::new(archive);
        let mut out = std::fs::File::create(&target).map_err(|e| {
            PluginError::FileError(format!("cannot create {}: {}", target.display(), e))
        })?;
        std::io::copy(&mut decoder, &mut out).map_err(|e| {
            PluginError::FileError(format!("cannot unpack {}: {}", path.display(), e))
        })?;
        info!("Unpacked plugin bundle {}", path.display());
    }
    Ok(())
}

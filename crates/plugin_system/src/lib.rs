//! Dynamic plugin loading and lifecycle management.
//!
//! Plugins are dynamic libraries discovered in a plugin directory, each in
//! its own subdirectory with a `plugin.json` metadata file next to the
//! module binary. The manager drives the full lifecycle:
//!
//! * **discover** reads metadata, unpacks archived bundles and records every
//!   well-formed plugin;
//! * **load** activates a module through two-phase initialization (all
//!   handler registration before any init hook);
//! * **disable** runs the shutdown hook, purges every handler the plugin
//!   registered and persists the state in a marker file;
//! * **enable** reverses a disable with a fresh module instance;
//! * **delete** removes the plugin from the process and from disk.
//!
//! Dependencies between plugins are declared in metadata and enforced in
//! both directions: a plugin cannot load before its dependencies, and cannot
//! be disabled or deleted while an enabled plugin depends on it.

pub mod context;
pub mod manager;
pub mod metadata;

pub use context::{PluginContext, PluginHost};
pub use manager::{LocalPluginFactory, PluginManager};
pub use metadata::{binary_file_name, PluginMetadata, PluginRecord, DISABLED_MARKER, METADATA_FILE};

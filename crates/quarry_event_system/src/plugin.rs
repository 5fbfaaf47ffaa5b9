//! Plugin traits, the host context interface and the FFI bridge macro.

use crate::system::{EventSystem, ScopedRegistrar};
use crate::PlayerId;
use async_trait::async_trait;
use std::sync::Arc;

/// Log levels plugins use through [`ServerContext::log`], mapped onto the
/// host's tracing subscriber.
#[derive(Debug, Clone, Copy)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Errors that can occur during plugin lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Plugin failed to initialize.
    #[error("plugin initialization failed: {0}")]
    InitializationFailed(String),
    /// Error during normal plugin execution.
    #[error("plugin execution error: {0}")]
    ExecutionError(String),
    /// Requested plugin does not exist.
    #[error("plugin not found: {0}")]
    NotFound(String),
    /// A declared dependency is absent from the loaded/enabled set.
    #[error("plugin dependency not found or not enabled: {0}")]
    DependencyNotFound(String),
    /// Another enabled plugin still depends on this one.
    #[error("plugin {0} is required by enabled plugin {1}")]
    DependencyRequired(String, String),
    /// Metadata or binary file missing or unreadable.
    #[error("plugin file error: {0}")]
    FileError(String),
    /// Panic or other unexpected runtime condition.
    #[error("plugin runtime error: {0}")]
    Runtime(String),
}

/// Errors surfaced to plugins when they call back into the host.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("network error: {0}")]
    Network(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Host services exposed to a plugin.
///
/// Each loaded plugin gets its own context carrying a [`ScopedRegistrar`]
/// stamped with that plugin's owner token; the registrar is the only
/// subscription path a plugin has.
#[async_trait]
pub trait ServerContext: Send + Sync {
    /// The event bus, for emitting. Subscription goes through
    /// [`registrar`](Self::registrar).
    fn events(&self) -> Arc<EventSystem>;

    /// This plugin's scoped subscription handle.
    fn registrar(&self) -> Arc<ScopedRegistrar>;

    /// Logs through the host's logging system.
    fn log(&self, level: LogLevel, message: &str);

    /// Sends raw bytes to one connected player.
    async fn send_to_player(&self, player_id: PlayerId, data: &[u8]) -> Result<(), ServerError>;

    /// Sends raw bytes to every connected player.
    async fn broadcast(&self, data: &[u8]) -> Result<(), ServerError>;
}

/// Low-level plugin trait implemented by the dynamic library's entry type.
///
/// Plugin authors normally implement [`SimplePlugin`] and let
/// [`create_simple_plugin!`](crate::create_simple_plugin) generate this
/// bridge together with the `create_plugin`/`destroy_plugin` exports.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    /// Handler-registration phase; runs before [`init`](Self::init).
    async fn pre_init(&mut self, context: Arc<dyn ServerContext>) -> Result<(), PluginError>;

    /// The Load hook: full initialization with host context.
    async fn init(&mut self, context: Arc<dyn ServerContext>) -> Result<(), PluginError>;

    /// The Unload hook: cleanup before the module is dropped.
    async fn shutdown(&mut self, context: Arc<dyn ServerContext>) -> Result<(), PluginError>;
}

/// High-level plugin interface without unsafe code.
///
/// # Lifecycle
///
/// 1. instance created via `new()` inside the library's `create_plugin` export
/// 2. `register_handlers` subscribes through the scoped registrar
/// 3. `on_init` runs with host context (the Load hook)
/// 4. events flow until disable/delete
/// 5. `on_shutdown` runs; the host then purges the plugin's registrations
#[async_trait]
pub trait SimplePlugin: Send + Sync + 'static {
    /// Unique, stable plugin name.
    fn name(&self) -> &str;

    /// Semantic version string.
    fn version(&self) -> &str;

    /// Registers event handlers through the plugin's scoped registrar.
    async fn register_handlers(
        &mut self,
        registrar: Arc<ScopedRegistrar>,
    ) -> Result<(), PluginError>;

    /// Load hook. Default does nothing.
    async fn on_init(&mut self, _context: Arc<dyn ServerContext>) -> Result<(), PluginError> {
        Ok(())
    }

    /// Unload hook. Default does nothing.
    async fn on_shutdown(&mut self, _context: Arc<dyn ServerContext>) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Generates the FFI bridge for a [`SimplePlugin`] implementation.
///
/// Produces a `PluginWrapper` implementing the low-level [`Plugin`] trait with
/// panic isolation at every boundary, plus the `create_plugin` and
/// `destroy_plugin` C-ABI exports the lifecycle manager looks up with
/// `libloading`. A panicking plugin yields a [`PluginError::Runtime`] instead
/// of unwinding into the host.
#[macro_export]
macro_rules! create_simple_plugin {
    ($plugin_type:ty) => {
        use $crate::Plugin;
        use std::panic::{catch_unwind, AssertUnwindSafe};

        /// Bridges SimplePlugin to the FFI-facing Plugin trait.
        struct PluginWrapper {
            inner: $plugin_type,
        }

        impl PluginWrapper {
            fn panic_to_error(panic_info: Box<dyn std::any::Any + Send>) -> $crate::PluginError {
                let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("plugin panicked: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("plugin panicked: {}", s)
                } else {
                    "plugin panicked with unknown payload".to_string()
                };
                $crate::PluginError::Runtime(message)
            }
        }

        #[async_trait::async_trait]
        impl Plugin for PluginWrapper {
            fn name(&self) -> &str {
                match catch_unwind(AssertUnwindSafe(|| self.inner.name())) {
                    Ok(name) => name,
                    Err(_) => "unknown-plugin-name",
                }
            }

            fn version(&self) -> &str {
                match catch_unwind(AssertUnwindSafe(|| self.inner.version())) {
                    Ok(version) => version,
                    Err(_) => "unknown-version",
                }
            }

            async fn pre_init(
                &mut self,
                context: std::sync::Arc<dyn $crate::ServerContext>,
            ) -> Result<(), $crate::PluginError> {
                catch_unwind(AssertUnwindSafe(|| {
                    $crate::futures::executor::block_on(self.inner.register_handlers(context.registrar()))
                }))
                .map_err(Self::panic_to_error)?
            }

            async fn init(
                &mut self,
                context: std::sync::Arc<dyn $crate::ServerContext>,
            ) -> Result<(), $crate::PluginError> {
                catch_unwind(AssertUnwindSafe(|| {
                    $crate::futures::executor::block_on(self.inner.on_init(context))
                }))
                .map_err(Self::panic_to_error)?
            }

            async fn shutdown(
                &mut self,
                context: std::sync::Arc<dyn $crate::ServerContext>,
            ) -> Result<(), $crate::PluginError> {
                catch_unwind(AssertUnwindSafe(|| {
                    $crate::futures::executor::block_on(self.inner.on_shutdown(context))
                }))
                .map_err(Self::panic_to_error)?
            }
        }

        /// Entry point looked up by the plugin loader.
        ///
        /// # Safety
        ///
        /// Crosses the FFI boundary; panics are caught and reported as a null
        /// pointer rather than unwinding into the host.
        #[no_mangle]
        pub unsafe extern "C" fn create_plugin() -> *mut dyn Plugin {
            match catch_unwind(AssertUnwindSafe(|| {
                let plugin = Box::new(PluginWrapper {
                    inner: <$plugin_type>::new(),
                });
                Box::into_raw(plugin) as *mut dyn Plugin
            })) {
                Ok(plugin_ptr) => plugin_ptr,
                Err(panic_info) => {
                    eprintln!("plugin creation panicked: {:?}", panic_info);
                    std::ptr::null_mut::<PluginWrapper>() as *mut dyn Plugin
                }
            }
        }

        /// Destructor looked up by the plugin loader.
        ///
        /// # Safety
        ///
        /// `plugin` must be a pointer previously returned by `create_plugin`.
        #[no_mangle]
        pub unsafe extern "C" fn destroy_plugin(plugin: *mut dyn Plugin) {
            if plugin.is_null() {
                return;
            }
            let _ = catch_unwind(AssertUnwindSafe(|| {
                let _ = Box::from_raw(plugin);
            }));
        }
    };
}

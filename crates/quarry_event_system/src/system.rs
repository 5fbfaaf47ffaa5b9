//! The event system: registration, priority-ordered dispatch and owner-scoped
//! bulk unsubscription.

use crate::events::{Event, EventError};
use crate::priority::{EventFlow, HandlerConfig, HandlerId, HandlerOwner, Priority};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, trace};

/// Handler trait abstracting over type-specific handling logic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, data: &[u8], flow: &EventFlow) -> Result<(), EventError>;
    fn handler_name(&self) -> &str;
}

/// Bridges a plain `Fn(T)` closure to the dynamic handler interface.
struct TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(T) -> Result<(), EventError> + Send + Sync,
{
    handler: F,
    name: String,
    _phantom: std::marker::PhantomData<fn(T)>,
}

#[async_trait]
impl<T, F> EventHandler for TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(T) -> Result<(), EventError> + Send + Sync,
{
    async fn handle(&self, data: &[u8], _flow: &EventFlow) -> Result<(), EventError> {
        let event = T::deserialize(data)?;
        (self.handler)(event)
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// Bridges a `Fn(T, &EventFlow)` closure, for handlers that inspect or set the
/// cancellation flag.
struct FlowEventHandler<T, F>
where
    T: Event,
    F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync,
{
    handler: F,
    name: String,
    _phantom: std::marker::PhantomData<fn(T)>,
}

#[async_trait]
impl<T, F> EventHandler for FlowEventHandler<T, F>
where
    T: Event,
    F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync,
{
    async fn handle(&self, data: &[u8], flow: &EventFlow) -> Result<(), EventError> {
        let event = T::deserialize(data)?;
        (self.handler)(event, flow)
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// One subscription: the handler plus the ordering and scoping metadata the
/// dispatch walk needs.
#[derive(Clone)]
struct HandlerRegistration {
    id: HandlerId,
    priority: Priority,
    ignore_cancelled: bool,
    owner: HandlerOwner,
    handler: Arc<dyn EventHandler>,
}

/// Statistics about dispatch activity.
#[derive(Debug, Default, Clone)]
pub struct EventSystemStats {
    /// Number of currently registered handlers.
    pub total_handlers: usize,
    /// Events emitted since system start.
    pub events_emitted: u64,
    /// Handlers skipped because an earlier handler cancelled the event.
    pub handlers_skipped: u64,
}

/// The central event bus.
///
/// Owned by the host (client or server); there is deliberately no process-wide
/// registry of event systems. Thread-safe behind `Arc`; dispatch runs on
/// whichever task calls `emit_*`, which for inbound traffic is the connection's
/// network task.
///
/// Ordering invariant: each event key's registration list is stable-sorted by
/// priority after every subscribe, so handlers always execute in non-decreasing
/// priority order and ties preserve insertion order.
pub struct EventSystem {
    handlers: RwLock<HashMap<String, Vec<HandlerRegistration>>>,
    stats: RwLock<EventSystemStats>,
    next_handler_id: AtomicU64,
}

impl EventSystem {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            stats: RwLock::new(EventSystemStats::default()),
            next_handler_id: AtomicU64::new(1),
        }
    }

    // ------------------------------------------------------------------
    // Subscription: simple forms (Normal priority, host owner)
    // ------------------------------------------------------------------

    /// Registers a core infrastructure handler at Normal priority under the
    /// host owner. Plugins subscribe through [`ScopedRegistrar`] instead.
    pub async fn on_core<T, F>(&self, event_name: &str, handler: F) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let key = format!("core:{event_name}");
        self.register_simple(key, handler).await
    }

    /// Registers a handler for client events within a namespace.
    pub async fn on_client<T, F>(
        &self,
        namespace: &str,
        event_name: &str,
        handler: F,
    ) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let key = format!("client:{namespace}:{event_name}");
        self.register_simple(key, handler).await
    }

    /// Registers a handler for plugin-to-plugin events.
    pub async fn on_plugin<T, F>(
        &self,
        plugin_name: &str,
        event_name: &str,
        handler: F,
    ) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let key = format!("plugin:{plugin_name}:{event_name}");
        self.register_simple(key, handler).await
    }

    async fn register_simple<T, F>(&self, key: String, handler: F) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let name = format!("{}::{}", key, T::type_name());
        let handler: Arc<dyn EventHandler> = Arc::new(TypedEventHandler {
            handler,
            name,
            _phantom: std::marker::PhantomData,
        });
        self.register(key, HandlerOwner::core(), HandlerConfig::default(), handler)
            .await
    }

    // ------------------------------------------------------------------
    // Subscription: prioritized forms
    // ------------------------------------------------------------------

    /// Registers a core handler with explicit owner, priority and cancellation
    /// behavior. Reserved-band priorities require the host owner.
    pub async fn on_core_prioritized<T, F>(
        &self,
        event_name: &str,
        owner: HandlerOwner,
        config: HandlerConfig,
        handler: F,
    ) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let key = format!("core:{event_name}");
        self.register_prioritized(key, owner, config, handler).await
    }

    /// Prioritized form of [`on_client`](Self::on_client).
    pub async fn on_client_prioritized<T, F>(
        &self,
        namespace: &str,
        event_name: &str,
        owner: HandlerOwner,
        config: HandlerConfig,
        handler: F,
    ) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let key = format!("client:{namespace}:{event_name}");
        self.register_prioritized(key, owner, config, handler).await
    }

    /// Prioritized form of [`on_plugin`](Self::on_plugin).
    pub async fn on_plugin_prioritized<T, F>(
        &self,
        plugin_name: &str,
        event_name: &str,
        owner: HandlerOwner,
        config: HandlerConfig,
        handler: F,
    ) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let key = format!("plugin:{plugin_name}:{event_name}");
        self.register_prioritized(key, owner, config, handler).await
    }

    async fn register_prioritized<T, F>(
        &self,
        key: String,
        owner: HandlerOwner,
        config: HandlerConfig,
        handler: F,
    ) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync + 'static,
    {
        if config.priority.is_reserved() && !owner.is_core() {
            return Err(EventError::ReservedPriority(config.priority.value()));
        }
        let name = format!("{}::{}", key, T::type_name());
        let handler: Arc<dyn EventHandler> = Arc::new(FlowEventHandler {
            handler,
            name,
            _phantom: std::marker::PhantomData,
        });
        self.register(key, owner, config, handler).await
    }

    async fn register(
        &self,
        key: String,
        owner: HandlerOwner,
        config: HandlerConfig,
        handler: Arc<dyn EventHandler>,
    ) -> Result<HandlerId, EventError> {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        let registration = HandlerRegistration {
            id,
            priority: config.priority,
            ignore_cancelled: config.ignore_cancelled,
            owner: owner.clone(),
            handler,
        };

        let mut handlers = self.handlers.write().await;
        let list = handlers.entry(key.clone()).or_default();
        list.push(registration);
        // Stable sort: equal priorities keep subscription order.
        list.sort_by_key(|r| r.priority);
        drop(handlers);

        let mut stats = self.stats.write().await;
        stats.total_handlers += 1;

        debug!(
            "📝 Registered handler for {} (owner: {}, priority: {})",
            key, owner, config.priority
        );
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Unsubscription
    // ------------------------------------------------------------------

    /// Removes a single registration by the ID returned at subscribe time.
    pub async fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().await;
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|r| r.id == id) {
                list.remove(pos);
                drop(handlers);
                let mut stats = self.stats.write().await;
                stats.total_handlers -= 1;
                return true;
            }
        }
        false
    }

    /// Removes every registration recorded under `owner`. Used when a plugin
    /// is disabled or deleted.
    pub async fn unsubscribe_all(&self, owner: &HandlerOwner) -> usize {
        let mut removed = 0;
        let mut handlers = self.handlers.write().await;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|r| &r.owner != owner);
            removed += before - list.len();
        }
        handlers.retain(|_, list| !list.is_empty());
        drop(handlers);

        if removed > 0 {
            let mut stats = self.stats.write().await;
            stats.total_handlers -= removed;
            info!("🧹 Purged {} handler(s) owned by {}", removed, owner);
        }
        removed
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    /// Emits a core server event. Returns the invocation's [`EventFlow`] so the
    /// caller can observe whether a handler cancelled it.
    pub async fn emit_core<T>(&self, event_name: &str, event: &T) -> Result<EventFlow, EventError>
    where
        T: Event,
    {
        let key = format!("core:{event_name}");
        self.emit_event(&key, event).await
    }

    /// Emits a client event within a namespace.
    pub async fn emit_client<T>(
        &self,
        namespace: &str,
        event_name: &str,
        event: &T,
    ) -> Result<EventFlow, EventError>
    where
        T: Event,
    {
        let key = format!("client:{namespace}:{event_name}");
        self.emit_event(&key, event).await
    }

    /// Emits a plugin-to-plugin event.
    pub async fn emit_plugin<T>(
        &self,
        plugin_name: &str,
        event_name: &str,
        event: &T,
    ) -> Result<EventFlow, EventError>
    where
        T: Event,
    {
        let key = format!("plugin:{plugin_name}:{event_name}");
        self.emit_event(&key, event).await
    }

    /// Serializes once, snapshots the sorted registration list, then walks it
    /// in ascending priority order. A cancelled flow skips handlers that did
    /// not opt in with `ignore_cancelled`; it never stops the walk. Handler
    /// failures are logged and do not affect later handlers.
    async fn emit_event<T>(&self, key: &str, event: &T) -> Result<EventFlow, EventError>
    where
        T: Event,
    {
        let data = event.serialize()?;
        let flow = EventFlow::new();

        // Snapshot so handlers may subscribe/unsubscribe while we dispatch.
        let snapshot: Vec<HandlerRegistration> = {
            let handlers = self.handlers.read().await;
            match handlers.get(key) {
                Some(list) => list.clone(),
                None => {
                    trace!("no handlers for event: {}", key);
                    return Ok(flow);
                }
            }
        };

        debug!("📤 Emitting {} to {} handler(s)", key, snapshot.len());

        let mut skipped = 0u64;
        for registration in &snapshot {
            if flow.is_cancelled() && !registration.ignore_cancelled {
                skipped += 1;
                continue;
            }
            if let Err(e) = registration.handler.handle(&data, &flow).await {
                error!(
                    "❌ Handler {} failed: {}",
                    registration.handler.handler_name(),
                    e
                );
            }
        }

        let mut stats = self.stats.write().await;
        stats.events_emitted += 1;
        stats.handlers_skipped += skipped;

        Ok(flow)
    }

    /// Returns a clone of the current statistics.
    pub async fn get_stats(&self) -> EventSystemStats {
        self.stats.read().await.clone()
    }
}

impl Default for EventSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability handle a plugin uses to subscribe.
///
/// Stamps the plugin's [`HandlerOwner`] on every registration and rejects the
/// reserved priority band, so bulk purge on disable works without the bus ever
/// inspecting the call site.
pub struct ScopedRegistrar {
    events: Arc<EventSystem>,
    owner: HandlerOwner,
}

impl ScopedRegistrar {
    pub fn new(events: Arc<EventSystem>, owner_id: &str) -> Self {
        Self {
            events,
            owner: HandlerOwner::plugin(owner_id),
        }
    }

    pub fn owner(&self) -> &HandlerOwner {
        &self.owner
    }

    /// Subscribes to a core event at Normal priority.
    pub async fn on_core<T, F>(&self, event_name: &str, handler: F) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.on_core_prioritized(event_name, HandlerConfig::default(), handler)
            .await
    }

    /// Subscribes to a core event with explicit priority and cancellation
    /// behavior. Priorities 0 and 100 are rejected.
    pub async fn on_core_prioritized<T, F>(
        &self,
        event_name: &str,
        config: HandlerConfig,
        handler: F,
    ) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.check_band(config)?;
        self.events
            .on_core_prioritized(event_name, self.owner.clone(), config, handler)
            .await
    }

    /// Subscribes to a client event at Normal priority.
    pub async fn on_client<T, F>(
        &self,
        namespace: &str,
        event_name: &str,
        handler: F,
    ) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.on_client_prioritized(namespace, event_name, HandlerConfig::default(), handler)
            .await
    }

    /// Subscribes to a client event with explicit priority and cancellation
    /// behavior.
    pub async fn on_client_prioritized<T, F>(
        &self,
        namespace: &str,
        event_name: &str,
        config: HandlerConfig,
        handler: F,
    ) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.check_band(config)?;
        self.events
            .on_client_prioritized(namespace, event_name, self.owner.clone(), config, handler)
            .await
    }

    /// Subscribes to another plugin's events.
    pub async fn on_plugin<T, F>(
        &self,
        plugin_name: &str,
        event_name: &str,
        handler: F,
    ) -> Result<HandlerId, EventError>
    where
        T: Event + 'static,
        F: Fn(T, &EventFlow) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.events
            .on_plugin_prioritized(
                plugin_name,
                event_name,
                self.owner.clone(),
                HandlerConfig::default(),
                handler,
            )
            .await
    }

    /// Removes one of this plugin's registrations.
    pub async fn unsubscribe(&self, id: HandlerId) -> bool {
        self.events.unsubscribe(id).await
    }

    /// Emitting is unrestricted; expose the bus for it.
    pub fn events(&self) -> Arc<EventSystem> {
        self.events.clone()
    }

    fn check_band(&self, config: HandlerConfig) -> Result<(), EventError> {
        if config.priority.is_reserved() {
            return Err(EventError::ReservedPriority(config.priority.value()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ProbeEvent {
        label: String,
    }

    fn probe() -> ProbeEvent {
        ProbeEvent {
            label: "probe".into(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handlers_run_in_ascending_priority_order() {
        let events = Arc::new(EventSystem::new());
        let calls: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        for value in [80u8, 10, 50, 10] {
            let calls = calls.clone();
            events
                .on_core_prioritized(
                    "probe",
                    HandlerOwner::core(),
                    HandlerConfig {
                        priority: Priority::new(value).unwrap(),
                        ignore_cancelled: false,
                    },
                    move |_: ProbeEvent, _flow| {
                        calls.lock().unwrap().push(value);
                        Ok(())
                    },
                )
                .await
                .unwrap();
        }

        events.emit_core("probe", &probe()).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![10, 10, 50, 80]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn equal_priorities_keep_subscription_order() {
        let events = Arc::new(EventSystem::new());
        let calls: Arc<Mutex<Vec<&str>>> = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let calls = calls.clone();
            events
                .on_core_prioritized(
                    "probe",
                    HandlerOwner::core(),
                    HandlerConfig::default(),
                    move |_: ProbeEvent, _flow| {
                        calls.lock().unwrap().push(label);
                        Ok(())
                    },
                )
                .await
                .unwrap();
        }

        events.emit_core("probe", &probe()).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_filters_but_does_not_halt() {
        let events = Arc::new(EventSystem::new());
        let calls: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        let c = calls.clone();
        events
            .on_core_prioritized(
                "probe",
                HandlerOwner::core(),
                HandlerConfig {
                    priority: Priority::new(10).unwrap(),
                    ignore_cancelled: false,
                },
                move |_: ProbeEvent, flow: &EventFlow| {
                    c.lock().unwrap().push(10);
                    flow.cancel();
                    Ok(())
                },
            )
            .await
            .unwrap();

        let c = calls.clone();
        events
            .on_core_prioritized(
                "probe",
                HandlerOwner::core(),
                HandlerConfig {
                    priority: Priority::new(50).unwrap(),
                    ignore_cancelled: false,
                },
                move |_: ProbeEvent, _flow: &EventFlow| {
                    c.lock().unwrap().push(50);
                    Ok(())
                },
            )
            .await
            .unwrap();

        let c = calls.clone();
        events
            .on_core_prioritized(
                "probe",
                HandlerOwner::core(),
                HandlerConfig {
                    priority: Priority::new(90).unwrap(),
                    ignore_cancelled: true,
                },
                move |_: ProbeEvent, _flow: &EventFlow| {
                    c.lock().unwrap().push(90);
                    Ok(())
                },
            )
            .await
            .unwrap();

        let flow = events.emit_core("probe", &probe()).await.unwrap();
        assert!(flow.is_cancelled());
        // 50 skipped, 90 opted in with ignore_cancelled.
        assert_eq!(*calls.lock().unwrap(), vec![10, 90]);

        let stats = events.get_stats().await;
        assert_eq!(stats.handlers_skipped, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unsubscribe_all_purges_by_owner() {
        let events = Arc::new(EventSystem::new());
        let calls: Arc<Mutex<Vec<&str>>> = Arc::new(Mutex::new(Vec::new()));

        let registrar = ScopedRegistrar::new(events.clone(), "minimap");
        let c = calls.clone();
        registrar
            .on_core("probe", move |_: ProbeEvent, _flow| {
                c.lock().unwrap().push("plugin");
                Ok(())
            })
            .await
            .unwrap();
        let c = calls.clone();
        registrar
            .on_client("world", "block_placed", move |_: ProbeEvent, _flow| {
                c.lock().unwrap().push("plugin");
                Ok(())
            })
            .await
            .unwrap();

        let c = calls.clone();
        events
            .on_core("probe", move |_: ProbeEvent| {
                c.lock().unwrap().push("core");
                Ok(())
            })
            .await
            .unwrap();

        let removed = events.unsubscribe_all(registrar.owner()).await;
        assert_eq!(removed, 2);

        events.emit_core("probe", &probe()).await.unwrap();
        events
            .emit_client("world", "block_placed", &probe())
            .await
            .unwrap();
        // Zero plugin calls after the purge; the core handler survives.
        assert_eq!(*calls.lock().unwrap(), vec!["core"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_unsubscribe_removes_one_registration() {
        let events = Arc::new(EventSystem::new());
        let calls: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        let c = calls.clone();
        let id = events
            .on_core("probe", move |_: ProbeEvent| {
                c.lock().unwrap().push(1);
                Ok(())
            })
            .await
            .unwrap();
        let c = calls.clone();
        events
            .on_core("probe", move |_: ProbeEvent| {
                c.lock().unwrap().push(2);
                Ok(())
            })
            .await
            .unwrap();

        assert!(events.unsubscribe(id).await);
        assert!(!events.unsubscribe(id).await);

        events.emit_core("probe", &probe()).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![2]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registrar_rejects_reserved_band() {
        let events = Arc::new(EventSystem::new());
        let registrar = ScopedRegistrar::new(events.clone(), "rogue");

        for priority in [Priority::INTERNAL_INITIAL, Priority::INTERNAL_FINAL] {
            let err = registrar
                .on_core_prioritized(
                    "probe",
                    HandlerConfig {
                        priority,
                        ignore_cancelled: false,
                    },
                    |_: ProbeEvent, _flow| Ok(()),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, EventError::ReservedPriority(_)));
        }

        // A forged owner token is also rejected by the bus itself.
        let err = events
            .on_core_prioritized(
                "probe",
                HandlerOwner::plugin("rogue"),
                HandlerConfig {
                    priority: Priority::INTERNAL_FINAL,
                    ignore_cancelled: false,
                },
                |_: ProbeEvent, _flow| Ok(()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::ReservedPriority(100)));

        // The host itself may use the band.
        events
            .on_core_prioritized(
                "probe",
                HandlerOwner::core(),
                HandlerConfig {
                    priority: Priority::INTERNAL_INITIAL,
                    ignore_cancelled: false,
                },
                |_: ProbeEvent, _flow| Ok(()),
            )
            .await
            .unwrap();
    }
}

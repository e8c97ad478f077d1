//! dynamic_tooltips: per-instance item tooltip engine.
//!
//! Host protocols resolve item names, descriptions and models per item
//! *type*: two instances of the same type always render identically. This
//! engine gives individual instances unique appearance and text by minting
//! deterministic virtual type ids per (base type, content hash), pushing
//! their cloned definitions and translation strings to exactly the
//! observers that need them, and transparently mapping virtual ids back to
//! canonical ones on the inbound path. Nothing is registered in the host's
//! global catalog and nothing survives a restart.

use std::io;
use std::sync::Arc;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

pub mod catalog;
pub mod compose;
pub mod env;
pub mod error;
pub mod global;
pub mod protocol;
pub mod provider;
pub mod sync;
pub mod virtual_items;

use crate::catalog::{ItemCatalog, TooltipTransport, TranslationService};
use crate::compose::TooltipComposer;
use crate::env::Settings;
use crate::global::{GlobalOverrideStore, GlobalTooltipManager};
use crate::provider::custom_data::CustomDataTooltipProvider;
use crate::provider::TooltipProvider;
use crate::sync::{ObserverCtx, ProcessScope, TooltipSync};
use crate::virtual_items::VirtualItemRegistry;

pub struct LoggerManager {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

impl LoggerManager {
    pub fn setup(settings: &Settings) -> Self {
        let file_appender = RollingFileAppender::new(
            Rotation::DAILY,
            &settings.logging.directory,
            &settings.logging.filename,
        );
        let (non_blocking_file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.logging.log_level));

        let console_layer = fmt::layer()
            .with_writer(io::stdout)
            .with_ansi(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .pretty();

        let file_layer = fmt::layer()
            .with_writer(non_blocking_file_writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .pretty();

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        tracing::info!(
            "logger initialized: console and file ({}/{}) output active",
            settings.logging.directory,
            settings.logging.filename
        );

        Self { _guard: guard }
    }
}

/// The engine facade. Owns the composer, the virtual item registry and the
/// synchronization layer; every cache lives inside this instance, so
/// multiple engines can coexist in one process (and in one test).
pub struct TooltipEngine {
    composer: Arc<TooltipComposer>,
    registry: Arc<VirtualItemRegistry>,
    sync: Arc<TooltipSync>,
    global: GlobalTooltipManager,
}

impl TooltipEngine {
    pub fn new(
        settings: Settings,
        item_catalog: Arc<dyn ItemCatalog>,
        translations: Arc<dyn TranslationService>,
        transport: Arc<dyn TooltipTransport>,
    ) -> Self {
        let composer = Arc::new(TooltipComposer::new(settings.caches.item_state_capacity));
        let registry = Arc::new(VirtualItemRegistry::new(
            item_catalog,
            translations,
            settings.caches.definition_capacity,
            settings.caches.built_description_capacity,
        ));
        let global_overrides = Arc::new(GlobalOverrideStore::default());
        let sync = Arc::new(TooltipSync::new(
            settings.sync.clone(),
            Arc::clone(&composer),
            Arc::clone(&registry),
            Arc::clone(&transport),
            Arc::clone(&global_overrides),
        ));
        let global = GlobalTooltipManager::new(
            Arc::clone(&registry),
            Arc::clone(&sync),
            transport,
            global_overrides,
        );

        composer.register_provider(Arc::new(CustomDataTooltipProvider));

        Self {
            composer,
            registry,
            sync,
            global,
        }
    }

    // --- Provider management ---

    /// Registers a tooltip provider; a provider with the same id is
    /// replaced.
    pub fn register_provider(&self, provider: Arc<dyn TooltipProvider>) {
        self.composer.register_provider(provider);
    }

    /// Unregisters a provider by id; returns `false` if not found.
    pub fn unregister_provider(&self, provider_id: &str) -> bool {
        self.composer.unregister_provider(provider_id)
    }

    // --- Packet path ---

    /// Processes one outbound packet in place before the host sends it.
    pub fn handle_outbound(
        &self,
        ctx: &ObserverCtx,
        packet: &mut protocol::OutboundPacket,
        scope: &mut ProcessScope,
    ) {
        Arc::clone(&self.sync).handle_outbound(ctx, packet, scope);
    }

    /// Rewrites virtual ids in one inbound message back to canonical ids.
    pub fn handle_inbound(&self, packet: &mut protocol::InboundPacket) {
        self.sync.handle_inbound(packet);
    }

    // --- Lifecycle events from the host ---

    /// A new observer connected: push any active global tooltips so their
    /// first view is already consistent.
    pub fn on_observer_connected(&self, observer: Uuid, locale: Option<&str>) {
        self.global.send_all_updates(observer, locale);
    }

    /// Observer disconnected: all bookkeeping for it is dropped.
    pub fn on_observer_disconnected(&self, observer: Uuid) {
        self.sync.on_observer_disconnect(observer);
        self.registry.on_observer_disconnect(observer);
    }

    /// A disruptive context switch (world/scene change) started for this
    /// observer; auxiliary pushes are deferred until after its next full
    /// snapshot.
    pub fn on_context_transition_started(&self, observer: Uuid) {
        self.sync.on_context_transition_started(observer);
    }

    // --- Invalidation & refresh ---

    /// Drops every cache affecting this observer's tooltip output. The
    /// next outbound snapshot is recomposed from scratch.
    pub fn invalidate_observer(&self, observer: Uuid) {
        self.composer.clear_cache();
        self.registry.invalidate_observer(observer);
        self.sync.invalidate_observer(observer);
        tracing::debug!("invalidated tooltip caches for observer {}", observer);
    }

    /// Drops every cache, global and per-observer.
    pub fn invalidate_all(&self) {
        self.composer.clear_cache();
        self.registry.clear_cache();
        self.sync.invalidate_all();
        tracing::info!("invalidated all tooltip caches");
    }

    /// Invalidates and immediately replays the observer's last inventory
    /// snapshot with fresh provider data. Returns whether a refreshed
    /// snapshot was delivered.
    pub fn refresh_observer(&self, observer: Uuid) -> bool {
        self.invalidate_observer(observer);
        self.sync.refresh_observer(observer)
    }

    /// Invalidates everything and refreshes every known observer;
    /// returns how many were delivered.
    pub fn refresh_all(&self) -> usize {
        self.invalidate_all();
        self.sync.refresh_all()
    }

    /// Number of observers currently tracked on the outbound path.
    pub fn observer_count(&self) -> usize {
        self.sync.known_observer_count()
    }

    /// Drops locale-dependent text caches; call when an observer switches
    /// language so text re-resolves on the next snapshot.
    pub fn clear_language_caches(&self) {
        self.registry.clear_language_caches();
    }

    /// Type-wide tooltip overrides that bypass virtual ids entirely.
    pub fn global_tooltips(&self) -> &GlobalTooltipManager {
        &self.global
    }
}

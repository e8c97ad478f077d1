//! Observer synchronization layer: intercepts outbound state snapshots,
//! substitutes virtual item ids (or canonical-key translation overrides,
//! per section policy), pushes the minimal definition/translation delta to
//! each observer, and rewrites inbound virtual ids back to canonical ids
//! before gameplay logic sees them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::TooltipTransport;
use crate::compose::TooltipComposer;
use crate::env::SyncSettings;
use crate::global::GlobalOverrideStore;
use crate::protocol::{
    CustomPage, InboundPacket, InteractionChain, InventorySection, InventoryUpdate,
    ItemDefinition, OutboundPacket, WindowUpdate,
};
use crate::virtual_items::{
    self, DefinitionOverrides, VirtualItemRegistry,
};

/// Identity and locale of one connected observer, supplied by the host on
/// every outbound call.
#[derive(Debug, Clone)]
pub struct ObserverCtx {
    pub id: Uuid,
    pub locale: Option<String>,
}

impl ObserverCtx {
    pub fn new(id: Uuid, locale: Option<String>) -> Self {
        Self { id, locale }
    }

    fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }
}

/// Re-entrancy guard scoped to one processing call chain. The host creates
/// one per connection (or per delivery call chain) and passes it to
/// [`TooltipSync::handle_outbound`]; if the host's delivery pipe loops an
/// engine-injected packet back through the filter, the scope stops it from
/// being processed as nested traffic.
#[derive(Debug, Default)]
pub struct ProcessScope {
    in_flight: bool,
}

impl ProcessScope {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Definitions and translation strings accumulated while processing one
/// outbound packet, flushed as a single delta at the end.
#[derive(Default)]
struct PendingPush {
    virtual_items: HashMap<String, Arc<ItemDefinition>>,
    translations: HashMap<String, String>,
}

pub struct TooltipSync {
    settings: SyncSettings,
    composer: Arc<TooltipComposer>,
    registry: Arc<VirtualItemRegistry>,
    transport: Arc<dyn TooltipTransport>,
    /// Active type-wide overrides; consulted when reverting a stale
    /// per-observer translation override so the revert does not clobber
    /// them.
    global_overrides: Arc<GlobalOverrideStore>,

    /// Last translations pushed per observer, for delta computation.
    last_sent_translations: DashMap<Uuid, HashMap<String, String>>,
    /// Deep copy of the last unprocessed inventory snapshot, for replay.
    last_raw_inventory: DashMap<Uuid, InventoryUpdate>,
    /// Observers seen on the outbound path, with their latest locale.
    known_observers: DashMap<Uuid, ObserverCtx>,
    /// Observers between a context switch and their next full snapshot.
    transitioning: DashMap<Uuid, ()>,
    /// Canonical translation keys currently overridden per observer by the
    /// translation-only strategy (key -> base item id, for revert).
    canonical_overrides: DashMap<Uuid, HashMap<String, String>>,
}

impl TooltipSync {
    pub fn new(
        settings: SyncSettings,
        composer: Arc<TooltipComposer>,
        registry: Arc<VirtualItemRegistry>,
        transport: Arc<dyn TooltipTransport>,
        global_overrides: Arc<GlobalOverrideStore>,
    ) -> Self {
        Self {
            settings,
            composer,
            registry,
            transport,
            global_overrides,
            last_sent_translations: DashMap::new(),
            last_raw_inventory: DashMap::new(),
            known_observers: DashMap::new(),
            transitioning: DashMap::new(),
            canonical_overrides: DashMap::new(),
        }
    }

    // --- Outbound path ---

    /// Processes one outbound packet in place. Must be called before the
    /// host serializes the packet for this observer.
    pub fn handle_outbound(
        self: Arc<Self>,
        ctx: &ObserverCtx,
        packet: &mut OutboundPacket,
        scope: &mut ProcessScope,
    ) {
        if scope.in_flight {
            return;
        }
        scope.in_flight = true;

        self.known_observers.insert(ctx.id, ctx.clone());

        match packet {
            OutboundPacket::JoinWorld => {
                self.on_context_transition_started(ctx.id);
            }
            OutboundPacket::UpdateInventory(inventory) => {
                // Keep the raw snapshot before processing mutates it.
                self.last_raw_inventory.insert(ctx.id, inventory.clone());

                if self.transitioning.remove(&ctx.id).is_some() {
                    // Let the vanilla snapshot through unmodified and apply
                    // tooltips via a deferred replay. Without an ambient
                    // runtime the replay cannot be scheduled; process the
                    // snapshot inline rather than dropping tooltips.
                    if !Arc::clone(&self).schedule_post_transition_refresh(ctx.id) {
                        warn!(
                            "no async runtime for deferred refresh, processing snapshot for {} inline",
                            ctx.id
                        );
                        self.process_inventory(ctx, inventory);
                    }
                } else {
                    self.process_inventory(ctx, inventory);
                }
            }
            OutboundPacket::OpenWindow(window) | OutboundPacket::UpdateWindow(window) => {
                self.process_window(ctx, window);
            }
            OutboundPacket::CustomPage(page) => {
                self.process_custom_page(ctx, page);
            }
        }

        scope.in_flight = false;
    }

    fn process_inventory(&self, ctx: &ObserverCtx, inventory: &mut InventoryUpdate) {
        let mut pending = PendingPush::default();
        let mut needed_canonical: HashMap<String, String> = HashMap::new();

        for (name, section) in inventory.sections_mut() {
            let Some(section) = section.as_mut() else {
                continue;
            };
            if self
                .settings
                .translation_only_sections
                .iter()
                .any(|s| s == name)
            {
                self.process_section_translation_only(
                    ctx,
                    section,
                    &mut pending,
                    &mut needed_canonical,
                );
            } else {
                self.process_section(ctx, Some(name), section, &mut pending);
            }
        }

        self.revert_stale_canonical_overrides(ctx, needed_canonical, &mut pending);
        self.send_auxiliary(ctx, pending);
    }

    fn process_window(&self, ctx: &ObserverCtx, window: &mut WindowUpdate) {
        let Some(section) = window.inventory.as_mut() else {
            return;
        };
        let mut pending = PendingPush::default();
        self.process_section(ctx, None, section, &mut pending);
        self.send_auxiliary(ctx, pending);
    }

    /// Rewrites each occupied slot that composes to a non-empty tooltip to
    /// carry a virtual item id, queueing the definition and translations.
    /// A slot that fails (no composition, missing base definition) is left
    /// canonical and its stale tracking cleared; one bad slot never aborts
    /// the rest of the section.
    fn process_section(
        &self,
        ctx: &ObserverCtx,
        section_name: Option<&str>,
        section: &mut InventorySection,
        pending: &mut PendingPush,
    ) {
        for (slot, stack) in section.items.iter_mut() {
            let track = |registry: &VirtualItemRegistry, virtual_id: Option<&str>| {
                if let Some(name) = section_name {
                    registry.track_slot_virtual_id(ctx.id, &format!("{}:{}", name, slot), virtual_id);
                }
            };

            if stack.is_empty() {
                track(&self.registry, None);
                continue;
            }
            if virtual_items::is_virtual_id(&stack.item_id) {
                continue;
            }

            let Some(composed) =
                self.composer
                    .compose(&stack.item_id, stack.metadata.as_deref(), ctx.locale())
            else {
                track(&self.registry, None);
                continue;
            };

            let base_item_id = stack.item_id.clone();
            let virtual_id =
                virtual_items::generate_virtual_id(&base_item_id, &composed.combined_hash);

            let definition = match self.registry.get_or_create_definition(
                &base_item_id,
                &virtual_id,
                DefinitionOverrides {
                    name_override: composed.name_override.as_deref(),
                    visual_overrides: composed.visual_overrides.as_ref(),
                    ..Default::default()
                },
            ) {
                Ok(definition) => definition,
                Err(err) => {
                    warn!("leaving slot canonical, cannot build virtual item: {}", err);
                    track(&self.registry, None);
                    continue;
                }
            };

            pending.virtual_items.insert(virtual_id.clone(), definition);

            let desc_key = virtual_items::virtual_description_key(&virtual_id);
            if !pending.translations.contains_key(&desc_key) {
                let original = self.registry.original_description(&base_item_id, ctx.locale());
                let enriched = composed.build_description(Some(&original));
                self.registry.cache_description(&virtual_id, &enriched);
                pending.translations.insert(desc_key, enriched);
            }

            if let Some(ref name) = composed.name_override {
                pending
                    .translations
                    .insert(virtual_items::virtual_name_key(&virtual_id), name.clone());
            }

            stack.item_id = virtual_id.clone();
            track(&self.registry, Some(&virtual_id));
        }
    }

    /// Translation-only strategy for sections whose contents the client
    /// echoes back in interaction messages: the slot keeps its canonical
    /// item id and only the translation string bound to that canonical
    /// type is overridden for this observer.
    fn process_section_translation_only(
        &self,
        ctx: &ObserverCtx,
        section: &mut InventorySection,
        pending: &mut PendingPush,
        needed_canonical: &mut HashMap<String, String>,
    ) {
        for stack in section.items.values() {
            if stack.is_empty() || virtual_items::is_virtual_id(&stack.item_id) {
                continue;
            }
            let Some(composed) =
                self.composer
                    .compose(&stack.item_id, stack.metadata.as_deref(), ctx.locale())
            else {
                continue;
            };

            let key = self.registry.item_description_key(&stack.item_id);
            let original = self.registry.original_description(&stack.item_id, ctx.locale());
            pending
                .translations
                .insert(key.clone(), composed.build_description(Some(&original)));
            needed_canonical.insert(key, stack.item_id.clone());
        }
    }

    /// Restores the original text for canonical keys this observer no
    /// longer needs overridden. Other observers are unaffected: overrides
    /// and reverts are pushed per observer.
    fn revert_stale_canonical_overrides(
        &self,
        ctx: &ObserverCtx,
        needed: HashMap<String, String>,
        pending: &mut PendingPush,
    ) {
        let mut active = self.canonical_overrides.entry(ctx.id).or_default();
        for (key, base_item_id) in active.iter() {
            if !needed.contains_key(key) {
                let original = self.registry.original_description(base_item_id, ctx.locale());
                // An active type-wide override is the text every observer
                // is supposed to see; restore it, not the raw original.
                let text = self
                    .global_overrides
                    .compose_description(base_item_id, &original)
                    .unwrap_or(original);
                pending.translations.insert(key.clone(), text);
            }
        }
        *active = needed;
    }

    /// Rewrites item-id references inside free-form UI command payloads.
    /// The payload is a JSON document; slot `"0"` may hold a plain item id
    /// or an array of item-grid slot documents.
    fn process_custom_page(&self, ctx: &ObserverCtx, page: &mut CustomPage) {
        if page.commands.is_empty() {
            return;
        }

        let mut pending = PendingPush::default();

        for command in page.commands.iter_mut() {
            if command.data.is_empty() {
                continue;
            }
            if let Some(rewritten) = self.rewrite_custom_ui_data(ctx, &command.data, &mut pending) {
                command.data = rewritten;
            }
        }

        self.send_auxiliary(ctx, pending);
    }

    fn rewrite_custom_ui_data(
        &self,
        ctx: &ObserverCtx,
        data: &str,
        pending: &mut PendingPush,
    ) -> Option<String> {
        let mut doc: Value = match serde_json::from_str(data) {
            Ok(doc) => doc,
            Err(err) => {
                debug!("could not parse custom UI command data: {}", err);
                return None;
            }
        };

        let mut modified = false;

        match doc.get_mut("0") {
            Some(Value::String(item_id)) => {
                if !virtual_items::is_virtual_id(item_id) {
                    if let Some(virtual_id) =
                        self.recover_virtual_id(ctx, &item_id.clone(), pending)
                    {
                        *item_id = virtual_id;
                        modified = true;
                    }
                }
            }
            Some(Value::Array(elements)) => {
                for element in elements.iter_mut() {
                    if self.rewrite_item_grid_slot(ctx, element, pending) {
                        modified = true;
                    }
                }
            }
            _ => {}
        }

        modified.then(|| doc.to_string())
    }

    fn rewrite_item_grid_slot(
        &self,
        ctx: &ObserverCtx,
        slot_doc: &mut Value,
        pending: &mut PendingPush,
    ) -> bool {
        let Some(item_id_value) = slot_doc
            .get_mut("ItemStack")
            .and_then(|stack| stack.get_mut("ItemId"))
        else {
            return false;
        };
        let Value::String(item_id) = item_id_value else {
            return false;
        };
        if virtual_items::is_virtual_id(item_id) {
            return false;
        }

        match self.recover_virtual_id(ctx, &item_id.clone(), pending) {
            Some(virtual_id) => {
                *item_id_value = Value::String(virtual_id);
                true
            }
            None => false,
        }
    }

    /// Recovers a plausible virtual id for a base type referenced outside
    /// its originating section, reusing the tracked slot state instead of
    /// recomputing composition. Only ids with a cached built description
    /// are substituted, so the observer is guaranteed a translation push.
    fn recover_virtual_id(
        &self,
        ctx: &ObserverCtx,
        base_item_id: &str,
        pending: &mut PendingPush,
    ) -> Option<String> {
        let virtual_id = self
            .registry
            .find_virtual_id_for_base_item(ctx.id, base_item_id)?;
        let description = self.registry.cached_description(&virtual_id)?;

        // The definition was cached with the correct name variant when the
        // slot was first processed; the unnamed lookup reuses it or
        // rebuilds an equivalent clone.
        let definition = match self.registry.get_or_create_definition(
            base_item_id,
            &virtual_id,
            DefinitionOverrides::default(),
        ) {
            Ok(definition) => definition,
            Err(err) => {
                warn!("cannot rebuild virtual item for custom UI: {}", err);
                return None;
            }
        };

        pending
            .translations
            .insert(virtual_items::virtual_description_key(&virtual_id), description);
        pending.virtual_items.insert(virtual_id.clone(), definition);
        Some(virtual_id)
    }

    // --- Auxiliary push ---

    /// Pushes only what the observer is missing: definitions not yet sent,
    /// and the translation delta against the last-sent map. Transport
    /// failures are logged, never retried; the next snapshot self-heals.
    fn send_auxiliary(&self, ctx: &ObserverCtx, pending: PendingPush) {
        let PendingPush {
            virtual_items,
            translations,
        } = pending;
        if virtual_items.is_empty() && translations.is_empty() {
            return;
        }

        let unsent = self
            .registry
            .mark_and_get_unsent(ctx.id, virtual_items.keys().cloned());
        if !unsent.is_empty() {
            let to_send: HashMap<String, Arc<ItemDefinition>> = virtual_items
                .into_iter()
                .filter(|(id, _)| unsent.contains(id))
                .collect();
            if let Err(err) = self.transport.push_item_definitions(ctx.id, &to_send) {
                warn!("failed to push virtual item definitions to {}: {}", ctx.id, err);
            }
        }

        if !translations.is_empty() {
            // The shard guard must not be held across the transport call:
            // a blocking push would stall same-shard observers and a
            // transport that re-enters the engine would deadlock.
            let delta = {
                let last_sent = self.last_sent_translations.entry(ctx.id).or_default();
                compute_translation_delta(&last_sent, &translations)
            };
            if !delta.is_empty() {
                if let Err(err) = self.transport.push_translations(ctx.id, &delta) {
                    warn!("failed to push translations to {}: {}", ctx.id, err);
                }
                self.last_sent_translations
                    .entry(ctx.id)
                    .or_default()
                    .extend(delta);
            }
        }
    }

    // --- Inbound path ---

    /// Rewrites any virtual item id carried by an inbound message back to
    /// its canonical base id, recursively through nested forks. Canonical
    /// ids pass through untouched.
    pub fn handle_inbound(&self, packet: &mut InboundPacket) {
        match packet {
            InboundPacket::MouseInteraction(interaction) => {
                rewrite_virtual_ref(&mut interaction.item_in_hand_id);
            }
            InboundPacket::SyncInteractionChains { updates } => {
                for chain in updates.iter_mut() {
                    rewrite_chain(chain);
                }
            }
        }
    }

    // --- Transition / refresh ---

    /// Marks the observer as mid context switch. The client must answer
    /// the switch with its ready handshake; auxiliary pushes injected now
    /// could delay that past the host's timeout, so processing is deferred
    /// until the first full snapshot after the switch.
    pub fn on_context_transition_started(&self, observer: Uuid) {
        self.transitioning.insert(observer, ());
    }

    /// Returns `false` when no tokio runtime is reachable from the calling
    /// thread; the caller must then fall back to inline processing.
    fn schedule_post_transition_refresh(self: Arc<Self>, observer: Uuid) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let delay = self.settings.post_transition_refresh_delay_secs;
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            if !self.refresh_observer(observer) {
                debug!("post-transition refresh skipped for {}: no snapshot", observer);
            }
        });
        true
    }

    /// Replays the observer's last raw inventory snapshot through the
    /// normal processing path and delivers the result, forcing a full
    /// recomposition with currently-registered providers. Returns whether
    /// a refreshed snapshot was delivered.
    pub fn refresh_observer(&self, observer: Uuid) -> bool {
        let Some(ctx) = self.known_observers.get(&observer).map(|c| c.clone()) else {
            return false;
        };
        let Some(mut snapshot) = self.last_raw_inventory.get(&observer).map(|s| s.clone()) else {
            return false;
        };

        self.process_inventory(&ctx, &mut snapshot);

        match self.transport.push_state_snapshot(observer, snapshot) {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to deliver refresh snapshot to {}: {}", observer, err);
                false
            }
        }
    }

    /// Refreshes every known observer; returns how many were delivered.
    pub fn refresh_all(&self) -> usize {
        let observers: Vec<Uuid> = self.known_observers.iter().map(|e| *e.key()).collect();
        let count = observers
            .into_iter()
            .filter(|observer| self.refresh_observer(*observer))
            .count();
        info!("refreshed tooltips for {} observers", count);
        count
    }

    // --- Lifecycle ---

    pub fn on_observer_disconnect(&self, observer: Uuid) {
        self.transitioning.remove(&observer);
        self.last_sent_translations.remove(&observer);
        self.last_raw_inventory.remove(&observer);
        self.known_observers.remove(&observer);
        self.canonical_overrides.remove(&observer);
    }

    /// Forgets what has been sent to this observer so the next snapshot is
    /// fully reprocessed. The raw snapshot and observer identity are kept
    /// for a subsequent refresh.
    pub fn invalidate_observer(&self, observer: Uuid) {
        self.last_sent_translations.remove(&observer);
        self.canonical_overrides.remove(&observer);
    }

    pub fn invalidate_all(&self) {
        self.last_sent_translations.clear();
        self.canonical_overrides.clear();
    }

    pub fn known_observer_count(&self) -> usize {
        self.known_observers.len()
    }

    /// Snapshot of every observer seen on the outbound path, with the
    /// locale each was last seen with.
    pub fn known_observers(&self) -> Vec<ObserverCtx> {
        self.known_observers.iter().map(|e| e.value().clone()).collect()
    }
}

fn rewrite_virtual_ref(id: &mut Option<String>) {
    let base = id
        .as_deref()
        .and_then(virtual_items::base_item_id)
        .map(str::to_string);
    if let Some(base) = base {
        *id = Some(base);
    }
}

fn rewrite_chain(chain: &mut InteractionChain) {
    rewrite_virtual_ref(&mut chain.item_in_hand_id);
    rewrite_virtual_ref(&mut chain.utility_item_id);
    rewrite_virtual_ref(&mut chain.tools_item_id);
    for fork in chain.new_forks.iter_mut() {
        rewrite_chain(fork);
    }
}

/// Key-by-key comparison against the last-sent map; a key absent from the
/// delta is already correct on the remote side.
fn compute_translation_delta(
    last_sent: &HashMap<String, String>,
    current: &HashMap<String, String>,
) -> HashMap<String, String> {
    if last_sent.is_empty() {
        return current.clone();
    }
    current
        .iter()
        .filter(|(key, value)| last_sent.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

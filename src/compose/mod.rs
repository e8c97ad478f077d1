//! Composition engine: queries every registered provider for one
//! `(item, state)` pair and merges the contributions into a single
//! deterministic [`ComposedTooltip`] with a stable combined hash.
//!
//! Two cache levels sit in front of the providers:
//! 1. an item-state cache keyed by the exact `(item, state, locale)`
//!    triple, including a negative sentinel so "nothing to contribute" is
//!    also a fast path. Bounded: past capacity new entries are rejected,
//!    which degrades to a miss, never a failure;
//! 2. a composed cache keyed by the combined hash, so distinct items whose
//!    providers emit identical outputs share one composed result.
//!
//! The provider list itself is a copy-on-write snapshot: reads on the
//! packet path never block on a concurrent register/unregister.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::protocol::ItemVisualOverrides;
use crate::provider::{TooltipData, TooltipProvider};

/// The deterministic merge of all providers' contributions for one
/// combined state hash. Immutable after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedTooltip {
    pub additive_lines: Vec<String>,
    pub name_override: Option<String>,
    pub description_override: Option<String>,
    pub visual_overrides: Option<ItemVisualOverrides>,
    pub combined_hash: String,
}

impl ComposedTooltip {
    /// Builds the final description by applying this composed tooltip to
    /// the item's original description text.
    ///
    /// A description override wins outright and discards every additive
    /// line. Otherwise the additive lines are appended after the original,
    /// separated by a blank line.
    pub fn build_description(&self, original: Option<&str>) -> String {
        if let Some(ref over) = self.description_override {
            return over.clone();
        }

        let mut out = String::new();
        if let Some(original) = original {
            if !original.is_empty() {
                out.push_str(original);
            }
        }
        if !self.additive_lines.is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&self.additive_lines.join("\n"));
        }
        out
    }
}

/// Cached outcome for one exact item state. `None` payload = the negative
/// sentinel (no provider had anything).
type StateEntry = Option<Arc<ComposedTooltip>>;

pub struct TooltipComposer {
    /// Registration-ordered provider list; writes go through this lock.
    providers: Mutex<Vec<Arc<dyn TooltipProvider>>>,
    /// Priority-sorted snapshot swapped atomically on every write, read
    /// lock-free on the packet path.
    snapshot: ArcSwap<Vec<Arc<dyn TooltipProvider>>>,
    composed_cache: DashMap<String, Arc<ComposedTooltip>>,
    item_state_cache: DashMap<String, StateEntry>,
    state_capacity: usize,
}

impl TooltipComposer {
    pub fn new(state_capacity: usize) -> Self {
        Self {
            providers: Mutex::new(Vec::new()),
            snapshot: ArcSwap::from_pointee(Vec::new()),
            composed_cache: DashMap::new(),
            item_state_cache: DashMap::new(),
            state_capacity,
        }
    }

    // --- Provider management ---

    /// Registers a provider. A provider with the same id is replaced in
    /// place, keeping its original registration position for priority
    /// tie-breaking. Registration invalidates both caches in full:
    /// composition logic may have changed for any item.
    pub fn register_provider(&self, provider: Arc<dyn TooltipProvider>) {
        {
            let mut providers = self.providers.lock();
            match providers
                .iter()
                .position(|p| p.provider_id() == provider.provider_id())
            {
                Some(idx) => providers[idx] = Arc::clone(&provider),
                None => providers.push(Arc::clone(&provider)),
            }
            self.rebuild_snapshot(&providers);
        }
        info!(
            "registered tooltip provider: {} (priority={})",
            provider.provider_id(),
            provider.priority()
        );
        self.clear_cache();
    }

    /// Removes a provider by id. Returns `false` if no such provider was
    /// registered.
    pub fn unregister_provider(&self, provider_id: &str) -> bool {
        let removed = {
            let mut providers = self.providers.lock();
            let before = providers.len();
            providers.retain(|p| p.provider_id() != provider_id);
            if providers.len() == before {
                return false;
            }
            self.rebuild_snapshot(&providers);
            true
        };
        info!("unregistered tooltip provider: {}", provider_id);
        self.clear_cache();
        removed
    }

    fn rebuild_snapshot(&self, providers: &[Arc<dyn TooltipProvider>]) {
        let mut sorted: Vec<_> = providers.to_vec();
        // Stable sort: equal priorities keep registration order.
        sorted.sort_by_key(|p| p.priority());
        self.snapshot.store(Arc::new(sorted));
    }

    // --- Composition ---

    /// Composes the tooltip for one item instance, or `None` if no
    /// registered provider has anything to contribute.
    pub fn compose(
        &self,
        item_id: &str,
        metadata: Option<&str>,
        locale: Option<&str>,
    ) -> Option<Arc<ComposedTooltip>> {
        let state_key = Self::state_key(item_id, metadata, locale);
        if let Some(cached) = self.item_state_cache.get(&state_key) {
            return cached.clone();
        }

        let snapshot = self.snapshot.load();
        if snapshot.is_empty() {
            return None;
        }

        let mut results: Vec<(&Arc<dyn TooltipProvider>, TooltipData)> = Vec::new();
        for provider in snapshot.iter() {
            match provider.tooltip_data(item_id, metadata, locale) {
                Ok(Some(data)) if !data.is_empty() => results.push((provider, data)),
                Ok(_) => {}
                Err(err) => {
                    // One misbehaving provider never takes down the rest.
                    warn!("tooltip provider error, skipping contribution: {}", err);
                }
            }
        }

        if results.is_empty() {
            self.cache_item_state(state_key, None);
            return None;
        }

        let mut hash_input = String::new();
        for (provider, data) in &results {
            hash_input.push_str(provider.provider_id());
            hash_input.push(':');
            hash_input.push_str(&data.stable_hash_input);
            hash_input.push(';');
        }
        let combined_hash = compute_hash(&hash_input);

        let composed = self
            .composed_cache
            .entry(combined_hash.clone())
            .or_insert_with(|| {
                Arc::new(Self::build_composed(
                    results.iter().map(|(_, d)| d),
                    combined_hash.clone(),
                ))
            })
            .clone();

        self.cache_item_state(state_key, Some(Arc::clone(&composed)));
        Some(composed)
    }

    fn state_key(item_id: &str, metadata: Option<&str>, locale: Option<&str>) -> String {
        let mut key = String::with_capacity(
            item_id.len() + metadata.map_or(0, str::len) + locale.map_or(0, str::len) + 2,
        );
        key.push_str(item_id);
        if let Some(metadata) = metadata {
            key.push('\0');
            key.push_str(metadata);
        }
        if let Some(locale) = locale {
            key.push('\0');
            key.push_str(locale);
        }
        key
    }

    fn cache_item_state(&self, state_key: String, entry: StateEntry) {
        // Reject-at-capacity: no eviction, a full cache just stops growing.
        if self.item_state_cache.len() < self.state_capacity {
            self.item_state_cache.insert(state_key, entry);
        }
    }

    /// Merges contributions in ascending-priority order: additive lines
    /// concatenate; name/description overrides take the last non-null
    /// value seen (the highest-priority provider wins); visual overrides
    /// merge field-wise with the same last-wins rule, except the additive
    /// stat-modifier maps which concatenate per key.
    fn build_composed<'a>(
        results: impl Iterator<Item = &'a TooltipData>,
        combined_hash: String,
    ) -> ComposedTooltip {
        let mut composed = ComposedTooltip {
            combined_hash,
            ..Default::default()
        };

        for data in results {
            if let Some(ref name) = data.name_override {
                composed.name_override = Some(name.clone());
            }
            if let Some(ref desc) = data.description_override {
                composed.description_override = Some(desc.clone());
            }
            composed.additive_lines.extend(data.lines.iter().cloned());
            if let Some(ref visual) = data.visual_overrides {
                merge_visual_overrides(&mut composed.visual_overrides, visual);
            }
        }

        composed
    }

    /// Clears both composition caches. Safe to call at any time; the next
    /// compose call repopulates lazily.
    pub fn clear_cache(&self) {
        self.composed_cache.clear();
        self.item_state_cache.clear();
    }
}

fn merge_visual_overrides(acc: &mut Option<ItemVisualOverrides>, next: &ItemVisualOverrides) {
    let acc = acc.get_or_insert_with(ItemVisualOverrides::default);

    macro_rules! take_last {
        ($($field:ident),+ $(,)?) => {
            $(if next.$field.is_some() {
                acc.$field = next.$field.clone();
            })+
        };
    }
    take_last!(
        model,
        texture,
        icon,
        animation,
        scale,
        quality_index,
        item_entity,
        armor,
        weapon,
        categories,
    );

    // Stat-modifier maps concatenate instead of replacing, so several
    // providers can each add their own modifier lines.
    for (source, target) in [
        (
            &next.additional_armor_stat_modifiers,
            &mut acc.additional_armor_stat_modifiers,
        ),
        (
            &next.additional_weapon_stat_modifiers,
            &mut acc.additional_weapon_stat_modifiers,
        ),
    ] {
        if let Some(source) = source {
            let target = target.get_or_insert_with(Default::default);
            for (key, modifiers) in source {
                target.entry(*key).or_default().extend(modifiers.iter().cloned());
            }
        }
    }
}

/// Deterministic 8-hex-char digest over the combined hash input: the first
/// 4 bytes of a SHA-256, rendered as hex.
pub fn compute_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..4])
}

//! Virtual item registry: mints deterministic virtual item ids per
//! `(base item, combined hash)` pair, builds and caches their cloned
//! definitions, and tracks per-observer knowledge of what has been sent.
//!
//! Virtual items are never registered in the host's asset catalog. They
//! exist only in the bounded definition cache here and in whatever
//! observers have already been told about them, which is why the id must
//! be re-derivable from its inputs alone.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::catalog::{ItemCatalog, TranslationService};
use crate::error::EngineError;
use crate::protocol::{
    InventoryUpdate, ItemDefinition, ItemEntityConfig, ItemTranslationProperties,
    ItemVisualOverrides, StatModifierMap,
};

/// Separator between the base item id and the tooltip hash.
pub const VIRTUAL_SEPARATOR: &str = "__dtt_";

/// Prefix for virtual item translation keys.
const KEY_PREFIX: &str = "server.items.dynamic.";

/// Deterministic virtual id for a base item + combined hash, e.g.
/// `"Tool_Pickaxe_Adamantite__dtt_a1b2c3d4"`. No randomness, no counter:
/// the same logical state always re-derives the same id.
pub fn generate_virtual_id(base_item_id: &str, combined_hash: &str) -> String {
    format!("{}{}{}", base_item_id, VIRTUAL_SEPARATOR, combined_hash)
}

/// Extracts the base item id from a virtual id, or `None` if the id is not
/// virtual.
pub fn base_item_id(virtual_or_real_id: &str) -> Option<&str> {
    match virtual_or_real_id.find(VIRTUAL_SEPARATOR) {
        Some(idx) if idx > 0 => Some(&virtual_or_real_id[..idx]),
        _ => None,
    }
}

pub fn is_virtual_id(item_id: &str) -> bool {
    item_id.contains(VIRTUAL_SEPARATOR)
}

/// The unique description translation key for a virtual item.
pub fn virtual_description_key(virtual_id: &str) -> String {
    format!("{}{}.description", KEY_PREFIX, virtual_id)
}

/// The unique name translation key for a virtual item.
pub fn virtual_name_key(virtual_id: &str) -> String {
    format!("{}{}.name", KEY_PREFIX, virtual_id)
}

/// Inputs that pick a definition variant of an otherwise-identical virtual
/// id. A name override changes the translation-key assignment without
/// changing the combined hash on some call paths, so variants must not
/// collide in the definition cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefinitionOverrides<'a> {
    pub name_override: Option<&'a str>,
    pub visual_overrides: Option<&'a ItemVisualOverrides>,
    pub name_translation_key: Option<&'a str>,
    pub description_translation_key: Option<&'a str>,
}

impl DefinitionOverrides<'_> {
    fn cache_key(&self, virtual_id: &str) -> String {
        let mut key = String::from(virtual_id);
        if self.name_override.is_some() {
            key.push_str(":named");
        }
        if let Some(nk) = self.name_translation_key {
            key.push_str(":nk=");
            key.push_str(nk);
        }
        if let Some(dk) = self.description_translation_key {
            key.push_str(":dk=");
            key.push_str(dk);
        }
        key
    }
}

pub struct VirtualItemRegistry {
    catalog: Arc<dyn ItemCatalog>,
    translations: Arc<dyn TranslationService>,

    /// Virtual definition cache, keyed by `(virtual id, variant)`. Bounded
    /// LRU; eviction is silent and idempotent, the next lookup rebuilds.
    definition_cache: Mutex<LruCache<String, Arc<ItemDefinition>>>,

    /// Per-observer: virtual ids already pushed to that observer.
    sent_to_observer: DashMap<Uuid, HashSet<String>>,
    /// Per-observer: slot key ("section:index") -> occupying virtual id.
    observer_slots: DashMap<Uuid, HashMap<String, String>>,

    /// Base item id -> description translation key.
    description_key_cache: DashMap<String, String>,
    /// "locale:base" -> original description text.
    original_description_cache: DashMap<String, String>,
    /// "locale:base" -> original name text (miss cached as None).
    original_name_cache: DashMap<String, Option<String>>,
    /// Virtual id -> built description string. Bounded LRU.
    built_description_cache: Mutex<LruCache<String, String>>,

    /// quality index -> dropped-item entity config, built lazily from one
    /// catalog scan.
    quality_entity_cache: Mutex<Option<Arc<HashMap<i32, ItemEntityConfig>>>>,
}

impl VirtualItemRegistry {
    pub fn new(
        catalog: Arc<dyn ItemCatalog>,
        translations: Arc<dyn TranslationService>,
        definition_capacity: usize,
        built_description_capacity: usize,
    ) -> Self {
        let definition_capacity =
            NonZeroUsize::new(definition_capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        let built_description_capacity =
            NonZeroUsize::new(built_description_capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            catalog,
            translations,
            definition_cache: Mutex::new(LruCache::new(definition_capacity)),
            sent_to_observer: DashMap::new(),
            observer_slots: DashMap::new(),
            description_key_cache: DashMap::new(),
            original_description_cache: DashMap::new(),
            original_name_cache: DashMap::new(),
            built_description_cache: Mutex::new(LruCache::new(built_description_capacity)),
            quality_entity_cache: Mutex::new(None),
        }
    }

    // --- Definition construction ---

    /// Gets or builds the cloned definition for a virtual item.
    ///
    /// The clone starts from the catalog's base definition (never mutated,
    /// only cloned) and applies, in order: the virtual id, visual
    /// overrides, quality entity-config resolution, resource-quantity
    /// zeroing, the browse-exclusion flag, and the translation keys.
    ///
    /// Translation-key precedence: an explicit caller-supplied key, else a
    /// key synthesized from the virtual id, else (for the name, when there
    /// is no override at all) the original key.
    pub fn get_or_create_definition(
        &self,
        base_item_id: &str,
        virtual_id: &str,
        overrides: DefinitionOverrides<'_>,
    ) -> Result<Arc<ItemDefinition>, EngineError> {
        let cache_key = overrides.cache_key(virtual_id);
        if let Some(cached) = self.definition_cache.lock().get(&cache_key) {
            return Ok(Arc::clone(cached));
        }

        let original = self
            .catalog
            .definition(base_item_id)
            .ok_or_else(|| EngineError::DefinitionNotFound(base_item_id.to_string()))?;

        let built = Arc::new(self.build_definition(base_item_id, virtual_id, original, &overrides));
        self.definition_cache
            .lock()
            .put(cache_key, Arc::clone(&built));
        Ok(built)
    }

    fn build_definition(
        &self,
        base_item_id: &str,
        virtual_id: &str,
        original: ItemDefinition,
        overrides: &DefinitionOverrides<'_>,
    ) -> ItemDefinition {
        let mut clone = original;
        clone.id = virtual_id.to_string();

        if let Some(visual) = overrides.visual_overrides {
            apply_visual_overrides(&mut clone, visual);

            // When the quality tier is raised but no explicit entity config
            // was supplied, borrow the config of a reference item with the
            // target quality so dropped items glow correctly.
            if let (Some(quality), None) = (visual.quality_index, visual.item_entity.as_ref()) {
                if let Some(config) = self.quality_entity_config(quality) {
                    clone.item_entity = Some(config);
                }
            }
        }

        // Zero resource quantities so virtual items don't double-count in
        // crafting aggregation. The resource types themselves must stay:
        // machinery checks for their presence to admit the item at all.
        if let Some(ref mut resource_types) = clone.resource_types {
            for resource in resource_types.iter_mut() {
                resource.quantity = 0;
            }
        }

        // Hide from default type-browsing surfaces.
        clone.variant = true;

        let mut props = clone.translation_properties.take().unwrap_or_default();
        props.description = Some(match overrides.description_translation_key {
            Some(key) => key.to_string(),
            None => virtual_description_key(virtual_id),
        });
        props.name = match (overrides.name_translation_key, overrides.name_override) {
            (Some(key), _) => Some(key.to_string()),
            (None, Some(_)) => Some(virtual_name_key(virtual_id)),
            (None, None) => props
                .name
                .or_else(|| Some(format!("server.items.{}.name", base_item_id))),
        };
        clone.translation_properties = Some(props);

        clone
    }

    fn quality_entity_config(&self, quality_index: i32) -> Option<ItemEntityConfig> {
        let mut guard = self.quality_entity_cache.lock();
        let cache = match guard.as_ref() {
            Some(cache) => Arc::clone(cache),
            None => {
                let mut built: HashMap<i32, ItemEntityConfig> = HashMap::new();
                self.catalog.for_each_definition(&mut |def| {
                    if let (Some(quality), Some(entity)) = (def.quality_index, &def.item_entity) {
                        if quality > 0 {
                            built.entry(quality).or_insert_with(|| entity.clone());
                        }
                    }
                });
                let built = Arc::new(built);
                *guard = Some(Arc::clone(&built));
                built
            }
        };
        cache.get(&quality_index).cloned()
    }

    // --- Per-observer sent tracking ---

    /// Marks every candidate id as sent to the observer and returns the
    /// subset that had not been sent before. Atomic per observer.
    pub fn mark_and_get_unsent(
        &self,
        observer: Uuid,
        candidates: impl IntoIterator<Item = String>,
    ) -> HashSet<String> {
        let mut sent = self.sent_to_observer.entry(observer).or_default();
        candidates
            .into_iter()
            .filter(|id| sent.insert(id.clone()))
            .collect()
    }

    // --- Per-observer slot tracking ---

    /// Records (or clears, with `None`) the virtual id occupying a slot.
    pub fn track_slot_virtual_id(&self, observer: Uuid, slot_key: &str, virtual_id: Option<&str>) {
        let mut slots = self.observer_slots.entry(observer).or_default();
        match virtual_id {
            Some(id) => {
                slots.insert(slot_key.to_string(), id.to_string());
            }
            None => {
                slots.remove(slot_key);
            }
        }
    }

    pub fn slot_virtual_id(&self, observer: Uuid, slot_key: &str) -> Option<String> {
        self.observer_slots
            .get(&observer)
            .and_then(|slots| slots.get(slot_key).cloned())
    }

    /// Scans the observer's tracked slots for a virtual id whose base item
    /// matches `real_item_id`. Used to recover a plausible virtual id for
    /// a base type appearing in an unrelated payload without recomputing
    /// composition.
    ///
    /// Two passes: primary-section slots first, then any slot. Within a
    /// pass the iteration order is unspecified; the result is a plausible
    /// id, not a guaranteed one.
    pub fn find_virtual_id_for_base_item(
        &self,
        observer: Uuid,
        real_item_id: &str,
    ) -> Option<String> {
        let slots = self.observer_slots.get(&observer)?;
        let primary_prefix = format!("{}:", InventoryUpdate::PRIMARY_SECTION);

        let matches = |virtual_id: &String| base_item_id(virtual_id) == Some(real_item_id);

        slots
            .iter()
            .find(|(key, id)| key.starts_with(&primary_prefix) && matches(id))
            .or_else(|| slots.iter().find(|(_, id)| matches(id)))
            .map(|(_, id)| id.clone())
    }

    // --- Original text resolution ---

    /// Description translation key for a base item, from the catalog or
    /// synthesized by convention when the catalog has no entry.
    pub fn item_description_key(&self, base_item_id: &str) -> String {
        if let Some(key) = self.description_key_cache.get(base_item_id) {
            return key.clone();
        }
        let key = self
            .catalog
            .definition(base_item_id)
            .and_then(|def| def.translation_properties.and_then(|p| p.description))
            .unwrap_or_else(|| format!("server.items.{}.description", base_item_id));
        self.description_key_cache
            .insert(base_item_id.to_string(), key.clone());
        key
    }

    /// The original (unmodified) description text for a base item, empty
    /// when unresolvable.
    pub fn original_description(&self, base_item_id: &str, locale: Option<&str>) -> String {
        let cache_key = locale_cache_key(locale, base_item_id);
        if let Some(text) = self.original_description_cache.get(&cache_key) {
            return text.clone();
        }
        let key = self.item_description_key(base_item_id);
        let text = self.translations.resolve(locale, &key).unwrap_or_default();
        self.original_description_cache.insert(cache_key, text.clone());
        text
    }

    /// The original (unmodified) display name for a base item.
    pub fn original_name(&self, base_item_id: &str, locale: Option<&str>) -> Option<String> {
        let cache_key = locale_cache_key(locale, base_item_id);
        if let Some(name) = self.original_name_cache.get(&cache_key) {
            return name.clone();
        }
        let name = self
            .catalog
            .definition(base_item_id)
            .and_then(|def| def.translation_properties.and_then(|p| p.name))
            .and_then(|key| self.translations.resolve(locale, &key));
        self.original_name_cache.insert(cache_key, name.clone());
        name
    }

    // --- Built description caching ---

    pub fn cache_description(&self, virtual_id: &str, description: &str) {
        let mut cache = self.built_description_cache.lock();
        if !cache.contains(virtual_id) {
            cache.put(virtual_id.to_string(), description.to_string());
        }
    }

    pub fn cached_description(&self, virtual_id: &str) -> Option<String> {
        self.built_description_cache.lock().get(virtual_id).cloned()
    }

    // --- Lifecycle ---

    /// Drops all bookkeeping for a disconnected observer.
    pub fn on_observer_disconnect(&self, observer: Uuid) {
        self.sent_to_observer.remove(&observer);
        self.observer_slots.remove(&observer);
    }

    /// Clears per-observer bookkeeping so the next snapshot triggers a
    /// full re-send, and drops built descriptions so they are recomposed
    /// with fresh text. Global definition caches are kept.
    pub fn invalidate_observer(&self, observer: Uuid) {
        self.sent_to_observer.remove(&observer);
        self.observer_slots.remove(&observer);
        self.built_description_cache.lock().clear();
    }

    /// Clears only locale-dependent caches (definitions are
    /// locale-independent, slot tracking is unaffected). Called when an
    /// observer switches language.
    pub fn clear_language_caches(&self) {
        self.original_description_cache.clear();
        self.original_name_cache.clear();
        self.built_description_cache.lock().clear();
    }

    /// Drops every cache, global and per-observer. Used on full reload.
    pub fn clear_cache(&self) {
        self.definition_cache.lock().clear();
        self.sent_to_observer.clear();
        self.observer_slots.clear();
        self.description_key_cache.clear();
        self.original_description_cache.clear();
        self.original_name_cache.clear();
        self.built_description_cache.lock().clear();
        *self.quality_entity_cache.lock() = None;
    }
}

fn locale_cache_key(locale: Option<&str>, base_item_id: &str) -> String {
    format!("{}:{}", locale.unwrap_or("_default"), base_item_id)
}

fn apply_visual_overrides(clone: &mut ItemDefinition, visual: &ItemVisualOverrides) {
    macro_rules! replace {
        ($($field:ident),+ $(,)?) => {
            $(if visual.$field.is_some() {
                clone.$field = visual.$field.clone();
            })+
        };
    }
    replace!(
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

    // Additive maps merge with the original's modifiers so the original
    // stat lines stay visible.
    if let Some(ref additional) = visual.additional_armor_stat_modifiers {
        let armor = clone.armor.get_or_insert_with(Default::default);
        merge_modifier_maps(&mut armor.stat_modifiers, additional);
    }
    if let Some(ref additional) = visual.additional_weapon_stat_modifiers {
        let weapon = clone.weapon.get_or_insert_with(Default::default);
        merge_modifier_maps(&mut weapon.stat_modifiers, additional);
    }
}

/// Per-key array concatenation: original entries first, additions after.
fn merge_modifier_maps(original: &mut StatModifierMap, additional: &StatModifierMap) {
    for (key, modifiers) in additional {
        original.entry(*key).or_default().extend(modifiers.iter().cloned());
    }
}

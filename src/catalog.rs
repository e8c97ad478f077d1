//! Traits the host implements for the engine's external collaborators:
//! the type catalog, the translation service and the per-observer
//! transport. The engine only ever reads through these; it never mutates
//! host-owned state.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::TransportError;
use crate::protocol::{InventoryUpdate, ItemDefinition};

/// Read access to the host's item type catalog.
pub trait ItemCatalog: Send + Sync {
    /// Returns the definition for a base item id, or `None` if the type is
    /// not (or no longer) registered.
    fn definition(&self, item_id: &str) -> Option<ItemDefinition>;

    /// Visits every registered definition. Used once, lazily, to build the
    /// quality-tier entity-config cache.
    fn for_each_definition(&self, visit: &mut dyn FnMut(&ItemDefinition));
}

/// Read access to the host's translation-string service.
pub trait TranslationService: Send + Sync {
    /// Resolves a translation key for a locale (`None` = server default).
    fn resolve(&self, locale: Option<&str>, key: &str) -> Option<String>;
}

/// Per-observer push channel for auxiliary data. All methods are
/// fire-and-forget best-effort; a failed push is logged by the engine and
/// never retried.
pub trait TooltipTransport: Send + Sync {
    /// Pushes virtual item definitions the observer has not seen yet.
    fn push_item_definitions(
        &self,
        observer: Uuid,
        items: &HashMap<String, Arc<ItemDefinition>>,
    ) -> Result<(), TransportError>;

    /// Pushes translation strings (key -> resolved text).
    fn push_translations(
        &self,
        observer: Uuid,
        translations: &HashMap<String, String>,
    ) -> Result<(), TransportError>;

    /// Delivers a full, already-processed inventory snapshot. Used by the
    /// refresh path to replay the observer's last known inventory.
    fn push_state_snapshot(
        &self,
        observer: Uuid,
        snapshot: InventoryUpdate,
    ) -> Result<(), TransportError>;
}

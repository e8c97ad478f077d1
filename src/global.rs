//! Type-wide tooltip overrides: lines every observer sees on every item of
//! a base type, delivered through the canonical type's translation key.
//! No virtual ids are involved; this is for system-wide notices where
//! per-instance uniqueness is unnecessary.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use crate::catalog::TooltipTransport;
use crate::sync::TooltipSync;
use crate::virtual_items::VirtualItemRegistry;

/// The active type-wide overrides, shared between the manager (which
/// mutates and broadcasts them) and the sync layer (which must not clobber
/// them when reverting a stale per-observer translation override).
#[derive(Default)]
pub struct GlobalOverrideStore {
    /// Additive lines per base type, appended after the original text.
    additive_lines: DashMap<String, Vec<String>>,
    /// Replacement lines per base type. Replace wins over additive.
    replaced_lines: DashMap<String, Vec<String>>,
}

impl GlobalOverrideStore {
    fn add_line(&self, base_item_id: &str, line: &str) {
        self.additive_lines
            .entry(base_item_id.to_string())
            .or_default()
            .push(line.to_string());
    }

    fn replace(&self, base_item_id: &str, lines: &[String]) {
        self.replaced_lines
            .insert(base_item_id.to_string(), lines.to_vec());
    }

    fn clear(&self, base_item_id: &str) -> bool {
        let removed_add = self.additive_lines.remove(base_item_id).is_some();
        let removed_rep = self.replaced_lines.remove(base_item_id).is_some();
        removed_add || removed_rep
    }

    /// The overridden description for a base type, or `None` when nothing
    /// is overridden. Replace wins outright; additive lines are appended
    /// after the original, separated by a blank line.
    pub fn compose_description(&self, base_item_id: &str, original: &str) -> Option<String> {
        if let Some(replace) = self.replaced_lines.get(base_item_id) {
            return Some(replace.join("\n"));
        }

        let add = self.additive_lines.get(base_item_id)?;
        if add.is_empty() {
            return None;
        }
        let mut out = String::new();
        if !original.is_empty() {
            out.push_str(original);
            out.push_str("\n\n");
        }
        out.push_str(&add.join("\n"));
        Some(out)
    }

    fn tracked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .additive_lines
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for entry in self.replaced_lines.iter() {
            if !ids.contains(entry.key()) {
                ids.push(entry.key().clone());
            }
        }
        ids
    }
}

pub struct GlobalTooltipManager {
    registry: Arc<VirtualItemRegistry>,
    sync: Arc<TooltipSync>,
    transport: Arc<dyn TooltipTransport>,
    overrides: Arc<GlobalOverrideStore>,
}

impl GlobalTooltipManager {
    pub fn new(
        registry: Arc<VirtualItemRegistry>,
        sync: Arc<TooltipSync>,
        transport: Arc<dyn TooltipTransport>,
        overrides: Arc<GlobalOverrideStore>,
    ) -> Self {
        Self {
            registry,
            sync,
            transport,
            overrides,
        }
    }

    /// Appends a line to the global tooltip of a base type and broadcasts
    /// the updated text to every known observer.
    pub fn add_global_line(&self, base_item_id: &str, line: &str) {
        self.overrides.add_line(base_item_id, line);
        self.broadcast([base_item_id]);
    }

    /// Replaces the global tooltip of a base type with the given lines.
    pub fn replace_global_tooltip(&self, base_item_id: &str, lines: &[String]) {
        self.overrides.replace(base_item_id, lines);
        self.broadcast([base_item_id]);
    }

    /// Clears every global override for a base type; observers get the
    /// original text back on the broadcast.
    pub fn clear_global_tooltips(&self, base_item_id: &str) {
        if self.overrides.clear(base_item_id) {
            self.broadcast([base_item_id]);
        }
    }

    /// Pushes every active global override to one observer. Call when an
    /// observer connects or needs a full refresh.
    pub fn send_all_updates(&self, observer: Uuid, locale: Option<&str>) {
        let ids: Vec<String> = self.overrides.tracked_ids();
        self.send_updates(observer, locale, ids.iter().map(String::as_str));
    }

    /// Injects the active global overrides into an init-stage translation
    /// map the host is about to send.
    pub fn inject_into_translations(
        &self,
        translations: &mut HashMap<String, String>,
        locale: Option<&str>,
    ) {
        for base_item_id in self.overrides.tracked_ids() {
            let key = self.registry.item_description_key(&base_item_id);
            if let Some(text) = self.global_description(&base_item_id, locale) {
                translations.insert(key, text);
            }
        }
    }

    /// The full description for a base type with global overrides applied.
    /// Falls back to the original text when nothing is overridden.
    pub fn global_description(&self, base_item_id: &str, locale: Option<&str>) -> Option<String> {
        let original = self.registry.original_description(base_item_id, locale);
        Some(
            self.overrides
                .compose_description(base_item_id, &original)
                .unwrap_or(original),
        )
    }

    fn broadcast<'a>(&self, base_item_ids: impl IntoIterator<Item = &'a str> + Clone) {
        for ctx in self.sync.known_observers() {
            self.send_updates(ctx.id, ctx.locale.as_deref(), base_item_ids.clone());
        }
    }

    fn send_updates<'a>(
        &self,
        observer: Uuid,
        locale: Option<&str>,
        base_item_ids: impl IntoIterator<Item = &'a str>,
    ) {
        let mut translations = HashMap::new();
        for base_item_id in base_item_ids {
            let key = self.registry.item_description_key(base_item_id);
            if let Some(text) = self.global_description(base_item_id, locale) {
                translations.insert(key, text);
            }
        }
        if translations.is_empty() {
            return;
        }
        if let Err(err) = self.transport.push_translations(observer, &translations) {
            warn!("failed to push global tooltip updates to {}: {}", observer, err);
        }
    }
}

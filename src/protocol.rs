//! Wire-shaped value types exchanged with the host protocol layer.
//!
//! These mirror the host's packet shapes at the boundary the engine
//! operates on. The engine never owns the canonical copies: definitions
//! come from the [`crate::catalog::ItemCatalog`] and are cloned before any
//! field is touched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One stat modifier entry. The engine treats modifiers as opaque payload;
/// it only ever concatenates arrays of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub stat: String,
    pub amount: f64,
}

/// Stat-modifier maps are keyed by a slot/stat index and hold an ordered
/// array of modifiers per key.
pub type StatModifierMap = HashMap<u32, Vec<Modifier>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemTranslationProperties {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemArmor {
    pub slot: Option<String>,
    #[serde(default)]
    pub stat_modifiers: StatModifierMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemWeapon {
    #[serde(default)]
    pub stat_modifiers: StatModifierMap,
}

/// Crafting/aggregation resource entry. Cloned definitions zero the
/// quantity so virtual items never double-count in crafting grids, but the
/// resource type itself must stay present (machinery checks for it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResourceType {
    pub resource_type: String,
    pub quantity: u32,
}

/// Dropped-item presentation config (particles, glow). Resolved per
/// quality tier when a visual override raises the quality index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemEntityConfig {
    pub particles: Option<String>,
    pub tint: Option<String>,
}

/// The cloneable per-type item descriptor the host resolves names, models
/// and descriptions through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub id: String,
    pub translation_properties: Option<ItemTranslationProperties>,
    pub model: Option<String>,
    pub texture: Option<String>,
    pub icon: Option<String>,
    pub animation: Option<String>,
    pub scale: Option<f32>,
    pub quality_index: Option<i32>,
    pub item_entity: Option<ItemEntityConfig>,
    pub armor: Option<ItemArmor>,
    pub weapon: Option<ItemWeapon>,
    pub resource_types: Option<Vec<ItemResourceType>>,
    pub categories: Option<Vec<String>>,
    /// Variant definitions are hidden from default type-browsing UI.
    #[serde(default)]
    pub variant: bool,
}

/// Visual property overrides applied to a cloned definition.
///
/// All fields are optional; a non-`None` field replaces the cloned field
/// verbatim, except the two `additional_*_stat_modifiers` maps, which are
/// merged with the original by per-key array concatenation. Replacing them
/// would hide the original stat lines from the player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemVisualOverrides {
    pub model: Option<String>,
    pub texture: Option<String>,
    pub icon: Option<String>,
    pub animation: Option<String>,
    pub scale: Option<f32>,
    pub quality_index: Option<i32>,
    pub item_entity: Option<ItemEntityConfig>,
    pub armor: Option<ItemArmor>,
    pub weapon: Option<ItemWeapon>,
    pub categories: Option<Vec<String>>,
    pub additional_armor_stat_modifiers: Option<StatModifierMap>,
    pub additional_weapon_stat_modifiers: Option<StatModifierMap>,
}

impl ItemVisualOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One occupied inventory slot: an item id plus its opaque metadata blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item_id: String,
    #[serde(default)]
    pub quantity: u32,
    pub metadata: Option<String>,
}

impl ItemStack {
    pub fn is_empty(&self) -> bool {
        self.item_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySection {
    #[serde(default)]
    pub capacity: u32,
    #[serde(default)]
    pub items: HashMap<u32, ItemStack>,
}

/// Full player-inventory snapshot, one field per independently-addressed
/// section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub hotbar: Option<InventorySection>,
    pub utility: Option<InventorySection>,
    pub tools: Option<InventorySection>,
    pub armor: Option<InventorySection>,
    pub storage: Option<InventorySection>,
    pub backpack: Option<InventorySection>,
    pub builder_material: Option<InventorySection>,
}

impl InventoryUpdate {
    /// Section name used as the primary slot class by the fallback
    /// virtual-id scan.
    pub const PRIMARY_SECTION: &'static str = "hotbar";

    pub fn sections_mut(&mut self) -> [(&'static str, &mut Option<InventorySection>); 7] {
        [
            ("hotbar", &mut self.hotbar),
            ("utility", &mut self.utility),
            ("tools", &mut self.tools),
            ("armor", &mut self.armor),
            ("storage", &mut self.storage),
            ("backpack", &mut self.backpack),
            ("builder_material", &mut self.builder_material),
        ]
    }
}

/// Container (chest/workbench) window contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowUpdate {
    pub window_id: u32,
    pub inventory: Option<InventorySection>,
}

/// Free-form UI command whose `data` payload is a JSON document that may
/// reference item ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomUiCommand {
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomPage {
    #[serde(default)]
    pub commands: Vec<CustomUiCommand>,
}

// --- Outbound (server -> client) packets the engine intercepts ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundPacket {
    /// World/scene change. Marks the observer as transitioning.
    JoinWorld,
    UpdateInventory(InventoryUpdate),
    OpenWindow(WindowUpdate),
    UpdateWindow(WindowUpdate),
    CustomPage(CustomPage),
}

// --- Inbound (client -> server) messages the engine rewrites ---

/// Interaction chain update; forks nest recursively and every item id in
/// the tree may carry a virtual id that needs rewriting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionChain {
    pub item_in_hand_id: Option<String>,
    pub utility_item_id: Option<String>,
    pub tools_item_id: Option<String>,
    #[serde(default)]
    pub new_forks: Vec<InteractionChain>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MouseInteraction {
    pub item_in_hand_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundPacket {
    MouseInteraction(MouseInteraction),
    SyncInteractionChains { updates: Vec<InteractionChain> },
}

//! End-to-end scenarios through the engine facade, with recording mocks
//! standing in for the host's catalog, translation service and transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use dynamic_tooltips::catalog::{ItemCatalog, TooltipTransport, TranslationService};
use dynamic_tooltips::env::Settings;
use dynamic_tooltips::error::TransportError;
use dynamic_tooltips::protocol::{
    CustomPage, CustomUiCommand, InboundPacket, InteractionChain, InventorySection,
    InventoryUpdate, ItemDefinition, ItemStack, ItemTranslationProperties, MouseInteraction,
    OutboundPacket,
};
use dynamic_tooltips::sync::{ObserverCtx, ProcessScope};
use dynamic_tooltips::virtual_items;
use dynamic_tooltips::TooltipEngine;

// --- Mocks ---

struct MapCatalog {
    definitions: HashMap<String, ItemDefinition>,
}

impl MapCatalog {
    fn with_sword() -> Self {
        let mut definitions = HashMap::new();
        definitions.insert(
            "Sword".to_string(),
            ItemDefinition {
                id: "Sword".to_string(),
                translation_properties: Some(ItemTranslationProperties {
                    name: Some("server.items.Sword.name".to_string()),
                    description: Some("server.items.Sword.description".to_string()),
                }),
                ..Default::default()
            },
        );
        Self { definitions }
    }
}

impl ItemCatalog for MapCatalog {
    fn definition(&self, item_id: &str) -> Option<ItemDefinition> {
        self.definitions.get(item_id).cloned()
    }

    fn for_each_definition(&self, visit: &mut dyn FnMut(&ItemDefinition)) {
        for definition in self.definitions.values() {
            visit(definition);
        }
    }
}

struct MapTranslations {
    texts: HashMap<String, String>,
}

impl MapTranslations {
    fn with_sword() -> Self {
        let mut texts = HashMap::new();
        texts.insert(
            "server.items.Sword.description".to_string(),
            "A sharp blade.".to_string(),
        );
        texts.insert("server.items.Sword.name".to_string(), "Sword".to_string());
        Self { texts }
    }
}

impl TranslationService for MapTranslations {
    fn resolve(&self, _locale: Option<&str>, key: &str) -> Option<String> {
        self.texts.get(key).cloned()
    }
}

#[derive(Default)]
struct RecordingTransport {
    definition_pushes: Mutex<Vec<(Uuid, HashMap<String, Arc<ItemDefinition>>)>>,
    translation_pushes: Mutex<Vec<(Uuid, HashMap<String, String>)>>,
    snapshot_pushes: Mutex<Vec<(Uuid, InventoryUpdate)>>,
}

impl RecordingTransport {
    fn definition_push_count(&self) -> usize {
        self.definition_pushes.lock().len()
    }

    fn pushed_definition_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .definition_pushes
            .lock()
            .iter()
            .flat_map(|(_, items)| items.keys().cloned())
            .collect();
        ids.sort();
        ids
    }

    fn all_translations(&self) -> HashMap<String, String> {
        let mut merged = HashMap::new();
        for (_, batch) in self.translation_pushes.lock().iter() {
            merged.extend(batch.clone());
        }
        merged
    }
}

impl TooltipTransport for RecordingTransport {
    fn push_item_definitions(
        &self,
        observer: Uuid,
        items: &HashMap<String, Arc<ItemDefinition>>,
    ) -> Result<(), TransportError> {
        self.definition_pushes.lock().push((observer, items.clone()));
        Ok(())
    }

    fn push_translations(
        &self,
        observer: Uuid,
        translations: &HashMap<String, String>,
    ) -> Result<(), TransportError> {
        self.translation_pushes
            .lock()
            .push((observer, translations.clone()));
        Ok(())
    }

    fn push_state_snapshot(
        &self,
        observer: Uuid,
        snapshot: InventoryUpdate,
    ) -> Result<(), TransportError> {
        self.snapshot_pushes.lock().push((observer, snapshot));
        Ok(())
    }
}

// --- Helpers ---

fn engine_with(settings: Settings) -> (TooltipEngine, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let engine = TooltipEngine::new(
        settings,
        Arc::new(MapCatalog::with_sword()),
        Arc::new(MapTranslations::with_sword()),
        transport.clone(),
    );
    (engine, transport)
}

fn engine() -> (TooltipEngine, Arc<RecordingTransport>) {
    engine_with(Settings::default())
}

fn sword_stack(metadata: &str) -> ItemStack {
    ItemStack {
        item_id: "Sword".to_string(),
        quantity: 1,
        metadata: Some(metadata.to_string()),
    }
}

fn hotbar_inventory(stacks: Vec<(u32, ItemStack)>) -> InventoryUpdate {
    InventoryUpdate {
        hotbar: Some(InventorySection {
            capacity: 9,
            items: stacks.into_iter().collect(),
        }),
        ..Default::default()
    }
}

fn process(
    engine: &TooltipEngine,
    ctx: &ObserverCtx,
    packet: &mut OutboundPacket,
) {
    let mut scope = ProcessScope::new();
    engine.handle_outbound(ctx, packet, &mut scope);
}

fn hotbar_item_id(packet: &OutboundPacket, slot: u32) -> String {
    match packet {
        OutboundPacket::UpdateInventory(inv) => inv
            .hotbar
            .as_ref()
            .unwrap()
            .items
            .get(&slot)
            .unwrap()
            .item_id
            .clone(),
        other => panic!("expected inventory packet, got {:?}", other),
    }
}

const FIRE_META: &str = r#"{"dtt_lines":["Enchanted: Fire"]}"#;
const ICE_META: &str = r#"{"dtt_lines":["Enchanted: Ice"]}"#;

// --- Scenarios ---

#[tokio::test]
async fn two_states_get_distinct_virtual_ids_and_one_push_each() {
    let (engine, transport) = engine();
    let ctx = ObserverCtx::new(Uuid::new_v4(), None);

    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![
        (0, sword_stack(FIRE_META)),
        (1, sword_stack(ICE_META)),
    ]));
    process(&engine, &ctx, &mut packet);

    let fire_id = hotbar_item_id(&packet, 0);
    let ice_id = hotbar_item_id(&packet, 1);

    assert!(fire_id.starts_with("Sword__dtt_"));
    assert!(ice_id.starts_with("Sword__dtt_"));
    assert_ne!(fire_id, ice_id);
    assert_eq!(fire_id.len(), "Sword__dtt_".len() + 8);
    assert_eq!(virtual_items::base_item_id(&fire_id), Some("Sword"));

    let mut pushed = transport.pushed_definition_ids();
    pushed.sort();
    let mut expected = vec![fire_id.clone(), ice_id.clone()];
    expected.sort();
    assert_eq!(pushed, expected);

    let translations = transport.all_translations();
    let fire_text = translations
        .get(&virtual_items::virtual_description_key(&fire_id))
        .expect("description translation pushed");
    assert_eq!(fire_text, "A sharp blade.\n\nEnchanted: Fire");
}

#[tokio::test]
async fn identical_state_reuses_the_virtual_id_without_resending() {
    let (engine, transport) = engine();
    let ctx = ObserverCtx::new(Uuid::new_v4(), None);

    let mut first = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine, &ctx, &mut first);
    let first_id = hotbar_item_id(&first, 0);
    assert_eq!(transport.definition_push_count(), 1);

    // Same logical state in a different slot of a later snapshot.
    let mut second = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        3,
        sword_stack(FIRE_META),
    )]));
    process(&engine, &ctx, &mut second);

    assert_eq!(hotbar_item_id(&second, 3), first_id);
    assert_eq!(transport.definition_push_count(), 1);
}

#[tokio::test]
async fn name_override_pushes_its_own_translation_key() {
    let (engine, transport) = engine();
    let ctx = ObserverCtx::new(Uuid::new_v4(), None);

    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(r#"{"dtt_name":"Excalibur"}"#),
    )]));
    process(&engine, &ctx, &mut packet);

    let virtual_id = hotbar_item_id(&packet, 0);
    let translations = transport.all_translations();
    assert_eq!(
        translations
            .get(&virtual_items::virtual_name_key(&virtual_id))
            .map(String::as_str),
        Some("Excalibur")
    );
}

#[tokio::test]
async fn plain_items_pass_through_untouched() {
    let (engine, transport) = engine();
    let ctx = ObserverCtx::new(Uuid::new_v4(), None);

    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        ItemStack {
            item_id: "Sword".to_string(),
            quantity: 1,
            metadata: None,
        },
    )]));
    process(&engine, &ctx, &mut packet);

    assert_eq!(hotbar_item_id(&packet, 0), "Sword");
    assert_eq!(transport.definition_push_count(), 0);
    assert!(transport.translation_pushes.lock().is_empty());
}

#[tokio::test]
async fn inbound_references_are_rewritten_to_canonical_ids() {
    let (engine, _transport) = engine();
    let ctx = ObserverCtx::new(Uuid::new_v4(), None);

    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine, &ctx, &mut packet);
    let virtual_id = hotbar_item_id(&packet, 0);

    let mut inbound = InboundPacket::MouseInteraction(MouseInteraction {
        item_in_hand_id: Some(virtual_id.clone()),
    });
    engine.handle_inbound(&mut inbound);
    let InboundPacket::MouseInteraction(interaction) = inbound else {
        unreachable!();
    };
    assert_eq!(interaction.item_in_hand_id.as_deref(), Some("Sword"));

    let mut chains = InboundPacket::SyncInteractionChains {
        updates: vec![InteractionChain {
            item_in_hand_id: Some(virtual_id),
            new_forks: vec![InteractionChain {
                tools_item_id: Some("Pickaxe".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }],
    };
    engine.handle_inbound(&mut chains);
    let InboundPacket::SyncInteractionChains { updates } = chains else {
        unreachable!();
    };
    assert_eq!(updates[0].item_in_hand_id.as_deref(), Some("Sword"));
    assert_eq!(updates[0].new_forks[0].tools_item_id.as_deref(), Some("Pickaxe"));
}

#[tokio::test(start_paused = true)]
async fn transition_defers_tooltips_to_a_later_replay() {
    let (engine, transport) = engine();
    let observer = Uuid::new_v4();
    let ctx = ObserverCtx::new(observer, None);

    let mut join = OutboundPacket::JoinWorld;
    process(&engine, &ctx, &mut join);

    // The first snapshot after the switch must go out verbatim.
    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine, &ctx, &mut packet);
    assert_eq!(hotbar_item_id(&packet, 0), "Sword");
    assert!(transport.snapshot_pushes.lock().is_empty());

    // The deferred replay delivers the processed snapshot afterwards.
    tokio::time::sleep(Duration::from_secs(3)).await;
    let snapshots = transport.snapshot_pushes.lock();
    assert_eq!(snapshots.len(), 1);
    let (to, snapshot) = &snapshots[0];
    assert_eq!(*to, observer);
    let replayed = &snapshot.hotbar.as_ref().unwrap().items[&0].item_id;
    assert!(virtual_items::is_virtual_id(replayed));
}

#[tokio::test]
async fn disconnect_forgets_what_was_sent() {
    let (engine, transport) = engine();
    let observer = Uuid::new_v4();
    let ctx = ObserverCtx::new(observer, None);

    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine, &ctx, &mut packet);
    assert_eq!(transport.definition_push_count(), 1);
    assert_eq!(engine.observer_count(), 1);

    engine.on_observer_disconnected(observer);
    assert_eq!(engine.observer_count(), 0);

    // Reconnecting with the same id starts from a clean slate.
    let mut again = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine, &ctx, &mut again);
    assert_eq!(transport.definition_push_count(), 2);
}

#[tokio::test]
async fn refresh_replays_the_last_snapshot() {
    let (engine, transport) = engine();
    let observer = Uuid::new_v4();
    let ctx = ObserverCtx::new(observer, None);

    assert!(!engine.refresh_observer(observer));

    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine, &ctx, &mut packet);

    assert!(engine.refresh_observer(observer));
    assert_eq!(engine.refresh_all(), 1);
    assert_eq!(transport.snapshot_pushes.lock().len(), 2);
}

#[tokio::test]
async fn translation_only_sections_keep_canonical_ids() {
    let mut settings = Settings::default();
    settings.sync.translation_only_sections = vec!["armor".to_string()];
    let (engine, transport) = engine_with(settings);
    let ctx = ObserverCtx::new(Uuid::new_v4(), None);

    let armored = InventoryUpdate {
        armor: Some(InventorySection {
            capacity: 4,
            items: HashMap::from([(0, sword_stack(FIRE_META))]),
        }),
        ..Default::default()
    };
    let mut packet = OutboundPacket::UpdateInventory(armored);
    process(&engine, &ctx, &mut packet);

    let OutboundPacket::UpdateInventory(ref inv) = packet else {
        unreachable!();
    };
    assert_eq!(inv.armor.as_ref().unwrap().items[&0].item_id, "Sword");
    assert_eq!(transport.definition_push_count(), 0);
    assert_eq!(
        transport
            .all_translations()
            .get("server.items.Sword.description")
            .map(String::as_str),
        Some("A sharp blade.\n\nEnchanted: Fire")
    );

    // Once the slot empties, the canonical text is restored for this
    // observer.
    let mut cleared = OutboundPacket::UpdateInventory(InventoryUpdate {
        armor: Some(InventorySection {
            capacity: 4,
            items: HashMap::new(),
        }),
        ..Default::default()
    });
    process(&engine, &ctx, &mut cleared);
    assert_eq!(
        transport
            .all_translations()
            .get("server.items.Sword.description")
            .map(String::as_str),
        Some("A sharp blade.")
    );
}

#[tokio::test]
async fn custom_page_references_reuse_the_tracked_virtual_id() {
    let (engine, _transport) = engine();
    let ctx = ObserverCtx::new(Uuid::new_v4(), None);

    let mut inventory = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine, &ctx, &mut inventory);
    let virtual_id = hotbar_item_id(&inventory, 0);

    let mut page = OutboundPacket::CustomPage(CustomPage {
        commands: vec![CustomUiCommand {
            data: r#"{"0":"Sword"}"#.to_string(),
        }],
    });
    process(&engine, &ctx, &mut page);

    let OutboundPacket::CustomPage(ref page) = page else {
        unreachable!();
    };
    let doc: serde_json::Value = serde_json::from_str(&page.commands[0].data).unwrap();
    assert_eq!(doc["0"].as_str(), Some(virtual_id.as_str()));
}

#[tokio::test]
async fn global_tooltips_broadcast_to_known_observers() {
    let (engine, transport) = engine();
    let observer = Uuid::new_v4();
    let ctx = ObserverCtx::new(observer, None);

    // Seen once on the outbound path, the observer receives broadcasts.
    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![]));
    process(&engine, &ctx, &mut packet);

    engine
        .global_tooltips()
        .add_global_line("Sword", "Double drops this weekend!");

    assert_eq!(
        transport
            .all_translations()
            .get("server.items.Sword.description")
            .map(String::as_str),
        Some("A sharp blade.\n\nDouble drops this weekend!")
    );

    engine.global_tooltips().clear_global_tooltips("Sword");
    assert_eq!(
        transport
            .all_translations()
            .get("server.items.Sword.description")
            .map(String::as_str),
        Some("A sharp blade.")
    );
}

// Transport that re-enters the engine while a push is still in flight,
// the way a host would on detecting a dead connection mid-send.
#[derive(Default)]
struct ReentrantTransport {
    engine: Mutex<Option<Arc<TooltipEngine>>>,
    translation_push_count: Mutex<usize>,
}

impl TooltipTransport for ReentrantTransport {
    fn push_item_definitions(
        &self,
        _observer: Uuid,
        _items: &HashMap<String, Arc<ItemDefinition>>,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    fn push_translations(
        &self,
        observer: Uuid,
        _translations: &HashMap<String, String>,
    ) -> Result<(), TransportError> {
        *self.translation_push_count.lock() += 1;
        let engine = self.engine.lock().clone();
        if let Some(engine) = engine {
            engine.on_observer_disconnected(observer);
        }
        Ok(())
    }

    fn push_state_snapshot(
        &self,
        _observer: Uuid,
        _snapshot: InventoryUpdate,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

#[test]
fn transition_snapshot_outside_runtime_is_processed_inline() {
    let (engine, transport) = engine();
    let ctx = ObserverCtx::new(Uuid::new_v4(), None);

    let mut join = OutboundPacket::JoinWorld;
    process(&engine, &ctx, &mut join);

    // No async runtime on this thread: the deferred replay cannot be
    // scheduled, so the snapshot must be processed inline instead of
    // aborting or going out without tooltips forever.
    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine, &ctx, &mut packet);

    assert!(virtual_items::is_virtual_id(&hotbar_item_id(&packet, 0)));
    assert_eq!(transport.definition_push_count(), 1);
}

#[tokio::test]
async fn reentrant_transport_does_not_deadlock_the_push_path() {
    let transport = Arc::new(ReentrantTransport::default());
    let engine = Arc::new(TooltipEngine::new(
        Settings::default(),
        Arc::new(MapCatalog::with_sword()),
        Arc::new(MapTranslations::with_sword()),
        transport.clone(),
    ));
    *transport.engine.lock() = Some(engine.clone());

    let observer = Uuid::new_v4();
    let ctx = ObserverCtx::new(observer, None);
    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine, &ctx, &mut packet);

    assert_eq!(*transport.translation_push_count.lock(), 1);
    // The mid-push disconnect took effect.
    assert_eq!(engine.observer_count(), 0);
}

#[tokio::test]
async fn revert_preserves_active_global_overrides() {
    let mut settings = Settings::default();
    settings.sync.translation_only_sections = vec!["armor".to_string()];
    let (engine, transport) = engine_with(settings);
    let ctx = ObserverCtx::new(Uuid::new_v4(), None);

    engine.global_tooltips().add_global_line("Sword", "Event bonus");

    let mut packet = OutboundPacket::UpdateInventory(InventoryUpdate {
        armor: Some(InventorySection {
            capacity: 4,
            items: HashMap::from([(0, sword_stack(FIRE_META))]),
        }),
        ..Default::default()
    });
    process(&engine, &ctx, &mut packet);

    // Emptying the slot reverts the per-observer override, but the active
    // type-wide text must come back, not the raw original.
    let mut cleared = OutboundPacket::UpdateInventory(InventoryUpdate {
        armor: Some(InventorySection {
            capacity: 4,
            items: HashMap::new(),
        }),
        ..Default::default()
    });
    process(&engine, &ctx, &mut cleared);

    assert_eq!(
        transport
            .all_translations()
            .get("server.items.Sword.description")
            .map(String::as_str),
        Some("A sharp blade.\n\nEvent bonus")
    );
}

#[tokio::test]
async fn global_replace_wins_over_additive_and_injects() {
    let (engine, _transport) = engine();
    let global = engine.global_tooltips();

    global.add_global_line("Sword", "Event bonus");
    global.replace_global_tooltip("Sword", &["Legendary".to_string(), "Unbreakable".to_string()]);

    assert_eq!(
        global.global_description("Sword", None).as_deref(),
        Some("Legendary\nUnbreakable")
    );

    // Init-stage translation maps pick up the active overrides too.
    let mut translations = HashMap::new();
    engine
        .global_tooltips()
        .inject_into_translations(&mut translations, None);
    assert_eq!(
        translations
            .get("server.items.Sword.description")
            .map(String::as_str),
        Some("Legendary\nUnbreakable")
    );
}

#[tokio::test]
async fn engines_are_isolated_from_each_other() {
    let (engine_a, transport_a) = engine();
    let (engine_b, transport_b) = engine();
    let ctx = ObserverCtx::new(Uuid::new_v4(), None);

    let mut packet = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine_a, &ctx, &mut packet);

    assert_eq!(transport_a.definition_push_count(), 1);
    assert_eq!(transport_b.definition_push_count(), 0);

    // The second engine builds its own state for the same observer.
    let mut other = OutboundPacket::UpdateInventory(hotbar_inventory(vec![(
        0,
        sword_stack(FIRE_META),
    )]));
    process(&engine_b, &ctx, &mut other);
    assert_eq!(transport_b.definition_push_count(), 1);
}

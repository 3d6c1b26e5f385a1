/******************************************************************************
 *                                                                            *
 * Item definitions and item instances. Holds the narrow catalog slice the    *
 * firing system needs: placeable kits, unfired clay molds and their fired    *
 * counterparts. A definition is "fireable" iff it names a fired counterpart  *
 * via fired_item_def_name, mirroring how cookable food names its cooked      *
 * form.                                                                      *
 *                                                                            *
 ******************************************************************************/

use serde::{Deserialize, Serialize};
use spacetimedb::{Identity, ReducerContext, Table, Timestamp};
use std::collections::HashMap;

use crate::models::{InventoryLocationData, ItemLocation};

pub const NUM_PLAYER_INVENTORY_SLOTS: u16 = 24;

#[derive(spacetimedb::SpacetimeType, Clone, Copy, Debug, PartialEq)]
pub enum ItemCategory {
    Placeable,
    Material,
    Mold,
}

/// --- Item Definition ---
/// Static description of an item kind. Seeded once at module init.
#[spacetimedb::table(name = item_definition, public)]
#[derive(Clone, Debug)]
pub struct ItemDefinition {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub name: String,
    pub category: ItemCategory,
    pub is_stackable: bool,
    pub stack_size: u32,
    /// Name of the definition this item transforms into when a firing
    /// completes. None means the item cannot be fired (fired molds included,
    /// which is what makes completion idempotent at the item level).
    pub fired_item_def_name: Option<String>,
}

/// --- Inventory Item ---
/// A concrete item instance somewhere in the world (player inventory or a
/// mold rack slot). item_data is an optional JSON blob for auxiliary
/// metadata such as the completion timestamp stamped on fired molds.
#[spacetimedb::table(name = inventory_item, public)]
#[derive(Clone, Debug)]
pub struct InventoryItem {
    #[primary_key]
    #[auto_inc]
    pub instance_id: u64,
    pub item_def_id: u64,
    pub quantity: u32,
    pub location: ItemLocation,
    pub item_data: Option<String>,
}

/// Seeds the item catalog. Idempotent: skipped when definitions already
/// exist (module updates must not duplicate the catalog).
pub fn seed_items(ctx: &ReducerContext) -> Result<(), String> {
    let item_defs = ctx.db.item_definition();
    if item_defs.iter().count() > 0 {
        log::debug!("Item definitions already seeded, skipping.");
        return Ok(());
    }

    let defs = [
        ("Camp Fire", ItemCategory::Placeable, false, 1, None),
        ("Straw Mold Rack", ItemCategory::Placeable, false, 1, None),
        ("Clay Ingot Mold", ItemCategory::Mold, false, 1, Some("Fired Ingot Mold")),
        ("Clay Axe Head Mold", ItemCategory::Mold, false, 1, Some("Fired Axe Head Mold")),
        ("Clay Pickaxe Head Mold", ItemCategory::Mold, false, 1, Some("Fired Pickaxe Head Mold")),
        ("Fired Ingot Mold", ItemCategory::Mold, false, 1, None),
        ("Fired Axe Head Mold", ItemCategory::Mold, false, 1, None),
        ("Fired Pickaxe Head Mold", ItemCategory::Mold, false, 1, None),
    ];

    for (name, category, is_stackable, stack_size, fired_name) in defs {
        item_defs
            .try_insert(ItemDefinition {
                id: 0, // Auto-incremented
                name: name.to_string(),
                category,
                is_stackable,
                stack_size,
                fired_item_def_name: fired_name.map(|n: &str| n.to_string()),
            })
            .map_err(|e| format!("Failed to seed item definition '{}': {}", name, e))?;
    }

    log::info!("Seeded {} item definitions.", ctx.db.item_definition().iter().count());
    Ok(())
}

/// Whether a definition qualifies for firing.
pub fn is_fireable_mold(item_def: &ItemDefinition) -> bool {
    item_def.fired_item_def_name.is_some()
}

pub fn get_item_def_by_name(ctx: &ReducerContext, name: &str) -> Option<ItemDefinition> {
    ctx.db.item_definition().iter().find(|def| def.name == name)
}

/// Finds the first empty inventory slot for a player, scanning in slot order.
pub fn find_first_empty_player_slot(ctx: &ReducerContext, owner_id: Identity) -> Option<u16> {
    let occupied: Vec<u16> = ctx
        .db
        .inventory_item()
        .iter()
        .filter_map(|item| match &item.location {
            ItemLocation::Inventory(data) if data.owner_id == owner_id => Some(data.slot_index),
            _ => None,
        })
        .collect();
    (0..NUM_PLAYER_INVENTORY_SLOTS).find(|slot| !occupied.contains(slot))
}

/// Creates a new item instance in the first free slot of a player's
/// inventory. Fails when the inventory is full.
pub fn add_item_to_player_inventory(
    ctx: &ReducerContext,
    owner_id: Identity,
    item_def_id: u64,
    quantity: u32,
) -> Result<u64, String> {
    let slot_index = find_first_empty_player_slot(ctx, owner_id)
        .ok_or_else(|| "Player inventory is full.".to_string())?;
    let inserted = ctx
        .db
        .inventory_item()
        .try_insert(InventoryItem {
            instance_id: 0, // Auto-incremented
            item_def_id,
            quantity,
            location: ItemLocation::Inventory(InventoryLocationData { owner_id, slot_index }),
            item_data: None,
        })
        .map_err(|e| format!("Failed to insert inventory item: {}", e))?;
    Ok(inserted.instance_id)
}

/// Fetches an item instance and validates that the sender owns it.
pub fn get_player_item(
    ctx: &ReducerContext,
    item_instance_id: u64,
) -> Result<InventoryItem, String> {
    let item = ctx
        .db
        .inventory_item()
        .instance_id()
        .find(item_instance_id)
        .ok_or_else(|| format!("Item instance {} not found.", item_instance_id))?;
    match item.location.is_player_bound() {
        Some(owner) if owner == ctx.sender => Ok(item),
        _ => Err(format!(
            "Item instance {} is not in the sender's inventory.",
            item_instance_id
        )),
    }
}

/// Gives a freshly registered player the campfire kit, a mold rack kit and
/// one clay mold of each shape.
pub fn grant_starting_items(ctx: &ReducerContext, owner_id: Identity) -> Result<(), String> {
    let starting_names = [
        "Camp Fire",
        "Straw Mold Rack",
        "Clay Ingot Mold",
        "Clay Axe Head Mold",
        "Clay Pickaxe Head Mold",
    ];
    for name in starting_names {
        let def = get_item_def_by_name(ctx, name)
            .ok_or_else(|| format!("Starting item definition '{}' missing", name))?;
        add_item_to_player_inventory(ctx, owner_id, def.id, 1)?;
    }
    log::info!("Granted starting items to {:?}", owner_id);
    Ok(())
}

// --- item_data helpers ---

/// Auxiliary metadata carried in an item's item_data JSON blob. Keys written
/// by other features are preserved across rewrites via the flattened map.
#[derive(Serialize, Deserialize, Default, Debug)]
struct ItemMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    fired_at: Option<i64>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

/// Stamps the completion timestamp into an item's JSON metadata blob.
pub(crate) fn set_fired_at_timestamp(item: &mut InventoryItem, timestamp: Timestamp) {
    let mut metadata = parse_item_data(item.item_data.as_deref());
    metadata.fired_at = Some(timestamp.to_micros_since_unix_epoch());
    item.item_data = serde_json::to_string(&metadata).ok();
}

/// Reads the completion timestamp back out of an item's metadata blob.
pub(crate) fn get_fired_at_timestamp(item: &InventoryItem) -> Option<Timestamp> {
    parse_item_data(item.item_data.as_deref())
        .fired_at
        .map(Timestamp::from_micros_since_unix_epoch)
}

fn parse_item_data(data: Option<&str>) -> ItemMetadata {
    data.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mold_item() -> InventoryItem {
        InventoryItem {
            instance_id: 1,
            item_def_id: 3,
            quantity: 1,
            location: ItemLocation::Unknown,
            item_data: None,
        }
    }

    #[test]
    fn fired_at_stamp_round_trips() {
        let mut item = mold_item();
        assert_eq!(get_fired_at_timestamp(&item), None);

        let ts = Timestamp::from_micros_since_unix_epoch(1_234_567_890);
        set_fired_at_timestamp(&mut item, ts);
        assert_eq!(get_fired_at_timestamp(&item), Some(ts));
    }

    #[test]
    fn fired_at_stamp_preserves_unrelated_metadata() {
        let mut item = mold_item();
        item.item_data = Some(r#"{"shaped_by":"someone"}"#.to_string());

        let ts = Timestamp::from_micros_since_unix_epoch(99);
        set_fired_at_timestamp(&mut item, ts);

        let data: HashMap<String, serde_json::Value> =
            serde_json::from_str(item.item_data.as_deref().unwrap()).unwrap();
        assert_eq!(data.get("shaped_by").and_then(|v| v.as_str()), Some("someone"));
        assert_eq!(get_fired_at_timestamp(&item), Some(ts));
    }

    #[test]
    fn fired_at_stamp_tolerates_corrupt_metadata() {
        let mut item = mold_item();
        item.item_data = Some("not json".to_string());
        let ts = Timestamp::from_micros_since_unix_epoch(7);
        set_fired_at_timestamp(&mut item, ts);
        assert_eq!(get_fired_at_timestamp(&item), Some(ts));
    }

    #[test]
    fn only_defs_naming_a_fired_form_are_fireable() {
        let clay = ItemDefinition {
            id: 1,
            name: "Clay Ingot Mold".to_string(),
            category: ItemCategory::Mold,
            is_stackable: false,
            stack_size: 1,
            fired_item_def_name: Some("Fired Ingot Mold".to_string()),
        };
        let fired = ItemDefinition {
            id: 2,
            name: "Fired Ingot Mold".to_string(),
            category: ItemCategory::Mold,
            is_stackable: false,
            stack_size: 1,
            fired_item_def_name: None,
        };
        assert!(is_fireable_mold(&clay));
        assert!(!is_fireable_mold(&fired));
    }
}

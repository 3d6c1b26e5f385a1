/******************************************************************************
 *                                                                            *
 * Mold Racks. Single-slot placeable containers that hold one clay or fired   *
 * mold directly above a campfire cell. Placing or removing a mold notifies   *
 * the firing feature; destroying the rack raises the broken transition so    *
 * any in-progress firing at the cell is torn down.                           *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Table, Timestamp};

use crate::environment::{calculate_chunk_index, cell_for_position};
use crate::items::{get_item_def_by_name, get_player_item, InventoryItem, ItemCategory};
use crate::items::{inventory_item as InventoryItemTableTrait, item_definition as ItemDefinitionTableTrait};
use crate::listeners;
use crate::models::{FiringCell, ItemLocation, InventoryLocationData, RackLocationData};
use crate::player as PlayerTableTrait;

// --- Constants ---
pub(crate) const MOLD_RACK_ITEM_NAME: &str = "Straw Mold Rack";
const PLACEMENT_MAX_DISTANCE: f32 = 96.0;
const PLACEMENT_MAX_DISTANCE_SQUARED: f32 = PLACEMENT_MAX_DISTANCE * PLACEMENT_MAX_DISTANCE;
const INTERACTION_DISTANCE: f32 = 64.0;
const INTERACTION_DISTANCE_SQUARED: f32 = INTERACTION_DISTANCE * INTERACTION_DISTANCE;
const INITIAL_HEALTH: f32 = 120.0;

/// --- Mold Rack Data Structure ---
#[spacetimedb::table(name = mold_rack, public)]
#[derive(Clone, Debug)]
pub struct MoldRack {
    #[primary_key]
    #[auto_inc]
    pub id: u32,
    pub pos_x: f32,
    pub pos_y: f32,
    pub cell_x: i32,
    pub cell_y: i32,
    #[index(btree)]
    pub chunk_index: u32,
    pub placed_by: Identity,
    pub placed_at: Timestamp,
    /// The single mold slot. Both are None when the rack is empty.
    pub slot_instance_id: Option<u64>,
    pub slot_def_id: Option<u64>,
    pub health: f32,
    pub max_health: f32,
    pub is_destroyed: bool,
    pub destroyed_at: Option<Timestamp>,
}

impl MoldRack {
    pub fn cell(&self) -> FiringCell {
        FiringCell { x: self.cell_x, y: self.cell_y }
    }
}

/// Finds the live rack occupying a cell, if any.
pub fn find_rack_at_cell(ctx: &ReducerContext, cell: FiringCell) -> Option<MoldRack> {
    ctx.db
        .mold_rack()
        .iter()
        .find(|rack| !rack.is_destroyed && rack.cell_x == cell.x && rack.cell_y == cell.y)
}

/// Reads the item instance currently sitting in a rack's slot.
pub fn read_rack_item(ctx: &ReducerContext, rack: &MoldRack) -> Option<InventoryItem> {
    rack.slot_instance_id
        .and_then(|instance_id| ctx.db.inventory_item().instance_id().find(instance_id))
}

/// Rewrites a rack's slot fields after its item mutated or moved.
pub fn set_rack_item(ctx: &ReducerContext, rack_id: u32, item: Option<&InventoryItem>) -> Result<(), String> {
    let mut rack = ctx
        .db
        .mold_rack()
        .id()
        .find(rack_id)
        .ok_or_else(|| format!("Mold rack {} not found", rack_id))?;
    rack.slot_instance_id = item.map(|i| i.instance_id);
    rack.slot_def_id = item.map(|i| i.item_def_id);
    ctx.db.mold_rack().id().update(rack);
    Ok(())
}

/// Validates sender proximity for interacting with a rack.
pub fn validate_rack_interaction(ctx: &ReducerContext, rack_id: u32) -> Result<MoldRack, String> {
    let rack = ctx
        .db
        .mold_rack()
        .id()
        .find(rack_id)
        .ok_or_else(|| format!("Mold rack {} not found", rack_id))?;
    if rack.is_destroyed {
        return Err(format!("Mold rack {} is destroyed", rack_id));
    }
    let player = ctx
        .db
        .player()
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| "Player not found".to_string())?;
    let dx = player.position_x - rack.pos_x;
    let dy = player.position_y - rack.pos_y;
    if dx * dx + dy * dy > INTERACTION_DISTANCE_SQUARED {
        return Err("Too far away from mold rack".to_string());
    }
    Ok(rack)
}

/// --- Reducers ---

/// Places a mold rack from the player's inventory at the given position.
#[spacetimedb::reducer]
pub fn place_mold_rack(
    ctx: &ReducerContext,
    item_instance_id: u64,
    world_x: f32,
    world_y: f32,
) -> Result<(), String> {
    let sender_id = ctx.sender;

    let player = ctx
        .db
        .player()
        .identity()
        .find(sender_id)
        .ok_or_else(|| "Player not found".to_string())?;
    let dx = player.position_x - world_x;
    let dy = player.position_y - world_y;
    if dx * dx + dy * dy > PLACEMENT_MAX_DISTANCE_SQUARED {
        return Err("Placement position is too far away".to_string());
    }

    let item = get_player_item(ctx, item_instance_id)?;
    let item_def = ctx
        .db
        .item_definition()
        .id()
        .find(item.item_def_id)
        .ok_or_else(|| format!("Definition missing for item {}", item_instance_id))?;
    if item_def.name != MOLD_RACK_ITEM_NAME || item_def.category != ItemCategory::Placeable {
        return Err(format!("Item '{}' cannot be placed as a mold rack", item_def.name));
    }

    let cell = cell_for_position(world_x, world_y);
    if find_rack_at_cell(ctx, cell).is_some() {
        return Err("A mold rack already occupies that spot".to_string());
    }

    ctx.db.inventory_item().instance_id().delete(item_instance_id);

    let inserted = ctx
        .db
        .mold_rack()
        .try_insert(MoldRack {
            id: 0, // Auto-incremented
            pos_x: world_x,
            pos_y: world_y,
            cell_x: cell.x,
            cell_y: cell.y,
            chunk_index: calculate_chunk_index(world_x, world_y),
            placed_by: sender_id,
            placed_at: ctx.timestamp,
            slot_instance_id: None,
            slot_def_id: None,
            health: INITIAL_HEALTH,
            max_health: INITIAL_HEALTH,
            is_destroyed: false,
            destroyed_at: None,
        })
        .map_err(|e| format!("Failed to place mold rack: {}", e))?;

    log::info!(
        "[PlaceMoldRack] Player {:?} placed mold rack {} at cell ({}, {})",
        sender_id, inserted.id, cell.x, cell.y
    );
    crate::sound_events::emit_place_object_sound(ctx, world_x, world_y, sender_id);
    Ok(())
}

/// Moves a mold from the sender's inventory into an empty rack slot.
#[spacetimedb::reducer]
pub fn place_mold_on_rack(ctx: &ReducerContext, rack_id: u32, item_instance_id: u64) -> Result<(), String> {
    let rack = validate_rack_interaction(ctx, rack_id)?;
    if rack.slot_instance_id.is_some() {
        return Err("Mold rack slot is already occupied".to_string());
    }

    let mut item = get_player_item(ctx, item_instance_id)?;
    let item_def = ctx
        .db
        .item_definition()
        .id()
        .find(item.item_def_id)
        .ok_or_else(|| format!("Definition missing for item {}", item_instance_id))?;
    if item_def.category != ItemCategory::Mold {
        return Err(format!("Item '{}' is not a mold", item_def.name));
    }

    item.location = ItemLocation::Rack(RackLocationData { rack_id });
    ctx.db.inventory_item().instance_id().update(item.clone());
    set_rack_item(ctx, rack_id, Some(&item))?;

    log::info!(
        "[PlaceMold] Player {:?} placed '{}' (instance {}) on rack {}",
        ctx.sender, item_def.name, item_instance_id, rack_id
    );

    // Loading a mold can start a firing when the campfire below is already
    // burning.
    crate::firing::try_begin_firing_at(ctx, rack.cell());
    Ok(())
}

/// Takes the mold out of a rack slot back into the sender's inventory.
#[spacetimedb::reducer]
pub fn take_mold_from_rack(ctx: &ReducerContext, rack_id: u32) -> Result<(), String> {
    let rack = validate_rack_interaction(ctx, rack_id)?;
    let mut item = read_rack_item(ctx, &rack)
        .ok_or_else(|| "Mold rack slot is empty".to_string())?;

    if let Some(fired_at) = crate::items::get_fired_at_timestamp(&item) {
        log::debug!(
            "[TakeMold] Mold instance {} finished firing at {:?}",
            item.instance_id, fired_at
        );
    }

    let slot_index = crate::items::find_first_empty_player_slot(ctx, ctx.sender)
        .ok_or_else(|| "Player inventory is full".to_string())?;
    item.location = ItemLocation::Inventory(InventoryLocationData {
        owner_id: ctx.sender,
        slot_index,
    });
    ctx.db.inventory_item().instance_id().update(item);
    set_rack_item(ctx, rack_id, None)?;

    log::info!("[TakeMold] Player {:?} took the mold from rack {}", ctx.sender, rack_id);

    // The cell no longer qualifies, so tear down any in-progress firing.
    crate::firing::prune_firing_at(ctx, rack.cell());
    Ok(())
}

/// Applies damage to a rack; destroys it (and its contents) at zero health.
#[spacetimedb::reducer]
pub fn damage_mold_rack(ctx: &ReducerContext, rack_id: u32, damage: f32) -> Result<(), String> {
    if damage <= 0.0 {
        return Err("Damage must be positive".to_string());
    }
    let mut rack = validate_rack_interaction(ctx, rack_id)?;
    let cell = rack.cell();
    rack.health = (rack.health - damage).max(0.0);

    if rack.health <= 0.0 {
        rack.is_destroyed = true;
        rack.destroyed_at = Some(ctx.timestamp);
        // Contents perish with the rack.
        if let Some(instance_id) = rack.slot_instance_id {
            ctx.db.inventory_item().instance_id().delete(instance_id);
        }
        rack.slot_instance_id = None;
        rack.slot_def_id = None;
        ctx.db.mold_rack().id().update(rack);
        log::info!("[DamageMoldRack] Mold rack {} at ({}, {}) destroyed", rack_id, cell.x, cell.y);
        listeners::broadcast_broken(ctx, cell);
    } else {
        ctx.db.mold_rack().id().update(rack);
    }
    Ok(())
}

/// Picks an empty rack back up into the owner's inventory.
#[spacetimedb::reducer]
pub fn pickup_mold_rack(ctx: &ReducerContext, rack_id: u32) -> Result<(), String> {
    let rack = validate_rack_interaction(ctx, rack_id)?;
    if rack.slot_instance_id.is_some() {
        return Err("Empty the mold rack before picking it up".to_string());
    }
    let cell = rack.cell();

    let kit_def = get_item_def_by_name(ctx, MOLD_RACK_ITEM_NAME)
        .ok_or_else(|| "Mold rack item definition missing".to_string())?;
    crate::items::add_item_to_player_inventory(ctx, ctx.sender, kit_def.id, 1)?;
    ctx.db.mold_rack().id().delete(rack_id);

    log::info!(
        "[PickupMoldRack] Player {:?} picked up mold rack {} from ({}, {})",
        ctx.sender, rack_id, cell.x, cell.y
    );
    listeners::broadcast_broken(ctx, cell);
    Ok(())
}

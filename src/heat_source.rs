/******************************************************************************
 *                                                                            *
 * Heat Sources (campfires). Placeable world entities that can be lit and     *
 * extinguished by players and destroyed by damage. Every lifecycle           *
 * transition is announced through the heat source listener registry so the   *
 * mold firing feature reacts without this module knowing about molds.        *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Table, Timestamp};

use crate::environment::{calculate_chunk_index, cell_for_position};
use crate::items::{get_item_def_by_name, get_player_item, ItemCategory};
use crate::items::{inventory_item as InventoryItemTableTrait, item_definition as ItemDefinitionTableTrait};
use crate::listeners;
use crate::models::{ExtinguishReason, FiringCell};
use crate::player as PlayerTableTrait;

// --- Constants ---
pub(crate) const HEAT_SOURCE_ITEM_NAME: &str = "Camp Fire";
const PLACEMENT_MAX_DISTANCE: f32 = 96.0;
const PLACEMENT_MAX_DISTANCE_SQUARED: f32 = PLACEMENT_MAX_DISTANCE * PLACEMENT_MAX_DISTANCE;
pub(crate) const INTERACTION_DISTANCE: f32 = 64.0;
pub(crate) const INTERACTION_DISTANCE_SQUARED: f32 = INTERACTION_DISTANCE * INTERACTION_DISTANCE;
const INITIAL_HEALTH: f32 = 200.0;

/// --- Heat Source Data Structure ---
/// Represents a placed campfire in the world.
#[spacetimedb::table(name = heat_source, public)]
#[derive(Clone, Debug)]
pub struct HeatSource {
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
    pub is_lit: bool,
    pub health: f32,
    pub max_health: f32,
    pub is_destroyed: bool,
    pub destroyed_at: Option<Timestamp>,
    pub last_hit_time: Option<Timestamp>,
}

impl HeatSource {
    pub fn cell(&self) -> FiringCell {
        FiringCell { x: self.cell_x, y: self.cell_y }
    }
}

/// Finds the live heat source occupying a cell, if any.
pub fn find_heat_source_at_cell(ctx: &ReducerContext, cell: FiringCell) -> Option<HeatSource> {
    ctx.db
        .heat_source()
        .iter()
        .find(|hs| !hs.is_destroyed && hs.cell_x == cell.x && hs.cell_y == cell.y)
}

/// The environment probe the firing feature keys off: is there a burning
/// heat source at this cell right now?
pub fn is_heat_source_lit_at(ctx: &ReducerContext, cell: FiringCell) -> bool {
    find_heat_source_at_cell(ctx, cell).map_or(false, |hs| hs.is_lit)
}

/// Validates sender proximity for interacting with a heat source.
/// Returns the heat source if the sender is close enough and it is intact.
pub fn validate_heat_source_interaction(
    ctx: &ReducerContext,
    heat_source_id: u32,
) -> Result<HeatSource, String> {
    let heat_source = ctx
        .db
        .heat_source()
        .id()
        .find(heat_source_id)
        .ok_or_else(|| format!("Heat source {} not found", heat_source_id))?;
    if heat_source.is_destroyed {
        return Err(format!("Heat source {} is destroyed", heat_source_id));
    }
    let player = ctx
        .db
        .player()
        .identity()
        .find(ctx.sender)
        .ok_or_else(|| "Player not found".to_string())?;
    let dx = player.position_x - heat_source.pos_x;
    let dy = player.position_y - heat_source.pos_y;
    if dx * dx + dy * dy > INTERACTION_DISTANCE_SQUARED {
        return Err("Too far away from heat source".to_string());
    }
    Ok(heat_source)
}

/// --- Reducers ---

/// Places a campfire from the player's inventory at the given world position.
#[spacetimedb::reducer]
pub fn place_heat_source(
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
    if item_def.name != HEAT_SOURCE_ITEM_NAME || item_def.category != ItemCategory::Placeable {
        return Err(format!("Item '{}' cannot be placed as a heat source", item_def.name));
    }

    let cell = cell_for_position(world_x, world_y);
    if find_heat_source_at_cell(ctx, cell).is_some() {
        return Err("A heat source already occupies that spot".to_string());
    }

    // Consume the kit item before spawning the entity.
    ctx.db.inventory_item().instance_id().delete(item_instance_id);

    let inserted = ctx
        .db
        .heat_source()
        .try_insert(HeatSource {
            id: 0, // Auto-incremented
            pos_x: world_x,
            pos_y: world_y,
            cell_x: cell.x,
            cell_y: cell.y,
            chunk_index: calculate_chunk_index(world_x, world_y),
            placed_by: sender_id,
            placed_at: ctx.timestamp,
            is_lit: false,
            health: INITIAL_HEALTH,
            max_health: INITIAL_HEALTH,
            is_destroyed: false,
            destroyed_at: None,
            last_hit_time: None,
        })
        .map_err(|e| format!("Failed to place heat source: {}", e))?;

    log::info!(
        "[PlaceHeatSource] Player {:?} placed heat source {} at cell ({}, {})",
        sender_id, inserted.id, cell.x, cell.y
    );
    crate::sound_events::emit_place_object_sound(ctx, world_x, world_y, sender_id);
    Ok(())
}

/// Toggles a heat source between lit and extinguished.
#[spacetimedb::reducer]
pub fn toggle_heat_source_lit(ctx: &ReducerContext, heat_source_id: u32) -> Result<(), String> {
    let mut heat_source = validate_heat_source_interaction(ctx, heat_source_id)?;
    let cell = heat_source.cell();
    let now_lit = !heat_source.is_lit;
    heat_source.is_lit = now_lit;
    ctx.db.heat_source().id().update(heat_source);

    log::info!(
        "[ToggleHeatSource] Heat source {} at ({}, {}) is now {}",
        heat_source_id, cell.x, cell.y,
        if now_lit { "lit" } else { "extinguished" }
    );

    if now_lit {
        listeners::broadcast_lit(ctx, cell);
    } else {
        listeners::broadcast_extinguished(ctx, cell, ExtinguishReason::PlayerAction);
    }
    Ok(())
}

/// Applies damage to a heat source; destroys it at zero health.
#[spacetimedb::reducer]
pub fn damage_heat_source(ctx: &ReducerContext, heat_source_id: u32, damage: f32) -> Result<(), String> {
    if damage <= 0.0 {
        return Err("Damage must be positive".to_string());
    }
    let mut heat_source = validate_heat_source_interaction(ctx, heat_source_id)?;
    let cell = heat_source.cell();
    heat_source.health = (heat_source.health - damage).max(0.0);
    heat_source.last_hit_time = Some(ctx.timestamp);

    if heat_source.health <= 0.0 {
        heat_source.is_destroyed = true;
        heat_source.destroyed_at = Some(ctx.timestamp);
        heat_source.is_lit = false;
        ctx.db.heat_source().id().update(heat_source);
        log::info!(
            "[DamageHeatSource] Heat source {} at ({}, {}) destroyed",
            heat_source_id, cell.x, cell.y
        );
        listeners::broadcast_broken(ctx, cell);
    } else {
        ctx.db.heat_source().id().update(heat_source);
    }
    Ok(())
}

/// Picks an unlit heat source back up into the owner's inventory.
#[spacetimedb::reducer]
pub fn pickup_heat_source(ctx: &ReducerContext, heat_source_id: u32) -> Result<(), String> {
    let heat_source = validate_heat_source_interaction(ctx, heat_source_id)?;
    if heat_source.is_lit {
        return Err("Cannot pick up a burning heat source".to_string());
    }
    let cell = heat_source.cell();

    let kit_def = get_item_def_by_name(ctx, HEAT_SOURCE_ITEM_NAME)
        .ok_or_else(|| "Heat source item definition missing".to_string())?;
    crate::items::add_item_to_player_inventory(ctx, ctx.sender, kit_def.id, 1)?;
    ctx.db.heat_source().id().delete(heat_source_id);

    log::info!(
        "[PickupHeatSource] Player {:?} picked up heat source {} from ({}, {})",
        ctx.sender, heat_source_id, cell.x, cell.y
    );
    listeners::broadcast_broken(ctx, cell);
    Ok(())
}

/******************************************************************************
 *                                                                            *
 * World geometry helpers: tile/cell/chunk math shared by every module that   *
 * keys state by world position, plus the chunk observability probe used by   *
 * the firing reconciliation loop to avoid touching unloaded regions.         *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, Table};

use crate::models::FiringCell;
use crate::player as PlayerTableTrait;
use crate::client_viewport as ClientViewportTableTrait;

// --- World dimensions ---
pub const TILE_SIZE_PX: u32 = 48;
pub const CHUNK_SIZE_TILES: u32 = 20;
pub const WORLD_WIDTH_TILES: u32 = 100;
pub const WORLD_HEIGHT_TILES: u32 = 100;
pub const WORLD_WIDTH_CHUNKS: u32 =
    (WORLD_WIDTH_TILES + CHUNK_SIZE_TILES - 1) / CHUNK_SIZE_TILES;

const CHUNK_SIZE_PX: f32 = (CHUNK_SIZE_TILES * TILE_SIZE_PX) as f32;

/// How far past the viewport edges a chunk still counts as observed.
/// Gives entities just off-screen a chance to be reconciled before the
/// player walks into them.
const VIEWPORT_OBSERVE_MARGIN_PX: f32 = CHUNK_SIZE_PX;

/// Converts world pixel coordinates to the cell that owns them.
pub fn cell_for_position(world_x: f32, world_y: f32) -> FiringCell {
    FiringCell {
        x: (world_x / TILE_SIZE_PX as f32).floor() as i32,
        y: (world_y / TILE_SIZE_PX as f32).floor() as i32,
    }
}

/// Center of a cell in world pixels. Used for sound/feedback emission.
pub fn cell_center_position(cell: FiringCell) -> (f32, f32) {
    let half = TILE_SIZE_PX as f32 / 2.0;
    (
        cell.x as f32 * TILE_SIZE_PX as f32 + half,
        cell.y as f32 * TILE_SIZE_PX as f32 + half,
    )
}

/// Calculates the chunk index for a world position.
pub fn calculate_chunk_index(world_x: f32, world_y: f32) -> u32 {
    let chunk_x = (world_x / CHUNK_SIZE_PX).floor().max(0.0) as u32;
    let chunk_y = (world_y / CHUNK_SIZE_PX).floor().max(0.0) as u32;
    chunk_y * WORLD_WIDTH_CHUNKS + chunk_x
}

pub fn chunk_index_for_cell(cell: FiringCell) -> u32 {
    let (px, py) = cell_center_position(cell);
    calculate_chunk_index(px, py)
}

/// Pixel-space bounding box of a chunk.
fn chunk_bounds(chunk_index: u32) -> (f32, f32, f32, f32) {
    let chunk_x = chunk_index % WORLD_WIDTH_CHUNKS;
    let chunk_y = chunk_index / WORLD_WIDTH_CHUNKS;
    let min_x = chunk_x as f32 * CHUNK_SIZE_PX;
    let min_y = chunk_y as f32 * CHUNK_SIZE_PX;
    (min_x, min_y, min_x + CHUNK_SIZE_PX, min_y + CHUNK_SIZE_PX)
}

/// Pure intersection test between a chunk and a (margin-expanded) viewport.
pub(crate) fn chunk_intersects_viewport(
    chunk_index: u32,
    view_min_x: f32,
    view_min_y: f32,
    view_max_x: f32,
    view_max_y: f32,
) -> bool {
    let (min_x, min_y, max_x, max_y) = chunk_bounds(chunk_index);
    min_x <= view_max_x + VIEWPORT_OBSERVE_MARGIN_PX
        && max_x >= view_min_x - VIEWPORT_OBSERVE_MARGIN_PX
        && min_y <= view_max_y + VIEWPORT_OBSERVE_MARGIN_PX
        && max_y >= view_min_y - VIEWPORT_OBSERVE_MARGIN_PX
}

/// Whether any online client can currently observe the given chunk.
/// The reconciliation loop never probes or mutates state in unobserved
/// chunks; it defers those records to a later pass instead.
pub fn is_chunk_observed(ctx: &ReducerContext, chunk_index: u32) -> bool {
    for viewport in ctx.db.client_viewport().iter() {
        let viewer_online = ctx
            .db
            .player()
            .identity()
            .find(viewport.client_identity)
            .map_or(false, |p| p.is_online);
        if !viewer_online {
            continue;
        }
        if chunk_intersects_viewport(
            chunk_index,
            viewport.min_x,
            viewport.min_y,
            viewport.max_x,
            viewport.max_y,
        ) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_for_position_floors_toward_negative_infinity() {
        assert_eq!(cell_for_position(0.0, 0.0), FiringCell { x: 0, y: 0 });
        assert_eq!(cell_for_position(47.9, 47.9), FiringCell { x: 0, y: 0 });
        assert_eq!(cell_for_position(48.0, 0.0), FiringCell { x: 1, y: 0 });
        assert_eq!(cell_for_position(-0.1, -48.1), FiringCell { x: -1, y: -2 });
    }

    #[test]
    fn positions_in_same_tile_share_a_cell() {
        let a = cell_for_position(100.0, 200.0);
        let b = cell_for_position(100.0 + 10.0, 200.0 + 10.0);
        assert_eq!(a, b);
    }

    #[test]
    fn cell_center_maps_back_to_same_cell() {
        for cell in [FiringCell { x: 0, y: 0 }, FiringCell { x: 7, y: 3 }] {
            let (px, py) = cell_center_position(cell);
            assert_eq!(cell_for_position(px, py), cell);
        }
    }

    #[test]
    fn chunk_index_is_row_major() {
        assert_eq!(calculate_chunk_index(0.0, 0.0), 0);
        // One chunk to the right.
        assert_eq!(calculate_chunk_index(CHUNK_SIZE_PX + 1.0, 0.0), 1);
        // One chunk down.
        assert_eq!(
            calculate_chunk_index(0.0, CHUNK_SIZE_PX + 1.0),
            WORLD_WIDTH_CHUNKS
        );
    }

    #[test]
    fn viewport_intersection_honors_margin() {
        // Chunk 0 spans [0, CHUNK_SIZE_PX). A viewport fully inside it
        // observes it; a viewport a full chunk away (beyond the margin)
        // does not.
        assert!(chunk_intersects_viewport(0, 10.0, 10.0, 50.0, 50.0));
        let far = 2.5 * CHUNK_SIZE_PX;
        assert!(!chunk_intersects_viewport(0, far, far, far + 10.0, far + 10.0));
        // Just past the chunk edge but within the margin still counts.
        assert!(chunk_intersects_viewport(
            0,
            CHUNK_SIZE_PX + 1.0,
            0.0,
            CHUNK_SIZE_PX + 50.0,
            50.0
        ));
    }
}

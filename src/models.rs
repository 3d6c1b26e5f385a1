use spacetimedb::{SpacetimeType, Identity};

/// A single world cell, derived from pixel coordinates by tile flooring.
/// This is the sole identity for firing records and firing timers: two
/// positions address the same firing iff they resolve to the same cell.
#[derive(SpacetimeType, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FiringCell {
    pub x: i32,
    pub y: i32,
}

impl FiringCell {
    /// Packs the cell into a single u64 so it can serve as the primary key
    /// of a scheduled table (SpacetimeDB primary keys are single-column).
    pub fn packed(&self) -> u64 {
        ((self.x as u32 as u64) << 32) | (self.y as u32 as u64)
    }

    pub fn from_packed(key: u64) -> FiringCell {
        FiringCell {
            x: (key >> 32) as u32 as i32,
            y: key as u32 as i32,
        }
    }
}

/// Why a heat source stopped burning. Carried on the extinguish listener
/// callback so features can distinguish player action from reconciliation
/// cleanup of setups that died while their chunk was unobserved.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExtinguishReason {
    PlayerAction,
    StaleOnReconcile,
}

// --- Data structs for ItemLocation variants ---

#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct InventoryLocationData {
    pub owner_id: Identity,
    pub slot_index: u16,
}

#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct RackLocationData {
    pub rack_id: u32,
}

/// Represents the specific location of an InventoryItem.
#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub enum ItemLocation {
    Inventory(InventoryLocationData),
    Rack(RackLocationData),
    Unknown, // Represents an undefined or invalid location
}

impl ItemLocation {
    pub fn is_player_bound(&self) -> Option<Identity> {
        match self {
            ItemLocation::Inventory(data) => Some(data.owner_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_packing_round_trips() {
        let cells = [
            FiringCell { x: 0, y: 0 },
            FiringCell { x: 17, y: 42 },
            FiringCell { x: -1, y: 1 },
            FiringCell { x: i32::MIN, y: i32::MAX },
        ];
        for cell in cells {
            assert_eq!(FiringCell::from_packed(cell.packed()), cell);
        }
    }

    #[test]
    fn distinct_cells_pack_to_distinct_keys() {
        // Negative coordinates must not collide with positive ones.
        let a = FiringCell { x: -1, y: 0 };
        let b = FiringCell { x: 0, y: -1 };
        let c = FiringCell { x: -1, y: -1 };
        assert_ne!(a.packed(), b.packed());
        assert_ne!(a.packed(), c.packed());
        assert_ne!(b.packed(), c.packed());
    }
}

/******************************************************************************
 *                                                                            *
 * Mold firing over campfires. A clay mold sitting on a rack above a lit      *
 * campfire cures for a fixed duration and becomes its fired counterpart.     *
 * Progress survives restarts: the curing start time is persisted on a        *
 * firing record keyed by world cell, and the remaining time is always        *
 * derived from `now - curing_start_time` rather than from any in-flight      *
 * timer state. Extinguishing the fire discards progress; destroying the      *
 * setup discards the record.                                                 *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, Table, Timestamp};

use crate::environment::{cell_center_position, chunk_index_for_cell};
use crate::heat_source::is_heat_source_lit_at;
use crate::items::{get_item_def_by_name, is_fireable_mold, set_fired_at_timestamp, InventoryItem, ItemDefinition};
use crate::items::{inventory_item as InventoryItemTableTrait, item_definition as ItemDefinitionTableTrait};
use crate::listeners::HeatSourceListener;
use crate::mold_rack::{find_rack_at_cell, read_rack_item, set_rack_item, MoldRack};
use crate::models::{ExtinguishReason, FiringCell};

// --- Constants ---
pub const FIRING_DURATION_SECS: u64 = 300; // 5 minutes over a lit campfire
pub const FIRING_DURATION_MICROS: i64 = (FIRING_DURATION_SECS as i64) * 1_000_000;
pub(crate) const PROCESS_KIND_CAMPFIRE: &str = "campfire";

/// --- Firing Record Data Structure ---
/// Durable state of one firing location. Created lazily when a cell first
/// qualifies; removed when the setup breaks or the firing completes.
/// `curing_start_time` is the single source of truth for progress.
#[spacetimedb::table(name = firing_record, public)]
#[derive(Clone, Debug)]
pub struct FiringRecord {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub cell_x: i32,
    pub cell_y: i32,
    #[index(btree)]
    pub chunk_index: u32,
    pub process_kind: String,
    pub curing_start_time: Option<Timestamp>,
}

impl FiringRecord {
    pub fn cell(&self) -> FiringCell {
        FiringCell { x: self.cell_x, y: self.cell_y }
    }
}

// --- Record helpers ---

pub fn find_firing_record_at(ctx: &ReducerContext, cell: FiringCell) -> Option<FiringRecord> {
    ctx.db
        .firing_record()
        .iter()
        .find(|r| r.cell_x == cell.x && r.cell_y == cell.y && r.process_kind == PROCESS_KIND_CAMPFIRE)
}

fn get_or_create_firing_record(ctx: &ReducerContext, cell: FiringCell) -> Result<FiringRecord, String> {
    if let Some(record) = find_firing_record_at(ctx, cell) {
        return Ok(record);
    }
    ctx.db
        .firing_record()
        .try_insert(FiringRecord {
            id: 0, // Auto-incremented
            cell_x: cell.x,
            cell_y: cell.y,
            chunk_index: chunk_index_for_cell(cell),
            process_kind: PROCESS_KIND_CAMPFIRE.to_string(),
            curing_start_time: None,
        })
        .map_err(|e| format!("Failed to create firing record at ({}, {}): {}", cell.x, cell.y, e))
}

pub fn remove_firing_record(ctx: &ReducerContext, cell: FiringCell) {
    if let Some(record) = find_firing_record_at(ctx, cell) {
        ctx.db.firing_record().id().delete(record.id);
    }
}

// --- Pure timing decisions ---

/// Microseconds of curing left, negative once the deadline has passed.
pub fn remaining_firing_micros(start: Timestamp, now: Timestamp) -> i64 {
    let elapsed = now.to_micros_since_unix_epoch() - start.to_micros_since_unix_epoch();
    FIRING_DURATION_MICROS - elapsed
}

/// What to do with a persisted in-progress firing found at startup or during
/// reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// The deadline passed while the server was down (or the timer was lost).
    CompleteNow,
    /// Re-arm a timer for the shortened remainder.
    Arm { remaining_micros: i64 },
}

pub fn classify_resume(start: Timestamp, now: Timestamp) -> ResumeAction {
    let remaining = remaining_firing_micros(start, now);
    if remaining <= 0 {
        ResumeAction::CompleteNow
    } else {
        ResumeAction::Arm { remaining_micros: remaining }
    }
}

// --- Environment probe ---

/// The live world state a firing needs: a rack at the cell holding an
/// unfired mold (the heat source is checked separately by callers that
/// need it).
pub struct FiringSetup {
    pub rack: MoldRack,
    pub mold_item: InventoryItem,
    pub mold_def: ItemDefinition,
}

/// Whether a cell's observed state qualifies for firing: a burning heat
/// source plus an unfired mold in the rack slot. Pure so the prune/qualify
/// classification is testable without world state.
pub(crate) fn setup_qualifies(heat_lit: bool, mold_def: Option<&ItemDefinition>) -> bool {
    heat_lit && mold_def.map_or(false, is_fireable_mold)
}

/// Probes whether a cell currently qualifies for firing: a burning heat
/// source plus a rack holding an unfired clay mold.
pub fn firing_setup_at(ctx: &ReducerContext, cell: FiringCell) -> Option<FiringSetup> {
    let heat_lit = is_heat_source_lit_at(ctx, cell);
    let rack = find_rack_at_cell(ctx, cell)?;
    let mold_item = read_rack_item(ctx, &rack)?;
    let mold_def = ctx.db.item_definition().id().find(mold_item.item_def_id)?;
    if !setup_qualifies(heat_lit, Some(&mold_def)) {
        return None;
    }
    Some(FiringSetup { rack, mold_item, mold_def })
}

// --- State transitions ---

/// Starts (or resumes) the firing at a cell if the setup qualifies.
/// An existing curing start time is reused, never reset, so relighting a
/// campfire mid-cure cannot postpone completion.
pub fn try_begin_firing_at(ctx: &ReducerContext, cell: FiringCell) {
    let Some(setup) = firing_setup_at(ctx, cell) else {
        return;
    };

    let mut record = match get_or_create_firing_record(ctx, cell) {
        Ok(record) => record,
        Err(e) => {
            log::error!("[Firing] {}", e);
            return;
        }
    };

    let started_at = match record.curing_start_time {
        Some(existing) => existing,
        None => {
            record.curing_start_time = Some(ctx.timestamp);
            ctx.db.firing_record().id().update(record.clone());
            let (pos_x, pos_y) = cell_center_position(cell);
            crate::sound_events::emit_firing_started_sound(ctx, pos_x, pos_y);
            log::info!(
                "[Firing] '{}' (instance {}) started curing at ({}, {})",
                setup.mold_def.name, setup.mold_item.instance_id, cell.x, cell.y
            );
            ctx.timestamp
        }
    };

    if let Err(e) = crate::firing_timer::start_firing_timer(ctx, cell, record.id, setup.rack.id, started_at) {
        log::error!("[Firing] Failed to arm timer at ({}, {}): {}", cell.x, cell.y, e);
    }
}

/// Tears down the firing at a cell when the setup no longer qualifies:
/// cancels the timer and removes the record. No-op when nothing is active.
pub fn prune_firing_at(ctx: &ReducerContext, cell: FiringCell) {
    crate::firing_timer::cancel_firing_timer(ctx, cell);
    if find_firing_record_at(ctx, cell).is_some() {
        remove_firing_record(ctx, cell);
        log::info!("[Firing] Pruned firing state at ({}, {})", cell.x, cell.y);
    }
}

fn handle_heat_lit(ctx: &ReducerContext, cell: FiringCell) {
    try_begin_firing_at(ctx, cell);
}

/// Discards a record's curing progress. Returns whether anything changed.
pub(crate) fn apply_extinguish(record: &mut FiringRecord) -> bool {
    if record.curing_start_time.is_some() {
        record.curing_start_time = None;
        true
    } else {
        false
    }
}

/// Extinguishing discards progress: the record survives (the setup is still
/// assembled) but the start time is cleared, so relighting begins a fresh
/// cure.
fn handle_heat_extinguished(ctx: &ReducerContext, cell: FiringCell) {
    crate::firing_timer::cancel_firing_timer(ctx, cell);
    if let Some(mut record) = find_firing_record_at(ctx, cell) {
        if apply_extinguish(&mut record) {
            ctx.db.firing_record().id().update(record);
            log::info!("[Firing] Curing at ({}, {}) cancelled, progress discarded", cell.x, cell.y);
        }
    }
}

fn handle_heat_broken(ctx: &ReducerContext, cell: FiringCell) {
    prune_firing_at(ctx, cell);
}

/// The firing feature's subscription to heat source transitions.
pub struct MoldFiringListener;

impl HeatSourceListener for MoldFiringListener {
    fn name(&self) -> &'static str {
        "MoldFiring"
    }

    fn on_lit(&self, ctx: &ReducerContext, cell: FiringCell) -> Result<(), String> {
        handle_heat_lit(ctx, cell);
        Ok(())
    }

    fn on_extinguished(
        &self,
        ctx: &ReducerContext,
        cell: FiringCell,
        _reason: ExtinguishReason,
    ) -> Result<(), String> {
        handle_heat_extinguished(ctx, cell);
        Ok(())
    }

    fn on_broken(&self, ctx: &ReducerContext, cell: FiringCell) -> Result<(), String> {
        handle_heat_broken(ctx, cell);
        Ok(())
    }
}

// --- Completion ---

/// Completes the firing at a cell: swaps the rack's mold for its fired
/// counterpart, stamps the completion time into the item's metadata and
/// removes the firing state. Idempotent: a missing rack, an empty slot or an
/// already-fired mold degrade to pure cleanup, so double delivery (timer
/// expiry racing a reconciliation pass) is harmless.
pub fn complete_firing(ctx: &ReducerContext, cell: FiringCell) -> Result<(), String> {
    crate::firing_timer::cancel_firing_timer(ctx, cell);

    let transformed = transform_rack_mold(ctx, cell)?;
    if let Some(fired_name) = transformed {
        let (pos_x, pos_y) = cell_center_position(cell);
        crate::sound_events::emit_firing_complete_sound(ctx, pos_x, pos_y);
        log::info!("[Firing] Mold at ({}, {}) finished firing into '{}'", cell.x, cell.y, fired_name);
    } else {
        log::debug!(
            "[Firing] Completion at ({}, {}) found nothing to transform, cleaning up",
            cell.x, cell.y
        );
    }

    remove_firing_record(ctx, cell);
    Ok(())
}

/// The fired definition a mold turns into on completion. None means there is
/// nothing to do: the mold is already fired, or the item is not a mold. This
/// is what makes double completion a no-op at the item level.
pub(crate) fn fired_transform_target(def: &ItemDefinition) -> Option<&str> {
    def.fired_item_def_name.as_deref()
}

/// Swaps the mold in the rack at `cell` to its fired definition, if the
/// slot still holds an unfired mold. Returns the fired definition name when
/// a transform happened.
fn transform_rack_mold(ctx: &ReducerContext, cell: FiringCell) -> Result<Option<String>, String> {
    let Some(rack) = find_rack_at_cell(ctx, cell) else {
        return Ok(None);
    };
    let Some(mut item) = read_rack_item(ctx, &rack) else {
        return Ok(None);
    };
    let Some(mold_def) = ctx.db.item_definition().id().find(item.item_def_id) else {
        return Ok(None);
    };
    let Some(fired_name) = fired_transform_target(&mold_def).map(str::to_string) else {
        return Ok(None);
    };

    let fired_def = get_item_def_by_name(ctx, &fired_name)
        .ok_or_else(|| format!("Fired definition '{}' missing from catalog", fired_name))?;

    item.item_def_id = fired_def.id;
    set_fired_at_timestamp(&mut item, ctx.timestamp);
    ctx.db.inventory_item().instance_id().update(item.clone());
    set_rack_item(ctx, rack.id, Some(&item))?;
    Ok(Some(fired_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(micros)
    }

    #[test]
    fn remaining_counts_down_from_full_duration() {
        assert_eq!(remaining_firing_micros(ts(0), ts(0)), FIRING_DURATION_MICROS);
        assert_eq!(
            remaining_firing_micros(ts(0), ts(100_000_000)),
            FIRING_DURATION_MICROS - 100_000_000
        );
    }

    #[test]
    fn resume_before_deadline_arms_for_the_remainder() {
        // Started at t=0, revisited at t=200s of a 300s cure: 100s remain.
        let action = classify_resume(ts(0), ts(200_000_000));
        assert_eq!(action, ResumeAction::Arm { remaining_micros: 100_000_000 });
    }

    #[test]
    fn resume_past_deadline_completes_immediately() {
        // Deadline passed while the server was down.
        let past = FIRING_DURATION_MICROS + 10_000_000;
        assert_eq!(classify_resume(ts(0), ts(past)), ResumeAction::CompleteNow);
    }

    #[test]
    fn resume_exactly_at_deadline_completes() {
        assert_eq!(classify_resume(ts(0), ts(FIRING_DURATION_MICROS)), ResumeAction::CompleteNow);
        // One microsecond short still arms.
        assert_eq!(
            classify_resume(ts(0), ts(FIRING_DURATION_MICROS - 1)),
            ResumeAction::Arm { remaining_micros: 1 }
        );
    }

    fn def(name: &str, fired_name: Option<&str>) -> ItemDefinition {
        ItemDefinition {
            id: 1,
            name: name.to_string(),
            category: crate::items::ItemCategory::Mold,
            is_stackable: false,
            stack_size: 1,
            fired_item_def_name: fired_name.map(str::to_string),
        }
    }

    fn record_started_at(start: Timestamp) -> FiringRecord {
        FiringRecord {
            id: 1,
            cell_x: 3,
            cell_y: 7,
            chunk_index: 0,
            process_kind: PROCESS_KIND_CAMPFIRE.to_string(),
            curing_start_time: Some(start),
        }
    }

    #[test]
    fn extinguish_before_deadline_discards_progress_without_completing() {
        let mut record = record_started_at(ts(0));
        // 100s into a 300s cure the deadline has not passed, so cancelling
        // here must never produce a completion.
        assert_eq!(
            classify_resume(ts(0), ts(100_000_000)),
            ResumeAction::Arm { remaining_micros: 200_000_000 }
        );
        assert!(apply_extinguish(&mut record));
        assert_eq!(record.curing_start_time, None);
        // With the start time gone there is no deadline left to resume.
        assert!(!apply_extinguish(&mut record));
    }

    #[test]
    fn only_lit_setups_with_unfired_molds_qualify() {
        let clay = def("Clay Ingot Mold", Some("Fired Ingot Mold"));
        let fired = def("Fired Ingot Mold", None);
        assert!(setup_qualifies(true, Some(&clay)));
        // Fire out: the record is prune material no matter the slot.
        assert!(!setup_qualifies(false, Some(&clay)));
        // Already-fired mold or empty slot never qualifies.
        assert!(!setup_qualifies(true, Some(&fired)));
        assert!(!setup_qualifies(true, None));
    }

    #[test]
    fn completing_a_fired_mold_again_has_no_transform_target() {
        let clay = def("Clay Axe Head Mold", Some("Fired Axe Head Mold"));
        assert_eq!(fired_transform_target(&clay), Some("Fired Axe Head Mold"));
        // After the transform the slot holds the fired definition, so a
        // second completion finds nothing to do.
        let fired = def("Fired Axe Head Mold", None);
        assert_eq!(fired_transform_target(&fired), None);
    }

    #[test]
    fn late_start_times_shift_the_deadline() {
        let start = ts(50_000_000);
        let action = classify_resume(start, ts(60_000_000));
        assert_eq!(
            action,
            ResumeAction::Arm { remaining_micros: FIRING_DURATION_MICROS - 10_000_000 }
        );
    }
}

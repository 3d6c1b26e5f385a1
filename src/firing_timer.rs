/******************************************************************************
 *                                                                            *
 * Firing timer registry. One scheduled row per world cell (the packed cell   *
 * is the primary key, so at most one job can ever be armed per location).    *
 * Arming always deletes any prior row first; cancelling is a row delete.     *
 * A cancel racing a natural expiry is resolved by the transaction order:     *
 * whichever commits first removes the row and the loser observes nothing.    *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, ScheduleAt, Table, TimeDuration, Timestamp};

use crate::firing::{classify_resume, complete_firing, find_firing_record_at, firing_setup_at, ResumeAction};
use crate::models::FiringCell;

/// --- Firing Timer Data Structure ---
#[spacetimedb::table(name = firing_timer, scheduled(firing_timer_expired))]
#[derive(Clone, Debug)]
pub struct FiringTimer {
    /// Packed firing cell. Being the primary key enforces the
    /// one-job-per-location invariant at the storage layer.
    #[primary_key]
    pub cell_key: u64,
    pub record_id: u64,
    pub rack_id: u32,
    pub started_at: Timestamp,
    pub scheduled_at: ScheduleAt,
}

/// Arms the completion timer for a cell, replacing any job already armed
/// there. When the deadline has already passed (a resume long after the
/// fact) the completion runs synchronously instead of scheduling.
pub fn start_firing_timer(
    ctx: &ReducerContext,
    cell: FiringCell,
    record_id: u64,
    rack_id: u32,
    started_at: Timestamp,
) -> Result<(), String> {
    let timers = ctx.db.firing_timer();
    timers.cell_key().delete(cell.packed());

    let remaining = match classify_resume(started_at, ctx.timestamp) {
        ResumeAction::CompleteNow => {
            log::debug!(
                "[FiringTimer] Deadline already passed at ({}, {}), completing now",
                cell.x, cell.y
            );
            return complete_firing(ctx, cell);
        }
        ResumeAction::Arm { remaining_micros } => remaining_micros,
    };

    let fire_at = ctx.timestamp + TimeDuration::from_micros(remaining);
    timers
        .try_insert(FiringTimer {
            cell_key: cell.packed(),
            record_id,
            rack_id,
            started_at,
            scheduled_at: fire_at.into(),
        })
        .map_err(|e| format!("Failed to arm firing timer at ({}, {}): {}", cell.x, cell.y, e))?;
    log::debug!(
        "[FiringTimer] Armed at ({}, {}) with {} us remaining",
        cell.x, cell.y, remaining
    );
    Ok(())
}

/// Disarms the timer for a cell. No-op when nothing is armed.
pub fn cancel_firing_timer(ctx: &ReducerContext, cell: FiringCell) {
    if ctx.db.firing_timer().cell_key().delete(cell.packed()) {
        log::debug!("[FiringTimer] Cancelled at ({}, {})", cell.x, cell.y);
    }
}

/// Whether a completion job is currently armed for a cell.
pub fn is_firing_active(ctx: &ReducerContext, cell: FiringCell) -> bool {
    ctx.db.firing_timer().cell_key().find(cell.packed()).is_some()
}

/// Fires when a mold's curing deadline arrives. The world may have changed
/// since arming, so the setup is re-verified before completing; a stale job
/// just removes itself and leaves any cleanup to the reconciliation loop.
#[spacetimedb::reducer]
pub fn firing_timer_expired(ctx: &ReducerContext, args: FiringTimer) -> Result<(), String> {
    // Security check - only allow scheduler to run this
    if ctx.sender != ctx.identity() {
        return Err("Firing timer expiry can only be run by scheduler".to_string());
    }

    let cell = FiringCell::from_packed(args.cell_key);
    ctx.db.firing_timer().cell_key().delete(args.cell_key);

    let record_still_live = find_firing_record_at(ctx, cell)
        .map_or(false, |r| r.id == args.record_id && r.curing_start_time.is_some());
    if !record_still_live {
        log::debug!(
            "[FiringTimer] Expiry at ({}, {}) found no matching record, skipping",
            cell.x, cell.y
        );
        return Ok(());
    }

    if firing_setup_at(ctx, cell).is_none() {
        log::warn!(
            "[FiringTimer] Expiry at ({}, {}) no longer qualifies, leaving cleanup to reconciliation",
            cell.x, cell.y
        );
        return Ok(());
    }

    complete_firing(ctx, cell)
}

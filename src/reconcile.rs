/******************************************************************************
 *                                                                            *
 * Firing reconciliation. Two entry points share one pass over the persisted  *
 * firing records: a one-shot sweep at module init that resumes work left     *
 * over from before a restart, and a periodic schedule that repairs drift     *
 * between records, timers and live world state (racks emptied by decay,      *
 * timers lost to stale schedules, setups assembled while nobody relit the    *
 * fire). Records in chunks no client observes are left untouched.            *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{ReducerContext, ScheduleAt, Table, TimeDuration};

use crate::environment::is_chunk_observed;
use crate::firing::{
    classify_resume, complete_firing, find_firing_record_at, firing_setup_at, FiringRecord,
    ResumeAction, PROCESS_KIND_CAMPFIRE,
};
use crate::firing::firing_record as FiringRecordTableTrait;
use crate::firing_timer::{is_firing_active, start_firing_timer};
use crate::listeners;
use crate::models::ExtinguishReason;

pub const RECONCILE_INTERVAL_SECS: u64 = 2;

/// Schedule table driving the periodic reconciliation pass
#[spacetimedb::table(name = firing_reconcile_schedule, scheduled(reconcile_firing_records))]
#[derive(Clone, Debug)]
pub struct FiringReconcileSchedule {
    #[primary_key]
    #[auto_inc]
    pub schedule_id: u64,
    pub scheduled_at: ScheduleAt,
}

/// Installs the periodic reconciliation schedule. Called from init_module.
pub fn init_firing_reconciliation(ctx: &ReducerContext) {
    let interval = TimeDuration::from_micros((RECONCILE_INTERVAL_SECS * 1_000_000) as i64);
    crate::try_insert_schedule!(
        ctx.db.firing_reconcile_schedule(),
        FiringReconcileSchedule {
            schedule_id: 0, // Auto-incremented
            scheduled_at: interval.into(),
        },
        "Firing reconciliation"
    );
}

/// Outcome counters for one reconciliation pass.
#[derive(Default, Debug, PartialEq, Eq)]
struct PassSummary {
    resumed: usize,
    expired: usize,
    started: usize,
    pruned: usize,
    skipped_unobserved: usize,
}

impl PassSummary {
    fn is_quiet(&self) -> bool {
        self.resumed == 0 && self.expired == 0 && self.started == 0 && self.pruned == 0
    }
}

/// One pass over every campfire firing record.
fn reconcile_pass(ctx: &ReducerContext, announce_resumes: bool) -> PassSummary {
    let mut summary = PassSummary::default();

    let records: Vec<FiringRecord> = ctx
        .db
        .firing_record()
        .iter()
        .filter(|r| r.process_kind == PROCESS_KIND_CAMPFIRE)
        .collect();

    for record in records {
        let cell = record.cell();

        // Never probe world state nobody has loaded; the record keeps its
        // progress and a later pass picks it up.
        if !is_chunk_observed(ctx, record.chunk_index) {
            summary.skipped_unobserved += 1;
            continue;
        }

        // The record may have been removed by an earlier iteration's
        // completion cascading through listeners.
        if find_firing_record_at(ctx, cell).is_none() {
            continue;
        }

        let setup = firing_setup_at(ctx, cell);

        match (setup.is_some(), record.curing_start_time) {
            // Setup broken or fire out: discard the record outright. The
            // extinguish transition already cleared start times for intact
            // setups, so a start time here means the cure died while the
            // chunk was unobserved.
            (false, start) => {
                if start.is_some() {
                    listeners::broadcast_extinguished(ctx, cell, ExtinguishReason::StaleOnReconcile);
                }
                crate::firing::prune_firing_at(ctx, cell);
                summary.pruned += 1;
            }
            // Qualifying setup that never started (e.g. the fire was lit
            // while the chunk was unobserved): self-heal by starting now.
            (true, None) => {
                crate::firing::try_begin_firing_at(ctx, cell);
                summary.started += 1;
            }
            // In progress: make sure a timer is actually armed.
            (true, Some(started_at)) => {
                if is_firing_active(ctx, cell) {
                    continue;
                }
                match classify_resume(started_at, ctx.timestamp) {
                    ResumeAction::CompleteNow => {
                        if let Err(e) = complete_firing(ctx, cell) {
                            log::error!(
                                "[ReconcileFiring] Completion at ({}, {}) failed: {}",
                                cell.x, cell.y, e
                            );
                            continue;
                        }
                        if announce_resumes {
                            listeners::broadcast_resume_timer_expired(ctx, cell);
                        }
                        summary.expired += 1;
                    }
                    ResumeAction::Arm { remaining_micros } => {
                        let rack_id = setup.as_ref().map(|s| s.rack.id).unwrap_or(0);
                        if let Err(e) =
                            start_firing_timer(ctx, cell, record.id, rack_id, started_at)
                        {
                            log::error!("[ReconcileFiring] {}", e);
                            continue;
                        }
                        if announce_resumes {
                            listeners::broadcast_resume_timer_scheduled(ctx, cell, remaining_micros);
                        }
                        summary.resumed += 1;
                    }
                }
            }
        }
    }

    summary
}

/// One-shot startup sweep. Runs from init_module before the periodic
/// schedule is installed, so leftover firings resume exactly once with the
/// resume listener callbacks.
pub fn resume_firing_processes(ctx: &ReducerContext) {
    let summary = reconcile_pass(ctx, true);
    log::info!(
        "[ResumeFiring] Startup sweep: {} resumed, {} expired while down, {} started, {} pruned, {} deferred (unobserved)",
        summary.resumed, summary.expired, summary.started, summary.pruned, summary.skipped_unobserved
    );
}

/// Periodic reconciliation reducer.
#[spacetimedb::reducer]
pub fn reconcile_firing_records(ctx: &ReducerContext, _args: FiringReconcileSchedule) -> Result<(), String> {
    // Security check - only allow scheduler to run this
    if ctx.sender != ctx.identity() {
        return Err("Firing reconciliation can only be run by scheduler".to_string());
    }

    let summary = reconcile_pass(ctx, false);
    if !summary.is_quiet() {
        log::info!(
            "[ReconcileFiring] {} resumed, {} expired, {} started, {} pruned",
            summary.resumed, summary.expired, summary.started, summary.pruned
        );
    }
    Ok(())
}

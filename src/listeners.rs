/******************************************************************************
 *                                                                            *
 * Heat source event fan-out. Features that care about campfires burning or   *
 * going out register a listener here; state-transition reducers call the     *
 * broadcast helpers instead of reaching into feature modules directly.       *
 * Delivery is in registration order and error-tolerant: one listener         *
 * failing never starves the listeners after it.                              *
 *                                                                            *
 ******************************************************************************/

use lazy_static::lazy_static;
use spacetimedb::ReducerContext;

use crate::firing::MoldFiringListener;
use crate::models::{ExtinguishReason, FiringCell};

/// Callbacks for heat source lifecycle events. All methods default to no-ops
/// so listeners only implement the transitions they care about.
pub trait HeatSourceListener: Send + Sync {
    /// Name used in delivery-failure log lines.
    fn name(&self) -> &'static str;

    /// A heat source at `cell` started burning.
    fn on_lit(&self, _ctx: &ReducerContext, _cell: FiringCell) -> Result<(), String> {
        Ok(())
    }

    /// A heat source at `cell` stopped burning.
    fn on_extinguished(
        &self,
        _ctx: &ReducerContext,
        _cell: FiringCell,
        _reason: ExtinguishReason,
    ) -> Result<(), String> {
        Ok(())
    }

    /// The heat source (or its companion rack) at `cell` was destroyed.
    fn on_broken(&self, _ctx: &ReducerContext, _cell: FiringCell) -> Result<(), String> {
        Ok(())
    }

    /// A persisted in-progress firing at `cell` was re-armed after a restart
    /// with `remaining_micros` left on the clock.
    fn on_resume_timer_scheduled(
        &self,
        _ctx: &ReducerContext,
        _cell: FiringCell,
        _remaining_micros: i64,
    ) -> Result<(), String> {
        Ok(())
    }

    /// A persisted firing at `cell` was found already past its deadline on
    /// restart and completed immediately.
    fn on_resume_timer_expired(&self, _ctx: &ReducerContext, _cell: FiringCell) -> Result<(), String> {
        Ok(())
    }
}

/// Sound cues for heat source transitions. The firing listener handles its
/// own completion sizzle, so this one only covers lit/extinguished/broken.
struct HeatSoundListener;

impl HeatSourceListener for HeatSoundListener {
    fn name(&self) -> &'static str {
        "HeatSound"
    }

    fn on_lit(&self, ctx: &ReducerContext, cell: FiringCell) -> Result<(), String> {
        let (pos_x, pos_y) = crate::environment::cell_center_position(cell);
        crate::sound_events::emit_campfire_lit_sound(ctx, pos_x, pos_y, ctx.sender);
        Ok(())
    }

    fn on_extinguished(
        &self,
        ctx: &ReducerContext,
        cell: FiringCell,
        reason: ExtinguishReason,
    ) -> Result<(), String> {
        // Cleanup-driven extinguishes happen with nobody nearby.
        if reason == ExtinguishReason::PlayerAction {
            let (pos_x, pos_y) = crate::environment::cell_center_position(cell);
            crate::sound_events::emit_campfire_extinguished_sound(ctx, pos_x, pos_y, ctx.sender);
        }
        Ok(())
    }

    fn on_broken(&self, ctx: &ReducerContext, cell: FiringCell) -> Result<(), String> {
        let (pos_x, pos_y) = crate::environment::cell_center_position(cell);
        crate::sound_events::emit_object_destroyed_sound(ctx, pos_x, pos_y, ctx.sender);
        Ok(())
    }
}

lazy_static! {
    /// Registration order is delivery order. The firing feature goes first so
    /// sound listeners observe post-transition world state.
    static ref LISTENERS: Vec<Box<dyn HeatSourceListener>> = vec![
        Box::new(MoldFiringListener),
        Box::new(HeatSoundListener),
    ];
}

fn deliver<F>(listeners: &[Box<dyn HeatSourceListener>], event: &str, cell: FiringCell, mut call: F)
where
    F: FnMut(&dyn HeatSourceListener) -> Result<(), String>,
{
    for listener in listeners {
        if let Err(e) = call(listener.as_ref()) {
            log::error!(
                "[HeatListeners] Listener '{}' failed on {} at ({}, {}): {}",
                listener.name(),
                event,
                cell.x,
                cell.y,
                e
            );
        }
    }
}

pub fn broadcast_lit(ctx: &ReducerContext, cell: FiringCell) {
    deliver(&LISTENERS, "lit", cell, |l| l.on_lit(ctx, cell));
}

pub fn broadcast_extinguished(ctx: &ReducerContext, cell: FiringCell, reason: ExtinguishReason) {
    deliver(&LISTENERS, "extinguished", cell, |l| l.on_extinguished(ctx, cell, reason));
}

pub fn broadcast_broken(ctx: &ReducerContext, cell: FiringCell) {
    deliver(&LISTENERS, "broken", cell, |l| l.on_broken(ctx, cell));
}

pub fn broadcast_resume_timer_scheduled(ctx: &ReducerContext, cell: FiringCell, remaining_micros: i64) {
    deliver(&LISTENERS, "resume-scheduled", cell, |l| {
        l.on_resume_timer_scheduled(ctx, cell, remaining_micros)
    });
}

pub fn broadcast_resume_timer_expired(ctx: &ReducerContext, cell: FiringCell) {
    deliver(&LISTENERS, "resume-expired", cell, |l| l.on_resume_timer_expired(ctx, cell));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Labeled {
        label: &'static str,
    }

    impl HeatSourceListener for Labeled {
        fn name(&self) -> &'static str {
            self.label
        }
    }

    #[test]
    fn delivery_reaches_every_listener_in_order_despite_failures() {
        let listeners: Vec<Box<dyn HeatSourceListener>> = vec![
            Box::new(Labeled { label: "first" }),
            Box::new(Labeled { label: "second" }),
            Box::new(Labeled { label: "third" }),
        ];
        let seen = RefCell::new(Vec::new());
        deliver(&listeners, "lit", FiringCell { x: 0, y: 0 }, |l| {
            seen.borrow_mut().push(l.name());
            // The first listener failing must not starve the rest.
            if l.name() == "first" {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        });
        assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn registry_delivers_firing_before_sound_cues() {
        let order: Vec<&str> = LISTENERS.iter().map(|l| l.name()).collect();
        assert_eq!(order, vec!["MoldFiring", "HeatSound"]);
    }
}

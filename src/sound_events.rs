use spacetimedb::{table, Identity, Timestamp, ReducerContext, Table, reducer, SpacetimeType, ScheduleAt, TimeDuration};
use rand::Rng;

// --- Sound Event Types ---

/// Types of sound events that can be triggered
#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub enum SoundType {
    CampfireLit,          // campfire_lit.mp3 (1 variation - when a campfire is lit)
    CampfireExtinguished, // campfire_extinguished.mp3 (1 variation - when a campfire goes out)
    FiringStarted,        // firing_started.mp3 (1 variation - when a mold starts firing)
    FiringComplete,       // firing_complete.mp3 (2 variations - sizzle when a mold finishes firing)
    PlaceObject,          // place_object.mp3 (1 variation - placing campfires/racks)
    ObjectDestroyed,      // object_destroyed.mp3 (1 variation - campfire/rack breaks)
    // Add more as needed - extensible system
}

impl SoundType {
    /// Get the base sound file name (without variation number and extension)
    pub fn get_base_filename(&self) -> &'static str {
        match self {
            SoundType::CampfireLit => "campfire_lit",
            SoundType::CampfireExtinguished => "campfire_extinguished",
            SoundType::FiringStarted => "firing_started",
            SoundType::FiringComplete => "firing_complete",
            SoundType::PlaceObject => "place_object",
            SoundType::ObjectDestroyed => "object_destroyed",
        }
    }

    /// Get the number of sound variations available for this sound type
    pub fn get_variation_count(&self) -> u8 {
        match self {
            SoundType::CampfireLit => 1,
            SoundType::CampfireExtinguished => 1,
            SoundType::FiringStarted => 1,
            SoundType::FiringComplete => 2, // firing_complete.mp3, firing_complete1.mp3
            SoundType::PlaceObject => 1,
            SoundType::ObjectDestroyed => 1,
        }
    }

    /// Generate the full filename with random variation
    pub fn get_random_filename(&self, rng: &mut impl Rng) -> String {
        let base = self.get_base_filename();
        let variation_count = self.get_variation_count();

        if variation_count <= 1 {
            format!("{}.mp3", base)
        } else {
            let variation = rng.gen_range(0..variation_count);
            if variation == 0 {
                format!("{}.mp3", base)
            } else {
                format!("{}{}.mp3", base, variation)
            }
        }
    }
}

/// Sound event table - stores sound events for clients to process
#[table(name = sound_event, public)]
#[derive(Clone, Debug)]
pub struct SoundEvent {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub sound_type: SoundType,
    pub filename: String,       // e.g., "firing_complete1.mp3"
    pub pos_x: f32,             // Position where sound occurs
    pub pos_y: f32,
    pub volume: f32,            // 0.0 to 1.0
    pub max_distance: f32,      // Maximum distance to hear sound
    pub triggered_by: Identity, // Player (or module) who triggered the sound
    pub timestamp: Timestamp,
}

// --- Sound Event Cleanup System ---

/// Schedule table for cleaning up old sound events
#[table(name = sound_event_cleanup_schedule, scheduled(cleanup_old_sound_events))]
#[derive(Clone, Debug)]
pub struct SoundEventCleanupSchedule {
    #[primary_key]
    #[auto_inc]
    pub schedule_id: u64,
    pub scheduled_at: ScheduleAt,
}

/// Clean up sound events older than 5 seconds to prevent table bloat
#[reducer]
pub fn cleanup_old_sound_events(ctx: &ReducerContext, _args: SoundEventCleanupSchedule) -> Result<(), String> {
    // Security check - only allow scheduler to run this
    if ctx.sender != ctx.identity() {
        return Err("Sound event cleanup can only be run by scheduler".to_string());
    }

    let cutoff_time = ctx.timestamp - TimeDuration::from_micros(5_000_000); // 5 seconds ago

    let sound_events_table = ctx.db.sound_event();
    let old_events: Vec<u64> = sound_events_table.iter()
        .filter(|event| event.timestamp < cutoff_time)
        .map(|event| event.id)
        .collect();

    let removed_count = old_events.len();
    for event_id in old_events {
        sound_events_table.id().delete(event_id);
    }

    if removed_count > 0 {
        log::debug!("Cleaned up {} old sound events", removed_count);
    }

    Ok(())
}

// --- Public API Functions ---

/// Emit a sound event at a specific position with a max hearing distance.
/// This is the main function other modules should use
pub fn emit_sound_at_position_with_distance(
    ctx: &ReducerContext,
    sound_type: SoundType,
    pos_x: f32,
    pos_y: f32,
    volume: f32,
    max_distance: f32,
    triggered_by: Identity,
) -> Result<(), String> {
    let mut rng = ctx.rng();
    let filename = sound_type.get_random_filename(&mut rng);

    let sound_event = SoundEvent {
        id: 0, // Auto-incremented
        sound_type,
        filename,
        pos_x,
        pos_y,
        volume: volume.max(0.0), // Only clamp minimum to 0, no maximum limit
        max_distance,
        triggered_by,
        timestamp: ctx.timestamp,
    };

    match ctx.db.sound_event().try_insert(sound_event) {
        Ok(inserted) => {
            log::debug!("Sound event {} emitted: {} at ({:.1}, {:.1}) by {:?}",
                       inserted.id, inserted.filename, pos_x, pos_y, triggered_by);
            Ok(())
        }
        Err(e) => {
            log::error!("Failed to emit sound event: {:?}", e);
            Err("Failed to emit sound event".to_string())
        }
    }
}

/// Initialize the sound event cleanup system
pub fn init_sound_cleanup_system(ctx: &ReducerContext) -> Result<(), String> {
    let cleanup_interval = TimeDuration::from_micros(10_000_000); // Clean up every 10 seconds

    let cleanup_schedule = SoundEventCleanupSchedule {
        schedule_id: 0,
        scheduled_at: cleanup_interval.into(), // Periodic cleanup
    };

    match ctx.db.sound_event_cleanup_schedule().try_insert(cleanup_schedule) {
        Ok(_) => {
            log::info!("Sound event cleanup system initialized");
            Ok(())
        }
        Err(e) => {
            log::error!("Failed to initialize sound cleanup system: {:?}", e);
            Err("Failed to initialize sound cleanup system".to_string())
        }
    }
}

// --- Convenience Functions for Common Sound Events ---

/// Single line function to emit campfire lit sound
pub fn emit_campfire_lit_sound(ctx: &ReducerContext, pos_x: f32, pos_y: f32, player_id: Identity) {
    if let Err(e) = emit_sound_at_position_with_distance(ctx, SoundType::CampfireLit, pos_x, pos_y, 0.9, 525.0, player_id) {
        log::error!("Failed to emit campfire lit sound: {}", e);
    }
}

/// Single line function to emit campfire extinguished sound
pub fn emit_campfire_extinguished_sound(ctx: &ReducerContext, pos_x: f32, pos_y: f32, player_id: Identity) {
    if let Err(e) = emit_sound_at_position_with_distance(ctx, SoundType::CampfireExtinguished, pos_x, pos_y, 0.9, 525.0, player_id) {
        log::error!("Failed to emit campfire extinguished sound: {}", e);
    }
}

/// Single line function to emit firing started sound (mold begins curing)
pub fn emit_firing_started_sound(ctx: &ReducerContext, pos_x: f32, pos_y: f32) {
    if let Err(e) = emit_sound_at_position_with_distance(ctx, SoundType::FiringStarted, pos_x, pos_y, 0.8, 525.0, ctx.identity()) {
        log::error!("Failed to emit firing started sound: {}", e);
    }
}

/// Single line function to emit firing complete sizzle (mold finished firing)
pub fn emit_firing_complete_sound(ctx: &ReducerContext, pos_x: f32, pos_y: f32) {
    if let Err(e) = emit_sound_at_position_with_distance(ctx, SoundType::FiringComplete, pos_x, pos_y, 1.0, 600.0, ctx.identity()) {
        log::error!("Failed to emit firing complete sound: {}", e);
    }
}

/// Single line function to emit place object sound (campfire/rack placed)
pub fn emit_place_object_sound(ctx: &ReducerContext, pos_x: f32, pos_y: f32, player_id: Identity) {
    let _ = emit_sound_at_position_with_distance(ctx, SoundType::PlaceObject, pos_x, pos_y, 0.8, 450.0, player_id);
}

/// Single line function to emit object destroyed sound (campfire/rack broken)
pub fn emit_object_destroyed_sound(ctx: &ReducerContext, pos_x: f32, pos_y: f32, player_id: Identity) {
    let _ = emit_sound_at_position_with_distance(ctx, SoundType::ObjectDestroyed, pos_x, pos_y, 1.1, 600.0, player_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn single_variation_sounds_have_plain_filenames() {
        let mut rng = StepRng::new(0, 1);
        assert_eq!(
            SoundType::CampfireLit.get_random_filename(&mut rng),
            "campfire_lit.mp3"
        );
    }

    #[test]
    fn multi_variation_filenames_stay_within_range() {
        let mut rng = StepRng::new(0, 1);
        for _ in 0..8 {
            let name = SoundType::FiringComplete.get_random_filename(&mut rng);
            assert!(
                name == "firing_complete.mp3" || name == "firing_complete1.mp3",
                "unexpected filename: {}",
                name
            );
        }
    }
}

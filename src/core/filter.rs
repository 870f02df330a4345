// Debounce/throttle state for semantic event emission, one filter per bot.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum gap between two damage events for the same bot.
pub const DAMAGE_DEBOUNCE: Duration = Duration::from_millis(400);
/// Coarse per-event-type guard against near-simultaneous duplicate emissions.
pub const TYPE_GUARD: Duration = Duration::from_millis(350);
/// Per-entity throttle for nearby-entity-hurt events.
pub const ENTITY_THROTTLE: Duration = Duration::from_millis(300);

/// Owns every piece of emit-suppression state for one bot.
///
/// All methods take `now` explicitly so the windows are testable without
/// sleeping. Chat never goes through this filter.
#[derive(Debug, Default)]
pub struct EventFilter {
    last_damage_at: Option<Instant>,
    last_emit_by_type: HashMap<&'static str, Instant>,
    last_emit_by_entity: HashMap<String, Instant>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a health transition emits a damage event.
    ///
    /// Emits only when health strictly dropped and the debounce window has
    /// elapsed. Drops inside the window are absorbed into the snapshot
    /// without emitting; the amount on an emitted event is the delta seen at
    /// that callback alone, rounded to 2 decimals.
    pub fn damage_amount(&mut self, old_health: f32, new_health: f32, now: Instant) -> Option<f64> {
        if new_health >= old_health {
            return None;
        }
        if let Some(last) = self.last_damage_at {
            if now.duration_since(last) <= DAMAGE_DEBOUNCE {
                return None;
            }
        }
        self.last_damage_at = Some(now);
        let amount = (old_health - new_health) as f64;
        Some((amount * 100.0).round() / 100.0)
    }

    /// Per-type emit guard: at most one event of a given type per window.
    pub fn allow_type(&mut self, type_key: &'static str, now: Instant) -> bool {
        if let Some(last) = self.last_emit_by_type.get(type_key) {
            if now.duration_since(*last) < TYPE_GUARD {
                return false;
            }
        }
        self.last_emit_by_type.insert(type_key, now);
        true
    }

    /// Per-entity throttle: a repeatedly hurt entity emits at most once per
    /// window, while hits on other entities pass through promptly.
    pub fn allow_entity(&mut self, entity_key: &str, now: Instant) -> bool {
        if let Some(last) = self.last_emit_by_entity.get(entity_key) {
            if now.duration_since(*last) < ENTITY_THROTTLE {
                return false;
            }
        }
        self.last_emit_by_entity
            .insert(entity_key.to_string(), now);
        true
    }
}

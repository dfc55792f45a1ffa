use crate::config::RELEASE_GLOW_DURATION;
use crate::core::input::Lane;
use crate::game::note::Note;
use std::time::Instant;

/// Per-lane snapshot published each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LaneEvent {
    pub is_holding_key: bool,
    /// Key pressed with nothing hittable (ghost tap). Latches until release
    /// or a legitimate hit.
    pub is_holding_bad_key: bool,
    pub key_pressed_at: Option<Instant>,
    pub key_released_at: Option<Instant>,
    pub holding_note: Option<Note>,
    pub is_holding_note: bool,
    pub note_miss_at: Option<Instant>,
}

/// Value snapshot of all eight lanes, indexed `[player][direction]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GameEvent {
    pub lanes: [[LaneEvent; 4]; 2],
}

impl GameEvent {
    #[inline(always)]
    pub fn lane(&self, lane: Lane) -> &LaneEvent {
        &self.lanes[lane.player.index()][lane.direction.index()]
    }

    #[inline(always)]
    pub fn lane_mut(&mut self, lane: Lane) -> &mut LaneEvent {
        &mut self.lanes[lane.player.index()][lane.direction.index()]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LanePhase {
    Idle,
    PressedBad,
    PressedOnNote,
    HoldingSustain,
    /// Glow fading out after a release; `fade` runs 1 to 0.
    ReleasedRecent { fade: f32 },
}

impl LanePhase {
    pub fn of(ev: &LaneEvent, now: Instant) -> Self {
        if ev.is_holding_note {
            return LanePhase::HoldingSustain;
        }
        if ev.is_holding_key {
            return if ev.is_holding_bad_key { LanePhase::PressedBad } else { LanePhase::PressedOnNote };
        }
        match ev.key_released_at {
            Some(at) => {
                let since = now.saturating_duration_since(at);
                if since < RELEASE_GLOW_DURATION {
                    let fade = 1.0 - since.as_secs_f32() / RELEASE_GLOW_DURATION.as_secs_f32();
                    LanePhase::ReleasedRecent { fade }
                } else {
                    LanePhase::Idle
                }
            }
            None => LanePhase::Idle,
        }
    }
}

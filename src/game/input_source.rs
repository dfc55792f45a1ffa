use crate::config::TINY_WINDOW;
use crate::core::input::{Input, KeyMap, Lane};
use crate::core::time::MusicTime;
use crate::game::note::Note;

/// Key state of one lane for the current frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyEdge {
    pub down: bool,
    pub just_pressed: bool,
    pub just_released: bool,
}

impl KeyEdge {
    #[inline(always)]
    pub fn from_states(was_down: bool, is_down: bool) -> Self {
        Self { down: is_down, just_pressed: is_down && !was_down, just_released: !is_down && was_down }
    }
}

/// What a source asks about when deciding whether a lane's key is down.
pub struct LaneQuery<'a> {
    pub lane: Lane,
    pub audio_pos: MusicTime,
    /// Notes from the machine's search floor onwards.
    pub pending: &'a [Note],
    pub holding: Option<&'a Note>,
}

/// One candidate note under the hit scan.
pub struct NoteContext<'a> {
    pub note: &'a Note,
    pub audio_pos: MusicTime,
    pub hit_window: MusicTime,
    pub key: KeyEdge,
    /// This note is the lane's sustain in progress.
    pub holding: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    None,
    Hit,
    /// A held sustain continues this frame.
    Sustain,
    Miss,
}

/// Where a lane's key presses come from.
pub trait InputSource {
    fn is_down(&self, query: &LaneQuery) -> bool;
    fn judge(&self, ctx: &NoteContext) -> Verdict;
    /// Presses with nothing to hit light up as bad keys.
    fn marks_ghost_taps(&self) -> bool {
        false
    }
    /// Time past the note start after which it counts as missed.
    fn miss_after(&self, hit_window: MusicTime) -> MusicTime {
        hit_window.half()
    }
    /// Distance from the note start within which a press can land.
    fn hit_reach(&self, hit_window: MusicTime) -> MusicTime {
        hit_window.half()
    }
}

/// Real keys through the configured bindings.
pub struct HumanInput<'a> {
    pub keymap: &'a KeyMap,
    pub input: &'a dyn Input,
}

impl InputSource for HumanInput<'_> {
    fn is_down(&self, query: &LaneQuery) -> bool {
        self.keymap.is_direction_down(self.input, query.lane.direction)
    }

    fn judge(&self, ctx: &NoteContext) -> Verdict {
        let note = ctx.note;
        let half = ctx.hit_window.half();
        if note.is_sustain() && ctx.key.just_pressed && note.in_hold_interval(ctx.audio_pos, ctx.hit_window) {
            Verdict::Hit
        } else if !ctx.key.down && !note.is_resolved() && note.starts_at < ctx.audio_pos - half {
            Verdict::Miss
        } else if !note.is_hit && ctx.key.just_pressed && note.in_hit_window(ctx.audio_pos, ctx.hit_window) {
            Verdict::Hit
        } else if ctx.holding && ctx.key.down && ctx.audio_pos <= note.latest_release(ctx.hit_window) {
            Verdict::Sustain
        } else {
            Verdict::None
        }
    }

    fn marks_ghost_taps(&self) -> bool {
        true
    }
}

/// Presses synthesised from the chart: a key goes down when an unhit note is
/// within the tiny window of the audio position, and stays down through its
/// sustain.
#[derive(Clone, Copy, Debug, Default)]
pub struct SynthInput;

impl SynthInput {
    #[inline(always)]
    fn in_tiny_window(note: &Note, audio_pos: MusicTime) -> bool {
        (note.starts_at - audio_pos).abs() <= TINY_WINDOW
    }
}

impl InputSource for SynthInput {
    fn is_down(&self, query: &LaneQuery) -> bool {
        if query.holding.is_some_and(|n| query.audio_pos <= n.ends_at()) {
            return true;
        }
        query
            .pending
            .iter()
            .take_while(|n| n.starts_at <= query.audio_pos + TINY_WINDOW)
            .any(|n| n.lane() == query.lane && !n.is_hit && Self::in_tiny_window(n, query.audio_pos))
    }

    fn judge(&self, ctx: &NoteContext) -> Verdict {
        let note = ctx.note;
        if !note.is_hit && Self::in_tiny_window(note, ctx.audio_pos) {
            Verdict::Hit
        } else if !note.is_resolved() && note.starts_at < ctx.audio_pos - self.miss_after(ctx.hit_window) {
            Verdict::Miss
        } else if ctx.holding && ctx.audio_pos <= note.ends_at() {
            Verdict::Sustain
        } else {
            Verdict::None
        }
    }

    fn miss_after(&self, _hit_window: MusicTime) -> MusicTime {
        TINY_WINDOW + TINY_WINDOW
    }

    fn hit_reach(&self, _hit_window: MusicTime) -> MusicTime {
        TINY_WINDOW
    }
}

/// A lane nobody plays: never pressed, notes lapse as misses.
#[derive(Clone, Copy, Debug, Default)]
pub struct SilentInput;

impl InputSource for SilentInput {
    fn is_down(&self, _query: &LaneQuery) -> bool {
        false
    }

    fn judge(&self, ctx: &NoteContext) -> Verdict {
        if !ctx.note.is_resolved() && ctx.note.starts_at < ctx.audio_pos - ctx.hit_window.half() {
            Verdict::Miss
        } else {
            Verdict::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::input::{Direction, KeyboardState, Player};
    use winit::keyboard::KeyCode;

    const W: MusicTime = MusicTime::from_millis(90);

    fn note(ms: i64, dur: i64) -> Note {
        Note::new(Player::Human, Direction::Left, MusicTime::from_millis(ms), MusicTime::from_millis(dur))
    }

    fn ctx<'a>(n: &'a Note, pos: i64, key: KeyEdge, holding: bool) -> NoteContext<'a> {
        NoteContext { note: n, audio_pos: MusicTime::from_millis(pos), hit_window: W, key, holding }
    }

    const PRESS: KeyEdge = KeyEdge { down: true, just_pressed: true, just_released: false };
    const HELD: KeyEdge = KeyEdge { down: true, just_pressed: false, just_released: false };
    const UP: KeyEdge = KeyEdge { down: false, just_pressed: false, just_released: false };

    #[test]
    fn human_judges_press_hold_and_lapse() {
        let map = KeyMap::default();
        let kb = KeyboardState::new();
        let human = HumanInput { keymap: &map, input: &kb };
        let tap = note(1000, 0);
        assert_eq!(human.judge(&ctx(&tap, 1008, PRESS, false)), Verdict::Hit);
        assert_eq!(human.judge(&ctx(&tap, 900, PRESS, false)), Verdict::None);
        assert_eq!(human.judge(&ctx(&tap, 1046, UP, false)), Verdict::Miss);
        // Held through the note: no miss while the key stays down.
        assert_eq!(human.judge(&ctx(&tap, 1100, HELD, false)), Verdict::None);

        let mut sus = note(2000, 500);
        sus.is_hit = true;
        assert_eq!(human.judge(&ctx(&sus, 2300, HELD, true)), Verdict::Sustain);
        assert_eq!(human.judge(&ctx(&sus, 2546, HELD, true)), Verdict::None);
        // Re-grab mid-sustain.
        assert_eq!(human.judge(&ctx(&sus, 2300, PRESS, false)), Verdict::Hit);
    }

    #[test]
    fn human_reads_bound_keys() {
        let map = KeyMap::default();
        let mut kb = KeyboardState::new();
        kb.press(KeyCode::KeyD);
        let human = HumanInput { keymap: &map, input: &kb };
        let q = LaneQuery {
            lane: Lane::new(Player::Human, Direction::Left),
            audio_pos: MusicTime::ZERO,
            pending: &[],
            holding: None,
        };
        assert!(human.is_down(&q));
    }

    #[test]
    fn synth_presses_only_inside_tiny_window() {
        let notes = [note(1000, 0)];
        let lane = notes[0].lane();
        let q = |pos| LaneQuery { lane, audio_pos: MusicTime::from_millis(pos), pending: &notes, holding: None };
        assert!(!SynthInput.is_down(&q(989)));
        assert!(SynthInput.is_down(&q(990)));
        assert!(SynthInput.is_down(&q(1010)));
        assert!(!SynthInput.is_down(&q(1011)));

        assert_eq!(SynthInput.judge(&ctx(&notes[0], 1005, UP, false)), Verdict::Hit);
        assert_eq!(SynthInput.judge(&ctx(&notes[0], 1015, UP, false)), Verdict::None);
        assert_eq!(SynthInput.judge(&ctx(&notes[0], 1021, UP, false)), Verdict::Miss);
    }

    #[test]
    fn synth_holds_to_sustain_end() {
        let mut sus = note(2000, 500);
        sus.is_hit = true;
        let q = LaneQuery { lane: sus.lane(), audio_pos: MusicTime::from_millis(2400), pending: &[], holding: Some(&sus) };
        assert!(SynthInput.is_down(&q));
        assert_eq!(SynthInput.judge(&ctx(&sus, 2500, HELD, true)), Verdict::Sustain);
        assert_eq!(SynthInput.judge(&ctx(&sus, 2501, HELD, true)), Verdict::None);
    }

    #[test]
    fn silent_lane_only_lapses() {
        let tap = note(1000, 0);
        assert_eq!(SilentInput.judge(&ctx(&tap, 1000, PRESS, false)), Verdict::None);
        assert_eq!(SilentInput.judge(&ctx(&tap, 1046, UP, false)), Verdict::Miss);
    }

    #[test]
    fn edges_from_consecutive_states() {
        assert_eq!(KeyEdge::from_states(false, true), PRESS);
        assert!(KeyEdge::from_states(true, false).just_released);
    }
}

use crate::config::OVERLAP_EPSILON;
use crate::core::input::{Direction, Lane, Player};
use crate::core::time::MusicTime;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Note {
    pub player: Player,
    pub direction: Direction,
    pub starts_at: MusicTime,
    /// Zero for a tap note.
    pub duration: MusicTime,
    /// Position in the song's sorted note list. This is the note's identity.
    pub index: usize,
    pub is_hit: bool,
    pub is_miss: bool,
    pub hold_release_at: Option<MusicTime>,
}

impl Note {
    pub fn new(player: Player, direction: Direction, starts_at: MusicTime, duration: MusicTime) -> Self {
        Self {
            player,
            direction,
            starts_at,
            duration,
            index: 0,
            is_hit: false,
            is_miss: false,
            hold_release_at: None,
        }
    }

    #[inline(always)]
    pub fn lane(&self) -> Lane {
        Lane::new(self.player, self.direction)
    }

    #[inline(always)]
    pub fn ends_at(&self) -> MusicTime {
        self.starts_at + self.duration
    }

    #[inline(always)]
    pub fn is_sustain(&self) -> bool {
        self.duration > MusicTime::ZERO
    }

    #[inline(always)]
    pub fn is_same_note(&self, other: &Note) -> bool {
        self.index == other.index
    }

    /// Same lane and practically the same start: doubled charting.
    #[inline(always)]
    pub fn is_overlapped(&self, other: &Note) -> bool {
        self.player == other.player
            && self.direction == other.direction
            && (self.starts_at - other.starts_at).abs() < OVERLAP_EPSILON
    }

    #[inline(always)]
    pub fn is_resolved(&self) -> bool {
        self.is_hit || self.is_miss
    }

    #[inline(always)]
    pub fn in_hit_window(&self, audio_pos: MusicTime, hit_window: MusicTime) -> bool {
        (audio_pos - self.starts_at).abs() <= hit_window.half()
    }

    #[inline(always)]
    pub fn in_hold_interval(&self, audio_pos: MusicTime, hit_window: MusicTime) -> bool {
        let half = hit_window.half();
        audio_pos >= self.starts_at - half && audio_pos <= self.ends_at() + half
    }

    /// Latest time a sustain may be reported as released.
    #[inline(always)]
    pub fn latest_release(&self, hit_window: MusicTime) -> MusicTime {
        self.ends_at() + hit_window.half()
    }

    pub fn clear_play_state(&mut self) {
        self.is_hit = false;
        self.is_miss = false;
        self.hold_release_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tap(ms: i64) -> Note {
        Note::new(Player::Human, Direction::Left, MusicTime::from_millis(ms), MusicTime::ZERO)
    }

    #[test]
    fn overlap_needs_same_lane_and_under_two_ms() {
        let a = tap(1000);
        let mut b = tap(1001);
        assert!(a.is_overlapped(&b));
        b.starts_at = MusicTime::from_millis(1002);
        assert!(!a.is_overlapped(&b));
        let mut c = tap(1000);
        c.player = Player::Opponent;
        assert!(!a.is_overlapped(&c));
    }

    #[test]
    fn windows_are_symmetric_half_widths() {
        let n = tap(1000);
        let w = MusicTime::from_millis(90);
        assert!(n.in_hit_window(MusicTime::from_millis(955), w));
        assert!(n.in_hit_window(MusicTime::from_millis(1045), w));
        assert!(!n.in_hit_window(MusicTime::from_millis(1046), w));
    }

    #[test]
    fn hold_interval_spans_the_sustain() {
        let mut n = tap(2000);
        n.duration = MusicTime::from_millis(500);
        let w = MusicTime::from_millis(90);
        assert!(n.in_hold_interval(MusicTime::from_millis(2400), w));
        assert!(n.in_hold_interval(MusicTime::from_millis(2545), w));
        assert!(!n.in_hold_interval(MusicTime::from_millis(2546), w));
        assert_eq!(n.latest_release(w), MusicTime::from_millis(2545));
    }
}

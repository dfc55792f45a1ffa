use crate::config::HitWindows;
use crate::core::time::MusicTime;
use crate::game::note::Note;
use std::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rating {
    Sick,
    Good,
    Bad,
    Shit,
}

impl Rating {
    pub fn label(self) -> &'static str {
        match self {
            Rating::Sick => "Sick!",
            Rating::Good => "Good",
            Rating::Bad => "Bad",
            Rating::Shit => "Shit",
        }
    }
}

/// First window whose half-width contains `|delta|`.
pub fn classify(delta: MusicTime, windows: &HitWindows) -> Rating {
    let d = delta.abs();
    if d <= windows.sick.half() {
        Rating::Sick
    } else if d <= windows.good.half() {
        Rating::Good
    } else if d <= windows.bad.half() {
        Rating::Bad
    } else {
        Rating::Shit
    }
}

/// Hooks the note machine fires as notes resolve.
pub trait NoteObserver {
    /// First hit of `note`; `delta` is audio position minus note start.
    fn on_hit(&mut self, _note: &Note, _delta: MusicTime) {}
    /// `late_by` is audio position minus note start.
    fn on_miss(&mut self, _note: &Note, _late_by: MusicTime) {}
}

impl NoteObserver for () {}

/// Most recent human hit, kept for the overlay.
#[derive(Clone, Copy, Debug)]
pub struct HitFeedback {
    pub rating: Rating,
    pub delta: MusicTime,
    pub at: Instant,
}

/// Running hit/miss counts per player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub hits: [u32; 2],
    pub misses: [u32; 2],
}

impl NoteObserver for Tally {
    fn on_hit(&mut self, note: &Note, _delta: MusicTime) {
        self.hits[note.player.index()] += 1;
    }

    fn on_miss(&mut self, note: &Note, _late_by: MusicTime) {
        self.misses[note.player.index()] += 1;
    }
}

use crate::core::input::Lane;
use crate::core::time::MusicTime;
use crate::game::event::GameEvent;
use crate::game::input_source::{InputSource, KeyEdge, LaneQuery, NoteContext, Verdict};
use crate::game::judgment::NoteObserver;
use crate::game::note::Note;
use crate::game::song::Song;
use log::{debug, warn};
use std::collections::HashSet;
use std::time::Instant;

/// What the machine consumes each frame.
pub struct FrameInput<'a> {
    pub audio_pos: MusicTime,
    pub is_playing: bool,
    pub now: Instant,
    /// Key source per player, indexed by `Player::index`.
    pub sources: [&'a dyn InputSource; 2],
}

/// Per-frame note judgement over a private copy of the song.
pub struct NoteMachine {
    song: Song,
    note_index_start: usize,
    was_key_pressed: [[bool; 4]; 2],
    event: GameEvent,
    hit_window: MusicTime,
    ghost_tapping: bool,
    /// Position of the last scanned frame; `None` right after a reset.
    last_audio_pos: Option<MusicTime>,
    /// Unresolved notes whose hittable window fell between two scanned frames.
    skipped: HashSet<usize>,
}

#[inline(always)]
fn assert_window(hit_window: MusicTime) {
    assert!(hit_window >= MusicTime::ZERO, "hit window must not be negative, got {}", hit_window);
}

impl NoteMachine {
    pub fn new(song: &Song, hit_window: MusicTime, ghost_tapping: bool) -> Self {
        assert_window(hit_window);
        let mut machine = Self {
            song: song.clone(),
            note_index_start: 0,
            was_key_pressed: [[false; 4]; 2],
            event: GameEvent::default(),
            hit_window,
            ghost_tapping,
            last_audio_pos: None,
            skipped: HashSet::new(),
        };
        machine.clear_notes();
        machine
    }

    fn clear_notes(&mut self) {
        self.song.notes.iter_mut().for_each(Note::clear_play_state);
    }

    /// Replaces the played copy and drops all play state. Key history is
    /// kept so a key held across the seek is not seen as a fresh press.
    pub fn reset(&mut self, song: &Song) {
        self.song = song.clone();
        self.clear_notes();
        self.note_index_start = 0;
        self.event = GameEvent::default();
        self.last_audio_pos = None;
        self.skipped.clear();
        debug!("Note machine reset ({} notes)", self.song.notes.len());
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn notes(&self) -> &[Note] {
        &self.song.notes
    }

    pub fn note(&self, index: usize) -> &Note {
        match self.song.notes.get(index) {
            Some(n) => n,
            None => panic!("note index {} out of range ({} notes)", index, self.song.notes.len()),
        }
    }

    pub fn event(&self) -> &GameEvent {
        &self.event
    }

    pub fn note_index_start(&self) -> usize {
        self.note_index_start
    }

    pub fn was_key_pressed(&self, lane: Lane) -> bool {
        self.was_key_pressed[lane.player.index()][lane.direction.index()]
    }

    pub fn hit_window(&self) -> MusicTime {
        self.hit_window
    }

    pub fn set_hit_window(&mut self, hit_window: MusicTime) {
        assert_window(hit_window);
        self.hit_window = hit_window;
    }

    pub fn set_ghost_tapping(&mut self, on: bool) {
        self.ghost_tapping = on;
    }

    pub fn update(&mut self, frame: &FrameInput, observer: &mut dyn NoteObserver) {
        let pos = frame.audio_pos;
        let now = frame.now;
        let half = self.hit_window.half();

        // Key edges.
        let prev_down = self.was_key_pressed;
        let mut keys = [[KeyEdge::default(); 4]; 2];
        for lane in Lane::all() {
            let (p, d) = (lane.player.index(), lane.direction.index());
            let query = LaneQuery {
                lane,
                audio_pos: pos,
                pending: &self.song.notes[self.note_index_start..],
                holding: self.event.lane(lane).holding_note.as_ref(),
            };
            let down = frame.sources[p].is_down(&query);
            keys[p][d] = KeyEdge::from_states(prev_down[p][d], down);
        }
        self.was_key_pressed = keys.map(|row| row.map(|k| k.down));

        // Pessimistic pre-mark. A legitimate hit below clears the bad flag.
        for lane in Lane::all() {
            let key = keys[lane.player.index()][lane.direction.index()];
            let marks_bad = frame.sources[lane.player.index()].marks_ghost_taps() && !self.ghost_tapping;
            let ev = self.event.lane_mut(lane);
            if key.just_pressed {
                ev.is_holding_key = true;
                ev.key_pressed_at = Some(now);
                ev.is_holding_bad_key = marks_bad;
            } else if key.just_released {
                ev.is_holding_key = false;
                ev.is_holding_bad_key = false;
                ev.key_released_at = Some(now);
            }
        }

        // Drop holds whose key went up.
        for lane in Lane::all() {
            let key = keys[lane.player.index()][lane.direction.index()];
            if !key.down && self.event.lane(lane).is_holding_note {
                self.release_hold(lane, pos);
            }
        }

        if !frame.is_playing {
            return;
        }

        // Advance the search floor past resolved notes.
        while let Some(n) = self.song.notes.get(self.note_index_start) {
            let past = n.starts_at < pos - half;
            let done = n.is_resolved() && (!n.is_sustain() || n.ends_at() < pos - half);
            if !(past && done) {
                break;
            }
            self.note_index_start += 1;
        }

        // Hit scan.
        let mut hit_this_frame: [[Option<usize>; 4]; 2] = [[None; 4]; 2];
        let mut sustained = [[false; 4]; 2];
        for i in self.note_index_start..self.song.notes.len() {
            let note = self.song.notes[i];
            if note.starts_at > pos + half {
                break;
            }
            let lane = note.lane();
            let (p, d) = (lane.player.index(), lane.direction.index());
            let source = frame.sources[p];
            if let Some(prev) = self.last_audio_pos {
                let reach = source.hit_reach(self.hit_window);
                if !note.is_resolved() && prev < note.starts_at - reach && pos > note.starts_at + reach {
                    self.skipped.insert(i);
                }
            }
            let ctx = NoteContext {
                note: &note,
                audio_pos: pos,
                hit_window: self.hit_window,
                key: keys[p][d],
                holding: self.event.lane(lane).holding_note.is_some_and(|h| h.is_same_note(&note)),
            };
            match source.judge(&ctx) {
                Verdict::Hit => {
                    // One hit per direction per frame, unless doubled.
                    if let Some(prev) = hit_this_frame[p][d] {
                        if !self.song.notes[prev].is_overlapped(&note) {
                            continue;
                        }
                    }
                    self.register_hit(i, pos, now, observer);
                    hit_this_frame[p][d] = Some(i);
                }
                Verdict::Sustain => {
                    sustained[p][d] = true;
                    self.event.lane_mut(lane).holding_note = Some(note);
                }
                Verdict::Miss => self.register_miss(i, pos, now, observer),
                Verdict::None => {}
            }
        }

        // Finalise holds that saw no hit this frame.
        for lane in Lane::all() {
            let (p, d) = (lane.player.index(), lane.direction.index());
            if hit_this_frame[p][d].is_none() && !sustained[p][d] && self.event.lane(lane).is_holding_note {
                self.release_hold(lane, pos);
            }
        }

        self.last_audio_pos = Some(pos);
    }

    fn register_hit(&mut self, index: usize, pos: MusicTime, now: Instant, observer: &mut dyn NoteObserver) {
        let note = &mut self.song.notes[index];
        let first = !note.is_hit;
        note.is_hit = true;
        note.hold_release_at = None;
        let snapshot = *note;

        let ev = self.event.lane_mut(snapshot.lane());
        ev.is_holding_key = true;
        ev.key_pressed_at = Some(now);
        ev.is_holding_bad_key = false;
        if snapshot.is_sustain() {
            ev.is_holding_note = true;
            ev.holding_note = Some(snapshot);
        }

        if first {
            let delta = pos - snapshot.starts_at;
            debug!("hit, {:+.0} ms (note #{} {:?})", delta.as_millis_f64(), index, snapshot.lane());
            observer.on_hit(&snapshot, delta);
        }
    }

    fn register_miss(&mut self, index: usize, pos: MusicTime, now: Instant, observer: &mut dyn NoteObserver) {
        let note = &mut self.song.notes[index];
        note.is_miss = true;
        let snapshot = *note;
        self.event.lane_mut(snapshot.lane()).note_miss_at = Some(now);

        let late_by = pos - snapshot.starts_at;
        if self.skipped.remove(&index) {
            // No scanned position ever landed inside its window.
            warn!("Note #{} {:?} missed by {:.0} ms", index, snapshot.lane(), late_by.as_millis_f64());
        } else {
            debug!("miss, {:+.0} ms (note #{} {:?})", late_by.as_millis_f64(), index, snapshot.lane());
        }
        observer.on_miss(&snapshot, late_by);
    }

    fn release_hold(&mut self, lane: Lane, pos: MusicTime) {
        let ev = self.event.lane_mut(lane);
        ev.is_holding_note = false;
        if let Some(held) = ev.holding_note.take() {
            let note = &mut self.song.notes[held.index];
            let at = pos.clamp(note.starts_at, note.latest_release(self.hit_window));
            note.hold_release_at = Some(at);
            debug!("Released note #{} at {}", held.index, at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::input::{Direction, KeyMap, KeyboardState, Player};
    use crate::game::input_source::{HumanInput, SilentInput, SynthInput};
    use crate::game::judgment::Tally;
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::cell::RefCell;
    use std::time::Duration;
    use winit::keyboard::KeyCode;

    thread_local! {
        static LINES: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
    }

    /// Records log lines per test thread.
    struct Capture;

    impl Log for Capture {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            LINES.with(|l| l.borrow_mut().push((record.level(), record.args().to_string())));
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture;

    fn warnings_during(f: impl FnOnce()) -> Vec<String> {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(LevelFilter::Trace);
        LINES.with(|l| l.borrow_mut().clear());
        f();
        LINES.with(|l| {
            l.borrow().iter().filter(|(level, _)| *level == Level::Warn).map(|(_, msg)| msg.clone()).collect()
        })
    }

    const W: MusicTime = MusicTime::from_millis(90);

    fn ms(v: i64) -> MusicTime {
        MusicTime::from_millis(v)
    }

    fn song(notes: Vec<Note>) -> Song {
        Song::from_notes("test".into(), 1.0, 120.0, false, notes)
    }

    fn human(dir: Direction, at: i64, dur: i64) -> Note {
        Note::new(Player::Human, dir, ms(at), ms(dur))
    }

    fn opponent(dir: Direction, at: i64, dur: i64) -> Note {
        Note::new(Player::Opponent, dir, ms(at), ms(dur))
    }

    struct Rig {
        machine: NoteMachine,
        kb: KeyboardState,
        map: KeyMap,
        tally: Tally,
        t0: Instant,
        bot: bool,
        opponent_silent: bool,
    }

    impl Rig {
        fn new(notes: Vec<Note>) -> Self {
            Self {
                machine: NoteMachine::new(&song(notes), W, false),
                kb: KeyboardState::new(),
                map: KeyMap::default(),
                tally: Tally::default(),
                t0: Instant::now(),
                bot: false,
                opponent_silent: false,
            }
        }

        fn frame(&mut self, pos: i64, playing: bool) {
            let human = HumanInput { keymap: &self.map, input: &self.kb };
            let player: &dyn InputSource = if self.bot { &SynthInput } else { &human };
            let opponent: &dyn InputSource = if self.opponent_silent { &SilentInput } else { &SynthInput };
            let frame = FrameInput {
                audio_pos: ms(pos),
                is_playing: playing,
                now: self.t0 + Duration::from_millis(pos.max(0) as u64),
                sources: [player, opponent],
            };
            self.machine.update(&frame, &mut self.tally);
            self.kb.end_frame();
        }

        fn play(&mut self, from: i64, to: i64, step: i64) {
            let mut pos = from;
            while pos <= to {
                self.frame(pos, true);
                pos += step;
            }
        }

        fn lane(&self, p: Player, d: Direction) -> &crate::game::event::LaneEvent {
            self.machine.event().lane(Lane::new(p, d))
        }
    }

    #[test]
    fn search_floor_never_moves_back() {
        let mut rig = Rig::new((0..20).map(|i| human(Direction::Left, 100 + i * 50, 0)).collect());
        let mut last = 0;
        for pos in (0..1500).step_by(16) {
            rig.frame(pos, true);
            assert!(rig.machine.note_index_start() >= last);
            last = rig.machine.note_index_start();
        }
        assert_eq!(last, 20);
        assert_eq!(rig.tally.misses[0], 20);
    }

    #[test]
    fn one_hit_per_direction_per_frame() {
        let mut rig = Rig::new(vec![human(Direction::Down, 1000, 0), human(Direction::Down, 1030, 0)]);
        rig.play(0, 992, 16);
        rig.kb.press(KeyCode::KeyF);
        rig.frame(1008, true);
        assert!(rig.machine.note(0).is_hit);
        assert!(!rig.machine.note(1).is_hit);
        assert_eq!(rig.tally.hits[0], 1);
    }

    #[test]
    fn overlapped_notes_are_hit_together() {
        let mut rig = Rig::new(vec![human(Direction::Up, 1000, 0), human(Direction::Up, 1001, 0)]);
        rig.play(0, 992, 16);
        rig.kb.press(KeyCode::KeyJ);
        rig.frame(1008, true);
        assert!(rig.machine.note(0).is_hit && rig.machine.note(1).is_hit);
    }

    #[test]
    fn bad_key_latches_until_release() {
        let mut rig = Rig::new(vec![human(Direction::Right, 3000, 0)]);
        rig.kb.press(KeyCode::KeyK);
        rig.frame(1000, true);
        assert!(rig.lane(Player::Human, Direction::Right).is_holding_bad_key);
        rig.frame(1016, true);
        assert!(rig.lane(Player::Human, Direction::Right).is_holding_bad_key);
        rig.kb.release(KeyCode::KeyK);
        rig.frame(1032, true);
        let lane = rig.lane(Player::Human, Direction::Right);
        assert!(!lane.is_holding_bad_key && !lane.is_holding_key);
        assert!(lane.key_released_at.is_some());
    }

    #[test]
    fn ghost_tapping_suppresses_bad_key() {
        let mut rig = Rig::new(Vec::new());
        rig.machine.set_ghost_tapping(true);
        rig.kb.press(KeyCode::KeyD);
        rig.frame(500, true);
        let lane = rig.lane(Player::Human, Direction::Left);
        assert!(lane.is_holding_key);
        assert!(!lane.is_holding_bad_key);
    }

    #[test]
    fn paused_frames_track_keys_but_judge_nothing() {
        let mut rig = Rig::new(vec![human(Direction::Left, 1000, 0)]);
        rig.kb.press(KeyCode::KeyD);
        rig.frame(1000, false);
        assert!(rig.lane(Player::Human, Direction::Left).is_holding_key);
        assert!(!rig.machine.note(0).is_resolved());
        rig.frame(5000, false);
        assert!(!rig.machine.note(0).is_resolved());
    }

    #[test]
    fn opponent_autoplay_hits_and_holds() {
        let mut rig = Rig::new(vec![opponent(Direction::Left, 1000, 0), opponent(Direction::Down, 2000, 300)]);
        let mut pos = 0;
        while pos <= 2600 {
            rig.frame(pos, true);
            let held = rig.lane(Player::Opponent, Direction::Down);
            assert!(!held.is_holding_note || held.is_holding_key, "note held without key at {}", pos);
            pos += 8;
        }
        assert!(rig.machine.note(0).is_hit);
        let sus = rig.machine.note(1);
        assert!(sus.is_hit && !sus.is_miss);
        let released = sus.hold_release_at.unwrap();
        assert!(released >= ms(2300) && released <= ms(2300) + W.half());
        assert_eq!(rig.tally.hits[1], 2);
        assert_eq!(rig.tally.misses[1], 0);
        assert!(!rig.lane(Player::Opponent, Direction::Down).is_holding_note);
    }

    #[test]
    fn silent_opponent_lapses() {
        let mut rig = Rig::new(vec![opponent(Direction::Left, 1000, 0)]);
        rig.opponent_silent = true;
        rig.play(0, 1200, 16);
        assert!(rig.machine.note(0).is_miss);
        assert!(rig.lane(Player::Opponent, Direction::Left).note_miss_at.is_some());
    }

    #[test]
    fn frames_jumping_over_the_window_warn() {
        let mut rig = Rig::new(vec![opponent(Direction::Left, 1000, 0)]);
        let warnings = warnings_during(|| {
            for pos in [952, 985, 1018, 1051, 1084] {
                rig.frame(pos, true);
            }
        });
        assert!(rig.machine.note(0).is_miss);
        assert_eq!(warnings.len(), 1, "{:?}", warnings);
        assert!(warnings[0].contains("missed by 51 ms"), "{}", warnings[0]);
    }

    #[test]
    fn ordinary_misses_do_not_warn() {
        let mut rig = Rig::new(vec![opponent(Direction::Left, 1000, 0), human(Direction::Down, 1500, 0)]);
        let warnings = warnings_during(|| rig.play(0, 1700, 16));
        assert!(rig.machine.note(0).is_hit);
        assert!(rig.machine.note(1).is_miss);
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn reset_forgets_skipped_notes() {
        let original = song(vec![opponent(Direction::Left, 1000, 0)]);
        let mut rig = Rig::new(original.notes.clone());
        rig.frame(985, true);
        rig.frame(1018, true);
        rig.machine.reset(&original);
        let warnings = warnings_during(|| rig.play(1040, 1100, 16));
        assert!(rig.machine.note(0).is_miss);
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn bot_play_drives_the_human_lanes() {
        let mut rig = Rig::new(vec![human(Direction::Up, 500, 0), human(Direction::Left, 900, 200)]);
        rig.bot = true;
        rig.play(0, 1300, 8);
        assert!(rig.machine.notes().iter().all(|n| n.is_hit));
        assert_eq!(rig.tally.misses, [0, 0]);
    }

    #[test]
    fn held_sustain_release_is_clamped_to_its_end() {
        let mut rig = Rig::new(vec![human(Direction::Left, 1000, 200)]);
        rig.play(0, 992, 16);
        rig.kb.press(KeyCode::KeyD);
        rig.play(1008, 1400, 16);
        let n = rig.machine.note(0);
        assert!(n.is_hit);
        let at = n.hold_release_at.unwrap();
        assert!(at >= n.starts_at);
        assert!(at - n.starts_at <= n.duration + W.half());
        assert!(!rig.lane(Player::Human, Direction::Left).is_holding_note);
        // Key is still physically held.
        assert!(rig.lane(Player::Human, Direction::Left).is_holding_key);
    }

    #[test]
    fn reset_clears_play_state_and_keeps_key_history() {
        let original = song(vec![human(Direction::Left, 100, 0), human(Direction::Down, 200, 0)]);
        let mut rig = Rig::new(original.notes.clone());
        rig.play(0, 500, 16);
        assert_eq!(rig.machine.note_index_start(), 2);
        rig.kb.press(KeyCode::KeyD);
        rig.frame(516, true);
        rig.machine.reset(&original);
        assert_eq!(rig.machine.note_index_start(), 0);
        assert_eq!(*rig.machine.event(), GameEvent::default());
        assert!(rig.machine.notes().iter().all(|n| !n.is_resolved() && n.hold_release_at.is_none()));
        assert!(rig.machine.was_key_pressed(Lane::new(Player::Human, Direction::Left)));
    }

    #[test]
    #[should_panic(expected = "hit window must not be negative")]
    fn negative_window_is_rejected() {
        let mut rig = Rig::new(Vec::new());
        rig.machine.set_hit_window(ms(-1));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn bad_note_index_panics() {
        Rig::new(Vec::new()).machine.note(3);
    }
}

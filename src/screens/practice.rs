use crate::config::{
    END_OF_SONG_DELAY, EXIT_TRANSITION_DURATION, HIT_WINDOW_STEP, MAX_SPEED, MIN_HIT_WINDOW, MIN_SPEED, SCRUB_STEP,
    SPEED_STEP, ZOOM_IN_STEP, ZOOM_OUT_STEP,
};
use crate::core::audio::{MusicTracks, PositionEstimator};
use crate::core::context::EngineContext;
use crate::core::input::{Input, PracticeAction, Player};
use crate::core::loading::{LoadError, LoadedSong};
use crate::core::time::MusicTime;
use crate::game::gameplay::{FrameInput, NoteMachine};
use crate::game::input_source::{HumanInput, InputSource, SilentInput, SynthInput};
use crate::game::judgment::{classify, HitFeedback, NoteObserver};
use crate::game::note::Note;
use crate::game::render::{draw_frame, FrameView, HudInfo, NoteSkin, Renderer};
use crate::game::scroll::Highway;
use crate::game::song::{ChartSet, Difficulty};
use crate::screens::{Screen, ScreenAction};
use log::{debug, info, warn};
use std::error::Error;
use std::time::Instant;

/// Bookmarks closer than this to the cursor are skipped when jumping.
const BOOKMARK_EPSILON: MusicTime = MusicTime::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionReason {
    SongEnd,
    Exit,
}

#[derive(Clone, Copy, Debug)]
pub struct PendingTransition {
    pub deadline: Instant,
    pub target: Screen,
    pub reason: TransitionReason,
}

pub struct State {
    pub charts: ChartSet,
    pub difficulty: Difficulty,
    pub machine: NoteMachine,
    pub tracks: MusicTracks,
    pub estimator: PositionEstimator,
    pub highway: Highway,
    pub skin: NoteSkin,
    /// Sorted.
    pub bookmarks: Vec<MusicTime>,
    pub bot_play: bool,
    pub audio_pos: MusicTime,
    pub feedback: Option<HitFeedback>,
    pub pending_transition: Option<PendingTransition>,
    last_frame_at: Option<Instant>,
}

pub fn init(ctx: &mut EngineContext, loaded: LoadedSong, wanted: Difficulty) -> Result<State, Box<dyn Error>> {
    let Some((difficulty, song)) = loaded.charts.resolve(wanted) else {
        return Err(LoadError::NoCharts.into());
    };
    if difficulty != wanted {
        warn!("No {} chart loaded; playing {} instead.", wanted, difficulty);
    }
    if song.is_empty() {
        warn!("Chart '{}' ({}) has no notes.", song.name, difficulty);
    }

    let settings = &ctx.settings;
    let machine = NoteMachine::new(song, settings.windows.miss, settings.ghost_tapping);
    let highway = Highway::new(
        ctx.screen_size.0,
        ctx.screen_size.1,
        settings.zoom,
        song.speed as f32,
        settings.scroll_direction,
    );
    info!("Practice '{}' [{}], highway {}", song.name, difficulty, highway);

    let tracks = MusicTracks::new(&loaded.inst, loaded.voices.as_ref());
    tracks.attach(ctx.audio.as_mut())?;
    ctx.apply_volume();
    tracks.play();

    Ok(State {
        charts: loaded.charts,
        difficulty,
        machine,
        tracks,
        estimator: PositionEstimator::new(),
        highway,
        skin: NoteSkin::default(),
        bookmarks: Vec::new(),
        bot_play: ctx.settings.bot_play,
        audio_pos: MusicTime::ZERO,
        feedback: None,
        pending_transition: None,
        last_frame_at: None,
    })
}

/// Forwards to the host observer and keeps the human hits for feedback.
struct HitCollector<'a> {
    outer: &'a mut dyn NoteObserver,
    human_hits: Vec<MusicTime>,
}

impl NoteObserver for HitCollector<'_> {
    fn on_hit(&mut self, note: &Note, delta: MusicTime) {
        if note.player == Player::Human {
            self.human_hits.push(delta);
        }
        self.outer.on_hit(note, delta);
    }

    fn on_miss(&mut self, note: &Note, late_by: MusicTime) {
        self.outer.on_miss(note, late_by);
    }
}

/// One frame: actions, position estimate, note machine, end-of-song and
/// transition checks, in that order.
pub fn update(
    state: &mut State,
    ctx: &mut EngineContext,
    input: &dyn Input,
    observer: &mut dyn NoteObserver,
) -> ScreenAction {
    let now = ctx.clock.now();
    let frame_delta = state.last_frame_at.map(|t| now.saturating_duration_since(t)).unwrap_or_default();
    state.last_frame_at = Some(now);

    if !is_exiting(state) {
        for action in ctx.keymap.pressed_actions(input) {
            apply_action(state, ctx, action, now);
        }
    }

    state.audio_pos = state.estimator.update(&state.tracks, MusicTime::from_nanos(frame_delta.as_nanos() as i64));

    let human = HumanInput { keymap: &ctx.keymap, input };
    let player: &dyn InputSource = if state.bot_play { &SynthInput } else { &human };
    let opponent: &dyn InputSource = if ctx.settings.opponent_autoplay { &SynthInput } else { &SilentInput };
    let frame = FrameInput {
        audio_pos: state.audio_pos,
        is_playing: state.tracks.is_playing(),
        now,
        sources: [player, opponent],
    };
    let mut collector = HitCollector { outer: observer, human_hits: Vec::new() };
    state.machine.update(&frame, &mut collector);
    for delta in collector.human_hits {
        on_human_hit(state, ctx, delta, now);
    }

    if state.pending_transition.is_none() && state.tracks.is_drained() {
        info!("Song finished at {}.", state.tracks.position());
        arm_transition(state, now, TransitionReason::SongEnd);
    }

    if let Some(pending) = state.pending_transition {
        if now >= pending.deadline {
            state.pending_transition = None;
            state.tracks.pause();
            ctx.audio.close_all();
            return ScreenAction::Navigate(pending.target);
        }
    }
    ScreenAction::None
}

fn on_human_hit(state: &mut State, ctx: &mut EngineContext, delta: MusicTime, now: Instant) {
    let rating = classify(delta, &ctx.settings.windows);
    state.feedback = Some(HitFeedback { rating, delta, at: now });
    let volume = ctx.settings.hit_sound_volume;
    if volume > 0.0 {
        if let Some(sound) = &ctx.hit_sound {
            ctx.audio.play_sfx(sound, volume);
        }
    }
}

#[inline(always)]
fn is_exiting(state: &State) -> bool {
    state.pending_transition.is_some_and(|p| p.reason == TransitionReason::Exit)
}

fn arm_transition(state: &mut State, now: Instant, reason: TransitionReason) {
    let delay = match reason {
        TransitionReason::SongEnd => END_OF_SONG_DELAY,
        TransitionReason::Exit => EXIT_TRANSITION_DURATION,
    };
    state.pending_transition = Some(PendingTransition { deadline: now + delay, target: Screen::SelectMusic, reason });
}

pub fn apply_action(state: &mut State, ctx: &mut EngineContext, action: PracticeAction, now: Instant) {
    debug!("Practice action {:?}", action);
    let pos = state.tracks.position();
    match action {
        PracticeAction::TogglePause => {
            if state.tracks.is_playing() {
                state.tracks.pause();
                info!("Paused at {}.", pos);
            } else if !state.tracks.is_drained() {
                state.tracks.play();
                info!("Resumed at {}.", pos);
            }
        }
        PracticeAction::SpeedDown => change_speed(state, -SPEED_STEP),
        PracticeAction::SpeedUp => change_speed(state, SPEED_STEP),
        PracticeAction::ScrubBack => seek_to(state, pos - SCRUB_STEP),
        PracticeAction::ScrubForward => seek_to(state, pos + SCRUB_STEP),
        PracticeAction::AddBookmark => add_bookmark(state, pos),
        PracticeAction::PrevBookmark => {
            match state.bookmarks.iter().rev().find(|&&b| b < pos - BOOKMARK_EPSILON).copied() {
                Some(t) => seek_to(state, t),
                None => debug!("No bookmark before {}.", pos),
            }
        }
        PracticeAction::NextBookmark => {
            match state.bookmarks.iter().find(|&&b| b > pos + BOOKMARK_EPSILON).copied() {
                Some(t) => seek_to(state, t),
                None => debug!("No bookmark after {}.", pos),
            }
        }
        PracticeAction::Restart => {
            seek_to(state, MusicTime::ZERO);
            state.tracks.play();
        }
        PracticeAction::DifficultyEasy => switch_difficulty(state, Difficulty::Easy),
        PracticeAction::DifficultyNormal => switch_difficulty(state, Difficulty::Normal),
        PracticeAction::DifficultyHard => switch_difficulty(state, Difficulty::Hard),
        PracticeAction::ToggleBotPlay => {
            state.bot_play = !state.bot_play;
            info!("Bot play {}.", if state.bot_play { "on" } else { "off" });
        }
        PracticeAction::HitWindowDown => change_hit_window(state, -HIT_WINDOW_STEP),
        PracticeAction::HitWindowUp => change_hit_window(state, HIT_WINDOW_STEP),
        PracticeAction::ZoomOut => state.highway.set_zoom(state.highway.zoom() * ZOOM_OUT_STEP),
        PracticeAction::ZoomIn => state.highway.set_zoom(state.highway.zoom() * ZOOM_IN_STEP),
        PracticeAction::Exit => {
            state.tracks.pause();
            arm_transition(state, now, TransitionReason::Exit);
            info!("Leaving practice.");
        }
    }
    if matches!(action, PracticeAction::HitWindowDown | PracticeAction::HitWindowUp) {
        ctx.settings.windows.miss = state.machine.hit_window();
    }
}

fn change_speed(state: &mut State, step: f64) {
    let speed = ((state.tracks.speed() + step) * 100.0).round() / 100.0;
    let speed = speed.clamp(MIN_SPEED, MAX_SPEED);
    state.tracks.set_speed(speed);
    info!("Playback speed {:.2}x.", speed);
}

fn change_hit_window(state: &mut State, step: MusicTime) {
    let window = (state.machine.hit_window() + step).max(MIN_HIT_WINDOW);
    state.machine.set_hit_window(window);
    info!("Hit window {:.0} ms.", window.as_millis_f64());
}

/// Seeks both tracks and drops every bit of play state.
pub fn seek_to(state: &mut State, t: MusicTime) {
    let t = t.clamp(MusicTime::ZERO, state.tracks.duration());
    state.tracks.set_position(t);
    if let Some(song) = state.charts.get(state.difficulty) {
        state.machine.reset(song);
    }
    state.estimator.reset();
    state.feedback = None;
    state.audio_pos = t;
    if state.pending_transition.is_some_and(|p| p.reason == TransitionReason::SongEnd) {
        state.pending_transition = None;
    }
    info!("Seek to {}.", t);
}

pub fn add_bookmark(state: &mut State, t: MusicTime) {
    if state.bookmarks.iter().any(|&b| (b - t).abs() < BOOKMARK_EPSILON) {
        debug!("Bookmark near {} already exists.", t);
        return;
    }
    let at = state.bookmarks.partition_point(|&b| b < t);
    state.bookmarks.insert(at, t);
    info!("Bookmark {} at {}.", state.bookmarks.len(), t);
}

/// Swaps to another difficulty at the current position.
pub fn switch_difficulty(state: &mut State, difficulty: Difficulty) {
    if difficulty == state.difficulty {
        return;
    }
    let Some(speed) = state.charts.get(difficulty).map(|s| s.speed) else {
        warn!("No {} chart loaded.", difficulty);
        return;
    };
    state.difficulty = difficulty;
    state.highway.set_chart_speed(speed as f32);
    let pos = state.tracks.position();
    seek_to(state, pos);
    info!("Switched to {}.", difficulty);
}

pub fn draw(state: &State, renderer: &mut dyn Renderer, now: Instant) {
    let view = FrameView {
        notes: state.machine.notes(),
        max_duration: state.machine.song().max_duration,
        event: state.machine.event(),
        highway: &state.highway,
        audio_pos: state.audio_pos,
        now,
        feedback: state.feedback,
        hud: HudInfo {
            position: state.audio_pos,
            duration: state.tracks.duration(),
            speed: state.tracks.speed(),
            difficulty: state.difficulty,
            bot_play: state.bot_play,
            hit_window: state.machine.hit_window(),
            paused: !state.tracks.is_playing(),
        },
    };
    draw_frame(renderer, &state.skin, &view);
}

use crate::config::{
    DIRECTION_COLORS, HUD_TEXT_COLOR, HUD_TEXT_SIZE, MISSED_NOTE_TINT, MISS_FLASH_DURATION, NOTE_SIZE, RATING_DISPLAY_DURATION,
    RATING_TEXT_SIZE, RECEPTOR_BAD_TINT, RECEPTOR_HIT_TINT, RECEPTOR_IDLE_TINT, RELEASED_SUSTAIN_TINT,
    SUSTAIN_WIDTH_RATIO,
};
use crate::core::input::{Direction, Lane};
use crate::core::time::MusicTime;
use crate::game::event::{GameEvent, LanePhase};
use crate::game::judgment::HitFeedback;
use crate::game::note::Note;
use crate::game::scroll::Highway;
use crate::game::song::Difficulty;
use cgmath::{Basis2, Deg, Rotation, Rotation2, Vector2};
use std::time::Instant;

pub type TextureId = u32;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// Four corners, clockwise from top-left before rotation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub corners: [Vector2<f32>; 4],
}

impl Quad {
    pub fn centered(center: Vector2<f32>, size: f32, rotation: Deg<f32>) -> Self {
        let rot: Basis2<f32> = Rotation2::from_angle(rotation);
        let h = size * 0.5;
        let corners = [
            Vector2::new(-h, -h),
            Vector2::new(h, -h),
            Vector2::new(h, h),
            Vector2::new(-h, h),
        ]
        .map(|c| center + rot.rotate_vector(c));
        Self { corners }
    }
}

/// Primitive 2-D drawing the host provides.
pub trait Renderer {
    fn draw_textured_quad(&mut self, texture: TextureId, src: Rect, quad: Quad, color: [f32; 4]);
    fn draw_rect(&mut self, rect: Rect, color: [f32; 4]);
    fn measure_text(&self, text: &str, size: f32) -> (f32, f32);
    fn draw_text(&mut self, text: &str, x: f32, y: f32, size: f32, color: [f32; 4]);
}

/// Arrow art: one down-pointing frame per texture, rotated per direction.
#[derive(Clone, Copy, Debug)]
pub struct NoteSkin {
    pub arrow: TextureId,
    pub receptor: TextureId,
    pub frame: Rect,
}

impl NoteSkin {
    #[inline(always)]
    pub fn rotation(direction: Direction) -> Deg<f32> {
        match direction {
            Direction::Left => Deg(90.0),
            Direction::Down => Deg(0.0),
            Direction::Up => Deg(180.0),
            Direction::Right => Deg(270.0),
        }
    }
}

impl Default for NoteSkin {
    fn default() -> Self {
        Self { arrow: 0, receptor: 1, frame: Rect { x: 0.0, y: 0.0, w: 1.0, h: 1.0 } }
    }
}

#[derive(Clone, Debug)]
pub struct HudInfo {
    pub position: MusicTime,
    pub duration: MusicTime,
    pub speed: f64,
    pub difficulty: Difficulty,
    pub bot_play: bool,
    pub hit_window: MusicTime,
    pub paused: bool,
}

impl HudInfo {
    pub fn line(&self) -> String {
        let mut s = format!(
            "{} / {}  {:.2}x  {}  W {:.0} ms",
            self.position,
            self.duration,
            self.speed,
            self.difficulty,
            self.hit_window.as_millis_f64()
        );
        if self.bot_play {
            s.push_str("  BOT");
        }
        if self.paused {
            s.push_str("  PAUSED");
        }
        s
    }
}

/// Everything one frame draws, borrowed from the practice state.
pub struct FrameView<'a> {
    pub notes: &'a [Note],
    pub max_duration: MusicTime,
    pub event: &'a GameEvent,
    pub highway: &'a Highway,
    pub audio_pos: MusicTime,
    pub now: Instant,
    pub feedback: Option<HitFeedback>,
    pub hud: HudInfo,
}

#[inline(always)]
fn lerp_color(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [0, 1, 2, 3].map(|i| a[i] + (b[i] - a[i]) * t)
}

#[inline(always)]
fn lane_center_x(highway: &Highway, lane: Lane) -> f32 {
    highway.lane_x(lane) + NOTE_SIZE * 0.5
}

pub fn draw_frame(r: &mut dyn Renderer, skin: &NoteSkin, view: &FrameView) {
    draw_receptors(r, skin, view);
    let range = view.highway.visible_range(view.notes, view.audio_pos, view.max_duration);
    let visible = &view.notes[range];
    draw_sustains(r, view, visible);
    draw_heads(r, skin, view, visible);
    draw_overlay(r, view);
    r.draw_text(&view.hud.line(), 10.0, 10.0, HUD_TEXT_SIZE, HUD_TEXT_COLOR);
}

fn draw_receptors(r: &mut dyn Renderer, skin: &NoteSkin, view: &FrameView) {
    let y = view.highway.receptor_y();
    for lane in Lane::all() {
        let ev = view.event.lane(lane);
        let mut tint = match LanePhase::of(ev, view.now) {
            LanePhase::Idle => RECEPTOR_IDLE_TINT,
            LanePhase::PressedBad => RECEPTOR_BAD_TINT,
            LanePhase::PressedOnNote | LanePhase::HoldingSustain => RECEPTOR_HIT_TINT,
            LanePhase::ReleasedRecent { fade } => lerp_color(RECEPTOR_IDLE_TINT, RECEPTOR_HIT_TINT, fade),
        };
        // Brief flash after a miss in this lane.
        if let Some(at) = ev.note_miss_at {
            let since = view.now.saturating_duration_since(at);
            if since < MISS_FLASH_DURATION {
                let t = 1.0 - since.as_secs_f32() / MISS_FLASH_DURATION.as_secs_f32();
                tint = lerp_color(tint, MISSED_NOTE_TINT, t);
            }
        }
        let quad = Quad::centered(
            Vector2::new(lane_center_x(view.highway, lane), y),
            NOTE_SIZE,
            NoteSkin::rotation(lane.direction),
        );
        r.draw_textured_quad(skin.receptor, skin.frame, quad, tint);
    }
}

fn draw_sustains(r: &mut dyn Renderer, view: &FrameView, visible: &[Note]) {
    let width = NOTE_SIZE * SUSTAIN_WIDTH_RATIO;
    for note in visible.iter().filter(|n| n.is_sustain()) {
        let lane = note.lane();
        let held = view.event.lane(lane).holding_note.is_some_and(|h| h.is_same_note(note));
        let (from, color) = if held {
            // Clipped to the receptor while held.
            (note.starts_at.max(view.audio_pos), DIRECTION_COLORS[lane.direction.index()])
        } else if note.is_hit {
            let released = note.hold_release_at.unwrap_or(note.starts_at);
            (released.max(view.audio_pos), RELEASED_SUSTAIN_TINT)
        } else if note.is_miss {
            (note.starts_at, MISSED_NOTE_TINT)
        } else {
            (note.starts_at, DIRECTION_COLORS[lane.direction.index()])
        };
        if from >= note.ends_at() {
            continue;
        }
        let y_a = view.highway.time_to_y(from, view.audio_pos);
        let y_b = view.highway.time_to_y(note.ends_at(), view.audio_pos);
        let rect = Rect {
            x: lane_center_x(view.highway, lane) - width * 0.5,
            y: y_a.min(y_b),
            w: width,
            h: (y_a - y_b).abs(),
        };
        r.draw_rect(rect, color);
    }
}

fn draw_heads(r: &mut dyn Renderer, skin: &NoteSkin, view: &FrameView, visible: &[Note]) {
    for note in visible.iter().filter(|n| !n.is_hit) {
        if !view.highway.is_visible(note, view.audio_pos) {
            continue;
        }
        let lane = note.lane();
        let color = if note.is_miss { MISSED_NOTE_TINT } else { DIRECTION_COLORS[lane.direction.index()] };
        let center = Vector2::new(
            lane_center_x(view.highway, lane),
            view.highway.time_to_y(note.starts_at, view.audio_pos),
        );
        let quad = Quad::centered(center, NOTE_SIZE, NoteSkin::rotation(lane.direction));
        r.draw_textured_quad(skin.arrow, skin.frame, quad, color);
    }
}

fn draw_overlay(r: &mut dyn Renderer, view: &FrameView) {
    let Some(fb) = view.feedback else { return };
    let elapsed = view.now.saturating_duration_since(fb.at);
    if elapsed >= RATING_DISPLAY_DURATION {
        return;
    }
    let alpha = 1.0 - elapsed.as_secs_f32() / RATING_DISPLAY_DURATION.as_secs_f32();
    let text = format!("{} {:+.0} ms", fb.rating.label(), fb.delta.as_millis_f64());
    let (w, h) = r.measure_text(&text, RATING_TEXT_SIZE);
    let x = (view.highway.screen_width - w) * 0.5;
    let y = (view.highway.screen_height - h) * 0.5;
    r.draw_text(&text, x, y, RATING_TEXT_SIZE, [1.0, 1.0, 1.0, alpha]);
}

/// Renderer that draws nothing and counts calls. Used headless.
#[derive(Default, Debug)]
pub struct NullRenderer {
    pub quads: usize,
    pub rects: usize,
    pub texts: Vec<String>,
}

impl NullRenderer {
    pub fn clear(&mut self) {
        self.quads = 0;
        self.rects = 0;
        self.texts.clear();
    }
}

impl Renderer for NullRenderer {
    fn draw_textured_quad(&mut self, _texture: TextureId, _src: Rect, _quad: Quad, _color: [f32; 4]) {
        self.quads += 1;
    }

    fn draw_rect(&mut self, _rect: Rect, _color: [f32; 4]) {
        self.rects += 1;
    }

    fn measure_text(&self, text: &str, size: f32) -> (f32, f32) {
        (text.chars().count() as f32 * size * 0.5, size)
    }

    fn draw_text(&mut self, text: &str, _x: f32, _y: f32, _size: f32, _color: [f32; 4]) {
        self.texts.push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScrollDirection;
    use crate::core::input::Player;
    use crate::game::judgment::Rating;
    use approx::assert_abs_diff_eq;
    use std::time::Duration;

    fn hud() -> HudInfo {
        HudInfo {
            position: MusicTime::from_millis(61_500),
            duration: MusicTime::from_millis(120_000),
            speed: 0.75,
            difficulty: Difficulty::Hard,
            bot_play: true,
            hit_window: MusicTime::from_millis(90),
            paused: false,
        }
    }

    #[test]
    fn quad_rotation_keeps_size() {
        let q = Quad::centered(Vector2::new(10.0, 10.0), 2.0, Deg(90.0));
        assert_abs_diff_eq!(q.corners[0].x, 11.0, epsilon = 1e-5);
        assert_abs_diff_eq!(q.corners[0].y, 9.0, epsilon = 1e-5);
        assert_abs_diff_eq!(q.corners[2].x, 9.0, epsilon = 1e-5);
    }

    #[test]
    fn frame_draws_receptors_heads_sustains_and_hud() {
        let highway = Highway::new(1280.0, 720.0, 1.0, 1.0, ScrollDirection::Down);
        let mut notes = vec![
            Note::new(Player::Human, Direction::Left, MusicTime::from_millis(200), MusicTime::ZERO),
            Note::new(Player::Opponent, Direction::Up, MusicTime::from_millis(400), MusicTime::from_millis(300)),
            Note::new(Player::Human, Direction::Down, MusicTime::from_millis(100), MusicTime::ZERO),
            Note::new(Player::Human, Direction::Right, MusicTime::from_millis(90_000), MusicTime::ZERO),
        ];
        notes.sort_by_key(|n| n.starts_at);
        notes[0].is_hit = true;
        let event = GameEvent::default();
        let now = Instant::now();
        let view = FrameView {
            notes: &notes,
            max_duration: MusicTime::from_millis(300),
            event: &event,
            highway: &highway,
            audio_pos: MusicTime::ZERO,
            now,
            feedback: Some(HitFeedback { rating: Rating::Sick, delta: MusicTime::from_millis(-8), at: now }),
            hud: hud(),
        };
        let mut r = NullRenderer::default();
        draw_frame(&mut r, &NoteSkin::default(), &view);
        // 8 receptors + 2 unhit visible heads.
        assert_eq!(r.quads, 10);
        assert_eq!(r.rects, 1);
        assert_eq!(r.texts, vec!["Sick! -8 ms".to_string(), hud().line()]);
    }

    #[test]
    fn overlay_fades_out() {
        let highway = Highway::new(1280.0, 720.0, 1.0, 1.0, ScrollDirection::Down);
        let event = GameEvent::default();
        let at = Instant::now();
        let view = FrameView {
            notes: &[],
            max_duration: MusicTime::ZERO,
            event: &event,
            highway: &highway,
            audio_pos: MusicTime::ZERO,
            now: at + Duration::from_millis(700),
            feedback: Some(HitFeedback { rating: Rating::Good, delta: MusicTime::ZERO, at }),
            hud: hud(),
        };
        let mut r = NullRenderer::default();
        draw_frame(&mut r, &NoteSkin::default(), &view);
        assert_eq!(r.texts.len(), 1);
    }

    #[test]
    fn hud_line_reads_state() {
        assert_eq!(hud().line(), "1:01.500 / 2:00.000  0.75x  Hard  W 90 ms  BOT");
    }
}

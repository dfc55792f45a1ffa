use crate::config::{
    ScrollDirection, BASE_PIXELS_PER_MS, LANE_INTERVAL, MARGIN_BOTTOM, MARGIN_LEFT, MARGIN_RIGHT, MIN_ZOOM, NOTE_SIZE,
};
use crate::core::input::{Lane, Player};
use crate::core::time::MusicTime;
use crate::game::note::Note;
use std::fmt;
use std::ops::Range;

/// Maps musical time and lanes to screen space.
///
/// `time_to_y` is the vertical centre of a note head, `lane_x` the left edge
/// of its lane. Receptors sit `MARGIN_BOTTOM` from the bottom edge on
/// downscroll and the same distance from the top on upscroll.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Highway {
    pub screen_width: f32,
    pub screen_height: f32,
    zoom: f32,
    chart_speed: f32,
    pub direction: ScrollDirection,
}

impl Highway {
    pub fn new(screen_width: f32, screen_height: f32, zoom: f32, chart_speed: f32, direction: ScrollDirection) -> Self {
        Self { screen_width, screen_height, zoom: zoom.max(MIN_ZOOM), chart_speed, direction }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.max(MIN_ZOOM);
    }

    pub fn set_chart_speed(&mut self, speed: f32) {
        self.chart_speed = speed;
    }

    #[inline(always)]
    pub fn pix_per_ms(&self) -> f32 {
        let base = BASE_PIXELS_PER_MS * self.zoom;
        if self.chart_speed == 0.0 { base } else { base * self.chart_speed }
    }

    #[inline(always)]
    pub fn receptor_y(&self) -> f32 {
        match self.direction {
            ScrollDirection::Down => self.screen_height - MARGIN_BOTTOM,
            ScrollDirection::Up => MARGIN_BOTTOM,
        }
    }

    #[inline(always)]
    pub fn time_to_y(&self, t: MusicTime, audio_pos: MusicTime) -> f32 {
        let offset = self.pix_per_ms() * (t - audio_pos).as_millis_f64() as f32;
        match self.direction {
            ScrollDirection::Down => self.receptor_y() - offset,
            ScrollDirection::Up => self.receptor_y() + offset,
        }
    }

    #[inline(always)]
    pub fn pixels_to_time(&self, px: f32) -> MusicTime {
        MusicTime::from_millis_f64((px / self.pix_per_ms()) as f64)
    }

    /// Time whose note centre lands on screen row `y`.
    pub fn y_to_time(&self, y: f32, audio_pos: MusicTime) -> MusicTime {
        let px = match self.direction {
            ScrollDirection::Down => self.receptor_y() - y,
            ScrollDirection::Up => y - self.receptor_y(),
        };
        audio_pos + self.pixels_to_time(px)
    }

    pub fn lane_x(&self, lane: Lane) -> f32 {
        let i = lane.direction.index() as f32;
        match lane.player {
            Player::Human => MARGIN_LEFT + i * LANE_INTERVAL,
            Player::Opponent => self.screen_width - MARGIN_RIGHT - NOTE_SIZE - (3.0 - i) * LANE_INTERVAL,
        }
    }

    #[inline(always)]
    fn cull_bounds(&self) -> (f32, f32) {
        (-2.0 * NOTE_SIZE, self.screen_height + 2.0 * NOTE_SIZE)
    }

    /// Musical times at the two edges of the cull window, earliest first.
    pub fn visible_times(&self, audio_pos: MusicTime) -> (MusicTime, MusicTime) {
        let (top, bottom) = self.cull_bounds();
        let a = self.y_to_time(top, audio_pos);
        let b = self.y_to_time(bottom, audio_pos);
        (a.min(b), a.max(b))
    }

    /// A note is drawable when its end or any part of its span lies inside
    /// the cull window.
    pub fn is_visible(&self, note: &Note, audio_pos: MusicTime) -> bool {
        let (top, bottom) = self.cull_bounds();
        let y_start = self.time_to_y(note.starts_at, audio_pos);
        let y_end = self.time_to_y(note.ends_at(), audio_pos);
        y_start.max(y_end) >= top && y_start.min(y_end) <= bottom
    }

    /// Candidate index range on a time-sorted note list. `max_duration` is
    /// the longest sustain, so nothing starting before the range can reach
    /// into the window.
    pub fn visible_range(&self, notes: &[Note], audio_pos: MusicTime, max_duration: MusicTime) -> Range<usize> {
        let (earliest, latest) = self.visible_times(audio_pos);
        let start = notes.partition_point(|n| n.starts_at + max_duration < earliest);
        let end = notes.partition_point(|n| n.starts_at <= latest);
        start..end.max(start)
    }
}

impl fmt::Display for Highway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} px/ms (zoom {:.2}, chart {:.2})", self.pix_per_ms(), self.zoom, self.chart_speed)
    }
}

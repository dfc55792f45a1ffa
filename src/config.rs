use crate::core::input::PracticeAction;
use crate::core::time::MusicTime;
use configparser::ini::Ini;
use log::{info, warn};
use std::path::Path;
use std::time::Duration;
use winit::keyboard::KeyCode;

// Window
pub const WINDOW_WIDTH: u32 = 1280;
pub const WINDOW_HEIGHT: u32 = 720;

// Settings file versioning
pub const SETTINGS_MAJOR: u32 = 1;
pub const SETTINGS_MINOR: u32 = 2;

// Audio
pub const AUDIO_BUFFER_MS: u32 = 25;
pub const ESTIMATOR_TOLERANCE: MusicTime = MusicTime::from_millis(5);
pub const ESTIMATOR_RESYNC_FRAMES: u32 = 6;

// Gameplay Constants
pub const TINY_WINDOW: MusicTime = MusicTime::from_millis(10);
pub const OVERLAP_EPSILON: MusicTime = MusicTime::from_millis(2);
pub const RELEASE_GLOW_DURATION: Duration = Duration::from_millis(90);
pub const RATING_DISPLAY_DURATION: Duration = Duration::from_millis(600);
pub const MISS_FLASH_DURATION: Duration = Duration::from_millis(200);
pub const END_OF_SONG_DELAY: Duration = Duration::from_secs(1);
pub const EXIT_TRANSITION_DURATION: Duration = Duration::from_millis(400);

// Practice controls
pub const SPEED_STEP: f64 = 0.05;
pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 3.0;
pub const SCRUB_STEP: MusicTime = MusicTime::from_millis(2000);
pub const HIT_WINDOW_STEP: MusicTime = MusicTime::from_millis(5);
pub const MIN_HIT_WINDOW: MusicTime = MusicTime::from_millis(5);
pub const ZOOM_IN_STEP: f32 = 1.1;
pub const ZOOM_OUT_STEP: f32 = 0.9;

// Default key bindings (Left, Down, Up, Right)
pub const DEFAULT_LANE_KEYS: [[KeyCode; 2]; 4] = [
    [KeyCode::KeyD, KeyCode::ArrowLeft],
    [KeyCode::KeyF, KeyCode::ArrowDown],
    [KeyCode::KeyJ, KeyCode::ArrowUp],
    [KeyCode::KeyK, KeyCode::ArrowRight],
];
pub const DEFAULT_ACTION_KEYS: [(KeyCode, PracticeAction); 19] = [
    (KeyCode::Space, PracticeAction::TogglePause),
    (KeyCode::Minus, PracticeAction::SpeedDown),
    (KeyCode::Equal, PracticeAction::SpeedUp),
    (KeyCode::Comma, PracticeAction::ScrubBack),
    (KeyCode::Period, PracticeAction::ScrubForward),
    (KeyCode::KeyB, PracticeAction::AddBookmark),
    (KeyCode::KeyP, PracticeAction::PrevBookmark),
    (KeyCode::KeyN, PracticeAction::NextBookmark),
    (KeyCode::KeyR, PracticeAction::Restart),
    (KeyCode::Digit1, PracticeAction::DifficultyEasy),
    (KeyCode::Digit2, PracticeAction::DifficultyNormal),
    (KeyCode::Digit3, PracticeAction::DifficultyHard),
    (KeyCode::F6, PracticeAction::ToggleBotPlay),
    (KeyCode::Semicolon, PracticeAction::HitWindowDown),
    (KeyCode::Quote, PracticeAction::HitWindowUp),
    (KeyCode::KeyZ, PracticeAction::ZoomOut),
    (KeyCode::KeyX, PracticeAction::ZoomIn),
    (KeyCode::Escape, PracticeAction::Exit),
    (KeyCode::Backspace, PracticeAction::Exit),
];

// Highway layout (design pixels)
pub const BASE_PIXELS_PER_MS: f32 = 0.5;
pub const MIN_ZOOM: f32 = 0.01;
pub const LANE_INTERVAL: f32 = 113.0;
pub const NOTE_SIZE: f32 = 112.0;
pub const MARGIN_LEFT: f32 = 145.0;
pub const MARGIN_RIGHT: f32 = 145.0;
pub const MARGIN_BOTTOM: f32 = 100.0;
pub const SUSTAIN_WIDTH_RATIO: f32 = 0.33;

// Visual Constants
pub const RECEPTOR_IDLE_TINT: [f32; 4] = [0.7, 0.7, 0.7, 0.5];
pub const RECEPTOR_HIT_TINT: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
pub const RECEPTOR_BAD_TINT: [f32; 4] = [1.0, 0.3, 0.3, 0.9];
pub const MISSED_NOTE_TINT: [f32; 4] = [0.45, 0.45, 0.45, 0.8];
pub const RELEASED_SUSTAIN_TINT: [f32; 4] = [0.5, 0.5, 0.5, 0.6];
pub const HUD_TEXT_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
pub const HUD_TEXT_SIZE: f32 = 20.0;
pub const RATING_TEXT_SIZE: f32 = 36.0;
pub const DIRECTION_COLORS: [[f32; 4]; 4] = [
    [194.0 / 255.0, 75.0 / 255.0, 153.0 / 255.0, 1.0], // #C24B99 left
    [0.0, 1.0, 1.0, 1.0],                              // #00FFFF down
    [18.0 / 255.0, 250.0 / 255.0, 5.0 / 255.0, 1.0],   // #12FA05 up
    [249.0 / 255.0, 57.0 / 255.0, 63.0 / 255.0, 1.0],  // #F9393F right
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollDirection {
    /// Receptors at the bottom, notes travel down.
    Down,
    /// Receptors at the top, notes travel up.
    Up,
}

/// Full widths of the four judgement windows. The miss window is the engine's
/// hit window `W`; the others only grade hits for the overlay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitWindows {
    pub sick: MusicTime,
    pub good: MusicTime,
    pub bad: MusicTime,
    pub miss: MusicTime,
}

impl Default for HitWindows {
    fn default() -> Self {
        Self {
            sick: MusicTime::from_millis(90),
            good: MusicTime::from_millis(180),
            bad: MusicTime::from_millis(270),
            miss: MusicTime::from_millis(332),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub major: u32,
    pub minor: u32,
    pub target_fps: u32,
    pub windows: HitWindows,
    pub scroll_direction: ScrollDirection,
    pub ghost_tapping: bool,
    pub volume: f32,
    pub hit_sound_volume: f32,
    pub zoom: f32,
    pub bot_play: bool,
    pub opponent_autoplay: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            major: SETTINGS_MAJOR,
            minor: SETTINGS_MINOR,
            target_fps: 120,
            windows: HitWindows::default(),
            scroll_direction: ScrollDirection::Down,
            ghost_tapping: false,
            volume: 1.0,
            hit_sound_volume: 0.0,
            zoom: 1.0,
            bot_play: false,
            opponent_autoplay: true,
        }
    }
}

impl Settings {
    /// Reads the settings file. Anything missing or unreadable falls back to
    /// defaults; the file is never written from here.
    pub fn load(path: &Path) -> Self {
        let mut conf = Ini::new();
        match conf.load(path) {
            Ok(_) => {
                info!("Loaded settings from '{}'.", path.display());
                Self::from_ini(&conf)
            }
            Err(e) => {
                warn!("Failed to load '{}' ({}), using default settings.", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_ini_str(text: &str) -> Self {
        let mut conf = Ini::new();
        match conf.read(text.to_string()) {
            Ok(_) => Self::from_ini(&conf),
            Err(e) => {
                warn!("Malformed settings ({}), using defaults.", e);
                Self::default()
            }
        }
    }

    fn from_ini(conf: &Ini) -> Self {
        let defaults = Self::default();
        let major = parse_or(conf, "Meta", "Major", defaults.major);
        let minor = parse_or(conf, "Meta", "Minor", defaults.minor);
        if major > SETTINGS_MAJOR {
            warn!(
                "Settings version {}.{} is newer than supported {}.x; ignoring file.",
                major, minor, SETTINGS_MAJOR
            );
            return defaults;
        }

        let window = |key: &str, fallback: MusicTime| {
            let ms: f64 = parse_or(conf, "Options", key, fallback.as_millis_f64());
            if ms < 0.0 {
                warn!("Negative {} ({}), using default.", key, ms);
                fallback
            } else {
                MusicTime::from_millis_f64(ms)
            }
        };
        let windows = HitWindows {
            sick: window("SickWindowMs", defaults.windows.sick),
            good: window("GoodWindowMs", defaults.windows.good),
            bad: window("BadWindowMs", defaults.windows.bad),
            miss: window("MissWindowMs", defaults.windows.miss),
        };

        let scroll_direction = match conf.get("Options", "ScrollDirection").as_deref().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("up") => ScrollDirection::Up,
            Some(s) if s.eq_ignore_ascii_case("down") => ScrollDirection::Down,
            None => defaults.scroll_direction,
            Some(other) => {
                warn!("Unknown ScrollDirection '{}', using Down.", other);
                ScrollDirection::Down
            }
        };

        Self {
            major,
            minor,
            target_fps: parse_or(conf, "Options", "TargetFps", defaults.target_fps).max(1),
            windows,
            scroll_direction,
            ghost_tapping: parse_flag(conf, "Options", "GhostTapping", defaults.ghost_tapping),
            volume: parse_or(conf, "Options", "Volume", defaults.volume).clamp(0.0, 2.0),
            hit_sound_volume: parse_or(conf, "Options", "HitSoundVolume", defaults.hit_sound_volume)
                .clamp(0.0, 2.0),
            zoom: parse_or(conf, "Options", "Zoom", defaults.zoom).max(MIN_ZOOM),
            bot_play: parse_flag(conf, "Options", "BotPlay", defaults.bot_play),
            opponent_autoplay: parse_flag(conf, "Options", "OpponentAutoplay", defaults.opponent_autoplay),
        }
    }
}

fn parse_or<T: std::str::FromStr>(conf: &Ini, section: &str, key: &str, fallback: T) -> T {
    match conf.get(section, key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid value '{}' for {}.{}, using default.", raw, section, key);
            fallback
        }),
        None => fallback,
    }
}

fn parse_flag(conf: &Ini, section: &str, key: &str, fallback: bool) -> bool {
    parse_or::<u8>(conf, section, key, fallback as u8) != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_all_options() {
        let s = Settings::from_ini_str(
            "[Meta]\nMajor=1\nMinor=0\n\
             [Options]\nTargetFps=240\nSickWindowMs=40\nGoodWindowMs=80\nBadWindowMs=120\n\
             MissWindowMs=90\nScrollDirection=Up\nGhostTapping=1\nVolume=0.5\n\
             HitSoundVolume=0.8\nZoom=1.25\nBotPlay=1\nOpponentAutoplay=0\n",
        );
        assert_eq!(s.target_fps, 240);
        assert_eq!(s.windows.miss, MusicTime::from_millis(90));
        assert_eq!(s.windows.sick, MusicTime::from_millis(40));
        assert_eq!(s.scroll_direction, ScrollDirection::Up);
        assert!(s.ghost_tapping);
        assert!(s.bot_play);
        assert!(!s.opponent_autoplay);
        assert_eq!(s.minor, 0);
        approx::assert_relative_eq!(s.zoom, 1.25);
    }

    #[test]
    fn bad_values_fall_back_per_key() {
        let s = Settings::from_ini_str("[Options]\nTargetFps=fast\nMissWindowMs=-3\nVolume=9\n");
        let d = Settings::default();
        assert_eq!(s.target_fps, d.target_fps);
        assert_eq!(s.windows.miss, d.windows.miss);
        approx::assert_relative_eq!(s.volume, 2.0);
    }

    #[test]
    fn newer_major_is_ignored() {
        let s = Settings::from_ini_str("[Meta]\nMajor=9\n[Options]\nTargetFps=30\n");
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn load_from_disk_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[Options]\nZoom=0.001").unwrap();
        let s = Settings::load(file.path());
        approx::assert_relative_eq!(s.zoom, MIN_ZOOM);

        let missing = Settings::load(Path::new("/nonexistent/settings.ini"));
        assert_eq!(missing, Settings::default());
    }
}

use crate::config::{Settings, WINDOW_HEIGHT, WINDOW_WIDTH};
use crate::core::audio::{AudioBackend, Pcm};
use crate::core::clock::Clock;
use crate::core::input::KeyMap;

/// Everything the frame loop needs from the host, passed explicitly.
pub struct EngineContext {
    pub settings: Settings,
    pub keymap: KeyMap,
    pub clock: Box<dyn Clock>,
    pub audio: Box<dyn AudioBackend>,
    /// Design-space size the highway is laid out in.
    pub screen_size: (f32, f32),
    pub hit_sound: Option<Pcm>,
}

impl EngineContext {
    pub fn new(settings: Settings, clock: Box<dyn Clock>, audio: Box<dyn AudioBackend>) -> Self {
        let mut ctx = Self {
            settings,
            keymap: KeyMap::default(),
            clock,
            audio,
            screen_size: (WINDOW_WIDTH as f32, WINDOW_HEIGHT as f32),
            hit_sound: None,
        };
        ctx.apply_volume();
        ctx
    }

    pub fn apply_volume(&mut self) {
        self.audio.set_volume(self.settings.volume);
    }
}

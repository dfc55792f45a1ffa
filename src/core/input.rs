use std::collections::HashSet;

use log::debug;
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::config::{DEFAULT_ACTION_KEYS, DEFAULT_LANE_KEYS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Direction {
    Left = 0,
    Down = 1,
    Up = 2,
    Right = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::Left, Direction::Down, Direction::Up, Direction::Right];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub fn from_index(i: usize) -> Option<Direction> {
        Self::ALL.get(i).copied()
    }
}

/// Which lane cluster a note belongs to. `Human` is player 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Player {
    Human = 0,
    Opponent = 1,
}

impl Player {
    pub const ALL: [Player; 2] = [Player::Human, Player::Opponent];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub const fn other(self) -> Player {
        match self {
            Player::Human => Player::Opponent,
            Player::Opponent => Player::Human,
        }
    }
}

/// One of the eight logical note lanes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Lane {
    pub player: Player,
    pub direction: Direction,
}

impl Lane {
    #[inline(always)]
    pub const fn new(player: Player, direction: Direction) -> Self {
        Self { player, direction }
    }

    pub fn all() -> impl Iterator<Item = Lane> {
        Player::ALL
            .into_iter()
            .flat_map(|p| Direction::ALL.into_iter().map(move |d| Lane::new(p, d)))
    }
}

/// Key state the host exposes to the engine. Pressed/released are one-frame
/// pulses.
pub trait Input {
    fn is_key_down(&self, code: KeyCode) -> bool;
    fn is_key_pressed(&self, code: KeyCode) -> bool;
    fn is_key_released(&self, code: KeyCode) -> bool;
}

/// `Input` built from winit key events. Call `end_frame` after each update.
#[derive(Default, Debug)]
pub struct KeyboardState {
    down: HashSet<KeyCode>,
    pressed: HashSet<KeyCode>,
    released: HashSet<KeyCode>,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry point for a windowed host: feed every winit keyboard event here,
    /// then call `end_frame` once per frame. Headless runs and tests drive
    /// `press`/`release` directly.
    pub fn handle_key_event(&mut self, event: &KeyEvent) {
        if event.repeat {
            return;
        }
        if let PhysicalKey::Code(code) = event.physical_key {
            match event.state {
                ElementState::Pressed => self.press(code),
                ElementState::Released => self.release(code),
            }
        }
    }

    pub fn press(&mut self, code: KeyCode) {
        if self.down.insert(code) {
            self.pressed.insert(code);
        }
    }

    pub fn release(&mut self, code: KeyCode) {
        if self.down.remove(&code) {
            self.released.insert(code);
        }
    }

    pub fn end_frame(&mut self) {
        self.pressed.clear();
        self.released.clear();
    }
}

impl Input for KeyboardState {
    fn is_key_down(&self, code: KeyCode) -> bool {
        self.down.contains(&code)
    }
    fn is_key_pressed(&self, code: KeyCode) -> bool {
        self.pressed.contains(&code)
    }
    fn is_key_released(&self, code: KeyCode) -> bool {
        self.released.contains(&code)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PracticeAction {
    TogglePause,
    SpeedDown,
    SpeedUp,
    ScrubBack,
    ScrubForward,
    AddBookmark,
    PrevBookmark,
    NextBookmark,
    Restart,
    DifficultyEasy,
    DifficultyNormal,
    DifficultyHard,
    ToggleBotPlay,
    HitWindowDown,
    HitWindowUp,
    ZoomOut,
    ZoomIn,
    Exit,
}

/// Key bindings for the human lanes and practice actions.
#[derive(Clone, Debug)]
pub struct KeyMap {
    lanes: [Vec<KeyCode>; 4],
    actions: Vec<(KeyCode, PracticeAction)>,
}

impl Default for KeyMap {
    fn default() -> Self {
        Self {
            lanes: DEFAULT_LANE_KEYS.map(|keys| keys.to_vec()),
            actions: DEFAULT_ACTION_KEYS.to_vec(),
        }
    }
}

impl KeyMap {
    pub fn bind_lane(&mut self, direction: Direction, code: KeyCode) {
        for keys in &mut self.lanes {
            keys.retain(|&k| k != code);
        }
        self.actions.retain(|&(k, _)| k != code);
        self.lanes[direction.index()].push(code);
        debug!("Bound {:?} to {:?}", code, direction);
    }

    pub fn lane_keys(&self, direction: Direction) -> &[KeyCode] {
        &self.lanes[direction.index()]
    }

    pub fn is_direction_down(&self, input: &dyn Input, direction: Direction) -> bool {
        self.lanes[direction.index()].iter().any(|&k| input.is_key_down(k))
    }

    /// Actions whose key was pressed this frame, in binding order.
    pub fn pressed_actions(&self, input: &dyn Input) -> Vec<PracticeAction> {
        self.actions
            .iter()
            .filter(|(k, _)| input.is_key_pressed(*k))
            .map(|&(_, a)| a)
            .collect()
    }
}

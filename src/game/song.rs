use crate::core::input::{Direction, Player};
use crate::core::loading::LoadError;
use crate::core::time::MusicTime;
use crate::game::note::Note;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// One chart at one difficulty. Notes are sorted by start and indexed.
#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    pub name: String,
    pub speed: f64,
    pub bpm: f64,
    pub needs_voices: bool,
    pub notes: Vec<Note>,
    pub notes_end_at: MusicTime,
    /// Longest sustain, bounds how far back a drawable note can start.
    pub max_duration: MusicTime,
}

// --- Chart file schema ---

#[derive(Serialize, Deserialize)]
struct ChartFile {
    #[serde(alias = "Song")]
    song: ChartBody,
}

#[derive(Serialize, Deserialize)]
struct ChartBody {
    #[serde(alias = "Song", default)]
    song: String,
    #[serde(alias = "Speed", default = "default_speed")]
    speed: f64,
    #[serde(alias = "Bpm", alias = "BPM", default)]
    bpm: f64,
    #[serde(rename = "needsVoices", alias = "NeedsVoices", default = "default_needs_voices")]
    needs_voices: bool,
    #[serde(alias = "Notes", default)]
    notes: Vec<ChartSection>,
}

#[derive(Serialize, Deserialize)]
struct ChartSection {
    #[serde(rename = "mustHitSection", alias = "MustHitSection", default)]
    must_hit_section: bool,
    #[serde(rename = "sectionNotes", alias = "SectionNotes", default)]
    section_notes: Vec<Vec<Value>>,
}

fn default_speed() -> f64 {
    1.0
}

fn default_needs_voices() -> bool {
    true
}

/// Which cluster a chart lane belongs to. Lanes 0..3 in a must-hit section
/// go to the opponent cluster; 4..7 take the opposite assignment.
#[inline(always)]
fn player_for_lane(lane: u8, must_hit: bool) -> Player {
    let first_half = lane <= 3;
    if first_half == must_hit { Player::Opponent } else { Player::Human }
}

fn parse_entry(entry: &[Value], section: usize, index: usize, must_hit: bool) -> Result<Note, LoadError> {
    let malformed = || LoadError::MalformedNote { section, entry: index };
    let start_ms = entry.first().and_then(Value::as_f64).ok_or_else(malformed)?;
    let lane_raw = entry.get(1).and_then(Value::as_f64).ok_or_else(malformed)?;
    if lane_raw.fract() != 0.0 {
        return Err(malformed());
    }
    let lane = lane_raw as i64;
    if !(0..=7).contains(&lane) {
        return Err(LoadError::LaneOutOfRange { lane, section });
    }
    let duration_ms = entry.get(2).and_then(Value::as_f64).unwrap_or(0.0);

    let lane = lane as u8;
    let direction = Direction::from_index((lane % 4) as usize).ok_or_else(malformed)?;
    Ok(Note::new(
        player_for_lane(lane, must_hit),
        direction,
        MusicTime::from_millis_f64(start_ms),
        MusicTime::from_millis(duration_ms.max(0.0).round() as i64),
    ))
}

impl Song {
    /// Builds a song from unsorted notes: stable sort by start, re-index,
    /// compute end and longest sustain.
    pub fn from_notes(name: String, speed: f64, bpm: f64, needs_voices: bool, mut notes: Vec<Note>) -> Self {
        notes.sort_by_key(|n| n.starts_at);
        for (i, n) in notes.iter_mut().enumerate() {
            n.index = i;
            n.clear_play_state();
        }
        let notes_end_at = notes.iter().map(Note::ends_at).max().unwrap_or(MusicTime::ZERO);
        let max_duration = notes.iter().map(|n| n.duration).max().unwrap_or(MusicTime::ZERO);
        Self { name, speed, bpm, needs_voices, notes, notes_end_at, max_duration }
    }

    pub fn from_chart_json(text: &str) -> Result<Self, LoadError> {
        let file: ChartFile = serde_json::from_str(text)?;
        let body = file.song;
        let mut notes = Vec::new();
        for (s, section) in body.notes.iter().enumerate() {
            for (i, entry) in section.section_notes.iter().enumerate() {
                notes.push(parse_entry(entry, s, i, section.must_hit_section)?);
            }
        }
        Ok(Self::from_notes(body.song, body.speed, body.bpm, body.needs_voices, notes))
    }

    /// Canonical chart: one non-must-hit section, lane = direction + 4 * player.
    pub fn to_chart_json(&self) -> String {
        let section_notes = self
            .notes
            .iter()
            .map(|n| {
                let lane = n.direction.index() + 4 * n.player.index();
                vec![
                    Value::from(n.starts_at.as_millis_f64()),
                    Value::from(lane as u64),
                    Value::from(n.duration.as_millis_f64()),
                ]
            })
            .collect();
        let file = ChartFile {
            song: ChartBody {
                song: self.name.clone(),
                speed: self.speed,
                bpm: self.bpm,
                needs_voices: self.needs_voices,
                notes: vec![ChartSection { must_hit_section: false, section_notes }],
            },
        };
        // Only plain numbers and strings, serialization cannot fail.
        serde_json::to_string_pretty(&file).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Normal, Difficulty::Hard];

    /// `song-easy.json` is Easy, `song-hard.json` is Hard, anything else Normal.
    pub fn from_chart_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        if stem.ends_with("-easy") {
            Difficulty::Easy
        } else if stem.ends_with("-hard") {
            Difficulty::Hard
        } else {
            Difficulty::Normal
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Difficulty::Easy => "Easy",
            Difficulty::Normal => "Normal",
            Difficulty::Hard => "Hard",
        };
        f.write_str(s)
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "normal" => Ok(Difficulty::Normal),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{}'", other)),
        }
    }
}

/// The parsed originals of one song, one per difficulty.
#[derive(Clone, Debug, Default)]
pub struct ChartSet {
    charts: BTreeMap<Difficulty, Song>,
}

impl ChartSet {
    pub fn insert(&mut self, difficulty: Difficulty, song: Song) {
        self.charts.insert(difficulty, song);
    }

    pub fn get(&self, difficulty: Difficulty) -> Option<&Song> {
        self.charts.get(&difficulty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Difficulty, &Song)> {
        self.charts.iter().map(|(d, s)| (*d, s))
    }

    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }

    /// The requested chart, else Normal, else whatever exists.
    pub fn resolve(&self, wanted: Difficulty) -> Option<(Difficulty, &Song)> {
        self.get(wanted)
            .map(|s| (wanted, s))
            .or_else(|| self.get(Difficulty::Normal).map(|s| (Difficulty::Normal, s)))
            .or_else(|| self.iter().next())
    }
}

use crate::core::audio::{decode_file, DecodeError, Pcm};
use crate::game::song::{ChartSet, Difficulty, Song};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed chart json: {0}")]
    ChartJson(#[from] serde_json::Error),
    #[error("lane index {lane} out of range 0..7 in section {section}")]
    LaneOutOfRange { lane: i64, section: usize },
    #[error("malformed note #{entry} in section {section}")]
    MalformedNote { section: usize, entry: usize },
    #[error("audio decode failed: {0}")]
    AudioDecode(#[source] DecodeError),
    #[error("no audio frames in '{0}'")]
    NoAudioFrames(PathBuf),
    #[error("no chart files given")]
    NoCharts,
}

impl From<DecodeError> for LoadError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Empty(path) => LoadError::NoAudioFrames(path),
            other => LoadError::AudioDecode(other),
        }
    }
}

/// Files making up one playable song.
#[derive(Clone, Debug, Default)]
pub struct SongRequest {
    pub charts: Vec<PathBuf>,
    pub inst: PathBuf,
    pub voices: Option<PathBuf>,
}

/// Parsed charts (loader-owned originals) plus decoded tracks.
pub struct LoadedSong {
    pub charts: ChartSet,
    pub inst: Pcm,
    pub voices: Option<Pcm>,
}

pub fn load_chart(path: &Path) -> Result<Song, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
    let song = Song::from_chart_json(&text)?;
    info!(
        "Loaded chart '{}' ({}): {} notes, ends at {}",
        song.name,
        path.display(),
        song.notes.len(),
        song.notes_end_at
    );
    Ok(song)
}

pub fn load_song(request: &SongRequest) -> Result<LoadedSong, LoadError> {
    if request.charts.is_empty() {
        return Err(LoadError::NoCharts);
    }
    let mut charts = ChartSet::default();
    for path in &request.charts {
        let difficulty = Difficulty::from_chart_path(path);
        if charts.get(difficulty).is_some() {
            warn!("Second {:?} chart '{}' replaces the first.", difficulty, path.display());
        }
        charts.insert(difficulty, load_chart(path)?);
    }

    let inst = decode_file(&request.inst)?;
    let needs_voices = charts.iter().any(|(_, s)| s.needs_voices);
    let voices = match (&request.voices, needs_voices) {
        (Some(path), true) => match decode_file(path) {
            Ok(pcm) => Some(pcm),
            Err(e) => {
                warn!("Voices track unusable ({}); playing instrumental only.", e);
                None
            }
        },
        (None, true) => {
            warn!("Chart needs a voices track but none was given; playing instrumental only.");
            None
        }
        (Some(path), false) => {
            info!("Chart does not use voices; ignoring '{}'.", path.display());
            None
        }
        (None, false) => None,
    };

    Ok(LoadedSong { charts, inst, voices })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn chart_file(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn chart_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = chart_file(
            dir.path(),
            "bopeebo-hard.json",
            r#"{"song":{"song":"Bopeebo","speed":1.2,"needsVoices":true,
                "notes":[{"mustHitSection":false,"sectionNotes":[[500,1,0]]}]}}"#,
        );
        let song = load_chart(&path).unwrap();
        assert_eq!(song.name, "Bopeebo");
        assert_eq!(song.notes.len(), 1);
    }

    #[test]
    fn missing_chart_is_io_error() {
        let err = load_chart(Path::new("/nonexistent/chart.json")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn bad_lane_fails_the_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = chart_file(
            dir.path(),
            "x.json",
            r#"{"song":{"song":"X","notes":[{"sectionNotes":[[0,0,0]]},{"sectionNotes":[[10,9,0]]}]}}"#,
        );
        let err = load_chart(&path).unwrap_err();
        assert!(matches!(err, LoadError::LaneOutOfRange { lane: 9, section: 1 }));
    }

    #[test]
    fn empty_request_is_rejected() {
        let err = load_song(&SongRequest::default()).err().unwrap();
        assert!(matches!(err, LoadError::NoCharts));
    }

    #[test]
    fn empty_audio_maps_to_no_frames() {
        let err: LoadError = DecodeError::Empty(PathBuf::from("a.ogg")).into();
        assert!(matches!(err, LoadError::NoAudioFrames(_)));
    }
}

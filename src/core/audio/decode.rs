use lewton::inside_ogg::OggStreamReader;
use log::{info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Decoded audio: interleaved 16-bit little-endian stereo bytes.
#[derive(Clone, Debug)]
pub struct Pcm {
    pub bytes: Arc<[u8]>,
    pub sample_rate: u32,
}

impl Pcm {
    pub fn frames(&self) -> usize {
        self.bytes.len() / super::stream::FRAME_BYTES
    }

    /// The samples as `i16`, for the sfx mixer.
    pub fn samples(&self) -> Vec<i16> {
        self.bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ogg decode failed for '{path}': {source}")]
    Vorbis {
        path: PathBuf,
        #[source]
        source: lewton::VorbisError,
    },
    #[error("mp3 decode failed for '{path}': {message}")]
    Mp3 { path: PathBuf, message: String },
    #[error("unsupported audio format: '{0}'")]
    UnsupportedFormat(PathBuf),
    #[error("no audio frames decoded from '{0}'")]
    Empty(PathBuf),
}

/// Decodes an OGG or MP3 file, picked by extension.
pub fn decode_file(path: &Path) -> Result<Pcm, DecodeError> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    let pcm = match ext.as_str() {
        "ogg" => decode_ogg(path)?,
        "mp3" => decode_mp3(path)?,
        _ => return Err(DecodeError::UnsupportedFormat(path.to_path_buf())),
    };
    if pcm.bytes.is_empty() {
        return Err(DecodeError::Empty(path.to_path_buf()));
    }
    info!(
        "Decoded '{}': {} frames at {} Hz",
        path.display(),
        pcm.frames(),
        pcm.sample_rate
    );
    Ok(pcm)
}

fn decode_ogg(path: &Path) -> Result<Pcm, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Io { path: path.to_path_buf(), source })?;
    let mut ogg = OggStreamReader::new(BufReader::new(file))
        .map_err(|source| DecodeError::Vorbis { path: path.to_path_buf(), source })?;
    let channels = ogg.ident_hdr.audio_channels as usize;
    let sample_rate = ogg.ident_hdr.audio_sample_rate;

    let mut bytes = Vec::new();
    while let Some(packet) = ogg
        .read_dec_packet_itl()
        .map_err(|source| DecodeError::Vorbis { path: path.to_path_buf(), source })?
    {
        push_stereo(&mut bytes, &packet, channels);
    }
    Ok(Pcm { bytes: Arc::from(bytes), sample_rate })
}

fn decode_mp3(path: &Path) -> Result<Pcm, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Io { path: path.to_path_buf(), source })?;
    let mut decoder = minimp3::Decoder::new(BufReader::new(file));

    let mut bytes = Vec::new();
    let mut sample_rate: u32 = 0;
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate as u32;
                } else if frame.sample_rate as u32 != sample_rate {
                    warn!(
                        "'{}' changes sample rate mid-stream ({} -> {}); keeping the first",
                        path.display(),
                        sample_rate,
                        frame.sample_rate
                    );
                }
                push_stereo(&mut bytes, &frame.data, frame.channels);
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => {
                return Err(DecodeError::Mp3 { path: path.to_path_buf(), message: format!("{:?}", e) });
            }
        }
    }
    Ok(Pcm { bytes: Arc::from(bytes), sample_rate })
}

/// Appends interleaved samples as stereo frames: mono is duplicated, extra
/// channels past the first two are dropped.
fn push_stereo(out: &mut Vec<u8>, samples: &[i16], channels: usize) {
    if channels == 0 {
        return;
    }
    out.reserve(samples.len() / channels * super::stream::FRAME_BYTES);
    for frame in samples.chunks_exact(channels) {
        let left = frame[0];
        let right = if channels > 1 { frame[1] } else { left };
        out.extend_from_slice(&left.to_le_bytes());
        out.extend_from_slice(&right.to_le_bytes());
    }
}

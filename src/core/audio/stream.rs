use crate::core::time::MusicTime;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};

/// Interleaved 16-bit stereo: one sample-frame is four bytes.
pub const FRAME_BYTES: usize = 4;

/// Source position of a byte offset: `(b / 4) / sr` seconds.
#[inline(always)]
pub fn byte_offset_to_time(bytes: usize, sample_rate: u32) -> MusicTime {
    if sample_rate == 0 {
        return MusicTime::ZERO;
    }
    let frames = (bytes / FRAME_BYTES) as f64;
    MusicTime::from_secs_f64(frames / sample_rate as f64)
}

/// Frame-aligned byte offset of a source position.
#[inline(always)]
pub fn time_to_byte_offset(t: MusicTime, sample_rate: u32) -> usize {
    let frames = (t.as_secs_f64() * sample_rate as f64).floor().max(0.0) as usize;
    frames * FRAME_BYTES
}

struct StreamState {
    audio_bytes: Arc<[u8]>,
    sample_rate: u32,
    speed: f64,
    /// Floating read cursor; `position_in_bytes` is its frame-aligned floor.
    cursor: f64,
    position_in_bytes: usize,
    /// Apparent cursor as if the stream had played at speed 1.
    fake_position_in_bytes: f64,
    should_play: bool,
}

impl StreamState {
    #[inline(always)]
    fn end_in_bytes(&self) -> usize {
        self.audio_bytes.len() / FRAME_BYTES * FRAME_BYTES
    }

    #[inline(always)]
    fn at_end(&self) -> bool {
        self.position_in_bytes >= self.end_in_bytes()
    }
}

/// Variable-speed PCM stream pulled by the backend thread.
///
/// Cloning yields another handle to the same stream: the game loop keeps one
/// and the backend callback keeps another. Every mutator takes the lock that
/// guards the cursor and play flags, so a seek is a single atomic step as far
/// as `read` is concerned.
#[derive(Clone)]
pub struct AudioStream {
    inner: Arc<Mutex<StreamState>>,
}

impl Default for AudioStream {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioStream {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StreamState {
                audio_bytes: Arc::from(Vec::<u8>::new()),
                sample_rate: 44_100,
                speed: 1.0,
                cursor: 0.0,
                position_in_bytes: 0,
                fake_position_in_bytes: 0.0,
                should_play: false,
            })),
        }
    }

    pub fn with_pcm(bytes: impl Into<Arc<[u8]>>, sample_rate: u32) -> Self {
        let stream = Self::new();
        stream.load(bytes, sample_rate);
        stream
    }

    #[inline(always)]
    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces the source. Position resets to zero and the stream pauses.
    pub fn load(&self, bytes: impl Into<Arc<[u8]>>, sample_rate: u32) {
        let bytes: Arc<[u8]> = bytes.into();
        let mut st = self.lock();
        info!(
            "Audio stream loaded: {} bytes at {} Hz ({})",
            bytes.len(),
            sample_rate,
            byte_offset_to_time(bytes.len(), sample_rate)
        );
        st.audio_bytes = bytes;
        st.sample_rate = sample_rate;
        st.cursor = 0.0;
        st.position_in_bytes = 0;
        st.fake_position_in_bytes = 0.0;
        st.should_play = false;
    }

    pub fn play(&self) {
        self.lock().should_play = true;
    }

    pub fn pause(&self) {
        self.lock().should_play = false;
    }

    pub fn set_speed(&self, speed: f64) {
        assert!(
            speed > 0.0 && speed.is_finite(),
            "audio stream speed must be positive, got {}",
            speed
        );
        let mut st = self.lock();
        st.speed = speed;
        st.fake_position_in_bytes = st.position_in_bytes as f64 / speed;
        debug!("Audio stream speed set to {:.2}x", speed);
    }

    pub fn speed(&self) -> f64 {
        self.lock().speed
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    /// Seeks to a source position, clamped to `[0, duration]`.
    pub fn set_position(&self, t: MusicTime) {
        let mut st = self.lock();
        let end = st.end_in_bytes();
        let bytes = time_to_byte_offset(t.max(MusicTime::ZERO), st.sample_rate).min(end);
        st.position_in_bytes = bytes;
        st.cursor = bytes as f64;
        st.fake_position_in_bytes = bytes as f64 / st.speed;
    }

    /// Seeks relative to the current source position.
    pub fn seek(&self, delta: MusicTime) {
        let target = self.position() + delta;
        self.set_position(target);
    }

    pub fn position(&self) -> MusicTime {
        let st = self.lock();
        byte_offset_to_time(st.position_in_bytes, st.sample_rate)
    }

    /// Wall-clock time the stream would have needed to reach its position at
    /// the current speed.
    pub fn apparent_position(&self) -> MusicTime {
        let st = self.lock();
        byte_offset_to_time(st.fake_position_in_bytes as usize, st.sample_rate)
    }

    pub fn position_in_bytes(&self) -> usize {
        self.lock().position_in_bytes
    }

    pub fn duration(&self) -> MusicTime {
        let st = self.lock();
        byte_offset_to_time(st.end_in_bytes(), st.sample_rate)
    }

    pub fn is_playing(&self) -> bool {
        let st = self.lock();
        !st.at_end() && st.should_play
    }

    pub fn is_drained(&self) -> bool {
        self.lock().at_end()
    }

    /// Pull callback: fills `out` with interleaved PCM and returns the number
    /// of sample-frames taken from the source. The rest is silence.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut st = self.lock();
        let frames = out.len() / FRAME_BYTES;
        if !st.should_play {
            out.fill(0);
            return 0;
        }

        let end = st.end_in_bytes();
        let step = FRAME_BYTES as f64 * st.speed;
        let mut written = 0;
        while written < frames {
            let src = st.position_in_bytes;
            if src + FRAME_BYTES > end {
                break;
            }
            let dst = written * FRAME_BYTES;
            out[dst..dst + FRAME_BYTES].copy_from_slice(&st.audio_bytes[src..src + FRAME_BYTES]);
            st.cursor += step;
            st.position_in_bytes = ((st.cursor as usize) / FRAME_BYTES * FRAME_BYTES).min(end);
            st.fake_position_in_bytes += FRAME_BYTES as f64;
            written += 1;
        }

        if written < frames {
            out[written * FRAME_BYTES..].fill(0);
            st.position_in_bytes = end;
            st.cursor = end as f64;
            if st.should_play {
                debug!("Audio stream drained after {} frames this buffer", written);
            }
            st.should_play = false;
        }
        written
    }
}

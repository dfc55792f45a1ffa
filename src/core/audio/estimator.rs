use crate::config::{ESTIMATOR_RESYNC_FRAMES, ESTIMATOR_TOLERANCE};
use crate::core::time::MusicTime;

/// The slice of a stream the estimator needs to read each frame.
pub trait PositionSource {
    fn position(&self) -> MusicTime;
    fn is_playing(&self) -> bool;
    fn speed(&self) -> f64;
}

impl PositionSource for super::AudioStream {
    fn position(&self) -> MusicTime {
        super::AudioStream::position(self)
    }
    fn is_playing(&self) -> bool {
        super::AudioStream::is_playing(self)
    }
    fn speed(&self) -> f64 {
        super::AudioStream::speed(self)
    }
}

/// Smooths the backend's stepwise position (≈10 ms granularity) into a
/// per-frame estimate that never runs backwards while playing.
#[derive(Debug, Default, Clone)]
pub struct PositionEstimator {
    estimate: MusicTime,
    frames_since_sync: u32,
}

impl PositionEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn estimate(&self) -> MusicTime {
        self.estimate
    }

    /// Forget the running estimate. Called on every seek.
    pub fn reset(&mut self) {
        self.estimate = MusicTime::ZERO;
        self.frames_since_sync = 0;
    }

    /// Advances the estimate by one frame of `frame_delta` wall time.
    pub fn update(&mut self, source: &dyn PositionSource, frame_delta: MusicTime) -> MusicTime {
        let reported = source.position();
        if !source.is_playing() {
            self.estimate = reported;
            self.frames_since_sync = 0;
            return self.estimate;
        }

        let speed = source.speed();
        let step = frame_delta * speed;
        let tolerance = ESTIMATOR_TOLERANCE * speed;

        self.frames_since_sync += 1;
        if self.frames_since_sync >= ESTIMATOR_RESYNC_FRAMES {
            self.frames_since_sync = 0;
            if reported > self.estimate {
                self.estimate = reported;
            }
        } else if reported - self.estimate < tolerance && step < tolerance {
            // Fill the gap between backend steps with wall clock, but never
            // run further ahead of the report than the tolerance.
            let filled = (self.estimate + step).min(reported + tolerance);
            self.estimate = self.estimate.max(filled);
        } else {
            self.estimate = self.estimate.max(reported);
        }
        self.estimate
    }
}

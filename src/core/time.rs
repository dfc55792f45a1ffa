use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Musical time measured from the song origin, in nanoseconds.
///
/// Every chart position, audio position and timing window in the engine uses
/// this one type. Conversions to byte offsets live in `core::audio::stream`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MusicTime(i64);

const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SEC: i64 = 1_000_000_000;

impl MusicTime {
    pub const ZERO: MusicTime = MusicTime(0);

    #[inline(always)]
    pub const fn from_nanos(ns: i64) -> Self {
        MusicTime(ns)
    }

    #[inline(always)]
    pub const fn from_millis(ms: i64) -> Self {
        MusicTime(ms * NANOS_PER_MILLI)
    }

    #[inline(always)]
    pub fn from_millis_f64(ms: f64) -> Self {
        MusicTime((ms * NANOS_PER_MILLI as f64).round() as i64)
    }

    #[inline(always)]
    pub fn from_secs_f64(secs: f64) -> Self {
        MusicTime((secs * NANOS_PER_SEC as f64).round() as i64)
    }

    #[inline(always)]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    #[inline(always)]
    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_MILLI as f64
    }

    #[inline(always)]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    #[inline(always)]
    pub const fn abs(self) -> Self {
        MusicTime(self.0.abs())
    }

    #[inline(always)]
    pub fn clamp(self, lo: MusicTime, hi: MusicTime) -> Self {
        MusicTime(self.0.clamp(lo.0, hi.0))
    }

    /// Half of this span, used for symmetric windows.
    #[inline(always)]
    pub const fn half(self) -> Self {
        MusicTime(self.0 / 2)
    }
}

impl Add for MusicTime {
    type Output = MusicTime;
    fn add(self, rhs: MusicTime) -> MusicTime {
        MusicTime(self.0 + rhs.0)
    }
}

impl AddAssign for MusicTime {
    fn add_assign(&mut self, rhs: MusicTime) {
        self.0 += rhs.0;
    }
}

impl Sub for MusicTime {
    type Output = MusicTime;
    fn sub(self, rhs: MusicTime) -> MusicTime {
        MusicTime(self.0 - rhs.0)
    }
}

impl SubAssign for MusicTime {
    fn sub_assign(&mut self, rhs: MusicTime) {
        self.0 -= rhs.0;
    }
}

impl Neg for MusicTime {
    type Output = MusicTime;
    fn neg(self) -> MusicTime {
        MusicTime(-self.0)
    }
}

impl Mul<f64> for MusicTime {
    type Output = MusicTime;
    fn mul(self, rhs: f64) -> MusicTime {
        MusicTime((self.0 as f64 * rhs).round() as i64)
    }
}

impl fmt::Display for MusicTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = self.0.div_euclid(NANOS_PER_MILLI);
        let sign = if total_ms < 0 { "-" } else { "" };
        let total_ms = total_ms.abs();
        let minutes = total_ms / 60_000;
        let seconds = (total_ms / 1000) % 60;
        let millis = total_ms % 1000;
        write!(f, "{}{}:{:02}.{:03}", sign, minutes, seconds, millis)
    }
}

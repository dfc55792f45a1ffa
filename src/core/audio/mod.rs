pub mod decode;
pub mod estimator;
pub mod stream;

pub use decode::{decode_file, DecodeError, Pcm};
pub use estimator::{PositionEstimator, PositionSource};
pub use stream::AudioStream;

use crate::config::AUDIO_BUFFER_MS;
use crate::core::time::MusicTime;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig, SupportedBufferSize,
};
use log::{error, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("no usable output config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to build audio stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("failed to start audio stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

/// Audio-playback capability the engine consumes from the host.
pub trait AudioBackend {
    /// Starts pulling `source` (16-bit stereo at `sample_rate`) on a
    /// backend-owned thread.
    fn open_stream(&mut self, source: AudioStream, sample_rate: u32) -> Result<(), AudioError>;
    fn close_all(&mut self);
    fn set_volume(&mut self, volume: f32);
    /// Fire-and-forget one-shot sound (hit sounds).
    fn play_sfx(&mut self, sfx: &Pcm, volume: f32);
}

#[inline(always)]
fn buffer_frames(sample_rate: u32) -> u32 {
    (sample_rate as u64 * AUDIO_BUFFER_MS as u64 / 1000).max(64) as u32
}

/// One supported device configuration, reduced to what stream planning reads.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfigRange {
    pub format: SampleFormat,
    pub channels: u16,
    pub min_rate: u32,
    pub max_rate: u32,
    /// Accepted fixed buffer sizes in frames; `None` when the device does not say.
    pub buffer: Option<(u32, u32)>,
}

/// How a stream is opened on the device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputPlan {
    /// `I16` or `F32`; any other device format is written as `F32`.
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub buffer: BufferSize,
}

/// Prefers i16 stereo at the source rate. Otherwise takes the device default
/// and converts on the fly.
pub fn plan_output(supported: &[ConfigRange], default: ConfigRange, source_rate: u32) -> OutputPlan {
    let exact = supported.iter().find(|r| {
        r.format == SampleFormat::I16 && r.channels == 2 && r.min_rate <= source_rate && source_rate <= r.max_rate
    });
    let (range, sample_rate) = match exact {
        Some(r) => (*r, source_rate),
        None => (default, default.max_rate),
    };
    let format = if range.format == SampleFormat::I16 { SampleFormat::I16 } else { SampleFormat::F32 };
    let frames = buffer_frames(sample_rate);
    let buffer = match range.buffer {
        Some((lo, hi)) if lo <= frames && frames <= hi => BufferSize::Fixed(frames),
        _ => BufferSize::Default,
    };
    OutputPlan { format, channels: range.channels.max(1), sample_rate, buffer }
}

#[inline(always)]
fn buffer_range(size: &SupportedBufferSize) -> Option<(u32, u32)> {
    match size {
        SupportedBufferSize::Range { min, max } => Some((*min, *max)),
        SupportedBufferSize::Unknown => None,
    }
}

/// Stereo source frame to device channel `c`. Mono devices get the mix,
/// extra channels stay silent.
#[inline(always)]
fn map_channel(frame: [f32; 2], channels: usize, c: usize) -> f32 {
    let s = match (channels, c) {
        (1, _) => (frame[0] + frame[1]) * 0.5,
        (_, 0) => frame[0],
        (_, 1) => frame[1],
        _ => 0.0,
    };
    s.clamp(-1.0, 1.0)
}

/// Nearest-sample rate conversion between the source and the device.
#[derive(Clone, Copy, Debug)]
struct Stride {
    ratio: f64,
    carry: f64,
}

impl Stride {
    fn new(source_rate: u32, device_rate: u32) -> Self {
        Self { ratio: source_rate as f64 / device_rate.max(1) as f64, carry: 0.0 }
    }

    /// Source frames to pull for `out_frames` device frames.
    fn source_frames(&mut self, out_frames: usize) -> usize {
        let exact = out_frames as f64 * self.ratio + self.carry;
        let n = exact.floor();
        self.carry = exact - n;
        n as usize
    }

    fn pick(&self, frames: &[[f32; 2]], i: usize) -> [f32; 2] {
        match frames.len() {
            0 => [0.0; 2],
            len => frames[((i as f64 * self.ratio) as usize).min(len - 1)],
        }
    }
}

/// Builds a device stream fed by `pull`, which appends the requested number
/// of stereo source frames in `[-1, 1]`.
fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    source_rate: u32,
    mut pull: impl FnMut(usize, &mut Vec<[f32; 2]>) + Send + 'static,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut stride = Stride::new(source_rate, config.sample_rate.0);
    let mut frames: Vec<[f32; 2]> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let n = stride.source_frames(data.len() / channels);
            frames.clear();
            pull(n, &mut frames);
            for (i, out) in data.chunks_exact_mut(channels).enumerate() {
                let frame = stride.pick(&frames, i);
                for (c, sample) in out.iter_mut().enumerate() {
                    *sample = map_channel(frame, channels, c).to_sample::<T>();
                }
            }
        },
        |err| error!("Audio stream error: {}", err),
        None,
    )
}

type SfxVoice = (Arc<Vec<i16>>, usize, f32);

struct SfxMixer {
    _stream: Stream,
    sender: Sender<SfxVoice>,
    sample_rate: u32,
}

/// `cpal` output on the default device. Each opened stream gets its own
/// device stream, ≈25 ms buffered where the device allows a fixed size.
pub struct CpalBackend {
    device: cpal::Device,
    streams: Vec<Stream>,
    volume: Arc<AtomicU32>,
    sfx: Option<SfxMixer>,
}

impl CpalBackend {
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        info!(
            "Audio backend using device '{}'",
            device.name().unwrap_or_else(|_| "<unnamed>".to_string())
        );
        Ok(Self {
            device,
            streams: Vec::new(),
            volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            sfx: None,
        })
    }

    fn plan_for(&self, source_rate: u32) -> Result<OutputPlan, AudioError> {
        let supported: Vec<ConfigRange> = match self.device.supported_output_configs() {
            Ok(ranges) => ranges
                .map(|r| ConfigRange {
                    format: r.sample_format(),
                    channels: r.channels(),
                    min_rate: r.min_sample_rate().0,
                    max_rate: r.max_sample_rate().0,
                    buffer: buffer_range(r.buffer_size()),
                })
                .collect(),
            Err(e) => {
                warn!("Could not list output configs ({}), using the device default.", e);
                Vec::new()
            }
        };
        let default = self.device.default_output_config()?;
        let default = ConfigRange {
            format: default.sample_format(),
            channels: default.channels(),
            min_rate: default.sample_rate().0,
            max_rate: default.sample_rate().0,
            buffer: buffer_range(default.buffer_size()),
        };
        let plan = plan_output(&supported, default, source_rate);
        if plan.sample_rate != source_rate {
            info!("Device runs at {} Hz; resampling {} Hz source.", plan.sample_rate, source_rate);
        }
        Ok(plan)
    }

    fn open_output(
        &self,
        source_rate: u32,
        pull: impl FnMut(usize, &mut Vec<[f32; 2]>) + Send + 'static,
    ) -> Result<(Stream, OutputPlan), AudioError> {
        let plan = self.plan_for(source_rate)?;
        let config = StreamConfig {
            channels: plan.channels,
            sample_rate: SampleRate(plan.sample_rate),
            buffer_size: plan.buffer,
        };
        let stream = match plan.format {
            SampleFormat::I16 => build_output::<i16>(&self.device, &config, source_rate, pull)?,
            _ => build_output::<f32>(&self.device, &config, source_rate, pull)?,
        };
        stream.play()?;
        Ok((stream, plan))
    }

    fn open_sfx_mixer(&self, sample_rate: u32) -> Result<SfxMixer, AudioError> {
        let (sender, receiver) = channel::<SfxVoice>();
        let mut active: Vec<SfxVoice> = Vec::new();
        let (stream, _) = self.open_output(sample_rate, move |n, frames| {
            active.extend(receiver.try_iter());
            frames.resize(n, [0.0; 2]);
            active.retain_mut(|(samples, cursor, gain)| {
                for f in frames.iter_mut() {
                    if *cursor + 1 >= samples.len() {
                        break;
                    }
                    f[0] += samples[*cursor] as f32 / 32768.0 * *gain;
                    f[1] += samples[*cursor + 1] as f32 / 32768.0 * *gain;
                    *cursor += 2;
                }
                *cursor + 1 < samples.len()
            });
        })?;
        info!("Sfx mixer opened at {} Hz", sample_rate);
        Ok(SfxMixer { _stream: stream, sender, sample_rate })
    }
}

impl AudioBackend for CpalBackend {
    fn open_stream(&mut self, source: AudioStream, sample_rate: u32) -> Result<(), AudioError> {
        let volume = self.volume.clone();
        let mut scratch: Vec<u8> = Vec::new();
        let (stream, plan) = self.open_output(sample_rate, move |n, frames| {
            scratch.resize(n * stream::FRAME_BYTES, 0);
            source.read(&mut scratch);
            let gain = f32::from_bits(volume.load(Ordering::Relaxed)) / 32768.0;
            frames.extend(scratch.chunks_exact(stream::FRAME_BYTES).map(|b| {
                [
                    i16::from_le_bytes([b[0], b[1]]) as f32 * gain,
                    i16::from_le_bytes([b[2], b[3]]) as f32 * gain,
                ]
            }));
        })?;
        info!(
            "Audio stream opened ({} Hz source, device {} Hz {} ch {:?}, buffer {:?}).",
            sample_rate, plan.sample_rate, plan.channels, plan.format, plan.buffer
        );
        self.streams.push(stream);
        Ok(())
    }

    fn close_all(&mut self) {
        if !self.streams.is_empty() {
            info!("Closing {} audio stream(s).", self.streams.len());
        }
        self.streams.clear();
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume.store(volume.clamp(0.0, 2.0).to_bits(), Ordering::Relaxed);
    }

    fn play_sfx(&mut self, sfx: &Pcm, volume: f32) {
        if self.sfx.is_none() {
            match self.open_sfx_mixer(sfx.sample_rate) {
                Ok(mixer) => self.sfx = Some(mixer),
                Err(e) => {
                    warn!("Failed to open sfx mixer: {}", e);
                    return;
                }
            }
        }
        if let Some(mixer) = &self.sfx {
            if mixer.sample_rate != sfx.sample_rate {
                warn!(
                    "Sfx at {} Hz played through {} Hz mixer; pitch will shift",
                    sfx.sample_rate, mixer.sample_rate
                );
            }
            let _ = mixer.sender.send((Arc::new(sfx.samples()), 0, volume.clamp(0.0, 2.0)));
        }
    }
}

/// Backend that opens nothing. Streams are kept so a caller can pull them by
/// hand; used by tests and when no output device exists.
#[derive(Default)]
pub struct NullBackend {
    pub streams: Vec<(AudioStream, u32)>,
    pub sfx_played: usize,
    pub volume: f32,
}

impl AudioBackend for NullBackend {
    fn open_stream(&mut self, source: AudioStream, sample_rate: u32) -> Result<(), AudioError> {
        self.streams.push((source, sample_rate));
        Ok(())
    }

    fn close_all(&mut self) {
        self.streams.clear();
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn play_sfx(&mut self, _sfx: &Pcm, _volume: f32) {
        self.sfx_played += 1;
    }
}

/// Instrumental plus optional voices, kept in lock-step.
pub struct MusicTracks {
    pub inst: AudioStream,
    pub voices: Option<AudioStream>,
}

impl MusicTracks {
    pub fn new(inst: &Pcm, voices: Option<&Pcm>) -> Self {
        Self {
            inst: AudioStream::with_pcm(inst.bytes.clone(), inst.sample_rate),
            voices: voices.map(|v| AudioStream::with_pcm(v.bytes.clone(), v.sample_rate)),
        }
    }

    fn each(&self) -> impl Iterator<Item = &AudioStream> {
        std::iter::once(&self.inst).chain(self.voices.iter())
    }

    pub fn attach(&self, backend: &mut dyn AudioBackend) -> Result<(), AudioError> {
        for s in self.each() {
            backend.open_stream(s.clone(), s.sample_rate())?;
        }
        Ok(())
    }

    pub fn play(&self) {
        self.each().for_each(AudioStream::play);
    }

    pub fn pause(&self) {
        self.each().for_each(AudioStream::pause);
    }

    pub fn set_speed(&self, speed: f64) {
        self.each().for_each(|s| s.set_speed(speed));
    }

    pub fn set_position(&self, t: MusicTime) {
        self.each().for_each(|s| s.set_position(t));
    }

    pub fn position(&self) -> MusicTime {
        self.inst.position()
    }

    pub fn duration(&self) -> MusicTime {
        self.inst.duration()
    }

    pub fn speed(&self) -> f64 {
        self.inst.speed()
    }

    pub fn is_playing(&self) -> bool {
        self.inst.is_playing()
    }

    pub fn is_drained(&self) -> bool {
        self.inst.is_drained()
    }

    /// Pulls `wall` worth of sample-frames from every track, as the device
    /// callbacks would. Drives playback without an output device.
    pub fn pull_for(&self, wall: Duration) {
        for s in self.each() {
            let frames = (wall.as_secs_f64() * s.sample_rate() as f64).round() as usize;
            let mut buf = vec![0u8; frames * stream::FRAME_BYTES];
            s.read(&mut buf);
        }
    }
}

impl PositionSource for MusicTracks {
    fn position(&self) -> MusicTime {
        MusicTracks::position(self)
    }
    fn is_playing(&self) -> bool {
        MusicTracks::is_playing(self)
    }
    fn speed(&self) -> f64 {
        MusicTracks::speed(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(frames: usize, rate: u32) -> Pcm {
        Pcm { bytes: Arc::from(vec![0u8; frames * 4]), sample_rate: rate }
    }

    #[test]
    fn buffer_is_about_25ms() {
        assert_eq!(buffer_frames(44_100), 1102);
        assert_eq!(buffer_frames(48_000), 1200);
    }

    fn range(format: SampleFormat, channels: u16, rate: (u32, u32), buffer: Option<(u32, u32)>) -> ConfigRange {
        ConfigRange { format, channels, min_rate: rate.0, max_rate: rate.1, buffer }
    }

    #[test]
    fn i16_stereo_at_source_rate_is_preferred() {
        let supported = [
            range(SampleFormat::F32, 2, (8_000, 192_000), Some((64, 4096))),
            range(SampleFormat::I16, 2, (8_000, 96_000), Some((64, 4096))),
        ];
        let default = range(SampleFormat::F32, 2, (48_000, 48_000), Some((64, 4096)));
        let plan = plan_output(&supported, default, 44_100);
        assert_eq!(plan.format, SampleFormat::I16);
        assert_eq!(plan.channels, 2);
        assert_eq!(plan.sample_rate, 44_100);
        assert_eq!(plan.buffer, BufferSize::Fixed(1102));
    }

    #[test]
    fn f32_only_device_falls_back_to_default() {
        let supported = [range(SampleFormat::F32, 6, (48_000, 48_000), None)];
        let default = range(SampleFormat::F32, 6, (48_000, 48_000), None);
        let plan = plan_output(&supported, default, 44_100);
        assert_eq!(plan.format, SampleFormat::F32);
        assert_eq!(plan.channels, 6);
        assert_eq!(plan.sample_rate, 48_000);
        assert_eq!(plan.buffer, BufferSize::Default);
    }

    #[test]
    fn odd_default_format_is_written_as_f32() {
        let default = range(SampleFormat::U16, 1, (22_050, 22_050), Some((64, 512)));
        let plan = plan_output(&[], default, 44_100);
        assert_eq!(plan.format, SampleFormat::F32);
        assert_eq!(plan.channels, 1);
        assert_eq!(plan.sample_rate, 22_050);
        // 551 frames is past the accepted maximum.
        assert_eq!(plan.buffer, BufferSize::Default);
    }

    #[test]
    fn mono_mix_and_surround_silence() {
        let frame = [0.5, -0.25];
        assert_eq!(map_channel(frame, 1, 0), 0.125);
        assert_eq!(map_channel(frame, 2, 0), 0.5);
        assert_eq!(map_channel(frame, 2, 1), -0.25);
        assert_eq!(map_channel(frame, 6, 1), -0.25);
        assert_eq!(map_channel(frame, 6, 4), 0.0);
        assert_eq!(map_channel([1.5, -3.0], 2, 1), -1.0);
    }

    #[test]
    fn stride_pulls_source_rate_worth_of_frames() {
        let mut stride = Stride::new(44_100, 48_000);
        let pulled: usize = (0..40).map(|_| stride.source_frames(1200)).sum();
        assert!((44_099..=44_100).contains(&pulled), "pulled {}", pulled);

        let frames = [[0.0, 0.0], [1.0, 1.0]];
        assert_eq!(stride.pick(&frames, 1), [0.0, 0.0]);
        assert_eq!(stride.pick(&frames, 99), [1.0, 1.0]);
        assert_eq!(stride.pick(&[], 0), [0.0, 0.0]);
    }

    #[test]
    fn tracks_move_together() {
        let tracks = MusicTracks::new(&silence(44_100, 44_100), Some(&silence(44_100, 44_100)));
        tracks.set_speed(1.5);
        tracks.set_position(MusicTime::from_millis(500));
        let voices = tracks.voices.as_ref().unwrap();
        assert_eq!(voices.speed(), 1.5);
        assert_eq!(voices.position(), tracks.position());
    }

    #[test]
    fn attach_opens_one_stream_per_track() {
        let tracks = MusicTracks::new(&silence(100, 22_050), None);
        let mut backend = NullBackend::default();
        tracks.attach(&mut backend).unwrap();
        assert_eq!(backend.streams.len(), 1);
        assert_eq!(backend.streams[0].1, 22_050);
    }

    #[test]
    fn pulling_advances_both_tracks() {
        let tracks = MusicTracks::new(&silence(1000, 1000), Some(&silence(2000, 2000)));
        tracks.play();
        tracks.pull_for(Duration::from_millis(250));
        assert_eq!(tracks.position(), MusicTime::from_millis(250));
        assert_eq!(tracks.voices.as_ref().unwrap().position(), MusicTime::from_millis(250));
        tracks.pull_for(Duration::from_secs(1));
        assert!(tracks.is_drained());
    }
}

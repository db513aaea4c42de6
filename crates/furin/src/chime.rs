//! Chime playback.
//!
//! The chime sound is decoded once at startup (a missing or corrupt file
//! fails fast instead of at the first windy poll) and held as interleaved
//! f32 PCM. Playback opens the output device per ring and runs on a
//! blocking thread so the poll loop is never stalled by audio.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::ChimeConfig;
use crate::weather::CurrentConditions;

/// Chime errors
#[derive(Debug, thiserror::Error)]
pub enum ChimeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
}

impl From<SymphoniaError> for ChimeError {
    fn from(err: SymphoniaError) -> Self {
        ChimeError::Decode(err.to_string())
    }
}

/// Decoded chime: interleaved f32 PCM plus its layout.
#[derive(Debug, Clone)]
pub struct ChimeSound {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl ChimeSound {
    /// Decode a sound file (mp3 or wav) into interleaved f32 PCM.
    pub fn load(path: &Path) -> Result<Self, ChimeError> {
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| ChimeError::Decode("no decodable audio track".to_string()))?;
        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut channels = 0u16;
        let mut sample_rate = 0u32;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }
            match decoder.decode(&packet) {
                Ok(decoded) => {
                    if sample_buf.is_none() {
                        let spec = *decoded.spec();
                        channels = spec.channels.count() as u16;
                        sample_rate = spec.rate;
                        sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = &mut sample_buf {
                        buf.copy_interleaved_ref(decoded);
                        samples.extend_from_slice(buf.samples());
                    }
                }
                // A malformed packet is skippable; keep whatever decodes.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if samples.is_empty() || channels == 0 || sample_rate == 0 {
            return Err(ChimeError::Decode(format!(
                "{}: decoded no audio",
                path.display()
            )));
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Synthesized fallback strike: a decaying sine with one inharmonic
    /// partial, roughly the voice of a small glass wind chime.
    pub fn strike(sample_rate: u32) -> Self {
        const DURATION_SECS: f32 = 1.5;
        const FUNDAMENTAL_HZ: f32 = 1568.0;
        // First free-bar overtone sits near 2.76x the fundamental.
        const PARTIAL_RATIO: f32 = 2.76;

        let frames = (sample_rate as f32 * DURATION_SECS) as usize;
        let mut samples = Vec::with_capacity(frames);
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let envelope = (-4.0 * t).exp();
            let tone = (std::f32::consts::TAU * FUNDAMENTAL_HZ * t).sin()
                + 0.4 * (std::f32::consts::TAU * FUNDAMENTAL_HZ * PARTIAL_RATIO * t).sin();
            samples.push(0.3 * envelope * tone);
        }
        Self {
            samples,
            channels: 1,
            sample_rate,
        }
    }

    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / self.channels.max(1) as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Something the monitor can ring when the wind crosses the threshold.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn ring(&self, conditions: &CurrentConditions) -> Result<(), ChimeError>;
}

/// Plays the decoded chime through the output device.
pub struct ChimeNotifier {
    sound: Arc<ChimeSound>,
    output_device: Option<String>,
    gain: f32,
}

impl ChimeNotifier {
    /// Decode the configured sound, falling back to the synthesized
    /// strike when the file is missing or undecodable.
    pub fn from_config(config: &ChimeConfig) -> Self {
        let sound = match ChimeSound::load(&config.sound) {
            Ok(sound) => {
                log::info!(
                    "Chime loaded: {} ({:.1}s, {} Hz)",
                    config.sound.display(),
                    sound.duration().as_secs_f32(),
                    sound.sample_rate
                );
                sound
            }
            Err(e) => {
                log::warn!(
                    "Could not load chime '{}' ({}), using synthesized strike",
                    config.sound.display(),
                    e
                );
                ChimeSound::strike(44100)
            }
        };
        Self {
            sound: Arc::new(sound),
            output_device: config.output_device.clone(),
            gain: config.gain,
        }
    }
}

#[async_trait::async_trait]
impl Notifier for ChimeNotifier {
    async fn ring(&self, _conditions: &CurrentConditions) -> Result<(), ChimeError> {
        let sound = self.sound.clone();
        let device = self.output_device.clone();
        let gain = self.gain;
        tokio::task::spawn_blocking(move || play_blocking(&sound, device.as_deref(), gain))
            .await
            .map_err(|e| ChimeError::Stream(format!("playback task failed: {}", e)))?
    }
}

#[async_trait::async_trait]
impl Notifier for Box<dyn Notifier> {
    async fn ring(&self, conditions: &CurrentConditions) -> Result<(), ChimeError> {
        self.as_ref().ring(conditions).await
    }
}

/// Log-only notifier for `--silent` runs and tests.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn ring(&self, conditions: &CurrentConditions) -> Result<(), ChimeError> {
        log::info!(
            "*DING* (silent mode, wind {:.1} m/s)",
            conditions.wind_speed_mps
        );
        Ok(())
    }
}

/// Get output device by name, or default if name is None
fn get_output_device(name: Option<&str>) -> Result<cpal::Device, ChimeError> {
    let host = cpal::default_host();
    match name {
        Some(device_name) => {
            let devices = host
                .output_devices()
                .map_err(|e| ChimeError::Device(format!("Failed to enumerate devices: {}", e)))?;
            for device in devices {
                if let Ok(n) = device.name() {
                    if n == device_name {
                        return Ok(device);
                    }
                }
            }
            Err(ChimeError::Device(format!(
                "Device '{}' not found",
                device_name
            )))
        }
        None => host
            .default_output_device()
            .ok_or_else(|| ChimeError::Device("No default output device found".to_string())),
    }
}

/// Pick a stream config, preferring the sound's native rate and layout.
fn output_config(
    device: &cpal::Device,
    preferred_rate: u32,
    preferred_channels: u16,
) -> Result<cpal::StreamConfig, ChimeError> {
    let supported = device
        .supported_output_configs()
        .map_err(|e| ChimeError::Device(format!("Failed to get supported configs: {}", e)))?;

    for config in supported {
        let min_rate = config.min_sample_rate().0;
        let max_rate = config.max_sample_rate().0;
        if preferred_rate >= min_rate
            && preferred_rate <= max_rate
            && config.channels() >= preferred_channels
        {
            return Ok(cpal::StreamConfig {
                channels: config.channels().min(2).max(preferred_channels),
                sample_rate: cpal::SampleRate(preferred_rate),
                buffer_size: cpal::BufferSize::Default,
            });
        }
    }

    // Fall back to the device default and resample into it.
    let default_config = device
        .default_output_config()
        .map_err(|e| ChimeError::Device(format!("Failed to get default config: {}", e)))?;
    Ok(cpal::StreamConfig {
        channels: default_config.channels().min(2),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    })
}

/// Play the whole sound and block until it finishes (or a hard cap).
fn play_blocking(
    sound: &ChimeSound,
    device_name: Option<&str>,
    gain: f32,
) -> Result<(), ChimeError> {
    let device = get_output_device(device_name)?;
    let config = output_config(&device, sound.sample_rate, sound.channels.min(2))?;

    let out_channels = config.channels as usize;
    let src_channels = sound.channels as usize;
    let samples = if config.sample_rate.0 == sound.sample_rate {
        sound.samples.clone()
    } else {
        resample_linear(
            &sound.samples,
            src_channels,
            sound.sample_rate,
            config.sample_rate.0,
        )
    };

    let done = Arc::new(AtomicBool::new(false));
    let done_cb = done.clone();
    let mut cursor = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if fill_output(data, out_channels, &samples, src_channels, &mut cursor, gain) {
                    done_cb.store(true, Ordering::Relaxed);
                }
            },
            |err| log::warn!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| ChimeError::Stream(e.to_string()))?;
    stream
        .play()
        .map_err(|e| ChimeError::Stream(e.to_string()))?;

    // Wait for the callback to drain the buffer; cap in case the device
    // stalls so a stuck chime cannot wedge the blocking pool.
    let cap = sound.duration() * 2 + Duration::from_millis(500);
    let start = Instant::now();
    while !done.load(Ordering::Relaxed) && start.elapsed() < cap {
        std::thread::sleep(Duration::from_millis(20));
    }
    Ok(())
}

/// Fill an interleaved output buffer from the source, advancing `cursor`
/// (in source frames). Mono sources fan out to every output channel;
/// extra output channels repeat the last source channel. Returns true
/// once the source is exhausted.
fn fill_output(
    output: &mut [f32],
    out_channels: usize,
    source: &[f32],
    src_channels: usize,
    cursor: &mut usize,
    gain: f32,
) -> bool {
    for frame in output.chunks_mut(out_channels) {
        let base = *cursor * src_channels;
        if base + src_channels > source.len() {
            for sample in frame.iter_mut() {
                *sample = 0.0;
            }
            continue;
        }
        for (ch, sample) in frame.iter_mut().enumerate() {
            let src_idx = base + ch.min(src_channels - 1);
            *sample = (source[src_idx] * gain).clamp(-1.0, 1.0);
        }
        *cursor += 1;
    }
    (*cursor + 1) * src_channels > source.len()
}

/// Linear-interpolation resampler. Good enough for a one-shot chime;
/// anything fancier belongs to a real DSP crate.
fn resample_linear(source: &[f32], channels: usize, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || source.is_empty() || channels == 0 {
        return source.to_vec();
    }
    let src_frames = source.len() / channels;
    let out_frames = (src_frames as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_frames * channels);
    let step = from_rate as f64 / to_rate as f64;
    for frame in 0..out_frames {
        let pos = frame as f64 * step;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let next = (idx + 1).min(src_frames - 1);
        for ch in 0..channels {
            let a = source[idx * channels + ch];
            let b = source[next * channels + ch];
            out.push(a + (b - a) * frac);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    #[test]
    fn strike_is_mono_and_bounded() {
        let sound = ChimeSound::strike(44100);
        assert_eq!(sound.channels, 1);
        assert_eq!(sound.sample_rate, 44100);
        assert_eq!(sound.samples.len(), (44100.0 * 1.5) as usize);
        assert!(peak(&sound.samples) <= 1.0);
    }

    #[test]
    fn strike_decays() {
        let sound = ChimeSound::strike(44100);
        let head = peak(&sound.samples[..4410]);
        let tail = peak(&sound.samples[sound.samples.len() - 4410..]);
        assert!(head > 10.0 * tail, "head {} tail {}", head, tail);
    }

    #[test]
    fn duration_accounts_for_channels() {
        let sound = ChimeSound {
            samples: vec![0.0; 88200],
            channels: 2,
            sample_rate: 44100,
        };
        assert!((sound.duration().as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fill_output_fans_mono_to_stereo() {
        let source = vec![0.5, -0.5];
        let mut output = vec![0.0f32; 8];
        let mut cursor = 0;
        let done = fill_output(&mut output, 2, &source, 1, &mut cursor, 1.0);
        assert!(done);
        assert_eq!(&output[..4], &[0.5, 0.5, -0.5, -0.5]);
        // Past the end: silence
        assert_eq!(&output[4..], &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn fill_output_applies_gain_and_clamps() {
        let source = vec![0.8];
        let mut output = vec![0.0f32; 2];
        let mut cursor = 0;
        fill_output(&mut output, 2, &source, 1, &mut cursor, 2.0);
        assert_eq!(output, vec![1.0, 1.0]);
    }

    #[test]
    fn fill_output_keeps_cursor_across_calls() {
        let source = vec![0.1, 0.2, 0.3, 0.4];
        let mut cursor = 0;
        let mut first = vec![0.0f32; 2];
        assert!(!fill_output(&mut first, 1, &source, 1, &mut cursor, 1.0));
        let mut second = vec![0.0f32; 2];
        assert!(fill_output(&mut second, 1, &source, 1, &mut cursor, 1.0));
        assert_eq!(first, vec![0.1, 0.2]);
        assert_eq!(second, vec![0.3, 0.4]);
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let source = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&source, 1, 44100, 44100), source);
    }

    #[test]
    fn resample_doubles_frames() {
        let source: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let out = resample_linear(&source, 1, 22050, 44100);
        assert_eq!(out.len(), 200);
        // Interpolated midpoints sit between their neighbors
        assert!(out[1] > out[0] && out[1] < out[2]);
    }

    #[test]
    fn resample_preserves_channel_count() {
        let source = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let out = resample_linear(&source, 2, 48000, 24000);
        assert_eq!(out.len() % 2, 0);
        // Right channel stays at 1.0 after downsampling
        assert!(out.chunks(2).all(|frame| (frame[1] - 1.0).abs() < 1e-6));
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = ChimeSound::load(Path::new("/nonexistent/chime.mp3")).unwrap_err();
        assert!(matches!(err, ChimeError::Io(_)));
    }

    #[test]
    fn load_rejects_non_audio_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-audio.mp3");
        std::fs::write(&path, b"definitely not an mp3").unwrap();
        assert!(ChimeSound::load(&path).is_err());
    }
}

//! cpal-backed audio host: default (or named) input and output devices.
//!
//! cpal delivers capture and playback on two separate callbacks, so the
//! `CaptureCallback` is split: the input closure owns the raw ring's producer
//! and the output closure owns the denoised ring's consumer. Multi-channel
//! devices are down-mixed to mono on capture and the mono signal is copied to
//! every channel on playback, both through scratch buffers allocated before
//! the streams start.

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig, SupportedStreamConfigRange,
};
use tracing::{error, info, warn};

use super::{ActiveStream, AudioHost, CaptureCallback, CaptureInput, PlaybackOutput};
use crate::error::{DenoiseError, Result};

/// Mono frames converted per pass inside a callback.
const SCRATCH_FRAMES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

/// Host backed by the platform's default cpal host.
#[derive(Debug, Clone, Default)]
pub struct CpalHost {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer the input device with this exact name; falls back to the default.
    pub fn with_input_device(mut self, name: impl Into<String>) -> Self {
        self.input_device = Some(name.into());
        self
    }

    /// Prefer the output device with this exact name; falls back to the default.
    pub fn with_output_device(mut self, name: impl Into<String>) -> Self {
        self.output_device = Some(name.into());
        self
    }
}

impl AudioHost for CpalHost {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(&self, callback: CaptureCallback, sample_rate: u32) -> Result<Box<dyn ActiveStream>> {
        let host = cpal::default_host();
        let input_device = find_device(&host, self.input_device.as_deref(), Direction::Input)?;
        let output_device = find_device(&host, self.output_device.as_deref(), Direction::Output)?;

        let input_config = pick_config(&input_device, sample_rate, Direction::Input)?;
        let output_config = pick_config(&output_device, sample_rate, Direction::Output)?;

        let rate = input_config.sample_rate().0;
        if output_config.sample_rate().0 != rate {
            return Err(DenoiseError::CaptureUnavailable(format!(
                "input runs at {rate} Hz but output runs at {} Hz",
                output_config.sample_rate().0
            )));
        }

        info!(
            input = input_device.name().unwrap_or_default().as_str(),
            output = output_device.name().unwrap_or_default().as_str(),
            sample_rate = rate,
            input_channels = input_config.channels(),
            output_channels = output_config.channels(),
            "opening cpal duplex stream"
        );

        let (capture, playback) = callback.split();
        let input = build_input(&input_device, &input_config, capture)?;
        let output = build_output(&output_device, &output_config, playback)?;

        input
            .play()
            .map_err(|e| DenoiseError::CaptureUnavailable(e.to_string()))?;
        output
            .play()
            .map_err(|e| DenoiseError::CaptureUnavailable(e.to_string()))?;

        Ok(Box::new(CpalStream {
            input,
            output,
            sample_rate: rate,
        }))
    }
}

/// Keeps both cpal streams alive; dropping them releases the devices.
struct CpalStream {
    input: Stream,
    output: Stream,
    sample_rate: u32,
}

impl ActiveStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(self: Box<Self>) {
        if let Err(e) = self.input.pause() {
            warn!("failed to pause input stream: {e}");
        }
        if let Err(e) = self.output.pause() {
            warn!("failed to pause output stream: {e}");
        }
    }
}

fn find_device(host: &cpal::Host, preferred: Option<&str>, direction: Direction) -> Result<Device> {
    if let Some(preferred_name) = preferred {
        let devices = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        };
        match devices {
            Ok(devices) => {
                if let Some(device) = devices
                    .into_iter()
                    .find(|d| d.name().map(|n| n == preferred_name).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!(
                    "preferred {direction:?} device '{}' not found, falling back to default",
                    preferred_name
                );
            }
            Err(e) => warn!("failed to list {direction:?} devices: {e}"),
        }
    }

    let default = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    default.ok_or_else(|| {
        DenoiseError::CaptureUnavailable(format!("no default {direction:?} device"))
    })
}

/// Sample formats the host converts, most preferred first.
const FORMAT_PREFERENCE: [SampleFormat; 7] = [
    SampleFormat::F32,
    SampleFormat::I16,
    SampleFormat::I32,
    SampleFormat::F64,
    SampleFormat::U16,
    SampleFormat::U8,
    SampleFormat::I8,
];

fn is_supported_format(format: SampleFormat) -> bool {
    FORMAT_PREFERENCE.contains(&format)
}

/// First range, by format preference, that can run at `rate`.
fn choose_range(ranges: &[SupportedStreamConfigRange], rate: u32) -> Option<SupportedStreamConfig> {
    FORMAT_PREFERENCE.iter().find_map(|format| {
        ranges
            .iter()
            .find(|r| {
                r.sample_format() == *format
                    && r.min_sample_rate().0 <= rate
                    && rate <= r.max_sample_rate().0
            })
            .map(|r| r.clone().with_sample_rate(SampleRate(rate)))
    })
}

/// A config at `rate` in a convertible format; otherwise the device default.
fn pick_config(device: &Device, rate: u32, direction: Direction) -> Result<SupportedStreamConfig> {
    let ranges: Vec<SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().map(|c| c.collect()),
        Direction::Output => device.supported_output_configs().map(|c| c.collect()),
    }
    .map_err(|e| DenoiseError::CaptureUnavailable(e.to_string()))?;

    if let Some(config) = choose_range(&ranges, rate) {
        return Ok(config);
    }

    let fallback = match direction {
        Direction::Input => device.default_input_config(),
        Direction::Output => device.default_output_config(),
    }
    .map_err(|e| DenoiseError::CaptureUnavailable(e.to_string()))?;
    if !is_supported_format(fallback.sample_format()) {
        return Err(DenoiseError::CaptureUnavailable(format!(
            "{direction:?} device offers no usable sample format (default {:?})",
            fallback.sample_format()
        )));
    }
    warn!(
        requested = rate,
        actual = fallback.sample_rate().0,
        format = ?fallback.sample_format(),
        "{direction:?} device cannot run at the session rate, using its default config"
    );
    Ok(fallback)
}

fn build_input(
    device: &Device,
    supported: &SupportedStreamConfig,
    capture: CaptureInput,
) -> Result<Stream> {
    let config = supported.config();
    match supported.sample_format() {
        SampleFormat::I8 => input_stream::<i8>(device, &config, capture),
        SampleFormat::I16 => input_stream::<i16>(device, &config, capture),
        SampleFormat::I32 => input_stream::<i32>(device, &config, capture),
        SampleFormat::U8 => input_stream::<u8>(device, &config, capture),
        SampleFormat::U16 => input_stream::<u16>(device, &config, capture),
        SampleFormat::F32 => input_stream::<f32>(device, &config, capture),
        SampleFormat::F64 => input_stream::<f64>(device, &config, capture),
        fmt => Err(DenoiseError::CaptureUnavailable(format!(
            "unsupported input sample format: {fmt:?}"
        ))),
    }
}

fn input_stream<T>(device: &Device, config: &StreamConfig, mut capture: CaptureInput) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut mono = vec![0f32; SCRATCH_FRAMES];
    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                for frames in data.chunks(SCRATCH_FRAMES * channels) {
                    let n = downmix(frames, channels, &mut mono);
                    capture.on_input(&mono[..n]);
                }
            },
            |err| error!("input stream error: {err}"),
            None,
        )
        .map_err(|e| DenoiseError::CaptureUnavailable(e.to_string()))
}

fn build_output(
    device: &Device,
    supported: &SupportedStreamConfig,
    playback: PlaybackOutput,
) -> Result<Stream> {
    let config = supported.config();
    match supported.sample_format() {
        SampleFormat::I8 => output_stream::<i8>(device, &config, playback),
        SampleFormat::I16 => output_stream::<i16>(device, &config, playback),
        SampleFormat::I32 => output_stream::<i32>(device, &config, playback),
        SampleFormat::U8 => output_stream::<u8>(device, &config, playback),
        SampleFormat::U16 => output_stream::<u16>(device, &config, playback),
        SampleFormat::F32 => output_stream::<f32>(device, &config, playback),
        SampleFormat::F64 => output_stream::<f64>(device, &config, playback),
        fmt => Err(DenoiseError::CaptureUnavailable(format!(
            "unsupported output sample format: {fmt:?}"
        ))),
    }
}

fn output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut playback: PlaybackOutput,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut mono = vec![0f32; SCRATCH_FRAMES];
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info| {
                for frames in data.chunks_mut(SCRATCH_FRAMES * channels) {
                    let n = frames.len() / channels;
                    playback.on_output(&mut mono[..n]);
                    upmix(&mono[..n], frames, channels);
                }
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| DenoiseError::CaptureUnavailable(e.to_string()))
}

/// Average interleaved frames into `out`, returning the frame count written.
fn downmix<T>(interleaved: &[T], channels: usize, out: &mut [f32]) -> usize
where
    T: Sample,
    f32: FromSample<T>,
{
    let frames = (interleaved.len() / channels).min(out.len());
    for (idx, slot) in out[..frames].iter_mut().enumerate() {
        let base = idx * channels;
        let sum: f32 = interleaved[base..base + channels]
            .iter()
            .map(|s| s.to_sample::<f32>())
            .sum();
        *slot = sum / channels as f32;
    }
    frames
}

/// Copy each mono sample, clipped to [-1, 1], to every channel of its frame.
fn upmix<T>(mono: &[f32], interleaved: &mut [T], channels: usize)
where
    T: Sample + FromSample<f32>,
{
    for (frame, sample) in interleaved.chunks_mut(channels).zip(mono) {
        frame.fill(T::from_sample(sample.clamp(-1.0, 1.0)));
    }
}

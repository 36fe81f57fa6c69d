//! # Audio Capture Module
//!
//! Real-time microphone capture using CPAL (Cross-Platform Audio Library).
//! Incoming samples are cut into overlapping, fixed-length frames and pushed
//! in arrival order onto a channel for the analysis thread.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::Sender;

use crate::config::CaptureConfig;

/// One block of mono samples, consumed by the pipeline as soon as it arrives.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Estimated arrival time of the frame's last sample.
    pub captured_at: Instant,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, captured_at: Instant) -> Self {
        Self { samples, sample_rate, captured_at }
    }
}

/// A complete frame cut by [`FrameAssembler`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledFrame {
    pub samples: Vec<f32>,
    /// Newer samples already buffered behind this frame when it was cut.
    pub trailing: usize,
}

/// Accumulates callback-sized chunks into overlapping frames.
///
/// Each emitted frame holds `frame_size` samples; consecutive frames start
/// `hop_size` samples apart.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    hop_size: usize,
    buffer: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, hop_size: usize) -> Self {
        let hop_size = hop_size.clamp(1, frame_size.max(1));
        Self {
            frame_size,
            hop_size,
            buffer: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Appends `data` and returns every frame that became complete.
    pub fn push(&mut self, data: &[f32]) -> Vec<AssembledFrame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_size {
            frames.push(AssembledFrame {
                samples: self.buffer[..self.frame_size].to_vec(),
                trailing: self.buffer.len() - self.frame_size,
            });
            self.buffer.drain(..self.hop_size);
        }
        frames
    }
}

/// Back-dates `callback_at` by the duration of `trailing` samples, giving the
/// arrival time of a frame's last sample.
pub fn frame_timestamp(callback_at: Instant, trailing: usize, sample_rate: u32) -> Instant {
    if sample_rate == 0 {
        return callback_at;
    }
    let behind = Duration::from_secs_f64(trailing as f64 / sample_rate as f64);
    callback_at.checked_sub(behind).unwrap_or(callback_at)
}

/// Starts audio capture from the default input device.
///
/// Frames are sent on `sender` in the order they were captured. The returned
/// stream must be kept alive (and on some platforms, on the thread that
/// created it) for capture to continue.
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Audio stream handle and the actual sample rate
/// * `Err(e)` - No device, no usable format, or the stream could not start
pub fn start_audio_capture(sender: Sender<AudioFrame>, config: &CaptureConfig) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host.default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    log::info!("[AUDIO] Using audio input device: {}", device.name().unwrap_or_else(|_| "<unnamed>".into()));

    let configs = device.supported_input_configs()
        .context("Failed to query input configurations")?
        .collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, config.sample_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let target = config.sample_rate.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let supported_config = supported_config.with_sample_rate(cpal::SampleRate(target));
    let sample_rate_val = supported_config.sample_rate().0;
    let channels = supported_config.channels() as usize;
    let stream_config: cpal::StreamConfig = supported_config.into();

    log::info!("[AUDIO] Selected sample rate: {} Hz, {} channel(s)", sample_rate_val, channels);

    let err_fn = |err| log::error!("[AUDIO] An error occurred on the audio stream: {}", err);

    let mut assembler = FrameAssembler::new(config.frame_size, config.hop_size);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Fold interleaved channels down to mono.
            let mono: Vec<f32> = if channels > 1 {
                data.chunks(channels)
                    .map(|c| c.iter().sum::<f32>() / channels as f32)
                    .collect()
            } else {
                data.to_vec()
            };

            let now = Instant::now();
            for frame in assembler.push(&mono) {
                let captured_at = frame_timestamp(now, frame.trailing, sample_rate_val);
                // A closed channel means the session is shutting down.
                let _ = sender.send(AudioFrame::new(frame.samples, sample_rate_val, captured_at));
            }
        },
        err_fn,
        None,
    ).context("Failed to build input stream")?;

    stream.play().context("Failed to start input stream")?;

    Ok((stream, sample_rate_val))
}

/// Picks the f32 configuration closest to `target_rate`, preferring mono.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
            let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
            let covers = c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0;
            let rate_penalty = if covers { 0 } else { min_diff.min(max_diff) };
            (rate_penalty, c.channels())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(frames: &[AssembledFrame]) -> Vec<Vec<f32>> {
        frames.iter().map(|f| f.samples.clone()).collect()
    }

    #[test]
    fn assembler_emits_overlapping_frames() {
        let mut assembler = FrameAssembler::new(4, 2);
        assert!(assembler.push(&[1.0, 2.0, 3.0]).is_empty());
        let frames = assembler.push(&[4.0, 5.0, 6.0]);
        assert_eq!(samples(&frames), vec![vec![1.0, 2.0, 3.0, 4.0], vec![3.0, 4.0, 5.0, 6.0]]);
        assert_eq!(frames[0].trailing, 2);
        assert_eq!(frames[1].trailing, 0);
        let frames = assembler.push(&[7.0]);
        assert!(frames.is_empty());
        let frames = assembler.push(&[8.0]);
        assert_eq!(samples(&frames), vec![vec![5.0, 6.0, 7.0, 8.0]]);
    }

    #[test]
    fn assembler_without_overlap() {
        let mut assembler = FrameAssembler::new(3, 3);
        let frames = assembler.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(samples(&frames), vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(frames.iter().map(|f| f.trailing).collect::<Vec<_>>(), vec![4, 1]);
    }

    #[test]
    fn frames_from_one_large_buffer_get_distinct_times() {
        let mut assembler = FrameAssembler::new(4096, 1024);
        let callback_at = Instant::now() + Duration::from_secs(1);
        let frames = assembler.push(&vec![0.0; 8192]);
        assert_eq!(frames.len(), 5);

        let times: Vec<Instant> = frames
            .iter()
            .map(|f| frame_timestamp(callback_at, f.trailing, 44_100))
            .collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*times.last().unwrap(), callback_at);
        // 4096 samples at 44.1 kHz is about 93 ms.
        let spread = callback_at - times[0];
        assert!((spread.as_secs_f64() - 4096.0 / 44_100.0).abs() < 1e-6);
    }

    #[test]
    fn zero_sample_rate_keeps_callback_time() {
        let now = Instant::now();
        assert_eq!(frame_timestamp(now, 512, 0), now);
    }
}

//! Audio output for synthesized speech
//!
//! Each playback builds its own output stream on the default device, runs
//! the buffer through a gain stage, and tears the stream down once the last
//! frame has been handed to the device.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Sample rate of Gemini TTS output.
pub const TTS_SAMPLE_RATE: u32 = 24_000;
/// Gemini TTS output is mono.
pub const TTS_CHANNELS: u16 = 1;

/// Extra wait past the nominal duration before giving up on the device.
const PLAYBACK_GRACE: Duration = Duration::from_secs(2);
/// Let the hardware drain its last period before dropping the stream.
const DRAIN_DELAY: Duration = Duration::from_millis(100);

/// Planar floating-point samples, one vector per channel, all the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self { sample_rate, channels }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    /// Sample for an output channel. Extra output channels repeat the last
    /// source channel, so mono fills every speaker.
    fn sample(&self, frame: usize, out_channel: usize) -> f32 {
        let source = out_channel.min(self.channels.len().saturating_sub(1));
        self.channels
            .get(source)
            .and_then(|c| c.get(frame))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Something that can play a buffer to completion. `play` blocks.
pub trait AudioSink: Send + Sync {
    fn play(&self, buffer: &AudioBuffer) -> Result<()>;
}

/// Play on the blocking pool and resolve once playback has finished.
pub async fn play_to_end(sink: Arc<dyn AudioSink>, buffer: AudioBuffer) -> Result<()> {
    tokio::task::spawn_blocking(move || sink.play(&buffer))
        .await
        .map_err(|e| Error::Playback(e.to_string()))?
}

/// Fill an interleaved output block from `buffer` starting at `position`.
/// Returns the new position; frames past the end are silence.
fn fill_interleaved<T: FromSample<f32>>(
    buffer: &AudioBuffer,
    position: usize,
    out: &mut [T],
    out_channels: usize,
    gain: f32,
) -> usize {
    let mut frame = position;
    for block in out.chunks_mut(out_channels) {
        for (channel, slot) in block.iter_mut().enumerate() {
            let sample = (buffer.sample(frame, channel) * gain).clamp(-1.0, 1.0);
            *slot = T::from_sample_(sample);
        }
        frame += 1;
    }
    frame.min(buffer.frame_count())
}

/// Output configurations to try, in order: float before 16-bit integer, and
/// for mono sources the native layout before stereo.
fn stream_attempts(requested_channels: u16) -> Vec<(SampleFormat, u16)> {
    let mut layouts = vec![requested_channels.max(1)];
    if requested_channels < 2 {
        layouts.push(2);
    }
    [SampleFormat::F32, SampleFormat::I16]
        .into_iter()
        .flat_map(|format| layouts.iter().map(move |&channels| (format, channels)))
        .collect()
}

struct PlaybackState {
    buffer: AudioBuffer,
    position: usize,
    done: Option<mpsc::SyncSender<()>>,
}

/// Default output device through cpal.
pub struct CpalSink {
    gain: f32,
}

impl CpalSink {
    pub fn new() -> Self {
        Self { gain: 1.0 }
    }

    fn open_stream(
        &self,
        device: &cpal::Device,
        state: &Arc<Mutex<PlaybackState>>,
        sample_rate: u32,
        requested_channels: u16,
    ) -> Result<cpal::Stream> {
        let mut last_error = None;
        for (format, channels) in stream_attempts(requested_channels) {
            let built = match format {
                SampleFormat::I16 => self.build_stream::<i16>(device, state.clone(), sample_rate, channels),
                _ => self.build_stream::<f32>(device, state.clone(), sample_rate, channels),
            };
            match built {
                Ok(stream) => {
                    debug!(?format, channels, "output stream opened");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(?format, channels, "output config rejected: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(Error::Playback(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no usable output configuration".to_string()),
        ))
    }

    fn build_stream<T>(
        &self,
        device: &cpal::Device,
        state: Arc<Mutex<PlaybackState>>,
        sample_rate: u32,
        out_channels: u16,
    ) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let config = cpal::StreamConfig {
            channels: out_channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let gain = self.gain;
        let channels = out_channels as usize;

        device.build_output_stream(
            &config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let Ok(mut state) = state.lock() else {
                    data.fill(T::EQUILIBRIUM);
                    return;
                };
                let position = fill_interleaved(&state.buffer, state.position, data, channels, gain);
                state.position = position;
                if position >= state.buffer.frame_count() {
                    if let Some(done) = state.done.take() {
                        let _ = done.try_send(());
                    }
                }
            },
            |err| warn!("audio output error: {}", err),
            None,
        )
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for CpalSink {
    fn play(&self, buffer: &AudioBuffer) -> Result<()> {
        if buffer.frame_count() == 0 {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no audio output device found".to_string()))?;

        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let state = Arc::new(Mutex::new(PlaybackState {
            buffer: buffer.clone(),
            position: 0,
            done: Some(done_tx),
        }));

        let stream = self.open_stream(&device, &state, buffer.sample_rate, buffer.num_channels() as u16)?;

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        let timeout = buffer.duration() + PLAYBACK_GRACE;
        if done_rx.recv_timeout(timeout).is_err() {
            warn!("playback did not finish within {:?}", timeout);
        }
        std::thread::sleep(DRAIN_DELAY);
        drop(stream);
        Ok(())
    }
}

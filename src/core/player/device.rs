//! cpal-backed audio output.
//!
//! A small software mixer renders every scheduled buffer at its start
//! frame on a shared frame counter, which doubles as the output clock.
//! The counter only advances while the output is not suspended, so the
//! clock freezes across pause/resume. The cpal stream itself is owned by
//! a dedicated thread because it cannot move between threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::decode::AudioBuffer;
use crate::core::player::errors::{PlayerError, PlayerResult};
use crate::core::player::timeline::{AudioOutput, AudioOutputFactory};

struct Scheduled {
    start_frame: u64,
    samples: Vec<f32>,
}

struct MixerState {
    scheduled: Vec<Scheduled>,
    /// Frames rendered while running; the output clock.
    frame: u64,
    paused: bool,
}

impl MixerState {
    /// Renders one mono frame and advances the clock.
    fn next_frame(&mut self) -> f32 {
        if self.paused {
            return 0.0;
        }
        let frame = self.frame;
        let mut sample = 0.0f32;
        self.scheduled.retain(|entry| {
            if frame < entry.start_frame {
                return true;
            }
            let offset = (frame - entry.start_frame) as usize;
            if offset >= entry.samples.len() {
                return false;
            }
            sample += entry.samples[offset];
            true
        });
        self.frame += 1;
        sample.clamp(-1.0, 1.0)
    }
}

/// Linear resampling onto the device rate.
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    let output_len = ((samples.len() as f64) / ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < samples.len() {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < samples.len() {
            samples[src_idx]
        } else {
            0.0
        };
        output.push(sample);
    }
    output
}

/// Default-device output; one instance per session.
pub struct DeviceOutput {
    state: Arc<Mutex<MixerState>>,
    sample_rate: u32,
    closed: AtomicBool,
    shutdown: mpsc::Sender<()>,
}

impl DeviceOutput {
    pub fn open() -> PlayerResult<Arc<Self>> {
        let state = Arc::new(Mutex::new(MixerState {
            scheduled: Vec::new(),
            frame: 0,
            paused: false,
        }));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();

        let stream_state = Arc::clone(&state);
        std::thread::spawn(move || {
            let build = || -> Result<(cpal::Stream, u32), String> {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or_else(|| "no default output device".to_string())?;
                let config = device
                    .default_output_config()
                    .map_err(|e| e.to_string())?;
                let sample_rate = config.sample_rate().0;
                let channels = usize::from(config.channels());

                let stream = device
                    .build_output_stream(
                        &config.config(),
                        move |data: &mut [f32], _| {
                            let mut state = stream_state.lock();
                            for frame in data.chunks_mut(channels) {
                                let sample = state.next_frame();
                                frame.fill(sample);
                            }
                        },
                        |e| warn!("audio output stream error: {e}"),
                        None,
                    )
                    .map_err(|e| e.to_string())?;
                stream.play().map_err(|e| e.to_string())?;
                Ok((stream, sample_rate))
            };

            match build() {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    // Hold the stream until close or drop of the handle.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("audio output stream released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| PlayerError::OutputUnavailable("output thread died".to_string()))?
            .map_err(PlayerError::OutputUnavailable)?;

        Ok(Arc::new(Self {
            state,
            sample_rate,
            closed: AtomicBool::new(false),
            shutdown: shutdown_tx,
        }))
    }
}

impl AudioOutput for DeviceOutput {
    fn now(&self) -> f64 {
        let frame = self.state.lock().frame;
        frame as f64 / f64::from(self.sample_rate)
    }

    fn schedule(&self, buffer: AudioBuffer, start: f64) {
        let samples = resample(&buffer.samples, buffer.sample_rate, self.sample_rate);
        let start_frame = (start.max(0.0) * f64::from(self.sample_rate)) as u64;
        self.state.lock().scheduled.push(Scheduled {
            start_frame,
            samples,
        });
    }

    fn suspend(&self) {
        self.state.lock().paused = true;
    }

    fn resume(&self) {
        self.state.lock().paused = false;
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown.send(());
        }
    }
}

/// Opens a [`DeviceOutput`] per session.
pub struct DeviceOutputFactory;

impl AudioOutputFactory for DeviceOutputFactory {
    fn open(&self) -> PlayerResult<Arc<dyn AudioOutput>> {
        let output: Arc<dyn AudioOutput> = DeviceOutput::open()?;
        Ok(output)
    }
}

//! Decoding of synthesized audio into playable buffers.
//!
//! The service returns WAV; buffers are normalized to mono f32 so the
//! scheduler can apply gain envelopes directly to the samples.

use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("malformed audio: {0}")]
    Malformed(String),

    #[error("unsupported sample format: {0}")]
    Unsupported(String),
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Decoded, playable audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Mono samples in [-1, 1].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Applies linear gain ramps: 0→1 over `fade_in` seconds from the
    /// start and 1→0 over `fade_out` seconds ending at the last sample.
    /// Ramp lengths are clamped to the buffer.
    pub fn apply_fades(&mut self, fade_in: f64, fade_out: f64) {
        let len = self.samples.len();
        let rate = f64::from(self.sample_rate);

        let in_len = ((fade_in * rate) as usize).min(len);
        for i in 0..in_len {
            self.samples[i] *= i as f32 / in_len as f32;
        }

        let out_len = ((fade_out * rate) as usize).min(len);
        for i in 0..out_len {
            let idx = len - out_len + i;
            self.samples[idx] *= (out_len - i) as f32 / out_len as f32;
        }
    }
}

/// Decodes WAV bytes into a mono [`AudioBuffer`].
///
/// Integer and float PCM are supported; multi-channel audio is downmixed
/// by averaging.
pub fn decode_wav(bytes: &[u8]) -> DecodeResult<AudioBuffer> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(DecodeError::Unsupported(format!(
                    "{}-bit integer samples",
                    spec.bits_per_sample
                )));
            }
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| DecodeError::Malformed(e.to_string()))?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(AudioBuffer {
        samples,
        sample_rate: spec.sample_rate,
    })
}

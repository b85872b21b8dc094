// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Decoding of streamed audio chunks into playable buffers.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// The sample rate the generation service streams at.
pub const SAMPLE_RATE: u32 = 48000;

/// The channel count the generation service streams.
pub const CHANNELS: u16 = 2;

/// Chunks are interleaved signed 16-bit little endian PCM.
const BYTES_PER_SAMPLE: usize = 2;

/// Error types for chunk decoding.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("{len} bytes is not a whole number of {bytes_per_frame} byte frames")]
    PartialFrame { len: usize, bytes_per_frame: usize },

    #[error("{samples} samples do not divide into {channels} channels")]
    SampleCount { samples: usize, channels: u16 },

    #[error("invalid audio format: {channels} channels at {sample_rate}Hz")]
    InvalidFormat { channels: u16, sample_rate: u32 },
}

/// A decoded, immutable block of interleaved f32 audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Creates a buffer from interleaved samples. The sample count must be a multiple of the
    /// channel count.
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Result<Self, DecodeError> {
        if channels == 0 || sample_rate == 0 {
            return Err(DecodeError::InvalidFormat {
                channels,
                sample_rate,
            });
        }
        if samples.len() % channels as usize != 0 {
            return Err(DecodeError::SampleCount {
                samples: samples.len(),
                channels,
            });
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Creates a silent buffer of the given length. Mostly useful for tests.
    pub fn silence(frames: usize, channels: u16, sample_rate: u32) -> Result<Self, DecodeError> {
        Self::new(vec![0.0; frames * channels as usize], channels, sample_rate)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The number of frames (samples per channel) in the buffer.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// The playback duration of the buffer in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns the sample for the given frame and channel.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.samples[frame * self.channels as usize + channel]
    }
}

/// Decodes raw interleaved 16-bit PCM. This is a pure function of its inputs.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer, DecodeError> {
    if channels == 0 || sample_rate == 0 {
        return Err(DecodeError::InvalidFormat {
            channels,
            sample_rate,
        });
    }

    let bytes_per_frame = BYTES_PER_SAMPLE * channels as usize;
    if bytes.len() % bytes_per_frame != 0 {
        return Err(DecodeError::PartialFrame {
            len: bytes.len(),
            bytes_per_frame,
        });
    }

    let samples = bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    AudioBuffer::new(samples, channels, sample_rate)
}

/// Decodes a base64 chunk as delivered by the generation service.
pub fn decode_chunk(data: &str, sample_rate: u32, channels: u16) -> Result<AudioBuffer, DecodeError> {
    let bytes = BASE64.decode(data)?;
    decode_pcm16(&bytes, sample_rate, channels)
}

/// Encodes interleaved samples the way the generation service does.
pub fn encode_chunk(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|sample| sample.to_le_bytes()).collect();
    BASE64.encode(bytes)
}

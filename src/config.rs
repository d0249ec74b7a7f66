//! Configuration for StreamVoice

use crate::error::{Result, StreamVoiceError};
use std::time::Duration;

/// Configuration descriptor for an [`AudioDevice`](crate::AudioDevice).
#[derive(Debug, Clone)]
pub struct AudioDeviceDesc {
    /// Output sample rate of the mixing stream
    pub sample_rate: u32,
    /// Number of output channels (typically 2 for stereo)
    pub channels: u16,
    /// Frames requested per output callback
    pub block_size: usize,
    /// Number of sound sources (hardware voices) in the pool
    pub max_channels: usize,
    /// Frames per channel in one streaming chunk. 8192 frames is ~186ms at 44.1kHz.
    pub mono_pcm_chunk_frames: usize,
    /// Number of chunk slots per streaming source
    pub ring_depth: usize,
    /// Lowest pitch a voice accepts
    pub min_pitch: f32,
    /// Highest pitch a voice accepts
    pub max_pitch: f32,
    /// Waves in the `Setup` state at least this long are decoded in real time
    pub min_compressed_duration: Duration,
    /// Resample fully resident PCM to `sample_rate` while precaching
    pub resample_resident: bool,
}

impl Default for AudioDeviceDesc {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            block_size: 512,
            max_channels: 32,
            mono_pcm_chunk_frames: 8192,
            ring_depth: 2,
            min_pitch: 0.4,
            max_pitch: 2.0,
            min_compressed_duration: Duration::from_secs(5),
            resample_resident: true,
        }
    }
}

impl AudioDeviceDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn max_channels(mut self, max: usize) -> Self {
        self.max_channels = max;
        self
    }

    pub fn mono_pcm_chunk_frames(mut self, frames: usize) -> Self {
        self.mono_pcm_chunk_frames = frames;
        self
    }

    pub fn ring_depth(mut self, depth: usize) -> Self {
        self.ring_depth = depth;
        self
    }

    pub fn pitch_range(mut self, min: f32, max: f32) -> Self {
        self.min_pitch = min;
        self.max_pitch = max;
        self
    }

    pub fn min_compressed_duration(mut self, duration: Duration) -> Self {
        self.min_compressed_duration = duration;
        self
    }

    pub fn resample_resident(mut self, enable: bool) -> Self {
        self.resample_resident = enable;
        self
    }

    /// Samples in one streaming chunk for a sound with `channels` channels.
    pub fn chunk_samples(&self, channels: u16) -> usize {
        self.mono_pcm_chunk_frames * channels as usize
    }

    pub fn clamp_pitch(&self, pitch: f32) -> f32 {
        pitch.clamp(self.min_pitch, self.max_pitch)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(StreamVoiceError::Configuration(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if self.channels == 0 {
            return Err(StreamVoiceError::Configuration(
                "Channel count must be greater than 0".to_string(),
            ));
        }
        if self.mono_pcm_chunk_frames == 0 {
            return Err(StreamVoiceError::Configuration(
                "Chunk size must be greater than 0".to_string(),
            ));
        }
        if self.ring_depth < 2 {
            return Err(StreamVoiceError::Configuration(format!(
                "Ring depth must be at least 2 (got {})",
                self.ring_depth
            )));
        }
        if !(self.min_pitch > 0.0 && self.min_pitch <= self.max_pitch) {
            return Err(StreamVoiceError::Configuration(format!(
                "Invalid pitch range {}..{}",
                self.min_pitch, self.max_pitch
            )));
        }
        Ok(())
    }
}

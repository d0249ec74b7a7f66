//! The capability interface a platform audio API exposes to a sound source.

use crate::effects::VoiceEffects;
use crate::error::Result;
use glam::Vec3;
use std::sync::Arc;

/// Transport state reported by a hardware voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

/// A block of interleaved PCM handed to a voice.
///
/// The sample memory is reference counted so a voice can hold a chunk while
/// the submitting ring keeps its slot; once the voice releases the chunk the
/// slot memory is reused in place.
#[derive(Debug, Clone)]
pub struct PcmChunk {
    samples: Arc<[f32]>,
    len: usize,
    channels: u16,
    sample_rate: u32,
    sequence: u64,
}

impl PcmChunk {
    pub fn new(samples: Arc<[f32]>, len: usize, channels: u16, sample_rate: u32, sequence: u64) -> Self {
        let len = len.min(samples.len());
        Self {
            samples,
            len,
            channels,
            sample_rate,
            sequence,
        }
    }

    /// Wrap a whole resident buffer as a single chunk.
    pub fn whole(samples: Arc<[f32]>, channels: u16, sample_rate: u32) -> Self {
        let len = samples.len();
        Self::new(samples, len, channels, sample_rate, 0)
    }

    /// The valid samples of this chunk.
    pub fn samples(&self) -> &[f32] {
        &self.samples[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.len / self.channels as usize
    }

    /// Submission order within the owning source. Resident buffers use 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn shares_memory_with(&self, other: &Arc<[f32]>) -> bool {
        Arc::ptr_eq(&self.samples, other)
    }
}

/// One playback voice of a platform audio API.
///
/// Buffers are consumed in FIFO order. A consumed buffer stays counted as
/// "processed" until it is taken back with [`unqueue_processed`](Self::unqueue_processed).
/// A voice whose queue runs dry stops itself.
pub trait HardwareVoice {
    fn queue_buffer(&mut self, chunk: PcmChunk) -> Result<()>;

    /// Remove the oldest fully consumed buffer.
    fn unqueue_processed(&mut self) -> Option<PcmChunk>;

    fn play(&mut self) -> Result<()>;

    /// Stop playback and drop every queued buffer.
    fn stop(&mut self) -> Result<()>;

    /// Halt playback keeping the queue and position.
    fn pause(&mut self) -> Result<()>;

    fn playback_state(&self) -> PlaybackState;

    /// Buffers submitted and not yet unqueued, processed ones included.
    fn buffers_queued(&self) -> usize;

    fn buffers_processed(&self) -> usize;

    fn set_volume(&mut self, volume: f32);

    fn set_pitch(&mut self, pitch: f32);

    fn set_position(&mut self, position: Vec3);

    fn set_velocity(&mut self, velocity: Vec3);

    fn set_effects(&mut self, effects: &VoiceEffects);
}

/// Creates voices for a platform.
pub trait VoiceBackend {
    type Voice: HardwareVoice;

    fn create_voice(&mut self) -> Result<Self::Voice>;
}

//! In-process voices mixed on pull.
//!
//! [`SoftwareBackend`] hands out [`SoftwareVoice`]s that queue chunks in
//! memory. Whoever owns the output (the cpal stream, or a test rendering
//! offline) pulls mixed audio through a [`SoftwareMixer`].

use crate::effects::VoiceEffects;
use crate::error::{Result, StreamVoiceError};
use crate::voice::{HardwareVoice, PcmChunk, PlaybackState, VoiceBackend};
use glam::Vec3;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct QueuedChunk {
    chunk: PcmChunk,
    /// Fractional read position in frames
    cursor: f64,
}

#[derive(Debug)]
pub(crate) struct VoiceQueue {
    pending: VecDeque<QueuedChunk>,
    processed: VecDeque<PcmChunk>,
    state: PlaybackState,
    volume: f32,
    pitch: f32,
    position: Vec3,
    velocity: Vec3,
    effects: VoiceEffects,
}

impl Default for VoiceQueue {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            processed: VecDeque::new(),
            state: PlaybackState::Stopped,
            volume: 1.0,
            pitch: 1.0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            effects: VoiceEffects::default(),
        }
    }
}

impl VoiceQueue {
    /// Equal-power gains for a mono source at `position` relative to the listener.
    fn pan_gains(&self) -> (f32, f32) {
        let pan = if self.position.length_squared() > f32::EPSILON {
            (self.position.x / self.position.length()).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        (((1.0 - pan) * 0.5).sqrt(), ((1.0 + pan) * 0.5).sqrt())
    }

    /// Mix this voice into `out` (interleaved, `out_channels` wide).
    /// Returns the number of frames mixed.
    fn mix_into(&mut self, out: &mut [f32], out_channels: usize, out_rate: u32) -> usize {
        if self.state != PlaybackState::Playing || out_channels == 0 {
            return 0;
        }

        let (pan_left, pan_right) = self.pan_gains();
        let bleed = self.effects.stereo_bleed * 0.5;
        let gain = self.volume;
        let mut frames_mixed = 0;

        for frame in out.chunks_exact_mut(out_channels) {
            let (left, right) = loop {
                let Some(front) = self.pending.front_mut() else {
                    // Ran dry: stop like a hardware voice would
                    self.state = PlaybackState::Stopped;
                    return frames_mixed;
                };

                let index = front.cursor as usize;
                if index >= front.chunk.frames() {
                    if let Some(done) = self.pending.pop_front() {
                        self.processed.push_back(done.chunk);
                    }
                    continue;
                }

                let channels = front.chunk.channels() as usize;
                let samples = &front.chunk.samples()[index * channels..(index + 1) * channels];
                let pair = if channels == 1 {
                    (samples[0] * pan_left, samples[0] * pan_right)
                } else {
                    let (l, r) = (samples[0], samples[1]);
                    (l * (1.0 - bleed) + r * bleed, r * (1.0 - bleed) + l * bleed)
                };

                let step = self.pitch as f64 * front.chunk.sample_rate() as f64 / out_rate as f64;
                front.cursor += step;
                break pair;
            };

            if out_channels == 1 {
                frame[0] += (left + right) * 0.5 * gain;
            } else {
                frame[0] += left * gain;
                frame[1] += right * gain;
            }
            frames_mixed += 1;
        }

        // Retire a chunk that was finished exactly at the end of this block
        while let Some(front) = self.pending.front() {
            if (front.cursor as usize) < front.chunk.frames() {
                break;
            }
            if let Some(done) = self.pending.pop_front() {
                self.processed.push_back(done.chunk);
            }
        }
        if self.pending.is_empty() {
            self.state = PlaybackState::Stopped;
        }

        frames_mixed
    }
}

type SharedQueue = Arc<Mutex<VoiceQueue>>;

fn lock_queue(queue: &SharedQueue) -> MutexGuard<'_, VoiceQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A voice whose queue lives in process memory.
#[derive(Debug)]
pub struct SoftwareVoice {
    queue: SharedQueue,
}

impl SoftwareVoice {
    pub fn volume(&self) -> f32 {
        lock_queue(&self.queue).volume
    }

    pub fn pitch(&self) -> f32 {
        lock_queue(&self.queue).pitch
    }

    pub fn position(&self) -> Vec3 {
        lock_queue(&self.queue).position
    }

    pub fn velocity(&self) -> Vec3 {
        lock_queue(&self.queue).velocity
    }

    pub fn effects(&self) -> VoiceEffects {
        lock_queue(&self.queue).effects
    }
}

impl HardwareVoice for SoftwareVoice {
    fn queue_buffer(&mut self, chunk: PcmChunk) -> Result<()> {
        if chunk.channels() == 0 || chunk.sample_rate() == 0 {
            return Err(StreamVoiceError::voice(
                "queue_buffer",
                "chunk has no channels or sample rate",
            ));
        }
        lock_queue(&self.queue)
            .pending
            .push_back(QueuedChunk { chunk, cursor: 0.0 });
        Ok(())
    }

    fn unqueue_processed(&mut self) -> Option<PcmChunk> {
        lock_queue(&self.queue).processed.pop_front()
    }

    fn play(&mut self) -> Result<()> {
        let mut queue = lock_queue(&self.queue);
        queue.state = if queue.pending.is_empty() {
            PlaybackState::Stopped
        } else {
            PlaybackState::Playing
        };
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut queue = lock_queue(&self.queue);
        queue.state = PlaybackState::Stopped;
        queue.pending.clear();
        queue.processed.clear();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut queue = lock_queue(&self.queue);
        if queue.state == PlaybackState::Playing {
            queue.state = PlaybackState::Paused;
        }
        Ok(())
    }

    fn playback_state(&self) -> PlaybackState {
        lock_queue(&self.queue).state
    }

    fn buffers_queued(&self) -> usize {
        let queue = lock_queue(&self.queue);
        queue.pending.len() + queue.processed.len()
    }

    fn buffers_processed(&self) -> usize {
        lock_queue(&self.queue).processed.len()
    }

    fn set_volume(&mut self, volume: f32) {
        lock_queue(&self.queue).volume = volume;
    }

    fn set_pitch(&mut self, pitch: f32) {
        lock_queue(&self.queue).pitch = pitch;
    }

    fn set_position(&mut self, position: Vec3) {
        lock_queue(&self.queue).position = position;
    }

    fn set_velocity(&mut self, velocity: Vec3) {
        lock_queue(&self.queue).velocity = velocity;
    }

    fn set_effects(&mut self, effects: &VoiceEffects) {
        lock_queue(&self.queue).effects = *effects;
    }
}

/// Pull side of a [`SoftwareBackend`]. Cheap to clone into an audio callback.
#[derive(Clone, Debug)]
pub struct SoftwareMixer {
    voices: Arc<Mutex<Vec<SharedQueue>>>,
    sample_rate: u32,
    channels: u16,
}

impl SoftwareMixer {
    /// Overwrite `out` with the mix of every live voice. Returns the largest
    /// frame count any voice contributed.
    pub fn render(&self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        let mut voices = self.voices.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop voices whose SoftwareVoice handle is gone
        voices.retain(|queue| Arc::strong_count(queue) > 1);

        voices
            .iter()
            .map(|queue| lock_queue(queue).mix_into(out, self.channels as usize, self.sample_rate))
            .max()
            .unwrap_or(0)
    }

    /// Like [`render`](Self::render) but never blocks: skips the block (silence)
    /// if the voice list is busy, and skips any voice that is being updated.
    pub fn try_render(&self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        let Ok(voices) = self.voices.try_lock() else {
            log::warn!("Failed to acquire voice list lock in mixer");
            return 0;
        };

        let mut frames = 0;
        for queue in voices.iter() {
            if let Ok(mut queue) = queue.try_lock() {
                frames = frames.max(queue.mix_into(out, self.channels as usize, self.sample_rate));
            }
        }
        frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Voice factory for in-process mixing.
#[derive(Debug)]
pub struct SoftwareBackend {
    mixer: SoftwareMixer,
}

impl SoftwareBackend {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            mixer: SoftwareMixer {
                voices: Arc::new(Mutex::new(Vec::new())),
                sample_rate,
                channels,
            },
        }
    }

    pub fn mixer(&self) -> SoftwareMixer {
        self.mixer.clone()
    }
}

impl VoiceBackend for SoftwareBackend {
    type Voice = SoftwareVoice;

    fn create_voice(&mut self) -> Result<SoftwareVoice> {
        let queue: SharedQueue = Arc::new(Mutex::new(VoiceQueue::default()));
        self.mixer
            .voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(queue.clone());
        Ok(SoftwareVoice { queue })
    }
}

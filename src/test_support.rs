//! Helpers shared by the unit tests.

use crate::decoder::{CompressedAudioDecoder, ProceduralProducer};
use crate::effects::VoiceEffects;
use crate::error::{Result, StreamVoiceError};
use crate::voice::{HardwareVoice, PcmChunk, PlaybackState, VoiceBackend};
use glam::Vec3;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Encode 16-bit PCM as an in-memory RIFF/WAVE file.
pub fn wav_bytes(channels: u16, sample_rate: u32, samples: &[i16]) -> Arc<[u8]> {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);

    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");

    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());

    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    bytes.into()
}

/// Everything a [`ScriptedVoice`] was asked to do, plus the queue it simulates.
#[derive(Debug)]
pub struct VoiceScript {
    pub pending: VecDeque<PcmChunk>,
    pub processed: VecDeque<PcmChunk>,
    pub state: PlaybackState,
    /// Sequence numbers in submission order
    pub submitted: Vec<u64>,
    pub play_calls: usize,
    pub stop_calls: usize,
    pub pause_calls: usize,
    pub volume: f32,
    pub pitch: f32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub effects: VoiceEffects,
    pub fail_queue: bool,
}

impl Default for VoiceScript {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            processed: VecDeque::new(),
            state: PlaybackState::Stopped,
            submitted: Vec::new(),
            play_calls: 0,
            stop_calls: 0,
            pause_calls: 0,
            volume: 1.0,
            pitch: 1.0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            effects: VoiceEffects::default(),
            fail_queue: false,
        }
    }
}

/// Test-side view of a [`ScriptedVoice`] that has been moved into a source.
#[derive(Debug, Clone, Default)]
pub struct VoiceProbe(Arc<Mutex<VoiceScript>>);

impl VoiceProbe {
    pub fn script(&self) -> MutexGuard<'_, VoiceScript> {
        self.0.lock().unwrap()
    }

    /// Play out the `count` oldest queued chunks. The voice stops itself
    /// once nothing is left, like a real queue-based voice.
    pub fn consume(&self, count: usize) {
        let mut script = self.script();
        for _ in 0..count {
            if let Some(chunk) = script.pending.pop_front() {
                script.processed.push_back(chunk);
            }
        }
        if script.pending.is_empty() {
            script.state = PlaybackState::Stopped;
        }
    }

    pub fn set_state(&self, state: PlaybackState) {
        self.script().state = state;
    }

    /// Sequence numbers of chunks still waiting to be played.
    pub fn pending_sequences(&self) -> Vec<u64> {
        self.script().pending.iter().map(PcmChunk::sequence).collect()
    }

    pub fn outstanding(&self) -> usize {
        let script = self.script();
        script.pending.len() + script.processed.len()
    }
}

/// A [`HardwareVoice`] that records calls instead of producing sound.
#[derive(Debug)]
pub struct ScriptedVoice(VoiceProbe);

impl ScriptedVoice {
    pub fn new() -> (Self, VoiceProbe) {
        let probe = VoiceProbe::default();
        (Self(probe.clone()), probe)
    }
}

impl HardwareVoice for ScriptedVoice {
    fn queue_buffer(&mut self, chunk: PcmChunk) -> Result<()> {
        let mut script = self.0.script();
        if script.fail_queue {
            return Err(StreamVoiceError::Voice {
                call: "queue_buffer",
                message: "scripted failure".into(),
            });
        }
        script.submitted.push(chunk.sequence());
        script.pending.push_back(chunk);
        Ok(())
    }

    fn unqueue_processed(&mut self) -> Option<PcmChunk> {
        self.0.script().processed.pop_front()
    }

    fn play(&mut self) -> Result<()> {
        let mut script = self.0.script();
        script.play_calls += 1;
        script.state = PlaybackState::Playing;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut script = self.0.script();
        script.stop_calls += 1;
        script.state = PlaybackState::Stopped;
        script.pending.clear();
        script.processed.clear();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut script = self.0.script();
        script.pause_calls += 1;
        script.state = PlaybackState::Paused;
        Ok(())
    }

    fn playback_state(&self) -> PlaybackState {
        self.0.script().state
    }

    fn buffers_queued(&self) -> usize {
        self.0.outstanding()
    }

    fn buffers_processed(&self) -> usize {
        self.0.script().processed.len()
    }

    fn set_volume(&mut self, volume: f32) {
        self.0.script().volume = volume;
    }

    fn set_pitch(&mut self, pitch: f32) {
        self.0.script().pitch = pitch;
    }

    fn set_position(&mut self, position: Vec3) {
        self.0.script().position = position;
    }

    fn set_velocity(&mut self, velocity: Vec3) {
        self.0.script().velocity = velocity;
    }

    fn set_effects(&mut self, effects: &VoiceEffects) {
        self.0.script().effects = *effects;
    }
}

/// Hands out [`ScriptedVoice`]s and keeps a probe for each.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    pub probes: Vec<VoiceProbe>,
    pub fail_create: bool,
}

impl ScriptedBackend {
    pub fn probe(&self, index: usize) -> VoiceProbe {
        self.probes[index].clone()
    }
}

impl VoiceBackend for ScriptedBackend {
    type Voice = ScriptedVoice;

    fn create_voice(&mut self) -> Result<ScriptedVoice> {
        if self.fail_create {
            return Err(StreamVoiceError::AudioDevice("scripted failure".into()));
        }
        let (voice, probe) = ScriptedVoice::new();
        self.probes.push(probe);
        Ok(voice)
    }
}

/// Fills each chunk with its 1-based read index and reports the end of the
/// stream on every `end_every`-th read. Without looping, reads past the end
/// return silence.
#[derive(Debug)]
pub struct ScriptedDecoder {
    pub channels: u16,
    pub sample_rate: u32,
    pub end_every: usize,
    pub reads: usize,
    exhausted: bool,
}

impl ScriptedDecoder {
    pub fn new(channels: u16, sample_rate: u32, end_every: usize) -> Self {
        Self {
            channels,
            sample_rate,
            end_every,
            reads: 0,
            exhausted: false,
        }
    }
}

impl CompressedAudioDecoder for ScriptedDecoder {
    fn read_compressed_data(&mut self, destination: &mut [f32], looping: bool) -> Result<bool> {
        if self.exhausted {
            destination.fill(0.0);
            return Ok(true);
        }

        self.reads += 1;
        destination.fill(self.reads as f32);
        let reached_end = self.reads % self.end_every == 0;
        if reached_end && !looping {
            self.exhausted = true;
        }
        Ok(reached_end)
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Decodes `good_reads` chunks, then fails every later read.
#[derive(Debug)]
pub struct FailingDecoder {
    pub good_reads: usize,
    pub reads: usize,
}

impl FailingDecoder {
    pub fn new(good_reads: usize) -> Self {
        Self {
            good_reads,
            reads: 0,
        }
    }
}

impl CompressedAudioDecoder for FailingDecoder {
    fn read_compressed_data(&mut self, destination: &mut [f32], _looping: bool) -> Result<bool> {
        self.reads += 1;
        if self.reads > self.good_reads {
            return Err(StreamVoiceError::Decoder("corrupt packet".into()));
        }
        destination.fill(0.5);
        Ok(false)
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        8000
    }
}

/// Produces a constant value for `remaining` samples, then nothing. Raises
/// `dropped` when it is destroyed.
#[derive(Debug)]
pub struct CountdownProducer {
    pub remaining: usize,
    pub dropped: Arc<AtomicBool>,
}

impl CountdownProducer {
    pub fn new(remaining: usize) -> (Self, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        (
            Self {
                remaining,
                dropped: dropped.clone(),
            },
            dropped,
        )
    }
}

impl ProceduralProducer for CountdownProducer {
    fn generate(&mut self, destination: &mut [f32]) -> usize {
        let count = self.remaining.min(destination.len());
        destination[..count].fill(0.25);
        self.remaining -= count;
        count
    }
}

impl Drop for CountdownProducer {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

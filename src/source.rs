//! Per-voice playback state machine.
//!
//! A [`SoundSource`] binds one wave instance to one hardware voice. Resident
//! buffers are queued whole (twice when looping, so the next pass is ready the
//! instant the first one completes). Streaming and procedural buffers are fed
//! through a [`StreamingRingBuffer`], refilled one chunk at a time as the
//! voice reports chunks consumed. The mixer polls [`SoundSource::is_finished`]
//! once per tick; that poll drives every refill.

use crate::buffer::{BufferBinding, BufferTable};
use crate::config::AudioDeviceDesc;
use crate::context::AudioRuntimeContext;
use crate::effects::EffectsManager;
use crate::error::{Result, StreamVoiceError};
use crate::ring::StreamingRingBuffer;
use crate::voice::{HardwareVoice, PcmChunk, PlaybackState, VoiceBackend};
use crate::wave_instance::{LoopingMode, WaveInstanceHandle};
use glam::Vec3;

/// Lifecycle of a sound source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// No buffer bound
    Idle,
    /// Buffer bound and primed, not yet playing
    Initialized,
    Playing,
    Paused,
    /// End of a single-shot stream reached, queued audio still playing out
    Draining,
}

pub struct SoundSource<V> {
    index: usize,
    voice: Option<V>,
    buffer: Option<BufferBinding>,
    wave_instance: Option<WaveInstanceHandle>,
    ring: Option<StreamingRingBuffer>,
    playing: bool,
    paused: bool,
    /// End of a single-shot stream reached; let queued chunks play out
    buffers_to_flush: bool,
    /// A loop wrap happened during a refill; notify on the next poll
    loop_callback_pending: bool,
    streaming_started: bool,
    looping_mode: LoopingMode,
    use_spatialization: bool,
    reverb_applied: bool,
    loops_since_poll: u32,
    ring_depth: usize,
    mono_pcm_chunk_frames: usize,
    min_pitch: f32,
    max_pitch: f32,
}

impl<V: HardwareVoice> SoundSource<V> {
    pub fn new(index: usize, desc: &AudioDeviceDesc) -> Self {
        Self {
            index,
            voice: None,
            buffer: None,
            wave_instance: None,
            ring: None,
            playing: false,
            paused: false,
            buffers_to_flush: false,
            loop_callback_pending: false,
            streaming_started: false,
            looping_mode: LoopingMode::Never,
            use_spatialization: false,
            reverb_applied: false,
            loops_since_poll: 0,
            ring_depth: desc.ring_depth.max(1),
            mono_pcm_chunk_frames: desc.mono_pcm_chunk_frames,
            min_pitch: desc.min_pitch,
            max_pitch: desc.max_pitch,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SourceState {
        if self.buffer.is_none() {
            SourceState::Idle
        } else if self.paused {
            SourceState::Paused
        } else if self.playing && self.buffers_to_flush {
            SourceState::Draining
        } else if self.playing {
            SourceState::Playing
        } else {
            SourceState::Initialized
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn wave_instance(&self) -> Option<&WaveInstanceHandle> {
        self.wave_instance.as_ref()
    }

    pub fn buffer(&self) -> Option<&BufferBinding> {
        self.buffer.as_ref()
    }

    pub fn voice(&self) -> Option<&V> {
        self.voice.as_ref()
    }

    /// Loop behavior in effect. Starts as the wave instance's mode and drops
    /// to `Never` once the instance asks to leave the loop.
    pub fn looping_mode(&self) -> LoopingMode {
        self.looping_mode
    }

    /// Streaming chunks submitted and not yet consumed.
    pub fn active_buffer_count(&self) -> usize {
        self.ring.as_ref().map_or(0, StreamingRingBuffer::active_count)
    }

    /// Ring slot the voice is currently playing, for streaming sources.
    pub fn current_slot(&self) -> Option<usize> {
        self.ring.as_ref().map(StreamingRingBuffer::current_slot)
    }

    /// Loop points reached since the last call.
    pub fn take_loop_count(&mut self) -> u32 {
        std::mem::take(&mut self.loops_since_poll)
    }

    /// Bind `instance` to this source, creating its buffer through `table`.
    ///
    /// Returns `false` and leaves the source idle when the wave cannot be
    /// played or the voice rejects the initial buffers.
    pub fn init<B>(
        &mut self,
        instance: &WaveInstanceHandle,
        table: &mut BufferTable,
        backend: &mut B,
    ) -> bool
    where
        B: VoiceBackend<Voice = V>,
    {
        let wave = instance.lock().wave().clone();
        let binding = match table.init_buffer(&wave) {
            Ok(binding) => binding,
            Err(e) => {
                log::debug!("Source {}: {}", self.index, e);
                return false;
            }
        };
        self.init_with_buffer(instance, binding, backend)
    }

    pub(crate) fn init_with_buffer<B>(
        &mut self,
        instance: &WaveInstanceHandle,
        binding: BufferBinding,
        backend: &mut B,
    ) -> bool
    where
        B: VoiceBackend<Voice = V>,
    {
        if self.buffer.is_some() {
            self.stop();
        }

        let (channels, sample_rate, streaming, procedural) = {
            let buffer = binding.buffer();
            (
                buffer.channels(),
                buffer.sample_rate(),
                buffer.is_streaming(),
                buffer.is_procedural(),
            )
        };
        if channels == 0 {
            return false;
        }

        if self.voice.is_none() {
            match backend.create_voice() {
                Ok(voice) => self.voice = Some(voice),
                Err(e) => {
                    log::warn!("Source {}: create_voice failed: {}", self.index, e);
                    return false;
                }
            }
        }

        {
            let instance = instance.lock();
            self.looping_mode = instance.looping_mode;
            self.use_spatialization = instance.use_spatialization;
            self.reverb_applied = instance.reverb;
        }
        if procedural && self.looping_mode != LoopingMode::Never {
            log::debug!("Source {}: procedural audio does not loop", self.index);
            self.looping_mode = LoopingMode::Never;
        }

        self.playing = false;
        self.paused = false;
        self.buffers_to_flush = false;
        self.loop_callback_pending = false;
        self.streaming_started = false;
        self.loops_since_poll = 0;
        self.buffer = Some(binding);
        self.wave_instance = Some(instance.clone());

        let primed = if streaming {
            self.submit_streaming_buffers(channels, sample_rate)
        } else {
            self.submit_resident_buffer()
        };

        if let Err(e) = primed {
            log::warn!("Source {}: failed to prime voice: {}", self.index, e);
            self.release();
            return false;
        }

        log::debug!(
            "Source {}: initialized {}ch @ {}Hz ({})",
            self.index,
            channels,
            sample_rate,
            if streaming { "streaming" } else { "resident" }
        );
        true
    }

    fn submit_resident_buffer(&mut self) -> Result<()> {
        let chunk = self.resident_chunk()?;
        let copies = match self.looping_mode {
            LoopingMode::Never => 1,
            LoopingMode::WithNotification | LoopingMode::Forever => 2,
        };

        let voice = self.voice.as_mut().ok_or_else(|| no_voice(self.index))?;
        for _ in 0..copies {
            voice.queue_buffer(chunk.clone())?;
        }
        Ok(())
    }

    fn submit_streaming_buffers(&mut self, channels: u16, sample_rate: u32) -> Result<()> {
        let chunk_samples = self.mono_pcm_chunk_frames * channels as usize;
        self.ring = Some(StreamingRingBuffer::new(
            self.ring_depth,
            chunk_samples,
            channels,
            sample_rate,
        ));

        while !self.buffers_to_flush && self.refill_next()? {}

        self.streaming_started = true;
        Ok(())
    }

    fn resident_chunk(&self) -> Result<PcmChunk> {
        self.buffer
            .as_ref()
            .and_then(|binding| binding.buffer().resident_chunk())
            .ok_or_else(|| {
                StreamVoiceError::AudioFormat(format!(
                    "Source {} has no resident buffer",
                    self.index
                ))
            })
    }

    /// Decode or produce the next chunk into a free ring slot and submit it.
    /// Returns `false` when no slot is free.
    fn refill_next(&mut self) -> Result<bool> {
        let Self {
            index,
            ring: Some(ring),
            buffer: Some(binding),
            voice: Some(voice),
            looping_mode,
            buffers_to_flush,
            loop_callback_pending,
            ..
        } = self
        else {
            return Ok(false);
        };

        let Some(buffer) = binding.owned_mut() else {
            return Err(StreamVoiceError::AudioFormat(format!(
                "Source {} cannot stream a shared buffer",
                index
            )));
        };

        let looping = *looping_mode != LoopingMode::Never;
        let Some((chunk, reached_end)) = ring.refill(|dest| buffer.fill_chunk(dest, looping))?
        else {
            return Ok(false);
        };

        if reached_end {
            match *looping_mode {
                LoopingMode::Never => *buffers_to_flush = true,
                LoopingMode::WithNotification => *loop_callback_pending = true,
                LoopingMode::Forever => {}
            }
        }

        if let Err(e) = voice.queue_buffer(chunk) {
            ring.retract_newest();
            return Err(e);
        }
        Ok(true)
    }

    /// Start or resume playback.
    pub fn play(&mut self) {
        if self.buffer.is_none() || (self.playing && !self.paused) {
            return;
        }

        if let Some(voice) = self.voice.as_mut() {
            if let Err(e) = voice.play() {
                log::warn!("Source {}: play failed: {}", self.index, e);
            }
        }
        if let Some(instance) = &self.wave_instance {
            instance.lock().mark_started();
        }

        self.paused = false;
        self.playing = true;
    }

    /// Halt playback keeping queued buffers and decoder state.
    pub fn pause(&mut self) {
        if self.buffer.is_none() {
            return;
        }

        if let Some(voice) = self.voice.as_mut() {
            if let Err(e) = voice.pause() {
                log::warn!("Source {}: pause failed: {}", self.index, e);
            }
        }
        self.paused = true;
    }

    /// Stop playback, notify the wave instance and release the buffer.
    /// Safe from any state.
    pub fn stop(&mut self) {
        if self.buffer.is_none() && self.wave_instance.is_none() {
            return;
        }

        let instance = self.wave_instance.take();
        self.release();
        if let Some(instance) = instance {
            instance.lock().notify_finished();
        }
        log::debug!("Source {}: stopped", self.index);
    }

    fn halt_voice(&mut self) {
        if let Some(voice) = self.voice.as_mut() {
            if let Err(e) = voice.stop() {
                log::warn!("Source {}: stop failed: {}", self.index, e);
            }
        }
    }

    /// Return to idle without notifying anyone.
    fn release(&mut self) {
        if self.buffer.is_some() {
            self.halt_voice();
        }
        self.ring = None;
        self.buffer = None;
        self.wave_instance = None;
        self.playing = false;
        self.paused = false;
        self.buffers_to_flush = false;
        self.loop_callback_pending = false;
        self.streaming_started = false;
        self.looping_mode = LoopingMode::Never;
    }

    /// Push the wave instance's current parameters to the voice.
    pub fn update(&mut self, ctx: &AudioRuntimeContext, effects: &mut dyn EffectsManager) {
        if self.buffer.is_none() || self.paused {
            return;
        }
        let (Some(instance), Some(voice)) = (&self.wave_instance, self.voice.as_mut()) else {
            return;
        };

        let instance = instance.lock();
        let volume = (instance.volume * instance.volume_multiplier).clamp(0.0, 1.0)
            * ctx.global_volume_multiplier();
        let pitch = instance.pitch.clamp(self.min_pitch, self.max_pitch);

        // Non-spatialized sounds ride with the listener
        let (position, velocity) = if self.use_spatialization {
            (instance.location, instance.velocity)
        } else {
            (Vec3::ZERO, Vec3::ZERO)
        };

        let mut fx = effects.voice_effects(&instance);
        fx.reverb_applied &= self.reverb_applied;
        drop(instance);

        voice.set_volume(volume);
        voice.set_pitch(pitch);
        voice.set_position(position);
        voice.set_velocity(velocity);
        voice.set_effects(&fx);
    }

    /// Advance buffering and report whether this source is done.
    ///
    /// Must be polled once per tick; refills happen here.
    pub fn is_finished(&mut self, ctx: &AudioRuntimeContext) -> bool {
        if self.buffer.is_none() {
            return true;
        }
        if self.paused || !self.playing {
            return false;
        }

        if self.ring.is_some() {
            self.poll_streaming(ctx)
        } else {
            self.poll_resident(ctx)
        }
    }

    fn poll_resident(&mut self, ctx: &AudioRuntimeContext) -> bool {
        let Some(voice) = self.voice.as_ref() else {
            return true;
        };
        let processed = voice.buffers_processed();
        let queued = voice.buffers_queued();
        let state = voice.playback_state();

        if self.looping_mode != LoopingMode::Never && processed > 0 {
            let ran_dry = processed >= queued;
            let chunk = match self.resident_chunk() {
                Ok(chunk) => chunk,
                Err(e) => {
                    log::warn!("{}", e);
                    return true;
                }
            };

            let mut requeued = 0;
            for _ in 0..processed.min(self.ring_depth) {
                if let Some(voice) = self.voice.as_mut() {
                    voice.unqueue_processed();
                }
                if self.looping_mode == LoopingMode::WithNotification {
                    self.notify_loop();
                }
                if self.looping_mode != LoopingMode::Never {
                    self.queue_on_voice(chunk.clone());
                    requeued += 1;
                }
            }

            if ran_dry && requeued > 0 {
                log::debug!("Source {}: voice starved, restarting", self.index);
                self.restart_voice();
            }
            return false;
        }

        if state == PlaybackState::Stopped {
            self.notify_wave_instance();
            log::debug!(
                "Source {}: finished at tick {}",
                self.index,
                ctx.current_tick()
            );
            return true;
        }
        false
    }

    fn poll_streaming(&mut self, ctx: &AudioRuntimeContext) -> bool {
        if self.loop_callback_pending {
            self.loop_callback_pending = false;
            self.notify_loop();
        }

        let (Some(voice), Some(ring)) = (self.voice.as_mut(), self.ring.as_mut()) else {
            return true;
        };

        let processed = voice.buffers_processed();
        let ran_dry = processed > 0 && processed >= voice.buffers_queued();
        for _ in 0..processed.min(ring.depth()) {
            let returned = voice.unqueue_processed();
            ring.release_oldest(returned.as_ref());
        }

        if ring.active_count() == 0 && (self.buffers_to_flush || !self.streaming_started) {
            self.notify_wave_instance();
            log::debug!(
                "Source {}: stream drained at tick {}",
                self.index,
                ctx.current_tick()
            );
            return true;
        }

        let mut submitted = 0;
        while !self.buffers_to_flush {
            match self.refill_next() {
                Ok(true) => submitted += 1,
                Ok(false) => break,
                Err(e @ StreamVoiceError::Voice { .. }) => {
                    log::warn!("Source {}: refill rejected, retrying: {}", self.index, e);
                    break;
                }
                Err(e) => {
                    self.abandon_stream(e);
                    break;
                }
            }
        }

        if ran_dry && submitted > 0 {
            log::debug!("Source {}: stream starved, restarting", self.index);
            self.restart_voice();
        }
        false
    }

    /// The stream cannot produce more audio. Play out what is queued and
    /// never stream this wave again.
    fn abandon_stream(&mut self, error: StreamVoiceError) {
        log::warn!("Source {}: stream failed: {}", self.index, error);
        if let Some(instance) = &self.wave_instance {
            instance.lock().wave().mark_invalid();
        }
        self.buffers_to_flush = true;
    }

    fn queue_on_voice(&mut self, chunk: PcmChunk) {
        if let Some(voice) = self.voice.as_mut() {
            if let Err(e) = voice.queue_buffer(chunk) {
                log::warn!("Source {}: queue_buffer failed: {}", self.index, e);
            }
        }
    }

    fn restart_voice(&mut self) {
        if let Some(voice) = self.voice.as_mut() {
            if let Err(e) = voice.play() {
                log::warn!("Source {}: play failed: {}", self.index, e);
            }
        }
    }

    fn notify_loop(&mut self) {
        self.loops_since_poll += 1;
        self.notify_wave_instance();
    }

    /// Returns whether the instance asked to leave its loop.
    fn notify_wave_instance(&mut self) -> bool {
        let Some(instance) = &self.wave_instance else {
            return false;
        };

        let exit_loop = instance.lock().notify_finished();
        if exit_loop && self.looping_mode != LoopingMode::Never {
            log::debug!("Source {}: leaving loop", self.index);
            self.looping_mode = LoopingMode::Never;
        }
        exit_loop
    }
}

fn no_voice(index: usize) -> StreamVoiceError {
    StreamVoiceError::voice("queue_buffer", format!("source {} has no voice", index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_data::{DecodedPcm, WaveResource};
    use crate::buffer::SoundBuffer;
    use crate::effects::PassthroughEffects;
    use crate::test_support::{
        CountdownProducer, FailingDecoder, ScriptedBackend, ScriptedDecoder, ScriptedVoice,
    };
    use crate::wave_instance::WaveInstance;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    const CHUNK_FRAMES: usize = 64;

    fn desc() -> AudioDeviceDesc {
        AudioDeviceDesc::new().mono_pcm_chunk_frames(CHUNK_FRAMES)
    }

    fn resident_wave(id: u64) -> Arc<WaveResource> {
        Arc::new(WaveResource::preview(
            id,
            "beep",
            DecodedPcm::new(vec![0.1f32; 256], 8000, 1),
        ))
    }

    fn instance(mode: LoopingMode) -> WaveInstanceHandle {
        WaveInstance::new(resident_wave(1)).looping(mode).into()
    }

    fn streaming(channels: u16, end_every: usize) -> BufferBinding {
        BufferBinding::Owned(Box::new(SoundBuffer::real_time(
            "stream",
            Box::new(ScriptedDecoder::new(channels, 8000, end_every)),
            0,
        )))
    }

    fn streaming_source(
        mode: LoopingMode,
        channels: u16,
        end_every: usize,
    ) -> (SoundSource<ScriptedVoice>, ScriptedBackend, WaveInstanceHandle) {
        let mut backend = ScriptedBackend::default();
        let mut source = SoundSource::new(0, &desc());
        let handle = instance(mode);
        assert!(source.init_with_buffer(&handle, streaming(channels, end_every), &mut backend));
        (source, backend, handle)
    }

    fn resident_source(
        mode: LoopingMode,
    ) -> (SoundSource<ScriptedVoice>, ScriptedBackend, WaveInstanceHandle) {
        let mut backend = ScriptedBackend::default();
        let mut table = BufferTable::new(desc());
        let mut source = SoundSource::new(0, &desc());
        let handle = instance(mode);
        assert!(source.init(&handle, &mut table, &mut backend));
        (source, backend, handle)
    }

    #[test]
    fn test_streaming_never_exceeds_ring_depth() {
        let ctx = AudioRuntimeContext::new();
        let (mut source, backend, _handle) = streaming_source(LoopingMode::Forever, 2, 5);
        let probe = backend.probe(0);
        source.play();

        for _ in 0..40 {
            probe.consume(1);
            assert!(!source.is_finished(&ctx));
            assert!(probe.outstanding() <= 2);
            assert!(source.active_buffer_count() <= 2);
        }
    }

    #[test]
    fn test_streaming_submission_is_fifo() {
        let ctx = AudioRuntimeContext::new();
        let (mut source, backend, _handle) = streaming_source(LoopingMode::Forever, 1, 3);
        let probe = backend.probe(0);
        source.play();

        for tick in 0..25 {
            probe.consume(1 + tick % 2);
            source.is_finished(&ctx);
        }

        let submitted = probe.script().submitted.clone();
        let expected: Vec<u64> = (0..submitted.len() as u64).collect();
        assert!(submitted.len() > 25);
        assert_eq!(submitted, expected);
    }

    #[test]
    fn test_forever_resident_never_finishes() {
        let ctx = AudioRuntimeContext::new();
        let (mut source, backend, handle) = resident_source(LoopingMode::Forever);
        let probe = backend.probe(0);
        source.play();
        assert_eq!(probe.outstanding(), 2);

        for _ in 0..50 {
            probe.consume(1);
            assert!(!source.is_finished(&ctx));
            assert!(!probe.script().pending.is_empty());
        }
        assert_eq!(handle.lock().notify_count(), 0);
    }

    #[test]
    fn test_stop_is_safe_from_every_state() {
        let ctx = AudioRuntimeContext::new();
        let mut backend = ScriptedBackend::default();
        let mut source: SoundSource<ScriptedVoice> = SoundSource::new(0, &desc());

        // Idle
        source.stop();
        source.stop();
        assert_eq!(source.state(), SourceState::Idle);

        let procedural = |remaining: usize| {
            let (producer, dropped) = CountdownProducer::new(remaining);
            let binding = BufferBinding::Owned(Box::new(SoundBuffer::procedural(
                "tone",
                1,
                8000,
                Box::new(producer),
            )));
            (binding, dropped)
        };

        let setups: [(&str, fn(&mut SoundSource<ScriptedVoice>)); 3] = [
            ("initialized", |_| {}),
            ("playing", |s| s.play()),
            ("paused", |s| {
                s.play();
                s.pause();
            }),
        ];
        for (label, setup) in setups {
            let (binding, dropped) = procedural(10_000);
            assert!(source.init_with_buffer(&instance(LoopingMode::Never), binding, &mut backend));
            setup(&mut source);
            assert_ne!(source.state(), SourceState::Idle, "{}", label);

            source.stop();
            assert_eq!(source.state(), SourceState::Idle, "{}", label);
            assert!(source.buffer().is_none());
            assert!(dropped.load(Ordering::SeqCst), "{}", label);
            source.stop();
            assert_eq!(source.state(), SourceState::Idle);
        }

        // Draining: the first pull already runs short
        let (binding, dropped) = procedural(10);
        assert!(source.init_with_buffer(&instance(LoopingMode::Never), binding, &mut backend));
        source.play();
        assert!(!source.is_finished(&ctx));
        assert_eq!(source.state(), SourceState::Draining);
        source.stop();
        source.stop();
        assert_eq!(source.state(), SourceState::Idle);
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(backend.probe(0).outstanding(), 0);
    }

    #[test]
    fn test_single_shot_finishes_when_last_chunk_consumed() {
        let ctx = AudioRuntimeContext::new();
        // Priming reads chunks 1 and 2, the stream ends on chunk 4
        let (mut source, backend, handle) = streaming_source(LoopingMode::Never, 1, 4);
        let probe = backend.probe(0);
        source.play();

        probe.consume(1);
        assert!(!source.is_finished(&ctx));
        probe.consume(1);
        assert!(!source.is_finished(&ctx));
        assert_eq!(source.state(), SourceState::Draining);

        probe.consume(1);
        assert!(!source.is_finished(&ctx));
        assert_eq!(source.active_buffer_count(), 1);

        probe.consume(1);
        assert!(source.is_finished(&ctx));
        assert_eq!(handle.lock().notify_count(), 1);
        assert_eq!(probe.script().submitted, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_resident_starvation_splices_twice_and_restarts_once() {
        let ctx = AudioRuntimeContext::new();
        let (mut source, backend, handle) = resident_source(LoopingMode::WithNotification);
        let probe = backend.probe(0);
        source.play();
        assert_eq!(probe.script().play_calls, 1);

        probe.consume(2);
        assert_eq!(probe.script().state, PlaybackState::Stopped);
        assert!(!source.is_finished(&ctx));

        let script = probe.script();
        assert_eq!(script.play_calls, 2);
        assert_eq!(script.pending.len(), 2);
        assert_eq!(script.processed.len(), 0);
        drop(script);
        assert_eq!(handle.lock().notify_count(), 2);
        assert_eq!(source.take_loop_count(), 2);
    }

    #[test]
    fn test_resident_single_loop_point_has_no_restart() {
        let ctx = AudioRuntimeContext::new();
        let (mut source, backend, handle) = resident_source(LoopingMode::WithNotification);
        let probe = backend.probe(0);
        source.play();

        probe.consume(1);
        assert!(!source.is_finished(&ctx));
        assert_eq!(probe.script().play_calls, 1);
        assert_eq!(probe.script().pending.len(), 2);
        assert_eq!(handle.lock().notify_count(), 1);
    }

    #[test]
    fn test_resident_stop_detected_on_tick() {
        let ctx = AudioRuntimeContext::new();
        let (mut source, backend, handle) = resident_source(LoopingMode::Never);
        let probe = backend.probe(0);
        source.play();
        assert_eq!(probe.outstanding(), 1);

        for _ in 1..5 {
            assert!(!source.is_finished(&ctx));
        }
        probe.set_state(PlaybackState::Stopped);
        assert!(source.is_finished(&ctx));
        assert_eq!(handle.lock().notify_count(), 1);

        source.stop();
        assert_eq!(handle.lock().notify_count(), 1);
    }

    #[test]
    fn test_loop_wrap_notifies_on_following_poll() {
        let ctx = AudioRuntimeContext::new();
        // Two chunks primed, the wrap happens on the third read
        let (mut source, backend, handle) =
            streaming_source(LoopingMode::WithNotification, 2, 3);
        let probe = backend.probe(0);
        source.play();

        probe.consume(1);
        assert!(!source.is_finished(&ctx));
        assert_eq!(probe.script().submitted.len(), 3);
        assert_eq!(handle.lock().notify_count(), 0);

        probe.consume(1);
        assert!(!source.is_finished(&ctx));
        assert_eq!(handle.lock().notify_count(), 1);
        assert!(probe.outstanding() <= 2);

        for _ in 0..6 {
            probe.consume(1);
            assert!(!source.is_finished(&ctx));
            assert!(probe.outstanding() <= 2);
        }
        assert_eq!(probe.script().submitted.len(), 10);
        assert_eq!(handle.lock().notify_count(), 3);
    }

    #[test]
    fn test_pause_keeps_queued_chunks() {
        let ctx = AudioRuntimeContext::new();
        let (mut source, backend, _handle) = streaming_source(LoopingMode::Forever, 2, 10);
        let probe = backend.probe(0);
        source.play();
        probe.consume(1);
        source.is_finished(&ctx);
        let before = probe.pending_sequences();
        assert_eq!(before, vec![1, 2]);

        source.pause();
        assert_eq!(source.state(), SourceState::Paused);
        for _ in 0..10 {
            assert!(!source.is_finished(&ctx));
        }
        source.play();

        assert_eq!(source.state(), SourceState::Playing);
        assert_eq!(probe.pending_sequences(), before);
        assert_eq!(probe.script().submitted, vec![0, 1, 2]);
        assert_eq!(probe.script().pause_calls, 1);
    }

    #[test]
    fn test_zero_channel_wave_creates_nothing() {
        let mut backend = ScriptedBackend::default();
        let mut table = BufferTable::new(desc());
        let mut source: SoundSource<ScriptedVoice> = SoundSource::new(0, &desc());
        let wave = Arc::new(WaveResource::preview(
            7,
            "silent",
            DecodedPcm::new(Vec::<f32>::new(), 8000, 0),
        ));
        let handle: WaveInstanceHandle = WaveInstance::new(wave).into();

        assert!(!source.init(&handle, &mut table, &mut backend));
        assert_eq!(source.state(), SourceState::Idle);
        assert!(table.is_empty());
        assert!(backend.probes.is_empty());
    }

    #[test]
    fn test_exit_loop_request_lets_source_finish() {
        let ctx = AudioRuntimeContext::new();
        let mut backend = ScriptedBackend::default();
        let mut table = BufferTable::new(desc());
        let mut source = SoundSource::new(0, &desc());
        let handle: WaveInstanceHandle = WaveInstance::new(resident_wave(2))
            .looping(LoopingMode::WithNotification)
            .with_finished_hook(|_| true)
            .into();
        assert!(source.init(&handle, &mut table, &mut backend));
        let probe = backend.probe(0);
        source.play();

        probe.consume(1);
        assert!(!source.is_finished(&ctx));
        assert_eq!(source.looping_mode(), LoopingMode::Never);
        assert_eq!(probe.script().pending.len(), 1);

        probe.consume(1);
        assert!(source.is_finished(&ctx));
        assert!(handle.lock().is_finished());
        assert_eq!(handle.lock().notify_count(), 1);
    }

    #[test]
    fn test_procedural_source_never_loops() {
        let ctx = AudioRuntimeContext::new();
        let mut backend = ScriptedBackend::default();
        let mut source = SoundSource::new(0, &desc());
        let (producer, _) = CountdownProducer::new(CHUNK_FRAMES + 10);
        let binding = BufferBinding::Owned(Box::new(SoundBuffer::procedural(
            "voice",
            1,
            8000,
            Box::new(producer),
        )));
        let handle = instance(LoopingMode::WithNotification);
        assert!(source.init_with_buffer(&handle, binding, &mut backend));
        assert_eq!(source.looping_mode(), LoopingMode::Never);
        source.play();

        let probe = backend.probe(0);
        assert_eq!(probe.outstanding(), 2);
        probe.consume(2);
        assert!(source.is_finished(&ctx));
        assert_eq!(handle.lock().notify_count(), 1);
    }

    #[test]
    fn test_update_pushes_clamped_parameters() {
        let mut ctx = AudioRuntimeContext::new();
        ctx.set_global_volume_multiplier(0.5);
        let (mut source, backend, handle) = resident_source(LoopingMode::Never);
        let probe = backend.probe(0);
        source.play();

        {
            let mut instance = handle.lock();
            instance.volume = 3.0;
            instance.volume_multiplier = 1.0;
            instance.pitch = 5.0;
            instance.location = Vec3::new(4.0, 0.0, 0.0);
        }
        source.update(&ctx, &mut PassthroughEffects::default());

        let script = probe.script();
        assert_eq!(script.volume, 0.5);
        assert_eq!(script.pitch, 2.0);
        assert_eq!(script.position, Vec3::ZERO);
        assert!(script.effects.reverb_applied);
    }

    #[test]
    fn test_update_spatialized_position() {
        let ctx = AudioRuntimeContext::new();
        let mut backend = ScriptedBackend::default();
        let mut table = BufferTable::new(desc());
        let mut source = SoundSource::new(0, &desc());
        let location = Vec3::new(-2.0, 1.0, 0.0);
        let handle: WaveInstanceHandle = WaveInstance::new(resident_wave(3))
            .spatialized_at(location)
            .into();
        assert!(source.init(&handle, &mut table, &mut backend));
        source.play();

        handle.lock().pitch = 0.1;
        source.update(&ctx, &mut PassthroughEffects::default());

        let probe = backend.probe(0);
        assert_eq!(probe.script().position, location);
        assert_eq!(probe.script().pitch, 0.4);
    }

    #[test]
    fn test_rejected_queue_leaves_source_idle() {
        let mut backend = ScriptedBackend::default();
        let mut source = SoundSource::new(0, &desc());
        let (voice, probe) = ScriptedVoice::new();
        probe.script().fail_queue = true;
        source.voice = Some(voice);

        let handle = instance(LoopingMode::Never);
        assert!(!source.init_with_buffer(&handle, streaming(1, 4), &mut backend));
        assert_eq!(source.state(), SourceState::Idle);
        assert!(backend.probes.is_empty());
    }

    #[test]
    fn test_decoder_failure_mid_stream_drains_and_finishes() {
        let ctx = AudioRuntimeContext::new();
        let mut backend = ScriptedBackend::default();
        let mut source = SoundSource::new(0, &desc());
        let handle = instance(LoopingMode::Forever);
        let binding = BufferBinding::Owned(Box::new(SoundBuffer::real_time(
            "corrupt",
            Box::new(FailingDecoder::new(2)),
            0,
        )));
        assert!(source.init_with_buffer(&handle, binding, &mut backend));
        let probe = backend.probe(0);
        source.play();

        // The third read fails; the two primed chunks still play out
        probe.consume(1);
        assert!(!source.is_finished(&ctx));
        assert_eq!(source.state(), SourceState::Draining);
        assert!(handle.lock().wave().is_invalid());

        probe.consume(1);
        assert!(source.is_finished(&ctx));
        assert_eq!(probe.script().submitted, vec![0, 1]);
        assert_eq!(handle.lock().notify_count(), 1);
    }

    #[test]
    fn test_streaming_starvation_restarts_once() {
        let ctx = AudioRuntimeContext::new();
        let (mut source, backend, _handle) = streaming_source(LoopingMode::Forever, 1, 100);
        let probe = backend.probe(0);
        source.play();
        assert_eq!(probe.script().play_calls, 1);

        probe.consume(2);
        assert_eq!(probe.script().state, PlaybackState::Stopped);
        assert!(!source.is_finished(&ctx));

        let script = probe.script();
        assert_eq!(script.play_calls, 2);
        assert_eq!(script.pending.len(), 2);
        assert_eq!(script.submitted, vec![0, 1, 2, 3]);
        drop(script);

        assert!(!source.is_finished(&ctx));
        assert_eq!(probe.script().play_calls, 2);
    }

    #[test]
    fn test_rejected_refill_is_retried_next_poll() {
        let ctx = AudioRuntimeContext::new();
        let (mut source, backend, handle) = streaming_source(LoopingMode::Forever, 1, 100);
        let probe = backend.probe(0);
        source.play();

        probe.consume(1);
        probe.script().fail_queue = true;
        assert!(!source.is_finished(&ctx));
        assert_eq!(probe.script().submitted, vec![0, 1]);
        assert_eq!(source.active_buffer_count(), 1);
        assert_eq!(source.state(), SourceState::Playing);

        probe.script().fail_queue = false;
        assert!(!source.is_finished(&ctx));
        assert_eq!(probe.script().submitted, vec![0, 1, 2]);
        assert_eq!(source.active_buffer_count(), 2);
        assert!(!handle.lock().wave().is_invalid());
    }

    #[test]
    fn test_stream_ending_while_priming_finishes_without_padding() {
        let ctx = AudioRuntimeContext::new();
        let (mut source, backend, handle) = streaming_source(LoopingMode::Never, 1, 1);
        let probe = backend.probe(0);
        assert_eq!(source.state(), SourceState::Initialized);
        assert_eq!(probe.script().submitted, vec![0]);

        source.play();
        assert_eq!(source.state(), SourceState::Draining);
        probe.consume(1);
        assert!(source.is_finished(&ctx));
        assert_eq!(probe.script().submitted, vec![0]);
        assert_eq!(handle.lock().notify_count(), 1);
    }

    #[test]
    fn test_stop_halts_voice_once() {
        let (mut source, backend, handle) = resident_source(LoopingMode::Never);
        let probe = backend.probe(0);
        source.play();

        source.stop();
        assert_eq!(probe.script().stop_calls, 1);
        assert_eq!(handle.lock().notify_count(), 1);
        source.stop();
        assert_eq!(probe.script().stop_calls, 1);
    }
}

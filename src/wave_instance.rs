//! Engine-side playback requests.
//!
//! A [`WaveInstance`] describes one request to play a [`WaveResource`] with
//! runtime parameters. The mixer owns it; a sound source only reads its
//! parameters once per tick and reports completion through
//! [`WaveInstance::notify_finished`].

use crate::audio_data::WaveResource;
use glam::Vec3;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// How a source treats the end of its material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopingMode {
    /// Play once, drain queued audio, then finish
    #[default]
    Never,
    /// Loop seamlessly, notifying the instance at every loop point
    WithNotification,
    /// Loop seamlessly without notifications
    Forever,
}

/// Called when a wave instance is notified. Returning `true` asks a looping
/// source to leave its loop.
pub type FinishedHook = Box<dyn FnMut(&WaveInstance) -> bool + Send>;

pub struct WaveInstance {
    id: u64,
    wave: Arc<WaveResource>,
    pub volume: f32,
    pub volume_multiplier: f32,
    pub pitch: f32,
    pub looping_mode: LoopingMode,
    pub location: Vec3,
    pub velocity: Vec3,
    pub use_spatialization: bool,
    pub reverb: bool,
    pub apply_radio_filter: bool,
    pub eq_filter_applied: bool,
    pub high_frequency_gain: f32,
    pub stereo_bleed: f32,
    pub lfe_bleed: f32,
    /// Higher plays first when voices are scarce. Zero is inaudible.
    pub play_priority: f32,
    is_started: bool,
    is_finished: bool,
    already_notified: bool,
    notify_count: u32,
    finished_hook: Option<FinishedHook>,
}

impl fmt::Debug for WaveInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaveInstance")
            .field("id", &self.id)
            .field("wave", &self.wave.name())
            .field("volume", &self.volume)
            .field("pitch", &self.pitch)
            .field("looping_mode", &self.looping_mode)
            .field("is_started", &self.is_started)
            .field("is_finished", &self.is_finished)
            .field("notify_count", &self.notify_count)
            .finish_non_exhaustive()
    }
}

impl WaveInstance {
    pub fn new(wave: Arc<WaveResource>) -> Self {
        Self {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            wave,
            volume: 1.0,
            volume_multiplier: 1.0,
            pitch: 1.0,
            looping_mode: LoopingMode::Never,
            location: Vec3::ZERO,
            velocity: Vec3::ZERO,
            use_spatialization: false,
            reverb: true,
            apply_radio_filter: false,
            eq_filter_applied: false,
            high_frequency_gain: 1.0,
            stereo_bleed: 0.0,
            lfe_bleed: 0.0,
            play_priority: 1.0,
            is_started: false,
            is_finished: false,
            already_notified: false,
            notify_count: 0,
            finished_hook: None,
        }
    }

    pub fn looping(mut self, mode: LoopingMode) -> Self {
        self.looping_mode = mode;
        self
    }

    pub fn spatialized_at(mut self, location: Vec3) -> Self {
        self.use_spatialization = true;
        self.location = location;
        self
    }

    pub fn with_finished_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&WaveInstance) -> bool + Send + 'static,
    {
        self.finished_hook = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn wave(&self) -> &Arc<WaveResource> {
        &self.wave
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    /// Number of notifications that reached this instance.
    pub fn notify_count(&self) -> u32 {
        self.notify_count
    }

    pub(crate) fn mark_started(&mut self) {
        self.is_started = true;
    }

    /// Report that the current playback buffer finished.
    ///
    /// Loop-notifying instances are told at every loop point. Everything else
    /// is notified at most once; repeats are ignored. Returns whether the
    /// hook wants the loop to exit.
    pub fn notify_finished(&mut self) -> bool {
        let loop_point = self.looping_mode == LoopingMode::WithNotification && !self.is_finished;
        if self.already_notified && !loop_point {
            return false;
        }

        if !self.is_started {
            log::warn!(
                "Received finished notification from wave instance {} that hasn't started",
                self.id
            );
        }

        self.notify_count += 1;

        let exit_loop = match self.finished_hook.take() {
            Some(mut hook) => {
                let result = hook(self);
                self.finished_hook = Some(hook);
                result
            }
            None => false,
        };

        if !loop_point || exit_loop {
            self.is_finished = true;
            self.already_notified = true;
        }

        exit_loop
    }

    /// Stop without notifying. Forever-looping instances keep running.
    pub fn stop_without_notification(&mut self) {
        self.is_finished = self.looping_mode != LoopingMode::Forever;
    }
}

/// Shared handle to a wave instance, held by the mixer and the bound source.
#[derive(Clone, Debug)]
pub struct WaveInstanceHandle(Arc<Mutex<WaveInstance>>);

impl WaveInstanceHandle {
    pub fn new(instance: WaveInstance) -> Self {
        Self(Arc::new(Mutex::new(instance)))
    }

    pub fn lock(&self) -> MutexGuard<'_, WaveInstance> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<WaveInstance> for WaveInstanceHandle {
    fn from(instance: WaveInstance) -> Self {
        Self::new(instance)
    }
}

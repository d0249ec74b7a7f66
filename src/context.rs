//! Process-wide audio state shared by every source during an update pass.

/// State created at device init and passed by reference into each source
/// update. Sources only read it.
#[derive(Debug, Clone)]
pub struct AudioRuntimeContext {
    global_volume_multiplier: f32,
    current_tick: u64,
}

impl Default for AudioRuntimeContext {
    fn default() -> Self {
        Self {
            global_volume_multiplier: 1.0,
            current_tick: 0,
        }
    }
}

impl AudioRuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Multiplier applied on top of every source volume, used to silence
    /// audio when the application loses focus.
    pub fn global_volume_multiplier(&self) -> f32 {
        self.global_volume_multiplier
    }

    pub fn set_global_volume_multiplier(&mut self, multiplier: f32) {
        self.global_volume_multiplier = multiplier.clamp(0.0, 1.0);
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub(crate) fn advance_tick(&mut self) -> u64 {
        self.current_tick += 1;
        self.current_tick
    }
}

//! Per-source effect routing.
//!
//! The DSP itself lives outside this crate; sources only ask which effects
//! apply and forward the resulting coefficients to their voice once per tick.

use crate::wave_instance::WaveInstance;

/// Coefficients forwarded verbatim to a hardware voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceEffects {
    pub reverb_applied: bool,
    pub radio_applied: bool,
    pub eq_applied: bool,
    pub high_frequency_gain: f32,
    pub stereo_bleed: f32,
    pub lfe_bleed: f32,
}

impl Default for VoiceEffects {
    fn default() -> Self {
        Self {
            reverb_applied: false,
            radio_applied: false,
            eq_applied: false,
            high_frequency_gain: 1.0,
            stereo_bleed: 0.0,
            lfe_bleed: 0.0,
        }
    }
}

pub trait EffectsManager {
    /// Compute the effect state for one source for this tick.
    fn voice_effects(&mut self, wave_instance: &WaveInstance) -> VoiceEffects;
}

/// Forwards the wave instance's own settings. Radio distortion is gated by a
/// device-wide switch.
#[derive(Debug, Clone)]
pub struct PassthroughEffects {
    pub radio_enabled: bool,
}

impl Default for PassthroughEffects {
    fn default() -> Self {
        Self {
            radio_enabled: true,
        }
    }
}

impl EffectsManager for PassthroughEffects {
    fn voice_effects(&mut self, wave_instance: &WaveInstance) -> VoiceEffects {
        VoiceEffects {
            reverb_applied: wave_instance.reverb,
            radio_applied: self.radio_enabled && wave_instance.apply_radio_filter,
            eq_applied: wave_instance.eq_filter_applied,
            high_frequency_gain: wave_instance.high_frequency_gain.clamp(0.0, 1.0),
            stereo_bleed: wave_instance.stereo_bleed.clamp(0.0, 1.0),
            lfe_bleed: wave_instance.lfe_bleed.clamp(0.0, 1.0),
        }
    }
}

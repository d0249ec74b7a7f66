//! Streaming sound sources over pluggable hardware voices.
//!
//! An [`AudioDevice`] owns a pool of [`SoundSource`]s and the table of
//! resident [`SoundBuffer`]s. Each tick the engine hands it the wave instances
//! it wants audible; sources queue resident buffers whole, or stream
//! compressed and procedural audio through a small ring of PCM chunks that is
//! refilled as the voice consumes it.

pub mod audio_data;
pub mod backend;
pub mod buffer;
pub mod config;
pub mod context;
pub mod decoder;
pub mod device;
pub mod effects;
pub mod error;
pub mod events;
pub mod ring;
pub mod source;
pub mod voice;
pub mod wave_instance;

#[cfg(test)]
mod test_support;

pub use audio_data::{DecodedPcm, DecompressionType, LoadOptions, WaveData, WaveResource};
pub use backend::{CpalBackend, SoftwareBackend, SoftwareMixer, SoftwareVoice};
pub use buffer::{BufferBinding, BufferTable, SoundBuffer};
pub use config::AudioDeviceDesc;
pub use context::AudioRuntimeContext;
pub use decoder::{CompressedAudioDecoder, ProceduralProducer, SymphoniaDecoder};
pub use device::{AudioDevice, ListSortBy, SoundListing};
pub use effects::{EffectsManager, PassthroughEffects, VoiceEffects};
pub use error::{Result, StreamVoiceError};
pub use events::AudioEvent;
pub use glam::Vec3;
pub use source::{SoundSource, SourceState};
pub use voice::{HardwareVoice, PcmChunk, PlaybackState, VoiceBackend};
pub use wave_instance::{LoopingMode, WaveInstance, WaveInstanceHandle};

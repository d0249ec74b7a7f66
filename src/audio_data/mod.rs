//! Wave resources and whole-file decoding.
//!
//! A [`WaveResource`] is the engine-side description of a playable sound: an id,
//! a name, its payload ([`WaveData`]) and how it should be decompressed
//! ([`DecompressionType`]). Fully resident payloads are decoded into
//! [`DecodedPcm`] by the Symphonia loader in this module.

mod load_options;
mod resampler;
mod symphonia_loader;

pub use load_options::{ConvertToMono, LoadOptions};
pub use resampler::AudioResampler;
pub use symphonia_loader::{StreamInfo, decode_all, probe};
pub(crate) use symphonia_loader::{OpenedStream, open_stream};

use crate::decoder::ProceduralProducer;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// How a wave's payload is turned into PCM for playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressionType {
    /// Not decided yet; resolved on first use by duration
    Setup,
    /// Decoded once up front, PCM kept resident and shared
    FullyResident,
    /// Decoder kept alive, decoded chunk by chunk while playing
    RealTime,
    /// Samples generated on demand by a producer
    Procedural,
    /// Raw PCM handed in by the caller
    Preview,
    /// The payload failed to parse; never retried
    Invalid,
}

/// Factory for the per-source producer of a procedural wave.
pub type ProducerFactory = Arc<dyn Fn() -> Box<dyn ProceduralProducer> + Send + Sync>;

/// Payload of a wave resource.
#[derive(Clone)]
pub enum WaveData {
    /// Encoded bitstream (WAV, Ogg Vorbis, FLAC, ...) held in memory
    Compressed {
        bytes: Arc<[u8]>,
        extension_hint: Option<String>,
    },
    /// Raw interleaved PCM
    Pcm(DecodedPcm),
    /// Generated audio
    Procedural {
        channels: u16,
        sample_rate: u32,
        factory: ProducerFactory,
    },
}

impl fmt::Debug for WaveData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compressed {
                bytes,
                extension_hint,
            } => f
                .debug_struct("Compressed")
                .field("len", &bytes.len())
                .field("extension_hint", extension_hint)
                .finish(),
            Self::Pcm(pcm) => f.debug_tuple("Pcm").field(pcm).finish(),
            Self::Procedural {
                channels,
                sample_rate,
                ..
            } => f
                .debug_struct("Procedural")
                .field("channels", channels)
                .field("sample_rate", sample_rate)
                .finish_non_exhaustive(),
        }
    }
}

/// A playable sound resource, shared between the engine and the audio device.
#[derive(Debug)]
pub struct WaveResource {
    resource_id: u64,
    name: String,
    data: WaveData,
    decompression: Mutex<DecompressionType>,
}

impl WaveResource {
    /// Encoded audio whose decompression mode is decided on first use.
    pub fn compressed(
        resource_id: u64,
        name: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        extension_hint: Option<&str>,
    ) -> Self {
        Self {
            resource_id,
            name: name.into(),
            data: WaveData::Compressed {
                bytes: bytes.into(),
                extension_hint: extension_hint.map(str::to_string),
            },
            decompression: Mutex::new(DecompressionType::Setup),
        }
    }

    /// Raw PCM supplied by the caller (recorded or synthesized speech, editor previews).
    pub fn preview(resource_id: u64, name: impl Into<String>, pcm: DecodedPcm) -> Self {
        Self {
            resource_id,
            name: name.into(),
            data: WaveData::Pcm(pcm),
            decompression: Mutex::new(DecompressionType::Preview),
        }
    }

    pub fn procedural(
        resource_id: u64,
        name: impl Into<String>,
        channels: u16,
        sample_rate: u32,
        factory: ProducerFactory,
    ) -> Self {
        Self {
            resource_id,
            name: name.into(),
            data: WaveData::Procedural {
                channels,
                sample_rate,
                factory,
            },
            decompression: Mutex::new(DecompressionType::Procedural),
        }
    }

    /// Force a decompression mode instead of letting the device decide.
    pub fn with_decompression(self, decompression: DecompressionType) -> Self {
        *self
            .decompression
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = decompression;
        self
    }

    pub fn resource_id(&self) -> u64 {
        self.resource_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &WaveData {
        &self.data
    }

    pub fn decompression_type(&self) -> DecompressionType {
        *self
            .decompression
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_decompression_type(&self, decompression: DecompressionType) {
        *self
            .decompression
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = decompression;
    }

    /// Mark the payload as unplayable. Later initialization attempts fail fast.
    pub fn mark_invalid(&self) {
        log::warn!(
            "Wave {} ({}) marked invalid, it will not be played",
            self.resource_id,
            self.name
        );
        self.set_decompression_type(DecompressionType::Invalid);
    }

    pub fn is_invalid(&self) -> bool {
        self.decompression_type() == DecompressionType::Invalid
    }
}

/// Interleaved f32 PCM plus its format.
#[derive(Debug, Clone)]
pub struct DecodedPcm {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl DecodedPcm {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub(crate) fn shared_samples(&self) -> Arc<[f32]> {
        self.samples.clone()
    }

    pub fn total_frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.total_frames() as f64 / self.sample_rate as f64)
    }

    /// Size of the PCM in bytes as held in memory.
    pub fn size_bytes(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Convert to mono by averaging all channels
    pub fn to_mono(&self) -> Self {
        if self.channels <= 1 {
            return self.clone();
        }

        let channels = self.channels as usize;
        let mono: Vec<f32> = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        Self::new(mono, self.sample_rate, 1)
    }
}

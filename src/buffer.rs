//! Sound buffers and the device-wide resource table.
//!
//! Resident and preview buffers are decoded once, registered under their
//! wave's resource id and shared read-only by every source playing them.
//! Real-time and procedural buffers carry per-playback decoder state, so each
//! source gets its own, owned exclusively and dropped when the source stops.

use crate::audio_data::{
    DecodedPcm, DecompressionType, LoadOptions, WaveData, WaveResource, decode_all, probe,
};
use crate::config::AudioDeviceDesc;
use crate::decoder::{CompressedAudioDecoder, ProceduralProducer, SymphoniaDecoder, read_procedural};
use crate::error::{Result, StreamVoiceError};
use crate::voice::PcmChunk;
use crossbeam_channel::{Receiver, TryRecvError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Format-specific contents of a sound buffer.
pub enum BufferPayload {
    Resident {
        pcm: Arc<[f32]>,
    },
    Preview {
        pcm: Arc<[f32]>,
    },
    RealTime {
        decoder: Box<dyn CompressedAudioDecoder>,
        compressed_size: usize,
    },
    Procedural {
        producer: Box<dyn ProceduralProducer>,
    },
}

impl fmt::Debug for BufferPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resident { pcm } => write!(f, "Resident({} samples)", pcm.len()),
            Self::Preview { pcm } => write!(f, "Preview({} samples)", pcm.len()),
            Self::RealTime {
                compressed_size, ..
            } => write!(f, "RealTime({} bytes)", compressed_size),
            Self::Procedural { .. } => write!(f, "Procedural"),
        }
    }
}

#[derive(Debug)]
pub struct SoundBuffer {
    resource_id: u64,
    name: String,
    channels: u16,
    sample_rate: u32,
    payload: BufferPayload,
}

impl SoundBuffer {
    fn resident(wave: &WaveResource, pcm: &DecodedPcm, preview: bool) -> Self {
        let samples = pcm.shared_samples();
        Self {
            resource_id: wave.resource_id(),
            name: wave.name().to_string(),
            channels: pcm.channels(),
            sample_rate: pcm.sample_rate(),
            payload: if preview {
                BufferPayload::Preview { pcm: samples }
            } else {
                BufferPayload::Resident { pcm: samples }
            },
        }
    }

    /// A per-source streaming buffer reading through `decoder`.
    pub fn real_time(
        name: impl Into<String>,
        decoder: Box<dyn CompressedAudioDecoder>,
        compressed_size: usize,
    ) -> Self {
        Self {
            resource_id: 0,
            name: name.into(),
            channels: decoder.channels(),
            sample_rate: decoder.sample_rate(),
            payload: BufferPayload::RealTime {
                decoder,
                compressed_size,
            },
        }
    }

    pub fn procedural(
        name: impl Into<String>,
        channels: u16,
        sample_rate: u32,
        producer: Box<dyn ProceduralProducer>,
    ) -> Self {
        Self {
            resource_id: 0,
            name: name.into(),
            channels,
            sample_rate,
            payload: BufferPayload::Procedural { producer },
        }
    }

    /// Resource id this buffer is registered under. Zero for buffers owned by a single source.
    pub fn resource_id(&self) -> u64 {
        self.resource_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn payload(&self) -> &BufferPayload {
        &self.payload
    }

    pub fn format(&self) -> DecompressionType {
        match self.payload {
            BufferPayload::Resident { .. } => DecompressionType::FullyResident,
            BufferPayload::Preview { .. } => DecompressionType::Preview,
            BufferPayload::RealTime { .. } => DecompressionType::RealTime,
            BufferPayload::Procedural { .. } => DecompressionType::Procedural,
        }
    }

    /// Whether playback pulls chunks through a ring rather than queueing one whole buffer.
    pub fn is_streaming(&self) -> bool {
        matches!(
            self.payload,
            BufferPayload::RealTime { .. } | BufferPayload::Procedural { .. }
        )
    }

    pub fn is_procedural(&self) -> bool {
        matches!(self.payload, BufferPayload::Procedural { .. })
    }

    /// Memory held by this buffer: PCM bytes for resident data, compressed
    /// bytes for real-time data.
    pub fn size_bytes(&self) -> usize {
        match &self.payload {
            BufferPayload::Resident { pcm } | BufferPayload::Preview { pcm } => {
                pcm.len() * std::mem::size_of::<f32>()
            }
            BufferPayload::RealTime {
                compressed_size, ..
            } => *compressed_size,
            BufferPayload::Procedural { .. } => 0,
        }
    }

    /// The whole decoded buffer as one chunk, for resident formats.
    pub fn resident_chunk(&self) -> Option<PcmChunk> {
        match &self.payload {
            BufferPayload::Resident { pcm } | BufferPayload::Preview { pcm } => Some(
                PcmChunk::whole(pcm.clone(), self.channels, self.sample_rate),
            ),
            _ => None,
        }
    }

    /// Produce the next chunk of a streaming buffer. Returns `true` when the
    /// end of the material was reached during the fill.
    pub(crate) fn fill_chunk(&mut self, destination: &mut [f32], looping: bool) -> Result<bool> {
        match &mut self.payload {
            BufferPayload::RealTime { decoder, .. } => {
                decoder.read_compressed_data(destination, looping)
            }
            BufferPayload::Procedural { producer } => {
                Ok(read_procedural(producer.as_mut(), destination))
            }
            BufferPayload::Resident { .. } | BufferPayload::Preview { .. } => {
                Err(StreamVoiceError::AudioFormat(format!(
                    "Buffer {} is resident and cannot be streamed",
                    self.name
                )))
            }
        }
    }
}

/// How a source holds its buffer.
#[derive(Debug)]
pub enum BufferBinding {
    /// Registered in the resource table, shared read-only
    Shared(Arc<SoundBuffer>),
    /// Created for one source and dropped with it
    Owned(Box<SoundBuffer>),
}

impl BufferBinding {
    pub fn buffer(&self) -> &SoundBuffer {
        match self {
            Self::Shared(buffer) => buffer,
            Self::Owned(buffer) => buffer,
        }
    }

    pub fn owned_mut(&mut self) -> Option<&mut SoundBuffer> {
        match self {
            Self::Shared(_) => None,
            Self::Owned(buffer) => Some(buffer),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }
}

struct PrecacheJob {
    receiver: Receiver<Result<DecodedPcm>>,
    wave: Arc<WaveResource>,
}

/// Resource id to buffer map plus in-flight decode-ahead jobs.
pub struct BufferTable {
    buffers: HashMap<u64, Arc<SoundBuffer>>,
    pending: HashMap<u64, PrecacheJob>,
    desc: AudioDeviceDesc,
}

impl BufferTable {
    pub fn new(desc: AudioDeviceDesc) -> Self {
        Self {
            buffers: HashMap::new(),
            pending: HashMap::new(),
            desc,
        }
    }

    fn load_options(&self) -> LoadOptions {
        let options = LoadOptions::new();
        if self.desc.resample_resident {
            options.target_sample_rate(self.desc.sample_rate)
        } else {
            options
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, resource_id: u64) -> Option<&Arc<SoundBuffer>> {
        self.buffers.get(&resource_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SoundBuffer>> {
        self.buffers.values()
    }

    pub fn is_precaching(&self, resource_id: u64) -> bool {
        self.pending.contains_key(&resource_id)
    }

    /// Settle the decompression mode of a wave still in `Setup`.
    fn resolve_decompression(&self, wave: &WaveResource) -> DecompressionType {
        let current = wave.decompression_type();
        if current != DecompressionType::Setup {
            return current;
        }

        let resolved = match wave.data() {
            WaveData::Pcm(_) => DecompressionType::Preview,
            WaveData::Procedural { .. } => DecompressionType::Procedural,
            WaveData::Compressed {
                bytes,
                extension_hint,
            } => match probe(bytes.clone(), extension_hint.as_deref()) {
                Ok(info) if info.channels == 0 => {
                    log::warn!("Wave {} declares zero channels", wave.name());
                    DecompressionType::Invalid
                }
                Ok(info) => match info.duration {
                    Some(duration) if duration >= self.desc.min_compressed_duration => {
                        DecompressionType::RealTime
                    }
                    _ => DecompressionType::FullyResident,
                },
                Err(e) => {
                    log::warn!("Failed to parse header of wave {}: {}", wave.name(), e);
                    DecompressionType::Invalid
                }
            },
        };

        if resolved == DecompressionType::Invalid {
            wave.mark_invalid();
        } else {
            wave.set_decompression_type(resolved);
        }
        resolved
    }

    /// Start decoding a resident wave in the background. Returns `false` when
    /// there is nothing to do (already resident, already queued, or not a
    /// resident wave).
    pub fn precache(&mut self, wave: &Arc<WaveResource>) -> bool {
        let id = wave.resource_id();
        if id == 0 || self.buffers.contains_key(&id) || self.pending.contains_key(&id) {
            return false;
        }
        if self.resolve_decompression(wave) != DecompressionType::FullyResident {
            return false;
        }
        let WaveData::Compressed {
            bytes,
            extension_hint,
        } = wave.data()
        else {
            return false;
        };

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let bytes = bytes.clone();
        let extension_hint = extension_hint.clone();
        let options = self.load_options();

        let spawned = std::thread::Builder::new()
            .name(format!("precache-{}", id))
            .spawn(move || {
                let result = decode_all(bytes, extension_hint.as_deref(), &options);
                let _ = sender.send(result);
            });

        match spawned {
            Ok(_) => {
                log::debug!("Precaching wave {} ({})", id, wave.name());
                self.pending.insert(
                    id,
                    PrecacheJob {
                        receiver,
                        wave: wave.clone(),
                    },
                );
                true
            }
            Err(e) => {
                log::warn!("Failed to spawn precache job for {}: {}", wave.name(), e);
                false
            }
        }
    }

    /// Register every precache job that has completed. Never blocks.
    pub fn poll_precache(&mut self) {
        let mut finished = Vec::new();
        for (id, job) in &self.pending {
            match job.receiver.try_recv() {
                Ok(result) => finished.push((*id, Some(result))),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => finished.push((*id, None)),
            }
        }

        for (id, result) in finished {
            if let Some(job) = self.pending.remove(&id) {
                self.complete_precache(&job.wave, result);
            }
        }
    }

    fn complete_precache(
        &mut self,
        wave: &WaveResource,
        result: Option<Result<DecodedPcm>>,
    ) -> Option<Arc<SoundBuffer>> {
        match result {
            Some(Ok(pcm)) => self.register_resident(wave, &pcm, false),
            Some(Err(e)) => {
                log::warn!("Precache of {} failed: {}", wave.name(), e);
                wave.mark_invalid();
                None
            }
            None => {
                log::warn!("Precache job for {} vanished", wave.name());
                None
            }
        }
    }

    fn register_resident(
        &mut self,
        wave: &WaveResource,
        pcm: &DecodedPcm,
        preview: bool,
    ) -> Option<Arc<SoundBuffer>> {
        if pcm.channels() == 0 {
            log::warn!("Wave {} has zero channels, not registering", wave.name());
            return None;
        }

        let buffer = Arc::new(SoundBuffer::resident(wave, pcm, preview));
        if buffer.resource_id == 0 {
            return Some(buffer);
        }

        log::info!(
            "Registered buffer {} ({}): {} bytes",
            buffer.resource_id,
            buffer.name,
            buffer.size_bytes()
        );
        self.buffers.insert(buffer.resource_id, buffer.clone());
        Some(buffer)
    }

    /// Find or create the buffer a source needs to play `wave`.
    ///
    /// Fails with [`StreamVoiceError::InvalidResource`] when the wave cannot
    /// be played: invalid payload, zero channels, or a decoder that fails to
    /// open (which also marks the wave invalid so it is never retried).
    pub fn init_buffer(&mut self, wave: &Arc<WaveResource>) -> Result<BufferBinding> {
        let id = wave.resource_id();

        match self.resolve_decompression(wave) {
            DecompressionType::Invalid | DecompressionType::Setup => {
                Err(invalid_resource(wave, "payload could not be classified"))
            }

            DecompressionType::FullyResident => {
                if let Some(buffer) = self.buffers.get(&id) {
                    return Ok(BufferBinding::Shared(buffer.clone()));
                }

                // A running decode-ahead job must finish before the buffer is usable
                if let Some(job) = self.pending.remove(&id) {
                    let result = job.receiver.recv().ok();
                    return self
                        .complete_precache(wave, result)
                        .map(Self::bind)
                        .ok_or_else(|| invalid_resource(wave, "decode-ahead produced no buffer"));
                }

                let WaveData::Compressed {
                    bytes,
                    extension_hint,
                } = wave.data()
                else {
                    return Err(invalid_resource(wave, "resident wave has no encoded data"));
                };

                match decode_all(bytes.clone(), extension_hint.as_deref(), &self.load_options()) {
                    Ok(pcm) => self
                        .register_resident(wave, &pcm, false)
                        .map(Self::bind)
                        .ok_or_else(|| invalid_resource(wave, "zero channels")),
                    Err(e) => {
                        wave.mark_invalid();
                        Err(invalid_resource(wave, format!("decode failed: {}", e)))
                    }
                }
            }

            DecompressionType::Preview => {
                if let Some(buffer) = self.buffers.get(&id) {
                    return Ok(BufferBinding::Shared(buffer.clone()));
                }
                let WaveData::Pcm(pcm) = wave.data() else {
                    return Err(invalid_resource(wave, "preview wave carries no PCM"));
                };
                self.register_resident(wave, pcm, true)
                    .map(Self::bind)
                    .ok_or_else(|| invalid_resource(wave, "zero channels"))
            }

            DecompressionType::RealTime => {
                let WaveData::Compressed {
                    bytes,
                    extension_hint,
                } = wave.data()
                else {
                    return Err(invalid_resource(wave, "real-time wave has no encoded data"));
                };

                match SymphoniaDecoder::new(bytes.clone(), extension_hint.as_deref()) {
                    Ok(decoder) => Ok(BufferBinding::Owned(Box::new(SoundBuffer::real_time(
                        wave.name(),
                        Box::new(decoder),
                        bytes.len(),
                    )))),
                    Err(e) => {
                        wave.mark_invalid();
                        Err(invalid_resource(wave, format!("decoder failed to open: {}", e)))
                    }
                }
            }

            DecompressionType::Procedural => {
                let WaveData::Procedural {
                    channels,
                    sample_rate,
                    factory,
                } = wave.data()
                else {
                    return Err(invalid_resource(wave, "procedural wave has no producer"));
                };
                if *channels == 0 || *sample_rate == 0 {
                    return Err(invalid_resource(wave, "procedural wave has no channels"));
                }

                Ok(BufferBinding::Owned(Box::new(SoundBuffer::procedural(
                    wave.name(),
                    *channels,
                    *sample_rate,
                    factory(),
                ))))
            }
        }
    }

    fn bind(buffer: Arc<SoundBuffer>) -> BufferBinding {
        if buffer.resource_id == 0 {
            match Arc::try_unwrap(buffer) {
                Ok(buffer) => BufferBinding::Owned(Box::new(buffer)),
                Err(shared) => BufferBinding::Shared(shared),
            }
        } else {
            BufferBinding::Shared(buffer)
        }
    }

    /// Remove a buffer from the table. Sources still holding it keep their
    /// reference until they stop.
    pub fn remove(&mut self, resource_id: u64) -> Option<Arc<SoundBuffer>> {
        self.pending.remove(&resource_id);
        let removed = self.buffers.remove(&resource_id);
        if let Some(buffer) = &removed {
            log::info!("Removed buffer {} ({})", resource_id, buffer.name);
        }
        removed
    }
}

fn invalid_resource(wave: &WaveResource, reason: impl Into<String>) -> StreamVoiceError {
    StreamVoiceError::InvalidResource {
        resource_id: wave.resource_id(),
        name: wave.name().to_string(),
        reason: reason.into(),
    }
}

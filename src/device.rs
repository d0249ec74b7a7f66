//! The audio device: a fixed pool of sound sources plus the shared buffer table.
//!
//! The engine calls [`AudioDevice::update`] once per frame with every wave
//! instance it wants audible. The device retires finished sources, picks the
//! highest priority instances that fit in the pool, starts the new ones and
//! refreshes the rest.

use crate::audio_data::{DecompressionType, WaveResource};
use crate::buffer::BufferTable;
use crate::config::AudioDeviceDesc;
use crate::context::AudioRuntimeContext;
use crate::effects::{EffectsManager, PassthroughEffects};
use crate::error::Result;
use crate::events::AudioEvent;
use crate::source::SoundSource;
use crate::voice::VoiceBackend;
use crate::wave_instance::WaveInstanceHandle;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Sort order for [`AudioDevice::list_sounds`]. Both sort descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListSortBy {
    #[default]
    Size,
    Name,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoundListingRow {
    pub resource_id: u64,
    pub name: String,
    pub format: DecompressionType,
    pub channels: u16,
    pub sample_rate: u32,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SoundListing {
    pub rows: Vec<SoundListingRow>,
    pub resident_bytes: usize,
    pub real_time_bytes: usize,
}

impl fmt::Display for SoundListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>10} {:>14} {:>3} {:>6}  Name", "Size", "Format", "Ch", "Rate")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:>10} {:>14} {:>3} {:>6}  {}",
                row.size_bytes,
                format!("{:?}", row.format),
                row.channels,
                row.sample_rate,
                row.name
            )?;
        }
        write!(
            f,
            "{} sounds, {} bytes resident, {} bytes streaming",
            self.rows.len(),
            self.resident_bytes,
            self.real_time_bytes
        )
    }
}

pub struct AudioDevice<B: VoiceBackend> {
    desc: AudioDeviceDesc,
    backend: B,
    context: AudioRuntimeContext,
    effects: Box<dyn EffectsManager>,
    buffers: BufferTable,
    sources: Vec<SoundSource<B::Voice>>,
    free_sources: Vec<usize>,
    /// Wave instance id to the index of the source playing it
    instance_sources: HashMap<u64, usize>,
    event_sender: Sender<AudioEvent>,
    event_receiver: Receiver<AudioEvent>,
}

impl<B: VoiceBackend> AudioDevice<B> {
    pub fn new(desc: AudioDeviceDesc, backend: B) -> Result<Self> {
        desc.validate()?;

        let sources = (0..desc.max_channels)
            .map(|index| SoundSource::new(index, &desc))
            .collect();
        let free_sources = (0..desc.max_channels).rev().collect();
        let (event_sender, event_receiver) = unbounded();

        log::info!(
            "Audio device created: {} sources, {}ch @ {}Hz",
            desc.max_channels,
            desc.channels,
            desc.sample_rate
        );

        Ok(Self {
            buffers: BufferTable::new(desc.clone()),
            desc,
            backend,
            context: AudioRuntimeContext::new(),
            effects: Box::new(PassthroughEffects::default()),
            sources,
            free_sources,
            instance_sources: HashMap::new(),
            event_sender,
            event_receiver,
        })
    }

    pub fn config(&self) -> &AudioDeviceDesc {
        &self.desc
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn context(&self) -> &AudioRuntimeContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut AudioRuntimeContext {
        &mut self.context
    }

    pub fn set_global_volume_multiplier(&mut self, multiplier: f32) {
        self.context.set_global_volume_multiplier(multiplier);
    }

    pub fn set_effects_manager(&mut self, effects: Box<dyn EffectsManager>) {
        self.effects = effects;
    }

    pub fn buffers(&self) -> &BufferTable {
        &self.buffers
    }

    pub fn source(&self, index: usize) -> Option<&SoundSource<B::Voice>> {
        self.sources.get(index)
    }

    /// Sources currently bound to a wave instance.
    pub fn active_source_count(&self) -> usize {
        self.instance_sources.len()
    }

    pub fn free_source_count(&self) -> usize {
        self.free_sources.len()
    }

    pub fn is_playing(&self, instance: &WaveInstanceHandle) -> bool {
        self.instance_sources.contains_key(&instance.lock().id())
    }

    /// Start decoding a resident wave ahead of its first play.
    pub fn precache(&mut self, wave: &Arc<WaveResource>) -> bool {
        self.buffers.precache(wave)
    }

    /// Drain every event raised since the last call.
    pub fn poll_events(&self) -> Vec<AudioEvent> {
        self.event_receiver.try_iter().collect()
    }

    fn emit(&self, event: AudioEvent) {
        let _ = self.event_sender.send(event);
    }

    fn retire_source(&mut self, index: usize, instance_id: u64) {
        self.instance_sources.remove(&instance_id);
        self.free_sources.push(index);
    }

    /// Run one mix tick for the requested wave instances.
    pub fn update(&mut self, wave_instances: &[WaveInstanceHandle]) {
        let tick = self.context.advance_tick();
        self.buffers.poll_precache();

        self.retire_finished_sources();

        // Highest priority first, inaudible and finished instances skipped
        let mut seen = HashSet::new();
        let mut requested: Vec<(f32, u64, &WaveInstanceHandle)> = wave_instances
            .iter()
            .filter_map(|handle| {
                let instance = handle.lock();
                let wanted = instance.play_priority > 0.0 && !instance.is_finished();
                wanted.then(|| (instance.play_priority, instance.id(), handle))
            })
            .filter(|(_, id, _)| seen.insert(*id))
            .collect();
        requested.sort_by(|a, b| b.0.total_cmp(&a.0));

        // Instances that miss the cut are dropped, except endless loops
        if requested.len() > self.desc.max_channels {
            for (_, instance_id, handle) in requested.drain(self.desc.max_channels..) {
                if !self.instance_sources.contains_key(&instance_id) {
                    handle.lock().stop_without_notification();
                }
            }
        }

        let keep: HashSet<u64> = requested.iter().map(|(_, id, _)| *id).collect();
        let evicted: Vec<(u64, usize)> = self
            .instance_sources
            .iter()
            .filter(|(id, _)| !keep.contains(*id))
            .map(|(id, index)| (*id, *index))
            .collect();
        for (instance_id, index) in evicted {
            self.sources[index].stop();
            self.retire_source(index, instance_id);
            self.emit(AudioEvent::SourceStopped { instance_id });
        }

        for (_, instance_id, handle) in requested {
            if let Some(&index) = self.instance_sources.get(&instance_id) {
                self.sources[index].update(&self.context, self.effects.as_mut());
                continue;
            }

            let Some(index) = self.free_sources.pop() else {
                continue;
            };

            let source = &mut self.sources[index];
            if source.init(handle, &mut self.buffers, &mut self.backend) {
                source.update(&self.context, self.effects.as_mut());
                source.play();
                self.instance_sources.insert(instance_id, index);
                log::debug!(
                    "Tick {}: instance {} started on source {}",
                    tick,
                    instance_id,
                    index
                );
                self.emit(AudioEvent::SourceStarted {
                    instance_id,
                    source_index: index,
                });
            } else {
                let wave_name = {
                    let mut instance = handle.lock();
                    instance.stop_without_notification();
                    instance.wave().name().to_string()
                };
                self.free_sources.push(index);
                self.emit(AudioEvent::InitFailed {
                    instance_id,
                    wave_name,
                });
            }
        }
    }

    fn retire_finished_sources(&mut self) {
        let bound: Vec<(u64, usize)> = self
            .instance_sources
            .iter()
            .map(|(id, index)| (*id, *index))
            .collect();

        for (instance_id, index) in bound {
            let source = &mut self.sources[index];
            let finished = source.is_finished(&self.context);
            let loops = source.take_loop_count();
            let loop_count = source
                .wave_instance()
                .map_or(loops, |instance| instance.lock().notify_count());
            if finished {
                source.stop();
            }

            if loops > 0 {
                self.emit(AudioEvent::SourceLooped {
                    instance_id,
                    loop_count,
                });
            }
            if finished {
                self.retire_source(index, instance_id);
                self.emit(AudioEvent::SourceFinished { instance_id });
            }
        }
    }

    /// Stop every playing source.
    pub fn stop_all_sounds(&mut self) {
        let bound: Vec<(u64, usize)> = self.instance_sources.drain().collect();
        for (instance_id, index) in bound {
            self.sources[index].stop();
            self.free_sources.push(index);
            self.emit(AudioEvent::SourceStopped { instance_id });
        }
        log::debug!("Stopped all sounds");
    }

    /// Stop every source playing `wave` and drop its resident buffer.
    pub fn free_resource(&mut self, wave: &WaveResource) {
        let resource_id = wave.resource_id();
        if resource_id == 0 {
            return;
        }

        let bound: Vec<(u64, usize)> = self
            .instance_sources
            .iter()
            .filter(|(_, index)| {
                self.sources[**index]
                    .wave_instance()
                    .is_some_and(|instance| instance.lock().wave().resource_id() == resource_id)
            })
            .map(|(id, index)| (*id, *index))
            .collect();

        let stopped_sources = bound.len();
        for (instance_id, index) in bound {
            self.sources[index].stop();
            self.retire_source(index, instance_id);
            self.emit(AudioEvent::SourceStopped { instance_id });
        }

        let removed = self.buffers.remove(resource_id).is_some();
        if removed || stopped_sources > 0 {
            log::info!(
                "Freed resource {} ({}), stopped {} sources",
                resource_id,
                wave.name(),
                stopped_sources
            );
            self.emit(AudioEvent::ResourceFreed {
                resource_id,
                stopped_sources,
            });
        }
    }

    /// Resident buffers in the table plus the streaming buffers currently
    /// held by sources.
    pub fn list_sounds(&self, sort: ListSortBy) -> SoundListing {
        let shared = self.buffers.iter().map(|buffer| buffer.as_ref());
        let streaming = self
            .sources
            .iter()
            .filter_map(|source| source.buffer())
            .filter(|binding| !binding.is_shared())
            .map(|binding| binding.buffer());

        let mut listing = SoundListing::default();
        for buffer in shared.chain(streaming) {
            let format = buffer.format();
            match format {
                DecompressionType::FullyResident | DecompressionType::Preview => {
                    listing.resident_bytes += buffer.size_bytes()
                }
                DecompressionType::RealTime => listing.real_time_bytes += buffer.size_bytes(),
                _ => {}
            }
            listing.rows.push(SoundListingRow {
                resource_id: buffer.resource_id(),
                name: buffer.name().to_string(),
                format,
                channels: buffer.channels(),
                sample_rate: buffer.sample_rate(),
                size_bytes: buffer.size_bytes(),
            });
        }

        match sort {
            ListSortBy::Size => listing.rows.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes)),
            ListSortBy::Name => listing.rows.sort_by(|a, b| b.name.cmp(&a.name)),
        }
        listing
    }
}

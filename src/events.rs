//! Notifications raised by the audio device during its update pass

#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    SourceStarted {
        instance_id: u64,
        source_index: usize,
    },
    SourceLooped {
        instance_id: u64,
        loop_count: u32,
    },
    SourceFinished {
        instance_id: u64,
    },
    /// Stopped before reaching its end (evicted, freed or stopped explicitly)
    SourceStopped {
        instance_id: u64,
    },
    InitFailed {
        instance_id: u64,
        wave_name: String,
    },
    ResourceFreed {
        resource_id: u64,
        stopped_sources: usize,
    },
}

impl AudioEvent {
    pub fn instance_id(&self) -> Option<u64> {
        match self {
            Self::SourceStarted { instance_id, .. }
            | Self::SourceLooped { instance_id, .. }
            | Self::SourceFinished { instance_id }
            | Self::SourceStopped { instance_id }
            | Self::InitFailed { instance_id, .. } => Some(*instance_id),
            Self::ResourceFreed { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::InitFailed { .. })
    }
}

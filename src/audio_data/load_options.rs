#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvertToMono {
    /// Keep original channels: stereo if input is stereo, mono if input is mono
    #[default]
    Original,
    /// Force mono: if input is mono use it, if input is stereo combine both channels into mono
    ForceMono,
}

/// Options applied when a wave is fully decoded into resident PCM.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// How to handle mono conversion
    pub convert_to_mono: ConvertToMono,
    /// Resample to this rate after decoding (None = keep the stream's rate)
    pub target_sample_rate: Option<u32>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert_to_mono(mut self, convert: ConvertToMono) -> Self {
        self.convert_to_mono = convert;
        self
    }

    pub fn target_sample_rate(mut self, rate: u32) -> Self {
        self.target_sample_rate = Some(rate);
        self
    }
}

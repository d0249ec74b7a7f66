use crate::audio_data::DecodedPcm;
use crate::error::{Result, StreamVoiceError};
use rubato::{FftFixedIn, Resampler};

/// Offline sample rate converter used when precaching resident PCM.
pub struct AudioResampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    channels: u16,
    chunk_size: usize,
}

impl AudioResampler {
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: u16,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(StreamVoiceError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        if channels == 0 {
            return Err(StreamVoiceError::AudioFormat(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            channels,
            chunk_size: chunk_size.unwrap_or(1024),
        })
    }

    /// Resample interleaved PCM, returning interleaved PCM at the target rate.
    pub fn resample_interleaved(&self, interleaved: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(interleaved.to_vec());
        }

        let channels = self.channels as usize;
        let frames = interleaved.len() / channels;

        let mut resampler = FftFixedIn::<f32>::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2, // sub_chunks
            channels,
        )
        .map_err(|e| StreamVoiceError::AudioLoading(format!("Failed to create resampler: {}", e)))?;

        // Deinterleave once up front
        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|ch| {
                interleaved
                    .chunks_exact(channels)
                    .map(|frame| frame[ch])
                    .collect()
            })
            .collect();

        let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
        let mut input_index = 0;

        while input_index < frames {
            let needed = resampler.input_frames_next();
            let available = (frames - input_index).min(needed);

            // The final chunk is zero-padded to the fixed input size
            let waves_in: Vec<Vec<f32>> = planar
                .iter()
                .map(|channel| {
                    let mut chunk = vec![0.0f32; needed];
                    chunk[..available]
                        .copy_from_slice(&channel[input_index..input_index + available]);
                    chunk
                })
                .collect();

            let waves_out = resampler
                .process(&waves_in, None)
                .map_err(|e| StreamVoiceError::AudioLoading(format!("Resampling error: {}", e)))?;

            for (out, resampled) in output.iter_mut().zip(waves_out) {
                out.extend_from_slice(&resampled);
            }

            input_index += available;
        }

        let expected_frames = (frames as f64 * self.resample_ratio()).ceil() as usize;
        let produced_frames = output.first().map(Vec::len).unwrap_or(0);
        let out_frames = expected_frames.min(produced_frames);

        let mut interleaved_out = Vec::with_capacity(out_frames * channels);
        for frame_idx in 0..out_frames {
            for channel in &output {
                interleaved_out.push(channel[frame_idx]);
            }
        }

        Ok(interleaved_out)
    }

    pub fn resample(&self, pcm: &DecodedPcm) -> Result<DecodedPcm> {
        if pcm.sample_rate() != self.source_sample_rate || pcm.channels() != self.channels {
            return Err(StreamVoiceError::AudioFormat(format!(
                "Resampler configured for {}Hz/{}ch but got {}Hz/{}ch",
                self.source_sample_rate,
                self.channels,
                pcm.sample_rate(),
                pcm.channels()
            )));
        }

        let samples = self.resample_interleaved(pcm.samples())?;
        Ok(DecodedPcm::new(samples, self.target_sample_rate, self.channels))
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    pub fn resample_ratio(&self) -> f64 {
        self.target_sample_rate as f64 / self.source_sample_rate as f64
    }
}

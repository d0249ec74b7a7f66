use crate::backend::software::{SoftwareBackend, SoftwareMixer, SoftwareVoice};
use crate::config::AudioDeviceDesc;
use crate::error::{Result, StreamVoiceError};
use crate::voice::VoiceBackend;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Plays software voices through the default cpal output device.
pub struct CpalBackend {
    desc: AudioDeviceDesc,
    voices: SoftwareBackend,
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
}

impl CpalBackend {
    pub fn new(desc: AudioDeviceDesc) -> Result<Self> {
        desc.validate()?;
        let voices = SoftwareBackend::new(desc.sample_rate, desc.channels);
        Ok(Self {
            desc,
            voices,
            stream: None,
            is_running: Arc::new(AtomicBool::new(false)),
            frames_processed: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Open the default output device and start pulling from the voices.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            StreamVoiceError::AudioDevice("No default output device available".into())
        })?;

        let config = cpal::StreamConfig {
            channels: self.desc.channels,
            sample_rate: cpal::SampleRate(self.desc.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.desc.block_size as u32),
        };

        let default_config = device.default_output_config().map_err(|e| {
            StreamVoiceError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;

        let mixer = self.voices.mixer();
        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.create_stream::<f32>(&device, &config, mixer)?,
            cpal::SampleFormat::I16 => self.create_stream::<i16>(&device, &config, mixer)?,
            cpal::SampleFormat::U16 => self.create_stream::<u16>(&device, &config, mixer)?,
            format => {
                return Err(StreamVoiceError::AudioFormat(format!(
                    "Unsupported sample format {:?}",
                    format
                )));
            }
        };

        stream.play().map_err(|e| {
            StreamVoiceError::AudioDevice(format!("Failed to start stream: {}", e))
        })?;

        log::info!(
            "Output stream started: {}ch @ {}Hz, block {}",
            self.desc.channels,
            self.desc.sample_rate,
            self.desc.block_size
        );

        self.stream = Some(stream);
        self.is_running.store(true, Ordering::Relaxed);

        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
            log::info!("Output stream stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Frames delivered to the device since start
    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &AudioDeviceDesc {
        &self.desc
    }

    fn create_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mixer: SoftwareMixer,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let is_running = self.is_running.clone();
        let frames_processed = self.frames_processed.clone();
        let mut scratch: Vec<f32> = Vec::new();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if !is_running.load(Ordering::Relaxed) {
                        for sample in data.iter_mut() {
                            *sample = T::from_sample(0.0f32);
                        }
                        return;
                    }

                    if scratch.len() != data.len() {
                        scratch.resize(data.len(), 0.0);
                    }

                    let frames = mixer.try_render(&mut scratch);

                    for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(*sample);
                    }

                    frames_processed.fetch_add(frames, Ordering::Relaxed);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| StreamVoiceError::AudioDevice(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }
}

impl VoiceBackend for CpalBackend {
    type Voice = SoftwareVoice;

    fn create_voice(&mut self) -> Result<SoftwareVoice> {
        self.voices.create_voice()
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

use crate::{
    audio_data::{AudioResampler, ConvertToMono, DecodedPcm, LoadOptions},
    error::{Result, StreamVoiceError},
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use symphonia::{
    core::{
        audio::SampleBuffer,
        codecs::{Decoder, DecoderOptions},
        errors::Error,
        formats::{FormatOptions, FormatReader},
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Header information of an encoded stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    /// Zero when the container does not declare a channel layout
    pub channels: u16,
    pub duration: Option<Duration>,
}

/// A probed format reader with a decoder for its default track.
pub(crate) struct OpenedStream {
    pub format: Box<dyn FormatReader>,
    pub decoder: Box<dyn Decoder>,
    pub track_id: u32,
    pub info: StreamInfo,
}

pub(crate) fn open_stream(bytes: Arc<[u8]>, extension_hint: Option<&str>) -> Result<OpenedStream> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| StreamVoiceError::Decoder(format!("Failed to probe audio format: {:?}", e)))?;

    let format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| StreamVoiceError::Decoder("No default audio track found".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| StreamVoiceError::Decoder("Sample rate not found".to_string()))?;
    let channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let duration = params
        .n_frames
        .map(|frames| Duration::from_secs_f64(frames as f64 / sample_rate as f64));

    let decoder = get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| StreamVoiceError::Decoder(format!("Failed to create decoder: {:?}", e)))?;

    Ok(OpenedStream {
        format,
        decoder,
        track_id,
        info: StreamInfo {
            sample_rate,
            channels,
            duration,
        },
    })
}

/// Parse the header of an encoded stream without decoding any audio.
pub fn probe(bytes: Arc<[u8]>, extension_hint: Option<&str>) -> Result<StreamInfo> {
    open_stream(bytes, extension_hint).map(|stream| stream.info)
}

/// Decode an entire encoded stream into resident PCM.
pub fn decode_all(
    bytes: Arc<[u8]>,
    extension_hint: Option<&str>,
    options: &LoadOptions,
) -> Result<DecodedPcm> {
    let OpenedStream {
        mut format,
        mut decoder,
        track_id,
        info,
    } = open_stream(bytes, extension_hint)?;

    if info.channels == 0 {
        return Err(StreamVoiceError::AudioFormat(
            "Stream declares zero channels".to_string(),
        ));
    }

    let mut samples: Vec<f32> = Vec::new();

    loop {
        // Read the next packet from the container
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break, // end-of-file
            Err(e) => {
                return Err(StreamVoiceError::AudioLoading(format!(
                    "Error reading packet: {:?}",
                    e
                )));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::IoError(_)) => break, // also EOF in some formats
            Err(Error::DecodeError(_)) => continue, // recoverable corruption
            Err(e) => {
                return Err(StreamVoiceError::AudioLoading(format!(
                    "Error decoding packet: {:?}",
                    e
                )));
            }
        };

        let spec = *decoded.spec();
        let capacity = decoded.capacity();

        let mut tmp = SampleBuffer::<f32>::new(capacity as u64, spec);
        tmp.copy_interleaved_ref(decoded);

        samples.extend_from_slice(tmp.samples());
    }

    let mut pcm = DecodedPcm::new(samples, info.sample_rate, info.channels);

    if options.convert_to_mono == ConvertToMono::ForceMono {
        pcm = pcm.to_mono();
    }

    if let Some(target_rate) = options.target_sample_rate {
        if target_rate != pcm.sample_rate() && !pcm.is_empty() {
            let resampler =
                AudioResampler::new(pcm.sample_rate(), target_rate, pcm.channels(), Some(1024))?;
            pcm = resampler.resample(&pcm)?;
        }
    }

    log::debug!(
        "Decoded {} frames ({}ch @ {}Hz)",
        pcm.total_frames(),
        pcm.channels(),
        pcm.sample_rate()
    );

    Ok(pcm)
}

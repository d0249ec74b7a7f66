//! Incremental PCM producers used by streaming sources.
//!
//! Realtime-decompressed waves are read through a [`CompressedAudioDecoder`];
//! procedural waves through a [`ProceduralProducer`]. Both fill a caller-owned
//! chunk and report whether the end of the material was reached during the fill.

use crate::audio_data::{OpenedStream, open_stream};
use crate::error::{Result, StreamVoiceError};
use std::sync::Arc;
use symphonia::core::{audio::SampleBuffer, errors::Error};

/// Decodes an encoded stream one chunk at a time.
pub trait CompressedAudioDecoder: Send {
    /// Fill `destination` with interleaved PCM.
    ///
    /// When the stream runs out before `destination` is full it is rewound and
    /// decoding continues if `looping` is set, otherwise the remainder is
    /// zero-padded. Returns `true` when the end of the stream was reached during
    /// this call, whether or not it looped.
    fn read_compressed_data(&mut self, destination: &mut [f32], looping: bool) -> Result<bool>;

    fn channels(&self) -> u16;

    fn sample_rate(&self) -> u32;
}

/// Generates samples on demand for procedural waves.
pub trait ProceduralProducer: Send {
    /// Write up to `destination.len()` interleaved samples and return how many were written.
    fn generate(&mut self, destination: &mut [f32]) -> usize;
}

/// Pull one chunk from a procedural producer.
///
/// A short return is zero-padded and reported as end of stream. Procedural
/// audio never wraps.
pub fn read_procedural(producer: &mut dyn ProceduralProducer, destination: &mut [f32]) -> bool {
    let written = producer.generate(destination).min(destination.len());
    if written < destination.len() {
        destination[written..].fill(0.0);
        return true;
    }
    false
}

/// [`CompressedAudioDecoder`] backed by Symphonia, reading from an in-memory bitstream.
pub struct SymphoniaDecoder {
    bytes: Arc<[u8]>,
    extension_hint: Option<String>,
    stream: OpenedStream,
    pending: Vec<f32>,
    pending_pos: usize,
}

impl SymphoniaDecoder {
    pub fn new(bytes: Arc<[u8]>, extension_hint: Option<&str>) -> Result<Self> {
        let stream = open_stream(bytes.clone(), extension_hint)?;
        if stream.info.channels == 0 {
            return Err(StreamVoiceError::AudioFormat(
                "Stream declares zero channels".to_string(),
            ));
        }

        Ok(Self {
            bytes,
            extension_hint: extension_hint.map(str::to_string),
            stream,
            pending: Vec::new(),
            pending_pos: 0,
        })
    }

    /// Seek back to the first sample by reopening the bitstream.
    fn rewind(&mut self) -> Result<()> {
        self.stream = open_stream(self.bytes.clone(), self.extension_hint.as_deref())?;
        self.pending.clear();
        self.pending_pos = 0;
        Ok(())
    }

    /// Decode the next packet into `pending`. Returns `false` at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.stream.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => return Ok(false),
                Err(e) => {
                    return Err(StreamVoiceError::Decoder(format!(
                        "Error reading packet: {:?}",
                        e
                    )));
                }
            };

            if packet.track_id() != self.stream.track_id {
                continue;
            }

            let decoded = match self.stream.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(_)) => return Ok(false),
                Err(Error::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(StreamVoiceError::Decoder(format!(
                        "Error decoding packet: {:?}",
                        e
                    )));
                }
            };

            let spec = *decoded.spec();
            let mut tmp = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            tmp.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending.extend_from_slice(tmp.samples());
            self.pending_pos = 0;

            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl CompressedAudioDecoder for SymphoniaDecoder {
    fn read_compressed_data(&mut self, destination: &mut [f32], looping: bool) -> Result<bool> {
        let mut written = 0;
        let mut reached_end = false;
        // Guards against spinning on a stream that rewinds to nothing
        let mut written_since_rewind = usize::MAX;

        while written < destination.len() {
            if self.pending_pos < self.pending.len() {
                let count = (self.pending.len() - self.pending_pos).min(destination.len() - written);
                destination[written..written + count]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + count]);
                self.pending_pos += count;
                written += count;
                written_since_rewind = written_since_rewind.saturating_add(count);
                continue;
            }

            if self.decode_next()? {
                continue;
            }

            reached_end = true;
            if looping && written_since_rewind > 0 {
                self.rewind()?;
                written_since_rewind = 0;
                continue;
            }

            destination[written..].fill(0.0);
            break;
        }

        Ok(reached_end)
    }

    fn channels(&self) -> u16 {
        self.stream.info.channels
    }

    fn sample_rate(&self) -> u32 {
        self.stream.info.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::wav_bytes;

    fn ramp_decoder(frames: usize) -> SymphoniaDecoder {
        let samples: Vec<i16> = (0..frames).map(|i| (i as i16 + 1) * 8).collect();
        SymphoniaDecoder::new(wav_bytes(1, 8000, &samples), Some("wav")).unwrap()
    }

    #[test]
    fn test_read_without_reaching_end() {
        let mut decoder = ramp_decoder(1000);
        let mut chunk = vec![0.0f32; 400];

        assert!(!decoder.read_compressed_data(&mut chunk, false).unwrap());
        assert!((chunk[0] - 8.0 / 32768.0).abs() < 1e-6);
        assert!((chunk[399] - 3200.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_end_without_loop_zero_pads() {
        let mut decoder = ramp_decoder(600);
        let mut chunk = vec![1.0f32; 400];

        assert!(!decoder.read_compressed_data(&mut chunk, false).unwrap());
        assert!(decoder.read_compressed_data(&mut chunk, false).unwrap());
        assert!(chunk[199] != 0.0);
        assert!(chunk[200..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_end_with_loop_splices_head() {
        let mut decoder = ramp_decoder(600);
        let mut chunk = vec![0.0f32; 400];

        assert!(!decoder.read_compressed_data(&mut chunk, true).unwrap());
        assert!(decoder.read_compressed_data(&mut chunk, true).unwrap());
        // Tail of the first play followed directly by the head of the next
        assert!((chunk[199] - 4800.0 / 32768.0).abs() < 1e-6);
        assert!((chunk[200] - 8.0 / 32768.0).abs() < 1e-6);
        assert!((chunk[201] - 16.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_procedural_short_read_is_end() {
        struct Fixed(usize);
        impl ProceduralProducer for Fixed {
            fn generate(&mut self, destination: &mut [f32]) -> usize {
                let count = self.0.min(destination.len());
                destination[..count].fill(0.5);
                self.0 -= count;
                count
            }
        }

        let mut producer = Fixed(150);
        let mut chunk = vec![1.0f32; 100];
        assert!(!read_procedural(&mut producer, &mut chunk));
        assert!(read_procedural(&mut producer, &mut chunk));
        assert_eq!(chunk[49], 0.5);
        assert!(chunk[50..].iter().all(|s| *s == 0.0));
    }
}

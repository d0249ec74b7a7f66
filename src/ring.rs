//! Fixed set of PCM chunk slots for one streaming source.
//!
//! Slots are filled and handed to the voice in strict rotation, and released
//! in the same order as the voice reports them consumed. At most `depth`
//! chunks are outstanding at any time.

use crate::voice::PcmChunk;
use std::sync::Arc;

#[derive(Debug)]
struct RingSlot {
    memory: Arc<[f32]>,
    valid: usize,
    in_flight: bool,
}

#[derive(Debug)]
pub struct StreamingRingBuffer {
    slots: Vec<RingSlot>,
    /// Next slot to refill
    next_fill: usize,
    /// Oldest slot still owned by the voice
    oldest: usize,
    in_flight: usize,
    chunk_samples: usize,
    channels: u16,
    sample_rate: u32,
    next_sequence: u64,
}

impl StreamingRingBuffer {
    pub fn new(depth: usize, chunk_samples: usize, channels: u16, sample_rate: u32) -> Self {
        let slots = (0..depth.max(1))
            .map(|_| RingSlot {
                memory: vec![0.0f32; chunk_samples].into(),
                valid: 0,
                in_flight: false,
            })
            .collect();

        Self {
            slots,
            next_fill: 0,
            oldest: 0,
            in_flight: 0,
            chunk_samples,
            channels,
            sample_rate,
            next_sequence: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Chunks decoded and submitted but not yet consumed.
    pub fn active_count(&self) -> usize {
        self.in_flight
    }

    pub fn has_free_slot(&self) -> bool {
        self.in_flight < self.slots.len()
    }

    /// Index of the slot the voice is currently consuming.
    pub fn current_slot(&self) -> usize {
        self.oldest
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    /// Fill the next free slot and return it as a chunk ready for submission,
    /// together with the fill's end-of-stream flag. Returns `Ok(None)` when
    /// every slot is still owned by the voice.
    pub fn refill<E>(
        &mut self,
        fill: impl FnOnce(&mut [f32]) -> Result<bool, E>,
    ) -> Result<Option<(PcmChunk, bool)>, E> {
        if !self.has_free_slot() {
            return Ok(None);
        }

        let index = self.next_fill;
        let chunk_samples = self.chunk_samples;
        let slot = &mut self.slots[index];
        debug_assert!(!slot.in_flight);

        if Arc::get_mut(&mut slot.memory).is_none() {
            // The voice still references the old chunk
            log::debug!("Ring slot {} still referenced, reallocating", index);
            slot.memory = vec![0.0f32; chunk_samples].into();
        }

        let Some(memory) = Arc::get_mut(&mut slot.memory) else {
            unreachable!("freshly allocated slot memory is uniquely owned");
        };
        let reached_end = fill(memory)?;

        slot.valid = chunk_samples;
        slot.in_flight = true;

        let chunk = PcmChunk::new(
            slot.memory.clone(),
            slot.valid,
            self.channels,
            self.sample_rate,
            self.next_sequence,
        );

        self.next_sequence += 1;
        self.next_fill = (self.next_fill + 1) % self.slots.len();
        self.in_flight += 1;

        Ok(Some((chunk, reached_end)))
    }

    /// Mark the oldest outstanding chunk as consumed. `returned` is the chunk
    /// the voice handed back, if it did.
    pub fn release_oldest(&mut self, returned: Option<&PcmChunk>) -> bool {
        if self.in_flight == 0 {
            return false;
        }

        let slot = &mut self.slots[self.oldest];
        if let Some(chunk) = returned {
            if !chunk.shares_memory_with(&slot.memory) {
                log::warn!(
                    "Voice returned chunk {} out of order for ring slot {}",
                    chunk.sequence(),
                    self.oldest
                );
            }
        }

        slot.in_flight = false;
        slot.valid = 0;
        self.oldest = (self.oldest + 1) % self.slots.len();
        self.in_flight -= 1;
        true
    }

    /// Undo the most recent refill after the voice rejected its chunk.
    pub fn retract_newest(&mut self) -> bool {
        if self.in_flight == 0 {
            return false;
        }

        let depth = self.slots.len();
        self.next_fill = (self.next_fill + depth - 1) % depth;
        let slot = &mut self.slots[self.next_fill];
        slot.in_flight = false;
        slot.valid = 0;
        self.in_flight -= 1;
        self.next_sequence -= 1;
        true
    }
}

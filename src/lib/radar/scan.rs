//! Polar scan store shared between the data receiver and the readers.
//!
//! Every bearing line is published under its own sequence counter. The single
//! writer of a radar unit makes the counter odd, stores the line, and makes it
//! even again. A reader copies the line and checks that the counter did not
//! move; if it did the copy is retried a few times and then given up for this
//! pass. Readers never block the writer and no lock spans more than one line.

use bitflags::bitflags;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering, fence};

use super::{RETURNS_PER_LINE, RadarError, RadarUnit, SPOKES, SpokeBearing, Timestamp};

const WORDS_PER_LINE: usize = RETURNS_PER_LINE / 8;
const READ_RETRIES: usize = 4;

bitflags! {
    /// The last three sweeps of one sample, newest in the lowest bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SweepHistory: u8 {
        const LAST = 0b001;
        const PREVIOUS = 0b010;
        const OLDEST = 0b100;
    }
}

impl SweepHistory {
    /// Shift in the newest sweep. Bits beyond the three sweeps fall off.
    pub fn shift(self, hit: bool) -> Self {
        let bits = (self.bits() << 1) | hit as u8;
        SweepHistory::from_bits_truncate(bits)
    }

    /// At least two of the last three sweeps saw something: 011, 101, 110 or 111.
    pub fn is_persistent(self) -> bool {
        self.bits().count_ones() >= 2
    }
}

struct LineSlot {
    seq: AtomicU32,
    range_meters: AtomicU32,
    last_update: AtomicU64,
    samples: [AtomicU64; WORDS_PER_LINE],
    history: [AtomicU64; WORDS_PER_LINE],
}

impl LineSlot {
    fn new() -> Self {
        LineSlot {
            seq: AtomicU32::new(0),
            range_meters: AtomicU32::new(0),
            last_update: AtomicU64::new(0),
            samples: std::array::from_fn(|_| AtomicU64::new(0)),
            history: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

/// A consistent copy of one bearing line.
#[derive(Clone, Debug)]
pub struct BearingLineView {
    pub samples: [u8; RETURNS_PER_LINE],
    pub history: [u8; RETURNS_PER_LINE],
    pub range_meters: u32,
    pub last_update: Timestamp,
}

impl BearingLineView {
    pub fn new() -> Self {
        BearingLineView {
            samples: [0; RETURNS_PER_LINE],
            history: [0; RETURNS_PER_LINE],
            range_meters: 0,
            last_update: 0,
        }
    }

    pub fn history(&self, radius: usize) -> SweepHistory {
        SweepHistory::from_bits_truncate(self.history[radius])
    }

    pub fn is_stale(&self, now: Timestamp, max_age_ms: u64) -> bool {
        now.saturating_sub(self.last_update) > max_age_ms
    }
}

impl Default for BearingLineView {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ScanBuffer {
    units: Vec<Box<[LineSlot]>>,
    history_threshold: AtomicU8,
}

impl ScanBuffer {
    pub fn new(units: usize) -> Self {
        let units = (0..units)
            .map(|_| (0..SPOKES).map(|_| LineSlot::new()).collect())
            .collect();
        ScanBuffer {
            units,
            history_threshold: AtomicU8::new(u8::MAX),
        }
    }

    /// Samples stronger than this count as a hit in the sweep history.
    pub fn set_history_threshold(&self, threshold: u8) {
        self.history_threshold.store(threshold, Ordering::Relaxed);
    }

    fn line(&self, unit: RadarUnit, bearing: SpokeBearing) -> Result<&LineSlot, RadarError> {
        let lines = self
            .units
            .get(unit.index())
            .ok_or(RadarError::NoSuchRadar(unit))?;
        Ok(&lines[bearing as usize % SPOKES])
    }

    /// Store one bearing line. There must be a single writer per unit.
    pub fn write(
        &self,
        unit: RadarUnit,
        bearing: SpokeBearing,
        samples: &[u8; RETURNS_PER_LINE],
        range_meters: u32,
        timestamp: Timestamp,
    ) -> Result<(), RadarError> {
        let slot = self.line(unit, bearing)?;
        let threshold = self.history_threshold.load(Ordering::Relaxed);

        let seq = slot.seq.load(Ordering::Relaxed);
        slot.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        for (w, chunk) in samples.chunks_exact(8).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);

            let mut history = slot.history[w].load(Ordering::Relaxed).to_le_bytes();
            for (h, s) in history.iter_mut().zip(word.iter()) {
                *h = SweepHistory::from_bits_truncate(*h)
                    .shift(*s > threshold)
                    .bits();
            }

            slot.samples[w].store(u64::from_le_bytes(word), Ordering::Relaxed);
            slot.history[w].store(u64::from_le_bytes(history), Ordering::Relaxed);
        }
        slot.range_meters.store(range_meters, Ordering::Relaxed);
        slot.last_update.store(timestamp, Ordering::Relaxed);

        slot.seq.store(seq.wrapping_add(2), Ordering::Release);
        Ok(())
    }

    /// Copy a line into `view`. Returns false when the line was never written
    /// or kept changing while it was being copied.
    pub fn read_into(
        &self,
        unit: RadarUnit,
        bearing: SpokeBearing,
        view: &mut BearingLineView,
    ) -> Result<bool, RadarError> {
        let slot = self.line(unit, bearing)?;

        for _ in 0..READ_RETRIES {
            let before = slot.seq.load(Ordering::Acquire);
            if before == 0 {
                return Ok(false);
            }
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            view.range_meters = slot.range_meters.load(Ordering::Relaxed);
            view.last_update = slot.last_update.load(Ordering::Relaxed);
            for w in 0..WORDS_PER_LINE {
                let s = slot.samples[w].load(Ordering::Relaxed).to_le_bytes();
                let h = slot.history[w].load(Ordering::Relaxed).to_le_bytes();
                view.samples[w * 8..w * 8 + 8].copy_from_slice(&s);
                view.history[w * 8..w * 8 + 8].copy_from_slice(&h);
            }

            fence(Ordering::Acquire);
            if slot.seq.load(Ordering::Relaxed) == before {
                return Ok(true);
            }
        }
        log::trace!("{}: line {} skipped, writer too busy", unit, bearing);
        Ok(false)
    }

    pub fn read(
        &self,
        unit: RadarUnit,
        bearing: SpokeBearing,
    ) -> Result<Option<BearingLineView>, RadarError> {
        let mut view = BearingLineView::new();
        Ok(self.read_into(unit, bearing, &mut view)?.then_some(view))
    }

    pub fn range_meters(&self, unit: RadarUnit, bearing: SpokeBearing) -> Result<u32, RadarError> {
        Ok(self.line(unit, bearing)?.range_meters.load(Ordering::Acquire))
    }
}

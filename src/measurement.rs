use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Notify;

/// One decoded heart-rate reading.
///
/// Immutable once constructed; a newer sample replaces the previous one in
/// [`SharedMeasurement`], it never mutates it. `sequence` is strictly
/// increasing per accepted ANT+ page, `observed_at` is monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateSample {
    pub bpm: u8,
    pub observed_at: Instant,
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct Slot {
    sample: Option<HeartRateSample>,
    dirty: bool,
}

/// The single piece of mutable state crossing the ANT+ and BLE domains.
///
/// Holds at most the latest sample plus a dirty flag. The lock is only ever
/// held for the copy in/out, never across an await point, so neither domain
/// can block the other. The ANT+ side is the sole writer, the BLE side the
/// sole reader.
#[derive(Debug)]
pub struct SharedMeasurement {
    slot: Mutex<Slot>,
    fresh: Notify,
}

impl SharedMeasurement {
    /// Creates an empty slot and hands out the two capability halves.
    pub fn new_pair() -> (MeasurementWriter, MeasurementReader) {
        let shared = Arc::new(Self {
            slot: Mutex::new(Slot::default()),
            fresh: Notify::new(),
        });
        (
            MeasurementWriter(Arc::clone(&shared)),
            MeasurementReader(shared),
        )
    }

    fn write(&self, sample: HeartRateSample) {
        {
            let mut slot = self.slot.lock().expect("measurement slot poisoned");
            slot.sample = Some(sample);
            slot.dirty = true;
        }
        self.fresh.notify_one();
    }

    fn read_latest(&self) -> Option<HeartRateSample> {
        self.slot.lock().expect("measurement slot poisoned").sample
    }

    fn take_fresh(&self) -> Option<HeartRateSample> {
        let mut slot = self.slot.lock().expect("measurement slot poisoned");
        if slot.dirty {
            slot.dirty = false;
            slot.sample
        } else {
            None
        }
    }
}

/// Write capability over the shared slot, held by the ANT+ receiver.
#[derive(Debug, Clone)]
pub struct MeasurementWriter(Arc<SharedMeasurement>);

impl MeasurementWriter {
    /// Replaces the stored sample atomically, marks it fresh and raises the
    /// new-data signal. Never blocks on the presence of a reader.
    pub fn write(&self, sample: HeartRateSample) {
        self.0.write(sample);
    }
}

/// Read capability over the shared slot, held by the BLE peripheral.
#[derive(Debug, Clone)]
pub struct MeasurementReader(Arc<SharedMeasurement>);

impl MeasurementReader {
    /// Latest sample regardless of freshness. Does not touch the dirty flag.
    pub fn read_latest(&self) -> Option<HeartRateSample> {
        self.0.read_latest()
    }

    /// Latest sample if one arrived since the last call, clearing the dirty
    /// flag. Two writes between calls yield only the newer sample.
    pub fn take_fresh(&self) -> Option<HeartRateSample> {
        self.0.take_fresh()
    }

    /// Resolves once a new sample has been written. Coalesces: any number of
    /// writes while not awaited result in a single wakeup.
    pub async fn fresh(&self) {
        self.0.fresh.notified().await;
    }
}

//! Fixed-capacity interval batch.

use bytes::Bytes;

use crate::collaborators::StreamCategory;
use crate::error::{AcquisitionError, Result};

/// Ordered (category, payload) pairs collected during one interval cycle.
///
/// The backing storage is allocated once at the configured capacity and
/// reused across cycles; `reset` clears it without releasing memory. An
/// append beyond capacity is rejected.
#[derive(Debug)]
pub struct IntervalBatch {
    entries: Vec<(StreamCategory, Bytes)>,
    capacity: usize,
    high_water: usize,
}

impl IntervalBatch {
    /// Empty batch holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            high_water: 0,
        }
    }

    /// Append one payload.
    pub fn push(&mut self, category: StreamCategory, payload: Bytes) -> Result<()> {
        if self.entries.len() >= self.capacity {
            return Err(AcquisitionError::BatchOverflow {
                capacity: self.capacity,
            });
        }
        self.entries.push((category, payload));
        self.high_water = self.high_water.max(self.entries.len());
        Ok(())
    }

    /// Entries in arrival order.
    pub fn entries(&self) -> &[(StreamCategory, Bytes)] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no payload has been collected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest fill level seen since creation.
    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    /// Drop every entry, keeping the allocation.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

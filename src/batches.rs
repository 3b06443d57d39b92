/// Batch Partitioning Module
///
/// Splits an inclusive slot range into fixed-size, order-preserving batches.
/// Pure arithmetic, no I/O; everything downstream relies on the batches being
/// contiguous, non-overlapping and ascending.
use crate::errors::JobError;

/// Inclusive slot range for one export job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Result<Self, JobError> {
        if end < start {
            return Err(JobError::Configuration(format!(
                "start slot ({}) must be less than or equal to end slot ({})",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of slots covered, inclusive of both ends. Saturates at
    /// `u64::MAX` for the full-domain range.
    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }
}

/// Contiguous sub-range of slots fetched in one provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub from_slot: u64,
    pub to_slot: u64,
}

impl Batch {
    /// Slots in this batch, ascending.
    pub fn slots(&self) -> impl Iterator<Item = u64> {
        self.from_slot..=self.to_slot
    }

    pub fn len(&self) -> u64 {
        self.to_slot - self.from_slot + 1
    }
}

impl std::fmt::Display for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.from_slot, self.to_slot)
    }
}

/// Partition `range` into batches of at most `batch_size` slots.
///
/// Batches are ascending and cover the range exactly; the last batch may be
/// smaller. Fails if `batch_size` is zero.
pub fn partition(range: BlockRange, batch_size: u64) -> Result<Vec<Batch>, JobError> {
    if batch_size == 0 {
        return Err(JobError::Configuration("batch size must be greater than 0".to_string()));
    }

    // Capacity hint only; capped so a near-full-domain range cannot demand
    // an absurd up-front allocation.
    let mut batches = Vec::with_capacity(range.len().div_ceil(batch_size).min(1 << 16) as usize);
    let mut from_slot = range.start;

    while from_slot <= range.end {
        // Saturating keeps the window arithmetic safe near u64::MAX; min
        // clamps it back inside the range either way.
        let to_slot = std::cmp::min(from_slot.saturating_add(batch_size - 1), range.end);
        batches.push(Batch { from_slot, to_slot });

        // Guard the u64::MAX edge before stepping past the range end.
        match to_slot.checked_add(1) {
            Some(next) => from_slot = next,
            None => break,
        }
    }

    Ok(batches)
}

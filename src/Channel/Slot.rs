// Fixed-capacity slot in a shared region.
//
// The region is only reachable through `SlotAccess`, which the partition
// hands out from an ownership guard. Every access is bounds-checked against
// the slot capacity.

use std::io;

use crate::Core::SharedMemory::SharedMemoryBackend;
use crate::errors::ValidationError;

pub struct Slot {
    pub(crate) region: Box<dyn SharedMemoryBackend>,
    capacity: usize,
}

impl Slot {
    pub fn new(region: Box<dyn SharedMemoryBackend>, capacity: usize) -> io::Result<Self> {
        if capacity == 0 || region.size() < capacity {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("slot region of {} bytes cannot hold capacity {}", region.size(), capacity),
            ));
        }
        Ok(Self { region, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// # Safety
    /// The caller must hold this slot's ownership token for as long as the
    /// returned view lives.
    pub(crate) unsafe fn access(&self) -> SlotAccess<'_> {
        SlotAccess { bytes: std::slice::from_raw_parts_mut(self.region.as_ptr(), self.capacity) }
    }
}

/// Exclusive view of a slot's bytes for the current owner.
pub struct SlotAccess<'a> {
    bytes: &'a mut [u8],
}

impl<'a> SlotAccess<'a> {
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn zero_fill(&mut self) {
        self.bytes.fill(0);
    }

    /// Copy `data` to `offset`. Returns the offset just past the write.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<usize, ValidationError> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.bytes.len())
            .ok_or(ValidationError::ExceedsSlot {
                size: data.len(),
                capacity: self.bytes.len().saturating_sub(offset),
            })?;
        self.bytes[offset..end].copy_from_slice(data);
        Ok(end)
    }

    pub fn read_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.bytes.get(offset..end)
    }

    /// Copy the whole slot into `scratch`, which must be exactly one slot long.
    pub fn copy_to(&self, scratch: &mut [u8]) {
        scratch.copy_from_slice(self.bytes);
    }

    pub fn is_zeroed(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }
}

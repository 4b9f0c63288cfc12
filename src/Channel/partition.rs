use std::io;

use tracing::{debug, warn};

use super::Slot::{Slot, SlotAccess};
use crate::config::PipelineConfig;
use crate::Core::token::{OwnershipToken, Side};
use crate::Core::SharedMemory::{
    attach_shared_memory, create_heap_memory, create_or_recover_shared_memory, unlink_shared_memory,
};
use crate::errors::{PipelineError, Result};

/// Names this side created and must remove on drop.
pub(crate) struct OwnedNames {
    pub(crate) slot: String,
    pub(crate) token: String,
}

/// One channel: a slot plus the token guarding it.
pub struct ChannelPartition {
    pub(crate) index: usize,
    pub(crate) slot: Slot,
    pub(crate) token: OwnershipToken,
    pub(crate) owned_names: Option<OwnedNames>,
}

impl ChannelPartition {
    /// Heap-backed channel for the single-process variant.
    pub fn in_process(index: usize, capacity: usize) -> Result<Self> {
        let slot_region =
            create_heap_memory(capacity).map_err(|e| PipelineError::resource(format!("slot {index}"), e))?;
        let token_region = create_heap_memory(OwnershipToken::REGION_SIZE)
            .map_err(|e| PipelineError::resource(format!("token {index}"), e))?;
        Ok(Self {
            index,
            slot: Slot::new(slot_region, capacity).map_err(|e| PipelineError::resource(format!("slot {index}"), e))?,
            token: OwnershipToken::new(token_region, index)
                .map_err(|e| PipelineError::resource(format!("token {index}"), e))?,
            owned_names: None,
        })
    }

    /// Create the named slot and token for `index`. Both regions are removed
    /// again if either step fails.
    pub fn create(config: &PipelineConfig, index: usize) -> Result<Self> {
        let slot_name = config.slot_name(index);
        let token_name = config.token_name(index);

        let slot_region = create_or_recover_shared_memory(config.slot_capacity, &slot_name)
            .map_err(|e| PipelineError::resource(&slot_name, e))?;
        let slot = match Slot::new(slot_region, config.slot_capacity) {
            Ok(slot) => slot,
            Err(e) => {
                let _ = unlink_shared_memory(&slot_name);
                return Err(PipelineError::resource(slot_name, e));
            }
        };

        let token = match create_or_recover_shared_memory(OwnershipToken::REGION_SIZE, &token_name)
            .and_then(|region| OwnershipToken::new(region, index))
        {
            Ok(token) => token,
            Err(e) => {
                drop(slot);
                let _ = unlink_shared_memory(&slot_name);
                let _ = unlink_shared_memory(&token_name);
                return Err(PipelineError::resource(token_name, e));
            }
        };

        debug!(channel = index, slot = %slot_name, token = %token_name, "channel created");
        Ok(Self { index, slot, token, owned_names: Some(OwnedNames { slot: slot_name, token: token_name }) })
    }

    /// Open the named slot and token for `index` created by the peer.
    pub fn attach(config: &PipelineConfig, index: usize) -> Result<Self> {
        let slot_name = config.slot_name(index);
        let token_name = config.token_name(index);

        let slot = attach_shared_memory(&slot_name, config.slot_capacity)
            .and_then(|region| Slot::new(region, config.slot_capacity))
            .map_err(|e| PipelineError::resource(&slot_name, e))?;
        let token = attach_shared_memory(&token_name, OwnershipToken::REGION_SIZE)
            .and_then(|region| OwnershipToken::new(region, index))
            .map_err(|e| PipelineError::resource(&token_name, e))?;

        debug!(channel = index, slot = %slot_name, "channel attached");
        Ok(Self { index, slot, token, owned_names: None })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.slot.capacity()
    }

    pub fn token(&self) -> &OwnershipToken {
        &self.token
    }

    /// Block until `side` owns the slot. The guard hands it to the peer
    /// when dropped.
    pub fn acquire(&self, side: Side) -> Result<OwnershipGuard<'_>> {
        self.token.acquire(side)?;
        Ok(OwnershipGuard { channel: self, side })
    }

    /// Fail every pending and future acquire on this channel.
    pub fn close(&self) {
        self.token.close();
    }
}

impl Drop for ChannelPartition {
    fn drop(&mut self) {
        if let Some(names) = self.owned_names.take() {
            for name in [names.slot, names.token] {
                match unlink_shared_memory(&name) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!(name = %name, error = %e, "failed to unlink shared memory"),
                }
            }
        }
    }
}

/// Proof of ownership over one channel's slot.
pub struct OwnershipGuard<'a> {
    channel: &'a ChannelPartition,
    side: Side,
}

impl<'a> OwnershipGuard<'a> {
    pub fn slot(&mut self) -> SlotAccess<'_> {
        // SAFETY: this guard exists only while `side` owns the token, and the
        // peer never touches the slot until the guard is dropped.
        unsafe { self.channel.slot.access() }
    }

    /// Tag the cycle held by this guard as the final one.
    pub fn mark_terminal(&self) {
        self.channel.token.mark_terminal();
    }

    pub fn is_terminal(&self) -> bool {
        self.channel.token.is_terminal()
    }

    /// Hand the slot to the peer now.
    pub fn release(self) {}
}

impl Drop for OwnershipGuard<'_> {
    fn drop(&mut self) {
        if !self.channel.token.release(self.side) {
            debug!(channel = self.channel.index, side = ?self.side, "token closed while held");
        }
    }
}

use std::fmt;

use crate::Channel::partition::ChannelPartition;
use crate::Channel::set::ChannelSet;
use crate::Channel::Slot::Slot;
use crate::Core::token::OwnershipToken;

/// Debug function for ChannelSet
///
/// Shows:
/// - Name prefix, or `<in-process>` for heap-backed sets
/// - Control region location and handshake state
/// - Every channel
pub fn debug_channel_set(set: &ChannelSet, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut d = f.debug_struct("ChannelSet");
    match &set.control {
        Some(control) => {
            let ready = control.header().ready.load(std::sync::atomic::Ordering::Acquire) == 1;
            d.field("prefix", &set.config.name_prefix)
                .field("control", &format_args!("{:p}", control.region.as_ptr()))
                .field("ready", &ready)
        }
        None => d.field("prefix", &"<in-process>"),
    };
    d.field("channels", &set.channels).finish()
}

/// Debug function for ChannelPartition
pub fn debug_channel_partition(partition: &ChannelPartition, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChannelPartition")
        .field("index", &partition.index)
        .field("slot", &partition.slot)
        .field("token", &partition.token)
        .field("named", &partition.owned_names.as_ref().map(|n| n.slot.as_str()))
        .finish()
}

/// Debug function for Slot
///
/// Safely displays the slot's memory location without reading its bytes,
/// which may belong to the other side.
pub fn debug_slot(slot: &Slot, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Slot")
        .field("region", &format_args!("0x{:x}", slot.region.as_ptr() as usize))
        .field("capacity", &slot.capacity())
        .finish_non_exhaustive()
}

/// Debug function for OwnershipToken
pub fn debug_ownership_token(token: &OwnershipToken, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OwnershipToken")
        .field("channel", &token.channel())
        .field("word", &format_args!("{:p}", token.region().as_ptr()))
        .field("state", &token.state())
        .field("terminal", &token.is_terminal())
        .field("handoffs", &token.handoffs())
        .finish()
}

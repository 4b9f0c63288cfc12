pub mod Slot;
pub mod codec;
mod debug;
pub mod packer;
pub mod partition;
pub mod set;
pub mod unpacker;

pub use codec::{deserialize, serialize, serialized_size, Decoded, RECORD_OVERHEAD};
pub use packer::{ChannelPacker, PackerStats, PackingLimits};
pub use partition::{ChannelPartition, OwnershipGuard};
pub use set::{ChannelSet, ConsumerReport, ProducerReport};
pub use unpacker::{ChannelUnpacker, UnpackerStats};

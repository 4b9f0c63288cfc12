pub mod SharedMemory;
pub mod futex;
pub mod layout;
pub mod token;

pub use SharedMemory::{
    attach_shared_memory, create_heap_memory, create_or_recover_shared_memory, create_shared_memory,
    unlink_shared_memory, RawHandle, SharedMemoryBackend,
};
pub use token::{Ownership, OwnershipToken, Side};

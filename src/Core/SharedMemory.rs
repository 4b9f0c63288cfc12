// Shared memory backend abstraction
// Named regions live under /dev/shm and are mapped with mmap(MAP_SHARED);
// the heap backend serves the single-process variant.

use std::alloc::{self, Layout};
use std::fmt::Debug;
use std::fs;
#[cfg(target_os = "linux")]
use std::fs::OpenOptions;
use std::io;
use std::ptr::NonNull;
#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, IntoRawFd};
#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

use tracing::warn;

/// Alignment of every region handed out by a backend.
pub const REGION_ALIGN: usize = 128;

/// Shared memory backend trait for memory mapping
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the mapped memory region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the mapped region in bytes
    fn size(&self) -> usize;

    /// Get the underlying handle
    fn raw_handle(&self) -> RawHandle;
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHandle {
    /// Unix file descriptor (Linux)
    Fd(i32),
    /// Process-private heap allocation
    Heap,
}

/// Path of a named region.
pub fn shm_path(name: &str) -> String {
    format!("/dev/shm/{}", name)
}

/// Create a new named shared memory region of exactly `size` bytes.
///
/// Fails with `AlreadyExists` if a region with this name is present.
#[cfg(target_os = "linux")]
pub fn create_shared_memory(size: usize, name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::create(size, name)?))
}

/// Create a named region, removing a stale region of the same name once.
///
/// A second `AlreadyExists` (or any other error) is returned to the caller.
pub fn create_or_recover_shared_memory(size: usize, name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    match create_shared_memory(size, name) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            warn!(name, "removing stale shared memory region");
            unlink_shared_memory(name)?;
            create_shared_memory(size, name)
        }
        other => other,
    }
}

/// Attach to an existing named region of at least `size` bytes.
#[cfg(target_os = "linux")]
pub fn attach_shared_memory(name: &str, size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::attach(name, size)?))
}

/// Remove a named region. Existing mappings stay valid until dropped.
pub fn unlink_shared_memory(name: &str) -> io::Result<()> {
    fs::remove_file(shm_path(name))
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(_size: usize, _name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn attach_shared_memory(_name: &str, _size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct LinuxSharedMemory {
    ptr: NonNull<u8>,
    size: usize,
    fd: i32,
}

#[cfg(target_os = "linux")]
unsafe impl Send for LinuxSharedMemory {}
#[cfg(target_os = "linux")]
unsafe impl Sync for LinuxSharedMemory {}

#[cfg(target_os = "linux")]
impl LinuxSharedMemory {
    /// Exclusively create `/dev/shm/<name>` and map it.
    pub fn create(size: usize, name: &str) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "region size must be non-zero"));
        }
        let path = shm_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;

        if let Err(e) = file.set_len(size as u64) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        match Self::map(file.as_raw_fd(), size) {
            Ok(ptr) => Ok(Self { ptr, size, fd: file.into_raw_fd() }),
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Map an existing `/dev/shm/<name>` that is at least `size` bytes long.
    pub fn attach(name: &str, size: usize) -> io::Result<Self> {
        let path = shm_path(name);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let file_size = file.metadata()?.len() as usize;
        if file_size < size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Shared memory size too small: expected at least {} bytes, got {}",
                    size, file_size
                ),
            ));
        }

        let ptr = Self::map(file.as_raw_fd(), size)?;
        Ok(Self { ptr, size, fd: file.into_raw_fd() })
    }

    fn map(fd: i32, size: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: fd is an open file of at least `size` bytes; the mapping is
        // released in Drop.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
    }
}

#[cfg(target_os = "linux")]
impl Drop for LinuxSharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            libc::close(self.fd);
        }
    }
}

#[cfg(target_os = "linux")]
impl SharedMemoryBackend for LinuxSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Fd(self.fd)
    }
}

/// Zero-filled heap region standing in for a mapping when both sides share
/// one address space.
#[derive(Debug)]
pub struct HeapSharedMemory {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for HeapSharedMemory {}
unsafe impl Sync for HeapSharedMemory {}

impl HeapSharedMemory {
    pub fn new(size: usize) -> io::Result<Self> {
        let layout = Layout::from_size_align(size, REGION_ALIGN)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        if layout.size() == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "region size must be non-zero"));
        }
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| io::Error::new(io::ErrorKind::OutOfMemory, "heap region allocation failed"))?;
        Ok(Self { ptr, layout })
    }
}

impl Drop for HeapSharedMemory {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl SharedMemoryBackend for HeapSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.layout.size()
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Heap
    }
}

/// Allocate a private heap region.
pub fn create_heap_memory(size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(HeapSharedMemory::new(size)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_region_is_zeroed_and_aligned() {
        let region = create_heap_memory(1024).unwrap();
        assert_eq!(region.size(), 1024);
        assert_eq!(region.as_ptr() as usize % REGION_ALIGN, 0);
        assert_eq!(region.raw_handle(), RawHandle::Heap);
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.size()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_heap_region_rejects_zero_size() {
        assert!(create_heap_memory(0).is_err());
    }
}

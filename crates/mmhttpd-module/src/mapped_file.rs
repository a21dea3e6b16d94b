//! `MappedFile`: read-only private mapping of a served file.
//!
//! The mapping outlives the descriptor it came from: callers open the
//! file, map it, and drop the `File` right away. The pages stay valid
//! until the `MappedFile` is dropped.

use mmhttpd_core::error::{HttpdError, Result};

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

pub struct MappedFile {
    ptr: NonNull<c_void>,
    len: usize,
}

// Safety: the mapping is PROT_READ and exclusively owned
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Map the first `len` bytes of `file` read-only.
    ///
    /// Zero-length files cannot be mapped; callers must handle them
    /// before getting here.
    pub fn map(file: &File, len: usize) -> Result<Self> {
        let length = NonZeroUsize::new(len).ok_or(HttpdError::Mmap(libc::EINVAL))?;
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ,
                MapFlags::MAP_PRIVATE,
                file,
                0,
            )
        }
        .map_err(|e| HttpdError::Mmap(e as i32))?;
        Ok(Self { ptr, len })
    }

    pub fn as_slice(&self) -> &[u8] {
        // Safety: ptr..ptr+len is a live PROT_READ mapping owned by self
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            mmhttpd_core::kerror!("munmap of {} bytes failed: {}", self.len, e);
        }
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile").field("len", &self.len).finish()
    }
}

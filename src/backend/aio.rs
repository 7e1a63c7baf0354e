//! Asynchronous direct-I/O probe backend.
//!
//! The index is opened with O_DIRECT so probes bypass the page cache, and a
//! whole probe batch is submitted as one `lio_listio` call followed by a
//! single completion wait. Requests beyond the pre-sized ring fall back to
//! synchronous positional reads. Best for cold, random access on fast
//! storage.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;

use super::IndexLayout;
use crate::error::{Result, SignetError};

#[derive(Debug)]
pub struct AioBackend {
    file: File,
    layout: IndexLayout,
    /// Fixed-capacity request ring; bounds are checked before submission.
    ring: Vec<libc::aiocb>,
    /// Page-aligned staging area, one page per ring slot (O_DIRECT needs
    /// aligned destinations; the caller's buffer has no such guarantee).
    staging: AlignedBuf,
    warned_overflow: bool,
}

// The raw aiocb pointers in `ring` only ever reference `staging`, which
// moves with the struct contents; both are used from one thread per call.
unsafe impl Send for AioBackend {}

impl AioBackend {
    pub fn open(path: &Path, ring_capacity: usize) -> Result<Self> {
        if ring_capacity == 0 {
            return Err(SignetError::validation("aio ring capacity must be nonzero"));
        }
        let (layout, _) = IndexLayout::open(path)?;
        if !layout.header.is_compact() {
            return Err(SignetError::validation(
                "async-direct backend requires the paged compact form",
            ));
        }
        let page_size = layout.header.page_size as usize;

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
            .map_err(|e| SignetError::io(path, "open(O_DIRECT)", e))?;

        let staging = AlignedBuf::new(ring_capacity * page_size, page_size)?;
        // SAFETY: aiocb is a plain C struct; all-zero is its documented
        // initial state.
        let ring = vec![unsafe { std::mem::zeroed::<libc::aiocb>() }; ring_capacity];

        Ok(AioBackend {
            file,
            layout,
            ring,
            staging,
            warned_overflow: false,
        })
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn probe(&mut self, sub: usize, rows: &[u64], out: &mut [u8]) -> Result<()> {
        let page_size = self.layout.header.page_size as usize;
        let base = self.layout.sub_offsets[sub];

        let async_count = rows.len().min(self.ring.len());
        if rows.len() > self.ring.len() && !self.warned_overflow {
            log::warn!(
                "{}",
                SignetError::capacity("aio request ring", self.ring.len(), rows.len())
            );
            log::warn!("servicing the overflow with synchronous reads");
            self.warned_overflow = true;
        }

        if async_count > 0 {
            let mut requests: Vec<*mut libc::aiocb> = Vec::with_capacity(async_count);
            for (slot, &row) in rows[..async_count].iter().enumerate() {
                let cb = &mut self.ring[slot];
                // SAFETY: zeroing resets state left over from prior batches.
                *cb = unsafe { std::mem::zeroed() };
                cb.aio_fildes = self.file.as_raw_fd();
                cb.aio_lio_opcode = libc::LIO_READ;
                cb.aio_buf = unsafe { self.staging.ptr().add(slot * page_size) } as *mut _;
                cb.aio_nbytes = page_size;
                cb.aio_offset = (base + row * page_size as u64) as libc::off_t;
                requests.push(cb as *mut _);
            }

            // One blocking call covers submission and the completion wait.
            // SAFETY: every aiocb points at a distinct staging page that
            // outlives the call; the request list is exactly async_count
            // entries long.
            let rc = unsafe {
                libc::lio_listio(
                    libc::LIO_WAIT,
                    requests.as_ptr() as *const *mut libc::aiocb,
                    async_count as libc::c_int,
                    ptr::null_mut(),
                )
            };
            if rc != 0 {
                let errno = std::io::Error::last_os_error();
                // EIO means some individual request failed; the per-request
                // status check below names it.
                if errno.raw_os_error() != Some(libc::EIO) {
                    return Err(SignetError::io(&self.layout.path, "lio_listio", errno));
                }
            }
            for (slot, chunk) in out[..async_count * page_size]
                .chunks_exact_mut(page_size)
                .enumerate()
            {
                // SAFETY: the batch completed (LIO_WAIT), so error/return
                // state is final for every request.
                let status = unsafe { libc::aio_error(&self.ring[slot]) };
                if status != 0 {
                    return Err(SignetError::io(
                        &self.layout.path,
                        "aio_read",
                        std::io::Error::from_raw_os_error(status),
                    ));
                }
                let transferred = unsafe { libc::aio_return(&mut self.ring[slot]) };
                if transferred != page_size as libc::ssize_t {
                    return Err(SignetError::format(
                        &self.layout.path,
                        format!("short read: {} of {} bytes", transferred, page_size),
                    ));
                }
                chunk.copy_from_slice(&self.staging.as_slice()[slot * page_size..][..page_size]);
            }
        }

        // Overflow beyond ring capacity: synchronous reads through the same
        // O_DIRECT descriptor, staged through the first aligned page.
        for (i, &row) in rows.iter().enumerate().skip(async_count) {
            let staging = &mut self.staging.as_mut_slice()[..page_size];
            self.file
                .read_exact_at(staging, base + row * page_size as u64)
                .map_err(|e| SignetError::io(&self.layout.path, "read", e))?;
            out[i * page_size..][..page_size].copy_from_slice(staging);
        }
        Ok(())
    }
}

/// Heap allocation with explicit alignment, for O_DIRECT destinations.
#[derive(Debug)]
struct AlignedBuf {
    ptr: *mut u8,
    layout: Layout,
}

unsafe impl Send for AlignedBuf {}

impl AlignedBuf {
    fn new(len: usize, align: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len, align)
            .map_err(|e| SignetError::validation(format!("bad staging layout: {}", e)))?;
        // SAFETY: layout has nonzero size (ring capacity and page size are
        // both validated nonzero).
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(SignetError::validation(format!(
                "failed to allocate {} byte staging buffer",
                len
            )));
        }
        Ok(AlignedBuf { ptr, layout })
    }

    fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() bytes for the buffer's
        // lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr, self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, with exclusive access through &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.layout.size()) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: allocated with exactly this layout in new().
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

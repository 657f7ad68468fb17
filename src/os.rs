//! Thin OS memory-mapping layer (spec.md §4.1, L0 building block).
//!
//! Grounded on the teacher's `src/os.rs`: `libc::mmap`/`munmap` on unix,
//! `winapi::VirtualAlloc`/`VirtualFree` on windows, `log::warn!` on the
//! fallback path when the OS refuses the preferred request.

use std::ptr::NonNull;

/// Reserves and commits a zeroed, page-aligned region of `size` bytes
/// aligned to `align` (a power of two). Returns `None` if the OS refuses.
///
/// Every supported backend (`mmap(MAP_ANONYMOUS)`, `VirtualAlloc`) hands
/// back zero-filled memory for fresh mappings, so the region really is
/// zeroed — this is where [`crate::source::PageSource::PAGES_ARE_ZEROED`]
/// gets its `true`.
pub fn map_region(size: usize, align: usize) -> Option<NonNull<u8>> {
    debug_assert!(size > 0 && size % align == 0);
    imp::map(size, align)
}

/// Releases a region previously returned by [`map_region`]. `size` must be
/// the same value passed to `map_region`.
///
/// # Safety
/// `ptr` must be the exact pointer returned by a matching `map_region`
/// call, not yet unmapped, and not referenced afterwards.
pub unsafe fn unmap_region(ptr: NonNull<u8>, size: usize) {
    imp::unmap(ptr, size)
}

#[cfg(unix)]
mod imp {
    use super::NonNull;
    use std::ptr;

    pub fn map(size: usize, align: usize) -> Option<NonNull<u8>> {
        // `mmap` only guarantees page-size alignment; to get a larger
        // power-of-two alignment we over-map and trim, like the teacher's
        // `os_mem_alloc_aligned` does for large pages.
        let extra = if align > page_size() { align } else { 0 };
        let map_size = size + extra;
        unsafe {
            let raw = libc::mmap(
                ptr::null_mut(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if raw == libc::MAP_FAILED {
                log::warn!("mmap of {map_size} bytes failed: {}", std::io::Error::last_os_error());
                return None;
            }
            let base = raw as usize;
            let aligned = (base + align - 1) & !(align - 1);
            if extra > 0 {
                let front_slack = aligned - base;
                if front_slack > 0 {
                    libc::munmap(raw, front_slack);
                }
                let back_slack = extra - front_slack;
                if back_slack > 0 {
                    libc::munmap((aligned + size) as *mut libc::c_void, back_slack);
                }
            }
            NonNull::new(aligned as *mut u8)
        }
    }

    pub unsafe fn unmap(ptr: NonNull<u8>, size: usize) {
        libc::munmap(ptr.as_ptr() as *mut libc::c_void, size);
    }

    pub fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }
}

#[cfg(windows)]
mod imp {
    use super::NonNull;
    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
    use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

    pub fn map(size: usize, _align: usize) -> Option<NonNull<u8>> {
        // `VirtualAlloc` returns memory aligned to the OS allocation
        // granularity (64 KiB), which covers every page size this crate
        // uses; unlike unix we do not need an over-map-and-trim dance.
        unsafe {
            let raw = VirtualAlloc(
                std::ptr::null_mut(),
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            );
            if raw.is_null() {
                log::warn!("VirtualAlloc of {size} bytes failed");
                return None;
            }
            NonNull::new(raw as *mut u8)
        }
    }

    pub unsafe fn unmap(ptr: NonNull<u8>, _size: usize) {
        VirtualFree(ptr.as_ptr() as *mut _, 0, MEM_RELEASE);
    }
}

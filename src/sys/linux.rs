use std::error::Error;
use std::io;
use std::result::Result;

use log::warn;

use crate::sys::ptr::AnyMutPtr;
use crate::sys::{SegmentConfig, SegmentSource};
use crate::util;

#[derive(Debug)]
pub struct LinuxDataSegment {
    base: AnyMutPtr,
    reserved: usize,
    committed: usize,
    page_size: usize,
}

impl LinuxDataSegment {
    pub fn new(config: SegmentConfig) -> Result<LinuxDataSegment, Box<dyn Error>> {
        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) } {
            n if n > 0 => n as usize,
            _ => Err(io::Error::last_os_error())?,
        };

        // Reserve the whole range inaccessible up front; the segment then
        // stays contiguous for its entire lifetime.
        let reserved = util::bits::round_up(config.max_heap_size, page_size);
        let base = unsafe { map_anon(std::ptr::null_mut(), reserved, libc::PROT_NONE, 0)? };

        Ok(LinuxDataSegment {
            base: AnyMutPtr::new(base),
            reserved,
            committed: 0,
            page_size,
        })
    }
}

impl SegmentSource for LinuxDataSegment {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn bounds(&self) -> (AnyMutPtr, AnyMutPtr) {
        (self.base, unsafe { self.base.add(self.committed) })
    }

    unsafe fn extend(&mut self, len: usize) -> Option<AnyMutPtr> {
        assert!(util::bits::is_aligned(len, self.page_size));

        if self.committed + len > self.reserved {
            return None;
        }
        if let Err(err) = commit(self.base.add(self.committed), len) {
            warn!("segment commit failed: {}", err);
            return None;
        }
        self.committed += len;
        Some(self.base.add(self.committed))
    }

    unsafe fn shrink(&mut self, len: usize) -> bool {
        assert!(util::bits::is_aligned(len, self.page_size));
        assert!(len <= self.committed);

        // Remapping discards the pages and makes the range inaccessible
        // again.
        let tail = self.base.add(self.committed - len);
        match map_anon(tail.to_raw(), len, libc::PROT_NONE, libc::MAP_FIXED) {
            Ok(_) => {
                self.committed -= len;
                true
            }
            Err(err) => {
                warn!("segment decommit failed: {}", err);
                false
            }
        }
    }
}

impl Drop for LinuxDataSegment {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.base.to_raw(), self.reserved) } != 0 {
            warn!("segment unmap failed: {}", io::Error::last_os_error());
        }
    }
}

unsafe fn map_anon(
    addr: *mut libc::c_void,
    len: usize,
    prot: libc::c_int,
    extra_flags: libc::c_int,
) -> Result<*mut libc::c_void, io::Error> {
    let p = libc::mmap(
        addr,
        len,
        prot,
        libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | extra_flags,
        -1,
        0,
    );
    if p == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(p)
    }
}

unsafe fn commit(addr: AnyMutPtr, len: usize) -> Result<(), io::Error> {
    if libc::mprotect(addr.to_raw(), len, libc::PROT_READ | libc::PROT_WRITE) == 0 {
        return Ok(());
    }

    // Remapping a FIXED region is an unrecommended strategy. Use as a
    // fallback if we cannot use mprotect.
    map_anon(
        addr.to_raw(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_FIXED,
    )
    .map(|_| ())
}

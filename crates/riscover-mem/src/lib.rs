//! Twin-mapped memory regions: one shared-memory object mapped twice, an
//! "executed" view at a fixed address with the caller's requested
//! protection, and a "shadow" view elsewhere with read+write. Writes through
//! either view are visible through the other. This is the same pattern
//! modern W^X JIT engines use to keep code both writable and executable
//! without ever marking one page both at once.

pub mod error;

use std::ffi::CString;
use std::os::fd::{FromRawFd, OwnedFd};

use error::{check_mmap, IntoResult, Result, SysError};

pub fn page_size() -> usize {
    // SAFETY: sysconf with a well-known, always-valid name never fails in a
    // way that leaves the value undefined; a negative return is impossible
    // for _SC_PAGESIZE on Linux.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prot {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Prot {
    pub const RW: Prot = Prot {
        read: true,
        write: true,
        exec: false,
    };
    pub const RX: Prot = Prot {
        read: true,
        write: false,
        exec: true,
    };
    pub const R: Prot = Prot {
        read: true,
        write: false,
        exec: false,
    };

    fn bits(self) -> i32 {
        let mut p = 0;
        if self.read {
            p |= libc::PROT_READ;
        }
        if self.write {
            p |= libc::PROT_WRITE;
        }
        if self.exec {
            p |= libc::PROT_EXEC;
        }
        p
    }
}

/// A region backed by one shared-memory descriptor, mapped twice: `start`
/// (the executed view, with `prot`) and `shadow_start` (a private read+write
/// view used to reset content between runs). `baseline` is the content the
/// region must hold before every run.
pub struct Mapping {
    pub start: usize,
    pub shadow_start: usize,
    pub size: usize,
    pub prot: Prot,
    pub baseline: Vec<u8>,
    fd: OwnedFd,
}

impl Mapping {
    /// Creates a twin mapping at `start` with `size` bytes and `prot`.
    /// Fails if any page in `[start, start+size)` is already mapped — a
    /// fixed-address create must never silently clobber existing state.
    pub fn create(start: usize, size: usize, prot: Prot, baseline: Option<Vec<u8>>) -> Result<Self> {
        assert_eq!(size % page_size(), 0, "size must be page-aligned");
        if range_is_mapped(start, size) {
            return Err(SysError::AddressInUse);
        }
        let baseline = baseline.unwrap_or_else(|| vec![0u8; size]);
        assert_eq!(baseline.len(), size);

        let fd = portable_shmem_create(size)?;

        // SAFETY: fd is a valid, just-created shared-memory descriptor of
        // `size` bytes; start/shadow addresses are caller-validated above.
        let executed = unsafe {
            check_mmap(libc::mmap(
                start as *mut libc::c_void,
                size,
                prot.bits(),
                libc::MAP_SHARED | libc::MAP_FIXED_NOREPLACE,
                fd_raw(&fd),
                0,
            ))?
        };
        assert_eq!(executed as usize, start);

        // SAFETY: same fd, a second independent mapping at a
        // kernel-chosen address with read+write so the fuzzer can always
        // write instruction bytes or reset baselines regardless of `prot`.
        let shadow = unsafe {
            check_mmap(libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd_raw(&fd),
                0,
            ))?
        };

        let mapping = Mapping {
            start,
            shadow_start: shadow as usize,
            size,
            prot,
            baseline,
            fd,
        };
        mapping.reset();
        Ok(mapping)
    }

    /// Copies `baseline` into the shadow view; if the executed view is
    /// executable, flushes the instruction cache for the executed range.
    pub fn reset(&self) {
        // SAFETY: shadow_start..+size is a live mapping owned by this
        // Mapping, sized exactly to baseline.len().
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.baseline.as_ptr(),
                self.shadow_start as *mut u8,
                self.size,
            );
        }
        if self.prot.exec {
            self.flush_icache();
        }
    }

    /// Flushes the instruction cache for the executed view without
    /// touching its contents, for callers (like the runner page) that wrote
    /// fresh bytes through the shadow view directly rather than via
    /// `reset()`.
    pub fn sync_icache(&self) {
        if self.prot.exec {
            self.flush_icache();
        }
    }

    #[cfg(target_arch = "aarch64")]
    fn flush_icache(&self) {
        // SAFETY: start..+size is the live executed mapping; __clear_cache
        // is libgcc/compiler-rt's portable cache-flush entry point.
        extern "C" {
            fn __clear_cache(beg: *mut libc::c_char, end: *mut libc::c_char);
        }
        unsafe {
            __clear_cache(
                self.start as *mut libc::c_char,
                (self.start + self.size) as *mut libc::c_char,
            );
        }
    }

    #[cfg(target_arch = "riscv64")]
    fn flush_icache(&self) {
        // RISC-V's fence.i only flushes the executing hart; since this
        // process never migrates cores mid-run (C9 pins for the process
        // lifetime), a single fence.i after the write is sufficient.
        unsafe { core::arch::asm!("fence.i") };
    }

    /// Returns `self.start <= addr < self.start + self.size`.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.start + self.size
    }

    pub fn release(self) {
        // SAFETY: both views are live mappings owned exclusively by self.
        unsafe {
            libc::munmap(self.start as *mut libc::c_void, self.size);
            libc::munmap(self.shadow_start as *mut libc::c_void, self.size);
        }
    }
}

fn fd_raw(fd: &OwnedFd) -> i32 {
    use std::os::fd::AsRawFd;
    fd.as_raw_fd()
}

/// Finds the mapping containing `addr`, by linear scan as spec.md's
/// `find(list, addr)` requires (base/interior/exclusive-end membership).
pub fn find_mapping(mappings: &[Mapping], addr: usize) -> Option<&Mapping> {
    mappings.iter().find(|m| m.contains(addr))
}

/// Distinguishes "this page is mapped" from ENOMEM by attempting a
/// zero-length `msync`: the kernel returns `ENOMEM` only for a page that is
/// not currently mapped, and succeeds (or returns another error) otherwise.
/// Mirrors the reference client's `check_page_mapped`.
fn page_is_mapped(addr: usize) -> bool {
    // SAFETY: msync with length 0 never reads or writes through addr; it
    // only consults the page tables.
    let rc = unsafe { libc::msync(addr as *mut libc::c_void, 0, libc::MS_ASYNC) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ENOMEM)
}

fn range_is_mapped(start: usize, size: usize) -> bool {
    let ps = page_size();
    let mut addr = start;
    while addr < start + size {
        if page_is_mapped(addr) {
            return true;
        }
        addr += ps;
    }
    false
}

/// Creates an anonymous shared-memory descriptor via `memfd_create`. The
/// reference client prefers Android's `/dev/ashmem` ioctl and falls back to
/// `memfd_create`; this workspace targets Linux-on-real-silicon, so only the
/// `memfd_create` path is implemented (the ashmem path is a documented gap,
/// see DESIGN.md).
fn portable_shmem_create(size: usize) -> Result<OwnedFd> {
    let name = CString::new("riscover-mapping").unwrap();
    // SAFETY: name is a valid NUL-terminated C string; memfd_create returns
    // an owned fd on success or -1 with errno set.
    let fd = unsafe { libc::memfd_create(name.as_ptr(), 0) };
    fd.into_result()?;
    // SAFETY: fd is valid and owned exclusively by this call past this
    // point (ftruncate does not consume it).
    unsafe { libc::ftruncate(fd, size as libc::off_t) }.into_result()?;
    // SAFETY: fd was just checked valid and not yet wrapped elsewhere.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Policy check run once at startup (spec.md §4.2): for every pointer value
/// in the fuzzing-value table, no page within `[-1000, 1000]` pages of it
/// may already be mapped. This bounds the worst case of a load/store
/// instruction with an immediate offset landing on real fuzzer memory.
pub fn check_ptrs_safe(pointers: &[u64]) -> Result<()> {
    let ps = page_size() as u64;
    for &p in pointers {
        let page = p & !(ps - 1);
        for k in -1000i64..=1000 {
            let addr = page.wrapping_add((k as i64 * ps as i64) as u64);
            if page_is_mapped(addr as usize) {
                log::error!(
                    "fuzzing-value pointer {:#x} is within 1000 pages of a mapped page ({:#x})",
                    p,
                    addr
                );
                return Err(SysError::AddressInUse);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_mapping_respects_exclusive_end() {
        let m = Mapping::create(pick_unused_addr(), page_size(), Prot::RW, None).unwrap();
        let mappings = vec![m];
        assert!(find_mapping(&mappings, mappings[0].start).is_some());
        assert!(find_mapping(&mappings, mappings[0].start + mappings[0].size - 1).is_some());
        assert!(find_mapping(&mappings, mappings[0].start + mappings[0].size).is_none());
        mappings.into_iter().next().unwrap().release();
    }

    #[test]
    fn reset_restores_baseline_through_shadow() {
        let size = page_size();
        let mut baseline = vec![0u8; size];
        baseline[0] = 0xAB;
        let m = Mapping::create(pick_unused_addr(), size, Prot::RW, Some(baseline)).unwrap();
        unsafe {
            *(m.start as *mut u8) = 0xFF;
        }
        m.reset();
        assert_eq!(unsafe { *(m.start as *const u8) }, 0xAB);
        m.release();
    }

    fn pick_unused_addr() -> usize {
        // Reserve a fixed-looking high address unlikely to collide with the
        // allocator or stack in a test binary; MAP_FIXED_NOREPLACE makes a
        // collision fail loudly rather than corrupt something.
        0x7000_0000_0000
    }
}

//! The Determinism Scrubber (C9, spec.md §4.9): strips everything about the
//! process's execution environment that could make two otherwise-identical
//! runs diverge before the Execution Engine ever sees an instruction —
//! ASLR, the vDSO, a shared controlling terminal, and per-core scheduling
//! noise.
//!
//! Every step here is grounded on the reference client's own startup
//! sequence (`diffuzz-client.c`'s `main()`: the `personality`/re-exec
//! dance, `fork()`-per-core loop, and `sched_setaffinity` retry loop), with
//! one substitution SPEC_FULL.md §4.9 calls for: the reference's hardcoded
//! `lab71`-hostname core exclusion is replaced by a repeatable
//! `--exclude-core` CLI option, handled in `cli`/`cpuinfo` rather than here.

use std::ffi::CString;
use std::time::Duration;

use riscover_mem::error::{IntoResult, Result, SysError};

/// 1 MiB, fixed-address stack the trampoline runs on once detached from
/// whatever stack the loader handed the process (spec.md §4.9: "switches
/// to a fixed-address stack"). Not specified by the reference source
/// (which inherits this from its own build's linker script); chosen here
/// in a region well clear of typical `mmap_min_addr`, ASLR'd heap/mmap
/// bases, and this workspace's own `riscover_mem::Mapping` traffic. See
/// DESIGN.md.
pub const FIXED_STACK_TOP: usize = 0x0000_6f00_0010_0000;
pub const FIXED_STACK_SIZE: usize = 1 << 20;

const PIN_RETRIES: u32 = 10;
const PIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Re-execs the current process with `ADDR_NO_RANDOMIZE` set if it is not
/// already, so every worker this process later forks inherits a
/// non-randomized address space. A no-op (returns without re-execing) once
/// the flag is already set, which is how the re-exec'd child recognizes it
/// doesn't need to do this again.
pub fn ensure_aslr_disabled() -> Result<()> {
    // SAFETY: 0xffff_ffff (GET, not SET) is the documented way to read the
    // current persona without side effects.
    let current = unsafe { libc::personality(0xffff_ffff) };
    if current == -1 {
        return Err(SysError::last());
    }
    if current & libc::ADDR_NO_RANDOMIZE != 0 {
        return Ok(());
    }

    // SAFETY: current is a previously-read valid persona value; OR-ing in
    // one documented bit and writing it back is exactly what `personality`
    // is for.
    unsafe { libc::personality((current | libc::ADDR_NO_RANDOMIZE) as libc::c_ulong) }.into_result()?;

    reexec_self()
}

/// `execv`s the current binary with its original argv, now running under
/// the updated persona. Never returns on success; on failure, returns so
/// the caller can treat it as a fatal configuration error.
fn reexec_self() -> Result<()> {
    let exe = std::env::current_exe().map_err(|_| SysError::NoSuchEntity)?;
    let exe_c = CString::new(exe.to_string_lossy().as_bytes()).map_err(|_| SysError::InvalidArgument)?;
    let args: Vec<CString> = std::env::args().map(|a| CString::new(a).unwrap_or_default()).collect();
    let mut argv: Vec<*const libc::c_char> = args.iter().map(|a| a.as_ptr()).collect();
    argv.push(std::ptr::null());

    // SAFETY: exe_c and every entry of argv are valid, NUL-terminated C
    // strings kept alive until the call; argv is NULL-terminated.
    unsafe { libc::execv(exe_c.as_ptr(), argv.as_ptr()) };
    Err(SysError::last())
}

/// Forks once and detaches: the parent becomes a do-nothing supervisor
/// that never returns to the caller (it just reaps the session leader's
/// eventual exit and sleeps in between), the child becomes a new session
/// leader with no controlling terminal.
///
/// On success, only the (former) child returns — it is now the process
/// that goes on to fork one worker per core.
pub fn detach() -> Result<()> {
    // SAFETY: fork has no preconditions; the trampoline/engine/mappings
    // have not been set up yet at this point in startup.
    let pid = unsafe { libc::fork() }.into_result()?;
    if pid > 0 {
        // Parent: supervise and never return.
        loop {
            let mut status = 0;
            // SAFETY: status is a valid out-param for waitpid.
            unsafe { libc::waitpid(pid, &mut status, 0) };
            std::thread::sleep(Duration::from_secs(3600));
        }
    }

    // SAFETY: setsid is always safe to call in a freshly forked child that
    // is not already a process group leader.
    unsafe { libc::setsid() }.into_result()?;
    Ok(())
}

/// Forks one child per entry in `core_ids`. Each child returns
/// `Ok(Some(core_id))`; the parent, once every child has been spawned,
/// never returns (it waits on all of them and exits when the last one
/// does).
pub fn fork_per_core_workers(core_ids: &[u32]) -> Result<u32> {
    let mut children = Vec::with_capacity(core_ids.len());
    for &core_id in core_ids {
        // SAFETY: fork is safe to call repeatedly in a loop; no thread
        // other than this one exists yet in this process.
        let pid = unsafe { libc::fork() }.into_result()?;
        if pid == 0 {
            return Ok(core_id);
        }
        children.push(pid);
    }

    let mut remaining = children.len();
    while remaining > 0 {
        let mut status = 0;
        // SAFETY: status is a valid out-param; -1 waits for any child.
        let reaped = unsafe { libc::waitpid(-1, &mut status, 0) };
        if reaped > 0 {
            remaining -= 1;
        }
    }
    std::process::exit(0);
}

/// Pins the calling thread to `core_id`, retrying up to `PIN_RETRIES` times
/// a second apart (spec.md §4.9): on a loaded or just-booted emulated host
/// the target core's affinity mask can transiently reject a request before
/// settling.
pub fn pin_to_cpu(core_id: u32) -> crate::error::Result<()> {
    // SAFETY: cpu_set is a plain stack value; CPU_ZERO/CPU_SET only ever
    // write within its bounds.
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core_id as usize, &mut set);
    }

    let mut last_err = None;
    for attempt in 0..PIN_RETRIES {
        // SAFETY: set is fully initialized above and sized correctly for
        // sched_setaffinity's expected cpu_set_t layout.
        let rc = unsafe {
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };
        if rc == 0 {
            return Ok(());
        }
        last_err = Some(std::io::Error::last_os_error());
        log::warn!("sched_setaffinity(core={core_id}) attempt {attempt} failed: {:?}", last_err);
        std::thread::sleep(PIN_RETRY_DELAY);
    }
    Err(crate::error::ClientError::PinFailed(core_id, last_err.unwrap()))
}

/// Unmaps the vDSO and any other section with no access permissions at all
/// (spec.md §4.9's determinism-scrubbing list), so a trapped instruction
/// sequence can never accidentally branch into kernel-provided code whose
/// exact placement the coordinator's reference host might not share.
pub fn unmap_untracked_sections() -> Result<()> {
    let maps = std::fs::read_to_string("/proc/self/maps").map_err(|_| SysError::NoSuchEntity)?;
    for line in maps.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            continue;
        }
        let range = fields[0];
        let perms = fields[1];
        let pathname = fields.get(5).copied().unwrap_or("");

        let is_special = matches!(pathname, "[vdso]" | "[vvar]" | "[vdso_data]") || perms == "---p";
        if !is_special {
            continue;
        }

        let (start_s, end_s) = match range.split_once('-') {
            Some(pair) => pair,
            None => continue,
        };
        let (start, end) = match (usize::from_str_radix(start_s, 16), usize::from_str_radix(end_s, 16)) {
            (Ok(s), Ok(e)) => (s, e),
            _ => continue,
        };

        // SAFETY: [start, end) is a mapping this very process owns, as
        // reported by its own /proc/self/maps; munmap-ing a section we are
        // not currently executing or have any live reference into is safe.
        let rc = unsafe { libc::munmap(start as *mut libc::c_void, end - start) };
        if rc != 0 {
            log::warn!("munmap({pathname}) failed: {}", std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Maps `FIXED_STACK_SIZE` bytes at `FIXED_STACK_TOP - FIXED_STACK_SIZE`
/// and switches the stack pointer there, then branches into `entry` —
/// never returning to whatever called this, so no frame relative to the
/// loader-assigned stack survives into the fuzzing loop.
///
/// # Safety
/// `entry` must never return (its signature promises `!`), and must not
/// rely on any value captured by reference from the caller's now-abandoned
/// stack.
pub unsafe fn switch_to_fixed_stack(entry: extern "C" fn() -> !) -> Result<!> {
    let base = FIXED_STACK_TOP - FIXED_STACK_SIZE;
    let ptr = libc::mmap(
        base as *mut libc::c_void,
        FIXED_STACK_SIZE,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED | libc::MAP_STACK,
        -1,
        0,
    );
    if ptr == libc::MAP_FAILED {
        return Err(SysError::AddressInUse);
    }

    let new_sp = FIXED_STACK_TOP;

    #[cfg(target_arch = "aarch64")]
    core::arch::asm!(
        "mov sp, {sp}",
        "br {entry}",
        sp = in(reg) new_sp,
        entry = in(reg) entry,
        options(noreturn),
    );

    #[cfg(target_arch = "riscv64")]
    core::arch::asm!(
        "mv sp, {sp}",
        "jr {entry}",
        sp = in(reg) new_sp,
        entry = in(reg) entry,
        options(noreturn),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_stack_region_is_page_aligned_and_nonzero_sized() {
        let page = riscover_mem::page_size();
        assert_eq!((FIXED_STACK_TOP - FIXED_STACK_SIZE) % page, 0);
        assert!(FIXED_STACK_SIZE >= page);
    }
}

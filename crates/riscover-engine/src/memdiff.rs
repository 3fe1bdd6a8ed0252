//! Memory Diff (C6, diff half): after a run, compares every attached
//! mapping's current content against its baseline and reports the
//! differing spans, bounded and hashed the way the reference client's
//! `lib/runner.c` does.

use riscover_mem::Mapping;

/// Only the first `CHECK_MEM_CUT_AT` bytes of a differing span are recorded
/// literally; the rest is represented by the FNV-1a hash alone.
pub const CHECK_MEM_CUT_AT: usize = 16;

/// Architecture-specific bounds (reference client `constants.h`, not part
/// of the retrieval pack for its exact values — chosen here in line with
/// RISC-V's far larger auto-map search space under `gen_random_prot`'s
/// more permissive defaults). See DESIGN.md.
#[cfg(target_arch = "aarch64")]
pub const CHECK_MEM_MAX_TRIES: usize = 5;
#[cfg(target_arch = "aarch64")]
pub const CHECK_MEM_MAX_NUMBER_MEM_CHANGES: usize = 32;
#[cfg(target_arch = "riscv64")]
pub const CHECK_MEM_MAX_TRIES: usize = 50;
#[cfg(target_arch = "riscv64")]
pub const CHECK_MEM_MAX_NUMBER_MEM_CHANGES: usize = 100;

const SCAN_CHUNK: usize = 512;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemChange {
    pub start: u64,
    pub length: u32,
    pub first_bytes: Vec<u8>,
    pub hash: u32,
}

fn fnv1a_step(mut hash: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn fnv1a(bytes: &[u8]) -> u32 {
    fnv1a_step(0x811c_9dc5, bytes)
}

/// Scans every mapping against its baseline in ascending address order,
/// merging a differing span across two mappings when `mappings[i+1].start
/// == mappings[i].start + mappings[i].size` and the merge point itself
/// differs, exactly as spec.md §4.6 requires. Returns the recorded changes
/// and whether the total was capped at `CHECK_MEM_MAX_NUMBER_MEM_CHANGES`.
pub fn scan(mappings: &[&Mapping]) -> (Vec<MemChange>, bool) {
    let mut out = Vec::new();
    let mut capped = false;
    let mut pending: Option<MemChange> = None;

    for (i, m) in mappings.iter().enumerate() {
        // SAFETY: shadow_start..+size is a live mapping for the lifetime of
        // `m`, which outlives this scan.
        let current = unsafe { std::slice::from_raw_parts(m.shadow_start as *const u8, m.size) };
        let baseline: &[u8] = &m.baseline;

        let mut off = 0usize;
        while off < m.size {
            let chunk_end = (off + SCAN_CHUNK).min(m.size);
            if current[off..chunk_end] == baseline[off..chunk_end] {
                off = chunk_end;
                continue;
            }

            let mut j = off;
            while j < chunk_end && current[j] == baseline[j] {
                j += 1;
            }
            if j == chunk_end {
                off = chunk_end;
                continue;
            }

            let mut k = j;
            while k < m.size && current[k] != baseline[k] {
                k += 1;
            }
            let span = &current[j..k];
            let start_addr = (m.start + j) as u64;

            let merges_with_pending = pending
                .as_ref()
                .map(|p| p.start + p.length as u64 == start_addr)
                .unwrap_or(false);

            if merges_with_pending {
                let p = pending.as_mut().unwrap();
                p.hash = fnv1a_step(p.hash, span);
                p.length += span.len() as u32;
                if p.first_bytes.len() < CHECK_MEM_CUT_AT {
                    let room = CHECK_MEM_CUT_AT - p.first_bytes.len();
                    p.first_bytes.extend_from_slice(&span[..room.min(span.len())]);
                }
            } else {
                if let Some(done) = pending.take() {
                    push_change(&mut out, &mut capped, done);
                }
                pending = Some(MemChange {
                    start: start_addr,
                    length: span.len() as u32,
                    first_bytes: span[..span.len().min(CHECK_MEM_CUT_AT)].to_vec(),
                    hash: fnv1a(span),
                });
            }
            off = k;
        }

        // A pending range only survives past this mapping's end if it ran
        // all the way to the boundary and the next mapping picks up exactly
        // where this one left off — otherwise it is already closed.
        if let Some(p) = &pending {
            let reaches_end = p.start + p.length as u64 == (m.start + m.size) as u64;
            let next_is_adjacent = mappings
                .get(i + 1)
                .map(|n| n.start == m.start + m.size)
                .unwrap_or(false);
            if !(reaches_end && next_is_adjacent) {
                push_change(&mut out, &mut capped, pending.take().unwrap());
            }
        }
    }
    if let Some(p) = pending.take() {
        push_change(&mut out, &mut capped, p);
    }
    (out, capped)
}

fn push_change(out: &mut Vec<MemChange>, capped: &mut bool, change: MemChange) {
    if out.len() >= CHECK_MEM_MAX_NUMBER_MEM_CHANGES {
        *capped = true;
        return;
    }
    out.push(change);
}

#[cfg(test)]
mod tests {
    use super::*;
    use riscover_mem::Prot;

    fn make_mapping(addr: usize, size: usize, baseline: Vec<u8>) -> Mapping {
        Mapping::create(addr, size, Prot::RW, Some(baseline)).unwrap()
    }

    #[test]
    fn single_write_reports_one_change() {
        let size = riscover_mem::page_size();
        let m = make_mapping(0x7100_0000_0000, size, vec![0u8; size]);
        unsafe {
            let p = m.shadow_start as *mut u64;
            p.add((size - 8) / 8).write(0x81221483d22ef611u64.to_le());
        }
        let (changes, capped) = scan(&[&m]);
        assert!(!capped);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].start, (m.start + size - 8) as u64);
        assert_eq!(changes[0].length, 8);
        assert_ne!(changes[0].hash, 0);
        m.release();
    }

    #[test]
    fn adjacent_mappings_merge_a_boundary_crossing_write() {
        let size = riscover_mem::page_size();
        let base = 0x7200_0000_0000usize;
        let m1 = make_mapping(base, size, vec![0u8; size]);
        let m2 = make_mapping(base + size, size, vec![0u8; size]);
        unsafe {
            let tail = (m1.shadow_start + size - 1) as *mut u8;
            for i in 0..8u8 {
                tail.add(i as usize).write(i + 1);
            }
        }
        let (changes, _) = scan(&[&m1, &m2]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].start, (m1.start + size - 1) as u64);
        assert_eq!(changes[0].length, 8);
        m1.release();
        m2.release();
    }

    #[test]
    fn cap_is_reported_once_exceeded() {
        let size = riscover_mem::page_size();
        assert!(size > (CHECK_MEM_MAX_NUMBER_MEM_CHANGES + 2) * SCAN_CHUNK);
        let m = make_mapping(0x7300_0000_0000, size, vec![0u8; size]);
        unsafe {
            let p = m.shadow_start as *mut u8;
            for i in 0..=CHECK_MEM_MAX_NUMBER_MEM_CHANGES {
                p.add(i * SCAN_CHUNK).write(0xFF);
            }
        }
        let (changes, capped) = scan(&[&m]);
        assert!(capped);
        assert_eq!(changes.len(), CHECK_MEM_MAX_NUMBER_MEM_CHANGES);
        m.release();
    }
}

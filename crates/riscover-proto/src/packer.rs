//! The Record Packer (C7): serializes one `ExecResult` (or a `run_full_seq`
//! batch of them) into the little-endian wire format spec.md §4.7 defines.
//!
//! Byte layout, one packed message:
//! - `u16 body_size` (excludes itself)
//! - `u8 tag`: 0 = SINGLE, 1 = MULTI
//! - if MULTI: `u8 count`, then `count` inner results back-to-back
//! - else: one inner result
//!
//! Inner result:
//! - `u8 signum`
//! - (if META) `u16 cycle`, (if META and RISC-V) `u16 instret`
//! - `u8 n_reg_diffs`, then `n_reg_diffs x { u8 abi_index, N bytes value }`
//!   (`N` is 8 for GP/scalar-FP/flag registers, 16 for ARM64 SIMD, `V` for
//!   RISC-V vectors)
//! - if `signum != 0`: `u64 si_addr`, `u64 si_pc`, `i32 si_code`
//! - (if CHECK_MEM) `u8 n_mem_changes`, then each: `u64 start`, `u32 length`,
//!   `min(length, 16)` bytes, `u32 hash`

use byteorder::{WriteBytesExt, LE};

use riscover_engine::ExecResult;
use riscover_regs::{RegDiff, Regs};

use crate::error::{ProtoError, Result};

const TAG_SINGLE: u8 = 0;
const TAG_MULTI: u8 = 1;

/// Packs a single `ExecResult`, diffed against `regs_before`, into one
/// SINGLE-tagged message.
pub fn pack_single(regs_before: &Regs, result: &ExecResult, meta_enabled: bool, check_mem: bool) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    write_inner(&mut body, regs_before, result, meta_enabled, check_mem)?;
    frame(TAG_SINGLE, |out| {
        out.extend_from_slice(&body);
        Ok(())
    })
}

/// Packs a `run_full_seq` batch into one MULTI-tagged message, inner results
/// in ascending `k` order exactly as produced (spec.md §5's ordering
/// guarantee).
pub fn pack_multi(regs_before: &Regs, results: &[ExecResult], meta_enabled: bool, check_mem: bool) -> Result<Vec<u8>> {
    assert!(results.len() <= u8::MAX as usize, "full_seq batch exceeds u8 count");
    frame(TAG_MULTI, |out| {
        out.write_u8(results.len() as u8).unwrap();
        for r in results {
            write_inner(out, regs_before, r, meta_enabled, check_mem)?;
        }
        Ok(())
    })
}

fn frame(tag: u8, write_body: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    body.write_u8(tag).unwrap();
    write_body(&mut body)?;
    if body.len() > u16::MAX as usize {
        return Err(ProtoError::BodyTooLarge(body.len()));
    }
    let mut out = Vec::with_capacity(body.len() + 2);
    out.write_u16::<LE>(body.len() as u16).unwrap();
    out.extend_from_slice(&body);
    Ok(out)
}

fn write_inner(out: &mut Vec<u8>, regs_before: &Regs, result: &ExecResult, meta_enabled: bool, check_mem: bool) -> Result<()> {
    out.write_u8(result.signum as u8).unwrap();

    if meta_enabled {
        let meta = result.meta.unwrap_or_default();
        out.write_u16::<LE>(meta.cycle as u16).unwrap();
        #[cfg(target_arch = "riscv64")]
        out.write_u16::<LE>(meta.instret as u16).unwrap();
    }

    let diffs = regs_before.diff(&result.regs_after);
    assert!(diffs.len() <= u8::MAX as usize, "register diff count exceeds u8");
    out.write_u8(diffs.len() as u8).unwrap();
    for diff in &diffs {
        write_reg_diff(out, diff);
    }

    if result.signum != 0 {
        out.write_u64::<LE>(result.si_addr).unwrap();
        out.write_u64::<LE>(result.si_pc).unwrap();
        out.write_i32::<LE>(result.si_code).unwrap();
    }

    if check_mem {
        let n = result.mem_changes.len().min(u8::MAX as usize);
        out.write_u8(n as u8).unwrap();
        for change in result.mem_changes.iter().take(n) {
            out.write_u64::<LE>(change.start).unwrap();
            out.write_u32::<LE>(change.length).unwrap();
            let cut = change.first_bytes.len().min(16);
            out.extend_from_slice(&change.first_bytes[..cut]);
            out.write_u32::<LE>(change.hash).unwrap();
        }
    }

    Ok(())
}

fn write_reg_diff(out: &mut Vec<u8>, diff: &RegDiff) {
    match diff {
        RegDiff::Scalar { abi_index, after, .. } => {
            out.write_u8(*abi_index).unwrap();
            out.write_u64::<LE>(*after).unwrap();
        }
        RegDiff::Vector { abi_index, after, .. } => {
            out.write_u8(*abi_index).unwrap();
            out.extend_from_slice(after.as_slice());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riscover_engine::Meta;

    fn clean_result(regs_after: Regs) -> ExecResult {
        ExecResult {
            signum: 0,
            si_code: 0,
            si_addr: 0,
            si_pc: 0,
            instr_idx: 0,
            regs_after,
            meta: None,
            mem_changes: Vec::new(),
            mem_changes_capped: false,
        }
    }

    #[test]
    fn single_clean_result_round_trips_body_size() {
        let before = Regs::default();
        let after = Regs::default();
        let packed = pack_single(&before, &clean_result(after), false, false).unwrap();
        let body_size = u16::from_le_bytes([packed[0], packed[1]]) as usize;
        assert_eq!(body_size, packed.len() - 2);
        assert_eq!(packed[2], 0); // TAG_SINGLE
    }

    #[test]
    fn meta_adds_cycle_field_before_reg_diff_count() {
        let before = Regs::default();
        let mut result = clean_result(Regs::default());
        result.meta = Some(Meta { cycle: 7, instret: 1 });
        let packed = pack_single(&before, &result, true, false).unwrap();
        // [0..2)=body_size [2]=tag [3]=signum [4..6)=cycle [..]=n_reg_diffs
        assert_eq!(u16::from_le_bytes([packed[4], packed[5]]), 7);
    }

    #[test]
    fn body_size_never_exceeds_u16_max() {
        let before = Regs::default();
        let results: Vec<ExecResult> = (0..2).map(|_| clean_result(Regs::default())).collect();
        let packed = pack_multi(&before, &results, false, false).unwrap();
        let body_size = u16::from_le_bytes([packed[0], packed[1]]) as usize;
        assert!(body_size <= u16::MAX as usize);
        assert_eq!(packed[2], 1); // TAG_MULTI
        assert_eq!(packed[3], 2); // count
    }
}

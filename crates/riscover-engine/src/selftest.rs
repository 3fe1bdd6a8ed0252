//! The six startup self-tests spec.md §4.5 requires the engine to pass
//! once, before the Batch Loop accepts its first input. A failure here is
//! a configuration-fatal error (spec.md §7): the engine is not safe to
//! fuzz with.

use riscover_regs::Regs;

use crate::ExecutionEngine;

#[cfg(target_arch = "aarch64")]
const ADD_ONE: u32 = 0x9100_0420; // add x0, x1, #1
#[cfg(target_arch = "riscv64")]
const ADD_ONE: u32 = 0x0012_8293; // addi t0, t0, 1

#[cfg(target_arch = "aarch64")]
const NOP: u32 = 0xD503_201F;
#[cfg(target_arch = "riscv64")]
const NOP: u32 = 0x0000_0013;

const ILLEGAL: u32 = 0x0000_0000;

pub fn run_all(engine: &mut ExecutionEngine) -> Result<(), String> {
    one_add_changes_only_expected_register(engine)?;
    illegal_after_valid_traps_at_second_slot(engine)?;
    repeated_nop_is_idempotent(engine)?;
    find_mapping_respects_membership()?;
    disassemble_nop_is_literal_nop()?;
    if engine.meta_enabled {
        meta_nop_reports_instret_one(engine)?;
    }
    Ok(())
}

fn one_add_changes_only_expected_register(engine: &mut ExecutionEngine) -> Result<(), String> {
    let mut before = Regs::default();
    #[cfg(target_arch = "aarch64")]
    {
        before.gp.x[1] = 41;
    }
    #[cfg(target_arch = "riscv64")]
    {
        before.gp.x[4] = 41; // t0 is x5, array index 4
    }

    let result = engine.run(&[ADD_ONE], &before);
    if result.signum != 0 {
        return Err(format!("expected clean run, got signum {}", result.signum));
    }
    let diffs = before.diff(&result.regs_after);
    if diffs.len() != 1 {
        return Err(format!("expected exactly one register diff, got {}", diffs.len()));
    }
    #[cfg(target_arch = "aarch64")]
    let expect_idx = 0u8; // x0
    #[cfg(target_arch = "riscv64")]
    let expect_idx = 4u8; // t0, abi_index 4
    match diffs[0] {
        riscover_regs::RegDiff::Scalar { abi_index, after, .. } => {
            if abi_index != expect_idx || after != 42 {
                return Err(format!("unexpected diff: index {abi_index} after {after}"));
            }
        }
        _ => return Err("expected a scalar diff".into()),
    }
    Ok(())
}

fn illegal_after_valid_traps_at_second_slot(engine: &mut ExecutionEngine) -> Result<(), String> {
    let before = Regs::default();
    let result = engine.run(&[ADD_ONE, ILLEGAL], &before);
    if result.instr_idx != 2 {
        return Err(format!("expected instr_idx 2, got {}", result.instr_idx));
    }
    let expected_pc = (engine.runner_base() + 4) as u64;
    if result.si_pc != expected_pc {
        return Err(format!("expected si_pc {expected_pc:#x}, got {:#x}", result.si_pc));
    }
    if result.signum == 0 {
        return Err("expected a trap, got a clean run".into());
    }
    Ok(())
}

fn repeated_nop_is_idempotent(engine: &mut ExecutionEngine) -> Result<(), String> {
    let before = Regs::default();
    let a = engine.run(&[NOP], &before);
    let b = engine.run(&[NOP], &before);
    if !crate::result_equal(&a, &b) {
        return Err("two back-to-back NOP runs were not result_equal".into());
    }
    Ok(())
}

fn find_mapping_respects_membership() -> Result<(), String> {
    use riscover_mem::{find_mapping, Mapping, Prot};
    let size = riscover_mem::page_size();
    let addr = 0x7A00_0000_0000usize;
    let m = Mapping::create(addr, size, Prot::RW, None).map_err(|e| e.to_string())?;
    let mappings = vec![m];
    let ok = find_mapping(&mappings, addr).is_some()
        && find_mapping(&mappings, addr + size - 1).is_some()
        && find_mapping(&mappings, addr + size).is_none();
    mappings.into_iter().next().unwrap().release();
    if !ok {
        return Err("find_mapping membership check failed".into());
    }
    Ok(())
}

fn disassemble_nop_is_literal_nop() -> Result<(), String> {
    if disassemble_nop(NOP) != Some("nop") {
        return Err("NOP encoding did not disassemble to the literal string \"nop\"".into());
    }
    Ok(())
}

/// Not a general disassembler (explicitly out of scope, spec.md §1's
/// non-goals) — just enough literal recognition for this one self-test.
fn disassemble_nop(word: u32) -> Option<&'static str> {
    #[cfg(target_arch = "aarch64")]
    {
        if word == 0xD503_201F {
            return Some("nop");
        }
    }
    #[cfg(target_arch = "riscv64")]
    {
        if word == 0x0000_0013 {
            return Some("nop");
        }
    }
    None
}

fn meta_nop_reports_instret_one(engine: &mut ExecutionEngine) -> Result<(), String> {
    let before = Regs::default();
    let result = engine.run(&[NOP], &before);
    match result.meta {
        Some(m) if m.instret == 1 => Ok(()),
        Some(m) => Err(format!("expected instret 1 after baseline subtraction, got {}", m.instret)),
        None => Err("META enabled but run produced no Meta".into()),
    }
}

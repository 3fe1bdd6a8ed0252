//! Literal end-to-end scenarios from spec.md §8: real instruction bytes,
//! run through a live `ExecutionEngine` against a real attached `Mapping`,
//! rather than the hand-fed memdiff/selftest unit tests that exercise the
//! surrounding machinery in isolation. These only run (and only build, via
//! the trampoline's `global_asm!`) on the target architecture they name.
//!
//! `ExecutionEngine::init` maps the runner page at a fixed address that is
//! never released, so at most one engine may exist per process — every
//! scenario for a given architecture therefore runs inside a single
//! `#[test]` against one shared engine rather than one test each.

#![cfg(any(target_arch = "aarch64", target_arch = "riscv64"))]

use riscover_engine::ExecutionEngine;
use riscover_mem::{Mapping, Prot};
use riscover_regs::Regs;

/// Scenarios 1, 2, 4, 5 (spec.md §8): a clean `add`, a trap at the second
/// slot, an in-mapping store, and a store whose write straddles two
/// adjacently-mapped regions.
#[cfg(target_arch = "aarch64")]
#[test]
fn arm64_end_to_end_scenarios() {
    let mut engine = ExecutionEngine::init(false).expect("engine init");
    let page_size = riscover_mem::page_size();

    // Scenario 1: add x0, x1, #1 with x1 = 41 -> x0 = 42, nothing else.
    let mut before = Regs::default();
    before.gp.x[1] = 41;
    let result = engine.run(&[0x9100_0420], &before);
    assert_eq!(result.signum, 0);
    let diffs = before.diff(&result.regs_after);
    assert_eq!(diffs.len(), 1);
    match diffs[0] {
        riscover_regs::RegDiff::Scalar { abi_index, after, .. } => {
            assert_eq!(abi_index, 0);
            assert_eq!(after, 42);
        }
        _ => panic!("expected a scalar diff"),
    }

    // Scenario 2: [add, illegal] -> SIGILL at instr_idx 2, si_pc == base+4.
    let before = Regs::default();
    let result = engine.run(&[0x9100_0420, 0x0000_0000], &before);
    assert_ne!(result.signum, 0);
    assert_eq!(result.instr_idx, 2);
    assert_eq!(result.si_pc, (engine.runner_base() + 4) as u64);
    assert_eq!(result.regs_after.gp.x[0], 42);

    // Scenario 4: str x1, [x2, #0] writing entirely inside one mapping.
    let mapping_addr = 0x6800_0000_0000usize;
    let mapping4 = Mapping::create(mapping_addr, page_size, Prot::RW, Some(vec![0u8; page_size])).expect("mapping 4");
    engine.attach_mapping(mapping4);

    let value = 0x8122_1483_d22e_f611u64;
    let mut before = Regs::default();
    before.gp.x[1] = value;
    before.gp.x[2] = (mapping_addr + page_size - 8) as u64;
    let result = engine.run(&[0xf900_0041], &before);
    assert_eq!(result.signum, 0);
    assert_eq!(result.mem_changes.len(), 1);
    let change = &result.mem_changes[0];
    assert_eq!(change.start, before.gp.x[2]);
    assert_eq!(change.length, 8);
    assert_eq!(&change.first_bytes[..], &value.to_le_bytes());
    assert_ne!(change.hash, 0);

    // Scenario 5: the same store at an offset straddling two adjacently
    // mapped regions must merge into a single `mem_change`. The engine
    // resets every attached mapping to its baseline before each run, so
    // mapping4's prior write cannot leak into this scenario's diff.
    let base5 = 0x6900_0000_0000usize;
    let m5a = Mapping::create(base5, page_size, Prot::RW, Some(vec![0u8; page_size])).expect("mapping 5a");
    let m5b = Mapping::create(base5 + page_size, page_size, Prot::RW, Some(vec![0u8; page_size])).expect("mapping 5b");
    engine.attach_mapping(m5a);
    engine.attach_mapping(m5b);

    let mut before = Regs::default();
    before.gp.x[1] = value;
    before.gp.x[2] = (base5 + page_size - 1) as u64;
    // str x1, [x2, #1]
    let result = engine.run(&[0xf900_0441], &before);
    assert_eq!(result.signum, 0);
    assert_eq!(result.mem_changes.len(), 1, "write crossing the boundary must merge into one change");
    let change = &result.mem_changes[0];
    assert_eq!(change.start, before.gp.x[2] + 1);
    assert_eq!(change.length, 8);
    assert_eq!(&change.first_bytes[..], &value.to_le_bytes());
}

/// Scenario 3 (spec.md §8): `addi t0, t0, 1` with `t0 = 41` clean-runs to
/// `t0 = 42` and changes nothing else. Scenario 6 (a vector load) runs in
/// the same test, behind the `vector` feature, for the same
/// one-engine-per-process reason the ARM64 test bundles its scenarios.
#[cfg(target_arch = "riscv64")]
#[test]
fn riscv_end_to_end_scenarios() {
    let mut engine = ExecutionEngine::init(false).expect("engine init");

    let mut before = Regs::default();
    before.gp.x[4] = 41; // t0 is x5, array index 4 (x1..x31 -> 0-based)
    let result = engine.run(&[0x0012_8293], &before);
    assert_eq!(result.signum, 0);
    let diffs = before.diff(&result.regs_after);
    assert_eq!(diffs.len(), 1);
    match diffs[0] {
        riscover_regs::RegDiff::Scalar { abi_index, after, .. } => {
            assert_eq!(abi_index, 4);
            assert_eq!(after, 42);
        }
        _ => panic!("expected a scalar diff"),
    }

    // Scenario 6: vle v0, 0(a5) loads a 16-byte buffer into v0 unchanged
    // elsewhere. Only meaningful on a build targeting the V extension.
    #[cfg(feature = "vector")]
    {
        let page_size = riscover_mem::page_size();
        let mut baseline = vec![0u8; page_size];
        let buf: [u64; 2] = [0x0000_0000_8080_0000, 0x0000_0000_0000_00ff];
        baseline[0..8].copy_from_slice(&buf[0].to_le_bytes());
        baseline[8..16].copy_from_slice(&buf[1].to_le_bytes());
        let mapping_addr = 0x6a00_0000_0000usize;
        let mapping = Mapping::create(mapping_addr, page_size, Prot::RW, Some(baseline)).expect("mapping");
        engine.attach_mapping(mapping);

        let mut before = Regs::default();
        before.gp.x[13] = mapping_addr as u64; // a5 is x15, array index 13
        let result = engine.run(&[0x0207_8007], &before);
        assert_eq!(result.signum, 0);
        let mut expected = [0u8; 16];
        expected[0..8].copy_from_slice(&buf[0].to_le_bytes());
        expected[8..16].copy_from_slice(&buf[1].to_le_bytes());
        assert_eq!(&result.regs_after.vec.v[0][..16], &expected[..]);
        assert!(result.mem_changes.is_empty(), "a load must not report any memory change");
    }
}

//! The runner page: a fixed-address, page-aligned region holding up to
//! `MAX_SEQ_LEN` 32-bit instruction slots, followed immediately by the
//! hand-written trampoline. The page itself is a `riscover_mem::Mapping`
//! with `prot = R+X`; the fuzzer always writes through the shadow view and
//! the hardware always executes through the primary view.

use riscover_mem::{Mapping, Prot};

/// Not found in the retrieved reference sources (`constants.h` was not part
/// of the retrieval pack); chosen here as a generous bound on fuzzer
/// instruction-sequence length. See DESIGN.md.
pub const MAX_SEQ_LEN: usize = 16;

/// Fixed load address for the runner page, chosen well away from typical
/// ASLR-free binary load addresses and stack/heap ranges used elsewhere in
/// the determinism scrubber (C9).
pub const RUNNER_PAGE_ADDR: usize = 0x0000_5555_0000_0000;

#[cfg(target_arch = "aarch64")]
const NOP_32: u32 = 0xD503_201F;
#[cfg(target_arch = "riscv64")]
const NOP_32: u32 = 0x0000_0013; // addi x0, x0, 0

/// RISC-V has no hardware-fixed link register — `jalr` writes its return
/// address into whatever `rd` the instruction names. The trampoline
/// dedicates `t6` (x31) rather than `ra` (a real fuzzable register) as both
/// the entry link register and the jump-target register, so the planted
/// return instruction, at slot `MAX_SEQ_LEN` and never touched again by
/// `load`, is the `jalr x0, 0(t6)` encoding of `ret` through `t6`.
#[cfg(target_arch = "riscv64")]
const RET_OPCODE: u32 = 0x000F_8067;

/// ARM64's `blr` always writes its link into `x30` unconditionally, which
/// would clobber `x30`'s fuzzed "before" value the instant the trampoline
/// entered the runner page. The trampoline instead enters with a plain
/// `br` (which touches no link register) and the return path back to
/// `asm::aarch64::riscover_trampoline_resume` is planted here instead, as a
/// `movz`/`movk` chain that rebuilds the resume address into `x29` (the
/// trampoline's own scratch register, never loaded with fuzzed data)
/// followed by a `br x29`. Five words, planted at slot `MAX_SEQ_LEN` and
/// never touched again by `load`.
#[cfg(target_arch = "aarch64")]
const BR_X29: u32 = 0xD61F_03A0;
#[cfg(target_arch = "aarch64")]
fn movz_movk_x29(addr: u64) -> [u32; 4] {
    let chunk = |i: u32| ((addr >> (i * 16)) & 0xFFFF) as u32;
    const RD: u32 = 29;
    [
        0xD280_0000 | (chunk(0) << 5) | RD,
        0xF2A0_0000 | (chunk(1) << 5) | RD,
        0xF2C0_0000 | (chunk(2) << 5) | RD,
        0xF2E0_0000 | (chunk(3) << 5) | RD,
    ]
}

pub struct RunnerPage {
    mapping: Mapping,
}

impl RunnerPage {
    pub fn init() -> riscover_mem::error::Result<Self> {
        let size = riscover_mem::page_size();
        let mapping = Mapping::create(RUNNER_PAGE_ADDR, size, Prot::RX, None)?;
        // SAFETY: shadow_start is a live RW mapping at least
        // (MAX_SEQ_LEN + 5) * 4 bytes long (one page is always that, for
        // any realistic MAX_SEQ_LEN).
        #[cfg(target_arch = "riscv64")]
        unsafe {
            let slots = mapping.shadow_start as *mut u32;
            slots.add(MAX_SEQ_LEN).write(RET_OPCODE);
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            let slots = mapping.shadow_start as *mut u32;
            let resume = crate::asm::aarch64::resume_addr() as u64;
            for (i, &w) in movz_movk_x29(resume).iter().enumerate() {
                slots.add(MAX_SEQ_LEN + i).write(w);
            }
            slots.add(MAX_SEQ_LEN + 4).write(BR_X29);
        }
        mapping.sync_icache();
        Ok(RunnerPage { mapping })
    }

    pub fn base(&self) -> usize {
        self.mapping.start
    }

    /// Writes `instrs` into the first slots and fills the rest up to
    /// `MAX_SEQ_LEN` with the architecture's canonical NOP, then flushes the
    /// I-cache for the executed view.
    pub fn load(&self, instrs: &[u32]) {
        assert!(instrs.len() <= MAX_SEQ_LEN);
        // SAFETY: shadow_start is a live RW mapping at least
        // MAX_SEQ_LEN * 4 bytes long (the page is at least one page, which
        // is always >= MAX_SEQ_LEN * 4 for any realistic MAX_SEQ_LEN).
        unsafe {
            let slots = self.mapping.shadow_start as *mut u32;
            for (i, &w) in instrs.iter().enumerate() {
                slots.add(i).write(w);
            }
            for i in instrs.len()..MAX_SEQ_LEN {
                slots.add(i).write(NOP_32);
            }
        }
        self.mapping.sync_icache();
    }

    /// Address of instruction slot `idx` (0-based) in the executed view.
    pub fn slot_addr(&self, idx: usize) -> usize {
        self.base() + idx * 4
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.mapping.contains(addr)
    }
}

#[cfg(all(test, target_arch = "aarch64"))]
mod tests {
    use super::*;

    /// Decodes a `movz`/`movk Xd, #imm, lsl #(hw*16)` word back to
    /// `(is_movz, hw, imm16, rd)`, the inverse of `movz_movk_x29`, to check
    /// the encoding independently of running it.
    fn decode(word: u32) -> (bool, u32, u32, u32) {
        let is_movz = (word >> 23) & 1 == 0;
        let hw = (word >> 21) & 0b11;
        let imm16 = (word >> 5) & 0xFFFF;
        let rd = word & 0b11111;
        (is_movz, hw, imm16, rd)
    }

    #[test]
    fn movz_movk_chain_rebuilds_the_address_into_x29() {
        let addr = 0x0000_aaaa_1234_5678u64;
        let words = movz_movk_x29(addr);
        let mut rebuilt = 0u64;
        for (i, &w) in words.iter().enumerate() {
            let (is_movz, hw, imm16, rd) = decode(w);
            assert_eq!(rd, 29);
            assert_eq!(hw, i as u32);
            assert_eq!(is_movz, i == 0);
            rebuilt |= (imm16 as u64) << (hw * 16);
        }
        assert_eq!(rebuilt, addr);
    }

    #[test]
    fn br_x29_targets_the_scratch_register() {
        assert_eq!(BR_X29 & 0b11111, 29);
    }
}

//! The fuzzing value table (spec.md §3): a fixed, compiled-in set of
//! interesting bit patterns used to populate registers for the
//! register-select `BatchInput` shape. None of its pointer-shaped entries
//! may land within 1000 pages of anything already mapped — `pointer_values`
//! reproduces the reference client's exact construction so
//! `riscover_mem::check_ptrs_safe` validates the identical set.

/// Anchor address the reference client's `fuzzing_value_map.c` sandwiches
/// pointer candidates around. Chosen once, arbitrarily, by the original
/// implementation; kept here so two clients fuzz the same addresses.
pub const VALID_ADDR: u64 = 0x0080_0000;

const SANDWICH_OFFSETS: [i64; 6] = [1, 3, 4, 7, 8, 16];

/// Pointer-shaped fuzzing values: `VALID_ADDR` itself, plus
/// `page_size * {0,1,2} ± {1,3,4,7,8,16}` bytes around it. Not arbitrary —
/// this is the exact "sandwich" the reference client builds so a
/// load/store-with-immediate that lands a few bytes off a page boundary is
/// covered without the table degenerating into fully random addresses.
pub fn pointer_values(page_size: u64) -> Vec<u64> {
    let mut out = vec![VALID_ADDR];
    for mult in 0..3u64 {
        let base = VALID_ADDR + mult * page_size;
        for &off in &SANDWICH_OFFSETS {
            out.push((base as i64 + off) as u64);
            out.push((base as i64 - off) as u64);
        }
    }
    out
}

/// Generic 64-bit scalar fuzzing values: zero, small positives, the NOP
/// encoding for both architectures (an instruction decoder occasionally
/// gets fed a register value that aliases its own opcode space), and
/// signed/unsigned extrema.
pub fn scalar_values() -> Vec<u64> {
    vec![
        0,
        1,
        2,
        3,
        4,
        7,
        8,
        16,
        42,
        1337,
        0xD503_201F,           // ARM64 NOP
        0x0000_0013,           // RISC-V NOP (addi x0, x0, 0)
        u64::MAX,
        u32::MAX as u64,
        i64::MIN as u64,
        i64::MAX as u64,
        (i32::MIN as i64) as u64,
        i32::MAX as u64,
    ]
}

/// FP fuzzing values in both `f32` and `f64` form: spec.md's `±0, ±1, ±∞,
/// ±NaN, FLT/DBL extremes, subnormals`, plus the reference client's
/// `±2.0/±42.0/±1337.0` additions (SPEC_FULL.md §3).
pub fn f32_values() -> Vec<f32> {
    vec![
        0.0,
        -0.0,
        1.0,
        -1.0,
        2.0,
        -2.0,
        42.0,
        -42.0,
        1337.0,
        -1337.0,
        f32::INFINITY,
        f32::NEG_INFINITY,
        f32::NAN,
        f32::MIN,
        f32::MAX,
        f32::MIN_POSITIVE,
        f32::from_bits(1), // smallest subnormal
    ]
}

pub fn f64_values() -> Vec<f64> {
    vec![
        0.0,
        -0.0,
        1.0,
        -1.0,
        2.0,
        -2.0,
        42.0,
        -42.0,
        1337.0,
        -1337.0,
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::NAN,
        f64::MIN,
        f64::MAX,
        f64::MIN_POSITIVE,
        f64::from_bits(1),
    ]
}

/// Every pointer-shaped value the table contains, for
/// `riscover_mem::check_ptrs_safe` to validate at startup.
pub fn all_pointer_candidates(page_size: u64) -> Vec<u64> {
    pointer_values(page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_values_are_sandwiched_around_valid_addr() {
        let vals = pointer_values(4096);
        assert!(vals.contains(&VALID_ADDR));
        assert!(vals.contains(&(VALID_ADDR + 1)));
        assert!(vals.contains(&(VALID_ADDR - 1)));
        assert!(vals.contains(&(VALID_ADDR + 4096 + 16)));
        // 1 anchor + 3 multiples * 6 offsets * 2 signs
        assert_eq!(vals.len(), 1 + 3 * 6 * 2);
    }

    #[test]
    fn fp_tables_include_signed_zero_and_extrema() {
        let f32s = f32_values();
        assert!(f32s.iter().any(|v| v.is_sign_negative() && *v == 0.0));
        assert!(f32s.contains(&f32::INFINITY));
        assert!(f32s.iter().any(|v| v.is_nan()));
    }
}

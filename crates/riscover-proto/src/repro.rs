//! Reproducer YAML I/O (spec.md §6): a single human-readable document
//! wrapping the same in-memory `ExecResult`/`Regs` data the rest of this
//! crate packs to wire format. Loading rejects a document whose `flags:`
//! list does not match the running binary's build flags.

use std::path::Path;

use serde::{Deserialize, Serialize};

use riscover_engine::ExecResult;
use riscover_regs::{RegDiff, Regs};

use crate::error::{ProtoError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReproDoc {
    pub input: ReproInput,
    #[serde(default)]
    pub mappings: Vec<ReproMapping>,
    pub results: Vec<ReproResult>,
    pub flags: Vec<String>,
    pub arch: String,
    pub git_commit: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReproInput {
    pub instr_seq: Vec<u32>,
    #[serde(default)]
    pub dis_opcodes: Vec<String>,
    pub regs: Regs,
}

/// `val` is a hex string of little-endian memory words, per spec.md §6.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReproMapping {
    pub start: u64,
    pub n: u64,
    pub prot: String,
    pub val: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReproRegDelta {
    pub name: String,
    /// Hex-encoded value: 8 bytes for a scalar register, up to `V` bytes
    /// for a vector register.
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReproMemDiff {
    pub start: u64,
    pub length: u32,
    pub bytes: String,
    pub hash: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ReproMeta {
    pub cycle: u64,
    pub instret: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReproResult {
    pub signum: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub si_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub si_addr: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub si_pc: Option<u64>,
    pub regs_after: Vec<ReproRegDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_diffs: Option<Vec<ReproMemDiff>>,
    /// Present when the run's `mem_changes` hit `CHECK_MEM_MAX_NUMBER_MEM_CHANGES`
    /// (spec.md §7's "Memory-change overflow" error kind), so a human
    /// reading the file knows more changes existed than were recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_diffs_capped_at: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ReproMeta>,
    /// CPUs that produced this exact result, so byte-identical results
    /// from different cores can be grouped under one entry once a human is
    /// diffing multiple clients' reproducers by hand.
    #[serde(default)]
    pub clients: Vec<String>,
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Builds the `regs_after:` delta list the way `ExecResult`'s register diff
/// against `regs_before` would report it.
pub fn reg_deltas(regs_before: &Regs, regs_after: &Regs) -> Vec<ReproRegDelta> {
    regs_before
        .diff(regs_after)
        .into_iter()
        .map(|d| match d {
            RegDiff::Scalar { abi_index, after, .. } => ReproRegDelta {
                name: Regs::abi_name(abi_index).to_string(),
                value: hex_encode(&after.to_le_bytes()),
            },
            RegDiff::Vector { abi_index, after, .. } => ReproRegDelta {
                name: Regs::abi_name(abi_index).to_string(),
                value: hex_encode(after.as_slice()),
            },
        })
        .collect()
}

pub fn result_to_repro(regs_before: &Regs, result: &ExecResult, clients: Vec<String>) -> ReproResult {
    ReproResult {
        signum: result.signum,
        si_code: (result.signum != 0).then_some(result.si_code),
        si_addr: (result.signum != 0).then_some(result.si_addr),
        si_pc: (result.signum != 0).then_some(result.si_pc),
        regs_after: reg_deltas(regs_before, &result.regs_after),
        mem_diffs: (!result.mem_changes.is_empty()).then(|| {
            result
                .mem_changes
                .iter()
                .map(|c| ReproMemDiff {
                    start: c.start,
                    length: c.length,
                    bytes: hex_encode(&c.first_bytes),
                    hash: c.hash,
                })
                .collect()
        }),
        mem_diffs_capped_at: result.mem_changes_capped.then_some(result.mem_changes.len() as u8),
        meta: result.meta.map(|m| ReproMeta { cycle: m.cycle, instret: m.instret }),
        clients,
    }
}

/// Loads a reproducer file. Lines starting with `#` are YAML comments and
/// are already ignored by the YAML parser itself; this function additionally
/// enforces spec.md §6's requirement that the document's `flags:` list must
/// match the running binary's build flags before any of its content is
/// trusted.
pub fn load(path: &Path, running_flags: &[&str]) -> Result<ReproDoc> {
    let text = std::fs::read_to_string(path)?;
    let doc: ReproDoc = serde_yaml::from_str(&text)?;
    validate_flags(&doc, running_flags)?;
    Ok(doc)
}

pub fn save(doc: &ReproDoc, path: &Path) -> Result<()> {
    let text = serde_yaml::to_string(doc)?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Rejects a reproducer whose build-flag set differs from the running
/// binary's — the whitelisted-pstate-mask/META/vector compile-time options
/// change both the runner's behavior and the wire layout, so a reproducer
/// built under a different flag set cannot be trusted to replay faithfully.
pub fn validate_flags(doc: &ReproDoc, running_flags: &[&str]) -> Result<()> {
    let mut repro_sorted = doc.flags.clone();
    repro_sorted.sort();
    let mut running_sorted: Vec<String> = running_flags.iter().map(|s| s.to_string()).collect();
    running_sorted.sort();
    if repro_sorted != running_sorted {
        return Err(ProtoError::FlagsMismatch {
            repro: repro_sorted.join(","),
            binary: running_sorted.join(","),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> ReproDoc {
        ReproDoc {
            input: ReproInput {
                instr_seq: vec![0x9100_0420],
                dis_opcodes: vec!["add x0, x1, #1".to_string()],
                regs: Regs::default(),
            },
            mappings: Vec::new(),
            results: vec![ReproResult {
                signum: 0,
                si_code: None,
                si_addr: None,
                si_pc: None,
                regs_after: Vec::new(),
                mem_diffs: None,
                mem_diffs_capped_at: None,
                meta: None,
                clients: vec!["core0".to_string()],
            }],
            flags: vec!["meta".to_string()],
            arch: "aarch64".to_string(),
            git_commit: "deadbeef".to_string(),
        }
    }

    #[test]
    fn round_trips_through_yaml() {
        let doc = sample_doc();
        let text = serde_yaml::to_string(&doc).unwrap();
        let back: ReproDoc = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.arch, "aarch64");
        assert_eq!(back.input.instr_seq, vec![0x9100_0420]);
    }

    #[test]
    fn flags_mismatch_is_rejected() {
        let doc = sample_doc();
        assert!(validate_flags(&doc, &["meta"]).is_ok());
        assert!(validate_flags(&doc, &["meta", "vector"]).is_err());
        assert!(validate_flags(&doc, &[]).is_err());
    }

    #[test]
    fn reg_deltas_reports_abi_names() {
        let before = Regs::default();
        let mut after = Regs::default();
        after.gp.x[0] = 42;
        let deltas = reg_deltas(&before, &after);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].name, "x0");
        assert_eq!(deltas[0].value, hex_encode(&42u64.to_le_bytes()));
    }
}

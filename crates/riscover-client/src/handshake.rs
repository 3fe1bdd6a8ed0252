//! Initial handshake (spec.md §4.8, §6): client sends hostname, core
//! topology, raw CPU-identification text, vector geometry, a flexible tag
//! list and a build-identity hash; the server replies with `max_batch_n`
//! and `seed`.
//!
//! Field order matches the reference client's `start_client`
//! (`diffuzz-client.c`) exactly, so a coordinator speaking the reference
//! protocol needs no changes (SPEC_FULL.md §4.8).

use byteorder::{ReadBytesExt, LE};

use crate::cpuinfo::{self, VectorGeometry};
use crate::error::Result;
use crate::net::Connection;

pub struct HandshakeReply {
    pub max_batch_n: u32,
    pub seed: u64,
}

pub struct HandshakeInfo<'a> {
    pub hostname: &'a str,
    pub num_cpus: u32,
    pub core: u32,
    pub lscpu: &'a str,
    pub proc_cpuinfo: &'a str,
    pub sys_possible: &'a str,
    pub vector: VectorGeometry,
}

/// A 32-character hex build-identity hash. No build-time hash injection
/// exists in this workspace's build (the reference client's linker-section
/// `elf_hash` comes from its own build tooling); `RISCOVER_BUILD_HASH` lets
/// packagers supply one, and an all-zero placeholder otherwise mirrors the
/// reference client's own unbuilt-tree placeholder.
pub fn build_identity_hash() -> String {
    match option_env!("RISCOVER_BUILD_HASH") {
        Some(h) if h.len() >= 32 => h[..32].to_string(),
        Some(h) => format!("{h:0<32}"),
        None => "0".repeat(32),
    }
}

pub fn perform(conn: &mut Connection, info: &HandshakeInfo) -> Result<HandshakeReply> {
    conn.send_string(info.hostname)?;
    conn.send_msg(&info.num_cpus.to_le_bytes())?;
    conn.send_msg(&info.core.to_le_bytes())?;
    conn.send_string(info.lscpu)?;
    conn.send_string(info.proc_cpuinfo)?;
    conn.send_string(info.sys_possible)?;
    conn.send_msg(&info.vector.vec_size.to_le_bytes())?;

    #[cfg(target_arch = "aarch64")]
    {
        conn.send_msg(&info.vector.sve_max.to_le_bytes())?;
        conn.send_msg(&info.vector.sme_max.to_le_bytes())?;
    }

    // No Android-only metadata tags on this Linux-on-real-silicon build
    // (see DESIGN.md); an empty tag list is still wire-valid.
    let n_tags: u32 = 0;
    conn.send_msg(&n_tags.to_le_bytes())?;

    conn.send_string(&build_identity_hash())?;

    let max_batch_n = u32::from_le_bytes(conn.recv_msg_n(4)?.try_into().unwrap());
    let seed_bytes = conn.recv_msg_n(8)?;
    let seed = (&seed_bytes[..]).read_u64::<LE>().unwrap();

    Ok(HandshakeReply { max_batch_n, seed })
}

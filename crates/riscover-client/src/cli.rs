//! Command-line surface (spec.md §6: `client <coordinator_ip> <coordinator_port> [hostname]`),
//! extended with the `--exclude-core` option SPEC_FULL.md §4.9 directs in
//! place of the reference client's `lab71`-hostname hack.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "riscover-client",
    version,
    about = "Differential CPU-instruction fuzzing client for RISC-V64 and ARMv8-A"
)]
pub struct Opt {
    /// Coordinator IPv4 address to connect to.
    pub coordinator_ip: String,

    /// Coordinator TCP port.
    pub coordinator_port: u16,

    /// Preferred hostname to report during the handshake; overrides
    /// `$HOST` and the system hostname.
    pub hostname: Option<String>,

    /// Core index to skip when spawning one worker per pinned core.
    /// Repeatable. Replaces the reference client's hardcoded exclusion of
    /// a single lab machine's core 0.
    #[arg(long = "exclude-core", value_name = "N")]
    pub exclude_core: Vec<u32>,
}

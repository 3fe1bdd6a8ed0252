//! Process entry point: determinism-scrub, fork one worker per pinned
//! core, then drive each worker's handshake and Batch Loop.
//!
//! Startup order mirrors the reference client's `main()`
//! (`diffuzz-client.c`) field for field: the `personality`/re-exec ASLR
//! dance runs before anything else (even argument parsing, since it only
//! needs the raw argv to re-exec itself), then CLI parsing, then the
//! session-detach fork, then one fork per selected core, then each core's
//! own pin/unmap/fixed-stack sequence before it ever touches the Execution
//! Engine or the network.

mod batch;
mod cli;
mod cpuinfo;
mod error;
mod handshake;
mod input;
mod net;
mod scrub;

use std::sync::OnceLock;

use clap::Parser;
use riscover_engine::ExecutionEngine;

struct WorkerConfig {
    coordinator_ip: String,
    coordinator_port: u16,
    hostname: String,
    core: u32,
    num_cpus: u32,
}

static WORKER_CONFIG: OnceLock<WorkerConfig> = OnceLock::new();

const META_ENABLED: bool = cfg!(feature = "meta");

fn main() {
    env_logger::init();

    if let Err(e) = scrub::ensure_aslr_disabled() {
        log::error!("could not disable ASLR: {e}");
        std::process::exit(1);
    }

    let opt = cli::Opt::parse();

    if let Err(e) = scrub::detach() {
        log::error!("failed to detach from the launching session: {e}");
        std::process::exit(1);
    }

    let hostname = cpuinfo::detect_preferred_hostname(opt.hostname.as_deref());
    let detected = cpuinfo::num_cpus();
    let effective = cpuinfo::effective_core_count(&hostname, detected);
    let core_ids: Vec<u32> = (0..effective).filter(|c| !opt.exclude_core.contains(c)).collect();

    log::info!(
        "hostname={hostname} detected_cpus={detected} spawning={} excluded={:?}",
        core_ids.len(),
        opt.exclude_core
    );

    let core = match scrub::fork_per_core_workers(&core_ids) {
        Ok(core) => core,
        Err(e) => {
            log::error!("failed to fork per-core workers: {e}");
            std::process::exit(1);
        }
    };

    let _ = WORKER_CONFIG.set(WorkerConfig {
        coordinator_ip: opt.coordinator_ip,
        coordinator_port: opt.coordinator_port,
        hostname,
        core,
        num_cpus: effective,
    });

    // SAFETY: worker_entry never returns and captures nothing from this
    // frame's stack by reference — its only input is the `WORKER_CONFIG`
    // static set just above.
    if let Err(e) = unsafe { scrub::switch_to_fixed_stack(worker_entry) } {
        log::error!("failed to switch to the fixed-address worker stack: {e}");
        std::process::exit(1);
    }
}

/// Runs on the fixed-address stack `switch_to_fixed_stack` installed: pins
/// to this worker's core, scrubs the remaining per-process determinism
/// hazards, brings up the Execution Engine, and hands control to the
/// handshake + Batch Loop.
extern "C" fn worker_entry() -> ! {
    let cfg = WORKER_CONFIG.get().expect("WORKER_CONFIG must be set before switch_to_fixed_stack");

    if let Err(e) = scrub::pin_to_cpu(cfg.core) {
        log::error!("core {}: failed to pin: {e}", cfg.core);
        std::process::exit(1);
    }

    if let Err(e) = scrub::unmap_untracked_sections() {
        log::warn!("core {}: failed to unmap vdso/vvar sections: {e}", cfg.core);
    }

    let mut engine = match ExecutionEngine::init(META_ENABLED) {
        Ok(e) => e,
        Err(e) => {
            log::error!("core {}: engine initialization failed: {e}", cfg.core);
            std::process::exit(1);
        }
    };

    if let Err(e) = engine.check_fuzzing_values_safe() {
        log::error!("core {}: fuzzing-value pointer table overlaps mapped memory: {e}", cfg.core);
        if let Ok(maps) = std::fs::read_to_string("/proc/self/maps") {
            eprintln!("{maps}");
        }
        std::process::exit(1);
    }

    log::info!("core {}: connecting to {}:{}...", cfg.core, cfg.coordinator_ip, cfg.coordinator_port);
    let mut conn = match net::Connection::connect(&cfg.coordinator_ip, cfg.coordinator_port) {
        Ok(c) => c,
        Err(e) => {
            log::error!("core {}: connection failed: {e}", cfg.core);
            std::process::exit(1);
        }
    };
    log::info!("core {}: connected.", cfg.core);

    let vector = cpuinfo::detect_vector_geometry();
    let proc_cpuinfo = cpuinfo::read_file_or_empty("/proc/cpuinfo");
    let sys_possible = cpuinfo::read_file_or_empty("/sys/devices/system/cpu/possible");
    let lscpu = cpuinfo::get_lscpu();
    let info = handshake::HandshakeInfo {
        hostname: &cfg.hostname,
        num_cpus: cfg.num_cpus,
        core: cfg.core,
        lscpu: &lscpu,
        proc_cpuinfo: &proc_cpuinfo,
        sys_possible: &sys_possible,
        vector,
    };

    let reply = match handshake::perform(&mut conn, &info) {
        Ok(r) => r,
        Err(e) => {
            log::error!("core {}: handshake failed: {e}", cfg.core);
            std::process::exit(1);
        }
    };
    log::info!("core {}: handshake complete, max_batch_n={} seed={:#x}", cfg.core, reply.max_batch_n, reply.seed);

    let loop_ = batch::BatchLoop::new(reply.max_batch_n, META_ENABLED, riscover_mem::page_size() as u64);
    if let Err(e) = loop_.run(&mut conn, &mut engine) {
        log::error!("core {}: batch loop terminated: {e}", cfg.core);
        std::process::exit(1);
    }

    std::process::exit(0);
}

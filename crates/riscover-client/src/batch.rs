//! The Batch Loop (C8, spec.md §4.8): after the handshake, repeatedly reads
//! `n` then `n * max_input_size` bytes, decodes, runs and packs each input
//! in order, and sends the packed results back as one compressed message.
//!
//! Grounded on the reference client's own `while (true) { recv_msg_n(&n);
//! recv_msg_compressed(inputs_buf); for (b..n) { ...; pack_result(...); }
//! send_msg_compressed(out_bigbuffer); }` loop in `diffuzz-client.c`.

use std::io::Cursor;

use riscover_engine::ExecutionEngine;
use riscover_regs::Regs;

use crate::error::{ClientError, Result};
use crate::input::{self, DecodedInput};
use crate::net::Connection;

/// Generous upper bound on one packed result's wire size; the reference
/// client's equivalent is `OUT_BIGBUFFER_SIZE`, sized so a full batch of
/// maximally-trapping, maximally-diffing runs can never overflow it.
const MAX_PACKED_RESULT_BYTES: usize = 4096;

const CHECK_MEM: bool = cfg!(feature = "check-mem");

pub struct BatchLoop {
    max_batch_n: u32,
    meta_enabled: bool,
    gp_table: Vec<u64>,
    fp_table: Vec<u64>,
}

impl BatchLoop {
    pub fn new(max_batch_n: u32, meta_enabled: bool, page_size: u64) -> Self {
        BatchLoop {
            max_batch_n,
            meta_enabled,
            gp_table: input::gp_table(page_size),
            fp_table: input::fp_table(),
        }
    }

    /// Runs the loop until the coordinator closes the connection or a
    /// transport error occurs; either exits the worker (spec.md §7:
    /// transport failures are fatal).
    pub fn run(&self, conn: &mut Connection, engine: &mut ExecutionEngine) -> Result<()> {
        let max_input_size = input::max_input_size();
        let max_payload_bytes = self.max_batch_n as usize * max_input_size;

        loop {
            let n = u32::from_le_bytes(conn.recv_msg_n(4)?.try_into().unwrap());
            if n > self.max_batch_n {
                return Err(ClientError::BatchTooLarge(n, self.max_batch_n));
            }

            let payload_len = n as usize * max_input_size;
            let payload =
                conn.recv_msg_compressed(max_payload_bytes as u32 + 64, payload_len)?;
            if payload.len() != payload_len {
                return Err(ClientError::InputTruncated(payload_len));
            }

            let mut cursor = Cursor::new(payload.as_slice());
            let mut out = Vec::with_capacity(n as usize * MAX_PACKED_RESULT_BYTES / 4);

            for _ in 0..n {
                let decoded = input::decode(&mut cursor, &self.gp_table, &self.fp_table)?;
                self.run_one(engine, &decoded, &mut out)?;
            }

            conn.send_msg_compressed(&out)?;
        }
    }

    fn run_one(&self, engine: &mut ExecutionEngine, decoded: &DecodedInput, out: &mut Vec<u8>) -> Result<()> {
        let regs_before: Regs = decoded.regs_before;
        if decoded.full_seq {
            let results = engine.run_full_seq(&decoded.instr_seq, &regs_before);
            let packed = riscover_proto::pack_multi(&regs_before, &results, self.meta_enabled, CHECK_MEM)?;
            out.extend_from_slice(&packed);
        } else {
            let result = engine.run_with_automap(&decoded.instr_seq, &regs_before);
            let packed = riscover_proto::pack_single(&regs_before, &result, self.meta_enabled, CHECK_MEM)?;
            out.extend_from_slice(&packed);
        }
        Ok(())
    }
}

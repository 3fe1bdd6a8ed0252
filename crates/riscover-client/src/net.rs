//! Coordinator connection: length-prefixed messages over TCP, with a
//! persistent zlib stream for the batch-input/result traffic (spec.md §6).
//!
//! Grounded on the reference client's `lib/connection.c`: a single
//! deflate/inflate stream lives for the whole connection and is flushed
//! (not finished) after each message, exactly as `samply`/`perfrecord`
//! drive `flate2::Compress`/`Decompress` for their own streaming
//! decompression (`mac/task_profiler.rs`).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};

use crate::error::{ClientError, Result};

const SOCKET_BUFFER_BYTES: usize = 1 << 20;
const CONNECT_RETRIES: u32 = 30;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct Connection {
    stream: TcpStream,
    deflate: Compress,
    inflate: Decompress,
}

impl Connection {
    /// Connects with bounded retry (spec.md §9 carries the reference
    /// client's `connect_with_retry`: 30 attempts, 1s apart).
    pub fn connect(ip: &str, port: u16) -> Result<Self> {
        let addr = format!("{ip}:{port}");
        let mut last_err = None;
        for attempt in 0..CONNECT_RETRIES {
            match TcpStream::connect(&addr) {
                Ok(stream) => return Ok(Self::from_stream(stream)?),
                Err(e) => {
                    log::warn!("connection attempt {attempt} to {addr} failed: {e}; retrying");
                    last_err = Some(e);
                    std::thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        }
        Err(ClientError::Io(last_err.unwrap()))
    }

    fn from_stream(stream: TcpStream) -> Result<Self> {
        set_buffer_sizes(&stream)?;
        Ok(Connection {
            stream,
            deflate: Compress::new(Compression::default(), true),
            inflate: Decompress::new(true),
        })
    }

    /// `send_msg`: `u32 len` then `len` raw bytes, uncompressed.
    pub fn send_msg(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_u32::<LE>(buf.len() as u32)?;
        self.stream.write_all(buf)?;
        Ok(())
    }

    pub fn send_string(&mut self, s: &str) -> Result<()> {
        self.send_msg(s.as_bytes())
    }

    /// `recv_msg`: `u32 len`, rejects `len > max`, then reads exactly `len`
    /// bytes.
    pub fn recv_msg(&mut self, max: u32) -> Result<Vec<u8>> {
        let n = self.stream.read_u32::<LE>()?;
        if n > max {
            return Err(ClientError::OversizeMessage(n, max));
        }
        let mut buf = vec![0u8; n as usize];
        self.read_exact_or_closed(&mut buf)?;
        Ok(buf)
    }

    pub fn recv_msg_n(&mut self, n: u32) -> Result<Vec<u8>> {
        let buf = self.recv_msg(n)?;
        if buf.len() as u32 != n {
            return Err(ClientError::InputTruncated(n as usize));
        }
        Ok(buf)
    }

    fn read_exact_or_closed(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let got = self.stream.read(&mut buf[filled..])?;
            if got == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            filled += got;
        }
        Ok(())
    }

    /// Sends `buf` deflated through the connection's persistent stream,
    /// framed as `u32 compressed_len` + bytes (spec.md §6).
    pub fn send_msg_compressed(&mut self, buf: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(buf.len());
        self.deflate
            .compress_vec(buf, &mut out, FlushCompress::Sync)
            .map_err(|e| ClientError::Compression(e.to_string()))?;
        self.send_msg(&out)
    }

    /// Receives and inflates a `u32 compressed_len`-framed message through
    /// the connection's persistent stream, up to `max_out` decompressed
    /// bytes.
    pub fn recv_msg_compressed(&mut self, max_compressed: u32, max_out: usize) -> Result<Vec<u8>> {
        let compressed = self.recv_msg(max_compressed)?;
        let mut out = Vec::with_capacity(max_out.min(1 << 20));
        self.inflate
            .decompress_vec(&compressed, &mut out, FlushDecompress::Sync)
            .map_err(|e| ClientError::Compression(e.to_string()))?;
        Ok(out)
    }
}

fn set_buffer_sizes(stream: &TcpStream) -> Result<()> {
    use std::os::fd::AsRawFd;
    let fd = stream.as_raw_fd();
    let size = SOCKET_BUFFER_BYTES as libc::c_int;
    for (name, label) in [(libc::SO_SNDBUF, "SO_SNDBUF"), (libc::SO_RCVBUF, "SO_RCVBUF")] {
        // SAFETY: fd is a valid, open socket owned by `stream`; the option
        // value is a plain `c_int` of the size setsockopt expects.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                name,
                &size as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc == -1 {
            log::warn!("setsockopt {label} failed: {}", std::io::Error::last_os_error());
        }
    }
    Ok(())
}

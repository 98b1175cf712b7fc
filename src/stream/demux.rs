// src/stream/demux.rs

//! Demultiplexer for the engine's attach stream
//!
//! When a container runs without a TTY, the engine multiplexes stdout and
//! stderr onto one connection. Every frame starts with an 8-byte header:
//!
//! ```text
//! [tag, 0, 0, 0, len(4 bytes, big-endian)] payload(len bytes)
//! ```
//!
//! `tag` is 1 for stdout and 2 for stderr. A stream that ends exactly on a
//! frame boundary is a clean end of stream; anything else is a protocol error.

use crate::engine::ResponseConsumer;
use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use tracing::debug;

/// Size of a frame header
const HEADER_LEN: usize = 8;

/// Maximum bytes copied per read while draining a payload
const CHUNK_LEN: usize = 64;

/// Which output a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

impl StreamType {
    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            other => Err(Error::Protocol(format!("wrong stream type: {}", other))),
        }
    }
}

/// Splits a multiplexed attach stream into two sinks
pub struct StreamDemuxer<O, E> {
    out: O,
    err: E,
    stdout_bytes: u64,
    stderr_bytes: u64,
}

impl<O: Write, E: Write> StreamDemuxer<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            stdout_bytes: 0,
            stderr_bytes: 0,
        }
    }

    /// Bytes written to the stdout sink so far
    pub fn stdout_bytes(&self) -> u64 {
        self.stdout_bytes
    }

    /// Bytes written to the stderr sink so far
    pub fn stderr_bytes(&self) -> u64 {
        self.stderr_bytes
    }

    /// Give back the sinks
    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }

    /// Decode frames until the source is exhausted
    pub fn parse<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<()> {
        let mut header = [0u8; HEADER_LEN];
        let mut chunk = [0u8; CHUNK_LEN];

        loop {
            match read_exactly(source, &mut header[..4])? {
                0 => break,
                4 => {}
                n => {
                    return Err(Error::Protocol(format!(
                        "short read: got {} of 4 header bytes",
                        n
                    )));
                }
            }
            let stream = StreamType::from_tag(header[0])?;

            let got = read_exactly(source, &mut header[4..])?;
            if got != 4 {
                return Err(Error::Protocol(format!(
                    "short read: got {} of 4 length bytes",
                    got
                )));
            }
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

            let mut left = len as usize;
            while left > 0 {
                let want = left.min(CHUNK_LEN);
                let n = read_some(source, &mut chunk[..want])?;
                if n == 0 {
                    return Err(Error::Protocol(format!(
                        "short read: frame declared {} bytes, stream ended with {} missing",
                        len, left
                    )));
                }
                self.write(stream, &chunk[..n])?;
                left -= n;
            }
        }

        self.out.flush()?;
        self.err.flush()?;
        debug!(
            "Attach stream finished: {} bytes stdout, {} bytes stderr",
            self.stdout_bytes, self.stderr_bytes
        );
        Ok(())
    }

    fn write(&mut self, stream: StreamType, data: &[u8]) -> Result<()> {
        match stream {
            StreamType::Stdout => {
                self.out.write_all(data)?;
                self.stdout_bytes += data.len() as u64;
            }
            StreamType::Stderr => {
                self.err.write_all(data)?;
                self.stderr_bytes += data.len() as u64;
            }
        }
        Ok(())
    }
}

impl<O: Write, E: Write> ResponseConsumer for StreamDemuxer<O, E> {
    fn consume(&mut self, body: &mut dyn Read) -> Result<()> {
        self.parse(body)
    }
}

/// Fill `buf` from `source`, looping over partial reads
///
/// Returns the number of bytes read, which is less than `buf.len()` only when
/// the source ran dry.
pub fn read_exactly<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read_some(source, &mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn read_some<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    loop {
        match source.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

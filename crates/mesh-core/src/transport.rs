//! Transport abstraction: the core drives reads/writes through
//! this trait rather than naming UDP or TCP directly, and layers a record
//! reassembly state machine on top for stream transports where one `read`
//! does not imply one ciphertext record.

use std::io;

use async_trait::async_trait;

use crate::addr::OuterAddr;
use crate::constants::STREAM_LENGTH_PREFIX_BYTES;
use crate::error::CoreResult;

/// A link-layer transport the core reads ciphertext records from and writes
/// them to. Datagram transports (UDP) hand back exactly what was read/given;
/// stream transports (TCP) are expected to pair with [`StreamReassembler`]
/// since a single `read_from` may return a partial or multiple records.
#[async_trait(?Send)]
pub trait WireTransport {
    /// Resolves once the socket is readable, mirroring the
    /// `socket.readable().await?` + non-blocking `try_recv_from` pattern:
    /// the event loop awaits this, then calls [`Self::read_from`] in a loop
    /// until it reports "would block".
    async fn readable(&self) -> io::Result<()>;

    /// Resolves once at least one queued deferred write could make progress.
    async fn writable(&self) -> io::Result<()>;

    /// Reads one datagram/chunk, non-blocking. `Ok(None)` means "would
    /// block", not EOF.
    async fn read_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, OuterAddr)>>;

    /// Writes a complete record to `dest`. For stream transports this may
    /// perform a short write; the caller is responsible for queuing the
    /// remainder (see [`crate::deferred::DeferredBufferSet`]).
    async fn write_to(&self, buf: &[u8], dest: &OuterAddr) -> io::Result<usize>;

    fn is_stream(&self) -> bool;
}

/// Per-connection reassembly state for a stream transport multiplexing
/// length-prefixed ciphertext records over a single byte stream.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    buf: Vec<u8>,
    /// Whether the 2-byte length prefix has been fully read yet.
    buf_init: bool,
    /// Expected total record length once the prefix is known.
    len: usize,
    /// Set once a framing error is seen; the connection must be reset
    /// (stream byte boundaries can't be trusted to recover from mid-record
    /// desync).
    error: bool,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Clears accumulated state, e.g. after [`crate::pipeline::PipelineAction::SoftReset`].
    pub fn reset(&mut self) {
        self.buf.clear();
        self.buf_init = false;
        self.len = 0;
        self.error = false;
    }

    /// Feeds newly read bytes in, returning every complete record the feed
    /// produced (there may be more than one if several records arrived in a
    /// single read).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        if self.error {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        loop {
            if !self.buf_init {
                if self.buf.len() < STREAM_LENGTH_PREFIX_BYTES {
                    break;
                }
                let prefix: [u8; STREAM_LENGTH_PREFIX_BYTES] =
                    self.buf[..STREAM_LENGTH_PREFIX_BYTES].try_into().unwrap();
                self.len = u16::from_be_bytes(prefix) as usize;
                self.buf.drain(..STREAM_LENGTH_PREFIX_BYTES);
                self.buf_init = true;
                if self.len == 0 {
                    self.error = true;
                    break;
                }
            }

            if self.buf.len() < self.len {
                break;
            }
            let record: Vec<u8> = self.buf.drain(..self.len).collect();
            records.push(record);
            self.buf_init = false;
            self.len = 0;
        }
        records
    }

    /// Frames `record` with its 2-byte big-endian length prefix for a write.
    pub fn frame(record: &[u8]) -> CoreResult<Vec<u8>> {
        let len: u16 = record
            .len()
            .try_into()
            .map_err(|_| crate::error::CoreError::FrameTooShort)?;
        let mut out = Vec::with_capacity(record.len() + STREAM_LENGTH_PREFIX_BYTES);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(record);
        Ok(out)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_reassembles_a_single_record_split_across_two_chunks() {
        let mut reasm = StreamReassembler::new();
        let framed = StreamReassembler::frame(b"hello").unwrap();
        let (first, second) = framed.split_at(3);
        assert!(reasm.feed(first).is_empty());
        let records = reasm.feed(second);
        assert_eq!(records, vec![b"hello".to_vec()]);
    }

    #[test]
    fn feed_yields_multiple_records_from_one_chunk() {
        let mut reasm = StreamReassembler::new();
        let mut chunk = StreamReassembler::frame(b"one").unwrap();
        chunk.extend(StreamReassembler::frame(b"two").unwrap());
        let records = reasm.feed(&chunk);
        assert_eq!(records, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn zero_length_record_is_a_framing_error() {
        let mut reasm = StreamReassembler::new();
        let records = reasm.feed(&[0u8, 0u8]);
        assert!(records.is_empty());
        assert!(reasm.has_error());
    }

    #[test]
    fn reset_clears_error_and_partial_state() {
        let mut reasm = StreamReassembler::new();
        reasm.feed(&[0u8, 0u8]);
        assert!(reasm.has_error());
        reasm.reset();
        assert!(!reasm.has_error());
        let framed = StreamReassembler::frame(b"ok").unwrap();
        assert_eq!(reasm.feed(&framed), vec![b"ok".to_vec()]);
    }
}

//! RPC message framing as specified in RFC 5531 (previously RFC 1057 section 10).
//!
//! Stream transports delimit messages with the Record Marking Standard: each
//! record is sent as one or more fragments, and every fragment is prefixed by a
//! 4-byte big endian header. The highest bit of the header marks the last
//! fragment of the record and the lower 31 bits give the fragment length.

use std::ops::Range;

use anyhow::anyhow;
use byteorder::{BigEndian, ByteOrder};
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Upper bound on a reassembled record, to refuse absurd allocations.
pub const MAX_RPC_RECORD_LENGTH: usize = 8 * 1024 * 1024;

/// Last-fragment flag of a record marking header.
const LAST_FRAGMENT: u32 = 1 << 31;

/// Maximum fragment size is 2^31 - 1 bytes
const MAX_FRAGMENT_SIZE: usize = (1 << 31) - 1;

/// Spare capacity reserved before each read of a [`RecordReader`].
const READ_CHUNK: usize = 64 * 1024;

/// Reads a single record-marked fragment from a stream
///
/// Reads the 4-byte header, then exactly the fragment length in bytes, and
/// appends them to `append_to`. Returns true if this was the last fragment in
/// the record, false otherwise.
pub async fn read_fragment(
    socket: &mut (impl AsyncRead + Unpin),
    append_to: &mut Vec<u8>,
) -> Result<bool, anyhow::Error> {
    let mut header_buf = [0_u8; 4];
    socket.read_exact(&mut header_buf).await?;
    let fragment_header = u32::from_be_bytes(header_buf);
    let is_last = (fragment_header & LAST_FRAGMENT) > 0;
    let length = (fragment_header & !LAST_FRAGMENT) as usize;
    trace!("Reading fragment length:{}, last:{}", length, is_last);
    if append_to.len().saturating_add(length) > MAX_RPC_RECORD_LENGTH {
        return Err(anyhow!("RPC record length {} exceeds max {}", length, MAX_RPC_RECORD_LENGTH));
    }
    let start_offset = append_to.len();
    append_to.resize(start_offset + length, 0);
    socket.read_exact(&mut append_to[start_offset..]).await?;
    Ok(is_last)
}

/// Reads fragments until the last one and returns the reassembled record.
///
/// A truncated header or body is an error; callers end the connection on it.
///
/// Not cancel safe: dropping the future midway loses the bytes it consumed.
/// Use a [`RecordReader`] where reads may be abandoned.
pub async fn read_record(socket: &mut (impl AsyncRead + Unpin)) -> Result<Vec<u8>, anyhow::Error> {
    let mut record = Vec::new();
    while !read_fragment(socket, &mut record).await? {}
    Ok(record)
}

/// Reassembles records from a stream, keeping partial input between calls.
///
/// Bytes read from the stream are only ever appended to an internal buffer,
/// so a [`RecordReader::next_record`] future can be dropped (for instance by a
/// timeout) and the next call resumes at the same point of the framing.
#[derive(Debug)]
pub struct RecordReader<R> {
    stream: R,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    pub fn new(stream: R) -> Self {
        Self { stream, pending: Vec::new() }
    }

    pub async fn next_record(&mut self) -> Result<Vec<u8>, anyhow::Error> {
        loop {
            if let Some(record) = take_record(&mut self.pending)? {
                return Ok(record);
            }
            self.pending.reserve(READ_CHUNK);
            if self.stream.read_buf(&mut self.pending).await? == 0 {
                return Err(anyhow!(
                    "connection closed with {} bytes of an incomplete record",
                    self.pending.len()
                ));
            }
        }
    }
}

/// Removes the first complete record from `pending`, if it holds one.
fn take_record(pending: &mut Vec<u8>) -> Result<Option<Vec<u8>>, anyhow::Error> {
    let mut fragments: SmallVec<[Range<usize>; 4]> = SmallVec::new();
    let mut record_len = 0usize;
    let mut offset = 0;
    loop {
        let Some(header) = pending.get(offset..offset + 4) else {
            return Ok(None);
        };
        let header = BigEndian::read_u32(header);
        let is_last = (header & LAST_FRAGMENT) > 0;
        let length = (header & !LAST_FRAGMENT) as usize;
        record_len = record_len.saturating_add(length);
        if record_len > MAX_RPC_RECORD_LENGTH {
            return Err(anyhow!("RPC record length {} exceeds max {}", record_len, MAX_RPC_RECORD_LENGTH));
        }
        let body = offset + 4;
        offset = body + length;
        if pending.len() < offset {
            return Ok(None);
        }
        fragments.push(body..offset);
        if is_last {
            break;
        }
    }
    trace!("Reassembled record of {} bytes from {} fragments", record_len, fragments.len());
    let mut record = Vec::with_capacity(record_len);
    for fragment in fragments {
        record.extend_from_slice(&pending[fragment]);
    }
    pending.drain(..offset);
    Ok(Some(record))
}

/// Writes `buf` as one record of record-marked fragments.
///
/// An empty record is sent as a single empty last fragment.
pub async fn write_fragment(
    socket: &mut (impl AsyncWrite + Unpin),
    buf: &[u8],
) -> Result<(), anyhow::Error> {
    let mut chunks = buf.chunks(MAX_FRAGMENT_SIZE).peekable();
    if chunks.peek().is_none() {
        socket.write_all(&LAST_FRAGMENT.to_be_bytes()).await?;
        return Ok(());
    }
    while let Some(chunk) = chunks.next() {
        let is_last = chunks.peek().is_none();
        let mut fragment_header = chunk.len() as u32;
        if is_last {
            fragment_header |= LAST_FRAGMENT;
        }
        trace!("Writing fragment length:{}, last:{}", chunk.len(), is_last);
        socket.write_all(&fragment_header.to_be_bytes()).await?;
        socket.write_all(chunk).await?;
    }
    socket.flush().await?;
    Ok(())
}

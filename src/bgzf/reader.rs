use std::fmt;
use std::io::Read;

use flate2::Decompress;
use log::warn;

use super::{block, deflate, Block};
use crate::SbError;

const TRUNCATION_WARNING: &str = "missing end-of-file block; the data may be truncated";

/// Inflate one block's payload, carrying the unconsumed tail of the previous
/// decoded buffer in front of it so that a logical record straddling a block
/// boundary is presented contiguously.
fn inflate_carry(
    state: &mut Decompress,
    data: &mut Vec<u8>,
    remaining: &mut usize,
    block: &Block,
    payload: &[u8],
) -> Result<(), SbError> {
    let uncompressed = block.uncompressed_size as usize;
    let tail_start = data.len() - *remaining;
    let mut next = Vec::with_capacity(*remaining + uncompressed);
    next.extend_from_slice(&data[tail_start..]);
    next.resize(*remaining + uncompressed, 0);
    let out_start = next.len() - uncompressed;
    deflate::inflate_exact(state, payload, &mut next[out_start..])?;
    if deflate::crc32(&next[out_start..]) != block.crc32 {
        return Err(SbError::format("block checksum mismatch"));
    }
    *data = next;
    *remaining = data.len();
    Ok(())
}

/// An iterator over the inflated contents of a stream of blocks.
///
/// Each call to [`Reader::next_chunk`] decodes and inflates one block. Any
/// bytes of the previous chunk that were not [consumed](Reader::consume) are
/// prepended to the new chunk. The canonical empty block is consumed
/// internally as the end-of-file sentinel; a stream that ends without one
/// logs a truncation warning, once.
pub struct Reader<R: Read> {
    input: R,
    peek: Option<Vec<u8>>,
    state: Decompress,
    data: Vec<u8>,
    remaining: usize,
    total_in: u64,
    total_out: u64,
    saw_eof_block: bool,
    warned_past_eof: bool,
    truncated: bool,
    done: bool,
}

impl<R: Read> Reader<R> {
    /// Create a new `Reader` over a stream of blocks.
    pub fn new(input: R) -> Self {
        Self::with_peek(input, Vec::new())
    }

    /// Create a new `Reader`, prepending bytes already consumed from the
    /// stream during format discovery.
    pub fn with_peek(input: R, peek: Vec<u8>) -> Self {
        Reader {
            input,
            peek: if peek.is_empty() { None } else { Some(peek) },
            state: deflate::decompressor(),
            data: Vec::new(),
            remaining: 0,
            total_in: 0,
            total_out: 0,
            saw_eof_block: false,
            warned_past_eof: false,
            truncated: false,
            done: false,
        }
    }

    /// Decode the next non-empty block and return the decoded buffer: any
    /// unconsumed tail of the previous buffer followed by the new payload.
    /// Returns `None` once the input is exhausted.
    ///
    /// # Errors
    /// `InvalidFormat` on bad framing or checksums, `UnexpectedEof` if the
    /// input stops mid-block, `Io` if the source or codec fails.
    pub fn next_chunk(&mut self) -> Result<Option<&[u8]>, SbError> {
        while !self.done {
            let peek = self.peek.take();
            match block::read_block(&mut self.input, peek.as_deref())? {
                None => {
                    self.done = true;
                    if !self.saw_eof_block {
                        self.truncated = true;
                        warn!("{}", TRUNCATION_WARNING);
                    }
                }
                Some((block, payload)) => {
                    if block.uncompressed_size == 0 {
                        self.saw_eof_block = true;
                        continue;
                    }
                    if self.saw_eof_block {
                        if !self.warned_past_eof {
                            warn!("data continues after an end-of-file block");
                            self.warned_past_eof = true;
                        }
                        self.saw_eof_block = false;
                    }
                    self.total_in += payload.len() as u64;
                    self.total_out += u64::from(block.uncompressed_size);
                    inflate_carry(
                        &mut self.state,
                        &mut self.data,
                        &mut self.remaining,
                        &block,
                        &payload,
                    )?;
                    return Ok(Some(self.buffer()));
                }
            }
        }
        Ok(None)
    }

    /// The unconsumed portion of the current decoded buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.data[self.data.len() - self.remaining..]
    }

    /// Mark `amt` bytes of the decoded buffer as used and return them.
    ///
    /// # Panics
    /// If `amt` is larger than the unconsumed buffer.
    pub fn consume(&mut self, amt: usize) -> &[u8] {
        assert!(amt <= self.remaining, "consumed past the decoded buffer");
        let start = self.data.len() - self.remaining;
        self.remaining -= amt;
        &self.data[start..start + amt]
    }

    /// Total compressed payload bytes read so far
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Total uncompressed bytes produced so far
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// True once the input ended without the end-of-file sentinel
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<R: Read> fmt::Debug for Reader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("remaining", &self.remaining)
            .field("total_in", &self.total_in)
            .field("total_out", &self.total_out)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// An iterator over the inflated contents of blocks stored in a buffer.
///
/// The same contract as [`Reader`], but block framing is mapped directly out
/// of the slice instead of being copied from a stream.
pub struct BufferReader<'a> {
    input: &'a [u8],
    offset: usize,
    state: Decompress,
    data: Vec<u8>,
    remaining: usize,
    total_in: u64,
    total_out: u64,
    saw_eof_block: bool,
    warned_past_eof: bool,
    truncated: bool,
    done: bool,
}

impl<'a> BufferReader<'a> {
    /// Create a new `BufferReader` over a buffer of blocks.
    pub fn new(input: &'a [u8]) -> Self {
        Self::with_offset(input, 0)
    }

    /// Create a new `BufferReader` starting at `offset` into the buffer.
    pub fn with_offset(input: &'a [u8], offset: usize) -> Self {
        BufferReader {
            input,
            offset,
            state: deflate::decompressor(),
            data: Vec::new(),
            remaining: 0,
            total_in: 0,
            total_out: 0,
            saw_eof_block: false,
            warned_past_eof: false,
            truncated: false,
            done: false,
        }
    }

    /// Decode the next non-empty block, as [`Reader::next_chunk`].
    ///
    /// # Errors
    /// As [`Reader::next_chunk`]; additionally a recoverable
    /// `BufferUnderflow` if the buffer ends inside a block.
    pub fn next_chunk(&mut self) -> Result<Option<&[u8]>, SbError> {
        while !self.done {
            if self.offset >= self.input.len() {
                self.done = true;
                if !self.saw_eof_block {
                    self.truncated = true;
                    warn!("{}", TRUNCATION_WARNING);
                }
                break;
            }
            let (block, payload) = block::decode_block(self.input, self.offset)?;
            self.offset += block.size;
            if block.uncompressed_size == 0 {
                self.saw_eof_block = true;
                continue;
            }
            if self.saw_eof_block {
                if !self.warned_past_eof {
                    warn!("data continues after an end-of-file block");
                    self.warned_past_eof = true;
                }
                self.saw_eof_block = false;
            }
            self.total_in += payload.len() as u64;
            self.total_out += u64::from(block.uncompressed_size);
            inflate_carry(
                &mut self.state,
                &mut self.data,
                &mut self.remaining,
                &block,
                payload,
            )?;
            return Ok(Some(self.buffer()));
        }
        Ok(None)
    }

    /// The unconsumed portion of the current decoded buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.data[self.data.len() - self.remaining..]
    }

    /// Mark `amt` bytes of the decoded buffer as used and return them.
    ///
    /// # Panics
    /// If `amt` is larger than the unconsumed buffer.
    pub fn consume(&mut self, amt: usize) -> &[u8] {
        assert!(amt <= self.remaining, "consumed past the decoded buffer");
        let start = self.data.len() - self.remaining;
        self.remaining -= amt;
        &self.data[start..start + amt]
    }

    /// Total compressed payload bytes read so far
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Total uncompressed bytes produced so far
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// True once the input ended without the end-of-file sentinel
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> fmt::Debug for BufferReader<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferReader")
            .field("offset", &self.offset)
            .field("remaining", &self.remaining)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use flate2::Compression;

    use super::*;
    use crate::bgzf::{block::encode_block, Writer, EMPTY_BLOCK};
    use crate::SbError;

    fn two_block_stream() -> Vec<u8> {
        let mut wire = Vec::new();
        let _ = encode_block(&mut wire, b"first block ", Compression::default()).unwrap();
        let _ = encode_block(&mut wire, b"second block", Compression::default()).unwrap();
        wire.extend_from_slice(&EMPTY_BLOCK);
        wire
    }

    #[test]
    fn test_stream_reader() -> Result<(), SbError> {
        let wire = two_block_stream();
        let mut reader = Reader::new(&wire[..]);

        assert_eq!(reader.next_chunk()?, Some(&b"first block "[..]));
        let _ = reader.consume(6);
        // the unconsumed tail of the first chunk leads the second
        assert_eq!(reader.next_chunk()?, Some(&b"block second block"[..]));
        assert_eq!(reader.next_chunk()?, None);
        assert!(!reader.truncated());
        assert_eq!(reader.total_out(), 24);
        Ok(())
    }

    #[test]
    fn test_buffer_reader() -> Result<(), SbError> {
        let wire = two_block_stream();
        let mut reader = BufferReader::new(&wire);

        assert_eq!(reader.next_chunk()?, Some(&b"first block "[..]));
        let _ = reader.consume(12);
        assert_eq!(reader.next_chunk()?, Some(&b"second block"[..]));
        assert_eq!(reader.next_chunk()?, None);
        assert!(!reader.truncated());
        Ok(())
    }

    #[test]
    fn test_missing_sentinel_sets_truncated() -> Result<(), SbError> {
        let mut wire = Vec::new();
        let _ = encode_block(&mut wire, b"lonely", Compression::default())?;
        let mut reader = Reader::new(&wire[..]);
        assert_eq!(reader.next_chunk()?, Some(&b"lonely"[..]));
        let _ = reader.consume(6);
        assert_eq!(reader.next_chunk()?, None);
        assert!(reader.truncated());
        Ok(())
    }

    #[test]
    fn test_sentinel_only_is_a_clean_end() -> Result<(), SbError> {
        let mut reader = Reader::new(&EMPTY_BLOCK[..]);
        assert_eq!(reader.next_chunk()?, None);
        assert!(!reader.truncated());
        Ok(())
    }

    #[test]
    fn test_corrupt_checksum() -> Result<(), SbError> {
        let mut wire = Vec::new();
        let total = encode_block(&mut wire, b"checksummed", Compression::default())?;
        // flip a bit in the stored CRC32
        wire[total - 8] ^= 0xFF;
        let mut reader = Reader::new(&wire[..]);
        assert!(reader.next_chunk().is_err());
        Ok(())
    }

    #[test]
    fn test_round_trip_through_writer() -> Result<(), SbError> {
        let payload = b"data that spans more than one block".repeat(4000);
        let mut writer = Writer::new(Vec::new());
        writer.write(&payload)?;
        let wire = writer.into_inner()?;

        let mut reader = Reader::new(&wire[..]);
        let mut decoded = Vec::new();
        while let Some(chunk) = reader.next_chunk()? {
            let amt = chunk.len();
            decoded.extend_from_slice(chunk);
            let _ = reader.consume(amt);
        }
        assert_eq!(decoded, payload);
        assert!(!reader.truncated());
        Ok(())
    }
}

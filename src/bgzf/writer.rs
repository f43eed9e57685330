use std::cmp;
use std::fmt;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::{Compress, Compression, Crc, FlushCompress, Status};

use super::block::{BSIZE_OFFSET, FIXED_XLEN_HEADER, FULL_HEADER_SIZE, TRAILER_SIZE};
use super::{deflate, EMPTY_BLOCK, MAX_CDATA_SIZE, MAX_DATA_SIZE};
use crate::{ErrorKind, SbError};

/// A sink that deflates byte chunks into a stream of framed blocks.
///
/// Chunks are deflated incrementally into an in-progress block. Once
/// [`MAX_DATA_SIZE`] uncompressed bytes have been fed to the current block it
/// is finalized and a fresh block is started; a chunk larger than the
/// remaining budget is split over block boundaries. Dropping the writer
/// finishes the open block and appends the canonical empty end-of-file block,
/// though errors at that point are lost; call [`Writer::finalize`] or
/// [`Writer::into_inner`] to observe them.
pub struct Writer<W: Write> {
    sink: Option<W>,
    level: Compression,
    scratch: Vec<u8>,
    state: Option<Compress>,
    crc: Crc,
    total_in: u64,
    total_out: u64,
    finalized: bool,
}

impl<W: Write> Writer<W> {
    /// Create a new `Writer` with the default compression level.
    pub fn new(sink: W) -> Self {
        Self::with_level(sink, Compression::default())
    }

    /// Create a new `Writer` compressing at `level`.
    pub fn with_level(sink: W, level: Compression) -> Self {
        Writer {
            sink: Some(sink),
            level,
            scratch: Vec::new(),
            state: None,
            crc: Crc::new(),
            total_in: 0,
            total_out: 0,
            finalized: false,
        }
    }

    /// Deflate `data` into the stream, starting and finalizing blocks as the
    /// per-block budget requires.
    ///
    /// # Errors
    /// `Io` if the codec or the sink fails, or if the writer was already
    /// finalized.
    pub fn write(&mut self, data: &[u8]) -> Result<(), SbError> {
        if self.finalized {
            return Err(SbError::new(ErrorKind::Io, "writer was already finalized"));
        }
        let mut data = data;
        while !data.is_empty() {
            if self.state.is_none() {
                self.start_block();
            }
            let budget = MAX_DATA_SIZE - self.crc.amount() as usize;
            let take = cmp::min(budget, data.len());
            self.deflate(&data[..take])?;
            data = &data[take..];
            if self.crc.amount() as usize >= MAX_DATA_SIZE {
                self.finish_block()?;
            }
        }
        Ok(())
    }

    fn start_block(&mut self) {
        self.scratch.clear();
        self.scratch.extend_from_slice(&FIXED_XLEN_HEADER);
        self.scratch.extend_from_slice(&[0, 0]);
        self.scratch.resize(FULL_HEADER_SIZE + MAX_CDATA_SIZE, 0);
        self.state = Some(deflate::compressor(self.level));
    }

    fn deflate(&mut self, mut src: &[u8]) -> Result<(), SbError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| SbError::new(ErrorKind::Io, "no block in progress"))?;
        while !src.is_empty() {
            let before_in = state.total_in();
            let before_out = state.total_out();
            let out_pos = FULL_HEADER_SIZE + before_out as usize;
            let status = state.compress(src, &mut self.scratch[out_pos..], FlushCompress::None)?;
            let used = (state.total_in() - before_in) as usize;
            self.crc.update(&src[..used]);
            src = &src[used..];
            if used == 0 && state.total_out() == before_out && !matches!(status, Status::Ok) {
                return Err(SbError::new(ErrorKind::Io, "deflate stream stalled"));
            }
        }
        Ok(())
    }

    /// Finish the in-progress block, patch its size subfield, append the
    /// trailer and emit it to the sink. A no-op when no block is open.
    ///
    /// # Errors
    /// `Io` if the codec or the sink fails.
    pub fn finish_block(&mut self) -> Result<(), SbError> {
        let mut state = match self.state.take() {
            Some(state) => state,
            None => return Ok(()),
        };
        loop {
            let before_out = state.total_out();
            let out_pos = FULL_HEADER_SIZE + before_out as usize;
            let status = state.compress(&[], &mut self.scratch[out_pos..], FlushCompress::Finish)?;
            if matches!(status, Status::StreamEnd) {
                break;
            }
            if state.total_out() == before_out {
                return Err(SbError::new(
                    ErrorKind::Io,
                    "deflate stream failed to finish",
                ));
            }
        }
        let cdata_len = state.total_out() as usize;
        let total = FULL_HEADER_SIZE + cdata_len + TRAILER_SIZE;
        LittleEndian::write_u16(
            &mut self.scratch[BSIZE_OFFSET..BSIZE_OFFSET + 2],
            (total - 1) as u16,
        );
        self.scratch.truncate(FULL_HEADER_SIZE + cdata_len);
        self.scratch.write_u32::<LittleEndian>(self.crc.sum())?;
        self.scratch.write_u32::<LittleEndian>(self.crc.amount())?;

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| SbError::new(ErrorKind::Io, "writer has no sink"))?;
        sink.write_all(&self.scratch)?;
        self.total_in += u64::from(self.crc.amount());
        self.total_out += total as u64;
        self.crc.reset();
        Ok(())
    }

    /// How many more uncompressed bytes fit into the in-progress block; zero
    /// when no block is open.
    pub fn block_remaining(&self) -> usize {
        if self.state.is_some() {
            MAX_DATA_SIZE - self.crc.amount() as usize
        } else {
            0
        }
    }

    /// Finish the open block, append the end-of-file sentinel and flush the
    /// sink. Safe to call more than once.
    ///
    /// # Errors
    /// `Io` if the codec or the sink fails.
    pub fn finalize(&mut self) -> Result<(), SbError> {
        if self.finalized {
            return Ok(());
        }
        self.finish_block()?;
        if let Some(sink) = self.sink.as_mut() {
            sink.write_all(&EMPTY_BLOCK)?;
            sink.flush()?;
        }
        self.finalized = true;
        Ok(())
    }

    /// Finalize the stream and return the underlying sink.
    ///
    /// # Errors
    /// `Io` if finalizing fails.
    pub fn into_inner(mut self) -> Result<W, SbError> {
        self.finalize()?;
        self.sink
            .take()
            .ok_or_else(|| SbError::new(ErrorKind::Io, "writer has no sink"))
    }

    /// Total uncompressed bytes accepted into finished blocks
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Total block bytes emitted to the sink, excluding the sentinel
    pub fn total_out(&self) -> u64 {
        self.total_out
    }
}

impl<W: Write> Drop for Writer<W> {
    fn drop(&mut self) {
        if !self.finalized && self.sink.is_some() {
            // best effort, matching BufWriter; use finalize() to see errors
            let _ = self.finalize();
        }
    }
}

impl<W: Write> fmt::Debug for Writer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("block_open", &self.state.is_some())
            .field("total_in", &self.total_in)
            .field("total_out", &self.total_out)
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

//! Adapter over flate2's raw DEFLATE streams.
//!
//! All streams here use raw DEFLATE without any zlib or gzip wrapper; the
//! block layer supplies its own framing. Stream state persists across calls
//! so that data split over several calls compresses identically to a single
//! call over the concatenated input.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::{ErrorKind, SbError};

/// A fresh raw-DEFLATE compressor whose state carries across calls.
pub(crate) fn compressor(level: Compression) -> Compress {
    Compress::new(level, false)
}

/// A fresh raw-DEFLATE decompressor whose state carries across calls.
pub(crate) fn decompressor() -> Decompress {
    Decompress::new(false)
}

fn stalled(what: &str) -> SbError {
    SbError::new(
        ErrorKind::Io,
        format!("deflate stream stalled while {}", what),
    )
}

/// Deflate all of `src` into `dst` and finish the stream, returning the
/// total number of compressed bytes.
///
/// `state` must be fresh; it is left finished.
pub(crate) fn deflate_all(
    state: &mut Compress,
    src: &[u8],
    dst: &mut [u8],
) -> Result<usize, SbError> {
    let mut consumed = 0;
    loop {
        let before_in = state.total_in();
        let before_out = state.total_out();
        let out_pos = before_out as usize;
        if out_pos >= dst.len() {
            return Err(stalled("compressing a block"));
        }
        let status = state.compress(&src[consumed..], &mut dst[out_pos..], FlushCompress::Finish)?;
        consumed += (state.total_in() - before_in) as usize;
        match status {
            Status::StreamEnd => return Ok(state.total_out() as usize),
            _ if state.total_in() == before_in && state.total_out() == before_out => {
                return Err(stalled("compressing a block"));
            }
            _ => {}
        }
    }
}

/// Inflate one complete raw-DEFLATE stream into `dst`, which must be sized to
/// exactly the expected uncompressed length.
///
/// `state` is reset first, so a single decompressor may be reused block after
/// block.
pub(crate) fn inflate_exact(
    state: &mut Decompress,
    src: &[u8],
    dst: &mut [u8],
) -> Result<(), SbError> {
    state.reset(false);
    let mut consumed = 0;
    let mut produced = 0;
    loop {
        let before_in = state.total_in();
        let before_out = state.total_out();
        let status = state.decompress(
            &src[consumed..],
            &mut dst[produced..],
            FlushDecompress::Finish,
        )?;
        consumed += (state.total_in() - before_in) as usize;
        produced += (state.total_out() - before_out) as usize;
        match status {
            Status::StreamEnd => break,
            _ if state.total_in() == before_in && state.total_out() == before_out => {
                return Err(stalled("inflating a block"));
            }
            _ => {}
        }
    }
    if produced != dst.len() {
        return Err(SbError::format(
            "block uncompressed size does not match its payload",
        ));
    }
    Ok(())
}

/// The CRC-32 of `data`, as stored in block trailers.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() -> Result<(), SbError> {
        let data = b"a man a plan a canal panama".repeat(50);
        let mut dst = vec![0; data.len() + 256];
        let mut comp = compressor(Compression::default());
        let clen = deflate_all(&mut comp, &data, &mut dst)?;
        assert!(clen < data.len());

        let mut out = vec![0; data.len()];
        let mut decomp = decompressor();
        inflate_exact(&mut decomp, &dst[..clen], &mut out)?;
        assert_eq!(out, data);
        Ok(())
    }

    #[test]
    fn test_split_input_matches_single_call() -> Result<(), SbError> {
        // compressing piecewise with persistent state must produce the same
        // stream as compressing the concatenated input at once
        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let mut whole = vec![0; data.len() + 256];
        let mut comp = compressor(Compression::new(6));
        let whole_len = deflate_all(&mut comp, &data, &mut whole)?;

        let mut split = vec![0; data.len() + 256];
        let mut comp = compressor(Compression::new(6));
        let mut consumed = 0;
        for piece in data.chunks(97) {
            let mut fed = 0;
            while fed < piece.len() {
                let before = comp.total_in();
                let out_pos = comp.total_out() as usize;
                let _ = comp.compress(&piece[fed..], &mut split[out_pos..], FlushCompress::None)?;
                fed += (comp.total_in() - before) as usize;
            }
            consumed += piece.len();
        }
        assert_eq!(consumed, data.len());
        loop {
            let before = comp.total_out();
            let out_pos = before as usize;
            let status = comp.compress(&[], &mut split[out_pos..], FlushCompress::Finish)?;
            if matches!(status, Status::StreamEnd) {
                break;
            }
            assert!(comp.total_out() > before);
        }
        let split_len = comp.total_out() as usize;
        assert_eq!(&split[..split_len], &whole[..whole_len]);
        Ok(())
    }

    #[test]
    fn test_wrong_size_is_an_error() {
        let data = b"0123456789";
        let mut dst = vec![0; 256];
        let mut comp = compressor(Compression::default());
        let clen = deflate_all(&mut comp, data, &mut dst).unwrap();

        let mut out = vec![0; data.len() + 1];
        let mut decomp = decompressor();
        assert!(inflate_exact(&mut decomp, &dst[..clen], &mut out).is_err());
    }

    #[test]
    fn test_crc32() {
        // standard check value for the ASCII digits
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}

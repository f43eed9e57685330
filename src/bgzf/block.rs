use std::io::Read;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::Compression;

use super::{deflate, MAGIC, MAX_CDATA_SIZE, MAX_DATA_SIZE};
use crate::{ErrorKind, SbError};

/// Bytes in the fixed GZIP header, up to and including `XLEN`
pub(crate) const HEADER_SIZE: usize = 12;
/// Bytes in one extra subfield header (`SI1`, `SI2`, `SLEN`)
pub(crate) const SUBFIELD_SIZE: usize = 4;
/// Bytes in the trailer (`CRC32` and `ISIZE`)
pub(crate) const TRAILER_SIZE: usize = 8;
/// Byte offset of the `BC` subfield value within a written header
pub(crate) const BSIZE_OFFSET: usize = 16;
/// Bytes in a written header, including the `BC` subfield and its value
pub(crate) const FULL_HEADER_SIZE: usize = 18;

/// The header written in front of every encoded block: GZIP magic, DEFLATE
/// compression, `FEXTRA` set, and a single `BC` subfield whose two value
/// bytes follow this template.
pub(crate) const FIXED_XLEN_HEADER: [u8; 16] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00,
];

/// The identifier of the required block-size subfield
const BSIZE_FIELD: [u8; 2] = [b'B', b'C'];

/// Metadata for one framed block, excluding its compressed payload.
#[derive(Clone, Debug)]
pub struct Block {
    /// The GZIP modification time field (usually zero)
    pub modification_time: u32,
    /// The GZIP extra-flags byte
    pub extra_flags: u8,
    /// The GZIP operating system byte
    pub os: u8,
    /// All extra subfields, keyed by their two-byte identifiers, in file order
    pub extra_fields: Vec<([u8; 2], Vec<u8>)>,
    /// The total on-wire size of the block, from the `BC` subfield
    pub size: usize,
    /// The CRC-32 of the uncompressed payload, from the trailer
    pub crc32: u32,
    /// The length of the uncompressed payload, from the trailer
    pub uncompressed_size: u32,
}

impl Block {
    /// The value of the extra subfield with the given identifier, if present.
    pub fn extra_field(&self, id: [u8; 2]) -> Option<&[u8]> {
        self.extra_fields
            .iter()
            .find(|(key, _)| *key == id)
            .map(|(_, value)| value.as_slice())
    }
}

fn check_magic(header: &[u8]) -> Result<(), SbError> {
    if header[..2] != MAGIC {
        return Err(SbError::format(format!(
            "invalid block header found: ID1: {} ID2: {}",
            header[0], header[1]
        )));
    }
    if header[3] & 0x04 == 0 {
        return Err(SbError::format("block header has no extra subfields"));
    }
    Ok(())
}

/// Parse GZIP formatted extra data fields into a keyed list.
fn parse_extra(buffer: &[u8]) -> Result<Vec<([u8; 2], Vec<u8>)>, SbError> {
    let mut extra_fields = Vec::new();
    let mut offset = 0;
    while offset < buffer.len() {
        if buffer.len() < offset + SUBFIELD_SIZE {
            return Err(SbError::format("truncated extra subfield header"));
        }
        let id = [buffer[offset], buffer[offset + 1]];
        let len = LittleEndian::read_u16(&buffer[offset + 2..offset + 4]) as usize;
        offset += SUBFIELD_SIZE;
        if buffer.len() < offset + len {
            return Err(SbError::format("extra subfield overruns its header"));
        }
        extra_fields.push((id, buffer[offset..offset + len].to_vec()));
        offset += len;
    }
    Ok(extra_fields)
}

/// Parse the required block-size subfield out of the extra-field list.
fn block_size(extra_fields: &[([u8; 2], Vec<u8>)]) -> Result<usize, SbError> {
    for (id, value) in extra_fields {
        if *id == BSIZE_FIELD && value.len() >= 2 {
            return Ok(LittleEndian::read_u16(&value[..2]) as usize + 1);
        }
    }
    Err(SbError::format("missing block size field"))
}

/// Load a block from a buffer.
///
/// The returned payload slice references the buffer data and does not copy.
///
/// # Errors
/// `InvalidFormat` on bad magic or a missing size subfield; a recoverable
/// `BufferUnderflow` when the buffer ends before the block does.
pub fn decode_block(buffer: &[u8], offset: usize) -> Result<(Block, &[u8]), SbError> {
    let buf = buffer
        .get(offset..)
        .ok_or_else(|| SbError::underflow("offset is past the end of the buffer"))?;
    if buf.len() < HEADER_SIZE {
        return Err(SbError::underflow("block header needs more data"));
    }
    check_magic(buf)?;
    let xlen = LittleEndian::read_u16(&buf[10..12]) as usize;
    if buf.len() < HEADER_SIZE + xlen {
        return Err(SbError::underflow("block subfields need more data"));
    }
    let extra_fields = parse_extra(&buf[HEADER_SIZE..HEADER_SIZE + xlen])?;
    let size = block_size(&extra_fields)?;
    if size < HEADER_SIZE + xlen + TRAILER_SIZE {
        return Err(SbError::format("block size is smaller than its framing"));
    }
    if buf.len() < size {
        return Err(SbError::underflow("block payload needs more data"));
    }
    let trailer_start = size - TRAILER_SIZE;
    let block = Block {
        modification_time: LittleEndian::read_u32(&buf[4..8]),
        extra_flags: buf[8],
        os: buf[9],
        extra_fields,
        size,
        crc32: LittleEndian::read_u32(&buf[trailer_start..trailer_start + 4]),
        uncompressed_size: LittleEndian::read_u32(&buf[trailer_start + 4..size]),
    };
    let payload = &buf[HEADER_SIZE + xlen..trailer_start];
    Ok((block, payload))
}

fn read_exact_or_eof<R: Read>(stream: &mut R, buf: &mut [u8], what: &str) -> Result<(), SbError> {
    stream.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SbError::new(ErrorKind::UnexpectedEof, format!("{} was truncated", what))
        } else {
            e.into()
        }
    })
}

/// Load a block from a stream, copying the compressed payload into an owned
/// buffer. Returns `None` at a clean end of input.
///
/// `peek` holds data already consumed from the stream while discovering the
/// format; it may be at most the fixed header size and is logically prepended
/// to the stream.
///
/// # Errors
/// `InvalidFormat` on bad framing; `UnexpectedEof` when the stream ends
/// mid-block.
pub fn read_block<R: Read>(
    stream: &mut R,
    peek: Option<&[u8]>,
) -> Result<Option<(Block, Vec<u8>)>, SbError> {
    let peek = peek.unwrap_or(&[]);
    if peek.len() > HEADER_SIZE {
        return Err(SbError::format("peeked data is larger than a block header"));
    }
    let mut header = [0u8; HEADER_SIZE];
    header[..peek.len()].copy_from_slice(peek);
    let mut filled = peek.len();
    while filled < HEADER_SIZE {
        let amt_read = stream.read(&mut header[filled..])?;
        if amt_read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(SbError::eof("block header was truncated"));
        }
        filled += amt_read;
    }
    check_magic(&header)?;

    let xlen = LittleEndian::read_u16(&header[10..12]) as usize;
    let mut extra = vec![0; xlen];
    read_exact_or_eof(stream, &mut extra, "block subfield data")?;
    let extra_fields = parse_extra(&extra)?;
    let size = block_size(&extra_fields)?;

    let data_size = size
        .checked_sub(HEADER_SIZE + xlen + TRAILER_SIZE)
        .ok_or_else(|| SbError::format("block size is smaller than its framing"))?;
    let mut payload = vec![0; data_size];
    read_exact_or_eof(stream, &mut payload, "block payload")?;

    let mut trailer = [0u8; TRAILER_SIZE];
    read_exact_or_eof(stream, &mut trailer, "block trailer")?;

    let block = Block {
        modification_time: LittleEndian::read_u32(&header[4..8]),
        extra_flags: header[8],
        os: header[9],
        extra_fields,
        size,
        crc32: LittleEndian::read_u32(&trailer[..4]),
        uncompressed_size: LittleEndian::read_u32(&trailer[4..]),
    };
    Ok(Some((block, payload)))
}

/// Compress `data` into a single framed block appended to `dst`, returning
/// the number of bytes written.
///
/// # Errors
/// `InvalidFormat` if `data` is larger than one block may carry; `Io` if the
/// codec fails.
pub fn encode_block(dst: &mut Vec<u8>, data: &[u8], level: Compression) -> Result<usize, SbError> {
    if data.len() > MAX_DATA_SIZE {
        return Err(SbError::format(format!(
            "{} bytes do not fit in a single block",
            data.len()
        )));
    }
    let start = dst.len();
    dst.extend_from_slice(&FIXED_XLEN_HEADER);
    dst.extend_from_slice(&[0, 0]);
    let cdata_start = dst.len();
    dst.resize(cdata_start + MAX_CDATA_SIZE, 0);

    let mut state = deflate::compressor(level);
    let cdata_len = deflate::deflate_all(&mut state, data, &mut dst[cdata_start..])?;
    dst.truncate(cdata_start + cdata_len);

    let total = FULL_HEADER_SIZE + cdata_len + TRAILER_SIZE;
    LittleEndian::write_u16(
        &mut dst[start + BSIZE_OFFSET..start + BSIZE_OFFSET + 2],
        (total - 1) as u16,
    );
    dst.write_u32::<LittleEndian>(deflate::crc32(data))?;
    dst.write_u32::<LittleEndian>(data.len() as u32)?;
    Ok(total)
}

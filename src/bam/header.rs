use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use super::MAGIC;
use crate::buffer::ReadBuffer;
use crate::reference::Reference;
use crate::sam;
use crate::SbError;

/// Decode a header from a buffer: the magic number, the embedded SAM header
/// text, and the reference table. Returns the text, the references, and the
/// number of bytes consumed.
///
/// # Errors
/// `InvalidFormat` on a bad magic number; a recoverable `BufferUnderflow`
/// whenever a length prefix points past the end of the buffer.
pub fn decode_header(buffer: &[u8]) -> Result<(&[u8], Vec<Reference>, usize), SbError> {
    if buffer.len() < 8 {
        return Err(SbError::underflow("header magic needs more data"));
    }
    if buffer[..4] != MAGIC {
        return Err(SbError::format("invalid BAM header found"));
    }
    let text_len = LittleEndian::read_i32(&buffer[4..8]);
    if text_len < 0 {
        return Err(SbError::format("negative header text length"));
    }
    let text_len = text_len as usize;
    let mut offset = 8;
    if buffer.len() < offset + text_len + 4 {
        return Err(SbError::underflow("header text needs more data"));
    }
    let text = &buffer[offset..offset + text_len];
    offset += text_len;
    let ref_count = LittleEndian::read_i32(&buffer[offset..offset + 4]);
    if ref_count < 0 {
        return Err(SbError::format("negative reference count"));
    }
    offset += 4;

    let mut references = Vec::new();
    for index in 0..ref_count {
        if buffer.len() < offset + 4 {
            return Err(SbError::underflow("reference entry needs more data"));
        }
        let name_len = LittleEndian::read_i32(&buffer[offset..offset + 4]);
        if name_len < 1 {
            return Err(SbError::format("reference name length must be positive"));
        }
        let name_len = name_len as usize;
        offset += 4;
        if buffer.len() < offset + name_len + 4 {
            return Err(SbError::underflow("reference entry needs more data"));
        }
        let name = trim_name(&buffer[offset..offset + name_len]);
        offset += name_len;
        let length = LittleEndian::read_i32(&buffer[offset..offset + 4]);
        offset += 4;
        references.push(Reference {
            name: String::from_utf8(name.to_vec())?,
            length,
            index,
            attributes: Vec::new(),
        });
    }
    Ok((text, references, offset))
}

/// Read a header out of a stream-backed buffer.
///
/// Note: the embedded SAM text will usually duplicate the reference table in
/// `@SQ` lines; the binary table is the authoritative copy.
///
/// # Errors
/// `InvalidFormat` on a bad magic number; `UnexpectedEof` if the input ends
/// inside the header.
pub fn read_header(rb: &mut ReadBuffer<'_>) -> Result<(Vec<u8>, Vec<Reference>), SbError> {
    rb.reserve(8)?;
    if rb[..4] != MAGIC {
        return Err(SbError::format("invalid BAM header found").fill_pos(rb));
    }
    let text_len = LittleEndian::read_i32(&rb[4..8]);
    if text_len < 0 {
        return Err(SbError::format("negative header text length").fill_pos(rb));
    }
    let text_len = text_len as usize;
    let _ = rb.partial_consume(8);

    rb.reserve(text_len + 4)?;
    let text = rb.partial_consume(text_len).to_vec();
    let ref_count = LittleEndian::read_i32(rb.partial_consume(4));
    if ref_count < 0 {
        return Err(SbError::format("negative reference count").fill_pos(rb));
    }

    let mut references = Vec::new();
    for index in 0..ref_count {
        rb.reserve(4)?;
        let name_len = LittleEndian::read_i32(rb.partial_consume(4));
        if name_len < 1 {
            return Err(SbError::format("reference name length must be positive").fill_pos(rb));
        }
        let name_len = name_len as usize;
        rb.reserve(name_len + 4)?;
        let name = trim_name(rb.partial_consume(name_len)).to_vec();
        let length = LittleEndian::read_i32(rb.partial_consume(4));
        references.push(Reference {
            name: String::from_utf8(name)?,
            length,
            index,
            attributes: Vec::new(),
        });
    }
    Ok((text, references))
}

/// Drop the terminator from a NUL-terminated name field.
fn trim_name(name: &[u8]) -> &[u8] {
    match name.last() {
        Some(0) => &name[..name.len() - 1],
        _ => name,
    }
}

/// Serialize a header: the magic number, the SAM header text (with `@SQ`
/// lines supplied for any references the text does not already carry), and
/// the reference table.
///
/// # Errors
/// `Io` only on formatting failures, which do not occur for in-memory sinks.
pub fn encode_header(sam_text: &[u8], references: &[Reference]) -> Result<Vec<u8>, SbError> {
    let text = sam::header::pack_text(sam_text, references);
    let mut out = Vec::with_capacity(12 + text.len() + 16 * references.len());
    out.extend_from_slice(&MAGIC);
    out.write_i32::<LittleEndian>(text.len() as i32)?;
    out.extend_from_slice(&text);
    out.write_i32::<LittleEndian>(references.len() as i32)?;
    for reference in references {
        reference.encode_entry(&mut out)?;
    }
    Ok(out)
}

/// Serialize a header directly to a sink; see [`encode_header`].
///
/// # Errors
/// `Io` if the sink fails.
pub fn write_header<W: Write>(
    sink: &mut W,
    sam_text: &[u8],
    references: &[Reference],
) -> Result<(), SbError> {
    sink.write_all(&encode_header(sam_text, references)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() -> Result<(), SbError> {
        let references = vec![
            Reference::new("chr1", 248_956_422, 0),
            Reference::new("chr2", 242_193_529, 1),
        ];
        let wire = encode_header(b"@HD\tVN:1.6\n", &references)?;

        let (text, decoded, consumed) = decode_header(&wire)?;
        assert_eq!(consumed, wire.len());
        assert!(text.starts_with(b"@HD\tVN:1.6\n"));
        // the packed text gains @SQ lines for the references
        assert!(text.windows(7).any(|w| w == b"SN:chr1"));
        assert_eq!(decoded, references);
        assert_eq!(decoded[1].length, 242_193_529);
        assert_eq!(decoded[1].index, 1);
        Ok(())
    }

    #[test]
    fn test_stream_round_trip() -> Result<(), SbError> {
        let references = vec![Reference::new("ref", 100, 0)];
        let wire = encode_header(b"", &references)?;
        let mut rb = ReadBuffer::from_slice(&wire);
        let (_, decoded) = read_header(&mut rb)?;
        assert_eq!(decoded, references);
        assert!(rb.is_empty());
        Ok(())
    }

    #[test]
    fn test_bad_magic() {
        let err = decode_header(b"BAM\x02\x00\x00\x00\x00").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidFormat);
    }

    #[test]
    fn test_short_buffer_is_recoverable() -> Result<(), SbError> {
        let wire = encode_header(b"@HD\tVN:1.6\n", &[Reference::new("chr1", 1000, 0)])?;
        for split in [2, 8, 12, wire.len() - 2] {
            let err = decode_header(&wire[..split]).unwrap_err();
            assert!(err.is_underflow(), "split at {} was not recoverable", split);
        }
        Ok(())
    }
}

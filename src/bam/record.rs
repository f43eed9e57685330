use std::borrow::Cow;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use super::{alignment_bin, cigar::PackedCigar, sequence::PackedSequence};
use crate::buffer::ReadBuffer;
use crate::record::Record;
use crate::SbError;

/// Bytes in the fixed portion of a record, after the `block_size` prefix
pub(crate) const RECORD_HEADER_SIZE: usize = 32;

/// The longest read name that fits the one-byte length field with its
/// terminator.
pub(crate) const MAX_NAME_LENGTH: usize = 254;

/// The on-wire length of the record block starting at `buffer`, including the
/// 4-byte `block_size` prefix, or `None` if even that prefix is incomplete.
///
/// # Errors
/// `InvalidFormat` if the block could not hold the fixed record fields.
pub(crate) fn framed_len(buffer: &[u8]) -> Result<Option<usize>, SbError> {
    if buffer.len() < 4 {
        return Ok(None);
    }
    let block_size = LittleEndian::read_i32(&buffer[..4]);
    if block_size < RECORD_HEADER_SIZE as i32 {
        return Err(SbError::format(format!(
            "alignment block of {} bytes is too short",
            block_size
        )));
    }
    Ok(Some(4 + block_size as usize))
}

fn field<'a>(
    body: &'a [u8],
    offset: &mut usize,
    len: usize,
    what: &str,
) -> Result<&'a [u8], SbError> {
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= body.len())
        .ok_or_else(|| SbError::format(format!("{} extends past the alignment block", what)))?;
    let out = &body[*offset..end];
    *offset = end;
    Ok(out)
}

/// Decode one record from a buffer. On success the returned record borrows
/// its variable-length fields from `buffer`; the second value is the number
/// of bytes consumed.
///
/// # Errors
/// A recoverable `BufferUnderflow` when the buffer holds less than one whole
/// record block; `InvalidFormat` when the block's internal lengths disagree.
pub fn decode_record(buffer: &[u8]) -> Result<(Record<'_>, usize), SbError> {
    let total = match framed_len(buffer)? {
        Some(total) => total,
        None => return Err(SbError::underflow("alignment block size needs more data")),
    };
    if buffer.len() < total {
        return Err(SbError::underflow("alignment block needs more data"));
    }
    let body = &buffer[4..total];

    let name_length = usize::from(body[8]);
    let cigar_length = usize::from(LittleEndian::read_u16(&body[12..14]));
    let sequence_length = LittleEndian::read_i32(&body[16..20]);
    if sequence_length < 0 {
        return Err(SbError::format("negative sequence length"));
    }
    let sequence_length = sequence_length as usize;
    if name_length == 0 {
        return Err(SbError::format(
            "read name length must include its terminator",
        ));
    }

    let mut offset = RECORD_HEADER_SIZE;
    let name = trim_name(field(body, &mut offset, name_length, "read name")?);
    let cigar = field(body, &mut offset, cigar_length * 4, "CIGAR")?;
    let sequence = field(body, &mut offset, (sequence_length + 1) / 2, "sequence")?;
    let quality_scores = field(body, &mut offset, sequence_length, "quality scores")?;
    let tags = &body[offset..];

    let record = Record {
        reference_id: LittleEndian::read_i32(&body[0..4]),
        position: LittleEndian::read_i32(&body[4..8]),
        mapping_quality: body[9],
        bin: LittleEndian::read_u16(&body[10..12]),
        flag: LittleEndian::read_u16(&body[14..16]),
        next_reference_id: LittleEndian::read_i32(&body[20..24]),
        next_position: LittleEndian::read_i32(&body[24..28]),
        template_length: LittleEndian::read_i32(&body[28..32]),
        name: Cow::Borrowed(name),
        cigar: PackedCigar::from_raw(Cow::Borrowed(cigar))?,
        sequence: PackedSequence::from_raw(Cow::Borrowed(sequence), sequence_length)?,
        quality_scores: Cow::Borrowed(quality_scores),
        tags: crate::record::TagData::Raw(Cow::Borrowed(tags)),
    };
    Ok((record, total))
}

fn trim_name(name: &[u8]) -> &[u8] {
    match name.last() {
        Some(0) => &name[..name.len() - 1],
        _ => name,
    }
}

/// Read one record from a stream-backed buffer, returning `None` at a clean
/// end of input.
///
/// # Errors
/// `UnexpectedEof` if the input ends mid-record; `InvalidFormat` as
/// [`decode_record`].
pub fn read_record(rb: &mut ReadBuffer<'_>) -> Result<Option<Record<'static>>, SbError> {
    if rb.is_empty() {
        rb.refill()?;
    }
    if rb.is_empty() && rb.eof() {
        return Ok(None);
    }
    rb.reserve(4)?;
    let total = match framed_len(&rb[..])? {
        Some(total) => total,
        None => return Err(SbError::eof("alignment block size was truncated")),
    };
    rb.reserve(total)?;
    let data = rb.consume(total);
    let (record, _) = decode_record(data)?;
    Ok(Some(record.into_owned()))
}

/// Serialize a record into its wire form.
///
/// The derived fields (`name_length`, `cigar_length`, `sequence_length`,
/// `bin`, `block_size`) are recomputed from the record's contents; the name
/// is written with a single NUL terminator and no padding.
///
/// # Errors
/// `InvalidFormat` when a field does not fit its wire representation.
pub fn encode_record(record: &Record<'_>) -> Result<Vec<u8>, SbError> {
    let name = record.name.as_ref();
    if name.len() > MAX_NAME_LENGTH {
        return Err(SbError::format(format!(
            "read name of {} bytes is too long",
            name.len()
        )));
    }
    let name_length = name.len() + 1;
    let cigar_length = record.cigar.len();
    if cigar_length > usize::from(u16::MAX) {
        return Err(SbError::format("too many CIGAR operations"));
    }
    let sequence_length = record.sequence.len();
    let quality_scores: Cow<'_, [u8]> = if record.quality_scores.len() == sequence_length {
        Cow::Borrowed(record.quality_scores.as_ref())
    } else if record.quality_scores.is_empty() {
        // missing scores are encoded as the 0xFF sentinel
        Cow::Owned(vec![0xFF; sequence_length])
    } else {
        return Err(SbError::format(
            "quality scores do not match the sequence length",
        ));
    };
    let tags_size = record.tags_wire_size();
    let bin = alignment_bin(record.position, &record.cigar);

    let block_size = RECORD_HEADER_SIZE
        + name_length
        + 4 * cigar_length
        + (sequence_length + 1) / 2
        + sequence_length
        + tags_size;
    let mut out = Vec::with_capacity(4 + block_size);
    out.write_i32::<LittleEndian>(block_size as i32)?;
    out.write_i32::<LittleEndian>(record.reference_id)?;
    out.write_i32::<LittleEndian>(record.position)?;
    out.push(name_length as u8);
    out.push(record.mapping_quality);
    out.write_u16::<LittleEndian>(bin)?;
    out.write_u16::<LittleEndian>(cigar_length as u16)?;
    out.write_u16::<LittleEndian>(record.flag)?;
    out.write_i32::<LittleEndian>(sequence_length as i32)?;
    out.write_i32::<LittleEndian>(record.next_reference_id)?;
    out.write_i32::<LittleEndian>(record.next_position)?;
    out.write_i32::<LittleEndian>(record.template_length)?;
    out.extend_from_slice(name);
    out.push(0);
    out.extend_from_slice(record.cigar.as_bytes());
    out.extend_from_slice(record.sequence.as_bytes());
    out.extend_from_slice(&quality_scores);
    record.encode_tags_into(&mut out);
    Ok(out)
}

/// Serialize a record directly to a sink; see [`encode_record`].
///
/// # Errors
/// `Io` if the sink fails.
pub fn write_record<W: Write>(record: &Record<'_>, sink: &mut W) -> Result<(), SbError> {
    sink.write_all(&encode_record(record)?)?;
    Ok(())
}

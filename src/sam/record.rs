use std::borrow::Cow;
use std::io::Write;

use log::warn;

use super::CIGAR_RE;
use crate::bam::cigar::{PackedCigar, OP_CODES};
use crate::bam::record::MAX_NAME_LENGTH;
use crate::bam::sequence::PackedSequence;
use crate::bam::tag::Tag;
use crate::bam::alignment_bin;
use crate::record::Record;
use crate::reference::Reference;
use crate::SbError;

/// Parse a text CIGAR string.
///
/// # Errors
/// `InvalidFormat` unless the whole string is operations.
pub fn parse_cigar_text(text: &[u8]) -> Result<PackedCigar<'static>, SbError> {
    let mut ops = Vec::new();
    let mut matched = 0;
    for found in CIGAR_RE.find_iter(text) {
        if found.start() != matched {
            break;
        }
        matched = found.end();
        let bytes = found.as_bytes();
        let (digits, op) = bytes.split_at(bytes.len() - 1);
        let length: u32 = std::str::from_utf8(digits)?.parse()?;
        let code = OP_CODES
            .iter()
            .position(|&symbol| symbol == op[0])
            .ok_or_else(|| SbError::format("unknown CIGAR operation"))?;
        ops.push((length, code as u8));
    }
    if matched != text.len() {
        return Err(SbError::format(format!(
            "malformed CIGAR string {:?}",
            String::from_utf8_lossy(text)
        )));
    }
    PackedCigar::pack(&ops)
}

fn resolve(name: &[u8], references: &[Reference]) -> Result<i32, SbError> {
    if name == b"*" {
        return Ok(-1);
    }
    references
        .iter()
        .position(|reference| reference.name.as_bytes() == name)
        .map(|index| index as i32)
        .ok_or_else(|| {
            SbError::format(format!(
                "unknown reference {:?}",
                String::from_utf8_lossy(name)
            ))
        })
}

/// A 1-based wire position to the 0-based internal form; zero means unmapped.
fn parse_position(field: &[u8]) -> Result<i32, SbError> {
    let position: i32 = std::str::from_utf8(field)?.parse()?;
    if position < 0 {
        return Err(SbError::format("negative position"));
    }
    Ok(position - 1)
}

/// Parse one alignment line into a record.
///
/// Expects the eleven fixed tab-separated fields, with optional `TAG:TYPE:VALUE`
/// columns after them. Reference names are resolved against `references`.
///
/// # Errors
/// `InvalidFormat` on missing fields, unresolvable names, or malformed
/// values.
pub fn parse_record(line: &[u8], references: &[Reference]) -> Result<Record<'static>, SbError> {
    let fields: Vec<&[u8]> = line.split(|&b| b == b'\t').collect();
    if fields.len() < 11 {
        return Err(SbError::format("alignment line has too few fields"));
    }
    if fields[0].len() > MAX_NAME_LENGTH {
        return Err(SbError::format("query name is too long"));
    }

    let mut record = Record::default();
    record.name = Cow::Owned(fields[0].to_vec());
    record.flag = std::str::from_utf8(fields[1])?.parse()?;
    record.reference_id = resolve(fields[2], references)?;
    record.position = parse_position(fields[3])?;
    record.mapping_quality = std::str::from_utf8(fields[4])?.parse()?;
    if fields[5] != b"*" {
        record.cigar = parse_cigar_text(fields[5])?;
    }
    record.next_reference_id = if fields[6] == b"=" {
        record.reference_id
    } else {
        resolve(fields[6], references)?
    };
    record.next_position = parse_position(fields[7])?;
    record.template_length = std::str::from_utf8(fields[8])?.parse()?;
    if fields[9] != b"*" {
        record.sequence = PackedSequence::from_text(fields[9])?;
    }
    record.quality_scores = parse_quality(fields[10], record.sequence.len())?;

    let mut tags = Vec::new();
    for column in &fields[11..] {
        let tag = Tag::parse_sam(column)?;
        match tags.iter().position(|t: &Tag| t.id == tag.id) {
            Some(existing) => {
                warn!(
                    "duplicate tag {}{}; keeping the last occurrence",
                    char::from(tag.id[0]),
                    char::from(tag.id[1])
                );
                tags[existing] = tag;
            }
            None => tags.push(tag),
        }
    }
    record.set_tags(tags);
    record.bin = alignment_bin(record.position, &record.cigar);
    Ok(record)
}

fn parse_quality(field: &[u8], sequence_length: usize) -> Result<Cow<'static, [u8]>, SbError> {
    if field == b"*" {
        // missing scores; keep the wire sentinel for a non-empty sequence
        return Ok(Cow::Owned(vec![0xFF; sequence_length]));
    }
    if field.len() != sequence_length {
        return Err(SbError::format(
            "quality scores do not match the sequence length",
        ));
    }
    let scores = field
        .iter()
        .map(|&b| {
            b.checked_sub(33)
                .ok_or_else(|| SbError::format("quality score below the printable range"))
        })
        .collect::<Result<Vec<u8>, SbError>>()?;
    Ok(Cow::Owned(scores))
}

/// Render a record as one alignment line, without a trailing newline.
///
/// # Errors
/// `InvalidFormat` if the record points at a reference that is not in
/// `references` or carries an unrenderable value.
pub fn render_record(record: &Record<'_>, references: &[Reference]) -> Result<Vec<u8>, SbError> {
    let mut out = Vec::new();
    if record.name.is_empty() {
        out.push(b'*');
    } else {
        out.extend_from_slice(&record.name);
    }
    write!(out, "\t{}\t", record.flag)?;
    push_reference_name(&mut out, record.reference_id, references)?;
    write!(out, "\t{}\t{}\t", record.position + 1, record.mapping_quality)?;
    if record.cigar.is_empty() {
        out.push(b'*');
    } else {
        write!(out, "{}", record.cigar)?;
    }
    out.push(b'\t');
    push_reference_name(&mut out, record.next_reference_id, references)?;
    write!(
        out,
        "\t{}\t{}\t",
        record.next_position + 1,
        record.template_length
    )?;
    if record.sequence.is_empty() {
        out.push(b'*');
    } else {
        write!(out, "{}", record.sequence)?;
    }
    out.push(b'\t');
    if record.quality_scores.is_empty() || record.quality_scores.iter().all(|&b| b == 0xFF) {
        out.push(b'*');
    } else {
        for &score in record.quality_scores.iter() {
            let printable = score.checked_add(33).ok_or_else(|| {
                SbError::format("quality score above the printable range")
            })?;
            out.push(printable);
        }
    }
    for tag in record.tags_view()?.iter() {
        out.push(b'\t');
        tag.render_sam(&mut out)?;
    }
    Ok(out)
}

fn push_reference_name(
    out: &mut Vec<u8>,
    reference_id: i32,
    references: &[Reference],
) -> Result<(), SbError> {
    if reference_id < 0 {
        out.push(b'*');
        return Ok(());
    }
    let reference = references.get(reference_id as usize).ok_or_else(|| {
        SbError::format(format!("reference id {} is out of range", reference_id))
    })?;
    out.extend_from_slice(reference.name.as_bytes());
    Ok(())
}

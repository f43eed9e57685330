use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};
use log::warn;
use memchr::memchr;

use crate::SbError;

/// A typed auxiliary annotation attached to an alignment record.
#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    /// The two-character tag identifier
    pub id: [u8; 2],
    /// The typed value
    pub value: TagValue,
}

/// The value payload of a [`Tag`].
///
/// The scalar variants mirror the single-byte value types `A c C s S i I f`;
/// `String` and `Hex` are the NUL-terminated `Z` and `H` types, and the array
/// variants cover `B` with each of its element subtypes. On the SAM side all
/// of the integer variants read and print as `i`.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    /// A single printable character (`A`)
    Char(u8),
    /// A signed 8-bit integer (`c`)
    Int8(i8),
    /// An unsigned 8-bit integer (`C`)
    UInt8(u8),
    /// A signed 16-bit integer (`s`)
    Int16(i16),
    /// An unsigned 16-bit integer (`S`)
    UInt16(u16),
    /// A signed 32-bit integer (`i`)
    Int32(i32),
    /// An unsigned 32-bit integer (`I`)
    UInt32(u32),
    /// A 32-bit float (`f`)
    Float(f32),
    /// A printable NUL-terminated string (`Z`)
    String(Vec<u8>),
    /// An even-length ASCII hex string of a byte array (`H`)
    Hex(Vec<u8>),
    /// An array of signed 8-bit integers (`B:c`)
    Int8Array(Vec<i8>),
    /// An array of unsigned 8-bit integers (`B:C`)
    UInt8Array(Vec<u8>),
    /// An array of signed 16-bit integers (`B:s`)
    Int16Array(Vec<i16>),
    /// An array of unsigned 16-bit integers (`B:S`)
    UInt16Array(Vec<u16>),
    /// An array of signed 32-bit integers (`B:i`)
    Int32Array(Vec<i32>),
    /// An array of unsigned 32-bit integers (`B:I`)
    UInt32Array(Vec<u32>),
    /// An array of 32-bit floats (`B:f`)
    FloatArray(Vec<f32>),
}

impl TagValue {
    /// The single-byte value type code for this value.
    pub fn type_byte(&self) -> u8 {
        match self {
            TagValue::Char(_) => b'A',
            TagValue::Int8(_) => b'c',
            TagValue::UInt8(_) => b'C',
            TagValue::Int16(_) => b's',
            TagValue::UInt16(_) => b'S',
            TagValue::Int32(_) => b'i',
            TagValue::UInt32(_) => b'I',
            TagValue::Float(_) => b'f',
            TagValue::String(_) => b'Z',
            TagValue::Hex(_) => b'H',
            TagValue::Int8Array(_)
            | TagValue::UInt8Array(_)
            | TagValue::Int16Array(_)
            | TagValue::UInt16Array(_)
            | TagValue::Int32Array(_)
            | TagValue::UInt32Array(_)
            | TagValue::FloatArray(_) => b'B',
        }
    }

    /// The numeric value of any integer variant.
    pub fn int(&self) -> Option<i64> {
        match *self {
            TagValue::Int8(v) => Some(i64::from(v)),
            TagValue::UInt8(v) => Some(i64::from(v)),
            TagValue::Int16(v) => Some(i64::from(v)),
            TagValue::UInt16(v) => Some(i64::from(v)),
            TagValue::Int32(v) => Some(i64::from(v)),
            TagValue::UInt32(v) => Some(i64::from(v)),
            _ => None,
        }
    }

    /// The number of bytes this value occupies on the wire, excluding the
    /// identifier and type byte.
    pub fn wire_size(&self) -> usize {
        match self {
            TagValue::Char(_) | TagValue::Int8(_) | TagValue::UInt8(_) => 1,
            TagValue::Int16(_) | TagValue::UInt16(_) => 2,
            TagValue::Int32(_) | TagValue::UInt32(_) | TagValue::Float(_) => 4,
            TagValue::String(v) | TagValue::Hex(v) => v.len() + 1,
            TagValue::Int8Array(v) => 5 + v.len(),
            TagValue::UInt8Array(v) => 5 + v.len(),
            TagValue::Int16Array(v) => 5 + 2 * v.len(),
            TagValue::UInt16Array(v) => 5 + 2 * v.len(),
            TagValue::Int32Array(v) => 5 + 4 * v.len(),
            TagValue::UInt32Array(v) => 5 + 4 * v.len(),
            TagValue::FloatArray(v) => 5 + 4 * v.len(),
        }
    }
}

impl Tag {
    /// The number of bytes this tag occupies on the wire.
    pub fn wire_size(&self) -> usize {
        2 + 1 + self.value.wire_size()
    }

    /// Append this tag's wire form to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id);
        out.push(self.value.type_byte());
        match &self.value {
            TagValue::Char(v) => out.push(*v),
            TagValue::Int8(v) => out.push(*v as u8),
            TagValue::UInt8(v) => out.push(*v),
            TagValue::Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
            TagValue::UInt16(v) => out.extend_from_slice(&v.to_le_bytes()),
            TagValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
            TagValue::UInt32(v) => out.extend_from_slice(&v.to_le_bytes()),
            TagValue::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            TagValue::String(v) | TagValue::Hex(v) => {
                out.extend_from_slice(v);
                out.push(0);
            }
            TagValue::Int8Array(v) => {
                encode_array_header(out, b'c', v.len());
                out.extend(v.iter().map(|&e| e as u8));
            }
            TagValue::UInt8Array(v) => {
                encode_array_header(out, b'C', v.len());
                out.extend_from_slice(v);
            }
            TagValue::Int16Array(v) => {
                encode_array_header(out, b's', v.len());
                for e in v {
                    out.extend_from_slice(&e.to_le_bytes());
                }
            }
            TagValue::UInt16Array(v) => {
                encode_array_header(out, b'S', v.len());
                for e in v {
                    out.extend_from_slice(&e.to_le_bytes());
                }
            }
            TagValue::Int32Array(v) => {
                encode_array_header(out, b'i', v.len());
                for e in v {
                    out.extend_from_slice(&e.to_le_bytes());
                }
            }
            TagValue::UInt32Array(v) => {
                encode_array_header(out, b'I', v.len());
                for e in v {
                    out.extend_from_slice(&e.to_le_bytes());
                }
            }
            TagValue::FloatArray(v) => {
                encode_array_header(out, b'f', v.len());
                for e in v {
                    out.extend_from_slice(&e.to_le_bytes());
                }
            }
        }
    }

    /// Parse a `TAG:TYPE:VALUE` column from an alignment line.
    ///
    /// Integer values take the narrowest signed type that fits, falling back
    /// to `I` only for values above `i32::MAX`.
    ///
    /// # Errors
    /// `InvalidFormat` on malformed columns or unknown types.
    pub fn parse_sam(column: &[u8]) -> Result<Tag, SbError> {
        if column.len() < 5 || column[2] != b':' || column[4] != b':' {
            return Err(SbError::format(format!(
                "malformed tag column {:?}",
                String::from_utf8_lossy(column)
            )));
        }
        let id = [column[0], column[1]];
        let value_bytes = &column[5..];
        let value = match column[3] {
            b'A' => {
                if value_bytes.len() != 1 {
                    return Err(SbError::format("character tag must hold one character"));
                }
                TagValue::Char(value_bytes[0])
            }
            b'i' => narrowest_int(std::str::from_utf8(value_bytes)?.parse()?)?,
            b'f' => TagValue::Float(std::str::from_utf8(value_bytes)?.parse()?),
            b'Z' => TagValue::String(value_bytes.to_vec()),
            b'H' => {
                check_hex(value_bytes)?;
                TagValue::Hex(value_bytes.to_vec())
            }
            b'B' => parse_sam_array(value_bytes)?,
            other => {
                return Err(SbError::format(format!(
                    "unknown tag value type {:?}",
                    char::from(other)
                )))
            }
        };
        Ok(Tag { id, value })
    }

    /// Append this tag's `TAG:TYPE:VALUE` text form to `out`. All integer
    /// variants render as `i`.
    pub fn render_sam(&self, out: &mut Vec<u8>) -> Result<(), SbError> {
        out.extend_from_slice(&self.id);
        out.push(b':');
        match &self.value {
            TagValue::Char(v) => {
                out.extend_from_slice(b"A:");
                out.push(*v);
            }
            TagValue::Float(v) => write!(out, "f:{}", v)?,
            TagValue::String(v) => {
                out.extend_from_slice(b"Z:");
                out.extend_from_slice(v);
            }
            TagValue::Hex(v) => {
                out.extend_from_slice(b"H:");
                out.extend_from_slice(v);
            }
            TagValue::Int8Array(v) => render_sam_array(out, b'c', v)?,
            TagValue::UInt8Array(v) => render_sam_array(out, b'C', v)?,
            TagValue::Int16Array(v) => render_sam_array(out, b's', v)?,
            TagValue::UInt16Array(v) => render_sam_array(out, b'S', v)?,
            TagValue::Int32Array(v) => render_sam_array(out, b'i', v)?,
            TagValue::UInt32Array(v) => render_sam_array(out, b'I', v)?,
            TagValue::FloatArray(v) => render_sam_array(out, b'f', v)?,
            int => match int.int() {
                Some(v) => write!(out, "i:{}", v)?,
                None => return Err(SbError::format("unrenderable tag value")),
            },
        }
        Ok(())
    }
}

fn encode_array_header(out: &mut Vec<u8>, subtype: u8, count: usize) {
    out.push(subtype);
    out.extend_from_slice(&(count as u32).to_le_bytes());
}

fn render_sam_array<T: std::fmt::Display>(
    out: &mut Vec<u8>,
    subtype: u8,
    values: &[T],
) -> Result<(), SbError> {
    out.push(b'B');
    out.push(b':');
    out.push(subtype);
    for value in values {
        write!(out, ",{}", value)?;
    }
    Ok(())
}

/// Pick the narrowest signed integer type that holds `value`, widening to
/// unsigned only past `i32::MAX`.
fn narrowest_int(value: i64) -> Result<TagValue, SbError> {
    if value >= i64::from(i8::MIN) && value <= i64::from(i8::MAX) {
        Ok(TagValue::Int8(value as i8))
    } else if value >= i64::from(i16::MIN) && value <= i64::from(i16::MAX) {
        Ok(TagValue::Int16(value as i16))
    } else if value >= i64::from(i32::MIN) && value <= i64::from(i32::MAX) {
        Ok(TagValue::Int32(value as i32))
    } else if value > 0 && value <= i64::from(u32::MAX) {
        Ok(TagValue::UInt32(value as u32))
    } else {
        Err(SbError::format(format!(
            "integer tag value {} is out of range",
            value
        )))
    }
}

fn check_hex(value: &[u8]) -> Result<(), SbError> {
    if value.len() % 2 != 0 || !value.iter().all(u8::is_ascii_hexdigit) {
        return Err(SbError::format("hex tag must be even-length hex digits"));
    }
    Ok(())
}

fn parse_sam_array(value: &[u8]) -> Result<TagValue, SbError> {
    let mut parts = value.split(|&b| b == b',');
    let subtype = match parts.next() {
        Some([subtype]) => *subtype,
        _ => return Err(SbError::format("array tag is missing its element type")),
    };
    let elements: Vec<&str> = parts
        .map(std::str::from_utf8)
        .collect::<Result<_, _>>()
        .map_err(SbError::from)?;
    fn collect<T: std::str::FromStr>(elements: &[&str]) -> Result<Vec<T>, SbError>
    where
        SbError: From<T::Err>,
    {
        elements.iter().map(|e| Ok(e.parse()?)).collect()
    }
    Ok(match subtype {
        b'c' => TagValue::Int8Array(collect(&elements)?),
        b'C' => TagValue::UInt8Array(collect(&elements)?),
        b's' => TagValue::Int16Array(collect(&elements)?),
        b'S' => TagValue::UInt16Array(collect(&elements)?),
        b'i' => TagValue::Int32Array(collect(&elements)?),
        b'I' => TagValue::UInt32Array(collect(&elements)?),
        b'f' => TagValue::FloatArray(collect(&elements)?),
        other => {
            return Err(SbError::format(format!(
                "unknown array element type {:?}",
                char::from(other)
            )))
        }
    })
}

/// Parse an entire tag region in a single pass.
///
/// A duplicate identifier is invalid on the wire; the last occurrence is kept
/// and a warning is logged.
///
/// # Errors
/// `InvalidFormat` on unknown type bytes or truncated values.
pub fn parse_tags(buffer: &[u8]) -> Result<Vec<Tag>, SbError> {
    let mut tags: Vec<Tag> = Vec::new();
    let mut offset = 0;
    while offset < buffer.len() {
        let (tag, size) = parse_one(&buffer[offset..])?;
        offset += size;
        match tags.iter().position(|t| t.id == tag.id) {
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
    Ok(tags)
}

/// The total wire size of a list of tags.
pub fn tags_wire_size(tags: &[Tag]) -> usize {
    tags.iter().map(Tag::wire_size).sum()
}

fn parse_one(buffer: &[u8]) -> Result<(Tag, usize), SbError> {
    if buffer.len() < 3 {
        return Err(SbError::format("truncated tag header"));
    }
    let id = [buffer[0], buffer[1]];
    let (value, size) = parse_value(buffer[2], &buffer[3..])?;
    Ok((Tag { id, value }, 3 + size))
}

fn need(buffer: &[u8], amt: usize) -> Result<(), SbError> {
    if buffer.len() < amt {
        return Err(SbError::format("truncated tag value"));
    }
    Ok(())
}

fn parse_value(value_type: u8, buffer: &[u8]) -> Result<(TagValue, usize), SbError> {
    Ok(match value_type {
        b'A' => {
            need(buffer, 1)?;
            (TagValue::Char(buffer[0]), 1)
        }
        b'c' => {
            need(buffer, 1)?;
            (TagValue::Int8(buffer[0] as i8), 1)
        }
        b'C' => {
            need(buffer, 1)?;
            (TagValue::UInt8(buffer[0]), 1)
        }
        b's' => {
            need(buffer, 2)?;
            (TagValue::Int16(LittleEndian::read_i16(buffer)), 2)
        }
        b'S' => {
            need(buffer, 2)?;
            (TagValue::UInt16(LittleEndian::read_u16(buffer)), 2)
        }
        b'i' => {
            need(buffer, 4)?;
            (TagValue::Int32(LittleEndian::read_i32(buffer)), 4)
        }
        b'I' => {
            need(buffer, 4)?;
            (TagValue::UInt32(LittleEndian::read_u32(buffer)), 4)
        }
        b'f' => {
            need(buffer, 4)?;
            (TagValue::Float(LittleEndian::read_f32(buffer)), 4)
        }
        b'Z' => {
            let end = memchr(0, buffer)
                .ok_or_else(|| SbError::format("unterminated string tag"))?;
            (TagValue::String(buffer[..end].to_vec()), end + 1)
        }
        b'H' => {
            let end = memchr(0, buffer)
                .ok_or_else(|| SbError::format("unterminated hex tag"))?;
            check_hex(&buffer[..end])?;
            (TagValue::Hex(buffer[..end].to_vec()), end + 1)
        }
        b'B' => parse_array(buffer)?,
        other => {
            return Err(SbError::format(format!(
                "unknown tag value type {:?}",
                char::from(other)
            )))
        }
    })
}

fn parse_array(buffer: &[u8]) -> Result<(TagValue, usize), SbError> {
    need(buffer, 5)?;
    let subtype = buffer[0];
    let count = LittleEndian::read_u32(&buffer[1..5]) as usize;
    let element_size = match subtype {
        b'c' | b'C' => 1,
        b's' | b'S' => 2,
        b'i' | b'I' | b'f' => 4,
        other => {
            return Err(SbError::format(format!(
                "unknown array element type {:?}",
                char::from(other)
            )))
        }
    };
    let data_size = count
        .checked_mul(element_size)
        .ok_or_else(|| SbError::format("array tag length overflows"))?;
    need(buffer, 5 + data_size)?;
    let data = &buffer[5..5 + data_size];
    let value = match subtype {
        b'c' => TagValue::Int8Array(data.iter().map(|&b| b as i8).collect()),
        b'C' => TagValue::UInt8Array(data.to_vec()),
        b's' => TagValue::Int16Array(
            data.chunks_exact(2).map(LittleEndian::read_i16).collect(),
        ),
        b'S' => TagValue::UInt16Array(
            data.chunks_exact(2).map(LittleEndian::read_u16).collect(),
        ),
        b'i' => TagValue::Int32Array(
            data.chunks_exact(4).map(LittleEndian::read_i32).collect(),
        ),
        b'I' => TagValue::UInt32Array(
            data.chunks_exact(4).map(LittleEndian::read_u32).collect(),
        ),
        b'f' => TagValue::FloatArray(
            data.chunks_exact(4).map(LittleEndian::read_f32).collect(),
        ),
        _ => return Err(SbError::format("unknown array element type")),
    };
    Ok((value, 5 + data_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sam_int_narrows_to_signed() -> Result<(), SbError> {
        let tag = Tag::parse_sam(b"NM:i:5")?;
        assert_eq!(tag.id, *b"NM");
        assert_eq!(tag.value, TagValue::Int8(5));
        let mut wire = Vec::new();
        tag.encode_into(&mut wire);
        assert_eq!(wire, [0x4E, 0x4D, 0x63, 0x05]);

        assert_eq!(Tag::parse_sam(b"XX:i:200")?.value, TagValue::Int16(200));
        assert_eq!(Tag::parse_sam(b"XX:i:-40000")?.value, TagValue::Int32(-40_000));
        assert_eq!(
            Tag::parse_sam(b"XX:i:3000000000")?.value,
            TagValue::UInt32(3_000_000_000)
        );
        assert!(Tag::parse_sam(b"XX:i:99999999999").is_err());
        Ok(())
    }

    #[test]
    fn test_wire_round_trip() -> Result<(), SbError> {
        let tags = vec![
            Tag { id: *b"XA", value: TagValue::Char(b'Q') },
            Tag { id: *b"XB", value: TagValue::UInt16(40_000) },
            Tag { id: *b"XC", value: TagValue::Float(1.5) },
            Tag { id: *b"XZ", value: TagValue::String(b"hello".to_vec()) },
            Tag { id: *b"XH", value: TagValue::Hex(b"1AFF".to_vec()) },
            Tag { id: *b"XI", value: TagValue::Int16Array(vec![-2, 300]) },
        ];
        let mut wire = Vec::new();
        for tag in &tags {
            tag.encode_into(&mut wire);
        }
        assert_eq!(wire.len(), tags_wire_size(&tags));
        assert_eq!(parse_tags(&wire)?, tags);
        Ok(())
    }

    #[test]
    fn test_empty_region() -> Result<(), SbError> {
        assert!(parse_tags(b"")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let err = parse_tags(b"XXq\x01").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidFormat);
    }

    #[test]
    fn test_duplicate_keeps_last() -> Result<(), SbError> {
        let mut wire = Vec::new();
        Tag { id: *b"NM", value: TagValue::Int8(1) }.encode_into(&mut wire);
        Tag { id: *b"NM", value: TagValue::Int8(2) }.encode_into(&mut wire);
        let tags = parse_tags(&wire)?;
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].value, TagValue::Int8(2));
        Ok(())
    }

    #[test]
    fn test_sam_render() -> Result<(), SbError> {
        let mut out = Vec::new();
        Tag { id: *b"XB", value: TagValue::UInt32(7) }.render_sam(&mut out)?;
        assert_eq!(out, b"XB:i:7");

        out.clear();
        Tag { id: *b"XA", value: TagValue::Int8Array(vec![1, -2]) }.render_sam(&mut out)?;
        assert_eq!(out, b"XA:B:c,1,-2");
        Ok(())
    }

    #[test]
    fn test_sam_array_parse() -> Result<(), SbError> {
        let tag = Tag::parse_sam(b"XA:B:S,1,2,65535")?;
        assert_eq!(tag.value, TagValue::UInt16Array(vec![1, 2, 65535]));
        assert!(Tag::parse_sam(b"XA:B:q,1").is_err());
        Ok(())
    }

    #[test]
    fn test_truncated_values() {
        assert!(parse_tags(b"XXi\x01\x02").is_err());
        assert!(parse_tags(b"XXZabc").is_err());
        assert!(parse_tags(b"XXBc\x05\x00\x00\x00\x01").is_err());
    }
}

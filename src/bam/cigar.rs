use std::borrow::Cow;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::SbError;

/// ASCII CIGAR operations indexed by their numeric op codes.
pub const OP_CODES: &[u8; 9] = b"MIDNSHP=X";

/// Whether an op consumes a query sequence position, indexed by op code.
pub const CONSUMES_QUERY: [bool; 9] = [true, true, false, false, true, false, false, true, true];

/// Whether an op consumes a reference position, indexed by op code.
pub const CONSUMES_REFERENCE: [bool; 9] =
    [true, false, true, true, false, false, false, true, true];

/// Whether an op is a soft or hard clip, indexed by op code.
pub const CLIPPED: [bool; 9] = [false, false, false, false, true, true, false, false, false];

/// An op length must fit the 28 high bits of its slot.
const MAX_OP_LENGTH: u32 = (1 << 28) - 1;

/// A CIGAR stored in its binary form: one little-endian `u32` per operation,
/// the length in the high 28 bits and the op code in the low 4.
///
/// The view may borrow the bytes of a decoded record or own them; mutation
/// through [`PackedCigar::set`] copies borrowed bytes first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedCigar<'r> {
    raw: Cow<'r, [u8]>,
}

impl<'r> PackedCigar<'r> {
    /// Wrap raw little-endian slot bytes.
    pub(crate) fn from_raw(raw: Cow<'r, [u8]>) -> Result<Self, SbError> {
        if raw.len() % 4 != 0 {
            return Err(SbError::format("CIGAR data is not a whole number of ops"));
        }
        Ok(PackedCigar { raw })
    }

    /// Pack a list of `(op_length, op_code)` pairs.
    ///
    /// # Errors
    /// `InvalidFormat` if an op code is out of range or a length does not fit
    /// 28 bits.
    pub fn pack(ops: &[(u32, u8)]) -> Result<PackedCigar<'static>, SbError> {
        let mut raw = Vec::with_capacity(ops.len() * 4);
        for &(length, code) in ops {
            check_op(length, code)?;
            raw.extend_from_slice(&((length << 4) | u32::from(code)).to_le_bytes());
        }
        Ok(PackedCigar {
            raw: Cow::Owned(raw),
        })
    }

    /// Unpack into a list of `(op_length, op_code)` pairs.
    pub fn unpack(&self) -> Vec<(u32, u8)> {
        self.iter().collect()
    }

    /// The number of operations.
    pub fn len(&self) -> usize {
        self.raw.len() / 4
    }

    /// True if there are no operations.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// The `(op_length, op_code)` pair at `i`.
    pub fn get(&self, i: usize) -> Option<(u32, u8)> {
        if i >= self.len() {
            return None;
        }
        let slot = LittleEndian::read_u32(&self.raw[4 * i..4 * i + 4]);
        Some((slot >> 4, (slot & 0xF) as u8))
    }

    /// Overwrite the operation at `i`, mutating the underlying bytes.
    ///
    /// # Errors
    /// `InvalidFormat` if `i` is out of bounds or the op is invalid.
    pub fn set(&mut self, i: usize, op: (u32, u8)) -> Result<(), SbError> {
        if i >= self.len() {
            return Err(SbError::format("CIGAR index out of bounds"));
        }
        check_op(op.0, op.1)?;
        let slot = (op.0 << 4) | u32::from(op.1);
        LittleEndian::write_u32(&mut self.raw.to_mut()[4 * i..4 * i + 4], slot);
        Ok(())
    }

    /// Iterate over `(op_length, op_code)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.raw.chunks_exact(4).map(|chunk| {
            let slot = LittleEndian::read_u32(chunk);
            (slot >> 4, (slot & 0xF) as u8)
        })
    }

    /// How many reference positions this alignment consumes.
    pub fn reference_length(&self) -> i64 {
        self.iter()
            .filter(|&(_, code)| consumes(&CONSUMES_REFERENCE, code))
            .map(|(length, _)| i64::from(length))
            .sum()
    }

    /// How many query positions this alignment consumes.
    pub fn query_length(&self) -> i64 {
        self.iter()
            .filter(|&(_, code)| consumes(&CONSUMES_QUERY, code))
            .map(|(length, _)| i64::from(length))
            .sum()
    }

    /// True if any op soft or hard clips the query.
    pub fn is_clipped(&self) -> bool {
        self.iter().any(|(_, code)| consumes(&CLIPPED, code))
    }

    /// The raw little-endian slot bytes, as stored on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Decouple the view from any borrowed buffer.
    pub fn into_owned(self) -> PackedCigar<'static> {
        PackedCigar {
            raw: Cow::Owned(self.raw.into_owned()),
        }
    }
}

fn check_op(length: u32, code: u8) -> Result<(), SbError> {
    if usize::from(code) >= OP_CODES.len() {
        return Err(SbError::format(format!("invalid CIGAR op code {}", code)));
    }
    if length > MAX_OP_LENGTH {
        return Err(SbError::format(format!(
            "CIGAR op length {} does not fit 28 bits",
            length
        )));
    }
    Ok(())
}

fn consumes(table: &[bool; 9], code: u8) -> bool {
    table.get(usize::from(code)).copied().unwrap_or(false)
}

impl Default for PackedCigar<'_> {
    fn default() -> Self {
        PackedCigar {
            raw: Cow::Borrowed(&[]),
        }
    }
}

impl fmt::Display for PackedCigar<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (length, code) in self.iter() {
            let op = OP_CODES
                .get(usize::from(code))
                .map(|&b| char::from(b))
                .unwrap_or('?');
            write!(f, "{}{}", length, op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() -> Result<(), SbError> {
        let ops = [(3u32, 0u8), (2, 1), (10, 8)];
        let cigar = PackedCigar::pack(&ops)?;
        assert_eq!(cigar.len(), 3);
        assert_eq!(cigar.unpack(), ops);
        assert_eq!(cigar.get(1), Some((2, 1)));
        assert_eq!(cigar.get(3), None);
        assert_eq!(PackedCigar::pack(&cigar.unpack())?, cigar);
        Ok(())
    }

    #[test]
    fn test_lengths() -> Result<(), SbError> {
        // 5S 10M 2I 3D 4N 1= 2X 1H
        let cigar = PackedCigar::pack(&[
            (5, 4),
            (10, 0),
            (2, 1),
            (3, 2),
            (4, 3),
            (1, 7),
            (2, 8),
            (1, 5),
        ])?;
        assert_eq!(cigar.reference_length(), 10 + 3 + 4 + 1 + 2);
        assert_eq!(cigar.query_length(), 5 + 10 + 2 + 1 + 2);
        assert!(cigar.is_clipped());
        assert_eq!(format!("{}", cigar), "5S10M2I3D4N1=2X1H");
        Ok(())
    }

    #[test]
    fn test_set() -> Result<(), SbError> {
        let mut cigar = PackedCigar::pack(&[(4, 0)])?;
        cigar.set(0, (6, 0))?;
        assert_eq!(cigar.get(0), Some((6, 0)));
        assert!(cigar.set(1, (1, 0)).is_err());
        assert!(cigar.set(0, (1, 12)).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_ops() {
        assert!(PackedCigar::pack(&[(1, 9)]).is_err());
        assert!(PackedCigar::pack(&[(1 << 28, 0)]).is_err());
    }

    #[test]
    fn test_empty() {
        let cigar = PackedCigar::default();
        assert!(cigar.is_empty());
        assert_eq!(cigar.reference_length(), 0);
        assert_eq!(format!("{}", cigar), "");
    }
}

use std::fmt;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::SbError;

/// A target sequence that alignment records are mapped against.
///
/// The order of references in a file's reference list defines the integer
/// `reference_id` stored inside records. Two references are considered equal
/// when their names match.
#[derive(Clone, Debug, Default, Eq)]
pub struct Reference {
    /// The ASCII reference sequence name (`SN`)
    pub name: String,
    /// The number of bases in the reference sequence (`LN`)
    pub length: i32,
    /// The position of this reference in the reference list
    pub index: i32,
    /// Any additional `@SQ` attributes, e.g. `AS` or `M5`, in file order
    pub attributes: Vec<(String, String)>,
}

impl Reference {
    /// Create a new `Reference` with no extra attributes.
    pub fn new<T>(name: T, length: i32, index: i32) -> Self
    where
        T: Into<String>,
    {
        Reference {
            name: name.into(),
            length,
            index,
            attributes: Vec::new(),
        }
    }

    /// The `@SQ` header line for this reference, without a trailing newline.
    pub fn sq_line(&self) -> String {
        let mut line = format!("@SQ\tSN:{}\tLN:{}", self.name, self.length);
        for (key, value) in &self.attributes {
            line.push('\t');
            line.push_str(key);
            line.push(':');
            line.push_str(value);
        }
        line
    }

    /// Append this reference's entry in the binary reference table to `out`.
    pub(crate) fn encode_entry(&self, out: &mut Vec<u8>) -> Result<(), SbError> {
        out.write_i32::<LittleEndian>(self.name.len() as i32 + 1)?;
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        out.write_i32::<LittleEndian>(self.length)?;
        Ok(())
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Reference) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sq_line())
    }
}

#[cfg(test)]
mod tests {
    use super::Reference;
    use crate::SbError;

    #[test]
    fn test_equality_is_by_name() {
        let a = Reference::new("chr1", 1000, 0);
        let b = Reference::new("chr1", 2000, 5);
        let c = Reference::new("chr2", 1000, 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sq_line() {
        let mut r = Reference::new("chr1", 1000, 0);
        assert_eq!(r.sq_line(), "@SQ\tSN:chr1\tLN:1000");
        r.attributes.push(("AS".into(), "hg19".into()));
        assert_eq!(r.sq_line(), "@SQ\tSN:chr1\tLN:1000\tAS:hg19");
    }

    #[test]
    fn test_encode_entry() -> Result<(), SbError> {
        let r = Reference::new("ref", 42, 0);
        let mut out = Vec::new();
        r.encode_entry(&mut out)?;
        assert_eq!(
            out,
            [4, 0, 0, 0, b'r', b'e', b'f', 0, 42, 0, 0, 0]
        );
        Ok(())
    }
}

use std::borrow::Cow;

use bitflags::bitflags;

use crate::bam::cigar::PackedCigar;
use crate::bam::sequence::PackedSequence;
use crate::bam::tag::{self, Tag};
use crate::SbError;

bitflags! {
    /// The defined alignment flag bits of a record.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RecordFlags: u16 {
        /// template having multiple segments in sequencing
        const MULTISEG = 1 << 0;
        /// each segment properly aligned according to the aligner
        const ALIGNED = 1 << 1;
        /// segment unmapped
        const UNMAPPED = 1 << 2;
        /// next segment in the template unmapped
        const MATE_UNMAPPED = 1 << 3;
        /// SEQ being reverse complemented
        const REVERSE_COMPLEMENTED = 1 << 4;
        /// SEQ of the next segment in the template being reversed
        const MATE_REVERSED = 1 << 5;
        /// the first segment in the template
        const READ1 = 1 << 6;
        /// the last segment in the template
        const READ2 = 1 << 7;
        /// secondary alignment
        const SECONDARY = 1 << 8;
        /// not passing quality controls
        const QC_FAIL = 1 << 9;
        /// PCR or optical duplicate
        const DUPLICATE = 1 << 10;
    }
}

/// The tag region of a record, parsed on first access.
///
/// Decoding leaves the region in its raw wire form; the first typed access
/// parses it. The transition is one-way.
#[derive(Clone, Debug)]
pub(crate) enum TagData<'r> {
    /// The unparsed wire bytes of the whole region
    Raw(Cow<'r, [u8]>),
    /// The parsed tags
    Parsed(Vec<Tag>),
}

/// An alignment of one query sequence against a reference.
///
/// A record decoded from a buffer borrows its variable-length fields from
/// that buffer; [`Record::into_owned`] decouples it. Records built by hand
/// start from [`Record::default`], which is unmapped.
#[derive(Clone, Debug)]
pub struct Record<'r> {
    /// Index into the reference list, or -1 when unmapped
    pub reference_id: i32,
    /// 0-based leftmost coordinate, or -1 when unmapped
    pub position: i32,
    /// Mapping quality
    pub mapping_quality: u8,
    /// The binning index bin, as decoded; recomputed on encode
    pub bin: u16,
    /// The flag bitmask; see [`Record::flags`] for the typed form
    pub flag: u16,
    /// The query template name, without its on-wire NUL terminator
    pub name: Cow<'r, [u8]>,
    /// The alignment's CIGAR operations
    pub cigar: PackedCigar<'r>,
    /// The query sequence
    pub sequence: PackedSequence<'r>,
    /// Phred quality scores, one byte per base; 0xFF bytes mean missing
    pub quality_scores: Cow<'r, [u8]>,
    /// Index of the mate's reference, or -1
    pub next_reference_id: i32,
    /// 0-based leftmost coordinate of the mate, or -1
    pub next_position: i32,
    /// Signed observed template length
    pub template_length: i32,
    pub(crate) tags: TagData<'r>,
}

impl Default for Record<'_> {
    fn default() -> Self {
        Record {
            reference_id: -1,
            position: -1,
            mapping_quality: 0,
            bin: 0,
            flag: 0,
            name: Cow::Borrowed(b"*"),
            cigar: PackedCigar::default(),
            sequence: PackedSequence::default(),
            quality_scores: Cow::Borrowed(&[]),
            next_reference_id: -1,
            next_position: -1,
            template_length: 0,
            tags: TagData::Raw(Cow::Borrowed(&[])),
        }
    }
}

impl<'r> Record<'r> {
    /// The typed view of the [`flag`](Record::flag) bitmask.
    pub fn flags(&self) -> RecordFlags {
        RecordFlags::from_bits_truncate(self.flag)
    }

    fn materialize_tags(&mut self) -> Result<(), SbError> {
        if let TagData::Raw(raw) = &self.tags {
            let parsed = tag::parse_tags(raw)?;
            self.tags = TagData::Parsed(parsed);
        }
        Ok(())
    }

    /// The record's tags, parsing the raw region on first access.
    ///
    /// # Errors
    /// `InvalidFormat` if the raw tag region is malformed.
    pub fn tags(&mut self) -> Result<&[Tag], SbError> {
        self.materialize_tags()?;
        match &self.tags {
            TagData::Parsed(tags) => Ok(tags),
            TagData::Raw(_) => unreachable!(),
        }
    }

    /// Mutable access to the record's tags, parsing on first access.
    ///
    /// # Errors
    /// `InvalidFormat` if the raw tag region is malformed.
    pub fn tags_mut(&mut self) -> Result<&mut Vec<Tag>, SbError> {
        self.materialize_tags()?;
        match &mut self.tags {
            TagData::Parsed(tags) => Ok(tags),
            TagData::Raw(_) => unreachable!(),
        }
    }

    /// The tag with the given identifier, if present.
    ///
    /// # Errors
    /// `InvalidFormat` if the raw tag region is malformed.
    pub fn tag(&mut self, id: [u8; 2]) -> Result<Option<&Tag>, SbError> {
        Ok(self.tags()?.iter().find(|tag| tag.id == id))
    }

    /// Replace the record's tags.
    pub fn set_tags(&mut self, tags: Vec<Tag>) {
        self.tags = TagData::Parsed(tags);
    }

    /// The unparsed tag region, if it has not been materialized yet.
    pub fn raw_tags(&self) -> Option<&[u8]> {
        match &self.tags {
            TagData::Raw(raw) => Some(raw),
            TagData::Parsed(_) => None,
        }
    }

    /// The tags without mutating the record, parsing raw bytes into a
    /// temporary list if needed.
    pub(crate) fn tags_view(&self) -> Result<Cow<'_, [Tag]>, SbError> {
        match &self.tags {
            TagData::Raw(raw) => Ok(Cow::Owned(tag::parse_tags(raw)?)),
            TagData::Parsed(tags) => Ok(Cow::Borrowed(tags)),
        }
    }

    pub(crate) fn tags_wire_size(&self) -> usize {
        match &self.tags {
            TagData::Raw(raw) => raw.len(),
            TagData::Parsed(tags) => tag::tags_wire_size(tags),
        }
    }

    pub(crate) fn encode_tags_into(&self, out: &mut Vec<u8>) {
        match &self.tags {
            TagData::Raw(raw) => out.extend_from_slice(raw),
            TagData::Parsed(tags) => {
                for tag in tags {
                    tag.encode_into(out);
                }
            }
        }
    }

    /// Decouple the record from any buffer it borrows from.
    pub fn into_owned(self) -> Record<'static> {
        Record {
            reference_id: self.reference_id,
            position: self.position,
            mapping_quality: self.mapping_quality,
            bin: self.bin,
            flag: self.flag,
            name: Cow::Owned(self.name.into_owned()),
            cigar: self.cigar.into_owned(),
            sequence: self.sequence.into_owned(),
            quality_scores: Cow::Owned(self.quality_scores.into_owned()),
            next_reference_id: self.next_reference_id,
            next_position: self.next_position,
            template_length: self.template_length,
            tags: match self.tags {
                TagData::Raw(raw) => TagData::Raw(Cow::Owned(raw.into_owned())),
                TagData::Parsed(tags) => TagData::Parsed(tags),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bam::tag::TagValue;

    #[test]
    fn test_default_is_unmapped() {
        let record = Record::default();
        assert_eq!(record.reference_id, -1);
        assert_eq!(record.position, -1);
        assert_eq!(record.next_reference_id, -1);
        assert!(record.cigar.is_empty());
        assert!(record.sequence.is_empty());
    }

    #[test]
    fn test_flags() {
        let record = Record {
            flag: 0x5,
            ..Record::default()
        };
        let flags = record.flags();
        assert!(flags.contains(RecordFlags::MULTISEG));
        assert!(flags.contains(RecordFlags::UNMAPPED));
        assert!(!flags.contains(RecordFlags::ALIGNED));
    }

    #[test]
    fn test_lazy_tags() -> Result<(), SbError> {
        let mut wire = Vec::new();
        Tag { id: *b"NM", value: TagValue::Int8(3) }.encode_into(&mut wire);
        let mut record = Record::default();
        record.tags = TagData::Raw(Cow::Owned(wire));

        assert!(record.raw_tags().is_some());
        assert_eq!(record.tag(*b"NM")?.map(|t| &t.value), Some(&TagValue::Int8(3)));
        // the transition to parsed form is one-way
        assert!(record.raw_tags().is_none());
        assert_eq!(record.tag(*b"XX")?, None);
        Ok(())
    }

    #[test]
    fn test_malformed_tags_do_not_poison() {
        let mut record = Record::default();
        record.tags = TagData::Raw(Cow::Borrowed(b"XXq"));
        assert!(record.tags().is_err());
        // the raw region is retained after a failed parse
        assert!(record.raw_tags().is_some());
    }

    #[test]
    fn test_into_owned() -> Result<(), SbError> {
        let name = b"readname".to_vec();
        let record = Record {
            name: Cow::Borrowed(&name),
            ..Record::default()
        };
        let owned: Record<'static> = record.into_owned();
        drop(name);
        assert_eq!(owned.name.as_ref(), b"readname");
        Ok(())
    }
}

use std::fmt;
use std::io::Write as IoWrite;

use flate2::Compression;

use crate::bam;
use crate::bgzf;
use crate::record::Record;
use crate::reference::Reference;
use crate::sam;
use crate::SbError;

/// Emits alignment records in any of the three supported formats.
///
/// Construct with [`Writer::sam`], [`Writer::bam`] or [`Writer::bgzf`]; all
/// three write the header up front and then accept records one at a time.
/// [`Writer::finalize`] flushes and, for the block-compressed form, appends
/// the end-of-file sentinel.
pub enum Writer<W: IoWrite> {
    /// Text output
    Sam(SamWriter<W>),
    /// Binary output
    Bam(BamWriter<W>),
    /// Block-compressed binary output
    Bgzf(BgzfWriter<W>),
}

impl<W: IoWrite> Writer<W> {
    /// A writer emitting text records.
    ///
    /// # Errors
    /// `Io` if writing the header fails.
    pub fn sam(sink: W, header_text: &[u8], references: &[Reference]) -> Result<Self, SbError> {
        Ok(Writer::Sam(SamWriter::new(sink, header_text, references)?))
    }

    /// A writer emitting uncompressed binary records.
    ///
    /// # Errors
    /// `Io` if writing the header fails.
    pub fn bam(sink: W, header_text: &[u8], references: &[Reference]) -> Result<Self, SbError> {
        Ok(Writer::Bam(BamWriter::new(sink, header_text, references)?))
    }

    /// A writer emitting block-compressed binary records. `level` defaults
    /// to the codec's default compression level.
    ///
    /// # Errors
    /// `Io` if compressing or writing the header fails.
    pub fn bgzf(
        sink: W,
        header_text: &[u8],
        references: &[Reference],
        level: Option<Compression>,
    ) -> Result<Self, SbError> {
        Ok(Writer::Bgzf(BgzfWriter::new(
            sink,
            header_text,
            references,
            level,
        )?))
    }

    /// Emit one record.
    ///
    /// # Errors
    /// `InvalidFormat` if the record cannot be represented; `Io` if the sink
    /// fails.
    pub fn write_record(&mut self, record: &Record<'_>) -> Result<(), SbError> {
        match self {
            Writer::Sam(writer) => writer.write_record(record),
            Writer::Bam(writer) => writer.write_record(record),
            Writer::Bgzf(writer) => writer.write_record(record),
        }
    }

    /// Close the in-progress block (block-compressed form) or flush the sink.
    ///
    /// # Errors
    /// `Io` if the sink fails.
    pub fn finish_block(&mut self) -> Result<(), SbError> {
        match self {
            Writer::Sam(writer) => writer.flush(),
            Writer::Bam(writer) => writer.flush(),
            Writer::Bgzf(writer) => writer.finish_block(),
        }
    }

    /// Flush everything; the block-compressed form also appends the
    /// end-of-file sentinel.
    ///
    /// # Errors
    /// `Io` if the sink fails.
    pub fn finalize(&mut self) -> Result<(), SbError> {
        match self {
            Writer::Sam(writer) => writer.flush(),
            Writer::Bam(writer) => writer.flush(),
            Writer::Bgzf(writer) => writer.finalize(),
        }
    }
}

impl<W: IoWrite> fmt::Debug for Writer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Writer::Sam(_) => f.write_str("Writer::Sam"),
            Writer::Bam(_) => f.write_str("Writer::Bam"),
            Writer::Bgzf(_) => f.write_str("Writer::Bgzf"),
        }
    }
}

/// Writes records as alignment lines.
pub struct SamWriter<W: IoWrite> {
    sink: W,
    references: Vec<Reference>,
}

impl<W: IoWrite> SamWriter<W> {
    /// Create a writer, emitting the header text (with `@SQ` lines for any
    /// references the text does not already carry).
    ///
    /// # Errors
    /// `Io` if the sink fails.
    pub fn new(mut sink: W, header_text: &[u8], references: &[Reference]) -> Result<Self, SbError> {
        sink.write_all(&sam::header::pack_text(header_text, references))?;
        Ok(SamWriter {
            sink,
            references: references.to_vec(),
        })
    }

    /// Emit one record as a line.
    ///
    /// # Errors
    /// `InvalidFormat` if the record names a reference outside the table;
    /// `Io` if the sink fails.
    pub fn write_record(&mut self, record: &Record<'_>) -> Result<(), SbError> {
        let line = sam::record::render_record(record, &self.references)?;
        self.sink.write_all(&line)?;
        self.sink.write_all(b"\n")?;
        Ok(())
    }

    /// Flush the sink.
    ///
    /// # Errors
    /// `Io` if the sink fails.
    pub fn flush(&mut self) -> Result<(), SbError> {
        self.sink.flush()?;
        Ok(())
    }

    /// Return the underlying sink.
    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: IoWrite> fmt::Debug for SamWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamWriter")
            .field("references", &self.references.len())
            .finish_non_exhaustive()
    }
}

/// Writes records in their binary wire form.
pub struct BamWriter<W: IoWrite> {
    sink: W,
}

impl<W: IoWrite> BamWriter<W> {
    /// Create a writer, emitting the binary header and reference table.
    ///
    /// # Errors
    /// `Io` if the sink fails.
    pub fn new(mut sink: W, header_text: &[u8], references: &[Reference]) -> Result<Self, SbError> {
        bam::header::write_header(&mut sink, header_text, references)?;
        Ok(BamWriter { sink })
    }

    /// Emit one record.
    ///
    /// # Errors
    /// `InvalidFormat` if the record cannot be represented; `Io` if the sink
    /// fails.
    pub fn write_record(&mut self, record: &Record<'_>) -> Result<(), SbError> {
        bam::record::write_record(record, &mut self.sink)
    }

    /// Flush the sink.
    ///
    /// # Errors
    /// `Io` if the sink fails.
    pub fn flush(&mut self) -> Result<(), SbError> {
        self.sink.flush()?;
        Ok(())
    }

    /// Return the underlying sink.
    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: IoWrite> fmt::Debug for BamWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BamWriter").finish_non_exhaustive()
    }
}

/// Writes records in their binary wire form through the block compressor.
pub struct BgzfWriter<W: IoWrite> {
    inner: bgzf::Writer<W>,
}

impl<W: IoWrite> BgzfWriter<W> {
    /// Create a writer: the binary header is compressed into its own block,
    /// records follow in subsequent blocks.
    ///
    /// # Errors
    /// `Io` if compressing or writing fails.
    pub fn new(
        sink: W,
        header_text: &[u8],
        references: &[Reference],
        level: Option<Compression>,
    ) -> Result<Self, SbError> {
        let mut inner = bgzf::Writer::with_level(sink, level.unwrap_or_default());
        inner.write(&bam::header::encode_header(header_text, references)?)?;
        inner.finish_block()?;
        Ok(BgzfWriter { inner })
    }

    /// Emit one record. A record that does not fit the in-progress block's
    /// remaining budget closes that block first, so records start at block
    /// boundaries where possible; a record larger than a whole block is
    /// split across several.
    ///
    /// # Errors
    /// `InvalidFormat` if the record cannot be represented; `Io` if
    /// compressing or writing fails.
    pub fn write_record(&mut self, record: &Record<'_>) -> Result<(), SbError> {
        let data = bam::record::encode_record(record)?;
        if data.len() < bgzf::MAX_DATA_SIZE && self.inner.block_remaining() < data.len() {
            self.inner.finish_block()?;
        }
        self.inner.write(&data)
    }

    /// Close the in-progress block.
    ///
    /// # Errors
    /// `Io` if compressing or writing fails.
    pub fn finish_block(&mut self) -> Result<(), SbError> {
        self.inner.finish_block()
    }

    /// Close the in-progress block, append the end-of-file sentinel and
    /// flush.
    ///
    /// # Errors
    /// `Io` if compressing or writing fails.
    pub fn finalize(&mut self) -> Result<(), SbError> {
        self.inner.finalize()
    }

    /// Finalize and return the underlying sink.
    ///
    /// # Errors
    /// `Io` if finalizing fails.
    pub fn into_inner(self) -> Result<W, SbError> {
        self.inner.into_inner()
    }
}

impl<W: IoWrite> fmt::Debug for BgzfWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BgzfWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;
    use crate::FileType;

    fn references() -> Vec<Reference> {
        vec![Reference::new("chr1", 1000, 0)]
    }

    fn mapped_record() -> Record<'static> {
        let refs = references();
        sam::record::parse_record(
            b"read1\t0\tchr1\t11\t60\t4M\t*\t0\t0\tACGT\tIIII\tNM:i:0",
            &refs,
        )
        .unwrap()
    }

    #[test]
    fn test_sam_writer() -> Result<(), SbError> {
        let mut writer = Writer::sam(Vec::new(), b"@HD\tVN:1.6\n", &references())?;
        writer.write_record(&mapped_record())?;
        writer.finalize()?;
        let out = match writer {
            Writer::Sam(inner) => inner.into_inner(),
            _ => unreachable!(),
        };
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\n"));
        assert!(text.ends_with("read1\t0\tchr1\t11\t60\t4M\t*\t0\t0\tACGT\tIIII\tNM:i:0\n"));
        Ok(())
    }

    #[test]
    fn test_bam_writer_readable() -> Result<(), SbError> {
        let mut writer = BamWriter::new(Vec::new(), b"", &references())?;
        writer.write_record(&mapped_record())?;
        let wire = writer.into_inner();

        let mut reader = Reader::from_slice(&wire)?;
        assert_eq!(reader.file_type(), FileType::Bam);
        assert_eq!(reader.references(), &references()[..]);
        let record = reader.next_record()?.expect("one record");
        assert_eq!(record.name.as_ref(), b"read1");
        assert_eq!(record.position, 10);
        assert!(reader.next_record()?.is_none());
        Ok(())
    }

    #[test]
    fn test_bgzf_writer_readable() -> Result<(), SbError> {
        let mut writer = BgzfWriter::new(Vec::new(), b"", &references(), None)?;
        writer.write_record(&mapped_record())?;
        let wire = writer.into_inner()?;
        assert!(bgzf::is_bgzf(&wire));
        assert!(wire.ends_with(&bgzf::EMPTY_BLOCK));

        let mut reader = Reader::from_slice(&wire)?;
        assert_eq!(reader.file_type(), FileType::Bgzf);
        let record = reader.next_record()?.expect("one record");
        assert_eq!(record.name.as_ref(), b"read1");
        assert!(reader.next_record()?.is_none());
        Ok(())
    }
}

use std::fmt;
use std::io::Read;

use crate::bam;
use crate::bgzf;
use crate::buffer::ReadBuffer;
use crate::filetype::FileType;
use crate::record::Record;
use crate::reference::Reference;
use crate::sam;
use crate::sam::SamHeader;
use crate::SbError;

/// Peek at the start of a stream to discover its format. The peeked bytes
/// are returned so they can be fed back into the consuming reader.
///
/// # Errors
/// `Io` if the source fails.
pub fn discover_stream<R: Read>(stream: &mut R) -> Result<(FileType, Vec<u8>), SbError> {
    let mut peek = [0u8; 4];
    let mut filled = 0;
    while filled < peek.len() {
        let amt_read = stream.read(&mut peek[filled..])?;
        if amt_read == 0 {
            break;
        }
        filled += amt_read;
    }
    let peek = peek[..filled].to_vec();
    Ok((FileType::from_magic(&peek), peek))
}

/// The source of decoded record bytes for the block-compressed path.
enum Chunks<'s> {
    Stream(bgzf::Reader<Box<dyn Read + 's>>),
    Slice(bgzf::BufferReader<'s>),
}

impl<'s> Chunks<'s> {
    fn buffer(&self) -> &[u8] {
        match self {
            Chunks::Stream(reader) => reader.buffer(),
            Chunks::Slice(reader) => reader.buffer(),
        }
    }

    fn consume(&mut self, amt: usize) -> &[u8] {
        match self {
            Chunks::Stream(reader) => reader.consume(amt),
            Chunks::Slice(reader) => reader.consume(amt),
        }
    }

    fn next_chunk(&mut self) -> Result<Option<&[u8]>, SbError> {
        match self {
            Chunks::Stream(reader) => reader.next_chunk(),
            Chunks::Slice(reader) => reader.next_chunk(),
        }
    }
}

enum Inner<'s> {
    Bgzf(Chunks<'s>),
    Bam(ReadBuffer<'s>),
    Sam(ReadBuffer<'s>),
}

/// Iterates alignment records out of any of the three supported formats.
///
/// The constructor peeks four bytes to discover the format, parses the
/// header and reference table, and then yields records in input order.
/// Records borrow the reader's decode buffers; a record that must outlive
/// the next call to [`Reader::next_record`] should be
/// [decoupled](Record::into_owned).
pub struct Reader<'s> {
    file_type: FileType,
    header_text: Vec<u8>,
    header: SamHeader,
    references: Vec<Reference>,
    inner: Inner<'s>,
}

impl<'s> Reader<'s> {
    /// Create a `Reader` over a byte stream.
    ///
    /// # Errors
    /// Any header-parse failure; `UnexpectedEof` if the input ends inside
    /// the header.
    pub fn new(mut input: Box<dyn Read + 's>) -> Result<Reader<'s>, SbError> {
        let (file_type, peek) = discover_stream(&mut input)?;
        match file_type {
            FileType::Bgzf => {
                Self::from_chunks(Chunks::Stream(bgzf::Reader::with_peek(input, peek)))
            }
            FileType::Bam => {
                let chained = Box::new(std::io::Cursor::new(peek).chain(input));
                Self::from_bam(ReadBuffer::new(chained)?)
            }
            FileType::Sam => {
                let chained = Box::new(std::io::Cursor::new(peek).chain(input));
                Self::from_sam(ReadBuffer::new(chained)?)
            }
        }
    }

    /// Create a `Reader` over an in-memory buffer; block framing and record
    /// fields are mapped out of the slice without copying where possible.
    ///
    /// # Errors
    /// As [`Reader::new`].
    pub fn from_slice(data: &'s [u8]) -> Result<Reader<'s>, SbError> {
        match FileType::from_magic(data) {
            FileType::Bgzf => Self::from_chunks(Chunks::Slice(bgzf::BufferReader::new(data))),
            FileType::Bam => Self::from_bam(ReadBuffer::from_slice(data)),
            FileType::Sam => Self::from_sam(ReadBuffer::from_slice(data)),
        }
    }

    fn from_chunks(mut chunks: Chunks<'s>) -> Result<Reader<'s>, SbError> {
        // the header may straddle block boundaries; keep inflating until it
        // parses or the input ends
        let (header_text, references) = loop {
            let parsed = bam::header::decode_header(chunks.buffer())
                .map(|(text, references, consumed)| (text.to_vec(), references, consumed));
            match parsed {
                Ok((text, references, consumed)) => {
                    let _ = chunks.consume(consumed);
                    break (text, references);
                }
                Err(e) if e.is_underflow() => {
                    if chunks.next_chunk()?.is_none() {
                        if chunks.buffer().is_empty() {
                            // nothing but the end-of-file sentinel
                            break (Vec::new(), Vec::new());
                        }
                        return Err(SbError::eof("input ended inside the header"));
                    }
                }
                Err(e) => return Err(e),
            }
        };
        let header = SamHeader::parse(&header_text)?;
        Ok(Reader {
            file_type: FileType::Bgzf,
            header_text,
            header,
            references,
            inner: Inner::Bgzf(chunks),
        })
    }

    fn from_bam(mut rb: ReadBuffer<'s>) -> Result<Reader<'s>, SbError> {
        let (header_text, references) = bam::header::read_header(&mut rb)?;
        let header = SamHeader::parse(&header_text)?;
        Ok(Reader {
            file_type: FileType::Bam,
            header_text,
            header,
            references,
            inner: Inner::Bam(rb),
        })
    }

    fn from_sam(mut rb: ReadBuffer<'s>) -> Result<Reader<'s>, SbError> {
        let mut header_text = Vec::new();
        loop {
            if rb.is_empty() {
                rb.refill()?;
                if rb.is_empty() && rb.eof() {
                    break;
                }
            }
            if rb[0] != b'@' {
                break;
            }
            match rb.read_line()? {
                Some(line) => {
                    header_text.extend_from_slice(line);
                    header_text.push(b'\n');
                }
                None => break,
            }
        }
        let header = SamHeader::parse(&header_text)?;
        let references = header.references()?;
        Ok(Reader {
            file_type: FileType::Sam,
            header_text,
            header,
            references,
            inner: Inner::Sam(rb),
        })
    }

    /// The discovered format of the input.
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// The raw header text.
    pub fn header_text(&self) -> &[u8] {
        &self.header_text
    }

    /// The parsed header.
    pub fn header(&self) -> &SamHeader {
        &self.header
    }

    /// The reference table, shared by every record this reader yields.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// The next record, or `None` once the input is exhausted.
    ///
    /// # Errors
    /// `UnexpectedEof` if the input stops mid-record; otherwise whatever the
    /// underlying codec surfaces.
    pub fn next_record(&mut self) -> Result<Option<Record<'_>>, SbError> {
        match &mut self.inner {
            Inner::Sam(rb) => match rb.read_line()? {
                None => Ok(None),
                Some(line) => sam::record::parse_record(line, &self.references).map(Some),
            },
            Inner::Bam(rb) => {
                if rb.is_empty() {
                    rb.refill()?;
                }
                if rb.is_empty() && rb.eof() {
                    return Ok(None);
                }
                rb.reserve(4)?;
                let total = match bam::record::framed_len(&rb[..])? {
                    Some(total) => total,
                    None => return Err(SbError::eof("alignment block size was truncated")),
                };
                rb.reserve(total)?;
                let (record, _) = bam::record::decode_record(rb.consume(total))?;
                Ok(Some(record))
            }
            Inner::Bgzf(chunks) => {
                let total = loop {
                    match bam::record::framed_len(chunks.buffer())? {
                        Some(total) if chunks.buffer().len() >= total => break total,
                        _ => {
                            if chunks.next_chunk()?.is_none() {
                                if chunks.buffer().is_empty() {
                                    return Ok(None);
                                }
                                return Err(SbError::eof(
                                    "input ended inside an alignment record",
                                ));
                            }
                        }
                    }
                };
                let (record, _) = bam::record::decode_record(chunks.consume(total))?;
                Ok(Some(record))
            }
        }
    }
}

impl<'s> fmt::Debug for Reader<'s> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("file_type", &self.file_type)
            .field("references", &self.references.len())
            .finish_non_exhaustive()
    }
}

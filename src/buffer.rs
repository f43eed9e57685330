use std::borrow::Cow;
use std::fmt;
use std::io::Read;
use std::ops::{Index, Range, RangeFrom, RangeFull, RangeTo};

use memchr::memchr;

use crate::{ErrorKind, SbError};

/// Default buffer size
pub const BUFFER_SIZE: usize = 10_000;

/// Wraps a `Box<Read>` to allow buffered reading
///
/// Primary differences from Rust's built-in `BufReader`:
///  - residual in buffer is maintained between refills
///  - the buffer is expanded when not enough data is present to parse
///  - EOF state is tracked
pub struct ReadBuffer<'s> {
    /// The primary buffer; reloaded from `reader` when needed
    buffer: Cow<'s, [u8]>,
    /// The stream to read from, if any
    reader: Option<Box<dyn Read + 's>>,
    /// The total amount of data read before byte 0 of this buffer
    pub reader_pos: u64,
    /// The total number of records consumed
    pub record_pos: u64,
    /// The amount of this buffer that's been marked as used
    consumed: usize,
    /// Is this the last chunk before EOF?
    eof: bool,
}

impl<'s> ReadBuffer<'s> {
    /// Create a new `ReadBuffer` from the `reader` using the default size.
    ///
    /// # Errors
    /// If the initial read fails, returns an `SbError`.
    pub fn new(reader: Box<dyn Read + 's>) -> Result<Self, SbError> {
        Self::with_capacity(BUFFER_SIZE, reader)
    }

    /// Create a new `ReadBuffer` from the `reader` using the size provided
    ///
    /// # Errors
    /// If the initial read fails, returns an `SbError`.
    pub fn with_capacity(
        buffer_size: usize,
        mut reader: Box<dyn Read + 's>,
    ) -> Result<Self, SbError> {
        let mut buffer = vec![0; buffer_size];
        let amt_read = reader.read(&mut buffer)?;
        buffer.truncate(amt_read);

        Ok(ReadBuffer {
            buffer: Cow::Owned(buffer),
            reader: Some(reader),
            reader_pos: 0,
            record_pos: 0,
            consumed: 0,
            eof: amt_read == 0,
        })
    }

    /// Create a `ReadBuffer` directly from a slice of data; no refilling occurs.
    pub fn from_slice(slice: &'s [u8]) -> Self {
        ReadBuffer {
            buffer: Cow::Borrowed(slice),
            reader: None,
            reader_pos: 0,
            record_pos: 0,
            consumed: 0,
            eof: true,
        }
    }

    /// Refill the buffer from the `reader`; if no data has been consumed the
    /// buffer's capacity is expanded before filling.
    ///
    /// # Errors
    /// If the read fails, returns an `SbError`.
    pub fn refill(&mut self) -> Result<(), SbError> {
        if self.eof {
            return Ok(());
        }
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => {
                self.eof = true;
                return Ok(());
            }
        };

        // move the residual to the front of the buffer
        let mut buffer = std::mem::replace(&mut self.buffer, Cow::Borrowed(&[])).into_owned();
        self.reader_pos += self.consumed as u64;
        let residual = buffer.len() - self.consumed;
        buffer.copy_within(self.consumed.., 0);
        buffer.truncate(residual);

        // if nothing was consumed but more data is wanted, expand the buffer
        let mut capacity = buffer.capacity();
        if self.consumed == 0 {
            buffer.reserve(2 * capacity.max(BUFFER_SIZE / 2));
            capacity = buffer.capacity();
        }
        self.consumed = 0;

        buffer.resize(capacity, 0);
        let result = reader.read(&mut buffer[residual..]);
        match result {
            Ok(amt_read) => {
                buffer.truncate(residual + amt_read);
                if amt_read == 0 {
                    self.eof = true;
                }
                self.buffer = Cow::Owned(buffer);
                Ok(())
            }
            Err(e) => {
                buffer.truncate(residual);
                self.buffer = Cow::Owned(buffer);
                Err(SbError::from(e).fill_pos(self))
            }
        }
    }

    /// Same result as `refill`, but ensures the buffer holds at least `amt`
    /// unconsumed bytes. Errors if not enough data is available.
    ///
    /// # Errors
    /// If the input ends before `amt` bytes are available, returns an
    /// `UnexpectedEof` error.
    pub fn reserve(&mut self, amt: usize) -> Result<(), SbError> {
        while self.len() < amt {
            if self.eof {
                return Err(
                    SbError::new(ErrorKind::UnexpectedEof, "data ended prematurely").fill_pos(self),
                );
            }
            self.refill()?;
        }
        Ok(())
    }

    /// Mark out the data in the buffer and return a reference to it.
    /// To be called once an entire record has been consumed.
    pub fn consume(&mut self, amt: usize) -> &[u8] {
        self.record_pos += 1;
        self.partial_consume(amt)
    }

    /// Mark out part of a record's data and return a reference to it.
    pub fn partial_consume(&mut self, amt: usize) -> &[u8] {
        let start = self.consumed;
        self.consumed += amt;
        &self.buffer[start..self.consumed]
    }

    /// True if this is the last chunk in the stream
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// True if no unconsumed data is left in the buffer
    pub fn is_empty(&self) -> bool {
        self.consumed >= self.buffer.len()
    }

    /// How much unconsumed data is in the buffer
    pub fn len(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    /// The byte position the reader is on
    pub fn get_byte_pos(&self) -> u64 {
        self.reader_pos + self.consumed as u64
    }

    /// Read a single line out of the buffer.
    ///
    /// Assumes all lines are terminated with a '\n' and an optional '\r'
    /// before so should handle almost all current text file formats, but
    /// may fail on older '\r' only formats.
    ///
    /// # Errors
    /// If refilling the buffer fails, returns an `SbError`.
    pub fn read_line(&mut self) -> Result<Option<&[u8]>, SbError> {
        if self.is_empty() {
            self.refill()?;
            if self.is_empty() {
                return Ok(None);
            }
        }
        // find the newline
        let (end, to_consume) = loop {
            if let Some(e) = memchr(b'\n', &self[..]) {
                if e > 0 && self[..e].last() == Some(&b'\r') {
                    break (e - 1, e + 1);
                }
                break (e, e + 1);
            } else if self.eof() {
                // we couldn't find a new line, but we are at the end of the
                // file so return everything to the EOF
                let l = self.len();
                break (l, l);
            }
            // couldn't find the character; load more
            self.refill()?;
        };

        let buffer = self.consume(to_consume);
        Ok(Some(&buffer[..end]))
    }
}

impl<'s> From<&'s [u8]> for ReadBuffer<'s> {
    fn from(slice: &'s [u8]) -> Self {
        ReadBuffer::from_slice(slice)
    }
}

impl<'s> fmt::Debug for ReadBuffer<'s> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadBuffer")
            .field("len", &self.len())
            .field("consumed", &self.consumed)
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

// It's not really possible to implement Index<(Bound, Bound)> or otherwise
// make this generic over all forms of Range* so we do a little hacky business
macro_rules! impl_index {
    ($index:ty, $return:ty) => {
        impl<'r> Index<$index> for ReadBuffer<'r> {
            type Output = $return;

            fn index(&self, index: $index) -> &Self::Output {
                &self.buffer[self.consumed..][index]
            }
        }
    };
}

impl_index!(Range<usize>, [u8]);
impl_index!(RangeFrom<usize>, [u8]);
impl_index!(RangeTo<usize>, [u8]);
impl_index!(RangeFull, [u8]);
impl_index!(usize, u8);

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::ReadBuffer;
    use crate::SbError;

    #[test]
    fn test_buffer() -> Result<(), SbError> {
        let reader = Box::new(Cursor::new(b"123456"));
        let mut rb = ReadBuffer::new(reader)?;

        assert_eq!(&rb[..], b"123456");
        let _ = rb.consume(3);
        assert_eq!(&rb[..], b"456");
        Ok(())
    }

    #[test]
    fn test_buffer_small() -> Result<(), SbError> {
        let reader = Box::new(Cursor::new(b"123456"));
        let mut rb = ReadBuffer::with_capacity(3, reader)?;

        assert_eq!(&rb[..], b"123");
        assert_eq!(rb.consume(3), b"123");
        assert_eq!(&rb[..], b"");

        rb.refill()?;
        assert_eq!(&rb[..], b"456");
        Ok(())
    }

    #[test]
    fn test_reserve_grows() -> Result<(), SbError> {
        let reader = Box::new(Cursor::new(b"0123456789"));
        let mut rb = ReadBuffer::with_capacity(2, reader)?;
        rb.reserve(10)?;
        assert_eq!(&rb[..10], b"0123456789");
        assert!(rb.reserve(11).is_err());
        Ok(())
    }

    #[test]
    fn test_read_lines() -> Result<(), SbError> {
        let reader = Box::new(Cursor::new(b"1\n2\n3"));
        let mut rb = ReadBuffer::with_capacity(3, reader)?;

        let mut ix = 0;
        while let Some(l) = rb.read_line()? {
            match ix {
                0 => assert_eq!(l, b"1"),
                1 => assert_eq!(l, b"2"),
                2 => assert_eq!(l, b"3"),
                _ => panic!("Invalid index; buffer tried to read too far"),
            }
            ix += 1;
        }
        assert_eq!(ix, 3);
        Ok(())
    }

    #[test]
    fn test_read_lines_from_slice() -> Result<(), SbError> {
        let mut rb = ReadBuffer::from_slice(b"1\r\n2\n3");
        assert_eq!(rb.read_line()?, Some(&b"1"[..]));
        assert_eq!(rb.read_line()?, Some(&b"2"[..]));
        assert_eq!(rb.read_line()?, Some(&b"3"[..]));
        assert_eq!(rb.read_line()?, None);
        Ok(())
    }
}

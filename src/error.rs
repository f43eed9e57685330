use std::error::Error;
use std::fmt;
use std::io::Error as IoError;
use std::num::{ParseFloatError, ParseIntError};
use std::str::Utf8Error;
use std::string::FromUtf8Error;

use crate::buffer::ReadBuffer;

/// Classifies an [`SbError`] by how the caller should react to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// On-wire bytes violate the format grammar or a checksum. Fatal to the
    /// current stream.
    InvalidFormat,
    /// A buffer decode needs more bytes. The caller may append data and retry
    /// from the same offset.
    BufferUnderflow,
    /// The input ended in the middle of a structure. Fatal.
    UnexpectedEof,
    /// The end-of-file sentinel was missing; the data may be truncated.
    Truncated,
    /// The underlying byte source or codec failed. Fatal.
    Io,
}

/// The error struct for sambam
#[derive(Debug)]
pub struct SbError {
    /// A succinct message describing the error
    pub msg: String,
    /// How the caller should react to the error
    pub kind: ErrorKind,
    /// At what byte in the input (if any), the error occured
    pub byte: Option<u64>,
    /// At what record in the input (if any), the error occured.
    ///
    /// Note, this may not be the same as the index of the iterator
    /// if the underlying file groups several records per block.
    pub record: Option<u64>,
    orig_err: Option<Box<dyn Error>>,
}

impl SbError {
    /// Create a new `SbError` with the given kind and a display message of `msg`
    pub fn new<T>(kind: ErrorKind, msg: T) -> Self
    where
        T: Into<String>,
    {
        SbError {
            msg: msg.into(),
            kind,
            byte: None,
            record: None,
            orig_err: None,
        }
    }

    /// An `InvalidFormat` error
    pub fn format<T>(msg: T) -> Self
    where
        T: Into<String>,
    {
        SbError::new(ErrorKind::InvalidFormat, msg)
    }

    /// A recoverable `BufferUnderflow` error
    pub fn underflow<T>(msg: T) -> Self
    where
        T: Into<String>,
    {
        SbError::new(ErrorKind::BufferUnderflow, msg)
    }

    /// An `UnexpectedEof` error
    pub fn eof<T>(msg: T) -> Self
    where
        T: Into<String>,
    {
        SbError::new(ErrorKind::UnexpectedEof, msg)
    }

    /// True if appending more input and retrying may resolve this error
    pub fn is_underflow(&self) -> bool {
        self.kind == ErrorKind::BufferUnderflow
    }

    /// Fill the positional error information from a ReadBuffer
    ///
    /// Used to display e.g. where a parsing error in a file occured.
    pub fn fill_pos(mut self, reader: &ReadBuffer) -> Self {
        self.record = Some(reader.record_pos);
        self.byte = Some(reader.get_byte_pos());
        self
    }
}

impl fmt::Display for SbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)?;
        if let Some(byte) = self.byte {
            write!(f, " (at byte {})", byte)?;
        }
        if let Some(record) = self.record {
            write!(f, " (record {})", record)?;
        }
        Ok(())
    }
}

impl Error for SbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.orig_err.as_ref().map(|c| {
            let b: &(dyn Error + 'static) = &**c;
            b
        })
    }
}

impl From<&str> for SbError {
    fn from(error: &str) -> Self {
        SbError::format(error)
    }
}

impl From<String> for SbError {
    fn from(msg: String) -> Self {
        SbError::format(msg)
    }
}

impl From<IoError> for SbError {
    fn from(error: IoError) -> Self {
        SbError {
            msg: error.to_string(),
            kind: ErrorKind::Io,
            byte: None,
            record: None,
            orig_err: Some(Box::new(error)),
        }
    }
}

impl From<flate2::CompressError> for SbError {
    fn from(error: flate2::CompressError) -> Self {
        SbError {
            msg: error.to_string(),
            kind: ErrorKind::Io,
            byte: None,
            record: None,
            orig_err: Some(Box::new(error)),
        }
    }
}

impl From<flate2::DecompressError> for SbError {
    fn from(error: flate2::DecompressError) -> Self {
        SbError {
            msg: error.to_string(),
            kind: ErrorKind::Io,
            byte: None,
            record: None,
            orig_err: Some(Box::new(error)),
        }
    }
}

impl From<FromUtf8Error> for SbError {
    fn from(error: FromUtf8Error) -> Self {
        SbError {
            msg: error.to_string(),
            kind: ErrorKind::InvalidFormat,
            byte: None,
            record: None,
            orig_err: Some(Box::new(error)),
        }
    }
}

impl From<Utf8Error> for SbError {
    fn from(error: Utf8Error) -> Self {
        SbError {
            msg: error.to_string(),
            kind: ErrorKind::InvalidFormat,
            byte: None,
            record: None,
            orig_err: Some(Box::new(error)),
        }
    }
}

impl From<ParseIntError> for SbError {
    fn from(error: ParseIntError) -> Self {
        SbError {
            msg: error.to_string(),
            kind: ErrorKind::InvalidFormat,
            byte: None,
            record: None,
            orig_err: Some(Box::new(error)),
        }
    }
}

impl From<ParseFloatError> for SbError {
    fn from(error: ParseFloatError) -> Self {
        SbError {
            msg: error.to_string(),
            kind: ErrorKind::InvalidFormat,
            byte: None,
            record: None,
            orig_err: Some(Box::new(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert!(SbError::underflow("x").is_underflow());
        assert!(!SbError::format("x").is_underflow());
        assert_eq!(SbError::eof("x").kind, ErrorKind::UnexpectedEof);
        let e: SbError = "bad data".into();
        assert_eq!(e.kind, ErrorKind::InvalidFormat);
    }

    #[test]
    fn test_display_positions() {
        let rb = ReadBuffer::from_slice(b"0123456789");
        let err = SbError::format("test").fill_pos(&rb);
        assert_eq!(format!("{}", err), "test (at byte 0) (record 0)");
    }
}

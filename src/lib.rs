#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_import_braces,
    unused_qualifications
)]
#![allow(clippy::module_name_repetitions)]
//! sambam reads and writes genomic alignment records in the three standard
//! interchange formats: the SAM text form, the binary BAM form, and the
//! BGZF block-compressed container that usually wraps BAM.
//!
//! The unified [`Reader`] discovers the format from the first bytes of the
//! input, parses the header and reference table, and iterates records with
//! the same semantics for all three formats:
//! ```
//! use sambam::Reader;
//!
//! let data = b"@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\n\
//!     r1\t0\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII\n";
//! let mut reader = Reader::from_slice(data)?;
//! assert_eq!(reader.references()[0].name, "chr1");
//! while let Some(record) = reader.next_record()? {
//!     assert_eq!(record.position, 0);
//! }
//! # Ok::<(), sambam::SbError>(())
//! ```
//!
//! [`Writer`] mirrors it on the output side, with one constructor per
//! format:
//! ```
//! use sambam::{Reader, Record, Reference, Writer};
//!
//! let reference = Reference::new("chr1", 1000, 0);
//! let mut writer = Writer::bgzf(Vec::new(), b"@HD\tVN:1.6\n", &[reference], None)?;
//! writer.write_record(&Record::default())?;
//! writer.finalize()?;
//! # Ok::<(), sambam::SbError>(())
//! ```
//!
//! The per-format codecs live in the [`bgzf`], [`bam`] and [`sam`] modules
//! for callers that need to work a layer down, e.g. to reuse the block
//! compressor for non-alignment data.

/// The binary record format
pub mod bam;
/// The block-compressed container
pub mod bgzf;
/// The buffer interface that underlies the stream readers
pub mod buffer;
/// Error handling
pub mod error;
/// File format inference
pub mod filetype;
/// The unified, format-discovering reader
pub mod reader;
/// The alignment record model
pub mod record;
/// Reference sequence descriptions
pub mod reference;
/// The text format
pub mod sam;
/// The per-format writers
pub mod writer;

pub use error::{ErrorKind, SbError};
pub use filetype::FileType;
pub use reader::{discover_stream, Reader};
pub use record::{Record, RecordFlags};
pub use reference::Reference;
pub use writer::Writer;

//! The tab-separated text alignment format.
//!
//! Header lines start with `@` and a two-letter group tag; record lines have
//! eleven fixed fields followed by typed tag columns. Positions are 1-based
//! on the wire and 0-based in memory.

/// Header-line parsing and rendering
pub mod header;
/// Record-line parsing and rendering
pub mod record;

use std::sync::LazyLock;

use regex::bytes::Regex;

pub use header::SamHeader;

/// One text CIGAR operation: a decimal length and an op letter.
pub(crate) static CIGAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("([0-9]+)([MIDNSHPX=])").unwrap());

/// One tab-delimited `XY:value` attribute in a header line.
pub(crate) static HEADER_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\t([A-Za-z][A-Za-z0-9]):([ -~]+)").unwrap());

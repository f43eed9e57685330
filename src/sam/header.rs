use super::HEADER_TAG_RE;
use crate::reference::Reference;
use crate::SbError;

/// A parsed header: a mapping from each two-letter group tag (`HD`, `SQ`,
/// `RG`, `PG`) to its entries, plus any `CO` comment lines. Each entry is an
/// ordered list of two-letter attribute/value pairs.
#[derive(Clone, Debug, Default)]
pub struct SamHeader {
    groups: Vec<(String, Vec<Vec<(String, String)>>)>,
    comments: Vec<String>,
}

impl SamHeader {
    /// Parse header text into its groups. Trailing NUL padding (as embedded
    /// header text sometimes carries) is ignored.
    ///
    /// # Errors
    /// `InvalidFormat` on lines that do not look like header lines.
    pub fn parse(text: &[u8]) -> Result<SamHeader, SbError> {
        let end = text.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        let mut header = SamHeader::default();
        for line in text[..end].split(|&b| b == b'\n') {
            let line = match line.last() {
                Some(b'\r') => &line[..line.len() - 1],
                _ => line,
            };
            if line.is_empty() {
                continue;
            }
            if line[0] != b'@' || line.len() < 3 {
                return Err(SbError::format(format!(
                    "malformed header line {:?}",
                    String::from_utf8_lossy(line)
                )));
            }
            let tag = std::str::from_utf8(&line[1..3])?.to_string();
            if tag == "CO" {
                let comment = line.get(4..).unwrap_or(b"");
                header
                    .comments
                    .push(String::from_utf8(comment.to_vec())?);
                continue;
            }
            let mut entry = Vec::new();
            for captures in HEADER_TAG_RE.captures_iter(line) {
                entry.push((
                    String::from_utf8(captures[1].to_vec())?,
                    String::from_utf8(captures[2].to_vec())?,
                ));
            }
            match header.groups.iter().position(|(t, _)| *t == tag) {
                Some(group) => header.groups[group].1.push(entry),
                None => header.groups.push((tag, vec![entry])),
            }
        }
        Ok(header)
    }

    /// The entries under a group tag, in file order.
    pub fn get(&self, tag: &str) -> Option<&[Vec<(String, String)>]> {
        self.groups
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, entries)| entries.as_slice())
    }

    /// The `CO` comment lines, in file order.
    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// True when the header holds no groups and no comments.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.comments.is_empty()
    }

    /// Lift the `SQ` entries into the reference list they describe.
    ///
    /// # Errors
    /// `InvalidFormat` if an `SQ` entry is missing `SN` or `LN`, or `LN` is
    /// not a number.
    pub fn references(&self) -> Result<Vec<Reference>, SbError> {
        let entries = match self.get("SQ") {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };
        let mut references = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let mut name = None;
            let mut length = None;
            let mut attributes = Vec::new();
            for (key, value) in entry {
                match key.as_str() {
                    "SN" => name = Some(value.clone()),
                    "LN" => length = Some(value.parse::<i32>()?),
                    _ => attributes.push((key.clone(), value.clone())),
                }
            }
            let name =
                name.ok_or_else(|| SbError::format("reference line is missing its SN name"))?;
            let length =
                length.ok_or_else(|| SbError::format("reference line is missing its LN length"))?;
            references.push(Reference {
                name,
                length,
                index: index as i32,
                attributes,
            });
        }
        Ok(references)
    }

    /// Render the header back into text, one line per entry.
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (tag, entries) in &self.groups {
            for entry in entries {
                out.push(b'@');
                out.extend_from_slice(tag.as_bytes());
                for (key, value) in entry {
                    out.push(b'\t');
                    out.extend_from_slice(key.as_bytes());
                    out.push(b':');
                    out.extend_from_slice(value.as_bytes());
                }
                out.push(b'\n');
            }
        }
        for comment in &self.comments {
            out.extend_from_slice(b"@CO\t");
            out.extend_from_slice(comment.as_bytes());
            out.push(b'\n');
        }
        out
    }
}

/// Combine header text with a reference list: the text is kept as-is (minus
/// NUL padding) and an `@SQ` line is appended for every reference the text
/// does not already name.
pub fn pack_text(text: &[u8], references: &[Reference]) -> Vec<u8> {
    let end = text.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    let mut out = text[..end].to_vec();
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    for reference in references {
        if !has_sq_line(&out, &reference.name) {
            out.extend_from_slice(reference.sq_line().as_bytes());
            out.push(b'\n');
        }
    }
    out
}

fn has_sq_line(text: &[u8], name: &str) -> bool {
    let field = format!("SN:{}", name);
    text.split(|&b| b == b'\n')
        .filter(|line| line.starts_with(b"@SQ"))
        .any(|line| {
            line.split(|&b| b == b'\t')
                .any(|column| column == field.as_bytes())
        })
}

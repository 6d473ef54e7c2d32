//! Cross-reference anchors.
//!
//! An anchor is the section `startxref` points at: either a classic
//! `xref` table followed by a `trailer` dictionary, or an indirect stream
//! object with `/Type /XRef`. Each anchor may name the previous revision's
//! anchor through `/Prev`; walking those pointers from the last one yields
//! the document's revision chain.

use crate::error::{Error, Result};
use crate::lexer::skip_ws;
use crate::object::{Dict, Object, ObjectRef};
use crate::parser::{parse_indirect_object, parse_object};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Limit on `/Prev` hops, guards against cyclic chains.
const MAX_CHAIN_DEPTH: usize = 100;

/// Which cross-reference form an anchor uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XrefKind {
    /// `xref` keyword, subsections of 20-byte entries, `trailer` dictionary
    Table,
    /// Stream object with `/Type /XRef` and packed binary entries
    Stream,
}

/// One parsed cross-reference anchor.
#[derive(Debug, Clone)]
pub struct Anchor {
    /// Byte offset where the section begins
    pub offset: u64,
    /// Classic table or stream
    pub kind: XrefKind,
    /// Trailer dictionary (the stream dictionary for xref streams)
    pub trailer: Dict,
}

impl Anchor {
    /// `/Size`, or 0 when absent.
    pub fn size(&self) -> u32 {
        self.trailer
            .get("Size")
            .and_then(Object::as_integer)
            .map(|s| s.max(0) as u32)
            .unwrap_or(0)
    }

    /// `/Prev`, the previous revision's anchor offset.
    pub fn prev(&self) -> Option<u64> {
        self.trailer
            .get("Prev")
            .and_then(Object::as_integer)
            .filter(|p| *p >= 0)
            .map(|p| p as u64)
    }

    /// `/Root` reference.
    pub fn root(&self) -> Option<ObjectRef> {
        self.trailer.get("Root").and_then(Object::as_reference)
    }

    /// `/Info` reference.
    pub fn info(&self) -> Option<ObjectRef> {
        self.trailer.get("Info").and_then(Object::as_reference)
    }
}

/// Writer-side view of the most recent anchor.
///
/// `prev_offset` is the anchor the next appended revision links back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrefState {
    /// Offset of the latest cross-reference section
    pub prev_offset: u64,
    /// Form of the latest section; appended sections keep it
    pub kind: XrefKind,
    /// `/Size` of the latest revision
    pub size: u32,
    /// Document catalog
    pub root: ObjectRef,
    /// Document information dictionary
    pub info: Option<ObjectRef>,
}

impl XrefState {
    /// Whether appended sections are xref streams.
    pub fn is_stream(&self) -> bool {
        self.kind == XrefKind::Stream
    }
}

/// Locate the offset that the last `startxref` keyword points to.
///
/// # Errors
///
/// Returns [`Error::XrefParse`] when there is no `startxref` or no offset
/// after it.
pub fn find_xref_offset(data: &[u8]) -> Result<u64> {
    let keyword = b"startxref";
    let pos = data
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or_else(|| Error::XrefParse("startxref not found".to_string()))?;

    let after = &data[pos + keyword.len()..];
    let (after, _) = skip_ws(after).map_err(|_| Error::XrefParse("bad startxref".to_string()))?;
    let digits: Vec<u8> = after.iter().take_while(|c| c.is_ascii_digit()).copied().collect();
    if digits.is_empty() {
        return Err(Error::XrefParse("could not parse startxref offset".to_string()));
    }
    crate::utils::latin1_decode(&digits)
        .parse::<u64>()
        .map_err(|e| Error::XrefParse(format!("startxref offset: {}", e)))
}

/// Decide what kind of section starts at `offset`.
///
/// # Errors
///
/// Returns [`Error::XrefParse`] when the bytes are neither an `xref` keyword
/// nor an indirect object header.
pub fn detect_kind(data: &[u8], offset: u64) -> Result<XrefKind> {
    let at = data
        .get(offset as usize..)
        .ok_or_else(|| Error::XrefParse(format!("startxref offset {} beyond end of file", offset)))?;

    if at.starts_with(b"xref") && at.get(4).map_or(false, |c| crate::lexer::is_whitespace(*c)) {
        return Ok(XrefKind::Table);
    }

    let head = &at[..at.len().min(40)];
    if is_object_header(head) {
        return Ok(XrefKind::Stream);
    }

    Err(Error::XrefParse(format!(
        "offset {} is neither an xref table nor an object header",
        offset
    )))
}

fn is_object_header(head: &[u8]) -> bool {
    use crate::lexer::{token, Token};
    let Ok((rest, Token::Integer(_))) = token(head) else {
        return false;
    };
    let Ok((rest, Token::Integer(_))) = token(rest) else {
        return false;
    };
    matches!(token(rest), Ok((_, Token::ObjStart)))
}

/// Parse the anchor at `offset`.
///
/// # Errors
///
/// Returns [`Error::XrefParse`] when the section or its trailer cannot be
/// read.
pub fn read_anchor(data: &[u8], offset: u64) -> Result<Anchor> {
    let kind = detect_kind(data, offset)?;
    log::debug!("Anchor at {} is {:?}", offset, kind);

    let trailer = match kind {
        XrefKind::Table => read_table_trailer(data, offset as usize)?,
        XrefKind::Stream => {
            let (_, (id, obj)) = parse_indirect_object(&data[offset as usize..]).map_err(|e| {
                Error::XrefParse(format!("xref stream object at {}: {:?}", offset, e))
            })?;
            let dict = match obj {
                Object::Stream { dict, .. } => dict,
                other => {
                    return Err(Error::XrefParse(format!(
                        "object {} at {} is a {}, not an xref stream",
                        id,
                        offset,
                        other.type_name()
                    )))
                },
            };
            match dict.get("Type").and_then(Object::as_name) {
                Some("XRef") | None => dict,
                Some(other) => {
                    return Err(Error::XrefParse(format!("expected /Type /XRef, got /{}", other)))
                },
            }
        },
    };

    Ok(Anchor {
        offset,
        kind,
        trailer,
    })
}

fn read_table_trailer(data: &[u8], offset: usize) -> Result<Dict> {
    let keyword = b"trailer";
    let rel = data[offset..]
        .windows(keyword.len())
        .position(|w| w == keyword)
        .ok_or_else(|| Error::XrefParse(format!("trailer not found after xref at {}", offset)))?;
    let start = offset + rel + keyword.len();
    match parse_object(&data[start..]) {
        Ok((_, Object::Dictionary(dict))) => Ok(dict),
        _ => Err(Error::XrefParse(format!("unreadable trailer dictionary at {}", start))),
    }
}

/// Parse the trailing anchor into writer state.
///
/// # Errors
///
/// Returns [`Error::XrefParse`] when the anchor is unreadable or has no
/// `/Root`.
pub fn read_xref_state(data: &[u8]) -> Result<XrefState> {
    let offset = find_xref_offset(data)?;
    let anchor = read_anchor(data, offset)?;
    let root = anchor
        .root()
        .ok_or_else(|| Error::XrefParse("trailer has no /Root".to_string()))?;
    Ok(XrefState {
        prev_offset: anchor.offset,
        kind: anchor.kind,
        size: anchor.size(),
        root,
        info: anchor.info(),
    })
}

/// Walk the `/Prev` chain from the last anchor, newest first.
///
/// # Errors
///
/// Returns [`Error::XrefParse`] on an unreadable anchor, a cycle, or a chain
/// longer than 100 sections.
pub fn anchor_chain(data: &[u8]) -> Result<Vec<Anchor>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(find_xref_offset(data)?);

    while let Some(offset) = next {
        if !seen.insert(offset) {
            return Err(Error::XrefParse(format!("cyclic /Prev chain at {}", offset)));
        }
        if chain.len() >= MAX_CHAIN_DEPTH {
            return Err(Error::XrefParse(format!(
                "/Prev chain deeper than {}",
                MAX_CHAIN_DEPTH
            )));
        }
        let anchor = read_anchor(data, offset)?;
        next = anchor.prev();
        chain.push(anchor);
    }

    Ok(chain)
}

/// Cross-reference entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XRefEntryType {
    /// Free slot
    Free,
    /// Object stored at a byte offset
    Uncompressed,
    /// Object inside an object stream
    Compressed,
}

/// Cross-reference entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XRefEntry {
    /// Type of entry
    pub entry_type: XRefEntryType,
    /// Byte offset (uncompressed) or containing stream number (compressed)
    pub offset: u64,
    /// Generation (uncompressed) or index within the object stream (compressed)
    pub generation: u16,
}

impl XRefEntry {
    /// Entry for an object at a byte offset.
    pub fn uncompressed(offset: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Uncompressed,
            offset,
            generation,
        }
    }

    /// Entry for an object inside an object stream.
    pub fn compressed(stream_obj_num: u64, index: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Compressed,
            offset: stream_obj_num,
            generation: index,
        }
    }

    /// Free entry.
    pub fn free(next_free: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Free,
            offset: next_free,
            generation,
        }
    }

    /// Whether the slot holds a live object.
    pub fn in_use(&self) -> bool {
        self.entry_type != XRefEntryType::Free
    }
}

/// Merged cross-reference table over every revision.
#[derive(Debug, Clone, Default)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Dict,
}

impl CrossRefTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for an object number.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// Newest trailer dictionary.
    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Object numbers with an entry, ascending.
    pub fn object_numbers(&self) -> Vec<u32> {
        let mut nums: Vec<u32> = self.entries.keys().copied().collect();
        nums.sort_unstable();
        nums
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add entries from an older section; existing (newer) entries win.
    fn merge_older(&mut self, older: HashMap<u32, XRefEntry>) {
        for (num, entry) in older {
            self.entries.entry(num).or_insert(entry);
        }
    }
}

/// Load the merged cross-reference table of every revision.
///
/// # Errors
///
/// Returns [`Error::XrefParse`] when the chain or a section is unreadable.
pub fn load_cross_refs(data: &[u8]) -> Result<CrossRefTable> {
    let chain = anchor_chain(data)?;
    let mut table = CrossRefTable::new();

    for (i, anchor) in chain.iter().enumerate() {
        let entries = match anchor.kind {
            XrefKind::Table => parse_table_entries(data, anchor.offset as usize)?,
            XrefKind::Stream => parse_stream_entries(data, anchor)?,
        };
        log::trace!("Section at {} contributes {} entries", anchor.offset, entries.len());
        if i == 0 {
            table.trailer = anchor.trailer.clone();
        }
        table.merge_older(entries);
    }

    Ok(table)
}

/// Parse the subsections of a classic table. Lenient about malformed rows:
/// they become free entries so numbering stays aligned.
fn parse_table_entries(data: &[u8], offset: usize) -> Result<HashMap<u32, XRefEntry>> {
    let end = data[offset..]
        .windows(7)
        .position(|w| w == b"trailer")
        .map(|p| offset + p)
        .unwrap_or(data.len());
    let text = crate::utils::latin1_decode(&data[offset..end]);
    let mut lines = text.split(|c: char| c == '\r' || c == '\n').map(str::trim).filter(|l| !l.is_empty());

    match lines.next() {
        Some(first) if first.starts_with("xref") => {},
        _ => return Err(Error::XrefParse(format!("expected xref keyword at {}", offset))),
    }

    let mut entries = HashMap::new();
    let mut lines = lines.peekable();
    while let Some(header) = lines.next() {
        let parts: Vec<&str> = header.split_whitespace().collect();
        if parts.len() != 2 {
            log::warn!("Skipping malformed xref subsection header {:?}", header);
            continue;
        }
        let start: u32 = parts[0]
            .parse()
            .map_err(|_| Error::XrefParse(format!("bad subsection start {:?}", parts[0])))?;
        let count: u32 = parts[1]
            .parse()
            .map_err(|_| Error::XrefParse(format!("bad subsection count {:?}", parts[1])))?;

        for i in 0..count {
            let Some(line) = lines.next() else {
                log::warn!("Subsection {} ended after {} of {} entries", start, i, count);
                break;
            };
            let fields: Vec<&str> = line.split_whitespace().collect();
            let entry = match (fields.first(), fields.get(1), fields.get(2)) {
                (Some(off), Some(gen), Some(flag)) => {
                    match (off.parse::<u64>(), gen.parse::<u16>()) {
                        (Ok(off), Ok(gen)) if flag.starts_with('n') => XRefEntry::uncompressed(off, gen),
                        (Ok(off), Ok(gen)) => XRefEntry::free(off, gen),
                        _ => XRefEntry::free(0, 65535),
                    }
                },
                _ => {
                    log::warn!("Malformed xref entry {:?}", line);
                    XRefEntry::free(0, 65535)
                },
            };
            entries.insert(start + i, entry);
        }
    }

    Ok(entries)
}

/// Decode the packed entries of an xref stream.
fn parse_stream_entries(data: &[u8], anchor: &Anchor) -> Result<HashMap<u32, XRefEntry>> {
    let (_, (_, obj)) = parse_indirect_object(&data[anchor.offset as usize..])
        .map_err(|e| Error::XrefParse(format!("xref stream at {}: {:?}", anchor.offset, e)))?;
    let decoded = obj
        .decode_stream_data()
        .map_err(|e| Error::XrefParse(format!("xref stream at {}: {}", anchor.offset, e)))?;

    let widths: Vec<usize> = anchor
        .trailer
        .get("W")
        .and_then(Object::as_array)
        .map(|w| w.iter().filter_map(Object::as_integer).map(|v| v.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|w| *w > 8) {
        return Err(Error::XrefParse(format!("invalid /W {:?}", widths)));
    }
    let entry_size: usize = widths.iter().sum();
    if entry_size == 0 {
        return Err(Error::XrefParse("zero-width xref entries".to_string()));
    }

    let ranges: Vec<(u32, u32)> = match anchor.trailer.get("Index").and_then(Object::as_array) {
        Some(index) => index
            .chunks(2)
            .filter_map(|pair| match pair {
                [s, c] => Some((s.as_integer()? as u32, c.as_integer()? as u32)),
                _ => None,
            })
            .collect(),
        None => vec![(0, anchor.size())],
    };

    let field = |chunk: &[u8], from: usize, width: usize, default: u64| -> u64 {
        if width == 0 {
            default
        } else {
            BigEndian::read_uint(&chunk[from..from + width], width)
        }
    };

    let mut entries = HashMap::new();
    let mut rows = decoded.chunks_exact(entry_size);
    for (start, count) in ranges {
        for i in 0..count {
            let row = rows.next().ok_or_else(|| {
                Error::XrefParse(format!("truncated xref stream at {}", anchor.offset))
            })?;
            let kind = field(row, 0, widths[0], 1);
            let second = field(row, widths[0], widths[1], 0);
            let third = field(row, widths[0] + widths[1], widths[2], 0) as u16;
            let entry = match kind {
                0 => XRefEntry::free(second, third),
                1 => XRefEntry::uncompressed(second, third),
                2 => XRefEntry::compressed(second, third),
                other => {
                    log::warn!("Ignoring xref entry type {} for object {}", other, start + i);
                    continue;
                },
            };
            entries.insert(start + i, entry);
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic_doc() -> Vec<u8> {
        let mut doc = b"%PDF-1.4\n".to_vec();
        let o1 = doc.len();
        doc.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let xref = doc.len();
        doc.extend_from_slice(b"xref\n0 2\n0000000000 65535 f \n");
        doc.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
        doc.extend_from_slice(b"trailer\n<< /Size 2 /Root 1 0 R /Info 9 0 R >>\n");
        doc.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
        doc
    }

    #[test]
    fn test_find_xref_offset_uses_last_keyword() {
        let data = b"startxref\n5\n%%EOF\n...startxref\r\n  42\n%%EOF";
        assert_eq!(find_xref_offset(data).unwrap(), 42);
    }

    #[test]
    fn test_find_xref_offset_missing() {
        let err = find_xref_offset(b"%PDF-1.4 nothing here").unwrap_err();
        assert!(matches!(err, Error::XrefParse(_)));
        assert!(find_xref_offset(b"startxref\n%%EOF").is_err());
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(detect_kind(b"xref\n0 1\n", 0).unwrap(), XrefKind::Table);
        assert_eq!(detect_kind(b"12 0 obj\n<<>>", 0).unwrap(), XrefKind::Stream);
        assert!(detect_kind(b"garbage", 0).is_err());
        assert!(detect_kind(b"xref", 99).is_err());
    }

    #[test]
    fn test_read_xref_state_classic() {
        let doc = classic_doc();
        let state = read_xref_state(&doc).unwrap();
        assert_eq!(state.kind, XrefKind::Table);
        assert_eq!(state.size, 2);
        assert_eq!(state.root, ObjectRef::new(1, 0));
        assert_eq!(state.info, Some(ObjectRef::new(9, 0)));
        assert_eq!(&doc[state.prev_offset as usize..state.prev_offset as usize + 4], b"xref");
    }

    #[test]
    fn test_table_entries() {
        let doc = classic_doc();
        let table = load_cross_refs(&doc).unwrap();
        assert_eq!(table.len(), 2);
        assert!(!table.get(0).unwrap().in_use());
        assert_eq!(table.get(1).unwrap().offset, 9);
        assert_eq!(table.trailer().get("Size").and_then(Object::as_integer), Some(2));
    }

    #[test]
    fn test_anchor_chain_single() {
        let chain = anchor_chain(&classic_doc()).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].prev(), None);
    }

    #[test]
    fn test_anchor_chain_cycle_is_error() {
        let mut doc = b"%PDF-1.4\n".to_vec();
        let xref = doc.len();
        doc.extend_from_slice(b"xref\n0 0\n");
        doc.extend_from_slice(format!("trailer\n<< /Size 1 /Root 1 0 R /Prev {} >>\n", xref).as_bytes());
        doc.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
        assert!(matches!(anchor_chain(&doc), Err(Error::XrefParse(_))));
    }

    #[test]
    fn test_stream_entries() {
        let mut packed = Vec::new();
        packed.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 9, 0, 0]);
        packed.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 0, 7, 0, 3]);
        let mut doc = b"%PDF-1.5\n".to_vec();
        let xref = doc.len();
        doc.extend_from_slice(
            format!(
                "5 0 obj\n<< /Type /XRef /W [1 8 2] /Index [3 2] /Size 6 /Root 1 0 R /Length {} >>\nstream\n",
                packed.len()
            )
            .as_bytes(),
        );
        doc.extend_from_slice(&packed);
        doc.extend_from_slice(b"\nendstream\nendobj\n");
        doc.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());

        let state = read_xref_state(&doc).unwrap();
        assert!(state.is_stream());
        assert_eq!(state.size, 6);

        let table = load_cross_refs(&doc).unwrap();
        assert_eq!(table.get(3), Some(&XRefEntry::uncompressed(9, 0)));
        assert_eq!(table.get(4), Some(&XRefEntry::compressed(7, 3)));
        assert_eq!(table.object_numbers(), vec![3, 4]);
    }
}

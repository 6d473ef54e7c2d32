//! Cross-reference sections for appended revisions.
//!
//! Both forms list only the objects written in the revision; everything
//! else is reached through `/Prev`.

use super::object_serializer::ObjectSerializer;
use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::BTreeMap;

/// In-use entries of one revision: object number to (offset, generation).
pub type SectionEntries = BTreeMap<u32, (u64, u16)>;

/// Trailer values written with each section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailerFields {
    /// New `/Size`
    pub size: u32,
    /// `/Root`
    pub root: ObjectRef,
    /// `/Info`, omitted when absent
    pub info: Option<ObjectRef>,
    /// Offset of the previous section
    pub prev: u64,
}

/// Split sorted object numbers into `(first, count)` runs of consecutive
/// numbers.
pub fn group_contiguous(nums: impl IntoIterator<Item = u32>) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for n in nums {
        match runs.last_mut() {
            Some((first, count)) if *first + *count == n => *count += 1,
            _ => runs.push((n, 1)),
        }
    }
    runs
}

/// Classic section: `xref`, subsections of 20-byte entries, `trailer`
/// and the `startxref` footer pointing at `xref_offset`.
pub fn classic_section(entries: &SectionEntries, trailer: &TrailerFields, xref_offset: u64) -> Vec<u8> {
    let mut out = b"xref\n".to_vec();
    for (first, count) in group_contiguous(entries.keys().copied()) {
        out.extend_from_slice(format!("{} {}\n", first, count).as_bytes());
        for n in first..first + count {
            if let Some((offset, gen)) = entries.get(&n) {
                out.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes());
            }
        }
    }

    let mut dict = Dict::new();
    dict.insert("Size".to_string(), Object::Integer(trailer.size as i64));
    dict.insert("Root".to_string(), Object::Reference(trailer.root));
    dict.insert("Prev".to_string(), Object::Integer(trailer.prev as i64));
    if let Some(info) = trailer.info {
        dict.insert("Info".to_string(), Object::Reference(info));
    }

    out.extend_from_slice(b"trailer\n");
    out.extend_from_slice(&ObjectSerializer::new().serialize(&Object::Dictionary(dict)));
    out.push(b'\n');
    out.extend_from_slice(&footer(xref_offset));
    out
}

/// Xref stream section: an indirect object `xref_id` at `own_offset` whose
/// entries include itself, followed by the `startxref` footer.
///
/// # Errors
///
/// Returns [`Error::InvalidState`] when a widths entry is larger than 8
/// bytes or a value does not fit its field.
pub fn stream_section(
    xref_id: ObjectRef,
    own_offset: u64,
    entries: &SectionEntries,
    trailer: &TrailerFields,
    widths: [usize; 3],
) -> Result<Vec<u8>> {
    let mut all = entries.clone();
    all.insert(xref_id.id, (own_offset, xref_id.gen));

    let runs = group_contiguous(all.keys().copied());
    let mut packed = Vec::with_capacity(all.len() * widths.iter().sum::<usize>());
    for (first, count) in &runs {
        for n in *first..*first + *count {
            if let Some((offset, gen)) = all.get(&n) {
                pack_field(&mut packed, 1, widths[0])?;
                pack_field(&mut packed, *offset, widths[1])?;
                pack_field(&mut packed, *gen as u64, widths[2])?;
            }
        }
    }

    let int = |v: u64| Object::Integer(v as i64);
    let mut dict = Dict::new();
    dict.insert("Type".to_string(), Object::Name("XRef".to_string()));
    dict.insert("W".to_string(), Object::Array(widths.iter().map(|w| int(*w as u64)).collect()));
    dict.insert(
        "Index".to_string(),
        Object::Array(
            runs.iter()
                .flat_map(|(first, count)| [int(*first as u64), int(*count as u64)])
                .collect(),
        ),
    );
    dict.insert("Size".to_string(), int(trailer.size as u64));
    dict.insert("Root".to_string(), Object::Reference(trailer.root));
    if let Some(info) = trailer.info {
        dict.insert("Info".to_string(), Object::Reference(info));
    }
    dict.insert("Prev".to_string(), int(trailer.prev));

    let stream = Object::Stream {
        dict,
        data: bytes::Bytes::from(packed),
    };
    let mut out = ObjectSerializer::new().serialize_indirect(xref_id, &stream);
    out.extend_from_slice(&footer(own_offset));
    Ok(out)
}

fn pack_field(out: &mut Vec<u8>, value: u64, width: usize) -> Result<()> {
    if width == 0 {
        return Ok(());
    }
    if width > 8 || (width < 8 && value >> (8 * width) != 0) {
        return Err(Error::InvalidState(format!(
            "value {} does not fit a {}-byte xref field",
            value, width
        )));
    }
    out.write_uint::<BigEndian>(value, width)?;
    Ok(())
}

fn footer(anchor: u64) -> Vec<u8> {
    format!("startxref\n{}\n%%EOF\n", anchor).into_bytes()
}

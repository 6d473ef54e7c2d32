//! Incremental writer.
//!
//! Appends revised content-stream objects to the end of a document together
//! with a new cross-reference section whose `/Prev` links to the previous
//! one. The original bytes are never touched, so every returned buffer is
//! itself a complete document.
//!
//! ```text
//! Closed --open(bytes, mapping)--> Open --apply_edits(batch)--> Open
//!    ^                               |
//!    +------------close()------------+
//! ```

use crate::error::{Error, Result};
use crate::mapping::DocumentMapping;
use crate::object::{Object, ObjectRef};
use crate::writer::{
    classic_section, stream_object, stream_section, ObjectSerializer, SectionEntries, TrailerFields,
};
use crate::xref::{read_xref_state, XrefState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where an edit goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditTarget {
    /// An explicit content-stream object
    Ref(ObjectRef),
    /// Content stream `stream` of page `page`, looked up in the mapping
    Slot {
        /// Page index
        page: usize,
        /// Stream index within the page
        stream: usize,
    },
}

/// Replacement text for one content stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    /// Target stream
    pub target: EditTarget,
    /// New stream text (Latin-1)
    pub text: String,
}

impl Edit {
    /// Edit addressed by object reference.
    pub fn object(id: ObjectRef, text: impl Into<String>) -> Self {
        Self {
            target: EditTarget::Ref(id),
            text: text.into(),
        }
    }

    /// Edit addressed by page and stream index.
    pub fn slot(page: usize, stream: usize, text: impl Into<String>) -> Self {
        Self {
            target: EditTarget::Slot { page, stream },
            text: text.into(),
        }
    }
}

struct OpenState {
    buffer: Vec<u8>,
    xref: XrefState,
    mapping: DocumentMapping,
}

enum WriterState {
    Closed,
    Open(Box<OpenState>),
}

/// Closed/Open incremental writer.
pub struct IncrementalWriter {
    state: WriterState,
    xref_widths: [usize; 3],
}

impl Default for IncrementalWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalWriter {
    /// Closed writer with `[1, 8, 2]` xref stream widths.
    pub fn new() -> Self {
        Self {
            state: WriterState::Closed,
            xref_widths: [1, 8, 2],
        }
    }

    /// Set the field widths used for appended xref streams.
    pub fn with_xref_widths(mut self, widths: [usize; 3]) -> Self {
        self.xref_widths = widths;
        self
    }

    /// Whether [`open`](Self::open) has succeeded.
    pub fn is_open(&self) -> bool {
        matches!(self.state, WriterState::Open(_))
    }

    /// Read the trailing anchor of `bytes` and keep `mapping` for slot
    /// lookups. Returns the mapped page count.
    ///
    /// Opening an already open writer changes nothing.
    ///
    /// # Errors
    ///
    /// [`Error::XrefParse`] when the last anchor cannot be read; the writer
    /// stays closed.
    pub fn open(&mut self, bytes: Vec<u8>, mapping: DocumentMapping) -> Result<usize> {
        if let WriterState::Open(open) = &self.state {
            log::debug!("Incremental writer already open, ignoring reopen");
            return Ok(open.mapping.page_count());
        }

        let xref = read_xref_state(&bytes)?;
        log::debug!(
            "Opened incremental writer: {:?} anchor at {}, /Size {}",
            xref.kind,
            xref.prev_offset,
            xref.size
        );
        let pages = mapping.page_count();
        self.state = WriterState::Open(Box::new(OpenState {
            buffer: bytes,
            xref,
            mapping,
        }));
        Ok(pages)
    }

    /// Drop the retained buffer and return to Closed.
    pub fn close(&mut self) {
        self.state = WriterState::Closed;
    }

    /// Anchor state the next revision links back to.
    pub fn state(&self) -> Option<&XrefState> {
        match &self.state {
            WriterState::Open(open) => Some(&open.xref),
            WriterState::Closed => None,
        }
    }

    /// Mapping passed to [`open`](Self::open).
    pub fn mapping(&self) -> Option<&DocumentMapping> {
        match &self.state {
            WriterState::Open(open) => Some(&open.mapping),
            WriterState::Closed => None,
        }
    }

    /// Latest full buffer.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.state {
            WriterState::Open(open) => Some(&open.buffer),
            WriterState::Closed => None,
        }
    }

    /// Resolve each edit to an object, append one revision and return a
    /// copy of the new buffer.
    ///
    /// An empty batch returns a copy of the current buffer. When several
    /// edits hit the same object, the last one wins.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] when the writer is closed.
    /// - [`Error::EditResolution`] when any edit names a stream the mapping
    ///   does not know. Nothing is written in that case.
    pub fn apply_edits(&mut self, edits: &[Edit]) -> Result<Vec<u8>> {
        self.apply_revision(edits, &[])
    }

    /// Append stream edits and replaced non-stream objects as one revision.
    ///
    /// `objects` are written as given. They must not be content streams
    /// named by the mapping; those go through `edits`.
    ///
    /// # Errors
    ///
    /// Same as [`apply_edits`](Self::apply_edits). An object that is a
    /// mapped content stream, or object number 0, is an
    /// [`Error::EditResolution`].
    pub fn apply_revision(&mut self, edits: &[Edit], objects: &[(ObjectRef, Object)]) -> Result<Vec<u8>> {
        let widths = self.xref_widths;
        let open = match &mut self.state {
            WriterState::Open(open) => open,
            WriterState::Closed => {
                return Err(Error::InvalidState("apply_edits called before open".to_string()))
            },
        };
        if edits.is_empty() && objects.is_empty() {
            return Ok(open.buffer.clone());
        }

        let mut bodies = BTreeMap::new();
        let serializer = ObjectSerializer::new();
        for (id, obj) in objects {
            if id.id == 0 || open.mapping.contains(*id) {
                return Err(Error::EditResolution(format!("{} cannot be replaced as a plain object", id)));
            }
            bodies.insert(id.id, (*id, serializer.serialize_indirect(*id, obj)));
        }
        for (num, (id, text)) in resolve_edits(&open.mapping, edits)? {
            bodies.insert(num, (id, stream_object(id, text)));
        }
        let appended = build_revision(&open.buffer, &open.xref, &bodies, widths)?;

        open.buffer.extend_from_slice(&appended.bytes);
        open.xref.prev_offset = appended.anchor;
        open.xref.size = appended.size;
        log::debug!(
            "Appended revision with {} object(s), anchor at {}, /Size {}",
            bodies.len(),
            appended.anchor,
            appended.size
        );
        Ok(open.buffer.clone())
    }

    /// Object a target names under the open mapping.
    pub fn resolve_target(&self, target: EditTarget) -> Option<ObjectRef> {
        let mapping = self.mapping()?;
        match target {
            EditTarget::Ref(id) => mapping.contains(id).then_some(id),
            EditTarget::Slot { page, stream } => mapping.resolve(page, stream),
        }
    }
}

struct Revision {
    bytes: Vec<u8>,
    anchor: u64,
    size: u32,
}

fn resolve_edits<'a>(
    mapping: &DocumentMapping,
    edits: &'a [Edit],
) -> Result<BTreeMap<u32, (ObjectRef, &'a str)>> {
    let mut targets = BTreeMap::new();
    for edit in edits {
        let id = match edit.target {
            EditTarget::Ref(id) if mapping.contains(id) => id,
            EditTarget::Ref(id) => {
                return Err(Error::EditResolution(format!("{} is not a mapped content stream", id)))
            },
            EditTarget::Slot { page, stream } => mapping.resolve(page, stream).ok_or_else(|| {
                let have = mapping.pages.get(page).map(|p| p.contents.len()).unwrap_or(0);
                Error::EditResolution(format!(
                    "no stream {} on page {} (have {})",
                    stream,
                    page + 1,
                    have
                ))
            })?,
        };
        targets.insert(id.id, (id, edit.text.as_str()));
    }
    Ok(targets)
}

fn build_revision(
    base: &[u8],
    xref: &XrefState,
    bodies: &BTreeMap<u32, (ObjectRef, Vec<u8>)>,
    widths: [usize; 3],
) -> Result<Revision> {
    let mut bytes = Vec::new();
    if !matches!(base.last(), None | Some(b'\n') | Some(b'\r')) {
        bytes.push(b'\n');
    }

    let base_len = base.len() as u64;
    let mut entries = SectionEntries::new();
    for (id, body) in bodies.values() {
        entries.insert(id.id, (base_len + bytes.len() as u64, id.gen));
        bytes.extend_from_slice(body);
    }

    let max_touched = bodies.keys().next_back().copied().unwrap_or(0);
    let mut size = xref.size.max(max_touched + 1);
    let anchor = base_len + bytes.len() as u64;

    if xref.is_stream() {
        let xref_num = max_touched.max(xref.size.saturating_sub(1)) + 1;
        size = size.max(xref_num + 1);
        let trailer = TrailerFields {
            size,
            root: xref.root,
            info: xref.info,
            prev: xref.prev_offset,
        };
        bytes.extend_from_slice(&stream_section(
            ObjectRef::new(xref_num, 0),
            anchor,
            &entries,
            &trailer,
            widths,
        )?);
    } else {
        let trailer = TrailerFields {
            size,
            root: xref.root,
            info: xref.info,
            prev: xref.prev_offset,
        };
        bytes.extend_from_slice(&classic_section(&entries, &trailer, anchor));
    }

    Ok(Revision { bytes, anchor, size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::PageMapping;

    fn classic_doc() -> Vec<u8> {
        let mut doc = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        let objects = [
            "1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n".to_string(),
            "2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n".to_string(),
            "3 0 obj\n<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>\nendobj\n".to_string(),
            "4 0 obj\n<< /Length 10 >>\nstream\n(Hi) Tj ET\nendstream\nendobj\n".to_string(),
        ];
        for obj in &objects {
            offsets.push(doc.len());
            doc.extend_from_slice(obj.as_bytes());
        }
        let xref_at = doc.len();
        doc.extend_from_slice(b"xref\n0 5\n0000000000 65535 f \n");
        for off in &offsets {
            doc.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        doc.extend_from_slice(
            format!("trailer\n<< /Size 5 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", xref_at).as_bytes(),
        );
        doc
    }

    fn mapping() -> DocumentMapping {
        DocumentMapping {
            pages: vec![PageMapping {
                page_index: 0,
                page_obj: Some(ObjectRef::new(3, 0)),
                contents: vec![ObjectRef::new(4, 0)],
            }],
            root: Some(ObjectRef::new(1, 0)),
            info: None,
        }
    }

    #[test]
    fn test_closed_writer_rejects_edits() {
        let mut writer = IncrementalWriter::new();
        assert!(!writer.is_open());
        let err = writer.apply_edits(&[Edit::slot(0, 0, "x")]).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_open_reports_page_count() {
        let mut writer = IncrementalWriter::new();
        assert_eq!(writer.open(classic_doc(), mapping()).unwrap(), 1);
        assert!(writer.is_open());
        assert_eq!(writer.state().unwrap().size, 5);
    }

    #[test]
    fn test_open_failure_stays_closed() {
        let mut writer = IncrementalWriter::new();
        assert!(writer.open(b"not a pdf".to_vec(), mapping()).is_err());
        assert!(!writer.is_open());
    }

    #[test]
    fn test_reopen_is_noop() {
        let mut writer = IncrementalWriter::new();
        writer.open(classic_doc(), mapping()).unwrap();
        let first = writer.apply_edits(&[Edit::slot(0, 0, "(A) Tj")]).unwrap();
        writer.open(classic_doc(), DocumentMapping::default()).unwrap();
        assert_eq!(writer.bytes().unwrap(), &first[..]);
        assert_eq!(writer.mapping().unwrap().page_count(), 1);
    }

    #[test]
    fn test_empty_batch_returns_copy() {
        let doc = classic_doc();
        let mut writer = IncrementalWriter::new();
        writer.open(doc.clone(), mapping()).unwrap();
        assert_eq!(writer.apply_edits(&[]).unwrap(), doc);
        assert_eq!(writer.state().unwrap().prev_offset, read_xref_state(&doc).unwrap().prev_offset);
    }

    #[test]
    fn test_append_classic_revision() {
        let doc = classic_doc();
        let base_len = doc.len();
        let old_anchor = read_xref_state(&doc).unwrap().prev_offset;
        let mut writer = IncrementalWriter::new();
        writer.open(doc, mapping()).unwrap();

        let out = writer.apply_edits(&[Edit::slot(0, 0, "(Bye) Tj")]).unwrap();
        let tail = String::from_utf8(out[base_len..].to_vec()).unwrap();
        assert!(tail.starts_with("4 0 obj\n<< /Length 8 >>\nstream\n(Bye) Tj\nendstream\nendobj\n"));
        assert!(tail.contains(&format!("xref\n4 1\n{:010} 00000 n \n", base_len)));
        assert!(tail.contains(&format!("/Prev {}", old_anchor)));

        let state = read_xref_state(&out).unwrap();
        assert_eq!(state.prev_offset, writer.state().unwrap().prev_offset);
        assert_eq!(&out[state.prev_offset as usize..state.prev_offset as usize + 4], b"xref");
    }

    #[test]
    fn test_unresolved_edit_rejects_whole_batch() {
        let doc = classic_doc();
        let mut writer = IncrementalWriter::new();
        writer.open(doc.clone(), mapping()).unwrap();
        let before = writer.state().unwrap().clone();

        let err = writer
            .apply_edits(&[Edit::slot(0, 0, "(ok) Tj"), Edit::slot(0, 3, "(bad) Tj")])
            .unwrap_err();
        assert!(matches!(err, Error::EditResolution(_)));
        assert_eq!(writer.state().unwrap(), &before);
        assert_eq!(writer.bytes().unwrap(), &doc[..]);

        let err = writer.apply_edits(&[Edit::object(ObjectRef::new(9, 0), "x")]).unwrap_err();
        assert!(matches!(err, Error::EditResolution(_)));
    }

    #[test]
    fn test_same_object_last_edit_wins() {
        let doc = classic_doc();
        let base_len = doc.len();
        let mut writer = IncrementalWriter::new();
        writer.open(doc, mapping()).unwrap();
        let out = writer
            .apply_edits(&[Edit::slot(0, 0, "(one) Tj"), Edit::object(ObjectRef::new(4, 0), "(two) Tj")])
            .unwrap();
        let tail = String::from_utf8(out[base_len..].to_vec()).unwrap();
        assert!(!tail.contains("(one)"));
        assert_eq!(tail.matches(" obj\n").count(), 1);
        assert!(tail.contains("xref\n4 1\n"));
    }

    #[test]
    fn test_missing_final_newline_is_padded() {
        let mut doc = classic_doc();
        doc.pop();
        let base_len = doc.len();
        let mut writer = IncrementalWriter::new();
        writer.open(doc, mapping()).unwrap();
        let out = writer.apply_edits(&[Edit::slot(0, 0, "q Q")]).unwrap();
        assert_eq!(out[base_len], b'\n');
        let tail = String::from_utf8(out[base_len..].to_vec()).unwrap();
        assert!(tail.contains(&format!("{:010} 00000 n ", base_len + 1)));
    }

    #[test]
    fn test_returned_buffer_is_independent() {
        let mut writer = IncrementalWriter::new();
        writer.open(classic_doc(), mapping()).unwrap();
        let mut out = writer.apply_edits(&[Edit::slot(0, 0, "q Q")]).unwrap();
        out.clear();
        assert!(!writer.bytes().unwrap().is_empty());
    }

    #[test]
    fn test_revision_with_plain_object() {
        let doc = classic_doc();
        let base_len = doc.len();
        let mut writer = IncrementalWriter::new();
        writer.open(doc, mapping()).unwrap();

        let mut page = crate::object::Dict::new();
        page.insert("Type".to_string(), Object::Name("Page".to_string()));
        page.insert("Parent".to_string(), Object::Reference(ObjectRef::new(2, 0)));
        page.insert("Contents".to_string(), Object::Reference(ObjectRef::new(4, 0)));
        page.insert("Rotate".to_string(), Object::Integer(90));
        let out = writer
            .apply_revision(
                &[Edit::slot(0, 0, "q Q")],
                &[(ObjectRef::new(3, 0), Object::Dictionary(page))],
            )
            .unwrap();

        let tail = String::from_utf8(out[base_len..].to_vec()).unwrap();
        assert!(tail.starts_with("3 0 obj\n<< /Type /Page /Parent 2 0 R /Contents 4 0 R /Rotate 90 >>\nendobj\n"));
        assert!(tail.contains("xref\n3 2\n"));
        assert_eq!(read_xref_state(&out).unwrap().size, 5);
    }

    #[test]
    fn test_content_stream_is_not_a_plain_object() {
        let mut writer = IncrementalWriter::new();
        writer.open(classic_doc(), mapping()).unwrap();
        let err = writer
            .apply_revision(&[], &[(ObjectRef::new(4, 0), Object::Null)])
            .unwrap_err();
        assert!(matches!(err, Error::EditResolution(_)));
    }

    #[test]
    fn test_resolve_target_forms_agree() {
        let mut writer = IncrementalWriter::new();
        assert_eq!(writer.resolve_target(EditTarget::Slot { page: 0, stream: 0 }), None);
        writer.open(classic_doc(), mapping()).unwrap();
        let id = Some(ObjectRef::new(4, 0));
        assert_eq!(writer.resolve_target(EditTarget::Slot { page: 0, stream: 0 }), id);
        assert_eq!(writer.resolve_target(EditTarget::Ref(ObjectRef::new(4, 0))), id);
        assert_eq!(writer.resolve_target(EditTarget::Ref(ObjectRef::new(3, 0))), None);
    }
}

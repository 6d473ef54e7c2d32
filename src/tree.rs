//! Whole-document object tree.
//!
//! This is the full-parse / full-rewrite side of the crate: every live
//! object loaded into memory, navigable by reference, and writable as a
//! fresh single-revision file. The incremental path never needs it, but the
//! structural page mapping and the non-incremental fallback do.

use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::parser::{parse_indirect_object, parse_object, parse_object_at};
use crate::writer::ObjectSerializer;
use crate::xref::{load_cross_refs, XRefEntryType};
use lazy_static::lazy_static;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};

lazy_static! {
    static ref OBJ_HEADER: Regex = Regex::new(r"(?:^|[\r\n])(\d+)\s+(\d+)\s+obj\b").unwrap();
}

/// Read access to a parsed document.
pub trait DocumentTree {
    /// The trailer dictionary.
    fn trailer(&self) -> &Dict;

    /// An indirect object by reference.
    fn get(&self, id: ObjectRef) -> Option<&Object>;

    /// Document catalog reference.
    fn root(&self) -> Option<ObjectRef> {
        self.trailer().get("Root").and_then(Object::as_reference)
    }

    /// Information dictionary reference.
    fn info(&self) -> Option<ObjectRef> {
        self.trailer().get("Info").and_then(Object::as_reference)
    }

    /// Follow a reference (one level); direct objects are returned as is.
    fn resolve<'a>(&'a self, obj: &'a Object) -> Option<&'a Object> {
        match obj {
            Object::Reference(r) => self.get(*r),
            other => Some(other),
        }
    }
}

/// Options for a full rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializeOptions {
    /// Flate-compress streams that carry no filter yet
    pub compress: bool,
    /// Dictionary indentation; 0 writes one dictionary per line
    pub indent_width: usize,
}

/// In-memory object tree.
#[derive(Debug, Clone, Default)]
pub struct ObjectTree {
    version: String,
    objects: BTreeMap<u32, (u16, Object)>,
    trailer: Dict,
}

impl DocumentTree for ObjectTree {
    fn trailer(&self) -> &Dict {
        &self.trailer
    }

    fn get(&self, id: ObjectRef) -> Option<&Object> {
        match self.objects.get(&id.id) {
            Some((gen, obj)) if *gen == id.gen => Some(obj),
            _ => None,
        }
    }
}

impl ObjectTree {
    /// Parse every live object in `data`.
    ///
    /// Objects are located through the cross-reference chain; when that is
    /// unreadable the file is scanned for object headers instead, later
    /// definitions winning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParseError`] when no object can be found at all.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut tree = ObjectTree {
            version: read_version(data),
            ..Default::default()
        };

        match load_cross_refs(data) {
            Ok(table) => {
                tree.trailer = table.trailer().clone();
                let mut compressed = Vec::new();
                for num in table.object_numbers() {
                    let Some(entry) = table.get(num) else { continue };
                    match entry.entry_type {
                        XRefEntryType::Uncompressed => match parse_object_at(data, entry.offset as usize) {
                            Ok((id, obj)) if id.id == num => {
                                tree.objects.insert(num, (id.gen, obj));
                            },
                            Ok((id, _)) => log::warn!("xref entry {} points at object {}", num, id),
                            Err(e) => log::warn!("Skipping object {}: {}", num, e),
                        },
                        XRefEntryType::Compressed => compressed.push((num, entry.offset as u32)),
                        XRefEntryType::Free => {},
                    }
                }
                tree.expand_object_streams(&compressed);
            },
            Err(e) => {
                log::warn!("Cross-reference chain unreadable ({}), scanning object headers", e);
                tree.scan_objects(data);
            },
        }

        // Streams of type XRef only describe the file layout.
        tree.objects.retain(|_, (_, obj)| obj.dict_type() != Some("XRef"));

        if tree.objects.is_empty() {
            return Err(Error::ParseError {
                offset: 0,
                reason: "no objects found".to_string(),
            });
        }
        if tree.root().is_none() {
            if let Some(catalog) = tree.find_by_type("Catalog") {
                tree.trailer.insert("Root".to_string(), Object::Reference(catalog));
            }
        }
        log::debug!("Parsed {} objects", tree.objects.len());
        Ok(tree)
    }

    fn scan_objects(&mut self, data: &[u8]) {
        for caps in OBJ_HEADER.captures_iter(data) {
            let Some(m) = caps.get(1) else { continue };
            if let Ok((_, (id, obj))) = parse_indirect_object(&data[m.start()..]) {
                self.objects.insert(id.id, (id.gen, obj));
            }
        }
        // Last classic trailer, if any.
        let keyword = b"trailer";
        if let Some(pos) = data.windows(keyword.len()).rposition(|w| w == keyword) {
            if let Ok((_, Object::Dictionary(dict))) = parse_object(&data[pos + keyword.len()..]) {
                self.trailer = dict;
            }
        }
    }

    /// Pull objects out of `/Type /ObjStm` containers.
    fn expand_object_streams(&mut self, compressed: &[(u32, u32)]) {
        let containers: HashSet<u32> = compressed.iter().map(|(_, stm)| *stm).collect();
        for stm in containers {
            let Some((_, stream)) = self.objects.get(&stm) else {
                log::warn!("Object stream {} missing", stm);
                continue;
            };
            match parse_object_stream(stream) {
                Ok(members) => {
                    for (num, obj) in members {
                        if compressed.iter().any(|(n, s)| *n == num && *s == stm) {
                            self.objects.entry(num).or_insert((0, obj));
                        }
                    }
                },
                Err(e) => log::warn!("Object stream {} unreadable: {}", stm, e),
            }
            self.objects.remove(&stm);
        }
    }

    /// First object whose `/Type` is `type_name`.
    pub fn find_by_type(&self, type_name: &str) -> Option<ObjectRef> {
        self.objects
            .iter()
            .find(|(_, (_, obj))| obj.dict_type() == Some(type_name))
            .map(|(num, (gen, _))| ObjectRef::new(*num, *gen))
    }

    /// Header version, e.g. `1.7`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the tree holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All references, ascending by number.
    pub fn object_refs(&self) -> Vec<ObjectRef> {
        self.objects
            .iter()
            .map(|(num, (gen, _))| ObjectRef::new(*num, *gen))
            .collect()
    }

    /// Replace (or add) an object.
    pub fn set(&mut self, id: ObjectRef, obj: Object) {
        self.objects.insert(id.id, (id.gen, obj));
    }

    /// Replace the data of a stream object with unencoded bytes, dropping
    /// its filters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectNotFound`] when `id` is not a stream.
    pub fn set_stream_data(&mut self, id: ObjectRef, data: Vec<u8>) -> Result<()> {
        match self.objects.get_mut(&id.id) {
            Some((gen, Object::Stream { dict, data: old })) if *gen == id.gen => {
                dict.shift_remove("Filter");
                dict.shift_remove("DecodeParms");
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                *old = bytes::Bytes::from(data);
                Ok(())
            },
            _ => Err(Error::ObjectNotFound(id)),
        }
    }

    /// Write the whole tree as a single-revision file with a classic xref.
    ///
    /// # Errors
    ///
    /// Returns an error if compressing a stream fails.
    pub fn serialize(&self, options: &SerializeOptions) -> Result<Vec<u8>> {
        let serializer = ObjectSerializer::with_indent(options.indent_width);
        let mut out = format!("%PDF-{}\n", self.version).into_bytes();
        out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

        let size = self.objects.keys().next_back().map_or(1, |max| max + 1);
        let mut offsets: BTreeMap<u32, (usize, u16)> = BTreeMap::new();

        for (num, (gen, obj)) in &self.objects {
            offsets.insert(*num, (out.len(), *gen));
            let obj = if options.compress { compress_stream(obj)? } else { obj.clone() };
            out.extend_from_slice(&serializer.serialize_indirect(ObjectRef::new(*num, *gen), &obj));
        }

        let xref_offset = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
        for num in 0..size {
            match offsets.get(&num) {
                Some((offset, gen)) => {
                    out.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes())
                },
                None if num == 0 => out.extend_from_slice(b"0000000000 65535 f \n"),
                None => out.extend_from_slice(b"0000000000 00000 f \n"),
            }
        }

        let mut trailer = Dict::new();
        trailer.insert("Size".to_string(), Object::Integer(size as i64));
        for key in ["Root", "Info", "ID"] {
            if let Some(value) = self.trailer.get(key) {
                trailer.insert(key.to_string(), value.clone());
            }
        }
        out.extend_from_slice(b"trailer\n");
        out.extend_from_slice(&serializer.serialize(&Object::Dictionary(trailer)));
        out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        Ok(out)
    }
}

fn compress_stream(obj: &Object) -> Result<Object> {
    match obj {
        Object::Stream { dict, data } if !dict.contains_key("Filter") => {
            let mut dict = dict.clone();
            dict.insert("Filter".to_string(), Object::Name("FlateDecode".to_string()));
            let encoded = crate::decoders::flate_encode(data)?;
            Ok(Object::Stream {
                dict,
                data: bytes::Bytes::from(encoded),
            })
        },
        other => Ok(other.clone()),
    }
}

fn read_version(data: &[u8]) -> String {
    let head = &data[..data.len().min(16)];
    head.strip_prefix(b"%PDF-")
        .map(|rest| {
            rest.iter()
                .take_while(|c| c.is_ascii_digit() || **c == b'.')
                .map(|c| *c as char)
                .collect::<String>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "1.7".to_string())
}

/// Parse the members of an object stream: `/N` pairs of
/// `(object number, offset from /First)` followed by the objects.
///
/// # Errors
///
/// Returns [`Error::ParseError`] when `/N` or `/First` is missing or the
/// header pairs are truncated.
pub fn parse_object_stream(stream: &Object) -> Result<Vec<(u32, Object)>> {
    let dict = stream.as_dict().ok_or_else(|| Error::ParseError {
        offset: 0,
        reason: "object stream is not a stream".to_string(),
    })?;
    let field = |key: &str| {
        dict.get(key)
            .and_then(Object::as_integer)
            .filter(|v| *v >= 0)
            .map(|v| v as usize)
            .ok_or_else(|| Error::ParseError {
                offset: 0,
                reason: format!("object stream missing /{}", key),
            })
    };
    let count = field("N")?;
    let first = field("First")?;
    let data = stream.decode_stream_data()?;

    let mut header = data.get(..first).unwrap_or(&data[..]);
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let (rest, num) = parse_object(header).map_err(|_| truncated())?;
        let (rest, off) = parse_object(rest).map_err(|_| truncated())?;
        match (num.as_integer(), off.as_integer()) {
            (Some(num), Some(off)) if num >= 0 && off >= 0 => pairs.push((num as u32, off as usize)),
            _ => return Err(truncated()),
        }
        header = rest;
    }

    let mut members = Vec::with_capacity(count);
    for (num, off) in pairs {
        if let Some(body) = data.get(first + off..) {
            if let Ok((_, obj)) = parse_object(body) {
                members.push((num, obj));
            }
        }
    }
    Ok(members)
}

fn truncated() -> Error {
    Error::ParseError {
        offset: 0,
        reason: "truncated object stream header".to_string(),
    }
}

/// Export the tree as JSON, starting from the trailer.
///
/// References are inlined depth-first the first time they are met; any
/// later occurrence (including a cycle back to an ancestor) becomes
/// `{"$ref": "n g R"}`.
pub fn to_json(tree: &dyn DocumentTree) -> Value {
    let mut visited = HashSet::new();
    dict_to_json(tree, tree.trailer(), &mut visited)
}

fn dict_to_json(tree: &dyn DocumentTree, dict: &Dict, visited: &mut HashSet<ObjectRef>) -> Value {
    let mut map = Map::new();
    for (key, value) in dict {
        map.insert(key.clone(), object_to_json(tree, value, visited));
    }
    Value::Object(map)
}

fn object_to_json(tree: &dyn DocumentTree, obj: &Object, visited: &mut HashSet<ObjectRef>) -> Value {
    match obj {
        Object::Null => Value::Null,
        Object::Boolean(b) => json!(b),
        Object::Integer(i) => json!(i),
        Object::Real(r) => json!(r),
        Object::String(s) => json!(crate::utils::latin1_decode(s)),
        Object::Name(n) => json!(format!("/{}", n)),
        Object::Array(items) => {
            Value::Array(items.iter().map(|o| object_to_json(tree, o, visited)).collect())
        },
        Object::Dictionary(dict) => dict_to_json(tree, dict, visited),
        Object::Stream { dict, data } => json!({
            "dict": dict_to_json(tree, dict, visited),
            "length": data.len(),
        }),
        Object::Reference(r) => {
            if !visited.insert(*r) {
                return json!({ "$ref": r.to_string() });
            }
            match tree.get(*r) {
                Some(target) => object_to_json(tree, target, visited),
                None => json!({ "$ref": r.to_string(), "missing": true }),
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let objs = [
            "1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n",
            "2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n",
            "3 0 obj\n<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>\nendobj\n",
            "4 0 obj\n<< /Length 5 >>\nstream\nBT ET\nendstream\nendobj\n",
        ];
        let mut doc = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for o in objs {
            offsets.push(doc.len());
            doc.extend_from_slice(o.as_bytes());
        }
        let xref = doc.len();
        doc.extend_from_slice(b"xref\n0 5\n0000000000 65535 f \n");
        for off in offsets {
            doc.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        doc.extend_from_slice(
            format!("trailer\n<< /Size 5 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", xref).as_bytes(),
        );
        doc
    }

    #[test]
    fn test_parse_via_xref() {
        let tree = ObjectTree::parse(&sample()).unwrap();
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.version(), "1.4");
        assert_eq!(tree.root(), Some(ObjectRef::new(1, 0)));
        assert_eq!(tree.get(ObjectRef::new(3, 0)).unwrap().dict_type(), Some("Page"));
        assert!(tree.get(ObjectRef::new(3, 1)).is_none());
    }

    #[test]
    fn test_parse_falls_back_to_header_scan() {
        let mut doc = sample();
        let cut = doc.windows(9).rposition(|w| w == b"startxref").unwrap();
        doc.truncate(cut);
        doc.extend_from_slice(b"startxref\n999999\n%%EOF\n");
        let tree = ObjectTree::parse(&doc).unwrap();
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.root(), Some(ObjectRef::new(1, 0)));
    }

    #[test]
    fn test_serialize_round_trip() {
        let tree = ObjectTree::parse(&sample()).unwrap();
        let out = tree.serialize(&SerializeOptions::default()).unwrap();
        let again = ObjectTree::parse(&out).unwrap();
        assert_eq!(again.object_refs(), tree.object_refs());
        assert_eq!(
            again.get(ObjectRef::new(4, 0)).unwrap().decode_stream_data().unwrap(),
            b"BT ET"
        );
    }

    #[test]
    fn test_serialize_compressed_and_indented() {
        let tree = ObjectTree::parse(&sample()).unwrap();
        let options = SerializeOptions {
            compress: true,
            indent_width: 2,
        };
        let out = tree.serialize(&options).unwrap();
        let text = crate::utils::latin1_decode(&out);
        assert!(text.contains("/Filter /FlateDecode"));
        assert!(text.contains("<<\n  /Type /Catalog"));
        let again = ObjectTree::parse(&out).unwrap();
        assert_eq!(
            again.get(ObjectRef::new(4, 0)).unwrap().decode_stream_data().unwrap(),
            b"BT ET"
        );
    }

    #[test]
    fn test_set_stream_data() {
        let mut tree = ObjectTree::parse(&sample()).unwrap();
        tree.set_stream_data(ObjectRef::new(4, 0), b"q Q".to_vec()).unwrap();
        let stream = tree.get(ObjectRef::new(4, 0)).unwrap();
        assert_eq!(stream.decode_stream_data().unwrap(), b"q Q");
        assert!(tree.set_stream_data(ObjectRef::new(1, 0), vec![]).is_err());
    }

    #[test]
    fn test_to_json_marks_cycles() {
        let tree = ObjectTree::parse(&sample()).unwrap();
        let value = to_json(&tree);
        let page = &value["Root"]["Pages"]["Kids"][0];
        assert_eq!(page["Type"], json!("/Page"));
        // Parent points back to an object already being exported.
        assert_eq!(page["Parent"], json!({ "$ref": "2 0 R" }));
        assert_eq!(page["Contents"]["length"], json!(5));
    }

    #[test]
    fn test_parse_object_stream() {
        let body = b"10 0 11 4 (a) [1 2]";
        let mut dict = Dict::new();
        dict.insert("Type".to_string(), Object::Name("ObjStm".to_string()));
        dict.insert("N".to_string(), Object::Integer(2));
        dict.insert("First".to_string(), Object::Integer(10));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(body),
        };
        let members = parse_object_stream(&stream).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0], (10, Object::String(b"a".to_vec())));
        assert_eq!(members[1].1.as_array().unwrap().len(), 2);
    }
}

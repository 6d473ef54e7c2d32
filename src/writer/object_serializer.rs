//! PDF object serialization.
//!
//! Dictionaries are written in insertion order so that a parsed and
//! re-serialized dictionary keeps the layout of its source.

use crate::object::{Dict, Object, ObjectRef};
use crate::utils::{format_number, latin1_encode};

/// Decimal places kept for real numbers.
const REAL_PRECISION: usize = 5;

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Spaces per nesting level for dictionary entries; 0 writes
    /// dictionaries on one line.
    indent_width: usize,
}

impl ObjectSerializer {
    /// Create a single-line serializer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a serializer that puts each dictionary entry on its own line.
    pub fn with_indent(indent_width: usize) -> Self {
        Self { indent_width }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj, 0);
        buf
    }

    /// Serialize an object to a string (for debugging).
    pub fn serialize_to_string(&self, obj: &Object) -> String {
        crate::utils::latin1_decode(&self.serialize(obj))
    }

    /// Serialize an indirect object definition.
    ///
    /// Format: `{id} {gen} obj\n{object}\nendobj\n`
    pub fn serialize_indirect(&self, id: ObjectRef, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", id.id, id.gen).into_bytes();
        self.write_object(&mut buf, obj, 0);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    fn write_object(&self, out: &mut Vec<u8>, obj: &Object, depth: usize) {
        match obj {
            Object::Null => out.extend_from_slice(b"null"),
            Object::Boolean(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
            Object::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => out.extend_from_slice(format_number(*r, REAL_PRECISION).as_bytes()),
            Object::String(s) => write_string(out, s),
            Object::Name(n) => write_name(out, n),
            Object::Array(arr) => {
                out.push(b'[');
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    self.write_object(out, item, depth);
                }
                out.push(b']');
            },
            Object::Dictionary(dict) => self.write_dictionary(out, dict, depth),
            Object::Stream { dict, data } => {
                let mut dict = dict.clone();
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                self.write_dictionary(out, &dict, depth);
                out.extend_from_slice(b"\nstream\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => out.extend_from_slice(format!("{} {} R", r.id, r.gen).as_bytes()),
        }
    }

    fn write_dictionary(&self, out: &mut Vec<u8>, dict: &Dict, depth: usize) {
        if dict.is_empty() {
            out.extend_from_slice(b"<< >>");
            return;
        }
        out.extend_from_slice(b"<<");
        for (key, value) in dict {
            if self.indent_width > 0 {
                out.push(b'\n');
                out.extend(std::iter::repeat(b' ').take(self.indent_width * (depth + 1)));
            } else {
                out.push(b' ');
            }
            write_name(out, key);
            out.push(b' ');
            self.write_object(out, value, depth + 1);
        }
        if self.indent_width > 0 {
            out.push(b'\n');
            out.extend(std::iter::repeat(b' ').take(self.indent_width * depth));
        } else {
            out.push(b' ');
        }
        out.extend_from_slice(b">>");
    }
}

/// Write a string as a literal when printable, as hex otherwise.
fn write_string(out: &mut Vec<u8>, data: &[u8]) {
    let printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));

    if printable {
        out.push(b'(');
        for &byte in data {
            match byte {
                b'(' | b')' | b'\\' => out.extend_from_slice(&[b'\\', byte]),
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\r' => out.extend_from_slice(b"\\r"),
                b'\t' => out.extend_from_slice(b"\\t"),
                _ => out.push(byte),
            }
        }
        out.push(b')');
    } else {
        out.push(b'<');
        for byte in data {
            out.extend_from_slice(format!("{:02X}", byte).as_bytes());
        }
        out.push(b'>');
    }
}

/// Write a name, escaping delimiters and non-regular bytes as `#xx`.
fn write_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    for byte in latin1_encode(name) {
        let regular = (b'!'..=b'~').contains(&byte)
            && !crate::lexer::is_delimiter(byte)
            && byte != b'#';
        if regular {
            out.push(byte);
        } else {
            out.extend_from_slice(format!("#{:02X}", byte).as_bytes());
        }
    }
}

/// Serialize an uncompressed content-stream object:
/// `{n} {g} obj\n<< /Length {len} >>\nstream\n{text}\nendstream\nendobj\n`.
///
/// `text` is Latin-1 encoded; `/Length` counts the encoded bytes. Chars
/// past U+00FF are written as `?` with a warning.
pub fn stream_object(id: ObjectRef, text: &str) -> Vec<u8> {
    let lossy = text.chars().filter(|c| u32::from(*c) > 0xFF).count();
    if lossy > 0 {
        log::warn!("Stream {}: {} char(s) outside Latin-1 written as '?'", id, lossy);
    }
    let data = latin1_encode(text);
    let mut buf =
        format!("{} {} obj\n<< /Length {} >>\nstream\n", id.id, id.gen, data.len()).into_bytes();
    buf.extend_from_slice(&data);
    buf.extend_from_slice(b"\nendstream\nendobj\n");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_scalars() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::Null), "null");
        assert_eq!(s.serialize_to_string(&Object::Boolean(false)), "false");
        assert_eq!(s.serialize_to_string(&Object::Integer(-123)), "-123");
        assert_eq!(s.serialize_to_string(&Object::Real(1.0)), "1");
        assert_eq!(s.serialize_to_string(&Object::Real(0.5)), "0.5");
    }

    #[test]
    fn test_serialize_strings() {
        let s = ObjectSerializer::new();
        assert_eq!(
            s.serialize_to_string(&Object::String(b"Test (parens)".to_vec())),
            "(Test \\(parens\\))"
        );
        assert_eq!(s.serialize_to_string(&Object::String(vec![0x00, 0xFF])), "<00FF>");
    }

    #[test]
    fn test_serialize_name_with_special_chars() {
        let s = ObjectSerializer::new();
        assert_eq!(
            s.serialize_to_string(&Object::Name("Name With Space".to_string())),
            "/Name#20With#20Space"
        );
        assert_eq!(s.serialize_to_string(&Object::Name("A/B".to_string())), "/A#2FB");
    }

    #[test]
    fn test_serialize_dictionary_single_line() {
        let mut dict = Dict::new();
        dict.insert("Type".to_string(), Object::Name("Page".to_string()));
        dict.insert("Parent".to_string(), Object::Reference(ObjectRef::new(2, 0)));
        let s = ObjectSerializer::new();
        assert_eq!(
            s.serialize_to_string(&Object::Dictionary(dict)),
            "<< /Type /Page /Parent 2 0 R >>"
        );
    }

    #[test]
    fn test_serialize_dictionary_indented() {
        let mut inner = Dict::new();
        inner.insert("F1".to_string(), Object::Reference(ObjectRef::new(5, 0)));
        let mut dict = Dict::new();
        dict.insert("Font".to_string(), Object::Dictionary(inner));
        let s = ObjectSerializer::with_indent(2);
        assert_eq!(
            s.serialize_to_string(&Object::Dictionary(dict)),
            "<<\n  /Font <<\n    /F1 5 0 R\n  >>\n>>"
        );
    }

    #[test]
    fn test_serialize_stream_updates_length() {
        let mut dict = Dict::new();
        dict.insert("Length".to_string(), Object::Integer(999));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"stream data"),
        };
        let out = ObjectSerializer::new().serialize_to_string(&stream);
        assert_eq!(out, "<< /Length 11 >>\nstream\nstream data\nendstream");
    }

    #[test]
    fn test_serialize_indirect() {
        let bytes = ObjectSerializer::new().serialize_indirect(ObjectRef::new(1, 0), &Object::Integer(42));
        assert_eq!(bytes, b"1 0 obj\n42\nendobj\n");
    }

    #[test]
    fn test_stream_object_layout() {
        let bytes = stream_object(ObjectRef::new(4, 0), "BT ET");
        assert_eq!(bytes, b"4 0 obj\n<< /Length 5 >>\nstream\nBT ET\nendstream\nendobj\n");
    }

    #[test]
    fn test_stream_object_length_counts_latin1_bytes() {
        // U+00E9 is two bytes in UTF-8 but one in the written stream.
        let bytes = stream_object(ObjectRef::new(4, 0), "(caf\u{e9}) Tj");
        assert!(bytes.starts_with(b"4 0 obj\n<< /Length 9 >>"));
        assert!(bytes.windows(5).any(|w| w == b"caf\xe9)"));
    }
}

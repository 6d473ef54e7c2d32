//! Dictionary values editable without touching any content stream.
//!
//! Four groups are listed: document information entries, form field values
//! (`/V` strings), page rotation and annotation text (`/Contents`). Each
//! item names the indirect object holding the value, so a change is written
//! by replacing that one dictionary.

use crate::error::{Error, Result};
use crate::mapping::DocumentMapping;
use crate::object::{Dict, Object, ObjectRef};
use crate::tree::DocumentTree;
use crate::utils::{format_number, latin1_decode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Limit on `/Kids` nesting in the form field tree.
const MAX_FIELD_DEPTH: usize = 32;

/// Group an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeItemKind {
    /// Document information entry
    Info,
    /// Form field value
    Form,
    /// Page rotation
    Rotate,
    /// Annotation text
    Annot,
}

/// A scalar dictionary value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SafeValue {
    /// Boolean
    Boolean(bool),
    /// Integer
    Integer(i64),
    /// Real number
    Real(f64),
    /// Text string, decoded
    Text(String),
}

impl SafeValue {
    /// Read a direct scalar. Names, containers and references are not
    /// editable values.
    pub fn from_object(obj: &Object) -> Option<Self> {
        match obj {
            Object::Boolean(b) => Some(SafeValue::Boolean(*b)),
            Object::Integer(i) => Some(SafeValue::Integer(*i)),
            Object::Real(r) => Some(SafeValue::Real(*r)),
            Object::String(s) => Some(SafeValue::Text(decode_text_string(s))),
            _ => None,
        }
    }

    /// The PDF object for this value.
    pub fn to_object(&self) -> Object {
        match self {
            SafeValue::Boolean(b) => Object::Boolean(*b),
            SafeValue::Integer(i) => Object::Integer(*i),
            SafeValue::Real(r) => Object::Real(*r),
            SafeValue::Text(s) => Object::String(encode_text_string(s)),
        }
    }

    /// Display form of the value.
    pub fn preview(&self) -> String {
        match self {
            SafeValue::Boolean(b) => b.to_string(),
            SafeValue::Integer(i) => i.to_string(),
            SafeValue::Real(r) => format_number(*r, 5),
            SafeValue::Text(s) => s.clone(),
        }
    }
}

/// One editable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeItem {
    /// Group
    pub kind: SafeItemKind,
    /// Where the value lives, e.g. `Page 2 /Rotate`
    pub label: String,
    /// Indirect object holding the dictionary
    pub object: ObjectRef,
    /// Dictionary key without the slash
    pub key: String,
    /// Value at listing time
    pub value: SafeValue,
}

/// List the editable values of a document.
///
/// Only values held directly in an indirect object's dictionary are
/// listed; a value inside a direct dictionary has no object of its own to
/// replace.
pub fn scan_safe_items(tree: &dyn DocumentTree, mapping: &DocumentMapping) -> Vec<SafeItem> {
    let mut items = Vec::new();

    if let Some(id) = tree.info() {
        if let Some(info) = tree.get(id).and_then(Object::as_dict) {
            for (key, value) in info {
                if let Some(value) = SafeValue::from_object(value) {
                    items.push(SafeItem {
                        kind: SafeItemKind::Info,
                        label: format!("/{}", key),
                        object: id,
                        key: key.clone(),
                        value,
                    });
                }
            }
        }
    }

    let fields = tree
        .root()
        .and_then(|id| tree.get(id))
        .and_then(Object::as_dict)
        .and_then(|catalog| catalog.get("AcroForm"))
        .and_then(|form| tree.resolve(form))
        .and_then(Object::as_dict)
        .and_then(|form| form.get("Fields"))
        .and_then(|fields| tree.resolve(fields))
        .and_then(Object::as_array);
    if let Some(fields) = fields {
        let mut visited = HashSet::new();
        walk_fields(tree, fields, "/AcroForm/Fields", 0, &mut visited, &mut items);
    }

    for (index, page) in mapping.pages.iter().enumerate() {
        let Some(page_id) = page.page_obj else { continue };
        let Some(dict) = tree.get(page_id).and_then(Object::as_dict) else {
            continue;
        };
        if let Some(Object::Integer(rotate)) = dict.get("Rotate") {
            items.push(SafeItem {
                kind: SafeItemKind::Rotate,
                label: format!("Page {} /Rotate", index + 1),
                object: page_id,
                key: "Rotate".to_string(),
                value: SafeValue::Integer(*rotate),
            });
        }

        let annots = dict
            .get("Annots")
            .and_then(|a| tree.resolve(a))
            .and_then(Object::as_array);
        for (n, annot) in annots.into_iter().flatten().enumerate() {
            let Some(annot_id) = annot.as_reference() else { continue };
            let text = tree
                .get(annot_id)
                .and_then(Object::as_dict)
                .and_then(|a| a.get("Contents"));
            if let Some(Object::String(text)) = text {
                items.push(SafeItem {
                    kind: SafeItemKind::Annot,
                    label: format!("Page {} Annot #{} /Contents", index + 1, n + 1),
                    object: annot_id,
                    key: "Contents".to_string(),
                    value: SafeValue::Text(decode_text_string(text)),
                });
            }
        }
    }

    log::debug!("Found {} editable dictionary value(s)", items.len());
    items
}

fn walk_fields(
    tree: &dyn DocumentTree,
    fields: &[Object],
    path: &str,
    depth: usize,
    visited: &mut HashSet<ObjectRef>,
    items: &mut Vec<SafeItem>,
) {
    if depth >= MAX_FIELD_DEPTH {
        log::warn!("Form field tree deeper than {} levels at {}", MAX_FIELD_DEPTH, path);
        return;
    }
    for (i, field) in fields.iter().enumerate() {
        let Some(id) = field.as_reference() else { continue };
        if !visited.insert(id) {
            continue;
        }
        let Some(dict) = tree.get(id).and_then(Object::as_dict) else {
            continue;
        };
        let field_path = format!("{}[{}]", path, i);
        if let (Some(Object::String(name)), Some(Object::String(value))) = (dict.get("T"), dict.get("V")) {
            items.push(SafeItem {
                kind: SafeItemKind::Form,
                label: format!("{} ({})", field_path, decode_text_string(name)),
                object: id,
                key: "V".to_string(),
                value: SafeValue::Text(decode_text_string(value)),
            });
        }
        if let Some(kids) = dict.get("Kids").and_then(|k| tree.resolve(k)).and_then(Object::as_array) {
            walk_fields(tree, kids, &format!("{}/Kids", field_path), depth + 1, visited, items);
        }
    }
}

/// The dictionary of `item.object` with `value` stored under `item.key`.
///
/// # Errors
///
/// - [`Error::ObjectNotFound`] when the object is gone or not a dictionary.
/// - [`Error::InvalidState`] when the stored value no longer equals
///   `item.value`, or `value` does not suit the item: form and annotation
///   values are text, rotation is a multiple of 90.
pub fn updated_dictionary(tree: &dyn DocumentTree, item: &SafeItem, value: &SafeValue) -> Result<Object> {
    let dict: &Dict = match tree.get(item.object) {
        Some(Object::Dictionary(dict)) => dict,
        _ => return Err(Error::ObjectNotFound(item.object)),
    };
    let current = dict.get(&item.key).and_then(SafeValue::from_object);
    if current.as_ref() != Some(&item.value) {
        return Err(Error::InvalidState(format!(
            "{} changed since it was listed",
            item.label
        )));
    }

    match (item.kind, value) {
        (SafeItemKind::Form | SafeItemKind::Annot, SafeValue::Text(_)) => {},
        (SafeItemKind::Form | SafeItemKind::Annot, _) => {
            return Err(Error::InvalidState(format!("{} takes text", item.label)))
        },
        (SafeItemKind::Rotate, SafeValue::Integer(degrees)) if degrees.rem_euclid(90) == 0 => {},
        (SafeItemKind::Rotate, _) => {
            return Err(Error::InvalidState(format!(
                "{} takes a multiple of 90, got {}",
                item.label,
                value.preview()
            )))
        },
        (SafeItemKind::Info, _) => {},
    }

    let mut dict = dict.clone();
    dict.insert(item.key.clone(), value.to_object());
    Ok(Object::Dictionary(dict))
}

/// Decode a text string: UTF-16BE after a `FE FF` mark, one byte per
/// char otherwise.
pub fn decode_text_string(bytes: &[u8]) -> String {
    match bytes.strip_prefix(&[0xFE, 0xFF]) {
        Some(utf16) => {
            let units = utf16.chunks(2).map(|pair| match *pair {
                [hi, lo] => u16::from_be_bytes([hi, lo]),
                [hi] => u16::from_be_bytes([hi, 0]),
                _ => 0,
            });
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        },
        None => latin1_decode(bytes),
    }
}

/// Encode a text string one byte per char when every char fits, as
/// UTF-16BE with a `FE FF` mark otherwise.
pub fn encode_text_string(text: &str) -> Vec<u8> {
    if text.chars().all(|c| u32::from(c) <= 0xFF) {
        return crate::utils::latin1_encode(text);
    }
    let mut out = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_string_encoding() {
        assert_eq!(encode_text_string("Caf\u{e9}"), b"Caf\xE9");
        let wide = encode_text_string("\u{20AC}5");
        assert_eq!(wide, vec![0xFE, 0xFF, 0x20, 0xAC, 0x00, 0x35]);
        assert_eq!(decode_text_string(&wide), "\u{20AC}5");
        assert_eq!(decode_text_string(b"plain"), "plain");
    }

    #[test]
    fn test_value_json_is_untagged() {
        assert_eq!(serde_json::to_string(&SafeValue::Integer(90)).unwrap(), "90");
        let back: SafeValue = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(back, SafeValue::Text("x".to_string()));
        let back: SafeValue = serde_json::from_str("180").unwrap();
        assert_eq!(back, SafeValue::Integer(180));
    }

    #[test]
    fn test_from_object_skips_names() {
        assert_eq!(SafeValue::from_object(&Object::Name("Yes".to_string())), None);
        assert_eq!(SafeValue::from_object(&Object::Real(1.5)), Some(SafeValue::Real(1.5)));
    }
}

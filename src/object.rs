//! PDF object types.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Dictionary storage. Insertion order is kept so a re-serialized
/// dictionary reads the same as its source.
pub type Dict = IndexMap<String, Object>;

/// PDF object representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating-point) value
    Real(f64),
    /// String (byte array)
    String(Vec<u8>),
    /// Name (without the leading /)
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary (key-value pairs)
    Dictionary(Dict),
    /// Stream (dictionary + raw, still-encoded data)
    Stream {
        /// Stream dictionary
        dict: Dict,
        /// Stream data
        data: bytes::Bytes,
    },
    /// Indirect object reference
    Reference(ObjectRef),
}

/// Reference to an indirect object.
///
/// Two references are equal iff both the object number and the
/// generation match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl Object {
    /// Get the type name of this object (without data).
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integer or real, widened to `f64`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Works for both Dictionary and Stream objects.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// `/Type` of a dictionary or stream, if it has one.
    pub fn dict_type(&self) -> Option<&str> {
        self.as_dict()?.get("Type")?.as_name()
    }

    /// Decode stream data using the filters in the stream dictionary.
    ///
    /// # Errors
    ///
    /// Returns an error if this is not a stream or a filter is unsupported.
    pub fn decode_stream_data(&self) -> Result<Vec<u8>> {
        match self {
            Object::Stream { dict, data } => {
                let filters = dict.get("Filter").map(filter_names).unwrap_or_default();
                if filters.is_empty() {
                    return Ok(data.to_vec());
                }
                crate::decoders::decode_stream(data, &filters, dict.get("DecodeParms"))
            },
            _ => Err(Error::Decode(format!("expected Stream, found {}", self.type_name()))),
        }
    }
}

/// `/Filter` as a list: a single name or an array of names.
fn filter_names(filter: &Object) -> Vec<String> {
    match filter {
        Object::Name(name) => vec![name.clone()],
        Object::Array(names) => names.iter().filter_map(Object::as_name).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_display() {
        assert_eq!(ObjectRef::new(12, 3).to_string(), "12 3 R");
    }

    #[test]
    fn test_object_ref_equality_needs_both_fields() {
        assert_eq!(ObjectRef::new(4, 0), ObjectRef::new(4, 0));
        assert_ne!(ObjectRef::new(4, 0), ObjectRef::new(4, 1));
        assert_ne!(ObjectRef::new(4, 0), ObjectRef::new(5, 0));
    }

    #[test]
    fn test_as_number_widens_integers() {
        assert_eq!(Object::Integer(3).as_number(), Some(3.0));
        assert_eq!(Object::Real(1.5).as_number(), Some(1.5));
        assert_eq!(Object::Null.as_number(), None);
    }

    #[test]
    fn test_dict_type() {
        let mut dict = Dict::new();
        dict.insert("Type".to_string(), Object::Name("Page".to_string()));
        assert_eq!(Object::Dictionary(dict).dict_type(), Some("Page"));
        assert_eq!(Object::Integer(1).dict_type(), None);
    }

    #[test]
    fn test_decode_unfiltered_stream() {
        let stream = Object::Stream {
            dict: Dict::new(),
            data: bytes::Bytes::from_static(b"BT ET"),
        };
        assert_eq!(stream.decode_stream_data().unwrap(), b"BT ET");
    }

    #[test]
    fn test_decode_non_stream_fails() {
        assert!(Object::Integer(1).decode_stream_data().is_err());
    }
}

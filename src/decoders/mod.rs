//! Stream filters needed to read page content and cross-reference streams.
//!
//! Only FlateDecode (optionally with a PNG/TIFF predictor) is supported.
//! Appended revisions are always written unfiltered, so the encoder side is
//! limited to what the full-rewrite path uses.

use crate::error::{Error, Result};
use crate::object::Object;

mod flate;
mod predictor;

pub use flate::{flate_decode, flate_encode};
pub use predictor::{decode_predictor, DecodeParams};

/// Decode stream data through a filter pipeline.
///
/// # Errors
///
/// Returns `Error::Decode` for unsupported filters or corrupt data.
/// Run `data` through each filter in order.
pub fn decode_stream(data: &[u8], filters: &[String], parms: Option<&Object>) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for (index, filter) in filters.iter().enumerate() {
        current = match filter.as_str() {
            "FlateDecode" | "Fl" => flate_decode(&current)?,
            other => return Err(Error::Decode(format!("unsupported filter: {}", other))),
        };

        // DecodeParms is either one dictionary or an array parallel to Filter.
        let params = match parms {
            Some(Object::Array(items)) => items.get(index).and_then(DecodeParams::from_object),
            Some(obj) if index == 0 => DecodeParams::from_object(obj),
            _ => None,
        };
        if let Some(params) = params {
            current = decode_predictor(&current, &params)?;
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flate_pipeline_round_trip() {
        let encoded = flate_encode(b"q 1 0 0 1 0 0 cm Q").unwrap();
        let decoded = decode_stream(&encoded, &["FlateDecode".to_string()], None).unwrap();
        assert_eq!(decoded, b"q 1 0 0 1 0 0 cm Q");
    }

    #[test]
    fn test_unsupported_filter() {
        let err = decode_stream(b"abc", &["DCTDecode".to_string()], None).unwrap_err();
        assert!(format!("{}", err).contains("DCTDecode"));
    }
}

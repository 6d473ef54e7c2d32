//! FlateDecode (zlib/deflate) via flate2.

use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Inflate zlib data, falling back to a raw deflate stream when the zlib
/// header is damaged.
pub fn flate_decode(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    match ZlibDecoder::new(input).read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(e) if !output.is_empty() => {
            log::warn!("FlateDecode partial recovery: {} bytes before error: {}", output.len(), e);
            Ok(output)
        },
        Err(e) => {
            log::debug!("Zlib decode failed ({}), trying raw deflate", e);
            output.clear();
            DeflateDecoder::new(input)
                .read_to_end(&mut output)
                .map_err(|err| Error::Decode(format!("FlateDecode failed: {}", err)))?;
            Ok(output)
        },
    }
}

/// Deflate data with the default compression level.
pub fn flate_encode(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}

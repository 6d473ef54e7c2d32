//! PDF object parser.
//!
//! Recursive descent over lexer tokens: primitives, arrays, dictionaries,
//! indirect references and stream objects. Arrays and dictionaries cut
//! short by end of input return what was read so far.

use crate::error::{Error, Result};
use crate::lexer::{token, unescape_literal, Token};
use crate::object::{Dict, Object, ObjectRef};
use nom::IResult;

/// Parse a PDF object from input bytes.
///
/// # Example
///
/// ```
/// use pdf_patch::parser::parse_object;
///
/// let (_, obj) = parse_object(b"<< /Type /Page /Count 3 >>").unwrap();
/// assert_eq!(obj.dict_type(), Some("Page"));
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (input, tok) = token(input)?;

    match tok {
        Token::Null => Ok((input, Object::Null)),
        Token::True => Ok((input, Object::Boolean(true))),
        Token::False => Ok((input, Object::Boolean(false))),

        Token::Integer(i) => {
            // `N G R` is a reference; anything else leaves the integer alone.
            if let Ok((input2, Token::Integer(gen))) = token(input) {
                if let Ok((input3, Token::R)) = token(input2) {
                    if i >= 0 && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((input3, Object::Reference(ObjectRef::new(i as u32, gen as u16))));
                    }
                }
            }
            Ok((input, Object::Integer(i)))
        },

        Token::Real(r) => Ok((input, Object::Real(r))),
        Token::LiteralString(raw) => Ok((input, Object::String(unescape_literal(raw)))),
        Token::HexString(hex) => Ok((input, Object::String(decode_hex(hex)))),
        Token::Name(name) => Ok((input, Object::Name(name))),
        Token::ArrayStart => parse_array(input),

        Token::DictStart => {
            let (remaining, dict) = parse_dictionary(input)?;
            if let Ok((stream_input, Token::StreamStart)) = token(remaining) {
                let (rest, data) = parse_stream_data(stream_input, &dict)?;
                return Ok((
                    rest,
                    Object::Stream {
                        dict,
                        data: bytes::Bytes::from(data),
                    },
                ));
            }
            Ok((remaining, Object::Dictionary(dict)))
        },

        _ => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
    }
}

/// Parse `N G obj <object> endobj`.
///
/// A missing `endobj` is tolerated.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (ObjectRef, Object)> {
    let fail = |at| nom::Err::Error(nom::error::Error::new(at, nom::error::ErrorKind::Tag));

    let (rest, id) = match token(input)? {
        (rest, Token::Integer(id)) if id >= 0 => (rest, id as u32),
        _ => return Err(fail(input)),
    };
    let (rest, gen) = match token(rest)? {
        (rest, Token::Integer(gen)) if (0..=u16::MAX as i64).contains(&gen) => (rest, gen as u16),
        _ => return Err(fail(input)),
    };
    let rest = match token(rest)? {
        (rest, Token::ObjStart) => rest,
        _ => return Err(fail(input)),
    };
    let (rest, obj) = parse_object(rest)?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => rest,
    };
    Ok((rest, (ObjectRef::new(id, gen), obj)))
}

/// Parse the indirect object starting at `offset` in `data`.
///
/// # Errors
///
/// Returns [`Error::ParseError`] when no object header is found there.
pub fn parse_object_at(data: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let slice = data.get(offset..).ok_or_else(|| Error::ParseError {
        offset,
        reason: "offset beyond end of file".to_string(),
    })?;
    parse_indirect_object(slice)
        .map(|(_, parsed)| parsed)
        .map_err(|e| Error::ParseError {
            offset,
            reason: format!("invalid indirect object: {:?}", e),
        })
}

/// Read stream bytes after the `stream` keyword.
///
/// A direct `/Length` is trusted when `endstream` follows it; otherwise the
/// data runs to the next `endstream`.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dict) -> IResult<&'a [u8], Vec<u8>> {
    let input = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        log::warn!("No end-of-line after stream keyword");
        input
    };

    if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
        let length = length.max(0) as usize;
        if length <= input.len() {
            if let Ok((rest, Token::StreamEnd)) = token(&input[length..]) {
                return Ok((rest, input[..length].to_vec()));
            }
        }
        log::debug!("Stream /Length {} does not reach endstream, scanning", length);
    }

    match find_endstream(input) {
        Some(pos) => {
            let mut end = pos;
            if end > 0 && input[end - 1] == b'\n' {
                end -= 1;
            }
            if end > 0 && input[end - 1] == b'\r' {
                end -= 1;
            }
            let (rest, _) = token(&input[pos..])?;
            Ok((rest, input[..end].to_vec()))
        },
        None => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof))),
    }
}

fn find_endstream(input: &[u8]) -> Option<usize> {
    let keyword = b"endstream";
    input.windows(keyword.len()).position(|window| window == keyword)
}

fn parse_array(input: &[u8]) -> IResult<&[u8], Object> {
    let mut objects = Vec::new();
    let mut remaining = input;

    loop {
        match token(remaining) {
            Ok((inp, Token::ArrayEnd)) => return Ok((inp, Object::Array(objects))),
            Ok(_) => match parse_object(remaining) {
                Ok((inp, obj)) => {
                    objects.push(obj);
                    remaining = inp;
                },
                Err(e) => return Err(e),
            },
            Err(_) if is_exhausted(remaining) => {
                return Ok((&remaining[remaining.len()..], Object::Array(objects)))
            },
            Err(e) => return Err(e),
        }
    }
}

fn parse_dictionary(input: &[u8]) -> IResult<&[u8], Dict> {
    let mut dict = Dict::new();
    let mut remaining = input;

    loop {
        match token(remaining) {
            Ok((inp, Token::DictEnd)) => return Ok((inp, dict)),
            Ok((inp, Token::Name(key))) => {
                let (inp, value) = parse_object(inp)?;
                dict.insert(key, value);
                remaining = inp;
            },
            Ok(_) => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    remaining,
                    nom::error::ErrorKind::Tag,
                )))
            },
            Err(_) if is_exhausted(remaining) => {
                return Ok((&remaining[remaining.len()..], dict))
            },
            Err(e) => return Err(e),
        }
    }
}

fn is_exhausted(input: &[u8]) -> bool {
    crate::lexer::skip_ws(input)
        .map(|(rest, _)| rest.is_empty())
        .unwrap_or(false)
}

/// Decode a hex string body to bytes. Whitespace is ignored and an odd
/// trailing digit is padded with 0.
pub fn decode_hex(hex_bytes: &[u8]) -> Vec<u8> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .filter_map(|&c| (c as char).to_digit(16).map(|d| d as u8))
        .collect();
    digits
        .chunks(2)
        .map(|pair| pair[0] << 4 | pair.get(1).copied().unwrap_or(0))
        .collect()
}

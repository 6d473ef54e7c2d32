//! PDF lexer (tokenizer) for object syntax.
//!
//! Recognizes numbers, literal and hex strings, names, keywords and
//! delimiters. Whitespace (space, \t, \r, \n, \0, \f) and comments
//! (% to EOL) are skipped between tokens.
//!
//! The literal-string escape rules live here too, because both the object
//! parser and the content-stream tokenizer decode `( ... )` strings and must
//! agree byte for byte.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, value},
    sequence::{delimited, preceded},
    IResult,
};

/// Token types recognized by the lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g., 42, -123)
    Integer(i64),
    /// Real number (e.g., 3.14, -.5)
    Real(f64),
    /// Raw literal string bytes, escapes NOT decoded
    LiteralString(&'a [u8]),
    /// Raw hex string digits
    HexString(&'a [u8]),
    /// Name without the leading slash, `#xx` escapes decoded
    Name(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// `obj`
    ObjStart,
    /// `endobj`
    ObjEnd,
    /// `stream`
    StreamStart,
    /// `endstream`
    StreamEnd,
    /// `R`
    R,
}

/// PDF whitespace byte.
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter byte.
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn whitespace(input: &[u8]) -> IResult<&[u8], ()> {
    let (remaining, ws) = take_while(is_whitespace)(input)?;
    if ws.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Space)));
    }
    Ok((remaining, ()))
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip all whitespace and comments.
pub fn skip_ws(input: &[u8]) -> IResult<&[u8], ()> {
    let mut remaining = input;
    loop {
        if let Ok((rest, _)) = whitespace(remaining) {
            remaining = rest;
        } else if let Ok((rest, _)) = comment(remaining) {
            remaining = rest;
        } else {
            return Ok((remaining, ()));
        }
    }
}

/// Parse an integer or real: `42`, `-7`, `+3`, `3.14`, `.5`, `5.`
fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let start = input;
    let (input, _sign) = opt(one_of("+-"))(input)?;
    let (input, int_part) = opt(digit1)(input)?;
    let (input, frac_part) = opt(preceded(char('.'), opt(digit1)))(input)?;

    if int_part.is_none() && !matches!(frac_part, Some(Some(_))) {
        return Err(nom::Err::Error(nom::error::Error::new(start, nom::error::ErrorKind::Digit)));
    }

    let text = &start[..start.len() - input.len()];
    let text = std::str::from_utf8(text)
        .map_err(|_| nom::Err::Error(nom::error::Error::new(start, nom::error::ErrorKind::Digit)))?;

    if frac_part.is_some() {
        let normalized = text.trim_start_matches('+');
        let normalized = if normalized.ends_with('.') {
            format!("{}0", normalized)
        } else {
            normalized.to_string()
        };
        let num: f64 = normalized.parse().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(start, nom::error::ErrorKind::Float))
        })?;
        Ok((input, Token::Real(num)))
    } else {
        let num: i64 = text.trim_start_matches('+').parse().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(start, nom::error::ErrorKind::Digit))
        })?;
        Ok((input, Token::Integer(num)))
    }
}

/// Length of a balanced literal string starting at `(`, including both
/// parentheses. `None` when the string never closes.
///
/// An escaped parenthesis does not change the nesting depth; an unescaped
/// one does.
pub fn literal_string_len(input: &[u8]) -> Option<usize> {
    if input.first() != Some(&b'(') {
        return None;
    }
    let mut depth = 1usize;
    let mut pos = 1;
    while pos < input.len() {
        match input[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                pos += 1;
                if depth == 0 {
                    return Some(pos);
                }
            },
            _ => pos += 1,
        }
    }
    None
}

fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    match literal_string_len(input) {
        Some(len) => Ok((&input[len..], Token::LiteralString(&input[1..len - 1]))),
        None => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
    }
}

fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    delimited(
        char('<'),
        map(
            take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)),
            Token::HexString,
        ),
        char('>'),
    )(input)
}

fn hex_value(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

/// Decode `#xx` escapes in raw name bytes.
pub fn decode_name_escapes(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    crate::utils::latin1_decode(&out)
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)), |bytes: &[u8]| {
            Token::Name(decode_name_escapes(bytes))
        }),
    )(input)
}

fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        value(Token::False, tag(b"false")),
        value(Token::True, tag(b"true")),
        value(Token::Null, tag(b"null")),
        value(Token::ObjStart, tag(b"obj")),
        value(Token::ObjEnd, tag(b"endobj")),
        value(Token::StreamEnd, tag(b"endstream")),
        value(Token::StreamStart, tag(b"stream")),
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
        value(Token::R, tag(b"R")),
    ))(input)
}

/// Parse a single token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, _) = skip_ws(input)?;
    alt((parse_keyword, parse_name, parse_number, parse_literal_string, parse_hex_string))(input)
}

/// Decode escape sequences in the body of a literal string.
///
/// `\(`, `\)` and `\\` yield the character itself; `\n`, `\r` and `\t` yield
/// their control characters; `\b` and `\f` are consumed without output;
/// `\d`, `\dd`, `\ddd` are octal codes. Any other escaped character passes
/// through unchanged without its backslash.
pub fn unescape_literal(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let c = raw[i];
        if c != b'\\' {
            out.push(c);
            i += 1;
            continue;
        }
        let Some(&next) = raw.get(i + 1) else {
            // Trailing lone backslash.
            i += 1;
            continue;
        };
        match next {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' | b'f' => {},
            b'0'..=b'7' => {
                let mut value = 0u32;
                let mut len = 0;
                while len < 3 {
                    match raw.get(i + 1 + len) {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            len += 1;
                        },
                        _ => break,
                    }
                }
                out.push((value & 0xFF) as u8);
                i += 1 + len;
                continue;
            },
            other => out.push(other),
        }
        i += 2;
    }
    out
}

/// Escape bytes for use inside `( ... )`.
///
/// Only the structural characters `(`, `)` and `\` are escaped, so
/// `unescape_literal(escape_literal(s)) == s` for every input.
pub fn escape_literal(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 4);
    for &b in data {
        if matches!(b, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_and_reals() {
        assert_eq!(token(b"42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"-123"), Ok((&b""[..], Token::Integer(-123))));
        assert_eq!(token(b"+17"), Ok((&b""[..], Token::Integer(17))));
        assert_eq!(token(b"-2.5"), Ok((&b""[..], Token::Real(-2.5))));
        assert_eq!(token(b".5"), Ok((&b""[..], Token::Real(0.5))));
        assert_eq!(token(b"5."), Ok((&b""[..], Token::Real(5.0))));
        assert_eq!(token(b"-.002"), Ok((&b""[..], Token::Real(-0.002))));
    }

    #[test]
    fn test_literal_string_nesting() {
        assert_eq!(
            token(b"(Hello (nested) World)"),
            Ok((&b""[..], Token::LiteralString(b"Hello (nested) World")))
        );
        // Escaped close paren does not end the string.
        assert_eq!(token(b"(a\\)b)"), Ok((&b""[..], Token::LiteralString(b"a\\)b"))));
        assert_eq!(literal_string_len(b"(unterminated"), None);
    }

    #[test]
    fn test_names_and_keywords() {
        assert_eq!(token(b"/Type"), Ok((&b""[..], Token::Name("Type".to_string()))));
        assert_eq!(token(b"/A#20B"), Ok((&b""[..], Token::Name("A B".to_string()))));
        assert_eq!(token(b"  % comment\n<<"), Ok((&b""[..], Token::DictStart)));
        assert_eq!(token(b"endobj"), Ok((&b""[..], Token::ObjEnd)));
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(token(b"<48 65>"), Ok((&b""[..], Token::HexString(b"48 65"))));
    }

    #[test]
    fn test_unescape_standard_escapes() {
        assert_eq!(unescape_literal(b"a\\(b\\)c\\\\d"), b"a(b)c\\d");
        assert_eq!(unescape_literal(b"x\\ny\\rz\\t"), b"x\ny\rz\t");
        assert_eq!(unescape_literal(b"\\bgone\\f"), b"gone");
    }

    #[test]
    fn test_unescape_octal() {
        assert_eq!(unescape_literal(b"\\247"), vec![0xA7]);
        assert_eq!(unescape_literal(b"\\0619"), b"19");
        assert_eq!(unescape_literal(b"\\7x"), vec![7, b'x']);
    }

    #[test]
    fn test_unknown_escape_passes_through() {
        assert_eq!(unescape_literal(b"\\q"), b"q");
    }

    #[test]
    fn test_escape_round_trip() {
        let raw = b"f(x) = \\y";
        assert_eq!(unescape_literal(&escape_literal(raw)), raw.to_vec());
    }
}

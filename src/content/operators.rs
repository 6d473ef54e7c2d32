//! Content stream instructions.
//!
//! Content streams use postfix notation: operands come before their
//! operator. [`lex`] walks a stream once, front to back, and groups the
//! operands seen since the previous operator with the operator that
//! consumes them. Every operand and instruction keeps its byte range in the
//! stream text so that edits can splice replacement text in place.
//!
//! Operators never match inside literal strings, hex strings, comments or
//! inline image data.
//!
//! ```text
//! BT /F1 12 Tf 100 700 Td (Hello) Tj ET
//! └┘ └─────────┘ └──────────┘ └────────┘ └┘
//!  BT    Tf           Td          Tj     ET
//! ```

use crate::error::Error;
use crate::lexer::{decode_name_escapes, is_delimiter, is_whitespace, literal_string_len, unescape_literal};
use crate::utils::{latin1_decode, latin1_encode};
use std::ops::Range;

/// Operators that end a path by painting (or discarding) it.
pub const PAINT_OPERATORS: &[&str] = &["f", "F", "f*", "B", "B*", "b", "b*", "S", "s", "n"];

/// Path construction operators counted in a path summary.
pub const SEGMENT_OPERATORS: &[&str] = &["m", "l", "c", "v", "y", "h", "re"];

/// An operand value.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandValue {
    /// Integer or real number
    Number(f64),
    /// Name without the leading slash
    Name(String),
    /// Literal string, escapes decoded
    Literal(String),
    /// Hex string, decoded to bytes
    Hex(Vec<u8>),
    /// Array of operands
    Array(Vec<Operand>),
    /// Dictionary, boolean or null
    Other,
}

/// An operand and where it sits in the stream text.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    /// Decoded value
    pub value: OperandValue,
    /// Byte range of the operand's source text
    pub range: Range<usize>,
}

impl Operand {
    /// Numeric value, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self.value {
            OperandValue::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Name value, if this is a name.
    pub fn as_name(&self) -> Option<&str> {
        match &self.value {
            OperandValue::Name(n) => Some(n),
            _ => None,
        }
    }
}

/// One operator with its operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Operator keyword, e.g. `cm` or `Tj`
    pub operator: String,
    /// Operands in source order
    pub operands: Vec<Operand>,
    /// From the first operand (or the operator when there are none) to the
    /// end of the operator keyword
    pub range: Range<usize>,
}

impl Instruction {
    /// All operands as numbers, or `None` if any operand is not numeric.
    pub fn numbers(&self) -> Option<Vec<f64>> {
        self.operands.iter().map(Operand::as_number).collect()
    }

    /// Exactly `n` numeric operands.
    pub fn numbers_exact(&self, n: usize) -> Option<Vec<f64>> {
        self.numbers().filter(|v| v.len() == n)
    }

    /// Whether this operator paints or discards the current path.
    pub fn is_paint(&self) -> bool {
        PAINT_OPERATORS.contains(&self.operator.as_str())
    }

    /// Whether this operator adds a segment to the current path.
    pub fn is_segment(&self) -> bool {
        SEGMENT_OPERATORS.contains(&self.operator.as_str())
    }
}

/// Result of lexing one stream.
#[derive(Debug)]
pub struct Lexed {
    /// Complete instructions in stream order
    pub instructions: Vec<Instruction>,
    /// Set when a malformed construct stopped the pass early; instructions
    /// before that point are still valid
    pub truncated: Option<Error>,
}

/// Lex a content stream into instructions.
///
/// Lexing never fails. An unterminated string or array stops the pass and
/// is reported through [`Lexed::truncated`].
pub fn lex(src: &str) -> Lexed {
    let mut lexer = ContentLexer {
        src,
        bytes: src.as_bytes(),
        pos: 0,
    };
    let mut instructions = Vec::new();
    let mut operands: Vec<Operand> = Vec::new();

    loop {
        let item = match lexer.next_item() {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(err) => {
                log::debug!("Content stream truncated: {}", err);
                return Lexed {
                    instructions,
                    truncated: Some(err),
                };
            },
        };
        match item {
            Item::Operand(operand) => operands.push(operand),
            Item::Operator(operator, op_range) => {
                let start = operands.first().map_or(op_range.start, |o| o.range.start);
                instructions.push(Instruction {
                    operator,
                    operands: std::mem::take(&mut operands),
                    range: start..op_range.end,
                });
            },
            Item::ArrayEnd(offset) => {
                log::trace!("Stray ']' at byte {}", offset);
            },
        }
    }

    Lexed {
        instructions,
        truncated: None,
    }
}

enum Item {
    Operand(Operand),
    Operator(String, Range<usize>),
    ArrayEnd(usize),
}

struct ContentLexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ContentLexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws_and_comments(&mut self) {
        while let Some(c) = self.peek() {
            if is_whitespace(c) {
                self.pos += 1;
            } else if c == b'%' {
                while let Some(c) = self.peek() {
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn truncated(&self, offset: usize, reason: &str) -> Error {
        Error::Scan {
            offset,
            reason: reason.to_string(),
        }
    }

    fn next_item(&mut self) -> Result<Option<Item>, Error> {
        self.skip_ws_and_comments();
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        match c {
            b'(' => {
                let len = literal_string_len(&self.bytes[start..])
                    .ok_or_else(|| self.truncated(start, "unterminated literal string"))?;
                self.pos = start + len;
                let text = decode_literal(&self.src[start + 1..start + len - 1]);
                Ok(Some(Item::Operand(Operand {
                    value: OperandValue::Literal(text),
                    range: start..self.pos,
                })))
            },
            b'<' if self.bytes.get(start + 1) == Some(&b'<') => {
                self.skip_dictionary()?;
                Ok(Some(Item::Operand(Operand {
                    value: OperandValue::Other,
                    range: start..self.pos,
                })))
            },
            b'<' => {
                let end = self.bytes[start..]
                    .iter()
                    .position(|&b| b == b'>')
                    .ok_or_else(|| self.truncated(start, "unterminated hex string"))?;
                self.pos = start + end + 1;
                let data = crate::parser::decode_hex(&self.bytes[start + 1..start + end]);
                Ok(Some(Item::Operand(Operand {
                    value: OperandValue::Hex(data),
                    range: start..self.pos,
                })))
            },
            b'[' => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    match self.next_item()? {
                        Some(Item::Operand(operand)) => items.push(operand),
                        Some(Item::ArrayEnd(_)) => break,
                        Some(Item::Operator(name, range)) => {
                            // Keywords inside arrays (true, false, null) are values.
                            items.push(Operand {
                                value: OperandValue::Other,
                                range,
                            });
                            log::trace!("Keyword {} inside array", name);
                        },
                        None => return Err(self.truncated(start, "unterminated array")),
                    }
                }
                Ok(Some(Item::Operand(Operand {
                    value: OperandValue::Array(items),
                    range: start..self.pos,
                })))
            },
            b']' => {
                self.pos += 1;
                Ok(Some(Item::ArrayEnd(start)))
            },
            b'/' => {
                self.pos += 1;
                let end = self.regular_end(self.pos);
                self.pos = end;
                let name = decode_name_escapes(&latin1_encode(&self.src[start + 1..end]));
                Ok(Some(Item::Operand(Operand {
                    value: OperandValue::Name(name),
                    range: start..end,
                })))
            },
            b'{' | b'}' | b')' | b'>' => {
                // Not meaningful in page content; step over it.
                self.pos += 1;
                self.next_item()
            },
            _ => {
                let end = self.regular_end(start);
                self.pos = end;
                let word = &self.src[start..end];
                if let Some(n) = parse_number(word) {
                    return Ok(Some(Item::Operand(Operand {
                        value: OperandValue::Number(n),
                        range: start..end,
                    })));
                }
                match word {
                    "true" | "false" | "null" => Ok(Some(Item::Operand(Operand {
                        value: OperandValue::Other,
                        range: start..end,
                    }))),
                    "BI" => {
                        self.skip_inline_image(start);
                        Ok(Some(Item::Operator("BI".to_string(), start..self.pos)))
                    },
                    _ => Ok(Some(Item::Operator(word.to_string(), start..end))),
                }
            },
        }
    }

    /// End of a run of regular (non-delimiter, non-whitespace) bytes.
    fn regular_end(&self, from: usize) -> usize {
        self.bytes[from..]
            .iter()
            .position(|&b| is_whitespace(b) || is_delimiter(b))
            .map_or(self.bytes.len(), |p| from + p)
    }

    fn skip_dictionary(&mut self) -> Result<(), Error> {
        let start = self.pos;
        let mut depth = 0usize;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'<' if self.bytes.get(self.pos + 1) == Some(&b'<') => {
                    depth += 1;
                    self.pos += 2;
                },
                b'>' if self.bytes.get(self.pos + 1) == Some(&b'>') => {
                    depth -= 1;
                    self.pos += 2;
                    if depth == 0 {
                        return Ok(());
                    }
                },
                b'(' => {
                    let len = literal_string_len(&self.bytes[self.pos..])
                        .ok_or_else(|| self.truncated(self.pos, "unterminated literal string"))?;
                    self.pos += len;
                },
                _ => self.pos += 1,
            }
        }
        Err(self.truncated(start, "unterminated dictionary"))
    }

    /// Skip `BI <dict> ID <data> EI`, leaving `pos` after `EI`.
    fn skip_inline_image(&mut self, start: usize) {
        let is_end = |bytes: &[u8], at: usize| bytes.get(at).map_or(true, |&b| is_whitespace(b) || is_delimiter(b));
        let mut i = start + 2;
        let mut data_start = None;
        while i + 1 < self.bytes.len() {
            if &self.bytes[i..i + 2] == b"ID" && is_whitespace(self.bytes[i - 1]) && is_end(self.bytes, i + 2) {
                data_start = Some(i + 3);
                break;
            }
            i += 1;
        }
        let Some(mut i) = data_start else {
            self.pos = self.bytes.len();
            return;
        };
        while i + 1 < self.bytes.len() {
            if &self.bytes[i..i + 2] == b"EI" && is_whitespace(self.bytes[i - 1]) && is_end(self.bytes, i + 2) {
                self.pos = i + 2;
                return;
            }
            i += 1;
        }
        log::debug!("Inline image at byte {} has no EI", start);
        self.pos = self.bytes.len();
    }
}

/// Parse a PDF number (`12`, `-3.5`, `.5`, `+1.`); exponents are not PDF
/// syntax and are rejected.
fn parse_number(word: &str) -> Option<f64> {
    let digits = word.strip_prefix(['+', '-']).unwrap_or(word);
    let valid = !digits.is_empty()
        && digits.bytes().any(|b| b.is_ascii_digit())
        && digits.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && digits.bytes().filter(|&b| b == b'.').count() <= 1;
    if !valid {
        return None;
    }
    let normalized = if digits.ends_with('.') {
        &word[..word.len() - 1]
    } else {
        word
    };
    normalized.parse().ok()
}

/// Decode the inside of a literal string (without the parentheses).
///
/// Reverses `\(`, `\)`, `\\`, `\n`, `\r`, `\t` and 1-3 digit octal escapes;
/// `\b` and `\f` are dropped and any other escaped character stands for
/// itself.
pub fn decode_literal(raw: &str) -> String {
    latin1_decode(&unescape_literal(&latin1_encode(raw)))
}

/// Encode text for the inside of a literal string. Only `(`, `)` and `\`
/// are escaped.
pub fn encode_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        if matches!(c, '(' | ')' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(src: &str) -> Vec<String> {
        lex(src).instructions.into_iter().map(|i| i.operator).collect()
    }

    #[test]
    fn test_lex_basic_text_object() {
        let src = "BT /F1 12 Tf 100 700 Td (Hello) Tj ET";
        let lexed = lex(src);
        assert!(lexed.truncated.is_none());
        let ins = &lexed.instructions;
        assert_eq!(ops(src), vec!["BT", "Tf", "Td", "Tj", "ET"]);
        assert_eq!(&src[ins[1].range.clone()], "/F1 12 Tf");
        assert_eq!(ins[1].operands[0].as_name(), Some("F1"));
        assert_eq!(ins[2].numbers_exact(2), Some(vec![100.0, 700.0]));
        assert_eq!(&src[ins[3].range.clone()], "(Hello) Tj");
    }

    #[test]
    fn test_lex_skips_strings_and_comments() {
        let src = "(1 0 0 1 5 5 cm) Tj % 2 0 0 2 0 0 cm\n<3020636d> Tj";
        assert_eq!(ops(src), vec!["Tj", "Tj"]);
    }

    #[test]
    fn test_lex_array_operand() {
        let src = "[(A) -120 (B)] TJ";
        let ins = lex(src).instructions;
        assert_eq!(ins.len(), 1);
        match &ins[0].operands[0].value {
            OperandValue::Array(items) => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[1].as_number(), Some(-120.0));
            },
            other => panic!("expected array, got {:?}", other),
        }
        assert_eq!(ins[0].range, 0..src.len());
    }

    #[test]
    fn test_lex_inline_image_is_opaque() {
        let src = "q BI /W 2 /H 1 ID \x00Tj\u{ff} EI Q";
        assert_eq!(ops(src), vec!["q", "BI", "Q"]);
    }

    #[test]
    fn test_lex_marked_content_dictionary() {
        let src = "/Span << /ActualText (x) >> BDC (y) Tj EMC";
        assert_eq!(ops(src), vec!["BDC", "Tj", "EMC"]);
    }

    #[test]
    fn test_lex_truncates_on_unterminated_string() {
        let lexed = lex("(a) Tj (b) Tj (never closed Tj");
        assert_eq!(lexed.instructions.len(), 2);
        assert!(matches!(lexed.truncated, Some(Error::Scan { offset: 14, .. })));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("12"), Some(12.0));
        assert_eq!(parse_number("-3.5"), Some(-3.5));
        assert_eq!(parse_number(".5"), Some(0.5));
        assert_eq!(parse_number("4."), Some(4.0));
        assert_eq!(parse_number("1e5"), None);
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number("Tj"), None);
    }

    #[test]
    fn test_literal_escapes() {
        assert_eq!(decode_literal(r"a\(b\)c\\d"), "a(b)c\\d");
        assert_eq!(decode_literal(r"x\ny\tz"), "x\ny\tz");
        assert_eq!(decode_literal(r"\b\fq"), "q");
        assert_eq!(decode_literal(r"\101\60"), "A0");
        assert_eq!(decode_literal(r"\q"), "q");
        assert_eq!(encode_literal("f(x) = \\"), r"f\(x\) = \\");
    }

    #[test]
    fn test_paint_and_segment_classification() {
        let ins = lex("10 10 m 20 20 l h f*").instructions;
        assert!(ins[0].is_segment());
        assert!(ins[2].is_segment());
        assert!(ins[3].is_paint());
    }
}

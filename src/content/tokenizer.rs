//! Show-text tokens.
//!
//! A token is either `(string) Tj` or `[(a) -250 (b)] TJ`. Array tokens may
//! only hold literal strings and numbers; any other element disqualifies
//! the array.

use super::operators::{lex, Instruction, OperandValue};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Shape of a show-text token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowKind {
    /// `(string) Tj`
    Single,
    /// `[...] TJ`
    Array,
}

/// A show-text token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowToken {
    /// Token shape
    pub kind: ShowKind,
    /// From the opening `(` or `[` through the operator
    pub range: Range<usize>,
    /// Concatenated decoded text
    pub text: String,
    /// Byte range of each literal string in the token
    pub segments: Vec<Range<usize>>,
}

/// Tokenize the show-text operators of a content stream.
///
/// A malformed string ends tokenization; tokens before it are returned.
pub fn tokenize(src: &str) -> Vec<ShowToken> {
    show_tokens(&lex(src).instructions)
}

/// Show-text tokens from already-lexed instructions.
pub fn show_tokens(instructions: &[Instruction]) -> Vec<ShowToken> {
    instructions.iter().filter_map(show_token).collect()
}

/// The show-text token for one instruction, if it is one.
pub fn show_token(ins: &Instruction) -> Option<ShowToken> {
    let [operand] = ins.operands.as_slice() else {
        return None;
    };
    match (ins.operator.as_str(), &operand.value) {
        ("Tj", OperandValue::Literal(text)) => Some(ShowToken {
            kind: ShowKind::Single,
            range: operand.range.start..ins.range.end,
            text: text.clone(),
            segments: vec![operand.range.clone()],
        }),
        ("TJ", OperandValue::Array(items)) => {
            let mut text = String::new();
            let mut segments = Vec::new();
            for item in items {
                match &item.value {
                    OperandValue::Literal(s) => {
                        text.push_str(s);
                        segments.push(item.range.clone());
                    },
                    OperandValue::Number(_) => {},
                    _ => return None,
                }
            }
            Some(ShowToken {
                kind: ShowKind::Array,
                range: operand.range.start..ins.range.end,
                text,
                segments,
            })
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_show() {
        let src = "BT 10 20 Td (Hello) Tj ET";
        let tokens = tokenize(src);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, ShowKind::Single);
        assert_eq!(tokens[0].text, "Hello");
        assert_eq!(&src[tokens[0].range.clone()], "(Hello) Tj");
    }

    #[test]
    fn test_array_show_concatenates() {
        let src = "[(Hel) -20 (lo) 3.5 ( world)]\n  TJ";
        let tokens = tokenize(src);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, ShowKind::Array);
        assert_eq!(tokens[0].text, "Hello world");
        assert_eq!(tokens[0].range, 0..src.len());
        assert_eq!(tokens[0].segments.len(), 3);
    }

    #[test]
    fn test_nested_parentheses() {
        let tokens = tokenize(r"(f(x \) Tj");
        assert!(tokens.is_empty());
        let tokens = tokenize(r"(f(x) \(y\)) Tj");
        assert_eq!(tokens[0].text, "f(x) (y)");
    }

    #[test]
    fn test_array_without_show_operator_is_skipped() {
        let tokens = tokenize("[(a) (b)] d0 [1 2] 0 d (c) Tj");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "c");
    }

    #[test]
    fn test_array_with_hex_string_is_skipped() {
        assert!(tokenize("[<0041> (b)] TJ").is_empty());
    }

    #[test]
    fn test_unterminated_string_keeps_earlier_tokens() {
        let tokens = tokenize("(one) Tj [(two)] TJ (thr");
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn test_operators_in_strings_are_ignored() {
        let tokens = tokenize("(a\\) Tj b) Tj");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "a) Tj b");
    }
}

//! Mutation primitives.
//!
//! Each primitive looks at one scanned item and the stream text it was
//! scanned from, and returns a [`Replacement`]: the byte range to replace,
//! the text expected there, and the new text. Operators attached to the
//! item are rewritten in place; when an item has no transform, a new `cm`
//! is inserted directly before its own instruction.
//!
//! Nothing here modifies a stream. Callers splice the replacement with
//! [`Replacement::apply`], which refuses to touch a stream whose text at the
//! recorded range has changed since the scan.

use super::items::{EditableItem, PositionKind, RectItem, TextRun};
use super::matrix::Matrix;
use super::operators::encode_literal;
use crate::error::{Error, Result};
use crate::utils::format_number;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Font used when a run without a `Tf` gets a size.
pub const FALLBACK_FONT: &str = "Helv";

/// A requested change to one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Replace a run's text
    ReplaceText {
        /// New text
        text: String,
    },
    /// Set a run's font size
    SetFontSize {
        /// New size
        size: f64,
    },
    /// Move a run to an absolute position
    SetTextPosition {
        /// New x
        x: f64,
        /// New y
        y: f64,
    },
    /// Translate a drawn item, or move a run by an offset
    Translate {
        /// Horizontal offset
        dx: f64,
        /// Vertical offset
        dy: f64,
    },
    /// Scale a drawn item's transform diagonal
    Rescale {
        /// Horizontal factor
        sx: f64,
        /// Vertical factor
        sy: f64,
    },
    /// Replace a drawn item's transform
    SetMatrix {
        /// New matrix
        matrix: Matrix,
    },
    /// Rewrite a rectangle's operands
    ResizeRect {
        /// Lower-left x
        x: f64,
        /// Lower-left y
        y: f64,
        /// Width
        w: f64,
        /// Height
        h: f64,
    },
}

/// Replacement text for a byte range of one content stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    /// Page index
    pub page: usize,
    /// Content stream index within the page
    pub stream: usize,
    /// Range in the stream text
    pub range: Range<usize>,
    /// Text the range must still hold
    pub expected: String,
    /// New text for the range
    pub text: String,
    /// `text` is new operator text followed by `expected` unchanged
    pub insertion: bool,
}

impl Replacement {
    fn at(page: usize, stream: usize, range: Range<usize>, src: &str) -> Result<Self> {
        let expected = src
            .get(range.clone())
            .ok_or(Error::StreamNotFound {
                page,
                stream,
                offset: range.start,
            })?
            .to_string();
        Ok(Self {
            page,
            stream,
            range,
            expected,
            text: String::new(),
            insertion: false,
        })
    }

    fn rewrite(mut self, text: String) -> Self {
        self.text = text;
        self
    }

    fn insert_before(mut self, prefix: &str) -> Self {
        self.text = format!("{} {}", prefix, self.expected);
        self.insertion = true;
        self
    }

    /// Whether the stream still holds the expected text at the range.
    pub fn matches(&self, src: &str) -> bool {
        src.get(self.range.clone()) == Some(self.expected.as_str())
    }

    /// Splice into `src`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotFound`] when the range no longer holds the
    /// expected text; `src` is left as is.
    pub fn apply(&self, src: &str) -> Result<String> {
        if !self.matches(src) {
            return Err(Error::StreamNotFound {
                page: self.page,
                stream: self.stream,
                offset: self.range.start,
            });
        }
        let mut out = String::with_capacity(src.len() + self.text.len());
        out.push_str(&src[..self.range.start]);
        out.push_str(&self.text);
        out.push_str(&src[self.range.end..]);
        Ok(out)
    }

    /// Change in stream length.
    pub fn delta(&self) -> isize {
        self.text.len() as isize - self.range.len() as isize
    }

    /// Where a byte offset of the old text lands in the new text.
    ///
    /// Offsets after the range shift by [`delta`](Self::delta). For an
    /// insertion, the start of the range follows the original instruction.
    pub fn map_offset(&self, pos: usize) -> usize {
        if pos >= self.range.end && pos > self.range.start {
            pos.saturating_add_signed(self.delta())
        } else if pos == self.range.start && self.insertion {
            pos + (self.text.len() - self.expected.len())
        } else {
            pos
        }
    }
}

/// Compute the replacement for `mutation` applied to `item`.
///
/// # Errors
///
/// [`Error::InvalidState`] when the mutation does not apply to the item's
/// kind, [`Error::StreamNotFound`] when the item's ranges are outside `src`.
pub fn plan(item: &EditableItem, src: &str, mutation: &Mutation, precision: usize) -> Result<Replacement> {
    match (item, mutation) {
        (EditableItem::TextRun(run), Mutation::ReplaceText { text }) => replace_text(run, src, text),
        (EditableItem::TextRun(run), Mutation::SetFontSize { size }) => set_font_size(run, src, *size, precision),
        (EditableItem::TextRun(run), Mutation::SetTextPosition { x, y }) => {
            set_text_position(run, src, *x, *y, precision)
        },
        (EditableItem::TextRun(run), Mutation::Translate { dx, dy }) => nudge_text(run, src, *dx, *dy, precision),
        (EditableItem::TextRun(_), other) => Err(Error::InvalidState(format!(
            "{} does not apply to a text run",
            mutation_name(other)
        ))),
        (_, Mutation::Translate { dx, dy }) => translate(item, src, *dx, *dy, precision),
        (_, Mutation::Rescale { sx, sy }) => rescale(item, src, *sx, *sy, precision),
        (_, Mutation::SetMatrix { matrix }) => set_matrix(item, src, matrix, precision),
        (EditableItem::Rect(rect), Mutation::ResizeRect { x, y, w, h }) => {
            resize_rect(rect, src, [*x, *y, *w, *h], precision)
        },
        (_, other) => Err(Error::InvalidState(format!(
            "{} does not apply to this item",
            mutation_name(other)
        ))),
    }
}

fn mutation_name(mutation: &Mutation) -> &'static str {
    match mutation {
        Mutation::ReplaceText { .. } => "replace_text",
        Mutation::SetFontSize { .. } => "set_font_size",
        Mutation::SetTextPosition { .. } => "set_text_position",
        Mutation::Translate { .. } => "translate",
        Mutation::Rescale { .. } => "rescale",
        Mutation::SetMatrix { .. } => "set_matrix",
        Mutation::ResizeRect { .. } => "resize_rect",
    }
}

/// Replace a run with `[(text)] TJ`, whatever its original tokens were.
pub fn replace_text(run: &TextRun, src: &str, text: &str) -> Result<Replacement> {
    if let Some(c) = text.chars().find(|c| u32::from(*c) > 0xFF) {
        return Err(Error::InvalidState(format!(
            "{:?} has no single-byte encoding in a content stream",
            c
        )));
    }
    let replacement = Replacement::at(run.page, run.stream, run.range.clone(), src)?;
    Ok(replacement.rewrite(format!("[({})] TJ", encode_literal(text))))
}

/// Rewrite the run's `Tf` size, or insert `/Helv size Tf` before the run.
pub fn set_font_size(run: &TextRun, src: &str, size: f64, precision: usize) -> Result<Replacement> {
    let size = format_number(size, precision);
    match &run.font {
        Some(font) => {
            let replacement = Replacement::at(run.page, run.stream, font.range.clone(), src)?;
            Ok(replacement.rewrite(format!("/{} {} Tf", font.name, size)))
        },
        None => {
            let replacement = Replacement::at(run.page, run.stream, run.range.clone(), src)?;
            Ok(replacement.insert_before(&format!("/{} {} Tf", FALLBACK_FONT, size)))
        },
    }
}

/// Move a run so that its position operator yields `(x, y)`.
///
/// # Errors
///
/// [`Error::InvalidState`] when the run has no `Tm` or `Td`.
pub fn set_text_position(run: &TextRun, src: &str, x: f64, y: f64, precision: usize) -> Result<Replacement> {
    let (Some(cx), Some(cy)) = (run.x(), run.y()) else {
        return Err(Error::InvalidState("no position operator for this text".to_string()));
    };
    nudge_text(run, src, x - cx, y - cy, precision)
}

/// Shift a run's position operator by `(dx, dy)`.
///
/// # Errors
///
/// [`Error::InvalidState`] when the run has no `Tm` or `Td`.
pub fn nudge_text(run: &TextRun, src: &str, dx: f64, dy: f64, precision: usize) -> Result<Replacement> {
    let position = run
        .position
        .as_ref()
        .ok_or_else(|| Error::InvalidState("no position operator for this text".to_string()))?;
    let num = |v: f64| format_number(v, precision);
    let text = match (position.kind, position.values.as_slice()) {
        (PositionKind::RelativeMove, [tx, ty]) => format!("{} {} Td", num(tx + dx), num(ty + dy)),
        (PositionKind::AbsoluteMatrix, [a, b, c, d, e, f]) => format!(
            "{} {} {} {} {} {} Tm",
            num(*a),
            num(*b),
            num(*c),
            num(*d),
            num(e + dx),
            num(f + dy)
        ),
        _ => {
            return Err(Error::InvalidState(format!(
                "{} has {} operand(s)",
                position.kind.operator(),
                position.values.len()
            )))
        },
    };
    let replacement = Replacement::at(run.page, run.stream, position.range.clone(), src)?;
    Ok(replacement.rewrite(text))
}

/// Current transform of a drawn item; identity when none is attached.
pub fn current_matrix(item: &EditableItem) -> Matrix {
    item.transform().map(|t| t.matrix).unwrap_or_default()
}

/// Set a drawn item's transform. Rewrites the attached `cm`, or inserts
/// one before the item's instruction.
///
/// # Errors
///
/// [`Error::InvalidState`] for text runs.
pub fn set_matrix(item: &EditableItem, src: &str, matrix: &Matrix, precision: usize) -> Result<Replacement> {
    if matches!(item, EditableItem::TextRun(_)) {
        return Err(Error::InvalidState("text runs have no cm to rewrite".to_string()));
    }
    let cm = matrix.to_cm(precision);
    match item.transform() {
        Some(t) => Ok(Replacement::at(item.page(), item.stream(), t.range.clone(), src)?.rewrite(cm)),
        None => Ok(Replacement::at(item.page(), item.stream(), item.range().clone(), src)?.insert_before(&cm)),
    }
}

/// `(a, b, c, d, e + dx, f + dy)`
pub fn translate(item: &EditableItem, src: &str, dx: f64, dy: f64, precision: usize) -> Result<Replacement> {
    set_matrix(item, src, &current_matrix(item).translated(dx, dy), precision)
}

/// `(a * sx, b, c, d * sy, e, f)`
pub fn rescale(item: &EditableItem, src: &str, sx: f64, sy: f64, precision: usize) -> Result<Replacement> {
    set_matrix(item, src, &current_matrix(item).rescaled(sx, sy), precision)
}

/// Rewrite the `re` operands.
pub fn resize_rect(rect: &RectItem, src: &str, xywh: [f64; 4], precision: usize) -> Result<Replacement> {
    let operands: Vec<String> = xywh.iter().map(|v| format_number(*v, precision)).collect();
    let replacement = Replacement::at(rect.page, rect.stream, rect.range.clone(), src)?;
    Ok(replacement.rewrite(format!("{} re", operands.join(" "))))
}

/// Move a group of rectangles from one stream.
///
/// Rectangles with a transform get their `cm` translated; the others get
/// their operands rewritten. Rectangles sharing one `cm` move it once. The
/// result is ordered last range first so it can be applied in sequence.
pub fn bulk_translate_rects(
    rects: &[RectItem],
    src: &str,
    dx: f64,
    dy: f64,
    precision: usize,
) -> Result<Vec<Replacement>> {
    let mut by_start: BTreeMap<usize, Replacement> = BTreeMap::new();
    for rect in rects {
        let replacement = match &rect.transform {
            Some(_) => translate(&EditableItem::Rect(rect.clone()), src, dx, dy, precision)?,
            None => resize_rect(rect, src, [rect.x + dx, rect.y + dy, rect.w, rect.h], precision)?,
        };
        by_start.entry(replacement.range.start).or_insert(replacement);
    }
    Ok(by_start.into_values().rev().collect())
}

/// Apply replacements computed against the same text, last range first.
///
/// # Errors
///
/// [`Error::StreamNotFound`] if any range does not match; no partial result
/// is returned.
pub fn apply_all(src: &str, replacements: &[Replacement]) -> Result<String> {
    let mut ordered: Vec<&Replacement> = replacements.iter().collect();
    ordered.sort_by(|a, b| b.range.start.cmp(&a.range.start));
    if let Some(bad) = ordered.iter().find(|r| !r.matches(src)) {
        return Err(Error::StreamNotFound {
            page: bad.page,
            stream: bad.stream,
            offset: bad.range.start,
        });
    }
    let mut out = src.to_string();
    for replacement in ordered {
        out.replace_range(replacement.range.clone(), &replacement.text);
    }
    Ok(out)
}

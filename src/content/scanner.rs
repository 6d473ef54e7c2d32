//! Editable item scanning.
//!
//! One forward pass per stream keeps the latest `Tm`/`Td`, `Tf` and `cm`
//! seen so far, so every item gets its nearest preceding operator without
//! searching backwards. Text positions and fonts are looked up across the
//! whole stream; transforms for draws, rectangles and paths only count when
//! they lie within [`ScanOptions::lookback_window`] bytes of the item.

use super::items::{
    EditableItem, FontOp, PageItems, PaintOp, PathItem, PositionKind, PositionOp, RectItem, TextRun,
    TransformOp, XObjectDraw, XObjectKind,
};
use super::matrix::Matrix;
use super::operators::{lex, Instruction};
use super::tokenizer::{show_token, ShowToken};
use crate::config::ScanOptions;
use crate::utils::safe_float_cmp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Characters kept in a path preview.
const PREVIEW_CHARS: usize = 120;

/// Input for scanning one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Page index
    pub page_index: usize,
    /// Decoded text of each content stream, in order
    pub streams: Vec<String>,
    /// XObject resource name to subtype
    pub xobject_kinds: HashMap<String, XObjectKind>,
    /// Tolerances and lookback
    pub options: ScanOptions,
}

/// Scan every content stream of a page.
///
/// Text runs are coalesced per stream and then sorted top of page first;
/// runs without a coordinate sort as `y = 0`. Draws, rectangles and paths
/// keep stream order.
pub fn scan_page(request: &ScanRequest) -> PageItems {
    let mut page = PageItems::new(request.page_index);
    for (stream, src) in request.streams.iter().enumerate() {
        let scanned = scan_stream(request.page_index, stream, src, &request.xobject_kinds, &request.options);
        if scanned.truncated {
            page.truncated_streams.push(stream);
        }
        page.text_runs.extend(scanned.text_runs);
        page.xobjects.extend(scanned.xobjects);
        page.rects.extend(scanned.rects);
        page.paths.extend(scanned.paths);
    }
    page.text_runs
        .sort_by(|a, b| safe_float_cmp(b.y().unwrap_or(0.0), a.y().unwrap_or(0.0)));
    page
}

/// Items of one stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamItems {
    /// Coalesced runs in stream order
    pub text_runs: Vec<TextRun>,
    /// XObject draws
    pub xobjects: Vec<XObjectDraw>,
    /// Rectangles
    pub rects: Vec<RectItem>,
    /// Paths
    pub paths: Vec<PathItem>,
    /// Whether malformed syntax stopped the scan early
    pub truncated: bool,
}

impl StreamItems {
    /// All items as [`EditableItem`]s.
    pub fn into_items(self) -> Vec<EditableItem> {
        let text = self.text_runs.into_iter().map(EditableItem::from);
        let xobjects = self.xobjects.into_iter().map(EditableItem::from);
        let rects = self.rects.into_iter().map(EditableItem::from);
        let paths = self.paths.into_iter().map(EditableItem::from);
        text.chain(xobjects).chain(rects).chain(paths).collect()
    }
}

/// A show-text token with the operators in effect where it starts.
#[derive(Debug, Clone)]
struct PlacedToken {
    token: ShowToken,
    position: Option<PositionOp>,
    font: Option<FontOp>,
}

impl PlacedToken {
    fn x(&self) -> Option<f64> {
        self.position.as_ref().and_then(PositionOp::x)
    }

    fn y(&self) -> Option<f64> {
        self.position.as_ref().and_then(PositionOp::y)
    }
}

struct OpenPath {
    start: usize,
    segments: usize,
    transform: Option<TransformOp>,
}

/// Scan one content stream.
pub fn scan_stream(
    page: usize,
    stream: usize,
    src: &str,
    xobject_kinds: &HashMap<String, XObjectKind>,
    options: &ScanOptions,
) -> StreamItems {
    let lexed = lex(src);
    let mut out = StreamItems {
        truncated: lexed.truncated.is_some(),
        ..Default::default()
    };
    if let Some(err) = &lexed.truncated {
        log::warn!("Page {} stream {}: {}", page, stream, err);
    }

    let mut position: Option<PositionOp> = None;
    let mut font: Option<FontOp> = None;
    let mut transform: Option<TransformOp> = None;
    let mut tokens: Vec<PlacedToken> = Vec::new();
    let mut unpainted_rects: Vec<usize> = Vec::new();
    let mut open_path: Option<OpenPath> = None;

    let attach = |transform: &Option<TransformOp>, at: usize| -> Option<TransformOp> {
        transform
            .as_ref()
            .filter(|t| t.range.end <= at && t.range.start >= at.saturating_sub(options.lookback_window))
            .cloned()
    };

    for ins in &lexed.instructions {
        match ins.operator.as_str() {
            "Tm" => {
                if let Some(values) = ins.numbers_exact(6) {
                    position = Some(PositionOp {
                        kind: PositionKind::AbsoluteMatrix,
                        range: ins.range.clone(),
                        values,
                    });
                }
            },
            "Td" => {
                if let Some(values) = ins.numbers_exact(2) {
                    position = Some(PositionOp {
                        kind: PositionKind::RelativeMove,
                        range: ins.range.clone(),
                        values,
                    });
                }
            },
            "Tf" => {
                if let Some(op) = font_op(ins) {
                    font = Some(op);
                }
            },
            "Tj" | "TJ" => {
                if let Some(token) = show_token(ins) {
                    tokens.push(PlacedToken {
                        token,
                        position: position.clone(),
                        font: font.clone(),
                    });
                }
            },
            "cm" => {
                if let Some(matrix) = ins.numbers().as_deref().and_then(Matrix::from_operands) {
                    transform = Some(TransformOp {
                        matrix,
                        range: ins.range.clone(),
                    });
                }
            },
            "Do" => {
                if let [operand] = ins.operands.as_slice() {
                    if let Some(name) = operand.as_name() {
                        out.xobjects.push(XObjectDraw {
                            page,
                            stream,
                            name: name.to_string(),
                            kind: xobject_kinds.get(name).copied().unwrap_or(XObjectKind::Unknown),
                            range: ins.range.clone(),
                            transform: attach(&transform, ins.range.start),
                        });
                    }
                }
            },
            "re" => {
                if let Some(v) = ins.numbers_exact(4) {
                    unpainted_rects.push(out.rects.len());
                    out.rects.push(RectItem {
                        page,
                        stream,
                        range: ins.range.clone(),
                        x: v[0],
                        y: v[1],
                        w: v[2],
                        h: v[3],
                        paint: None,
                        transform: attach(&transform, ins.range.start),
                    });
                }
            },
            "m" if open_path.is_none() && ins.numbers_exact(2).is_some() => {
                open_path = Some(OpenPath {
                    start: ins.range.start,
                    segments: 0,
                    transform: attach(&transform, ins.range.start),
                });
            },
            _ => {},
        }

        if let Some(path) = open_path.as_mut() {
            if ins.is_segment() {
                path.segments += 1;
            }
        }

        if ins.is_paint() {
            let paint = paint_op(ins);
            for index in unpainted_rects.drain(..) {
                out.rects[index].paint = Some(paint.clone());
            }
            if let Some(path) = open_path.take() {
                let range = path.start..ins.range.end;
                out.paths.push(PathItem {
                    page,
                    stream,
                    preview: preview(&src[range.clone()]),
                    range,
                    paint,
                    segment_count: path.segments,
                    transform: path.transform,
                });
            }
        }
    }

    out.text_runs = coalesce(page, stream, tokens, options);
    out
}

fn font_op(ins: &Instruction) -> Option<FontOp> {
    let [name, size] = ins.operands.as_slice() else {
        return None;
    };
    Some(FontOp {
        name: name.as_name()?.to_string(),
        size: size.as_number()?,
        range: ins.range.clone(),
    })
}

fn paint_op(ins: &Instruction) -> PaintOp {
    let start = ins.range.end - ins.operator.len();
    PaintOp {
        operator: ins.operator.clone(),
        range: start..ins.range.end,
    }
}

fn preview(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(PREVIEW_CHARS)
        .collect()
}

/// Group consecutive tokens into runs.
///
/// A token joins the current run when its `y` is within `y_tolerance` of the
/// previous token's and its `x` is at most `x_tolerance` past the previous
/// token's. A missing coordinate passes either check.
fn coalesce(page: usize, stream: usize, tokens: Vec<PlacedToken>, options: &ScanOptions) -> Vec<TextRun> {
    let mut runs: Vec<Vec<PlacedToken>> = Vec::new();
    for token in tokens {
        let joins = runs
            .last()
            .and_then(|run| run.last())
            .map(|prev| {
                let same_row = match (token.y(), prev.y()) {
                    (Some(y), Some(py)) => (y - py).abs() <= options.y_tolerance,
                    _ => true,
                };
                let close_x = match (token.x(), prev.x()) {
                    (Some(x), Some(px)) => x - px <= options.x_tolerance,
                    _ => true,
                };
                same_row && close_x
            })
            .unwrap_or(false);
        match runs.last_mut() {
            Some(run) if joins => run.push(token),
            _ => runs.push(vec![token]),
        }
    }

    runs.into_iter()
        .filter_map(|members| {
            let first = members.first()?.clone();
            let last = members.last()?;
            Some(TextRun {
                page,
                stream,
                range: first.token.range.start..last.token.range.end,
                text: members.iter().map(|m| m.token.text.as_str()).collect(),
                segments: members
                    .iter()
                    .flat_map(|m| m.token.segments.iter().cloned())
                    .collect(),
                position: first.position,
                font: first.font,
            })
        })
        .collect()
}

/// One row of a rectangle table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    /// `y` of the rectangle that started the row
    pub y: f64,
    /// Cells left to right
    pub cells: Vec<RectItem>,
}

/// Rectangles grouped as a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RectTable {
    /// Rows top to bottom
    pub rows: Vec<TableRow>,
    /// Column start positions left to right
    pub columns: Vec<f64>,
}

impl RectTable {
    /// Column index of a cell.
    pub fn column_of(&self, cell: &RectItem) -> Option<usize> {
        self.columns
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| safe_float_cmp((*a - cell.x).abs(), (*b - cell.x).abs()))
            .map(|(i, _)| i)
    }
}

/// Bucket rectangles into rows, top-down.
///
/// A rectangle joins the first row whose starting `y` is within
/// `y_tolerance`. Cells in a row are sorted by `x`. Column starts cluster
/// `x` values within `x_tolerance` of each other.
pub fn group_rects_as_table(rects: &[RectItem], y_tolerance: f64, x_tolerance: f64) -> RectTable {
    let mut sorted: Vec<RectItem> = rects.to_vec();
    sorted.sort_by(|a, b| safe_float_cmp(b.y, a.y));

    let mut rows: Vec<TableRow> = Vec::new();
    for rect in sorted {
        match rows.iter_mut().find(|row| (row.y - rect.y).abs() <= y_tolerance) {
            Some(row) => row.cells.push(rect),
            None => rows.push(TableRow {
                y: rect.y,
                cells: vec![rect],
            }),
        }
    }
    for row in &mut rows {
        row.cells.sort_by(|a, b| safe_float_cmp(a.x, b.x));
    }

    let mut xs: Vec<f64> = rects.iter().map(|r| r.x).collect();
    xs.sort_by(|a, b| safe_float_cmp(*a, *b));
    let mut columns: Vec<f64> = Vec::new();
    for x in xs {
        match columns.last() {
            Some(last) if x - last <= x_tolerance => {},
            _ => columns.push(x),
        }
    }

    RectTable { rows, columns }
}

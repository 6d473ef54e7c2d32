//! Editable items found in page content.
//!
//! Every byte range refers to the stream text as it was when the item was
//! scanned. Editing a stream invalidates all items scanned from it before
//! the edit; rescan the page after each change.

use super::matrix::Matrix;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Which operator positions a text run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PositionKind {
    /// `a b c d e f Tm`
    AbsoluteMatrix,
    /// `tx ty Td`
    RelativeMove,
}

impl PositionKind {
    /// Operator keyword.
    pub fn operator(&self) -> &'static str {
        match self {
            PositionKind::AbsoluteMatrix => "Tm",
            PositionKind::RelativeMove => "Td",
        }
    }
}

/// Position operator attached to a text run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionOp {
    /// `Tm` or `Td`
    pub kind: PositionKind,
    /// Byte range of the whole instruction
    pub range: Range<usize>,
    /// Operands (six for `Tm`, two for `Td`)
    pub values: Vec<f64>,
}

impl PositionOp {
    /// Horizontal coordinate: `e` of `Tm`, `tx` of `Td`. `None` when the
    /// operands are short.
    pub fn x(&self) -> Option<f64> {
        match self.kind {
            PositionKind::AbsoluteMatrix => self.values.get(4).copied(),
            PositionKind::RelativeMove => self.values.first().copied(),
        }
    }

    /// Vertical coordinate: `f` of `Tm`, `ty` of `Td`.
    pub fn y(&self) -> Option<f64> {
        match self.kind {
            PositionKind::AbsoluteMatrix => self.values.get(5).copied(),
            PositionKind::RelativeMove => self.values.get(1).copied(),
        }
    }
}

/// Font selection attached to a text run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontOp {
    /// Resource name without the slash
    pub name: String,
    /// Font size
    pub size: f64,
    /// Byte range of the `Tf` instruction
    pub range: Range<usize>,
}

/// Transform operator (`cm`) attached to a drawn item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOp {
    /// Operands
    pub matrix: Matrix,
    /// Byte range of the `cm` instruction
    pub range: Range<usize>,
}

/// Paint operator that ends a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaintOp {
    /// Operator keyword, e.g. `S` or `f*`
    pub operator: String,
    /// Byte range of the operator
    pub range: Range<usize>,
}

/// Coalesced show-text tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    /// Page index
    pub page: usize,
    /// Content stream index within the page
    pub stream: usize,
    /// From the first token's start to the last token's end
    pub range: Range<usize>,
    /// Members' text in order
    pub text: String,
    /// Position operator of the first member
    pub position: Option<PositionOp>,
    /// Font selection of the first member
    pub font: Option<FontOp>,
    /// Literal string ranges of all members
    pub segments: Vec<Range<usize>>,
}

impl TextRun {
    /// Horizontal coordinate, when a position operator is attached.
    pub fn x(&self) -> Option<f64> {
        self.position.as_ref().and_then(PositionOp::x)
    }

    /// Vertical coordinate, when a position operator is attached.
    pub fn y(&self) -> Option<f64> {
        self.position.as_ref().and_then(PositionOp::y)
    }
}

/// Resolved XObject subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XObjectKind {
    /// `/Subtype /Image`
    Image,
    /// `/Subtype /Form`
    Form,
    /// Not found in the page resources
    Unknown,
}

/// `/Name Do` instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XObjectDraw {
    /// Page index
    pub page: usize,
    /// Content stream index within the page
    pub stream: usize,
    /// Resource name without the slash
    pub name: String,
    /// Resolved subtype
    pub kind: XObjectKind,
    /// Byte range of the `Do` instruction
    pub range: Range<usize>,
    /// Nearest preceding `cm` within the lookback window
    pub transform: Option<TransformOp>,
}

/// `x y w h re` instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectItem {
    /// Page index
    pub page: usize,
    /// Content stream index within the page
    pub stream: usize,
    /// Byte range of the `re` instruction
    pub range: Range<usize>,
    /// Lower-left x
    pub x: f64,
    /// Lower-left y
    pub y: f64,
    /// Width
    pub w: f64,
    /// Height
    pub h: f64,
    /// Next paint operator after the rectangle
    pub paint: Option<PaintOp>,
    /// Nearest preceding `cm` within the lookback window
    pub transform: Option<TransformOp>,
}

/// Path from a `m` operator through the next paint operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathItem {
    /// Page index
    pub page: usize,
    /// Content stream index within the page
    pub stream: usize,
    /// From the `m` instruction through the paint operator
    pub range: Range<usize>,
    /// Terminating paint operator
    pub paint: PaintOp,
    /// Number of construction operators (`m`, `l`, `c`, `v`, `y`, `h`, `re`)
    pub segment_count: usize,
    /// First 120 characters of the path text, whitespace collapsed
    pub preview: String,
    /// Nearest preceding `cm` within the lookback window
    pub transform: Option<TransformOp>,
}

/// Any editable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditableItem {
    /// Text run
    TextRun(TextRun),
    /// XObject draw
    XObjectDraw(XObjectDraw),
    /// Rectangle
    Rect(RectItem),
    /// Generic path
    Path(PathItem),
}

impl EditableItem {
    /// Page index.
    pub fn page(&self) -> usize {
        match self {
            EditableItem::TextRun(i) => i.page,
            EditableItem::XObjectDraw(i) => i.page,
            EditableItem::Rect(i) => i.page,
            EditableItem::Path(i) => i.page,
        }
    }

    /// Content stream index within the page.
    pub fn stream(&self) -> usize {
        match self {
            EditableItem::TextRun(i) => i.stream,
            EditableItem::XObjectDraw(i) => i.stream,
            EditableItem::Rect(i) => i.stream,
            EditableItem::Path(i) => i.stream,
        }
    }

    /// The item's own byte range (not its transform's).
    pub fn range(&self) -> &Range<usize> {
        match self {
            EditableItem::TextRun(i) => &i.range,
            EditableItem::XObjectDraw(i) => &i.range,
            EditableItem::Rect(i) => &i.range,
            EditableItem::Path(i) => &i.range,
        }
    }

    /// Attached `cm`, for drawn items.
    pub fn transform(&self) -> Option<&TransformOp> {
        match self {
            EditableItem::TextRun(_) => None,
            EditableItem::XObjectDraw(i) => i.transform.as_ref(),
            EditableItem::Rect(i) => i.transform.as_ref(),
            EditableItem::Path(i) => i.transform.as_ref(),
        }
    }

    /// Whether `other` is the same kind of item.
    pub fn same_kind(&self, other: &EditableItem) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl From<TextRun> for EditableItem {
    fn from(run: TextRun) -> Self {
        EditableItem::TextRun(run)
    }
}

impl From<XObjectDraw> for EditableItem {
    fn from(draw: XObjectDraw) -> Self {
        EditableItem::XObjectDraw(draw)
    }
}

impl From<RectItem> for EditableItem {
    fn from(rect: RectItem) -> Self {
        EditableItem::Rect(rect)
    }
}

impl From<PathItem> for EditableItem {
    fn from(path: PathItem) -> Self {
        EditableItem::Path(path)
    }
}

/// Items of one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageItems {
    /// Page index
    pub page_index: usize,
    /// Text runs, top of page first
    pub text_runs: Vec<TextRun>,
    /// XObject draws in stream order
    pub xobjects: Vec<XObjectDraw>,
    /// Rectangles in stream order
    pub rects: Vec<RectItem>,
    /// Paths in stream order
    pub paths: Vec<PathItem>,
    /// Streams whose scan stopped early at malformed syntax
    pub truncated_streams: Vec<usize>,
}

impl PageItems {
    /// Empty result for a page.
    pub fn new(page_index: usize) -> Self {
        Self {
            page_index,
            ..Default::default()
        }
    }

    /// Total number of items.
    pub fn len(&self) -> usize {
        self.text_runs.len() + self.xobjects.len() + self.rects.len() + self.paths.len()
    }

    /// Whether no items were found.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All items as [`EditableItem`]s.
    pub fn items(&self) -> Vec<EditableItem> {
        let text = self.text_runs.iter().cloned().map(EditableItem::from);
        let xobjects = self.xobjects.iter().cloned().map(EditableItem::from);
        let rects = self.rects.iter().cloned().map(EditableItem::from);
        let paths = self.paths.iter().cloned().map(EditableItem::from);
        text.chain(xobjects).chain(rects).chain(paths).collect()
    }
}

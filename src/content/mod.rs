//! Content stream scanning and mutation.
//!
//! Stream text is held as a Latin-1 decoded `String`, so every byte of the
//! stream is one char and operator syntax stays ASCII. All byte ranges in
//! this module index that text.

pub mod items;
pub mod matrix;
pub mod mutation;
pub mod operators;
pub mod pool;
pub mod scanner;
pub mod tokenizer;

pub use items::{
    EditableItem, FontOp, PageItems, PaintOp, PathItem, PositionKind, PositionOp, RectItem, TextRun,
    TransformOp, XObjectDraw, XObjectKind,
};
pub use matrix::Matrix;
pub use mutation::{bulk_translate_rects, plan, Mutation, Replacement};
pub use operators::{lex, Instruction, Operand, OperandValue};
pub use pool::{RequestToken, ScanPool};
pub use scanner::{group_rects_as_table, scan_page, scan_stream, RectTable, ScanRequest, TableRow};
pub use tokenizer::{tokenize, ShowKind, ShowToken};

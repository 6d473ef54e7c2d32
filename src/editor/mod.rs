//! Editing and saving.
//!
//! ## Architecture
//!
//! ```text
//! DocumentEditor (stream text per page, dirty set, epochs)
//!     ↓ apply_mutation / regex_replace
//! changed streams
//!     ↓ save
//! Save modes:
//!   - Incremental: IncrementalWriter appends objects + xref section
//!   - Full: ObjectTree::serialize rewrites the document
//! ```
//!
//! [`SafeItem`]s are dictionary values (document information, form field
//! values, page rotation, annotation text) saved by replacing the object
//! that holds them.
//!
//! [`EditSession`] runs an [`IncrementalWriter`] on its own thread for
//! shells that schedule edits as they happen; [`EditScheduler`] holds the
//! debounce and reconciliation timing both of them use.
//!
//! ## Example
//!
//! ```ignore
//! use pdf_patch::content::Mutation;
//! use pdf_patch::editor::DocumentEditor;
//!
//! let mut editor = DocumentEditor::open(std::fs::read("input.pdf")?)?;
//! let pages = editor.scan(None)?;
//! if let Some(image) = pages[0].xobjects.first() {
//!     editor.apply_mutation(&image.clone().into(), &Mutation::Translate { dx: 10.0, dy: 0.0 })?;
//! }
//! std::fs::write("input.pdf", editor.save()?)?;
//! ```

mod document_editor;
mod incremental;
mod safe_items;
mod scheduler;
mod session;

pub use document_editor::{DocumentEditor, PageContent, ReconcileJob, ReconcileOutcome, SaveMode};
pub use incremental::{Edit, EditTarget, IncrementalWriter};
pub use safe_items::{
    decode_text_string, encode_text_string, scan_safe_items, updated_dictionary, SafeItem, SafeItemKind, SafeValue,
};
pub use scheduler::{EditScheduler, ReconcileTicket};
pub use session::{EditSession, SessionEvent};

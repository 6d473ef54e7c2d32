//! Byte-level writing of objects and cross-reference sections.
//!
//! ## Architecture
//!
//! ```text
//! EditBatch (ObjectRef, stream text)
//!     ↓
//! [stream_object] (uncompressed stream object bodies)
//!     ↓
//! [classic_section | stream_section] (new xref + trailer + startxref)
//!     ↓
//! appended revision bytes
//! ```

mod object_serializer;
mod xref_section;

pub use object_serializer::{stream_object, ObjectSerializer};
pub use xref_section::{
    classic_section, group_contiguous, stream_section, SectionEntries, TrailerFields,
};

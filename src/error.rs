//! Error types for the patching engine.
//!
//! The variants mirror how a failure should be handled by a caller:
//! scan failures degrade locally, mapping failures fall back to a full
//! rewrite, and xref / edit-resolution failures mean the document is not a
//! safe candidate for incremental saving.

use crate::object::ObjectRef;

/// Result type alias for patching operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while scanning, mapping or writing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed operator sequence in a content stream
    #[error("Scan error at byte {offset}: {reason}")]
    Scan {
        /// Byte offset in the stream text where scanning stopped
        offset: usize,
        /// Reason for the truncation
        reason: String,
    },

    /// Page-to-object mapping is incomplete; incremental mode is unusable
    #[error("Mapping unresolved: {0}")]
    MappingUnresolved(String),

    /// The trailing cross-reference anchor could not be parsed
    #[error("Cross-reference parse error: {0}")]
    XrefParse(String),

    /// An edit in a batch referenced an unknown object or stream slot
    #[error("Edit resolution failed: {0}")]
    EditResolution(String),

    /// A mutation target no longer matches the current stream text
    #[error("Stream not found: page {page}, stream {stream}, byte {offset}")]
    StreamNotFound {
        /// Page index of the target
        page: usize,
        /// Content stream index within the page
        stream: usize,
        /// Recorded byte offset that no longer matches
        offset: usize,
    },

    /// Object syntax error at a specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Referenced object not present in the document tree
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectRef),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Background worker has shut down
    #[error("Session closed")]
    SessionClosed,

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid find/replace pattern
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this failure should silently downgrade to a full rewrite.
    ///
    /// Mapping gaps and an unreadable trailing anchor both mean "do not append";
    /// the document itself can still be saved by the tree serializer.
    pub fn is_fallback_signal(&self) -> bool {
        matches!(self, Error::MappingUnresolved(_) | Error::XrefParse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_message() {
        let err = Error::Scan {
            offset: 42,
            reason: "unterminated string".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("42"));
        assert!(msg.contains("unterminated string"));
    }

    #[test]
    fn test_stream_not_found_message() {
        let err = Error::StreamNotFound {
            page: 2,
            stream: 1,
            offset: 118,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("page 2"));
        assert!(msg.contains("118"));
    }

    #[test]
    fn test_object_not_found_uses_reference_syntax() {
        let err = Error::ObjectNotFound(ObjectRef::new(10, 0));
        assert!(format!("{}", err).contains("10 0 R"));
    }

    #[test]
    fn test_fallback_signal() {
        assert!(Error::MappingUnresolved("page 3".into()).is_fallback_signal());
        assert!(Error::XrefParse("no startxref".into()).is_fallback_signal());
        assert!(!Error::EditResolution("7 0 R".into()).is_fallback_signal());
        assert!(!Error::InvalidState("closed".into()).is_fallback_signal());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}

//! Fatal load errors.
//!
//! Anything that leaves the document unreadable is a [`LoadError`].
//! Problems with individual elements are
//! [`Diagnostic`](super::Diagnostic)s and never abort a load.

use std::path::PathBuf;

use thiserror::Error;

use crate::base::LineCol;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed XML at {position}: {source}")]
    Xml {
        #[source]
        source: quick_xml::Error,
        position: LineCol,
    },

    #[error("document is not valid UTF-8 at {position}")]
    Utf8 {
        #[source]
        source: std::str::Utf8Error,
        position: LineCol,
    },

    #[error("document is not valid {encoding}")]
    Decode { encoding: &'static str },

    #[error("unsupported document encoding '{label}'")]
    UnsupportedEncoding { label: String },

    #[error("document ended at {position} with {open} element(s) still open")]
    UnexpectedEof { position: LineCol, open: usize },

    #[error("cannot read '{}'", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{}' cannot be expressed as a file URL", .path.display())]
    InvalidPath { path: PathBuf },

    #[error("handler is not accepting events; reset it first")]
    Unusable,
}

impl LoadError {
    /// Position in the document the error refers to, when known.
    pub fn position(&self) -> Option<LineCol> {
        match self {
            LoadError::Xml { position, .. }
            | LoadError::Utf8 { position, .. }
            | LoadError::UnexpectedEof { position, .. } => Some(*position),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_message() {
        let err = LoadError::UnexpectedEof {
            position: LineCol::new(2, 4),
            open: 1,
        };
        assert_eq!(
            err.to_string(),
            "document ended at 3:5 with 1 element(s) still open"
        );
        assert_eq!(err.position(), Some(LineCol::new(2, 4)));
    }

    #[test]
    fn test_unsupported_encoding_message() {
        let err = LoadError::UnsupportedEncoding {
            label: "x-klingon".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported document encoding 'x-klingon'");
        assert_eq!(err.position(), None);
    }

    #[test]
    fn test_unusable_has_no_position() {
        assert_eq!(LoadError::Unusable.position(), None);
    }
}

//! Error types for typed values.

use crate::values::DataKind;
use thiserror::Error;

/// Errors raised while encoding or decoding typed values.
///
/// Fatal to the record being processed, never to the whole batch store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    /// The kind is known but cannot be carried by this path (e.g. binary in the buffer).
    #[error("unsupported data kind: {0}")]
    UnsupportedKind(DataKind),

    /// The integer tag does not name any data kind.
    #[error("unknown data kind code: {0}")]
    UnknownKindCode(i64),

    /// The text does not parse as the declared kind.
    #[error("malformed {kind} value: {reason}")]
    Malformed {
        /// Declared kind of the value.
        kind: DataKind,
        /// What was wrong with it.
        reason: String,
    },
}

impl DataError {
    /// Shorthand for a [`DataError::Malformed`].
    pub fn malformed(kind: DataKind, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DataError::UnknownKindCode(99);
        assert_eq!(err.to_string(), "unknown data kind code: 99");

        let err = DataError::malformed(DataKind::Integer, "not a number");
        assert_eq!(err.to_string(), "malformed integer value: not a number");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DataError>();
    }
}

use crate::types::DataType;

/// Broad classification of a [`CodecError`].
///
/// Usage and decode errors are recoverable by the caller. Blank and
/// type-mismatch errors come from typed accessors on an entry and never
/// disturb the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse of the encoder or cursor API.
    Usage,
    /// A typed value was requested from a blank entry.
    Blank,
    /// A typed value was requested that does not match the entry load type.
    TypeMismatch,
    /// The wire bytes are malformed or truncated.
    Decode,
}

/// Errors that can occur while encoding or decoding RWF data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// An entry of a different primitive type was added to a typed array.
    #[error("attempt to add {attempted} entry while array contains {locked}")]
    TypeMixing {
        locked: DataType,
        attempted: DataType,
    },

    /// An entry was added after `complete()` without an intervening `clear()`.
    #[error("attempt to add an entry after complete() was called")]
    AddAfterComplete,

    /// `complete()` was called on an array with no entries.
    #[error("attempt to complete an array with no entries")]
    CompleteEmpty,

    /// `complete()` was called twice.
    #[error("array is already complete")]
    AlreadyComplete,

    /// The fixed width is not legal for the primitive type.
    #[error("fixed width {width} is not supported for {data_type}")]
    InvalidFixedWidth { data_type: DataType, width: usize },

    /// The primitive type has no reserved blank pattern at a fixed width.
    #[error("blank {data_type} entries cannot be encoded at a fixed width")]
    FixedWidthBlankUnsupported { data_type: DataType },

    /// The value does not fit the fixed width.
    #[error("{data_type} value does not fit fixed width {width}")]
    ValueOutOfRange { data_type: DataType, width: usize },

    /// A buffer-type value is longer than the fixed width.
    #[error("value of {len} bytes exceeds fixed width {width}")]
    ValueTooLong { len: usize, width: usize },

    /// The value itself cannot be encoded (reserved hint, out-of-range field).
    #[error("invalid {data_type} value: {reason}")]
    InvalidValue {
        data_type: DataType,
        reason: &'static str,
    },

    /// An array holds at most `u16::MAX` entries.
    #[error("array entry count exceeds {max}")]
    TooManyEntries { max: usize },

    /// The cursor is not positioned on an entry.
    #[error("no current entry (cursor is before the first entry or exhausted)")]
    NoCurrentEntry,

    /// A typed value was requested from a blank entry.
    #[error("attempt to read a value from a blank {load_type} entry")]
    Blank { load_type: DataType },

    /// A typed value was requested with the wrong accessor.
    #[error("attempt to read {requested} from an entry of type {actual}")]
    TypeMismatch {
        requested: DataType,
        actual: DataType,
    },

    /// The wire data ended before the declared structure did.
    #[error("incomplete data: need {needed} bytes, {available} available")]
    IncompleteData { needed: usize, available: usize },

    /// The array header names a type code that cannot appear in an array.
    #[error("unsupported array primitive type code {0}")]
    UnknownDataType(u8),

    /// The wire format major version is not supported.
    #[error("unsupported RWF version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    /// The bytes do not form a valid encoding.
    #[error("malformed {data_type} encoding: {reason}")]
    Malformed {
        data_type: DataType,
        reason: &'static str,
    },

    /// The destination buffer cannot hold the encoded array.
    #[error("buffer too small: need {needed} bytes, capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    /// Every buffer the pool may hand out is in use.
    #[error("buffer pool exhausted ({max} buffers outstanding)")]
    PoolExhausted { max: usize },

    /// The buffer was not allocated by this pool.
    #[error("buffer released to a pool that did not allocate it")]
    ForeignBuffer,

    /// `set_actual_length` was given more bytes than the buffer holds.
    #[error("length {length} exceeds buffer capacity {capacity}")]
    LengthExceedsCapacity { length: usize, capacity: usize },
}

impl CodecError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Blank { .. } => ErrorKind::Blank,
            CodecError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            CodecError::IncompleteData { .. }
            | CodecError::UnknownDataType(_)
            | CodecError::UnsupportedVersion { .. }
            | CodecError::Malformed { .. } => ErrorKind::Decode,
            _ => ErrorKind::Usage,
        }
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_mismatch_have_distinct_kinds() {
        let blank = CodecError::Blank {
            load_type: DataType::Int,
        };
        let mismatch = CodecError::TypeMismatch {
            requested: DataType::UInt,
            actual: DataType::Int,
        };
        assert_eq!(blank.kind(), ErrorKind::Blank);
        assert_eq!(mismatch.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn decode_errors_classified_as_decode() {
        let err = CodecError::IncompleteData {
            needed: 4,
            available: 1,
        };
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(CodecError::UnknownDataType(99).kind(), ErrorKind::Decode);
    }

    #[test]
    fn usage_messages_are_descriptive() {
        let err = CodecError::TypeMixing {
            locked: DataType::Ascii,
            attempted: DataType::UInt,
        };
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(
            err.to_string(),
            "attempt to add UInt entry while array contains Ascii"
        );
        assert_eq!(
            CodecError::AddAfterComplete.to_string(),
            "attempt to add an entry after complete() was called"
        );
    }
}

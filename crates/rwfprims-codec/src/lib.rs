//! RWF OmmArray encoding and decoding.
//!
//! An array is a homogeneous, ordered list of primitive values in one of two
//! layouts:
//! - fixed width: every entry occupies the same number of bytes
//! - variable width: every entry carries its own length prefix
//!
//! Encoding goes through [`ArrayEncoder`] into a pooled [`WireBuffer`].
//! Decoding binds the header with [`decode_array`] and walks entries lazily
//! with an [`ArrayCursor`].

pub mod buffer;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod primitive;
pub mod types;

pub use buffer::{BufferPool, ForeignBuffer, WireBuffer};
pub use decoder::{
    decode_array, ArrayCursor, ArrayEntry, DecodedArray, Entries, Value, RWF_MAJOR_VERSION,
    RWF_MINOR_VERSION,
};
pub use encoder::ArrayEncoder;
pub use error::{CodecError, ErrorKind, Result};
pub use primitive::{
    hint, DataState, Date, DateTime, Qos, Rate, Real, State, StreamState, Time, Timeliness,
};
pub use types::{DataCode, DataType};

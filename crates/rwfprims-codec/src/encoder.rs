use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::buffer::WireBuffer;
use crate::error::{CodecError, Result};
use crate::primitive::{
    encode_date, encode_datetime, encode_qos, encode_real, encode_state, encode_time, int_fits,
    int_len, put_int, put_u16ob, put_uint, u16ob_len, uint_fits, uint_len, Date, DateTime, Qos,
    Real, State, Time, DATE_LEN, DOUBLE_LEN, FLOAT_LEN,
};
use crate::types::DataType;

const MAX_ENTRIES: usize = u16::MAX as usize;
const COUNT_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeState {
    Empty,
    TypeLocked(DataType),
    Completed,
}

/// Builds an RWF array of one primitive type.
///
/// The first `add_*` call fixes the primitive type; later calls must use the
/// same type. [`ArrayEncoder::complete`] seals the array into a
/// [`WireBuffer`]; after that only [`ArrayEncoder::clear`] makes the encoder
/// usable again.
///
/// ```
/// use rwfprims_codec::{ArrayEncoder, BufferPool};
///
/// let mut pool = BufferPool::new(1, 1);
/// let mut buffer = pool.allocate(64).unwrap();
///
/// let mut array = ArrayEncoder::with_fixed_width(4);
/// array.add_int(-11).unwrap().add_int(22).unwrap().add_int(-33).unwrap();
/// let len = array.complete(&mut buffer).unwrap();
/// assert_eq!(len, buffer.len());
/// ```
#[derive(Debug)]
pub struct ArrayEncoder {
    item_length: u16,
    state: EncodeState,
    count: usize,
    entries: BytesMut,
    scratch: BytesMut,
    encoded: Option<Bytes>,
}

impl Default for ArrayEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayEncoder {
    /// Variable-width array: every entry carries its own length.
    pub fn new() -> Self {
        Self::with_fixed_width(0)
    }

    /// Fixed-width array: every entry occupies exactly `item_length` bytes.
    /// Zero means variable width.
    pub fn with_fixed_width(item_length: u16) -> Self {
        Self {
            item_length,
            state: EncodeState::Empty,
            count: 0,
            entries: BytesMut::new(),
            scratch: BytesMut::new(),
            encoded: None,
        }
    }

    /// Start an array with its primitive type fixed up front.
    pub fn begin(data_type: DataType, item_length: u16) -> Result<Self> {
        let mut encoder = Self::with_fixed_width(item_length);
        encoder.check_fixed_width(data_type)?;
        if data_type.code().is_none() {
            return Err(CodecError::InvalidValue {
                data_type,
                reason: "not an array primitive type",
            });
        }
        encoder.state = EncodeState::TypeLocked(data_type);
        Ok(encoder)
    }

    pub fn item_length(&self) -> u16 {
        self.item_length
    }

    pub fn has_fixed_width(&self) -> bool {
        self.item_length > 0
    }

    /// Primitive type once established.
    pub fn primitive_type(&self) -> Option<DataType> {
        match self.state {
            EncodeState::TypeLocked(data_type) => Some(data_type),
            _ => None,
        }
    }

    /// Number of entries added since the last clear.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_complete(&self) -> bool {
        self.state == EncodeState::Completed
    }

    /// The sealed array bytes, available after a successful `complete`.
    pub fn encoded(&self) -> Option<&[u8]> {
        self.encoded.as_deref()
    }

    pub fn add_int(&mut self, value: i64) -> Result<&mut Self> {
        self.push(DataType::Int, |dst, width| {
            let width = match width {
                0 => int_len(value),
                w if int_fits(value, w) => w,
                w => {
                    return Err(CodecError::ValueOutOfRange {
                        data_type: DataType::Int,
                        width: w,
                    })
                }
            };
            put_int(dst, value, width);
            Ok(())
        })
    }

    pub fn add_uint(&mut self, value: u64) -> Result<&mut Self> {
        self.push(DataType::UInt, |dst, width| {
            let width = match width {
                0 => uint_len(value),
                w if uint_fits(value, w) => w,
                w => {
                    return Err(CodecError::ValueOutOfRange {
                        data_type: DataType::UInt,
                        width: w,
                    })
                }
            };
            put_uint(dst, value, width);
            Ok(())
        })
    }

    pub fn add_enum(&mut self, value: u16) -> Result<&mut Self> {
        self.push(DataType::Enum, |dst, width| {
            let width = match width {
                0 => uint_len(u64::from(value)),
                1 if value > 0xFF => {
                    return Err(CodecError::ValueOutOfRange {
                        data_type: DataType::Enum,
                        width: 1,
                    })
                }
                w => w,
            };
            put_uint(dst, u64::from(value), width);
            Ok(())
        })
    }

    pub fn add_float(&mut self, value: f32) -> Result<&mut Self> {
        self.push(DataType::Float, |dst, _| {
            dst.put_f32(value);
            Ok(())
        })
    }

    pub fn add_double(&mut self, value: f64) -> Result<&mut Self> {
        self.push(DataType::Double, |dst, _| {
            dst.put_f64(value);
            Ok(())
        })
    }

    pub fn add_real(&mut self, value: Real) -> Result<&mut Self> {
        self.push(DataType::Real, |dst, _| encode_real(dst, &value))
    }

    pub fn add_date(&mut self, value: Date) -> Result<&mut Self> {
        self.push(DataType::Date, |dst, _| encode_date(dst, &value))
    }

    pub fn add_time(&mut self, value: Time) -> Result<&mut Self> {
        self.push(DataType::Time, |dst, width| {
            let len = match width {
                0 => value.natural_len(),
                w if value.fits(w) => w,
                w => {
                    return Err(CodecError::ValueOutOfRange {
                        data_type: DataType::Time,
                        width: w,
                    })
                }
            };
            encode_time(dst, &value, len)
        })
    }

    pub fn add_datetime(&mut self, value: DateTime) -> Result<&mut Self> {
        self.push(DataType::DateTime, |dst, width| {
            let len = match width {
                0 => value.natural_len(),
                w if value.time.fits(w - DATE_LEN) => w,
                w => {
                    return Err(CodecError::ValueOutOfRange {
                        data_type: DataType::DateTime,
                        width: w,
                    })
                }
            };
            encode_datetime(dst, &value, len)
        })
    }

    pub fn add_qos(&mut self, value: Qos) -> Result<&mut Self> {
        self.push(DataType::Qos, |dst, _| encode_qos(dst, &value))
    }

    pub fn add_state(&mut self, value: &State) -> Result<&mut Self> {
        self.push(DataType::State, |dst, _| encode_state(dst, value))
    }

    pub fn add_buffer(&mut self, value: &[u8]) -> Result<&mut Self> {
        self.push_bytes(DataType::Buffer, value)
    }

    pub fn add_ascii(&mut self, value: &str) -> Result<&mut Self> {
        self.push_bytes(DataType::Ascii, value.as_bytes())
    }

    pub fn add_utf8(&mut self, value: &str) -> Result<&mut Self> {
        self.push_bytes(DataType::Utf8, value.as_bytes())
    }

    pub fn add_rmtes(&mut self, value: &[u8]) -> Result<&mut Self> {
        self.push_bytes(DataType::Rmtes, value)
    }

    /// Add a blank entry of `data_type`.
    ///
    /// Variable width writes a zero-length entry. Fixed width writes the
    /// type's reserved blank pattern; Int, UInt, Enum, Float and Double have
    /// none and fail with [`CodecError::FixedWidthBlankUnsupported`].
    pub fn add_blank(&mut self, data_type: DataType) -> Result<&mut Self> {
        self.push(data_type, |dst, width| {
            if width == 0 {
                return Ok(());
            }
            match data_type {
                DataType::Date => encode_date(dst, &Date::BLANK),
                DataType::Time => encode_time(dst, &Time::BLANK, width),
                DataType::DateTime => encode_datetime(dst, &DateTime::BLANK, width),
                t if t.is_buffer_like() => {
                    dst.put_bytes(0, width);
                    Ok(())
                }
                t => Err(CodecError::FixedWidthBlankUnsupported { data_type: t }),
            }
        })
    }

    /// Seal the array into `buffer` and return the encoded length.
    ///
    /// On [`CodecError::BufferTooSmall`] the encoder is left untouched so the
    /// caller can retry with a larger buffer.
    pub fn complete(&mut self, buffer: &mut WireBuffer) -> Result<usize> {
        let data_type = match self.state {
            EncodeState::Empty => return Err(CodecError::CompleteEmpty),
            EncodeState::Completed => return Err(CodecError::AlreadyComplete),
            EncodeState::TypeLocked(_) if self.count == 0 => {
                return Err(CodecError::CompleteEmpty)
            }
            EncodeState::TypeLocked(data_type) => data_type,
        };
        let code = data_type.code().ok_or(CodecError::InvalidValue {
            data_type,
            reason: "not an array primitive type",
        })?;

        let total = 1 + u16ob_len(self.item_length) + COUNT_LEN + self.entries.len();
        if total > buffer.capacity() {
            return Err(CodecError::BufferTooSmall {
                needed: total,
                capacity: buffer.capacity(),
            });
        }

        let mut out = BytesMut::with_capacity(total);
        out.put_u8(code);
        put_u16ob(&mut out, self.item_length);
        out.put_u16(self.count as u16);
        out.put_slice(&self.entries);

        buffer.as_mut_slice()[..total].copy_from_slice(&out);
        buffer.set_actual_length(total)?;

        debug!(
            %data_type,
            entries = self.count,
            item_length = self.item_length,
            bytes = total,
            "array complete"
        );

        self.encoded = Some(out.freeze());
        self.state = EncodeState::Completed;
        Ok(total)
    }

    /// Return to the empty state, keeping the configured item length.
    pub fn clear(&mut self) {
        self.state = EncodeState::Empty;
        self.count = 0;
        self.entries.clear();
        self.encoded = None;
    }

    /// At a fixed width the slot is zero padded and an all-zero slot means
    /// blank, so a value must be non-empty and must not end in a zero byte.
    fn push_bytes(&mut self, data_type: DataType, value: &[u8]) -> Result<&mut Self> {
        self.push(data_type, |dst, width| {
            if width > 0 && value.len() > width {
                return Err(CodecError::ValueTooLong {
                    len: value.len(),
                    width,
                });
            }
            if width > 0 && value.last().map_or(true, |b| *b == 0) {
                return Err(CodecError::InvalidValue {
                    data_type,
                    reason: "fixed-width value must not be empty or end in a zero byte",
                });
            }
            dst.put_slice(value);
            if width > value.len() {
                dst.put_bytes(0, width - value.len());
            }
            Ok(())
        })
    }

    /// Validate state, encode one entry into scratch space, then commit it.
    ///
    /// `encode` receives the fixed width (0 for variable) and must write
    /// exactly that many bytes when it is non-zero.
    fn push(
        &mut self,
        data_type: DataType,
        encode: impl FnOnce(&mut BytesMut, usize) -> Result<()>,
    ) -> Result<&mut Self> {
        match self.state {
            EncodeState::Completed => return Err(CodecError::AddAfterComplete),
            EncodeState::TypeLocked(locked) if locked != data_type => {
                return Err(CodecError::TypeMixing {
                    locked,
                    attempted: data_type,
                })
            }
            EncodeState::TypeLocked(_) => {}
            EncodeState::Empty => self.check_fixed_width(data_type)?,
        }
        if self.count >= MAX_ENTRIES {
            return Err(CodecError::TooManyEntries { max: MAX_ENTRIES });
        }

        let width = usize::from(self.item_length);
        self.scratch.clear();
        encode(&mut self.scratch, width)?;

        if width == 0 {
            let len = u16::try_from(self.scratch.len()).map_err(|_| CodecError::ValueTooLong {
                len: self.scratch.len(),
                width: usize::from(u16::MAX),
            })?;
            put_u16ob(&mut self.entries, len);
        } else {
            debug_assert_eq!(self.scratch.len(), width);
        }
        self.entries.put_slice(&self.scratch);

        self.state = EncodeState::TypeLocked(data_type);
        self.count += 1;
        Ok(self)
    }

    fn check_fixed_width(&self, data_type: DataType) -> Result<()> {
        let width = usize::from(self.item_length);
        if width == 0 {
            return Ok(());
        }
        if fixed_width_supported(data_type, width) {
            Ok(())
        } else {
            Err(CodecError::InvalidFixedWidth { data_type, width })
        }
    }
}

/// Widths at which a primitive type may be encoded in a fixed-width array.
pub(crate) fn fixed_width_supported(data_type: DataType, width: usize) -> bool {
    match data_type {
        DataType::Int | DataType::UInt => matches!(width, 1 | 2 | 4 | 8),
        DataType::Enum => matches!(width, 1 | 2),
        DataType::Float => width == FLOAT_LEN,
        DataType::Double => width == DOUBLE_LEN,
        DataType::Date => width == DATE_LEN,
        DataType::Time => matches!(width, 2 | 3 | 5 | 7 | 8),
        DataType::DateTime => matches!(width, 6 | 7 | 9 | 11 | 12),
        t if t.is_buffer_like() => width > 0,
        _ => false,
    }
}

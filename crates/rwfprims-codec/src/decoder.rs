use tracing::trace;

use crate::encoder::fixed_width_supported;
use crate::error::{CodecError, Result};
use crate::primitive::{
    decode_date, decode_datetime, decode_double, decode_enum, decode_float, decode_int,
    decode_qos, decode_real, decode_state, decode_time, decode_uint, get_u16ob, Date, DateTime,
    Qos, Real, State, Time,
};
use crate::types::{DataCode, DataType};

/// RWF major version understood by this codec.
pub const RWF_MAJOR_VERSION: u8 = 14;
/// RWF minor version written by this codec.
pub const RWF_MINOR_VERSION: u8 = 1;

const MIN_HEADER_LEN: usize = 4;

/// Bind `data` as an encoded array for wire-format version `major.minor`.
///
/// Only the header is parsed here; entries are decoded one at a time by an
/// [`ArrayCursor`]. An empty slice is a blank array.
pub fn decode_array(data: &[u8], major: u8, minor: u8) -> Result<DecodedArray<'_>> {
    DecodedArray::bind(data, major, minor)
}

/// The header of an encoded array, borrowing the wire bytes.
#[derive(Debug, Clone, Copy)]
pub struct DecodedArray<'a> {
    data: &'a [u8],
    primitive_type: DataType,
    item_length: u16,
    count: u16,
    entries_offset: usize,
    version: (u8, u8),
}

impl<'a> DecodedArray<'a> {
    pub fn bind(data: &'a [u8], major: u8, minor: u8) -> Result<Self> {
        if major != RWF_MAJOR_VERSION {
            return Err(CodecError::UnsupportedVersion { major, minor });
        }

        if data.is_empty() {
            return Ok(Self {
                data,
                primitive_type: DataType::NoData,
                item_length: 0,
                count: 0,
                entries_offset: 0,
                version: (major, minor),
            });
        }

        if data.len() < MIN_HEADER_LEN {
            return Err(CodecError::IncompleteData {
                needed: MIN_HEADER_LEN,
                available: data.len(),
            });
        }

        let primitive_type =
            DataType::from_code(data[0]).ok_or(CodecError::UnknownDataType(data[0]))?;
        let mut pos = 1;
        let item_length = get_u16ob(data, &mut pos)?;
        let count_bytes = data
            .get(pos..pos + 2)
            .ok_or(CodecError::IncompleteData {
                needed: pos + 2,
                available: data.len(),
            })?;
        let count = u16::from_be_bytes([count_bytes[0], count_bytes[1]]);
        pos += 2;

        if item_length > 0 {
            if !fixed_width_supported(primitive_type, usize::from(item_length)) {
                return Err(CodecError::Malformed {
                    data_type: primitive_type,
                    reason: "item length not supported for type",
                });
            }
            let needed = pos + usize::from(count) * usize::from(item_length);
            if data.len() < needed {
                return Err(CodecError::IncompleteData {
                    needed,
                    available: data.len(),
                });
            }
        }

        trace!(
            %primitive_type,
            item_length,
            count,
            bytes = data.len(),
            "array header bound"
        );

        Ok(Self {
            data,
            primitive_type,
            item_length,
            count,
            entries_offset: pos,
            version: (major, minor),
        })
    }

    /// Primitive type of every entry; `NoData` for a blank array.
    pub fn primitive_type(&self) -> DataType {
        self.primitive_type
    }

    pub fn has_fixed_width(&self) -> bool {
        self.item_length > 0
    }

    /// Fixed entry width, zero for variable-width arrays.
    pub fn fixed_width(&self) -> u32 {
        u32::from(self.item_length)
    }

    /// Entry count declared by the header.
    pub fn count(&self) -> usize {
        usize::from(self.count)
    }

    pub fn is_blank(&self) -> bool {
        self.primitive_type == DataType::NoData
    }

    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// The wire bytes this array was bound to.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// A cursor positioned before the first entry.
    pub fn cursor(&self) -> ArrayCursor<'a> {
        ArrayCursor {
            array: *self,
            state: CursorState::BeforeFirst,
            next_offset: self.entries_offset,
            current: None,
        }
    }

    /// Iterate over the entries. Iteration stops after the first framing error.
    pub fn entries(&self) -> Entries<'a> {
        Entries {
            cursor: self.cursor(),
        }
    }

    fn frame_entry(&self, offset: usize) -> Result<(&'a [u8], usize)> {
        let data = self.data;
        let (start, len) = if self.item_length > 0 {
            (offset, usize::from(self.item_length))
        } else {
            let mut pos = offset;
            let len = get_u16ob(data, &mut pos)?;
            (pos, usize::from(len))
        };
        let payload = data
            .get(start..start + len)
            .ok_or(CodecError::IncompleteData {
                needed: len,
                available: data.len().saturating_sub(start),
            })?;
        Ok((payload, start + len))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    BeforeFirst,
    OnEntry(usize),
    Exhausted,
}

/// Forward-only cursor over the entries of a [`DecodedArray`].
///
/// Each successful [`ArrayCursor::forth`] decodes the next entry fresh, so
/// walking the same array twice (or after [`ArrayCursor::reset`]) yields
/// identical entries.
#[derive(Debug, Clone)]
pub struct ArrayCursor<'a> {
    array: DecodedArray<'a>,
    state: CursorState,
    next_offset: usize,
    current: Option<ArrayEntry<'a>>,
}

impl<'a> ArrayCursor<'a> {
    /// Advance to the next entry.
    ///
    /// Returns `Ok(false)` once every entry has been visited. A truncated
    /// entry returns the decode error and leaves the cursor exhausted.
    pub fn forth(&mut self) -> Result<bool> {
        let index = match self.state {
            CursorState::Exhausted => return Ok(false),
            CursorState::BeforeFirst => 0,
            CursorState::OnEntry(i) => i + 1,
        };
        if index >= self.array.count() {
            self.exhaust();
            return Ok(false);
        }

        match self.array.frame_entry(self.next_offset) {
            Ok((payload, next_offset)) => {
                let entry = decode_entry(
                    self.array.primitive_type,
                    payload,
                    self.array.has_fixed_width(),
                );
                self.current = Some(entry);
                self.next_offset = next_offset;
                self.state = CursorState::OnEntry(index);
                Ok(true)
            }
            Err(err) => {
                self.exhaust();
                Err(err)
            }
        }
    }

    /// The entry the cursor is positioned on.
    pub fn entry(&self) -> Result<&ArrayEntry<'a>> {
        self.current.as_ref().ok_or(CodecError::NoCurrentEntry)
    }

    /// Zero-based position of the current entry.
    pub fn index(&self) -> Option<usize> {
        match self.state {
            CursorState::OnEntry(i) => Some(i),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Return to before the first entry.
    pub fn reset(&mut self) {
        self.state = CursorState::BeforeFirst;
        self.next_offset = self.array.entries_offset;
        self.current = None;
    }

    fn exhaust(&mut self) {
        self.state = CursorState::Exhausted;
        self.current = None;
    }
}

/// Iterator adapter returned by [`DecodedArray::entries`].
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    cursor: ArrayCursor<'a>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<ArrayEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.forth() {
            Ok(true) => self.cursor.entry().cloned().map(Some).transpose(),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// A decoded entry value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Real(Real),
    Date(Date),
    Time(Time),
    DateTime(DateTime),
    Qos(Qos),
    State(State),
    Enum(u16),
    Buffer(&'a [u8]),
    Ascii(&'a str),
    Utf8(&'a str),
    Rmtes(&'a [u8]),
}

impl Value<'_> {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int,
            Value::UInt(_) => DataType::UInt,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Real(_) => DataType::Real,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::DateTime(_) => DataType::DateTime,
            Value::Qos(_) => DataType::Qos,
            Value::State(_) => DataType::State,
            Value::Enum(_) => DataType::Enum,
            Value::Buffer(_) => DataType::Buffer,
            Value::Ascii(_) => DataType::Ascii,
            Value::Utf8(_) => DataType::Utf8,
            Value::Rmtes(_) => DataType::Rmtes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Payload<'a> {
    Blank,
    Value(Value<'a>),
    Error(CodecError),
}

/// One decoded array entry.
///
/// Typed accessors fail with [`CodecError::Blank`] on a blank entry and with
/// [`CodecError::TypeMismatch`] when the accessor does not match the load
/// type. Neither failure affects the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayEntry<'a> {
    load_type: DataType,
    payload: Payload<'a>,
}

impl<'a> ArrayEntry<'a> {
    pub fn load_type(&self) -> DataType {
        self.load_type
    }

    pub fn code(&self) -> DataCode {
        match self.payload {
            Payload::Blank => DataCode::Blank,
            _ => DataCode::NoCode,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.payload == Payload::Blank
    }

    /// The decode fault of an `Error` entry.
    pub fn error(&self) -> Option<&CodecError> {
        match &self.payload {
            Payload::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn value(&self) -> Result<&Value<'a>> {
        match &self.payload {
            Payload::Value(value) => Ok(value),
            Payload::Blank => Err(CodecError::Blank {
                load_type: self.load_type,
            }),
            Payload::Error(err) => Err(err.clone()),
        }
    }

    pub fn int(&self) -> Result<i64> {
        self.typed(DataType::Int, |v| match v {
            Value::Int(x) => Some(*x),
            _ => None,
        })
    }

    pub fn uint(&self) -> Result<u64> {
        self.typed(DataType::UInt, |v| match v {
            Value::UInt(x) => Some(*x),
            _ => None,
        })
    }

    pub fn float(&self) -> Result<f32> {
        self.typed(DataType::Float, |v| match v {
            Value::Float(x) => Some(*x),
            _ => None,
        })
    }

    pub fn double(&self) -> Result<f64> {
        self.typed(DataType::Double, |v| match v {
            Value::Double(x) => Some(*x),
            _ => None,
        })
    }

    pub fn real(&self) -> Result<Real> {
        self.typed(DataType::Real, |v| match v {
            Value::Real(x) => Some(*x),
            _ => None,
        })
    }

    pub fn date(&self) -> Result<Date> {
        self.typed(DataType::Date, |v| match v {
            Value::Date(x) => Some(*x),
            _ => None,
        })
    }

    pub fn time(&self) -> Result<Time> {
        self.typed(DataType::Time, |v| match v {
            Value::Time(x) => Some(*x),
            _ => None,
        })
    }

    pub fn datetime(&self) -> Result<DateTime> {
        self.typed(DataType::DateTime, |v| match v {
            Value::DateTime(x) => Some(*x),
            _ => None,
        })
    }

    pub fn qos(&self) -> Result<Qos> {
        self.typed(DataType::Qos, |v| match v {
            Value::Qos(x) => Some(*x),
            _ => None,
        })
    }

    pub fn state(&self) -> Result<&State> {
        self.typed(DataType::State, |v| match v {
            Value::State(x) => Some(x),
            _ => None,
        })
    }

    pub fn enumeration(&self) -> Result<u16> {
        self.typed(DataType::Enum, |v| match v {
            Value::Enum(x) => Some(*x),
            _ => None,
        })
    }

    pub fn buffer(&self) -> Result<&'a [u8]> {
        self.typed(DataType::Buffer, |v| match v {
            Value::Buffer(x) => Some(*x),
            _ => None,
        })
    }

    pub fn ascii(&self) -> Result<&'a str> {
        self.typed(DataType::Ascii, |v| match v {
            Value::Ascii(x) => Some(*x),
            _ => None,
        })
    }

    pub fn utf8(&self) -> Result<&'a str> {
        self.typed(DataType::Utf8, |v| match v {
            Value::Utf8(x) => Some(*x),
            _ => None,
        })
    }

    pub fn rmtes(&self) -> Result<&'a [u8]> {
        self.typed(DataType::Rmtes, |v| match v {
            Value::Rmtes(x) => Some(*x),
            _ => None,
        })
    }

    fn typed<'s, T>(
        &'s self,
        requested: DataType,
        pick: impl FnOnce(&'s Value<'a>) -> Option<T>,
    ) -> Result<T> {
        let mismatch = CodecError::TypeMismatch {
            requested,
            actual: self.load_type,
        };
        match &self.payload {
            Payload::Blank => Err(CodecError::Blank {
                load_type: self.load_type,
            }),
            Payload::Value(value) => pick(value).ok_or(mismatch),
            Payload::Error(_) => Err(mismatch),
        }
    }
}

fn decode_entry(data_type: DataType, payload: &[u8], fixed: bool) -> ArrayEntry<'_> {
    let blank = ArrayEntry {
        load_type: data_type,
        payload: Payload::Blank,
    };
    if payload.is_empty() {
        return blank;
    }
    let payload = if fixed && data_type.is_buffer_like() {
        match payload.iter().rposition(|b| *b != 0) {
            Some(last) => &payload[..=last],
            None => return blank,
        }
    } else {
        payload
    };

    let decoded = match data_type {
        DataType::Int => decode_int(payload).map(|v| Some(Value::Int(v))),
        DataType::UInt => decode_uint(payload).map(|v| Some(Value::UInt(v))),
        DataType::Float => decode_float(payload).map(|v| Some(Value::Float(v))),
        DataType::Double => decode_double(payload).map(|v| Some(Value::Double(v))),
        DataType::Real => decode_real(payload).map(|v| v.map(Value::Real)),
        DataType::Date => {
            decode_date(payload).map(|v| (!v.is_blank()).then_some(Value::Date(v)))
        }
        DataType::Time => {
            decode_time(payload).map(|v| (!v.is_blank()).then_some(Value::Time(v)))
        }
        DataType::DateTime => {
            decode_datetime(payload).map(|v| (!v.is_blank()).then_some(Value::DateTime(v)))
        }
        DataType::Qos => decode_qos(payload).map(|v| Some(Value::Qos(v))),
        DataType::State => decode_state(payload).map(|v| Some(Value::State(v))),
        DataType::Enum => decode_enum(payload).map(|v| Some(Value::Enum(v))),
        DataType::Buffer => Ok(Some(Value::Buffer(payload))),
        DataType::Ascii => text(DataType::Ascii, payload).map(|v| Some(Value::Ascii(v))),
        DataType::Utf8 => text(DataType::Utf8, payload).map(|v| Some(Value::Utf8(v))),
        DataType::Rmtes => Ok(Some(Value::Rmtes(payload))),
        DataType::NoData | DataType::Error => Err(CodecError::Malformed {
            data_type,
            reason: "not an array primitive type",
        }),
    };

    match decoded {
        Ok(Some(value)) => ArrayEntry {
            load_type: data_type,
            payload: Payload::Value(value),
        },
        Ok(None) => blank,
        Err(err) => {
            trace!(%data_type, error = %err, "entry payload failed to decode");
            ArrayEntry {
                load_type: DataType::Error,
                payload: Payload::Error(err),
            }
        }
    }
}

fn text(data_type: DataType, payload: &[u8]) -> Result<&str> {
    std::str::from_utf8(payload).map_err(|_| CodecError::Malformed {
        data_type,
        reason: "invalid UTF-8",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::encoder::ArrayEncoder;
    use crate::error::ErrorKind;
    use crate::primitive::{hint, DataState, Rate, StreamState, Timeliness};

    fn encode(build: impl FnOnce(&mut ArrayEncoder)) -> Vec<u8> {
        encode_with(ArrayEncoder::new(), build)
    }

    fn encode_with(mut encoder: ArrayEncoder, build: impl FnOnce(&mut ArrayEncoder)) -> Vec<u8> {
        build(&mut encoder);
        let mut pool = BufferPool::new(1, 1);
        let mut buffer = pool.allocate(4096).expect("should allocate");
        encoder.complete(&mut buffer).expect("should complete");
        buffer.as_slice().to_vec()
    }

    fn bind(bytes: &[u8]) -> DecodedArray<'_> {
        decode_array(bytes, RWF_MAJOR_VERSION, RWF_MINOR_VERSION).expect("should bind")
    }

    fn collect(bytes: &[u8]) -> Vec<ArrayEntry<'_>> {
        bind(bytes)
            .entries()
            .collect::<Result<Vec<_>>>()
            .expect("entries should frame")
    }

    #[test]
    fn fixed_width_ints_decode_in_order() {
        let bytes = encode_with(ArrayEncoder::with_fixed_width(4), |a| {
            a.add_int(-11).unwrap();
            a.add_int(22).unwrap();
            a.add_int(-33).unwrap();
        });
        let array = bind(&bytes);
        assert_eq!(array.primitive_type(), DataType::Int);
        assert!(array.has_fixed_width());
        assert_eq!(array.fixed_width(), 4);
        assert_eq!(array.count(), 3);

        let mut cursor = array.cursor();
        let mut values = Vec::new();
        while cursor.forth().expect("forth should succeed") {
            values.push(cursor.entry().unwrap().int().unwrap());
        }
        assert_eq!(values, vec![-11, 22, -33]);
        assert!(!cursor.forth().unwrap());
    }

    #[test]
    fn variable_ascii_with_blank_entry() {
        let bytes = encode(|a| {
            a.add_ascii("ABC").unwrap();
            a.add_blank(DataType::Ascii).unwrap();
            a.add_ascii("KLMNOPQRS").unwrap();
        });
        let entries = collect(&bytes);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].ascii().unwrap(), "ABC");
        assert_eq!(entries[1].code(), DataCode::Blank);
        assert_eq!(entries[1].load_type(), DataType::Ascii);
        assert!(matches!(
            entries[1].ascii(),
            Err(CodecError::Blank {
                load_type: DataType::Ascii
            })
        ));
        assert_eq!(entries[2].ascii().unwrap(), "KLMNOPQRS");
        assert_eq!(entries[2].code(), DataCode::NoCode);
    }

    #[test]
    fn cursor_positions_and_reset() {
        let bytes = encode(|a| {
            a.add_uint(1).unwrap();
            a.add_uint(2).unwrap();
        });
        let array = bind(&bytes);
        let mut cursor = array.cursor();

        assert!(matches!(cursor.entry(), Err(CodecError::NoCurrentEntry)));
        assert_eq!(cursor.index(), None);

        assert!(cursor.forth().unwrap());
        assert_eq!(cursor.index(), Some(0));
        let first = cursor.entry().unwrap().clone();
        assert!(cursor.forth().unwrap());
        assert!(!cursor.forth().unwrap());
        assert!(cursor.is_exhausted());
        assert!(matches!(cursor.entry(), Err(CodecError::NoCurrentEntry)));
        assert!(!cursor.forth().unwrap());

        cursor.reset();
        assert!(cursor.forth().unwrap());
        assert_eq!(cursor.entry().unwrap(), &first);
    }

    #[test]
    fn repeated_resets_replay_every_entry() {
        let bytes = encode(|a| {
            for v in 0..5u64 {
                a.add_uint(v * 10).unwrap();
            }
        });
        let array = bind(&bytes);
        let mut cursor = array.cursor();

        for pass in 0..4 {
            let mut seen = Vec::new();
            while cursor.forth().expect("forth should succeed") {
                seen.push(cursor.entry().unwrap().uint().unwrap());
            }
            assert_eq!(seen, vec![0, 10, 20, 30, 40], "pass {pass}");
            assert!(!cursor.forth().unwrap());
            cursor.reset();
            assert_eq!(cursor.index(), None);
        }
    }

    fn add_value(encoder: &mut ArrayEncoder, value: &Value<'_>) {
        let result = match value {
            Value::Int(v) => encoder.add_int(*v),
            Value::UInt(v) => encoder.add_uint(*v),
            Value::Float(v) => encoder.add_float(*v),
            Value::Double(v) => encoder.add_double(*v),
            Value::Real(v) => encoder.add_real(*v),
            Value::Date(v) => encoder.add_date(*v),
            Value::Time(v) => encoder.add_time(*v),
            Value::DateTime(v) => encoder.add_datetime(*v),
            Value::Qos(v) => encoder.add_qos(*v),
            Value::State(v) => encoder.add_state(v),
            Value::Enum(v) => encoder.add_enum(*v),
            Value::Buffer(v) => encoder.add_buffer(v),
            Value::Ascii(v) => encoder.add_ascii(v),
            Value::Utf8(v) => encoder.add_utf8(v),
            Value::Rmtes(v) => encoder.add_rmtes(v),
        };
        result.expect("value should encode");
    }

    #[test]
    fn blanks_between_values_round_trip_for_every_type() {
        let date = Date::new(2024, 2, 29);
        let time = Time::new(9, 30, 15, 250);
        let qos = Qos::new(Timeliness::Realtime, Rate::TickByTick);
        let delayed = Qos::new(Timeliness::Delayed, Rate::TimeConflated)
            .with_time_info(15)
            .with_rate_info(500);
        let open = State::new(StreamState::Open, DataState::Ok, 0, "");
        let suspect = State::new(StreamState::ClosedRecover, DataState::Suspect, 7, "stale");

        let table: Vec<[Value<'_>; 3]> = vec![
            [Value::Int(-1), Value::Int(i64::MAX), Value::Int(300)],
            [Value::UInt(0), Value::UInt(u64::MAX), Value::UInt(255)],
            [Value::Float(1.5), Value::Float(-0.25), Value::Float(0.0)],
            [Value::Double(3.25), Value::Double(-1e300), Value::Double(0.1)],
            [
                Value::Real(Real::new(12345, hint::EXPONENT_2)),
                Value::Real(Real::new(-7, hint::EXPONENT0)),
                Value::Real(Real::new(3, hint::FRACTION_256)),
            ],
            [
                Value::Date(date),
                Value::Date(Date::new(1999, 12, 31)),
                Value::Date(Date::new(1, 1, 1)),
            ],
            [
                Value::Time(time),
                Value::Time(Time::new(23, 59, 59, 999).with_sub_millis(998, 997)),
                Value::Time(Time::new(0, 0, 0, 0)),
            ],
            [
                Value::DateTime(DateTime::new(date, time)),
                Value::DateTime(DateTime::new(Date::new(2000, 1, 1), Time::new(12, 0, 0, 1))),
                Value::DateTime(DateTime::new(date, Time::new(1, 2, 3, 4))),
            ],
            [Value::Qos(qos), Value::Qos(delayed), Value::Qos(qos.with_dynamic(true))],
            [
                Value::State(open.clone()),
                Value::State(suspect),
                Value::State(open),
            ],
            [Value::Enum(0), Value::Enum(300), Value::Enum(u16::MAX)],
            [
                Value::Buffer(&[0xDE, 0xAD]),
                Value::Buffer(&[0, 0, 1]),
                Value::Buffer(&[0xFF; 300]),
            ],
            [Value::Ascii("ABC"), Value::Ascii("x"), Value::Ascii("trailing\0")],
            [Value::Utf8("grüße"), Value::Utf8("€"), Value::Utf8("plain")],
            [
                Value::Rmtes(&[0x1B, 0x25, 0x30]),
                Value::Rmtes(&[0x41]),
                Value::Rmtes(&[0x00, 0x42]),
            ],
        ];
        assert_eq!(table.len(), 15);

        for values in &table {
            let data_type = values[0].data_type();
            let bytes = encode(|a| {
                add_value(a, &values[0]);
                a.add_blank(data_type).unwrap();
                add_value(a, &values[1]);
                a.add_blank(data_type).unwrap();
                add_value(a, &values[2]);
            });

            let array = bind(&bytes);
            assert_eq!(array.primitive_type(), data_type);
            assert_eq!(array.count(), 5);

            let entries = collect(&bytes);
            assert_eq!(entries.len(), 5, "{data_type}");
            for (position, entry) in entries.iter().enumerate() {
                assert_eq!(entry.load_type(), data_type, "{data_type} at {position}");
                if position % 2 == 1 {
                    assert_eq!(entry.code(), DataCode::Blank, "{data_type} at {position}");
                    assert!(matches!(entry.value(), Err(CodecError::Blank { .. })));
                } else {
                    assert_eq!(entry.code(), DataCode::NoCode, "{data_type} at {position}");
                    assert_eq!(
                        entry.value().expect("value should decode"),
                        &values[position / 2],
                        "{data_type} at {position}"
                    );
                }
            }
        }
    }

    #[test]
    fn two_passes_yield_identical_entries() {
        let state = State::new(StreamState::Open, DataState::Suspect, 7, "text");
        let bytes = encode(|a| {
            a.add_state(&state).unwrap();
            a.add_blank(DataType::State).unwrap();
            a.add_state(&state).unwrap();
        });
        let array = bind(&bytes);
        let first: Vec<_> = array.entries().collect();
        let second: Vec<_> = array.entries().collect();
        assert_eq!(first, second);
        assert_eq!(first[0].as_ref().unwrap().state().unwrap(), &state);
    }

    #[test]
    fn accessor_failures_do_not_move_cursor() {
        let bytes = encode(|a| {
            a.add_double(1.5).unwrap();
            a.add_double(2.5).unwrap();
        });
        let array = bind(&bytes);
        let mut cursor = array.cursor();
        assert!(cursor.forth().unwrap());

        let err = cursor.entry().unwrap().int().unwrap_err();
        assert!(matches!(
            err,
            CodecError::TypeMismatch {
                requested: DataType::Int,
                actual: DataType::Double
            }
        ));
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(cursor.index(), Some(0));
        assert_eq!(cursor.entry().unwrap().double().unwrap(), 1.5);

        assert!(cursor.forth().unwrap());
        assert_eq!(cursor.entry().unwrap().double().unwrap(), 2.5);
    }

    #[test]
    fn blank_accessor_reports_blank_for_any_type() {
        let bytes = encode(|a| {
            a.add_blank(DataType::Real).unwrap();
        });
        let entries = collect(&bytes);
        assert!(matches!(entries[0].real(), Err(CodecError::Blank { .. })));
        assert!(matches!(entries[0].int(), Err(CodecError::Blank { .. })));
        assert_eq!(entries[0].int().unwrap_err().kind(), ErrorKind::Blank);
    }

    #[test]
    fn fixed_width_blanks_round_trip() {
        let cases: [(DataType, u16); 5] = [
            (DataType::Date, 4),
            (DataType::Time, 8),
            (DataType::DateTime, 9),
            (DataType::Buffer, 3),
            (DataType::Utf8, 6),
        ];
        for (data_type, width) in cases {
            let bytes = encode_with(ArrayEncoder::with_fixed_width(width), |a| {
                a.add_blank(data_type).unwrap();
            });
            let entries = collect(&bytes);
            assert_eq!(entries.len(), 1);
            assert!(entries[0].is_blank(), "{data_type} should decode blank");
            assert_eq!(entries[0].load_type(), data_type);
        }
    }

    #[test]
    fn fixed_width_text_strips_padding() {
        let bytes = encode_with(ArrayEncoder::with_fixed_width(6), |a| {
            a.add_ascii("AB").unwrap();
            a.add_ascii("ABCDEF").unwrap();
        });
        let entries = collect(&bytes);
        assert_eq!(entries[0].ascii().unwrap(), "AB");
        assert_eq!(entries[1].ascii().unwrap(), "ABCDEF");
    }

    #[test]
    fn fixed_width_buffers_strip_padding_like_text() {
        let bytes = encode_with(ArrayEncoder::with_fixed_width(4), |a| {
            a.add_buffer(&[1, 0, 2]).unwrap();
            a.add_blank(DataType::Buffer).unwrap();
            a.add_buffer(&[9, 9, 9, 9]).unwrap();
        });
        let entries = collect(&bytes);
        assert_eq!(entries[0].buffer().unwrap(), &[1, 0, 2]);
        assert!(entries[1].is_blank());
        assert_eq!(entries[2].buffer().unwrap(), &[9, 9, 9, 9]);

        let bytes = encode_with(ArrayEncoder::with_fixed_width(3), |a| {
            a.add_rmtes(&[0x1B]).unwrap();
        });
        assert_eq!(collect(&bytes)[0].rmtes().unwrap(), &[0x1B]);
    }

    #[test]
    fn variable_width_keeps_trailing_zero_bytes() {
        let bytes = encode(|a| {
            a.add_ascii("AB\0").unwrap();
            a.add_ascii("\0").unwrap();
        });
        let entries = collect(&bytes);
        assert_eq!(entries[0].ascii().unwrap(), "AB\0");
        assert_eq!(entries[1].ascii().unwrap(), "\0");

        let bytes = encode(|a| {
            a.add_buffer(&[0, 0]).unwrap();
        });
        let entry = &collect(&bytes)[0];
        assert!(!entry.is_blank());
        assert_eq!(entry.buffer().unwrap(), &[0, 0]);
    }

    #[test]
    fn every_variable_type_decodes() {
        let qos = Qos::new(Timeliness::Delayed, Rate::TimeConflated)
            .with_time_info(15)
            .with_rate_info(500);
        let date = Date::new(2024, 2, 29);
        let time = Time::new(23, 59, 58, 999).with_sub_millis(998, 997);

        assert_eq!(
            collect(&encode(|a| {
                a.add_real(Real::new(12345, hint::EXPONENT_2)).unwrap();
            }))[0]
                .real()
                .unwrap(),
            Real::new(12345, hint::EXPONENT_2)
        );
        assert_eq!(
            collect(&encode(|a| {
                a.add_qos(qos).unwrap();
            }))[0]
                .qos()
                .unwrap(),
            qos
        );
        assert_eq!(
            collect(&encode(|a| {
                a.add_date(date).unwrap();
            }))[0]
                .date()
                .unwrap(),
            date
        );
        assert_eq!(
            collect(&encode(|a| {
                a.add_time(time).unwrap();
            }))[0]
                .time()
                .unwrap(),
            time
        );
        assert_eq!(
            collect(&encode(|a| {
                a.add_enum(300).unwrap();
            }))[0]
                .enumeration()
                .unwrap(),
            300
        );
        assert_eq!(
            collect(&encode(|a| {
                a.add_float(-0.25).unwrap();
            }))[0]
                .float()
                .unwrap(),
            -0.25
        );
        assert_eq!(
            collect(&encode(|a| {
                a.add_utf8("grüße").unwrap();
            }))[0]
                .utf8()
                .unwrap(),
            "grüße"
        );
        assert_eq!(
            collect(&encode(|a| {
                a.add_rmtes(&[0x1B, 0x25, 0x30]).unwrap();
            }))[0]
                .rmtes()
                .unwrap(),
            &[0x1B, 0x25, 0x30]
        );
    }

    #[test]
    fn blank_array_has_no_data() {
        let array = bind(&[]);
        assert!(array.is_blank());
        assert_eq!(array.primitive_type(), DataType::NoData);
        assert_eq!(array.count(), 0);
        assert!(!array.cursor().forth().unwrap());
    }

    #[test]
    fn unsupported_major_version_is_rejected() {
        let bytes = encode(|a| {
            a.add_int(1).unwrap();
        });
        let err = decode_array(&bytes, 13, 0).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnsupportedVersion {
                major: 13,
                minor: 0
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn malformed_headers_fail_at_bind() {
        assert!(matches!(
            decode_array(&[3, 0], 14, 1),
            Err(CodecError::IncompleteData { .. })
        ));
        assert!(matches!(
            decode_array(&[15, 0, 0, 0], 14, 1),
            Err(CodecError::UnknownDataType(15))
        ));
        // Fixed width 4, three entries declared, one present.
        assert!(matches!(
            decode_array(&[3, 4, 0, 3, 0, 0, 0, 1], 14, 1),
            Err(CodecError::IncompleteData { .. })
        ));
        assert!(matches!(
            decode_array(&[8, 4, 0, 0], 14, 1),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn truncated_entry_exhausts_cursor() {
        // Two entries declared, the second claims 5 bytes but has 2.
        let bytes = [4, 0, 0, 2, 1, 7, 5, 1, 2];
        let array = bind(&bytes);
        let mut cursor = array.cursor();
        assert!(cursor.forth().unwrap());
        assert_eq!(cursor.entry().unwrap().uint().unwrap(), 7);

        let err = cursor.forth().unwrap_err();
        assert!(matches!(err, CodecError::IncompleteData { .. }));
        assert!(cursor.is_exhausted());
        assert!(!cursor.forth().unwrap());

        let results: Vec<_> = array.entries().collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn invalid_payload_becomes_error_entry() {
        // A 9-byte Int followed by a valid 1-byte Int.
        let mut bytes = vec![3, 0, 0, 2, 9];
        bytes.extend_from_slice(&[0; 9]);
        bytes.extend_from_slice(&[1, 42]);

        let entries = collect(&bytes);
        assert_eq!(entries[0].load_type(), DataType::Error);
        assert!(matches!(
            entries[0].error(),
            Some(CodecError::Malformed { .. })
        ));
        assert!(matches!(
            entries[0].int(),
            Err(CodecError::TypeMismatch {
                requested: DataType::Int,
                actual: DataType::Error
            })
        ));
        assert_eq!(entries[1].int().unwrap(), 42);
    }

    #[test]
    fn reserved_real_hint_becomes_error_entry() {
        let bytes = [8, 0, 0, 1, 2, 31, 1];
        let entries = collect(&bytes);
        assert_eq!(entries[0].load_type(), DataType::Error);
    }

    #[test]
    fn invalid_utf8_becomes_error_entry() {
        let bytes = [18, 0, 0, 1, 2, 0xC3, 0x28];
        let entries = collect(&bytes);
        assert_eq!(entries[0].load_type(), DataType::Error);
        assert!(entries[0].value().is_err());
    }
}

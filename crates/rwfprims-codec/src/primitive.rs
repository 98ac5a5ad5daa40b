//! Natural RWF encodings for the primitive types an array can hold.
//!
//! Encoders write the minimal form; decoders take exactly the bytes of one
//! entry (the length is always known from the array framing).

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::error::{CodecError, Result};
use crate::types::DataType;

/// Real hint values.
///
/// `0..=21` scale the mantissa by `10^(hint - 14)`, `22..=30` divide it by
/// `2^(hint - 22)`. The three special hints carry no mantissa.
pub mod hint {
    pub const EXPONENT_14: u8 = 0;
    pub const EXPONENT_2: u8 = 12;
    pub const EXPONENT_1: u8 = 13;
    pub const EXPONENT0: u8 = 14;
    pub const EXPONENT1: u8 = 15;
    pub const EXPONENT7: u8 = 21;
    pub const FRACTION_1: u8 = 22;
    pub const FRACTION_2: u8 = 23;
    pub const FRACTION_256: u8 = 30;
    pub const INFINITY: u8 = 33;
    pub const NEG_INFINITY: u8 = 34;
    pub const NOT_A_NUMBER: u8 = 35;
}

/// A scaled decimal or binary-fraction number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Real {
    pub mantissa: i64,
    pub hint: u8,
}

impl Real {
    pub fn new(mantissa: i64, hint: u8) -> Self {
        Self { mantissa, hint }
    }

    pub fn infinity() -> Self {
        Self::new(0, hint::INFINITY)
    }

    pub fn neg_infinity() -> Self {
        Self::new(0, hint::NEG_INFINITY)
    }

    pub fn nan() -> Self {
        Self::new(0, hint::NOT_A_NUMBER)
    }

    /// True for the infinity and not-a-number hints.
    pub fn is_special(&self) -> bool {
        matches!(
            self.hint,
            hint::INFINITY | hint::NEG_INFINITY | hint::NOT_A_NUMBER
        )
    }

    pub fn to_f64(&self) -> f64 {
        match self.hint {
            hint::INFINITY => f64::INFINITY,
            hint::NEG_INFINITY => f64::NEG_INFINITY,
            hint::NOT_A_NUMBER => f64::NAN,
            h if h <= hint::EXPONENT7 => {
                self.mantissa as f64 * 10f64.powi(i32::from(h) - i32::from(hint::EXPONENT0))
            }
            h if h <= hint::FRACTION_256 => {
                self.mantissa as f64 / f64::from(1u32 << (h - hint::FRACTION_1))
            }
            _ => f64::NAN,
        }
    }

    fn validate(&self) -> Result<()> {
        if is_valid_hint(self.hint) {
            Ok(())
        } else {
            Err(CodecError::InvalidValue {
                data_type: DataType::Real,
                reason: "reserved or out-of-range hint",
            })
        }
    }
}

fn is_valid_hint(h: u8) -> bool {
    h <= hint::FRACTION_256 || (hint::INFINITY..=hint::NOT_A_NUMBER).contains(&h)
}

/// A calendar date. All-zero is the blank date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    pub const BLANK: Date = Date {
        year: 0,
        month: 0,
        day: 0,
    };

    pub fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    pub fn is_blank(&self) -> bool {
        *self == Self::BLANK
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason| CodecError::InvalidValue {
            data_type: DataType::Date,
            reason,
        };
        if !(1..=12).contains(&self.month) {
            return Err(invalid("month out of range"));
        }
        if self.day == 0 || self.day > days_in_month(self.year, self.month) {
            return Err(invalid("day out of range"));
        }
        Ok(())
    }
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) => 29,
        2 => 28,
        _ => 31,
    }
}

/// A time of day down to the nanosecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
    pub microsecond: u16,
    pub nanosecond: u16,
}

impl Time {
    pub const BLANK: Time = Time {
        hour: 255,
        minute: 255,
        second: 255,
        millisecond: 65535,
        microsecond: 2047,
        nanosecond: 2047,
    };

    pub fn new(hour: u8, minute: u8, second: u8, millisecond: u16) -> Self {
        Self {
            hour,
            minute,
            second,
            millisecond,
            microsecond: 0,
            nanosecond: 0,
        }
    }

    pub fn with_sub_millis(mut self, microsecond: u16, nanosecond: u16) -> Self {
        self.microsecond = microsecond;
        self.nanosecond = nanosecond;
        self
    }

    pub fn is_blank(&self) -> bool {
        *self == Self::BLANK
    }

    /// Shortest wire length that preserves every non-zero field.
    pub fn natural_len(&self) -> usize {
        if self.nanosecond != 0 {
            8
        } else if self.microsecond != 0 {
            7
        } else if self.millisecond != 0 {
            5
        } else if self.second != 0 {
            3
        } else {
            2
        }
    }

    /// Whether the value survives encoding at `len` bytes.
    pub fn fits(&self, len: usize) -> bool {
        match len {
            2 => self.second == 0 && self.millisecond == 0 && self.sub_millis_zero(),
            3 => self.millisecond == 0 && self.sub_millis_zero(),
            5 => self.sub_millis_zero(),
            7 => self.nanosecond == 0,
            8 => true,
            _ => false,
        }
    }

    fn sub_millis_zero(&self) -> bool {
        self.microsecond == 0 && self.nanosecond == 0
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason| CodecError::InvalidValue {
            data_type: DataType::Time,
            reason,
        };
        if self.hour > 23 || self.minute > 59 || self.second > 60 {
            return Err(invalid("hour, minute or second out of range"));
        }
        if self.millisecond > 999 || self.microsecond > 999 || self.nanosecond > 999 {
            return Err(invalid("sub-second field out of range"));
        }
        Ok(())
    }
}

/// A date followed by a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

impl DateTime {
    pub const BLANK: DateTime = DateTime {
        date: Date::BLANK,
        time: Time::BLANK,
    };

    pub fn new(date: Date, time: Time) -> Self {
        Self { date, time }
    }

    pub fn is_blank(&self) -> bool {
        *self == Self::BLANK
    }

    pub fn natural_len(&self) -> usize {
        DATE_LEN + self.time.natural_len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Timeliness {
    Unspecified = 0,
    Realtime = 1,
    DelayedUnknown = 2,
    Delayed = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rate {
    Unspecified = 0,
    TickByTick = 1,
    JitConflated = 2,
    TimeConflated = 3,
}

/// Quality of service. `time_info` is carried only for
/// [`Timeliness::Delayed`], `rate_info` only for [`Rate::TimeConflated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Qos {
    pub timeliness: Timeliness,
    pub rate: Rate,
    pub dynamic: bool,
    pub time_info: u16,
    pub rate_info: u16,
}

impl Qos {
    pub fn new(timeliness: Timeliness, rate: Rate) -> Self {
        Self {
            timeliness,
            rate,
            dynamic: false,
            time_info: 0,
            rate_info: 0,
        }
    }

    pub fn realtime_tick_by_tick() -> Self {
        Self::new(Timeliness::Realtime, Rate::TickByTick)
    }

    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn with_time_info(mut self, time_info: u16) -> Self {
        self.time_info = time_info;
        self
    }

    pub fn with_rate_info(mut self, rate_info: u16) -> Self {
        self.rate_info = rate_info;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    Unspecified = 0,
    Open = 1,
    NonStreaming = 2,
    ClosedRecover = 3,
    Closed = 4,
    Redirected = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataState {
    NoChange = 0,
    Ok = 1,
    Suspect = 2,
}

/// Stream and data state with a status code and free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct State {
    pub stream_state: StreamState,
    pub data_state: DataState,
    pub code: u8,
    pub text: String,
}

impl State {
    pub fn new(
        stream_state: StreamState,
        data_state: DataState,
        code: u8,
        text: impl Into<String>,
    ) -> Self {
        Self {
            stream_state,
            data_state,
            code,
            text: text.into(),
        }
    }
}

pub(crate) const DATE_LEN: usize = 4;
pub(crate) const FLOAT_LEN: usize = 4;
pub(crate) const DOUBLE_LEN: usize = 8;
const MAX_U15: usize = 0x7FFF;

// ---------------------------------------------------------------------------
// Length prefixes
// ---------------------------------------------------------------------------

/// One byte below 0xFE, otherwise 0xFE followed by a big-endian u16.
pub(crate) fn put_u16ob(dst: &mut BytesMut, value: u16) {
    if value < 0xFE {
        dst.put_u8(value as u8);
    } else {
        dst.put_u8(0xFE);
        dst.put_u16(value);
    }
}

pub(crate) fn u16ob_len(value: u16) -> usize {
    if value < 0xFE {
        1
    } else {
        3
    }
}

pub(crate) fn get_u16ob(src: &[u8], pos: &mut usize) -> Result<u16> {
    let first = *src.get(*pos).ok_or(CodecError::IncompleteData {
        needed: 1,
        available: 0,
    })?;
    if first < 0xFE {
        *pos += 1;
        return Ok(u16::from(first));
    }
    let bytes = src
        .get(*pos + 1..*pos + 3)
        .ok_or(CodecError::IncompleteData {
            needed: 3,
            available: src.len().saturating_sub(*pos),
        })?;
    *pos += 3;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// 15-bit length: one byte below 0x80, else two bytes with the top bit set.
fn put_u15rb(dst: &mut BytesMut, value: usize) {
    if value < 0x80 {
        dst.put_u8(value as u8);
    } else {
        dst.put_u16(value as u16 | 0x8000);
    }
}

fn get_u15rb(src: &[u8], pos: &mut usize) -> Result<usize> {
    let first = *src.get(*pos).ok_or(malformed(DataType::State, "missing text length"))?;
    if first & 0x80 == 0 {
        *pos += 1;
        return Ok(usize::from(first));
    }
    let second = *src
        .get(*pos + 1)
        .ok_or(malformed(DataType::State, "truncated text length"))?;
    *pos += 2;
    Ok(usize::from(u16::from_be_bytes([first & 0x7F, second])))
}

fn malformed(data_type: DataType, reason: &'static str) -> CodecError {
    CodecError::Malformed { data_type, reason }
}

// ---------------------------------------------------------------------------
// Integers
// ---------------------------------------------------------------------------

/// Fewest bytes of big-endian two's complement that hold `value`.
pub(crate) fn int_len(value: i64) -> usize {
    (1..8)
        .find(|&bytes| int_fits(value, bytes))
        .unwrap_or(8)
}

pub(crate) fn int_fits(value: i64, bytes: usize) -> bool {
    if bytes >= 8 {
        return true;
    }
    let bits = bytes * 8;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    (min..=max).contains(&value)
}

pub(crate) fn put_int(dst: &mut BytesMut, value: i64, width: usize) {
    dst.put_slice(&value.to_be_bytes()[8 - width..]);
}

pub(crate) fn uint_len(value: u64) -> usize {
    let significant = 64 - value.leading_zeros() as usize;
    significant.div_ceil(8).max(1)
}

pub(crate) fn uint_fits(value: u64, bytes: usize) -> bool {
    bytes >= 8 || value < (1u64 << (bytes * 8))
}

pub(crate) fn put_uint(dst: &mut BytesMut, value: u64, width: usize) {
    dst.put_slice(&value.to_be_bytes()[8 - width..]);
}

pub(crate) fn decode_int(src: &[u8]) -> Result<i64> {
    if src.is_empty() || src.len() > 8 {
        return Err(malformed(DataType::Int, "length must be 1 to 8 bytes"));
    }
    let seed: i64 = if src[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(src
        .iter()
        .fold(seed, |acc, &byte| (acc << 8) | i64::from(byte)))
}

pub(crate) fn decode_uint(src: &[u8]) -> Result<u64> {
    if src.is_empty() || src.len() > 8 {
        return Err(malformed(DataType::UInt, "length must be 1 to 8 bytes"));
    }
    Ok(src.iter().fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)))
}

pub(crate) fn decode_enum(src: &[u8]) -> Result<u16> {
    match src {
        [value] => Ok(u16::from(*value)),
        [high, low] => Ok(u16::from_be_bytes([*high, *low])),
        _ => Err(malformed(DataType::Enum, "length must be 1 or 2 bytes")),
    }
}

// ---------------------------------------------------------------------------
// Floating point
// ---------------------------------------------------------------------------

pub(crate) fn decode_float(src: &[u8]) -> Result<f32> {
    let bytes: [u8; FLOAT_LEN] = src
        .try_into()
        .map_err(|_| malformed(DataType::Float, "length must be 4 bytes"))?;
    Ok(f32::from_be_bytes(bytes))
}

pub(crate) fn decode_double(src: &[u8]) -> Result<f64> {
    let bytes: [u8; DOUBLE_LEN] = src
        .try_into()
        .map_err(|_| malformed(DataType::Double, "length must be 8 bytes"))?;
    Ok(f64::from_be_bytes(bytes))
}

// ---------------------------------------------------------------------------
// Real
// ---------------------------------------------------------------------------

pub(crate) fn encode_real(dst: &mut BytesMut, real: &Real) -> Result<()> {
    real.validate()?;
    dst.put_u8(real.hint);
    if !real.is_special() {
        put_int(dst, real.mantissa, int_len(real.mantissa));
    }
    Ok(())
}

/// Decode a non-empty Real payload. `Ok(None)` is the one-byte blank form.
pub(crate) fn decode_real(src: &[u8]) -> Result<Option<Real>> {
    let (&format, mantissa) = src
        .split_first()
        .ok_or(malformed(DataType::Real, "missing hint byte"))?;
    let h = format & 0x3F;
    if mantissa.is_empty() {
        return Ok(match h {
            hint::INFINITY | hint::NEG_INFINITY | hint::NOT_A_NUMBER => Some(Real::new(0, h)),
            _ => None,
        });
    }
    if h > hint::FRACTION_256 {
        return Err(malformed(DataType::Real, "reserved hint with mantissa"));
    }
    let value = decode_int(mantissa)
        .map_err(|_| malformed(DataType::Real, "mantissa must be 1 to 8 bytes"))?;
    Ok(Some(Real::new(value, h)))
}

// ---------------------------------------------------------------------------
// Date / Time / DateTime
// ---------------------------------------------------------------------------

pub(crate) fn encode_date(dst: &mut BytesMut, date: &Date) -> Result<()> {
    if !date.is_blank() {
        date.validate()?;
    }
    dst.put_u8(date.day);
    dst.put_u8(date.month);
    dst.put_u16(date.year);
    Ok(())
}

pub(crate) fn decode_date(src: &[u8]) -> Result<Date> {
    match src {
        [day, month, y0, y1] => Ok(Date::new(u16::from_be_bytes([*y0, *y1]), *month, *day)),
        _ => Err(malformed(DataType::Date, "length must be 4 bytes")),
    }
}

/// Encode `time` at exactly `len` bytes. The caller checks [`Time::fits`].
pub(crate) fn encode_time(dst: &mut BytesMut, time: &Time, len: usize) -> Result<()> {
    if !time.is_blank() {
        time.validate()?;
    }
    dst.put_u8(time.hour);
    dst.put_u8(time.minute);
    if len >= 3 {
        dst.put_u8(time.second);
    }
    if len >= 5 {
        dst.put_u16(time.millisecond);
    }
    match len {
        7 => dst.put_u16(time.microsecond),
        8 => {
            dst.put_u16(((time.nanosecond & 0xFF00) << 3) | time.microsecond);
            dst.put_u8(time.nanosecond as u8);
        }
        _ => {}
    }
    Ok(())
}

pub(crate) fn decode_time(src: &[u8]) -> Result<Time> {
    if !matches!(src.len(), 2 | 3 | 5 | 7 | 8) {
        return Err(malformed(DataType::Time, "length must be 2, 3, 5, 7 or 8"));
    }
    let mut time = Time {
        hour: src[0],
        minute: src[1],
        ..Time::default()
    };
    if src.len() >= 3 {
        time.second = src[2];
    }
    if src.len() >= 5 {
        time.millisecond = u16::from_be_bytes([src[3], src[4]]);
    }
    match src.len() {
        7 => time.microsecond = u16::from_be_bytes([src[5], src[6]]),
        8 => {
            let word = u16::from_be_bytes([src[5], src[6]]);
            time.microsecond = word & 0x07FF;
            time.nanosecond = ((word & 0x3800) >> 3) | u16::from(src[7]);
        }
        _ => {}
    }
    if is_blank_time_prefix(&time, src.len()) {
        return Ok(Time::BLANK);
    }
    Ok(time)
}

fn is_blank_time_prefix(time: &Time, len: usize) -> bool {
    let blank = Time::BLANK;
    time.hour == blank.hour
        && time.minute == blank.minute
        && (len < 3 || time.second == blank.second)
        && (len < 5 || time.millisecond == blank.millisecond)
        && (len < 7 || time.microsecond == blank.microsecond)
        && (len < 8 || time.nanosecond == blank.nanosecond)
}

pub(crate) fn encode_datetime(dst: &mut BytesMut, value: &DateTime, len: usize) -> Result<()> {
    encode_date(dst, &value.date)?;
    encode_time(dst, &value.time, len - DATE_LEN)
}

pub(crate) fn decode_datetime(src: &[u8]) -> Result<DateTime> {
    if src.len() < DATE_LEN + 2 {
        return Err(malformed(
            DataType::DateTime,
            "length must be 6, 7, 9, 11 or 12",
        ));
    }
    let (date, time) = src.split_at(DATE_LEN);
    let time = decode_time(time)
        .map_err(|_| malformed(DataType::DateTime, "length must be 6, 7, 9, 11 or 12"))?;
    Ok(DateTime::new(decode_date(date)?, time))
}

// ---------------------------------------------------------------------------
// Qos / State
// ---------------------------------------------------------------------------

pub(crate) fn encode_qos(dst: &mut BytesMut, qos: &Qos) -> Result<()> {
    if qos.timeliness == Timeliness::Unspecified || qos.rate == Rate::Unspecified {
        return Err(CodecError::InvalidValue {
            data_type: DataType::Qos,
            reason: "timeliness and rate must be specified",
        });
    }
    dst.put_u8(((qos.timeliness as u8) << 5) | ((qos.rate as u8) << 1) | u8::from(qos.dynamic));
    if qos.timeliness == Timeliness::Delayed {
        dst.put_u16(qos.time_info);
    }
    if qos.rate == Rate::TimeConflated {
        dst.put_u16(qos.rate_info);
    }
    Ok(())
}

pub(crate) fn decode_qos(src: &[u8]) -> Result<Qos> {
    let (&flags, mut rest) = src
        .split_first()
        .ok_or(malformed(DataType::Qos, "empty payload"))?;
    let timeliness = match flags >> 5 {
        0 => Timeliness::Unspecified,
        1 => Timeliness::Realtime,
        2 => Timeliness::DelayedUnknown,
        3 => Timeliness::Delayed,
        _ => return Err(malformed(DataType::Qos, "unknown timeliness")),
    };
    let rate = match (flags >> 1) & 0x0F {
        0 => Rate::Unspecified,
        1 => Rate::TickByTick,
        2 => Rate::JitConflated,
        3 => Rate::TimeConflated,
        _ => return Err(malformed(DataType::Qos, "unknown rate")),
    };
    let mut qos = Qos::new(timeliness, rate).with_dynamic(flags & 0x01 != 0);

    if timeliness == Timeliness::Delayed {
        qos.time_info = take_u16(&mut rest)?;
    }
    if rate == Rate::TimeConflated {
        qos.rate_info = take_u16(&mut rest)?;
    }
    if !rest.is_empty() {
        return Err(malformed(DataType::Qos, "trailing bytes"));
    }
    Ok(qos)
}

fn take_u16(rest: &mut &[u8]) -> Result<u16> {
    let current: &[u8] = rest;
    if current.len() < 2 {
        return Err(malformed(DataType::Qos, "truncated time or rate info"));
    }
    *rest = &current[2..];
    Ok(u16::from_be_bytes([current[0], current[1]]))
}

pub(crate) fn encode_state(dst: &mut BytesMut, state: &State) -> Result<()> {
    if state.stream_state == StreamState::Unspecified {
        return Err(CodecError::InvalidValue {
            data_type: DataType::State,
            reason: "stream state must be specified",
        });
    }
    if state.text.len() > MAX_U15 {
        return Err(CodecError::InvalidValue {
            data_type: DataType::State,
            reason: "text longer than 32767 bytes",
        });
    }
    dst.put_u8(((state.stream_state as u8) << 3) | state.data_state as u8);
    dst.put_u8(state.code);
    put_u15rb(dst, state.text.len());
    dst.put_slice(state.text.as_bytes());
    Ok(())
}

pub(crate) fn decode_state(src: &[u8]) -> Result<State> {
    let [flags, code, ..] = *src else {
        return Err(malformed(DataType::State, "length must be at least 3 bytes"));
    };
    let stream_state = match flags >> 3 {
        0 => StreamState::Unspecified,
        1 => StreamState::Open,
        2 => StreamState::NonStreaming,
        3 => StreamState::ClosedRecover,
        4 => StreamState::Closed,
        5 => StreamState::Redirected,
        _ => return Err(malformed(DataType::State, "unknown stream state")),
    };
    let data_state = match flags & 0x07 {
        0 => DataState::NoChange,
        1 => DataState::Ok,
        2 => DataState::Suspect,
        _ => return Err(malformed(DataType::State, "unknown data state")),
    };
    let mut pos = 2;
    let text_len = get_u15rb(src, &mut pos)?;
    let text = src
        .get(pos..pos + text_len)
        .ok_or(malformed(DataType::State, "truncated text"))?;
    if pos + text_len != src.len() {
        return Err(malformed(DataType::State, "trailing bytes"));
    }
    Ok(State::new(
        stream_state,
        data_state,
        code,
        String::from_utf8_lossy(text),
    ))
}

use std::fmt;

use serde::Serialize;

/// RWF primitive type tags.
///
/// Every decoded entry carries exactly one of these as its load type. Wire
/// codes follow the RWF data type enumeration; [`DataType::NoData`] and
/// [`DataType::Error`] never appear as an array's encoded primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataType {
    Int,
    UInt,
    Float,
    Double,
    Real,
    Date,
    Time,
    DateTime,
    Qos,
    State,
    Enum,
    Buffer,
    Ascii,
    Utf8,
    Rmtes,
    /// Load type of a blank (zero-length) array.
    NoData,
    /// Load type of an entry whose payload failed to decode.
    Error,
}

impl DataType {
    /// Wire code for types that can be an array's primitive type.
    pub fn code(self) -> Option<u8> {
        let code = match self {
            DataType::Int => 3,
            DataType::UInt => 4,
            DataType::Float => 5,
            DataType::Double => 6,
            DataType::Real => 8,
            DataType::Date => 9,
            DataType::Time => 10,
            DataType::DateTime => 11,
            DataType::Qos => 12,
            DataType::State => 13,
            DataType::Enum => 14,
            DataType::Buffer => 16,
            DataType::Ascii => 17,
            DataType::Utf8 => 18,
            DataType::Rmtes => 19,
            DataType::NoData | DataType::Error => return None,
        };
        Some(code)
    }

    /// Map a wire code back to an array primitive type.
    pub fn from_code(code: u8) -> Option<Self> {
        let data_type = match code {
            3 => DataType::Int,
            4 => DataType::UInt,
            5 => DataType::Float,
            6 => DataType::Double,
            8 => DataType::Real,
            9 => DataType::Date,
            10 => DataType::Time,
            11 => DataType::DateTime,
            12 => DataType::Qos,
            13 => DataType::State,
            14 => DataType::Enum,
            16 => DataType::Buffer,
            17 => DataType::Ascii,
            18 => DataType::Utf8,
            19 => DataType::Rmtes,
            _ => return None,
        };
        Some(data_type)
    }

    /// Buffer-family types carry raw bytes and zero-pad at a fixed width.
    pub fn is_buffer_like(self) -> bool {
        matches!(
            self,
            DataType::Buffer | DataType::Ascii | DataType::Utf8 | DataType::Rmtes
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Int => "Int",
            DataType::UInt => "UInt",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::Real => "Real",
            DataType::Date => "Date",
            DataType::Time => "Time",
            DataType::DateTime => "DateTime",
            DataType::Qos => "Qos",
            DataType::State => "State",
            DataType::Enum => "Enum",
            DataType::Buffer => "Buffer",
            DataType::Ascii => "Ascii",
            DataType::Utf8 => "Utf8",
            DataType::Rmtes => "Rmtes",
            DataType::NoData => "NoData",
            DataType::Error => "Error",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an entry carries a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataCode {
    /// The entry holds a value.
    NoCode,
    /// The entry is present on the wire without a value.
    Blank,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARRAY_TYPES: [DataType; 15] = [
        DataType::Int,
        DataType::UInt,
        DataType::Float,
        DataType::Double,
        DataType::Real,
        DataType::Date,
        DataType::Time,
        DataType::DateTime,
        DataType::Qos,
        DataType::State,
        DataType::Enum,
        DataType::Buffer,
        DataType::Ascii,
        DataType::Utf8,
        DataType::Rmtes,
    ];

    #[test]
    fn every_array_type_has_a_stable_code() {
        for data_type in ARRAY_TYPES {
            let code = data_type.code().expect("array types have codes");
            assert_eq!(DataType::from_code(code), Some(data_type));
        }
    }

    #[test]
    fn non_primitive_codes_are_rejected() {
        // 15 is the Array container, 0 is unknown, 128 is no-data.
        for code in [0u8, 1, 2, 7, 15, 128, 255] {
            assert_eq!(DataType::from_code(code), None, "code {code}");
        }
        assert_eq!(DataType::NoData.code(), None);
        assert_eq!(DataType::Error.code(), None);
    }

    #[test]
    fn rwf_codes_match_wire_enumeration() {
        assert_eq!(DataType::Int.code(), Some(3));
        assert_eq!(DataType::Enum.code(), Some(14));
        assert_eq!(DataType::Ascii.code(), Some(17));
        assert_eq!(DataType::Rmtes.code(), Some(19));
    }
}

//! Element type resolution
//!
//! The sink reports the type of incoming array elements as a wire tag
//! (`"UInt16"`, `"Float32"`, ...). Tags are parsed into the closed
//! [`DataType`] set and then mapped onto the numeric [`ElementType`] that
//! downstream readers use to interpret raw bytes. An unknown tag is always a
//! hard [`DaqError::DtypeUnsupported`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};

/// Element type tags as reported by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// `"Int8"`
    Int8,
    /// `"UInt8"`
    UInt8,
    /// `"Int16"`
    Int16,
    /// `"UInt16"`
    UInt16,
    /// `"Int32"`
    Int32,
    /// `"UInt32"`
    UInt32,
    /// `"Int64"`
    Int64,
    /// `"UInt64"`
    UInt64,
    /// `"Float32"`
    Float32,
    /// `"Float64"`
    Float64,
}

impl DataType {
    /// Every tag the resolver understands.
    pub const ALL: [DataType; 10] = [
        DataType::Int8,
        DataType::UInt8,
        DataType::Int16,
        DataType::UInt16,
        DataType::Int32,
        DataType::UInt32,
        DataType::Int64,
        DataType::UInt64,
        DataType::Float32,
        DataType::Float64,
    ];

    /// Wire tag as reported by the sink.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Int8 => "Int8",
            DataType::UInt8 => "UInt8",
            DataType::Int16 => "Int16",
            DataType::UInt16 => "UInt16",
            DataType::Int32 => "Int32",
            DataType::UInt32 => "UInt32",
            DataType::Int64 => "Int64",
            DataType::UInt64 => "UInt64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        }
    }

    /// Numeric type the tag denotes.
    pub fn element_type(&self) -> ElementType {
        match self {
            DataType::Int8 => ElementType::I8,
            DataType::UInt8 => ElementType::U8,
            DataType::Int16 => ElementType::I16,
            DataType::UInt16 => ElementType::U16,
            DataType::Int32 => ElementType::I32,
            DataType::UInt32 => ElementType::U32,
            DataType::Int64 => ElementType::I64,
            DataType::UInt64 => ElementType::U64,
            DataType::Float32 => ElementType::F32,
            DataType::Float64 => ElementType::F64,
        }
    }
}

impl FromStr for DataType {
    type Err = DaqError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .iter()
            .copied()
            .find(|dt| dt.as_str() == tag)
            .ok_or_else(|| DaqError::DtypeUnsupported(tag.to_string()))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric element type of an array dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// Signed 8-bit integer
    I8,
    /// Unsigned 8-bit integer
    U8,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 16-bit integer
    U16,
    /// Signed 32-bit integer
    I32,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 64-bit integer
    I64,
    /// Unsigned 64-bit integer
    U64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 8,
        }
    }

    /// Array-protocol type string, little endian (`"<u2"`, `"|i1"`, ...).
    pub fn dtype_str(&self) -> &'static str {
        match self {
            ElementType::I8 => "|i1",
            ElementType::U8 => "|u1",
            ElementType::I16 => "<i2",
            ElementType::U16 => "<u2",
            ElementType::I32 => "<i4",
            ElementType::U32 => "<u4",
            ElementType::I64 => "<i8",
            ElementType::U64 => "<u8",
            ElementType::F32 => "<f4",
            ElementType::F64 => "<f8",
        }
    }
}

/// Resolve a sink-reported tag to its element type.
pub fn resolve_element_type(tag: &str) -> AppResult<ElementType> {
    tag.parse::<DataType>().map(|dt| dt.element_type())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_round_trips_through_wire_string() {
        for dt in DataType::ALL {
            assert_eq!(dt.as_str().parse::<DataType>(), Ok(dt));
        }
    }

    #[test]
    fn test_resolve_known_tags() {
        assert_eq!(resolve_element_type("UInt16"), Ok(ElementType::U16));
        assert_eq!(resolve_element_type("Float64"), Ok(ElementType::F64));
        assert_eq!(ElementType::U16.dtype_str(), "<u2");
        assert_eq!(ElementType::I8.dtype_str(), "|i1");
        assert_eq!(ElementType::F32.size_bytes(), 4);
    }

    #[test]
    fn test_unknown_tag_fails_closed() {
        assert_eq!(
            resolve_element_type("Complex64"),
            Err(DaqError::DtypeUnsupported("Complex64".to_string()))
        );
        // Tags are case sensitive on the wire
        assert!(resolve_element_type("uint16").is_err());
        assert!(resolve_element_type("").is_err());
    }
}

use widestring::U16String;

use crate::types::{CType, SqlDate, SqlNumeric, SqlSsTime2, SqlTime, SqlTimestamp};

/// A value that can be written to or read from a column buffer.
///
/// Binary data has no shape here; it goes through
/// [`ColumnBuffer::set_binary_value`](super::ColumnBuffer::set_binary_value) and
/// [`ColumnBuffer::binary_value`](super::ColumnBuffer::binary_value).
#[derive(Debug, Clone, PartialEq)]
pub enum BufferValue {
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Utf8(String),
    Utf16(U16String),
    Double(f64),
    Date(SqlDate),
    Time(SqlTime),
    Time2(SqlSsTime2),
    Timestamp(SqlTimestamp),
    Numeric(SqlNumeric),
}

impl BufferValue {
    /// The native type this value naturally occupies.
    pub fn c_type(&self) -> CType {
        match self {
            Self::SmallInt(_) => CType::SSHORT,
            Self::Int(_) => CType::SLONG,
            Self::BigInt(_) => CType::SBIGINT,
            Self::Utf8(_) => CType::CHAR,
            Self::Utf16(_) => CType::WCHAR,
            Self::Double(_) => CType::DOUBLE,
            Self::Date(_) => CType::TYPE_DATE,
            Self::Time(_) => CType::TYPE_TIME,
            Self::Time2(_) => CType::SS_TIME2,
            Self::Timestamp(_) => CType::TYPE_TIMESTAMP,
            Self::Numeric(_) => CType::NUMERIC,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for BufferValue {
                fn from(v: $ty) -> Self {
                    BufferValue::$variant(v)
                }
            }
        )*
    };
}

impl_from!(
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f64 => Double,
    String => Utf8,
    U16String => Utf16,
    SqlDate => Date,
    SqlTime => Time,
    SqlSsTime2 => Time2,
    SqlTimestamp => Timestamp,
    SqlNumeric => Numeric,
);

impl From<&str> for BufferValue {
    fn from(v: &str) -> Self {
        BufferValue::Utf8(v.to_owned())
    }
}

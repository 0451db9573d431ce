//! SQL and native (C) type identifiers, the fixed-layout structs exchanged with the driver and
//! the [`TypeMap`] deciding which native type backs a SQL column.

#[cfg(feature = "chrono")]
mod chrono;
mod structs;
mod type_map;

use std::fmt::{self, Display, Formatter};

pub(crate) use structs::digit_count;
pub use structs::{SqlDate, SqlNumeric, SqlSsTime2, SqlTime, SqlTimestamp, MAX_NUMERIC_LEN};
pub use type_map::TypeMap;

/// Length/indicator sentinel: the value is NULL.
pub const NULL_DATA: isize = -1;
/// Length/indicator sentinel: the driver cannot determine the length.
pub const NO_TOTAL: isize = -4;
/// Length/indicator sentinel: the character data is null-terminated.
pub const NTS: isize = -3;

/// A SQL data type identifier as reported by the catalog, e.g. `SQL_INTEGER`.
///
/// Drivers may report vendor specific identifiers, so this is an open newtype rather than a
/// closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SqlType(pub i16);

impl SqlType {
    pub const UNKNOWN: SqlType = SqlType(0);
    pub const CHAR: SqlType = SqlType(1);
    pub const NUMERIC: SqlType = SqlType(2);
    pub const DECIMAL: SqlType = SqlType(3);
    pub const INTEGER: SqlType = SqlType(4);
    pub const SMALLINT: SqlType = SqlType(5);
    pub const FLOAT: SqlType = SqlType(6);
    pub const REAL: SqlType = SqlType(7);
    pub const DOUBLE: SqlType = SqlType(8);
    pub const VARCHAR: SqlType = SqlType(12);
    pub const TYPE_DATE: SqlType = SqlType(91);
    pub const TYPE_TIME: SqlType = SqlType(92);
    pub const TYPE_TIMESTAMP: SqlType = SqlType(93);
    pub const LONGVARCHAR: SqlType = SqlType(-1);
    pub const BINARY: SqlType = SqlType(-2);
    pub const VARBINARY: SqlType = SqlType(-3);
    pub const LONGVARBINARY: SqlType = SqlType(-4);
    pub const BIGINT: SqlType = SqlType(-5);
    pub const TINYINT: SqlType = SqlType(-6);
    pub const BIT: SqlType = SqlType(-7);
    pub const WCHAR: SqlType = SqlType(-8);
    pub const WVARCHAR: SqlType = SqlType(-9);
    pub const WLONGVARCHAR: SqlType = SqlType(-10);
    pub const GUID: SqlType = SqlType(-11);
    /// Microsoft SQL Server `time` with fractional seconds.
    pub const SS_TIME2: SqlType = SqlType(-154);

    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::UNKNOWN => "SQL_UNKNOWN_TYPE",
            Self::CHAR => "SQL_CHAR",
            Self::NUMERIC => "SQL_NUMERIC",
            Self::DECIMAL => "SQL_DECIMAL",
            Self::INTEGER => "SQL_INTEGER",
            Self::SMALLINT => "SQL_SMALLINT",
            Self::FLOAT => "SQL_FLOAT",
            Self::REAL => "SQL_REAL",
            Self::DOUBLE => "SQL_DOUBLE",
            Self::VARCHAR => "SQL_VARCHAR",
            Self::TYPE_DATE => "SQL_TYPE_DATE",
            Self::TYPE_TIME => "SQL_TYPE_TIME",
            Self::TYPE_TIMESTAMP => "SQL_TYPE_TIMESTAMP",
            Self::LONGVARCHAR => "SQL_LONGVARCHAR",
            Self::BINARY => "SQL_BINARY",
            Self::VARBINARY => "SQL_VARBINARY",
            Self::LONGVARBINARY => "SQL_LONGVARBINARY",
            Self::BIGINT => "SQL_BIGINT",
            Self::TINYINT => "SQL_TINYINT",
            Self::BIT => "SQL_BIT",
            Self::WCHAR => "SQL_WCHAR",
            Self::WVARCHAR => "SQL_WVARCHAR",
            Self::WLONGVARCHAR => "SQL_WLONGVARCHAR",
            Self::GUID => "SQL_GUID",
            Self::SS_TIME2 => "SQL_SS_TIME2",
            _ => return None,
        })
    }

    pub fn is_character(self) -> bool {
        matches!(self, Self::CHAR | Self::VARCHAR | Self::LONGVARCHAR)
    }

    pub fn is_wide_character(self) -> bool {
        matches!(self, Self::WCHAR | Self::WVARCHAR | Self::WLONGVARCHAR)
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Self::BINARY | Self::VARBINARY | Self::LONGVARBINARY)
    }

    /// Exact and approximate numeric types, i.e. those whose textual form is digits.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::NUMERIC
                | Self::DECIMAL
                | Self::INTEGER
                | Self::SMALLINT
                | Self::BIGINT
                | Self::TINYINT
                | Self::BIT
                | Self::FLOAT
                | Self::REAL
                | Self::DOUBLE
        )
    }

    pub fn is_date_time(self) -> bool {
        matches!(
            self,
            Self::TYPE_DATE | Self::TYPE_TIME | Self::TYPE_TIMESTAMP | Self::SS_TIME2
        )
    }

    /// The SQL type a parameter bound from a buffer of native type `c_type` is declared as,
    /// used when the caller supplies storage without naming the column's SQL type.
    pub fn for_c_type(c_type: CType) -> SqlType {
        match c_type {
            CType::SSHORT => SqlType::SMALLINT,
            CType::SLONG => SqlType::INTEGER,
            CType::SBIGINT => SqlType::BIGINT,
            CType::DOUBLE => SqlType::DOUBLE,
            CType::CHAR => SqlType::VARCHAR,
            CType::WCHAR => SqlType::WVARCHAR,
            CType::TYPE_DATE => SqlType::TYPE_DATE,
            CType::TYPE_TIME => SqlType::TYPE_TIME,
            CType::SS_TIME2 => SqlType::SS_TIME2,
            CType::TYPE_TIMESTAMP => SqlType::TYPE_TIMESTAMP,
            CType::NUMERIC => SqlType::NUMERIC,
            CType::BINARY => SqlType::VARBINARY,
            _ => SqlType::UNKNOWN,
        }
    }
}

impl Display for SqlType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "SQL type {}", self.0),
        }
    }
}

/// A native buffer type identifier, e.g. `SQL_C_SLONG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CType(pub i16);

impl CType {
    pub const CHAR: CType = CType(1);
    pub const NUMERIC: CType = CType(2);
    pub const DOUBLE: CType = CType(8);
    pub const TYPE_DATE: CType = CType(91);
    pub const TYPE_TIME: CType = CType(92);
    pub const TYPE_TIMESTAMP: CType = CType(93);
    pub const BINARY: CType = CType(-2);
    pub const WCHAR: CType = CType(-8);
    pub const SSHORT: CType = CType(-15);
    pub const SLONG: CType = CType(-16);
    pub const SBIGINT: CType = CType(-25);
    /// Microsoft SQL Server `SQL_SS_TIME2_STRUCT`.
    pub const SS_TIME2: CType = CType(0x4000);

    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::CHAR => "SQL_C_CHAR",
            Self::NUMERIC => "SQL_C_NUMERIC",
            Self::DOUBLE => "SQL_C_DOUBLE",
            Self::TYPE_DATE => "SQL_C_TYPE_DATE",
            Self::TYPE_TIME => "SQL_C_TYPE_TIME",
            Self::TYPE_TIMESTAMP => "SQL_C_TYPE_TIMESTAMP",
            Self::BINARY => "SQL_C_BINARY",
            Self::WCHAR => "SQL_C_WCHAR",
            Self::SSHORT => "SQL_C_SSHORT",
            Self::SLONG => "SQL_C_SLONG",
            Self::SBIGINT => "SQL_C_SBIGINT",
            Self::SS_TIME2 => "SQL_C_SS_TIME2",
            _ => return None,
        })
    }

    /// Byte size of the native representation for fixed-size types; `None` for the variable
    /// length character and binary types.
    pub fn fixed_size(self) -> Option<usize> {
        use std::mem::size_of;
        Some(match self {
            Self::SSHORT => size_of::<i16>(),
            Self::SLONG => size_of::<i32>(),
            Self::SBIGINT => size_of::<i64>(),
            Self::DOUBLE => size_of::<f64>(),
            Self::TYPE_DATE => size_of::<SqlDate>(),
            Self::TYPE_TIME => size_of::<SqlTime>(),
            Self::SS_TIME2 => size_of::<SqlSsTime2>(),
            Self::TYPE_TIMESTAMP => size_of::<SqlTimestamp>(),
            Self::NUMERIC => size_of::<SqlNumeric>(),
            _ => return None,
        })
    }

    /// Whether buffers of this type can be allocated by [`BufferStorage`](crate::buffer::BufferStorage).
    pub fn is_supported(self) -> bool {
        self.fixed_size().is_some() || matches!(self, Self::CHAR | Self::WCHAR | Self::BINARY)
    }
}

impl Display for CType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "C type {}", self.0),
        }
    }
}

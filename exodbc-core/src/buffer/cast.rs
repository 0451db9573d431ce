//! Checked conversions between stored native values and caller-requested types.
//!
//! Every conversion matches exhaustively over [`BufferStorage`], so a new storage variant does
//! not compile until each conversion decides what to do with it. A conversion succeeds only if
//! it is lossless for every value the stored native type can hold: a `BigInt` buffer never
//! converts to `i16`, whatever value it currently contains.

use std::mem::size_of;

use widestring::U16String;

use super::storage::{until_nul, BufferStorage};
use super::value::BufferValue;
use crate::error::{CastError, Error, Result};
use crate::types::{
    digit_count, CType, SqlDate, SqlNumeric, SqlSsTime2, SqlTime, SqlTimestamp, NTS,
};

impl BufferStorage {
    fn cast_error(&self, to: CType) -> CastError {
        CastError::new(self.c_type(), to)
    }

    pub fn to_i16(&self) -> Result<i16, CastError> {
        match self {
            Self::SmallInt(v) => Ok(*v),
            Self::Int(_)
            | Self::BigInt(_)
            | Self::Double(_)
            | Self::Char(_)
            | Self::WChar(_)
            | Self::Date(_)
            | Self::Time(_)
            | Self::Time2(_)
            | Self::Timestamp(_)
            | Self::Numeric(_)
            | Self::Binary(_) => Err(self.cast_error(CType::SSHORT)),
        }
    }

    pub fn to_i32(&self) -> Result<i32, CastError> {
        match self {
            Self::SmallInt(v) => Ok(i32::from(*v)),
            Self::Int(v) => Ok(*v),
            Self::BigInt(_)
            | Self::Double(_)
            | Self::Char(_)
            | Self::WChar(_)
            | Self::Date(_)
            | Self::Time(_)
            | Self::Time2(_)
            | Self::Timestamp(_)
            | Self::Numeric(_)
            | Self::Binary(_) => Err(self.cast_error(CType::SLONG)),
        }
    }

    pub fn to_i64(&self) -> Result<i64, CastError> {
        match self {
            Self::SmallInt(v) => Ok(i64::from(*v)),
            Self::Int(v) => Ok(i64::from(*v)),
            Self::BigInt(v) => Ok(*v),
            Self::Double(_)
            | Self::Char(_)
            | Self::WChar(_)
            | Self::Date(_)
            | Self::Time(_)
            | Self::Time2(_)
            | Self::Timestamp(_)
            | Self::Numeric(_)
            | Self::Binary(_) => Err(self.cast_error(CType::SBIGINT)),
        }
    }

    /// `BigInt` is refused: an `f64` cannot hold every `i64` exactly.
    pub fn to_f64(&self) -> Result<f64, CastError> {
        match self {
            Self::SmallInt(v) => Ok(f64::from(*v)),
            Self::Int(v) => Ok(f64::from(*v)),
            Self::Double(v) => Ok(*v),
            Self::BigInt(_)
            | Self::Char(_)
            | Self::WChar(_)
            | Self::Date(_)
            | Self::Time(_)
            | Self::Time2(_)
            | Self::Timestamp(_)
            | Self::Numeric(_)
            | Self::Binary(_) => Err(self.cast_error(CType::DOUBLE)),
        }
    }

    /// Text up to the terminator; non-text values in their canonical SQL literal form.
    pub fn to_utf8(&self) -> Result<String, CastError> {
        match self {
            Self::Char(b) => {
                String::from_utf8(until_nul(b).to_vec()).map_err(|_| self.cast_error(CType::CHAR))
            }
            Self::WChar(w) => {
                String::from_utf16(until_nul(w)).map_err(|_| self.cast_error(CType::CHAR))
            }
            Self::SmallInt(v) => Ok(v.to_string()),
            Self::Int(v) => Ok(v.to_string()),
            Self::BigInt(v) => Ok(v.to_string()),
            Self::Double(v) => Ok(v.to_string()),
            Self::Date(d) => Ok(d.to_string()),
            Self::Time(t) => Ok(t.to_string()),
            Self::Time2(t) => Ok(t.to_string()),
            Self::Timestamp(ts) => Ok(ts.to_string()),
            Self::Numeric(n) => Ok(n.to_string()),
            Self::Binary(_) => Err(self.cast_error(CType::CHAR)),
        }
    }

    pub fn to_utf16(&self) -> Result<U16String, CastError> {
        match self {
            Self::WChar(w) => Ok(U16String::from_vec(until_nul(w).to_vec())),
            Self::Char(_)
            | Self::SmallInt(_)
            | Self::Int(_)
            | Self::BigInt(_)
            | Self::Double(_)
            | Self::Date(_)
            | Self::Time(_)
            | Self::Time2(_)
            | Self::Timestamp(_)
            | Self::Numeric(_) => self
                .to_utf8()
                .map(|s| U16String::from_str(&s))
                .map_err(|_| self.cast_error(CType::WCHAR)),
            Self::Binary(_) => Err(self.cast_error(CType::WCHAR)),
        }
    }

    /// A timestamp converts only if it carries no time of day.
    pub fn to_date(&self) -> Result<SqlDate, CastError> {
        match self {
            Self::Date(d) => Ok(*d),
            Self::Timestamp(ts) if ts.is_midnight() => Ok(ts.date()),
            Self::Timestamp(_)
            | Self::SmallInt(_)
            | Self::Int(_)
            | Self::BigInt(_)
            | Self::Double(_)
            | Self::Char(_)
            | Self::WChar(_)
            | Self::Time(_)
            | Self::Time2(_)
            | Self::Numeric(_)
            | Self::Binary(_) => Err(self.cast_error(CType::TYPE_DATE)),
        }
    }

    /// A time with fractional seconds converts only if the fraction is zero.
    pub fn to_time(&self) -> Result<SqlTime, CastError> {
        match self {
            Self::Time(t) => Ok(*t),
            Self::Time2(t) => t.to_time().ok_or_else(|| self.cast_error(CType::TYPE_TIME)),
            Self::SmallInt(_)
            | Self::Int(_)
            | Self::BigInt(_)
            | Self::Double(_)
            | Self::Char(_)
            | Self::WChar(_)
            | Self::Date(_)
            | Self::Timestamp(_)
            | Self::Numeric(_)
            | Self::Binary(_) => Err(self.cast_error(CType::TYPE_TIME)),
        }
    }

    pub fn to_time2(&self) -> Result<SqlSsTime2, CastError> {
        match self {
            Self::Time2(t) => Ok(*t),
            Self::Time(t) => Ok(SqlSsTime2::from(*t)),
            Self::SmallInt(_)
            | Self::Int(_)
            | Self::BigInt(_)
            | Self::Double(_)
            | Self::Char(_)
            | Self::WChar(_)
            | Self::Date(_)
            | Self::Timestamp(_)
            | Self::Numeric(_)
            | Self::Binary(_) => Err(self.cast_error(CType::SS_TIME2)),
        }
    }

    pub fn to_timestamp(&self) -> Result<SqlTimestamp, CastError> {
        match self {
            Self::Timestamp(ts) => Ok(*ts),
            Self::Date(d) => Ok(SqlTimestamp::from(*d)),
            Self::SmallInt(_)
            | Self::Int(_)
            | Self::BigInt(_)
            | Self::Double(_)
            | Self::Char(_)
            | Self::WChar(_)
            | Self::Time(_)
            | Self::Time2(_)
            | Self::Numeric(_)
            | Self::Binary(_) => Err(self.cast_error(CType::TYPE_TIMESTAMP)),
        }
    }

    /// Integers convert with scale 0 and the precision of their widest value.
    pub fn to_numeric(&self) -> Result<SqlNumeric, CastError> {
        let integer = |v: i64, max: i64| {
            SqlNumeric::new(i128::from(v), digit_count(max.unsigned_abs().into()) as u8, 0)
        };
        match self {
            Self::Numeric(n) => Ok(*n),
            Self::SmallInt(v) => Ok(integer(i64::from(*v), i64::from(i16::MAX))),
            Self::Int(v) => Ok(integer(i64::from(*v), i64::from(i32::MAX))),
            Self::BigInt(v) => Ok(integer(*v, i64::MAX)),
            Self::Double(_)
            | Self::Char(_)
            | Self::WChar(_)
            | Self::Date(_)
            | Self::Time(_)
            | Self::Time2(_)
            | Self::Timestamp(_)
            | Self::Binary(_) => Err(self.cast_error(CType::NUMERIC)),
        }
    }

    /// Reads the stored value in its natural shape.
    pub fn load(&self) -> Result<BufferValue> {
        Ok(match self {
            Self::SmallInt(v) => BufferValue::SmallInt(*v),
            Self::Int(v) => BufferValue::Int(*v),
            Self::BigInt(v) => BufferValue::BigInt(*v),
            Self::Double(v) => BufferValue::Double(*v),
            Self::Char(_) => BufferValue::Utf8(self.to_utf8()?),
            Self::WChar(_) => BufferValue::Utf16(self.to_utf16()?),
            Self::Date(d) => BufferValue::Date(*d),
            Self::Time(t) => BufferValue::Time(*t),
            Self::Time2(t) => BufferValue::Time2(*t),
            Self::Timestamp(ts) => BufferValue::Timestamp(*ts),
            Self::Numeric(n) => BufferValue::Numeric(*n),
            Self::Binary(_) => {
                return Err(Error::NotSupported(
                    "binary buffers are read with binary_value()".into(),
                ))
            }
        })
    }

    /// Writes `value` and returns the length/indicator the driver must see for it.
    ///
    /// Text is written zero-filled and terminated and yields [`NTS`]; it must leave room for
    /// the terminator. Integers may be stored into a wider integer buffer. Everything else
    /// needs an exact shape match.
    pub fn store(&mut self, value: &BufferValue) -> Result<isize> {
        let (from, to) = (value.c_type(), self.c_type());
        let mismatch = move || CastError::new(from, to);
        match (self, value) {
            (Self::Char(dst), BufferValue::Utf8(s)) => copy_terminated(dst, s.as_bytes()),
            (Self::Char(dst), BufferValue::Utf16(s)) => {
                let narrow = String::from_utf16(s.as_slice()).map_err(|_| mismatch())?;
                copy_terminated(dst, narrow.as_bytes())
            }
            (Self::WChar(dst), BufferValue::Utf16(s)) => copy_terminated(dst, s.as_slice()),
            (Self::WChar(dst), BufferValue::Utf8(s)) => {
                let wide: Vec<u16> = s.encode_utf16().collect();
                copy_terminated(dst, &wide)
            }
            (Self::SmallInt(dst), BufferValue::SmallInt(v)) => fixed(dst, *v),
            (Self::Int(dst), BufferValue::SmallInt(v)) => fixed(dst, i32::from(*v)),
            (Self::Int(dst), BufferValue::Int(v)) => fixed(dst, *v),
            (Self::BigInt(dst), BufferValue::SmallInt(v)) => fixed(dst, i64::from(*v)),
            (Self::BigInt(dst), BufferValue::Int(v)) => fixed(dst, i64::from(*v)),
            (Self::BigInt(dst), BufferValue::BigInt(v)) => fixed(dst, *v),
            (Self::Double(dst), BufferValue::Double(v)) => fixed(dst, *v),
            (Self::Date(dst), BufferValue::Date(v)) => fixed(dst, *v),
            (Self::Time(dst), BufferValue::Time(v)) => fixed(dst, *v),
            (Self::Time2(dst), BufferValue::Time2(v)) => fixed(dst, *v),
            (Self::Timestamp(dst), BufferValue::Timestamp(v)) => fixed(dst, *v),
            (Self::Numeric(dst), BufferValue::Numeric(v)) => fixed(dst, *v),
            _ => Err(mismatch().into()),
        }
    }
}

fn fixed<T>(dst: &mut T, v: T) -> Result<isize> {
    *dst = v;
    Ok(size_of::<T>() as isize)
}

fn copy_terminated<T: Copy + Default>(dst: &mut [T], src: &[T]) -> Result<isize> {
    dst.fill(T::default());
    if src.len() >= dst.len() {
        return Err(Error::precondition(format!(
            "value of {} characters does not fit a buffer of {} characters including the terminator",
            src.len(),
            dst.len()
        )));
    }
    dst[..src.len()].copy_from_slice(src);
    Ok(NTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlTimestamp;

    fn storage(c_type: CType, len: usize) -> BufferStorage {
        BufferStorage::allocate(c_type, len, "c").unwrap()
    }

    #[test]
    fn narrowing_depends_on_the_stored_type_not_the_value() {
        let s = BufferStorage::BigInt(5);
        assert_eq!(
            s.to_i16().unwrap_err(),
            CastError::new(CType::SBIGINT, CType::SSHORT)
        );
        assert!(s.to_i32().is_err());
        assert_eq!(s.to_i64().unwrap(), 5);
        assert!(s.to_f64().is_err());

        let s = BufferStorage::SmallInt(-7);
        assert_eq!(s.to_i16().unwrap(), -7);
        assert_eq!(s.to_i32().unwrap(), -7);
        assert_eq!(s.to_i64().unwrap(), -7);
        assert_eq!(s.to_f64().unwrap(), -7.0);
    }

    #[test]
    fn values_render_as_text() {
        assert_eq!(BufferStorage::Int(-42).to_utf8().unwrap(), "-42");
        assert_eq!(
            BufferStorage::Date(SqlDate::new(1983, 1, 26)).to_utf8().unwrap(),
            "1983-01-26"
        );
        assert_eq!(
            BufferStorage::Numeric(SqlNumeric::new(-12345, 7, 2))
                .to_utf16()
                .unwrap()
                .to_string_lossy(),
            "-123.45"
        );
        assert!(BufferStorage::Binary(vec![1, 2].into()).to_utf8().is_err());
    }

    #[test]
    fn dates_and_times_convert_only_without_loss() {
        let midnight = SqlTimestamp::from_date(SqlDate::new(2020, 2, 29));
        assert_eq!(
            BufferStorage::Timestamp(midnight).to_date().unwrap(),
            SqlDate::new(2020, 2, 29)
        );
        let mut noon = midnight;
        noon.hour = 12;
        assert!(BufferStorage::Timestamp(noon).to_date().is_err());

        let t2 = SqlSsTime2::new(13, 55, 56, 0);
        assert_eq!(
            BufferStorage::Time2(t2).to_time().unwrap(),
            SqlTime::new(13, 55, 56)
        );
        let t2 = SqlSsTime2::new(13, 55, 56, 100);
        assert!(BufferStorage::Time2(t2).to_time().is_err());
        assert_eq!(
            BufferStorage::Time(SqlTime::new(1, 2, 3)).to_time2().unwrap(),
            SqlSsTime2::new(1, 2, 3, 0)
        );
        assert_eq!(
            BufferStorage::Date(SqlDate::new(2001, 9, 11))
                .to_timestamp()
                .unwrap(),
            SqlTimestamp::from_date(SqlDate::new(2001, 9, 11))
        );
    }

    #[test]
    fn integers_convert_to_numeric_with_scale_zero() {
        let n = BufferStorage::Int(-1234).to_numeric().unwrap();
        assert_eq!((n.precision, n.scale), (10, 0));
        assert_eq!(n.unscaled(), Some(-1234));
        assert!(BufferStorage::Double(1.5).to_numeric().is_err());
    }

    #[test]
    fn strings_must_leave_room_for_the_terminator() {
        let mut s = storage(CType::CHAR, 4);
        assert_eq!(s.store(&"abc".into()).unwrap(), NTS);
        assert_eq!(s.to_utf8().unwrap(), "abc");

        assert!(s.store(&"abcd".into()).unwrap_err().is_precondition());
        assert_eq!(s.to_utf8().unwrap(), "", "failed writes leave a zeroed buffer");

        s.store(&"x".into()).unwrap();
        assert_eq!(s.to_utf8().unwrap(), "x");
    }

    #[test]
    fn text_crosses_between_narrow_and_wide() {
        let mut w = storage(CType::WCHAR, 16);
        w.store(&"grüezi".into()).unwrap();
        assert_eq!(w.to_utf8().unwrap(), "grüezi");

        let mut c = storage(CType::CHAR, 16);
        c.store(&BufferValue::Utf16(U16String::from_str("hello"))).unwrap();
        assert_eq!(c.load().unwrap(), BufferValue::Utf8("hello".to_owned()));
    }

    #[test]
    fn scalars_store_exactly_or_widen() {
        let mut s = storage(CType::SBIGINT, 0);
        assert_eq!(s.store(&BufferValue::SmallInt(3)).unwrap(), 8);
        assert_eq!(s.load().unwrap(), BufferValue::BigInt(3));

        let mut s = storage(CType::SSHORT, 0);
        let err = s.store(&BufferValue::BigInt(3)).unwrap_err();
        assert!(matches!(
            err,
            Error::Cast(CastError { from: CType::SBIGINT, to: CType::SSHORT })
        ));
        assert!(s.store(&BufferValue::Double(1.0)).is_err());
    }

    #[test]
    fn binary_has_no_value_shape() {
        let s = storage(CType::BINARY, 4);
        assert!(matches!(s.load(), Err(Error::NotSupported(_))));
    }
}

use std::cmp::Ordering;
use std::ffi::c_void;
use std::fmt::{self, Display, Formatter};
use std::mem::size_of;
use std::ptr;

use crate::error::DriverError;
use crate::types::{
    CType, SqlDate, SqlNumeric, SqlSsTime2, SqlTime, SqlTimestamp, SqlType, NULL_DATA,
};

/// A value stored in an in-memory table.
#[derive(Debug, Clone, PartialEq)]
pub enum MemValue {
    Null,
    Int(i64),
    Double(f64),
    /// Exact decimal: `unscaled / 10^scale`.
    Decimal { unscaled: i128, scale: u8 },
    Text(String),
    Date(SqlDate),
    Time(SqlSsTime2),
    Timestamp(SqlTimestamp),
    Binary(Vec<u8>),
}

type DriverResult<T> = std::result::Result<T, DriverError>;

pub(crate) fn state(operation: &'static str, sqlstate: &str, message: impl Into<String>) -> DriverError {
    DriverError::single(operation, sqlstate, 0, message)
}

impl MemValue {
    pub fn is_null(&self) -> bool {
        matches!(self, MemValue::Null)
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            MemValue::Int(v) => Some(*v as f64),
            MemValue::Double(v) => Some(*v),
            MemValue::Decimal { unscaled, scale } => {
                Some(*unscaled as f64 / 10f64.powi(i32::from(*scale)))
            }
            _ => None,
        }
    }

    fn as_decimal(&self) -> Option<(i128, u8)> {
        match self {
            MemValue::Int(v) => Some((i128::from(*v), 0)),
            MemValue::Decimal { unscaled, scale } => Some((*unscaled, *scale)),
            _ => None,
        }
    }

    /// SQL comparison; `None` if either side is NULL or the values are not comparable.
    pub fn compare(&self, other: &MemValue) -> Option<Ordering> {
        use MemValue::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Binary(a), Binary(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Timestamp(a), Date(b)) => Some(a.cmp(&SqlTimestamp::from(*b))),
            (Date(a), Timestamp(b)) => Some(SqlTimestamp::from(*a).cmp(b)),
            (Text(_), _) | (_, Text(_)) => {
                let (a, b) = (self.to_string(), other.to_string());
                Some(a.cmp(&b))
            }
            _ => {
                if let (Some((a, sa)), Some((b, sb))) = (self.as_decimal(), other.as_decimal()) {
                    let scale = sa.max(sb);
                    let a = a.checked_mul(10i128.checked_pow(u32::from(scale - sa))?)?;
                    let b = b.checked_mul(10i128.checked_pow(u32::from(scale - sb))?)?;
                    return Some(a.cmp(&b));
                }
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
        }
    }

    /// Orders NULLs first, then by [`compare`](Self::compare).
    pub fn sort_cmp(&self, other: &MemValue) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Converts the value to what a column of `sql_type` stores.
    pub fn coerce(
        self,
        sql_type: SqlType,
        scale: Option<i16>,
        column: &str,
    ) -> DriverResult<MemValue> {
        let invalid = |value: &MemValue| {
            state(
                "SQLExecute",
                "22018",
                format!("invalid value {} for column {} of type {}", value, column, sql_type),
            )
        };
        let out_of_range = |value: &MemValue| {
            state(
                "SQLExecute",
                "22003",
                format!("value {} out of range for column {}", value, column),
            )
        };

        if self.is_null() {
            return Ok(MemValue::Null);
        }
        let coerced = match sql_type {
            SqlType::BIT
            | SqlType::TINYINT
            | SqlType::SMALLINT
            | SqlType::INTEGER
            | SqlType::BIGINT => {
                let (min, max) = match sql_type {
                    SqlType::BIT => (0, 1),
                    SqlType::TINYINT => (0, i64::from(u8::MAX)),
                    SqlType::SMALLINT => (i64::from(i16::MIN), i64::from(i16::MAX)),
                    SqlType::INTEGER => (i64::from(i32::MIN), i64::from(i32::MAX)),
                    _ => (i64::MIN, i64::MAX),
                };
                let v = match &self {
                    MemValue::Int(v) => *v,
                    MemValue::Decimal { unscaled, scale } => {
                        let divisor = 10i128.pow(u32::from(*scale));
                        if unscaled % divisor != 0 {
                            return Err(invalid(&self));
                        }
                        i64::try_from(unscaled / divisor).map_err(|_| out_of_range(&self))?
                    }
                    MemValue::Double(d) if d.fract() == 0.0 => *d as i64,
                    MemValue::Text(s) => s.trim().parse().map_err(|_| invalid(&self))?,
                    _ => return Err(invalid(&self)),
                };
                if v < min || v > max {
                    return Err(out_of_range(&self));
                }
                MemValue::Int(v)
            }
            SqlType::REAL | SqlType::FLOAT | SqlType::DOUBLE => match &self {
                MemValue::Text(s) => MemValue::Double(s.trim().parse().map_err(|_| invalid(&self))?),
                other => MemValue::Double(other.as_f64().ok_or_else(|| invalid(&self))?),
            },
            SqlType::NUMERIC | SqlType::DECIMAL => {
                let target = u8::try_from(scale.unwrap_or(0).max(0)).unwrap_or(0);
                let (unscaled, current) = match &self {
                    MemValue::Text(s) => parse_decimal(s).ok_or_else(|| invalid(&self))?,
                    MemValue::Double(d) => parse_decimal(&d.to_string()).ok_or_else(|| invalid(&self))?,
                    other => other.as_decimal().ok_or_else(|| invalid(&self))?,
                };
                let unscaled = rescale(unscaled, current, target).ok_or_else(|| out_of_range(&self))?;
                MemValue::Decimal {
                    unscaled,
                    scale: target,
                }
            }
            t if t.is_character() || t.is_wide_character() || t == SqlType::GUID => match self {
                MemValue::Text(s) => MemValue::Text(s),
                MemValue::Binary(b) => {
                    MemValue::Text(String::from_utf8(b).map_err(|e| {
                        invalid(&MemValue::Binary(e.into_bytes()))
                    })?)
                }
                other => MemValue::Text(other.to_string()),
            },
            t if t.is_binary() => match self {
                MemValue::Binary(b) => MemValue::Binary(b),
                MemValue::Text(s) => MemValue::Binary(s.into_bytes()),
                other => return Err(invalid(&other)),
            },
            SqlType::TYPE_DATE => match self {
                MemValue::Date(d) => MemValue::Date(d),
                MemValue::Timestamp(ts) => MemValue::Date(ts.date()),
                MemValue::Text(ref s) => {
                    MemValue::Date(parse_date(s).ok_or_else(|| invalid(&self))?)
                }
                other => return Err(invalid(&other)),
            },
            SqlType::TYPE_TIME | SqlType::SS_TIME2 => match self {
                MemValue::Time(t) => MemValue::Time(t),
                MemValue::Text(ref s) => {
                    MemValue::Time(parse_time(s).ok_or_else(|| invalid(&self))?)
                }
                other => return Err(invalid(&other)),
            },
            SqlType::TYPE_TIMESTAMP => match self {
                MemValue::Timestamp(ts) => MemValue::Timestamp(ts),
                MemValue::Date(d) => MemValue::Timestamp(SqlTimestamp::from(d)),
                MemValue::Text(ref s) => {
                    MemValue::Timestamp(parse_timestamp(s).ok_or_else(|| invalid(&self))?)
                }
                other => return Err(invalid(&other)),
            },
            _ => self,
        };
        Ok(coerced)
    }
}

impl Display for MemValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MemValue::Null => f.write_str("NULL"),
            MemValue::Int(v) => write!(f, "{}", v),
            MemValue::Double(v) => write!(f, "{}", v),
            MemValue::Decimal { unscaled, scale } => {
                let precision = crate::types::digit_count(unscaled.unsigned_abs()).max(u32::from(*scale) + 1);
                write!(f, "{}", SqlNumeric::new(*unscaled, precision as u8, *scale as i8))
            }
            MemValue::Text(s) => f.write_str(s),
            MemValue::Date(d) => write!(f, "{}", d),
            MemValue::Time(t) => write!(f, "{}", t),
            MemValue::Timestamp(ts) => write!(f, "{}", ts),
            MemValue::Binary(b) => {
                f.write_str("0x")?;
                b.iter().try_for_each(|byte| write!(f, "{:02X}", byte))
            }
        }
    }
}

fn rescale(unscaled: i128, from: u8, to: u8) -> Option<i128> {
    if to >= from {
        unscaled.checked_mul(10i128.checked_pow(u32::from(to - from))?)
    } else {
        let divisor = 10i128.checked_pow(u32::from(from - to))?;
        let (q, r) = (unscaled / divisor, unscaled % divisor);
        // round half away from zero
        Some(if r.abs() * 2 >= divisor { q + r.signum() } else { q })
    }
}

/// Parses `-123.45` into `(-12345, 2)`.
pub(crate) fn parse_decimal(s: &str) -> Option<(i128, u8)> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let scale = u8::try_from(frac_part.len()).ok()?;
    let unscaled: i128 = format!("{}{}", int_part, frac_part).parse().ok()?;
    Some((if negative { -unscaled } else { unscaled }, scale))
}

fn parse_date(s: &str) -> Option<SqlDate> {
    let mut parts = s.trim().splitn(3, '-');
    let year = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let day = parts.next()?.parse().ok()?;
    Some(SqlDate::new(year, month, day))
}

fn parse_time(s: &str) -> Option<SqlSsTime2> {
    let (hms, fraction) = s.trim().split_once('.').unwrap_or((s.trim(), ""));
    let mut parts = hms.splitn(3, ':');
    let hour = parts.next()?.parse().ok()?;
    let minute = parts.next()?.parse().ok()?;
    let second = parts.next()?.parse().ok()?;
    let fraction = if fraction.is_empty() {
        0
    } else if fraction.len() <= 9 && fraction.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0<9}", fraction).parse().ok()?
    } else {
        return None;
    };
    Some(SqlSsTime2::new(hour, minute, second, fraction))
}

fn parse_timestamp(s: &str) -> Option<SqlTimestamp> {
    let s = s.trim();
    let (date, time) = s.split_once(' ').unwrap_or((s, "00:00:00"));
    let date = parse_date(date)?;
    let time = parse_time(time)?;
    Some(SqlTimestamp {
        year: date.year,
        month: date.month,
        day: date.day,
        hour: time.hour,
        minute: time.minute,
        second: time.second,
        fraction: time.fraction,
    })
}

/// A bound application buffer as seen by the in-memory driver.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawBuffer {
    pub c_type: CType,
    pub data: *mut c_void,
    pub buffer_len: isize,
    pub indicator: *mut isize,
    pub octet_length: *mut isize,
    pub precision: i16,
    pub scale: i16,
}

impl RawBuffer {
    pub fn new(c_type: CType) -> Self {
        Self {
            c_type,
            data: ptr::null_mut(),
            buffer_len: 0,
            indicator: ptr::null_mut(),
            octet_length: ptr::null_mut(),
            precision: 0,
            scale: 0,
        }
    }

    fn length(&self) -> Option<isize> {
        let ptr = if self.octet_length.is_null() {
            self.indicator
        } else {
            self.octet_length
        };
        // SAFETY: bound pointers are valid per the binding contract.
        (!ptr.is_null()).then(|| unsafe { *ptr })
    }

    /// Reads the parameter value the buffer currently holds.
    ///
    /// # Safety
    /// `data`, `indicator` and `octet_length` must be null or valid for the bound type and
    /// `buffer_len`.
    pub unsafe fn read(&self) -> DriverResult<MemValue> {
        if !self.indicator.is_null() && *self.indicator == NULL_DATA {
            return Ok(MemValue::Null);
        }
        if self.data.is_null() {
            return Err(state("SQLExecute", "07002", "parameter has no data pointer"));
        }
        let data = self.data;
        Ok(match self.c_type {
            CType::SSHORT => MemValue::Int(i64::from(*(data as *const i16))),
            CType::SLONG => MemValue::Int(i64::from(*(data as *const i32))),
            CType::SBIGINT => MemValue::Int(*(data as *const i64)),
            CType::DOUBLE => MemValue::Double(*(data as *const f64)),
            CType::TYPE_DATE => MemValue::Date(*(data as *const SqlDate)),
            CType::TYPE_TIME => MemValue::Time(SqlSsTime2::from(*(data as *const SqlTime))),
            CType::SS_TIME2 => MemValue::Time(*(data as *const SqlSsTime2)),
            CType::TYPE_TIMESTAMP => MemValue::Timestamp(*(data as *const SqlTimestamp)),
            CType::NUMERIC => {
                let n = *(data as *const SqlNumeric);
                let unscaled = n.unscaled().ok_or_else(|| {
                    state("SQLExecute", "22003", "numeric magnitude out of range")
                })?;
                let (unscaled, scale) = if n.scale < 0 {
                    let factor = 10i128.pow(u32::from(n.scale.unsigned_abs()));
                    (unscaled * factor, 0)
                } else {
                    (unscaled, n.scale as u8)
                };
                MemValue::Decimal { unscaled, scale }
            }
            CType::CHAR | CType::BINARY => {
                let capacity = self.buffer_len.max(0) as usize;
                let bytes = std::slice::from_raw_parts(data as *const u8, capacity);
                let bytes = match self.length() {
                    Some(len) if len >= 0 => &bytes[..(len as usize).min(capacity)],
                    _ if self.c_type == CType::BINARY => bytes,
                    _ => {
                        let end = bytes.iter().position(|b| *b == 0).unwrap_or(capacity);
                        &bytes[..end]
                    }
                };
                if self.c_type == CType::BINARY {
                    MemValue::Binary(bytes.to_vec())
                } else {
                    MemValue::Text(String::from_utf8(bytes.to_vec()).map_err(|_| {
                        state("SQLExecute", "22018", "character parameter is not UTF-8")
                    })?)
                }
            }
            CType::WCHAR => {
                let capacity = self.buffer_len.max(0) as usize / size_of::<u16>();
                let units = std::slice::from_raw_parts(data as *const u16, capacity);
                let units = match self.length() {
                    Some(len) if len >= 0 => {
                        &units[..(len as usize / size_of::<u16>()).min(capacity)]
                    }
                    _ => {
                        let end = units.iter().position(|u| *u == 0).unwrap_or(capacity);
                        &units[..end]
                    }
                };
                MemValue::Text(String::from_utf16(units).map_err(|_| {
                    state("SQLExecute", "22018", "wide character parameter is not UTF-16")
                })?)
            }
            other => {
                return Err(state(
                    "SQLExecute",
                    "HY003",
                    format!("program type {} out of range", other),
                ))
            }
        })
    }

    /// Writes `value` into the buffer, the way `SQLFetch` fills a bound column.
    ///
    /// # Safety
    /// Same contract as [`read`](Self::read).
    pub unsafe fn write(&self, value: &MemValue) -> DriverResult<()> {
        if value.is_null() {
            if self.indicator.is_null() {
                return Err(state(
                    "SQLFetch",
                    "22002",
                    "indicator variable required but not supplied",
                ));
            }
            *self.indicator = NULL_DATA;
            return Ok(());
        }
        if self.data.is_null() {
            return Ok(());
        }
        let mismatch = || {
            state(
                "SQLFetch",
                "07006",
                format!("restricted data type attribute violation: {} as {}", value, self.c_type),
            )
        };
        let out_of_range = || {
            state(
                "SQLFetch",
                "22003",
                format!("numeric value {} out of range for {}", value, self.c_type),
            )
        };
        let integer = || -> DriverResult<i64> {
            match value {
                MemValue::Int(v) => Ok(*v),
                MemValue::Decimal { unscaled, scale } => {
                    let divisor = 10i128.pow(u32::from(*scale));
                    i64::try_from(unscaled / divisor).map_err(|_| out_of_range())
                }
                MemValue::Double(d) => Ok(*d as i64),
                _ => Err(mismatch()),
            }
        };
        let data = self.data;
        let length = match self.c_type {
            CType::SSHORT => {
                *(data as *mut i16) = i16::try_from(integer()?).map_err(|_| out_of_range())?;
                size_of::<i16>() as isize
            }
            CType::SLONG => {
                *(data as *mut i32) = i32::try_from(integer()?).map_err(|_| out_of_range())?;
                size_of::<i32>() as isize
            }
            CType::SBIGINT => {
                *(data as *mut i64) = integer()?;
                size_of::<i64>() as isize
            }
            CType::DOUBLE => {
                *(data as *mut f64) = value.as_f64().ok_or_else(mismatch)?;
                size_of::<f64>() as isize
            }
            CType::TYPE_DATE => {
                *(data as *mut SqlDate) = match value {
                    MemValue::Date(d) => *d,
                    MemValue::Timestamp(ts) => ts.date(),
                    _ => return Err(mismatch()),
                };
                size_of::<SqlDate>() as isize
            }
            CType::TYPE_TIME => {
                *(data as *mut SqlTime) = match value {
                    MemValue::Time(t) => SqlTime::new(t.hour, t.minute, t.second),
                    MemValue::Timestamp(ts) => SqlTime::new(ts.hour, ts.minute, ts.second),
                    _ => return Err(mismatch()),
                };
                size_of::<SqlTime>() as isize
            }
            CType::SS_TIME2 => {
                *(data as *mut SqlSsTime2) = match value {
                    MemValue::Time(t) => *t,
                    MemValue::Timestamp(ts) => ts.time(),
                    _ => return Err(mismatch()),
                };
                size_of::<SqlSsTime2>() as isize
            }
            CType::TYPE_TIMESTAMP => {
                *(data as *mut SqlTimestamp) = match value {
                    MemValue::Timestamp(ts) => *ts,
                    MemValue::Date(d) => SqlTimestamp::from(*d),
                    _ => return Err(mismatch()),
                };
                size_of::<SqlTimestamp>() as isize
            }
            CType::NUMERIC => {
                let (unscaled, scale) = value.as_decimal().ok_or_else(mismatch)?;
                let target = u8::try_from(self.scale.max(0)).unwrap_or(0);
                let unscaled = rescale(unscaled, scale, target).ok_or_else(out_of_range)?;
                let precision = if self.precision > 0 {
                    self.precision as u8
                } else {
                    38
                };
                if crate::types::digit_count(unscaled.unsigned_abs()) > u32::from(precision) {
                    return Err(out_of_range());
                }
                *(data as *mut SqlNumeric) = SqlNumeric::new(unscaled, precision, target as i8);
                size_of::<SqlNumeric>() as isize
            }
            CType::CHAR => {
                let text = value.to_string();
                copy_truncated(data as *mut u8, self.buffer_len as usize, text.as_bytes(), true);
                text.len() as isize
            }
            CType::BINARY => {
                let bytes = match value {
                    MemValue::Binary(b) => b.clone(),
                    MemValue::Text(s) => s.clone().into_bytes(),
                    _ => return Err(mismatch()),
                };
                copy_truncated(data as *mut u8, self.buffer_len as usize, &bytes, false);
                bytes.len() as isize
            }
            CType::WCHAR => {
                let units: Vec<u16> = value.to_string().encode_utf16().collect();
                copy_truncated(
                    data as *mut u16,
                    self.buffer_len as usize / size_of::<u16>(),
                    &units,
                    true,
                );
                (units.len() * size_of::<u16>()) as isize
            }
            _ => return Err(mismatch()),
        };
        for ptr in [self.indicator, self.octet_length] {
            if !ptr.is_null() {
                *ptr = length;
            }
        }
        Ok(())
    }
}

/// Copies as much of `src` as fits, terminating text. Drivers report the full length in the
/// indicator so callers can detect truncation.
unsafe fn copy_truncated<T: Copy + Default>(dst: *mut T, capacity: usize, src: &[T], terminate: bool) {
    if capacity == 0 {
        return;
    }
    let room = if terminate { capacity - 1 } else { capacity };
    let n = src.len().min(room);
    ptr::copy_nonoverlapping(src.as_ptr(), dst, n);
    if terminate {
        *dst.add(n) = T::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals_compare_across_scales() {
        let a = MemValue::Decimal {
            unscaled: 1050,
            scale: 2,
        };
        let b = MemValue::Decimal {
            unscaled: 105,
            scale: 1,
        };
        assert_eq!(a.compare(&b), Some(Ordering::Equal));
        assert_eq!(MemValue::Int(11).compare(&b), Some(Ordering::Greater));
        assert_eq!(MemValue::Null.compare(&b), None);
        assert_eq!(MemValue::Null.sort_cmp(&b), Ordering::Less);
    }

    #[test]
    fn coercion_checks_ranges_and_scales() {
        assert_eq!(
            MemValue::Text(" 42 ".into())
                .coerce(SqlType::SMALLINT, None, "a")
                .unwrap(),
            MemValue::Int(42)
        );
        let err = MemValue::Int(70_000)
            .coerce(SqlType::SMALLINT, None, "a")
            .unwrap_err();
        assert_eq!(err.sqlstate(), Some("22003"));

        assert_eq!(
            MemValue::Text("-3.14159".into())
                .coerce(SqlType::NUMERIC, Some(2), "n")
                .unwrap(),
            MemValue::Decimal {
                unscaled: -314,
                scale: 2
            }
        );
        assert_eq!(
            MemValue::Text("1983-01-26 13:55:56.1".into())
                .coerce(SqlType::TYPE_TIMESTAMP, None, "t")
                .unwrap()
                .to_string(),
            "1983-01-26 13:55:56.1"
        );
    }

    #[test]
    fn text_writes_truncate_and_report_the_full_length() {
        let mut buf = [0xffu8; 4];
        let mut ind: isize = 0;
        let raw = RawBuffer {
            data: buf.as_mut_ptr() as *mut c_void,
            buffer_len: 4,
            indicator: &mut ind,
            ..RawBuffer::new(CType::CHAR)
        };
        unsafe { raw.write(&MemValue::Text("hello".into())).unwrap() };
        assert_eq!(&buf, b"hel\0");
        assert_eq!(ind, 5);

        ind = crate::types::NTS;
        let value = unsafe { raw.read().unwrap() };
        assert_eq!(value, MemValue::Text("hel".into()));
    }
}

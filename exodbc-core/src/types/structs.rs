use std::fmt::{self, Display, Formatter};

/// Number of magnitude bytes in [`SqlNumeric`].
pub const MAX_NUMERIC_LEN: usize = 16;

/// `SQL_DATE_STRUCT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(C)]
pub struct SqlDate {
    pub year: i16,
    pub month: u16,
    pub day: u16,
}

/// `SQL_TIME_STRUCT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(C)]
pub struct SqlTime {
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
}

/// `SQL_SS_TIME2_STRUCT`, a time of day with fractional seconds in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(C)]
pub struct SqlSsTime2 {
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub fraction: u32,
}

/// `SQL_TIMESTAMP_STRUCT`; `fraction` is in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(C)]
pub struct SqlTimestamp {
    pub year: i16,
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub fraction: u32,
}

/// `SQL_NUMERIC_STRUCT`: an unsigned magnitude stored as little-endian bytes, a sign
/// (`1` positive, `0` negative), and the precision/scale the magnitude is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct SqlNumeric {
    pub precision: u8,
    pub scale: i8,
    pub sign: u8,
    pub val: [u8; MAX_NUMERIC_LEN],
}

impl SqlDate {
    pub const fn new(year: i16, month: u16, day: u16) -> Self {
        Self { year, month, day }
    }
}

impl SqlTime {
    pub const fn new(hour: u16, minute: u16, second: u16) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }
}

impl SqlSsTime2 {
    pub const fn new(hour: u16, minute: u16, second: u16, fraction: u32) -> Self {
        Self {
            hour,
            minute,
            second,
            fraction,
        }
    }

    /// Drops the fractional part; `None` if that would lose information.
    pub fn to_time(self) -> Option<SqlTime> {
        (self.fraction == 0).then(|| SqlTime::new(self.hour, self.minute, self.second))
    }
}

impl From<SqlTime> for SqlSsTime2 {
    fn from(t: SqlTime) -> Self {
        Self::new(t.hour, t.minute, t.second, 0)
    }
}

impl SqlTimestamp {
    pub const fn from_date(date: SqlDate) -> Self {
        Self {
            year: date.year,
            month: date.month,
            day: date.day,
            hour: 0,
            minute: 0,
            second: 0,
            fraction: 0,
        }
    }

    pub const fn date(&self) -> SqlDate {
        SqlDate::new(self.year, self.month, self.day)
    }

    pub const fn time(&self) -> SqlSsTime2 {
        SqlSsTime2::new(self.hour, self.minute, self.second, self.fraction)
    }

    /// Whether the time of day part is exactly midnight.
    pub const fn is_midnight(&self) -> bool {
        self.hour == 0 && self.minute == 0 && self.second == 0 && self.fraction == 0
    }
}

impl From<SqlDate> for SqlTimestamp {
    fn from(d: SqlDate) -> Self {
        Self::from_date(d)
    }
}

impl SqlNumeric {
    /// Builds a numeric from an unscaled integer, e.g. `new(-12345, 7, 2)` is `-123.45`.
    pub fn new(unscaled: i128, precision: u8, scale: i8) -> Self {
        Self {
            precision,
            scale,
            sign: u8::from(unscaled >= 0),
            val: unscaled.unsigned_abs().to_le_bytes(),
        }
    }

    pub fn magnitude(&self) -> u128 {
        u128::from_le_bytes(self.val)
    }

    pub fn is_negative(&self) -> bool {
        self.sign == 0 && self.magnitude() != 0
    }

    /// The signed unscaled value, `None` if the magnitude does not fit an `i128`.
    pub fn unscaled(&self) -> Option<i128> {
        let magnitude = i128::try_from(self.magnitude()).ok()?;
        Some(if self.sign == 0 { -magnitude } else { magnitude })
    }

    /// Re-expresses the value in another scale; `None` if digits would be lost or it overflows.
    pub fn rescale(&self, precision: u8, scale: i8) -> Option<SqlNumeric> {
        let unscaled = self.unscaled()?;
        let diff = i32::from(scale) - i32::from(self.scale);
        let value = if diff >= 0 {
            unscaled.checked_mul(10i128.checked_pow(diff as u32)?)?
        } else {
            let divisor = 10i128.checked_pow(diff.unsigned_abs())?;
            if unscaled % divisor != 0 {
                return None;
            }
            unscaled / divisor
        };
        if digit_count(value.unsigned_abs()) > u32::from(precision) {
            return None;
        }
        Some(SqlNumeric::new(value, precision, scale))
    }
}

pub(crate) fn digit_count(mut value: u128) -> u32 {
    let mut digits = 1;
    while value >= 10 {
        value /= 10;
        digits += 1;
    }
    digits
}

impl Display for SqlDate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl Display for SqlTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

fn write_fraction(f: &mut Formatter<'_>, nanos: u32) -> fmt::Result {
    if nanos == 0 {
        return Ok(());
    }
    let digits = format!("{:09}", nanos);
    write!(f, ".{}", digits.trim_end_matches('0'))
}

impl Display for SqlSsTime2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)?;
        write_fraction(f, self.fraction)
    }
}

impl Display for SqlTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        write_fraction(f, self.fraction)
    }
}

impl Display for SqlNumeric {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let digits = self.magnitude().to_string();
        if self.is_negative() {
            f.write_str("-")?;
        }
        if self.scale <= 0 {
            f.write_str(&digits)?;
            if self.magnitude() != 0 {
                for _ in 0..self.scale.unsigned_abs() {
                    f.write_str("0")?;
                }
            }
            return Ok(());
        }

        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
        } else {
            digits
        };
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{}.{}", int_part, frac_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_display_honors_scale_and_sign() {
        assert_eq!(SqlNumeric::new(-12345, 7, 2).to_string(), "-123.45");
        assert_eq!(SqlNumeric::new(5, 5, 3).to_string(), "0.005");
        assert_eq!(SqlNumeric::new(42, 5, 0).to_string(), "42");
        assert_eq!(SqlNumeric::new(42, 5, -2).to_string(), "4200");
        assert_eq!(SqlNumeric::new(0, 5, 2).to_string(), "0.00");
    }

    #[test]
    fn numeric_magnitude_is_little_endian() {
        let n = SqlNumeric::new(0x0102, 5, 0);
        assert_eq!(n.val[0], 0x02);
        assert_eq!(n.val[1], 0x01);
        assert_eq!(n.sign, 1);
        assert_eq!(n.unscaled(), Some(0x0102));
    }

    #[test]
    fn rescale_refuses_to_drop_digits() {
        let n = SqlNumeric::new(12345, 7, 2);
        assert_eq!(n.rescale(9, 4).unwrap().unscaled(), Some(1234500));
        assert_eq!(n.rescale(7, 1), None);
        assert_eq!(n.rescale(4, 2), None);
        assert_eq!(
            SqlNumeric::new(12300, 7, 2).rescale(7, 0).unwrap().unscaled(),
            Some(123)
        );
    }

    #[test]
    fn timestamp_display_trims_fraction() {
        let ts = SqlTimestamp {
            year: 1983,
            month: 1,
            day: 26,
            hour: 13,
            minute: 55,
            second: 56,
            fraction: 123_000_000,
        };
        assert_eq!(ts.to_string(), "1983-01-26 13:55:56.123");
        assert_eq!(
            SqlTimestamp::from_date(SqlDate::new(2024, 2, 29)).to_string(),
            "2024-02-29 00:00:00"
        );
    }
}

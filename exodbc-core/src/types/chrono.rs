use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::{Error, Result};
use crate::types::{SqlDate, SqlSsTime2, SqlTime, SqlTimestamp};

impl From<NaiveDate> for SqlDate {
    fn from(d: NaiveDate) -> Self {
        SqlDate::new(d.year() as i16, d.month() as u16, d.day() as u16)
    }
}

impl TryFrom<SqlDate> for NaiveDate {
    type Error = Error;

    fn try_from(d: SqlDate) -> Result<Self> {
        NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))
            .ok_or_else(|| Error::NotSupported(format!("{} is not a valid date", d).into()))
    }
}

impl From<NaiveTime> for SqlTime {
    fn from(t: NaiveTime) -> Self {
        SqlTime::new(t.hour() as u16, t.minute() as u16, t.second() as u16)
    }
}

impl From<NaiveTime> for SqlSsTime2 {
    fn from(t: NaiveTime) -> Self {
        SqlSsTime2::new(
            t.hour() as u16,
            t.minute() as u16,
            t.second() as u16,
            t.nanosecond(),
        )
    }
}

impl TryFrom<SqlTime> for NaiveTime {
    type Error = Error;

    fn try_from(t: SqlTime) -> Result<Self> {
        SqlSsTime2::from(t).try_into()
    }
}

impl TryFrom<SqlSsTime2> for NaiveTime {
    type Error = Error;

    fn try_from(t: SqlSsTime2) -> Result<Self> {
        NaiveTime::from_hms_nano_opt(
            u32::from(t.hour),
            u32::from(t.minute),
            u32::from(t.second),
            t.fraction,
        )
        .ok_or_else(|| Error::NotSupported(format!("{} is not a valid time", t).into()))
    }
}

impl From<NaiveDateTime> for SqlTimestamp {
    fn from(dt: NaiveDateTime) -> Self {
        SqlTimestamp {
            year: dt.year() as i16,
            month: dt.month() as u16,
            day: dt.day() as u16,
            hour: dt.hour() as u16,
            minute: dt.minute() as u16,
            second: dt.second() as u16,
            fraction: dt.nanosecond(),
        }
    }
}

impl TryFrom<SqlTimestamp> for NaiveDateTime {
    type Error = Error;

    fn try_from(ts: SqlTimestamp) -> Result<Self> {
        let date = NaiveDate::try_from(ts.date())?;
        let time = NaiveTime::try_from(ts.time())?;
        Ok(date.and_time(time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trips_through_chrono() {
        let dt = NaiveDate::from_ymd_opt(1983, 1, 26)
            .unwrap()
            .and_hms_nano_opt(13, 55, 56, 123_000_000)
            .unwrap();
        let ts = SqlTimestamp::from(dt);
        assert_eq!(ts.fraction, 123_000_000);
        assert_eq!(NaiveDateTime::try_from(ts).unwrap(), dt);
    }

    #[test]
    fn invalid_dates_are_rejected() {
        assert!(NaiveDate::try_from(SqlDate::new(2023, 2, 30)).is_err());
    }
}

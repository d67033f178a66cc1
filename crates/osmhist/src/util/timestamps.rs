//! RFC 3339 timestamps and ISO-8601 periods.
//!
//! Timestamps are milliseconds since the Unix epoch, always in UTC. Input
//! strings may carry a timezone offset, which is folded into the value.
//! A bare date (`YYYY-MM-DD`) means midnight UTC.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

fn invalid(input: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidTimestamp {
        input: input.to_string(),
        message: message.into(),
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Days since 1970-01-01 (Hinnant's civil-from-days inverse).
fn date_to_days(year: i32, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year as i64 - 1 } else { year as i64 };
    let m = if month <= 2 { month as i64 + 9 } else { month as i64 - 3 };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let doy = (153 * m + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn days_to_date(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if m <= 2 { y + 1 } else { y } as i32;
    (year, m, d)
}

fn parse_number<T: FromStr>(input: &str, part: &str, what: &str) -> Result<T, ConfigError> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(input, format!("invalid {what}")));
    }
    part.parse().map_err(|_| invalid(input, format!("invalid {what}")))
}

/// Parses `Z`, `+HH:MM` or `-HH:MM` into minutes east of UTC.
fn parse_offset(input: &str, offset: &str) -> Result<i64, ConfigError> {
    if offset == "Z" || offset == "z" {
        return Ok(0);
    }
    let bytes = offset.as_bytes();
    if bytes.len() != 6 || bytes[3] != b':' {
        return Err(invalid(input, "invalid timezone offset"));
    }
    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return Err(invalid(input, "invalid timezone offset")),
    };
    let hours: i64 = parse_number(input, &offset[1..3], "timezone offset")?;
    let minutes: i64 = parse_number(input, &offset[4..6], "timezone offset")?;
    if hours > 24 || (hours == 24 && minutes != 0) || minutes > 59 {
        return Err(invalid(input, "timezone offset out of range"));
    }
    Ok(sign * (hours * 60 + minutes))
}

fn parse_date(input: &str, date: &str) -> Result<i64, ConfigError> {
    let bytes = date.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return Err(invalid(input, "expected YYYY-MM-DD"));
    }
    let year: i32 = parse_number(input, &date[0..4], "year")?;
    let month: u32 = parse_number(input, &date[5..7], "month")?;
    let day: u32 = parse_number(input, &date[8..10], "day")?;
    if !(1..=12).contains(&month) {
        return Err(invalid(input, format!("month {month} out of range")));
    }
    if day == 0 || day > days_in_month(year, month) {
        return Err(invalid(input, format!("day {day} out of range")));
    }
    Ok(date_to_days(year, month, day))
}

/// Parses an RFC 3339 timestamp into milliseconds since the epoch.
///
/// Fractional seconds beyond millisecond precision are truncated.
pub fn parse_timestamp(input: &str) -> Result<i64, ConfigError> {
    let s = input.trim();
    if !s.is_ascii() {
        return Err(invalid(input, "non-ascii characters"));
    }
    if s.len() == 10 {
        return Ok(parse_date(input, s)? * MS_PER_DAY);
    }
    if s.len() < 19 {
        return Err(invalid(input, "too short"));
    }
    let days = parse_date(input, &s[..10])?;
    match s.as_bytes()[10] {
        b'T' | b't' | b' ' => {}
        _ => return Err(invalid(input, "expected 'T' between date and time")),
    }

    let time = &s[11..19];
    let tb = time.as_bytes();
    if tb[2] != b':' || tb[5] != b':' {
        return Err(invalid(input, "expected HH:MM:SS"));
    }
    let hour: i64 = parse_number(input, &time[0..2], "hour")?;
    let minute: i64 = parse_number(input, &time[3..5], "minute")?;
    let second: i64 = parse_number(input, &time[6..8], "second")?;
    if hour > 23 || minute > 59 || second > 59 {
        return Err(invalid(input, "time out of range"));
    }

    let mut rest = &s[19..];
    let mut millis = 0;
    if let Some(frac) = rest.strip_prefix('.') {
        let digits = frac.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(invalid(input, "empty fractional seconds"));
        }
        for (i, b) in frac.as_bytes()[..digits.min(3)].iter().enumerate() {
            millis += (b - b'0') as i64 * 10_i64.pow(2 - i as u32);
        }
        rest = &frac[digits..];
    }
    let offset = if rest.is_empty() { 0 } else { parse_offset(input, rest)? };

    Ok(days * MS_PER_DAY + hour * MS_PER_HOUR + minute * MS_PER_MINUTE + second * MS_PER_SECOND
        + millis
        - offset * MS_PER_MINUTE)
}

/// Formats milliseconds since the epoch as an RFC 3339 UTC timestamp.
///
/// Milliseconds are printed only when non-zero.
pub fn format_timestamp(epoch_ms: i64) -> String {
    let days = epoch_ms.div_euclid(MS_PER_DAY);
    let in_day = epoch_ms.rem_euclid(MS_PER_DAY);
    let (year, month, day) = days_to_date(days);
    let hour = in_day / MS_PER_HOUR;
    let minute = in_day % MS_PER_HOUR / MS_PER_MINUTE;
    let second = in_day % MS_PER_MINUTE / MS_PER_SECOND;
    let millis = in_day % MS_PER_SECOND;
    if millis == 0 {
        format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
    } else {
        format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z")
    }
}

/// A calendar period such as `P1Y`, `P1M`, `P2W`, `P1D`, `PT6H` or `P1DT12H`.
///
/// Years and months are calendar-aware; everything else is a fixed number of
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Period {
    pub months: u32,
    pub millis: i64,
}

impl Period {
    pub fn months(months: u32) -> Self {
        Period { months, millis: 0 }
    }

    pub fn days(days: u32) -> Self {
        Period {
            months: 0,
            millis: days as i64 * MS_PER_DAY,
        }
    }

    pub fn hours(hours: u32) -> Self {
        Period {
            months: 0,
            millis: hours as i64 * MS_PER_HOUR,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.months == 0 && self.millis == 0
    }

    /// Parses an ISO-8601 duration. Zero-length periods are rejected.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let err = || ConfigError::InvalidPeriod {
            input: input.to_string(),
        };
        let body = input.trim().strip_prefix('P').ok_or_else(err)?;
        if body.is_empty() {
            return Err(err());
        }

        let mut period = Period::default();
        let mut in_time = false;
        let mut number = String::new();
        let mut seen_unit = false;
        for c in body.chars() {
            match c {
                '0'..='9' => number.push(c),
                'T' if !in_time && number.is_empty() => in_time = true,
                unit => {
                    let n: u32 = number.parse().map_err(|_| err())?;
                    number.clear();
                    seen_unit = true;
                    match (in_time, unit) {
                        (false, 'Y') => {
                            period.months = n
                                .checked_mul(12)
                                .and_then(|m| m.checked_add(period.months))
                                .ok_or_else(err)?
                        }
                        (false, 'M') => period.months = period.months.checked_add(n).ok_or_else(err)?,
                        (false, 'W') => period.millis += n as i64 * 7 * MS_PER_DAY,
                        (false, 'D') => period.millis += n as i64 * MS_PER_DAY,
                        (true, 'H') => period.millis += n as i64 * MS_PER_HOUR,
                        (true, 'M') => period.millis += n as i64 * MS_PER_MINUTE,
                        (true, 'S') => period.millis += n as i64 * MS_PER_SECOND,
                        _ => return Err(err()),
                    }
                }
            }
        }
        if !number.is_empty() || !seen_unit || period.is_zero() {
            return Err(err());
        }
        Ok(period)
    }

    /// Adds `n` repetitions of this period to `epoch_ms`.
    ///
    /// Month arithmetic clamps to the last day of the target month, and is
    /// computed from the start so clamping never accumulates.
    pub fn add_to(&self, epoch_ms: i64, n: u32) -> i64 {
        let mut result = epoch_ms;
        if self.months > 0 {
            let days = epoch_ms.div_euclid(MS_PER_DAY);
            let in_day = epoch_ms.rem_euclid(MS_PER_DAY);
            let (year, month, day) = days_to_date(days);
            let total = (year as i64 * 12 + month as i64 - 1) + self.months as i64 * n as i64;
            let year = total.div_euclid(12) as i32;
            let month = total.rem_euclid(12) as u32 + 1;
            let day = day.min(days_in_month(year, month));
            result = date_to_days(year, month, day) * MS_PER_DAY + in_day;
        }
        result + self.millis * n as i64
    }
}

impl FromStr for Period {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::parse(s)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P")?;
        let (years, months) = (self.months / 12, self.months % 12);
        if years > 0 {
            write!(f, "{years}Y")?;
        }
        if months > 0 {
            write!(f, "{months}M")?;
        }
        let days = self.millis / MS_PER_DAY;
        if days > 0 {
            write!(f, "{days}D")?;
        }
        let rest = self.millis % MS_PER_DAY;
        if rest > 0 {
            write!(f, "T")?;
            let (h, m, s) = (
                rest / MS_PER_HOUR,
                rest % MS_PER_HOUR / MS_PER_MINUTE,
                rest % MS_PER_MINUTE / MS_PER_SECOND,
            );
            if h > 0 {
                write!(f, "{h}H")?;
            }
            if m > 0 {
                write!(f, "{m}M")?;
            }
            if s > 0 {
                write!(f, "{s}S")?;
            }
        }
        Ok(())
    }
}

/// An ascending sequence of timestamps from `start` to `end` inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampSeries {
    start: i64,
    end: i64,
    period: Period,
}

impl TimestampSeries {
    pub fn new(start: i64, end: i64, period: Period) -> Self {
        TimestampSeries { start, end, period }
    }

    /// Builds a series from RFC 3339 bounds and an ISO-8601 period.
    pub fn parse(start: &str, end: &str, period: &str) -> Result<Self, ConfigError> {
        Ok(TimestampSeries::new(
            parse_timestamp(start)?,
            parse_timestamp(end)?,
            Period::parse(period)?,
        ))
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        let valid = !self.period.is_zero() && self.start <= self.end;
        (0u32..)
            .map(|n| self.period.add_to(self.start, n))
            .take_while(move |&t| valid && t <= self.end)
    }

    pub fn to_vec(&self) -> Vec<i64> {
        self.iter().collect()
    }
}

//! Binary time formats: CP16Time2a, CP24Time2a and CP56Time2a.

use bytes::BytesMut;
use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike};

use super::wire::{read, Wire};
use crate::error::Result;

/// Default century pivot used when converting CP56Time2a to a full date.
pub const DEFAULT_START_YEAR: i32 = 1970;

/// Two octet binary time (elapsed milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cp16Time2a {
    /// Elapsed time in milliseconds (0-65535)
    pub milliseconds: u16,
}

impl Cp16Time2a {
    /// Create from elapsed milliseconds.
    #[inline]
    pub const fn new(milliseconds: u16) -> Self {
        Self { milliseconds }
    }
}

impl Wire for Cp16Time2a {
    const SIZE: usize = 2;

    fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self::new(u16::from_le_bytes(read::<2>(buf)?)))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.milliseconds.to_le_bytes());
    }
}

/// Three octet binary time (minute, second, millisecond).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cp24Time2a {
    /// Milliseconds within the minute (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Substituted flag
    pub substituted: bool,
    /// Invalid flag
    pub invalid: bool,
}

impl Cp24Time2a {
    /// Create a valid time tag. Out-of-range parts are clamped to
    /// 59 minutes, 59 seconds and 999 milliseconds.
    pub fn new(minute: u8, second: u8, millisecond: u16) -> Self {
        Self {
            milliseconds: u16::from(second.min(59)) * 1000 + millisecond.min(999),
            minutes: minute.min(59),
            substituted: false,
            invalid: false,
        }
    }

    /// Second part (0-59).
    #[inline]
    pub fn second(&self) -> u8 {
        (self.milliseconds / 1000) as u8
    }

    /// Millisecond part (0-999).
    #[inline]
    pub fn millisecond(&self) -> u16 {
        self.milliseconds % 1000
    }
}

impl Wire for Cp24Time2a {
    const SIZE: usize = 3;

    fn decode(buf: &[u8]) -> Result<Self> {
        let b = read::<3>(buf)?;
        Ok(Self {
            milliseconds: u16::from_le_bytes([b[0], b[1]]),
            minutes: b[2] & 0x3F,
            substituted: b[2] & 0x40 != 0,
            invalid: b[2] & 0x80 != 0,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.milliseconds.to_le_bytes());
        buf.extend_from_slice(&[minute_octet(self.minutes, self.substituted, self.invalid)]);
    }
}

#[inline]
fn minute_octet(minutes: u8, substituted: bool, invalid: bool) -> u8 {
    let mut octet = minutes & 0x3F;
    if substituted {
        octet |= 0x40;
    }
    if invalid {
        octet |= 0x80;
    }
    octet
}

/// Seven octet binary time (full date and time).
///
/// ```text
/// +--------+--------+--------------+------------+-------------+--------+--------+
/// | ms lo  | ms hi  | IV|SU|minute | SU|  hour  | DOW | day   | month  | year   |
/// +--------+--------+--------------+------------+-------------+--------+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cp56Time2a {
    /// Milliseconds within the minute (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Hours (0-23)
    pub hours: u8,
    /// Day of month (1-31)
    pub day: u8,
    /// Day of week (1-7, 1=Monday, 0=unused)
    pub day_of_week: u8,
    /// Month (1-12)
    pub month: u8,
    /// Year within the century (0-99)
    pub year: u8,
    /// Invalid flag
    pub invalid: bool,
    /// Substituted flag
    pub substituted: bool,
    /// Summer time flag
    pub summer_time: bool,
}

impl Cp56Time2a {
    /// Create a time tag from a naive (local) date and time.
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        let millisecond = (dt.nanosecond() / 1_000_000).min(999) as u16;
        Self {
            milliseconds: dt.second() as u16 * 1000 + millisecond,
            minutes: dt.minute() as u8,
            hours: dt.hour() as u8,
            day: dt.day() as u8,
            day_of_week: dt.weekday().number_from_monday() as u8,
            month: dt.month() as u8,
            year: dt.year().rem_euclid(100) as u8,
            invalid: false,
            substituted: false,
            summer_time: false,
        }
    }

    /// Create a time tag from a zoned date and time, using its local wall clock.
    pub fn from_datetime<Tz: TimeZone>(dt: &chrono::DateTime<Tz>) -> Self {
        Self::from_naive(&dt.naive_local())
    }

    /// Current local time.
    pub fn now() -> Self {
        Self::from_datetime(&chrono::Local::now())
    }

    /// Second part (0-59).
    #[inline]
    pub fn second(&self) -> u8 {
        (self.milliseconds / 1000) as u8
    }

    /// Millisecond part (0-999).
    #[inline]
    pub fn millisecond(&self) -> u16 {
        self.milliseconds % 1000
    }

    /// Full year, resolving the century with `start_year` as pivot.
    ///
    /// Two-digit years below `start_year % 100` belong to the next century.
    pub fn full_year(&self, start_year: i32) -> i32 {
        let base_year = (start_year / 100) * 100;
        let year = self.year as i32;
        if year < start_year % 100 {
            base_year + 100 + year
        } else {
            base_year + year
        }
    }

    /// Convert to a naive date and time.
    ///
    /// Returns `None` when the encoded fields do not form a valid date.
    pub fn to_naive(&self, start_year: i32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(
            self.full_year(start_year),
            self.month as u32,
            self.day as u32,
        )?
        .and_hms_milli_opt(
            self.hours as u32,
            self.minutes as u32,
            self.second() as u32,
            self.millisecond() as u32,
        )
    }
}

impl Wire for Cp56Time2a {
    const SIZE: usize = 7;

    fn decode(buf: &[u8]) -> Result<Self> {
        let b = read::<7>(buf)?;
        Ok(Self {
            milliseconds: u16::from_le_bytes([b[0], b[1]]),
            minutes: b[2] & 0x3F,
            substituted: b[2] & 0x40 != 0,
            invalid: b[2] & 0x80 != 0,
            hours: b[3] & 0x1F,
            summer_time: b[3] & 0x80 != 0,
            day: b[4] & 0x1F,
            day_of_week: (b[4] >> 5) & 0x07,
            month: b[5] & 0x0F,
            year: b[6] & 0x7F,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        let ms = self.milliseconds.to_le_bytes();
        buf.extend_from_slice(&[
            ms[0],
            ms[1],
            minute_octet(self.minutes, self.substituted, self.invalid),
            (self.hours & 0x1F) | if self.summer_time { 0x80 } else { 0 },
            (self.day & 0x1F) | ((self.day_of_week & 0x07) << 5),
            self.month & 0x0F,
            self.year & 0x7F,
        ]);
    }
}

impl std::fmt::Display for Cp56Time2a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year,
            self.month,
            self.day,
            self.hours,
            self.minutes,
            self.second(),
            self.millisecond()
        )?;
        if self.invalid {
            write!(f, " IV")?;
        }
        Ok(())
    }
}

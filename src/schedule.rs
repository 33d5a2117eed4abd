use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Weekday};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid time '{0}': expected zero-padded HH:MM with hour 00-23 and minute 00-59")]
    TimeFormat(String),
    #[error("start time must be earlier than end time")]
    TimeOrder,
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    DateFormat(String),
    #[error("end date must be after start date")]
    DateOrder,
    #[error("unknown day of week '{0}'")]
    UnknownDay(String),
}

impl ScheduleError {
    /// Stable wire code for the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleError::TimeFormat(_) => "bad_time_format",
            ScheduleError::TimeOrder | ScheduleError::DateOrder => "invalid_range",
            ScheduleError::DateFormat(_) | ScheduleError::UnknownDay(_) => "bad_params",
        }
    }
}

/// Minutes since midnight for a wall-clock "HH:MM" string (0..=1439).
/// The format is strict: two digits, colon, two digits.
pub fn time_to_minutes(raw: &str) -> Result<u16, ScheduleError> {
    let b = raw.as_bytes();
    let well_formed = b.len() == 5
        && b[0].is_ascii_digit()
        && b[1].is_ascii_digit()
        && b[2] == b':'
        && b[3].is_ascii_digit()
        && b[4].is_ascii_digit();
    if !well_formed {
        return Err(ScheduleError::TimeFormat(raw.to_string()));
    }
    let hour = (b[0] - b'0') as u16 * 10 + (b[1] - b'0') as u16;
    let minute = (b[3] - b'0') as u16 * 10 + (b[4] - b'0') as u16;
    if hour > 23 || minute > 59 {
        return Err(ScheduleError::TimeFormat(raw.to_string()));
    }
    Ok(hour * 60 + minute)
}

/// Parse a "HH:MM".."HH:MM" pair and require a non-empty interval.
pub fn validate_time_range(start: &str, end: &str) -> Result<(u16, u16), ScheduleError> {
    let s = time_to_minutes(start)?;
    let e = time_to_minutes(end)?;
    if s >= e {
        return Err(ScheduleError::TimeOrder);
    }
    Ok((s, e))
}

/// Half-open interval overlap on minutes-of-day: `[a_start, a_end)` vs
/// `[b_start, b_end)`. A slot ending at 10:00 and one starting at 10:00 do
/// not overlap.
pub fn intervals_overlap(a_start: u16, a_end: u16, b_start: u16, b_end: u16) -> bool {
    a_start < b_end && a_end > b_start
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    /// Display/storage order for weekly views.
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];

    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monday" => Ok(DayOfWeek::Monday),
            "tuesday" => Ok(DayOfWeek::Tuesday),
            "wednesday" => Ok(DayOfWeek::Wednesday),
            "thursday" => Ok(DayOfWeek::Thursday),
            "friday" => Ok(DayOfWeek::Friday),
            "saturday" => Ok(DayOfWeek::Saturday),
            "sunday" => Ok(DayOfWeek::Sunday),
            _ => Err(ScheduleError::UnknownDay(raw.to_string())),
        }
    }

    /// Canonical lowercase tag stored in the database and used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }

    /// Numeric weekday with Sunday = 0 through Saturday = 6.
    pub fn number(self) -> u8 {
        match self {
            DayOfWeek::Sunday => 0,
            DayOfWeek::Monday => 1,
            DayOfWeek::Tuesday => 2,
            DayOfWeek::Wednesday => 3,
            DayOfWeek::Thursday => 4,
            DayOfWeek::Friday => 5,
            DayOfWeek::Saturday => 6,
        }
    }

    fn chrono_weekday(self) -> Weekday {
        match self {
            DayOfWeek::Monday => Weekday::Mon,
            DayOfWeek::Tuesday => Weekday::Tue,
            DayOfWeek::Wednesday => Weekday::Wed,
            DayOfWeek::Thursday => Weekday::Thu,
            DayOfWeek::Friday => Weekday::Fri,
            DayOfWeek::Saturday => Weekday::Sat,
            DayOfWeek::Sunday => Weekday::Sun,
        }
    }

    pub fn matches(self, date: NaiveDate) -> bool {
        date.weekday() == self.chrono_weekday()
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ScheduleError::DateFormat(raw.to_string()))
}

/// Parse a date pair and require `end` strictly after `start`.
pub fn validate_date_range(start: &str, end: &str) -> Result<(NaiveDate, NaiveDate), ScheduleError> {
    let s = parse_date(start)?;
    let e = parse_date(end)?;
    if e <= s {
        return Err(ScheduleError::DateOrder);
    }
    Ok((s, e))
}

/// Every calendar date in `[start, end]` (inclusive) falling on `day`.
pub fn dates_on_weekday(start: NaiveDate, end: NaiveDate, day: DayOfWeek) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut cur = start;
    while cur <= end {
        if day.matches(cur) {
            out.push(cur);
        }
        cur = cur + ChronoDuration::days(1);
    }
    out
}

/// Naive local timestamp for a session instance boundary, e.g.
/// "2024-04-01T09:00:00". `time` must already be a validated "HH:MM".
pub fn instance_datetime(date: NaiveDate, time: &str) -> String {
    format!("{}T{}:00", date.format("%Y-%m-%d"), time)
}

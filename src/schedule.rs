//! Timetable documents and period resolution.
//!
//! Everything here is pure: callers load the documents and pass the
//! reference instant in. Nothing reads the clock.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("No active timetable found for class {class_id}")]
    NoActiveSchedule { class_id: String },
}

/// Wall-clock time of day, held as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self((hour * 60 + minute) as u16))
        } else {
            None
        }
    }

    /// Seconds are dropped, so 08:40:59 is still 08:40.
    pub fn from_time(t: NaiveTime) -> Self {
        Self((t.hour() * 60 + t.minute()) as u16)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 5
            && bytes[2] == b':'
            && [0, 1, 3, 4].iter().all(|&i| bytes[i].is_ascii_digit());
        if !well_formed {
            return Err(format!("invalid time {:?}: expected zero-padded HH:MM", s));
        }
        let hour: u32 = s[0..2].parse().map_err(|_| format!("invalid hour in {:?}", s))?;
        let minute: u32 = s[3..5]
            .parse()
            .map_err(|_| format!("invalid minute in {:?}", s))?;
        Self::from_hm(hour, minute).ok_or_else(|| format!("time out of range: {:?}", s))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    /// Sunday-first, matching the order lecture lookups walk the week in.
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    pub fn of(at: NaiveDateTime) -> Self {
        match at.weekday() {
            chrono::Weekday::Sun => DayOfWeek::Sunday,
            chrono::Weekday::Mon => DayOfWeek::Monday,
            chrono::Weekday::Tue => DayOfWeek::Tuesday,
            chrono::Weekday::Wed => DayOfWeek::Wednesday,
            chrono::Weekday::Thu => DayOfWeek::Thursday,
            chrono::Weekday::Fri => DayOfWeek::Friday,
            chrono::Weekday::Sat => DayOfWeek::Saturday,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayOfWeek::Sunday => "Sunday",
            DayOfWeek::Monday => "Monday",
            DayOfWeek::Tuesday => "Tuesday",
            DayOfWeek::Wednesday => "Wednesday",
            DayOfWeek::Thursday => "Thursday",
            DayOfWeek::Friday => "Friday",
            DayOfWeek::Saturday => "Saturday",
        }
    }

    /// Case-insensitive, for query filters.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PeriodType {
    #[default]
    Regular,
    Lab,
    Library,
    Assembly,
    Break,
    Lunch,
    Games,
    Activity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub period_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub classroom: String,
    #[serde(default)]
    pub period_type: PeriodType,
    #[serde(default)]
    pub is_break: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub day_of_week: DayOfWeek,
    #[serde(default)]
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakTiming {
    pub name: String,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedPeriod {
    pub period_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classroom: Option<String>,
    #[serde(default)]
    pub is_cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialSchedule {
    #[serde(deserialize_with = "calendar_date")]
    pub date: NaiveDate,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub modified_periods: Vec<ModifiedPeriod>,
}

/// The editable body of a timetable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableDoc {
    pub class_id: String,
    pub academic_year: String,
    #[serde(deserialize_with = "calendar_date")]
    pub effective_from: NaiveDate,
    #[serde(deserialize_with = "calendar_date")]
    pub effective_to: NaiveDate,
    #[serde(default)]
    pub weekly_schedule: Vec<DaySchedule>,
    #[serde(default)]
    pub break_timings: Vec<BreakTiming>,
    #[serde(default)]
    pub special_schedules: Vec<SpecialSchedule>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timetable {
    pub id: String,
    #[serde(flatten)]
    pub doc: TimetableDoc,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Accepts `YYYY-MM-DD` or any timestamp starting with one.
///
/// RFC 3339 timestamps name the local calendar day they fall on, so
/// `2025-06-01T18:30:00.000Z` is 2 June in a `+05:30` zone.
fn calendar_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_calendar_date(&s).map_err(serde::de::Error::custom)
}

pub fn parse_calendar_date(s: &str) -> Result<NaiveDate, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Local).date_naive());
    }
    let head = s.get(0..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(|_| format!("invalid date {:?}", s))
}

impl TimetableDoc {
    /// Whole-day coverage on both ends of the range.
    pub fn covers(&self, at: NaiveDateTime) -> bool {
        let day = at.date();
        self.effective_from <= day && day <= self.effective_to
    }

    /// Structural checks serde cannot express. Returns every problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.class_id.trim().is_empty() {
            errors.push("classId is required".to_string());
        }
        if self.academic_year.trim().is_empty() {
            errors.push("academicYear is required".to_string());
        }
        if self.effective_to < self.effective_from {
            errors.push("effectiveTo must not be before effectiveFrom".to_string());
        }
        for day in &self.weekly_schedule {
            for p in &day.periods {
                let at = format!("{} period {}", day.day_of_week.as_str(), p.period_number);
                if p.period_number == 0 {
                    errors.push(format!("{}: periodNumber must be positive", at));
                }
                if p.end_time < p.start_time {
                    errors.push(format!("{}: endTime must not be before startTime", at));
                }
                if p.classroom.trim().is_empty() {
                    errors.push(format!("{}: classroom is required", at));
                }
                if !p.is_break {
                    if p.subject_id.as_deref().map_or(true, |s| s.trim().is_empty()) {
                        errors.push(format!("{}: subjectId is required unless isBreak", at));
                    }
                    if p.teacher_id.as_deref().map_or(true, |s| s.trim().is_empty()) {
                        errors.push(format!("{}: teacherId is required unless isBreak", at));
                    }
                }
            }
        }
        for b in &self.break_timings {
            if b.name.trim().is_empty() {
                errors.push("breakTimings: name is required".to_string());
            }
        }
        for s in &self.special_schedules {
            if s.reason.trim().is_empty() {
                errors.push(format!("specialSchedules {}: reason is required", s.date));
            }
            for m in &s.modified_periods {
                let at = format!("specialSchedules {} period {}", s.date, m.period_number);
                if m.period_number == 0 {
                    errors.push(format!("{}: periodNumber must be positive", at));
                }
                if let (Some(start), Some(end)) = (m.start_time, m.end_time) {
                    if end < start {
                        errors.push(format!("{}: endTime must not be before startTime", at));
                    }
                }
            }
        }
        errors
    }
}

/// Picks the timetable of `class_id` whose range covers `at`.
///
/// Overlapping ranges are not prevented at write time; when several match,
/// the most recently created one wins, and among equal creation stamps the
/// later candidate in the slice.
pub fn resolve_active_timetable<'a>(
    class_id: &str,
    candidates: &'a [Timetable],
    at: NaiveDateTime,
) -> Result<&'a Timetable, ScheduleError> {
    candidates
        .iter()
        .filter(|t| t.doc.class_id == class_id && t.doc.covers(at))
        .max_by_key(|t| t.created_at)
        .ok_or_else(|| ScheduleError::NoActiveSchedule {
            class_id: class_id.to_string(),
        })
}

pub const NO_SCHEDULE_TODAY: &str = "No schedule found for today";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayView<'a> {
    pub day_of_week: DayOfWeek,
    pub periods: &'a [Period],
    pub special_schedules: Vec<&'a SpecialSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

pub fn day_schedule(timetable: &Timetable, at: NaiveDateTime) -> DayView<'_> {
    let day_of_week = DayOfWeek::of(at);
    let day = timetable
        .doc
        .weekly_schedule
        .iter()
        .find(|d| d.day_of_week == day_of_week);
    let special_schedules = timetable
        .doc
        .special_schedules
        .iter()
        .filter(|s| s.date == at.date())
        .collect();
    DayView {
        day_of_week,
        periods: day.map(|d| d.periods.as_slice()).unwrap_or(&[]),
        special_schedules,
        message: if day.is_none() {
            Some(NO_SCHEDULE_TODAY)
        } else {
            None
        },
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodLookup<'a> {
    pub current_period: Option<&'a Period>,
    pub next_period: Option<&'a Period>,
}

/// One pass over `periods` in stored order; they are not re-sorted.
///
/// Both ends of a period are inclusive, so a period ending at 09:30 is still
/// current at exactly 09:30 and wins over one starting at 09:30.
pub fn current_and_next_period(periods: &[Period], at: NaiveDateTime) -> PeriodLookup<'_> {
    let now = TimeOfDay::from_time(at.time());
    for (i, p) in periods.iter().enumerate() {
        if p.start_time <= now && now <= p.end_time {
            return PeriodLookup {
                current_period: Some(p),
                next_period: periods.get(i + 1),
            };
        }
        if now < p.start_time {
            return PeriodLookup {
                current_period: None,
                next_period: Some(p),
            };
        }
    }
    PeriodLookup::default()
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekView<'a> {
    pub weekly_schedule: &'a [DaySchedule],
    pub break_timings: &'a [BreakTiming],
}

pub fn week_view(timetable: &Timetable) -> WeekView<'_> {
    WeekView {
        weekly_schedule: &timetable.doc.weekly_schedule,
        break_timings: &timetable.doc.break_timings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_rejects_unpadded_and_out_of_range() {
        assert!("9:00".parse::<TimeOfDay>().is_err());
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("0a:10".parse::<TimeOfDay>().is_err());
        let t: TimeOfDay = "07:05".parse().expect("valid time");
        assert_eq!(Some(t), TimeOfDay::from_hm(7, 5));
        assert_eq!(t.to_string(), "07:05");
    }

    #[test]
    fn calendar_date_reads_timestamps_as_local_days() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).expect("ymd");
        assert_eq!(parse_calendar_date("2025-06-02").expect("date"), day);
        assert_eq!(parse_calendar_date("2025-06-02T23:59:00").expect("date"), day);

        for hour in [0, 12, 23] {
            let local = day
                .and_hms_opt(hour, 30, 0)
                .and_then(|t| t.and_local_timezone(Local).single())
                .expect("local instant");
            let utc = local.with_timezone(&Utc).to_rfc3339();
            assert_eq!(parse_calendar_date(&utc).expect("date"), day, "{}", utc);
        }
        assert!(parse_calendar_date("01/04/2025").is_err());
    }

    #[test]
    fn day_names_parse_case_insensitively() {
        assert_eq!(DayOfWeek::parse("monday"), Some(DayOfWeek::Monday));
        assert_eq!(DayOfWeek::parse(" SATURDAY "), Some(DayOfWeek::Saturday));
        assert_eq!(DayOfWeek::parse("Funday"), None);
    }
}

#[path = "../src/schedule.rs"]
mod schedule;

use chrono::{Local, NaiveDateTime, Utc};
use schedule::{
    current_and_next_period, day_schedule, resolve_active_timetable, week_view, DayOfWeek,
    ScheduleError, Timetable, NO_SCHEDULE_TODAY,
};
use serde_json::json;

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").expect("reference instant")
}

fn timetable(id: &str, from: &str, to: &str, created_at: &str) -> Timetable {
    serde_json::from_value(json!({
        "id": id,
        "classId": "class-1",
        "academicYear": "2024-25",
        "effectiveFrom": from,
        "effectiveTo": to,
        "weeklySchedule": [
            {
                "dayOfWeek": "Monday",
                "periods": [
                    { "periodNumber": 1, "startTime": "08:00", "endTime": "08:40", "subjectId": "math", "teacherId": "t1", "classroom": "R1" },
                    { "periodNumber": 2, "startTime": "08:40", "endTime": "09:20", "subjectId": "sci", "teacherId": "t2", "classroom": "Lab" },
                    { "periodNumber": 3, "startTime": "09:20", "endTime": "10:00", "subjectId": "eng", "teacherId": "t3", "classroom": "R1" }
                ]
            },
            {
                "dayOfWeek": "Tuesday",
                "periods": [
                    { "periodNumber": 1, "startTime": "08:00", "endTime": "08:40", "classroom": "Hall", "periodType": "Assembly", "isBreak": true }
                ]
            }
        ],
        "breakTimings": [
            { "name": "Recess", "startTime": "10:00", "endTime": "10:15", "duration": 15 }
        ],
        "specialSchedules": [
            { "date": "2025-06-02", "reason": "Sports day" }
        ],
        "createdAt": created_at,
        "updatedAt": created_at
    }))
    .expect("timetable fixture")
}

/// The UTC timestamp a browser client sends for a local wall-clock time.
fn utc_stamp_of_local(s: &str) -> String {
    at(s)
        .and_local_timezone(Local)
        .single()
        .expect("unambiguous local time")
        .with_timezone(&Utc)
        .to_rfc3339()
}

fn school_year() -> Timetable {
    timetable("tt-1", "2025-04-01", "2026-03-31", "2025-03-01T10:00:00Z")
}

fn period_numbers(lookup: &schedule::PeriodLookup<'_>) -> (Option<u32>, Option<u32>) {
    (
        lookup.current_period.map(|p| p.period_number),
        lookup.next_period.map(|p| p.period_number),
    )
}

#[test]
fn current_and_next_inside_a_period() {
    let tt = school_year();
    let day = day_schedule(&tt, at("2025-06-02T08:50"));
    let lookup = current_and_next_period(day.periods, at("2025-06-02T08:50"));
    assert_eq!(period_numbers(&lookup), (Some(2), Some(3)));
}

#[test]
fn shared_boundary_belongs_to_the_ending_period() {
    let tt = school_year();
    let instant = at("2025-06-02T08:40");
    let day = day_schedule(&tt, instant);
    let lookup = current_and_next_period(day.periods, instant);
    assert_eq!(period_numbers(&lookup), (Some(1), Some(2)));
}

#[test]
fn before_first_and_after_last_period() {
    let tt = school_year();
    let early = at("2025-06-02T07:00");
    let lookup = current_and_next_period(day_schedule(&tt, early).periods, early);
    assert_eq!(period_numbers(&lookup), (None, Some(1)));

    let late = at("2025-06-02T10:30");
    let lookup = current_and_next_period(day_schedule(&tt, late).periods, late);
    assert_eq!(period_numbers(&lookup), (None, None));
}

#[test]
fn seconds_are_ignored_when_matching_periods() {
    let tt = school_year();
    let instant = NaiveDateTime::parse_from_str("2025-06-02T09:20:59", "%Y-%m-%dT%H:%M:%S")
        .expect("instant");
    let lookup = current_and_next_period(day_schedule(&tt, instant).periods, instant);
    assert_eq!(period_numbers(&lookup), (Some(2), Some(3)));
}

#[test]
fn missing_weekday_is_an_empty_day_not_an_error() {
    let tt = school_year();
    // 2025-06-04 is a Wednesday.
    let day = day_schedule(&tt, at("2025-06-04T09:00"));
    assert_eq!(day.day_of_week, DayOfWeek::Wednesday);
    assert!(day.periods.is_empty());
    assert_eq!(day.message, Some(NO_SCHEDULE_TODAY));
}

#[test]
fn special_schedule_annotates_matching_day_only() {
    let tt = school_year();
    let day = day_schedule(&tt, at("2025-06-02T23:59"));
    assert_eq!(day.periods.len(), 3);
    assert_eq!(day.special_schedules.len(), 1);
    assert_eq!(day.special_schedules[0].reason, "Sports day");
    assert!(day.message.is_none());

    let next_week = day_schedule(&tt, at("2025-06-09T09:00"));
    assert_eq!(next_week.periods.len(), 3);
    assert!(next_week.special_schedules.is_empty());
}

#[test]
fn special_schedule_stored_as_utc_timestamp_matches_its_local_day() {
    let mut tt = school_year();
    tt.doc.special_schedules = serde_json::from_value(json!([
        { "date": utc_stamp_of_local("2025-06-02T00:30"), "reason": "Sports day" }
    ]))
    .expect("special schedules");

    let day = day_schedule(&tt, at("2025-06-02T09:00"));
    assert_eq!(day.special_schedules.len(), 1);
    assert_eq!(day.special_schedules[0].date.to_string(), "2025-06-02");

    assert!(day_schedule(&tt, at("2025-06-01T09:00")).special_schedules.is_empty());
    assert!(day_schedule(&tt, at("2025-06-03T09:00")).special_schedules.is_empty());
}

#[test]
fn effective_range_timestamps_resolve_on_local_days() {
    let tt = timetable(
        "tt-utc",
        &utc_stamp_of_local("2025-06-02T00:00"),
        &utc_stamp_of_local("2025-06-06T23:59"),
        "2025-03-01T10:00:00Z",
    );
    let timetables = vec![tt];
    for inside in ["2025-06-02T00:05", "2025-06-06T23:00"] {
        assert!(
            resolve_active_timetable("class-1", &timetables, at(inside)).is_ok(),
            "{}",
            inside
        );
    }
    for outside in ["2025-06-01T23:55", "2025-06-07T00:05"] {
        assert!(
            resolve_active_timetable("class-1", &timetables, at(outside)).is_err(),
            "{}",
            outside
        );
    }
}

#[test]
fn no_active_timetable_outside_every_range() {
    let timetables = vec![school_year()];
    let err = resolve_active_timetable("class-1", &timetables, at("2026-04-01T09:00"))
        .expect_err("after range");
    assert_eq!(
        err,
        ScheduleError::NoActiveSchedule {
            class_id: "class-1".to_string()
        }
    );
    assert!(resolve_active_timetable("class-1", &timetables, at("2025-03-31T23:59")).is_err());
    assert!(resolve_active_timetable("class-2", &timetables, at("2025-06-02T09:00")).is_err());
}

#[test]
fn range_ends_are_whole_days() {
    let timetables = vec![school_year()];
    let first = resolve_active_timetable("class-1", &timetables, at("2025-04-01T00:00"))
        .expect("first day");
    assert_eq!(first.id, "tt-1");
    let last = resolve_active_timetable("class-1", &timetables, at("2026-03-31T18:30"))
        .expect("last day, after midnight of effectiveTo");
    assert_eq!(last.id, "tt-1");
}

#[test]
fn overlapping_ranges_resolve_to_latest_created() {
    let older = timetable("old", "2025-04-01", "2026-03-31", "2025-03-01T10:00:00Z");
    let newer = timetable("new", "2025-06-01", "2025-06-30", "2025-05-20T10:00:00Z");
    let instant = at("2025-06-02T09:00");

    let timetables = vec![older.clone(), newer.clone()];
    let picked = resolve_active_timetable("class-1", &timetables, instant).expect("active");
    assert_eq!(picked.id, "new");

    // Insertion order does not matter.
    let reversed = vec![newer, older];
    let picked = resolve_active_timetable("class-1", &reversed, instant).expect("active");
    assert_eq!(picked.id, "new");

    let outside_newer = resolve_active_timetable("class-1", &reversed, at("2025-07-01T09:00"))
        .expect("older still covers July");
    assert_eq!(outside_newer.id, "old");
}

#[test]
fn week_view_returns_stored_schedule_verbatim() {
    let tt = school_year();
    let week = week_view(&tt);
    assert_eq!(week.weekly_schedule, tt.doc.weekly_schedule.as_slice());
    assert_eq!(week.break_timings, tt.doc.break_timings.as_slice());

    let as_json = serde_json::to_value(week).expect("serialize week");
    assert_eq!(
        as_json["weeklySchedule"][0]["periods"][1]["startTime"],
        json!("08:40")
    );
    assert_eq!(as_json["weeklySchedule"][1]["periods"][0]["isBreak"], json!(true));
    assert_eq!(as_json["breakTimings"][0]["duration"], json!(15));
}

#[test]
fn stored_period_order_is_trusted() {
    let mut tt = school_year();
    tt.doc.weekly_schedule[0].periods.swap(0, 2);
    // Period 3 (09:20) now comes first; 08:50 is before its start, so it is
    // reported as next without looking further.
    let instant = at("2025-06-02T08:50");
    let lookup = current_and_next_period(day_schedule(&tt, instant).periods, instant);
    assert_eq!(period_numbers(&lookup), (None, Some(3)));
}

#[test]
fn malformed_documents_fail_validation() {
    let mut tt = school_year();
    assert!(tt.doc.validate().is_empty());

    tt.doc.weekly_schedule[0].periods[0].subject_id = None;
    tt.doc.effective_to = tt.doc.effective_from.pred_opt().expect("previous day");
    let errors = tt.doc.validate();
    assert_eq!(errors.len(), 2, "{:?}", errors);
    assert!(errors.iter().any(|e| e.contains("subjectId is required")));
    assert!(errors.iter().any(|e| e.contains("effectiveTo")));

    let bad_time = serde_json::from_value::<schedule::Period>(json!({
        "periodNumber": 1, "startTime": "9:00", "endTime": "09:40", "classroom": "R1"
    }));
    assert!(bad_time.is_err());
}

#[test]
fn modified_periods_follow_period_rules() {
    let mut tt = school_year();
    tt.doc.special_schedules = serde_json::from_value(json!([{
        "date": "2025-06-02",
        "reason": "Half day",
        "modifiedPeriods": [
            { "periodNumber": 0, "isCancelled": true },
            { "periodNumber": 2, "startTime": "09:30", "endTime": "09:00" },
            { "periodNumber": 3, "startTime": "09:00" }
        ]
    }]))
    .expect("special schedules");

    let errors = tt.doc.validate();
    assert_eq!(errors.len(), 2, "{:?}", errors);
    assert!(errors
        .iter()
        .any(|e| e.contains("period 0") && e.contains("periodNumber must be positive")));
    assert!(errors
        .iter()
        .any(|e| e.contains("period 2") && e.contains("endTime must not be before startTime")));
}

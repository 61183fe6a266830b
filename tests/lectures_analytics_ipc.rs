mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{
    break_period, create_class, create_subject, create_teacher, error_code, id_of, period,
    request, request_err, request_ok, select_workspace, spawn_sidecar, temp_dir,
};

#[test]
fn lecture_schedule_today_week_and_next() {
    let workspace = temp_dir("schoold-lectures");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let teacher = create_teacher(&mut stdin, &mut reader, "Omar F", "omar@school.test", "Physics");
    let lecture = |day: &str, start: &str, end: &str| {
        json!({ "input": {
            "subject": "Physics",
            "teacher": teacher,
            "classroom": "Lab 2",
            "startTime": start,
            "endTime": end,
            "dayOfWeek": day,
            "course": "B.Sc"
        }})
    };

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "lectures.create",
        lecture("Monday", "10:00", "11:00"),
    );
    assert_eq!(first["teacher"]["name"], "Omar F");
    assert_eq!(first["lectureType"], "Lecture");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "lectures.create",
        lecture("Monday", "08:00", "09:00"),
    );
    let thursday = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "lectures.create",
        lecture("Thursday", "09:00", "10:00"),
    );

    let bad = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "lectures.create",
        lecture("Monday", "11:00", "10:00"),
    );
    assert_eq!(error_code(&bad), "validation_failed");

    // 2025-06-02 is a Monday.
    let today = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.today",
        json!({ "at": "2025-06-02T09:30" }),
    );
    assert_eq!(today["dayOfWeek"], "Monday");
    let starts: Vec<_> = today["lectures"]
        .as_array()
        .expect("lectures")
        .iter()
        .map(|l| l["startTime"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(starts, vec!["08:00", "10:00"]);

    let next = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.next",
        json!({ "at": "2025-06-02T09:30" }),
    );
    assert_eq!(next["startTime"], "10:00");

    let after_monday = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.next",
        json!({ "at": "2025-06-02T12:00" }),
    );
    assert_eq!(after_monday["id"], json!(id_of(&thursday)));

    let week = request_ok(&mut stdin, &mut reader, "8", "schedule.week", json!({}));
    assert_eq!(week["Monday"].as_array().map(|l| l.len()), Some(2));
    assert_eq!(week["Thursday"].as_array().map(|l| l.len()), Some(1));
    assert!(week.get("Friday").is_none());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "lectures.update",
        json!({ "id": id_of(&thursday), "patch": { "isActive": false } }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "10", "lectures.list", json!({}));
    assert_eq!(listed["lectures"].as_array().map(|l| l.len()), Some(2));

    let in_use = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "teachers.delete",
        json!({ "id": teacher }),
    );
    assert_eq!(error_code(&in_use), "in_use");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn next_lecture_is_not_found_when_nothing_is_scheduled() {
    let workspace = temp_dir("schoold-lectures-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let none = request_err(&mut stdin, &mut reader, "1", "schedule.next", json!({}));
    assert_eq!(error_code(&none), "not_found");
    assert_eq!(none["message"], "No upcoming lectures found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn analytics_over_a_seeded_workspace() {
    let workspace = temp_dir("schoold-analytics");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let busy = create_teacher(&mut stdin, &mut reader, "Busy Bee", "busy@school.test", "Maths");
    let idle = create_teacher(&mut stdin, &mut reader, "Idle Ian", "idle@school.test", "Maths");
    let class_id = create_class(&mut stdin, &mut reader, "Class 10", "A", &idle);
    let math = create_subject(&mut stdin, &mut reader, "Mathematics", "MATH", "Core");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "timetables.create",
        json!({ "input": {
            "classId": class_id,
            "academicYear": "2024-25",
            "effectiveFrom": "2024-04-01",
            "effectiveTo": "2025-03-31",
            "weeklySchedule": [
                { "dayOfWeek": "Monday", "periods": [
                    period(1, "08:00", "08:40", &math, &busy, "R101"),
                    period(2, "08:40", "09:20", &math, &busy, "R101"),
                    break_period(3, "09:20", "09:35"),
                    period(4, "09:35", "10:15", &math, &busy, "R101"),
                    period(5, "10:15", "10:55", &math, &busy, "R101"),
                    period(6, "10:55", "11:35", &math, &busy, "Lab 1"),
                ]},
                { "dayOfWeek": "Tuesday", "periods": [
                    period(1, "08:00", "08:40", &math, &busy, "R101"),
                ]}
            ]
        }}),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "syllabus.create",
        json!({ "input": {
            "subject": math, "className": "Class 10", "academicYear": "2024-25",
            "units": [
                { "unitNumber": 1, "unitName": "Algebra", "totalHours": 20,
                  "chapters": [{ "chapterNumber": 1, "chapterName": "Polynomials" }] },
                { "unitNumber": 2, "unitName": "Geometry", "totalHours": 15 }
            ]
        }}),
    );

    let rooms = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "analytics.classroomUtilization",
        json!({ "day": "monday" }),
    );
    assert_eq!(rooms["classroomUtilization"][0]["classroom"], "R101");
    assert_eq!(rooms["classroomUtilization"][0]["periodsCount"], 4);
    assert_eq!(rooms["classroomUtilization"][0]["utilizationRate"], 50.0);
    assert_eq!(rooms["summary"]["totalClassrooms"], 2);
    assert_eq!(rooms["summary"]["mostUtilized"], "R101");
    assert_eq!(rooms["summary"]["leastUtilized"], "Lab 1");
    assert_eq!(rooms["filters"]["maxPeriodsPerDay"], 8);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "schedule", "patch": { "maxPeriodsPerDay": 4 } }),
    );
    let rooms = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "analytics.classroomUtilization",
        json!({ "day": "Monday" }),
    );
    assert_eq!(rooms["classroomUtilization"][0]["utilizationRate"], 100.0);

    let bad_day = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "analytics.classroomUtilization",
        json!({ "day": "Funday" }),
    );
    assert_eq!(error_code(&bad_day), "bad_params");

    let workload = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "analytics.teacherWorkload",
        json!({ "department": "Maths" }),
    );
    assert_eq!(workload["teacherWorkload"][0]["name"], "Busy Bee");
    assert_eq!(workload["teacherWorkload"][0]["weeklyPeriods"], 6);
    assert_eq!(workload["teacherWorkload"][0]["dailySchedule"][0]["dayOfWeek"], "Monday");
    assert_eq!(workload["teacherWorkload"][0]["dailySchedule"][0]["periodsCount"], 5);
    assert_eq!(workload["summary"]["maxWorkload"], 6);
    assert_eq!(workload["summary"]["minWorkload"], 0);
    assert_eq!(workload["summary"]["avgWeeklyPeriods"], 3.0);

    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "analytics.curriculumProgress",
        json!({ "board": "CBSE" }),
    );
    assert_eq!(progress["curriculumProgress"][0]["subject"], "Mathematics");
    assert_eq!(progress["curriculumProgress"][0]["totalUnits"], 2);
    assert_eq!(progress["curriculumProgress"][0]["totalChapters"], 1);
    assert_eq!(progress["summary"]["totalEstimatedHours"], 35.0);
    assert_eq!(progress["filters"]["className"], "All");

    // 2024-06-03 is a Monday.
    let dashboard = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "analytics.dashboard",
        json!({ "at": "2024-06-03T08:15" }),
    );
    assert_eq!(dashboard["overview"]["totalTeachers"], 2);
    assert_eq!(dashboard["overview"]["totalTimetables"], 1);
    assert_eq!(dashboard["overview"]["currentDay"], "Monday");
    assert_eq!(dashboard["overview"]["currentTime"], "08:15");
    assert_eq!(dashboard["overview"]["academicYear"], "2024-25");
    assert_eq!(dashboard["statistics"]["teachersByDepartment"][0]["count"], 2);
    assert_eq!(
        dashboard["currentData"]["currentPeriods"].as_array().map(|p| p.len()),
        Some(5)
    );
    assert_eq!(dashboard["currentData"]["currentPeriods"][0]["subject"], "Mathematics");
    assert_eq!(dashboard["filters"]["appliedBoard"], "All");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn setup_settings_round_trip_and_bounds() {
    let workspace = temp_dir("schoold-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let defaults = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(defaults["schedule"]["maxPeriodsPerDay"], 8);
    assert_eq!(defaults["schedule"]["defaultAcademicYear"], "2024-25");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "schedule", "patch": { "defaultAcademicYear": "2025-26" } }),
    );
    assert_eq!(updated["schedule"]["defaultAcademicYear"], "2025-26");

    let too_many = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "schedule", "patch": { "maxPeriodsPerDay": 40 } }),
    );
    assert_eq!(error_code(&too_many), "bad_params");

    let unknown = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "grading", "patch": {} }),
    );
    assert_eq!(error_code(&unknown), "bad_params");

    let reread = request_ok(&mut stdin, &mut reader, "5", "setup.get", json!({}));
    assert_eq!(reread["schedule"]["defaultAcademicYear"], "2025-26");
    assert_eq!(reread["schedule"]["maxPeriodsPerDay"], 8);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn router_reports_health_unknown_methods_and_bad_json() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["status"], "running");
    assert_eq!(health["database"], "disconnected");

    let unknown = request(&mut stdin, &mut reader, "2", "timetables.teleport", json!({}));
    assert_eq!(unknown["ok"], false);
    assert_eq!(unknown["error"]["code"], "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response");
    let resp: serde_json::Value = serde_json::from_str(line.trim()).expect("json response");
    assert!(resp["id"].is_null());
    assert_eq!(resp["error"]["code"], "bad_json");

    let still_alive = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(still_alive["status"], "running");
}

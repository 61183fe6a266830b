use crate::db::Record;
use crate::ipc::error::err;
use crate::ipc::handlers::{classes, lectures, setup, subjects, syllabus, teachers, timetables};
use crate::ipc::helpers::{
    db_conn, finish, mean, opt_board, opt_str, query_failed, reference_instant, Reply,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{Board, ClassDoc, SubjectDoc, SyllabusDoc, TeacherDoc};
use crate::schedule::{DayOfWeek, Period, TimeOfDay, TimetableDoc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

const DASHBOARD_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSlot {
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub period_number: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUsage {
    pub classroom: String,
    pub periods_count: usize,
    pub utilization_rate: f64,
    pub periods: Vec<RoomSlot>,
}

fn teaching_periods<'a>(
    doc: &'a TimetableDoc,
    day: DayOfWeek,
) -> impl Iterator<Item = &'a Period> + 'a {
    doc.weekly_schedule
        .iter()
        .filter(move |d| d.day_of_week == day)
        .flat_map(|d| &d.periods)
        .filter(|p| !p.is_break)
}

/// Non-break periods of `day` grouped by classroom, busiest first.
pub fn classroom_utilization(
    timetables: &[&TimetableDoc],
    day: DayOfWeek,
    max_periods_per_day: u32,
) -> Vec<RoomUsage> {
    let mut rooms: BTreeMap<&str, Vec<RoomSlot>> = BTreeMap::new();
    for doc in timetables {
        for p in teaching_periods(doc, day) {
            rooms.entry(p.classroom.as_str()).or_default().push(RoomSlot {
                start_time: p.start_time,
                end_time: p.end_time,
                period_number: p.period_number,
            });
        }
    }
    let max = f64::from(max_periods_per_day.max(1));
    let mut out: Vec<_> = rooms
        .into_iter()
        .map(|(classroom, periods)| RoomUsage {
            classroom: classroom.to_string(),
            periods_count: periods.len(),
            utilization_rate: periods.len() as f64 / max * 100.0,
            periods,
        })
        .collect();
    out.sort_by(|a, b| {
        b.utilization_rate
            .total_cmp(&a.utilization_rate)
            .then_with(|| a.classroom.cmp(&b.classroom))
    });
    out
}

/// Weekly non-break periods taught by `teacher_id`, per day in week order.
pub fn teacher_periods(timetables: &[&TimetableDoc], teacher_id: &str) -> Vec<(DayOfWeek, usize)> {
    DayOfWeek::ALL
        .into_iter()
        .filter_map(|day| {
            let n = timetables
                .iter()
                .flat_map(|doc| teaching_periods(doc, day))
                .filter(|p| p.teacher_id.as_deref() == Some(teacher_id))
                .count();
            (n > 0).then_some((day, n))
        })
        .collect()
}

fn group_count<'a>(keys: impl Iterator<Item = &'a str>, key: &str) -> Vec<Value> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for k in keys {
        *counts.entry(k).or_insert(0) += 1;
    }
    let mut rows: Vec<_> = counts.into_iter().collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    rows.into_iter()
        .map(|(k, count)| json!({ key: k, "count": count }))
        .collect()
}

struct Snapshot {
    teachers: Vec<Record<TeacherDoc>>,
    classes: Vec<Record<ClassDoc>>,
    subjects: Vec<Record<SubjectDoc>>,
    syllabi: Vec<Record<SyllabusDoc>>,
    timetables: Vec<Record<TimetableDoc>>,
}

fn snapshot(conn: &rusqlite::Connection) -> anyhow::Result<Snapshot> {
    Ok(Snapshot {
        teachers: teachers::load_all(conn)?,
        classes: classes::load_all(conn)?,
        subjects: subjects::load_all(conn)?,
        syllabi: syllabus::load_all(conn)?,
        timetables: timetables::load_all(conn)?,
    })
}

fn handle_dashboard(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let board = opt_board(req, "board")?;
    let academic_year = opt_str(req, "academicYear");
    let at = reference_instant(req)?;
    let today = DayOfWeek::of(at);
    let settings = setup::schedule_settings(conn).map_err(|e| query_failed(req, e))?;
    let data = snapshot(conn).map_err(|e| query_failed(req, e))?;

    let year_ok = |y: &str| academic_year.as_deref().map_or(true, |want| y == want);
    let board_ok = |b: Board| board.map_or(true, |want| b == want);

    let classes: Vec<_> = data
        .classes
        .iter()
        .filter(|c| board_ok(c.doc.board) && year_ok(&c.doc.academic_year))
        .collect();
    let subjects: Vec<_> = data
        .subjects
        .iter()
        .filter(|s| board_ok(s.doc.board))
        .collect();
    let syllabi: Vec<_> = data
        .syllabi
        .iter()
        .filter(|s| board_ok(s.doc.board) && year_ok(&s.doc.academic_year))
        .collect();
    let timetable_docs: Vec<_> = data
        .timetables
        .iter()
        .filter(|t| year_ok(&t.doc.academic_year))
        .collect();

    let mut by_board: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for c in &classes {
        let e = by_board.entry(c.doc.board.as_str()).or_default();
        e.0 += 1;
        e.1 += c.doc.students.len();
    }
    let total_students: usize = by_board.values().map(|(_, n)| n).sum();
    let classes_by_board: Vec<_> = by_board
        .into_iter()
        .map(|(b, (count, students))| {
            json!({ "board": b, "count": count, "totalStudents": students })
        })
        .collect();

    let mut completion: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for s in &syllabi {
        let e = completion.entry(s.doc.class_name.as_str()).or_default();
        e.0 += 1;
        e.1 += s.doc.units.len();
    }
    let syllabus_completion: Vec<_> = completion
        .into_iter()
        .map(|(class_name, (n, units))| {
            json!({
                "className": class_name,
                "totalSyllabus": n,
                "avgUnits": mean(units as f64, n),
            })
        })
        .collect();

    let teacher_names: HashMap<&str, &str> = data
        .teachers
        .iter()
        .map(|t| (t.id.as_str(), t.doc.name.as_str()))
        .collect();
    let subject_names: HashMap<&str, &str> = data
        .subjects
        .iter()
        .map(|s| (s.id.as_str(), s.doc.name.as_str()))
        .collect();
    let class_by_id: HashMap<&str, &Record<ClassDoc>> =
        data.classes.iter().map(|c| (c.id.as_str(), c)).collect();

    let all_lectures = lectures::load_active(conn).map_err(|e| query_failed(req, e))?;
    let today_lectures: Vec<_> = lectures::active_on(&all_lectures, today)
        .into_iter()
        .take(DASHBOARD_LIMIT)
        .map(|l| {
            json!({
                "id": l.id,
                "subject": l.doc.subject,
                "teacher": l.doc.teacher.as_deref()
                    .and_then(|id| teacher_names.get(id).copied())
                    .unwrap_or("Unknown"),
                "classroom": l.doc.classroom,
                "startTime": l.doc.start_time,
                "endTime": l.doc.end_time,
                "course": l.doc.course,
            })
        })
        .collect();

    let mut periods_today = Vec::new();
    for t in &timetable_docs {
        let Some(class) = class_by_id.get(t.doc.class_id.as_str()) else {
            continue;
        };
        for p in teaching_periods(&t.doc, today) {
            periods_today.push((class, p));
        }
    }
    periods_today.sort_by(|a, b| {
        a.1.start_time
            .cmp(&b.1.start_time)
            .then_with(|| a.0.doc.class_name.cmp(&b.0.doc.class_name))
    });
    let current_periods: Vec<_> = periods_today
        .into_iter()
        .take(DASHBOARD_LIMIT)
        .map(|(class, p)| {
            json!({
                "className": class.doc.class_name,
                "section": class.doc.section,
                "subject": p.subject_id.as_deref().and_then(|id| subject_names.get(id).copied()),
                "teacher": p.teacher_id.as_deref().and_then(|id| teacher_names.get(id).copied()),
                "startTime": p.start_time,
                "endTime": p.end_time,
                "classroom": p.classroom,
                "periodNumber": p.period_number,
            })
        })
        .collect();

    let year = academic_year
        .clone()
        .unwrap_or_else(|| settings.default_academic_year.clone());

    Ok(json!({
        "overview": {
            "totalTeachers": data.teachers.len(),
            "totalClasses": classes.len(),
            "totalSubjects": subjects.len(),
            "totalSyllabus": syllabi.len(),
            "totalTimetables": timetable_docs.len(),
            "totalStudents": total_students,
            "currentTime": TimeOfDay::from_time(at.time()),
            "currentDay": today,
            "academicYear": year,
        },
        "statistics": {
            "classesByBoard": classes_by_board,
            "subjectsByCategory": group_count(subjects.iter().map(|s| s.doc.category.as_str()), "category"),
            "teachersByDepartment": group_count(data.teachers.iter().map(|t| t.doc.department.as_str()), "department"),
            "syllabusCompletion": syllabus_completion,
        },
        "currentData": {
            "todayLectures": today_lectures,
            "currentPeriods": current_periods,
        },
        "filters": {
            "appliedBoard": board.map_or("All", Board::as_str),
            "appliedAcademicYear": year,
        },
        "lastUpdated": crate::db::now_rfc3339(),
    }))
}

fn handle_curriculum_progress(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let board = opt_board(req, "board")?;
    let class_name = opt_str(req, "className");
    let data = snapshot(conn).map_err(|e| query_failed(req, e))?;
    let subject_by_id: HashMap<&str, &Record<SubjectDoc>> =
        data.subjects.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut rows: Vec<_> = data
        .syllabi
        .iter()
        .filter(|s| board.map_or(true, |b| s.doc.board == b))
        .filter(|s| class_name.as_deref().map_or(true, |c| s.doc.class_name == c))
        .filter_map(|s| subject_by_id.get(s.doc.subject.as_str()).map(|subj| (s, *subj)))
        .collect();
    rows.sort_by(|a, b| {
        a.0.doc
            .class_name
            .cmp(&b.0.doc.class_name)
            .then_with(|| a.1.doc.name.cmp(&b.1.doc.name))
    });

    let n = rows.len();
    let total_units: usize = rows.iter().map(|(s, _)| s.doc.units.len()).sum();
    let total_chapters: usize = rows.iter().map(|(s, _)| s.doc.total_chapters()).sum();
    let total_hours: f64 = rows.iter().map(|(s, _)| s.doc.total_hours()).sum();

    let progress: Vec<_> = rows
        .iter()
        .map(|(s, subject)| {
            json!({
                "id": s.id,
                "subject": subject.doc.name,
                "className": s.doc.class_name,
                "board": s.doc.board,
                "totalUnits": s.doc.units.len(),
                "totalChapters": s.doc.total_chapters(),
                "totalHours": s.doc.total_hours(),
                "evaluationScheme": s.doc.evaluation_scheme,
                "term": s.doc.term,
            })
        })
        .collect();

    Ok(json!({
        "curriculumProgress": progress,
        "summary": {
            "totalSubjects": n,
            "avgUnitsPerSubject": mean(total_units as f64, n),
            "avgChaptersPerSubject": mean(total_chapters as f64, n),
            "totalEstimatedHours": total_hours,
        },
        "filters": {
            "board": board.map_or("All", Board::as_str),
            "className": class_name.as_deref().unwrap_or("All"),
        },
    }))
}

fn handle_teacher_workload(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let department = opt_str(req, "department");
    let data = snapshot(conn).map_err(|e| query_failed(req, e))?;
    let docs: Vec<&TimetableDoc> = data.timetables.iter().map(|t| &t.doc).collect();

    let mut rows: Vec<_> = data
        .teachers
        .iter()
        .filter(|t| department.as_deref().map_or(true, |d| t.doc.department == d))
        .map(|t| {
            let daily = teacher_periods(&docs, &t.id);
            let weekly: usize = daily.iter().map(|(_, n)| n).sum();
            (t, daily, weekly)
        })
        .collect();
    rows.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.doc.name.cmp(&b.0.doc.name)));

    let loads: Vec<usize> = rows.iter().map(|r| r.2).collect();
    let workload: Vec<_> = rows
        .into_iter()
        .map(|(t, daily, weekly)| {
            json!({
                "id": t.id,
                "name": t.doc.name,
                "email": t.doc.email,
                "department": t.doc.department,
                "subjects": t.doc.subjects,
                "experience": t.doc.experience,
                "weeklyPeriods": weekly,
                "dailySchedule": daily
                    .into_iter()
                    .map(|(day, n)| json!({ "dayOfWeek": day, "periodsCount": n }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    Ok(json!({
        "teacherWorkload": workload,
        "summary": {
            "totalTeachers": loads.len(),
            "avgWeeklyPeriods": mean(loads.iter().sum::<usize>() as f64, loads.len()),
            "maxWorkload": loads.iter().copied().max().unwrap_or(0),
            "minWorkload": loads.iter().copied().min().unwrap_or(0),
        },
        "filters": { "department": department.as_deref().unwrap_or("All") },
    }))
}

fn handle_classroom_utilization(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let day = match opt_str(req, "day") {
        Some(raw) => DayOfWeek::parse(&raw).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("unknown day {:?}", raw),
                None,
            )
        })?,
        None => DayOfWeek::of(reference_instant(req)?),
    };
    let settings = setup::schedule_settings(conn).map_err(|e| query_failed(req, e))?;
    let all = timetables::load_all(conn).map_err(|e| query_failed(req, e))?;
    let docs: Vec<&TimetableDoc> = all.iter().map(|t| &t.doc).collect();

    let rooms = classroom_utilization(&docs, day, settings.max_periods_per_day);
    let avg = mean(rooms.iter().map(|r| r.utilization_rate).sum(), rooms.len());

    Ok(json!({
        "classroomUtilization": rooms,
        "summary": {
            "totalClassrooms": rooms.len(),
            "avgUtilization": avg,
            "mostUtilized": rooms.first().map_or("N/A", |r| r.classroom.as_str()),
            "leastUtilized": rooms.last().map_or("N/A", |r| r.classroom.as_str()),
        },
        "filters": {
            "day": day,
            "maxPeriodsPerDay": settings.max_periods_per_day,
        },
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let reply = match req.method.as_str() {
        "analytics.dashboard" => handle_dashboard(state, req),
        "analytics.curriculumProgress" => handle_curriculum_progress(state, req),
        "analytics.teacherWorkload" => handle_teacher_workload(state, req),
        "analytics.classroomUtilization" => handle_classroom_utilization(state, req),
        _ => return None,
    };
    Some(finish(req, reply))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timetable(days: Value) -> TimetableDoc {
        serde_json::from_value(json!({
            "classId": "c1",
            "academicYear": "2024-25",
            "effectiveFrom": "2024-04-01",
            "effectiveTo": "2025-03-31",
            "weeklySchedule": days,
        }))
        .expect("timetable")
    }

    fn period(n: u32, room: &str, teacher: &str, is_break: bool) -> Value {
        json!({
            "periodNumber": n,
            "startTime": format!("{:02}:00", 8 + n),
            "endTime": format!("{:02}:45", 8 + n),
            "subjectId": "s1",
            "teacherId": teacher,
            "classroom": room,
            "isBreak": is_break,
        })
    }

    #[test]
    fn four_periods_in_one_room_is_half_utilized() {
        let doc = timetable(json!([{
            "dayOfWeek": "Monday",
            "periods": [
                period(1, "R101", "t1", false),
                period(2, "R101", "t1", false),
                period(3, "Hall", "t1", true),
                period(4, "R101", "t2", false),
                period(5, "R101", "t2", false),
                period(6, "Lab", "t2", false),
            ],
        }]));
        let rooms = classroom_utilization(&[&doc], DayOfWeek::Monday, 8);
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].classroom, "R101");
        assert_eq!(rooms[0].periods_count, 4);
        assert_eq!(rooms[0].utilization_rate, 50.0);
        assert_eq!(rooms[1].classroom, "Lab");
        assert!(classroom_utilization(&[&doc], DayOfWeek::Tuesday, 8).is_empty());
    }

    #[test]
    fn teacher_periods_skip_breaks_and_other_teachers() {
        let doc = timetable(json!([
            { "dayOfWeek": "Monday", "periods": [period(1, "R1", "t1", false), period(2, "R1", "t1", true)] },
            { "dayOfWeek": "Wednesday", "periods": [period(1, "R1", "t1", false), period(2, "R1", "t2", false)] },
        ]));
        let daily = teacher_periods(&[&doc], "t1");
        assert_eq!(daily, vec![(DayOfWeek::Monday, 1), (DayOfWeek::Wednesday, 1)]);
        assert!(teacher_periods(&[&doc], "t9").is_empty());
    }
}

use crate::db::{self, Record};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    check, class_summary, db_conn, delete_by_id, fetch, finish, mean, merge_patch, opt_board,
    opt_str, parse_input, query_failed, reference_instant, required_str, subject_summary,
    summaries, teacher_summary, to_doc_json, write_failed, Reply,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{ClassDoc, SubjectDoc, TeacherDoc};
use crate::schedule::{
    current_and_next_period, day_schedule, resolve_active_timetable, week_view, SpecialSchedule,
    TimeOfDay, Timetable, TimetableDoc,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

const TABLE: &str = "timetables";
const NO_ACTIVE_TIMETABLE: &str = "No active timetable found for this class";
const NO_TIMETABLE: &str = "Timetable not found for this class";

pub fn load_all(conn: &Connection) -> anyhow::Result<Vec<Record<TimetableDoc>>> {
    db::load_records(
        conn,
        "SELECT id, doc, created_at, updated_at FROM timetables ORDER BY rowid",
        [],
    )
}

fn stamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp {:?}", raw))?
        .with_timezone(&Utc))
}

fn to_timetable(r: Record<TimetableDoc>) -> anyhow::Result<Timetable> {
    Ok(Timetable {
        created_at: stamp(&r.created_at)?,
        updated_at: stamp(&r.updated_at)?,
        id: r.id,
        doc: r.doc,
    })
}

/// Timetables of one class in insertion order.
pub fn load_for_class(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<Timetable>> {
    db::load_records(
        conn,
        "SELECT id, doc, created_at, updated_at FROM timetables WHERE class_id = ? ORDER BY rowid",
        [class_id],
    )?
    .into_iter()
    .map(to_timetable)
    .collect()
}

fn period_refs(doc: &TimetableDoc) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut subjects = BTreeSet::new();
    let mut teachers = BTreeSet::new();
    for p in doc.weekly_schedule.iter().flat_map(|d| &d.periods) {
        subjects.extend(p.subject_id.iter().cloned());
        teachers.extend(p.teacher_id.iter().cloned());
    }
    (subjects, teachers)
}

/// Adds the `subjects` and `teachers` lookup maps for the periods of `doc`.
fn with_refs(conn: &Connection, req: &Request, mut out: Value, doc: &TimetableDoc) -> Reply {
    let (subject_ids, teacher_ids) = period_refs(doc);
    let subjects = summaries::<SubjectDoc, _>(conn, "subjects", &subject_ids, subject_summary)
        .map_err(|e| query_failed(req, e))?;
    let teachers = summaries::<TeacherDoc, _>(conn, "teachers", &teacher_ids, teacher_summary)
        .map_err(|e| query_failed(req, e))?;
    out["subjects"] = Value::Object(subjects);
    out["teachers"] = Value::Object(teachers);
    Ok(out)
}

fn class_json(class: Option<&Record<ClassDoc>>, class_id: &str) -> Value {
    class
        .map(class_summary)
        .unwrap_or_else(|| json!({ "id": class_id }))
}

/// Full timetable with its class and period references populated.
fn render(conn: &Connection, req: &Request, r: &Record<TimetableDoc>) -> Reply {
    let class = db::load_record::<ClassDoc>(conn, "classes", &r.doc.class_id)
        .map_err(|e| query_failed(req, e))?;
    let mut v = r.to_json();
    v["class"] = class_json(class.as_ref(), &r.doc.class_id);
    with_refs(conn, req, v, &r.doc)
}

fn render_timetable(conn: &Connection, req: &Request, tt: &Timetable) -> Reply {
    render(
        conn,
        req,
        &Record {
            id: tt.id.clone(),
            doc: tt.doc.clone(),
            created_at: db_stamp(tt.created_at),
            updated_at: db_stamp(tt.updated_at),
        },
    )
}

fn db_stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn load_class(conn: &Connection, req: &Request) -> Result<Record<ClassDoc>, Value> {
    let class_id = required_str(req, "classId")?;
    fetch::<ClassDoc>(conn, req, "classes", &class_id, "Class")
}

fn class_timetables(conn: &Connection, req: &Request, class_id: &str) -> Result<Vec<Timetable>, Value> {
    load_for_class(conn, class_id).map_err(|e| query_failed(req, e))
}

/// Most recently created timetable of the class, optionally within one
/// academic year, regardless of its date range.
fn latest<'a>(timetables: &'a [Timetable], academic_year: Option<&str>) -> Option<&'a Timetable> {
    timetables
        .iter()
        .filter(|t| academic_year.map_or(true, |y| t.doc.academic_year == y))
        .max_by_key(|t| t.created_at)
}

fn handle_today(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let class = load_class(conn, req)?;
    let at = reference_instant(req)?;
    let timetables = class_timetables(conn, req, &class.id)?;
    let tt = resolve_active_timetable(&class.id, &timetables, at)
        .map_err(|_| err(&req.id, "not_found", NO_ACTIVE_TIMETABLE, None))?;

    let day = day_schedule(tt, at);
    let mut out = json!({
        "class": class_summary(&class),
        "timetableId": tt.id,
        "dayOfWeek": day.day_of_week,
        "periods": day.periods,
        "breakTimings": tt.doc.break_timings,
        "specialSchedules": day.special_schedules,
    });
    if let Some(message) = day.message {
        out["message"] = json!(message);
    }
    with_refs(conn, req, out, &tt.doc)
}

fn handle_current(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let class = load_class(conn, req)?;
    let at = reference_instant(req)?;
    let timetables = class_timetables(conn, req, &class.id)?;
    let tt = resolve_active_timetable(&class.id, &timetables, at)
        .map_err(|_| err(&req.id, "not_found", NO_ACTIVE_TIMETABLE, None))?;

    let day = day_schedule(tt, at);
    let lookup = current_and_next_period(day.periods, at);
    let mut out = json!({
        "class": class_summary(&class),
        "timetableId": tt.id,
        "dayOfWeek": day.day_of_week,
        "currentTime": TimeOfDay::from_time(at.time()),
        "currentPeriod": lookup.current_period,
        "nextPeriod": lookup.next_period,
        "allPeriodsToday": day.periods,
    });
    if let Some(message) = day.message {
        out["message"] = json!(message);
    }
    with_refs(conn, req, out, &tt.doc)
}

fn handle_week(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let class = load_class(conn, req)?;
    let academic_year = opt_str(req, "academicYear");
    let timetables = class_timetables(conn, req, &class.id)?;
    let Some(tt) = latest(&timetables, academic_year.as_deref()) else {
        return Err(err(&req.id, "not_found", NO_TIMETABLE, None));
    };

    let week = week_view(tt);
    let out = json!({
        "class": class_summary(&class),
        "timetableId": tt.id,
        "academicYear": tt.doc.academic_year,
        "weeklySchedule": week.weekly_schedule,
        "breakTimings": week.break_timings,
    });
    with_refs(conn, req, out, &tt.doc)
}

fn handle_by_class(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let class = load_class(conn, req)?;
    let academic_year = opt_str(req, "academicYear");
    let timetables = class_timetables(conn, req, &class.id)?;
    let Some(tt) = latest(&timetables, academic_year.as_deref()) else {
        return Err(err(&req.id, "not_found", NO_TIMETABLE, None));
    };
    render_timetable(conn, req, tt)
}

fn class_index(conn: &Connection, req: &Request) -> Result<HashMap<String, Record<ClassDoc>>, Value> {
    Ok(crate::ipc::handlers::classes::load_all(conn)
        .map_err(|e| query_failed(req, e))?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect())
}

fn handle_list(state: &mut AppState, req: &Request) -> Reply {
    let Ok(conn) = db_conn(state, req) else {
        return Ok(json!({ "timetables": [] }));
    };
    let academic_year = opt_str(req, "academicYear");
    let class_name = opt_str(req, "className");
    let board = opt_board(req, "board")?;

    let classes = class_index(conn, req)?;
    let mut rows: Vec<_> = load_all(conn)
        .map_err(|e| query_failed(req, e))?
        .into_iter()
        .filter(|t| {
            academic_year
                .as_deref()
                .map_or(true, |y| t.doc.academic_year == y)
        })
        .filter(|t| {
            let class = classes.get(&t.doc.class_id);
            class_name
                .as_deref()
                .map_or(true, |n| class.is_some_and(|c| c.doc.class_name == n))
                && board.map_or(true, |b| class.is_some_and(|c| c.doc.board == b))
        })
        .collect();
    let sort_key = |t: &Record<TimetableDoc>| {
        classes
            .get(&t.doc.class_id)
            .map(|c| (c.doc.class_name.clone(), c.doc.section.clone()))
            .unwrap_or_default()
    };
    rows.sort_by_key(sort_key);

    let mut out = Vec::with_capacity(rows.len());
    for r in &rows {
        let mut v = r.to_json();
        v["class"] = class_json(classes.get(&r.doc.class_id), &r.doc.class_id);
        out.push(v);
    }
    Ok(json!({ "timetables": out }))
}

fn handle_get(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let tt = fetch::<TimetableDoc>(conn, req, TABLE, &id, "Timetable")?;
    render(conn, req, &tt)
}

fn handle_stats(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let academic_year = opt_str(req, "academicYear");
    let board = opt_board(req, "board")?;
    let classes = class_index(conn, req)?;
    let rows: Vec<_> = load_all(conn)
        .map_err(|e| query_failed(req, e))?
        .into_iter()
        .filter(|t| {
            academic_year
                .as_deref()
                .map_or(true, |y| t.doc.academic_year == y)
        })
        .collect();

    let mut by_class: BTreeMap<&str, usize> = BTreeMap::new();
    for t in &rows {
        if let Some(c) = classes.get(&t.doc.class_id) {
            if board.map_or(true, |b| c.doc.board == b) {
                *by_class.entry(c.doc.class_name.as_str()).or_insert(0) += 1;
            }
        }
    }
    let by_class: Vec<_> = by_class
        .into_iter()
        .map(|(class_name, count)| json!({ "className": class_name, "count": count }))
        .collect();

    let days: Vec<usize> = rows
        .iter()
        .flat_map(|t| t.doc.weekly_schedule.iter().map(|d| d.periods.len()))
        .collect();
    let total_periods: usize = days.iter().sum();

    Ok(json!({
        "totalTimetables": rows.len(),
        "timetablesByClass": by_class,
        "avgPeriodsPerDay": {
            "avgPeriods": mean(total_periods as f64, days.len()),
            "totalPeriods": total_periods,
            "totalDays": days.len(),
        },
    }))
}

fn ensure_class(conn: &Connection, req: &Request, class_id: &str) -> Result<(), Value> {
    match db::row_exists(conn, "classes", class_id) {
        Ok(true) => Ok(()),
        Ok(false) => check(req, vec![format!("classId {} does not exist", class_id)]),
        Err(e) => Err(query_failed(req, e)),
    }
}

fn date_column(d: chrono::NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn normalize(doc: &mut TimetableDoc) {
    doc.class_id = doc.class_id.trim().to_string();
    doc.academic_year = doc.academic_year.trim().to_string();
}

fn handle_create(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let mut doc: TimetableDoc = parse_input(req, "input")?;
    normalize(&mut doc);
    check(req, doc.validate())?;
    ensure_class(conn, req, &doc.class_id)?;

    let id = Uuid::new_v4().to_string();
    let ts = db::now_rfc3339();
    conn.execute(
        "INSERT INTO timetables(id, class_id, academic_year, effective_from, effective_to, doc, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &doc.class_id,
            &doc.academic_year,
            date_column(doc.effective_from),
            date_column(doc.effective_to),
            to_doc_json(req, &doc)?,
            &ts,
            &ts,
        ),
    )
    .map_err(|e| write_failed(req, "db_insert_failed", TABLE, e))?;
    log::info!("timetable {} created for class {}", id, doc.class_id);

    render(
        conn,
        req,
        &Record {
            id,
            doc,
            created_at: ts.clone(),
            updated_at: ts,
        },
    )
}

fn save(
    conn: &Connection,
    req: &Request,
    current: Record<TimetableDoc>,
    mut doc: TimetableDoc,
) -> Reply {
    normalize(&mut doc);
    check(req, doc.validate())?;
    if doc.class_id != current.doc.class_id {
        ensure_class(conn, req, &doc.class_id)?;
    }

    let ts = db::now_rfc3339();
    conn.execute(
        "UPDATE timetables SET class_id = ?, academic_year = ?, effective_from = ?, effective_to = ?,
           doc = ?, updated_at = ?
         WHERE id = ?",
        (
            &doc.class_id,
            &doc.academic_year,
            date_column(doc.effective_from),
            date_column(doc.effective_to),
            to_doc_json(req, &doc)?,
            &ts,
            &current.id,
        ),
    )
    .map_err(|e| write_failed(req, "db_update_failed", TABLE, e))?;

    render(
        conn,
        req,
        &Record {
            id: current.id,
            doc,
            created_at: current.created_at,
            updated_at: ts,
        },
    )
}

fn handle_update(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let current = fetch::<TimetableDoc>(conn, req, TABLE, &id, "Timetable")?;
    let doc = merge_patch(req, &current.doc)?;
    save(conn, req, current, doc)
}

fn handle_delete(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    delete_by_id(conn, req, TABLE, "Timetable")
}

fn handle_special_add(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let special: SpecialSchedule = parse_input(req, "special")?;
    let current = fetch::<TimetableDoc>(conn, req, TABLE, &id, "Timetable")?;
    let mut doc = current.doc.clone();
    doc.special_schedules.push(special);
    save(conn, req, current, doc)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let reply = match req.method.as_str() {
        "timetables.list" => handle_list(state, req),
        "timetables.get" => handle_get(state, req),
        "timetables.byClass" => handle_by_class(state, req),
        "timetables.today" => handle_today(state, req),
        "timetables.current" => handle_current(state, req),
        "timetables.week" => handle_week(state, req),
        "timetables.stats" => handle_stats(state, req),
        "timetables.create" => handle_create(state, req),
        "timetables.update" => handle_update(state, req),
        "timetables.delete" => handle_delete(state, req),
        "timetables.special.add" => handle_special_add(state, req),
        _ => return None,
    };
    Some(finish(req, reply))
}

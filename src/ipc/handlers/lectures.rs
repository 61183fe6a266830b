use crate::db::{self, Record};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    check, db_conn, delete_by_id, fetch, finish, merge_patch, parse_input, query_failed,
    reference_instant, required_str, teacher_summary, to_doc_json, write_failed, Reply,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{LectureDoc, TeacherDoc};
use crate::schedule::{DayOfWeek, TimeOfDay};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

const TABLE: &str = "lectures";

/// Active lectures ordered by start time.
pub fn load_active(conn: &Connection) -> anyhow::Result<Vec<Record<LectureDoc>>> {
    db::load_records(
        conn,
        "SELECT id, doc, created_at, updated_at FROM lectures
         WHERE is_active = 1
         ORDER BY start_time, rowid",
        [],
    )
}

pub fn active_on(lectures: &[Record<LectureDoc>], day: DayOfWeek) -> Vec<&Record<LectureDoc>> {
    lectures.iter().filter(|l| l.doc.day_of_week == day).collect()
}

/// The first lecture today starting strictly after `now`; failing that, the
/// earliest lecture on the following days, wrapping round to today.
pub fn next_lecture(
    lectures: &[Record<LectureDoc>],
    today: DayOfWeek,
    now: TimeOfDay,
) -> Option<&Record<LectureDoc>> {
    if let Some(l) = lectures
        .iter()
        .filter(|l| l.doc.day_of_week == today && l.doc.start_time > now)
        .min_by_key(|l| l.doc.start_time)
    {
        return Some(l);
    }
    (1..=7)
        .map(|offset| DayOfWeek::ALL[(today.index() + offset) % 7])
        .find_map(|day| {
            lectures
                .iter()
                .filter(|l| l.doc.day_of_week == day)
                .min_by_key(|l| l.doc.start_time)
        })
}

fn teacher_index(conn: &Connection, req: &Request) -> Result<HashMap<String, Record<TeacherDoc>>, Value> {
    Ok(crate::ipc::handlers::teachers::load_all(conn)
        .map_err(|e| query_failed(req, e))?
        .into_iter()
        .map(|t| (t.id.clone(), t))
        .collect())
}

fn lecture_json(r: &Record<LectureDoc>, teachers: &HashMap<String, Record<TeacherDoc>>) -> Value {
    let mut v = r.to_json();
    if let Some(id) = &r.doc.teacher {
        v["teacher"] = teachers
            .get(id)
            .map(teacher_summary)
            .unwrap_or_else(|| json!({ "id": id }));
    }
    v
}

fn render_list<'a>(
    conn: &Connection,
    req: &Request,
    lectures: impl IntoIterator<Item = &'a Record<LectureDoc>>,
) -> Result<Vec<Value>, Value> {
    let teachers = teacher_index(conn, req)?;
    Ok(lectures
        .into_iter()
        .map(|l| lecture_json(l, &teachers))
        .collect())
}

fn render_one(conn: &Connection, req: &Request, r: &Record<LectureDoc>) -> Reply {
    Ok(render_list(conn, req, [r])?.pop().unwrap_or(Value::Null))
}

fn handle_list(state: &mut AppState, req: &Request) -> Reply {
    let Ok(conn) = db_conn(state, req) else {
        return Ok(json!({ "lectures": [] }));
    };
    let lectures = load_active(conn).map_err(|e| query_failed(req, e))?;
    Ok(json!({ "lectures": render_list(conn, req, &lectures)? }))
}

fn handle_get(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let lecture = fetch::<LectureDoc>(conn, req, TABLE, &id, "Lecture")?;
    render_one(conn, req, &lecture)
}

fn ensure_teacher(conn: &Connection, req: &Request, doc: &LectureDoc) -> Result<(), Value> {
    let Some(id) = &doc.teacher else {
        return Ok(());
    };
    match db::row_exists(conn, "teachers", id) {
        Ok(true) => Ok(()),
        Ok(false) => check(req, vec![format!("teacher {} does not exist", id)]),
        Err(e) => Err(query_failed(req, e)),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let doc: LectureDoc = parse_input(req, "input")?;
    check(req, doc.validate())?;
    ensure_teacher(conn, req, &doc)?;

    let id = Uuid::new_v4().to_string();
    let ts = db::now_rfc3339();
    conn.execute(
        "INSERT INTO lectures(id, teacher_id, day_of_week, start_time, is_active, doc, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &doc.teacher,
            doc.day_of_week.as_str(),
            doc.start_time.to_string(),
            doc.is_active,
            to_doc_json(req, &doc)?,
            &ts,
            &ts,
        ),
    )
    .map_err(|e| write_failed(req, "db_insert_failed", TABLE, e))?;

    render_one(
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

fn handle_update(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let current = fetch::<LectureDoc>(conn, req, TABLE, &id, "Lecture")?;
    let doc: LectureDoc = merge_patch(req, &current.doc)?;
    check(req, doc.validate())?;
    if doc.teacher != current.doc.teacher {
        ensure_teacher(conn, req, &doc)?;
    }

    let ts = db::now_rfc3339();
    conn.execute(
        "UPDATE lectures SET teacher_id = ?, day_of_week = ?, start_time = ?, is_active = ?,
           doc = ?, updated_at = ?
         WHERE id = ?",
        (
            &doc.teacher,
            doc.day_of_week.as_str(),
            doc.start_time.to_string(),
            doc.is_active,
            to_doc_json(req, &doc)?,
            &ts,
            &id,
        ),
    )
    .map_err(|e| write_failed(req, "db_update_failed", TABLE, e))?;

    render_one(
        conn,
        req,
        &Record {
            id,
            doc,
            created_at: current.created_at,
            updated_at: ts,
        },
    )
}

fn handle_delete(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    delete_by_id(conn, req, TABLE, "Lecture")
}

fn handle_schedule_today(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let at = reference_instant(req)?;
    let day = DayOfWeek::of(at);
    let lectures = load_active(conn).map_err(|e| query_failed(req, e))?;
    Ok(json!({
        "dayOfWeek": day,
        "lectures": render_list(conn, req, active_on(&lectures, day))?,
    }))
}

fn handle_schedule_week(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let lectures = load_active(conn).map_err(|e| query_failed(req, e))?;
    let mut week = Map::new();
    for day in DayOfWeek::ALL {
        let on_day = active_on(&lectures, day);
        if !on_day.is_empty() {
            week.insert(day.as_str().to_string(), json!(render_list(conn, req, on_day)?));
        }
    }
    Ok(Value::Object(week))
}

fn handle_schedule_next(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let at = reference_instant(req)?;
    let lectures = load_active(conn).map_err(|e| query_failed(req, e))?;
    match next_lecture(&lectures, DayOfWeek::of(at), TimeOfDay::from_time(at.time())) {
        Some(l) => render_one(conn, req, l),
        None => Err(err(&req.id, "not_found", "No upcoming lectures found", None)),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let reply = match req.method.as_str() {
        "lectures.list" => handle_list(state, req),
        "lectures.get" => handle_get(state, req),
        "lectures.create" => handle_create(state, req),
        "lectures.update" => handle_update(state, req),
        "lectures.delete" => handle_delete(state, req),
        "schedule.today" => handle_schedule_today(state, req),
        "schedule.week" => handle_schedule_week(state, req),
        "schedule.next" => handle_schedule_next(state, req),
        _ => return None,
    };
    Some(finish(req, reply))
}

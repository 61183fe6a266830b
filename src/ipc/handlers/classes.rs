use crate::db::{self, Record};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    check, db_conn, delete_by_id, fetch, finish, merge_patch, opt_board, opt_str, parse_input,
    query_failed, required_str, teacher_summary, to_doc_json, write_failed, Reply,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{Board, ClassDoc, Student};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

const TABLE: &str = "classes";

pub fn load_all(conn: &Connection) -> anyhow::Result<Vec<Record<ClassDoc>>> {
    db::load_records(
        conn,
        "SELECT id, doc, created_at, updated_at FROM classes
         ORDER BY class_name, section, rowid",
        [],
    )
}

/// Class document with `totalStudents` and a populated `classTeacher`.
fn class_json(r: &Record<ClassDoc>, teachers: &HashMap<String, Value>) -> Value {
    let mut v = r.to_json();
    v["totalStudents"] = json!(r.doc.students.len());
    v["classTeacher"] = teachers
        .get(&r.doc.class_teacher)
        .cloned()
        .unwrap_or_else(|| json!({ "id": r.doc.class_teacher }));
    v
}

fn teacher_index(conn: &Connection) -> anyhow::Result<HashMap<String, Value>> {
    Ok(crate::ipc::handlers::teachers::load_all(conn)?
        .iter()
        .map(|t| (t.id.clone(), teacher_summary(t)))
        .collect())
}

fn render(
    conn: &Connection,
    req: &Request,
    classes: &[Record<ClassDoc>],
) -> Result<Vec<Value>, Value> {
    let teachers = teacher_index(conn).map_err(|e| query_failed(req, e))?;
    Ok(classes.iter().map(|c| class_json(c, &teachers)).collect())
}

fn render_one(conn: &Connection, req: &Request, class: &Record<ClassDoc>) -> Reply {
    Ok(render(conn, req, std::slice::from_ref(class))?
        .pop()
        .unwrap_or(Value::Null))
}

fn ensure_teacher(conn: &Connection, req: &Request, teacher_id: &str) -> Result<(), Value> {
    match db::row_exists(conn, "teachers", teacher_id) {
        Ok(true) => Ok(()),
        Ok(false) => check(
            req,
            vec![format!("classTeacher {} does not exist", teacher_id)],
        ),
        Err(e) => Err(query_failed(req, e)),
    }
}

fn list_filtered(conn: &Connection, req: &Request, board: Option<Board>) -> Reply {
    let academic_year = opt_str(req, "academicYear");
    let classes = load_all(conn).map_err(|e| query_failed(req, e))?;
    let classes: Vec<_> = classes
        .into_iter()
        .filter(|c| board.map_or(true, |b| c.doc.board == b))
        .filter(|c| {
            academic_year
                .as_deref()
                .map_or(true, |y| c.doc.academic_year == y)
        })
        .collect();
    Ok(json!({ "classes": render(conn, req, &classes)? }))
}

fn handle_list(state: &mut AppState, req: &Request) -> Reply {
    let Ok(conn) = db_conn(state, req) else {
        return Ok(json!({ "classes": [] }));
    };
    let board = opt_board(req, "board")?;
    list_filtered(conn, req, board)
}

fn handle_by_board(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    if opt_str(req, "board").is_none() {
        return Err(err(&req.id, "bad_params", "missing board", None));
    }
    let board = opt_board(req, "board")?;
    list_filtered(conn, req, board)
}

fn handle_get(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let class = fetch::<ClassDoc>(conn, req, TABLE, &id, "Class")?;
    render_one(conn, req, &class)
}

fn handle_stats(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let classes = load_all(conn).map_err(|e| query_failed(req, e))?;

    let count_board = |b: Board| classes.iter().filter(|c| c.doc.board == b).count();
    let total_students: usize = classes.iter().map(|c| c.doc.students.len()).sum();

    let mut by_level: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for c in &classes {
        let e = by_level.entry(c.doc.class_name.as_str()).or_default();
        e.0 += 1;
        e.1 += c.doc.students.len();
    }
    let classes_by_level: Vec<_> = by_level
        .into_iter()
        .map(|(name, (count, students))| {
            json!({ "className": name, "count": count, "totalStudents": students })
        })
        .collect();

    Ok(json!({
        "totalClasses": classes.len(),
        "cbseClasses": count_board(Board::Cbse),
        "icseClasses": count_board(Board::Icse),
        "totalStudents": total_students,
        "classesByLevel": classes_by_level,
    }))
}

fn write_columns(
    conn: &Connection,
    req: &Request,
    id: &str,
    doc: &ClassDoc,
    insert: bool,
) -> Result<String, Value> {
    let ts = db::now_rfc3339();
    let doc_json = to_doc_json(req, doc)?;
    let board = doc.board.as_str();
    if insert {
        conn
            .execute(
                "INSERT INTO classes(id, class_name, section, board, academic_year, class_teacher_id, doc, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    id,
                    &doc.class_name,
                    &doc.section,
                    board,
                    &doc.academic_year,
                    &doc.class_teacher,
                    &doc_json,
                    &ts,
                    &ts,
                ),
            )
            .map_err(|e| write_failed(req, "db_insert_failed", TABLE, e))?;
    } else {
        conn
            .execute(
                "UPDATE classes SET class_name = ?, section = ?, board = ?, academic_year = ?,
                   class_teacher_id = ?, doc = ?, updated_at = ?
                 WHERE id = ?",
                (
                    &doc.class_name,
                    &doc.section,
                    board,
                    &doc.academic_year,
                    &doc.class_teacher,
                    &doc_json,
                    &ts,
                    id,
                ),
            )
            .map_err(|e| write_failed(req, "db_update_failed", TABLE, e))?;
    }
    Ok(ts)
}

fn handle_create(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let mut doc: ClassDoc = parse_input(req, "input")?;
    doc.normalize();
    check(req, doc.validate())?;
    ensure_teacher(conn, req, &doc.class_teacher)?;

    let id = Uuid::new_v4().to_string();
    let ts = write_columns(conn, req, &id, &doc, true)?;
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

/// Re-validates and stores a changed class document.
fn save(conn: &Connection, req: &Request, current: Record<ClassDoc>, mut doc: ClassDoc) -> Reply {
    doc.normalize();
    check(req, doc.validate())?;
    if doc.class_teacher != current.doc.class_teacher {
        ensure_teacher(conn, req, &doc.class_teacher)?;
    }
    let ts = write_columns(conn, req, &current.id, &doc, false)?;
    render_one(
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
    let current = fetch::<ClassDoc>(conn, req, TABLE, &id, "Class")?;
    let doc = merge_patch(req, &current.doc)?;
    save(conn, req, current, doc)
}

fn handle_delete(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    delete_by_id(conn, req, TABLE, "Class")
}

fn handle_students_add(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let student: Student = parse_input(req, "student")?;
    let current = fetch::<ClassDoc>(conn, req, TABLE, &id, "Class")?;

    let roll = student.roll_number.trim();
    if current.doc.students.iter().any(|s| s.roll_number == roll) {
        return Err(err(
            &req.id,
            "duplicate_key",
            "Student with this roll number already exists in the class",
            Some(json!({ "rollNumber": roll })),
        ));
    }
    let mut doc = current.doc.clone();
    doc.students.push(Student {
        id: String::new(),
        ..student
    });
    save(conn, req, current, doc)
}

fn handle_students_remove(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let student_id = required_str(req, "studentId")?;
    let current = fetch::<ClassDoc>(conn, req, TABLE, &id, "Class")?;
    let mut doc = current.doc.clone();
    doc.students.retain(|s| s.id != student_id);
    save(conn, req, current, doc)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let reply = match req.method.as_str() {
        "classes.list" => handle_list(state, req),
        "classes.get" => handle_get(state, req),
        "classes.byBoard" => handle_by_board(state, req),
        "classes.stats" => handle_stats(state, req),
        "classes.create" => handle_create(state, req),
        "classes.update" => handle_update(state, req),
        "classes.delete" => handle_delete(state, req),
        "classes.students.add" => handle_students_add(state, req),
        "classes.students.remove" => handle_students_remove(state, req),
        _ => return None,
    };
    Some(finish(req, reply))
}

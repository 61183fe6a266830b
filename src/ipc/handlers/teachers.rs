use crate::db::{self, Record};
use crate::ipc::helpers::{
    check, db_conn, delete_by_id, fetch, finish, merge_patch, opt_str, parse_input, query_failed,
    required_str, to_doc_json, write_failed, Reply,
};
use crate::ipc::types::{AppState, Request};
use crate::models::TeacherDoc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const TABLE: &str = "teachers";

pub fn load_all(conn: &Connection) -> anyhow::Result<Vec<Record<TeacherDoc>>> {
    db::load_records(
        conn,
        "SELECT id, doc, created_at, updated_at FROM teachers ORDER BY name, rowid",
        [],
    )
}

fn handle_list(state: &mut AppState, req: &Request) -> Reply {
    let Ok(conn) = db_conn(state, req) else {
        return Ok(json!({ "teachers": [] }));
    };
    let department = opt_str(req, "department");
    let teachers = load_all(conn).map_err(|e| query_failed(req, e))?;
    let teachers: Vec<_> = teachers
        .iter()
        .filter(|t| department.as_deref().map_or(true, |d| t.doc.department == d))
        .map(|t| t.to_json())
        .collect();
    Ok(json!({ "teachers": teachers }))
}

fn handle_get(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let teacher = fetch::<TeacherDoc>(conn, req, TABLE, &id, "Teacher")?;
    Ok(teacher.to_json())
}

fn handle_create(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let mut doc: TeacherDoc = parse_input(req, "input")?;
    doc.normalize();
    check(req, doc.validate())?;

    let id = Uuid::new_v4().to_string();
    let ts = db::now_rfc3339();
    conn.execute(
        "INSERT INTO teachers(id, name, email, department, doc, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &doc.name,
            &doc.email,
            &doc.department,
            to_doc_json(req, &doc)?,
            &ts,
            &ts,
        ),
    )
    .map_err(|e| write_failed(req, "db_insert_failed", TABLE, e))?;

    Ok(Record {
        id,
        doc,
        created_at: ts.clone(),
        updated_at: ts,
    }
    .to_json())
}

fn handle_update(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let current = fetch::<TeacherDoc>(conn, req, TABLE, &id, "Teacher")?;
    let mut doc = merge_patch(req, &current.doc)?;
    doc.normalize();
    check(req, doc.validate())?;

    let ts = db::now_rfc3339();
    conn.execute(
        "UPDATE teachers SET name = ?, email = ?, department = ?, doc = ?, updated_at = ?
         WHERE id = ?",
        (
            &doc.name,
            &doc.email,
            &doc.department,
            to_doc_json(req, &doc)?,
            &ts,
            &id,
        ),
    )
    .map_err(|e| write_failed(req, "db_update_failed", TABLE, e))?;

    Ok(Record {
        id,
        doc,
        created_at: current.created_at,
        updated_at: ts,
    }
    .to_json())
}

fn handle_delete(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    delete_by_id(conn, req, TABLE, "Teacher")
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let reply = match req.method.as_str() {
        "teachers.list" => handle_list(state, req),
        "teachers.get" => handle_get(state, req),
        "teachers.create" => handle_create(state, req),
        "teachers.update" => handle_update(state, req),
        "teachers.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(finish(req, reply))
}

use crate::db::{self, ConstraintKind, Record};
use crate::ipc::error::{err, not_found, ok, validation_failed};
use crate::ipc::types::{AppState, Request};
use crate::models::{Board, ClassDoc, SubjectDoc, TeacherDoc};
use chrono::{DateTime, Local, NaiveDateTime};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Handlers build their result or a finished error response.
pub type Reply = Result<Value, Value>;

pub fn finish(req: &Request, reply: Reply) -> Value {
    match reply {
        Ok(result) => ok(&req.id, result),
        Err(resp) => resp,
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Optional string filter; blank counts as absent.
pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn opt_board(req: &Request, key: &str) -> Result<Option<Board>, Value> {
    match opt_str(req, key) {
        None => Ok(None),
        Some(s) => Board::parse(&s).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be one of: CBSE, ICSE, State Board", key),
                None,
            )
        }),
    }
}

/// The instant schedule lookups are evaluated at: `params.at` when given,
/// otherwise the local wall clock.
pub fn reference_instant(req: &Request) -> Result<NaiveDateTime, Value> {
    let Some(raw) = opt_str(req, "at") else {
        return Ok(Local::now().naive_local());
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Local).naive_local());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&raw, fmt) {
            return Ok(dt);
        }
    }
    Err(err(
        &req.id,
        "bad_params",
        format!("invalid at {:?}: expected RFC 3339 or YYYY-MM-DDTHH:MM", raw),
        None,
    ))
}

pub fn parse_input<T: DeserializeOwned>(req: &Request, key: &str) -> Result<T, Value> {
    let Some(raw) = req.params.get(key).filter(|v| v.is_object()) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    serde_json::from_value(raw.clone()).map_err(|e| validation_failed(&req.id, vec![e.to_string()]))
}

/// Applies `params.patch` over the stored document; `null` clears a field.
pub fn merge_patch<T: Serialize + DeserializeOwned>(req: &Request, current: &T) -> Result<T, Value> {
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "missing patch", None));
    };
    let mut merged = serde_json::to_value(current)
        .map_err(|e| err(&req.id, "internal", e.to_string(), None))?;
    if let Some(obj) = merged.as_object_mut() {
        for (k, v) in patch {
            if matches!(k.as_str(), "id" | "createdAt" | "updatedAt") {
                continue;
            }
            if v.is_null() {
                obj.remove(k);
            } else {
                obj.insert(k.clone(), v.clone());
            }
        }
    }
    serde_json::from_value(merged).map_err(|e| validation_failed(&req.id, vec![e.to_string()]))
}

pub fn check(req: &Request, errors: Vec<String>) -> Result<(), Value> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(validation_failed(&req.id, errors))
    }
}

/// Maps a failed write to the caller-visible condition.
pub fn write_failed(req: &Request, code: &str, table: &str, e: rusqlite::Error) -> Value {
    match db::constraint_kind(&e) {
        Some(ConstraintKind::Unique) => err(
            &req.id,
            "duplicate_key",
            format!("a record with the same key already exists in {}", table),
            Some(json!({ "table": table })),
        ),
        Some(ConstraintKind::ForeignKey) => err(
            &req.id,
            "in_use",
            format!("{} record is referenced by other records", table),
            Some(json!({ "table": table })),
        ),
        None => {
            log::warn!("{} on {} failed: {}", code, table, e);
            err(&req.id, code, e.to_string(), Some(json!({ "table": table })))
        }
    }
}

pub fn query_failed(req: &Request, e: impl std::fmt::Display) -> Value {
    log::warn!("{} query failed: {}", req.method, e);
    err(&req.id, "db_query_failed", e.to_string(), None)
}

pub fn to_doc_json<T: Serialize>(req: &Request, doc: &T) -> Result<String, Value> {
    serde_json::to_string(doc).map_err(|e| err(&req.id, "internal", e.to_string(), None))
}

pub fn fetch<T: DeserializeOwned>(
    conn: &Connection,
    req: &Request,
    table: &str,
    id: &str,
    what: &str,
) -> Result<Record<T>, Value> {
    match db::load_record(conn, table, id) {
        Ok(Some(r)) => Ok(r),
        Ok(None) => Err(not_found(&req.id, what)),
        Err(e) => Err(query_failed(req, e)),
    }
}

pub fn delete_by_id(conn: &Connection, req: &Request, table: &str, what: &str) -> Reply {
    let id = required_str(req, "id")?;
    let sql = format!("DELETE FROM {} WHERE id = ?", table);
    let n = conn
        .execute(&sql, [&id])
        .map_err(|e| write_failed(req, "db_delete_failed", table, e))?;
    if n == 0 {
        return Err(not_found(&req.id, what));
    }
    Ok(json!({ "message": format!("{} deleted successfully", what), "id": id }))
}

pub fn mean(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

pub fn teacher_summary(r: &Record<TeacherDoc>) -> Value {
    json!({
        "id": r.id,
        "name": r.doc.name,
        "email": r.doc.email,
        "department": r.doc.department,
        "phone": r.doc.phone,
        "office": r.doc.office,
    })
}

pub fn class_summary(r: &Record<ClassDoc>) -> Value {
    json!({
        "id": r.id,
        "className": r.doc.class_name,
        "section": r.doc.section,
        "board": r.doc.board,
        "academicYear": r.doc.academic_year,
        "totalStudents": r.doc.students.len(),
    })
}

pub fn subject_summary(r: &Record<SubjectDoc>) -> Value {
    json!({
        "id": r.id,
        "name": r.doc.name,
        "code": r.doc.code,
        "category": r.doc.category,
        "board": r.doc.board,
    })
}

/// id -> summary for every id that still resolves; dangling ids are skipped.
pub fn summaries<T, F>(
    conn: &Connection,
    table: &str,
    ids: &BTreeSet<String>,
    summarize: F,
) -> anyhow::Result<Map<String, Value>>
where
    T: DeserializeOwned,
    F: Fn(&Record<T>) -> Value,
{
    let mut out = Map::new();
    for id in ids {
        if let Some(r) = db::load_record::<T>(conn, table, id)? {
            out.insert(id.clone(), summarize(&r));
        }
    }
    Ok(out)
}

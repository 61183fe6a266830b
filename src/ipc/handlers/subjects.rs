use crate::db::{self, Record};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    check, db_conn, delete_by_id, fetch, finish, merge_patch, opt_board, opt_str, parse_input,
    query_failed, required_str, to_doc_json, write_failed, Reply,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{Board, SubjectCategory, SubjectClass, SubjectDoc};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

const TABLE: &str = "subjects";

pub fn load_all(conn: &Connection) -> anyhow::Result<Vec<Record<SubjectDoc>>> {
    db::load_records(
        conn,
        "SELECT id, doc, created_at, updated_at FROM subjects ORDER BY name, rowid",
        [],
    )
}

fn opt_category(req: &Request) -> Result<Option<SubjectCategory>, Value> {
    match opt_str(req, "category") {
        None => Ok(None),
        Some(s) => SubjectCategory::parse(&s).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "category must be one of: Core, Language, Elective, Activity, Skill",
                None,
            )
        }),
    }
}

#[derive(Default)]
struct Filter {
    board: Option<Board>,
    category: Option<SubjectCategory>,
    class_name: Option<String>,
}

impl Filter {
    fn from_req(req: &Request) -> Result<Self, Value> {
        Ok(Self {
            board: opt_board(req, "board")?,
            category: opt_category(req)?,
            class_name: opt_str(req, "className"),
        })
    }

    fn matches(&self, s: &SubjectDoc) -> bool {
        self.board.map_or(true, |b| s.board == b)
            && self.category.map_or(true, |c| s.category == c)
            && self
                .class_name
                .as_deref()
                .map_or(true, |n| s.offers(n).is_some())
    }
}

fn select(conn: &Connection, req: &Request, filter: &Filter) -> Result<Vec<Record<SubjectDoc>>, Value> {
    let subjects = load_all(conn).map_err(|e| query_failed(req, e))?;
    Ok(subjects
        .into_iter()
        .filter(|s| filter.matches(&s.doc))
        .collect())
}

fn to_list(subjects: &[Record<SubjectDoc>]) -> Value {
    json!({ "subjects": subjects.iter().map(|s| s.to_json()).collect::<Vec<_>>() })
}

fn handle_list(state: &mut AppState, req: &Request) -> Reply {
    let Ok(conn) = db_conn(state, req) else {
        return Ok(json!({ "subjects": [] }));
    };
    let filter = Filter::from_req(req)?;
    Ok(to_list(&select(conn, req, &filter)?))
}

fn handle_get(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    Ok(fetch::<SubjectDoc>(conn, req, TABLE, &id, "Subject")?.to_json())
}

fn handle_by_board(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    required_str(req, "board")?;
    let filter = Filter {
        board: opt_board(req, "board")?,
        ..Filter::default()
    };
    let mut subjects = select(conn, req, &filter)?;
    subjects.sort_by(|a, b| {
        a.doc
            .category
            .as_str()
            .cmp(b.doc.category.as_str())
            .then_with(|| a.doc.name.cmp(&b.doc.name))
    });
    Ok(to_list(&subjects))
}

fn handle_by_category(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    required_str(req, "category")?;
    let filter = Filter {
        board: opt_board(req, "board")?,
        category: opt_category(req)?,
        ..Filter::default()
    };
    Ok(to_list(&select(conn, req, &filter)?))
}

fn handle_for_class(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let class_name = required_str(req, "className")?;
    let filter = Filter {
        board: opt_board(req, "board")?,
        class_name: Some(class_name.clone()),
        ..Filter::default()
    };
    let subjects: Vec<_> = select(conn, req, &filter)?
        .iter()
        .map(|s| {
            let mut v = s.to_json();
            v["classSpecificData"] = json!(s.doc.offers(&class_name));
            v
        })
        .collect();
    Ok(json!({ "className": class_name, "subjects": subjects }))
}

fn counts<K: Ord>(keys: impl Iterator<Item = K>) -> BTreeMap<K, usize> {
    let mut out = BTreeMap::new();
    for k in keys {
        *out.entry(k).or_insert(0) += 1;
    }
    out
}

fn handle_stats(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let subjects = load_all(conn).map_err(|e| query_failed(req, e))?;
    let count_board = |b: Board| subjects.iter().filter(|s| s.doc.board == b).count();

    let by_category: Vec<_> = counts(subjects.iter().map(|s| s.doc.category.as_str()))
        .into_iter()
        .map(|(category, count)| json!({ "category": category, "count": count }))
        .collect();
    let by_board: Vec<_> = counts(subjects.iter().map(|s| s.doc.board.as_str()))
        .into_iter()
        .map(|(board, count)| json!({ "board": board, "count": count }))
        .collect();

    Ok(json!({
        "totalSubjects": subjects.len(),
        "cbseSubjects": count_board(Board::Cbse),
        "icseSubjects": count_board(Board::Icse),
        "subjectsByCategory": by_category,
        "subjectsByBoard": by_board,
    }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let mut doc: SubjectDoc = parse_input(req, "input")?;
    doc.normalize();
    check(req, doc.validate())?;

    let id = Uuid::new_v4().to_string();
    let ts = db::now_rfc3339();
    conn.execute(
        "INSERT INTO subjects(id, name, code, board, category, doc, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &doc.name,
            &doc.code,
            doc.board.as_str(),
            doc.category.as_str(),
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

fn save(conn: &Connection, req: &Request, current: Record<SubjectDoc>, mut doc: SubjectDoc) -> Reply {
    doc.normalize();
    check(req, doc.validate())?;

    let ts = db::now_rfc3339();
    conn.execute(
        "UPDATE subjects SET name = ?, code = ?, board = ?, category = ?, doc = ?, updated_at = ?
         WHERE id = ?",
        (
            &doc.name,
            &doc.code,
            doc.board.as_str(),
            doc.category.as_str(),
            to_doc_json(req, &doc)?,
            &ts,
            &current.id,
        ),
    )
    .map_err(|e| write_failed(req, "db_update_failed", TABLE, e))?;

    Ok(Record {
        id: current.id,
        doc,
        created_at: current.created_at,
        updated_at: ts,
    }
    .to_json())
}

fn handle_update(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let current = fetch::<SubjectDoc>(conn, req, TABLE, &id, "Subject")?;
    let doc = merge_patch(req, &current.doc)?;
    save(conn, req, current, doc)
}

fn handle_delete(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    delete_by_id(conn, req, TABLE, "Subject")
}

fn handle_classes_add(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let entry: SubjectClass = parse_input(req, "class")?;
    let current = fetch::<SubjectDoc>(conn, req, TABLE, &id, "Subject")?;

    let class_name = entry.class_name.trim();
    if current.doc.offers(class_name).is_some() {
        return Err(err(
            &req.id,
            "duplicate_key",
            "Class already exists for this subject",
            Some(json!({ "className": class_name })),
        ));
    }
    let mut doc = current.doc.clone();
    doc.classes.push(entry);
    save(conn, req, current, doc)
}

fn handle_classes_remove(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let class_name = required_str(req, "className")?;
    let current = fetch::<SubjectDoc>(conn, req, TABLE, &id, "Subject")?;
    let mut doc = current.doc.clone();
    doc.classes.retain(|c| c.class_name != class_name);
    save(conn, req, current, doc)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let reply = match req.method.as_str() {
        "subjects.list" => handle_list(state, req),
        "subjects.get" => handle_get(state, req),
        "subjects.byBoard" => handle_by_board(state, req),
        "subjects.byCategory" => handle_by_category(state, req),
        "subjects.forClass" => handle_for_class(state, req),
        "subjects.stats" => handle_stats(state, req),
        "subjects.create" => handle_create(state, req),
        "subjects.update" => handle_update(state, req),
        "subjects.delete" => handle_delete(state, req),
        "subjects.classes.add" => handle_classes_add(state, req),
        "subjects.classes.remove" => handle_classes_remove(state, req),
        _ => return None,
    };
    Some(finish(req, reply))
}

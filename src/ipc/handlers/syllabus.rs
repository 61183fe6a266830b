use crate::db::{self, Record};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    check, db_conn, delete_by_id, fetch, finish, mean, merge_patch, opt_board, opt_str,
    parse_input, query_failed, required_str, subject_summary, to_doc_json, write_failed, Reply,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{SubjectDoc, SyllabusDoc, Unit};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

const TABLE: &str = "syllabi";

pub fn load_all(conn: &Connection) -> anyhow::Result<Vec<Record<SyllabusDoc>>> {
    db::load_records(
        conn,
        "SELECT id, doc, created_at, updated_at FROM syllabi ORDER BY class_name, rowid",
        [],
    )
}

/// Subject id -> stored subject, for populating and grouping.
fn subject_index(conn: &Connection) -> anyhow::Result<HashMap<String, Record<SubjectDoc>>> {
    Ok(crate::ipc::handlers::subjects::load_all(conn)?
        .into_iter()
        .map(|s| (s.id.clone(), s))
        .collect())
}

fn syllabus_json(r: &Record<SyllabusDoc>, subjects: &HashMap<String, Record<SubjectDoc>>) -> Value {
    let mut v = r.to_json();
    v["subject"] = subjects
        .get(&r.doc.subject)
        .map(subject_summary)
        .unwrap_or_else(|| json!({ "id": r.doc.subject }));
    v
}

fn subject_name<'a>(subjects: &'a HashMap<String, Record<SubjectDoc>>, id: &str) -> &'a str {
    subjects.get(id).map_or("", |s| s.doc.name.as_str())
}

fn render_one(conn: &Connection, req: &Request, r: &Record<SyllabusDoc>) -> Reply {
    let subjects = subject_index(conn).map_err(|e| query_failed(req, e))?;
    Ok(syllabus_json(r, &subjects))
}

#[derive(Default)]
struct Filter {
    board: Option<crate::models::Board>,
    class_name: Option<String>,
    academic_year: Option<String>,
    subject: Option<String>,
}

impl Filter {
    fn matches(&self, s: &SyllabusDoc) -> bool {
        self.board.map_or(true, |b| s.board == b)
            && self.class_name.as_deref().map_or(true, |c| s.class_name == c)
            && self
                .academic_year
                .as_deref()
                .map_or(true, |y| s.academic_year == y)
            && self.subject.as_deref().map_or(true, |id| s.subject == id)
    }
}

/// Filtered syllabi sorted by `order`, each with its subject populated.
fn query<F>(conn: &Connection, req: &Request, filter: &Filter, order: F) -> Reply
where
    F: Fn(&Record<SyllabusDoc>, &Record<SyllabusDoc>, &HashMap<String, Record<SubjectDoc>>) -> std::cmp::Ordering,
{
    let subjects = subject_index(conn).map_err(|e| query_failed(req, e))?;
    let mut rows: Vec<_> = load_all(conn)
        .map_err(|e| query_failed(req, e))?
        .into_iter()
        .filter(|s| filter.matches(&s.doc))
        .collect();
    rows.sort_by(|a, b| order(a, b, &subjects));
    let out: Vec<_> = rows.iter().map(|s| syllabus_json(s, &subjects)).collect();
    Ok(json!({ "syllabus": out }))
}

fn handle_list(state: &mut AppState, req: &Request) -> Reply {
    let Ok(conn) = db_conn(state, req) else {
        return Ok(json!({ "syllabus": [] }));
    };
    let filter = Filter {
        board: opt_board(req, "board")?,
        class_name: opt_str(req, "className"),
        academic_year: opt_str(req, "academicYear"),
        subject: opt_str(req, "subject"),
    };
    query(conn, req, &filter, |a, b, subjects| {
        a.doc.class_name.cmp(&b.doc.class_name).then_with(|| {
            subject_name(subjects, &a.doc.subject).cmp(subject_name(subjects, &b.doc.subject))
        })
    })
}

fn handle_get(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let syllabus = fetch::<SyllabusDoc>(conn, req, TABLE, &id, "Syllabus")?;
    render_one(conn, req, &syllabus)
}

fn handle_by_class_board(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let class_name = required_str(req, "className")?;
    required_str(req, "board")?;
    let filter = Filter {
        board: opt_board(req, "board")?,
        class_name: Some(class_name),
        academic_year: opt_str(req, "academicYear"),
        subject: None,
    };
    query(conn, req, &filter, |a, b, subjects| {
        subject_name(subjects, &a.doc.subject).cmp(subject_name(subjects, &b.doc.subject))
    })
}

fn handle_by_subject(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let filter = Filter {
        board: None,
        class_name: opt_str(req, "className"),
        academic_year: opt_str(req, "academicYear"),
        subject: Some(required_str(req, "subjectId")?),
    };
    query(conn, req, &filter, |a, b, _| {
        a.doc
            .class_name
            .cmp(&b.doc.class_name)
            .then_with(|| b.doc.academic_year.cmp(&a.doc.academic_year))
    })
}

/// Units narrowed to the chapters scheduled in `month`; units without any
/// such chapter are dropped.
fn units_in_month(units: &[Unit], month: &str) -> Vec<Unit> {
    units
        .iter()
        .filter_map(|u| {
            let chapters: Vec<_> = u
                .chapters
                .iter()
                .filter(|c| c.month.is_some_and(|m| m.as_str().eq_ignore_ascii_case(month)))
                .cloned()
                .collect();
            (!chapters.is_empty()).then(|| Unit {
                chapters,
                ..u.clone()
            })
        })
        .collect()
}

fn handle_month(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let month = required_str(req, "month")?;
    let syllabus = fetch::<SyllabusDoc>(conn, req, TABLE, &id, "Syllabus")?;
    let populated = render_one(conn, req, &syllabus)?;
    Ok(json!({
        "subject": populated["subject"],
        "className": syllabus.doc.class_name,
        "board": syllabus.doc.board,
        "academicYear": syllabus.doc.academic_year,
        "month": month,
        "units": units_in_month(&syllabus.doc.units, &month),
    }))
}

fn grouped(counts: BTreeMap<String, usize>, key: &str) -> Vec<Value> {
    counts
        .into_iter()
        .map(|(k, count)| json!({ key: k, "count": count }))
        .collect()
}

fn handle_stats(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let filter = Filter {
        board: opt_board(req, "board")?,
        academic_year: opt_str(req, "academicYear"),
        ..Filter::default()
    };
    let subjects = subject_index(conn).map_err(|e| query_failed(req, e))?;
    let rows: Vec<_> = load_all(conn)
        .map_err(|e| query_failed(req, e))?
        .into_iter()
        .filter(|s| filter.matches(&s.doc))
        .collect();

    let mut by_board = BTreeMap::new();
    let mut by_class = BTreeMap::new();
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    for s in &rows {
        *by_board.entry(s.doc.board.as_str().to_string()).or_insert(0) += 1;
        *by_class.entry(s.doc.class_name.clone()).or_insert(0) += 1;
        if let Some(subject) = subjects.get(&s.doc.subject) {
            *by_category
                .entry(subject.doc.category.as_str().to_string())
                .or_insert(0) += 1;
        }
    }
    let mut distribution: Vec<_> = by_category.into_iter().collect();
    distribution.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let distribution: Vec<_> = distribution
        .into_iter()
        .map(|(category, count)| json!({ "category": category, "count": count }))
        .collect();

    let total_units: usize = rows.iter().map(|s| s.doc.units.len()).sum();

    Ok(json!({
        "totalSyllabus": rows.len(),
        "syllabusByBoard": grouped(by_board, "board"),
        "syllabusByClass": grouped(by_class, "className"),
        "avgUnitsPerSyllabus": {
            "avgUnits": mean(total_units as f64, rows.len()),
            "totalUnits": total_units,
        },
        "subjectDistribution": distribution,
    }))
}

fn ensure_subject(conn: &Connection, req: &Request, subject_id: &str) -> Result<(), Value> {
    match db::row_exists(conn, "subjects", subject_id) {
        Ok(true) => Ok(()),
        Ok(false) => check(req, vec![format!("subject {} does not exist", subject_id)]),
        Err(e) => Err(query_failed(req, e)),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let mut doc: SyllabusDoc = parse_input(req, "input")?;
    doc.normalize();
    check(req, doc.validate())?;
    ensure_subject(conn, req, &doc.subject)?;

    let id = Uuid::new_v4().to_string();
    let ts = db::now_rfc3339();
    conn.execute(
        "INSERT INTO syllabi(id, subject_id, class_name, board, academic_year, term, doc, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &doc.subject,
            &doc.class_name,
            doc.board.as_str(),
            &doc.academic_year,
            doc.term.as_str(),
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

fn save(conn: &Connection, req: &Request, current: Record<SyllabusDoc>, mut doc: SyllabusDoc) -> Reply {
    doc.normalize();
    check(req, doc.validate())?;
    if doc.subject != current.doc.subject {
        ensure_subject(conn, req, &doc.subject)?;
    }

    let ts = db::now_rfc3339();
    conn.execute(
        "UPDATE syllabi SET subject_id = ?, class_name = ?, board = ?, academic_year = ?, term = ?,
           doc = ?, updated_at = ?
         WHERE id = ?",
        (
            &doc.subject,
            &doc.class_name,
            doc.board.as_str(),
            &doc.academic_year,
            doc.term.as_str(),
            to_doc_json(req, &doc)?,
            &ts,
            &current.id,
        ),
    )
    .map_err(|e| write_failed(req, "db_update_failed", TABLE, e))?;

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
    let current = fetch::<SyllabusDoc>(conn, req, TABLE, &id, "Syllabus")?;
    let doc = merge_patch(req, &current.doc)?;
    save(conn, req, current, doc)
}

fn handle_delete(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    delete_by_id(conn, req, TABLE, "Syllabus")
}

fn handle_units_add(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let unit: Unit = parse_input(req, "unit")?;
    let current = fetch::<SyllabusDoc>(conn, req, TABLE, &id, "Syllabus")?;

    if current
        .doc
        .units
        .iter()
        .any(|u| u.unit_number == unit.unit_number)
    {
        return Err(err(
            &req.id,
            "duplicate_key",
            "Unit with this number already exists",
            Some(json!({ "unitNumber": unit.unit_number })),
        ));
    }
    let mut doc = current.doc.clone();
    doc.units.push(Unit {
        id: String::new(),
        ..unit
    });
    save(conn, req, current, doc)
}

fn handle_units_update(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let unit_id = required_str(req, "unitId")?;
    let current = fetch::<SyllabusDoc>(conn, req, TABLE, &id, "Syllabus")?;

    let Some(idx) = current.doc.units.iter().position(|u| u.id == unit_id) else {
        return Err(err(&req.id, "not_found", "Unit not found", None));
    };
    let unit = merge_patch(req, &current.doc.units[idx])?;
    let mut doc = current.doc.clone();
    doc.units[idx] = unit;
    save(conn, req, current, doc)
}

fn handle_units_remove(state: &mut AppState, req: &Request) -> Reply {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let unit_id = required_str(req, "unitId")?;
    let current = fetch::<SyllabusDoc>(conn, req, TABLE, &id, "Syllabus")?;
    let mut doc = current.doc.clone();
    doc.units.retain(|u| u.id != unit_id);
    save(conn, req, current, doc)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let reply = match req.method.as_str() {
        "syllabus.list" => handle_list(state, req),
        "syllabus.get" => handle_get(state, req),
        "syllabus.byClassBoard" => handle_by_class_board(state, req),
        "syllabus.bySubject" => handle_by_subject(state, req),
        "syllabus.month" => handle_month(state, req),
        "syllabus.stats" => handle_stats(state, req),
        "syllabus.create" => handle_create(state, req),
        "syllabus.update" => handle_update(state, req),
        "syllabus.delete" => handle_delete(state, req),
        "syllabus.units.add" => handle_units_add(state, req),
        "syllabus.units.update" => handle_units_update(state, req),
        "syllabus.units.remove" => handle_units_remove(state, req),
        _ => return None,
    };
    Some(finish(req, reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Month;

    fn unit(number: u32, months: &[Option<Month>]) -> Unit {
        serde_json::from_value(json!({
            "id": format!("u{}", number),
            "unitNumber": number,
            "unitName": format!("Unit {}", number),
            "chapters": months.iter().enumerate().map(|(i, m)| json!({
                "chapterNumber": i + 1,
                "chapterName": format!("Chapter {}", i + 1),
                "month": m,
            })).collect::<Vec<_>>(),
        }))
        .expect("unit")
    }

    #[test]
    fn month_view_keeps_only_matching_chapters() {
        let units = vec![
            unit(1, &[Some(Month::April), Some(Month::May)]),
            unit(2, &[Some(Month::June), None]),
            unit(3, &[Some(Month::April)]),
        ];
        let april = units_in_month(&units, "april");
        assert_eq!(april.len(), 2);
        assert_eq!(april[0].unit_number, 1);
        assert_eq!(april[0].chapters.len(), 1);
        assert_eq!(april[0].chapters[0].chapter_name, "Chapter 1");
        assert_eq!(april[1].unit_number, 3);
        assert!(units_in_month(&units, "March").is_empty());
    }
}

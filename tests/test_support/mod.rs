#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn(Command::new(env!("CARGO_BIN_EXE_schoold")))
}

/// Runs the sidecar with `TZ` set, e.g. a POSIX rule like `IST-5:30`.
pub fn spawn_sidecar_in_zone(tz: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_schoold"));
    cmd.env("TZ", tz);
    spawn(cmd)
}

fn spawn(mut cmd: Command) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let mut child = cmd
        .env_remove("SCHOOLD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Sends a request that must fail and returns its error object.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

pub fn id_of(value: &serde_json::Value) -> String {
    value
        .get("id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string()
}

pub fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

pub fn create_teacher(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
    email: &str,
    department: &str,
) -> String {
    let t = request_ok(
        stdin,
        reader,
        "seed-teacher",
        "teachers.create",
        json!({ "input": { "name": name, "email": email, "department": department } }),
    );
    id_of(&t)
}

pub fn create_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_name: &str,
    section: &str,
    teacher_id: &str,
) -> String {
    let c = request_ok(
        stdin,
        reader,
        "seed-class",
        "classes.create",
        json!({
            "input": {
                "className": class_name,
                "section": section,
                "board": "CBSE",
                "academicYear": "2024-25",
                "classTeacher": teacher_id,
            }
        }),
    );
    id_of(&c)
}

pub fn create_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
    code: &str,
    category: &str,
) -> String {
    let s = request_ok(
        stdin,
        reader,
        "seed-subject",
        "subjects.create",
        json!({
            "input": {
                "name": name,
                "code": code,
                "category": category,
                "classes": [{ "className": "Class 10" }],
            }
        }),
    );
    id_of(&s)
}

pub fn period(
    number: u32,
    start: &str,
    end: &str,
    subject_id: &str,
    teacher_id: &str,
    room: &str,
) -> serde_json::Value {
    json!({
        "periodNumber": number,
        "startTime": start,
        "endTime": end,
        "subjectId": subject_id,
        "teacherId": teacher_id,
        "classroom": room,
    })
}

pub fn break_period(number: u32, start: &str, end: &str) -> serde_json::Value {
    json!({
        "periodNumber": number,
        "startTime": start,
        "endTime": end,
        "classroom": "Courtyard",
        "periodType": "Break",
        "isBreak": true,
    })
}

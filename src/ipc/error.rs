use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn validation_failed(id: &str, errors: Vec<String>) -> serde_json::Value {
    err(
        id,
        "validation_failed",
        "Validation error",
        Some(json!({ "errors": errors })),
    )
}

pub fn not_found(id: &str, what: &str) -> serde_json::Value {
    err(id, "not_found", format!("{} not found", what), None)
}

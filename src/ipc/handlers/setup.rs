use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

const SCHEDULE_KEY: &str = "setup.schedule";

/// Workspace-wide schedule settings, stored as one JSON section.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSettings {
    pub max_periods_per_day: u32,
    pub default_academic_year: String,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            max_periods_per_day: 8,
            default_academic_year: "2024-25".to_string(),
        }
    }
}

impl ScheduleSettings {
    fn to_json(&self) -> Value {
        json!({
            "maxPeriodsPerDay": self.max_periods_per_day,
            "defaultAcademicYear": self.default_academic_year,
        })
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_schedule_patch(
    current: &mut ScheduleSettings,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    for (k, v) in patch {
        match k.as_str() {
            "maxPeriodsPerDay" => {
                current.max_periods_per_day = parse_i64_range(v, k, 1, 16)? as u32;
            }
            "defaultAcademicYear" => {
                current.default_academic_year = parse_string_max(v, k, 16)?;
            }
            _ => return Err(format!("unknown schedule field: {}", k)),
        }
    }
    Ok(())
}

/// Stored schedule settings over the defaults.
pub fn schedule_settings(conn: &rusqlite::Connection) -> anyhow::Result<ScheduleSettings> {
    let mut current = ScheduleSettings::default();
    if let Some(saved) = db::settings_get_json(conn, SCHEDULE_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // A malformed stored field leaves the remaining defaults usable.
            if let Err(e) = merge_schedule_patch(&mut current, saved_obj) {
                log::warn!("ignoring stored schedule settings: {}", e);
            }
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match schedule_settings(conn) {
        Ok(schedule) => ok(&req.id, json!({ "schedule": schedule.to_json() })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    if section != "schedule" {
        return err(&req.id, "bad_params", "unknown section", None);
    }
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match schedule_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_schedule_patch(&mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, SCHEDULE_KEY, &current.to_json()) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    log::info!("schedule settings updated");
    ok(&req.id, json!({ "ok": true, "schedule": current.to_json() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_patch_bounds_and_unknown_fields() {
        let mut s = ScheduleSettings::default();
        let patch = json!({ "maxPeriodsPerDay": 10, "defaultAcademicYear": " 2025-26 " });
        merge_schedule_patch(&mut s, patch.as_object().expect("object")).expect("valid patch");
        assert_eq!(s.max_periods_per_day, 10);
        assert_eq!(s.default_academic_year, "2025-26");

        let too_many = json!({ "maxPeriodsPerDay": 17 });
        assert!(merge_schedule_patch(&mut s, too_many.as_object().expect("object")).is_err());
        let unknown = json!({ "colour": "red" });
        assert!(merge_schedule_patch(&mut s, unknown.as_object().expect("object")).is_err());
    }
}

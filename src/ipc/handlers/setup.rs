use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

const SECTION_KEY: &str = "setup.scheduling";

pub const ON_EXISTING_SKIP: &str = "skip";
pub const ON_EXISTING_DUPLICATE: &str = "duplicate";

fn default_section() -> Value {
    json!({
        "requireApprovalByDefault": false,
        "generationOnExisting": ON_EXISTING_SKIP
    })
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn merge_section_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "requireApprovalByDefault" => {
                obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
            }
            "generationOnExisting" => {
                let s = v
                    .as_str()
                    .ok_or_else(|| format!("{} must be string", k))?
                    .trim()
                    .to_ascii_lowercase();
                if s != ON_EXISTING_SKIP && s != ON_EXISTING_DUPLICATE {
                    return Err("generationOnExisting must be one of: skip, duplicate".into());
                }
                obj.insert(k.clone(), Value::String(s));
            }
            _ => return Err(format!("unknown scheduling field: {}", k)),
        }
    }
    Ok(())
}

pub fn load_scheduling_section(conn: &Connection) -> anyhow::Result<Value> {
    let mut current = default_section();
    if let Some(saved) = db::settings_get_json(conn, SECTION_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup UI.
            let _ = merge_section_patch(&mut current, saved_obj);
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let scheduling = match load_scheduling_section(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "scheduling": scheduling }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    if section_raw != "scheduling" {
        return err(&req.id, "bad_params", "unknown section", None);
    }
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_scheduling_section(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(&mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, SECTION_KEY, &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

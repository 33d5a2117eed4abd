use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Optional trimmed string param; empty and null both read as absent.
pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or("must be string or null")?
                .trim()
                .to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn parse_bool(v: Option<&JsonValue>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

pub fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

/// (can_schedule, can_approve) for a registered actor.
pub fn actor_flags(conn: &Connection, actor_id: &str) -> anyhow::Result<Option<(bool, bool)>> {
    let row = conn
        .query_row(
            "SELECT can_schedule, can_approve FROM actors WHERE id = ?",
            [actor_id],
            |r| Ok((r.get::<_, i64>(0)? != 0, r.get::<_, i64>(1)? != 0)),
        )
        .optional()?;
    Ok(row)
}

pub fn require_scheduler(
    conn: &Connection,
    req: &Request,
    actor_id: &str,
) -> Result<(), serde_json::Value> {
    match actor_flags(conn, actor_id) {
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
        Ok(None) => Err(err(&req.id, "not_found", "actor not found", None)),
        Ok(Some((can_schedule, _))) if !can_schedule => Err(err(
            &req.id,
            "not_authorized",
            "actor lacks the scheduling role",
            None,
        )),
        Ok(Some(_)) => Ok(()),
    }
}

pub fn require_approver(
    conn: &Connection,
    req: &Request,
    actor_id: &str,
) -> Result<(), serde_json::Value> {
    match actor_flags(conn, actor_id) {
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
        Ok(None) => Err(err(&req.id, "not_found", "actor not found", None)),
        Ok(Some((_, can_approve))) if !can_approve => Err(err(
            &req.id,
            "not_authorized",
            "actor lacks the approval role",
            None,
        )),
        Ok(Some(_)) => Ok(()),
    }
}

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, opt_str, require_approver, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use rusqlite::params;
use serde_json::json;

use super::slots::{
    conflict_response, find_conflict, load_slot, row_to_slot, slot_json, SlotRow, SLOT_COLUMNS,
    STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED,
};

/// Shared precondition for approve/reject: the slot must exist, require
/// approval, and still be pending.
fn load_pending(
    state: &AppState,
    req: &Request,
    slot_id: &str,
) -> Result<SlotRow, serde_json::Value> {
    let conn = db_conn(state, req)?;
    let slot = match load_slot(conn, slot_id) {
        Ok(Some(s)) => s,
        Ok(None) => return Err(err(&req.id, "not_found", "slot not found", None)),
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    if !slot.requires_approval {
        return Err(err(
            &req.id,
            "approval_state",
            "slot does not require approval",
            None,
        ));
    }
    if slot.approval_status.as_deref() != Some(STATUS_PENDING) {
        return Err(err(
            &req.id,
            "approval_state",
            format!(
                "slot is {}, not pending",
                slot.approval_status.as_deref().unwrap_or("unset")
            ),
            None,
        ));
    }
    Ok(slot)
}

fn handle_approve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let slot_id = match required_str(req, "slotId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let actor_id = match required_str(req, "actorId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let note = opt_str(req, "note");

    let slot = match load_pending(state, req, &slot_id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_approver(conn, req, &actor_id) {
        return resp;
    }

    // Activation re-checks the booking: slots created while this one sat
    // pending must not end up double-booked the moment it goes live.
    let (start_min, end_min) =
        match schedule::validate_time_range(&slot.start_time, &slot.end_time) {
            Ok(v) => v,
            Err(e) => return err(&req.id, e.code(), e.to_string(), None),
        };
    match find_conflict(
        conn,
        &slot.teacher_ref,
        &slot.day_of_week,
        start_min,
        end_min,
        slot.room.as_deref(),
        Some(&slot_id),
    ) {
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        Ok(Some(hit)) => return conflict_response(req, &hit),
        Ok(None) => {}
    }

    if let Err(e) = conn.execute(
        "UPDATE schedule_slots
         SET approval_status = ?, is_active = 1, approval_note = ?,
             decided_by = ?, decided_at = ?, updated_at = ?
         WHERE id = ?",
        params![STATUS_APPROVED, note, actor_id, now_ts(), now_ts(), slot_id],
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_slots" })),
        );
    }

    match load_slot(conn, &slot_id) {
        Ok(Some(slot)) => ok(&req.id, json!({ "slot": slot_json(&slot) })),
        Ok(None) => err(&req.id, "not_found", "slot not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let slot_id = match required_str(req, "slotId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let actor_id = match required_str(req, "actorId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let note = opt_str(req, "note");

    if let Err(resp) = load_pending(state, req, &slot_id) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_approver(conn, req, &actor_id) {
        return resp;
    }

    if let Err(e) = conn.execute(
        "UPDATE schedule_slots
         SET approval_status = ?, is_active = 0, approval_note = ?,
             decided_by = ?, decided_at = ?, updated_at = ?
         WHERE id = ?",
        params![STATUS_REJECTED, note, actor_id, now_ts(), now_ts(), slot_id],
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_slots" })),
        );
    }

    match load_slot(conn, &slot_id) {
        Ok(Some(slot)) => ok(&req.id, json!({ "slot": slot_json(&slot) })),
        Ok(None) => err(&req.id, "not_found", "slot not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_pending_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sql = format!(
        "SELECT {} FROM schedule_slots
         WHERE requires_approval = 1 AND approval_status = ?
         ORDER BY created_at, id",
        SLOT_COLUMNS
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([STATUS_PENDING], row_to_slot)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(slots) => ok(
            &req.id,
            json!({ "slots": slots.iter().map(slot_json).collect::<Vec<_>>() }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "slots.approve" => Some(handle_approve(state, req)),
        "slots.reject" => Some(handle_reject(state, req)),
        "approvals.list" => Some(handle_pending_list(state, req)),
        _ => None,
    }
}

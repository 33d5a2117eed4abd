use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_flags, db_conn, now_ts, opt_str, parse_bool, parse_opt_string, require_scheduler,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, DayOfWeek};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::setup;

pub(crate) const STATUS_PENDING: &str = "pending";
pub(crate) const STATUS_APPROVED: &str = "approved";
pub(crate) const STATUS_REJECTED: &str = "rejected";
pub(crate) const STATUS_AUTO_APPROVED: &str = "auto_approved";

const RECURRENCE_WEEKLY: &str = "weekly";

pub(crate) const SLOT_COLUMNS: &str = "id, class_ref, course_ref, teacher_ref, day_of_week, \
     start_time, end_time, room, building, recurrence_type, effective_from, effective_to, \
     is_active, requires_approval, approval_status, approval_note, decided_by, decided_at, \
     notes, created_by, created_at, updated_at";

#[derive(Debug, Clone)]
pub(crate) struct SlotRow {
    pub id: String,
    pub class_ref: Option<String>,
    pub course_ref: String,
    pub teacher_ref: String,
    pub day_of_week: String,
    pub start_time: String,
    pub end_time: String,
    pub room: Option<String>,
    pub building: Option<String>,
    pub recurrence_type: String,
    pub effective_from: Option<String>,
    pub effective_to: Option<String>,
    pub is_active: bool,
    pub requires_approval: bool,
    pub approval_status: Option<String>,
    pub approval_note: Option<String>,
    pub decided_by: Option<String>,
    pub decided_at: Option<String>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

pub(crate) fn row_to_slot(row: &rusqlite::Row) -> rusqlite::Result<SlotRow> {
    Ok(SlotRow {
        id: row.get(0)?,
        class_ref: row.get(1)?,
        course_ref: row.get(2)?,
        teacher_ref: row.get(3)?,
        day_of_week: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        room: row.get(7)?,
        building: row.get(8)?,
        recurrence_type: row.get(9)?,
        effective_from: row.get(10)?,
        effective_to: row.get(11)?,
        is_active: row.get::<_, i64>(12)? != 0,
        requires_approval: row.get::<_, i64>(13)? != 0,
        approval_status: row.get(14)?,
        approval_note: row.get(15)?,
        decided_by: row.get(16)?,
        decided_at: row.get(17)?,
        notes: row.get(18)?,
        created_by: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

pub(crate) fn load_slot(conn: &Connection, id: &str) -> anyhow::Result<Option<SlotRow>> {
    let sql = format!("SELECT {} FROM schedule_slots WHERE id = ?", SLOT_COLUMNS);
    let row = conn
        .query_row(&sql, [id], row_to_slot)
        .optional()?;
    Ok(row)
}

pub(crate) fn slot_json(slot: &SlotRow) -> JsonValue {
    json!({
        "id": slot.id,
        "classRef": slot.class_ref,
        "courseRef": slot.course_ref,
        "teacherRef": slot.teacher_ref,
        "dayOfWeek": slot.day_of_week,
        "startTime": slot.start_time,
        "endTime": slot.end_time,
        "room": slot.room,
        "building": slot.building,
        "recurrenceType": slot.recurrence_type,
        "effectiveFrom": slot.effective_from,
        "effectiveTo": slot.effective_to,
        "isActive": slot.is_active,
        "requiresApproval": slot.requires_approval,
        "approvalStatus": slot.approval_status,
        "approvalNote": slot.approval_note,
        "decidedBy": slot.decided_by,
        "decidedAt": slot.decided_at,
        "notes": slot.notes,
        "createdBy": slot.created_by,
        "createdAt": slot.created_at,
        "updatedAt": slot.updated_at
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConflictKind {
    Teacher,
    Room,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictKind::Teacher => "teacher",
            ConflictKind::Room => "room",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ConflictHit {
    pub kind: ConflictKind,
    pub slot: SlotRow,
}

/// Search active slots for a booking collision. Teacher collisions are
/// checked first and win over room collisions; the first overlapping row in
/// (start_time, id) order is returned so callers see a stable result.
pub(crate) fn find_conflict(
    conn: &Connection,
    teacher_ref: &str,
    day: &str,
    start_min: u16,
    end_min: u16,
    room: Option<&str>,
    exclude_id: Option<&str>,
) -> anyhow::Result<Option<ConflictHit>> {
    let excl = exclude_id.unwrap_or("");

    let sql = format!(
        "SELECT {} FROM schedule_slots
         WHERE is_active = 1 AND day_of_week = ? AND teacher_ref = ? AND id != ?
         ORDER BY start_time, id",
        SLOT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map((day, teacher_ref, excl), row_to_slot)?;
    for row in rows {
        let slot = row?;
        let s = schedule::time_to_minutes(&slot.start_time)?;
        let e = schedule::time_to_minutes(&slot.end_time)?;
        if schedule::intervals_overlap(start_min, end_min, s, e) {
            return Ok(Some(ConflictHit {
                kind: ConflictKind::Teacher,
                slot,
            }));
        }
    }

    let Some(room) = room.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let sql = format!(
        "SELECT {} FROM schedule_slots
         WHERE is_active = 1 AND day_of_week = ? AND room = ? AND id != ?
         ORDER BY start_time, id",
        SLOT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map((day, room, excl), row_to_slot)?;
    for row in rows {
        let slot = row?;
        let s = schedule::time_to_minutes(&slot.start_time)?;
        let e = schedule::time_to_minutes(&slot.end_time)?;
        if schedule::intervals_overlap(start_min, end_min, s, e) {
            return Ok(Some(ConflictHit {
                kind: ConflictKind::Room,
                slot,
            }));
        }
    }
    Ok(None)
}

pub(crate) fn conflict_response(req: &Request, hit: &ConflictHit) -> serde_json::Value {
    let message = match hit.kind {
        ConflictKind::Teacher => format!(
            "teacher {} is already booked {}-{} on {}",
            hit.slot.teacher_ref, hit.slot.start_time, hit.slot.end_time, hit.slot.day_of_week
        ),
        ConflictKind::Room => format!(
            "room {} is already booked {}-{} on {}",
            hit.slot.room.as_deref().unwrap_or(""),
            hit.slot.start_time,
            hit.slot.end_time,
            hit.slot.day_of_week
        ),
    };
    err(
        &req.id,
        "conflict",
        message,
        Some(json!({ "kind": hit.kind.as_str(), "slot": slot_json(&hit.slot) })),
    )
}

fn teacher_active(conn: &Connection, id: &str) -> anyhow::Result<Option<bool>> {
    let row: Option<i64> = conn
        .query_row("SELECT active FROM teachers WHERE id = ?", [id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(row.map(|v| v != 0))
}

fn course_exists(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let row: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    Ok(row.is_some())
}

/// Validate teacher/course refs against the registries. None means the
/// response has already been produced.
fn check_refs(
    conn: &Connection,
    req: &Request,
    teacher_ref: &str,
    course_ref: &str,
) -> Option<serde_json::Value> {
    match teacher_active(conn, teacher_ref) {
        Err(e) => return Some(err(&req.id, "db_query_failed", e.to_string(), None)),
        Ok(None) => return Some(err(&req.id, "not_found", "teacher not found", None)),
        Ok(Some(false)) => {
            return Some(err(&req.id, "bad_params", "teacher is not active", None))
        }
        Ok(Some(true)) => {}
    }
    match course_exists(conn, course_ref) {
        Err(e) => return Some(err(&req.id, "db_query_failed", e.to_string(), None)),
        Ok(false) => return Some(err(&req.id, "not_found", "course not found", None)),
        Ok(true) => {}
    }
    None
}

/// Parse and order-check the optional effective date range. Each bound may
/// be present alone; when both are present the range must be non-empty.
fn check_effective_range(
    req: &Request,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<(), serde_json::Value> {
    if let Some(f) = from {
        if let Err(e) = schedule::parse_date(f) {
            return Err(err(
                &req.id,
                e.code(),
                e.to_string(),
                Some(json!({ "field": "effectiveFrom" })),
            ));
        }
    }
    if let Some(t) = to {
        if let Err(e) = schedule::parse_date(t) {
            return Err(err(
                &req.id,
                e.code(),
                e.to_string(),
                Some(json!({ "field": "effectiveTo" })),
            ));
        }
    }
    if let (Some(f), Some(t)) = (from, to) {
        if let Err(e) = schedule::validate_date_range(f, t) {
            return Err(err(
                &req.id,
                e.code(),
                "effectiveTo must be after effectiveFrom",
                Some(json!({ "effectiveFrom": f, "effectiveTo": t })),
            ));
        }
    }
    Ok(())
}

fn handle_slots_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let created_by = match required_str(req, "createdBy") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_scheduler(conn, req, &created_by) {
        return resp;
    }

    let course_ref = match required_str(req, "courseRef") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let teacher_ref = match required_str(req, "teacherRef") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let day_raw = match required_str(req, "dayOfWeek") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let day = match DayOfWeek::parse(&day_raw) {
        Ok(d) => d,
        Err(e) => {
            return err(
                &req.id,
                e.code(),
                e.to_string(),
                Some(json!({ "field": "dayOfWeek" })),
            )
        }
    };
    let start_time = match required_str(req, "startTime") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end_time = match required_str(req, "endTime") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (start_min, end_min) = match schedule::validate_time_range(&start_time, &end_time) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                e.code(),
                e.to_string(),
                Some(json!({ "startTime": start_time, "endTime": end_time })),
            )
        }
    };

    let class_ref = opt_str(req, "classRef");
    let room = opt_str(req, "room");
    let building = opt_str(req, "building");
    let notes = opt_str(req, "notes");
    let recurrence_type = opt_str(req, "recurrenceType")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| RECURRENCE_WEEKLY.to_string());
    let effective_from = opt_str(req, "effectiveFrom");
    let effective_to = opt_str(req, "effectiveTo");
    if let Err(resp) =
        check_effective_range(req, effective_from.as_deref(), effective_to.as_deref())
    {
        return resp;
    }

    if let Some(resp) = check_refs(conn, req, &teacher_ref, &course_ref) {
        return resp;
    }

    let defaults = match setup::load_scheduling_section(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let default_requires = defaults
        .get("requireApprovalByDefault")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let requires_approval = match parse_bool(req.params.get("requiresApproval"), default_requires) {
        Ok(v) => v,
        Err(msg) => {
            return err(
                &req.id,
                "bad_params",
                format!("requiresApproval {}", msg),
                None,
            )
        }
    };

    match find_conflict(
        conn,
        &teacher_ref,
        day.as_str(),
        start_min,
        end_min,
        room.as_deref(),
        None,
    ) {
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        Ok(Some(hit)) => return conflict_response(req, &hit),
        Ok(None) => {}
    }

    // Approvers creating approval-gated slots do not wait on themselves.
    let (approval_status, is_active, decided_by, decided_at) = if requires_approval {
        let approver = match actor_flags(conn, &created_by) {
            Ok(flags) => flags.map(|(_, a)| a).unwrap_or(false),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if approver {
            (
                Some(STATUS_AUTO_APPROVED),
                true,
                Some(created_by.clone()),
                Some(now_ts()),
            )
        } else {
            (Some(STATUS_PENDING), false, None, None)
        }
    } else {
        (None, true, None, None)
    };

    let slot_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO schedule_slots(
            id, class_ref, course_ref, teacher_ref, day_of_week, start_time, end_time,
            room, building, recurrence_type, effective_from, effective_to,
            is_active, requires_approval, approval_status, decided_by, decided_at,
            notes, created_by, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            slot_id,
            class_ref,
            course_ref,
            teacher_ref,
            day.as_str(),
            start_time,
            end_time,
            room,
            building,
            recurrence_type,
            effective_from,
            effective_to,
            is_active as i64,
            requires_approval as i64,
            approval_status,
            decided_by,
            decided_at,
            notes,
            created_by,
            ts,
            ts,
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_slots" })),
        );
    }

    match load_slot(conn, &slot_id) {
        Ok(Some(slot)) => ok(&req.id, json!({ "slot": slot_json(&slot) })),
        Ok(None) => err(&req.id, "not_found", "slot vanished after insert", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_slots_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let slot_id = match required_str(req, "slotId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let actor_id = match required_str(req, "actorId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_scheduler(conn, req, &actor_id) {
        return resp;
    }
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let current = match load_slot(conn, &slot_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "slot not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Rejected and deactivated slots are terminal; re-submit as a new slot.
    if current.approval_status.as_deref() == Some(STATUS_REJECTED) {
        return err(
            &req.id,
            "approval_state",
            "slot was rejected; create a new slot instead",
            None,
        );
    }
    if !current.is_active && current.approval_status.as_deref() != Some(STATUS_PENDING) {
        return err(&req.id, "approval_state", "slot is deactivated", None);
    }

    let mut merged = current.clone();
    for (k, v) in patch {
        let parsed = match k.as_str() {
            "classRef" => parse_opt_string(Some(v)).map(|s| merged.class_ref = s),
            "courseRef" => match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                Some(s) => {
                    merged.course_ref = s.to_string();
                    Ok(())
                }
                None => Err("must be a non-empty string"),
            },
            "teacherRef" => match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                Some(s) => {
                    merged.teacher_ref = s.to_string();
                    Ok(())
                }
                None => Err("must be a non-empty string"),
            },
            "dayOfWeek" => match v.as_str() {
                Some(s) => match DayOfWeek::parse(s) {
                    Ok(d) => {
                        merged.day_of_week = d.as_str().to_string();
                        Ok(())
                    }
                    Err(e) => {
                        return err(
                            &req.id,
                            e.code(),
                            e.to_string(),
                            Some(json!({ "field": "dayOfWeek" })),
                        )
                    }
                },
                None => Err("must be a string"),
            },
            "startTime" => match v.as_str().map(str::trim) {
                Some(s) => {
                    merged.start_time = s.to_string();
                    Ok(())
                }
                None => Err("must be a string"),
            },
            "endTime" => match v.as_str().map(str::trim) {
                Some(s) => {
                    merged.end_time = s.to_string();
                    Ok(())
                }
                None => Err("must be a string"),
            },
            "room" => parse_opt_string(Some(v)).map(|s| merged.room = s),
            "building" => parse_opt_string(Some(v)).map(|s| merged.building = s),
            "recurrenceType" => parse_opt_string(Some(v)).map(|s| {
                merged.recurrence_type = s
                    .map(|s| s.to_ascii_lowercase())
                    .unwrap_or_else(|| RECURRENCE_WEEKLY.to_string());
            }),
            "effectiveFrom" => parse_opt_string(Some(v)).map(|s| merged.effective_from = s),
            "effectiveTo" => parse_opt_string(Some(v)).map(|s| merged.effective_to = s),
            "notes" => parse_opt_string(Some(v)).map(|s| merged.notes = s),
            _ => return err(&req.id, "bad_params", format!("unknown field: {}", k), None),
        };
        if let Err(msg) = parsed {
            return err(&req.id, "bad_params", format!("{} {}", k, msg), None);
        }
    }

    let (start_min, end_min) =
        match schedule::validate_time_range(&merged.start_time, &merged.end_time) {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    e.code(),
                    e.to_string(),
                    Some(json!({ "startTime": merged.start_time, "endTime": merged.end_time })),
                )
            }
        };
    if let Err(resp) = check_effective_range(
        req,
        merged.effective_from.as_deref(),
        merged.effective_to.as_deref(),
    ) {
        return resp;
    }
    if let Some(resp) = check_refs(conn, req, &merged.teacher_ref, &merged.course_ref) {
        return resp;
    }

    match find_conflict(
        conn,
        &merged.teacher_ref,
        &merged.day_of_week,
        start_min,
        end_min,
        merged.room.as_deref(),
        Some(&slot_id),
    ) {
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        Ok(Some(hit)) => return conflict_response(req, &hit),
        Ok(None) => {}
    }

    if let Err(e) = conn.execute(
        "UPDATE schedule_slots SET
            class_ref = ?, course_ref = ?, teacher_ref = ?, day_of_week = ?,
            start_time = ?, end_time = ?, room = ?, building = ?, recurrence_type = ?,
            effective_from = ?, effective_to = ?, notes = ?, updated_at = ?
         WHERE id = ?",
        params![
            merged.class_ref,
            merged.course_ref,
            merged.teacher_ref,
            merged.day_of_week,
            merged.start_time,
            merged.end_time,
            merged.room,
            merged.building,
            merged.recurrence_type,
            merged.effective_from,
            merged.effective_to,
            merged.notes,
            now_ts(),
            slot_id,
        ],
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

fn handle_slots_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let slot_id = match required_str(req, "slotId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let actor_id = match required_str(req, "actorId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_scheduler(conn, req, &actor_id) {
        return resp;
    }

    let current = match load_slot(conn, &slot_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "slot not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !current.is_active {
        return err(&req.id, "approval_state", "slot is not active", None);
    }

    if let Err(e) = conn.execute(
        "UPDATE schedule_slots SET is_active = 0, updated_at = ? WHERE id = ?",
        params![now_ts(), slot_id],
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_slots" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_slots_check_conflict(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let teacher_ref = match required_str(req, "teacherRef") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let day_raw = match required_str(req, "dayOfWeek") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let day = match DayOfWeek::parse(&day_raw) {
        Ok(d) => d,
        Err(e) => {
            return err(
                &req.id,
                e.code(),
                e.to_string(),
                Some(json!({ "field": "dayOfWeek" })),
            )
        }
    };
    let start_time = match required_str(req, "startTime") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end_time = match required_str(req, "endTime") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (start_min, end_min) = match schedule::validate_time_range(&start_time, &end_time) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                e.code(),
                e.to_string(),
                Some(json!({ "startTime": start_time, "endTime": end_time })),
            )
        }
    };
    let room = opt_str(req, "room");
    let exclude_id = opt_str(req, "excludeId");

    match find_conflict(
        conn,
        &teacher_ref,
        day.as_str(),
        start_min,
        end_min,
        room.as_deref(),
        exclude_id.as_deref(),
    ) {
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
        Ok(None) => ok(&req.id, json!({ "conflict": JsonValue::Null })),
        Ok(Some(hit)) => ok(
            &req.id,
            json!({
                "conflict": {
                    "kind": hit.kind.as_str(),
                    "slot": slot_json(&hit.slot)
                }
            }),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "slots.create" => Some(handle_slots_create(state, req)),
        "slots.update" => Some(handle_slots_update(state, req)),
        "slots.deactivate" => Some(handle_slots_deactivate(state, req)),
        "slots.checkConflict" => Some(handle_slots_check_conflict(state, req)),
        _ => None,
    }
}

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, opt_str, require_scheduler, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, DayOfWeek};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::setup::{ON_EXISTING_DUPLICATE, ON_EXISTING_SKIP};
use super::slots::load_slot;

const LOCATION_OFFLINE: &str = "offline";
const LOCATION_ONLINE: &str = "online";
const STATUS_SCHEDULED: &str = "scheduled";

fn location_fields(room: Option<&str>, building: Option<&str>) -> (&'static str, Option<String>) {
    match (room, building) {
        (Some(r), Some(b)) => (LOCATION_OFFLINE, Some(format!("{}, {}", r, b))),
        (Some(r), None) => (LOCATION_OFFLINE, Some(r.to_string())),
        (None, Some(b)) => (LOCATION_ONLINE, Some(b.to_string())),
        (None, None) => (LOCATION_ONLINE, None),
    }
}

fn handle_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let start_raw = match required_str(req, "startDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end_raw = match required_str(req, "endDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (range_start, range_end) = match schedule::validate_date_range(&start_raw, &end_raw) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                e.code(),
                e.to_string(),
                Some(json!({ "startDate": start_raw, "endDate": end_raw })),
            )
        }
    };

    let slot = match load_slot(conn, &slot_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "slot not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !slot.is_active {
        return err(&req.id, "approval_state", "slot is not active", None);
    }
    let day = match DayOfWeek::parse(&slot.day_of_week) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let on_existing = match opt_str(req, "onExisting") {
        Some(v) => {
            let v = v.to_ascii_lowercase();
            if v != ON_EXISTING_SKIP && v != ON_EXISTING_DUPLICATE {
                return err(
                    &req.id,
                    "bad_params",
                    "onExisting must be one of: skip, duplicate",
                    None,
                );
            }
            v
        }
        None => {
            let defaults = match super::setup::load_scheduling_section(conn) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            defaults
                .get("generationOnExisting")
                .and_then(|v| v.as_str())
                .unwrap_or(ON_EXISTING_SKIP)
                .to_string()
        }
    };

    // The walk is clamped to the slot's own validity window when one is set.
    let mut walk_start = range_start;
    let mut walk_end = range_end;
    if let Some(from) = slot.effective_from.as_deref() {
        if let Ok(d) = schedule::parse_date(from) {
            walk_start = walk_start.max(d);
        }
    }
    if let Some(to) = slot.effective_to.as_deref() {
        if let Ok(d) = schedule::parse_date(to) {
            walk_end = walk_end.min(d);
        }
    }

    let dates = if walk_start <= walk_end {
        schedule::dates_on_weekday(walk_start, walk_end, day)
    } else {
        Vec::new()
    };

    let (location_type, location) =
        location_fields(slot.room.as_deref(), slot.building.as_deref());

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut created: i64 = 0;
    let mut skipped: i64 = 0;
    let mut failures: Vec<JsonValue> = Vec::new();

    for date in dates {
        let date_str = date.format("%Y-%m-%d").to_string();

        if on_existing == ON_EXISTING_SKIP {
            let exists: Result<Option<i64>, _> = tx
                .query_row(
                    "SELECT 1 FROM session_instances WHERE slot_id = ? AND date = ? LIMIT 1",
                    params![slot.id, date_str],
                    |r| r.get(0),
                )
                .optional();
            match exists {
                Ok(Some(_)) => {
                    skipped += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    failures.push(json!({ "date": date_str, "message": e.to_string() }));
                    continue;
                }
            }
        }

        let instance_id = Uuid::new_v4().to_string();
        let start_dt = schedule::instance_datetime(date, &slot.start_time);
        let end_dt = schedule::instance_datetime(date, &slot.end_time);
        let insert = tx.execute(
            "INSERT INTO session_instances(
                id, slot_id, class_ref, course_ref, teacher_ref, date,
                start_datetime, end_datetime, location_type, location, status, created_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                instance_id,
                slot.id,
                slot.class_ref,
                slot.course_ref,
                slot.teacher_ref,
                date_str,
                start_dt,
                end_dt,
                location_type,
                location,
                STATUS_SCHEDULED,
                now_ts(),
            ],
        );
        // Best-effort: one bad date does not abort the rest of the term.
        match insert {
            Ok(_) => created += 1,
            Err(e) => failures.push(json!({ "date": date_str, "message": e.to_string() })),
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "created": created,
            "skipped": skipped,
            "failures": failures,
            "onExisting": on_existing
        }),
    )
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let slot_id = opt_str(req, "slotId");
    let from = opt_str(req, "from");
    let to = opt_str(req, "to");

    let mut sql = String::from(
        "SELECT id, slot_id, class_ref, course_ref, teacher_ref, date,
                start_datetime, end_datetime, location_type, location, status
         FROM session_instances WHERE 1 = 1",
    );
    let mut binds: Vec<&str> = Vec::new();
    if let Some(s) = slot_id.as_deref() {
        sql.push_str(" AND slot_id = ?");
        binds.push(s);
    }
    if let Some(f) = from.as_deref() {
        sql.push_str(" AND date >= ?");
        binds.push(f);
    }
    if let Some(t) = to.as_deref() {
        sql.push_str(" AND date <= ?");
        binds.push(t);
    }
    sql.push_str(" ORDER BY date, start_datetime, id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds.iter()), |row| {
            let id: String = row.get(0)?;
            let slot_id: String = row.get(1)?;
            let class_ref: Option<String> = row.get(2)?;
            let course_ref: String = row.get(3)?;
            let teacher_ref: String = row.get(4)?;
            let date: String = row.get(5)?;
            let start_datetime: String = row.get(6)?;
            let end_datetime: String = row.get(7)?;
            let location_type: String = row.get(8)?;
            let location: Option<String> = row.get(9)?;
            let status: String = row.get(10)?;
            Ok(json!({
                "id": id,
                "slotId": slot_id,
                "classRef": class_ref,
                "courseRef": course_ref,
                "teacherRef": teacher_ref,
                "date": date,
                "startDatetime": start_datetime,
                "endDatetime": end_datetime,
                "locationType": location_type,
                "location": location,
                "status": status
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(instances) => ok(&req.id, json!({ "instances": instances })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "instances.generate" => Some(handle_generate(state, req)),
        "instances.list" => Some(handle_list(state, req)),
        _ => None,
    }
}

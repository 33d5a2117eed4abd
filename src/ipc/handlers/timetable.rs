use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule::DayOfWeek;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Map, Value as JsonValue};

use super::slots::{row_to_slot, slot_json, SlotRow, SLOT_COLUMNS};

/// Flat list ordering: weekday number (Sunday = 0), then start time.
fn sort_slots(slots: &mut [SlotRow]) {
    slots.sort_by(|a, b| {
        let an = DayOfWeek::parse(&a.day_of_week).map(|d| d.number()).unwrap_or(7);
        let bn = DayOfWeek::parse(&b.day_of_week).map(|d| d.number()).unwrap_or(7);
        an.cmp(&bn)
            .then_with(|| a.start_time.cmp(&b.start_time))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn active_slots_where(
    conn: &Connection,
    clause: &str,
    binds: &[&str],
) -> anyhow::Result<Vec<SlotRow>> {
    let sql = format!(
        "SELECT {} FROM schedule_slots WHERE is_active = 1{}",
        SLOT_COLUMNS, clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds.iter()), row_to_slot)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn list_response(req: &Request, mut slots: Vec<SlotRow>) -> serde_json::Value {
    sort_slots(&mut slots);
    ok(
        &req.id,
        json!({ "slots": slots.iter().map(slot_json).collect::<Vec<_>>() }),
    )
}

fn handle_list_by_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let teacher_ref = match required_str(req, "teacherRef") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match active_slots_where(conn, " AND teacher_ref = ?", &[&teacher_ref]) {
        Ok(slots) => list_response(req, slots),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list_by_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_ref = match required_str(req, "courseRef") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match active_slots_where(conn, " AND course_ref = ?", &[&course_ref]) {
        Ok(slots) => list_response(req, slots),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list_by_day_and_room(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
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
    let room = match required_str(req, "room") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match active_slots_where(
        conn,
        " AND day_of_week = ? AND room = ?",
        &[day.as_str(), &room],
    ) {
        Ok(slots) => list_response(req, slots),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Active slots grouped by weekday; all seven day keys are always present so
/// a UI can render an empty column without special-casing.
fn handle_weekly(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let teacher_ref = opt_str(req, "teacherRef");
    let course_ref = opt_str(req, "courseRef");
    let room = opt_str(req, "room");

    let mut clause = String::new();
    let mut binds: Vec<&str> = Vec::new();
    if let Some(t) = teacher_ref.as_deref() {
        clause.push_str(" AND teacher_ref = ?");
        binds.push(t);
    }
    if let Some(c) = course_ref.as_deref() {
        clause.push_str(" AND course_ref = ?");
        binds.push(c);
    }
    if let Some(r) = room.as_deref() {
        clause.push_str(" AND room = ?");
        binds.push(r);
    }

    let mut slots = match active_slots_where(conn, &clause, &binds) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    slots.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut days = Map::new();
    for day in DayOfWeek::ALL {
        days.insert(day.as_str().to_string(), json!([]));
    }
    for slot in &slots {
        if let Some(JsonValue::Array(bucket)) = days.get_mut(slot.day_of_week.as_str()) {
            bucket.push(slot_json(slot));
        }
    }

    ok(&req.id, json!({ "days": days }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "slots.listByTeacher" => Some(handle_list_by_teacher(state, req)),
        "slots.listByCourse" => Some(handle_list_by_course(state, req)),
        "slots.listByDayAndRoom" => Some(handle_list_by_day_and_room(state, req)),
        "timetable.weekly" => Some(handle_weekly(state, req)),
        _ => None,
    }
}

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_bool, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

// The scheduler does not own teachers, courses, or actors; these registries
// mirror just the fields the conflict checker and approval gate read.

fn handle_teachers_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let display_name = match required_str(req, "displayName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("active {}", msg), None),
    };
    let teacher_id = req
        .params
        .get("teacherId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, display_name, active) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name,
                                       active = excluded.active",
        (&teacher_id, &display_name, active as i64),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(
        &req.id,
        json!({ "teacherId": teacher_id, "displayName": display_name, "active": active }),
    )
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn
        .prepare("SELECT id, display_name, active FROM teachers ORDER BY display_name, id")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let display_name: String = row.get(1)?;
            let active: i64 = row.get(2)?;
            Ok(json!({
                "teacherId": id,
                "displayName": display_name,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_id = req
        .params
        .get("courseId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, code, title) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET code = excluded.code, title = excluded.title",
        (&course_id, &code, &title),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(
        &req.id,
        json!({ "courseId": course_id, "code": code, "title": title }),
    )
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare("SELECT id, code, title FROM courses ORDER BY code, id") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let title: String = row.get(2)?;
            Ok(json!({ "courseId": id, "code": code, "title": title }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_actors_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let display_name = match required_str(req, "displayName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let can_schedule = match parse_bool(req.params.get("canSchedule"), false) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("canSchedule {}", msg), None),
    };
    let can_approve = match parse_bool(req.params.get("canApprove"), false) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("canApprove {}", msg), None),
    };
    let actor_id = req
        .params
        .get("actorId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Err(e) = conn.execute(
        "INSERT INTO actors(id, display_name, can_schedule, can_approve) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name,
                                       can_schedule = excluded.can_schedule,
                                       can_approve = excluded.can_approve",
        (
            &actor_id,
            &display_name,
            can_schedule as i64,
            can_approve as i64,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "actors" })),
        );
    }

    ok(
        &req.id,
        json!({
            "actorId": actor_id,
            "displayName": display_name,
            "canSchedule": can_schedule,
            "canApprove": can_approve
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "directory.teachers.upsert" => Some(handle_teachers_upsert(state, req)),
        "directory.teachers.list" => Some(handle_teachers_list(state, req)),
        "directory.courses.upsert" => Some(handle_courses_upsert(state, req)),
        "directory.courses.list" => Some(handle_courses_list(state, req)),
        "directory.actors.upsert" => Some(handle_actors_upsert(state, req)),
        _ => None,
    }
}

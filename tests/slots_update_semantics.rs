
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let workspace = temp_dir("timetable-update");
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s2",
        "directory.teachers.upsert",
        json!({ "teacherId": "t1", "displayName": "Ada Byron" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s3",
        "directory.courses.upsert",
        json!({ "courseId": "c1", "code": "MAT101", "title": "Mathematics" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s4",
        "directory.actors.upsert",
        json!({ "actorId": "sched", "displayName": "Scheduler", "canSchedule": true }),
    );
}

fn create_slot(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    day: &str,
    start: &str,
    end: &str,
    room: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "slots.create",
        json!({
            "courseRef": "c1",
            "teacherRef": "t1",
            "dayOfWeek": day,
            "startTime": start,
            "endTime": end,
            "room": room,
            "createdBy": "sched"
        }),
    );
    created
        .get("slot")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())
        .expect("slot id")
        .to_string()
}

#[test]
fn update_excludes_itself_from_conflict_search() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader);

    let slot = create_slot(&mut stdin, &mut reader, "1", "monday", "09:00", "10:00", "101");

    // Shifting a slot within its own window must not collide with itself.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "slots.update",
        json!({
            "slotId": slot,
            "actorId": "sched",
            "patch": { "startTime": "09:30", "endTime": "10:30" }
        }),
    );
    assert_eq!(
        updated
            .get("slot")
            .and_then(|s| s.get("startTime"))
            .and_then(|v| v.as_str()),
        Some("09:30")
    );

    let probe = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "slots.checkConflict",
        json!({
            "teacherRef": "t1",
            "dayOfWeek": "monday",
            "startTime": "09:30",
            "endTime": "10:30",
            "excludeId": slot
        }),
    );
    assert!(probe.get("conflict").map(|c| c.is_null()).unwrap_or(false));
}

#[test]
fn conflicting_update_leaves_slot_unchanged() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader);

    let first = create_slot(&mut stdin, &mut reader, "1", "monday", "09:00", "10:00", "101");
    let second = create_slot(&mut stdin, &mut reader, "2", "monday", "11:00", "12:00", "102");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "slots.update",
        json!({
            "slotId": second,
            "actorId": "sched",
            "patch": { "startTime": "09:30", "endTime": "10:30" }
        }),
        "conflict",
    );
    assert_eq!(
        error
            .get("details")
            .and_then(|d| d.get("slot"))
            .and_then(|s| s.get("id"))
            .and_then(|v| v.as_str()),
        Some(first.as_str())
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "slots.listByTeacher",
        json!({ "teacherRef": "t1" }),
    );
    let slots = listed
        .get("slots")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let stored = slots
        .iter()
        .find(|s| s.get("id").and_then(|v| v.as_str()) == Some(second.as_str()))
        .expect("second slot still listed");
    assert_eq!(
        stored.get("startTime").and_then(|v| v.as_str()),
        Some("11:00")
    );
    assert_eq!(stored.get("endTime").and_then(|v| v.as_str()), Some("12:00"));
}

#[test]
fn update_rejects_unknown_fields_and_dead_slots() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader);

    let slot = create_slot(&mut stdin, &mut reader, "1", "tuesday", "09:00", "10:00", "101");

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "slots.update",
        json!({
            "slotId": slot,
            "actorId": "sched",
            "patch": { "isActive": false }
        }),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "slots.update",
        json!({
            "slotId": "missing",
            "actorId": "sched",
            "patch": { "room": "202" }
        }),
        "not_found",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "slots.deactivate",
        json!({ "slotId": slot, "actorId": "sched" }),
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "slots.update",
        json!({
            "slotId": slot,
            "actorId": "sched",
            "patch": { "room": "202" }
        }),
        "approval_state",
    );
    // Deactivation is terminal; a second deactivate is a state error.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "slots.deactivate",
        json!({ "slotId": slot, "actorId": "sched" }),
        "approval_state",
    );
}

#[test]
fn update_validates_effective_range() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader);

    let slot = create_slot(&mut stdin, &mut reader, "1", "wednesday", "09:00", "10:00", "101");

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "slots.update",
        json!({
            "slotId": slot,
            "actorId": "sched",
            "patch": { "effectiveFrom": "2024-06-30", "effectiveTo": "2024-01-01" }
        }),
        "invalid_range",
    );
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "slots.update",
        json!({
            "slotId": slot,
            "actorId": "sched",
            "patch": { "effectiveFrom": "2024-01-01", "effectiveTo": "2024-06-30" }
        }),
    );
    assert_eq!(
        updated
            .get("slot")
            .and_then(|s| s.get("effectiveFrom"))
            .and_then(|v| v.as_str()),
        Some("2024-01-01")
    );
}

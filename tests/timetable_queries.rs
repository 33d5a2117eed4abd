
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_ok, spawn_sidecar, temp_dir};

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let workspace = temp_dir("timetable-queries");
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
        "directory.teachers.upsert",
        json!({ "teacherId": "t2", "displayName": "Grace Hopper" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s4",
        "directory.courses.upsert",
        json!({ "courseId": "c1", "code": "MAT101", "title": "Mathematics" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s5",
        "directory.courses.upsert",
        json!({ "courseId": "c2", "code": "PHY201", "title": "Physics" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s6",
        "directory.actors.upsert",
        json!({ "actorId": "sched", "displayName": "Scheduler", "canSchedule": true }),
    );
}

fn create(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    course: &str,
    teacher: &str,
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
            "courseRef": course,
            "teacherRef": teacher,
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
fn list_queries_filter_and_order_active_slots() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader);

    let wed = create(
        &mut stdin, &mut reader, "1", "c1", "t1", "wednesday", "09:00", "10:00", "101",
    );
    let mon_late = create(
        &mut stdin, &mut reader, "2", "c2", "t1", "monday", "13:00", "14:00", "102",
    );
    let mon_early = create(
        &mut stdin, &mut reader, "3", "c1", "t1", "monday", "08:00", "09:00", "101",
    );
    let _other_teacher = create(
        &mut stdin, &mut reader, "4", "c1", "t2", "monday", "08:00", "09:00", "103",
    );

    // Per-teacher list comes back in weekday-then-time order.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "slots.listByTeacher",
        json!({ "teacherRef": "t1" }),
    );
    let ids: Vec<String> = listed
        .get("slots")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|s| s.get("id").and_then(|v| v.as_str()).map(String::from))
        .collect();
    assert_eq!(ids, vec![mon_early.clone(), mon_late.clone(), wed.clone()]);

    let by_course = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "slots.listByCourse",
        json!({ "courseRef": "c2" }),
    );
    let ids: Vec<String> = by_course
        .get("slots")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|s| s.get("id").and_then(|v| v.as_str()).map(String::from))
        .collect();
    assert_eq!(ids, vec![mon_late.clone()]);

    let by_room = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "slots.listByDayAndRoom",
        json!({ "dayOfWeek": "monday", "room": "101" }),
    );
    let ids: Vec<String> = by_room
        .get("slots")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|s| s.get("id").and_then(|v| v.as_str()).map(String::from))
        .collect();
    assert_eq!(ids, vec![mon_early.clone()]);

    // Deactivated slots drop out of every query.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "slots.deactivate",
        json!({ "slotId": mon_early, "actorId": "sched" }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "slots.listByTeacher",
        json!({ "teacherRef": "t1" }),
    );
    assert_eq!(
        listed
            .get("slots")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );
}

#[test]
fn weekly_timetable_groups_by_day() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader);

    let mon_a = create(
        &mut stdin, &mut reader, "1", "c1", "t1", "monday", "09:00", "10:00", "101",
    );
    let mon_b = create(
        &mut stdin, &mut reader, "2", "c2", "t2", "monday", "08:00", "09:00", "102",
    );
    let _fri = create(
        &mut stdin, &mut reader, "3", "c1", "t2", "friday", "10:00", "11:00", "101",
    );

    let table = request_ok(&mut stdin, &mut reader, "4", "timetable.weekly", json!({}));
    let days = table.get("days").expect("days");

    // All seven day keys are present even when empty.
    for key in [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ] {
        assert!(days.get(key).and_then(|v| v.as_array()).is_some(), "{}", key);
    }
    assert_eq!(
        days.get("tuesday").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let monday = days.get("monday").and_then(|v| v.as_array()).cloned().unwrap();
    let ids: Vec<&str> = monday
        .iter()
        .filter_map(|s| s.get("id").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(ids, vec![mon_b.as_str(), mon_a.as_str()]);

    // Filters narrow the grid.
    let only_t1 = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "timetable.weekly",
        json!({ "teacherRef": "t1" }),
    );
    let days = only_t1.get("days").expect("days");
    assert_eq!(
        days.get("monday").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    assert_eq!(
        days.get("friday").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let only_room = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "timetable.weekly",
        json!({ "room": "101" }),
    );
    let days = only_room.get("days").expect("days");
    assert_eq!(
        days.get("monday").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    assert_eq!(
        days.get("friday").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
}

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("timetable-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "directory.teachers.upsert",
        json!({ "teacherId": "t1", "displayName": "Smoke Teacher" }),
    );
    let _ = request(&mut stdin, &mut reader, "4", "directory.teachers.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "directory.courses.upsert",
        json!({ "courseId": "c1", "code": "SMK100", "title": "Smoke Course" }),
    );
    let _ = request(&mut stdin, &mut reader, "6", "directory.courses.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "directory.actors.upsert",
        json!({ "actorId": "sched", "displayName": "Smoke Actor", "canSchedule": true, "canApprove": true }),
    );
    let _ = request(&mut stdin, &mut reader, "8", "setup.get", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "setup.update",
        json!({ "section": "scheduling", "patch": { "generationOnExisting": "skip" } }),
    );

    let created = request(
        &mut stdin,
        &mut reader,
        "10",
        "slots.create",
        json!({
            "courseRef": "c1",
            "teacherRef": "t1",
            "dayOfWeek": "monday",
            "startTime": "09:00",
            "endTime": "10:00",
            "room": "101",
            "createdBy": "sched"
        }),
    );
    let slot_id = created
        .get("result")
        .and_then(|v| v.get("slot"))
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())
        .expect("slot id")
        .to_string();

    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "slots.checkConflict",
        json!({
            "teacherRef": "t1",
            "dayOfWeek": "monday",
            "startTime": "09:30",
            "endTime": "10:30"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "slots.update",
        json!({ "slotId": slot_id, "actorId": "sched", "patch": { "room": "102" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "slots.listByTeacher",
        json!({ "teacherRef": "t1" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "slots.listByCourse",
        json!({ "courseRef": "c1" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "slots.listByDayAndRoom",
        json!({ "dayOfWeek": "monday", "room": "102" }),
    );
    let _ = request(&mut stdin, &mut reader, "16", "timetable.weekly", json!({}));
    let _ = request(&mut stdin, &mut reader, "17", "approvals.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "instances.generate",
        json!({
            "slotId": slot_id,
            "actorId": "sched",
            "startDate": "2024-04-01",
            "endDate": "2024-04-30"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "19",
        "instances.list",
        json!({ "slotId": slot_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "slots.deactivate",
        json!({ "slotId": slot_id, "actorId": "sched" }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

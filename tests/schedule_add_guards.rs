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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected error response: {}",
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
}

struct Fixture {
    class_a: String,
    class_b: String,
    teacher_a: String,
    teacher_b: String,
    subject: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Fixture {
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
        "years.create",
        json!({ "label": "2025-2026" }),
    );
    let class_a = request_ok(stdin, reader, "s3", "classes.create", json!({ "name": "5A" }))
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let class_b = request_ok(stdin, reader, "s4", "classes.create", json!({ "name": "5B" }))
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let teacher_a = request_ok(
        stdin,
        reader,
        "s5",
        "teachers.create",
        json!({ "lastName": "Adler", "firstName": "Marie" }),
    )
    .get("teacherId")
    .and_then(|v| v.as_str())
    .expect("teacherId")
    .to_string();
    let teacher_b = request_ok(
        stdin,
        reader,
        "s6",
        "teachers.create",
        json!({ "lastName": "Brunel", "firstName": "Paul" }),
    )
    .get("teacherId")
    .and_then(|v| v.as_str())
    .expect("teacherId")
    .to_string();
    let subject = request_ok(
        stdin,
        reader,
        "s7",
        "subjects.create",
        json!({ "name": "Mathematics" }),
    )
    .get("subjectId")
    .and_then(|v| v.as_str())
    .expect("subjectId")
    .to_string();
    Fixture {
        class_a,
        class_b,
        teacher_a,
        teacher_b,
        subject,
    }
}

#[test]
fn back_to_back_room_reuse_is_accepted() {
    let workspace = temp_dir("timetable-add-back-to-back");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.add",
        json!({
            "classId": fx.class_a,
            "subjectId": fx.subject,
            "teacherId": fx.teacher_a,
            "weekday": "monday",
            "start": "08:00",
            "end": "09:00",
            "room": "101"
        }),
    );
    // Same room, immediately after: touching endpoints never collide.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.add",
        json!({
            "classId": fx.class_b,
            "subjectId": fx.subject,
            "teacherId": fx.teacher_b,
            "weekday": "monday",
            "start": "09:00",
            "end": "10:00",
            "room": "101"
        }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "3", "schedule.list", json!({}));
    assert_eq!(
        listed.get("entries").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn teacher_double_booking_is_rejected_with_classification() {
    let workspace = temp_dir("timetable-add-double-book");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.add",
        json!({
            "classId": fx.class_a,
            "subjectId": fx.subject,
            "teacherId": fx.teacher_a,
            "weekday": "tuesday",
            "start": "10:00",
            "end": "11:00"
        }),
    );
    let existing_id = added
        .get("entryId")
        .and_then(|v| v.as_str())
        .expect("entryId")
        .to_string();

    let rejected = request(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.add",
        json!({
            "classId": fx.class_b,
            "subjectId": fx.subject,
            "teacherId": fx.teacher_a,
            "weekday": "tuesday",
            "start": "10:30",
            "end": "11:30"
        }),
    );
    assert_eq!(error_code(&rejected), "schedule_conflict");
    let conflicts = rejected
        .pointer("/error/details/conflicts")
        .and_then(|v| v.as_array())
        .expect("conflict details");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(
        conflicts[0].get("entryId").and_then(|v| v.as_str()),
        Some(existing_id.as_str())
    );
    assert_eq!(
        conflicts[0].get("kinds").and_then(|v| v.as_array()),
        Some(&vec![json!("teacher")])
    );

    // Nothing was written by the rejected request.
    let listed = request_ok(&mut stdin, &mut reader, "3", "schedule.list", json!({}));
    assert_eq!(
        listed.get("entries").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn validation_rejects_bad_input_before_writing() {
    let workspace = temp_dir("timetable-add-validation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let inverted = request(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.add",
        json!({
            "classId": fx.class_a,
            "subjectId": fx.subject,
            "weekday": "monday",
            "start": "10:00",
            "end": "09:00"
        }),
    );
    assert_eq!(error_code(&inverted), "invalid_time_range");

    let zero_length = request(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.add",
        json!({
            "classId": fx.class_a,
            "subjectId": fx.subject,
            "weekday": "monday",
            "start": "09:00",
            "end": "09:00"
        }),
    );
    assert_eq!(error_code(&zero_length), "invalid_time_range");

    let unknown_class = request(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.add",
        json!({
            "classId": "missing",
            "subjectId": fx.subject,
            "weekday": "monday",
            "start": "08:00",
            "end": "09:00"
        }),
    );
    assert_eq!(error_code(&unknown_class), "not_found");

    let bad_weekday = request(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.add",
        json!({
            "classId": fx.class_a,
            "subjectId": fx.subject,
            "weekday": "sunday",
            "start": "08:00",
            "end": "09:00"
        }),
    );
    assert_eq!(error_code(&bad_weekday), "bad_params");

    let listed = request_ok(&mut stdin, &mut reader, "5", "schedule.list", json!({}));
    assert_eq!(
        listed.get("entries").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn weekday_casing_normalizes_on_input() {
    let workspace = temp_dir("timetable-add-weekday-case");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.add",
        json!({
            "classId": fx.class_a,
            "subjectId": fx.subject,
            "weekday": "MONDAY",
            "start": "08:00",
            "end": "09:00"
        }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "2", "schedule.list", json!({}));
    let entries = listed.get("entries").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].get("weekday").and_then(|v| v.as_str()),
        Some("monday")
    );

    // Mixed casing still collides with the normalized entry.
    let rejected = request(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.add",
        json!({
            "classId": fx.class_a,
            "subjectId": fx.subject,
            "weekday": "Monday",
            "start": "08:30",
            "end": "09:30"
        }),
    );
    assert_eq!(error_code(&rejected), "schedule_conflict");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

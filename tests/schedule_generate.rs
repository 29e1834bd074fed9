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

fn created_id(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, result))
        .to_string()
}

fn list_entries(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    class_id: &str,
) -> Vec<serde_json::Value> {
    request_ok(
        stdin,
        reader,
        id,
        "schedule.list",
        json!({ "classId": class_id }),
    )
    .get("entries")
    .and_then(|v| v.as_array())
    .cloned()
    .expect("entries")
}

#[test]
fn regeneration_wipes_the_class_year_and_nothing_else() {
    let workspace = temp_dir("timetable-generate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.create",
        json!({ "label": "2024-2025" }),
    );
    let class_target = created_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "classes.create",
            json!({ "name": "5A", "level": "g5" }),
        ),
        "classId",
    );
    let class_other = created_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "classes.create",
            json!({ "name": "6A", "level": "g6" }),
        ),
        "classId",
    );
    let s1 = created_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "5",
            "subjects.create",
            json!({ "name": "Arithmetic", "level": "g5" }),
        ),
        "subjectId",
    );
    let s2 = created_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "6",
            "subjects.create",
            json!({ "name": "Grammar", "level": "g5" }),
        ),
        "subjectId",
    );
    let s_other = created_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "7",
            "subjects.create",
            json!({ "name": "Geometry", "level": "g6" }),
        ),
        "subjectId",
    );

    // Three prior entries for the target class, one for the other class.
    for (i, (weekday, start, end)) in [
        ("monday", "08:00", "09:00"),
        ("tuesday", "08:00", "09:00"),
        ("wednesday", "08:00", "09:00"),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("8-{}", i),
            "schedule.add",
            json!({
                "classId": class_target,
                "subjectId": s1,
                "weekday": weekday,
                "start": start,
                "end": end
            }),
        );
    }
    let other_entry = created_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "9",
            "schedule.add",
            json!({
                "classId": class_other,
                "subjectId": s_other,
                "weekday": "monday",
                "start": "08:00",
                "end": "09:00"
            }),
        ),
        "entryId",
    );
    assert_eq!(list_entries(&mut stdin, &mut reader, "10", &class_target).len(), 3);

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "schedule.generate",
        json!({
            "classId": class_target,
            "weekdays": ["monday", "tuesday"]
        }),
    );
    assert_eq!(generated.get("deleted").and_then(|v| v.as_i64()), Some(3));
    // Default slots are five two-ish-hour blocks with 12:00-13:00 held
    // for lunch: four usable slots per day over two days.
    assert_eq!(generated.get("created").and_then(|v| v.as_i64()), Some(8));

    let entries = list_entries(&mut stdin, &mut reader, "12", &class_target);
    assert_eq!(entries.len(), 8);
    for entry in &entries {
        assert!(entry.get("teacherId").map(|v| v.is_null()).unwrap_or(false));
        assert_ne!(
            entry.get("start").and_then(|v| v.as_str()),
            Some("12:00"),
            "lunch slot must stay empty"
        );
        let subject_id = entry.get("subjectId").and_then(|v| v.as_str()).unwrap_or("");
        assert!(
            subject_id == s1 || subject_id == s2,
            "level-matched subjects only, got {}",
            subject_id
        );
    }

    // The other class kept its single entry.
    let other_entries = list_entries(&mut stdin, &mut reader, "13", &class_other);
    assert_eq!(other_entries.len(), 1);
    assert_eq!(
        other_entries[0].get("id").and_then(|v| v.as_str()),
        Some(other_entry.as_str())
    );

    // Explicit subject list cycles round-robin in plan order.
    let regenerated = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "schedule.generate",
        json!({
            "classId": class_target,
            "subjectIds": [s1, s2],
            "weekdays": ["monday"]
        }),
    );
    let planned = regenerated
        .get("entries")
        .and_then(|v| v.as_array())
        .expect("entries");
    assert_eq!(planned.len(), 4);
    let subjects: Vec<&str> = planned
        .iter()
        .filter_map(|e| e.get("subjectId").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(subjects, vec![s1.as_str(), s2.as_str(), s1.as_str(), s2.as_str()]);
    assert_eq!(
        planned[0].get("start").and_then(|v| v.as_str()),
        Some("08:00")
    );

    let unknown = request(
        &mut stdin,
        &mut reader,
        "15",
        "schedule.generate",
        json!({ "classId": "missing" }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

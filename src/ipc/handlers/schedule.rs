use crate::audit;
use crate::conflict::{
    self, detect_conflicts, plan_slots, would_conflict, EntryDraft, ScheduleEntry, TimeOfDay,
    TimeWindow, Weekday,
};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(code: &'static str, e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new(code, e.to_string())
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn actor(params: &serde_json::Value) -> String {
    get_optional_str(params, "actor").unwrap_or_else(|| "local".to_string())
}

fn parse_weekday(raw: &str) -> Result<Weekday, HandlerErr> {
    Weekday::parse(raw).ok_or_else(|| {
        HandlerErr::new(
            "bad_params",
            format!("weekday must be monday..saturday, got {}", raw),
        )
    })
}

fn parse_time(params: &serde_json::Value, key: &str) -> Result<TimeOfDay, HandlerErr> {
    let raw = get_required_str(params, key)?;
    TimeOfDay::parse(&raw)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be HH:MM, got {}", key, raw)))
}

fn parse_window(params: &serde_json::Value, start_key: &str, end_key: &str) -> Result<TimeWindow, HandlerErr> {
    let start = parse_time(params, start_key)?;
    let end = parse_time(params, end_key)?;
    TimeWindow::new(start, end).ok_or_else(|| {
        HandlerErr::new(
            "invalid_time_range",
            format!("{} must be before {}", start_key, end_key),
        )
    })
}

/// The engine takes the year as data; only this boundary consults the
/// active-year flag, and only when the caller did not name a year.
fn resolve_year_id(conn: &Connection, params: &serde_json::Value) -> Result<String, HandlerErr> {
    if let Some(year_id) = get_optional_str(params, "yearId") {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM academic_years WHERE id = ?",
                [&year_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| db_err("db_query_failed", e))?;
        if exists.is_none() {
            return Err(HandlerErr::new("not_found", "academic year not found"));
        }
        return Ok(year_id);
    }
    db::active_year_id(conn)
        .map_err(|e| db_err("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("no_active_year", "no active academic year; create one first"))
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(|e| db_err("db_query_failed", e))
}

fn require_class(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    if !row_exists(conn, "SELECT 1 FROM classes WHERE id = ?", class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    Ok(())
}

fn require_subject(conn: &Connection, subject_id: &str) -> Result<(), HandlerErr> {
    if !row_exists(conn, "SELECT 1 FROM subjects WHERE id = ?", subject_id)? {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }
    Ok(())
}

fn require_teacher(conn: &Connection, teacher_id: &str) -> Result<(), HandlerErr> {
    if !row_exists(conn, "SELECT 1 FROM teachers WHERE id = ?", teacher_id)? {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }
    Ok(())
}

struct RawEntry {
    id: String,
    academic_year_id: String,
    class_id: String,
    subject_id: String,
    teacher_id: Option<String>,
    weekday: String,
    start_minute: i64,
    end_minute: i64,
    room: Option<String>,
}

const ENTRY_COLUMNS: &str = "id, academic_year_id, class_id, subject_id, teacher_id, weekday, start_minute, end_minute, room";

fn map_raw(row: &rusqlite::Row) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        academic_year_id: row.get(1)?,
        class_id: row.get(2)?,
        subject_id: row.get(3)?,
        teacher_id: row.get(4)?,
        weekday: row.get(5)?,
        start_minute: row.get(6)?,
        end_minute: row.get(7)?,
        room: row.get(8)?,
    })
}

fn convert_raw(raw: RawEntry) -> Result<ScheduleEntry, HandlerErr> {
    let weekday = Weekday::parse(&raw.weekday).ok_or_else(|| {
        HandlerErr::new(
            "db_corrupt",
            format!("entry {} has invalid weekday {}", raw.id, raw.weekday),
        )
    })?;
    let window = TimeOfDay::from_minutes(raw.start_minute)
        .zip(TimeOfDay::from_minutes(raw.end_minute))
        .and_then(|(s, e)| TimeWindow::new(s, e))
        .ok_or_else(|| {
            HandlerErr::new(
                "db_corrupt",
                format!("entry {} has invalid time range", raw.id),
            )
        })?;
    Ok(ScheduleEntry {
        id: raw.id,
        academic_year_id: raw.academic_year_id,
        class_id: raw.class_id,
        subject_id: raw.subject_id,
        teacher_id: raw.teacher_id,
        weekday,
        window,
        room: raw.room,
    })
}

fn load_entries_where(
    conn: &Connection,
    where_sql: &str,
    params: Vec<Value>,
) -> Result<Vec<ScheduleEntry>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM schedule_entries WHERE {} ORDER BY id",
        ENTRY_COLUMNS, where_sql
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| db_err("db_query_failed", e))?;
    let raws = stmt
        .query_map(params_from_iter(params), map_raw)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    raws.into_iter().map(convert_raw).collect()
}

fn load_year_entries(conn: &Connection, year_id: &str) -> Result<Vec<ScheduleEntry>, HandlerErr> {
    load_entries_where(
        conn,
        "academic_year_id = ?",
        vec![Value::from(year_id.to_string())],
    )
}

fn load_slot_entries(
    conn: &Connection,
    year_id: &str,
    weekday: Weekday,
) -> Result<Vec<ScheduleEntry>, HandlerErr> {
    load_entries_where(
        conn,
        "academic_year_id = ? AND weekday = ?",
        vec![
            Value::from(year_id.to_string()),
            Value::from(weekday.as_str().to_string()),
        ],
    )
}

fn load_entry(conn: &Connection, entry_id: &str) -> Result<ScheduleEntry, HandlerErr> {
    let sql = format!("SELECT {} FROM schedule_entries WHERE id = ?", ENTRY_COLUMNS);
    let raw = conn
        .query_row(&sql, [entry_id], map_raw)
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "schedule entry not found"))?;
    convert_raw(raw)
}

struct NameMaps {
    classes: HashMap<String, String>,
    subjects: HashMap<String, String>,
    teachers: HashMap<String, String>,
}

fn load_name_maps(conn: &Connection) -> Result<NameMaps, HandlerErr> {
    let mut classes = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT id, name FROM classes")
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    for (id, name) in rows {
        classes.insert(id, name);
    }

    let mut subjects = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT id, name FROM subjects")
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    for (id, name) in rows {
        subjects.insert(id, name);
    }

    let mut teachers = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT id, last_name, first_name FROM teachers")
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok((id, format!("{}, {}", last, first)))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    for (id, name) in rows {
        teachers.insert(id, name);
    }

    Ok(NameMaps {
        classes,
        subjects,
        teachers,
    })
}

fn entry_json(entry: &ScheduleEntry, names: &NameMaps) -> serde_json::Value {
    json!({
        "id": entry.id,
        "yearId": entry.academic_year_id,
        "classId": entry.class_id,
        "className": names.classes.get(&entry.class_id),
        "subjectId": entry.subject_id,
        "subjectName": names.subjects.get(&entry.subject_id),
        "teacherId": entry.teacher_id,
        "teacherName": entry.teacher_id.as_ref().and_then(|id| names.teachers.get(id)),
        "weekday": entry.weekday.as_str(),
        "start": entry.window.start().to_string(),
        "end": entry.window.end().to_string(),
        "room": entry.room,
    })
}

fn conflict_details(hits: &[conflict::CandidateConflict<'_>]) -> serde_json::Value {
    let conflicts: Vec<serde_json::Value> = hits
        .iter()
        .map(|h| {
            json!({
                "entryId": h.entry.id,
                "kinds": h.kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                "classId": h.entry.class_id,
                "teacherId": h.entry.teacher_id,
                "room": h.entry.room,
                "weekday": h.entry.weekday.as_str(),
                "start": h.entry.window.start().to_string(),
                "end": h.entry.window.end().to_string(),
            })
        })
        .collect();
    json!({ "conflicts": conflicts })
}

fn schedule_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = resolve_year_id(conn, params)?;

    let mut where_sql = String::from("academic_year_id = ?");
    let mut bound: Vec<Value> = vec![Value::from(year_id.clone())];
    if let Some(class_id) = get_optional_str(params, "classId") {
        where_sql.push_str(" AND class_id = ?");
        bound.push(Value::from(class_id));
    }
    if let Some(teacher_id) = get_optional_str(params, "teacherId") {
        where_sql.push_str(" AND teacher_id = ?");
        bound.push(Value::from(teacher_id));
    }
    if let Some(room) = get_optional_str(params, "room") {
        where_sql.push_str(" AND room = ?");
        bound.push(Value::from(room));
    }

    let mut entries = load_entries_where(conn, &where_sql, bound)?;
    entries.sort_by(|a, b| {
        (a.weekday, a.window.start(), &a.id).cmp(&(b.weekday, b.window.start(), &b.id))
    });

    let names = load_name_maps(conn)?;
    let rows: Vec<serde_json::Value> = entries.iter().map(|e| entry_json(e, &names)).collect();
    Ok(json!({ "yearId": year_id, "entries": rows }))
}

fn schedule_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let teacher_id = get_optional_str(params, "teacherId");
    let weekday = parse_weekday(&get_required_str(params, "weekday")?)?;
    let window = parse_window(params, "start", "end")?;
    let room = get_optional_str(params, "room");

    let year_id = resolve_year_id(conn, params)?;
    require_class(conn, &class_id)?;
    require_subject(conn, &subject_id)?;
    if let Some(teacher_id) = teacher_id.as_deref() {
        require_teacher(conn, teacher_id)?;
    }

    // Check and insert under one transaction so a concurrent writer can
    // never slip an overlapping entry between the two.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;

    let existing = load_slot_entries(&tx, &year_id, weekday)?;
    let draft = EntryDraft {
        academic_year_id: year_id.clone(),
        class_id: class_id.clone(),
        subject_id: subject_id.clone(),
        teacher_id: teacher_id.clone(),
        weekday,
        window,
        room: room.clone(),
    };
    let hits = would_conflict(&draft, &existing);
    if !hits.is_empty() {
        return Err(HandlerErr {
            code: "schedule_conflict",
            message: "requested slot collides with existing entries".to_string(),
            details: Some(conflict_details(&hits)),
        });
    }

    let entry_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO schedule_entries(
            id, academic_year_id, class_id, subject_id, teacher_id,
            weekday, start_minute, end_minute, room
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &entry_id,
            &year_id,
            &class_id,
            &subject_id,
            &teacher_id,
            weekday.as_str(),
            window.start().minutes() as i64,
            window.end().minutes() as i64,
            &room,
        ),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;

    audit::record(
        &tx,
        &actor(params),
        "schedule.add",
        &format!(
            "added entry {} {}-{} for class {}",
            weekday.as_str(),
            window.start(),
            window.end(),
            class_id
        ),
        Some(&entry_id),
    );
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    Ok(json!({ "entryId": entry_id, "yearId": year_id }))
}

fn schedule_remove(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    let entry = load_entry(conn, &entry_id)?;

    conn.execute("DELETE FROM schedule_entries WHERE id = ?", [&entry_id])
        .map_err(|e| db_err("db_delete_failed", e))?;

    audit::record(
        conn,
        &actor(params),
        "schedule.remove",
        &format!(
            "removed entry {} {}-{} for class {}",
            entry.weekday.as_str(),
            entry.window.start(),
            entry.window.end(),
            entry.class_id
        ),
        Some(&entry_id),
    );
    Ok(json!({ "ok": true }))
}

fn schedule_scan(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = resolve_year_id(conn, params)?;

    // Always scan the whole year; the optional params below only narrow
    // which pairs are reported, never how they are classified.
    let entries = load_year_entries(conn, &year_id)?;
    let mut pairs = detect_conflicts(&entries, &year_id);

    let by_id: HashMap<&str, &ScheduleEntry> =
        entries.iter().map(|e| (e.id.as_str(), e)).collect();

    let involving_class = get_optional_str(params, "classId");
    let involving_teacher = get_optional_str(params, "teacherId");
    let involving_room = get_optional_str(params, "room");
    pairs.retain(|p| {
        let (Some(a), Some(b)) = (by_id.get(p.first_id.as_str()), by_id.get(p.second_id.as_str()))
        else {
            return false;
        };
        let class_ok = involving_class
            .as_deref()
            .map(|c| a.class_id == c || b.class_id == c)
            .unwrap_or(true);
        let teacher_ok = involving_teacher
            .as_deref()
            .map(|t| a.teacher_id.as_deref() == Some(t) || b.teacher_id.as_deref() == Some(t))
            .unwrap_or(true);
        let room_ok = involving_room
            .as_deref()
            .map(|r| a.room.as_deref() == Some(r) || b.room.as_deref() == Some(r))
            .unwrap_or(true);
        class_ok && teacher_ok && room_ok
    });

    let names = load_name_maps(conn)?;
    let reported: Vec<serde_json::Value> = pairs
        .iter()
        .filter_map(|p| {
            let a = *by_id.get(p.first_id.as_str())?;
            let b = *by_id.get(p.second_id.as_str())?;
            Some(json!({
                "kind": p.kind.as_str(),
                "first": entry_json(a, &names),
                "second": entry_json(b, &names),
            }))
        })
        .collect();

    Ok(json!({
        "yearId": year_id,
        "count": reported.len(),
        "pairs": reported,
    }))
}

/// Resolution applies exactly one single-entity mutation and never
/// re-runs detection; clients re-run schedule.scan after mutating.
fn schedule_resolve(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    let action = get_required_str(params, "action")?;
    let entry = load_entry(conn, &entry_id)?;
    let who = actor(params);

    match action.as_str() {
        "retime" => {
            let window = parse_window(params, "newStart", "newEnd")?;
            conn.execute(
                "UPDATE schedule_entries SET start_minute = ?, end_minute = ? WHERE id = ?",
                (
                    window.start().minutes() as i64,
                    window.end().minutes() as i64,
                    &entry_id,
                ),
            )
            .map_err(|e| db_err("db_update_failed", e))?;
            audit::record(
                conn,
                &who,
                "schedule.retime",
                &format!(
                    "retimed entry from {}-{} to {}-{}",
                    entry.window.start(),
                    entry.window.end(),
                    window.start(),
                    window.end()
                ),
                Some(&entry_id),
            );
            Ok(json!({
                "entryId": entry_id,
                "action": action,
                "start": window.start().to_string(),
                "end": window.end().to_string(),
            }))
        }
        "reassignTeacher" => {
            let teacher_id = get_optional_str(params, "teacherId");
            if let Some(teacher_id) = teacher_id.as_deref() {
                require_teacher(conn, teacher_id)?;
            }
            conn.execute(
                "UPDATE schedule_entries SET teacher_id = ? WHERE id = ?",
                (&teacher_id, &entry_id),
            )
            .map_err(|e| db_err("db_update_failed", e))?;
            audit::record(
                conn,
                &who,
                "schedule.reassignTeacher",
                &format!(
                    "reassigned teacher from {} to {}",
                    entry.teacher_id.as_deref().unwrap_or("none"),
                    teacher_id.as_deref().unwrap_or("none")
                ),
                Some(&entry_id),
            );
            Ok(json!({ "entryId": entry_id, "action": action, "teacherId": teacher_id }))
        }
        "reassignRoom" => {
            let room = get_optional_str(params, "room");
            conn.execute(
                "UPDATE schedule_entries SET room = ? WHERE id = ?",
                (&room, &entry_id),
            )
            .map_err(|e| db_err("db_update_failed", e))?;
            audit::record(
                conn,
                &who,
                "schedule.reassignRoom",
                &format!(
                    "reassigned room from {} to {}",
                    entry.room.as_deref().unwrap_or("none"),
                    room.as_deref().unwrap_or("none")
                ),
                Some(&entry_id),
            );
            Ok(json!({ "entryId": entry_id, "action": action, "room": room }))
        }
        "delete" => {
            conn.execute("DELETE FROM schedule_entries WHERE id = ?", [&entry_id])
                .map_err(|e| db_err("db_delete_failed", e))?;
            audit::record(
                conn,
                &who,
                "schedule.resolveDelete",
                &format!(
                    "deleted entry {} {}-{} for class {}",
                    entry.weekday.as_str(),
                    entry.window.start(),
                    entry.window.end(),
                    entry.class_id
                ),
                Some(&entry_id),
            );
            Ok(json!({ "entryId": entry_id, "action": action }))
        }
        other => Err(HandlerErr::new(
            "bad_params",
            format!(
                "action must be one of retime, reassignTeacher, reassignRoom, delete; got {}",
                other
            ),
        )),
    }
}

fn window_from_minutes(start: i64, end: i64) -> Option<TimeWindow> {
    TimeWindow::new(TimeOfDay::from_minutes(start)?, TimeOfDay::from_minutes(end)?)
}

fn default_slots() -> Vec<TimeWindow> {
    // 08:00-10:00, 10:00-12:00, 12:00-13:00 (lunch), 13:00-15:00, 15:00-17:00
    [(480, 600), (600, 720), (720, 780), (780, 900), (900, 1020)]
        .iter()
        .filter_map(|&(s, e)| window_from_minutes(s, e))
        .collect()
}

fn parse_window_object(v: &serde_json::Value) -> Result<TimeWindow, HandlerErr> {
    let start = v
        .get("start")
        .and_then(|s| s.as_str())
        .and_then(TimeOfDay::parse)
        .ok_or_else(|| HandlerErr::new("bad_params", "slot start must be HH:MM"))?;
    let end = v
        .get("end")
        .and_then(|s| s.as_str())
        .and_then(TimeOfDay::parse)
        .ok_or_else(|| HandlerErr::new("bad_params", "slot end must be HH:MM"))?;
    TimeWindow::new(start, end)
        .ok_or_else(|| HandlerErr::new("invalid_time_range", "slot start must be before end"))
}

fn generation_subjects(
    conn: &Connection,
    params: &serde_json::Value,
    class_level: Option<&str>,
) -> Result<Vec<String>, HandlerErr> {
    if let Some(ids) = params.get("subjectIds").and_then(|v| v.as_array()) {
        let mut out = Vec::new();
        for v in ids {
            let id = v
                .as_str()
                .ok_or_else(|| HandlerErr::new("bad_params", "subjectIds must be strings"))?;
            require_subject(conn, id)?;
            out.push(id.to_string());
        }
        return Ok(out);
    }

    // Default to the subjects taught at the class's level.
    let (sql, bound): (&str, Vec<Value>) = match class_level {
        Some(level) => (
            "SELECT id FROM subjects WHERE level = ? ORDER BY name",
            vec![Value::from(level.to_string())],
        ),
        None => ("SELECT id FROM subjects ORDER BY name", Vec::new()),
    };
    let mut stmt = conn.prepare(sql).map_err(|e| db_err("db_query_failed", e))?;
    stmt.query_map(params_from_iter(bound), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))
}

fn schedule_generate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let year_id = resolve_year_id(conn, params)?;

    let class_level: Option<String> = conn
        .query_row("SELECT level FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "class not found"))?;

    let subject_ids = generation_subjects(conn, params, class_level.as_deref())?;
    if subject_ids.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            "no subjects to place; create subjects for the class level or pass subjectIds",
        ));
    }

    let weekdays: Vec<Weekday> = match params.get("weekdays").and_then(|v| v.as_array()) {
        Some(raw) => {
            let mut out = Vec::new();
            for v in raw {
                let s = v
                    .as_str()
                    .ok_or_else(|| HandlerErr::new("bad_params", "weekdays must be strings"))?;
                out.push(parse_weekday(s)?);
            }
            out
        }
        None => Weekday::ALL.to_vec(),
    };

    let slots: Vec<TimeWindow> = match params.get("slots").and_then(|v| v.as_array()) {
        Some(raw) => raw
            .iter()
            .map(parse_window_object)
            .collect::<Result<Vec<_>, _>>()?,
        None => default_slots(),
    };

    let lunch = match params.get("lunch") {
        None => window_from_minutes(720, 780),
        Some(v) if v.is_null() => None,
        Some(v) => Some(parse_window_object(v)?),
    };

    let planned = plan_slots(&subject_ids, &weekdays, &slots, lunch);

    // Destructive regeneration: wipe and rebuild the class's year under
    // one transaction so a failure cannot leave it half-deleted.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    let deleted = tx
        .execute(
            "DELETE FROM schedule_entries WHERE class_id = ? AND academic_year_id = ?",
            (&class_id, &year_id),
        )
        .map_err(|e| db_err("db_delete_failed", e))?;

    let mut created = Vec::new();
    for slot in &planned {
        let entry_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO schedule_entries(
                id, academic_year_id, class_id, subject_id, teacher_id,
                weekday, start_minute, end_minute, room
             ) VALUES(?, ?, ?, ?, NULL, ?, ?, ?, NULL)",
            (
                &entry_id,
                &year_id,
                &class_id,
                &slot.subject_id,
                slot.weekday.as_str(),
                slot.window.start().minutes() as i64,
                slot.window.end().minutes() as i64,
            ),
        )
        .map_err(|e| db_err("db_insert_failed", e))?;
        created.push(json!({
            "entryId": entry_id,
            "subjectId": slot.subject_id,
            "weekday": slot.weekday.as_str(),
            "start": slot.window.start().to_string(),
            "end": slot.window.end().to_string(),
        }));
    }

    audit::record(
        &tx,
        &actor(params),
        "schedule.generate",
        &format!(
            "regenerated schedule for class {}: {} entries replaced {}",
            class_id,
            created.len(),
            deleted
        ),
        Some(&class_id),
    );
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    Ok(json!({
        "yearId": year_id,
        "classId": class_id,
        "deleted": deleted,
        "created": created.len(),
        "entries": created,
    }))
}

fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.list" => Some(with_conn(state, req, schedule_list)),
        "schedule.add" => Some(with_conn(state, req, schedule_add)),
        "schedule.remove" => Some(with_conn(state, req, schedule_remove)),
        "schedule.scan" => Some(with_conn(state, req, schedule_scan)),
        "schedule.resolve" => Some(with_conn(state, req, schedule_resolve)),
        "schedule.generate" => Some(with_conn(state, req, schedule_generate)),
        _ => None,
    }
}

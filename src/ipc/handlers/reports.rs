use crate::conflict::Weekday;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::BTreeSet;

/// Builds the printable weekday-by-period grid for one class. This is a
/// pure projection of the stored entries; rendering is the client's job.
fn handle_schedule_grid_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let class_name: Option<String> = match conn
        .query_row("SELECT name FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(class_name) = class_name else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let year_id = match req.params.get("yearId").and_then(|v| v.as_str()) {
        Some(v) => Some(v.to_string()),
        None => match db::active_year_id(conn) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };
    let Some(year_id) = year_id else {
        return err(
            &req.id,
            "no_active_year",
            "no active academic year; create one first",
            None,
        );
    };
    let year_label: Option<String> = match conn
        .query_row(
            "SELECT label FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(year_label) = year_label else {
        return err(&req.id, "not_found", "academic year not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT se.weekday, se.start_minute, se.end_minute, s.name,
                COALESCE(t.last_name || ', ' || t.first_name, ''), COALESCE(se.room, '')
         FROM schedule_entries se
         JOIN subjects s ON s.id = se.subject_id
         LEFT JOIN teachers t ON t.id = se.teacher_id
         WHERE se.academic_year_id = ? AND se.class_id = ?
         ORDER BY se.start_minute, se.weekday",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map((&year_id, &class_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // One grid row per distinct time window, ascending.
    let mut windows: BTreeSet<(i64, i64)> = BTreeSet::new();
    for (_, start, end, _, _, _) in &rows {
        windows.insert((*start, *end));
    }

    let fmt_minutes = |m: i64| format!("{:02}:{:02}", m / 60, m % 60);
    let grid_rows: Vec<serde_json::Value> = windows
        .iter()
        .map(|&(start, end)| {
            let cells: Vec<serde_json::Value> = Weekday::ALL
                .iter()
                .map(|day| {
                    rows.iter()
                        .find(|(wd, s, e, _, _, _)| {
                            Weekday::parse(wd) == Some(*day) && *s == start && *e == end
                        })
                        .map(|(_, _, _, subject, teacher, room)| {
                            json!({
                                "subject": subject,
                                "teacher": if teacher.is_empty() { serde_json::Value::Null } else { json!(teacher) },
                                "room": if room.is_empty() { serde_json::Value::Null } else { json!(room) },
                            })
                        })
                        .unwrap_or(serde_json::Value::Null)
                })
                .collect();
            json!({
                "start": fmt_minutes(start),
                "end": fmt_minutes(end),
                "cells": cells,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "className": class_name,
            "yearId": year_id,
            "yearLabel": year_label,
            "columns": Weekday::ALL.iter().map(|d| d.as_str()).collect::<Vec<_>>(),
            "rows": grid_rows,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.scheduleGridModel" => Some(handle_schedule_grid_model(state, req)),
        _ => None,
    }
}

use crate::audit;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn actor(req: &Request) -> String {
    req.params
        .get("actor")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.last_name,
           t.first_name,
           t.specialty,
           (SELECT COUNT(*) FROM schedule_entries se WHERE se.teacher_id = t.id) AS entry_count
         FROM teachers t
         ORDER BY t.last_name, t.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let specialty: Option<String> = row.get(3)?;
            let entry_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "lastName": last_name,
                "firstName": first_name,
                "displayName": format!("{}, {}", last_name, first_name),
                "specialty": specialty,
                "entryCount": entry_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing firstName", None),
    };
    if last_name.is_empty() || first_name.is_empty() {
        return err(&req.id, "bad_params", "names must not be empty", None);
    }
    let specialty = req
        .params
        .get("specialty")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, last_name, first_name, specialty) VALUES(?, ?, ?, ?)",
        (&teacher_id, &last_name, &first_name, &specialty),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    audit::record(
        conn,
        &actor(req),
        "teachers.create",
        &format!("created teacher {}, {}", last_name, first_name),
        Some(&teacher_id),
    );
    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Schedule entries survive the delete as unassigned slots.
    if let Err(e) = tx.execute(
        "UPDATE schedule_entries SET teacher_id = NULL WHERE teacher_id = ?",
        [&teacher_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_entries" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    audit::record(
        conn,
        &actor(req),
        "teachers.delete",
        "deleted teacher and unassigned their entries",
        Some(&teacher_id),
    );
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}

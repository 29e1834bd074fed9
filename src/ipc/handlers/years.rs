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

fn handle_years_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "years": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           y.id,
           y.label,
           y.active,
           (SELECT COUNT(*) FROM schedule_entries se WHERE se.academic_year_id = y.id) AS entry_count
         FROM academic_years y
         ORDER BY y.label",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let label: String = row.get(1)?;
            let active: i64 = row.get(2)?;
            let entry_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "label": label,
                "active": active != 0,
                "entryCount": entry_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(years) => ok(&req.id, json!({ "years": years })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_years_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let label = match req.params.get("label").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing label", None),
    };
    if label.is_empty() {
        return err(&req.id, "bad_params", "label must not be empty", None);
    }
    let want_active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let existing_count: i64 = match conn.query_row("SELECT COUNT(*) FROM academic_years", [], |r| {
        r.get(0)
    }) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // The first year ever created is the active one regardless.
    let active = want_active || existing_count == 0;

    let year_id = Uuid::new_v4().to_string();
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if active {
        if let Err(e) = tx.execute("UPDATE academic_years SET active = 0", []) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.execute(
        "INSERT INTO academic_years(id, label, active) VALUES(?, ?, ?)",
        (&year_id, &label, active as i64),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "academic_years" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    audit::record(
        conn,
        &actor(req),
        "years.create",
        &format!("created academic year {}", label),
        Some(&year_id),
    );
    ok(
        &req.id,
        json!({ "yearId": year_id, "label": label, "active": active }),
    )
}

fn handle_years_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let year_id = match req.params.get("yearId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing yearId", None),
    };

    let label: Option<String> = match conn
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
    let Some(label) = label else {
        return err(&req.id, "not_found", "academic year not found", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("UPDATE academic_years SET active = 0", []) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute(
        "UPDATE academic_years SET active = 1 WHERE id = ?",
        [&year_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    audit::record(
        conn,
        &actor(req),
        "years.setActive",
        &format!("set active academic year to {}", label),
        Some(&year_id),
    );
    ok(&req.id, json!({ "yearId": year_id, "active": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "years.list" => Some(handle_years_list(state, req)),
        "years.create" => Some(handle_years_create(state, req)),
        "years.setActive" => Some(handle_years_set_active(state, req)),
        _ => None,
    }
}

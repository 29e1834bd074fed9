use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_audit_recent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "events": [] }));
    };

    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .filter(|v| (1..=500).contains(v))
        .unwrap_or(50);

    let mut stmt = match conn.prepare(
        "SELECT actor, action, description, entity_id, created_at
         FROM audit_log
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([limit], |row| {
            let actor: String = row.get(0)?;
            let action: String = row.get(1)?;
            let description: String = row.get(2)?;
            let entity_id: Option<String> = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok(json!({
                "actor": actor,
                "action": action,
                "description": description,
                "entityId": entity_id,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.recent" => Some(handle_audit_recent(state, req)),
        _ => None,
    }
}

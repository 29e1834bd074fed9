use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

/// Append one row to the audit trail. Best-effort: a failed audit write
/// must never fail the mutation it records, so errors are swallowed.
pub fn record(
    conn: &Connection,
    actor: &str,
    action: &str,
    description: &str,
    entity_id: Option<&str>,
) {
    let _ = conn.execute(
        "INSERT INTO audit_log(id, actor, action, description, entity_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            actor,
            action,
            description,
            entity_id,
            Utc::now().to_rfc3339(),
        ),
    );
}

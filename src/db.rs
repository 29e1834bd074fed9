use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("timetable.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            specialty TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_entries(
            id TEXT PRIMARY KEY,
            academic_year_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT,
            weekday TEXT NOT NULL,
            start_minute INTEGER NOT NULL,
            end_minute INTEGER NOT NULL,
            room TEXT,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    // Existing workspaces may predate the room column. Add if needed.
    ensure_schedule_entries_room(&conn)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_entries_year ON schedule_entries(academic_year_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_entries_year_weekday
         ON schedule_entries(academic_year_id, weekday)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_entries_class ON schedule_entries(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_entries_teacher ON schedule_entries(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log(
            id TEXT PRIMARY KEY,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            description TEXT NOT NULL,
            entity_id TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity_id)",
        [],
    )?;

    Ok(conn)
}

/// The single active academic year, if one has been created yet.
pub fn active_year_id(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM academic_years WHERE active = 1 ORDER BY label LIMIT 1",
        [],
        |r| r.get(0),
    )
    .optional()
}

fn ensure_schedule_entries_room(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "schedule_entries", "room")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE schedule_entries ADD COLUMN room TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

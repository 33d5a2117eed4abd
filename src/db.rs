use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("timetable.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            title TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS actors(
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            can_schedule INTEGER NOT NULL DEFAULT 0,
            can_approve INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_slots(
            id TEXT PRIMARY KEY,
            class_ref TEXT,
            course_ref TEXT NOT NULL,
            teacher_ref TEXT NOT NULL,
            day_of_week TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            room TEXT,
            building TEXT,
            recurrence_type TEXT NOT NULL DEFAULT 'weekly',
            effective_from TEXT,
            effective_to TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            requires_approval INTEGER NOT NULL DEFAULT 0,
            approval_status TEXT,
            approval_note TEXT,
            decided_by TEXT,
            decided_at TEXT,
            notes TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(course_ref) REFERENCES courses(id),
            FOREIGN KEY(teacher_ref) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_slots_teacher_day ON schedule_slots(teacher_ref, day_of_week)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_slots_room_day ON schedule_slots(room, day_of_week)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_slots_course ON schedule_slots(course_ref)",
        [],
    )?;

    // Early workspaces predate the approval decision audit columns.
    ensure_slots_decision_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_instances(
            id TEXT PRIMARY KEY,
            slot_id TEXT NOT NULL,
            class_ref TEXT,
            course_ref TEXT NOT NULL,
            teacher_ref TEXT NOT NULL,
            date TEXT NOT NULL,
            start_datetime TEXT NOT NULL,
            end_datetime TEXT NOT NULL,
            location_type TEXT NOT NULL,
            location TEXT,
            status TEXT NOT NULL DEFAULT 'scheduled',
            created_at TEXT,
            FOREIGN KEY(slot_id) REFERENCES schedule_slots(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_instances_slot ON session_instances(slot_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_instances_slot_date ON session_instances(slot_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_instances_date ON session_instances(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_slots_decision_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "schedule_slots", "approval_note")? {
        conn.execute(
            "ALTER TABLE schedule_slots ADD COLUMN approval_note TEXT",
            [],
        )?;
    }
    if !table_has_column(conn, "schedule_slots", "decided_by")? {
        conn.execute("ALTER TABLE schedule_slots ADD COLUMN decided_by TEXT", [])?;
    }
    if !table_has_column(conn, "schedule_slots", "decided_at")? {
        conn.execute("ALTER TABLE schedule_slots ADD COLUMN decided_at TEXT", [])?;
    }
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        None => Ok(None),
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, &raw),
    )?;
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

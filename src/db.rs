use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "prefect.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            iterations INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            FOREIGN KEY(user_id) REFERENCES auth_users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL,
            student_number TEXT,
            grade_level TEXT,
            section TEXT,
            phone TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(id) REFERENCES auth_users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_roles(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES profiles(id),
            UNIQUE(user_id, role)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_roles_user ON user_roles(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // prefect_id is either one profile id or a JSON array of them, so it
    // cannot carry a foreign key.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS duty_assignments(
            id TEXT PRIMARY KEY,
            prefect_id TEXT NOT NULL,
            title TEXT NOT NULL,
            duty_type TEXT NOT NULL,
            location TEXT,
            duty_date TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            status TEXT NOT NULL,
            notes TEXT,
            assigned_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(assigned_by) REFERENCES profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_duty_assignments_date ON duty_assignments(duty_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS gate_assistance_logs(
            id TEXT PRIMARY KEY,
            prefect_id TEXT NOT NULL,
            duty_id TEXT,
            gate TEXT NOT NULL,
            log_date TEXT NOT NULL,
            time_in TEXT,
            time_out TEXT,
            status TEXT NOT NULL,
            notes TEXT,
            recorded_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(prefect_id) REFERENCES profiles(id),
            FOREIGN KEY(duty_id) REFERENCES duty_assignments(id),
            FOREIGN KEY(recorded_by) REFERENCES profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gate_logs_prefect ON gate_assistance_logs(prefect_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            event_date TEXT NOT NULL,
            location TEXT,
            category TEXT NOT NULL,
            status TEXT NOT NULL,
            created_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(created_by) REFERENCES profiles(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS complaints(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            status TEXT NOT NULL,
            submitted_by TEXT,
            assigned_to TEXT,
            resolution TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(submitted_by) REFERENCES profiles(id),
            FOREIGN KEY(assigned_to) REFERENCES profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_complaints_submitted_by ON complaints(submitted_by)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS incident_reports(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            location TEXT,
            incident_date TEXT NOT NULL,
            severity TEXT NOT NULL,
            status TEXT NOT NULL,
            reported_by TEXT,
            students_involved TEXT,
            action_taken TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(reported_by) REFERENCES profiles(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prefect_applications(
            id TEXT PRIMARY KEY,
            applicant_id TEXT NOT NULL,
            academic_year_id TEXT,
            statement TEXT NOT NULL,
            grade_level TEXT,
            status TEXT NOT NULL,
            reviewed_by TEXT,
            reviewed_at TEXT,
            review_notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(applicant_id) REFERENCES profiles(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            FOREIGN KEY(reviewed_by) REFERENCES profiles(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS performance_evaluations(
            id TEXT PRIMARY KEY,
            prefect_id TEXT NOT NULL,
            evaluator_id TEXT,
            academic_year_id TEXT,
            period TEXT NOT NULL,
            punctuality INTEGER NOT NULL,
            leadership INTEGER NOT NULL,
            teamwork INTEGER NOT NULL,
            communication INTEGER NOT NULL,
            overall_score REAL,
            comments TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(prefect_id) REFERENCES profiles(id),
            FOREIGN KEY(evaluator_id) REFERENCES profiles(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weekly_reports(
            id TEXT PRIMARY KEY,
            prefect_id TEXT NOT NULL,
            week_start TEXT NOT NULL,
            summary TEXT NOT NULL,
            challenges TEXT,
            status TEXT NOT NULL,
            feedback TEXT,
            reviewed_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(prefect_id) REFERENCES profiles(id),
            FOREIGN KEY(reviewed_by) REFERENCES profiles(id)
        )",
        [],
    )?;
    // Workspaces created before weekly plans were tracked lack this column.
    ensure_column(conn, "weekly_reports", "plans", "TEXT")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS training_materials(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            category TEXT NOT NULL,
            content_url TEXT NOT NULL,
            uploaded_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(uploaded_by) REFERENCES profiles(id)
        )",
        [],
    )?;

    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> anyhow::Result<()> {
    if table_has_column(conn, table, column)? {
        return Ok(());
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
        [],
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent_and_adds_missing_columns() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert!(table_has_column(&conn, "weekly_reports", "plans").unwrap());
        assert!(table_has_column(&conn, "duty_assignments", "prefect_id").unwrap());
        assert!(!table_has_column(&conn, "events", "nope").unwrap());
    }
}

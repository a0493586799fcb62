use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "schooldesk.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // `seq` keeps insertion order stable across merges; listing and option scans depend on it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            doc_key TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(collection, doc_key)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection, seq)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    // A corrupt row reads as unset rather than failing the caller.
    Ok(serde_json::from_str(&raw).ok())
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_workspace_has_full_documents_schema() {
        let workspace = std::env::temp_dir().join(format!("schooldesk-db-{}", uuid::Uuid::new_v4()));
        let conn = open_db(&workspace).expect("open db");
        let mut stmt = conn.prepare("PRAGMA table_info(documents)").expect("table info");
        let columns: Vec<String> = stmt
            .query_map([], |r| r.get(1))
            .expect("columns")
            .collect::<Result<_, _>>()
            .expect("column names");
        assert_eq!(
            columns,
            vec!["seq", "collection", "doc_key", "body", "created_at", "updated_at"]
        );

        // Reopening an existing workspace leaves the schema alone.
        drop(stmt);
        drop(conn);
        open_db(&workspace).expect("reopen db");
        let _ = std::fs::remove_dir_all(workspace);
    }
}

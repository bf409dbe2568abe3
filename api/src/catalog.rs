use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Metadata for one uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Server-generated opaque id, also the storage key.
    pub id: String,
    /// Client-supplied file name. Informational only, never used as a path.
    pub original_name: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    /// "png" or "jpeg".
    pub format: String,
    pub created_at: i64,
}

impl ImageRecord {
    pub fn content_type(&self) -> &'static str {
        match self.format.as_str() {
            "png" => "image/png",
            _ => "image/jpeg",
        }
    }
}

/// SQLite-backed image catalog.
///
/// WAL mode is enabled so list/lookup requests don't block behind uploads.
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    /// Open (or create) the catalog database, creating its parent directory.
    pub fn open(path: &Path) -> SqlResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|_e| rusqlite::Error::InvalidPath(parent.into()))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                id            TEXT    PRIMARY KEY,
                original_name TEXT    NOT NULL,
                size_bytes    INTEGER NOT NULL,
                width         INTEGER NOT NULL,
                height        INTEGER NOT NULL,
                format        TEXT    NOT NULL CHECK(format IN ('png','jpeg')),
                created_at    INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_images_created
                ON images(created_at);",
        )?;

        info!(path = path.display().to_string(), "image catalog opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, record: &ImageRecord) -> SqlResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO images (id, original_name, size_bytes, width, height, format, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.original_name,
                record.size as i64,
                record.width,
                record.height,
                record.format,
                record.created_at
            ],
        )?;
        debug!(id = record.id, size = record.size, "inserted image record");
        Ok(())
    }

    pub fn get(&self, id: &str) -> SqlResult<Option<ImageRecord>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, original_name, size_bytes, width, height, format, created_at
             FROM images WHERE id = ?1",
            params![id],
            row_to_record,
        )
        .optional()
    }

    /// All images, newest first.
    pub fn list(&self) -> SqlResult<Vec<ImageRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, original_name, size_bytes, width, height, format, created_at
             FROM images ORDER BY created_at DESC, id ASC",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        rows.collect()
    }

    /// Returns `true` if a record was removed.
    pub fn delete(&self, id: &str) -> SqlResult<bool> {
        let conn = self.lock();
        let changed = conn.execute("DELETE FROM images WHERE id = ?1", params![id])?;
        debug!(id, changed, "deleted image record");
        Ok(changed > 0)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> SqlResult<ImageRecord> {
    let size: i64 = row.get(2)?;
    Ok(ImageRecord {
        id: row.get(0)?,
        original_name: row.get(1)?,
        size: size as u64,
        width: row.get(3)?,
        height: row.get(4)?,
        format: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, created_at: i64) -> ImageRecord {
        ImageRecord {
            id: id.into(),
            original_name: format!("{id}.png"),
            size: 123,
            width: 4,
            height: 3,
            format: "png".into(),
            created_at,
        }
    }

    fn open_temp() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("nested/catalog.db")).unwrap();
        (dir, catalog)
    }

    #[test]
    fn insert_then_get() {
        let (_dir, catalog) = open_temp();
        let rec = record("abc", 1);
        catalog.insert(&rec).unwrap();
        assert_eq!(catalog.get("abc").unwrap(), Some(rec));
        assert_eq!(catalog.get("missing").unwrap(), None);
    }

    #[test]
    fn list_is_newest_first() {
        let (_dir, catalog) = open_temp();
        catalog.insert(&record("old", 10)).unwrap();
        catalog.insert(&record("new", 20)).unwrap();
        let ids: Vec<String> = catalog.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn delete_reports_whether_anything_was_removed() {
        let (_dir, catalog) = open_temp();
        catalog.insert(&record("x", 1)).unwrap();
        assert!(catalog.delete("x").unwrap());
        assert!(!catalog.delete("x").unwrap());
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn duplicate_id_rejected() {
        let (_dir, catalog) = open_temp();
        catalog.insert(&record("dup", 1)).unwrap();
        assert!(catalog.insert(&record("dup", 2)).is_err());
    }

    #[test]
    fn unknown_format_rejected_by_schema() {
        let (_dir, catalog) = open_temp();
        let mut rec = record("gif", 1);
        rec.format = "gif".into();
        assert!(catalog.insert(&rec).is_err());
    }

    #[test]
    fn content_type_follows_format() {
        let mut rec = record("a", 1);
        assert_eq!(rec.content_type(), "image/png");
        rec.format = "jpeg".into();
        assert_eq!(rec.content_type(), "image/jpeg");
    }
}

//! Campaign record store: which poster files are still referenced.

#![allow(missing_docs)]

#[cfg(feature = "sqlite")]
use std::path::{Path, PathBuf};

#[cfg(feature = "sqlite")]
use rusqlite::{Connection, OpenFlags};

#[cfg(feature = "sqlite")]
use crate::core::config::{RecordsConfig, validate_sql_identifier};
use crate::core::errors::{CsnError, Result};

/// Read-only view of the campaign records that own poster files.
pub trait RecordStore {
    /// Stored file identifiers of every record whose file field is non-empty.
    fn poster_references(&self) -> Result<Vec<String>>;
}

/// SQLite-backed record store reading one column of one table.
#[cfg(feature = "sqlite")]
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    path: PathBuf,
    table: String,
    column: String,
}

#[cfg(feature = "sqlite")]
impl SqliteRecordStore {
    /// Identifiers are validated here because they are interpolated into SQL.
    pub fn new(path: impl Into<PathBuf>, table: &str, column: &str) -> Result<Self> {
        validate_sql_identifier("records.table", table)?;
        validate_sql_identifier("records.column", column)?;
        Ok(Self {
            path: path.into(),
            table: table.to_string(),
            column: column.to_string(),
        })
    }

    pub fn from_config(records: &RecordsConfig) -> Result<Self> {
        Self::new(&records.database, &records.table, &records.column)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection> {
        if !self.path.exists() {
            return Err(CsnError::RecordStoreUnavailable {
                details: format!("database not found: {}", self.path.display()),
            });
        }
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| CsnError::RecordStoreUnavailable {
            details: format!("open {}: {e}", self.path.display()),
        })
    }
}

#[cfg(feature = "sqlite")]
impl RecordStore for SqliteRecordStore {
    fn poster_references(&self) -> Result<Vec<String>> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT \"{col}\" FROM \"{table}\" WHERE \"{col}\" IS NOT NULL AND \"{col}\" <> ''",
            col = self.column,
            table = self.table,
        );
        let unavailable = |e: rusqlite::Error| CsnError::RecordStoreUnavailable {
            details: format!("query {}.{}: {e}", self.table, self.column),
        };
        let mut stmt = conn.prepare(&sql).map_err(unavailable)?;
        // Columns are dynamically typed; a non-text value cannot name a file.
        let rows = stmt
            .query_map([], |row| {
                Ok(row.get_ref(0)?.as_str().ok().map(str::to_string))
            })
            .map_err(unavailable)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(unavailable)?;
        Ok(rows.into_iter().flatten().collect())
    }
}

/// In-memory record store: one optional file reference per record.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Vec<Option<String>>,
    unavailable: bool,
}

impl MemoryRecordStore {
    pub fn new<I, S>(references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: references.into_iter().map(|s| Some(s.into())).collect(),
            unavailable: false,
        }
    }

    /// Add a record that owns no file.
    #[must_use]
    pub fn with_empty_record(mut self) -> Self {
        self.records.push(None);
        self.records.push(Some(String::new()));
        self
    }

    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

impl RecordStore for MemoryRecordStore {
    fn poster_references(&self) -> Result<Vec<String>> {
        if self.unavailable {
            return Err(CsnError::RecordStoreUnavailable {
                details: "store marked unavailable".to_string(),
            });
        }
        Ok(self
            .records
            .iter()
            .flatten()
            .filter(|r| !r.is_empty())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_skips_empty_references() {
        let store = MemoryRecordStore::new(["p/a.png", "p/b.png"]).with_empty_record();
        assert_eq!(
            store.poster_references().unwrap(),
            vec!["p/a.png".to_string(), "p/b.png".to_string()]
        );
    }

    #[test]
    fn memory_store_unavailable() {
        let err = MemoryRecordStore::default()
            .unavailable()
            .poster_references()
            .unwrap_err();
        assert_eq!(err.code(), "CSN-2002");
    }

    #[cfg(feature = "sqlite")]
    fn seed_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE ads_admanager (id INTEGER PRIMARY KEY, title TEXT, poster TEXT);
             INSERT INTO ads_admanager (title, poster) VALUES
                ('spring', 'uploads/admanager/posters/spring.jpg'),
                ('summer', 'uploads/admanager/posters/summer.png'),
                ('text-only', NULL),
                ('blank', '');",
        )
        .unwrap();
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_store_reads_non_empty_references() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db.sqlite3");
        seed_db(&db);

        let store = SqliteRecordStore::new(&db, "ads_admanager", "poster").unwrap();
        let mut refs = store.poster_references().unwrap();
        refs.sort();
        assert_eq!(
            refs,
            vec![
                "uploads/admanager/posters/spring.jpg".to_string(),
                "uploads/admanager/posters/summer.png".to_string(),
            ]
        );
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_store_skips_non_text_values() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db.sqlite3");
        seed_db(&db);
        Connection::open(&db)
            .unwrap()
            .execute_batch(
                "INSERT INTO ads_admanager (title, poster) VALUES ('binary', x'00ff');",
            )
            .unwrap();

        let store = SqliteRecordStore::new(&db, "ads_admanager", "poster").unwrap();
        let mut refs = store.poster_references().unwrap();
        refs.sort();
        assert_eq!(
            refs,
            vec![
                "uploads/admanager/posters/spring.jpg".to_string(),
                "uploads/admanager/posters/summer.png".to_string(),
            ]
        );
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_store_missing_database_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SqliteRecordStore::new(dir.path().join("absent.sqlite3"), "ads_admanager", "poster")
                .unwrap();
        let err = store.poster_references().unwrap_err();
        assert_eq!(err.code(), "CSN-2002");
        assert!(!dir.path().join("absent.sqlite3").exists());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_store_missing_table_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db.sqlite3");
        seed_db(&db);
        let store = SqliteRecordStore::new(&db, "campaigns", "poster").unwrap();
        assert_eq!(store.poster_references().unwrap_err().code(), "CSN-2002");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_store_rejects_injected_identifiers() {
        assert!(SqliteRecordStore::new("db.sqlite3", "ads\"; DROP TABLE x; --", "poster").is_err());
        assert!(SqliteRecordStore::new("db.sqlite3", "ads_admanager", "poster name").is_err());
    }
}

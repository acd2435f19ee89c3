//! File-backed document store
//!
//! Each store file holds any number of named documents. A document is one
//! SQLite table with an ordered `key -> value` mapping; values are kept as
//! JSON text so scalars and lists share one column.
//!
//! Every mutation commits before the call returns. There is no transaction
//! spanning two calls, so a crash between writes leaves the earlier writes
//! in place.

use crate::error::{Result, StoreError};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Default document name used when none is given
pub const DEFAULT_DOCUMENT: &str = "kv";

const BUSY_TIMEOUT: Duration = Duration::from_secs(15);

/// An open document store
///
/// The connection is process-local. Worker processes open their own
/// `Store` on the same file rather than sharing a handle. Within a process
/// the handle may move between tasks; calls are serialized on the
/// connection.
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
    document: String,
    // Dropped after `conn`, which removes the backing file of temporary stores.
    _temp: Option<NamedTempFile>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("document", &self.document)
            .finish()
    }
}

impl Store {
    /// Open (or create) the store file at `path` with `document` active.
    ///
    /// The parent directory must already exist.
    pub fn open(path: impl AsRef<Path>, document: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_parent(&path)?;

        let conn = Mutex::new(connect(&path)?);
        let store = Self {
            conn,
            path,
            document: document.to_string(),
            _temp: None,
        };
        store.ensure_document()?;
        tracing::debug!(
            "Opened store {} (document {})",
            store.path.display(),
            store.document
        );
        Ok(store)
    }

    /// Open a store backed by a temporary file that is deleted on close.
    pub fn temporary(document: &str) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix("cf-store-")
            .suffix(".db")
            .tempfile()?;
        let path = temp.path().to_path_buf();
        let conn = Mutex::new(connect(&path)?);
        let store = Self {
            conn,
            path,
            document: document.to_string(),
            _temp: Some(temp),
        };
        store.ensure_document()?;
        Ok(store)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the active document
    pub fn document_name(&self) -> &str {
        &self.document
    }

    /// Switch the active document.
    ///
    /// The table is created lazily on the first write; reads against a
    /// document that was never written behave as if it were empty.
    pub fn document(&mut self, name: &str) -> &mut Self {
        self.document = name.to_string();
        self
    }

    /// Whether a document with `name` exists in this file
    pub fn has_document(&self, name: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn()
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All document names in this file, sorted
    pub fn documents(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Get the raw value stored at `key`
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        if !self.has_document(&self.document)? {
            return Ok(None);
        }
        read_value(&self.conn(), &self.table(), key)
    }

    /// Get the value at `key` decoded into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Get the value at `key` in its textual form
    ///
    /// Strings are returned as-is, anything else as JSON text.
    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key)?.map(|v| text_of(&v)))
    }

    /// Whether `key` is present in the active document
    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert or replace the value at `key`
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let conn = self.conn();
        let table = self.table();
        create_table(&conn, &table)?;
        write_value(&conn, &table, key, value)?;
        tracing::debug!("{}: set {}", self.document, key);
        Ok(())
    }

    /// Delete `key`; deleting a missing key is not an error
    pub fn delete(&self, key: &str) -> Result<()> {
        if !self.has_document(&self.document)? {
            return Ok(());
        }
        let sql = format!("DELETE FROM {} WHERE key = ?1", self.table());
        self.conn().execute(&sql, params![key])?;
        tracing::debug!("{}: delete {}", self.document, key);
        Ok(())
    }

    /// Keys of the active document in insertion order
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.items()?.into_iter().map(|(k, _)| k).collect())
    }

    /// Key/value pairs of the active document in insertion order
    pub fn items(&self) -> Result<Vec<(String, Value)>> {
        if !self.has_document(&self.document)? {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT key, value FROM {} ORDER BY rowid", self.table());
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(k, text)| Ok((k, serde_json::from_str(&text)?)))
            .collect()
    }

    /// Keys matching `pattern`
    pub fn key_match(&self, pattern: &str) -> Result<Vec<String>> {
        let re = Regex::new(pattern)?;
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| re.is_match(k))
            .collect())
    }

    /// Values (in textual form) matching `pattern`
    pub fn value_match(&self, pattern: &str) -> Result<Vec<String>> {
        let re = Regex::new(pattern)?;
        Ok(self
            .items()?
            .iter()
            .map(|(_, v)| text_of(v))
            .filter(|text| re.is_match(text))
            .collect())
    }

    /// Delete every key in the active document, keeping the document
    pub fn clear(&self) -> Result<()> {
        if !self.has_document(&self.document)? {
            return Ok(());
        }
        let sql = format!("DELETE FROM {}", self.table());
        self.conn().execute(&sql, [])?;
        tracing::debug!("{}: cleared", self.document);
        Ok(())
    }

    /// Drop the document `name` entirely
    pub fn remove(&self, name: &str) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(name));
        self.conn().execute(&sql, [])?;
        tracing::debug!("Removed document {} from {}", name, self.path.display());
        Ok(())
    }

    /// Close the connection, surfacing any error from the final flush
    pub fn close(self) -> Result<()> {
        let Self { conn, _temp, .. } = self;
        let conn = conn.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        drop(_temp);
        Ok(())
    }

    /// Run `f` inside an immediate write transaction.
    ///
    /// Used for read-modify-write of a single attribute. The connection
    /// stays locked from `BEGIN` to `COMMIT`, so neither other handles in
    /// this process nor writers in other processes can interleave. `f`
    /// receives the locked connection and the quoted table of the active
    /// document.
    pub(crate) fn write_tx<T>(
        &self,
        f: impl FnOnce(&Connection, &str) -> Result<T>,
    ) -> Result<T> {
        let conn = self.conn();
        let table = self.table();
        create_table(&conn, &table)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&*conn, table.as_str()) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    fn ensure_document(&self) -> Result<()> {
        create_table(&self.conn(), &self.table())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn table(&self) -> String {
        quote_ident(&self.document)
    }
}

/// Textual form of a stored value, as used by pattern search
pub fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read the raw value at `key` from `table` on an already locked connection
pub(crate) fn read_value(conn: &Connection, table: &str, key: &str) -> Result<Option<Value>> {
    let sql = format!("SELECT value FROM {} WHERE key = ?1", table);
    let raw: Option<String> = conn
        .query_row(&sql, params![key], |row| row.get(0))
        .optional()?;
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(Into::into)
}

/// Upsert `value` at `key` in `table` on an already locked connection
pub(crate) fn write_value<T: Serialize + ?Sized>(
    conn: &Connection,
    table: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let text = serde_json::to_string(value)?;
    let sql = format!(
        "INSERT INTO {} (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        table
    );
    conn.execute(&sql, params![key, text])?;
    Ok(())
}

fn create_table(conn: &Connection, table: &str) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)",
        table
    );
    conn.execute(&sql, [])?;
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn check_parent(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };
    match std::fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(StoreError::Inaccessible {
            path: parent.to_path_buf(),
            message: "not a directory".to_string(),
        }),
        Err(e) => Err(StoreError::Inaccessible {
            path: parent.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| StoreError::Inaccessible {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_set_get_delete() {
        let store = Store::temporary(DEFAULT_DOCUMENT).unwrap();

        assert_eq!(store.get("vpc_id").unwrap(), None);

        store.set("vpc_id", "net-1234").unwrap();
        store.set("count", &3).unwrap();
        assert_eq!(store.get_str("vpc_id").unwrap().as_deref(), Some("net-1234"));
        assert_eq!(store.get_as::<u32>("count").unwrap(), Some(3));

        // upsert keeps a single row
        store.set("vpc_id", "net-5678").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["vpc_id", "count"]);
        assert_eq!(store.get_str("vpc_id").unwrap().as_deref(), Some("net-5678"));

        store.delete("vpc_id").unwrap();
        store.delete("vpc_id").unwrap();
        assert!(!store.exists("vpc_id").unwrap());
    }

    #[test]
    fn test_documents_have_independent_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("network-local.db");
        let mut store = Store::open(&path, "network:docker").unwrap();
        store.set("vpc_id", "a").unwrap();

        store.document("network:aws");
        assert_eq!(store.get("vpc_id").unwrap(), None);
        // switching is lazy: nothing written, no table yet
        assert!(!store.has_document("network:aws").unwrap());
        store.set("vpc_id", "b").unwrap();

        assert_eq!(
            store.documents().unwrap(),
            vec!["network:aws".to_string(), "network:docker".to_string()]
        );

        store.document("network:docker");
        assert_eq!(store.get_str("vpc_id").unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_writes_visible_to_fresh_connection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.db");

        let store = Store::open(&path, "svc:0001").unwrap();
        store.set("quantity", &3).unwrap();
        store.close().unwrap();

        let reopened = Store::open(&path, "svc:0001").unwrap();
        assert_eq!(reopened.get_as::<u32>("quantity").unwrap(), Some(3));
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("metadata.db");

        let err = Store::open(&path, DEFAULT_DOCUMENT).unwrap_err();
        assert!(matches!(err, StoreError::Inaccessible { .. }));
    }

    #[test]
    fn test_temporary_store_removed_on_close() {
        let store = Store::temporary(DEFAULT_DOCUMENT).unwrap();
        let path = store.path().to_path_buf();
        store.set("k", "v").unwrap();
        assert!(path.exists());

        store.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_key_and_value_match() {
        let store = Store::temporary(DEFAULT_DOCUMENT).unwrap();
        store.set("cbs_group_1_sg_id", "sg-111").unwrap();
        store.set("cbs_group_2_sg_id", "sg-222").unwrap();
        store.set("vpc_id", "vpc-999").unwrap();
        store.set("tags", &json!(["a", "b"])).unwrap();

        let keys = store.key_match(r"^cbs_group_\d+_sg_id$").unwrap();
        assert_eq!(keys, vec!["cbs_group_1_sg_id", "cbs_group_2_sg_id"]);

        let values = store.value_match(r"^sg-").unwrap();
        assert_eq!(values, vec!["sg-111", "sg-222"]);

        // non-string values match on their JSON text
        assert_eq!(store.value_match(r#"\["a""#).unwrap().len(), 1);

        assert!(store.key_match("(").is_err());
    }

    #[test]
    fn test_clear_and_remove() {
        let mut store = Store::temporary("node-01").unwrap();
        store.set("instance_id", "i-1").unwrap();
        store.clear().unwrap();
        assert!(store.keys().unwrap().is_empty());
        assert!(store.has_document("node-01").unwrap());

        store.remove("node-01").unwrap();
        assert!(!store.has_document("node-01").unwrap());
        assert!(store.keys().unwrap().is_empty());

        // writing again recreates it
        store.document("node-01").set("instance_id", "i-2").unwrap();
        assert!(store.has_document("node-01").unwrap());
    }

    #[test]
    fn test_document_names_are_quoted() {
        let mut store = Store::temporary(DEFAULT_DOCUMENT).unwrap();
        store.document("odd \"name\":0001");
        store.set("k", "v").unwrap();
        assert!(store.has_document("odd \"name\":0001").unwrap());
    }
}

use crate::api::models::Pin;
use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};

/// Key the own PIN is kept under.
pub const PIN_KEY: &str = "bbm_pin";

/// Local persistence the session needs: the own PIN and a contact cache.
pub trait PinStore {
    fn load_pin(&self) -> Result<Option<Pin>>;
    fn save_pin(&self, pin: &Pin) -> Result<()>;
    fn load_contacts(&self) -> Result<Vec<Pin>>;
    fn save_contacts(&self, contacts: &[Pin]) -> Result<()>;
}

pub fn db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "PinChat")?;
    let dir = proj.data_dir().to_path_buf();
    Some(dir.join("pinchat.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (and create if needed) the store in the platform data directory.
    pub fn open_default() -> Result<Self> {
        let path = db_path().ok_or_else(|| ClientError::Config("no data directory".into()))?;
        Self::open(path)
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        ensure_dir(&store.path)?;
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS contacts (
                pin TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// When the contact cache was last replaced.
    pub fn contacts_updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let ts = conn
            .query_row("SELECT MAX(updated_at) FROM contacts", [], |row| row.get::<_, Option<DateTime<Utc>>>(0))
            .optional()?;
        Ok(ts.flatten())
    }
}

impl PinStore for SqliteStore {
    fn load_pin(&self) -> Result<Option<Pin>> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![PIN_KEY], |row| row.get(0))
            .optional()?;
        Ok(value.as_deref().and_then(Pin::parse))
    }

    fn save_pin(&self, pin: &Pin) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO kv (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![PIN_KEY, pin.as_str()],
        )?;
        Ok(())
    }

    fn load_contacts(&self) -> Result<Vec<Pin>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT pin FROM contacts ORDER BY position ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            if let Some(pin) = Pin::parse(&r?) {
                out.push(pin);
            }
        }
        Ok(out)
    }

    /// Replace the cached list with `contacts`, keeping their order.
    fn save_contacts(&self, contacts: &[Pin]) -> Result<()> {
        let now = Utc::now();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM contacts", [])?;
        for (idx, pin) in contacts.iter().enumerate() {
            tx.execute(
                r#"
                INSERT INTO contacts (pin, position, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(pin) DO NOTHING
                "#,
                params![pin.as_str(), idx as i64, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

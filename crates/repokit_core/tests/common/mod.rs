#![allow(dead_code)]

use repokit_core::{
    Database, Entity, IsolationLevel, RecordMeta, Service, SqliteEntity, SqliteRepository,
    SqliteTransactionManager, StoreConfig, UnitOfWork,
};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS widgets (
    id TEXT PRIMARY KEY NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,
    name TEXT NOT NULL UNIQUE,
    quantity INTEGER NOT NULL CHECK (quantity >= 0)
);
CREATE TABLE IF NOT EXISTS widget_parts (
    widget_id TEXT NOT NULL REFERENCES widgets(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    label TEXT NOT NULL,
    PRIMARY KEY (widget_id, position)
);
CREATE TABLE IF NOT EXISTS counters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,
    label TEXT NOT NULL
);
";

/// Uuid-keyed entity with a unique name and a `parts` association.
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub meta: RecordMeta<Uuid>,
    pub name: String,
    pub quantity: i64,
    pub parts: Vec<String>,
}

impl Widget {
    pub fn new(name: &str, quantity: i64) -> Self {
        Self {
            meta: RecordMeta::new(Uuid::nil()),
            name: name.to_string(),
            quantity,
            parts: Vec::new(),
        }
    }
}

impl Entity for Widget {
    type Key = Uuid;
    const NAME: &'static str = "widget";

    fn meta(&self) -> &RecordMeta<Uuid> {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta<Uuid> {
        &mut self.meta
    }
}

impl SqliteEntity for Widget {
    const TABLE: &'static str = "widgets";
    const COLUMNS: &'static [&'static str] = &["name", "quantity"];
    const ASSOCIATIONS: &'static [&'static str] = &["parts"];

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            Value::Integer(self.quantity),
        ]
    }

    fn from_row(meta: RecordMeta<Uuid>, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            name: row.get("name")?,
            quantity: row.get("quantity")?,
            parts: Vec::new(),
        })
    }

    fn load_association(&mut self, association: &str, conn: &Connection) -> rusqlite::Result<()> {
        if association != "parts" {
            return Ok(());
        }
        let mut stmt = conn.prepare(
            "SELECT label FROM widget_parts WHERE widget_id = ?1 ORDER BY position ASC;",
        )?;
        let labels = stmt
            .query_map([self.meta.id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        self.parts = labels;
        Ok(())
    }
}

/// Integer-keyed entity whose ids are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Counter {
    pub meta: RecordMeta<i64>,
    pub label: String,
}

impl Counter {
    pub fn new(label: &str) -> Self {
        Self {
            meta: RecordMeta::new(0),
            label: label.to_string(),
        }
    }
}

impl Entity for Counter {
    type Key = i64;
    const NAME: &'static str = "counter";

    fn meta(&self) -> &RecordMeta<i64> {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta<i64> {
        &mut self.meta
    }
}

impl SqliteEntity for Counter {
    const TABLE: &'static str = "counters";
    const COLUMNS: &'static [&'static str] = &["label"];

    fn to_values(&self) -> Vec<Value> {
        vec![Value::Text(self.label.clone())]
    }

    fn from_row(meta: RecordMeta<i64>, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            label: row.get("label")?,
        })
    }
}

pub type WidgetService = Service<Widget, SqliteRepository<Widget>, SqliteTransactionManager>;

pub fn ephemeral_db() -> Arc<Database> {
    let db = Database::open_ephemeral(&StoreConfig::ephemeral()).unwrap();
    db.execute_batch(SCHEMA_SQL).unwrap();
    db
}

pub fn file_db(path: &Path) -> Arc<Database> {
    let db = Database::open_path(path, &StoreConfig::at_path(path)).unwrap();
    db.execute_batch(SCHEMA_SQL).unwrap();
    db
}

pub fn widget_repo(db: &Arc<Database>) -> SqliteRepository<Widget> {
    SqliteRepository::try_new(Arc::clone(db)).unwrap()
}

pub fn counter_repo(db: &Arc<Database>) -> SqliteRepository<Counter> {
    SqliteRepository::try_new(Arc::clone(db)).unwrap()
}

pub fn tx_manager(db: &Arc<Database>) -> SqliteTransactionManager {
    SqliteTransactionManager::new(Arc::clone(db), IsolationLevel::Default)
}

pub fn widget_service(db: &Arc<Database>) -> WidgetService {
    Service::new(widget_repo(db), tx_manager(db))
}

/// Inserts one part row through `tx`.
pub fn add_part(
    tx: &UnitOfWork,
    widget_id: Uuid,
    position: i64,
    label: &str,
) -> repokit_core::DomainResult<()> {
    tx.with_connection(|conn| {
        conn.execute(
            "INSERT INTO widget_parts (widget_id, position, label) VALUES (?1, ?2, ?3);",
            rusqlite::params![widget_id.to_string(), position, label],
        )
    })
    .map(|_| ())
}

pub fn raw_quantity(db: &Arc<Database>, id: Uuid) -> i64 {
    let conn = db.checkout().unwrap();
    conn.query_row(
        "SELECT quantity FROM widgets WHERE id = ?1;",
        [id.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}

pub fn part_count(db: &Arc<Database>) -> i64 {
    let conn = db.checkout().unwrap();
    conn.query_row("SELECT COUNT(*) FROM widget_parts;", [], |row| row.get(0))
        .unwrap()
}

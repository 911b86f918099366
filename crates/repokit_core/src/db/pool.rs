//! Connection bootstrap and pooling for SQLite.
//!
//! # Responsibility
//! - Open file databases or private ephemeral scratch databases.
//! - Configure connection pragmas required by core behavior.
//! - Keep a bounded set of idle connections for checkout/return.
//!
//! # Invariants
//! - Returned connections have `foreign_keys` and `busy_timeout` applied.
//! - Every target runs in WAL mode so readers never wait on an open writer;
//!   lock waits go through the busy handler.
//! - Ephemeral databases live in a private temporary directory that is
//!   removed when the pool closes or drops.
//! - `close()` releases connections exactly once.

use super::{DbError, DbResult};
use crate::config::StoreConfig;
use log::{error, info, warn};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uuid::Uuid;

const SCRATCH_FILE: &str = "scratch.db";

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    Ephemeral(PathBuf),
}

#[derive(Debug, Clone)]
struct ConnectionSettings {
    busy_timeout: Duration,
    max_idle: usize,
    foreign_keys: bool,
    wal: bool,
}

/// Pooled handle to one SQLite database.
///
/// Shared as `Arc<Database>` by repositories, transaction managers and the
/// owning data layer.
#[derive(Debug)]
pub struct Database {
    id: Uuid,
    target: Target,
    settings: ConnectionSettings,
    idle: Mutex<Vec<Connection>>,
    closed: AtomicBool,
    // Declared last: idle connections drop before the directory goes away.
    scratch: Mutex<Option<TempDir>>,
}

impl Database {
    /// Opens the database described by `config` (`path = None` means
    /// ephemeral).
    pub fn open(config: &StoreConfig) -> DbResult<Arc<Self>> {
        match config.path.as_deref() {
            Some(path) => Self::open_path(path, config),
            None => Self::open_ephemeral(config),
        }
    }

    /// Opens a SQLite database file.
    ///
    /// # Side effects
    /// - Emits `db_open` logging events with duration and status.
    pub fn open_path(path: impl AsRef<Path>, config: &StoreConfig) -> DbResult<Arc<Self>> {
        Self::open_target(Target::File(path.as_ref().to_path_buf()), None, config)
    }

    /// Opens a private scratch database shared by all pooled connections.
    ///
    /// The data does not outlive the pool. Unlike a shared-cache in-memory
    /// database, it keeps SQLite's regular file locking, so readers see the
    /// last committed snapshot while a writer is open and lock waits honor
    /// `busy_timeout_ms`.
    pub fn open_ephemeral(config: &StoreConfig) -> DbResult<Arc<Self>> {
        let dir = tempfile::Builder::new()
            .prefix("repokit-")
            .tempdir()
            .map_err(DbError::Scratch)?;
        let path = dir.path().join(SCRATCH_FILE);
        Self::open_target(Target::Ephemeral(path), Some(dir), config)
    }

    fn open_target(
        target: Target,
        scratch: Option<TempDir>,
        config: &StoreConfig,
    ) -> DbResult<Arc<Self>> {
        let started_at = Instant::now();
        let mode = target.mode();
        info!("event=db_open module=db status=start mode={mode}");

        let database = Self {
            id: Uuid::new_v4(),
            target,
            settings: ConnectionSettings {
                busy_timeout: Duration::from_millis(config.busy_timeout_ms),
                max_idle: config.max_idle_connections,
                foreign_keys: config.foreign_keys,
                wal: config.wal,
            },
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            scratch: Mutex::new(scratch),
        };

        let conn = match database.connect() {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err);
            }
        };

        lock(&database.idle).push(conn);

        info!(
            "event=db_open module=db status=ok mode={mode} db_id={} duration_ms={}",
            database.id,
            started_at.elapsed().as_millis()
        );
        Ok(Arc::new(database))
    }

    /// Stable identity of this pool instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Configured file path, or `None` for ephemeral databases.
    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            Target::File(path) => Some(path.as_path()),
            Target::Ephemeral(_) => None,
        }
    }

    /// `file` or `ephemeral`.
    pub fn mode(&self) -> &'static str {
        self.target.mode()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn idle_connections(&self) -> usize {
        lock(&self.idle).len()
    }

    pub fn busy_timeout(&self) -> Duration {
        self.settings.busy_timeout
    }

    /// Checks out one connection; it returns to the pool on drop.
    pub fn checkout(self: &Arc<Self>) -> DbResult<PooledConnection> {
        if self.is_closed() {
            return Err(DbError::Closed);
        }

        let reused = lock(&self.idle).pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.connect()?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            db: Arc::clone(self),
        })
    }

    /// Runs a batch of statements on a pooled connection (caller-owned DDL).
    pub fn execute_batch(self: &Arc<Self>, sql: &str) -> DbResult<()> {
        let conn = self.checkout()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Live connectivity probe bounded by `timeout`.
    pub fn ping(self: &Arc<Self>, timeout: Option<Duration>) -> DbResult<()> {
        if timeout.is_some_and(|value| value.is_zero()) {
            return Err(DbError::DeadlineExceeded);
        }

        let conn = self.checkout()?;
        let bounded = timeout
            .map(|value| value.min(self.settings.busy_timeout))
            .unwrap_or(self.settings.busy_timeout);
        conn.busy_timeout(bounded)?;
        let probe = conn.query_row("SELECT 1;", [], |row| row.get::<_, i64>(0));
        conn.busy_timeout(self.settings.busy_timeout)?;
        probe?;
        Ok(())
    }

    /// Closes the pool. Returns `true` only for the call that performed the
    /// release.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let released = {
            let mut idle = lock(&self.idle);
            let count = idle.len();
            idle.clear();
            count
        };
        let scratch = lock(&self.scratch).take();
        drop(scratch);

        info!(
            "event=db_close module=db status=ok db_id={} released_connections={}",
            self.id, released
        );
        true
    }

    fn connect(&self) -> DbResult<Connection> {
        let conn = match &self.target {
            Target::File(path) | Target::Ephemeral(path) => Connection::open(path)?,
        };
        self.bootstrap_connection(&conn)?;
        Ok(conn)
    }

    fn bootstrap_connection(&self, conn: &Connection) -> DbResult<()> {
        if self.settings.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }
        conn.busy_timeout(self.settings.busy_timeout)?;
        let wal = match self.target {
            Target::File(_) => self.settings.wal,
            Target::Ephemeral(_) => {
                conn.execute_batch("PRAGMA synchronous = OFF;")?;
                true
            }
        };
        if wal {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                warn!("event=db_open module=db status=degraded journal_mode={mode}");
            }
        }
        Ok(())
    }

    fn release(&self, conn: Connection) {
        if self.is_closed() {
            return;
        }

        if !conn.is_autocommit() {
            warn!(
                "event=db_release module=db status=error db_id={} error_code=open_transaction_on_release",
                self.id
            );
            if conn.execute_batch("ROLLBACK;").is_err() || !conn.is_autocommit() {
                return;
            }
        }

        let mut idle = lock(&self.idle);
        if idle.len() < self.settings.max_idle {
            idle.push(conn);
        }
    }
}

impl Target {
    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Ephemeral(_) => "ephemeral",
        }
    }
}

/// Connection checked out of a [`Database`] pool.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    db: Arc<Database>,
}

impl PooledConnection {
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.db.release(conn);
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Generic SQLite repository.
//!
//! # Responsibility
//! - Map any `SqliteEntity` onto one table with shared metadata columns.
//! - Translate query plans into parameterized SQL.
//!
//! # Invariants
//! - Only column names declared by the entity reach SQL text; values are
//!   always bound.
//! - Reads order deterministically: requested orderings, then `id ASC`.
//! - Updates are compare-and-set on `updated_at`.

use super::Repository;
use crate::db::Database;
use crate::error::{wrap_error, DomainError, DomainResult};
use crate::model::entity::{now_millis, Entity, EntityKey, RecordMeta};
use crate::query::{Filter, FilterOp, FilterValue, QueryModifier, QueryPlan};
use crate::tx::{active_scope, UnitOfWork};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

const META_COLUMNS: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

/// Identifier types the SQLite repository can persist.
pub trait SqlKey: EntityKey {
    fn to_sql_value(&self) -> Value;
    fn from_sql_value(value: ValueRef<'_>) -> FromSqlResult<Self>;

    /// Returns whether `create` must assign a fresh id.
    fn is_unassigned(&self) -> bool;

    /// Client-side id for a new record; `None` lets the store assign one.
    fn generate() -> Option<Self>;

    /// Builds the key from a store-assigned rowid.
    fn from_rowid(rowid: i64) -> Option<Self>;
}

impl SqlKey for Uuid {
    fn to_sql_value(&self) -> Value {
        Value::Text(self.to_string())
    }

    fn from_sql_value(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Uuid::parse_str(text).map_err(|err| FromSqlError::Other(Box::new(err)))
    }

    fn is_unassigned(&self) -> bool {
        self.is_nil()
    }

    fn generate() -> Option<Self> {
        Some(Uuid::new_v4())
    }

    fn from_rowid(_rowid: i64) -> Option<Self> {
        None
    }
}

impl SqlKey for i64 {
    fn to_sql_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_sql_value(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value)
    }

    fn is_unassigned(&self) -> bool {
        *self == 0
    }

    fn generate() -> Option<Self> {
        None
    }

    fn from_rowid(rowid: i64) -> Option<Self> {
        Some(rowid)
    }
}

impl SqlKey for String {
    fn to_sql_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_sql_value(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value)
    }

    fn is_unassigned(&self) -> bool {
        self.is_empty()
    }

    fn generate() -> Option<Self> {
        Some(Uuid::new_v4().to_string())
    }

    fn from_rowid(_rowid: i64) -> Option<Self> {
        None
    }
}

struct KeyColumn<K>(K);

impl<K: SqlKey> FromSql for KeyColumn<K> {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        K::from_sql_value(value).map(Self)
    }
}

/// Table mapping for an entity stored by [`SqliteRepository`].
///
/// The table must carry `id`, `created_at`, `updated_at`, `deleted_at` plus
/// every name in `COLUMNS`.
pub trait SqliteEntity: Entity {
    const TABLE: &'static str;

    /// Payload columns, in the order produced by `to_values`.
    const COLUMNS: &'static [&'static str];

    /// Association names accepted by `QueryModifier::Preload`.
    const ASSOCIATIONS: &'static [&'static str] = &[];

    fn to_values(&self) -> Vec<Value>;

    fn from_row(meta: RecordMeta<Self::Key>, row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Eager-loads one association named in `ASSOCIATIONS`.
    fn load_association(&mut self, _association: &str, _conn: &Connection) -> rusqlite::Result<()> {
        Ok(())
    }
}

/// SQLite-backed repository for entity `E`.
pub struct SqliteRepository<E> {
    db: Arc<Database>,
    tx: Option<UnitOfWork>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for SqliteRepository<E> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            tx: self.tx.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> Debug for SqliteRepository<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRepository")
            .field("db_id", &self.db.id())
            .field("tx", &self.tx.as_ref().map(UnitOfWork::id))
            .finish()
    }
}

impl<E> SqliteRepository<E>
where
    E: SqliteEntity,
    E::Key: SqlKey,
{
    /// Creates a repository after checking the entity table shape.
    pub fn try_new(db: Arc<Database>) -> DomainResult<Self> {
        let repo = Self {
            db,
            tx: None,
            _entity: PhantomData,
        };
        repo.with_conn(ensure_table_ready::<E>)?;
        Ok(repo)
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Unit of work this instance is bound to, if any.
    pub fn handle(&self) -> Option<&UnitOfWork> {
        self.tx.as_ref()
    }

    fn with_conn<T>(
        &self,
        work: impl FnOnce(&Connection) -> DomainResult<T>,
    ) -> DomainResult<T> {
        if let Some(handle) = &self.tx {
            if handle.db_id() != self.db.id() {
                return Err(DomainError::internal(
                    "repository is bound to a unit of work of another database",
                )
                .with_code("tx_foreign_handle")
                .with_detail("entity", E::NAME));
            }
            return handle.with_conn(work);
        }

        if let Some(active) = active_scope(self.db.id()) {
            return active.with_conn(work);
        }

        let conn = self.db.checkout()?;
        work(&conn)
    }
}

impl<E> Repository<E> for SqliteRepository<E>
where
    E: SqliteEntity,
    E::Key: SqlKey,
{
    type Handle = UnitOfWork;

    fn create(&self, entity: &mut E) -> DomainResult<()> {
        let payload = payload_values(entity)?;
        let id = if entity.id().is_unassigned() {
            E::Key::generate()
        } else {
            Some(entity.id().clone())
        };
        let now = now_millis();

        let mut columns: Vec<&str> = Vec::with_capacity(E::COLUMNS.len() + 4);
        let mut values: Vec<Value> = Vec::with_capacity(E::COLUMNS.len() + 4);
        if let Some(id) = &id {
            columns.push("id");
            values.push(id.to_sql_value());
        }
        columns.extend(["created_at", "updated_at", "deleted_at"]);
        values.extend([Value::Integer(now), Value::Integer(now), Value::Null]);
        columns.extend(E::COLUMNS.iter().copied());
        values.extend(payload);

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders});",
            E::TABLE,
            columns.join(", ")
        );

        let assigned = self
            .with_conn(|conn| {
                conn.execute(&sql, params_from_iter(values.iter()))?;
                match id {
                    Some(id) => Ok(id),
                    None => E::Key::from_rowid(conn.last_insert_rowid()).ok_or_else(|| {
                        DomainError::internal(format!(
                            "{} key cannot be generated or assigned by the store",
                            E::NAME
                        ))
                        .with_code("key_unassignable")
                    }),
                }
            })
            .map_err(|err| err.with_detail("entity", E::NAME))?;

        let meta = entity.meta_mut();
        meta.id = assigned;
        meta.created_at = now;
        meta.updated_at = now;
        meta.deleted_at = None;
        Ok(())
    }

    fn get_by_id(&self, id: &E::Key, modifiers: &[QueryModifier]) -> DomainResult<E> {
        let plan = QueryPlan::from_modifiers(modifiers).without_paging();
        ensure_associations::<E>(&plan.preloads)?;

        let mut sql = select_sql::<E>();
        let mut binds = Vec::new();
        push_where::<E>(&plan, &mut sql, &mut binds)?;
        sql.push_str(" AND id = ? LIMIT 1;");
        binds.push(id.to_sql_value());

        self.with_conn(|conn| {
            let mut found = query_entities::<E>(conn, &sql, &binds)?;
            let Some(mut entity) = found.pop() else {
                return Err(not_found::<E>(id));
            };
            load_preloads(conn, std::slice::from_mut(&mut entity), &plan.preloads)?;
            Ok(entity)
        })
    }

    fn get_all(&self, modifiers: &[QueryModifier]) -> DomainResult<Vec<E>> {
        let plan = QueryPlan::from_modifiers(modifiers);
        ensure_associations::<E>(&plan.preloads)?;

        let mut sql = select_sql::<E>();
        let mut binds = Vec::new();
        push_where::<E>(&plan, &mut sql, &mut binds)?;
        push_order::<E>(&plan, &mut sql)?;
        push_pagination(&plan, &mut sql, &mut binds);
        sql.push(';');

        self.with_conn(|conn| {
            let mut entities = query_entities::<E>(conn, &sql, &binds)?;
            load_preloads(conn, &mut entities, &plan.preloads)?;
            Ok(entities)
        })
    }

    fn update(&self, entity: &mut E) -> DomainResult<()> {
        let mut binds = payload_values(entity)?;
        let now = now_millis();
        let id = entity.id().clone();
        let expected = entity.meta().updated_at;

        let mut assignments: Vec<String> = E::COLUMNS
            .iter()
            .map(|column| format!("{column} = ?"))
            .collect();
        assignments.push("updated_at = MAX(?, updated_at + 1)".to_string());
        let sql = format!(
            "UPDATE {}
             SET {}
             WHERE id = ? AND deleted_at IS NULL AND updated_at = ?
             RETURNING updated_at;",
            E::TABLE,
            assignments.join(", ")
        );
        binds.push(Value::Integer(now));
        binds.push(id.to_sql_value());
        binds.push(Value::Integer(expected));

        let refreshed = self.with_conn(|conn| {
            let refreshed = conn
                .query_row(&sql, params_from_iter(binds.iter()), |row| row.get::<_, i64>(0))
                .optional()?;
            match refreshed {
                Some(updated_at) => Ok(updated_at),
                None if row_visible::<E>(conn, &id)? => Err(DomainError::conflict(format!(
                    "{} was modified after it was read",
                    E::NAME
                ))
                .with_code("stale_write")
                .with_detail("entity", E::NAME)
                .with_detail("id", id.to_string())
                .with_detail("expected_updated_at", expected)),
                None => Err(not_found::<E>(&id)),
            }
        })?;

        entity.meta_mut().updated_at = refreshed;
        Ok(())
    }

    fn delete(&self, id: &E::Key) -> DomainResult<()> {
        let now = now_millis();
        let sql = format!(
            "UPDATE {}
             SET deleted_at = ?1, updated_at = MAX(?1, updated_at + 1)
             WHERE id = ?2 AND deleted_at IS NULL;",
            E::TABLE
        );

        self.with_conn(|conn| {
            let changed = conn.execute(&sql, params![now, id.to_sql_value()])?;
            if changed == 0 && !row_present::<E>(conn, id)? {
                return Err(not_found::<E>(id));
            }
            Ok(())
        })
    }

    fn hard_delete(&self, id: &E::Key) -> DomainResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?1;", E::TABLE);
        self.with_conn(|conn| {
            let changed = conn
                .execute(&sql, [id.to_sql_value()])
                .map_err(|err| DomainError::from(err).with_detail("entity", E::NAME))?;
            if changed == 0 {
                return Err(not_found::<E>(id));
            }
            Ok(())
        })
    }

    fn exists(&self, id: &E::Key) -> DomainResult<bool> {
        self.with_conn(|conn| row_visible::<E>(conn, id))
    }

    fn count(&self, modifiers: &[QueryModifier]) -> DomainResult<u64> {
        let plan = QueryPlan::from_modifiers(modifiers).without_paging();
        let mut sql = format!("SELECT COUNT(*) FROM {}", E::TABLE);
        let mut binds = Vec::new();
        push_where::<E>(&plan, &mut sql, &mut binds)?;
        sql.push(';');

        self.with_conn(|conn| {
            let total: i64 =
                conn.query_row(&sql, params_from_iter(binds.iter()), |row| row.get(0))?;
            Ok(u64::try_from(total).unwrap_or_default())
        })
    }

    fn with_tx(&self, handle: &UnitOfWork) -> Self {
        Self {
            db: Arc::clone(&self.db),
            tx: Some(handle.clone()),
            _entity: PhantomData,
        }
    }
}

fn payload_values<E: SqliteEntity>(entity: &E) -> DomainResult<Vec<Value>> {
    let values = entity.to_values();
    if values.len() != E::COLUMNS.len() {
        return Err(DomainError::internal(format!(
            "{} produced {} values for {} columns",
            E::NAME,
            values.len(),
            E::COLUMNS.len()
        ))
        .with_code("column_mismatch")
        .with_detail("entity", E::NAME));
    }
    Ok(values)
}

fn not_found<E>(id: &E::Key) -> DomainError
where
    E: SqliteEntity,
{
    DomainError::not_found(format!("{} not found", E::NAME))
        .with_detail("entity", E::NAME)
        .with_detail("id", id.to_string())
}

fn select_sql<E: SqliteEntity>() -> String {
    let columns: Vec<&str> = META_COLUMNS
        .iter()
        .chain(E::COLUMNS.iter())
        .copied()
        .collect();
    format!("SELECT {} FROM {}", columns.join(", "), E::TABLE)
}

fn known_column<E: SqliteEntity>(field: &str) -> DomainResult<&'static str> {
    META_COLUMNS
        .iter()
        .chain(E::COLUMNS.iter())
        .copied()
        .find(|column| *column == field)
        .ok_or_else(|| {
            DomainError::bad_request(format!("unknown field `{field}` for {}", E::NAME))
                .with_code("unknown_field")
                .with_detail("entity", E::NAME)
                .with_detail("field", field)
        })
}

fn ensure_associations<E: SqliteEntity>(preloads: &[String]) -> DomainResult<()> {
    for association in preloads {
        if !E::ASSOCIATIONS.contains(&association.as_str()) {
            return Err(DomainError::bad_request(format!(
                "unknown association `{association}` for {}",
                E::NAME
            ))
            .with_code("unknown_association")
            .with_detail("entity", E::NAME)
            .with_detail("association", association.as_str()));
        }
    }
    Ok(())
}

fn push_where<E: SqliteEntity>(
    plan: &QueryPlan,
    sql: &mut String,
    binds: &mut Vec<Value>,
) -> DomainResult<()> {
    sql.push_str(" WHERE 1 = 1");
    if !plan.include_deleted {
        sql.push_str(" AND deleted_at IS NULL");
    }
    for filter in &plan.filters {
        push_filter::<E>(filter, sql, binds)?;
    }
    Ok(())
}

fn push_filter<E: SqliteEntity>(
    filter: &Filter,
    sql: &mut String,
    binds: &mut Vec<Value>,
) -> DomainResult<()> {
    let column = known_column::<E>(&filter.field)?;
    let is_null_value = matches!(filter.value, FilterValue::Null);

    let operator = match filter.op {
        FilterOp::IsNull => {
            sql.push_str(&format!(" AND {column} IS NULL"));
            return Ok(());
        }
        FilterOp::IsNotNull => {
            sql.push_str(&format!(" AND {column} IS NOT NULL"));
            return Ok(());
        }
        FilterOp::Eq if is_null_value => {
            sql.push_str(&format!(" AND {column} IS NULL"));
            return Ok(());
        }
        FilterOp::Ne if is_null_value => {
            sql.push_str(&format!(" AND {column} IS NOT NULL"));
            return Ok(());
        }
        FilterOp::In => {
            let FilterValue::List(values) = &filter.value else {
                return Err(invalid_filter_value(filter, "`in` expects a list value"));
            };
            if values.is_empty() {
                sql.push_str(" AND 0 = 1");
                return Ok(());
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            sql.push_str(&format!(" AND {column} IN ({placeholders})"));
            for value in values {
                binds.push(scalar_value(filter, value)?);
            }
            return Ok(());
        }
        FilterOp::Eq => "=",
        FilterOp::Ne => "<>",
        FilterOp::Gt => ">",
        FilterOp::Gte => ">=",
        FilterOp::Lt => "<",
        FilterOp::Lte => "<=",
        FilterOp::Like => "LIKE",
    };

    sql.push_str(&format!(" AND {column} {operator} ?"));
    binds.push(scalar_value(filter, &filter.value)?);
    Ok(())
}

fn scalar_value(filter: &Filter, value: &FilterValue) -> DomainResult<Value> {
    match value {
        FilterValue::Null => Ok(Value::Null),
        FilterValue::Bool(flag) => Ok(Value::Integer(i64::from(*flag))),
        FilterValue::Integer(number) => Ok(Value::Integer(*number)),
        FilterValue::Real(number) => Ok(Value::Real(*number)),
        FilterValue::Text(text) => Ok(Value::Text(text.clone())),
        FilterValue::List(_) => Err(invalid_filter_value(
            filter,
            "list values are only valid with `in`",
        )),
    }
}

fn invalid_filter_value(filter: &Filter, reason: &str) -> DomainError {
    DomainError::bad_request(format!("invalid filter on `{}`: {reason}", filter.field))
        .with_code("invalid_filter")
        .with_detail("field", filter.field.as_str())
}

fn push_order<E: SqliteEntity>(plan: &QueryPlan, sql: &mut String) -> DomainResult<()> {
    let mut terms = Vec::with_capacity(plan.orderings.len() + 1);
    for ordering in &plan.orderings {
        let column = known_column::<E>(&ordering.field)?;
        terms.push(format!("{column} {}", ordering.direction.as_sql()));
    }
    terms.push("id ASC".to_string());
    sql.push_str(" ORDER BY ");
    sql.push_str(&terms.join(", "));
    Ok(())
}

fn push_pagination(plan: &QueryPlan, sql: &mut String, binds: &mut Vec<Value>) {
    if let Some(limit) = plan.limit {
        sql.push_str(" LIMIT ?");
        binds.push(Value::Integer(i64::from(limit)));
        if plan.offset > 0 {
            sql.push_str(" OFFSET ?");
            binds.push(Value::Integer(i64::from(plan.offset)));
        }
    } else if plan.offset > 0 {
        sql.push_str(" LIMIT -1 OFFSET ?");
        binds.push(Value::Integer(i64::from(plan.offset)));
    }
}

fn query_entities<E>(conn: &Connection, sql: &str, binds: &[Value]) -> DomainResult<Vec<E>>
where
    E: SqliteEntity,
    E::Key: SqlKey,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(binds.iter()))?;
    let mut entities = Vec::new();
    while let Some(row) = rows.next()? {
        entities.push(parse_row::<E>(row)?);
    }
    Ok(entities)
}

fn parse_row<E>(row: &Row<'_>) -> rusqlite::Result<E>
where
    E: SqliteEntity,
    E::Key: SqlKey,
{
    let KeyColumn(id) = row.get::<_, KeyColumn<E::Key>>("id")?;
    let meta = RecordMeta {
        id,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    };
    E::from_row(meta, row)
}

fn load_preloads<E: SqliteEntity>(
    conn: &Connection,
    entities: &mut [E],
    preloads: &[String],
) -> DomainResult<()> {
    for association in preloads {
        for entity in entities.iter_mut() {
            entity.load_association(association, conn).map_err(|err| {
                wrap_error(err, format!("preload `{association}` of {}", E::NAME))
            })?;
        }
    }
    Ok(())
}

fn row_visible<E>(conn: &Connection, id: &E::Key) -> DomainResult<bool>
where
    E: SqliteEntity,
    E::Key: SqlKey,
{
    let sql = format!(
        "SELECT EXISTS(
            SELECT 1 FROM {} WHERE id = ?1 AND deleted_at IS NULL
        );",
        E::TABLE
    );
    let exists: i64 = conn.query_row(&sql, [id.to_sql_value()], |row| row.get(0))?;
    Ok(exists == 1)
}

fn row_present<E>(conn: &Connection, id: &E::Key) -> DomainResult<bool>
where
    E: SqliteEntity,
    E::Key: SqlKey,
{
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1);", E::TABLE);
    let exists: i64 = conn.query_row(&sql, [id.to_sql_value()], |row| row.get(0))?;
    Ok(exists == 1)
}

fn ensure_table_ready<E: SqliteEntity>(conn: &Connection) -> DomainResult<()> {
    if !table_exists(conn, E::TABLE)? {
        return Err(DomainError::internal(format!(
            "required table `{}` is missing",
            E::TABLE
        ))
        .with_code("schema_missing_table")
        .with_detail("table", E::TABLE));
    }

    for column in META_COLUMNS.iter().chain(E::COLUMNS.iter()) {
        if !table_has_column(conn, E::TABLE, column)? {
            return Err(DomainError::internal(format!(
                "required column `{}.{column}` is missing",
                E::TABLE
            ))
            .with_code("schema_missing_column")
            .with_detail("table", E::TABLE)
            .with_detail("column", *column));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> DomainResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> DomainResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

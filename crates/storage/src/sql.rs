//! SqlStore: relational backend on SQLite
//!
//! One table per entity, one column per attribute, primary key over the key
//! fields. Filters are pushed down as SQL `WHERE` clauses through
//! [`SqlFilterBuilder`]; anything it cannot express is evaluated in process
//! after fetching the natively filtered rows.
//!
//! # Column encoding
//!
//! | AttrType | Column | Encoding |
//! |----------|--------|----------|
//! | BOOL | INTEGER | 0 / 1 |
//! | INT | INTEGER | |
//! | FLOAT | REAL | |
//! | STR | TEXT | |
//! | UUID | TEXT | hyphenated lower-case |
//! | DATETIME | TEXT | RFC 3339, microseconds, `Z` (fixed width, sorts chronologically) |
//! | BINARY | BLOB | |
//! | JSON | TEXT | serialized document |
//!
//! Null fields are stored as SQL `NULL` and read back as absent.
//!
//! # Predicate semantics
//!
//! Every emitted predicate is two-valued (never SQL `NULL`) so that `NOT`
//! composes the same way [`SearchFilter::matches`] does.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use tracing::debug;

use storekit_core::value::{format_datetime, parse_datetime};
use storekit_core::{
    apply_edits_individually, build_native_expression, slice_page, AttrFilter, AttrType,
    BatchEdit, BatchEditResult, FilterOp, Item, NativeFilterBuilder, PageKey, ResultSet,
    SearchFilter, SearchOrder, SearchRequest, Store, StoreConfig, StoreError, StoreMeta,
    StoreResult, Value,
};

/// Map a SQLite error into the store error taxonomy
fn sql_error(e: rusqlite::Error) -> StoreError {
    StoreError::backend(format!("sqlite: {}", e))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

/// Quote an identifier
fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_type(attr_type: AttrType) -> &'static str {
    match attr_type {
        AttrType::Bool | AttrType::Int => "INTEGER",
        AttrType::Float => "REAL",
        AttrType::Binary => "BLOB",
        AttrType::Str | AttrType::Uuid | AttrType::Datetime | AttrType::Json => "TEXT",
    }
}

/// Convert a value into its column encoding
pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Uuid(u) => SqlValue::Text(u.to_string()),
        Value::DateTime(dt) => SqlValue::Text(format_datetime(dt)),
        Value::Json(j) => SqlValue::Text(j.to_string()),
    }
}

/// Decode a column back into a value of `attr_type`
pub fn from_sql(attr_type: AttrType, column: ValueRef<'_>) -> StoreResult<Value> {
    let mismatch = || {
        StoreError::backend(format!(
            "column type {:?} does not hold a {} value",
            column.data_type(),
            attr_type
        ))
    };
    let text = |bytes: &[u8]| std::str::from_utf8(bytes).map(str::to_string).map_err(|_| mismatch());
    Ok(match (attr_type, column) {
        (_, ValueRef::Null) => Value::Null,
        (AttrType::Bool, ValueRef::Integer(i)) => Value::Bool(i != 0),
        (AttrType::Int, ValueRef::Integer(i)) => Value::Int(i),
        (AttrType::Float, ValueRef::Real(f)) => Value::Float(f),
        (AttrType::Float, ValueRef::Integer(i)) => Value::Float(i as f64),
        (AttrType::Str, ValueRef::Text(t)) => Value::String(text(t)?),
        (AttrType::Binary, ValueRef::Blob(b)) => Value::Bytes(b.to_vec()),
        (AttrType::Uuid, ValueRef::Text(t)) => uuid::Uuid::parse_str(&text(t)?)
            .map(Value::Uuid)
            .map_err(|_| mismatch())?,
        (AttrType::Datetime, ValueRef::Text(t)) => parse_datetime(&text(t)?)
            .map(Value::DateTime)
            .ok_or_else(mismatch)?,
        (AttrType::Json, ValueRef::Text(t)) => {
            Value::Json(serde_json::from_slice(t).map_err(|_| mismatch())?)
        }
        _ => return Err(mismatch()),
    })
}

// ============================================================================
// Filter push-down
// ============================================================================

/// A `WHERE` fragment with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlExpr {
    /// SQL text with `?` placeholders
    pub sql: String,
    /// Parameters, in placeholder order
    pub params: Vec<SqlValue>,
}

impl SqlExpr {
    fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        SqlExpr {
            sql: sql.into(),
            params,
        }
    }
}

/// Translates filters into SQLite `WHERE` clauses
///
/// Case-insensitive matches stay residual: SQLite's `lower()` folds ASCII
/// only, which disagrees with Unicode lower-casing. JSON columns accept only
/// `exists` / `not_exists`.
pub struct SqlFilterBuilder<'a> {
    meta: &'a StoreMeta,
}

impl<'a> SqlFilterBuilder<'a> {
    /// Builder for the table of `meta`
    pub fn new(meta: &'a StoreMeta) -> Self {
        SqlFilterBuilder { meta }
    }
}

impl NativeFilterBuilder for SqlFilterBuilder<'_> {
    type Expr = SqlExpr;

    fn attr_filter(&self, filter: &AttrFilter) -> Option<SqlExpr> {
        let attr = self.meta.attr(&filter.name)?;
        let col = ident(&filter.name);
        if filter.ignore_case {
            return None;
        }
        if attr.attr_type == AttrType::Json
            && !matches!(filter.op, FilterOp::Exists | FilterOp::NotExists)
        {
            return None;
        }
        let value = filter.value().filter(|v| !v.is_null());
        // Guard so the predicate is false, not NULL, on a NULL column
        let guarded = |body: String, params: Vec<SqlValue>| {
            SqlExpr::new(format!("({} IS NOT NULL AND {})", col, body), params)
        };
        Some(match filter.op {
            FilterOp::Exists => SqlExpr::new(format!("{} IS NOT NULL", col), vec![]),
            FilterOp::NotExists => SqlExpr::new(format!("{} IS NULL", col), vec![]),
            FilterOp::Eq => match value {
                None => SqlExpr::new(format!("{} IS NULL", col), vec![]),
                Some(v) => guarded(format!("{} = ?", col), vec![to_sql(v)]),
            },
            FilterOp::Ne => match value {
                None => SqlExpr::new(format!("{} IS NOT NULL", col), vec![]),
                Some(v) => SqlExpr::new(
                    format!("({} IS NULL OR {} <> ?)", col, col),
                    vec![to_sql(v)],
                ),
            },
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                let sql_op = match filter.op {
                    FilterOp::Gt => ">",
                    FilterOp::Gte => ">=",
                    FilterOp::Lt => "<",
                    _ => "<=",
                };
                guarded(format!("{} {} ?", col, sql_op), vec![to_sql(value?)])
            }
            FilterOp::StartsWith | FilterOp::Contains | FilterOp::EndsWith => {
                let needle = value?.as_str()?;
                if needle.is_empty() {
                    return Some(SqlExpr::new(format!("{} IS NOT NULL", col), vec![]));
                }
                let param = SqlValue::Text(needle.to_string());
                match filter.op {
                    FilterOp::StartsWith => guarded(
                        format!("substr({}, 1, length(?)) = ?", col),
                        vec![param.clone(), param],
                    ),
                    FilterOp::Contains => guarded(format!("instr({}, ?) > 0", col), vec![param]),
                    _ => guarded(
                        format!("substr({}, -length(?)) = ?", col),
                        vec![param.clone(), param],
                    ),
                }
            }
            FilterOp::OneOf => {
                let values: Vec<SqlValue> = filter
                    .values()
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(to_sql)
                    .collect();
                if values.is_empty() {
                    return self.exclude_all();
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                guarded(format!("{} IN ({})", col, placeholders), values)
            }
        })
    }

    fn and(&self, exprs: Vec<SqlExpr>) -> SqlExpr {
        join(exprs, " AND ")
    }

    fn or(&self, exprs: Vec<SqlExpr>) -> SqlExpr {
        join(exprs, " OR ")
    }

    fn not(&self, expr: SqlExpr) -> SqlExpr {
        SqlExpr::new(format!("NOT ({})", expr.sql), expr.params)
    }

    fn exclude_all(&self) -> Option<SqlExpr> {
        Some(SqlExpr::new("0 = 1", vec![]))
    }
}

fn join(exprs: Vec<SqlExpr>, sep: &str) -> SqlExpr {
    let mut sql = Vec::with_capacity(exprs.len());
    let mut params = Vec::new();
    for expr in exprs {
        sql.push(format!("({})", expr.sql));
        params.extend(expr.params);
    }
    SqlExpr::new(sql.join(sep), params)
}

// ============================================================================
// SqlStore
// ============================================================================

/// Relational store for one entity
///
/// Several stores may share one connection (one table each).
pub struct SqlStore {
    meta: Arc<StoreMeta>,
    config: StoreConfig,
    conn: Arc<Mutex<Connection>>,
    table: String,
    columns: String,
}

impl SqlStore {
    /// Store over an existing shared connection; creates the table if missing
    pub fn new(conn: Arc<Mutex<Connection>>, meta: Arc<StoreMeta>) -> StoreResult<Self> {
        let table = ident(&meta.name);
        let columns = meta
            .attrs
            .iter()
            .map(|a| ident(&a.name))
            .collect::<Vec<_>>()
            .join(", ");
        let store = SqlStore {
            meta,
            config: StoreConfig::default(),
            conn,
            table,
            columns,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open (or create) a database file holding this store's table
    pub fn open(path: &Path, meta: Arc<StoreMeta>) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::backend(format!("failed to open '{}': {}", path.display(), e))
        })?;
        Self::new(Arc::new(Mutex::new(conn)), meta)
    }

    /// Open a private in-memory database
    pub fn open_in_memory(meta: Arc<StoreMeta>) -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(sql_error)?;
        Self::new(Arc::new(Mutex::new(conn)), meta)
    }

    /// Use `config` for search limits
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    fn init_schema(&self) -> StoreResult<()> {
        let mut defs: Vec<String> = self
            .meta
            .attrs
            .iter()
            .map(|a| format!("{} {}", ident(&a.name), column_type(a.attr_type)))
            .collect();
        let key_cols = self.key_columns();
        defs.push(format!("PRIMARY KEY ({})", key_cols.join(", ")));
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            defs.join(", ")
        );
        self.conn.lock().execute_batch(&ddl).map_err(sql_error)
    }

    fn key_columns(&self) -> Vec<String> {
        self.meta
            .key_config
            .field_names()
            .into_iter()
            .map(ident)
            .collect()
    }

    /// `WHERE` clause and params selecting the row of a key item
    fn key_clause(&self, key_item: &Item) -> StoreResult<SqlExpr> {
        let mut sql = Vec::new();
        let mut params = Vec::new();
        for field in self.meta.key_config.fields() {
            let value = key_item
                .get(&field.name)
                .filter(|v| !v.is_null())
                .ok_or_else(|| {
                    StoreError::validation(format!("missing key field '{}'", field.name))
                })?;
            sql.push(format!("{} = ?", ident(&field.name)));
            params.push(to_sql(value));
        }
        Ok(SqlExpr::new(sql.join(" AND "), params))
    }

    fn decode_row(&self, row: &rusqlite::Row<'_>) -> StoreResult<Item> {
        let mut item = Item::new();
        for (index, attr) in self.meta.attrs.iter().enumerate() {
            let column = row.get_ref(index).map_err(sql_error)?;
            let value = from_sql(attr.attr_type, column)?;
            if !value.is_null() {
                item.set(attr.name.clone(), value);
            }
        }
        Ok(item)
    }

    fn select(&self, conn: &Connection, tail: &str, params: &[SqlValue]) -> StoreResult<Vec<Item>> {
        let sql = format!("SELECT {} FROM {}{}", self.columns, self.table, tail);
        let mut stmt = conn.prepare(&sql).map_err(sql_error)?;
        let mut rows = stmt.query(params_from_iter(params.iter())).map_err(sql_error)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().map_err(sql_error)? {
            items.push(self.decode_row(row)?);
        }
        Ok(items)
    }

    fn read_locked(&self, conn: &Connection, key_item: &Item) -> StoreResult<Option<Item>> {
        let clause = self.key_clause(key_item)?;
        let mut items = self.select(conn, &format!(" WHERE {}", clause.sql), &clause.params)?;
        Ok(items.pop())
    }

    fn order_clause(&self, order: &SearchOrder) -> String {
        let mut terms: Vec<String> = order
            .fields
            .iter()
            .map(|f| format!("{} {}", ident(&f.attr), if f.desc { "DESC" } else { "ASC" }))
            .collect();
        terms.extend(self.key_columns().into_iter().map(|c| format!("{} ASC", c)));
        format!(" ORDER BY {}", terms.join(", "))
    }

    fn where_clause(expr: &Option<SqlExpr>) -> (String, Vec<SqlValue>) {
        match expr {
            Some(expr) => (format!(" WHERE {}", expr.sql), expr.params.clone()),
            None => (String::new(), Vec::new()),
        }
    }
}

impl Store for SqlStore {
    fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    fn create(&self, item: Item) -> StoreResult<Item> {
        let mut prepared = self.meta.prepare_create(&item)?;
        prepared.remove_nulls();
        self.meta.key_config.canonical_key(&prepared)?;
        let params: Vec<SqlValue> = self
            .meta
            .attrs
            .iter()
            .map(|a| prepared.get(&a.name).map_or(SqlValue::Null, to_sql))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            self.columns,
            vec!["?"; params.len()].join(", ")
        );
        let conn = self.conn.lock();
        conn.execute(&sql, params_from_iter(params.iter()))
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::conflict(format!("{} already exists: {}", self.meta.name, e))
                } else {
                    sql_error(e)
                }
            })?;
        Ok(prepared)
    }

    fn read(&self, key: &str) -> StoreResult<Option<Item>> {
        let key_item = self.meta.key_item(key)?;
        let conn = self.conn.lock();
        self.read_locked(&conn, &key_item)
    }

    fn update(
        &self,
        updates: Item,
        precondition: Option<&SearchFilter>,
    ) -> StoreResult<Option<Item>> {
        let prepared = self.meta.prepare_update(&updates)?;
        let precondition = precondition
            .map(|f| f.lock_attrs(&self.meta.attrs))
            .transpose()?;

        let conn = self.conn.lock();
        let Some(mut existing) = self.read_locked(&conn, &prepared)? else {
            return Ok(None);
        };
        if let Some(precondition) = &precondition {
            if !precondition.matches(&existing) {
                return Err(StoreError::conflict(format!(
                    "precondition failed for {}",
                    self.meta.name
                )));
            }
        }

        let changed: Vec<(&String, &Value)> = prepared
            .iter()
            .filter(|(name, _)| !self.meta.key_config.is_required_attr(name))
            .collect();
        if !changed.is_empty() {
            let assignments = changed
                .iter()
                .map(|(name, _)| format!("{} = ?", ident(name)))
                .collect::<Vec<_>>()
                .join(", ");
            let clause = self.key_clause(&prepared)?;
            let mut params: Vec<SqlValue> = changed.iter().map(|(_, v)| to_sql(v)).collect();
            params.extend(clause.params);
            let sql = format!("UPDATE {} SET {} WHERE {}", self.table, assignments, clause.sql);
            conn.execute(&sql, params_from_iter(params.iter()))
                .map_err(sql_error)?;
        }
        existing.merge(&prepared);
        existing.remove_nulls();
        Ok(Some(existing))
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let key_item = self.meta.key_item(key)?;
        let clause = self.key_clause(&key_item)?;
        let sql = format!("DELETE FROM {} WHERE {}", self.table, clause.sql);
        let conn = self.conn.lock();
        let removed = conn
            .execute(&sql, params_from_iter(clause.params.iter()))
            .map_err(sql_error)?;
        Ok(removed > 0)
    }

    fn search(&self, request: &SearchRequest) -> StoreResult<ResultSet> {
        let filter = request.filter.lock_attrs(&self.meta.attrs)?;
        request.order.lock_attrs(&self.meta.attrs)?;
        let offset = PageKey::offset_from(request.page_key.as_deref())?;
        let limit = request.effective_limit(
            self.config.default_search_limit,
            self.config.max_search_limit,
        );

        let native = build_native_expression(&filter, &SqlFilterBuilder::new(&self.meta));
        let (where_sql, mut params) = Self::where_clause(&native.expr);
        let order_sql = self.order_clause(&request.order);
        debug!(
            target: "storekit::sql",
            store = %self.meta.name,
            fully_handled = native.fully_handled,
            "search"
        );

        let conn = self.conn.lock();
        if native.fully_handled {
            // One extra row tells us whether another page exists
            params.push(SqlValue::Integer((limit + 1) as i64));
            params.push(SqlValue::Integer(offset as i64));
            let tail = format!("{}{} LIMIT ? OFFSET ?", where_sql, order_sql);
            let mut results = self.select(&conn, &tail, &params)?;
            let has_more = results.len() > limit;
            results.truncate(limit);
            let next_page_key = has_more.then(|| PageKey::Offset(offset + limit).encode());
            return Ok(ResultSet {
                results,
                next_page_key,
            });
        }

        let tail = format!("{}{}", where_sql, order_sql);
        let matches: Vec<Item> = self
            .select(&conn, &tail, &params)?
            .into_iter()
            .filter(|item| native.residual.matches(item))
            .collect();
        Ok(slice_page(matches, offset, limit))
    }

    fn count(&self, filter: &SearchFilter) -> StoreResult<u64> {
        let filter = filter.lock_attrs(&self.meta.attrs)?;
        let native = build_native_expression(&filter, &SqlFilterBuilder::new(&self.meta));
        let (where_sql, params) = Self::where_clause(&native.expr);
        let conn = self.conn.lock();
        if native.fully_handled {
            let sql = format!("SELECT COUNT(*) FROM {}{}", self.table, where_sql);
            let count: i64 = conn
                .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
                .map_err(sql_error)?;
            return Ok(count as u64);
        }
        let count = self
            .select(&conn, &where_sql, &params)?
            .iter()
            .filter(|item| native.residual.matches(item))
            .count();
        Ok(count as u64)
    }

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> StoreResult<Vec<BatchEditResult>> {
        apply_edits_individually(self, edits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use storekit_core::{Attr, KeySecret};
    use uuid::Uuid;

    fn meta() -> Arc<StoreMeta> {
        Arc::new(
            StoreMeta::builder("docs")
                .attr(Attr::new("id", AttrType::Uuid))
                .attr(Attr::new("title", AttrType::Str))
                .attr(Attr::new("score", AttrType::Float))
                .attr(Attr::new("done", AttrType::Bool))
                .attr(Attr::new("at", AttrType::Datetime))
                .attr(Attr::new("blob", AttrType::Binary))
                .attr(Attr::new("doc", AttrType::Json))
                .key_attr("id")
                .build()
                .unwrap(),
        )
    }

    fn store() -> SqlStore {
        SqlStore::open_in_memory(meta()).unwrap()
    }

    fn doc(title: &str, score: f64) -> Item {
        Item::new()
            .with("id", Uuid::new_v4())
            .with("title", title)
            .with("score", score)
    }

    #[test]
    fn test_round_trips_every_type() {
        let store = store();
        let item = Item::new()
            .with("id", Uuid::new_v4())
            .with("title", "hello")
            .with("score", 1.5)
            .with("done", true)
            .with("at", Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap())
            .with("blob", vec![0u8, 1, 255])
            .with("doc", serde_json::json!({"a": [1, 2]}));
        let created = store.create(item.clone()).unwrap();
        let key = store.meta().key_str(&created).unwrap();
        assert_eq!(store.read(&key).unwrap(), Some(item));
    }

    #[test]
    fn test_nanosecond_timestamps_store_and_match_as_micros() {
        let store = store();
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let created = store.create(doc("a", 1.0).with("at", at)).unwrap();
        let micros = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(created.get("at"), Some(&Value::DateTime(micros)));
        let key = store.meta().key_str(&created).unwrap();
        assert_eq!(store.read(&key).unwrap(), Some(created));
        assert_eq!(store.count(&SearchFilter::eq("at", at)).unwrap(), 1);
        assert_eq!(store.count(&SearchFilter::eq("at", micros)).unwrap(), 1);
    }

    #[test]
    fn test_null_reads_back_absent() {
        let store = store();
        let item = doc("a", 1.0).with("done", Value::Null);
        let key = store.meta().key_str(&item).unwrap();
        store.create(item).unwrap();
        assert!(!store.read(&key).unwrap().unwrap().contains("done"));
    }

    #[test]
    fn test_duplicate_key_conflicts() {
        let store = store();
        let item = doc("a", 1.0);
        store.create(item.clone()).unwrap();
        assert!(matches!(
            store.create(item).unwrap_err(),
            StoreError::Conflict { .. }
        ));
    }

    #[test]
    fn test_update_and_delete() {
        let store = store();
        let item = doc("a", 1.0);
        let key = store.meta().key_str(&item).unwrap();
        store.create(item.clone()).unwrap();

        let id = item.get("id").cloned().unwrap();
        let updated = store
            .update(Item::new().with("id", id.clone()).with("title", "b"), None)
            .unwrap()
            .unwrap();
        assert_eq!(updated.get("title"), Some(&Value::String("b".into())));
        assert_eq!(store.read(&key).unwrap(), Some(updated));

        let pre = SearchFilter::eq("title", "zzz");
        assert!(store
            .update(Item::new().with("id", id).with("title", "c"), Some(&pre))
            .is_err());

        assert!(store.delete(&key).unwrap());
        assert!(!store.delete(&key).unwrap());
    }

    #[test]
    fn test_update_absent_is_none() {
        let store = store();
        let updates = Item::new().with("id", Uuid::new_v4()).with("title", "x");
        assert!(store.update(updates, None).unwrap().is_none());
    }

    #[test]
    fn test_pushdown_matches_in_memory_semantics() {
        let store = store();
        let items = vec![
            doc("alpha", 1.0),
            doc("beta", 2.0),
            doc("Gamma", 3.0),
            Item::new().with("id", Uuid::new_v4()).with("score", 4.0),
        ];
        for item in &items {
            store.create(item.clone()).unwrap();
        }
        let filters = vec![
            SearchFilter::eq("title", "beta"),
            SearchFilter::ne("title", "beta"),
            !SearchFilter::eq("title", "beta"),
            SearchFilter::gt("score", 1.5) & SearchFilter::lt("score", 4),
            SearchFilter::starts_with("title", "al"),
            SearchFilter::contains("title", "amm"),
            SearchFilter::ends_with("title", "ta"),
            SearchFilter::contains("title", "GAMMA").ignore_case(),
            SearchFilter::one_of("title", ["alpha", "Gamma"]),
            SearchFilter::not_exists("title"),
            SearchFilter::eq("title", "alpha") | SearchFilter::ends_with("title", "ma"),
            SearchFilter::query("ALP"),
        ];
        for filter in filters {
            let locked = filter.lock_attrs(&store.meta().attrs).unwrap();
            let expected = items.iter().filter(|i| locked.matches(i)).count() as u64;
            assert_eq!(store.count(&filter).unwrap(), expected, "filter {:?}", filter);
            let found = store.search_all(&filter, &SearchOrder::new()).unwrap();
            assert_eq!(found.len() as u64, expected, "filter {:?}", filter);
        }
    }

    #[test]
    fn test_json_columns_stay_residual() {
        let store = store();
        let meta = store.meta().clone();
        let builder = SqlFilterBuilder::new(&meta);
        let filter = SearchFilter::eq("doc", serde_json::json!({"a": 1}))
            .lock_attrs(&meta.attrs)
            .unwrap();
        let native = build_native_expression(&filter, &builder);
        assert!(native.expr.is_none());
        assert!(!native.fully_handled);
    }

    #[test]
    fn test_paging_with_order() {
        let store = store();
        for i in 0..7 {
            store.create(doc(&format!("t{}", i), i as f64)).unwrap();
        }
        let mut request = SearchRequest::new()
            .with_order(SearchOrder::desc("score"))
            .with_limit(3);
        let mut scores = Vec::new();
        loop {
            let page = store.search(&request).unwrap();
            scores.extend(page.results.iter().map(|i| i.get("score").unwrap().as_f64().unwrap()));
            match page.next_page_key {
                Some(key) => request.page_key = Some(key),
                None => break,
            }
        }
        assert_eq!(scores, vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_residual_paging() {
        let store = store();
        for i in 0..5 {
            store.create(doc(&format!("x{}", i), i as f64)).unwrap();
        }
        let request = SearchRequest::new()
            .with_filter(SearchFilter::contains("title", "X").ignore_case())
            .with_order(SearchOrder::asc("score"))
            .with_limit(2);
        let first = store.search(&request).unwrap();
        assert_eq!(first.results.len(), 2);
        let all = store
            .search_all(&request.filter, &request.order)
            .unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_composite_and_sealed_keys() {
        let meta = Arc::new(
            StoreMeta::builder("pairs")
                .attr(Attr::new("pk", AttrType::Int))
                .attr(Attr::new("sk", AttrType::Str))
                .attr(Attr::new("v", AttrType::Int))
                .key_partition_sort("pk", "sk", KeySecret::generate())
                .build()
                .unwrap(),
        );
        let store = SqlStore::open_in_memory(Arc::clone(&meta)).unwrap();
        let item = Item::new().with("pk", 1).with("sk", "a").with("v", 3);
        store.create(item.clone()).unwrap();
        let key = meta.key_str(&item).unwrap();
        assert_eq!(store.read(&key).unwrap(), Some(item));
    }

    #[test]
    fn test_shared_connection_holds_two_tables() {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let a = SqlStore::new(Arc::clone(&conn), meta()).unwrap();
        let other = Arc::new(
            StoreMeta::builder("others")
                .attr(Attr::new("n", AttrType::Int))
                .key_attr("n")
                .build()
                .unwrap(),
        );
        let b = SqlStore::new(conn, other).unwrap();
        a.create(doc("a", 1.0)).unwrap();
        b.create(Item::new().with("n", 1)).unwrap();
        assert_eq!(a.count(&SearchFilter::IncludeAll).unwrap(), 1);
        assert_eq!(b.count(&SearchFilter::IncludeAll).unwrap(), 1);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let item = doc("kept", 1.0);
        let key = meta().key_str(&item).unwrap();
        {
            let store = SqlStore::open(&path, meta()).unwrap();
            store.create(item.clone()).unwrap();
        }
        let reopened = SqlStore::open(&path, meta()).unwrap();
        assert_eq!(reopened.read(&key).unwrap(), Some(item));
    }
}
